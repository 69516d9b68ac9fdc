use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use crate::error::{MongoError, Result};

/// A 12-byte MongoDB document identifier.
///
/// Layout: 4-byte big-endian seconds-since-epoch timestamp, 3 bytes derived
/// from the host identity, 2 bytes of process identity, 3 bytes of a
/// monotonically incrementing counter. Ordering is raw byte comparison.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        ObjectId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    /// Parses the 24-character lowercase hex string form. Any length other
    /// than exactly 24 is rejected.
    pub fn parse_hex(s: &str) -> Result<Self> {
        if s.len() != 24 {
            return Err(MongoError::InvalidReply(format!(
                "object id string must be exactly 24 characters, got {}",
                s.len()
            )));
        }
        let mut bytes = [0u8; 12];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let hi = hex_nibble(s.as_bytes()[i * 2])?;
            let lo = hex_nibble(s.as_bytes()[i * 2 + 1])?;
            *byte = (hi << 4) | lo;
        }
        Ok(ObjectId(bytes))
    }

    /// Renders the canonical 24-character lowercase hex form.
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(24);
        for byte in self.0 {
            out.push(HEX_CHARS[(byte >> 4) as usize] as char);
            out.push(HEX_CHARS[(byte & 0x0f) as usize] as char);
        }
        out
    }
}

const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

fn hex_nibble(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(MongoError::InvalidReply(format!(
            "invalid hex character {:?} in object id",
            c as char
        ))),
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId(\"{}\")", self.to_hex())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// FNV-1a over the hostname, truncated to the low 3 bytes. Not
/// cryptographic; only needs to spread hostnames across the 24-bit space
/// reasonably well (see DESIGN.md for why this replaces the original's MD5
/// digest).
fn host_identifier() -> [u8; 3] {
    let hostname = hostname_best_effort();
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in hostname.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    [(hash >> 16) as u8, (hash >> 8) as u8, hash as u8]
}

/// Matches the original's `gethostname()` call via the `hostname` crate
/// rather than sniffing shell-only env vars (`HOSTNAME` is not exported to
/// child processes by most shells, so the previous env-var approach hashed
/// the literal string `"localhost"` on most real hosts).
fn hostname_best_effort() -> String {
    hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string())
}

/// Generates fresh `ObjectId`s: timestamp + host id + pid + atomic counter.
///
/// The counter is seeded randomly at process start (rather than at zero, as
/// the original does) so that ids minted right after process restart don't
/// collide with ids minted just before a prior restart; it then increments
/// with wrapping at 2^24, matching the original's modular counter.
pub struct ObjectIdGenerator {
    host_id: [u8; 3],
    pid: u16,
    counter: AtomicU32,
}

static GENERATOR: OnceLock<ObjectIdGenerator> = OnceLock::new();

impl ObjectIdGenerator {
    pub fn new() -> Self {
        ObjectIdGenerator {
            host_id: host_identifier(),
            pid: std::process::id() as u16,
            counter: AtomicU32::new(rand::random::<u32>() & 0x00ff_ffff),
        }
    }

    /// The process-wide default generator, lazily constructed on first use.
    pub fn shared() -> &'static ObjectIdGenerator {
        GENERATOR.get_or_init(ObjectIdGenerator::new)
    }

    pub fn generate(&self) -> ObjectId {
        let seconds = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);

        let previous = self.counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            Some((n + 1) & 0x00ff_ffff)
        });
        let inc = previous.unwrap_or(0);

        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..7].copy_from_slice(&self.host_id);
        bytes[7..9].copy_from_slice(&self.pid.to_ne_bytes());
        let inc_be = inc.to_be_bytes();
        bytes[9..12].copy_from_slice(&inc_be[1..4]);

        ObjectId(bytes)
    }
}

impl Default for ObjectIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let id = ObjectId::parse_hex("507f1f77bcf86cd799439011").unwrap();
        assert_eq!(
            id.as_bytes(),
            &[0x50, 0x7f, 0x1f, 0x77, 0xbc, 0xf8, 0x6c, 0xd7, 0x99, 0x43, 0x90, 0x11]
        );
        assert_eq!(id.to_hex(), "507f1f77bcf86cd799439011");
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(ObjectId::parse_hex("507f1f77bcf86cd79943901").is_err());
        assert!(ObjectId::parse_hex("507f1f77bcf86cd7994390111").is_err());
    }

    #[test]
    fn rejects_non_hex() {
        assert!(ObjectId::parse_hex("zzzf1f77bcf86cd799439011").is_err());
    }

    #[test]
    fn ordering_is_byte_compare() {
        let a = ObjectId::from_bytes([0; 12]);
        let mut higher = [0; 12];
        higher[11] = 1;
        let b = ObjectId::from_bytes(higher);
        assert!(a < b);
    }

    #[test]
    fn generator_increments_counter_and_wraps() {
        let gen = ObjectIdGenerator::new();
        let first = gen.generate();
        let second = gen.generate();
        // Same second, same host/pid => only the low counter bytes differ
        // (unless the clock ticked over, which is astronomically unlikely
        // inside a single test).
        assert_ne!(first.as_bytes()[9..12], second.as_bytes()[9..12]);
    }
}
