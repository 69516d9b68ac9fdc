use std::time::Duration;

use rand::Rng;
use tracing::debug;

const MAX_DELAY_MS: u32 = 60_000;

/// Tracks seed hosts (from the URI) and discovered hosts (learned from
/// `ismaster` replies), handing out candidates in seed-then-discovered
/// order, and computing a backoff delay once both lists are exhausted.
#[derive(Debug, Default)]
pub struct Manager {
    seeds: Vec<String>,
    hosts: Vec<String>,
    offset: usize,
    delay_ms: u32,
}

/// What a caller should do next: try a host, or wait before retrying.
pub enum NextCandidate {
    Host(String),
    Delay(Duration),
}

impl Manager {
    pub fn new() -> Self {
        Manager::default()
    }

    pub fn add_seed(&mut self, seed: impl Into<String>) {
        let seed = seed.into();
        if !self.seeds.contains(&seed) {
            self.seeds.push(seed);
        }
    }

    pub fn add_host(&mut self, host: impl Into<String>) {
        let host = host.into();
        if !self.hosts.contains(&host) {
            self.hosts.push(host);
        }
    }

    pub fn clear_seeds(&mut self) {
        self.seeds.clear();
    }

    pub fn clear_hosts(&mut self) {
        self.hosts.clear();
    }

    pub fn remove_host(&mut self, host: &str) {
        self.hosts.retain(|h| h != host);
    }

    pub fn remove_seed(&mut self, seed: &str) {
        self.seeds.retain(|s| s != seed);
    }

    /// Resets the reconnection delay. Call after successfully reaching a
    /// primary.
    pub fn reset_delay(&mut self) {
        self.delay_ms = 0;
    }

    /// Returns the next candidate to try, or a delay once both the seed and
    /// discovered lists have been walked. The internal offset resets to the
    /// start of the seed list once exhausted, so the next call after a
    /// delay begins a fresh pass.
    pub fn next(&mut self) -> NextCandidate {
        if self.offset < self.seeds.len() {
            let host = self.seeds[self.offset].clone();
            self.offset += 1;
            return NextCandidate::Host(host);
        }

        let host_offset = self.offset - self.seeds.len();
        if host_offset < self.hosts.len() {
            let host = self.hosts[host_offset].clone();
            self.offset += 1;
            return NextCandidate::Host(host);
        }

        self.offset = 0;

        self.delay_ms = if self.delay_ms == 0 {
            rand::thread_rng().gen_range(200..=1000)
        } else {
            (self.delay_ms.saturating_mul(2)).clamp(1, MAX_DELAY_MS)
        };

        debug!(delay_ms = self.delay_ms, "no more hosts, delaying");
        NextCandidate::Delay(Duration::from_millis(self.delay_ms as u64))
    }
}
