use std::time::Duration;

use crate::error::{MongoError, Result};
use crate::write_concern::WriteConcern;

const DEFAULT_PORT: u16 = 27017;

/// The parsed form of a `mongodb://` URI. Constructed once via
/// [`ClientOptions::parse`] and handed to `Connection::new`; there is no
/// ambient/global configuration state and no environment variable is ever
/// consulted.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    pub seeds: Vec<String>,
    pub replica_set: Option<String>,
    pub slave_ok: bool,
    pub write_concern: WriteConcern,
    pub connect_timeout: Duration,
    pub socket_timeout: Duration,
}

impl ClientOptions {
    /// Parses a `mongodb://host[:port][,host[:port]]*[/][?opts]` URI.
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("mongodb://")
            .ok_or_else(|| MongoError::InvalidUri("uri must start with mongodb://".into()))?;

        let (host_section, query_section) = match rest.find(['/', '?']) {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };
        if host_section.is_empty() {
            return Err(MongoError::InvalidUri("uri has no host".into()));
        }

        let query = query_section
            .trim_start_matches('/')
            .trim_start_matches('?');

        let mut options = ClientOptions {
            seeds: Vec::new(),
            replica_set: None,
            slave_ok: false,
            write_concern: WriteConcern::acknowledged(),
            connect_timeout: Duration::ZERO,
            socket_timeout: Duration::ZERO,
        };

        for host in host_section.split(',') {
            if host.is_empty() {
                continue;
            }
            let seed = if host.contains(':') {
                host.to_string()
            } else {
                format!("{host}:{DEFAULT_PORT}")
            };
            options.seeds.push(seed);
        }
        if options.seeds.is_empty() {
            return Err(MongoError::InvalidUri("uri has no host".into()));
        }

        let mut safe = true;
        let mut w: Option<i32> = None;

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = match pair.split_once('=') {
                Some((k, v)) => (k.to_ascii_lowercase(), v),
                None => continue,
            };
            let truthy = !value.eq_ignore_ascii_case("false");
            match key.as_str() {
                "replicaset" => options.replica_set = Some(value.to_string()),
                "slaveok" => options.slave_ok = truthy,
                "safe" => safe = truthy,
                "w" => {
                    w = Some(value.parse().map_err(|_| {
                        MongoError::InvalidUri(format!("invalid w value: {value}"))
                    })?);
                }
                "wtimeoutms" => {
                    let ms: u32 = value.parse().map_err(|_| {
                        MongoError::InvalidUri(format!("invalid wtimeoutms value: {value}"))
                    })?;
                    options.write_concern.wtimeout_ms = ms;
                }
                "fsync" => options.write_concern.fsync = truthy,
                "journal" => options.write_concern.journal = truthy,
                "connecttimeoutms" => {
                    let ms: u64 = value.parse().map_err(|_| {
                        MongoError::InvalidUri(format!("invalid connecttimeoutms value: {value}"))
                    })?;
                    options.connect_timeout = Duration::from_millis(ms);
                }
                "sockettimeoutms" => {
                    let ms: u64 = value.parse().map_err(|_| {
                        MongoError::InvalidUri(format!("invalid sockettimeoutms value: {value}"))
                    })?;
                    options.socket_timeout = Duration::from_millis(ms);
                }
                _ => {}
            }
        }

        options.write_concern.w = match w {
            Some(explicit) => explicit,
            None if !safe => -1,
            None => 1,
        };

        Ok(options)
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions::parse("mongodb://127.0.0.1:27017").expect("default uri always parses")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_default_port_and_multiple_hosts() {
        let options = ClientOptions::parse("mongodb://a,b:27018/?replicaSet=rs0").unwrap();
        assert_eq!(options.seeds, vec!["a:27017", "b:27018"]);
        assert_eq!(options.replica_set.as_deref(), Some("rs0"));
    }

    #[test]
    fn rejects_missing_scheme() {
        assert!(ClientOptions::parse("a:27017").is_err());
    }

    #[test]
    fn safe_false_yields_unacknowledged_write_concern() {
        let options = ClientOptions::parse("mongodb://a/?safe=false").unwrap();
        assert_eq!(options.write_concern.w, -1);
    }

    #[test]
    fn explicit_w_overrides_safe() {
        let options = ClientOptions::parse("mongodb://a/?w=3").unwrap();
        assert_eq!(options.write_concern.w, 3);
    }

    #[test]
    fn slave_ok_and_timeouts_parse() {
        let options =
            ClientOptions::parse("mongodb://a/?slaveOk=true&connectTimeoutMS=500&socketTimeoutMS=2000")
                .unwrap();
        assert!(options.slave_ok);
        assert_eq!(options.connect_timeout, std::time::Duration::from_millis(500));
        assert_eq!(options.socket_timeout, std::time::Duration::from_millis(2000));
    }
}
