use std::fmt;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, MongoError>;

/// The error taxonomy for the wire client core.
///
/// Variants that wrap a non-`Clone` source (chiefly `std::io::Error`) are
/// flattened to a string on construction so that `Protocol`'s failure
/// fan-out can clone a single `MongoError` into every waiter in the request
/// table without re-deriving the source.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MongoError {
    /// Every host in the `Manager` was tried without reaching `CONNECTED`.
    #[error("failed to connect to any seed or discovered host")]
    ConnectionFailed,

    /// An operation was submitted after disposal or while torn down.
    #[error("not connected")]
    NotConnected,

    /// A reply document carried `ok: false`.
    #[error("command failed: {0}")]
    CommandFailed(String),

    /// A reply parsed but was semantically wrong for its context.
    #[error("invalid reply: {0}")]
    InvalidReply(String),

    /// An `ismaster` reply indicated a non-primary where a primary was required.
    #[error("not master")]
    NotMaster,

    /// Framing or op-code violated the wire protocol's invariants.
    #[error("unexpected protocol state: {0}")]
    ProtocolUnexpected(String),

    /// `OutputStream` could not deliver the full byte buffer to the OS.
    #[error("short write: wrote {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    /// A message body did not parse within its declared length.
    #[error("invalid message body: {0}")]
    MessageInvalid(String),

    /// A framed length prefix was below the 16-byte header minimum.
    #[error("insufficient data for message header")]
    InsufficientData,

    /// Disposal or caller-driven cancellation cut short an operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Wraps the underlying transport error, flattened to a string so the
    /// error stays `Clone`.
    #[error("io error: {0}")]
    Io(String),

    /// The `mongodb://` URI could not be parsed.
    #[error("invalid connection string: {0}")]
    InvalidUri(String),

    /// A `connect_timeout` or `socket_timeout` bound elapsed before the
    /// operation completed.
    #[error("timed out: {0}")]
    Timeout(String),

    /// A caller requested behavior this crate deliberately does not implement.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl From<std::io::Error> for MongoError {
    fn from(err: std::io::Error) -> Self {
        MongoError::Io(err.to_string())
    }
}

impl MongoError {
    /// True for errors that should trigger a discovery retry rather than
    /// surface to the caller who issued the triggering request (see
    /// SPEC_FULL.md §7, "Propagation policy").
    pub fn is_discovery_retryable(&self) -> bool {
        matches!(
            self,
            MongoError::NotMaster | MongoError::ConnectionFailed | MongoError::Timeout(_)
        )
    }
}

/// Helper used by code paths that need to describe an error without an
/// existing `MongoError` to hand (e.g. fixed diagnostic strings baked into
/// an outer variant).
pub(crate) fn invalid_reply(msg: impl fmt::Display) -> MongoError {
    MongoError::InvalidReply(msg.to_string())
}
