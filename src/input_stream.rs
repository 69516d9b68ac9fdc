use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tracing::trace;

use crate::error::{MongoError, Result};
use crate::wire::{Message, HEADER_LEN};

/// Consumes a duplex byte stream and produces a lazy sequence of fully
/// framed [`Message`]s. Only one [`read_message`](InputStream::read_message)
/// call is ever in flight at a time; callers (in practice, `Protocol`'s
/// single read-loop task) serialise calls structurally.
pub struct InputStream<R> {
    reader: R,
    cancel: watch::Receiver<bool>,
    socket_timeout: Duration,
}

impl<R> InputStream<R>
where
    R: AsyncRead + Unpin,
{
    /// `socket_timeout` of `Duration::ZERO` means unbounded, matching the
    /// "unset" default `ClientOptions` parses when the URI carries no
    /// `socketTimeoutMS`.
    pub fn new(reader: R, cancel: watch::Receiver<bool>, socket_timeout: Duration) -> Self {
        InputStream { reader, cancel, socket_timeout }
    }

    /// Reads one complete message: a 4-byte length prefix, then the
    /// remainder of the body. Short reads loop and re-suspend rather than
    /// erroring; only EOF mid-message is fatal. Bounded by `socket_timeout`
    /// when set, matching the original's `SO_RCVTIMEO` on the raw socket.
    pub async fn read_message(&mut self) -> Result<Message> {
        if self.socket_timeout.is_zero() {
            return self.read_message_inner().await;
        }
        match tokio::time::timeout(self.socket_timeout, self.read_message_inner()).await {
            Ok(result) => result,
            Err(_) => Err(MongoError::Timeout(format!(
                "no message read within {:?}",
                self.socket_timeout
            ))),
        }
    }

    async fn read_message_inner(&mut self) -> Result<Message> {
        if *self.cancel.borrow() {
            return Err(MongoError::Cancelled);
        }

        let mut len_buf = [0u8; 4];
        self.fill_or_cancel(&mut len_buf).await?;
        let total_length = i32::from_le_bytes(len_buf);
        if total_length <= HEADER_LEN as i32 {
            return Err(MongoError::InsufficientData);
        }

        let mut buffer = vec![0u8; total_length as usize];
        buffer[0..4].copy_from_slice(&len_buf);
        self.fill_or_cancel(&mut buffer[4..]).await?;

        trace!(total_length, "read complete message");
        Message::parse(&buffer)
    }

    async fn fill_or_cancel(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            tokio::select! {
                biased;
                _ = self.cancel.changed() => {
                    if *self.cancel.borrow() {
                        return Err(MongoError::Cancelled);
                    }
                }
                read = self.reader.read(&mut buf[filled..]) => {
                    let n = read.map_err(MongoError::from)?;
                    if n == 0 {
                        return Err(MongoError::ProtocolUnexpected(
                            "stream closed mid-message".into(),
                        ));
                    }
                    filled += n;
                }
            }
        }
        Ok(())
    }
}
