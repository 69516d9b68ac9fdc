use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, warn};

use crate::error::{MongoError, Result};
use crate::wire::Message;

/// Waiters keyed by the request id they're registered under, shared between
/// the writer task (which registers/fails them) and `Protocol`'s read loop
/// (which fulfills them on reply).
pub type Waiters = Arc<Mutex<HashMap<i32, oneshot::Sender<Result<Message>>>>>;

struct QueuedWrite {
    bytes: Vec<u8>,
    request_id: i32,
    ack: Option<oneshot::Sender<Result<()>>>,
}

/// Serialises messages onto a duplex byte stream through a single writer
/// task, so writes from concurrent callers never interleave. Each write is
/// admitted with the request id (0 for fire-and-forget) its waiter, if any,
/// is keyed on.
#[derive(Clone)]
pub struct OutputStream {
    tx: mpsc::UnboundedSender<QueuedWrite>,
    waiters: Waiters,
}

impl OutputStream {
    /// `socket_timeout` of `Duration::ZERO` means unbounded, matching the
    /// "unset" default `ClientOptions` parses when the URI carries no
    /// `socketTimeoutMS`.
    pub fn new<W>(writer: W, cancel: watch::Receiver<bool>, socket_timeout: Duration) -> (Self, Waiters)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let waiters: Waiters = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        let task_waiters = waiters.clone();
        tokio::spawn(Self::run(writer, rx, cancel, task_waiters, socket_timeout));
        (OutputStream { tx, waiters: waiters.clone() }, waiters)
    }

    async fn run(
        mut writer: impl AsyncWrite + Unpin,
        mut rx: mpsc::UnboundedReceiver<QueuedWrite>,
        mut cancel: watch::Receiver<bool>,
        waiters: Waiters,
        socket_timeout: Duration,
    ) {
        loop {
            tokio::select! {
                biased;
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        Self::fail_all(&waiters, MongoError::Cancelled).await;
                        return;
                    }
                }
                item = rx.recv() => {
                    let Some(queued) = item else { return };
                    let outcome = Self::write_and_flush(&mut writer, &queued.bytes, socket_timeout).await;
                    match outcome {
                        Ok(()) => {
                            debug!(request_id = queued.request_id, "write admitted");
                            if let Some(ack) = queued.ack {
                                let _ = ack.send(Ok(()));
                            }
                        }
                        Err(err) => {
                            warn!(request_id = queued.request_id, error = %err, "write failed, tearing down stream");
                            if queued.request_id != 0 {
                                if let Some(sender) = waiters.lock().await.remove(&queued.request_id) {
                                    let _ = sender.send(Err(err.clone()));
                                }
                            }
                            if let Some(ack) = queued.ack {
                                let _ = ack.send(Err(err.clone()));
                            }
                            Self::fail_all(&waiters, err).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Writes and flushes `bytes`, bounded by `socket_timeout` when set
    /// (matching the original's `SO_SNDTIMEO` on the raw socket). A timeout
    /// or I/O failure is always reported as a short write, since there is
    /// no portable way to learn how many bytes actually reached the peer.
    async fn write_and_flush(
        writer: &mut (impl AsyncWrite + Unpin),
        bytes: &[u8],
        socket_timeout: Duration,
    ) -> Result<()> {
        let write = async {
            writer.write_all(bytes).await?;
            writer.flush().await
        };
        let outcome = if socket_timeout.is_zero() {
            write.await
        } else {
            match tokio::time::timeout(socket_timeout, write).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(MongoError::Timeout(format!(
                        "write of {} bytes did not complete within {:?}",
                        bytes.len(),
                        socket_timeout
                    )))
                }
            }
        };
        outcome.map_err(|_| MongoError::ShortWrite {
            written: 0,
            expected: bytes.len(),
        })
    }

    async fn fail_all(waiters: &Waiters, err: MongoError) {
        let drained = std::mem::take(&mut *waiters.lock().await);
        for (_, sender) in drained {
            let _ = sender.send(Err(err.clone()));
        }
    }

    /// Fire-and-forget write (COMPLETE_ON_WRITE): resolves once the bytes
    /// are flushed to the OS. Used for REPLY, MSG, and KILL_CURSORS.
    pub async fn write_and_forget(&self, bytes: Vec<u8>) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(QueuedWrite { bytes, request_id: 0, ack: Some(ack_tx) })
            .map_err(|_| MongoError::NotConnected)?;
        ack_rx.await.map_err(|_| MongoError::Cancelled)?
    }

    /// Registers a waiter keyed on `request_id` before queuing the bytes,
    /// so a reply racing with admission can never be missed. Used for
    /// COMPLETE_ON_REPLY and COMPLETE_ON_GETLASTERROR writes.
    pub async fn write_awaiting_reply(
        &self,
        bytes: Vec<u8>,
        request_id: i32,
    ) -> Result<oneshot::Receiver<Result<Message>>> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.insert(request_id, tx);
        if self
            .tx
            .send(QueuedWrite { bytes, request_id, ack: None })
            .is_err()
        {
            self.waiters.lock().await.remove(&request_id);
            return Err(MongoError::NotConnected);
        }
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bson::Document;
    use crate::wire::{OpQuery, QueryFlags};
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn fire_and_forget_flushes_bytes() {
        let (client, mut server) = tokio::io::duplex(1024);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (output, _waiters) = OutputStream::new(client, cancel_rx, Duration::ZERO);

        output.write_and_forget(vec![1, 2, 3]).await.unwrap();

        let mut buf = [0u8; 3];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }

    #[tokio::test]
    async fn reply_fulfills_registered_waiter() {
        let (client, _server) = tokio::io::duplex(1024);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (output, waiters) = OutputStream::new(client, cancel_rx, Duration::ZERO);

        let query = OpQuery {
            flags: QueryFlags::empty(),
            full_collection_name: "db.c".to_string(),
            skip: 0,
            limit: 0,
            query: Document::empty(),
            fields: None,
        };
        let bytes = query.serialize(5, 0);
        let rx = output.write_awaiting_reply(bytes, 5).await.unwrap();

        let sender = waiters.lock().await.remove(&5).unwrap();
        let reply = crate::wire::OpReply {
            flags: crate::wire::ReplyFlags::empty(),
            cursor_id: 0,
            starting_from: 0,
            documents: vec![],
        };
        sender
            .send(Ok(Message::Reply {
                request_id: 99,
                response_to: 5,
                body: reply,
            }))
            .unwrap();

        let message = rx.await.unwrap().unwrap();
        assert_eq!(message.response_to(), 5);
    }

    #[tokio::test]
    async fn socket_timeout_fails_a_stalled_write() {
        let (client, _server) = tokio::io::duplex(4);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (output, _waiters) = OutputStream::new(client, cancel_rx, Duration::from_millis(20));

        // Nothing ever reads from `_server`, so once the tiny duplex buffer
        // fills, the write stalls until the timeout fires.
        let err = output.write_and_forget(vec![0u8; 64]).await.unwrap_err();
        assert!(matches!(err, MongoError::ShortWrite { .. }));
    }
}
