use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::{error, warn};

use crate::bson::Document;
use crate::error::{MongoError, Result};
use crate::input_stream::InputStream;
use crate::output_stream::{OutputStream, Waiters};
use crate::wire::{
    DeleteFlags, InsertFlags, Message, OpDelete, OpGetMore, OpInsert, OpKillCursors, OpMsg,
    OpQuery, OpUpdate, QueryFlags, UpdateFlags,
};
use crate::write_concern::WriteConcern;

/// Owns both streams for a single connection, maintains the request table,
/// and orchestrates reply dispatch. The read loop is a single spawned task;
/// writes go through a single spawned writer task inside [`OutputStream`].
pub struct Protocol {
    output: OutputStream,
    waiters: Waiters,
    counter: AtomicI32,
    cancel: watch::Sender<bool>,
    failure: watch::Receiver<Option<MongoError>>,
    getlasterror_defaults: WriteConcern,
}

impl Protocol {
    /// `socket_timeout` of `Duration::ZERO` means unbounded, matching the
    /// "unset" default `ClientOptions` parses when the URI carries no
    /// `socketTimeoutMS`; it bounds every individual read and write on the
    /// underlying stream, not the lifetime of the connection as a whole.
    pub fn new<S>(stream: S, getlasterror_defaults: WriteConcern, socket_timeout: Duration) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (output, waiters) = OutputStream::new(writer, cancel_rx.clone(), socket_timeout);
        let (failure_tx, failure_rx) = watch::channel(None);

        let read_waiters = waiters.clone();
        let read_cancel_tx = cancel_tx.clone();
        tokio::spawn(async move {
            let mut input = InputStream::new(reader, cancel_rx, socket_timeout);
            loop {
                match input.read_message().await {
                    Ok(message) => {
                        let response_to = message.response_to();
                        let sender = read_waiters.lock().await.remove(&response_to);
                        if let Some(sender) = sender {
                            let _ = sender.send(Ok(message));
                        }
                    }
                    Err(err) => {
                        error!(error = %err, "protocol read loop failed");
                        Self::fail_internal(&read_waiters, &read_cancel_tx, &failure_tx, err).await;
                        break;
                    }
                }
            }
        });

        Protocol {
            output,
            waiters,
            counter: AtomicI32::new(rand::thread_rng().gen_range(0..i32::MAX)),
            cancel: cancel_tx,
            failure: failure_rx,
            getlasterror_defaults,
        }
    }

    /// A receiver that observes the connection's failure signal; `None`
    /// until the protocol fails, then `Some(error)` once and forever.
    pub fn failure_signal(&self) -> watch::Receiver<Option<MongoError>> {
        self.failure.clone()
    }

    fn next_request_id(&self) -> i32 {
        loop {
            let current = self.counter.load(Ordering::SeqCst);
            let next = if current >= i32::MAX { 0 } else { current + 1 };
            if self
                .counter
                .compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
                && next != 0
            {
                return next;
            }
        }
    }

    pub async fn query(
        &self,
        full_collection_name: impl Into<String>,
        flags: QueryFlags,
        skip: i32,
        limit: i32,
        query: Document,
        fields: Option<Document>,
    ) -> Result<Message> {
        let request_id = self.next_request_id();
        let op = OpQuery {
            flags,
            full_collection_name: full_collection_name.into(),
            skip,
            limit,
            query,
            fields,
        };
        self.send_awaiting_reply(op.serialize(request_id, 0), request_id)
            .await
    }

    pub async fn getmore(
        &self,
        full_collection_name: impl Into<String>,
        number_to_return: i32,
        cursor_id: i64,
    ) -> Result<Message> {
        let request_id = self.next_request_id();
        let op = OpGetMore {
            full_collection_name: full_collection_name.into(),
            number_to_return,
            cursor_id,
        };
        self.send_awaiting_reply(op.serialize(request_id, 0), request_id)
            .await
    }

    pub async fn update(
        &self,
        db: &str,
        full_collection_name: impl Into<String>,
        flags: UpdateFlags,
        selector: Document,
        update: Document,
    ) -> Result<Option<Message>> {
        let primary_id = self.next_request_id();
        let op = OpUpdate {
            full_collection_name: full_collection_name.into(),
            flags,
            selector,
            update,
        };
        self.send_unsafe_write(op.serialize(primary_id, 0), db).await
    }

    pub async fn insert(
        &self,
        db: &str,
        full_collection_name: impl Into<String>,
        flags: InsertFlags,
        documents: Vec<Document>,
    ) -> Result<Option<Message>> {
        let primary_id = self.next_request_id();
        let op = OpInsert {
            flags,
            full_collection_name: full_collection_name.into(),
            documents,
        };
        self.send_unsafe_write(op.serialize(primary_id, 0), db).await
    }

    pub async fn delete(
        &self,
        db: &str,
        full_collection_name: impl Into<String>,
        flags: DeleteFlags,
        selector: Document,
    ) -> Result<Option<Message>> {
        let primary_id = self.next_request_id();
        let op = OpDelete {
            full_collection_name: full_collection_name.into(),
            flags,
            selector,
        };
        self.send_unsafe_write(op.serialize(primary_id, 0), db).await
    }

    pub async fn kill_cursors(&self, cursor_ids: Vec<i64>) -> Result<()> {
        let request_id = self.next_request_id();
        let op = OpKillCursors { cursor_ids };
        self.output.write_and_forget(op.serialize(request_id, 0)).await
    }

    pub async fn msg(&self, message: impl Into<String>) -> Result<()> {
        let request_id = self.next_request_id();
        let op = OpMsg { message: message.into() };
        self.output.write_and_forget(op.serialize(request_id, 0)).await
    }

    /// Disposes the protocol: trips the cancellation signal and fails every
    /// pending waiter. Idempotent.
    pub async fn dispose(&self) {
        let _ = self.cancel.send(true);
    }

    async fn send_awaiting_reply(&self, bytes: Vec<u8>, request_id: i32) -> Result<Message> {
        let rx = self.output.write_awaiting_reply(bytes, request_id).await?;
        rx.await.map_err(|_| MongoError::Cancelled)?
    }

    /// Appends a full, separately framed `getlasterror` QUERY immediately
    /// after the primary write bytes, in one write call so no other caller's
    /// bytes can land between them. The waiter is keyed on `primary_id + 1`.
    /// If the concern is fire-and-forget (`w = -1`), no getlasterror is
    /// appended and the call completes once the primary bytes are flushed.
    async fn send_unsafe_write(
        &self,
        mut primary_bytes: Vec<u8>,
        db: &str,
    ) -> Result<Option<Message>> {
        match self.getlasterror_defaults.build_getlasterror(db) {
            None => {
                self.output.write_and_forget(primary_bytes).await?;
                Ok(None)
            }
            Some(getlasterror) => {
                let getlasterror_id = self.next_request_id();
                primary_bytes.extend(getlasterror.serialize(getlasterror_id, 0));
                let message = self
                    .send_awaiting_reply(primary_bytes, getlasterror_id)
                    .await?;
                Ok(Some(message))
            }
        }
    }

    async fn fail_internal(
        waiters: &Waiters,
        cancel: &watch::Sender<bool>,
        failure: &watch::Sender<Option<MongoError>>,
        err: MongoError,
    ) {
        let drained = std::mem::take(&mut *waiters.lock().await);
        for (_, sender) in drained {
            let _ = sender.send(Err(err.clone()));
        }
        let _ = cancel.send(true);
        let _ = failure.send(Some(err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{OpCode, OpReply, ReplyFlags};

    async fn write_framed_reply(
        socket: &mut tokio::io::DuplexStream,
        response_to: i32,
        documents: Vec<Document>,
    ) {
        use tokio::io::AsyncWriteExt;
        let reply = OpReply {
            flags: ReplyFlags::empty(),
            cursor_id: 0,
            starting_from: 0,
            documents,
        };
        let bytes = reply.serialize(1, response_to);
        socket.write_all(&bytes).await.unwrap();
    }

    #[tokio::test]
    async fn query_round_trips_through_protocol() {
        let (client, mut server) = tokio::io::duplex(4096);
        let protocol = Protocol::new(client, WriteConcern::acknowledged(), Duration::ZERO);

        let query_task = tokio::spawn(async move {
            protocol
                .query("db.c", QueryFlags::empty(), 0, 1, Document::empty(), None)
                .await
        });

        // Read the client's request off the wire to learn its request id.
        use tokio::io::AsyncReadExt;
        let mut header = [0u8; 16];
        server.read_exact(&mut header).await.unwrap();
        let total_length = i32::from_le_bytes(header[0..4].try_into().unwrap());
        let request_id = i32::from_le_bytes(header[4..8].try_into().unwrap());
        let mut rest = vec![0u8; total_length as usize - 16];
        server.read_exact(&mut rest).await.unwrap();

        write_framed_reply(&mut server, request_id, vec![Document::empty()]).await;

        let message = query_task.await.unwrap().unwrap();
        assert_eq!(message.op_code(), OpCode::Reply);
    }

    #[tokio::test]
    async fn unacknowledged_insert_completes_without_reply() {
        let (client, mut server) = tokio::io::duplex(4096);
        let protocol = Protocol::new(client, WriteConcern::unacknowledged(), Duration::ZERO);

        let result = protocol
            .insert("db", "db.c", InsertFlags::empty(), vec![Document::empty()])
            .await
            .unwrap();
        assert!(result.is_none());

        use tokio::io::AsyncReadExt;
        let mut header = [0u8; 16];
        server.read_exact(&mut header).await.unwrap();
        let op_code = i32::from_le_bytes(header[12..16].try_into().unwrap());
        assert_eq!(op_code, OpCode::Insert as i32);
    }
}
