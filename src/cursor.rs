use tracing::debug;

use crate::bson::Document;
use crate::connection::Connection;
use crate::error::Result;
use crate::wire::{OpReply, QueryFlags};

const DEFAULT_BATCH_SIZE: i32 = 100;

#[derive(Debug, Clone, Copy)]
enum CursorState {
    NotStarted,
    Active { cursor_id: i64, returned: i32 },
    Exhausted,
}

/// Iterates the result set of a query in batches, issuing `OP_GETMORE` as
/// each batch is consumed and `OP_KILL_CURSORS` if the caller stops before
/// the server-side cursor is exhausted.
///
/// Unlike the original's GObject cursor, there is no finalizer hook that can
/// run an async kill when a `Cursor` is simply dropped; callers that stop
/// early must call [`Cursor::close`] themselves to free the server-side
/// cursor. An abandoned cursor still times out on the server eventually
/// (`NO_CURSOR_TIMEOUT` is not set here), it just isn't reclaimed promptly.
pub struct Cursor {
    connection: Connection,
    database: String,
    collection: String,
    query: Document,
    fields: Option<Document>,
    flags: QueryFlags,
    skip: i32,
    limit: i32,
    batch_size: i32,
    state: CursorState,
}

impl Cursor {
    /// `flags` is passed through to `Connection::query` unchanged; the
    /// connection itself ORs in `SLAVE_OK` when configured with
    /// `slaveOk=true`, so every cursor automatically inherits it rather
    /// than each call site needing to set it explicitly.
    pub fn new(
        connection: Connection,
        database: impl Into<String>,
        collection: impl Into<String>,
        query: Document,
        fields: Option<Document>,
        flags: QueryFlags,
        skip: i32,
        limit: i32,
    ) -> Self {
        Cursor {
            connection,
            database: database.into(),
            collection: collection.into(),
            query,
            fields,
            flags,
            skip,
            limit,
            batch_size: DEFAULT_BATCH_SIZE,
            state: CursorState::NotStarted,
        }
    }

    pub fn with_batch_size(mut self, batch_size: i32) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn full_collection_name(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }

    /// Fetches the next batch. Returns an empty `Vec` once the cursor is
    /// exhausted (the caller has seen every matching document, or `limit`
    /// was reached, or `close` was called) — never an error for that case.
    pub async fn next_batch(&mut self) -> Result<Vec<Document>> {
        let reply = match self.state {
            CursorState::Exhausted => return Ok(Vec::new()),
            CursorState::NotStarted => {
                self.connection
                    .query(
                        self.full_collection_name(),
                        self.flags,
                        self.skip,
                        self.initial_number_to_return(),
                        self.query.clone(),
                        self.fields.clone(),
                    )
                    .await?
            }
            CursorState::Active { cursor_id, .. } if cursor_id == 0 => {
                self.state = CursorState::Exhausted;
                return Ok(Vec::new());
            }
            CursorState::Active { cursor_id, .. } => {
                self.connection
                    .getmore(self.full_collection_name(), self.batch_size, cursor_id)
                    .await?
            }
        };
        self.absorb_reply(reply).await
    }

    fn initial_number_to_return(&self) -> i32 {
        if self.limit > 0 {
            self.limit
        } else {
            self.batch_size
        }
    }

    /// Applies `limit` truncation and decides whether to keep iterating, to
    /// park the cursor id for the next `getmore`, or to kill it server-side
    /// because `limit` was reached before the server ran out of results
    /// (mirrors `mongo_cursor_foreach_dispatch`'s `(offset + i) >= limit`
    /// early stop, generalized from a per-visitor callback into a plain
    /// batch return).
    async fn absorb_reply(&mut self, reply: OpReply) -> Result<Vec<Document>> {
        let already_returned = match self.state {
            CursorState::Active { returned, .. } => returned,
            _ => 0,
        };

        let mut documents = reply.documents;
        if self.limit > 0 {
            let remaining = (self.limit - already_returned).max(0) as usize;
            documents.truncate(remaining);
        }

        let returned = already_returned + documents.len() as i32;
        let limit_reached = self.limit > 0 && returned >= self.limit;

        if reply.cursor_id != 0 && limit_reached {
            debug!(cursor_id = reply.cursor_id, "limit reached, killing cursor early");
            self.connection.kill_cursors(vec![reply.cursor_id]).await?;
            self.state = CursorState::Exhausted;
        } else if reply.cursor_id == 0 || limit_reached {
            self.state = CursorState::Exhausted;
        } else {
            self.state = CursorState::Active {
                cursor_id: reply.cursor_id,
                returned,
            };
        }

        Ok(documents)
    }

    /// Drains the result set batch by batch, calling `visitor` once per
    /// document. If `visitor` returns `false`, iteration stops immediately
    /// and any still-open server-side cursor is killed fire-and-forget;
    /// the remaining documents in the batch already fetched are not
    /// visited. Mirrors `mongo_cursor_foreach_dispatch`'s abort path.
    pub async fn foreach<F>(&mut self, mut visitor: F) -> Result<()>
    where
        F: FnMut(&Document) -> bool,
    {
        loop {
            let batch = self.next_batch().await?;
            if batch.is_empty() {
                return Ok(());
            }
            for document in &batch {
                if !visitor(document) {
                    debug!("visitor aborted iteration, killing cursor");
                    self.close().await?;
                    return Ok(());
                }
            }
        }
    }

    /// Drains every remaining batch into a single `Vec`. Convenience
    /// wrapper; large result sets should iterate [`next_batch`] directly.
    pub async fn collect_all(mut self) -> Result<Vec<Document>> {
        let mut all = Vec::new();
        loop {
            let batch = self.next_batch().await?;
            if batch.is_empty() {
                break;
            }
            all.extend(batch);
        }
        Ok(all)
    }

    /// Runs the `count` command against this cursor's collection and
    /// (if non-empty) query, matching `mongo_cursor_count_async`.
    pub async fn count(&self) -> Result<u64> {
        let mut command = Document::empty();
        command.append_string("count", Some(&self.collection));
        if !self.query.is_empty() {
            command.append_document("query", &self.query);
        }
        let doc = self.connection.command(&self.database, command).await?;
        let n = doc.get_f64_strict("n")?;
        Ok(n as u64)
    }

    /// Kills the server-side cursor, if one is still open, and marks this
    /// cursor exhausted. Safe to call on an already-exhausted cursor.
    pub async fn close(&mut self) -> Result<()> {
        if let CursorState::Active { cursor_id, .. } = self.state {
            if cursor_id != 0 {
                self.connection.kill_cursors(vec![cursor_id]).await?;
            }
        }
        self.state = CursorState::Exhausted;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_options::ClientOptions;
    use crate::error::MongoError;
    use crate::wire::{Message, OpCode, ReplyFlags};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn read_frame(socket: &mut TcpStream) -> (i32, OpCode, Vec<u8>) {
        let mut header = [0u8; 16];
        socket.read_exact(&mut header).await.unwrap();
        let total_length = i32::from_le_bytes(header[0..4].try_into().unwrap());
        let request_id = i32::from_le_bytes(header[4..8].try_into().unwrap());
        let op_code = OpCode::try_from(i32::from_le_bytes(header[12..16].try_into().unwrap())).unwrap();
        let mut rest = vec![0u8; total_length as usize - 16];
        socket.read_exact(&mut rest).await.unwrap();
        (request_id, op_code, rest)
    }

    async fn write_reply(socket: &mut TcpStream, response_to: i32, cursor_id: i64, documents: Vec<Document>) {
        let body = OpReply {
            flags: ReplyFlags::empty(),
            cursor_id,
            starting_from: 0,
            documents,
        };
        let message = Message::Reply {
            request_id: 1,
            response_to,
            body,
        };
        socket.write_all(&message.serialize()).await.unwrap();
    }

    async fn handshake(socket: &mut TcpStream) {
        let (request_id, op_code, _) = read_frame(socket).await;
        assert_eq!(op_code, OpCode::Query);
        let mut ok = Document::empty();
        ok.append_bool("ok", true);
        ok.append_bool("ismaster", true);
        write_reply(socket, request_id, 0, vec![ok]).await;
    }

    async fn connect_test_connection(addr: std::net::SocketAddr) -> Connection {
        let connection = Connection::new(ClientOptions {
            seeds: vec![addr.to_string()],
            replica_set: None,
            slave_ok: false,
            write_concern: crate::write_concern::WriteConcern::acknowledged(),
            connect_timeout: std::time::Duration::ZERO,
            socket_timeout: std::time::Duration::ZERO,
        });
        connection.connect().await.unwrap();
        connection
    }

    #[tokio::test]
    async fn single_batch_exhausts_immediately() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            handshake(&mut socket).await;
            let (request_id, op_code, _) = read_frame(&mut socket).await;
            assert_eq!(op_code, OpCode::Query);
            let mut doc = Document::empty();
            doc.append_i32("x", 1);
            write_reply(&mut socket, request_id, 0, vec![doc]).await;
        });

        let connection = connect_test_connection(addr).await;
        let mut cursor = Cursor::new(
            connection,
            "db",
            "c",
            Document::empty(),
            None,
            QueryFlags::empty(),
            0,
            0,
        );

        let batch = cursor.next_batch().await.unwrap();
        assert_eq!(batch.len(), 1);
        let next = cursor.next_batch().await.unwrap();
        assert!(next.is_empty());
    }

    #[tokio::test]
    async fn getmore_continues_until_cursor_id_zero() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            handshake(&mut socket).await;

            let (request_id, op_code, _) = read_frame(&mut socket).await;
            assert_eq!(op_code, OpCode::Query);
            let mut first = Document::empty();
            first.append_i32("x", 1);
            write_reply(&mut socket, request_id, 42, vec![first]).await;

            let (request_id, op_code, _) = read_frame(&mut socket).await;
            assert_eq!(op_code, OpCode::GetMore);
            let mut second = Document::empty();
            second.append_i32("x", 2);
            write_reply(&mut socket, request_id, 0, vec![second]).await;
        });

        let connection = connect_test_connection(addr).await;
        let mut cursor = Cursor::new(
            connection,
            "db",
            "c",
            Document::empty(),
            None,
            QueryFlags::empty(),
            0,
            0,
        );

        let first = cursor.next_batch().await.unwrap();
        assert_eq!(first.len(), 1);
        let second = cursor.next_batch().await.unwrap();
        assert_eq!(second.len(), 1);
        let third = cursor.next_batch().await.unwrap();
        assert!(third.is_empty());
    }

    #[tokio::test]
    async fn limit_reached_sends_kill_cursors() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            handshake(&mut socket).await;

            let (request_id, op_code, _) = read_frame(&mut socket).await;
            assert_eq!(op_code, OpCode::Query);
            let mut a = Document::empty();
            a.append_i32("x", 1);
            let mut b = Document::empty();
            b.append_i32("x", 2);
            write_reply(&mut socket, request_id, 99, vec![a, b]).await;

            let (_request_id, op_code, body) = read_frame(&mut socket).await;
            assert_eq!(op_code, OpCode::KillCursors);
            assert!(body.len() >= 12, "kill_cursors body carries at least one cursor id");
        });

        let connection = connect_test_connection(addr).await;
        let mut cursor = Cursor::new(
            connection,
            "db",
            "c",
            Document::empty(),
            None,
            QueryFlags::empty(),
            0,
            1,
        );

        let batch = cursor.next_batch().await.unwrap();
        assert_eq!(batch.len(), 1, "truncated to the configured limit");
    }

    #[tokio::test]
    async fn foreach_abort_kills_cursor() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            handshake(&mut socket).await;

            let (request_id, op_code, _) = read_frame(&mut socket).await;
            assert_eq!(op_code, OpCode::Query);
            let mut a = Document::empty();
            a.append_i32("x", 1);
            let mut b = Document::empty();
            b.append_i32("x", 2);
            write_reply(&mut socket, request_id, 7, vec![a, b]).await;

            let (_request_id, op_code, _) = read_frame(&mut socket).await;
            assert_eq!(op_code, OpCode::KillCursors);
        });

        let connection = connect_test_connection(addr).await;
        let mut cursor = Cursor::new(
            connection,
            "db",
            "c",
            Document::empty(),
            None,
            QueryFlags::empty(),
            0,
            0,
        );

        let mut seen = 0;
        cursor
            .foreach(|_doc| {
                seen += 1;
                seen < 1
            })
            .await
            .unwrap();
        assert_eq!(seen, 1, "visitor aborted after the first document");
    }

    #[tokio::test]
    async fn exhaust_flag_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            handshake(&mut socket).await;
        });

        let connection = connect_test_connection(addr).await;
        let mut cursor = Cursor::new(
            connection,
            "db",
            "c",
            Document::empty(),
            None,
            QueryFlags::EXHAUST,
            0,
            0,
        );

        let err = cursor.next_batch().await.unwrap_err();
        assert!(matches!(err, MongoError::Unsupported(_)));
    }
}
