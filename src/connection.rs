use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::bson::{Document, Value};
use crate::client_options::ClientOptions;
use crate::error::{MongoError, Result};
use crate::manager::{Manager, NextCandidate};
use crate::protocol::Protocol;
use crate::wire::QueryFlags;

/// Mirrors the original's `STATE_0`/`STATE_CONNECTING`/`STATE_CONNECTED`/
/// `STATE_DISPOSED`, minus the GObject scaffolding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    Connecting,
    Connected,
    Disposed,
}

struct Shared {
    options: ClientOptions,
    state: Mutex<State>,
    manager: Mutex<Manager>,
    protocol: Mutex<Option<Arc<Protocol>>>,
    notify: Notify,
}

/// A handle to a replica-set-aware MongoDB connection: owns host discovery
/// (via [`Manager`]) and the active [`Protocol`], and re-runs discovery
/// whenever the current primary is lost.
///
/// Cheaply cloneable; every clone shares the same underlying state and the
/// same live protocol once connected.
#[derive(Clone)]
pub struct Connection(Arc<Shared>);

impl Connection {
    pub fn new(options: ClientOptions) -> Self {
        let mut manager = Manager::new();
        for seed in &options.seeds {
            manager.add_seed(seed.clone());
        }
        Connection(Arc::new(Shared {
            options,
            state: Mutex::new(State::Initial),
            manager: Mutex::new(manager),
            protocol: Mutex::new(None),
            notify: Notify::new(),
        }))
    }

    pub fn from_uri(uri: &str) -> Result<Self> {
        Ok(Connection::new(ClientOptions::parse(uri)?))
    }

    /// Walks the manager's seed/discovered host list once, issuing `ismaster`
    /// against each candidate until one identifies itself as primary (and,
    /// when a replica set name was configured, matches it). Returns
    /// [`MongoError::ConnectionFailed`] once the manager has exhausted every
    /// candidate in this pass without finding a primary.
    pub async fn connect(&self) -> Result<()> {
        *self.0.state.lock().await = State::Connecting;

        loop {
            let candidate = self.0.manager.lock().await.next();
            match candidate {
                NextCandidate::Host(host) => match self.try_host(&host).await {
                    Ok(true) => {
                        self.0.manager.lock().await.reset_delay();
                        *self.0.state.lock().await = State::Connected;
                        self.0.notify.notify_waiters();
                        info!(host, "connected to primary");
                        return Ok(());
                    }
                    Ok(false) => continue,
                    Err(err) => {
                        warn!(host, error = %err, "candidate host failed ismaster check");
                        continue;
                    }
                },
                NextCandidate::Delay(_) => {
                    *self.0.state.lock().await = State::Initial;
                    self.0.notify.notify_waiters();
                    return Err(MongoError::ConnectionFailed);
                }
            }
        }
    }

    /// Connects to `host`, runs the `ismaster` handshake, and folds its
    /// `hosts`/`primary` fields into the manager. Returns `Ok(true)` only
    /// once this host has identified itself as primary (and matches the
    /// configured replica set, if any); `Ok(false)` means the handshake
    /// succeeded but this host is not usable as primary right now.
    async fn try_host(&self, host: &str) -> Result<bool> {
        let connect_timeout = self.0.options.connect_timeout;
        let stream = if connect_timeout.is_zero() {
            TcpStream::connect(host).await?
        } else {
            match tokio::time::timeout(connect_timeout, TcpStream::connect(host)).await {
                Ok(connected) => connected?,
                Err(_) => {
                    return Err(MongoError::Timeout(format!(
                        "connect to {host} did not complete within {connect_timeout:?}"
                    )))
                }
            }
        };
        let protocol = Protocol::new(
            stream,
            self.0.options.write_concern.clone(),
            self.0.options.socket_timeout,
        );

        let mut ismaster = Document::empty();
        ismaster.append_i32("ismaster", 1);
        let reply = protocol
            .query("admin.$cmd", QueryFlags::empty(), 0, -1, ismaster, None)
            .await?;
        let doc = first_document(&reply)?;

        if !doc.get_bool("ok").unwrap_or(false) {
            return Err(MongoError::InvalidReply(
                "ismaster reply carried ok: false".into(),
            ));
        }

        if let Some(expected) = &self.0.options.replica_set {
            if doc.get_str("setName").as_deref() != Some(expected.as_str()) {
                return Err(MongoError::NotMaster);
            }
        }

        {
            let mut manager = self.0.manager.lock().await;
            for discovered in parse_host_list(&doc, "hosts") {
                manager.add_host(discovered);
            }
            if let Some(primary) = doc.get_str("primary") {
                manager.add_host(primary);
            }
        }

        let is_master = doc.get_bool("ismaster").unwrap_or(false);
        if !is_master {
            debug!(host, "not master, continuing discovery");
            return Ok(false);
        }

        let protocol = Arc::new(protocol);
        self.watch_for_failure(protocol.clone());
        *self.0.protocol.lock().await = Some(protocol);
        Ok(true)
    }

    /// Spawns a task that resets this connection to [`State::Initial`] the
    /// moment the active protocol reports a failure, mirroring
    /// `mongo_connection_protocol_failed`'s reconnect trigger.
    fn watch_for_failure(&self, protocol: Arc<Protocol>) {
        let shared = self.0.clone();
        tokio::spawn(async move {
            let mut failure = protocol.failure_signal();
            if failure.changed().await.is_err() {
                return;
            }
            if failure.borrow().is_some() {
                warn!("protocol failed, marking connection for reconnect");
                let mut guard = shared.protocol.lock().await;
                if let Some(current) = guard.as_ref() {
                    if Arc::ptr_eq(current, &protocol) {
                        *guard = None;
                        *shared.state.lock().await = State::Initial;
                    }
                }
            }
        });
    }

    /// Returns the active protocol, waiting out an in-progress `connect()`
    /// if one is running. Fails immediately if never connected or disposed.
    async fn current_protocol(&self) -> Result<Arc<Protocol>> {
        loop {
            let state = *self.0.state.lock().await;
            match state {
                State::Connected => {
                    if let Some(protocol) = self.0.protocol.lock().await.clone() {
                        return Ok(protocol);
                    }
                    // Lost between the state check and the lock; fall through
                    // to NotConnected rather than spin.
                    return Err(MongoError::NotConnected);
                }
                State::Connecting => {
                    self.0.notify.notified().await;
                }
                State::Initial | State::Disposed => return Err(MongoError::NotConnected),
            }
        }
    }

    /// `true` when the connection was configured with `slaveOk=true`; every
    /// query this connection issues ORs [`QueryFlags::SLAVE_OK`] in when set.
    pub fn slave_ok(&self) -> bool {
        self.0.options.slave_ok
    }

    fn effective_flags(&self, flags: QueryFlags) -> QueryFlags {
        if self.slave_ok() {
            flags | QueryFlags::SLAVE_OK
        } else {
            flags
        }
    }

    /// Runs a database command (`{cmd.$cmd}`) and promotes `ok: false` with
    /// an `errmsg` into [`MongoError::CommandFailed`], matching
    /// `mongo_connection_command_cb`'s diagnostic promotion.
    pub async fn command(&self, db: &str, command: Document) -> Result<Document> {
        let protocol = self.current_protocol().await?;
        let full_collection_name = format!("{db}.$cmd");
        let flags = self.effective_flags(QueryFlags::empty());
        let reply = protocol
            .query(full_collection_name, flags, 0, -1, command, None)
            .await?;
        let doc = first_document(&reply)?;
        if !doc.get_bool("ok").unwrap_or(false) {
            let errmsg = doc
                .get_str("errmsg")
                .unwrap_or_else(|| "command failed".to_string());
            return Err(MongoError::CommandFailed(errmsg));
        }
        Ok(doc)
    }

    pub async fn query(
        &self,
        full_collection_name: impl Into<String>,
        flags: QueryFlags,
        skip: i32,
        limit: i32,
        query: Document,
        fields: Option<Document>,
    ) -> Result<crate::wire::OpReply> {
        if flags.contains(QueryFlags::EXHAUST) {
            return Err(MongoError::Unsupported(
                "EXHAUST cursors are not supported: the protocol's request/reply \
                 correlation table drops unsolicited replies past the first"
                    .into(),
            ));
        }
        let protocol = self.current_protocol().await?;
        let flags = self.effective_flags(flags);
        let message = protocol
            .query(full_collection_name, flags, skip, limit, query, fields)
            .await?;
        first_reply(message)
    }

    pub async fn getmore(
        &self,
        full_collection_name: impl Into<String>,
        number_to_return: i32,
        cursor_id: i64,
    ) -> Result<crate::wire::OpReply> {
        let protocol = self.current_protocol().await?;
        let message = protocol
            .getmore(full_collection_name, number_to_return, cursor_id)
            .await?;
        first_reply(message)
    }

    pub async fn insert(
        &self,
        db: &str,
        full_collection_name: impl Into<String>,
        flags: crate::wire::InsertFlags,
        documents: Vec<Document>,
    ) -> Result<Option<crate::wire::OpReply>> {
        let protocol = self.current_protocol().await?;
        protocol
            .insert(db, full_collection_name, flags, documents)
            .await?
            .map(first_reply)
            .transpose()
    }

    pub async fn update(
        &self,
        db: &str,
        full_collection_name: impl Into<String>,
        flags: crate::wire::UpdateFlags,
        selector: Document,
        update: Document,
    ) -> Result<Option<crate::wire::OpReply>> {
        let protocol = self.current_protocol().await?;
        protocol
            .update(db, full_collection_name, flags, selector, update)
            .await?
            .map(first_reply)
            .transpose()
    }

    pub async fn delete(
        &self,
        db: &str,
        full_collection_name: impl Into<String>,
        flags: crate::wire::DeleteFlags,
        selector: Document,
    ) -> Result<Option<crate::wire::OpReply>> {
        let protocol = self.current_protocol().await?;
        protocol
            .delete(db, full_collection_name, flags, selector)
            .await?
            .map(first_reply)
            .transpose()
    }

    pub async fn kill_cursors(&self, cursor_ids: Vec<i64>) -> Result<()> {
        let protocol = self.current_protocol().await?;
        protocol.kill_cursors(cursor_ids).await
    }

    /// Tears the connection down: disposes the active protocol (if any) and
    /// marks the connection unusable for any future operation.
    pub async fn dispose(&self) {
        *self.0.state.lock().await = State::Disposed;
        if let Some(protocol) = self.0.protocol.lock().await.take() {
            protocol.dispose().await;
        }
        self.0.notify.notify_waiters();
    }
}

fn first_document(message: &crate::wire::Message) -> Result<Document> {
    let reply = message
        .as_reply()
        .ok_or_else(|| MongoError::ProtocolUnexpected("expected OP_REPLY".into()))?;
    reply
        .documents
        .first()
        .cloned()
        .ok_or_else(|| MongoError::InvalidReply("reply carried no documents".into()))
}

fn first_reply(message: crate::wire::Message) -> Result<crate::wire::OpReply> {
    message
        .into_reply()
        .ok_or_else(|| MongoError::ProtocolUnexpected("expected OP_REPLY".into()))
}

/// Reads `key` as a BSON array of strings, skipping any element that is not
/// a string rather than failing the whole lookup.
fn parse_host_list(doc: &Document, key: &str) -> Vec<String> {
    let mut iter = doc.iter();
    if !iter.find(key) {
        return Vec::new();
    }
    let mut child = crate::bson::DocumentIter::new(&[]);
    if !iter.recurse(&mut child) {
        return Vec::new();
    }
    let mut hosts = Vec::new();
    while child.next() {
        if let Some(Value::String(s)) = child.value() {
            hosts.push(s.into_owned());
        }
    }
    hosts
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Drives one fake-mongod handshake: reads a framed OP_QUERY, asserts it
    /// targets `admin.$cmd`, and writes back `reply` as an OP_REPLY matching
    /// the request id it read.
    async fn serve_ismaster(listener: TcpListener, reply: Document) {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut header = [0u8; 16];
        socket.read_exact(&mut header).await.unwrap();
        let total_length = i32::from_le_bytes(header[0..4].try_into().unwrap());
        let request_id = i32::from_le_bytes(header[4..8].try_into().unwrap());
        let mut rest = vec![0u8; total_length as usize - 16];
        socket.read_exact(&mut rest).await.unwrap();

        let op_reply = crate::wire::OpReply {
            flags: crate::wire::ReplyFlags::empty(),
            cursor_id: 0,
            starting_from: 0,
            documents: vec![reply],
        };
        use crate::wire::Message;
        let message = Message::Reply {
            request_id: 1,
            response_to: request_id,
            body: op_reply,
        };
        socket.write_all(&message.serialize()).await.unwrap();
    }

    #[tokio::test]
    async fn connects_to_standalone_primary() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut reply = Document::empty();
        reply.append_bool("ok", true);
        reply.append_bool("ismaster", true);
        tokio::spawn(serve_ismaster(listener, reply));

        let connection = Connection::new(ClientOptions {
            seeds: vec![addr.to_string()],
            replica_set: None,
            slave_ok: false,
            write_concern: crate::write_concern::WriteConcern::acknowledged(),
            connect_timeout: std::time::Duration::ZERO,
            socket_timeout: std::time::Duration::ZERO,
        });

        connection.connect().await.unwrap();
        assert_eq!(*connection.0.state.lock().await, State::Connected);
    }

    #[tokio::test]
    async fn rejects_non_primary_replica_set_member() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut reply = Document::empty();
        reply.append_bool("ok", true);
        reply.append_bool("ismaster", false);
        reply.append_string("setName", Some("rs0"));
        tokio::spawn(serve_ismaster(listener, reply));

        let connection = Connection::new(ClientOptions {
            seeds: vec![addr.to_string()],
            replica_set: Some("rs0".to_string()),
            slave_ok: false,
            write_concern: crate::write_concern::WriteConcern::acknowledged(),
            connect_timeout: std::time::Duration::ZERO,
            socket_timeout: std::time::Duration::ZERO,
        });

        let err = connection.connect().await.unwrap_err();
        assert!(matches!(err, MongoError::ConnectionFailed));
    }

    #[tokio::test]
    async fn operations_fail_before_connecting() {
        let connection = Connection::new(ClientOptions::default());
        let err = connection.command("admin", Document::empty()).await.unwrap_err();
        assert!(matches!(err, MongoError::NotConnected));
    }
}
