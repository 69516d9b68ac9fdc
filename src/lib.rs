//! An async client core for the pre-3.6 MongoDB legacy wire protocol:
//! framing, a hand-rolled BSON codec, write-concern-aware write helpers,
//! replica-set-aware host discovery, and cursor iteration.
//!
//! This crate is the connection/protocol layer, not a full driver: there is
//! no query-builder DSL, no connection pool beyond one [`connection::Connection`]
//! per replica set, and no aggregation pipeline helpers. See SPEC_FULL.md for
//! the full module-by-module contract.

pub mod bson;
pub mod client_options;
pub mod connection;
pub mod cursor;
pub mod error;
pub mod manager;
pub mod wire;
pub mod write_concern;

mod input_stream;
mod output_stream;
mod protocol;

pub use bson::{Document, DocumentIter, ObjectId, ObjectIdGenerator, Value};
pub use client_options::ClientOptions;
pub use connection::Connection;
pub use cursor::Cursor;
pub use error::{MongoError, Result};
pub use manager::Manager;
pub use protocol::Protocol;
pub use write_concern::WriteConcern;
