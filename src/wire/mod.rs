//! Legacy MongoDB wire-protocol framing: the 16-byte header, op-codes, and
//! per-operation flag bitfields.

mod delete;
mod getmore;
mod insert;
mod kill_cursors;
mod message;
mod msg;
mod query;
mod reply;
mod update;

pub use delete::OpDelete;
pub use getmore::OpGetMore;
pub use insert::OpInsert;
pub use kill_cursors::OpKillCursors;
pub use message::Message;
pub use msg::OpMsg;
pub use query::OpQuery;
pub use reply::OpReply;
pub use update::OpUpdate;

use crate::error::{MongoError, Result};

pub const HEADER_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum OpCode {
    Reply = 1,
    Msg = 1000,
    Update = 2001,
    Insert = 2002,
    Query = 2004,
    GetMore = 2005,
    Delete = 2006,
    KillCursors = 2007,
}

impl TryFrom<i32> for OpCode {
    type Error = MongoError;

    fn try_from(value: i32) -> Result<Self> {
        Ok(match value {
            1 => OpCode::Reply,
            1000 => OpCode::Msg,
            2001 => OpCode::Update,
            2002 => OpCode::Insert,
            2004 => OpCode::Query,
            2005 => OpCode::GetMore,
            2006 => OpCode::Delete,
            2007 => OpCode::KillCursors,
            other => {
                return Err(MongoError::ProtocolUnexpected(format!(
                    "unknown op code {other}"
                )))
            }
        })
    }
}

/// The 16-byte header common to every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub total_length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: OpCode,
}

impl Header {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(MongoError::InsufficientData);
        }
        let total_length = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let request_id = i32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let response_to = i32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let op_code_raw = i32::from_le_bytes(bytes[12..16].try_into().unwrap());
        Ok(Header {
            total_length,
            request_id,
            response_to,
            op_code: OpCode::try_from(op_code_raw)?,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.total_length.to_le_bytes());
        out.extend_from_slice(&self.request_id.to_le_bytes());
        out.extend_from_slice(&self.response_to.to_le_bytes());
        out.extend_from_slice(&(self.op_code as i32).to_le_bytes());
    }
}

bitflags::bitflags! {
    /// `OP_QUERY` flag bits (bit positions match the original's
    /// `MongoQueryFlags`: bit 0 is intentionally unused).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct QueryFlags: i32 {
        const TAILABLE_CURSOR   = 1 << 1;
        const SLAVE_OK          = 1 << 2;
        const OPLOG_REPLAY      = 1 << 3;
        const NO_CURSOR_TIMEOUT = 1 << 4;
        const AWAIT_DATA        = 1 << 5;
        const EXHAUST           = 1 << 6;
        const PARTIAL           = 1 << 7;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ReplyFlags: i32 {
        const CURSOR_NOT_FOUND   = 1 << 0;
        const QUERY_FAILURE      = 1 << 1;
        const SHARD_CONFIG_STALE = 1 << 2;
        const AWAIT_CAPABLE      = 1 << 3;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UpdateFlags: i32 {
        const UPSERT       = 1 << 0;
        const MULTI_UPDATE = 1 << 1;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InsertFlags: i32 {
        const CONTINUE_ON_ERROR = 1 << 0;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeleteFlags: i32 {
        const SINGLE_REMOVE = 1 << 0;
    }
}

/// Reads a NUL-terminated UTF-8 string from `bytes` starting at `offset`.
/// Returns the string and the offset of the byte following the NUL.
pub(crate) fn read_cstring(bytes: &[u8], offset: usize) -> Result<(String, usize)> {
    let nul = bytes[offset..]
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| MongoError::MessageInvalid("unterminated cstring".into()))?;
    let end = offset + nul;
    let s = std::str::from_utf8(&bytes[offset..end])
        .map_err(|_| MongoError::MessageInvalid("cstring is not valid utf-8".into()))?
        .to_string();
    Ok((s, end + 1))
}

pub(crate) fn write_cstring(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

/// Reads one length-prefixed BSON document starting at `offset`, validating
/// that its declared length does not run past `bytes`.
pub(crate) fn read_document(
    bytes: &[u8],
    offset: usize,
) -> Result<(crate::bson::Document, usize)> {
    if offset + 4 > bytes.len() {
        return Err(MongoError::MessageInvalid(
            "truncated document length prefix".into(),
        ));
    }
    let len = i32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());
    if len < 5 {
        return Err(MongoError::MessageInvalid("invalid document length".into()));
    }
    let end = offset
        .checked_add(len as usize)
        .ok_or_else(|| MongoError::MessageInvalid("document length overflow".into()))?;
    if end > bytes.len() {
        return Err(MongoError::MessageInvalid(
            "document runs past message body".into(),
        ));
    }
    let doc = crate::bson::Document::from_bytes(bytes[offset..end].to_vec())
        .ok_or_else(|| MongoError::MessageInvalid("document length prefix mismatch".into()))?;
    Ok((doc, end))
}
