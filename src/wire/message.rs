use crate::error::Result;

use super::{Header, OpCode, OpDelete, OpGetMore, OpInsert, OpKillCursors, OpMsg, OpQuery, OpReply, OpUpdate, HEADER_LEN};

/// A tagged union over the eight legacy operation codes. Carries the header
/// fields alongside the parsed body so callers don't need to track them
/// separately.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Reply {
        request_id: i32,
        response_to: i32,
        body: OpReply,
    },
    Msg {
        request_id: i32,
        response_to: i32,
        body: OpMsg,
    },
    Update {
        request_id: i32,
        response_to: i32,
        body: OpUpdate,
    },
    Insert {
        request_id: i32,
        response_to: i32,
        body: OpInsert,
    },
    Query {
        request_id: i32,
        response_to: i32,
        body: OpQuery,
    },
    GetMore {
        request_id: i32,
        response_to: i32,
        body: OpGetMore,
    },
    Delete {
        request_id: i32,
        response_to: i32,
        body: OpDelete,
    },
    KillCursors {
        request_id: i32,
        response_to: i32,
        body: OpKillCursors,
    },
}

impl Message {
    pub fn request_id(&self) -> i32 {
        match self {
            Message::Reply { request_id, .. }
            | Message::Msg { request_id, .. }
            | Message::Update { request_id, .. }
            | Message::Insert { request_id, .. }
            | Message::Query { request_id, .. }
            | Message::GetMore { request_id, .. }
            | Message::Delete { request_id, .. }
            | Message::KillCursors { request_id, .. } => *request_id,
        }
    }

    pub fn response_to(&self) -> i32 {
        match self {
            Message::Reply { response_to, .. }
            | Message::Msg { response_to, .. }
            | Message::Update { response_to, .. }
            | Message::Insert { response_to, .. }
            | Message::Query { response_to, .. }
            | Message::GetMore { response_to, .. }
            | Message::Delete { response_to, .. }
            | Message::KillCursors { response_to, .. } => *response_to,
        }
    }

    pub fn op_code(&self) -> OpCode {
        match self {
            Message::Reply { .. } => OpCode::Reply,
            Message::Msg { .. } => OpCode::Msg,
            Message::Update { .. } => OpCode::Update,
            Message::Insert { .. } => OpCode::Insert,
            Message::Query { .. } => OpCode::Query,
            Message::GetMore { .. } => OpCode::GetMore,
            Message::Delete { .. } => OpCode::Delete,
            Message::KillCursors { .. } => OpCode::KillCursors,
        }
    }

    /// Parses a complete, already-length-validated buffer (header + body)
    /// into the concrete message kind indicated by the header's op-code.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let header = Header::parse(buf)?;
        let body = &buf[HEADER_LEN..];
        Ok(match header.op_code {
            OpCode::Reply => Message::Reply {
                request_id: header.request_id,
                response_to: header.response_to,
                body: OpReply::parse_body(body)?,
            },
            OpCode::Msg => Message::Msg {
                request_id: header.request_id,
                response_to: header.response_to,
                body: OpMsg::parse_body(body)?,
            },
            OpCode::Update => Message::Update {
                request_id: header.request_id,
                response_to: header.response_to,
                body: OpUpdate::parse_body(body)?,
            },
            OpCode::Insert => Message::Insert {
                request_id: header.request_id,
                response_to: header.response_to,
                body: OpInsert::parse_body(body)?,
            },
            OpCode::Query => Message::Query {
                request_id: header.request_id,
                response_to: header.response_to,
                body: OpQuery::parse_body(body)?,
            },
            OpCode::GetMore => Message::GetMore {
                request_id: header.request_id,
                response_to: header.response_to,
                body: OpGetMore::parse_body(body)?,
            },
            OpCode::Delete => Message::Delete {
                request_id: header.request_id,
                response_to: header.response_to,
                body: OpDelete::parse_body(body)?,
            },
            OpCode::KillCursors => Message::KillCursors {
                request_id: header.request_id,
                response_to: header.response_to,
                body: OpKillCursors::parse_body(body)?,
            },
        })
    }

    /// Serialises header + body, writing `total_length` last.
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Message::Reply {
                request_id,
                response_to,
                body,
            } => body.serialize(*request_id, *response_to),
            Message::Msg {
                request_id,
                response_to,
                body,
            } => body.serialize(*request_id, *response_to),
            Message::Update {
                request_id,
                response_to,
                body,
            } => body.serialize(*request_id, *response_to),
            Message::Insert {
                request_id,
                response_to,
                body,
            } => body.serialize(*request_id, *response_to),
            Message::Query {
                request_id,
                response_to,
                body,
            } => body.serialize(*request_id, *response_to),
            Message::GetMore {
                request_id,
                response_to,
                body,
            } => body.serialize(*request_id, *response_to),
            Message::Delete {
                request_id,
                response_to,
                body,
            } => body.serialize(*request_id, *response_to),
            Message::KillCursors {
                request_id,
                response_to,
                body,
            } => body.serialize(*request_id, *response_to),
        }
    }

    /// Extracts the `OpReply` body, if this message is one.
    pub fn as_reply(&self) -> Option<&OpReply> {
        match self {
            Message::Reply { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn into_reply(self) -> Option<OpReply> {
        match self {
            Message::Reply { body, .. } => Some(body),
            _ => None,
        }
    }
}
