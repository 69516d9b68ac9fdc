use crate::bson::Document;
use crate::error::{MongoError, Result};

use super::{read_cstring, read_document, write_cstring, Header, OpCode, QueryFlags, HEADER_LEN};

/// `OP_QUERY` (2004): `{ i32 flags; cstring collection; i32 skip; i32 limit; BSON query; [BSON fields] }`.
#[derive(Debug, Clone, PartialEq)]
pub struct OpQuery {
    pub flags: QueryFlags,
    pub full_collection_name: String,
    pub skip: i32,
    pub limit: i32,
    pub query: Document,
    pub fields: Option<Document>,
}

impl OpQuery {
    /// `true` when the collection name ends in `.$cmd` — a command
    /// invocation rather than an ordinary query.
    pub fn is_command(&self) -> bool {
        self.full_collection_name.ends_with(".$cmd")
    }

    /// The first key of the query document, i.e. the command name, for
    /// command invocations.
    pub fn command_name(&self) -> Option<String> {
        let mut iter = self.query.iter();
        if iter.next() {
            iter.key().map(str::to_string)
        } else {
            None
        }
    }

    pub(crate) fn parse_body(body: &[u8]) -> Result<Self> {
        if body.len() < 4 {
            return Err(MongoError::MessageInvalid("OP_QUERY body too short".into()));
        }
        let flags = QueryFlags::from_bits_truncate(i32::from_le_bytes(body[0..4].try_into().unwrap()));
        let (full_collection_name, mut offset) = read_cstring(body, 4)?;
        if offset + 8 > body.len() {
            return Err(MongoError::MessageInvalid(
                "OP_QUERY missing skip/limit".into(),
            ));
        }
        let skip = i32::from_le_bytes(body[offset..offset + 4].try_into().unwrap());
        let limit = i32::from_le_bytes(body[offset + 4..offset + 8].try_into().unwrap());
        offset += 8;
        let (query, offset) = read_document(body, offset)?;
        let fields = if offset < body.len() {
            Some(read_document(body, offset)?.0)
        } else {
            None
        };
        Ok(OpQuery {
            flags,
            full_collection_name,
            skip,
            limit,
            query,
            fields,
        })
    }

    pub(crate) fn serialize(&self, request_id: i32, response_to: i32) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.flags.bits().to_le_bytes());
        write_cstring(&mut body, &self.full_collection_name);
        body.extend_from_slice(&self.skip.to_le_bytes());
        body.extend_from_slice(&self.limit.to_le_bytes());
        body.extend_from_slice(self.query.as_bytes());
        if let Some(fields) = &self.fields {
            body.extend_from_slice(fields.as_bytes());
        }
        frame(OpCode::Query, request_id, response_to, &body)
    }
}

pub(crate) fn frame(op_code: OpCode, request_id: i32, response_to: i32, body: &[u8]) -> Vec<u8> {
    let total_length = (HEADER_LEN + body.len()) as i32;
    let header = Header {
        total_length,
        request_id,
        response_to,
        op_code,
    };
    let mut out = Vec::with_capacity(total_length as usize);
    header.write(&mut out);
    out.extend_from_slice(body);
    out
}
