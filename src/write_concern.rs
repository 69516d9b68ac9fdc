use crate::bson::Document;
use crate::wire::OpQuery;

/// Policy for how a write should be acknowledged. `w = -1` is the sentinel
/// for "fire and forget" — no `getlasterror` is ever built for it.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteConcern {
    pub w: i32,
    pub w_majority: bool,
    pub w_tags: Option<Document>,
    pub journal: bool,
    pub fsync: bool,
    pub wtimeout_ms: u32,
}

impl WriteConcern {
    /// The default acknowledged concern: `w = 1`, no journal/fsync, no timeout.
    pub fn acknowledged() -> Self {
        WriteConcern {
            w: 1,
            w_majority: false,
            w_tags: None,
            journal: false,
            fsync: false,
            wtimeout_ms: 0,
        }
    }

    /// Fire-and-forget: no `getlasterror` will ever be built.
    pub fn unacknowledged() -> Self {
        WriteConcern {
            w: -1,
            w_majority: false,
            w_tags: None,
            journal: false,
            fsync: false,
            wtimeout_ms: 0,
        }
    }

    pub fn with_w(mut self, w: i32) -> Self {
        self.w_majority = false;
        self.w_tags = None;
        self.w = w;
        self
    }

    pub fn with_w_majority(mut self) -> Self {
        self.w_tags = None;
        self.w = 0;
        self.w_majority = true;
        self
    }

    pub fn with_w_tags(mut self, tags: Document) -> Self {
        self.w = 0;
        self.w_majority = false;
        self.w_tags = Some(tags);
        self
    }

    /// Builds the `getlasterror` command query to append after an unsafe
    /// write, or `None` if `w == -1` (fire and forget).
    ///
    /// The `journal` flag is always rendered under key `j`, unlike `fsync`
    /// which is only included when true.
    pub fn build_getlasterror(&self, db: &str) -> Option<OpQuery> {
        if self.w == -1 {
            return None;
        }

        let mut query = Document::empty();
        query.append_i32("getlasterror", 1);
        query.append_bool("j", self.journal);

        if self.w > 0 {
            query.append_i32("w", self.w);
        } else if self.w_majority {
            query.append_string("w", Some("majority"));
        } else if let Some(tags) = &self.w_tags {
            query.append_document("w", tags);
        }

        if self.fsync {
            query.append_bool("fsync", true);
        }

        if self.wtimeout_ms > 0 {
            query.append_i32("wtimeout", self.wtimeout_ms as i32);
        }

        let full_collection_name = format!("{db}.$cmd");
        Some(OpQuery {
            flags: crate::wire::QueryFlags::empty(),
            full_collection_name,
            skip: 0,
            limit: -1,
            query,
            fields: None,
        })
    }
}

impl Default for WriteConcern {
    fn default() -> Self {
        WriteConcern::acknowledged()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unacknowledged_builds_nothing() {
        let concern = WriteConcern::unacknowledged();
        assert!(concern.build_getlasterror("db").is_none());
    }

    #[test]
    fn acknowledged_matches_insert_ack_scenario() {
        let concern = WriteConcern::acknowledged();
        let query = concern.build_getlasterror("db").unwrap();
        assert_eq!(query.full_collection_name, "db.$cmd");
        assert_eq!(query.query.get_bool("j").unwrap(), false);
        assert_eq!(query.query.get_str("getlasterror"), None);
        let mut iter = query.query.iter();
        assert!(iter.next());
        assert_eq!(iter.key(), Some("getlasterror"));
    }

    #[test]
    fn majority_renders_as_string() {
        let concern = WriteConcern::acknowledged().with_w_majority();
        let query = concern.build_getlasterror("db").unwrap();
        assert_eq!(query.query.get_str("w").as_deref(), Some("majority"));
    }
}
