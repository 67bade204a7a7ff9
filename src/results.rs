//! Contains the types of results returned by topology operations.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::{
    bson::{Bson, Document},
    bson_util,
    error::{CommandError, Error, ErrorKind, IndexedWriteError, Result, WriteConcernError},
    options::ServerAddress,
    Namespace,
};

/// A server reply normalized into one shape, whatever the command or wire version.
///
/// Replies with `ok: 0` or a legacy `$err` never become a `CommandReply`; they are returned as
/// [`ErrorKind::Command`] errors carrying the raw reply.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct CommandReply {
    /// Whether the server reported success.
    pub ok: bool,

    /// The full reply document.
    pub result: Document,

    /// Per-statement write errors, for write commands.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_errors: Option<Vec<IndexedWriteError>>,

    /// A write concern that could not be satisfied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_concern_error: Option<WriteConcernError>,
}

#[derive(Deserialize)]
struct LegacyErrorBody {
    #[serde(rename = "$err")]
    message: String,

    #[serde(default)]
    code: i32,
}

impl CommandReply {
    /// Normalizes a raw reply.
    pub(crate) fn from_document(reply: Document) -> Result<Self> {
        if reply.contains_key("$err") {
            let legacy: LegacyErrorBody = crate::bson::from_document(reply.clone())?;
            let error = CommandError {
                code: legacy.code,
                code_name: String::new(),
                message: legacy.message,
            };
            return Err(Error::from(ErrorKind::Command(error)).with_server_response(&reply));
        }

        let ok = reply
            .get("ok")
            .map(bson_util::get_truthy)
            .unwrap_or(false);

        if !ok {
            let command_error: CommandError = crate::bson::from_document(reply.clone())
                .map_err(|_| Error::invalid_response("unreadable command error reply"))?;
            let labels = reply
                .get_array("errorLabels")
                .ok()
                .map(|labels| {
                    labels
                        .iter()
                        .filter_map(Bson::as_str)
                        .map(String::from)
                        .collect::<Vec<_>>()
                });
            return Err(
                Error::new(ErrorKind::Command(command_error), labels).with_server_response(&reply)
            );
        }

        let write_errors = match reply.get("writeErrors") {
            Some(errors) => Some(crate::bson::from_bson(errors.clone())?),
            None => None,
        };
        let write_concern_error = match reply.get("writeConcernError") {
            Some(error) => Some(crate::bson::from_bson(error.clone())?),
            None => None,
        };

        Ok(Self {
            ok,
            result: reply,
            write_errors,
            write_concern_error,
        })
    }

    /// Whether the reply reports write errors or a write concern error.
    pub fn has_write_failures(&self) -> bool {
        self.write_errors.as_ref().is_some_and(|errors| !errors.is_empty())
            || self.write_concern_error.is_some()
    }
}

/// A document upserted by an update statement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct UpsertedId {
    /// The index of the update statement, across every batch of the call.
    pub index: usize,

    /// The `_id` of the upserted document.
    #[serde(rename = "_id")]
    pub id: Bson,
}

/// The combined outcome of an `insert`, `update` or `remove` call, across every batch it was split
/// into. Write errors are reported here rather than as an `Err` so that callers can see which
/// statements succeeded.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct WriteResult {
    /// Documents inserted, matched by updates or removed.
    pub n: u64,

    /// Documents changed by updates.
    pub n_modified: u64,

    /// Documents upserted by updates.
    pub upserted: Vec<UpsertedId>,

    /// Per-statement errors. Indexes refer to the statements of the whole call.
    pub write_errors: Vec<IndexedWriteError>,

    /// Write concern errors, at most one per batch.
    pub write_concern_errors: Vec<WriteConcernError>,

    /// The `_id` of every document inserted, keyed by its index in the call.
    pub inserted_ids: HashMap<usize, Bson>,
}

impl WriteResult {
    /// Whether every statement succeeded and every write concern was satisfied.
    pub fn is_ok(&self) -> bool {
        self.write_errors.is_empty() && self.write_concern_errors.is_empty()
    }

    pub(crate) fn merge(&mut self, other: WriteResult) {
        self.n += other.n;
        self.n_modified += other.n_modified;
        self.upserted.extend(other.upserted);
        self.write_errors.extend(other.write_errors);
        self.write_concern_errors.extend(other.write_concern_errors);
        self.inserted_ids.extend(other.inserted_ids);
    }
}

/// The `cursor` sub-document of a find, aggregate, listCollections or getMore reply.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CursorInfo {
    pub(crate) id: i64,

    pub(crate) ns: Option<Namespace>,

    #[serde(alias = "nextBatch")]
    pub(crate) first_batch: VecDeque<Document>,
}

#[derive(Debug, Deserialize)]
struct CursorBody {
    cursor: CursorInfo,
}

impl CursorInfo {
    pub(crate) fn from_reply(reply: &CommandReply) -> Result<Self> {
        let body: CursorBody = crate::bson::from_document(reply.result.clone())
            .map_err(|e| Error::invalid_response(format!("invalid cursor reply: {}", e)))?;
        Ok(body.cursor)
    }
}

/// One batch of a cursor together with the server that produced it.
#[derive(Debug)]
pub(crate) struct CursorBatch {
    pub(crate) id: i64,
    pub(crate) ns: Option<Namespace>,
    pub(crate) documents: VecDeque<Document>,
    pub(crate) address: ServerAddress,
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{CommandReply, CursorInfo, WriteResult};
    use crate::bson::doc;

    #[test]
    fn failed_reply_becomes_command_error_with_payload() {
        let reply = doc! { "ok": 0, "code": 13, "codeName": "Unauthorized", "errmsg": "denied" };
        let error = CommandReply::from_document(reply.clone()).unwrap_err();

        assert!(error.is_server_error());
        assert_eq!(error.server_response(), Some(&reply));
    }

    #[test]
    fn legacy_err_field_is_an_error() {
        let error =
            CommandReply::from_document(doc! { "$err": "bad query", "code": 2 }).unwrap_err();
        assert!(error.is_server_error());
        assert!(error.server_response().unwrap().contains_key("$err"));
    }

    #[test]
    fn write_failures_are_extracted() {
        let reply = CommandReply::from_document(doc! {
            "ok": 1,
            "n": 1,
            "writeErrors": [{ "index": 1, "code": 11000, "errmsg": "duplicate key" }],
            "writeConcernError": { "code": 64, "errmsg": "waiting for replication timed out" },
        })
        .unwrap();

        assert!(reply.ok);
        assert!(reply.has_write_failures());
        let write_errors = reply.write_errors.unwrap();
        assert_eq!(write_errors[0].index, 1);
        assert_eq!(write_errors[0].code, 11000);
        assert_eq!(reply.write_concern_error.unwrap().code, 64);
    }

    #[test]
    fn cursor_replies_accept_both_batch_names() {
        let first = CommandReply::from_document(doc! {
            "ok": 1,
            "cursor": { "id": 7_i64, "ns": "db.coll", "firstBatch": [{ "x": 1 }] },
        })
        .unwrap();
        let info = CursorInfo::from_reply(&first).unwrap();
        assert_eq!(info.id, 7);
        assert_eq!(info.first_batch.len(), 1);

        let next = CommandReply::from_document(doc! {
            "ok": 1.0,
            "cursor": { "id": 0_i64, "ns": "db.coll", "nextBatch": [] },
        })
        .unwrap();
        assert_eq!(CursorInfo::from_reply(&next).unwrap().id, 0);
    }

    #[test]
    fn merging_accumulates_counts() {
        let mut total = WriteResult::default();
        total.merge(WriteResult {
            n: 2,
            ..Default::default()
        });
        total.merge(WriteResult {
            n: 3,
            n_modified: 1,
            ..Default::default()
        });
        assert_eq!(total.n, 5);
        assert_eq!(total.n_modified, 1);
        assert!(total.is_ok());
    }
}
