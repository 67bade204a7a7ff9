use std::time::Duration;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    bson::{Bson, Document},
    concern::ReadConcern,
    router::{CommandOptions, OperationScope, ReadPreferenceSpec},
};

pub(crate) const DEFAULT_NUMBER_OF_RETRIES: u32 = 5;
pub(crate) const DEFAULT_TAILABLE_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Specifies the index to use for an operation.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
#[non_exhaustive]
pub enum Hint {
    /// Specifies the keys of the index to use.
    Keys(Document),
    /// Specifies the name of the index to use.
    Name(String),
}

impl Hint {
    pub(crate) fn to_bson(&self) -> Bson {
        match self {
            Hint::Keys(ref d) => Bson::Document(d.clone()),
            Hint::Name(ref s) => Bson::String(s.clone()),
        }
    }
}

impl From<Document> for Hint {
    fn from(keys: Document) -> Self {
        Self::Keys(keys)
    }
}

impl From<&str> for Hint {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

/// Wire-level flags of a find cursor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum CursorFlag {
    /// Keep the cursor open after the last document, for capped collections.
    Tailable,
    /// Optimize scans of the oplog.
    OplogReplay,
    /// Prevent the server from timing out idle cursors.
    NoCursorTimeout,
    /// Block on the server for a while when a tailable cursor has no data.
    AwaitData,
    /// Stream every batch without waiting for getMore.
    Exhaust,
    /// Return partial results when some shards are down.
    Partial,
}

/// Client-side settings of a cursor.
#[derive(Clone, Copy, Debug, PartialEq)]
#[non_exhaustive]
pub enum CursorOption {
    /// How many times an empty tailable batch is retried before an empty result is returned.
    NumberOfRetries(u32),
    /// The delay between two such retries.
    TailableRetryInterval(Duration),
}

/// Options for a find cursor. Every field may also be set through the cursor's mutators until
/// the first document is fetched.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct FindOptions {
    /// Limits the fields of the returned documents.
    pub projection: Option<Document>,

    /// The order in which documents are returned.
    pub sort: Option<Document>,

    /// The number of documents to skip.
    pub skip: Option<u64>,

    /// The maximum number of documents to return. A negative value returns at most that many
    /// documents in a single batch and closes the cursor.
    pub limit: Option<i64>,

    /// The number of documents per batch.
    pub batch_size: Option<u32>,

    /// The index to use.
    pub hint: Option<Hint>,

    /// The server-side time limit of the query.
    pub max_time: Option<Duration>,

    /// The time a tailable, awaitData cursor blocks on the server waiting for data.
    pub max_await_time: Option<Duration>,

    /// A comment attached to the query for profiling.
    pub comment: Option<Bson>,

    /// The exclusive upper bound for a specific index.
    pub max: Option<Document>,

    /// The inclusive lower bound for a specific index.
    pub min: Option<Document>,

    /// Return only the index keys.
    pub return_key: Option<bool>,

    /// Include the record id of each document.
    pub show_record_id: Option<bool>,

    /// Prevents a document from being returned twice due to intervening writes. Rejected by
    /// modern servers.
    pub snapshot: Option<bool>,

    /// The collation of the query. Requires a server that accepts collation.
    pub collation: Option<Document>,

    /// Keep the cursor open once the last document has been read.
    pub tailable: Option<bool>,

    /// Block on the server while a tailable cursor has no data.
    pub await_data: Option<bool>,

    #[allow(missing_docs)]
    pub oplog_replay: Option<bool>,

    #[allow(missing_docs)]
    pub no_cursor_timeout: Option<bool>,

    #[allow(missing_docs)]
    pub exhaust: Option<bool>,

    /// Return partial results when some shards are unavailable.
    pub allow_partial_results: Option<bool>,

    /// How many times an empty tailable batch is retried before an empty result is returned.
    ///
    /// The default is 5.
    pub number_of_retries: Option<u32>,

    /// The delay between two tailable retries.
    ///
    /// The default is 500 milliseconds.
    pub tailable_retry_interval: Option<Duration>,

    /// The read preference for this query.
    pub read_preference: Option<ReadPreferenceSpec>,

    /// The read concern for this query.
    pub read_concern: Option<ReadConcern>,

    /// The scopes the query was issued from.
    pub scope: Option<OperationScope>,
}

impl FindOptions {
    pub(crate) fn command_options(&self) -> CommandOptions {
        CommandOptions {
            read_preference: self.read_preference.clone(),
            write_concern: None,
            read_concern: self.read_concern.clone(),
            scope: self.scope.clone(),
        }
    }

    pub(crate) fn is_tailable(&self) -> bool {
        self.tailable == Some(true)
    }

    pub(crate) fn set_flag(&mut self, flag: CursorFlag, value: bool) {
        let field = match flag {
            CursorFlag::Tailable => &mut self.tailable,
            CursorFlag::OplogReplay => &mut self.oplog_replay,
            CursorFlag::NoCursorTimeout => &mut self.no_cursor_timeout,
            CursorFlag::AwaitData => &mut self.await_data,
            CursorFlag::Exhaust => &mut self.exhaust,
            CursorFlag::Partial => &mut self.allow_partial_results,
        };
        *field = Some(value);
    }
}

/// Options for an aggregation cursor.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct AggregateOptions {
    /// Allow stages to write temporary data to disk.
    pub allow_disk_use: Option<bool>,

    /// The number of documents per batch.
    pub batch_size: Option<u32>,

    /// Skip document validation for `$out` and `$merge` stages.
    pub bypass_document_validation: Option<bool>,

    /// The collation of the pipeline. Requires a server that accepts collation.
    pub collation: Option<Document>,

    /// A comment attached to the pipeline for profiling.
    pub comment: Option<Bson>,

    /// The index to use for the initial `$match`.
    pub hint: Option<Hint>,

    /// The server-side time limit of the pipeline.
    pub max_time: Option<Duration>,

    /// The read preference for this pipeline.
    pub read_preference: Option<ReadPreferenceSpec>,

    /// The read concern for this pipeline.
    pub read_concern: Option<ReadConcern>,

    /// The scopes the pipeline was issued from.
    pub scope: Option<OperationScope>,
}

impl AggregateOptions {
    pub(crate) fn command_options(&self) -> CommandOptions {
        CommandOptions {
            read_preference: self.read_preference.clone(),
            write_concern: None,
            read_concern: self.read_concern.clone(),
            scope: self.scope.clone(),
        }
    }
}

/// Options for listing the collections of a database.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct ListCollectionsOptions {
    /// The number of collections per batch.
    pub batch_size: Option<u32>,

    /// Return only the collection names.
    pub name_only: Option<bool>,

    /// The read preference for the listing.
    pub read_preference: Option<ReadPreferenceSpec>,
}

impl ListCollectionsOptions {
    pub(crate) fn command_options(&self) -> CommandOptions {
        CommandOptions {
            read_preference: self.read_preference.clone(),
            ..Default::default()
        }
    }
}

/// Options for [`Cursor::count`](crate::Cursor::count). With `apply_skip_limit`, the cursor's
/// own skip and limit replace the ones given here.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct CountOptions {
    /// The number of matching documents to skip.
    pub skip: Option<u64>,

    /// The maximum number of documents to count.
    pub limit: Option<i64>,

    /// The index to use. Defaults to the cursor's hint.
    pub hint: Option<Hint>,

    /// The server-side time limit. Defaults to the cursor's.
    pub max_time: Option<Duration>,
}
