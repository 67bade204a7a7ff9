pub(crate) mod options;
pub(crate) mod sort;

use std::{collections::VecDeque, sync::Arc, time::Duration};

use derive_where::derive_where;
use futures_core::Stream;

use self::{
    options::{
        AggregateOptions,
        CountOptions,
        CursorFlag,
        CursorOption,
        FindOptions,
        Hint,
        ListCollectionsOptions,
        DEFAULT_NUMBER_OF_RETRIES,
        DEFAULT_TAILABLE_RETRY_INTERVAL,
    },
    sort::SortSpec,
};
use crate::{
    bson::{doc, Bson, Document},
    cmap::transport::next_request_id,
    error::{Error, Result},
    operation::{Aggregate, Count, Find, GetMore, KillCursors, ListCollections},
    options::ServerAddress,
    results::CursorBatch,
    router::ReadPreferenceSpec,
    runtime::{self, AsyncJoinHandle},
    trace::CURSOR_TRACING_EVENT_TARGET,
    Namespace,
    Topology,
};

/// The lifecycle of a [`Cursor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum CursorState {
    /// Nothing has been sent yet; options may still change.
    Init,

    /// The first batch was received and the server cursor may have more.
    Open,

    /// A getMore is in flight.
    GetMore,

    /// The server cursor is exhausted or was killed. Buffered documents may remain.
    Closed,
}

/// The command that opens the cursor.
#[derive(Clone, Debug)]
enum CursorSource {
    Find {
        filter: Document,
        options: FindOptions,
    },
    Aggregate {
        pipeline: Vec<Document>,
        options: AggregateOptions,
    },
    ListCollections {
        db: String,
        filter: Document,
        options: ListCollectionsOptions,
    },
}

type Transform = Arc<dyn Fn(Document) -> Document + Send + Sync>;

/// A `Cursor` streams the result of a query. Nothing is sent to the server until the first
/// document is requested; the documents of each batch are then returned one at a time, and the
/// next batch is fetched with a `getMore` on the server that produced the first one.
///
/// Until the first fetch, the query can still be changed through the cursor's setters. Afterwards
/// they fail with a cursor-closed error.
///
/// ```rust,no_run
/// # use mongodb_core::{bson::doc, Namespace, Topology};
/// # async fn example(topology: Topology) -> mongodb_core::error::Result<()> {
/// let mut cursor = topology.cursor(&Namespace::new("app", "events"), doc! {}, None)?;
/// cursor.sort(vec![("at", "descending")])?.limit(10)?.batch_size(5)?;
///
/// while let Some(event) = cursor.next().await? {
///     println!("{}", event);
/// }
/// # Ok(())
/// # }
/// ```
///
/// Tailable cursors on capped collections stay open after the last document. When a batch comes
/// back empty, the cursor retries a few times (see [`CursorOption`]) and then returns `None`
/// without closing, so that a later call picks up new documents.
///
/// A cursor that is dropped while the server still holds its results kills them in the
/// background.
#[derive_where(Debug)]
pub struct Cursor {
    topology: Topology,
    ns: Namespace,
    source: CursorSource,
    state: CursorState,
    id: i64,

    /// The server that owns the cursor. Every getMore and killCursors goes there.
    address: Option<ServerAddress>,

    buffer: VecDeque<Document>,

    #[derive_where(skip)]
    transform: Option<Transform>,

    /// Documents handed out since the cursor was opened, for enforcing the limit.
    returned: u64,

    retries_left: u32,

    /// Shared by every command the cursor sends.
    operation_id: i32,

    in_flight: Option<AsyncJoinHandle<Result<CursorBatch>>>,
}

impl Cursor {
    fn new(topology: Topology, ns: Namespace, source: CursorSource) -> Self {
        let mut cursor = Self {
            topology,
            ns,
            source,
            state: CursorState::Init,
            id: 0,
            address: None,
            buffer: VecDeque::new(),
            transform: None,
            returned: 0,
            retries_left: 0,
            operation_id: next_request_id(),
            in_flight: None,
        };
        cursor.retries_left = cursor.number_of_retries();
        cursor
    }

    pub(crate) fn find(topology: Topology, ns: Namespace, filter: Document, options: FindOptions) -> Self {
        Self::new(topology, ns, CursorSource::Find { filter, options })
    }

    pub(crate) fn aggregate(
        topology: Topology,
        ns: Namespace,
        pipeline: Vec<Document>,
        options: AggregateOptions,
    ) -> Self {
        Self::new(topology, ns, CursorSource::Aggregate { pipeline, options })
    }

    pub(crate) fn list_collections(
        topology: Topology,
        db: String,
        filter: Document,
        options: ListCollectionsOptions,
    ) -> Self {
        let ns = Namespace::command(db.clone());
        Self::new(
            topology,
            ns,
            CursorSource::ListCollections {
                db,
                filter,
                options,
            },
        )
    }

    /// The namespace of the cursor. For aggregations and listings this becomes the namespace
    /// reported by the server once the cursor is open.
    pub fn namespace(&self) -> &Namespace {
        &self.ns
    }

    /// The server-side id of the cursor, or 0 if there is none.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Where the cursor is in its lifecycle.
    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Whether the server cursor is exhausted or was killed.
    pub fn is_closed(&self) -> bool {
        self.state == CursorState::Closed
    }

    /// The number of documents received but not yet returned.
    pub fn buffered_count(&self) -> usize {
        self.buffer.len()
    }

    /// Returns up to `count` of the documents received but not yet returned, without fetching.
    pub fn read_buffered_documents(&mut self, count: usize) -> Vec<Document> {
        let count = count.min(self.buffer.len());
        let documents: Vec<Document> = self.buffer.drain(..count).collect();
        self.returned += documents.len() as u64;
        documents
            .into_iter()
            .map(|document| self.apply_transform(document))
            .collect()
    }

    fn frozen(&self, option: &str) -> Result<()> {
        if self.state != CursorState::Init {
            return Err(Error::cursor_closed(format!(
                "cannot change {} after the cursor has been opened",
                option
            )));
        }
        Ok(())
    }

    fn find_options_mut(&mut self, option: &str) -> Result<&mut FindOptions> {
        self.frozen(option)?;
        match self.source {
            CursorSource::Find {
                ref mut options, ..
            } => Ok(options),
            _ => Err(Error::invalid_argument(format!(
                "{} is only supported by find cursors",
                option
            ))),
        }
    }

    fn find_options(&self) -> Option<&FindOptions> {
        match self.source {
            CursorSource::Find { ref options, .. } => Some(options),
            _ => None,
        }
    }

    fn reject_if_tailable(&self, what: &str) -> Result<()> {
        if self.is_tailable() {
            return Err(Error::invalid_argument(format!(
                "Tailable cursor doesn't support {}",
                what
            )));
        }
        Ok(())
    }

    /// Whether the cursor stays open after its last document.
    pub fn is_tailable(&self) -> bool {
        self.find_options().is_some_and(FindOptions::is_tailable)
    }

    /// Replaces the query filter.
    pub fn filter(&mut self, filter: Document) -> Result<&mut Self> {
        self.frozen("filter")?;
        match self.source {
            CursorSource::Find {
                filter: ref mut current,
                ..
            }
            | CursorSource::ListCollections {
                filter: ref mut current,
                ..
            } => *current = filter,
            CursorSource::Aggregate { .. } => {
                return Err(Error::invalid_argument(
                    "the filter of an aggregation is part of its pipeline",
                ))
            }
        }
        Ok(self)
    }

    /// Sets the sort order from a document, a field name (ascending) or `(field, direction)`
    /// pairs.
    pub fn sort(&mut self, sort: impl Into<SortSpec>) -> Result<&mut Self> {
        self.frozen("sort")?;
        self.reject_if_tailable("sorting")?;
        let sort = sort.into().normalize()?;
        self.find_options_mut("sort")?.sort = Some(sort);
        Ok(self)
    }

    /// Sets the maximum number of documents to return. A negative limit returns at most that many
    /// documents in a single batch.
    pub fn limit(&mut self, limit: i64) -> Result<&mut Self> {
        self.frozen("limit")?;
        self.reject_if_tailable("limit")?;
        self.find_options_mut("limit")?.limit = Some(limit);
        Ok(self)
    }

    /// Sets how many matching documents the server skips before returning any.
    pub fn skip(&mut self, skip: u64) -> Result<&mut Self> {
        self.frozen("skip")?;
        self.reject_if_tailable("skip")?;
        self.find_options_mut("skip")?.skip = Some(skip);
        Ok(self)
    }

    /// Sets the number of documents per batch.
    pub fn batch_size(&mut self, batch_size: u32) -> Result<&mut Self> {
        self.frozen("batchSize")?;
        self.reject_if_tailable("batchSize")?;
        if i32::try_from(batch_size).is_err() {
            return Err(Error::invalid_argument(
                "The batch size must fit into a signed 32-bit integer",
            ));
        }
        match self.source {
            CursorSource::Find {
                ref mut options, ..
            } => options.batch_size = Some(batch_size),
            CursorSource::Aggregate {
                ref mut options, ..
            } => options.batch_size = Some(batch_size),
            CursorSource::ListCollections {
                ref mut options, ..
            } => options.batch_size = Some(batch_size),
        }
        Ok(self)
    }

    /// Sets the projection applied to returned documents.
    pub fn project(&mut self, projection: Document) -> Result<&mut Self> {
        self.find_options_mut("projection")?.projection = Some(projection);
        Ok(self)
    }

    /// Forces the index the query uses, by name or key pattern.
    pub fn hint(&mut self, hint: impl Into<Hint>) -> Result<&mut Self> {
        self.find_options_mut("hint")?.hint = Some(hint.into());
        Ok(self)
    }

    /// Sets the read preference, as a mode name, a `{ mode, tags, maxStalenessSeconds }`
    /// document or a resolved [`ReadPreference`](crate::options::ReadPreference).
    pub fn read_preference(&mut self, read_preference: impl Into<ReadPreferenceSpec>) -> Result<&mut Self> {
        self.frozen("readPreference")?;
        let read_preference = Some(read_preference.into());
        match self.source {
            CursorSource::Find {
                ref mut options, ..
            } => options.read_preference = read_preference,
            CursorSource::Aggregate {
                ref mut options, ..
            } => options.read_preference = read_preference,
            CursorSource::ListCollections {
                ref mut options, ..
            } => options.read_preference = read_preference,
        }
        Ok(self)
    }

    /// Sets one of the wire-level flags of a find cursor.
    pub fn add_cursor_flag(&mut self, flag: CursorFlag, value: bool) -> Result<&mut Self> {
        self.find_options_mut("cursor flags")?.set_flag(flag, value);
        Ok(self)
    }

    /// Sets a tailing option. Resets the retries left for the current round.
    pub fn set_option(&mut self, option: CursorOption) -> Result<&mut Self> {
        let options = self.find_options_mut("cursor options")?;
        match option {
            CursorOption::NumberOfRetries(retries) => options.number_of_retries = Some(retries),
            CursorOption::TailableRetryInterval(interval) => {
                options.tailable_retry_interval = Some(interval)
            }
        }
        self.retries_left = self.number_of_retries();
        Ok(self)
    }

    /// Sets the server-side time limit for the find and each getMore.
    pub fn max_time(&mut self, max_time: Duration) -> Result<&mut Self> {
        self.find_options_mut("maxTimeMS")?.max_time = Some(max_time);
        Ok(self)
    }

    /// Sets how long each getMore of a tailable, awaitData cursor blocks waiting for data.
    pub fn max_await_time(&mut self, max_await_time: Duration) -> Result<&mut Self> {
        self.find_options_mut("maxAwaitTimeMS")?.max_await_time = Some(max_await_time);
        Ok(self)
    }

    /// Attaches a comment that shows up in server logs and profiler output.
    pub fn comment(&mut self, comment: impl Into<Bson>) -> Result<&mut Self> {
        self.find_options_mut("comment")?.comment = Some(comment.into());
        Ok(self)
    }

    /// Sets the collation used to compare strings.
    pub fn collation(&mut self, collation: Document) -> Result<&mut Self> {
        self.find_options_mut("collation")?.collation = Some(collation);
        Ok(self)
    }

    /// Inclusive lower bound on the hinted index.
    pub fn min(&mut self, min: Document) -> Result<&mut Self> {
        self.find_options_mut("min")?.min = Some(min);
        Ok(self)
    }

    /// Exclusive upper bound on the hinted index.
    pub fn max(&mut self, max: Document) -> Result<&mut Self> {
        self.find_options_mut("max")?.max = Some(max);
        Ok(self)
    }

    /// Return only the index keys of matching documents.
    pub fn return_key(&mut self, return_key: bool) -> Result<&mut Self> {
        self.find_options_mut("returnKey")?.return_key = Some(return_key);
        Ok(self)
    }

    /// Adds `$recordId` to every returned document.
    pub fn show_record_id(&mut self, show_record_id: bool) -> Result<&mut Self> {
        self.find_options_mut("showRecordId")?.show_record_id = Some(show_record_id);
        Ok(self)
    }

    /// Applies `transform` to every document returned from now on, after any transform set
    /// earlier.
    pub fn map(&mut self, transform: impl Fn(Document) -> Document + Send + Sync + 'static) -> &mut Self {
        let transform: Transform = match self.transform.take() {
            Some(previous) => Arc::new(move |document| transform(previous(document))),
            None => Arc::new(transform),
        };
        self.transform = Some(transform);
        self
    }

    fn apply_transform(&self, document: Document) -> Document {
        match self.transform {
            Some(ref transform) => transform(document),
            None => document,
        }
    }

    fn number_of_retries(&self) -> u32 {
        self.find_options()
            .and_then(|options| options.number_of_retries)
            .unwrap_or(DEFAULT_NUMBER_OF_RETRIES)
    }

    fn tailable_retry_interval(&self) -> Duration {
        self.find_options()
            .and_then(|options| options.tailable_retry_interval)
            .unwrap_or(DEFAULT_TAILABLE_RETRY_INTERVAL)
    }

    /// The absolute limit, if one is set.
    fn limit_value(&self) -> Option<u64> {
        self.find_options()
            .and_then(|options| options.limit)
            .filter(|limit| *limit != 0)
            .map(i64::unsigned_abs)
    }

    fn limit_reached(&self) -> bool {
        self.limit_value()
            .is_some_and(|limit| self.returned >= limit)
    }

    fn batch_size_value(&self) -> Option<u32> {
        match self.source {
            CursorSource::Find { ref options, .. } => options.batch_size,
            CursorSource::Aggregate { ref options, .. } => options.batch_size,
            CursorSource::ListCollections { ref options, .. } => options.batch_size,
        }
    }

    /// Returns the next document, fetching a new batch when the buffered ones are used up.
    /// Returns `None` once the results are exhausted, or, for a tailable cursor, when no new
    /// document arrived within the configured retries.
    pub async fn next(&mut self) -> Result<Option<Document>> {
        if !self.fill().await? {
            return Ok(None);
        }
        match self.buffer.pop_front() {
            Some(document) => {
                self.returned += 1;
                Ok(Some(self.apply_transform(document)))
            }
            None => Ok(None),
        }
    }

    /// Whether [`Cursor::next`] would return a document. May fetch a batch.
    pub async fn has_next(&mut self) -> Result<bool> {
        self.fill().await
    }

    /// Fetches until a document is buffered. Returns whether one is.
    async fn fill(&mut self) -> Result<bool> {
        loop {
            if self.limit_reached() {
                if self.state != CursorState::Closed {
                    self.close().await?;
                }
                return Ok(false);
            }
            if !self.buffer.is_empty() {
                return Ok(true);
            }

            match self.state {
                CursorState::Closed => return Ok(false),
                CursorState::Init => self.initialize().await?,
                CursorState::Open | CursorState::GetMore => {
                    if self.id == 0 {
                        self.state = CursorState::Closed;
                        continue;
                    }

                    let received = self.get_more().await?;
                    if received > 0 {
                        self.retries_left = self.number_of_retries();
                        continue;
                    }
                    if self.id == 0 || !self.is_tailable() {
                        continue;
                    }
                    if self.retries_left == 0 {
                        self.retries_left = self.number_of_retries();
                        return Ok(false);
                    }
                    self.retries_left -= 1;
                    runtime::sleep(self.tailable_retry_interval()).await;
                }
            }
        }
    }

    /// Sends the command that opens the cursor.
    async fn initialize(&mut self) -> Result<()> {
        let topology = self.topology.clone();
        let operation_id = Some(self.operation_id);
        let batch = match self.source {
            CursorSource::Find {
                ref filter,
                ref options,
            } => {
                let mut find = Find::new(self.ns.clone(), filter.clone(), options.clone());
                topology
                    .execute_operation_with_id(&mut find, operation_id)
                    .await?
            }
            CursorSource::Aggregate {
                ref pipeline,
                ref options,
            } => {
                let mut aggregate =
                    Aggregate::new(self.ns.clone(), pipeline.clone(), options.clone());
                topology
                    .execute_operation_with_id(&mut aggregate, operation_id)
                    .await?
            }
            CursorSource::ListCollections {
                ref db,
                ref filter,
                ref options,
            } => {
                let mut list = ListCollections::new(db.clone(), filter.clone(), options.clone());
                topology
                    .execute_operation_with_id(&mut list, operation_id)
                    .await?
            }
        };

        self.address = Some(batch.address.clone());
        self.accept(batch);
        Ok(())
    }

    /// Buffers a batch and records where the cursor stands. Returns the number of documents.
    fn accept(&mut self, batch: CursorBatch) -> usize {
        if let Some(ns) = batch.ns {
            self.ns = ns;
        }
        self.id = batch.id;
        self.state = if batch.id == 0 {
            CursorState::Closed
        } else {
            CursorState::Open
        };

        let received = batch.documents.len();
        self.buffer.extend(batch.documents);
        received
    }

    async fn get_more(&mut self) -> Result<usize> {
        if self.in_flight.is_none() {
            let handle = self.spawn_get_more()?;
            self.in_flight = Some(handle);
        }
        self.state = CursorState::GetMore;

        let result = match self.in_flight.as_mut() {
            Some(handle) => handle.await,
            None => return Err(Error::internal("getMore was not started")),
        };
        self.in_flight = None;

        match result {
            Ok(batch) => Ok(self.accept(batch)),
            Err(error) => {
                tracing::debug!(
                    target: CURSOR_TRACING_EVENT_TARGET,
                    namespace = %self.ns,
                    cursorId = self.id,
                    error = %error,
                    "getMore failed; closing cursor"
                );
                self.id = 0;
                self.state = CursorState::Closed;
                Err(error)
            }
        }
    }

    /// Starts a getMore as its own task, so that [`Cursor::close`] can wait for the response
    /// even if the call that started it was cancelled.
    fn spawn_get_more(&self) -> Result<AsyncJoinHandle<Result<CursorBatch>>> {
        let address = self
            .address
            .clone()
            .ok_or_else(|| Error::internal("open cursor without a server address"))?;

        // Never ask for more than the limit leaves.
        let remaining = self
            .limit_value()
            .map(|limit| limit.saturating_sub(self.returned))
            .map(|remaining| u32::try_from(remaining).unwrap_or(u32::MAX));
        let batch_size = match (self.batch_size_value(), remaining) {
            (Some(size), Some(remaining)) => Some(size.min(remaining)),
            (size, remaining) => size.or(remaining),
        };
        let max_time = self.find_options().and_then(|options| options.max_await_time);

        let mut get_more = GetMore::new(self.ns.clone(), self.id, address, batch_size, max_time);
        let topology = self.topology.clone();
        let operation_id = Some(self.operation_id);
        Ok(runtime::spawn(async move {
            topology
                .execute_operation_with_id(&mut get_more, operation_id)
                .await
        }))
    }

    /// Closes the cursor. A getMore in flight is awaited first; then the server cursor is
    /// killed if it is still open. Buffered documents are discarded.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(handle) = self.in_flight.take() {
            if let Ok(batch) = handle.await {
                self.id = batch.id;
            }
        }

        self.buffer.clear();
        self.state = CursorState::Closed;
        let id = std::mem::take(&mut self.id);
        if id == 0 {
            return Ok(());
        }

        let Some(address) = self.address.clone() else {
            return Ok(());
        };
        tracing::debug!(
            target: CURSOR_TRACING_EVENT_TARGET,
            namespace = %self.ns,
            cursorId = id,
            "Killing cursor"
        );
        let mut kill = KillCursors::new(self.ns.clone(), vec![id], address);
        self.topology
            .execute_operation_with_id(&mut kill, Some(self.operation_id))
            .await
    }

    /// Closes the cursor and returns it to its initial state, so that the next fetch runs the
    /// query again. Options can be changed again.
    pub async fn rewind(&mut self) -> Result<()> {
        self.close().await?;
        self.state = CursorState::Init;
        self.address = None;
        self.returned = 0;
        self.retries_left = self.number_of_retries();
        Ok(())
    }

    /// Runs the query from the start and returns every document.
    pub async fn to_array(&mut self) -> Result<Vec<Document>> {
        if self.is_tailable() {
            return Err(Error::invalid_argument(
                "Tailable cursor cannot be converted to array",
            ));
        }

        self.rewind().await?;
        let mut documents = Vec::new();
        while let Some(document) = self.next().await? {
            documents.push(document);
        }
        Ok(documents)
    }

    /// Calls `f` with each document until the results are exhausted or `f` returns `false`. No
    /// further batch is fetched once `f` asks to stop.
    pub async fn each<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(Document) -> bool,
    {
        while let Some(document) = self.next().await? {
            if !f(document) {
                break;
            }
        }
        Ok(())
    }

    /// Counts the documents matching the cursor's filter with the `count` command.
    ///
    /// The cursor's own position is ignored. With `apply_skip_limit` the cursor's skip and limit
    /// are applied; otherwise those of `options` are. The hint and time limit come from `options`,
    /// falling back to the cursor's.
    pub async fn count(
        &self,
        apply_skip_limit: bool,
        options: impl Into<Option<CountOptions>>,
    ) -> Result<u64> {
        let CursorSource::Find {
            ref filter,
            options: ref find_options,
        } = self.source
        else {
            return Err(Error::invalid_argument(
                "count is only supported by find cursors",
            ));
        };
        let options = options.into().unwrap_or_default();

        let (skip, limit) = if apply_skip_limit {
            (find_options.skip, find_options.limit)
        } else {
            (options.skip, options.limit)
        };
        let hint = options.hint.or_else(|| find_options.hint.clone());
        let max_time = options.max_time.or(find_options.max_time);

        let mut count = Count::new(
            self.ns.clone(),
            filter.clone(),
            skip,
            limit,
            hint,
            max_time,
            find_options.command_options(),
        );
        self.topology.execute_operation(&mut count).await
    }

    /// Asks the server how it would run the query.
    pub async fn explain(&self) -> Result<Document> {
        let CursorSource::Find {
            ref filter,
            ref options,
        } = self.source
        else {
            return Err(Error::invalid_argument(
                "explain is only supported by find cursors",
            ));
        };

        let find = Find::new(self.ns.clone(), filter.clone(), options.clone());
        let reply = self
            .topology
            .command(
                &Namespace::command(self.ns.db.clone()),
                doc! { "explain": find.body()? },
                options.command_options(),
            )
            .await?;
        Ok(reply.result)
    }

    /// Creates an unopened cursor with the same query, options and transforms.
    pub fn clone_cursor(&self) -> Cursor {
        let mut cursor = Cursor::new(self.topology.clone(), self.ns.clone(), self.source.clone());
        cursor.transform = self.transform.clone();
        cursor
    }

    /// Converts the cursor into a [`Stream`] of its documents. The stream ends after the first
    /// error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Document>> + Send {
        futures_util::stream::unfold(Some(self), |cursor| async move {
            let mut cursor = cursor?;
            match cursor.next().await {
                Ok(Some(document)) => Some((Ok(document), Some(cursor))),
                Ok(None) => None,
                Err(error) => Some((Err(error), None)),
            }
        })
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        let in_flight = self.in_flight.take();
        if self.id == 0 && in_flight.is_none() {
            return;
        }
        let Some(address) = self.address.clone() else {
            return;
        };

        let topology = self.topology.clone();
        let ns = self.ns.clone();
        let operation_id = Some(self.operation_id);
        let mut id = self.id;
        runtime::spawn_if_in_runtime(async move {
            if let Some(handle) = in_flight {
                if let Ok(batch) = handle.await {
                    id = batch.id;
                }
            }
            if id == 0 {
                return;
            }
            let mut kill = KillCursors::new(ns, vec![id], address);
            if let Err(error) = topology
                .execute_operation_with_id(&mut kill, operation_id)
                .await
            {
                tracing::debug!(
                    target: CURSOR_TRACING_EVENT_TARGET,
                    cursorId = id,
                    error = %error,
                    "Failed to kill dropped cursor"
                );
            }
        });
    }
}
