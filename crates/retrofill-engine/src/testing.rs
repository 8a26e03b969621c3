//! In-memory source and destination for exercising the engine without a store.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use retrofill_sdk::prelude::*;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

/// Build a record from a JSON object body.
///
/// # Panics
///
/// Panics if `body` is not a JSON object.
#[must_use]
pub fn source_record(id: &str, order_key: Value, body: Value) -> SourceRecord {
    let Value::Object(fields) = body else {
        panic!("record body must be a JSON object");
    };
    SourceRecord::new(id, order_key, fields)
}

/// Derived record whose only field is its dedup key.
#[must_use]
pub fn derived(key: &str) -> DerivedRecord {
    let mut fields = Map::new();
    fields.insert("key".to_string(), Value::String(key.to_string()));
    DerivedRecord {
        source_id: format!("src-{key}"),
        dedup_key: key.to_string(),
        fields,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ordered in-memory collection with fault injection.
#[derive(Debug, Default)]
pub struct MemorySource {
    records: Vec<SourceRecord>,
    fetches: AtomicUsize,
    requested: Mutex<Vec<usize>>,
    fail_on_fetch: Option<usize>,
    stall: bool,
    cancel_on_fetch: Option<(usize, CancellationToken)>,
    max_page_size: Option<usize>,
}

impl MemorySource {
    /// Records are sorted by `(order_key, id)`.
    #[must_use]
    pub fn new(mut records: Vec<SourceRecord>) -> Self {
        records.sort_by(|a, b| position_cmp(&a.order_key, &a.id, &b.order_key, &b.id));
        Self {
            records,
            ..Self::default()
        }
    }

    /// Fail the `n`th fetch call (1-based) with a transient network error.
    #[must_use]
    pub fn fail_on_fetch(mut self, n: usize) -> Self {
        self.fail_on_fetch = Some(n);
        self
    }

    /// Keep returning the first page and the cursor it was asked for.
    #[must_use]
    pub fn stalling(mut self) -> Self {
        self.stall = true;
        self
    }

    /// Cancel `token` while serving the `n`th fetch.
    #[must_use]
    pub fn cancel_on_fetch(mut self, n: usize, token: CancellationToken) -> Self {
        self.cancel_on_fetch = Some((n, token));
        self
    }

    /// Advertise a maximum page size.
    #[must_use]
    pub fn with_max_page_size(mut self, max: usize) -> Self {
        self.max_page_size = Some(max);
        self
    }

    #[must_use]
    pub fn fetch_calls(&self) -> usize {
        self.fetches.load(AtomicOrdering::SeqCst)
    }

    /// Page sizes requested, in call order.
    #[must_use]
    pub fn requested_sizes(&self) -> Vec<usize> {
        lock(&self.requested).clone()
    }
}

impl RecordSource for MemorySource {
    async fn fetch_page(
        &self,
        cursor: Option<&Cursor>,
        page_size: usize,
    ) -> Result<Page, ConnectorError> {
        let call = self.fetches.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        lock(&self.requested).push(page_size);
        if let Some((n, token)) = &self.cancel_on_fetch {
            if *n == call {
                token.cancel();
            }
        }
        if self.fail_on_fetch == Some(call) {
            return Err(ConnectorError::transient_network(
                "FETCH_FAILED",
                format!("fetch {call} failed"),
            ));
        }
        tokio::task::yield_now().await;

        if self.stall {
            let end = page_size.min(self.records.len());
            return Ok(Page {
                records: self.records[..end].to_vec(),
                next_cursor: cursor
                    .cloned()
                    .or_else(|| self.records[..end].last().map(SourceRecord::cursor)),
            });
        }

        let start = cursor.map_or(0, |c| {
            self.records
                .partition_point(|r| !c.precedes(&r.order_key, &r.id))
        });
        let end = start.saturating_add(page_size).min(self.records.len());
        Ok(Page::from_records(self.records[start..end].to_vec()))
    }

    fn max_page_size(&self) -> Option<usize> {
        self.max_page_size
    }
}

/// Destination that keeps created records in memory.
#[derive(Debug)]
pub struct MemoryDestination {
    created: Mutex<Vec<DerivedRecord>>,
    fail_keys: HashSet<String>,
    group_sizes: Mutex<Vec<usize>>,
    create_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    jitter: bool,
    max_group_size: usize,
}

impl Default for MemoryDestination {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDestination {
    #[must_use]
    pub fn new() -> Self {
        Self {
            created: Mutex::new(Vec::new()),
            fail_keys: HashSet::new(),
            group_sizes: Mutex::new(Vec::new()),
            create_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            jitter: false,
            max_group_size: DEFAULT_MAX_GROUP_SIZE,
        }
    }

    /// Reject any write containing one of these dedup keys.
    #[must_use]
    pub fn fail_keys<'a>(mut self, keys: impl IntoIterator<Item = &'a str>) -> Self {
        self.fail_keys.extend(keys.into_iter().map(str::to_string));
        self
    }

    /// Delay each write by a few milliseconds derived from its key.
    #[must_use]
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    #[must_use]
    pub fn with_max_group_size(mut self, cap: usize) -> Self {
        self.max_group_size = cap;
        self
    }

    #[must_use]
    pub fn created(&self) -> Vec<DerivedRecord> {
        lock(&self.created).clone()
    }

    /// Sizes of every grouped create call.
    #[must_use]
    pub fn group_sizes(&self) -> Vec<usize> {
        lock(&self.group_sizes).clone()
    }

    /// Single and grouped create calls issued.
    #[must_use]
    pub fn write_calls(&self) -> usize {
        self.create_calls.load(AtomicOrdering::SeqCst)
    }

    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(AtomicOrdering::SeqCst)
    }

    async fn settle(&self, key: &str) {
        let now = self.in_flight.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, AtomicOrdering::SeqCst);
        if self.jitter {
            let ms = key.bytes().map(u64::from).sum::<u64>() % 4;
            tokio::time::sleep(Duration::from_millis(ms + 1)).await;
        } else {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, AtomicOrdering::SeqCst);
    }

    fn rejected(&self, key: &str) -> Option<ConnectorError> {
        self.fail_keys.contains(key).then(|| {
            ConnectorError::transient_network("WRITE_REJECTED", format!("write rejected for {key}"))
        })
    }

    fn push(&self, records: &[DerivedRecord]) -> Vec<DocumentId> {
        let mut created = lock(&self.created);
        let first = created.len();
        created.extend_from_slice(records);
        (first..created.len()).map(|i| format!("doc-{i}")).collect()
    }
}

impl Destination for MemoryDestination {
    async fn create(&self, record: &DerivedRecord) -> Result<DocumentId, ConnectorError> {
        self.create_calls.fetch_add(1, AtomicOrdering::SeqCst);
        self.settle(&record.dedup_key).await;
        if let Some(err) = self.rejected(&record.dedup_key) {
            return Err(err);
        }
        Ok(self
            .push(std::slice::from_ref(record))
            .into_iter()
            .next()
            .unwrap_or_default())
    }

    async fn create_group(
        &self,
        records: &[DerivedRecord],
    ) -> Result<Vec<DocumentId>, ConnectorError> {
        self.create_calls.fetch_add(1, AtomicOrdering::SeqCst);
        lock(&self.group_sizes).push(records.len());
        if records.len() > self.max_group_size {
            return Err(ConnectorError::quota("GROUP_TOO_LARGE", "group exceeds cap"));
        }
        let first_key = records.first().map_or("", |r| r.dedup_key.as_str());
        self.settle(first_key).await;
        if let Some(err) = records.iter().find_map(|r| self.rejected(&r.dedup_key)) {
            return Err(err);
        }
        Ok(self.push(records))
    }

    fn max_group_size(&self) -> usize {
        self.max_group_size
    }
}
