// Per-resource fetch engine: computes gaps against cached coverage,
// deduplicates against in-flight work, persists fetched chunks and
// notifies pending readers as coverage grows.

use std::collections::HashMap;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use rangeset::RangeSet;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::client::{ResourceClient, ResourceDescriptor};
use crate::error::FetchError;
use crate::store::BlobStore;

/// Snapshot of what a reader can consume right now.
///
/// `populated` is the contiguous covered prefix of the requested range,
/// expressed in absolute resource offsets; the same offsets index into
/// `file`.
#[derive(Debug, Clone)]
pub struct ReadProgress {
    pub file: PathBuf,
    pub populated: Range<u64>,
    pub total_size: u64,
}

#[derive(Debug, Clone)]
pub enum ReadEvent {
    /// Coverage of the requested range improved.
    Progress(ReadProgress),
    /// The requested range is fully covered; final event.
    Complete(ReadProgress),
    /// A covering fetch failed; the cache is intact and a later `read`
    /// retries. Final event.
    Stalled,
}

/// Observability counters for one fetch context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    pub inflight_ops: usize,
    pub pending_readers: usize,
    pub covered_bytes: u64,
}

struct OpState {
    range: Range<u64>,
    interest: usize,
    persistent: bool,
    token: CancellationToken,
    stored_any: bool,
}

struct ReaderState {
    range: Range<u64>,
    ops: Vec<u64>,
    tx: mpsc::UnboundedSender<ReadEvent>,
    last_covered: u64,
}

#[derive(Default)]
struct Inner {
    coverage: RangeSet<u64>,
    inflight: RangeSet<u64>,
    ops: HashMap<u64, OpState>,
    readers: HashMap<u64, ReaderState>,
    next_op_id: u64,
    next_reader_id: u64,
}

struct Shared {
    resource: ResourceDescriptor,
    client: Arc<dyn ResourceClient>,
    store: Arc<dyn BlobStore>,
    backing: PathBuf,
    cancel: CancellationToken,
}

/// Fetch engine for one (resource, quality) pair.
///
/// Guarantees at most one fetch operation in flight per unfilled,
/// non-overlapping gap: new range requests attach to overlapping
/// in-flight work where possible and only spawn operations for the
/// remaining uncovered sub-ranges.
pub struct FetchContext {
    shared: Arc<Shared>,
    inner: Arc<Mutex<Inner>>,
}

impl FetchContext {
    pub fn new(
        resource: ResourceDescriptor,
        client: Arc<dyn ResourceClient>,
        store: Arc<dyn BlobStore>,
    ) -> Result<Self, FetchError> {
        let backing = store.backing_file(resource.id)?;
        Ok(Self {
            shared: Arc::new(Shared {
                resource,
                client,
                store,
                backing,
                cancel: CancellationToken::new(),
            }),
            inner: Arc::new(Mutex::new(Inner::default())),
        })
    }

    pub fn resource(&self) -> &ResourceDescriptor {
        &self.shared.resource
    }

    pub fn total_size(&self) -> u64 {
        self.shared.resource.size
    }

    /// Request `[range)`. The returned handle yields progressively
    /// improving snapshots and completes once the range is fully
    /// covered. Dropping the handle withdraws interest.
    pub fn read(&self, range: Range<u64>) -> ReadHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();

        let reader_id = inner.next_reader_id;
        inner.next_reader_id += 1;

        if range.start >= range.end || inner.coverage.is_covered(range.start, range.end) {
            let _ = tx.send(ReadEvent::Complete(snapshot_for(
                &self.shared,
                &inner.coverage,
                &range,
            )));
            return ReadHandle {
                rx,
                inner: self.inner.clone(),
                reader_id,
            };
        }

        // Attach to every overlapping in-flight operation.
        let mut attached = Vec::new();
        for (&op_id, op) in inner.ops.iter_mut() {
            if op.range.start < range.end && range.start < op.range.end {
                op.interest += 1;
                attached.push(op_id);
            }
        }

        // Spawn operations for uncovered sub-ranges nobody is fetching.
        let mut missing = Vec::new();
        for gap in inner.coverage.gaps(range.start, range.end) {
            missing.extend(inner.inflight.gaps(gap.start, gap.end));
        }
        for sub in missing {
            let op_id = self.spawn_op(&mut inner, sub, false);
            if let Some(op) = inner.ops.get_mut(&op_id) {
                op.interest += 1;
            }
            attached.push(op_id);
        }

        let snapshot = snapshot_for(&self.shared, &inner.coverage, &range);
        let _ = tx.send(ReadEvent::Progress(snapshot));

        let last_covered = inner.coverage.covered_within(range.start, range.end);
        inner.readers.insert(
            reader_id,
            ReaderState {
                range,
                ops: attached,
                tx,
                last_covered,
            },
        );

        ReadHandle {
            rx,
            inner: self.inner.clone(),
            reader_id,
        }
    }

    /// Warm the cache for `[range)` without a reader. The spawned
    /// operations are flagged persistent and run to completion even with
    /// zero interested readers.
    pub fn prefetch(&self, range: Range<u64>) {
        let mut inner = self.inner.lock();
        let mut missing = Vec::new();
        for gap in inner.coverage.gaps(range.start, range.end) {
            missing.extend(inner.inflight.gaps(gap.start, gap.end));
        }
        for sub in missing {
            self.spawn_op(&mut inner, sub, true);
        }
    }

    /// Already-covered bytes for `[range)`, or `None` when the range is
    /// not fully cached yet.
    pub fn cached_bytes(&self, range: Range<u64>) -> Result<Option<Bytes>, FetchError> {
        {
            let inner = self.inner.lock();
            if !inner.coverage.is_covered(range.start, range.end) {
                return Ok(None);
            }
        }
        Ok(self
            .shared
            .store
            .read(self.shared.resource.id, range)?)
    }

    pub fn stats(&self) -> FetchStats {
        let inner = self.inner.lock();
        FetchStats {
            inflight_ops: inner.ops.len(),
            pending_readers: inner.readers.len(),
            covered_bytes: inner.coverage.total_covered(),
        }
    }

    fn spawn_op(&self, inner: &mut Inner, range: Range<u64>, persistent: bool) -> u64 {
        let op_id = inner.next_op_id;
        inner.next_op_id += 1;

        let token = self.shared.cancel.child_token();
        inner.ops.insert(
            op_id,
            OpState {
                range: range.clone(),
                interest: 0,
                persistent,
                token: token.clone(),
                stored_any: false,
            },
        );
        inner.inflight.union(range.start, range.end);

        let shared = self.shared.clone();
        let inner_arc = self.inner.clone();
        tokio::spawn(async move {
            debug!(
                resource_id = shared.resource.id,
                start = range.start,
                end = range.end,
                "starting gap fetch"
            );
            let outcome = fetch_gap(&shared, &inner_arc, op_id, &range, &token).await;
            finish_op(&shared, &inner_arc, op_id, outcome);
        });

        op_id
    }
}

impl Drop for FetchContext {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
        // Dropping the senders wakes any reader still waiting.
        self.inner.lock().readers.clear();
    }
}

/// Handle for one pending `read`.
pub struct ReadHandle {
    rx: mpsc::UnboundedReceiver<ReadEvent>,
    inner: Arc<Mutex<Inner>>,
    reader_id: u64,
}

impl ReadHandle {
    pub async fn next_event(&mut self) -> Option<ReadEvent> {
        self.rx.recv().await
    }

    /// Drain events until the range is fully covered.
    pub async fn wait_complete(&mut self) -> Result<ReadProgress, FetchError> {
        loop {
            match self.rx.recv().await {
                Some(ReadEvent::Complete(progress)) => return Ok(progress),
                Some(ReadEvent::Progress(_)) => {}
                Some(ReadEvent::Stalled) => return Err(FetchError::Stalled),
                None => return Err(FetchError::Cancelled),
            }
        }
    }
}

impl Drop for ReadHandle {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        release_reader(&mut inner, self.reader_id);
    }
}

async fn fetch_gap(
    shared: &Arc<Shared>,
    inner: &Arc<Mutex<Inner>>,
    op_id: u64,
    range: &Range<u64>,
    token: &CancellationToken,
) -> Result<(), FetchError> {
    let mut stream = shared
        .client
        .fetch(&shared.resource, std::slice::from_ref(range))
        .await?;

    loop {
        let item = tokio::select! {
            _ = token.cancelled() => return Err(FetchError::Cancelled),
            item = stream.next() => item,
        };
        let Some(item) = item else {
            return Ok(());
        };
        let chunk = item?;
        if chunk.data.is_empty() {
            continue;
        }

        shared
            .store
            .write(shared.resource.id, chunk.offset, &chunk.data)?;

        let mut inner = inner.lock();
        let end = chunk.offset + chunk.data.len() as u64;
        inner.coverage.union(chunk.offset, end);
        if let Some(op) = inner.ops.get_mut(&op_id) {
            op.stored_any = true;
        }
        notify_readers(shared, &mut inner);
    }
}

fn finish_op(
    shared: &Arc<Shared>,
    inner_arc: &Arc<Mutex<Inner>>,
    op_id: u64,
    outcome: Result<(), FetchError>,
) {
    let mut inner = inner_arc.lock();
    let Some(op) = inner.ops.remove(&op_id) else {
        return;
    };

    let mut inflight = RangeSet::new();
    for live in inner.ops.values() {
        inflight.union(live.range.start, live.range.end);
    }
    inner.inflight = inflight;

    let filled = inner.coverage.is_covered(op.range.start, op.range.end);
    match outcome {
        Ok(()) if filled => {
            trace!(
                resource_id = shared.resource.id,
                start = op.range.start,
                end = op.range.end,
                "gap fetch complete"
            );
        }
        Ok(()) => {
            warn!(
                resource_id = shared.resource.id,
                start = op.range.start,
                end = op.range.end,
                "fetch ended before covering its gap"
            );
            stall_overlapping(&mut inner, &op.range);
        }
        Err(FetchError::Cancelled) => {
            trace!(resource_id = shared.resource.id, "gap fetch cancelled");
        }
        Err(e) => {
            warn!(
                resource_id = shared.resource.id,
                error = %e,
                "gap fetch failed; readers may retry"
            );
            stall_overlapping(&mut inner, &op.range);
        }
    }
}

fn notify_readers(shared: &Shared, inner: &mut Inner) {
    let mut finished = Vec::new();
    {
        let Inner {
            coverage, readers, ..
        } = &mut *inner;
        for (&reader_id, reader) in readers.iter_mut() {
            let complete = coverage.is_covered(reader.range.start, reader.range.end);
            let covered = coverage.covered_within(reader.range.start, reader.range.end);
            if !complete && covered <= reader.last_covered {
                continue;
            }
            reader.last_covered = covered;

            let snapshot = snapshot_for(shared, coverage, &reader.range);
            if complete {
                let _ = reader.tx.send(ReadEvent::Complete(snapshot));
                finished.push(reader_id);
            } else {
                let _ = reader.tx.send(ReadEvent::Progress(snapshot));
            }
        }
    }
    for reader_id in finished {
        release_reader(inner, reader_id);
    }
}

/// Readers whose remaining gaps depended on a failed operation get the
/// recoverable failure signal; the cache is left as-is so a later read
/// retries.
fn stall_overlapping(inner: &mut Inner, range: &Range<u64>) {
    let stalled: Vec<u64> = {
        let Inner {
            coverage, readers, ..
        } = &*inner;
        readers
            .iter()
            .filter(|(_, reader)| {
                coverage
                    .gaps(reader.range.start, reader.range.end)
                    .iter()
                    .any(|gap| gap.start < range.end && range.start < gap.end)
            })
            .map(|(&id, _)| id)
            .collect()
    };
    for reader_id in stalled {
        if let Some(reader) = inner.readers.get(&reader_id) {
            let _ = reader.tx.send(ReadEvent::Stalled);
        }
        release_reader(inner, reader_id);
    }
}

fn release_reader(inner: &mut Inner, reader_id: u64) {
    let Some(reader) = inner.readers.remove(&reader_id) else {
        return;
    };
    for op_id in reader.ops {
        if let Some(op) = inner.ops.get_mut(&op_id) {
            op.interest = op.interest.saturating_sub(1);
            if op.interest == 0 && !op.persistent && !op.stored_any {
                op.token.cancel();
            }
        }
    }
}

fn snapshot_for(shared: &Shared, coverage: &RangeSet<u64>, range: &Range<u64>) -> ReadProgress {
    let populated_end = if range.start >= range.end {
        range.start
    } else {
        match coverage.gaps(range.start, range.end).first() {
            None => range.end,
            Some(gap) => gap.start,
        }
    };
    ReadProgress {
        file: shared.backing.clone(),
        populated: range.start..populated_end,
        total_size: shared.resource.size,
    }
}
