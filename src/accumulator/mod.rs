//! Per-query page accumulation.
//!
//! Pages sharing a query id are merged into one accumulator until either the
//! declared total is reached or the inactivity timer fires. Hosts can cap a
//! result without any terminal signal, and a quiet period is the only way to
//! tell "capped" from "more pages in flight".

pub mod scheduler;

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::capture::ResultSink;
use crate::classify::PageMerge;
use crate::model::{CapturedResult, Protocol, RowTotal};
use crate::replay::ReplayContext;

pub use scheduler::{ManualScheduler, Scheduler, TimerId, TimerTask, TokioScheduler};

/// Default quiet period after which a partial result is flushed.
pub const DEFAULT_FLUSH_DELAY: Duration = Duration::from_millis(1500);

/// What a merge did to its accumulator.
#[derive(Debug, Clone)]
pub enum MergeOutcome {
    /// The declared total was reached; the accumulator is gone.
    Complete(CapturedResult),
    /// More pages are expected; a flush timer is armed.
    Pending { returned: usize, total: RowTotal },
}

#[derive(Debug, Clone, Copy)]
struct PendingFlush {
    timer: TimerId,
    generation: u64,
}

#[derive(Default)]
struct QueryAccumulator {
    rows: Vec<Value>,
    columns: Vec<Value>,
    total_rows: Option<RowTotal>,
    replay: Option<ReplayContext>,
    pending_flush: Option<PendingFlush>,
}

impl QueryAccumulator {
    fn absorb(
        &mut self,
        rows: Vec<Value>,
        declared_total: Option<u64>,
        columns: Vec<Value>,
        replay: Option<ReplayContext>,
    ) {
        self.rows.extend(rows);

        if let Some(declared) = declared_total {
            self.total_rows = Some(self.total().raise(declared));
        }
        if self.columns.is_empty() && !columns.is_empty() {
            self.columns = columns;
        }
        if self.replay.is_none() {
            self.replay = replay;
        }
    }

    fn total(&self) -> RowTotal {
        self.total_rows.unwrap_or(RowTotal::Unbounded)
    }

    fn into_result(self, query_id: String, limited: bool) -> CapturedResult {
        let total_rows = self.total();
        CapturedResult {
            query_id: Some(query_id),
            protocol: Protocol::Enveloped,
            rows: self.rows,
            columns: self.columns,
            total_rows,
            limited,
            replay: self.replay,
        }
    }
}

/// Live accumulators keyed by query id.
///
/// Cheap to clone; clones share the same map. Each merge runs under the map
/// lock, so merges are atomic with respect to each other. Results are handed
/// to the sink after the lock is released.
#[derive(Clone)]
pub struct AccumulatorStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    accumulators: Mutex<HashMap<String, QueryAccumulator>>,
    scheduler: Arc<dyn Scheduler>,
    sink: Arc<dyn ResultSink>,
    flush_delay: Duration,
    generation: AtomicU64,
}

impl AccumulatorStore {
    pub fn new(scheduler: Arc<dyn Scheduler>, sink: Arc<dyn ResultSink>, flush_delay: Duration) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                accumulators: Mutex::new(HashMap::new()),
                scheduler,
                sink,
                flush_delay,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Merge one page into the accumulator for its query id.
    pub fn merge(&self, page: PageMerge) -> MergeOutcome {
        let PageMerge {
            query_id,
            rows,
            declared_total,
            columns,
            replay,
        } = page;
        let page_rows = rows.len();

        let mut accumulators = self.inner.accumulators.lock();
        let mut accumulator = match accumulators.remove(&query_id) {
            Some(existing) => existing,
            None => {
                tracing::debug!(query_id = %query_id, "Opened accumulator");
                QueryAccumulator::default()
            }
        };

        accumulator.absorb(rows, declared_total, columns, replay);
        if let Some(pending) = accumulator.pending_flush.take() {
            self.inner.scheduler.cancel(pending.timer);
        }

        let returned = accumulator.rows.len();
        let total = accumulator.total();
        tracing::trace!(
            query_id = %query_id,
            page_rows,
            returned,
            total = ?total.known(),
            "Merged page"
        );

        if total.is_reached_by(returned) {
            drop(accumulators);
            let result = accumulator.into_result(query_id, false);
            tracing::info!(
                query_id = ?result.query_id,
                rows = returned,
                "Result complete"
            );
            self.inner.sink.on_result(result.clone());
            return MergeOutcome::Complete(result);
        }

        accumulator.pending_flush = Some(self.arm_flush(&query_id));
        accumulators.insert(query_id, accumulator);

        MergeOutcome::Pending { returned, total }
    }

    /// Number of live accumulators.
    pub fn len(&self) -> usize {
        self.inner.accumulators.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, query_id: &str) -> bool {
        self.inner.accumulators.lock().contains_key(query_id)
    }

    fn arm_flush(&self, query_id: &str) -> PendingFlush {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let store: Weak<StoreInner> = Arc::downgrade(&self.inner);
        let key = query_id.to_string();

        let timer = self.inner.scheduler.schedule(
            self.inner.flush_delay,
            Box::new(move || {
                if let Some(store) = store.upgrade() {
                    store.flush_expired(&key, generation);
                }
            }),
        );

        PendingFlush { timer, generation }
    }
}

impl StoreInner {
    fn flush_expired(&self, query_id: &str, generation: u64) {
        let accumulator = {
            let mut accumulators = self.accumulators.lock();
            let current = accumulators
                .get(query_id)
                .and_then(|acc| acc.pending_flush)
                .map(|pending| pending.generation);
            if current != Some(generation) {
                tracing::trace!(query_id = %query_id, "Ignoring stale flush timer");
                return;
            }
            accumulators.remove(query_id)
        };

        let Some(accumulator) = accumulator else {
            return;
        };

        if accumulator.rows.is_empty() {
            tracing::debug!(query_id = %query_id, "Dropping empty accumulator");
            return;
        }

        let result = accumulator.into_result(query_id.to_string(), true);
        tracing::info!(
            query_id = %query_id,
            rows = result.returned_rows(),
            total = ?result.total_rows.known(),
            "Result flushed after inactivity, marked limited"
        );
        self.sink.on_result(result);
    }
}
