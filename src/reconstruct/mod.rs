//! Pagination reconstruction.
//!
//! Re-reads a capped result by resubmitting its query with explicit paging,
//! independently of whatever paging the host application used. Pages are
//! fetched strictly one at a time so offsets stay consistent; a run either
//! returns the fully merged result or a typed [`FetchError`].

pub mod error;
mod locator;
mod query;

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::model::{CapturedResult, RowTotal};
use crate::replay::ReplayContext;
use crate::transport::Transport;

pub use error::{check_status, FetchError};

/// Default page size for query resubmission.
pub const DEFAULT_BATCH_SIZE: usize = 49_999;

/// Progress after one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchProgress {
    pub pages: usize,
    pub fetched_rows: usize,
    pub total: RowTotal,
}

/// Observer of a running reconstruction; receives each page's new rows.
pub trait ProgressSink: Send + Sync {
    fn on_page(&self, progress: &FetchProgress, batch: &[Value]);
}

/// Progress sink that logs every page.
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn on_page(&self, progress: &FetchProgress, batch: &[Value]) {
        tracing::info!(
            page = progress.pages,
            batch = batch.len(),
            fetched = progress.fetched_rows,
            total = ?progress.total.known(),
            "Fetched page"
        );
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    TotalReached,
    EmptyPage,
    ShortPage,
    ServerDone,
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub result: CapturedResult,
    pub pages: usize,
    pub termination: Termination,
}

/// Drives replay runs over a transport that is not observed.
///
/// Give it the inner transport of an intercepting one, so its own pages are
/// not classified as new top-level results.
pub struct Reconstructor {
    transport: Arc<dyn Transport>,
    batch_size: usize,
}

impl Reconstructor {
    pub fn new(transport: Arc<dyn Transport>, batch_size: usize) -> Self {
        Self {
            transport,
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Retrieve the complete result from scratch.
    pub async fn fetch_all(
        &self,
        result: &CapturedResult,
        progress: &dyn ProgressSink,
    ) -> Result<FetchOutcome, FetchError> {
        self.resume(result, 0, progress).await
    }

    /// Keep the first `offset` captured rows and fetch from there on.
    ///
    /// Locator replays always continue from their captured locator, so the
    /// offset only applies to query resubmission.
    pub async fn resume(
        &self,
        result: &CapturedResult,
        offset: usize,
        progress: &dyn ProgressSink,
    ) -> Result<FetchOutcome, FetchError> {
        let outcome = match &result.replay {
            Some(ReplayContext::Query(context)) => {
                query::run(&*self.transport, self.batch_size, context, result, offset, progress).await
            }
            Some(ReplayContext::Locator(context)) => {
                locator::run(&*self.transport, context, result, progress).await
            }
            None => Err(FetchError::Protocol(
                "result carries no replay context".to_string(),
            )),
        };

        match &outcome {
            Ok(done) => tracing::info!(
                rows = done.result.returned_rows(),
                pages = done.pages,
                termination = ?done.termination,
                "Reconstruction finished"
            ),
            Err(err) => tracing::warn!(
                category = err.category(),
                error = %err,
                "Reconstruction aborted"
            ),
        }

        outcome
    }
}

/// Assemble the finished result of a run.
fn finished(source: &CapturedResult, rows: Vec<Value>, columns: Vec<Value>, total: RowTotal) -> CapturedResult {
    let total_rows = total.raise(rows.len() as u64);
    CapturedResult {
        query_id: source.query_id.clone(),
        protocol: source.protocol,
        rows,
        columns,
        total_rows,
        limited: false,
        replay: source.replay.clone(),
    }
}
