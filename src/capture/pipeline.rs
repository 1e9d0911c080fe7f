use parking_lot::Mutex;
use std::sync::Arc;

use crate::accumulator::AccumulatorStore;
use crate::capture::sink::ResultSink;
use crate::classify::{CaptureError, Classification, ProtocolRules, ResponseClassifier};
use crate::transport::{Exchange, ExchangeObserver};

/// Classifier, accumulator store and result sink wired together as the
/// observer of an intercepting transport.
pub struct CapturePipeline {
    classifier: Mutex<ResponseClassifier>,
    store: AccumulatorStore,
    sink: Arc<dyn ResultSink>,
}

impl CapturePipeline {
    /// `sink` should be the same sink the store emits to.
    pub fn new(rules: ProtocolRules, store: AccumulatorStore, sink: Arc<dyn ResultSink>) -> Self {
        Self {
            classifier: Mutex::new(ResponseClassifier::new(rules)),
            store,
            sink,
        }
    }

    pub fn store(&self) -> &AccumulatorStore {
        &self.store
    }
}

impl ExchangeObserver for CapturePipeline {
    fn observe(&self, exchange: &Exchange) -> Result<(), CaptureError> {
        let classification = self.classifier.lock().classify(exchange)?;

        match classification {
            Classification::Ignore(reason) => {
                tracing::trace!(url = %exchange.url, ?reason, "Exchange ignored");
            }
            Classification::Merge(page) => {
                tracing::debug!(
                    url = %exchange.url,
                    query_id = %page.query_id,
                    rows = page.rows.len(),
                    "Paginated page observed"
                );
                self.store.merge(page);
            }
            Classification::SelfContained(result) => {
                tracing::debug!(
                    url = %exchange.url,
                    protocol = result.protocol.as_str(),
                    rows = result.returned_rows(),
                    limited = result.limited,
                    "Self-contained result observed"
                );
                self.sink.on_result(result);
            }
        }

        Ok(())
    }
}
