use std::sync::Arc;
use tmatrix_core::{MatrixStore, Source, SourceSwitch};

/// Read access to the traffic matrix and control of the estimator's
/// [`Source`].
///
/// The query is cheap to clone and can be used from any thread.
#[derive(Debug, Clone)]
pub struct TrafficQuery {
    store: Arc<MatrixStore>,
    source: Arc<SourceSwitch>,
}

impl TrafficQuery {
    pub(crate) fn new(store: Arc<MatrixStore>, source: Arc<SourceSwitch>) -> Self {
        Self { store, source }
    }

    pub fn num_hosts(&self) -> usize {
        self.store.num_hosts()
    }

    /// the traffic matrix as `num_hosts * num_hosts` space separated
    /// decimal values, row-major
    ///
    /// The matrix is read in one go, never in the middle of a cycle.
    pub fn get_traffic(&self) -> String {
        self.store.traffic_text()
    }

    /// the traffic matrix, row-major
    pub fn snapshot(&self) -> Vec<u64> {
        self.store.snapshot()
    }

    /// select the source of the next estimation cycles, `"ADU"` selects
    /// the pushed telemetry and anything else the queues' counters.
    pub fn set_source(&self, value: &str) -> Source {
        let source = Source::select(value);
        self.source.set(source);
        tracing::info!(%source, "traffic source changed");
        source
    }

    pub fn source(&self) -> Source {
        self.source.get()
    }

    /// reset the enqueue, dequeue and traffic matrices
    pub fn clear(&self) {
        self.store.lock().clear();
        tracing::info!("traffic matrix cleared");
    }
}
