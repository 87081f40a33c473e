//! One estimation cycle.
//!
//! The cycle is the unit of work of the estimator: it samples the queues'
//! counters (and, in [`Source::Telemetry`] mode, drains the pushed
//! telemetry records) and publishes the derived traffic matrix. All of it
//! is done while holding the [`MatrixStore`] lock so a reader only ever
//! sees complete cycles.
//!
//! The counters are read first and committed to the matrices only when
//! every read succeeded. A failed read leaves the `dequeue` and `traffic`
//! matrices as they were. In [`Source::Telemetry`] mode the records
//! polled before the read are already accounted for in `enqueue`.

use crate::{
    counter::{CounterError, CounterKind, HandlerTable, queue_name},
    defaults::DIAGNOSTIC_PAIRS,
    host::HostIndex,
    matrix::{Cell, MatrixGuard, MatrixStore, clamp},
    record::{RecordError, TrafficRecord, WireRecord},
    source::Source,
};
use thiserror::Error;

/// Feed of pushed telemetry records.
///
/// [`Telemetry::poll`] is called once per cycle in [`Source::Telemetry`]
/// mode while the matrices are locked. It must not block: process what is
/// ready and return.
pub trait Telemetry {
    type Error;

    fn poll(&mut self, matrix: &mut MatrixGuard<'_>) -> Result<(), Self::Error>;
}

#[derive(Debug, Error)]
pub enum CycleError<E> {
    #[error("Failed to poll the telemetry records")]
    Telemetry(#[source] E),
    #[error("Failed to sample the queues")]
    Counter(#[from] CounterError),
}

/// Snapshot of one pair of hosts, taken every
/// [`diagnostic period`](crate::EstimatorConfig::diagnostic_period) cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub src: HostIndex,
    pub dst: HostIndex,
    pub cell: Cell,
    /// packets in the queue `src -> dst`
    pub length: Option<i64>,
    /// packets in the packet switch's queue `src -> dst`
    pub ps_length: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub source: Source,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Sample {
    enqueue: i64,
    dequeue: i64,
    bytes: i64,
}

/// Drives the estimation cycles.
#[derive(Debug)]
pub struct Estimator {
    handlers: HandlerTable,

    samples: Vec<Sample>,

    /// cycles since the last diagnostic snapshot
    cycle: u32,
    diagnostic_period: u32,
}

/// resolve the record's hosts and account for its bytes in the
/// `enqueue` matrix.
pub fn apply_record(
    matrix: &mut MatrixGuard<'_>,
    record: &WireRecord,
) -> Result<TrafficRecord, RecordError> {
    let record = record.resolve(matrix.num_hosts())?;
    matrix.add_enqueue(record.src, record.dst, record.size);
    Ok(record)
}

impl Estimator {
    pub fn new(handlers: HandlerTable, diagnostic_period: u32) -> Self {
        let num_hosts = handlers.num_hosts();
        Self {
            handlers,
            samples: vec![Sample::default(); num_hosts * num_hosts],
            cycle: 0,
            diagnostic_period,
        }
    }

    pub fn num_hosts(&self) -> usize {
        self.handlers.num_hosts()
    }

    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    fn pairs(&self) -> impl Iterator<Item = (usize, HostIndex, HostIndex)> + use<> {
        let num_hosts = self.num_hosts();
        (0..num_hosts * num_hosts).map(move |i| {
            (
                i,
                HostIndex::new(i / num_hosts),
                HostIndex::new(i % num_hosts),
            )
        })
    }

    /// run one cycle for the given `source`
    ///
    /// The `telemetry` is only polled in [`Source::Telemetry`] mode.
    pub fn run_cycle<T>(
        &mut self,
        source: Source,
        store: &MatrixStore,
        telemetry: &mut T,
    ) -> Result<CycleReport, CycleError<T::Error>>
    where
        T: Telemetry,
    {
        {
            let mut matrix = store.lock();
            match source {
                Source::Telemetry => {
                    telemetry.poll(&mut matrix).map_err(CycleError::Telemetry)?;
                    self.sample(&[CounterKind::DequeueBytesNoHeaders])?;
                    self.commit_telemetry(&mut matrix);
                }
                Source::Direct => {
                    self.sample(&[
                        CounterKind::EnqueueBytes,
                        CounterKind::DequeueBytes,
                        CounterKind::Bytes,
                    ])?;
                    self.commit_direct(&mut matrix);
                }
            }
        }

        let diagnostics = self.tick(source, store);

        Ok(CycleReport {
            source,
            diagnostics,
        })
    }

    fn sample(&mut self, kinds: &[CounterKind]) -> Result<(), CounterError> {
        for (i, src, dst) in self.pairs() {
            for kind in kinds {
                let value = self.handlers.read(*kind, src, dst)?;
                let sample = &mut self.samples[i];
                match kind {
                    CounterKind::EnqueueBytes => sample.enqueue = value,
                    CounterKind::DequeueBytes | CounterKind::DequeueBytesNoHeaders => {
                        sample.dequeue = value
                    }
                    CounterKind::Bytes => sample.bytes = value,
                }
            }
        }
        Ok(())
    }

    fn commit_telemetry(&self, matrix: &mut MatrixGuard<'_>) {
        for (i, src, dst) in self.pairs() {
            let dequeue = self.samples[i].dequeue;
            let enqueue = matrix.get(src, dst).enqueue;
            matrix.set_dequeue(src, dst, dequeue);
            matrix.set_traffic(src, dst, clamp(enqueue.saturating_sub(dequeue)));
        }
    }

    fn commit_direct(&self, matrix: &mut MatrixGuard<'_>) {
        for (i, src, dst) in self.pairs() {
            let Sample {
                enqueue,
                dequeue,
                bytes,
            } = self.samples[i];
            matrix.set_enqueue(src, dst, enqueue);
            matrix.set_dequeue(src, dst, dequeue);
            matrix.set_traffic(src, dst, clamp(bytes));
        }
    }

    fn tick(&mut self, source: Source, store: &MatrixStore) -> Vec<Diagnostic> {
        if self.diagnostic_period == 0 {
            return Vec::new();
        }

        self.cycle = (self.cycle + 1) % self.diagnostic_period;
        if self.cycle != 0 {
            return Vec::new();
        }

        let num_hosts = self.num_hosts();
        let diagnostics: Vec<Diagnostic> = DIAGNOSTIC_PAIRS
            .iter()
            .filter(|(src, dst)| *src < num_hosts && *dst < num_hosts)
            .map(|(src, dst)| self.diagnose(store, HostIndex::new(*src), HostIndex::new(*dst)))
            .collect();

        for diagnostic in &diagnostics {
            tracing::info!(
                %source,
                src = %diagnostic.src,
                dst = %diagnostic.dst,
                enqueue = diagnostic.cell.enqueue,
                dequeue = diagnostic.cell.dequeue,
                traffic = diagnostic.cell.traffic,
                length = ?diagnostic.length,
                ps_length = ?diagnostic.ps_length,
                "traffic matrix sample"
            );
        }

        diagnostics
    }

    fn diagnose(&self, store: &MatrixStore, src: HostIndex, dst: HostIndex) -> Diagnostic {
        let cell = store.lock().get(src, dst);
        let prefix = self.handlers.prefix();

        let length = self.read_length(format!("{}.length", queue_name(prefix, src, dst)));
        let ps_length = self.read_length(format!(
            "{}.length",
            queue_name(&format!("{prefix}/ps"), src, dst)
        ));

        Diagnostic {
            src,
            dst,
            cell,
            length,
            ps_length,
        }
    }

    fn read_length(&self, name: String) -> Option<i64> {
        match self.handlers.read_named(&name) {
            Ok(length) => Some(length),
            Err(error) => {
                tracing::debug!(%error, "queue length not available");
                None
            }
        }
    }
}
