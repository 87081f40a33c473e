/*!
# Traffic matrix estimation primitives

Building blocks of a live estimator of the traffic matrix of a switched
fabric: for every ordered pair of hosts `(src, dst)` it keeps the bytes
enqueued, the bytes dequeued and the derived estimate of the bytes still
in flight.

This crate does no I/O on its own. The queues' counters are read through
a [`CounterSource`] and the pushed telemetry records through a
[`Telemetry`](estimate::Telemetry) feed, both provided by the runtime.

```
use std::sync::Arc;
use tmatrix_core::{
    counter::{HandlerTable, StaticCounters},
    estimate::Estimator,
    matrix::MatrixStore,
    HostIndex, Source,
};
# struct NoTelemetry;
# impl tmatrix_core::estimate::Telemetry for NoTelemetry {
#     type Error = std::convert::Infallible;
#     fn poll(&mut self, _: &mut tmatrix_core::matrix::MatrixGuard<'_>) -> Result<(), Self::Error> { Ok(()) }
# }

let counters = Arc::new(StaticCounters::zeroed(4, "hybrid_switch"));
counters.set("hybrid_switch/q23.bytes", 300);

let store = MatrixStore::new(4);
let mut estimator = Estimator::new(HandlerTable::new(4, "hybrid_switch", counters), 0);
estimator.run_cycle(Source::Direct, &store, &mut NoTelemetry).unwrap();

assert_eq!(store.lock().get(HostIndex::new(2), HostIndex::new(3)).traffic, 300);
```
*/

mod config;
pub mod counter;
pub mod defaults;
pub mod estimate;
pub mod host;
pub mod matrix;
pub mod record;
mod source;

pub use self::{
    config::{ConfigError, EstimatorConfig},
    counter::{CounterError, CounterSource, HandlerChannel, HandlerTable},
    estimate::{CycleError, CycleReport, Estimator},
    host::{AddressError, HostIndex},
    matrix::{Cell, MatrixStore},
    record::{RecordDecoder, TrafficRecord, WireRecord},
    source::{Source, SourceSwitch},
};
