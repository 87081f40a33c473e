/*!
# Traffic matrix estimator

Runtime of the estimator: an [`EstimatorContext`] owns the estimation
thread and the telemetry server, a [`TrafficQuery`] reads the published
matrix from any thread and a [`ControlServer`] exposes the query over the
control socket protocol.

```no_run
use std::{net::SocketAddr, sync::Arc};
use tmatrix::{ControlServer, ControlSocketCounters, EstimatorContext};
use tmatrix_core::{EstimatorConfig, Source};

# fn main() -> anyhow::Result<()> {
let counters = Arc::new(ControlSocketCounters::new("127.0.0.1:7778".parse()?));
let config = EstimatorConfig::new(4, Source::select("ADU"))?;

let context = EstimatorContext::new(&config, counters)?;
let control = ControlServer::bind("0.0.0.0:7777".parse::<SocketAddr>()?, context.query())?;

println!("{}", context.query().get_traffic());

control.shutdown()?;
context.shutdown()?;
# Ok(())
# }
```
*/

pub mod control;
mod estimator;
mod query;
mod socket;
mod stop;
pub mod telemetry;

pub use self::{
    control::{ControlServer, ControlSocketCounters},
    estimator::EstimatorContext,
    query::TrafficQuery,
    telemetry::{ListenerError, PollStats, TelemetryServer},
};
