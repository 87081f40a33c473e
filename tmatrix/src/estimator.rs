use crate::{query::TrafficQuery, stop::Stop, telemetry::TelemetryServer};
use anyhow::{Context as _, Result, bail};
use std::{
    net::SocketAddr,
    sync::Arc,
    thread::JoinHandle,
    time::{Duration, Instant},
};
use tmatrix_core::{
    CounterSource, CycleError, Estimator, EstimatorConfig, HandlerTable, MatrixStore, SourceSwitch,
};

/// The running estimator.
///
/// Creating the context binds the telemetry server and starts the
/// estimation thread. The first cycle runs right away, the following
/// ones every [`EstimatorConfig::cycle_interval`].
pub struct EstimatorContext {
    store: Arc<MatrixStore>,
    source: Arc<SourceSwitch>,

    telemetry_addr: SocketAddr,

    stop: Arc<Stop>,

    thread: JoinHandle<Result<()>>,
}

struct EstimationLoop {
    estimator: Estimator,

    telemetry: TelemetryServer,

    store: Arc<MatrixStore>,
    source: Arc<SourceSwitch>,

    interval: Duration,

    /// the last cycle failed to read the counters
    failing: bool,

    stop: Arc<Stop>,
}

impl EstimatorContext {
    pub fn new(config: &EstimatorConfig, counters: Arc<dyn CounterSource>) -> Result<Self> {
        let telemetry = TelemetryServer::bind(config.telemetry_addr())?;
        let telemetry_addr = telemetry.local_addr();

        let handlers = HandlerTable::new(config.num_hosts(), config.handler_prefix(), counters);
        let estimator = Estimator::new(handlers, config.diagnostic_period());

        let store = Arc::new(MatrixStore::new(config.num_hosts()));
        let source = Arc::new(SourceSwitch::new(config.source()));
        let stop = Arc::new(Stop::new());

        let estimation = EstimationLoop {
            estimator,
            telemetry,
            store: Arc::clone(&store),
            source: Arc::clone(&source),
            interval: config.cycle_interval(),
            failing: false,
            stop: Arc::clone(&stop),
        };

        let thread = std::thread::Builder::new()
            .name("tmatrix-estimator".to_owned())
            .spawn(|| estimation_run(estimation))
            .context("Failed to start the estimation thread")?;

        tracing::info!(
            num_hosts = config.num_hosts(),
            source = %config.source(),
            prefix = config.handler_prefix(),
            "estimator started"
        );

        Ok(Self {
            store,
            source,
            telemetry_addr,
            stop,
            thread,
        })
    }

    pub fn query(&self) -> TrafficQuery {
        TrafficQuery::new(Arc::clone(&self.store), Arc::clone(&self.source))
    }

    /// the address the telemetry server is listening on
    pub fn telemetry_addr(&self) -> SocketAddr {
        self.telemetry_addr
    }

    /// `false` if the estimation thread ended, see [`EstimatorContext::wait`]
    pub fn is_running(&self) -> bool {
        !self.thread.is_finished()
    }

    /// wait for the estimation thread to end, which only happens
    /// if the telemetry listener fails.
    pub fn wait(self) -> Result<()> {
        join(self.thread)
    }

    pub fn shutdown(self) -> Result<()> {
        self.stop.toggle();

        join(self.thread)
    }
}

fn join(thread: JoinHandle<Result<()>>) -> Result<()> {
    match thread.join() {
        Err(join_error) => {
            bail!("Estimator failed to clean shutdown: {join_error:?}")
        }
        Ok(Err(error)) => Err(error).context("Estimator failed with error"),
        Ok(Ok(())) => Ok(()),
    }
}

impl EstimationLoop {
    fn stopped(&self) -> bool {
        self.stop.get()
    }

    fn step(&mut self) -> Result<()> {
        let source = self.source.get();

        match self
            .estimator
            .run_cycle(source, &self.store, &mut self.telemetry)
        {
            Ok(_report) => {
                if self.failing {
                    tracing::info!(%source, "queue counters available again");
                    self.failing = false;
                }
                Ok(())
            }
            Err(CycleError::Counter(error)) => {
                // only report the first of a series of failed cycles
                if !self.failing {
                    let error = anyhow::Error::from(error);
                    tracing::warn!(%source, error = format!("{error:#}"), "estimation cycle skipped");
                    self.failing = true;
                }
                Ok(())
            }
            Err(CycleError::Telemetry(error)) => Err(error).context("Telemetry server failed"),
        }
    }
}

fn estimation_run(mut estimation: EstimationLoop) -> Result<()> {
    let mut instant = Instant::now();

    while !estimation.stopped() {
        estimation.step()?;

        // there is no catching up to do if a cycle took longer than
        // the interval: the next cycle starts right away.
        let elapsed = instant.elapsed();
        let wait_duration = estimation.interval.saturating_sub(elapsed);

        if estimation.stop.wait_timeout(wait_duration) {
            break;
        }

        instant = Instant::now();
    }

    tracing::info!("estimator stopped");

    Ok(())
}
