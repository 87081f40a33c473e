use anyhow::{Context as _, Result};
use clap::Parser;
use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};
use tmatrix::{ControlServer, ControlSocketCounters, EstimatorContext};
use tmatrix_core::{EstimatorConfig, Source, defaults};
use tracing_subscriber::EnvFilter;

/// Live estimator of the traffic matrix of a switched fabric.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// number of hosts of the fabric
    #[arg(long, short = 'n')]
    num_hosts: usize,

    /// `ADU` to use the telemetry pushed by the hosts, anything else to
    /// read the queues' counters directly
    #[arg(long)]
    source: String,

    /// port the hosts push their telemetry records to
    #[arg(long, default_value_t = defaults::DEFAULT_TELEMETRY_PORT)]
    telemetry_port: u16,

    /// port of the estimator's control socket
    #[arg(long, default_value_t = 7777)]
    control_port: u16,

    /// control socket of the queueing subsystem
    #[arg(long, default_value = "127.0.0.1:7778")]
    counters: SocketAddr,

    /// element owning the queues in the queueing subsystem
    #[arg(long, default_value = defaults::DEFAULT_HANDLER_PREFIX)]
    handler_prefix: String,

    /// time between two estimation cycles, in microseconds
    #[arg(long, default_value_t = 1_000)]
    interval_us: u64,

    /// log a sample of the matrices every that many cycles, 0 to disable
    #[arg(long, default_value_t = defaults::DEFAULT_DIAGNOSTIC_PERIOD)]
    diagnostic_period: u32,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(error) = run(Args::parse()) {
        eprintln!("Error: {error:?}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let config = EstimatorConfig::new(args.num_hosts, Source::select(&args.source))?
        .set_telemetry_addr(SocketAddr::new(
            Ipv6Addr::UNSPECIFIED.into(),
            args.telemetry_port,
        ))
        .set_handler_prefix(args.handler_prefix)?
        .set_cycle_interval(Duration::from_micros(args.interval_us))
        .set_diagnostic_period(args.diagnostic_period);

    let counters = Arc::new(ControlSocketCounters::new(args.counters));
    let context = EstimatorContext::new(&config, counters)?;

    let control = bind_control(args.control_port, &context)?;

    let result = context.wait();
    control.shutdown()?;
    result
}

fn bind_control(port: u16, context: &EstimatorContext) -> Result<ControlServer> {
    match ControlServer::bind(
        SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), port),
        context.query(),
    ) {
        Ok(control) => Ok(control),
        Err(error) => {
            tracing::debug!(error = format!("{error:#}"), "falling back to IPv4");
            ControlServer::bind(
                SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), port),
                context.query(),
            )
            .context("Could not start the control socket")
        }
    }
}
