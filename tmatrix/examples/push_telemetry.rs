use std::{
    io::Write,
    net::{SocketAddr, TcpStream},
    thread::sleep,
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use indicatif::ProgressBar;
use tmatrix_core::WireRecord;

/// push telemetry records to a running estimator, as a host of the
/// fabric would do
///
/// ```text
/// cargo run -p tmatrix --bin tmatrixd -- --num-hosts 4 --source ADU
/// cargo run -p tmatrix --example push_telemetry -- --src 10.0.0.2 --dst 10.0.0.5
/// ```
///
/// With 4 hosts, `10.0.0.2` is host 0 and `10.0.0.5` is host 3.
#[derive(Debug, Parser)]
struct Args {
    #[arg(long, default_value = "[::1]:8123")]
    estimator: SocketAddr,

    #[arg(long)]
    src: String,

    #[arg(long)]
    dst: String,

    /// bytes carried by each record
    #[arg(long, default_value_t = 1_500)]
    size: u64,

    #[arg(long, default_value_t = 10_000)]
    count: u64,

    /// pause between two records, in microseconds
    #[arg(long, default_value_t = 100)]
    pause_us: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let record = WireRecord::new(&args.src, &args.dst, args.size)?.to_bytes();
    let mut stream = TcpStream::connect(args.estimator)
        .with_context(|| format!("Failed to connect to the estimator at {}", args.estimator))?;
    stream.set_nodelay(true)?;

    let pb = ProgressBar::new(args.count);
    for i in 0..args.count {
        stream
            .write_all(&record)
            .with_context(|| anyhow!("Failed to send record {i}"))?;
        pb.inc(1);
        sleep(Duration::from_micros(args.pause_us));
    }
    pb.finish_with_message("All sent");

    Ok(())
}
