use std::{
    net::{Ipv6Addr, SocketAddr, SocketAddrV6},
    time::Duration,
};

/// Default port the telemetry records are pushed to
pub const DEFAULT_TELEMETRY_PORT: u16 = 8123;

/// Default address of the telemetry server: every local address,
/// IPv4 clients are accepted as IPv4-mapped addresses.
///
/// ```
/// # use tmatrix_core::defaults::*;
/// assert_eq!(DEFAULT_TELEMETRY_ADDR.to_string(), "[::]:8123");
/// ```
pub const DEFAULT_TELEMETRY_ADDR: SocketAddr = SocketAddr::V6(SocketAddrV6::new(
    Ipv6Addr::UNSPECIFIED,
    DEFAULT_TELEMETRY_PORT,
    0,
    0,
));

/// Default prefix of the queues' read handlers
///
/// See [`queue_name`](crate::counter::queue_name).
pub const DEFAULT_HANDLER_PREFIX: &str = "hybrid_switch";

/// Default time between the start of two estimation cycles
///
/// The cycle starts again right away if the previous one took longer.
pub const DEFAULT_CYCLE_INTERVAL: Duration = Duration::from_millis(1);

/// Default number of cycles between two diagnostic snapshots
///
/// `0` disables the snapshots.
pub const DEFAULT_DIAGNOSTIC_PERIOD: u32 = 10_000;

/// The pairs of hosts the diagnostic snapshots report on
pub const DIAGNOSTIC_PAIRS: [(usize, usize); 2] = [(0, 1), (2, 3)];
