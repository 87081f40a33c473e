//! Server receiving the telemetry records pushed by the hosts.
//!
//! The server does not run on its own: [`TelemetryServer::poll_once`] is
//! called by the estimator once per cycle, while the matrices are locked.
//! A poll never blocks, every socket is non-blocking and the pass stops
//! as soon as a socket has nothing more to give.

use crate::socket::listen;
use anyhow::{Context as _, Result, anyhow};
use std::{
    collections::HashMap,
    io::{self, Read},
    net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream},
};
use thiserror::Error;
use tmatrix_core::{
    estimate::{Telemetry, apply_record},
    matrix::MatrixGuard,
    record::{RECORD_SIZE, RecordDecoder},
};

/// upper bound of the `read`s done on one connection during one poll
/// so that a busy client does not hold the matrices for too long
const MAX_READS_PER_POLL: usize = 64;

const READ_BUFFER_SIZE: usize = 64 * RECORD_SIZE;

/// identifier of a connection for the lifetime of the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

/// The listening socket failed, no new client can connect.
#[derive(Debug, Error)]
#[error("Telemetry listener on {addr} failed")]
pub struct ListenerError {
    addr: SocketAddr,
    #[source]
    source: io::Error,
}

/// What happened during one [`TelemetryServer::poll_once`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollStats {
    pub accepted: usize,
    /// connections closed by the client
    pub closed: usize,
    /// connections dropped after an I/O error
    pub dropped: usize,
    /// records added to the matrix
    pub records: usize,
    /// records discarded because an address did not resolve to a host
    pub rejected: usize,
}

struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    decoder: RecordDecoder,
}

enum ReadOutcome {
    Open,
    Closed,
    Failed(io::Error),
}

pub struct TelemetryServer {
    listener: TcpListener,
    addr: SocketAddr,

    connections: HashMap<ConnectionId, Connection>,
    next_id: u64,

    buffer: Box<[u8]>,
}

impl TelemetryServer {
    /// bind the telemetry server to `addr`.
    ///
    /// If `addr` is the unspecified IPv6 address and the host does not
    /// support IPv6, the unspecified IPv4 address is used instead.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let mut candidates = vec![addr];
        if addr.is_ipv6() && addr.ip().is_unspecified() {
            candidates.push(SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), addr.port()));
        }

        let mut last_error = None;
        for candidate in candidates {
            match listen(candidate) {
                Ok(listener) => return Self::new(listener),
                Err(error) => {
                    tracing::debug!(%candidate, %error, "could not bind the telemetry server");
                    last_error = Some(error);
                }
            }
        }

        Err(match last_error {
            Some(error) => anyhow!(error),
            None => anyhow!("no address to bind to"),
        })
        .with_context(|| format!("Could not bind the telemetry server to {addr}"))
    }

    fn new(listener: TcpListener) -> Result<Self> {
        let addr = listener
            .local_addr()
            .context("Failed to get the telemetry listener address")?;

        tracing::info!(%addr, "telemetry server listening");

        Ok(Self {
            listener,
            addr,
            connections: HashMap::new(),
            next_id: 0,
            buffer: vec![0; READ_BUFFER_SIZE].into_boxed_slice(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// number of open client connections
    pub fn connections(&self) -> usize {
        self.connections.len()
    }

    /// one pass over the listening socket and every open connection.
    ///
    /// New connections are accepted but not read until the next pass.
    /// A failing client connection is dropped, only a failure of the
    /// listening socket is returned as an error.
    pub fn poll_once(&mut self, matrix: &mut MatrixGuard<'_>) -> Result<PollStats, ListenerError> {
        let mut stats = PollStats::default();

        let accepted = self.accept_pending()?;
        stats.accepted = accepted.len();

        let Self {
            connections,
            buffer,
            ..
        } = self;

        connections.retain(|id, connection| {
            let outcome = connection.read_available(buffer);

            while let Some(record) = connection.decoder.next_record() {
                match apply_record(matrix, &record) {
                    Ok(_) => stats.records += 1,
                    Err(error) => {
                        stats.rejected += 1;
                        tracing::warn!(peer = %connection.peer, ?record, %error, "telemetry record dropped");
                    }
                }
            }

            match outcome {
                ReadOutcome::Open => true,
                ReadOutcome::Closed => {
                    stats.closed += 1;
                    if connection.decoder.pending() != 0 {
                        tracing::warn!(
                            peer = %connection.peer,
                            pending = connection.decoder.pending(),
                            "connection closed in the middle of a record"
                        );
                    }
                    tracing::debug!(connection = id.0, peer = %connection.peer, "connection closed");
                    false
                }
                ReadOutcome::Failed(error) => {
                    stats.dropped += 1;
                    tracing::warn!(connection = id.0, peer = %connection.peer, %error, "connection dropped");
                    false
                }
            }
        });

        self.connections.extend(accepted);

        Ok(stats)
    }

    fn accept_pending(&mut self) -> Result<Vec<(ConnectionId, Connection)>, ListenerError> {
        let mut accepted = Vec::new();

        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(error) = stream.set_nonblocking(true) {
                        tracing::warn!(%peer, %error, "could not set the connection non-blocking");
                        continue;
                    }
                    let id = ConnectionId(self.next_id);
                    self.next_id += 1;

                    tracing::debug!(connection = id.0, %peer, "new connection");
                    accepted.push((
                        id,
                        Connection {
                            stream,
                            peer,
                            decoder: RecordDecoder::new(),
                        },
                    ));
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                Err(error)
                    if matches!(
                        error.kind(),
                        io::ErrorKind::Interrupted
                            | io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                    ) =>
                {
                    tracing::debug!(%error, "connection lost before being accepted");
                }
                Err(source) => {
                    return Err(ListenerError {
                        addr: self.addr,
                        source,
                    });
                }
            }
        }

        Ok(accepted)
    }
}

impl Connection {
    fn read_available(&mut self, buffer: &mut [u8]) -> ReadOutcome {
        read_available(&mut self.stream, &mut self.decoder, buffer)
    }
}

/// feed the `decoder` with what `reader` has ready, without blocking
fn read_available(
    reader: &mut impl Read,
    decoder: &mut RecordDecoder,
    buffer: &mut [u8],
) -> ReadOutcome {
    for _ in 0..MAX_READS_PER_POLL {
        match reader.read(buffer) {
            Ok(0) => return ReadOutcome::Closed,
            Ok(read) => decoder.extend(&buffer[..read]),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return ReadOutcome::Failed(error),
        }
    }
    ReadOutcome::Open
}

impl Telemetry for TelemetryServer {
    type Error = ListenerError;

    fn poll(&mut self, matrix: &mut MatrixGuard<'_>) -> Result<(), Self::Error> {
        let stats = self.poll_once(matrix)?;
        if stats != PollStats::default() {
            tracing::trace!(?stats, "telemetry poll");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io::Write as _,
        net::Ipv6Addr,
        time::{Duration, Instant},
    };
    use socket2::SockRef;
    use std::collections::VecDeque;
    use tmatrix_core::{HostIndex, MatrixStore, WireRecord};

    /// reader handing out the scripted results one `read` at a time
    struct Scripted(VecDeque<io::Result<Vec<u8>>>);

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(error)) => Err(error),
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }
    }

    /// close `stream` with a reset instead of the orderly shutdown
    fn reset(stream: TcpStream) {
        SockRef::from(&stream)
            .set_linger(Some(Duration::ZERO))
            .unwrap();
        drop(stream);
    }

    fn localhost() -> SocketAddr {
        SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0)
    }

    /// poll until `done` returns true, or fail after a second
    fn poll_until(
        server: &mut TelemetryServer,
        store: &MatrixStore,
        mut done: impl FnMut(&TelemetryServer, &PollStats) -> bool,
    ) -> PollStats {
        let deadline = Instant::now() + Duration::from_secs(1);
        let mut total = PollStats::default();
        loop {
            let stats = server.poll_once(&mut store.lock()).unwrap();
            total.accepted += stats.accepted;
            total.closed += stats.closed;
            total.dropped += stats.dropped;
            total.records += stats.records;
            total.rejected += stats.rejected;
            if done(server, &total) {
                return total;
            }
            assert!(Instant::now() < deadline, "timed out, {total:?}");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn bind_any_address() {
        let server = TelemetryServer::bind(SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0)).unwrap();

        assert!(server.local_addr().ip().is_unspecified());
        assert_ne!(server.local_addr().port(), 0);
    }

    #[test]
    fn nothing_to_do() {
        let mut server = TelemetryServer::bind(localhost()).unwrap();
        let store = MatrixStore::new(2);

        let stats = server.poll_once(&mut store.lock()).unwrap();

        assert_eq!(stats, PollStats::default());
        assert_eq!(server.connections(), 0);
    }

    #[test]
    fn accumulate_records() {
        let mut server = TelemetryServer::bind(localhost()).unwrap();
        let store = MatrixStore::new(4);

        let mut client = TcpStream::connect(server.local_addr()).unwrap();
        let record = WireRecord::new("10.0.0.2", "10.0.0.3", 1_000).unwrap();
        client.write_all(&record.to_bytes()).unwrap();
        client.write_all(&record.to_bytes()).unwrap();

        poll_until(&mut server, &store, |_, stats| stats.records == 2);

        assert_eq!(
            store.lock().get(HostIndex::new(0), HostIndex::new(1)).enqueue,
            2_000
        );
    }

    #[test]
    fn reject_unknown_hosts() {
        let mut server = TelemetryServer::bind(localhost()).unwrap();
        let store = MatrixStore::new(2);

        let mut client = TcpStream::connect(server.local_addr()).unwrap();
        client
            .write_all(&WireRecord::new("10.0.0.12", "10.0.0.2", 5).unwrap().to_bytes())
            .unwrap();
        client
            .write_all(&WireRecord::new("10.0.0.2", "10.0.0.3", 5).unwrap().to_bytes())
            .unwrap();

        let stats = poll_until(&mut server, &store, |_, stats| {
            stats.records + stats.rejected == 2
        });

        assert_eq!(stats.records, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(server.connections(), 1);
        assert_eq!(store.lock().enqueue(), &[0, 5, 0, 0]);
    }

    #[test]
    fn orderly_close() {
        let mut server = TelemetryServer::bind(localhost()).unwrap();
        let store = MatrixStore::new(2);

        let client = TcpStream::connect(server.local_addr()).unwrap();
        poll_until(&mut server, &store, |server, _| server.connections() == 1);

        drop(client);
        let stats = poll_until(&mut server, &store, |server, _| server.connections() == 0);

        assert_eq!(stats.closed, 1);
        assert_eq!(stats.dropped, 0);
    }

    #[test]
    fn read_until_would_block() {
        let record = WireRecord::new("10.0.0.2", "10.0.0.3", 1).unwrap().to_bytes();
        let mut reader = Scripted(VecDeque::from([
            Ok(record[..10].to_vec()),
            Err(io::ErrorKind::Interrupted.into()),
            Ok(record[10..].to_vec()),
        ]));
        let mut decoder = RecordDecoder::new();
        let mut buffer = [0; READ_BUFFER_SIZE];

        let outcome = read_available(&mut reader, &mut decoder, &mut buffer);

        assert!(matches!(outcome, ReadOutcome::Open));
        assert!(decoder.next_record().is_some());
    }

    #[test]
    fn read_failure_keeps_what_was_read() {
        let record = WireRecord::new("10.0.0.2", "10.0.0.3", 1).unwrap().to_bytes();
        let mut reader = Scripted(VecDeque::from([
            Ok(record.to_vec()),
            Err(io::ErrorKind::ConnectionReset.into()),
        ]));
        let mut decoder = RecordDecoder::new();
        let mut buffer = [0; READ_BUFFER_SIZE];

        let outcome = read_available(&mut reader, &mut decoder, &mut buffer);

        assert!(matches!(
            outcome,
            ReadOutcome::Failed(error) if error.kind() == io::ErrorKind::ConnectionReset
        ));
        assert!(decoder.next_record().is_some());
    }

    #[test]
    fn reset_drops_only_that_connection() {
        let mut server = TelemetryServer::bind(localhost()).unwrap();
        let store = MatrixStore::new(4);
        let record = |src: &str, dst: &str| WireRecord::new(src, dst, 100).unwrap().to_bytes();

        let mut failing = TcpStream::connect(server.local_addr()).unwrap();
        let mut healthy = TcpStream::connect(server.local_addr()).unwrap();
        failing.write_all(&record("10.0.0.2", "10.0.0.3")).unwrap();
        healthy.write_all(&record("10.0.0.4", "10.0.0.5")).unwrap();
        poll_until(&mut server, &store, |_, stats| stats.records == 2);

        reset(failing);
        let stats = poll_until(&mut server, &store, |server, _| server.connections() == 1);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.closed, 0);

        healthy.write_all(&record("10.0.0.4", "10.0.0.5")).unwrap();
        poll_until(&mut server, &store, |_, stats| stats.records == 1);

        let matrix = store.lock();
        assert_eq!(matrix.get(HostIndex::new(0), HostIndex::new(1)).enqueue, 100);
        assert_eq!(matrix.get(HostIndex::new(2), HostIndex::new(3)).enqueue, 200);
    }
}
