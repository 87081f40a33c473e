use super::protocol::{parse_data_length, parse_status};
use anyhow::{Context as _, Result, bail, ensure};
use std::{
    io::{BufRead as _, BufReader, Read as _, Write as _},
    net::{SocketAddr, TcpStream},
    sync::{Mutex, PoisonError},
    time::Duration,
};
use tmatrix_core::{
    CounterError, CounterSource,
    counter::parse_counter,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// [`CounterSource`] reading the counters from the control socket of
/// the queueing subsystem.
///
/// The connection is opened on the first read and kept for the
/// following ones. If it breaks, the next read opens a new one.
#[derive(Debug)]
pub struct ControlSocketCounters {
    addr: SocketAddr,
    timeout: Duration,
    connection: Mutex<Option<Connection>>,
}

#[derive(Debug)]
struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl ControlSocketCounters {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            timeout: DEFAULT_TIMEOUT,
            connection: Mutex::new(None),
        }
    }

    /// how long to wait for the queueing subsystem to connect or answer
    pub fn set_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn read(&self, name: &str) -> Result<String> {
        let mut connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if connection.is_none() {
            *connection = Some(Connection::open(self.addr, self.timeout)?);
        }
        let Some(current) = connection.as_mut() else {
            bail!("No connection to {}", self.addr)
        };

        let result = current.read(name);
        if result.is_err() {
            *connection = None;
        }
        result
    }
}

impl Connection {
    fn open(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let writer = TcpStream::connect_timeout(&addr, timeout)
            .with_context(|| format!("Failed to connect to the control socket {addr}"))?;
        writer.set_read_timeout(Some(timeout))?;
        writer.set_write_timeout(Some(timeout))?;
        writer.set_nodelay(true)?;
        let mut reader = BufReader::new(writer.try_clone()?);

        let mut banner = String::new();
        reader
            .read_line(&mut banner)
            .context("Failed to read the control socket banner")?;
        tracing::debug!(%addr, banner = banner.trim_end(), "connected to the control socket");

        Ok(Self { reader, writer })
    }

    fn read(&mut self, name: &str) -> Result<String> {
        writeln!(self.writer, "READ {name}").context("Failed to send the request")?;

        let mut line = String::new();
        self.reader
            .read_line(&mut line)
            .context("Failed to read the status line")?;
        let (code, message) = parse_status(&line)?;
        ensure!(
            (200..300).contains(&code),
            "Read of {name:?} failed: {code} {message}"
        );

        line.clear();
        self.reader
            .read_line(&mut line)
            .context("Failed to read the DATA line")?;
        let length = parse_data_length(&line)?;

        let mut payload = vec![0; length];
        self.reader
            .read_exact(&mut payload)
            .context("Failed to read the payload")?;

        String::from_utf8(payload).context("The payload is not valid text")
    }
}

impl CounterSource for ControlSocketCounters {
    fn read_counter(&self, name: &str) -> Result<i64, CounterError> {
        let value = self
            .read(name)
            .map_err(|source| CounterError::Unavailable {
                name: name.to_owned(),
                source,
            })?;
        parse_counter(name, &value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::protocol::{BANNER, Request, Status, write_data, write_status};
    use std::{
        collections::HashMap,
        io::{BufRead as _, Write as _},
        net::{Ipv4Addr, TcpListener},
        thread::JoinHandle,
    };

    /// queueing subsystem answering `READ` from a fixed table, serving
    /// `connections` connections in a row
    fn fake_switch(
        handlers: HashMap<&'static str, &'static str>,
        connections: usize,
    ) -> (SocketAddr, JoinHandle<()>) {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = listener.local_addr().unwrap();

        let thread = std::thread::spawn(move || {
            for _ in 0..connections {
                let (stream, _) = listener.accept().unwrap();
                let mut writer = stream.try_clone().unwrap();
                let mut reader = BufReader::new(stream);
                write!(writer, "{BANNER}\r\n").unwrap();

                let mut line = String::new();
                while reader.read_line(&mut line).unwrap() != 0 {
                    match Request::parse(&line).unwrap() {
                        Request::Read { handler } => match handlers.get(handler) {
                            Some(value) => {
                                write_status(&mut writer, Status::Ok, "Read handler OK").unwrap();
                                write_data(&mut writer, value).unwrap();
                            }
                            None => {
                                write_status(&mut writer, Status::NoSuchHandler, "No such handler")
                                    .unwrap();
                            }
                        },
                        Request::Quit => break,
                        Request::Write { .. } => unreachable!(),
                    }
                    line.clear();
                }
            }
        });

        (addr, thread)
    }

    #[test]
    fn read_counters() {
        let (addr, switch) = fake_switch(
            HashMap::from([
                ("hybrid_switch/q01.enqueue_bytes", "4096\n"),
                ("hybrid_switch/q01.bytes", "-12"),
                ("hybrid_switch/q10.bytes", "lots"),
            ]),
            1,
        );
        let counters = ControlSocketCounters::new(addr);

        assert_eq!(
            counters
                .read_counter("hybrid_switch/q01.enqueue_bytes")
                .unwrap(),
            4096
        );
        assert_eq!(counters.read_counter("hybrid_switch/q01.bytes").unwrap(), -12);
        assert!(matches!(
            counters.read_counter("hybrid_switch/q10.bytes"),
            Err(CounterError::Malformed { .. })
        ));

        drop(counters);
        switch.join().unwrap();
    }

    #[test]
    fn unknown_handler() {
        let (addr, switch) = fake_switch(HashMap::from([("a", "1")]), 2);
        let counters = ControlSocketCounters::new(addr);

        assert!(matches!(
            counters.read_counter("b"),
            Err(CounterError::Unavailable { .. })
        ));
        // the failed read reset the connection, the next read opens the second one
        assert_eq!(counters.read_counter("a").unwrap(), 1);

        drop(counters);
        switch.join().unwrap();
    }

    #[test]
    fn nobody_listening() {
        let addr = {
            let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
            listener.local_addr().unwrap()
        };
        let counters =
            ControlSocketCounters::new(addr).set_timeout(Duration::from_millis(100));

        assert!(matches!(
            counters.read_counter("a"),
            Err(CounterError::Unavailable { .. })
        ));
    }
}
