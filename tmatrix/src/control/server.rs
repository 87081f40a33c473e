use super::protocol::{BANNER, Request, Status, handler_name, write_data, write_status};
use crate::{query::TrafficQuery, socket::listen, stop::Stop};
use anyhow::{Context as _, Result, bail};
use std::{
    io::{self, BufRead as _, BufReader, Write as _},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::Arc,
    thread::JoinHandle,
    time::Duration,
};

/// how often the threads check the stop signal while idle
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Serves the [`TrafficQuery`] over the control socket protocol.
///
/// | request                      | effect                                |
/// |------------------------------|---------------------------------------|
/// | `READ getTraffic`            | the traffic matrix, row-major         |
/// | `READ getSource`             | `ADU` or `QUEUE`                      |
/// | `WRITE setSource <value>`    | select the traffic source             |
/// | `WRITE clear`                | reset the matrices                    |
/// | `QUIT`                       | close the connection                  |
///
/// The handler may be prefixed with an element name (`traffic_matrix.getTraffic`).
pub struct ControlServer {
    addr: SocketAddr,

    stop: Arc<Stop>,

    thread: JoinHandle<Result<()>>,
}

impl ControlServer {
    pub fn bind(addr: SocketAddr, query: TrafficQuery) -> Result<Self> {
        let listener = listen(addr)
            .with_context(|| format!("Could not bind the control socket to {addr}"))?;
        let addr = listener
            .local_addr()
            .context("Failed to get the control socket address")?;

        let stop = Arc::new(Stop::new());
        let accept_stop = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("tmatrix-control".to_owned())
            .spawn(move || accept_run(listener, query, accept_stop))
            .context("Failed to start the control socket thread")?;

        tracing::info!(%addr, "control socket listening");

        Ok(Self { addr, stop, thread })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn shutdown(self) -> Result<()> {
        self.stop.toggle();

        match self.thread.join() {
            Err(join_error) => {
                bail!("Control socket failed to clean shutdown: {join_error:?}")
            }
            Ok(Err(error)) => Err(error).context("Control socket failed with error"),
            Ok(Ok(())) => Ok(()),
        }
    }
}

fn accept_run(listener: TcpListener, query: TrafficQuery, stop: Arc<Stop>) -> Result<()> {
    let mut sessions: Vec<JoinHandle<()>> = Vec::new();

    while !stop.get() {
        match listener.accept() {
            Ok((stream, peer)) => {
                tracing::debug!(%peer, "control connection");
                let query = query.clone();
                let stop = Arc::clone(&stop);
                let session = std::thread::Builder::new()
                    .name("tmatrix-control-session".to_owned())
                    .spawn(move || {
                        if let Err(error) = session_run(stream, &query, &stop) {
                            tracing::debug!(%peer, %error, "control connection failed");
                        }
                    })
                    .context("Failed to start a control session thread")?;
                sessions.push(session);
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                if stop.wait_timeout(POLL_INTERVAL) {
                    break;
                }
            }
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::Interrupted
                        | io::ErrorKind::ConnectionAborted
                        | io::ErrorKind::ConnectionReset
                ) => {}
            Err(error) => return Err(error).context("Control socket failed to accept"),
        }

        sessions.retain(|session| !session.is_finished());
    }

    for session in sessions {
        // a panicking session has nothing left to clean up
        let _ = session.join();
    }

    Ok(())
}

fn session_run(stream: TcpStream, query: &TrafficQuery, stop: &Stop) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(POLL_INTERVAL))?;
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);

    write!(writer, "{BANNER}\r\n")?;

    let mut line = Vec::new();
    while !stop.get() {
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) if line.last() != Some(&b'\n') => break,
            Ok(_) => {
                let keep_open = respond(&mut writer, query, &line)?;
                line.clear();
                if !keep_open {
                    break;
                }
            }
            // the partial line stays in `line` until the rest arrives
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) => {}
            Err(error) => return Err(error),
        }
    }

    Ok(())
}

/// answer one request, returns `false` if the connection needs to be closed
fn respond(writer: &mut TcpStream, query: &TrafficQuery, line: &[u8]) -> io::Result<bool> {
    let Ok(line) = std::str::from_utf8(line) else {
        write_status(writer, Status::SyntaxError, "Syntax error")?;
        return Ok(true);
    };

    let request = match Request::parse(line) {
        Ok(request) => request,
        Err(error) => {
            tracing::debug!(%error, "invalid control request");
            write_status(writer, Status::SyntaxError, "Syntax error")?;
            return Ok(true);
        }
    };

    match request {
        Request::Read { handler } => match handler_name(handler) {
            "getTraffic" => read_ok(writer, "getTraffic", &query.get_traffic())?,
            "getSource" => read_ok(writer, "getSource", &query.source().to_string())?,
            other => no_such_handler(writer, other)?,
        },
        Request::Write { handler, value } => match handler_name(handler) {
            "setSource" => {
                query.set_source(value);
                write_ok(writer, "setSource")?
            }
            "clear" => {
                query.clear();
                write_ok(writer, "clear")?
            }
            other => no_such_handler(writer, other)?,
        },
        Request::Quit => {
            write_status(writer, Status::Ok, "Goodbye!")?;
            return Ok(false);
        }
    }

    writer.flush()?;
    Ok(true)
}

fn read_ok(writer: &mut TcpStream, handler: &str, payload: &str) -> io::Result<()> {
    write_status(writer, Status::Ok, &format!("Read handler '{handler}' OK"))?;
    write_data(writer, payload)
}

fn write_ok(writer: &mut TcpStream, handler: &str) -> io::Result<()> {
    write_status(writer, Status::Ok, &format!("Write handler '{handler}' OK"))
}

fn no_such_handler(writer: &mut TcpStream, handler: &str) -> io::Result<()> {
    write_status(
        writer,
        Status::NoSuchHandler,
        &format!("No such handler '{handler}'"),
    )
}
