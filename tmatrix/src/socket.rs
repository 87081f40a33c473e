use socket2::{Domain, Protocol, Socket, Type};
use std::{
    io,
    net::{SocketAddr, TcpListener},
};

/// pending connections the kernel queues before they are accepted
pub(crate) const LISTEN_BACKLOG: i32 = 5;

/// bind a non-blocking listener to `addr`
///
/// The address can be reused right after a restart. A listener on an
/// IPv6 address also accepts IPv4 clients.
pub(crate) fn listen(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr, TcpStream};

    #[test]
    fn non_blocking() {
        let listener = listen(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0)).unwrap();

        assert_eq!(
            listener.accept().unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
    }

    #[test]
    fn reuse_address() {
        let listener = listen(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0)).unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (accepted, _) = loop {
            match listener.accept() {
                Ok(accepted) => break accepted,
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(std::time::Duration::from_millis(1))
                }
                Err(error) => panic!("{error}"),
            }
        };
        // the server closes first, its end of the connection lingers
        drop(accepted);
        drop(client);
        drop(listener);

        assert!(listen(addr).is_ok());
    }

    #[test]
    fn dual_stack() {
        // hosts without IPv6 have nothing to check
        let Ok(listener) = listen(SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0)) else {
            return;
        };
        let port = listener.local_addr().unwrap().port();

        assert!(TcpStream::connect((Ipv4Addr::LOCALHOST, port)).is_ok());
    }
}
