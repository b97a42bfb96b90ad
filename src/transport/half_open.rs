use std::time::Duration;

use crate::transport::ProbeTransport;

/// Longest wait for a half-open connect to resolve.
pub const HALF_OPEN_WAIT: Duration = Duration::from_secs(1);

/// Return the half-open TCP transport, or the full connect transport where
/// the platform lacks the socket options it needs.
pub fn half_open_transport(connect_timeout: Duration) -> Box<dyn ProbeTransport> {
    #[cfg(target_os = "linux")]
    {
        let _ = connect_timeout;
        Box::new(linux::TcpHalfOpenTransport)
    }
    #[cfg(not(target_os = "linux"))]
    {
        log::info!("tcp half-open probes are not supported, using full connect");
        Box::new(crate::transport::TcpTransport::new(connect_timeout))
    }
}

#[cfg(target_os = "linux")]
pub use linux::TcpHalfOpenTransport;

#[cfg(target_os = "linux")]
mod linux {
    use std::io;
    use std::net::SocketAddr;
    use std::os::fd::AsFd;
    use std::time::Duration;

    use anyhow::{Context, Result};
    use log::trace;
    use nix::sys::select::{select, FdSet};
    use nix::sys::time::{TimeVal, TimeValLike};
    use socket2::{Domain, Protocol, SockAddr, Socket, Type};

    use crate::models::Probe;
    use crate::transport::half_open::HALF_OPEN_WAIT;
    use crate::transport::{set_hop_limit, unspecified, ProbeTransport};

    /// Send each probe as a SYN that never completes a connection.
    ///
    /// The socket is non-blocking with a zero linger, so closing it after the
    /// connect resolves aborts the handshake with a reset.
    pub struct TcpHalfOpenTransport;

    impl ProbeTransport for TcpHalfOpenTransport {
        fn send_probe(&mut self, probe: &Probe, _payload: &[u8]) -> Result<()> {
            let destination = probe.destination();
            let socket = Socket::new(
                Domain::for_address(destination),
                Type::STREAM,
                Some(Protocol::TCP),
            )
            .context("cannot open TCP socket")?;
            socket.set_nonblocking(true)?;
            set_hop_limit(&socket, probe.l3_protocol(), probe.ttl)?;
            socket.set_quickack(false)?;
            socket.set_linger(Some(Duration::ZERO))?;
            socket.set_reuse_address(true)?;
            let local = SocketAddr::new(unspecified(probe.l3_protocol()), probe.src_port);
            socket
                .bind(&SockAddr::from(local))
                .with_context(|| format!("cannot bind TCP socket to {local}"))?;

            trace!("send {}", probe);
            match socket.connect(&SockAddr::from(destination)) {
                Ok(()) => return Ok(()),
                Err(error) if is_in_progress(&error) => {}
                Err(error) if error.raw_os_error() == Some(libc::EISCONN) => return Ok(()),
                Err(error) => {
                    return Err(error).with_context(|| format!("cannot connect to {destination}"))
                }
            }

            let mut write = FdSet::new();
            write.insert(socket.as_fd());
            let mut timeout = TimeVal::milliseconds(HALF_OPEN_WAIT.as_millis() as i64);
            match select(None, None, Some(&mut write), None, Some(&mut timeout)) {
                Ok(_) | Err(nix::Error::EINTR) => Ok(()),
                Err(error) => Err(io::Error::from(error)).context("cannot wait for connect"),
            }
        }
    }

    fn is_in_progress(error: &io::Error) -> bool {
        matches!(
            error.raw_os_error(),
            Some(libc::EINPROGRESS) | Some(libc::EALREADY) | Some(libc::EINTR)
        ) || error.kind() == io::ErrorKind::WouldBlock
    }
}
