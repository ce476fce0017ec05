use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::time::Duration;

use anyhow::Context;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::info;

use crate::config::ServerConfig;
use crate::poller::Interest;

/// Pending-connection queue length handed to `listen(2)`.
pub const BACKLOG: i32 = 6;

/// Edge- vs level-triggered readiness, chosen independently for the
/// listening socket and for client connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerMode {
    pub listener_edge: bool,
    pub conn_edge: bool,
}

impl TriggerMode {
    /// Decodes the configured mode:
    ///
    /// | code | listener | connections |
    /// |------|----------|-------------|
    /// | 0    | level    | level       |
    /// | 1    | level    | edge        |
    /// | 2    | edge     | level       |
    /// | 3+   | edge     | edge        |
    pub fn from_code(code: u8) -> Self {
        let (listener_edge, conn_edge) = match code {
            0 => (false, false),
            1 => (false, true),
            2 => (true, false),
            _ => (true, true),
        };
        Self {
            listener_edge,
            conn_edge,
        }
    }

    pub fn listen_interest(&self) -> Interest {
        let mut interest = Interest::READABLE | Interest::PEER_CLOSED;
        if self.listener_edge {
            interest |= Interest::EDGE;
        }
        interest
    }

    /// Flags every connection registration carries; the caller adds the
    /// direction (readable or writable).
    pub fn conn_interest(&self) -> Interest {
        let mut interest = Interest::ONESHOT | Interest::PEER_CLOSED;
        if self.conn_edge {
            interest |= Interest::EDGE;
        }
        interest
    }
}

/// Creates the nonblocking listening socket: address reuse, optional
/// one-second linger on close, and a short backlog.
pub fn bind(cfg: &ServerConfig) -> anyhow::Result<TcpListener> {
    let addr: SocketAddr = (cfg.host.as_str(), cfg.port)
        .to_socket_addrs()
        .with_context(|| format!("resolving {}:{}", cfg.host, cfg.port))?
        .next()
        .with_context(|| format!("no address for {}:{}", cfg.host, cfg.port))?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .context("creating listening socket")?;
    if cfg.linger {
        socket
            .set_linger(Some(Duration::from_secs(1)))
            .context("setting SO_LINGER")?;
    }
    socket
        .set_reuse_address(true)
        .context("setting SO_REUSEADDR")?;
    socket
        .bind(&addr.into())
        .with_context(|| format!("binding {addr}"))?;
    socket.listen(BACKLOG).context("listen")?;
    socket
        .set_nonblocking(true)
        .context("setting listener nonblocking")?;

    let listener: TcpListener = socket.into();
    info!(addr = %listener.local_addr()?, linger = cfg.linger, "Listening");
    Ok(listener)
}
