//! The event loop.
//!
//! One thread owns the listener, the connection table and the idle timer and
//! blocks in `epoll_wait`. Socket I/O, parsing and response assembly run on
//! the worker pool. Connection descriptors are registered one-shot, so at
//! most one worker task touches a connection per readiness delivery; the
//! worker re-arms the descriptor for the next direction when it is done.
//!
//! ```text
//!   epoll_wait ─┬─ listener ──► accept, admit (table + timer + register)
//!               ├─ waker ─────► drain, reap retired ids
//!               └─ connection ┬ hangup ─► close
//!                             ├ readable ─► pool: read → process → re-arm
//!                             └ writable ─► pool: write → re-arm / close
//! ```
//!
//! Workers never touch the table or the timer. A worker that tears a
//! connection down closes its socket, queues the id in `retired` and wakes
//! the loop, which drops the table and timer entries.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::http::connection::Connection;
use crate::http::static_files::StaticFiles;
use crate::poller::{Epoller, Event, Events, Interest, Waker};
use crate::pool::WorkerPool;
use crate::server::listener::{self, TriggerMode};
use crate::server::table::{ConnId, ConnTable};
use crate::store::CredentialStore;
use crate::timer::{HeapTimer, to_poll_timeout};

const LISTENER: u64 = u64::MAX;
const WAKER: u64 = u64::MAX - 1;
const MAX_EVENTS: usize = 1024;

type SharedConn = Arc<Mutex<Connection>>;

/// State reachable from worker tasks.
struct Shared {
    poller: Epoller,
    waker: Waker,
    retired: Mutex<Vec<ConnId>>,
    files: StaticFiles,
    store: Arc<dyn CredentialStore>,
    conn_interest: Interest,
    shutdown: AtomicBool,
    live: AtomicUsize,
}

pub struct Server {
    listener: TcpListener,
    shared: Arc<Shared>,
    table: ConnTable<SharedConn>,
    timer: HeapTimer<ConnId>,
    pool: WorkerPool,
    mode: TriggerMode,
    idle_timeout: Option<Duration>,
    max_connections: usize,
    local_addr: SocketAddr,
}

/// Cloneable control handle for a running [`Server`].
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<Shared>,
}

impl ServerHandle {
    /// Asks the event loop to stop. `run` returns once every connection is
    /// closed and the workers have been joined.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Err(e) = self.shared.waker.wake() {
            error!(error = %e, "Failed to wake reactor for shutdown");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Number of open client connections.
    pub fn connections(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }
}

impl Server {
    /// Binds the listener and starts the worker pool. No connection is
    /// accepted until [`run`](Self::run) is called.
    pub fn bind(cfg: &Config, store: Arc<dyn CredentialStore>) -> anyhow::Result<Self> {
        cfg.validate()?;
        let mode = TriggerMode::from_code(cfg.server.trigger_mode);

        let listener = listener::bind(&cfg.server)?;
        let local_addr = listener.local_addr()?;

        let poller = Epoller::new().context("creating epoll instance")?;
        let waker = Waker::new().context("creating eventfd waker")?;
        poller
            .add(&listener, LISTENER, mode.listen_interest())
            .context("registering listener")?;
        poller
            .add(&waker, WAKER, Interest::READABLE)
            .context("registering waker")?;

        let pool = WorkerPool::new(cfg.server.workers).context("starting worker pool")?;
        let idle_timeout = match cfg.server.idle_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        let files = StaticFiles::new(&cfg.static_files.root);
        info!(
            addr = %local_addr,
            root = %files.root().display(),
            trigger_mode = cfg.server.trigger_mode,
            idle_timeout_ms = cfg.server.idle_timeout_ms,
            workers = pool.size(),
            "Server initialised"
        );

        Ok(Self {
            listener,
            shared: Arc::new(Shared {
                poller,
                waker,
                retired: Mutex::new(Vec::new()),
                files,
                store,
                conn_interest: mode.conn_interest(),
                shutdown: AtomicBool::new(false),
                live: AtomicUsize::new(0),
            }),
            table: ConnTable::new(),
            timer: HeapTimer::new(),
            pool,
            mode,
            idle_timeout,
            max_connections: cfg.server.max_connections,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Runs the event loop on the calling thread until shutdown is requested.
    pub fn run(mut self) -> anyhow::Result<()> {
        let mut events = Events::with_capacity(MAX_EVENTS);
        let result = self.serve(&mut events);
        if let Err(e) = &result {
            error!(error = %e, "Event loop failed");
        }
        self.stop();
        result
    }

    fn serve(&mut self, events: &mut Events) -> anyhow::Result<()> {
        while !self.shared.shutdown.load(Ordering::Acquire) {
            let wait = if self.idle_timeout.is_some() {
                let mut expired = Vec::new();
                let wait = self.timer.next_tick(|id| expired.push(id));
                for id in expired {
                    self.expire(id);
                }
                wait
            } else {
                None
            };

            self.shared
                .poller
                .wait(events, to_poll_timeout(wait))
                .context("epoll_wait")?;

            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept(),
                    WAKER => {
                        self.shared.waker.drain();
                        self.reap();
                    }
                    token => self.dispatch(ConnId::from_token(token), event),
                }
            }
        }
        Ok(())
    }

    /// Accepts until the backlog is empty in edge-triggered mode, once otherwise.
    fn accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    break;
                }
            }
            if !self.mode.listener_edge {
                break;
            }
        }
    }

    fn admit(&mut self, mut stream: TcpStream, peer: SocketAddr) {
        if self.shared.live.load(Ordering::Acquire) >= self.max_connections {
            warn!(peer = %peer, max = self.max_connections, "Connection limit reached");
            if let Err(e) = stream.write_all(b"Server busy!") {
                debug!(peer = %peer, error = %e, "Busy notice not delivered");
            }
            return;
        }
        if let Err(e) = stream.set_nonblocking(true) {
            warn!(peer = %peer, error = %e, "Failed to set client nonblocking");
            return;
        }

        let conn = Arc::new(Mutex::new(Connection::new(stream, peer, self.mode.conn_edge)));
        let id = self.table.insert(Arc::clone(&conn));
        if let Some(timeout) = self.idle_timeout {
            self.timer.add(id, timeout);
        }

        let registered = conn.lock().register(
            &self.shared.poller,
            id.token(),
            Interest::READABLE | self.shared.conn_interest,
        );
        if let Err(e) = registered {
            warn!(conn = %id, peer = %peer, error = %e, "Failed to register client");
            self.table.remove(id);
            self.timer.remove(&id);
            return;
        }

        let live = self.shared.live.fetch_add(1, Ordering::AcqRel) + 1;
        info!(conn = %id, peer = %peer, live, "Client in");
    }

    fn dispatch(&mut self, id: ConnId, event: Event) {
        let Some(conn) = self.table.get(id).cloned() else {
            trace!(conn = %id, "Event for stale connection");
            return;
        };

        if event.is_hangup() {
            self.table.remove(id);
            self.timer.remove(&id);
            close(&self.shared, &mut conn.lock());
            return;
        }

        if let Some(timeout) = self.idle_timeout {
            self.timer.adjust(id, timeout);
        }

        let shared = Arc::clone(&self.shared);
        if event.is_readable() {
            self.pool.submit(move || on_read(&shared, id, &conn));
        } else if event.is_writable() {
            self.pool.submit(move || on_write(&shared, id, &conn));
        } else {
            warn!(conn = %id, "Unexpected event");
        }
    }

    fn expire(&mut self, id: ConnId) {
        if let Some(conn) = self.table.remove(id) {
            debug!(conn = %id, "Idle timeout");
            close(&self.shared, &mut conn.lock());
        }
    }

    /// Drops table and timer entries of connections closed by workers.
    fn reap(&mut self) {
        let retired = std::mem::take(&mut *self.shared.retired.lock());
        for id in retired {
            self.timer.remove(&id);
            if self.table.remove(id).is_some() {
                trace!(conn = %id, "Connection released");
            }
        }
    }

    fn stop(&mut self) {
        self.pool.shutdown();
        for (_, conn) in self.table.drain() {
            close(&self.shared, &mut conn.lock());
        }
        self.timer.clear();
        self.shared.retired.lock().clear();
        info!(addr = %self.local_addr, "Server stopped");
    }
}

fn close(shared: &Shared, conn: &mut Connection) {
    if conn.close(&shared.poller) {
        let live = shared.live.fetch_sub(1, Ordering::AcqRel) - 1;
        debug!(peer = %conn.peer(), live, "Connection closed");
    }
}

/// Closes from a worker and hands the id back to the event loop.
fn retire(shared: &Shared, id: ConnId, conn: &mut Connection) {
    close(shared, conn);
    shared.retired.lock().push(id);
    if let Err(e) = shared.waker.wake() {
        error!(conn = %id, error = %e, "Failed to wake reactor");
    }
}

fn on_read(shared: &Shared, id: ConnId, conn: &Mutex<Connection>) {
    let mut conn = conn.lock();
    if conn.is_closed() {
        return;
    }
    match conn.read() {
        Ok(n) => trace!(conn = %id, bytes = n, "Read"),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
        Err(e) => {
            if e.kind() != io::ErrorKind::UnexpectedEof {
                debug!(conn = %id, error = %e, "Read failed");
            }
            retire(shared, id, &mut conn);
            return;
        }
    }
    on_process(shared, id, &mut conn);
}

/// Parses what is buffered and re-arms for the direction that comes next.
fn on_process(shared: &Shared, id: ConnId, conn: &mut Connection) {
    let next = if conn.process(&shared.files, shared.store.as_ref()) {
        Interest::WRITABLE
    } else {
        Interest::READABLE
    };
    if let Err(e) = conn.rearm(&shared.poller, id.token(), shared.conn_interest | next) {
        warn!(conn = %id, error = %e, "Failed to re-arm");
        retire(shared, id, conn);
    }
}

fn on_write(shared: &Shared, id: ConnId, conn: &Mutex<Connection>) {
    let mut conn = conn.lock();
    if conn.is_closed() {
        return;
    }
    let result = conn.write();

    if conn.to_write_bytes() == 0 {
        if conn.is_keep_alive() {
            conn.finish_response();
            on_process(shared, id, &mut conn);
            return;
        }
    } else {
        match result {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                debug!(conn = %id, error = %e, "Write failed");
                retire(shared, id, &mut conn);
                return;
            }
        }
        if let Err(e) = conn.rearm(
            &shared.poller,
            id.token(),
            shared.conn_interest | Interest::WRITABLE,
        ) {
            warn!(conn = %id, error = %e, "Failed to re-arm");
            retire(shared, id, &mut conn);
        }
        return;
    }
    retire(shared, id, &mut conn);
}
