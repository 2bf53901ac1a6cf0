//! Listener setup, the acceptor loop, and shutdown.
//!
//! The threading model is fixed at startup:
//!
//! - **Acceptor** (the thread calling [`Server::run`]): blocks in `accept`,
//!   then blocks in [`BoundedQueue::push`]. A full queue stops the acceptor,
//!   and further clients wait in the kernel's listen backlog.
//! - **Workers** ([`WorkerPool`]): pop connections and run one session each.
//!
//! Nothing checks the queue's occupancy before accepting; backpressure comes
//! entirely from `push` blocking.

use std::{
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use crate::{
    dictionary::Dictionary,
    queue::{BoundedQueue, PushError},
    result_log::ResultLog,
    worker::{Connection, ServeReport, ServeStats, SessionContext, WorkerPool},
};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_WORKERS: usize = 2;
pub const DEFAULT_QUEUE_CAPACITY: usize = 3;
pub const DEFAULT_BACKLOG: i32 = 3;

const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Everything needed to start a [`Server`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    /// Word list to load. `None` uses [`Dictionary::bundled`].
    pub dictionary: Option<PathBuf>,
    pub log_file: PathBuf,
    pub workers: usize,
    pub queue_capacity: usize,
    /// Kernel listen backlog, independent of `queue_capacity`.
    pub backlog: i32,
    pub idle_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            dictionary: None,
            log_file: PathBuf::from("log.txt"),
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            backlog: DEFAULT_BACKLOG,
            idle_timeout: None,
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    queue: Arc<BoundedQueue<Connection>>,
    context: Arc<SessionContext>,
    workers: usize,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Loads the dictionary named in `config` (or the bundled list) and
    /// binds the listener.
    ///
    /// # Errors
    ///
    /// Any failure here is fatal to startup: unreadable dictionary, log file
    /// that cannot be created, or a socket that cannot be bound.
    pub fn bind(config: ServerConfig) -> Result<Self> {
        let dictionary = match &config.dictionary {
            Some(path) => {
                let dictionary = Dictionary::load(path)?;
                info!(path = %path.display(), words = dictionary.len(), "dictionary loaded");
                dictionary
            }
            None => {
                let dictionary = Dictionary::bundled();
                info!(words = dictionary.len(), "using bundled dictionary");
                dictionary
            }
        };
        Self::with_dictionary(config, dictionary)
    }

    /// Like [`bind`](Self::bind) but with an already loaded dictionary.
    ///
    /// # Errors
    ///
    /// Fails if the log file cannot be created or the socket cannot be bound.
    pub fn with_dictionary(config: ServerConfig, dictionary: Dictionary) -> Result<Self> {
        anyhow::ensure!(config.workers > 0, "at least one worker is required");
        anyhow::ensure!(config.queue_capacity > 0, "queue capacity must be at least 1");
        if config.queue_capacity < config.workers {
            warn!(
                workers = config.workers,
                queue_capacity = config.queue_capacity,
                "queue capacity is smaller than the worker count"
            );
        }

        let log = ResultLog::create(&config.log_file).with_context(|| {
            format!("failed to create result log {}", config.log_file.display())
        })?;
        let addr = config.listen_addr();
        let listener = bind_listener(addr, config.backlog)
            .with_context(|| format!("failed to listen on {addr}"))?;
        let local_addr = listener.local_addr()?;

        let queue = Arc::new(BoundedQueue::new(config.queue_capacity));
        let context = Arc::new(SessionContext {
            dictionary: Arc::new(dictionary),
            log: Arc::new(log),
            idle_timeout: config.idle_timeout,
            stats: Arc::new(ServeStats::default()),
        });
        let shutdown = ShutdownHandle::new(Arc::clone(&queue), local_addr);

        Ok(Self {
            listener,
            queue,
            context,
            workers: config.workers,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Starts the workers and runs the acceptor on the calling thread.
    ///
    /// Returns after [`ShutdownHandle::trigger`] once every queued connection
    /// has been served and every worker has exited.
    ///
    /// # Errors
    ///
    /// Fails only if the worker threads cannot be spawned.
    pub fn run(self) -> Result<ServeReport> {
        let pool = match WorkerPool::spawn(
            self.workers,
            Arc::clone(&self.queue),
            Arc::clone(&self.context),
        ) {
            Ok(pool) => pool,
            Err(err) => {
                self.queue.close();
                return Err(err);
            }
        };
        info!(workers = pool.len(), capacity = self.queue.capacity(), "accepting connections");

        accept_loop(&self.listener, &self.queue, &self.shutdown, &self.context.stats);

        self.queue.close();
        pool.join();

        let report = self.context.stats.snapshot();
        info!(
            accepted = report.accepted,
            completed = report.completed,
            failed = report.failed,
            "server stopped"
        );
        Ok(report)
    }
}

fn accept_loop(
    listener: &TcpListener,
    queue: &BoundedQueue<Connection>,
    shutdown: &ShutdownHandle,
    stats: &ServeStats,
) {
    let mut next_id = 0u64;
    loop {
        let accepted = listener.accept();
        if shutdown.is_triggered() {
            break;
        }

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(error = %err, "failed to accept connection");
                continue;
            }
        };

        next_id += 1;
        debug!(conn = next_id, %peer, queued = queue.len(), "accepted connection");

        let connection = Connection {
            id: next_id,
            peer,
            stream,
        };
        if let Err(PushError(rejected)) = queue.push(connection) {
            debug!(conn = rejected.id, "queue closed, dropping connection");
            break;
        }
        // Counted once queued so every accepted connection ends completed or failed.
        stats.record_accepted();
    }
    debug!("acceptor stopped");
}

fn bind_listener(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    Ok(socket.into())
}

/// Cloneable handle that stops a running [`Server`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    triggered: Arc<AtomicBool>,
    queue: Arc<BoundedQueue<Connection>>,
    wake_addr: SocketAddr,
}

impl ShutdownHandle {
    fn new(queue: Arc<BoundedQueue<Connection>>, local_addr: SocketAddr) -> Self {
        Self {
            triggered: Arc::new(AtomicBool::new(false)),
            queue,
            wake_addr: wake_addr_for(local_addr),
        }
    }

    /// Stops accepting, closes the queue, and lets the workers drain it.
    ///
    /// Sessions already in progress run to completion. Calling this more
    /// than once has no further effect.
    pub fn trigger(&self) {
        if self.triggered.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutdown requested");
        self.queue.close();

        // The acceptor may be parked in `accept`; a throwaway connection wakes it.
        if let Err(err) = TcpStream::connect_timeout(&self.wake_addr, WAKE_TIMEOUT) {
            debug!(error = %err, addr = %self.wake_addr, "failed to wake acceptor");
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}

fn wake_addr_for(local_addr: SocketAddr) -> SocketAddr {
    let ip = match local_addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, local_addr.port())
}
