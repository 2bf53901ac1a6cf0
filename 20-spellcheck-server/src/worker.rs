//! Fixed pool of session workers draining the connection queue.
//!
//! Every worker is a named OS thread that loops on [`BoundedQueue::pop`],
//! runs one [`Session`] to completion, and closes the connection by dropping
//! it. A worker owns its connection for the whole session, so with `W`
//! workers at most `W` clients are served at once.
//!
//! Session failures are logged and counted here; they never escape the
//! worker that hit them.

use std::{
    io,
    net::{SocketAddr, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::{
    dictionary::Dictionary,
    queue::BoundedQueue,
    result_log::ResultLog,
    session::{Session, SessionError},
};

/// An accepted client connection waiting for, or owned by, a worker.
#[derive(Debug)]
pub struct Connection {
    pub id: u64,
    pub peer: SocketAddr,
    pub stream: TcpStream,
}

/// Read-only services and counters shared by every worker.
#[derive(Debug)]
pub struct SessionContext {
    pub dictionary: Arc<Dictionary>,
    pub log: Arc<ResultLog>,
    /// Read and write deadline applied to each connection. `None` waits forever.
    pub idle_timeout: Option<Duration>,
    pub stats: Arc<ServeStats>,
}

/// Running totals updated by the acceptor and workers.
#[derive(Debug, Default)]
pub struct ServeStats {
    accepted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`ServeStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeReport {
    pub accepted: u64,
    pub completed: u64,
    pub failed: u64,
}

impl ServeStats {
    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ServeReport {
        ServeReport {
            accepted: self.accepted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `count` workers popping from `queue`.
    ///
    /// # Errors
    ///
    /// Fails if the OS refuses to create a thread. Workers started before the
    /// failure keep running until the queue is closed.
    pub fn spawn(
        count: usize,
        queue: Arc<BoundedQueue<Connection>>,
        context: Arc<SessionContext>,
    ) -> Result<Self> {
        let mut handles = Vec::with_capacity(count);
        for index in 0..count {
            let queue = Arc::clone(&queue);
            let context = Arc::clone(&context);
            let handle = thread::Builder::new()
                .name(format!("spellcheck-worker-{index}"))
                .spawn(move || run_worker(index, &queue, &context))
                .with_context(|| format!("failed to spawn worker {index}"))?;
            handles.push(handle);
        }
        Ok(Self { handles })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every worker to exit. Workers exit once the queue is
    /// closed and drained.
    pub fn join(self) {
        for handle in self.handles {
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }
    }
}

fn run_worker(index: usize, queue: &BoundedQueue<Connection>, context: &SessionContext) {
    debug!(worker = index, "worker started");
    while let Some(connection) = queue.pop() {
        serve_connection(index, connection, context);
    }
    debug!(worker = index, "worker exiting");
}

fn serve_connection(worker: usize, connection: Connection, context: &SessionContext) {
    let Connection { id, peer, stream } = connection;
    info!(worker, conn = id, %peer, "session started");

    let outcome = apply_deadlines(&stream, context.idle_timeout)
        .map_err(SessionError::from)
        .and_then(|()| Session::new(&stream, &*context.dictionary, &*context.log).run());

    match outcome {
        Ok(summary) => {
            context.stats.record_completed();
            info!(
                worker,
                conn = id,
                %peer,
                reason = ?summary.reason,
                words = summary.words,
                matched = summary.matched,
                "session ended"
            );
        }
        Err(err) => {
            context.stats.record_failed();
            warn!(worker, conn = id, %peer, error = %err, "session failed");
        }
    }
    // Dropping `stream` here closes the connection.
}

fn apply_deadlines(stream: &TcpStream, idle_timeout: Option<Duration>) -> io::Result<()> {
    stream.set_read_timeout(idle_timeout)?;
    stream.set_write_timeout(idle_timeout)?;
    Ok(())
}
