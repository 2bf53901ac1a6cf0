//! Multi-threaded spellcheck server built around a bounded connection queue.
//!
//! Clients connect over TCP, receive a prompt, and send one word per line.
//! Each word is checked against a static dictionary and answered with
//! `<word> - OK.` or `<word> - MISPELLED.` until the client sends `exitpls`.
//!
//! One acceptor thread hands connections to a fixed pool of worker threads
//! through a [`queue::BoundedQueue`]. When every worker is busy and the queue
//! is full, the acceptor blocks and further clients wait in the kernel's
//! listen backlog.
//!
//! - [`cli`] parses the command line into a [`server::ServerConfig`].
//! - [`server`] binds the listener, runs the acceptor, and handles shutdown.
//! - [`worker`] owns the worker threads and per-connection bookkeeping.
//! - [`session`] implements the line protocol for one connection.
//! - [`queue`] is the mutex and condition-variable bounded buffer.
//! - [`dictionary`] loads the word list and answers prefix lookups.
//! - [`result_log`] appends every verdict to the result file.

pub mod cli;
pub mod dictionary;
pub mod queue;
pub mod result_log;
pub mod server;
pub mod session;
pub mod worker;
