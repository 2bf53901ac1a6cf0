use std::{net::IpAddr, path::PathBuf, time::Duration};

use clap::{Parser, ValueHint};

use crate::server::{
    DEFAULT_BACKLOG, DEFAULT_PORT, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS, ServerConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-threaded dictionary spellcheck server", long_about = None)]
pub struct Cli {
    /// TCP port to listen on. Use 0 for an ephemeral port.
    #[arg(default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Word list with one word per line. Uses the bundled list if omitted.
    #[arg(value_hint = ValueHint::FilePath)]
    pub dictionary: Option<PathBuf>,

    /// Address to bind the listener to.
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Number of worker threads serving sessions.
    #[arg(long, default_value_t = DEFAULT_WORKERS, value_parser = parse_positive)]
    pub workers: usize,

    /// Connections that may wait for a free worker.
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY, value_parser = parse_positive)]
    pub queue_capacity: usize,

    /// Kernel listen backlog for connections not yet accepted.
    #[arg(long, default_value_t = DEFAULT_BACKLOG)]
    pub backlog: i32,

    /// File that records every evaluated word. Truncated at startup.
    #[arg(long, default_value = "log.txt", value_hint = ValueHint::FilePath)]
    pub log_file: PathBuf,

    /// Close a session after this many idle seconds. Waits forever if unset.
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub idle_timeout: Option<u64>,
}

impl Cli {
    pub fn into_config(self) -> ServerConfig {
        ServerConfig {
            bind: self.bind,
            port: self.port,
            dictionary: self.dictionary,
            log_file: self.log_file,
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            backlog: self.backlog,
            idle_timeout: self.idle_timeout.map(Duration::from_secs),
        }
    }
}

fn parse_positive(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(value) => Ok(value),
        Err(err) => Err(err.to_string()),
    }
}
