use std::{io::IsTerminal, thread};

use anyhow::{Context, Result};
use clap::Parser;
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use tracing::{info, warn};

use spellcheck_server::{
    cli::Cli,
    server::{Server, ShutdownHandle},
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stdout().is_terminal())
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let server = Server::bind(cli.into_config())?;
    let addr = server.local_addr()?;
    info!("spellcheck server listening on {}", addr);

    install_signal_handler(server.shutdown_handle())?;
    if let Err(err) = server.run() {
        warn!("server exited with error: {err:?}");
        return Err(err);
    }

    Ok(())
}

/// First SIGINT/SIGTERM drains and stops the server; a second one exits at once.
fn install_signal_handler(shutdown: ShutdownHandle) -> Result<()> {
    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("failed to register signal handlers")?;
    thread::Builder::new()
        .name("spellcheck-signals".to_string())
        .spawn(move || {
            let mut pending = signals.forever();
            if let Some(signal) = pending.next() {
                info!(signal, "stopping after active sessions finish");
                shutdown.trigger();
            }
            if let Some(signal) = pending.next() {
                warn!(signal, "second signal received, exiting immediately");
                std::process::exit(130);
            }
        })
        .context("failed to spawn signal thread")?;
    Ok(())
}
