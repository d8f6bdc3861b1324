pub mod attach;
pub mod config;
pub mod daemon;
pub mod hardware;

use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use tinta_core::DaemonConfig;
use tinta_daemon::{ClientError, Response, Session};

use crate::GlobalArgs;

/// Effective config: file (or defaults) with command-line overrides applied.
pub fn load_config(global: &GlobalArgs) -> Result<DaemonConfig> {
    let mut config = tinta_core::config::load(global.config.as_deref())
        .context("failed to load tinta config")?;
    if let Some(socket) = &global.socket {
        config.socket_path = socket.clone();
    }
    Ok(config)
}

/// Connect with the full retry schedule.
pub fn connect(config: &DaemonConfig) -> Result<Session> {
    let session = Session::new(&config.socket_path);
    session
        .connect(config.client.connect_timeout())
        .context("is the helper running? start it with `sudo tinta daemon start`")?;
    Ok(session)
}

/// Single attempt, for probes where "not running" is an answer.
pub fn probe(config: &DaemonConfig) -> Option<Session> {
    let session = Session::new(&config.socket_path);
    match session.connect_with_backoff(config.client.connect_timeout(), &[Duration::ZERO]) {
        Ok(()) => Some(session),
        Err(ClientError::ConnectFailed { .. }) => None,
        Err(err) => {
            tracing::warn!(error = %err, "unexpected connect failure");
            None
        }
    }
}

/// Print a response and exit non-zero when the helper reported failure.
pub fn report(global: &GlobalArgs, response: &Response) -> Result<()> {
    if global.json {
        println!(
            "{}",
            serde_json::to_string_pretty(response).context("failed to render response JSON")?
        );
    } else if response.success {
        println!("{} {}", "✓".green().bold(), response.summary());
    } else {
        eprintln!("{} {}", "✗".red().bold(), response.summary());
    }

    if !response.success {
        std::process::exit(1);
    }
    Ok(())
}
