//! `tinta daemon`: privileged helper lifecycle.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde_json::{json, Value};

use tinta_daemon::{liveness, start_blocking, MarkerState};

use super::{load_config, probe};
use crate::GlobalArgs;

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the helper in the foreground (needs root for EC port access).
    Start(StartArgs),
    /// Ask a running helper to shut down.
    Stop,
    /// Report whether a helper is running and what it sees.
    Status,
}

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Serve EC commands against the in-process simulator.
    #[arg(long)]
    pub simulate: bool,

    /// Override the liveness marker path.
    #[arg(long)]
    pub pid_file: Option<std::path::PathBuf>,
}

pub fn run(global: &GlobalArgs, command: DaemonCommand) -> Result<()> {
    let mut config = load_config(global)?;

    match command {
        DaemonCommand::Start(args) => {
            if args.simulate {
                config.ec.simulate = true;
            }
            if let Some(pid_file) = args.pid_file {
                config.pid_file = pid_file;
            }
            start_blocking(config).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match probe(&config) {
            Some(session) => {
                session.disconnect();
                println!("daemon stop requested");
            }
            None => println!("daemon is not running"),
        },
        DaemonCommand::Status => {
            let marker = match liveness::inspect(&config.pid_file)
                .context("failed to read liveness marker")?
            {
                MarkerState::Absent => Value::Null,
                MarkerState::Stale(pid) => json!({ "state": "stale", "pid": pid }),
                MarkerState::Live(pid) => json!({ "state": "live", "pid": pid }),
            };

            let payload = match probe(&config) {
                Some(session) => {
                    let status = session.status().context("failed to query daemon status")?;
                    session.close();
                    let mut payload = json!({
                        "running": true,
                        "socket": config.socket_path.display().to_string(),
                        "marker": marker,
                    });
                    if let Value::Object(fields) = &mut payload {
                        fields.extend(status.fields);
                    }
                    payload
                }
                None => json!({
                    "running": false,
                    "socket": config.socket_path.display().to_string(),
                    "marker": marker,
                }),
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload)
                    .context("failed to render daemon status JSON")?
            );
        }
    }

    Ok(())
}
