//! tinta: control the privileged frontlight / E-Ink helper.
//!
//! # Usage
//!
//! ```text
//! tinta daemon start|stop|status
//! tinta eink | oled
//! tinta refresh [--quick]
//! tinta frontlight on [--level N] | off
//! tinta brightness <0-8>
//! tinta status | keepalive
//! tinta attach [--seconds N] [--leave-running]
//! tinta config show
//! ```
//!
//! Global flags: `--config <path>`, `--socket <path>`, `--json`.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use commands::{
    attach::AttachArgs, config::ConfigCommand, daemon::DaemonCommand, hardware::FrontlightCommand,
    hardware::RefreshArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "tinta",
    version,
    about = "Frontlight and E-Ink control through the tinta helper daemon",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Config file (default: /etc/tinta/config.yaml if present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the helper socket path.
    #[arg(long, global = true)]
    pub socket: Option<PathBuf>,

    /// Emit machine-readable JSON.
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run, stop or query the privileged helper daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Switch the panel to E-Ink mode.
    Eink,

    /// Switch the panel back to OLED mode.
    Oled,

    /// Refresh the E-Ink panel.
    Refresh(RefreshArgs),

    /// Turn the frontlight on or off.
    Frontlight {
        #[command(subcommand)]
        command: FrontlightCommand,
    },

    /// Set frontlight brightness (0-8).
    Brightness {
        #[arg(value_parser = clap::value_parser!(u8).range(0..=8))]
        level: u8,
    },

    /// Show EC access state and current frontlight readings.
    Status,

    /// Send one keepalive to the helper.
    Keepalive,

    /// Hold a session open, feeding the helper's watchdog.
    Attach(AttachArgs),

    /// Inspect the effective configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    // `daemon start` installs its own subscriber at the configured level.
    if !matches!(
        cli.command,
        Commands::Daemon {
            command: DaemonCommand::Start(_)
        }
    ) {
        tinta_daemon::init_tracing("warn");
    }

    let global = cli.global;
    match cli.command {
        Commands::Daemon { command } => commands::daemon::run(&global, command),
        Commands::Eink => commands::hardware::eink(&global),
        Commands::Oled => commands::hardware::oled(&global),
        Commands::Refresh(args) => commands::hardware::refresh(&global, args),
        Commands::Frontlight { command } => commands::hardware::frontlight(&global, command),
        Commands::Brightness { level } => commands::hardware::brightness(&global, level),
        Commands::Status => commands::hardware::status(&global),
        Commands::Keepalive => commands::hardware::keepalive(&global),
        Commands::Attach(args) => args.run(&global),
        Commands::Config { command } => commands::config::run(&global, command),
    }
}
