//! One-shot hardware commands: connect, send, print, close.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use serde_json::Value;

use tinta_daemon::{ClientError, Response, Session};

use super::{connect, load_config, report};
use crate::GlobalArgs;

#[derive(Args, Debug)]
pub struct RefreshArgs {
    /// Quick (partial) refresh instead of a full flash.
    #[arg(long)]
    pub quick: bool,
}

#[derive(Subcommand, Debug)]
pub enum FrontlightCommand {
    /// Power the frontlight on, optionally at a brightness level.
    On {
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=8))]
        level: Option<u8>,
    },
    /// Power the frontlight off.
    Off,
}

fn one_shot(
    global: &GlobalArgs,
    send: impl FnOnce(&Session) -> Result<Response, ClientError>,
) -> Result<()> {
    let config = load_config(global)?;
    let session = connect(&config)?;
    let response = send(&session).context("helper request failed");
    session.close();
    report(global, &response?)
}

pub fn eink(global: &GlobalArgs) -> Result<()> {
    one_shot(global, Session::enable_eink)
}

pub fn oled(global: &GlobalArgs) -> Result<()> {
    one_shot(global, Session::enable_oled)
}

pub fn refresh(global: &GlobalArgs, args: RefreshArgs) -> Result<()> {
    one_shot(global, |session| session.refresh_eink(args.quick))
}

pub fn frontlight(global: &GlobalArgs, command: FrontlightCommand) -> Result<()> {
    match command {
        FrontlightCommand::On { level } => {
            one_shot(global, |session| session.enable_frontlight(level))
        }
        FrontlightCommand::Off => one_shot(global, Session::disable_frontlight),
    }
}

pub fn brightness(global: &GlobalArgs, level: u8) -> Result<()> {
    one_shot(global, |session| session.set_brightness(level))
}

pub fn keepalive(global: &GlobalArgs) -> Result<()> {
    one_shot(global, Session::keepalive)
}

pub fn status(global: &GlobalArgs) -> Result<()> {
    if global.json {
        return one_shot(global, Session::status);
    }

    let config = load_config(global)?;
    let session = connect(&config)?;
    let response = session.status().context("helper request failed");
    session.close();
    let response = response?;

    let ec = response.field("ec").cloned().unwrap_or(Value::Null);
    let available = ec["available"].as_bool().unwrap_or(false);
    let mark = if available {
        "✓".green().bold()
    } else {
        "✗".red().bold()
    };
    println!("{mark} EC access {}", if available { "available" } else { "unavailable" });
    if ec["secure_boot_enabled"].as_bool().unwrap_or(false) {
        println!("  secure boot: enabled");
    }
    if let Some(error) = ec["error_message"].as_str() {
        println!("  {}", error.dimmed());
    }
    println!("  frontlight: {}", display_field(&response, "frontlight"));
    println!("  brightness: {}", display_field(&response, "brightness"));
    println!("  helper pid: {}", display_field(&response, "pid"));
    println!("  uptime:     {}s", display_field(&response, "uptime_secs"));
    Ok(())
}

fn display_field(response: &Response, key: &str) -> String {
    match response.field(key) {
        None | Some(Value::Null) => "unknown".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
