//! `tinta attach`: keep a session open the way the desktop front-end does.

use std::io::BufRead;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use tinta_daemon::KeepaliveMonitor;

use super::{connect, load_config};
use crate::GlobalArgs;

#[derive(Args, Debug)]
pub struct AttachArgs {
    /// Detach after this many seconds instead of waiting for Enter.
    #[arg(long)]
    pub seconds: Option<u64>,

    /// Close the connection on detach without stopping the helper.
    #[arg(long)]
    pub leave_running: bool,
}

impl AttachArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let config = load_config(global)?;
        let session = Arc::new(connect(&config)?);
        let monitor = KeepaliveMonitor::spawn(
            session.clone(),
            config.client.keepalive_interval(),
            config.client.connect_timeout(),
        );
        println!(
            "{} attached to {} (keepalive every {}ms)",
            "✓".green().bold(),
            config.socket_path.display(),
            config.client.keepalive_interval_ms,
        );

        match self.seconds {
            Some(seconds) => std::thread::sleep(Duration::from_secs(seconds)),
            None => {
                println!("press Enter to detach");
                let mut line = String::new();
                let _ = std::io::stdin().lock().read_line(&mut line);
            }
        }

        let sent = monitor.stats().sent.load(Ordering::Relaxed);
        let failed = monitor.stats().failed.load(Ordering::Relaxed);
        monitor.stop();
        if self.leave_running {
            session.close();
        } else {
            session.disconnect();
        }
        println!("detached ({sent} keepalives, {failed} failed)");
        Ok(())
    }
}
