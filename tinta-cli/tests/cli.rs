use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use assert_cmd::prelude::*;
use predicates::prelude::*;
use tempfile::TempDir;

fn tinta() -> Command {
    Command::cargo_bin("tinta").expect("tinta binary")
}

struct Layout {
    _dir: TempDir,
    config: PathBuf,
    socket: PathBuf,
    pid_file: PathBuf,
}

fn layout() -> Layout {
    let dir = TempDir::new().expect("tempdir");
    let socket = dir.path().join("tinta.sock");
    let pid_file = dir.path().join("tinta.pid");
    let config = dir.path().join("config.yaml");
    std::fs::write(
        &config,
        format!(
            "socket_path: {}\npid_file: {}\nec:\n  simulate: true\nclient:\n  connect_timeout_ms: 2000\n",
            socket.display(),
            pid_file.display()
        ),
    )
    .expect("write config");
    Layout {
        _dir: dir,
        config,
        socket,
        pid_file,
    }
}

struct DaemonProcess {
    child: Child,
    config: PathBuf,
}

impl DaemonProcess {
    fn start(layout: &Layout) -> Self {
        let child = Command::cargo_bin("tinta")
            .expect("tinta binary")
            .arg("--config")
            .arg(&layout.config)
            .args(["daemon", "start"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn daemon");
        wait_for(|| layout.socket.exists(), Duration::from_secs(10));
        Self {
            child,
            config: layout.config.clone(),
        }
    }

    fn stop(&mut self) {
        let _ = tinta()
            .arg("--config")
            .arg(&self.config)
            .args(["daemon", "stop"])
            .output();
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            sleep(Duration::from_millis(50));
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

fn wait_for(condition: impl Fn() -> bool, within: Duration) {
    let deadline = Instant::now() + within;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within {within:?}");
        sleep(Duration::from_millis(50));
    }
}

fn with_config(config: &Path) -> Command {
    let mut cmd = tinta();
    cmd.arg("--config").arg(config);
    cmd
}

#[test]
fn help_lists_commands() {
    tinta()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("daemon"))
        .stdout(predicate::str::contains("frontlight"))
        .stdout(predicate::str::contains("attach"));
}

#[test]
fn brightness_out_of_range_is_rejected_locally() {
    tinta()
        .args(["brightness", "9"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("0..=8"));
}

#[test]
fn daemon_status_reports_not_running() {
    let layout = layout();
    with_config(&layout.config)
        .args(["daemon", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"running\": false"));
}

#[test]
fn config_show_merges_file_and_flags() {
    let layout = layout();
    with_config(&layout.config)
        .args(["--socket", "/run/other.sock", "config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("socket_path: /run/other.sock"))
        .stdout(predicate::str::contains("simulate: true"))
        .stdout(predicate::str::contains("watchdog_timeout_ms: 20000"));
}

#[test]
fn missing_explicit_config_fails() {
    tinta()
        .args(["--config", "/nonexistent/tinta.yaml", "config", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load tinta config"));
}

#[test]
fn simulated_daemon_serves_cli_commands() {
    let layout = layout();
    let mut daemon = DaemonProcess::start(&layout);
    assert!(layout.pid_file.exists());

    with_config(&layout.config)
        .args(["brightness", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Brightness set to 5"));

    with_config(&layout.config)
        .args(["frontlight", "on", "--level", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Frontlight enabled"));

    with_config(&layout.config)
        .args(["--json", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"frontlight\": \"on\""))
        .stdout(predicate::str::contains("\"brightness\": 3"));

    with_config(&layout.config)
        .arg("eink")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not configured"));

    with_config(&layout.config)
        .args(["daemon", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"running\": true"));

    daemon.stop();
    wait_for(|| !layout.socket.exists(), Duration::from_secs(5));
    assert!(!layout.pid_file.exists());
}

#[test]
fn attach_for_a_few_seconds_then_stops_helper() {
    let layout = layout();
    let mut daemon = DaemonProcess::start(&layout);

    with_config(&layout.config)
        .args(["attach", "--seconds", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("attached to"))
        .stdout(predicate::str::contains("detached"));

    wait_for(|| !layout.socket.exists(), Duration::from_secs(5));
    daemon.stop();
}
