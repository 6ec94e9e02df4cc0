#![forbid(unsafe_code)]
//! Worker pool front-end: spawns detached worker processes, tracks their
//! PIDs in a sidecar file, and delivers stop signals with escalation.
//!
//! The sidecar only lets `worker stop` find processes across CLI
//! invocations. It is advisory; the workers table in the store stays
//! authoritative.

use crate::config::Config;
use crate::error::QueueError;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{info, warn};

const PID_FILE_NAME: &str = "workers.pid";
const MAX_WORKER_COUNT: u32 = 100;
const KILL_POLL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, Default)]
pub struct StopReport {
    pub stopped: usize,
    pub killed: usize,
    pub already_gone: usize,
}

#[derive(Clone, Debug, Default)]
pub struct PidSnapshot {
    pub tracked: Vec<u32>,
    pub alive: Vec<u32>,
}

/// The sidecar lives next to the database so every CLI invocation that
/// shares a queue also shares the pid file.
pub fn pid_file_path(config: &Config) -> PathBuf {
    let db = PathBuf::from(&config.db_path);
    match db.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(PID_FILE_NAME),
        _ => PathBuf::from(PID_FILE_NAME),
    }
}

pub fn start(config: &Config, count: u32) -> Result<Vec<u32>, QueueError> {
    if count < 1 || count > MAX_WORKER_COUNT {
        return Err(QueueError::validation(format!(
            "worker count must be between 1 and {MAX_WORKER_COUNT}"
        )));
    }

    let exe = std::env::current_exe()?;
    let epoch = crate::now_ms() / 1000;
    let mut pids = Vec::<u32>::with_capacity(count as usize);
    for n in 1..=count {
        let worker_id = format!("worker-{n}-{epoch}");
        let child = Command::new(&exe)
            .arg("worker")
            .arg("run")
            .arg("--id")
            .arg(&worker_id)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        info!(pid = child.id(), worker_id = %worker_id, "worker spawned");
        pids.push(child.id());
    }

    save_pids(&pid_file_path(config), &pids)?;
    Ok(pids)
}

pub fn stop(config: &Config, grace: Duration) -> Result<StopReport, QueueError> {
    let path = pid_file_path(config);
    let pids = load_pids(&path);

    let mut report = StopReport::default();
    for pid in pids {
        if !is_running(pid) {
            report.already_gone += 1;
            continue;
        }
        match terminate(pid, grace) {
            Termination::Graceful => report.stopped += 1,
            Termination::Forced => {
                warn!(pid, "worker ignored SIGTERM, killed");
                report.killed += 1;
            }
        }
    }

    clear_pids(&path)?;
    Ok(report)
}

/// Foreground variant: one worker loop in the calling terminal.
pub fn run_foreground(
    config: &Config,
    options: crate::worker::WorkerOptions,
) -> Result<(), QueueError> {
    crate::worker::run(config, options)
}

pub fn pid_snapshot(config: &Config) -> PidSnapshot {
    let tracked = load_pids(&pid_file_path(config));
    let alive = tracked
        .iter()
        .copied()
        .filter(|pid| is_running(*pid))
        .collect();
    PidSnapshot { tracked, alive }
}

enum Termination {
    Graceful,
    Forced,
}

pub fn is_running(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

fn terminate(pid: u32, grace: Duration) -> Termination {
    let target = Pid::from_raw(pid as i32);
    let _ = kill(target, Signal::SIGTERM);

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if !is_running(pid) {
            return Termination::Graceful;
        }
        std::thread::sleep(KILL_POLL);
    }

    let _ = kill(target, Signal::SIGKILL);
    Termination::Forced
}

fn save_pids(path: &Path, pids: &[u32]) -> Result<(), QueueError> {
    let mut text = pids
        .iter()
        .map(|pid| pid.to_string())
        .collect::<Vec<_>>()
        .join("\n");
    text.push('\n');
    std::fs::write(path, text)?;
    Ok(())
}

fn load_pids(path: &Path) -> Vec<u32> {
    let Ok(text) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| line.parse::<u32>().ok())
        .collect()
}

fn clear_pids(path: &Path) -> Result<(), QueueError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_pid_file(test_name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "queuectl_supervisor_{test_name}_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir.join(PID_FILE_NAME)
    }

    #[test]
    fn pid_file_round_trips_and_skips_garbage() {
        let path = temp_pid_file("round_trip");
        save_pids(&path, &[101, 202, 303]).expect("save");
        assert_eq!(load_pids(&path), vec![101, 202, 303]);

        std::fs::write(&path, "101\n\nnot-a-pid\n202\n").expect("rewrite");
        assert_eq!(load_pids(&path), vec![101, 202]);

        clear_pids(&path).expect("clear");
        assert!(load_pids(&path).is_empty());
        clear_pids(&path).expect("clearing twice is fine");
    }

    #[test]
    fn pid_file_sits_next_to_the_database() {
        let config = Config {
            db_path: "/var/lib/queuectl/queuectl.db".to_string(),
            ..Config::default()
        };
        assert_eq!(
            pid_file_path(&config),
            PathBuf::from("/var/lib/queuectl/workers.pid")
        );

        let config = Config {
            db_path: "queuectl.db".to_string(),
            ..Config::default()
        };
        assert_eq!(pid_file_path(&config), PathBuf::from(PID_FILE_NAME));
    }

    #[test]
    fn start_rejects_out_of_range_counts() {
        let config = Config::default();
        assert!(start(&config, 0).is_err());
        assert!(start(&config, MAX_WORKER_COUNT + 1).is_err());
    }

    #[test]
    fn current_process_counts_as_running() {
        assert!(is_running(std::process::id()));
    }
}
