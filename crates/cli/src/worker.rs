#![forbid(unsafe_code)]
//! Long-running worker process: claims one job at a time, executes it via
//! the launcher, reports the outcome, heartbeats from a background thread,
//! and drains cleanly on SIGTERM/SIGINT.

use crate::config::Config;
use crate::error::QueueError;
use crate::launcher;
use crate::queue::{FailureDisposition, QueueManager};
use qc_storage::{JobRow, SqliteStore, WorkerRegisterRequest};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const SLEEP_SLICE: Duration = Duration::from_millis(100);
const ERROR_TAIL_CHARS: usize = 500;

#[derive(Clone, Debug, Default)]
pub struct WorkerOptions {
    pub worker_id: Option<String>,
    pub exit_when_idle: bool,
    pub max_idle_secs: u64,
}

pub fn run(config: &Config, options: WorkerOptions) -> Result<(), QueueError> {
    let worker_id = options
        .worker_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| format!("worker-{}", std::process::id()));

    let shutdown = Arc::new(AtomicBool::new(false));
    for sig in [SIGTERM, SIGINT] {
        // Registration order matters: the first signal only raises the
        // drain flag, a second one hits the conditional handler and
        // force-exits, leaving the in-flight job for orphan recovery.
        flag::register_conditional_shutdown(sig, 1, Arc::clone(&shutdown))?;
        flag::register(sig, Arc::clone(&shutdown))?;
    }

    let mut qm = QueueManager::open(config)?;
    let recovery = qm.recover_from_crash()?;
    if recovery.orphans > 0 || recovery.pruned_workers > 0 {
        info!(
            orphans = recovery.orphans,
            pruned_workers = recovery.pruned_workers,
            "crash recovery"
        );
    }

    qm.store_mut().register_worker(WorkerRegisterRequest {
        id: worker_id.clone(),
        pid: i64::from(std::process::id()),
    })?;
    info!(worker_id = %worker_id, pid = std::process::id(), "worker started");

    let heartbeat_stop = Arc::new(AtomicBool::new(false));
    let heartbeat = spawn_heartbeat(config, worker_id.clone(), Arc::clone(&heartbeat_stop));

    let result = work_loop(&mut qm, config, &options, &worker_id, &shutdown);

    heartbeat_stop.store(true, Ordering::SeqCst);
    let _ = heartbeat.join();
    if let Err(err) = qm.store_mut().deregister_worker(&worker_id) {
        warn!(worker_id = %worker_id, %err, "deregister failed");
    }
    info!(worker_id = %worker_id, "worker stopped");
    result
}

fn work_loop(
    qm: &mut QueueManager,
    config: &Config,
    options: &WorkerOptions,
    worker_id: &str,
    shutdown: &Arc<AtomicBool>,
) -> Result<(), QueueError> {
    let poll = Duration::from_secs(config.worker_poll_interval.max(1));
    let recovery_interval = Duration::from_secs(config.worker_heartbeat_interval.max(1) * 2);
    let mut last_recovery = Instant::now();
    let mut idle_since: Option<Instant> = None;

    while !shutdown.load(Ordering::SeqCst) {
        match qm.claim(worker_id) {
            Ok(Some(job)) => {
                idle_since = None;
                process_job(qm, config, &job, worker_id);
            }
            Ok(None) => {
                if options.exit_when_idle {
                    let idle_started = *idle_since.get_or_insert_with(Instant::now);
                    if idle_started.elapsed() >= Duration::from_secs(options.max_idle_secs) {
                        let pending = qm.status().map(|s| s.jobs.pending).unwrap_or(0);
                        if pending == 0 {
                            info!(worker_id, "queue drained, exiting");
                            return Ok(());
                        }
                    }
                }
                // While idle, periodically look for claims stranded by dead
                // peers; their stale heartbeats only become visible after
                // the staleness window has passed.
                if last_recovery.elapsed() >= recovery_interval {
                    match qm.recover_from_crash() {
                        Ok(report) if report.orphans > 0 => {
                            info!(orphans = report.orphans, "recovered orphaned jobs");
                        }
                        Ok(_) => {}
                        Err(err) => warn!(%err, "crash recovery failed"),
                    }
                    last_recovery = Instant::now();
                }
                sleep_interruptible(poll, shutdown);
            }
            Err(err) if err.is_transient() => {
                warn!(%err, "store contended, will retry");
                sleep_interruptible(poll, shutdown);
            }
            Err(err) => {
                // Invariant-level failure: exit so the operator notices.
                error!(%err, "claim failed");
                return Err(err);
            }
        }
    }
    Ok(())
}

fn process_job(qm: &mut QueueManager, config: &Config, job: &JobRow, worker_id: &str) {
    info!(
        job_id = %job.id,
        attempt = job.attempts,
        max_retries = job.max_retries,
        command = %job.command,
        "job started"
    );

    let timeout = Duration::from_secs(config.job_timeout.max(1));
    let failure = match launcher::run(&job.command, timeout) {
        Ok(outcome) if outcome.timed_out => {
            Some(format!("timeout after {} seconds", config.job_timeout))
        }
        Ok(outcome) if outcome.exit_code == 0 => None,
        Ok(outcome) => Some(format!(
            "exit code {}: {}",
            outcome.exit_code,
            output_tail(&outcome.stdout, &outcome.stderr)
        )),
        Err(err) => Some(format!("failed to launch command: {err}")),
    };

    let report = match failure {
        None => qm.report_success(job, worker_id).map(|_| {
            info!(job_id = %job.id, "job completed");
        }),
        Some(message) => qm.report_failure(job, worker_id, &message).map(|outcome| {
            match outcome {
                FailureDisposition::Retry { delay_secs } => {
                    warn!(job_id = %job.id, %message, delay_secs, "job failed, will retry");
                }
                FailureDisposition::DeadLetter => {
                    warn!(job_id = %job.id, %message, "job failed, moved to dlq");
                }
            }
        }),
    };

    if let Err(err) = report {
        if err.code() == "INVALID_STATE" {
            // The claim was taken from us (orphan recovery after a stall);
            // the job's fate now belongs to another worker.
            warn!(job_id = %job.id, %err, "claim no longer held, outcome dropped");
        } else {
            error!(job_id = %job.id, %err, "failed to report job outcome");
        }
    }
}

/// Failure detail recorded on the job: prefer stderr, fall back to stdout,
/// keep only the tail.
fn output_tail(stdout: &str, stderr: &str) -> String {
    let source = if stderr.trim().is_empty() {
        stdout.trim()
    } else {
        stderr.trim()
    };
    let chars = source.chars().count();
    if chars <= ERROR_TAIL_CHARS {
        return source.to_string();
    }
    source.chars().skip(chars - ERROR_TAIL_CHARS).collect()
}

fn spawn_heartbeat(
    config: &Config,
    worker_id: String,
    stop: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    let db_path = config.db_path.clone();
    let interval = Duration::from_secs(config.worker_heartbeat_interval.max(1));
    std::thread::spawn(move || {
        // Own connection: the main loop blocks on job execution and must
        // never gate liveness updates.
        let mut store = match SqliteStore::open(&db_path) {
            Ok(store) => store,
            Err(err) => {
                warn!(worker_id = %worker_id, %err, "heartbeat store unavailable");
                return;
            }
        };
        loop {
            let deadline = Instant::now() + interval;
            while Instant::now() < deadline {
                if stop.load(Ordering::SeqCst) {
                    return;
                }
                std::thread::sleep(SLEEP_SLICE);
            }
            match store.heartbeat_worker(&worker_id) {
                Ok(()) => {}
                Err(err) if err.code() == "NOT_FOUND" => {
                    // The row was pruned while this process stalled (e.g. a
                    // suspended machine). Re-register so peers stop treating
                    // our claims as orphans.
                    let registered = store.register_worker(WorkerRegisterRequest {
                        id: worker_id.clone(),
                        pid: i64::from(std::process::id()),
                    });
                    match registered {
                        Ok(_) => debug!(worker_id = %worker_id, "worker re-registered"),
                        Err(err) => debug!(worker_id = %worker_id, %err, "re-register failed"),
                    }
                }
                Err(err) => debug!(worker_id = %worker_id, %err, "heartbeat skipped"),
            }
        }
    })
}

fn sleep_interruptible(duration: Duration, shutdown: &Arc<AtomicBool>) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        std::thread::sleep(SLEEP_SLICE);
    }
}
