#![forbid(unsafe_code)]
//! queuectl — durable background job queue over a shared SQLite store.

mod config;
mod error;
mod launcher;
mod queue;
mod render;
mod supervisor;
mod worker;

use config::{Config, DB_PATH_ENV, LogLevel};
use error::QueueError;
use queue::QueueManager;
use std::time::Duration;

const EXIT_OK: i32 = 0;
const EXIT_USAGE: i32 = 2;

const STOP_GRACE: Duration = Duration::from_secs(10);

fn usage() -> &'static str {
    "queuectl — durable background job queue\n\n\
USAGE:\n\
  queuectl enqueue <job-json>\n\
  queuectl list [--state pending|processing|completed|failed|dlq] [--limit N]\n\
  queuectl status\n\
  queuectl dlq list [--limit N]\n\
  queuectl dlq retry <job-id>\n\
  queuectl worker start [--count N]\n\
  queuectl worker stop\n\
  queuectl worker run [--id ID] [--exit-when-idle] [--max-idle S]\n\
  queuectl config get [key]\n\
  queuectl config set <key> <value>\n\
  queuectl config reset [key]\n\n\
ENVIRONMENT:\n\
  QUEUECTL_CONFIG  path to the config file (default: queuectl.config.json)\n\
  QUEUECTL_DB      overrides db_path for this invocation (not persisted)\n\n\
EXIT CODES:\n\
  0 ok, 1 failure, 2 usage/validation, 3 not found, 4 duplicate id,\n\
  5 invalid state transition\n"
}

pub(crate) fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .min(i64::MAX as u128) as i64
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn init_tracing(level: LogLevel) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.filter_directive()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        print!("{}", usage());
        return EXIT_OK;
    }
    let Some(command) = args.first() else {
        eprint!("{}", usage());
        return EXIT_USAGE;
    };

    let config_path = Config::path_from_env();
    let file_config = Config::load(&config_path);
    // The env override steers this invocation at a different queue without
    // touching the persisted settings.
    let mut runtime_config = file_config.clone();
    if let Some(db_path) = env_var(DB_PATH_ENV) {
        runtime_config.db_path = db_path;
    }
    init_tracing(runtime_config.log_level);

    match command.as_str() {
        "enqueue" => cmd_enqueue(&runtime_config, &args[1..]),
        "list" => cmd_list(&runtime_config, &args[1..]),
        "status" => cmd_status(&runtime_config),
        "dlq" => match args.get(1).map(String::as_str) {
            Some("list") => cmd_dlq_list(&runtime_config, &args[2..]),
            Some("retry") => cmd_dlq_retry(&runtime_config, &args[2..]),
            _ => usage_error("dlq expects `list` or `retry <job-id>`"),
        },
        "worker" => match args.get(1).map(String::as_str) {
            Some("start") => cmd_worker_start(&runtime_config, &args[2..]),
            Some("stop") => cmd_worker_stop(&runtime_config),
            Some("run") => cmd_worker_run(&runtime_config, &args[2..]),
            _ => usage_error("worker expects `start`, `stop` or `run`"),
        },
        "config" => match args.get(1).map(String::as_str) {
            Some("get") => cmd_config_get(&file_config, &args[2..]),
            Some("set") => cmd_config_set(file_config, &config_path, &args[2..]),
            Some("reset") => cmd_config_reset(file_config, &config_path, &args[2..]),
            _ => usage_error("config expects `get`, `set <key> <value>` or `reset`"),
        },
        other => usage_error(&format!("unknown command: {other}")),
    }
}

fn usage_error(message: &str) -> i32 {
    eprintln!("error: {message}\n");
    eprint!("{}", usage());
    EXIT_USAGE
}

fn fail(err: &QueueError) -> i32 {
    eprintln!("error: {err}");
    err.exit_code()
}

/// Parses `--flag value` style options; returns the value after `name`.
fn flag_value<'a>(rest: &'a [String], name: &str) -> Result<Option<&'a str>, String> {
    let mut i = 0usize;
    while i < rest.len() {
        if rest[i] == name {
            return match rest.get(i + 1) {
                Some(value) => Ok(Some(value.as_str())),
                None => Err(format!("{name} requires a value")),
            };
        }
        i += 1;
    }
    Ok(None)
}

fn has_flag(rest: &[String], name: &str) -> bool {
    rest.iter().any(|a| a == name)
}

fn cmd_enqueue(config: &Config, rest: &[String]) -> i32 {
    let [payload] = rest else {
        return usage_error("enqueue expects exactly one JSON argument");
    };
    let spec = match queue::parse_job_spec(payload) {
        Ok(spec) => spec,
        Err(err) => return fail(&err),
    };
    let mut qm = match QueueManager::open(config) {
        Ok(qm) => qm,
        Err(err) => return fail(&err),
    };
    match qm.enqueue(spec) {
        Ok(job) => {
            println!("job {} enqueued", job.id);
            EXIT_OK
        }
        Err(err) => fail(&err),
    }
}

fn parse_limit(rest: &[String]) -> Result<usize, String> {
    match flag_value(rest, "--limit")? {
        None => Ok(100),
        Some(raw) => raw
            .parse::<usize>()
            .ok()
            .filter(|v| *v >= 1)
            .ok_or_else(|| "--limit must be an integer >= 1".to_string()),
    }
}

fn cmd_list(config: &Config, rest: &[String]) -> i32 {
    let state = match flag_value(rest, "--state") {
        Ok(state) => state.map(str::to_string),
        Err(message) => return usage_error(&message),
    };
    let limit = match parse_limit(rest) {
        Ok(limit) => limit,
        Err(message) => return usage_error(&message),
    };

    let qm = match QueueManager::open(config) {
        Ok(qm) => qm,
        Err(err) => return fail(&err),
    };
    let listed = match qm.list(state.clone(), limit) {
        Ok(listed) => listed,
        Err(err) => return fail(&err),
    };

    if listed.jobs.is_empty() {
        match state {
            Some(state) => println!("no jobs in state: {state}"),
            None => println!("no jobs"),
        }
        return EXIT_OK;
    }

    let rows: Vec<Vec<String>> = listed
        .jobs
        .iter()
        .map(|job| {
            vec![
                render::truncate(&job.id, 24),
                render::truncate(&job.command, 40),
                job.state.clone(),
                job.attempts.to_string(),
                job.max_retries.to_string(),
                render::format_ts_ms(job.created_at_ms),
                render::opt_text(job.error_message.as_deref(), 30),
            ]
        })
        .collect();
    print!(
        "{}",
        render::render_table(
            &["ID", "COMMAND", "STATE", "ATTEMPTS", "MAX", "CREATED", "ERROR"],
            &rows
        )
    );
    if listed.has_more {
        println!("({} job(s) shown, more exist)", listed.jobs.len());
    } else {
        println!("({} job(s))", listed.jobs.len());
    }
    EXIT_OK
}

fn cmd_status(config: &Config) -> i32 {
    let qm = match QueueManager::open(config) {
        Ok(qm) => qm,
        Err(err) => return fail(&err),
    };
    let status = match qm.status() {
        Ok(status) => status,
        Err(err) => return fail(&err),
    };

    println!("jobs:");
    let job_rows = vec![
        vec!["pending".to_string(), status.jobs.pending.to_string()],
        vec!["processing".to_string(), status.jobs.processing.to_string()],
        vec!["completed".to_string(), status.jobs.completed.to_string()],
        vec!["dlq".to_string(), status.jobs.dlq.to_string()],
        vec!["total".to_string(), status.jobs.total().to_string()],
    ];
    print!("{}", render::render_table(&["STATE", "COUNT"], &job_rows));

    println!();
    println!("workers:");
    let worker_rows = vec![
        vec!["active".to_string(), status.workers.active.to_string()],
        vec!["stopped".to_string(), status.workers.stopped.to_string()],
        vec!["total".to_string(), status.workers.total().to_string()],
    ];
    print!("{}", render::render_table(&["STATUS", "COUNT"], &worker_rows));

    let workers = match qm.workers() {
        Ok(workers) => workers,
        Err(err) => return fail(&err),
    };
    if !workers.is_empty() {
        println!();
        let rows: Vec<Vec<String>> = workers
            .iter()
            .map(|worker| {
                vec![
                    worker.id.clone(),
                    worker.pid.to_string(),
                    worker.status.clone(),
                    render::format_ts_ms(worker.last_heartbeat_ms),
                ]
            })
            .collect();
        print!(
            "{}",
            render::render_table(&["WORKER", "PID", "STATUS", "LAST HEARTBEAT"], &rows)
        );
    }

    let pids = supervisor::pid_snapshot(config);
    println!();
    println!(
        "tracked pids: {} ({} alive)",
        pids.tracked.len(),
        pids.alive.len()
    );
    EXIT_OK
}

fn cmd_dlq_list(config: &Config, rest: &[String]) -> i32 {
    let limit = match parse_limit(rest) {
        Ok(limit) => limit,
        Err(message) => return usage_error(&message),
    };
    let qm = match QueueManager::open(config) {
        Ok(qm) => qm,
        Err(err) => return fail(&err),
    };
    let listed = match qm.dlq_list(limit) {
        Ok(listed) => listed,
        Err(err) => return fail(&err),
    };

    if listed.jobs.is_empty() {
        println!("dead letter queue is empty");
        return EXIT_OK;
    }

    let rows: Vec<Vec<String>> = listed
        .jobs
        .iter()
        .map(|job| {
            vec![
                render::truncate(&job.id, 24),
                render::truncate(&job.command, 40),
                job.attempts.to_string(),
                render::format_ts_ms(job.updated_at_ms),
                render::opt_text(job.error_message.as_deref(), 40),
            ]
        })
        .collect();
    print!(
        "{}",
        render::render_table(&["ID", "COMMAND", "ATTEMPTS", "UPDATED", "ERROR"], &rows)
    );
    println!("({} job(s) in dlq)", listed.jobs.len());
    EXIT_OK
}

fn cmd_dlq_retry(config: &Config, rest: &[String]) -> i32 {
    let [job_id] = rest else {
        return usage_error("dlq retry expects exactly one job id");
    };
    let mut qm = match QueueManager::open(config) {
        Ok(qm) => qm,
        Err(err) => return fail(&err),
    };
    match qm.retry_dlq(job_id) {
        Ok(job) => {
            println!("job {} returned to the pending queue", job.id);
            EXIT_OK
        }
        Err(err) => fail(&err),
    }
}

fn cmd_worker_start(config: &Config, rest: &[String]) -> i32 {
    let count = match flag_value(rest, "--count") {
        Ok(None) => 1u32,
        Ok(Some(raw)) => match raw.parse::<u32>() {
            Ok(count) => count,
            Err(_) => return usage_error("--count must be an integer"),
        },
        Err(message) => return usage_error(&message),
    };
    match supervisor::start(config, count) {
        Ok(pids) => {
            let rendered: Vec<String> = pids.iter().map(|pid| pid.to_string()).collect();
            println!("started {} worker(s), pids: {}", pids.len(), rendered.join(", "));
            EXIT_OK
        }
        Err(err) => fail(&err),
    }
}

fn cmd_worker_stop(config: &Config) -> i32 {
    match supervisor::stop(config, STOP_GRACE) {
        Ok(report) => {
            println!(
                "stopped {} worker(s) ({} force-killed, {} already gone)",
                report.stopped, report.killed, report.already_gone
            );
            EXIT_OK
        }
        Err(err) => fail(&err),
    }
}

fn cmd_worker_run(config: &Config, rest: &[String]) -> i32 {
    let worker_id = match flag_value(rest, "--id") {
        Ok(worker_id) => worker_id.map(str::to_string),
        Err(message) => return usage_error(&message),
    };
    let max_idle_secs = match flag_value(rest, "--max-idle") {
        Ok(None) => 10u64,
        Ok(Some(raw)) => match raw.parse::<u64>() {
            Ok(v) => v,
            Err(_) => return usage_error("--max-idle must be an integer (seconds)"),
        },
        Err(message) => return usage_error(&message),
    };
    let options = worker::WorkerOptions {
        worker_id,
        exit_when_idle: has_flag(rest, "--exit-when-idle"),
        max_idle_secs,
    };
    match supervisor::run_foreground(config, options) {
        Ok(()) => EXIT_OK,
        Err(err) => fail(&err),
    }
}

fn cmd_config_get(config: &Config, rest: &[String]) -> i32 {
    match rest {
        [] => {
            let rows: Vec<Vec<String>> = config
                .entries()
                .into_iter()
                .map(|(key, value)| vec![key.to_string(), value])
                .collect();
            print!("{}", render::render_table(&["KEY", "VALUE"], &rows));
            EXIT_OK
        }
        [key] => match config.get(key) {
            Ok(value) => {
                println!("{key} = {value}");
                EXIT_OK
            }
            Err(err) => {
                eprintln!("error: {err}");
                EXIT_USAGE
            }
        },
        _ => usage_error("config get expects at most one key"),
    }
}

fn cmd_config_set(mut config: Config, config_path: &std::path::Path, rest: &[String]) -> i32 {
    let [key, value] = rest else {
        return usage_error("config set expects <key> <value>");
    };
    if let Err(err) = config.set(key, value) {
        eprintln!("error: {err}");
        return EXIT_USAGE;
    }
    match config.save(config_path) {
        Ok(()) => {
            println!("{key} = {}", config.get(key).unwrap_or_default());
            EXIT_OK
        }
        Err(err) => {
            eprintln!("error: {err}");
            1
        }
    }
}

fn cmd_config_reset(mut config: Config, config_path: &std::path::Path, rest: &[String]) -> i32 {
    let key = match rest {
        [] => None,
        [key] => Some(key.as_str()),
        _ => return usage_error("config reset expects at most one key"),
    };
    if let Err(err) = config.reset(key) {
        eprintln!("error: {err}");
        return EXIT_USAGE;
    }
    match config.save(config_path) {
        Ok(()) => {
            match key {
                Some(key) => println!("{key} reset to default"),
                None => println!("all settings reset to defaults"),
            }
            EXIT_OK
        }
        Err(err) => {
            eprintln!("error: {err}");
            1
        }
    }
}
