mod safe_print;

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crashlog::{
    frame::FrameIssue, scan, AppHost, AppIdentity, CrashLogger, CrashSource, Fault,
    HostEnvironment, LogKind, LoggerConfig, ManualCrashSource, PanicHookSource,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

const DATA_DIR_ENV: &str = "CRASHLOG_DATA_DIR";

#[derive(Debug, Parser)]
#[command(name = "crashlog-tools", about = "Write, trim and inspect crashlog files")]
struct Cli {
    /// Instance suffix for the log file names (0 = none).
    #[arg(long, global = true, default_value_t = 0)]
    instance: u32,
    /// JSON file with truncation settings.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log directory. Falls back to $CRASHLOG_DATA_DIR, then the local data dir.
    #[arg(long, global = true)]
    dir: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Append an application message.
    Message { text: String },
    /// Append an error record.
    Error {
        text: String,
        #[arg(long)]
        data: Option<String>,
    },
    /// Panic on a worker thread with the panic hook bound.
    Panic { text: String },
    /// Run one truncation pass now.
    Truncate {
        #[arg(long)]
        max_lines: Option<usize>,
    },
    /// Count records and report framing problems.
    Check {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Serialize)]
struct FileReport {
    path: PathBuf,
    exists: bool,
    lines: usize,
    records: usize,
    issues: Vec<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(p) => LoggerConfig::load(p)?,
        None => LoggerConfig::default(),
    };
    let host = app_host(cli.dir.clone());

    match cli.cmd {
        Cmd::Message { text } => {
            let logger = open_logger(config, host, Arc::new(ManualCrashSource::new()), cli.instance)?;
            logger.append_message(&text);
            print_path(&logger, LogKind::Messages);
        }
        Cmd::Error { text, data } => {
            let logger = open_logger(config, host, Arc::new(ManualCrashSource::new()), cli.instance)?;
            logger.append_error(&Fault::capture(text), data.as_deref());
            print_path(&logger, LogKind::Errors);
        }
        Cmd::Panic { text } => {
            let logger = open_logger(config, host, Arc::new(PanicHookSource::new()), cli.instance)?;
            logger.on_crash(|| crate::safe_eprintln!("crash callback: worker is going down"));
            logger.on_crash_data(|args| {
                args.additional_data
                    .push(serde_json::json!({ "reported_by": "crashlog-tools" }));
                crate::safe_eprintln!(
                    "crash data: sender={:?} terminating={} message={}",
                    args.sender,
                    args.is_terminating,
                    args.fault
                );
            });
            let worker = thread::Builder::new()
                .name("crash-worker".to_string())
                .spawn(move || {
                    panic!("{text}");
                })
                .context("spawn worker failed")?;
            let panicked = worker.join().is_err();
            println!("worker panicked: {panicked}");
            print_path(&logger, LogKind::Errors);
        }
        Cmd::Truncate { max_lines } => {
            let max_lines = max_lines.unwrap_or(config.max_lines);
            let logger = open_logger(config, host, Arc::new(ManualCrashSource::new()), cli.instance)?;
            logger.truncate(max_lines);
            if logger.failure_count() > 0 {
                anyhow::bail!("truncation failed; see warnings above");
            }
            print_path(&logger, LogKind::Messages);
            print_path(&logger, LogKind::Errors);
        }
        Cmd::Check { json } => {
            let dir = host_dir(&host)?;
            let reports: Vec<FileReport> = [LogKind::Messages, LogKind::Errors]
                .into_iter()
                .map(|kind| check_file(&crashlog::target::log_path(&dir, kind, cli.instance)))
                .collect::<Result<_>>()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                for r in &reports {
                    println!(
                        "{}: lines={} records={} issues={}",
                        r.path.display(),
                        r.lines,
                        r.records,
                        r.issues.len()
                    );
                    for i in &r.issues {
                        println!("  {i}");
                    }
                }
            }
            if reports.iter().any(|r| !r.issues.is_empty()) {
                std::process::exit(2);
            }
        }
    }
    Ok(())
}

fn app_host(dir: Option<PathBuf>) -> AppHost {
    let host = AppHost::new(AppIdentity::new(env!("CARGO_PKG_VERSION"), "crashlog-tools"));
    match dir.or_else(|| std::env::var_os(DATA_DIR_ENV).map(PathBuf::from)) {
        Some(d) => host.with_log_dir(d),
        None => host,
    }
}

fn host_dir(host: &AppHost) -> Result<PathBuf> {
    host.log_directory()
}

fn open_logger(
    config: LoggerConfig,
    host: AppHost,
    source: Arc<dyn CrashSource>,
    instance: u32,
) -> Result<CrashLogger> {
    let logger = CrashLogger::new(config, host, source);
    logger.bind(instance).context("bind logger failed")?;
    tracing::debug!(instance, max_lines = logger.config().max_lines, "logger ready");
    Ok(logger)
}

fn print_path(logger: &CrashLogger, kind: LogKind) {
    if let Some(t) = logger.paths() {
        println!("{}", t.get(kind).path.display());
    }
}

fn check_file(path: &Path) -> Result<FileReport> {
    if !path.exists() {
        return Ok(FileReport {
            path: path.to_path_buf(),
            exists: false,
            lines: 0,
            records: 0,
            issues: Vec::new(),
        });
    }
    let text =
        fs::read_to_string(path).with_context(|| format!("read {} failed", path.display()))?;
    let s = scan(&text);
    Ok(FileReport {
        path: path.to_path_buf(),
        exists: true,
        lines: text.lines().count(),
        records: s.records.len(),
        issues: s.issues.iter().map(describe_issue).collect(),
    })
}

fn describe_issue(issue: &FrameIssue) -> String {
    // Line numbers are 1-based for humans.
    match *issue {
        FrameIssue::StrayLine { line } => format!("line {}: text outside any record", line + 1),
        FrameIssue::Unterminated { line } => format!("line {}: record has no END line", line + 1),
        FrameIssue::MissingHeader { line } => format!("line {}: record has no header", line + 1),
    }
}
