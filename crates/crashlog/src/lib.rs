//! Process-local crash and event logger.
//!
//! Application messages go to `app_messages.log`, unhandled failures to
//! `trace_error.log`, both as framed text records. A background thread keeps
//! the files bounded by cutting whole records off the front.
//!
//! ```no_run
//! use std::sync::Arc;
//! use crashlog::{AppHost, AppIdentity, CrashLogger, LoggerConfig, PanicHookSource};
//!
//! let host = AppHost::new(AppIdentity::new(env!("CARGO_PKG_VERSION"), "My App"));
//! let logger = CrashLogger::new(LoggerConfig::default(), host, Arc::new(PanicHookSource::new()));
//! logger.bind(0)?;
//! logger.append_message("started");
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod config;
pub mod crash;
pub mod diagnostics;
pub mod frame;
pub mod host;
pub mod logger;
pub mod target;
pub mod truncate;
pub mod writer;

pub use config::LoggerConfig;
pub use crash::{
    CrashEventArgs, CrashNotice, CrashSource, Fault, ManualCrashSource, PanicHookSource,
    SubscriptionId,
};
pub use diagnostics::{FailureOp, LogFailure};
pub use frame::{scan, FrameIssue, Scan};
pub use host::{AppHost, AppIdentity, HostEnvironment};
pub use logger::CrashLogger;
pub use target::{LogKind, LogTarget, LogTargets};
