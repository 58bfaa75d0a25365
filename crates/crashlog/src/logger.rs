//! The logger handle: bind/unbind, appends, truncation passes and the
//! background thread that schedules them.
//!
//! Lock order is `lifecycle` then `state`. The truncation thread and the
//! append paths only ever take `state`, so `unbind` can join the thread while
//! holding `lifecycle`.

use std::{
    cell::Cell,
    fs,
    ops::{Deref, DerefMut},
    sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError, Weak},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{Context, Result};

use crate::config::LoggerConfig;
use crate::crash::{
    CrashEventArgs, CrashHandler, CrashNotice, CrashSource, CrashSubscriptions, Fault,
    SubscriptionId,
};
use crate::diagnostics::{Diagnostics, FailureCallback, FailureOp, LogFailure};
use crate::frame::LogRecord;
use crate::host::{AppIdentity, HostEnvironment};
use crate::target::{LogKind, LogTarget, LogTargets};
use crate::truncate::{plan_truncate, Plan, Rewrite, TruncateOutcome};
use crate::writer::LogStreams;

/// Process-local crash and message logger.
///
/// Appends never fail from the caller's point of view and are no-ops while
/// unbound. Dropping the handle unbinds it.
pub struct CrashLogger {
    shared: Arc<Shared>,
}

struct Shared {
    config: LoggerConfig,
    host: Box<dyn HostEnvironment>,
    source: Arc<dyn CrashSource>,
    state: Mutex<LoggerState>,
    lifecycle: Mutex<Option<TruncationLoop>>,
    subscriptions: CrashSubscriptions,
    diagnostics: Diagnostics,
}

// Handles are open iff `bound`, except inside a truncation pass (which holds
// the lock throughout) or after a reopen failure (the next append retries).
#[derive(Default)]
struct LoggerState {
    bound: bool,
    targets: Option<LogTargets>,
    identity: Option<AppIdentity>,
    streams: LogStreams,
    crash_handler: Option<CrashHandler>,
}

thread_local! {
    // Set while this thread holds the state lock. A panic raised in that
    // window reaches the crash handler on the same thread; taking the lock
    // again there would deadlock.
    static HOLDING_STATE: Cell<bool> = const { Cell::new(false) };
}

struct StateGuard<'a> {
    inner: MutexGuard<'a, LoggerState>,
}

impl Deref for StateGuard<'_> {
    type Target = LoggerState;
    fn deref(&self) -> &LoggerState {
        &self.inner
    }
}

impl DerefMut for StateGuard<'_> {
    fn deref_mut(&mut self) -> &mut LoggerState {
        &mut self.inner
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        HOLDING_STATE.with(|h| h.set(false));
    }
}

impl CrashLogger {
    pub fn new(
        config: LoggerConfig,
        host: impl HostEnvironment + 'static,
        source: Arc<dyn CrashSource>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                host: Box::new(host),
                source,
                state: Mutex::new(LoggerState::default()),
                lifecycle: Mutex::new(None),
                subscriptions: CrashSubscriptions::default(),
                diagnostics: Diagnostics::default(),
            }),
        }
    }

    /// Opens both log files, subscribes to the crash source and starts the
    /// truncation thread. Does nothing when already bound. On error the
    /// logger stays unbound.
    pub fn bind(&self, instance_suffix: u32) -> Result<()> {
        let shared = &self.shared;
        let mut running = shared.lock_lifecycle();
        if running.is_some() {
            return Ok(());
        }

        let dir = shared
            .host
            .log_directory()
            .context("resolve log directory failed")?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("create log dir failed: {}", dir.display()))?;
        let targets = LogTargets::new(&dir, instance_suffix);

        let mut streams = LogStreams::default();
        streams.open_missing(&targets)?;

        let handler = crash_handler(Arc::downgrade(shared));
        *shared.lock_state_plain() = LoggerState {
            bound: true,
            targets: Some(targets),
            identity: Some(shared.host.identity()),
            streams,
            crash_handler: Some(Arc::clone(&handler)),
        };
        shared.source.subscribe(handler);

        match TruncationLoop::spawn(Arc::downgrade(shared), &shared.config) {
            Ok(looper) => *running = Some(looper),
            Err(e) => {
                *shared.lock_state_plain() = LoggerState::default();
                shared.source.unsubscribe();
                return Err(e);
            }
        }

        tracing::info!(dir = %dir.display(), instance_suffix, "crashlog bound");
        Ok(())
    }

    /// Stops the truncation thread (waiting for it), unsubscribes from the
    /// crash source and closes the files. Safe to call any number of times.
    pub fn unbind(&self) {
        let shared = &self.shared;
        let mut running = shared.lock_lifecycle();
        let Some(looper) = running.take() else {
            return;
        };
        drop(looper);
        // Reset before unsubscribing: a truncation pass that starts after this
        // sees an unbound logger and cannot resubscribe the handler.
        let old = std::mem::take(&mut *shared.lock_state_plain());
        shared.source.unsubscribe();
        drop(old);
        tracing::info!("crashlog unbound");
    }

    pub fn is_bound(&self) -> bool {
        self.shared.lock_state_plain().bound
    }

    pub fn instance_suffix(&self) -> Option<u32> {
        self.paths().map(|t| t.messages.instance_suffix)
    }

    pub fn paths(&self) -> Option<LogTargets> {
        self.shared.lock_state_plain().targets.clone()
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.shared.config
    }

    /// Appends an `Application Log` record to `app_messages.log`.
    pub fn append_message(&self, message: &str) {
        self.shared
            .append(LogKind::Messages, |id| LogRecord::message(id, message));
    }

    /// Appends an `Application Error` record to `trace_error.log`.
    pub fn append_error(&self, fault: &Fault, additional: Option<&str>) {
        self.shared.append_error(fault, additional);
    }

    pub fn append_anyhow(&self, err: &anyhow::Error, additional: Option<&str>) {
        self.shared.append_error(&Fault::from_anyhow(err), additional);
    }

    /// Runs one truncation pass over both files right now.
    pub fn truncate(&self, max_lines: usize) {
        self.shared.truncate(max_lines);
    }

    /// Entry point for hosts that detect unhandled failures themselves.
    pub fn handle_crash(&self, notice: CrashNotice) {
        self.shared.handle_crash(notice);
    }

    pub fn on_crash(&self, callback: impl Fn() + Send + Sync + 'static) -> SubscriptionId {
        self.shared.subscriptions.add_crash(callback)
    }

    pub fn on_crash_data(
        &self,
        callback: impl Fn(&mut CrashEventArgs) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.shared.subscriptions.add_crash_data(callback)
    }

    pub fn remove_subscription(&self, id: SubscriptionId) -> bool {
        self.shared.subscriptions.remove(id)
    }

    /// Called for every swallowed failure, outside the logger's lock.
    pub fn on_failure(&self, callback: impl Fn(&LogFailure) + Send + Sync + 'static) {
        let cb: FailureCallback = Arc::new(callback);
        self.shared.diagnostics.set_callback(Some(cb));
    }

    pub fn failure_count(&self) -> u64 {
        self.shared.diagnostics.failure_count()
    }
}

impl Drop for CrashLogger {
    fn drop(&mut self) {
        self.unbind();
    }
}

fn crash_handler(shared: Weak<Shared>) -> CrashHandler {
    Arc::new(move |notice: CrashNotice| {
        if let Some(shared) = shared.upgrade() {
            shared.handle_crash(notice);
        }
    })
}

impl Shared {
    fn lock_lifecycle(&self) -> MutexGuard<'_, Option<TruncationLoop>> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_state_plain(&self) -> MutexGuard<'_, LoggerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `None` when this thread already holds the state lock.
    fn enter(&self) -> Option<StateGuard<'_>> {
        if HOLDING_STATE.with(Cell::get) {
            return None;
        }
        let inner = self.lock_state_plain();
        HOLDING_STATE.with(|h| h.set(true));
        Some(StateGuard { inner })
    }

    fn append(&self, kind: LogKind, build: impl FnOnce(&AppIdentity) -> LogRecord) {
        let failure = {
            let Some(mut guard) = self.enter() else {
                return;
            };
            let st = &mut *guard;
            if !st.bound {
                return;
            }
            let (Some(targets), Some(identity)) = (st.targets.as_ref(), st.identity.as_ref()) else {
                return;
            };
            let record = build(identity);
            let res = st
                .streams
                .open_missing(targets)
                .and_then(|()| st.streams.append(kind, &record));
            res.err().map(|e| {
                LogFailure::new(FailureOp::Append, Some(targets.get(kind).path.clone()), &e)
            })
        };
        if let Some(f) = failure {
            self.diagnostics.report(f);
        }
    }

    fn append_error(&self, fault: &Fault, additional: Option<&str>) {
        self.append(LogKind::Errors, |id| LogRecord::error(id, fault, additional));
    }

    fn handle_crash(&self, notice: CrashNotice) {
        self.append_error(&notice.fault, None);
        self.subscriptions.dispatch(notice);
    }

    fn truncate(&self, max_lines: usize) {
        let mut failures = Vec::new();
        {
            let Some(mut guard) = self.enter() else {
                return;
            };
            let st = &mut *guard;
            if !st.bound {
                return;
            }
            let Some(targets) = st.targets.clone() else {
                return;
            };

            st.streams.close();

            if let Err(f) = truncate_target(&targets.messages, max_lines, Rewrite::apply) {
                failures.push(f);
            }

            // The crash path writes to this file; keep it away while it is
            // rewritten. Crashes in this window are not recorded.
            let handler = st.crash_handler.clone();
            let res = truncate_target(&targets.errors, max_lines, |rw| {
                self.source.unsubscribe();
                let res = rw.apply();
                if let Some(handler) = handler {
                    self.source.subscribe(handler);
                }
                res
            });
            if let Err(f) = res {
                failures.push(f);
            }

            if let Err(e) = st.streams.open_missing(&targets) {
                failures.push(LogFailure::new(FailureOp::Reopen, None, &e));
            }
        }
        for f in failures {
            self.diagnostics.report(f);
        }
    }
}

fn truncate_target(
    target: &LogTarget,
    max_lines: usize,
    rewrite: impl FnOnce(Rewrite) -> Result<TruncateOutcome>,
) -> Result<(), LogFailure> {
    let outcome = plan_truncate(&target.path, max_lines).and_then(|plan| match plan {
        Plan::Untouched { lines } => Ok(TruncateOutcome::Untouched { lines }),
        Plan::Rewrite(rw) => rewrite(rw),
    });
    match outcome {
        Ok(TruncateOutcome::Rewritten { before, after }) => {
            tracing::debug!(path = %target.path.display(), before, after, "log truncated");
            Ok(())
        }
        Ok(TruncateOutcome::Untouched { .. }) => Ok(()),
        Err(e) => Err(LogFailure::new(
            FailureOp::Truncate,
            Some(target.path.clone()),
            &e,
        )),
    }
}

/// Background thread scheduling truncation passes. Dropping it signals the
/// thread and waits for it to exit.
struct TruncationLoop {
    stop_tx: mpsc::Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl TruncationLoop {
    fn spawn(shared: Weak<Shared>, config: &LoggerConfig) -> Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let tick = config.tick();
        let ticks_per_pass = config.ticks_per_pass();
        let max_lines = config.max_lines;
        let join = thread::Builder::new()
            .name("crashlog-truncation".to_string())
            .spawn(move || run_truncation_loop(shared, stop_rx, tick, ticks_per_pass, max_lines))
            .context("spawn truncation thread failed")?;
        Ok(Self {
            stop_tx,
            join: Some(join),
        })
    }
}

impl Drop for TruncationLoop {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(join) = self.join.take() {
            // Unbinding from a callback running on the loop thread itself.
            if join.thread().id() == thread::current().id() {
                return;
            }
            let _ = join.join();
        }
    }
}

fn run_truncation_loop(
    shared: Weak<Shared>,
    stop_rx: mpsc::Receiver<()>,
    tick: Duration,
    ticks_per_pass: u32,
    max_lines: usize,
) {
    let mut ticks = 0u32;
    loop {
        match stop_rx.recv_timeout(tick) {
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
        ticks += 1;
        if ticks < ticks_per_pass {
            continue;
        }
        ticks = 0;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.truncate(max_lines);
    }
    tracing::debug!("truncation loop stopped");
}
