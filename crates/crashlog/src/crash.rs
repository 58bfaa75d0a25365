//! Unhandled-failure plumbing: what a crash looks like, who gets told, and
//! where notifications come from.

use std::{
    backtrace::{Backtrace, BacktraceStatus},
    fmt,
    panic::PanicHookInfo,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, OnceLock, PoisonError,
    },
};

use serde::Serialize;
use serde_json::Value;

/// A failure worth a record in `trace_error.log`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fault {
    pub message: String,
    pub stack_trace: String,
}

impl Fault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack_trace: String::new(),
        }
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = stack_trace.into();
        self
    }

    /// Message plus a backtrace of the calling thread.
    pub fn capture(message: impl Into<String>) -> Self {
        Self::new(message).with_stack_trace(backtrace_text(&Backtrace::force_capture()))
    }

    /// Uses the whole context chain as the message, outermost first.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let message = err
            .chain()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(": ");
        Self::new(message).with_stack_trace(backtrace_text(err.backtrace()))
    }

    pub fn from_panic(info: &PanicHookInfo<'_>, backtrace: &Backtrace) -> Self {
        let payload = info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Box<dyn Any>".to_string()
        };

        let mut stack_trace = String::new();
        if let Some(loc) = info.location() {
            stack_trace.push_str(&format!("at {}:{}:{}\n", loc.file(), loc.line(), loc.column()));
        }
        stack_trace.push_str(&backtrace_text(backtrace));
        Self {
            message,
            stack_trace: stack_trace.trim_end().to_string(),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

fn backtrace_text(bt: &Backtrace) -> String {
    match bt.status() {
        BacktraceStatus::Captured => bt.to_string(),
        _ => String::new(),
    }
}

/// What the host runtime hands over when a failure goes unhandled.
#[derive(Debug, Clone)]
pub struct CrashNotice {
    pub fault: Fault,
    pub is_terminating: bool,
    /// Name of the thread (or other source) the failure came from.
    pub sender: Option<String>,
}

/// Payload for data-carrying crash callbacks. Callbacks run in registration
/// order and may push onto `additional_data` for the ones after them.
#[derive(Debug, Clone, Serialize)]
pub struct CrashEventArgs {
    pub fault: Fault,
    pub is_terminating: bool,
    pub sender: Option<String>,
    pub additional_data: Vec<Value>,
}

pub type CrashHandler = Arc<dyn Fn(CrashNotice) + Send + Sync>;
pub type CrashCallback = Arc<dyn Fn() + Send + Sync>;
pub type CrashDataCallback = Arc<dyn Fn(&mut CrashEventArgs) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Registered {
    crash: Vec<(SubscriptionId, CrashCallback)>,
    crash_data: Vec<(SubscriptionId, CrashDataCallback)>,
}

/// Application-level crash listeners owned by one logger.
#[derive(Default)]
pub struct CrashSubscriptions {
    next_id: AtomicU64,
    inner: Mutex<Registered>,
}

impl CrashSubscriptions {
    pub fn add_crash(&self, callback: impl Fn() + Send + Sync + 'static) -> SubscriptionId {
        let id = self.next_id();
        self.lock().crash.push((id, Arc::new(callback)));
        id
    }

    pub fn add_crash_data(
        &self,
        callback: impl Fn(&mut CrashEventArgs) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_id();
        self.lock().crash_data.push((id, Arc::new(callback)));
        id
    }

    /// Returns false when `id` was not registered (or already removed).
    pub fn remove(&self, id: SubscriptionId) -> bool {
        let mut reg = self.lock();
        let before = reg.crash.len() + reg.crash_data.len();
        reg.crash.retain(|(i, _)| *i != id);
        reg.crash_data.retain(|(i, _)| *i != id);
        before != reg.crash.len() + reg.crash_data.len()
    }

    pub fn len(&self) -> usize {
        let reg = self.lock();
        reg.crash.len() + reg.crash_data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// No-argument callbacks first, then data-carrying ones. The payload is
    /// only built when someone listens for it.
    pub fn dispatch(&self, notice: CrashNotice) {
        // Snapshot so callbacks may (un)subscribe without deadlocking.
        let (crash, crash_data) = {
            let reg = self.lock();
            (
                reg.crash.iter().map(|(_, c)| Arc::clone(c)).collect::<Vec<_>>(),
                reg.crash_data.iter().map(|(_, c)| Arc::clone(c)).collect::<Vec<_>>(),
            )
        };

        for cb in &crash {
            cb();
        }

        if crash_data.is_empty() {
            return;
        }
        let mut args = CrashEventArgs {
            fault: notice.fault,
            is_terminating: notice.is_terminating,
            sender: notice.sender,
            additional_data: Vec::new(),
        };
        for cb in &crash_data {
            cb(&mut args);
        }
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registered> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Where unhandled-failure notifications come from. A source delivers to at
/// most one handler at a time; `subscribe` replaces any previous handler.
pub trait CrashSource: Send + Sync {
    fn subscribe(&self, handler: CrashHandler);
    fn unsubscribe(&self);
}

/// Crash source driven by the host: call [`ManualCrashSource::raise`] from a
/// top-level `catch_unwind`, an error boundary, or a test.
#[derive(Default)]
pub struct ManualCrashSource {
    handler: Mutex<Option<CrashHandler>>,
}

impl ManualCrashSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether a handler received the notice.
    pub fn raise(&self, fault: Fault, is_terminating: bool, sender: Option<String>) -> bool {
        let handler = self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match handler {
            Some(h) => {
                h(CrashNotice {
                    fault,
                    is_terminating,
                    sender,
                });
                true
            }
            None => false,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl CrashSource for ManualCrashSource {
    fn subscribe(&self, handler: CrashHandler) {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn unsubscribe(&self) {
        self.handler.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

// Panic hook dispatch.
//
// `std::panic::set_hook` is process-wide, so every PanicHookSource shares one
// installed hook that fans out to the currently subscribed handlers and then
// runs whatever hook was installed before us.

type HookSlots = Mutex<Vec<(u64, CrashHandler)>>;

fn hook_slots() -> &'static HookSlots {
    static SLOTS: OnceLock<HookSlots> = OnceLock::new();
    SLOTS.get_or_init(|| Mutex::new(Vec::new()))
}

fn install_hook_once() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let handlers: Vec<CrashHandler> = hook_slots()
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .map(|(_, h)| Arc::clone(h))
                .collect();

            if !handlers.is_empty() {
                let bt = Backtrace::force_capture();
                let fault = Fault::from_panic(info, &bt);
                let current = std::thread::current();
                let sender = current.name().map(str::to_string);
                let is_terminating = sender.as_deref() == Some("main");
                for h in handlers {
                    h(CrashNotice {
                        fault: fault.clone(),
                        is_terminating,
                        sender: sender.clone(),
                    });
                }
            }

            previous(info);
        }));
    });
}

/// Crash source backed by the Rust panic hook.
///
/// A panic on the `main` thread is reported as terminating; the sender is the
/// panicking thread's name. The previously installed hook still runs after
/// the handlers, so default panic output is kept.
pub struct PanicHookSource {
    id: u64,
}

impl PanicHookSource {
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self {
            id: NEXT.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl Default for PanicHookSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CrashSource for PanicHookSource {
    fn subscribe(&self, handler: CrashHandler) {
        install_hook_once();
        let mut slots = hook_slots().lock().unwrap_or_else(PoisonError::into_inner);
        slots.retain(|(id, _)| *id != self.id);
        slots.push((self.id, handler));
    }

    fn unsubscribe(&self) {
        hook_slots()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(id, _)| *id != self.id);
    }
}

impl Drop for PanicHookSource {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
