use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOp {
    Append,
    Truncate,
    Reopen,
}

impl FailureOp {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureOp::Append => "append",
            FailureOp::Truncate => "truncate",
            FailureOp::Reopen => "reopen",
        }
    }
}

/// A logging failure that was swallowed instead of returned.
#[derive(Debug, Clone)]
pub struct LogFailure {
    pub op: FailureOp,
    pub path: Option<PathBuf>,
    pub error: String,
}

impl LogFailure {
    pub fn new(op: FailureOp, path: Option<PathBuf>, err: &anyhow::Error) -> Self {
        Self {
            op,
            path,
            error: format!("{err:#}"),
        }
    }
}

pub type FailureCallback = Arc<dyn Fn(&LogFailure) + Send + Sync>;

/// Counts swallowed failures and forwards them to an optional callback.
#[derive(Default)]
pub struct Diagnostics {
    failures: AtomicU64,
    callback: Mutex<Option<FailureCallback>>,
}

impl Diagnostics {
    pub fn set_callback(&self, callback: Option<FailureCallback>) {
        *self.callback.lock().unwrap_or_else(PoisonError::into_inner) = callback;
    }

    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Must not be called with the logger state lock held: the callback may
    /// log through the same logger.
    pub fn report(&self, failure: LogFailure) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            op = failure.op.as_str(),
            path = ?failure.path,
            error = %failure.error,
            "crashlog operation failed"
        );
        let cb = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(cb) = cb {
            cb(&failure);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_counts_and_forwards() {
        let d = Diagnostics::default();
        d.report(LogFailure::new(FailureOp::Append, None, &anyhow::anyhow!("first")));
        assert_eq!(d.failure_count(), 1);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        d.set_callback(Some(Arc::new(move |f: &LogFailure| {
            s.lock().unwrap().push((f.op, f.error.clone()));
        })));
        let err = anyhow::anyhow!("denied").context("rewrite log failed");
        d.report(LogFailure::new(
            FailureOp::Truncate,
            Some(PathBuf::from("x.log")),
            &err,
        ));

        assert_eq!(d.failure_count(), 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(FailureOp::Truncate, "rewrite log failed: denied".to_string())]
        );
    }
}
