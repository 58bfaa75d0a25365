use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
};

use anyhow::{Context, Result};

use crate::frame::LogRecord;
use crate::target::{LogKind, LogTargets};

/// Open append handles for one logger's two files. Only ever touched while
/// the logger's state lock is held.
#[derive(Debug, Default)]
pub struct LogStreams {
    messages: Option<File>,
    errors: Option<File>,
}

impl LogStreams {
    /// Opens whichever handles are missing. Already open handles are kept.
    pub fn open_missing(&mut self, targets: &LogTargets) -> Result<()> {
        if self.errors.is_none() {
            self.errors = Some(open_append(&targets.errors.path)?);
        }
        if self.messages.is_none() {
            self.messages = Some(open_append(&targets.messages.path)?);
        }
        Ok(())
    }

    pub fn close(&mut self) {
        self.errors = None;
        self.messages = None;
    }

    pub fn is_open(&self) -> bool {
        self.messages.is_some() && self.errors.is_some()
    }

    /// Writes the whole record in one call and flushes before returning.
    pub fn append(&mut self, kind: LogKind, record: &LogRecord) -> Result<()> {
        let file = match kind {
            LogKind::Messages => self.messages.as_mut(),
            LogKind::Errors => self.errors.as_mut(),
        }
        .with_context(|| format!("{} is not open", kind.base_name()))?;

        file.write_all(record.encode().as_bytes())
            .with_context(|| format!("write {} failed", kind.base_name()))?;
        file.flush()
            .with_context(|| format!("flush {} failed", kind.base_name()))?;
        Ok(())
    }
}

// std opens files with read/write/delete sharing on Windows, so other tools
// can tail the logs while they are held open here.
fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log failed: {}", path.display()))
}
