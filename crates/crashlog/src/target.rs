use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogKind {
    /// `app_messages.log`
    Messages,
    /// `trace_error.log`
    Errors,
}

impl LogKind {
    pub fn base_name(self) -> &'static str {
        match self {
            LogKind::Messages => "app_messages.log",
            LogKind::Errors => "trace_error.log",
        }
    }
}

/// File name for a log kind; a non-zero instance suffix is appended verbatim.
pub fn log_file_name(kind: LogKind, instance_suffix: u32) -> String {
    if instance_suffix > 0 {
        format!("{}{instance_suffix}", kind.base_name())
    } else {
        kind.base_name().to_string()
    }
}

pub fn log_path(dir: &Path, kind: LogKind, instance_suffix: u32) -> PathBuf {
    dir.join(log_file_name(kind, instance_suffix))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTarget {
    pub kind: LogKind,
    pub instance_suffix: u32,
    pub path: PathBuf,
}

impl LogTarget {
    pub fn new(dir: &Path, kind: LogKind, instance_suffix: u32) -> Self {
        Self {
            kind,
            instance_suffix,
            path: log_path(dir, kind, instance_suffix),
        }
    }
}

/// Both targets of one bound logger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTargets {
    pub messages: LogTarget,
    pub errors: LogTarget,
}

impl LogTargets {
    pub fn new(dir: &Path, instance_suffix: u32) -> Self {
        Self {
            messages: LogTarget::new(dir, LogKind::Messages, instance_suffix),
            errors: LogTarget::new(dir, LogKind::Errors, instance_suffix),
        }
    }

    pub fn get(&self, kind: LogKind) -> &LogTarget {
        match kind {
            LogKind::Messages => &self.messages,
            LogKind::Errors => &self.errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_zero_means_no_suffix() {
        assert_eq!(log_file_name(LogKind::Messages, 0), "app_messages.log");
        assert_eq!(log_file_name(LogKind::Errors, 0), "trace_error.log");
    }

    #[test]
    fn suffix_is_appended_without_separator() {
        assert_eq!(log_file_name(LogKind::Errors, 2), "trace_error.log2");
        assert_eq!(log_file_name(LogKind::Messages, 13), "app_messages.log13");
    }

    #[test]
    fn targets_share_dir_and_suffix() {
        let t = LogTargets::new(Path::new("/logs"), 4);
        assert_eq!(t.messages.path, PathBuf::from("/logs/app_messages.log4"));
        assert_eq!(t.get(LogKind::Errors).path, PathBuf::from("/logs/trace_error.log4"));
        assert_eq!(t.errors.instance_suffix, 4);
    }
}
