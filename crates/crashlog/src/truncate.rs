//! Size bounding for the log files.
//!
//! A pass keeps the tail of a file: it drops lines from the front until fewer
//! than `max_lines` remain, then keeps dropping until the file starts on a
//! record boundary. Callers must make sure nothing holds the file open for
//! writing while a pass runs.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

use crate::frame::is_record_start;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncateOutcome {
    Untouched { lines: usize },
    Rewritten { before: usize, after: usize },
}

/// Index of the first line to keep, or `None` when the input is within bounds.
pub fn trim_lines(lines: &[&str], max_lines: usize) -> Option<usize> {
    if lines.len() <= max_lines {
        return None;
    }
    // Strictly below the limit.
    let mut start = lines.len() - max_lines.saturating_sub(1);
    while start < lines.len() && !is_record_start(lines[start]) {
        start += 1;
    }
    Some(start)
}

/// Contents a pass decided to write back, not yet written.
#[derive(Debug)]
pub struct Rewrite {
    path: PathBuf,
    before: usize,
    after: usize,
    contents: String,
}

impl Rewrite {
    pub fn apply(self) -> Result<TruncateOutcome> {
        fs::write(&self.path, self.contents)
            .with_context(|| format!("rewrite log failed: {}", self.path.display()))?;
        Ok(TruncateOutcome::Rewritten {
            before: self.before,
            after: self.after,
        })
    }
}

#[derive(Debug)]
pub enum Plan {
    Untouched { lines: usize },
    Rewrite(Rewrite),
}

/// Reads the file and works out the rewrite without touching the file.
///
/// Bytes that are not valid UTF-8 (a record torn mid-character, another
/// writer) are replaced rather than failing the pass, so the file stays
/// bounded.
pub fn plan_truncate(path: &Path, max_lines: usize) -> Result<Plan> {
    let bytes = fs::read(path).with_context(|| format!("read log failed: {}", path.display()))?;
    let text = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = text.lines().collect();

    let Some(start) = trim_lines(&lines, max_lines) else {
        return Ok(Plan::Untouched { lines: lines.len() });
    };

    let kept = &lines[start..];
    let mut contents = String::with_capacity(text.len());
    for line in kept {
        contents.push_str(line);
        contents.push('\n');
    }
    Ok(Plan::Rewrite(Rewrite {
        path: path.to_path_buf(),
        before: lines.len(),
        after: kept.len(),
        contents,
    }))
}

pub fn truncate_file(path: &Path, max_lines: usize) -> Result<TruncateOutcome> {
    match plan_truncate(path, max_lines)? {
        Plan::Untouched { lines } => Ok(TruncateOutcome::Untouched { lines }),
        Plan::Rewrite(rw) => rw.apply(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{scan, LogRecord, BEGIN_LINE};
    use crate::host::AppIdentity;

    fn write_records(path: &Path, count: usize) -> String {
        let id = AppIdentity::new("1.0", "Trunc");
        let mut text = String::new();
        for i in 0..count {
            text.push_str(&LogRecord::message(&id, &format!("record {i}")).encode());
        }
        fs::write(path, &text).unwrap();
        text
    }

    #[test]
    fn within_limit_is_untouched() {
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join("app_messages.log");
        let original = write_records(&p, 3);

        assert_eq!(
            truncate_file(&p, 15).unwrap(),
            TruncateOutcome::Untouched { lines: 15 }
        );
        assert_eq!(fs::read_to_string(&p).unwrap(), original);
    }

    #[test]
    fn trims_to_record_boundary() {
        let lines = ["tail", "", BEGIN_LINE, "h", "b", "MESSAGE END", ""];
        // 7 lines, limit 6: dropping two leaves five, starting on BEGIN.
        assert_eq!(trim_lines(&lines, 6), Some(2));
        assert_eq!(trim_lines(&lines, 7), None);
    }

    #[test]
    fn trim_skips_partial_record_at_the_cut() {
        let lines = [BEGIN_LINE, "h1", "b1", "MESSAGE END", "", BEGIN_LINE, "h2"];
        // Cut lands on "b1"; the next boundary is index 5.
        assert_eq!(trim_lines(&lines, 6), Some(5));
    }

    #[test]
    fn trim_without_any_boundary_empties_the_file() {
        let lines = ["a", "b", "c"];
        assert_eq!(trim_lines(&lines, 2), Some(3));
    }

    #[test]
    fn zero_limit_drops_everything() {
        let lines = [BEGIN_LINE, "h"];
        assert_eq!(trim_lines(&lines, 0), Some(2));
    }

    #[test]
    fn rewritten_file_is_bounded_and_whole() {
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join("trace_error.log");
        // 5 lines per record.
        let original = write_records(&p, 2010);
        let last_before = scan(&original).records.last().cloned().unwrap();

        let outcome = truncate_file(&p, 10_000).unwrap();
        let TruncateOutcome::Rewritten { before, after } = outcome else {
            panic!("expected rewrite, got {outcome:?}");
        };
        assert_eq!(before, 10_050);
        assert!(after >= 1 && after <= 9_999, "after={after}");

        let text = fs::read_to_string(&p).unwrap();
        assert_eq!(text.lines().count(), after);
        assert!(text.starts_with(BEGIN_LINE));

        let s = scan(&text);
        assert!(s.is_clean(), "issues: {:?}", s.issues);
        let last_after = s.records.last().unwrap();
        assert_eq!(last_after.header, last_before.header);
        assert_eq!(last_after.body, last_before.body);
    }

    #[test]
    fn invalid_utf8_does_not_block_truncation() {
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join("trace_error.log");
        let mut bytes = format!("{BEGIN_LINE}\nheader\nMessage           [caf").into_bytes();
        // First byte of a two-byte sequence, then the writer died.
        bytes.extend_from_slice(b"\xC3\n");
        let id = AppIdentity::new("1.0", "Trunc");
        for i in 0..100 {
            bytes.extend_from_slice(LogRecord::message(&id, &format!("r{i}")).encode().as_bytes());
        }
        fs::write(&p, &bytes).unwrap();

        let outcome = truncate_file(&p, 50).unwrap();
        assert!(matches!(outcome, TruncateOutcome::Rewritten { .. }), "{outcome:?}");
        let text = fs::read_to_string(&p).unwrap();
        assert!(text.lines().count() <= 50);
        assert!(text.starts_with(BEGIN_LINE));
        assert_eq!(scan(&text).records.last().unwrap().body[0], "Message           [r99]");
    }

    #[test]
    fn plan_leaves_the_file_alone() {
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join("app_messages.log");
        let original = write_records(&p, 10);

        let Plan::Rewrite(rw) = plan_truncate(&p, 20).unwrap() else {
            panic!("expected a rewrite");
        };
        assert_eq!(fs::read_to_string(&p).unwrap(), original);
        assert!(matches!(rw.apply().unwrap(), TruncateOutcome::Rewritten { before: 50, .. }));
        assert!(fs::read_to_string(&p).unwrap().lines().count() <= 20);
    }

    #[test]
    fn missing_file_is_an_error() {
        let td = tempfile::tempdir().unwrap();
        assert!(truncate_file(&td.path().join("absent.log"), 10).is_err());
    }
}
