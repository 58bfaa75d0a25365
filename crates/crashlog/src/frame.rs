//! Record framing shared by both log files.
//!
//! A record is written as:
//!
//! ```text
//! MESSAGE BEGIN -----...
//! <header line>
//! <body lines>
//! MESSAGE END -------...
//! <blank line>
//! ```
//!
//! Header and body text is written verbatim. Text that itself contains a line
//! starting with `MESSAGE BEGIN` will confuse the truncation boundary search;
//! nothing escapes it.

use chrono::{DateTime, Local};

use crate::crash::Fault;
use crate::host::AppIdentity;

/// The only prefix the truncation pass looks at.
pub const BEGIN_MARKER: &str = "MESSAGE BEGIN";
pub const END_MARKER: &str = "MESSAGE END";

pub const BEGIN_LINE: &str =
    "MESSAGE BEGIN ---------------------------------------------------------------------------------------------";
pub const END_LINE: &str =
    "MESSAGE END -----------------------------------------------------------------------------------------------";

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

const LABEL_WIDTH: usize = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    ApplicationMessage,
    ApplicationError,
}

impl RecordKind {
    pub fn label(self) -> &'static str {
        match self {
            RecordKind::ApplicationMessage => "Application Log",
            RecordKind::ApplicationError => "Application Error",
        }
    }
}

/// One framed entry. Built per append and thrown away once encoded.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub timestamp: DateTime<Local>,
    pub kind: RecordKind,
    /// `<version> / <title>` of the host application.
    pub origin: String,
    pub body: Vec<String>,
}

impl LogRecord {
    pub fn message(identity: &AppIdentity, message: &str) -> Self {
        Self {
            timestamp: Local::now(),
            kind: RecordKind::ApplicationMessage,
            origin: identity.origin(),
            body: vec![field("Message", message)],
        }
    }

    pub fn error(identity: &AppIdentity, fault: &Fault, additional: Option<&str>) -> Self {
        let mut body = vec![field("Error Message", &fault.message)];
        if let Some(extra) = additional {
            body.push(field("Additional data", extra));
        }
        body.push("Stack trace:".to_string());
        body.extend(fault.stack_trace.lines().map(str::to_string));
        Self {
            timestamp: Local::now(),
            kind: RecordKind::ApplicationError,
            origin: identity.origin(),
            body,
        }
    }

    pub fn header(&self) -> String {
        let ts = self.timestamp.format(TIMESTAMP_FORMAT);
        format!(
            "{label:<width$}[{ts}] ({origin})",
            label = self.kind.label(),
            width = LABEL_WIDTH,
            origin = self.origin
        )
    }

    /// Serializes the record, terminator included, ready for a single write.
    pub fn encode(&self) -> String {
        let body_len: usize = self.body.iter().map(|l| l.len() + 1).sum();
        let mut out = String::with_capacity(BEGIN_LINE.len() + END_LINE.len() + 64 + body_len);
        out.push_str(BEGIN_LINE);
        out.push('\n');
        out.push_str(&self.header());
        out.push('\n');
        for line in &self.body {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str(END_LINE);
        out.push('\n');
        out.push('\n');
        out
    }
}

/// `Label             [value]`, label padded to the shared column.
pub fn field(label: &str, value: &str) -> String {
    format!("{label:<width$}[{value}]", width = LABEL_WIDTH)
}

pub fn is_record_start(line: &str) -> bool {
    line.starts_with(BEGIN_MARKER)
}

fn is_record_end(line: &str) -> bool {
    line.starts_with(END_MARKER)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRecord {
    /// Zero-based line index of the BEGIN line.
    pub line: usize,
    pub header: String,
    pub body: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameIssue {
    /// Non-blank text outside any record.
    StrayLine { line: usize },
    /// A BEGIN line with no END before the next BEGIN or end of file.
    Unterminated { line: usize },
    /// BEGIN immediately followed by END.
    MissingHeader { line: usize },
}

#[derive(Debug, Clone, Default)]
pub struct Scan {
    pub records: Vec<DecodedRecord>,
    pub issues: Vec<FrameIssue>,
}

impl Scan {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Splits log text into records and reports anything that is not a whole
/// record. A record runs from its BEGIN line to its END line; the blank
/// terminator after END is consumed when present.
pub fn scan(text: &str) -> Scan {
    let mut out = Scan::default();
    let mut open: Option<(usize, Vec<String>)> = None;
    let mut after_end = false;

    for (idx, line) in text.lines().enumerate() {
        if is_record_start(line) {
            if let Some((start, _)) = open.take() {
                out.issues.push(FrameIssue::Unterminated { line: start });
            }
            open = Some((idx, Vec::new()));
            after_end = false;
            continue;
        }

        match open.as_mut() {
            Some((start, lines)) => {
                if is_record_end(line) {
                    let start = *start;
                    let mut lines = std::mem::take(lines);
                    open = None;
                    after_end = true;
                    if lines.is_empty() {
                        out.issues.push(FrameIssue::MissingHeader { line: start });
                        continue;
                    }
                    let header = lines.remove(0);
                    out.records.push(DecodedRecord {
                        line: start,
                        header,
                        body: lines,
                    });
                } else {
                    lines.push(line.to_string());
                }
            }
            None => {
                if line.is_empty() && after_end {
                    after_end = false;
                    continue;
                }
                if !line.trim().is_empty() {
                    out.issues.push(FrameIssue::StrayLine { line: idx });
                }
                after_end = false;
            }
        }
    }

    if let Some((start, _)) = open {
        out.issues.push(FrameIssue::Unterminated { line: start });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn identity() -> AppIdentity {
        AppIdentity::new("1.2.3", "Demo")
    }

    #[test]
    fn delimiter_lines_share_width() {
        assert_eq!(BEGIN_LINE.len(), END_LINE.len());
        assert!(BEGIN_LINE.starts_with(BEGIN_MARKER));
        assert!(END_LINE.starts_with(END_MARKER));
    }

    #[test]
    fn message_record_layout() {
        let rec = LogRecord::message(&identity(), "hello");
        let text = rec.encode();
        let lines: Vec<&str> = text.split('\n').collect();

        assert_eq!(lines[0], BEGIN_LINE);
        assert!(lines[1].starts_with("Application Log   ["));
        assert!(lines[1].ends_with("] (1.2.3 / Demo)"));
        assert_eq!(lines[2], "Message           [hello]");
        assert_eq!(lines[3], END_LINE);
        assert_eq!(lines[4], "");
        assert_eq!(lines[5], "");
        assert_eq!(lines.len(), 6);
    }

    #[test]
    fn header_timestamp_has_millis() {
        let rec = LogRecord::message(&identity(), "x");
        let header = rec.header();
        let ts = &header[header.find('[').unwrap() + 1..header.find(']').unwrap()];
        // yyyy-MM-dd HH:mm:ss.fff
        assert_eq!(ts.len(), 23);
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[10..11], " ");
        assert_eq!(&ts[19..20], ".");
        assert!(chrono::NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).is_ok());
    }

    #[test]
    fn error_record_with_additional_data() {
        let fault = Fault::new("disk on fire").with_stack_trace("at a\nat b");
        let rec = LogRecord::error(&identity(), &fault, Some("while saving"));
        assert!(rec.header().starts_with("Application Error ["));
        assert_eq!(
            rec.body,
            vec![
                "Error Message     [disk on fire]".to_string(),
                "Additional data   [while saving]".to_string(),
                "Stack trace:".to_string(),
                "at a".to_string(),
                "at b".to_string(),
            ]
        );
    }

    #[test]
    fn error_record_without_trace() {
        let rec = LogRecord::error(&identity(), &Fault::new("x"), None);
        assert_eq!(rec.body.last().map(String::as_str), Some("Stack trace:"));
        let scan = scan(&rec.encode());
        assert!(scan.is_clean());
        assert_eq!(scan.records[0].body.len(), 2);
    }

    #[test]
    fn scan_reports_torn_tail_and_stray_lines() {
        let whole = LogRecord::message(&identity(), "a").encode();
        let text = format!("garbage\n{whole}{BEGIN_LINE}\nApplication Log   [..]\n");
        let s = scan(&text);
        assert_eq!(s.records.len(), 1);
        assert_eq!(
            s.issues,
            vec![
                FrameIssue::StrayLine { line: 0 },
                FrameIssue::Unterminated { line: 6 },
            ]
        );
    }

    #[test]
    fn scan_flags_empty_frame() {
        let s = scan(&format!("{BEGIN_LINE}\n{END_LINE}\n\n"));
        assert!(s.records.is_empty());
        assert_eq!(s.issues, vec![FrameIssue::MissingHeader { line: 0 }]);
    }

    fn text_line() -> impl Strategy<Value = String> {
        prop::string::string_regex("[a-zA-Z0-9 .:/_\\-\\[\\]]{0,60}")
            .expect("valid regex")
            .prop_filter("no frame markers", |s| {
                !s.starts_with(BEGIN_MARKER) && !s.starts_with(END_MARKER)
            })
    }

    proptest! {
        #[test]
        fn records_survive_scan(
            messages in prop::collection::vec(text_line(), 1..8),
            trace in prop::collection::vec(text_line().prop_filter("non-empty", |s| !s.is_empty()), 0..5),
        ) {
            let id = identity();
            let mut text = String::new();
            let mut expected = Vec::new();
            for (i, m) in messages.iter().enumerate() {
                let rec = if i % 2 == 0 {
                    LogRecord::message(&id, m)
                } else {
                    LogRecord::error(&id, &Fault::new(m.clone()).with_stack_trace(trace.join("\n")), None)
                };
                text.push_str(&rec.encode());
                expected.push((rec.header(), rec.body.clone()));
            }

            let s = scan(&text);
            prop_assert!(s.is_clean(), "issues: {:?}", s.issues);
            prop_assert_eq!(s.records.len(), expected.len());
            for (got, (header, body)) in s.records.iter().zip(expected) {
                prop_assert_eq!(&got.header, &header);
                prop_assert_eq!(&got.body, &body);
            }
        }
    }
}
