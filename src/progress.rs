//! Analysis progress reporting.
//!
//! Reports what a run is waiting on: parse status while polling, and the
//! answer text as it streams in. Progress is emitted on **stderr** so stdout
//! stays parseable for scripts.

use std::io::Write;
use std::sync::Arc;

/// A single progress event for one analysis run.
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    /// One parse status check: `attempt` of at most `max_attempts`.
    Polling {
        file: String,
        attempt: u64,
        max_attempts: u64,
        status: String,
    },
    /// New answer text since the previous snapshot.
    AnswerDelta { file: String, text: String },
    /// The answer stream has ended.
    AnswerDone { file: String, chars: usize },
}

/// Receives progress events from the orchestrator.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr.
///
/// ```text
/// parse sales_w12.xlsx  RUNNING  (3/30)
/// ```
///
/// Answer deltas are written as they arrive, without decoration.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let text = match &event {
            ProgressEvent::Polling {
                file,
                attempt,
                max_attempts,
                status,
            } => format!(
                "parse {}  {}  ({}/{})\n",
                file, status, attempt, max_attempts
            ),
            ProgressEvent::AnswerDelta { text, .. } => text.clone(),
            ProgressEvent::AnswerDone { file, chars } => {
                format!("\n\nanswer {}  complete  {} chars\n", file, format_number(*chars as u64))
            }
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(text.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Polling {
                file,
                attempt,
                max_attempts,
                status,
            } => serde_json::json!({
                "event": "progress",
                "file": file,
                "phase": "parsing",
                "attempt": attempt,
                "max_attempts": max_attempts,
                "status": status
            }),
            ProgressEvent::AnswerDelta { file, text } => serde_json::json!({
                "event": "progress",
                "file": file,
                "phase": "answering",
                "delta": text
            }),
            ProgressEvent::AnswerDone { file, chars } => serde_json::json!({
                "event": "progress",
                "file": file,
                "phase": "answered",
                "chars": chars
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Text added by `current` relative to `previous`.
///
/// Snapshots normally extend each other; if the service rewrites earlier
/// text the whole new snapshot is treated as the delta.
pub fn answer_delta<'a>(previous: &str, current: &'a str) -> &'a str {
    current.strip_prefix(previous).unwrap_or(current)
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Arc<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn delta_is_suffix_of_growing_snapshot() {
        assert_eq!(answer_delta("", "Sales"), "Sales");
        assert_eq!(answer_delta("Sales", "Sales rose"), " rose");
        assert_eq!(answer_delta("Sales rose", "Sales rose"), "");
    }

    #[test]
    fn delta_falls_back_to_whole_snapshot_on_rewrite() {
        assert_eq!(answer_delta("Sales fell", "Sales rose"), "Sales rose");
    }
}
