//! Indexing run progress reporting.
//!
//! The orchestrator persists progress on the source record; this module
//! additionally makes a run observable on the terminal during
//! `docpilot index`. Progress is emitted on **stderr** so stdout remains
//! parseable for scripts.

use std::io::Write;

/// A single progress event for an indexing run.
#[derive(Clone, Debug)]
pub enum IndexEvent {
    /// The remote file tree is being listed. Totals unknown.
    Listing { source: String },
    /// Batched fetch+chunk phase: n files processed out of total.
    Indexing {
        source: String,
        files_done: u64,
        files_total: u64,
    },
    /// Terminal state reached.
    Finished {
        source: String,
        state: String,
        chunks: u64,
    },
}

/// Reports run progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: IndexEvent);
}

/// Human-friendly progress: "index acme/docs  34 / 120 files".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: IndexEvent) {
        let line = match &event {
            IndexEvent::Listing { source } => format!("index {}  listing files...\n", source),
            IndexEvent::Indexing {
                source,
                files_done,
                files_total,
            } => format!(
                "index {}  {} / {} files\n",
                source,
                format_number(*files_done),
                format_number(*files_total)
            ),
            IndexEvent::Finished {
                source,
                state,
                chunks,
            } => format!(
                "index {}  {} ({} chunks)\n",
                source,
                state,
                format_number(*chunks)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: IndexEvent) {
        let obj = match &event {
            IndexEvent::Listing { source } => serde_json::json!({
                "event": "progress",
                "source": source,
                "phase": "listing"
            }),
            IndexEvent::Indexing {
                source,
                files_done,
                files_total,
            } => serde_json::json!({
                "event": "progress",
                "source": source,
                "phase": "indexing",
                "files_done": files_done,
                "files_total": files_total
            }),
            IndexEvent::Finished {
                source,
                state,
                chunks,
            } => serde_json::json!({
                "event": "finished",
                "source": source,
                "state": state,
                "chunks": chunks
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter for the HTTP server path, where progress is read from the
/// source record instead.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: IndexEvent) {}
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
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
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

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(1), "1");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234), "1,234");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
