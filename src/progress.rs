//! Ingest, harvest, and embed progress reporting.
//!
//! Reports observable progress during `rfx ingest` and `rfx harvest` so users
//! see what is being scanned, how many files or chunks remain, and when the
//! index is up to date. Progress is emitted on **stderr** so stdout remains
//! parseable for scripts.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// Walking the input paths. Total unknown.
    Scanning,
    /// Ingest phase: n files processed out of total.
    Ingesting { n: u64, total: u64, path: String },
    /// Harvest phase: chunk n of total for one document.
    Harvesting { document: String, chunk: u64, chunks: u64 },
    /// Embedding backlog: n items embedded out of total.
    Embedding { n: u64, total: u64 },
}

/// Reports pipeline progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "ingest  1,234 / 5,000 files".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Scanning => "ingest  scanning...\n".to_string(),
            ProgressEvent::Ingesting { n, total, path } => {
                format!(
                    "ingest  {} / {} files  {}\n",
                    format_number(*n),
                    format_number(*total),
                    path
                )
            }
            // One \r-refreshed line per document; the final chunk ends it.
            ProgressEvent::Harvesting { document, chunk, chunks } => {
                let pct = if *chunks == 0 { 100 } else { chunk * 100 / chunks };
                let eol = if chunk >= chunks { "\n" } else { "" };
                format!("\rharvest {}  chunk {} / {} ({}%){}", document, chunk, chunks, pct, eol)
            }
            ProgressEvent::Embedding { n, total } => {
                format!("embed  {} / {} items\n", format_number(*n), format_number(*total))
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Scanning => serde_json::json!({
                "event": "progress",
                "phase": "scanning"
            }),
            ProgressEvent::Ingesting { n, total, path } => serde_json::json!({
                "event": "progress",
                "phase": "ingesting",
                "n": n,
                "total": total,
                "path": path
            }),
            ProgressEvent::Harvesting { document, chunk, chunks } => serde_json::json!({
                "event": "progress",
                "phase": "harvesting",
                "document": document,
                "chunk": chunk,
                "chunks": chunks
            }),
            ProgressEvent::Embedding { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "embedding",
                "n": n,
                "total": total
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

    /// Resolve a `--progress` flag value.
    pub fn from_flag(flag: &str) -> anyhow::Result<Self> {
        match flag {
            "auto" => Ok(Self::default_for_tty()),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            "off" => Ok(ProgressMode::Off),
            other => anyhow::bail!(
                "Unknown progress mode: {}. Use auto, human, json, or off.",
                other
            ),
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
