//! Scan progress reporting.
//!
//! Reports which stage a scan is in and how many documents it has finished,
//! so `sentinel scan` on a large workspace does not look hung. Progress goes
//! to **stderr** so stdout (the alert listing) remains parseable.

use std::fmt;
use std::io::Write;

/// Stages of one scan cycle, in execution order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScanStage {
    /// Listing documents and their permissions.
    Permissions,
    /// Walking tables and rows.
    Rows,
    /// Exporting page HTML.
    PageHtml,
    /// Reading structured page content.
    PageContent,
}

impl ScanStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStage::Permissions => "permissions",
            ScanStage::Rows => "rows",
            ScanStage::PageHtml => "page-html",
            ScanStage::PageContent => "page-content",
        }
    }
}

impl fmt::Display for ScanStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single progress event for a scan.
#[derive(Clone, Debug)]
pub enum ScanProgressEvent {
    /// `n` of `total` documents finished for `stage`.
    Stage {
        stage: ScanStage,
        n: u64,
        total: u64,
    },
    /// The scan ended.
    Finished { alerts: u64, fetch_failures: u64 },
}

/// Receives progress events from the scanner.
pub trait ScanProgressReporter: Send + Sync {
    fn report(&self, event: ScanProgressEvent);
}

/// Human-friendly progress on stderr: "scan rows  12 / 1,024 documents".
pub struct StderrProgress;

impl ScanProgressReporter for StderrProgress {
    fn report(&self, event: ScanProgressEvent) {
        let line = match &event {
            ScanProgressEvent::Stage { stage, n, total } => format!(
                "scan {}  {} / {} documents\n",
                stage,
                format_number(*n),
                format_number(*total)
            ),
            ScanProgressEvent::Finished {
                alerts,
                fetch_failures,
            } => format!(
                "scan done  {} alerts, {} fetch failures\n",
                format_number(*alerts),
                format_number(*fetch_failures)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ScanProgressReporter for JsonProgress {
    fn report(&self, event: ScanProgressEvent) {
        let obj = match &event {
            ScanProgressEvent::Stage { stage, n, total } => serde_json::json!({
                "event": "progress",
                "stage": stage.as_str(),
                "n": n,
                "total": total
            }),
            ScanProgressEvent::Finished {
                alerts,
                fetch_failures,
            } => serde_json::json!({
                "event": "finished",
                "alerts": alerts,
                "fetch_failures": fetch_failures
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

impl ScanProgressReporter for NoProgress {
    fn report(&self, _event: ScanProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
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

    pub fn reporter(&self) -> Box<dyn ScanProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
