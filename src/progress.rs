//! Pipeline run progress reporting.
//!
//! Reports what a run is doing (current stage, items done so far) so
//! operators see a long discovery run move. Progress goes to **stderr** so
//! stdout stays parseable: the run summary JSON is the only stdout output.

use std::io::Write;

use inkdex_core::models::Stage;

/// A single progress event for a pipeline run.
#[derive(Clone, Debug)]
pub enum RunProgressEvent {
    /// A stage started with `total` items in front of it (unknown for discovery).
    StageStarted { stage: Stage, total: Option<u64> },
    /// `done` of `total` items finished in the current stage.
    Advanced { stage: Stage, done: u64, total: u64 },
    /// A stage ended with `ok` successes and `failed` item failures.
    StageFinished { stage: Stage, ok: u64, failed: u64 },
}

/// Reports run progress. Implementations write to stderr (human or JSON).
pub trait RunProgressReporter: Send + Sync {
    fn report(&self, event: RunProgressEvent);
}

/// Human-friendly progress on stderr: "scrape  12 / 40 profiles".
pub struct StderrProgress;

fn noun(stage: Stage) -> &'static str {
    match stage {
        Stage::Discovery | Stage::Extraction => "studios",
        Stage::Scrape => "profiles",
        Stage::Ingestion => "records",
    }
}

impl RunProgressReporter for StderrProgress {
    fn report(&self, event: RunProgressEvent) {
        let line = match &event {
            RunProgressEvent::StageStarted { stage, total } => match total {
                Some(t) => format!("{}  starting  {} {}\n", stage.as_str(), format_number(*t), noun(*stage)),
                None => format!("{}  starting...\n", stage.as_str()),
            },
            RunProgressEvent::Advanced { stage, done, total } => format!(
                "{}  {} / {} {}\n",
                stage.as_str(),
                format_number(*done),
                format_number(*total),
                noun(*stage)
            ),
            RunProgressEvent::StageFinished { stage, ok, failed } => format!(
                "{}  done  {} ok, {} failed\n",
                stage.as_str(),
                format_number(*ok),
                format_number(*failed)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl RunProgressReporter for JsonProgress {
    fn report(&self, event: RunProgressEvent) {
        let obj = match &event {
            RunProgressEvent::StageStarted { stage, total } => serde_json::json!({
                "event": "stage_started",
                "stage": stage.as_str(),
                "total": total,
            }),
            RunProgressEvent::Advanced { stage, done, total } => serde_json::json!({
                "event": "progress",
                "stage": stage.as_str(),
                "n": done,
                "total": total,
            }),
            RunProgressEvent::StageFinished { stage, ok, failed } => serde_json::json!({
                "event": "stage_finished",
                "stage": stage.as_str(),
                "ok": ok,
                "failed": failed,
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

impl RunProgressReporter for NoProgress {
    fn report(&self, _event: RunProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
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

    pub fn reporter(&self) -> Box<dyn RunProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
