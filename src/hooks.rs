//! Post-append notification sinks.
//!
//! [`crate::log_store::LogStore`] calls a [`Notifier`] after every successful
//! append, outside its lock, and discards whatever error comes back. The only
//! sink shipped here is [`SynthesisHooks`], which counts records since the last
//! synthesis and, once `threshold` is reached, either writes
//! `synthesis_needed.json` or runs a script with a request file.
//!
//! State lives next to the log:
//!
//! | File | Contents |
//! |------|----------|
//! | `hook_state.json` | last synthesis time and record count |
//! | `synthesis_needed.json` | pending [`SynthesisRequest`] (action `file`) |

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use crate::config::HooksConfig;
use crate::models::Record;

pub const HOOK_STATE_FILE: &str = "hook_state.json";
pub const SYNTHESIS_FILE: &str = "synthesis_needed.json";
const SCRIPT_REQUEST_FILE: &str = "synthesis_request.json";

/// Receives every newly appended record together with the full record set.
pub trait Notifier: Send + Sync {
    fn on_record_added(&self, record: &Record, all: &[Record]) -> anyhow::Result<()>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct HookState {
    #[serde(default)]
    pub last_synthesis_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_synthesis_count: usize,
    #[serde(default)]
    pub total_records: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub triggered_at: DateTime<Utc>,
    pub records_since_last: usize,
    pub total_records: usize,
    pub recent_records: Vec<Record>,
    pub synthesis_prompt: String,
}

#[derive(Debug)]
pub struct HookStatus {
    pub enabled: bool,
    pub threshold: usize,
    pub action: String,
    pub state: HookState,
    pub pending: Option<SynthesisRequest>,
}

impl HookStatus {
    pub fn records_since_last(&self) -> usize {
        self.state
            .total_records
            .saturating_sub(self.state.last_synthesis_count)
    }
}

pub struct SynthesisHooks {
    dir: PathBuf,
    config: HooksConfig,
    guard: Mutex<()>,
}

impl SynthesisHooks {
    pub fn new(dir: impl Into<PathBuf>, config: HooksConfig) -> Self {
        Self {
            dir: dir.into(),
            config,
            guard: Mutex::new(()),
        }
    }

    pub fn status(&self) -> Result<HookStatus> {
        Ok(HookStatus {
            enabled: self.config.enabled,
            threshold: self.config.threshold,
            action: self.config.action.clone(),
            state: load_state(&self.dir)?,
            pending: pending_request(&self.dir)?,
        })
    }

    fn trigger(&self, state: &mut HookState, all: &[Record]) -> Result<()> {
        let since_last = state.total_records.saturating_sub(state.last_synthesis_count);
        let recent: Vec<Record> = match state.last_synthesis_at {
            Some(at) => all.iter().filter(|r| r.created_at > at).cloned().collect(),
            None => all.to_vec(),
        };

        let request = SynthesisRequest {
            triggered_at: Utc::now(),
            records_since_last: since_last,
            total_records: state.total_records,
            synthesis_prompt: synthesis_prompt(&recent),
            recent_records: recent,
        };

        match self.config.action.as_str() {
            "script" => self.run_script(&request)?,
            _ => write_json(&self.dir.join(SYNTHESIS_FILE), &request)?,
        }

        state.last_synthesis_at = Some(Utc::now());
        state.last_synthesis_count = state.total_records;
        tracing::debug!(since_last, "synthesis triggered");
        Ok(())
    }

    fn run_script(&self, request: &SynthesisRequest) -> Result<()> {
        let script = self
            .config
            .script
            .as_ref()
            .context("hooks.script is not configured")?;

        let request_path = self.dir.join(SCRIPT_REQUEST_FILE);
        write_json(&request_path, request)?;

        let output = Command::new(script)
            .arg(&request_path)
            .current_dir(&self.dir)
            .output()
            .with_context(|| format!("Failed to run hook script: {}", script.display()))?;

        let _ = std::fs::remove_file(&request_path);

        if !output.status.success() {
            bail!(
                "hook script exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

impl Notifier for SynthesisHooks {
    fn on_record_added(&self, _record: &Record, all: &[Record]) -> anyhow::Result<()> {
        let _guard = self
            .guard
            .lock()
            .map_err(|_| anyhow::anyhow!("hook state lock poisoned"))?;

        let mut state = load_state(&self.dir)?;
        state.total_records = all.len();

        if self.config.enabled {
            let threshold = self.config.threshold.max(1);
            let since_last = state.total_records.saturating_sub(state.last_synthesis_count);
            if since_last >= threshold {
                self.trigger(&mut state, all)
                    .context("synthesis hook failed")?;
            }
        }

        write_json(&self.dir.join(HOOK_STATE_FILE), &state)
    }
}

pub fn load_state(dir: &Path) -> Result<HookState> {
    let path = dir.join(HOOK_STATE_FILE);
    match std::fs::read_to_string(&path) {
        Ok(text) => serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HookState::default()),
        Err(e) => Err(e.into()),
    }
}

/// The synthesis request waiting to be processed, if any.
pub fn pending_request(dir: &Path) -> Result<Option<SynthesisRequest>> {
    let path = dir.join(SYNTHESIS_FILE);
    match std::fs::read_to_string(&path) {
        Ok(text) => Ok(Some(serde_json::from_str(&text).with_context(|| {
            format!("Failed to parse {}", path.display())
        })?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Remove `synthesis_needed.json`. Returns whether a request was pending.
pub fn clear_pending(dir: &Path) -> Result<bool> {
    match std::fs::remove_file(dir.join(SYNTHESIS_FILE)) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_string_pretty(value)?;
    std::fs::write(path, data).with_context(|| format!("Failed to write {}", path.display()))
}

fn synthesis_prompt(recent: &[Record]) -> String {
    let lines: Vec<String> = recent
        .iter()
        .map(|r| {
            format!(
                "- [{}] {}: {}",
                r.id,
                r.provenance.label,
                truncate_chars(&r.content, 100)
            )
        })
        .collect();

    format!(
        "{} new entries since the last synthesis.\n\n\
         ENTRIES:\n{}\n\n\
         Group related entries into themes, point out entries that should link to \
         each other, and list open loops that need a follow-up.",
        recent.len(),
        lines.join("\n")
    )
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", cut)
}
