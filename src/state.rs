// ABOUTME: Persists the watermark of the last completed synchronisation
// ABOUTME: Decides whether the local mirror is stale enough to need another run

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::feed::Watermark;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct AppState {
    /// Start time of the last run that completed. `None` until one has.
    pub last_update: Option<Watermark>,
}

impl AppState {
    /// Watermark to synchronise from; the epoch requests everything.
    pub fn since(&self) -> Watermark {
        self.last_update.unwrap_or_default()
    }

    pub fn is_update_due(&self, now: Watermark, period: Duration) -> bool {
        match self.last_update {
            None => true,
            Some(last) => {
                let elapsed = now.as_millis().saturating_sub(last.as_millis());
                let period = i64::try_from(period.as_millis()).unwrap_or(i64::MAX);
                elapsed >= period
            }
        }
    }
}

pub fn default_state_path() -> Result<PathBuf> {
    Ok(crate::config::app_dir()?.join("state.json"))
}

pub fn load_from(path: &Path) -> Result<AppState> {
    if !path.exists() {
        return Ok(AppState::default());
    }
    let state_file = fs::File::open(path)
        .with_context(|| format!("Failed to open state file {}", path.display()))?;
    let state = serde_json::from_reader(state_file)
        .with_context(|| format!("Failed to parse state file {}", path.display()))?;
    Ok(state)
}

pub fn save_to(path: &Path, state: &AppState) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let state_file = fs::File::create(path)
        .with_context(|| format!("Failed to write state file {}", path.display()))?;
    serde_json::to_writer_pretty(state_file, state)?;
    Ok(())
}

pub fn load() -> Result<AppState> {
    load_from(&default_state_path()?)
}

pub fn save(state: &AppState) -> Result<()> {
    save_to(&default_state_path()?, state)
}
