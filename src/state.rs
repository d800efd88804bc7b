use crate::error::{Result, ShowError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

const STATE_DIR: &str = "showrunner";
const STATE_FILE: &str = "state.json";

/// The only thing remembered between runs: the last accepted base path.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_base_path: Option<PathBuf>,
}

/// A `ShowState` bound to the file it is persisted in.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    pub state: ShowState,
}

impl StateStore {
    /// Default location under the user's config directory, falling back to
    /// the working directory when there is none.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join(STATE_DIR))
            .unwrap_or_else(|| PathBuf::from("."))
            .join(STATE_FILE)
    }

    /// Load state from `path`, or start fresh if it is missing or corrupt.
    pub fn load(path: &Path) -> Self {
        let mut state = ShowState::default();
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(data) => match serde_json::from_str(&data) {
                    Ok(s) => state = s,
                    Err(e) => warn!("corrupt state file {}, starting fresh: {}", path.display(), e),
                },
                Err(e) => warn!("could not read state file {}: {}", path.display(), e),
            }
        }
        StateStore {
            path: path.to_path_buf(),
            state,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist current state to JSON.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| ShowError::State(format!("create {}: {}", parent.display(), e)))?;
            }
        }
        let json = serde_json::to_string_pretty(&self.state)
            .map_err(|e| ShowError::State(format!("serialize: {}", e)))?;
        fs::write(&self.path, json)
            .map_err(|e| ShowError::State(format!("write {}: {}", self.path.display(), e)))?;
        Ok(())
    }

    pub fn last_base_path(&self) -> Option<&Path> {
        self.state.last_base_path.as_deref()
    }

    pub fn remember_base_path(&mut self, base: &Path) -> Result<()> {
        self.state.last_base_path = Some(base.to_path_buf());
        self.save()
    }
}
