//! Durable session state: the training step and each annotator's cost
//! parameters. Histories and estimator weights are not stored here.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cost::CostParams;
use crate::persist::{write_json_atomic, FileLock};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse session state: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(rename = "step", default)]
    pub train_step: u64,
    #[serde(default)]
    pub models: BTreeMap<String, CostParams>,
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when no state has been written yet.
    pub fn load(&self) -> Result<Option<SessionState>, SessionError> {
        let _lock = FileLock::acquire(&self.path)?;
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state: SessionState = serde_json::from_str(&raw)?;
        Ok(Some(state))
    }

    /// Missing or unreadable state is logged and replaced by a fresh session.
    pub fn load_or_default(&self) -> SessionState {
        match self.load() {
            Ok(Some(state)) => {
                info!(
                    path = %self.path.display(),
                    train_step = state.train_step,
                    annotators = state.models.len(),
                    "session state loaded"
                );
                state
            }
            Ok(None) => {
                info!(path = %self.path.display(), "no session state found; starting fresh");
                SessionState::default()
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to load session state; starting fresh");
                SessionState::default()
            }
        }
    }

    /// Replace the stored state atomically. On error the previous file is
    /// left as it was.
    pub fn save(&self, state: &SessionState) -> Result<(), SessionError> {
        let _lock = FileLock::acquire(&self.path)?;
        write_json_atomic(&self.path, state)?;
        Ok(())
    }
}
