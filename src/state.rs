use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::domain::ItemId;
use crate::error::ArchiverError;

/// The sole persisted resume record. Always reflects a state that is safe to
/// resume from, never a half-completed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    /// Id of the most recently fully processed item, if any.
    #[serde(default)]
    pub last_item_id: Option<ItemId>,
    /// Chunk the next unprocessed item would be assigned to.
    pub current_chunk_index: u32,
    pub current_chunk_occupied_bytes: u64,
}

impl ProgressState {
    pub fn is_fresh(&self) -> bool {
        self.last_item_id.is_none()
    }
}

impl Default for ProgressState {
    fn default() -> Self {
        Self {
            last_item_id: None,
            current_chunk_index: 1,
            current_chunk_occupied_bytes: 0,
        }
    }
}

/// Durable key/value record of resume position and chunk state. `save` is
/// atomic with respect to process termination: a crash mid-save leaves either
/// the old record or the new one, never a torn file.
#[derive(Debug, Clone)]
pub struct ProgressStore {
    path: Utf8PathBuf,
}

impl ProgressStore {
    pub fn new(path: Utf8PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Absence of the file is the zero state, not an error. A present but
    /// unparseable file IS an error: silently restarting from scratch would
    /// re-download everything into already-written chunk directories.
    pub fn load(&self) -> Result<ProgressState, ArchiverError> {
        if !self.path.as_std_path().exists() {
            return Ok(ProgressState::default());
        }
        let content = fs::read_to_string(self.path.as_std_path())
            .map_err(|_| ArchiverError::StateRead(self.path.as_std_path().to_path_buf()))?;
        serde_json::from_str(&content).map_err(|err| ArchiverError::StateParse(err.to_string()))
    }

    pub fn save(&self, state: &ProgressState) -> Result<(), ArchiverError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| ArchiverError::StateWrite(err.to_string()))?;
        }
        let content = serde_json::to_vec_pretty(state)
            .map_err(|err| ArchiverError::StateWrite(err.to_string()))?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(tmp_path.as_std_path(), &content)
            .map_err(|err| ArchiverError::StateWrite(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), self.path.as_std_path())
            .map_err(|err| ArchiverError::StateWrite(err.to_string()))?;
        Ok(())
    }

    pub fn clear(&self) -> Result<bool, ArchiverError> {
        if !self.path.as_std_path().exists() {
            return Ok(false);
        }
        fs::remove_file(self.path.as_std_path())
            .map_err(|err| ArchiverError::Filesystem(err.to_string()))?;
        Ok(true)
    }
}
