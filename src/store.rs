use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::MediaItem;
use crate::error::ArchiverError;

/// Output layout: `{backup_root}/Chunk_{index}/{filename}`, one subdirectory
/// per chunk, created on demand.
#[derive(Debug, Clone)]
pub struct BackupStore {
    backup_root: Utf8PathBuf,
}

impl BackupStore {
    pub fn new(backup_root: Utf8PathBuf) -> Self {
        Self { backup_root }
    }

    pub fn backup_root(&self) -> &Utf8Path {
        &self.backup_root
    }

    pub fn chunk_dir(&self, index: u32) -> Utf8PathBuf {
        self.backup_root.join(format!("Chunk_{index}"))
    }

    pub fn ensure_chunk_dir(&self, index: u32) -> Result<Utf8PathBuf, ArchiverError> {
        let dir = self.chunk_dir(index);
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| ArchiverError::Filesystem(err.to_string()))?;
        Ok(dir)
    }

    /// Collision-safe target path inside a chunk. When the derived name is
    /// already taken by an earlier item, the item id is woven into the stem:
    /// `{stem}_{id}{ext}`. Ids are globally unique, so this always resolves.
    pub fn target_path(&self, index: u32, item: &MediaItem) -> Utf8PathBuf {
        let dir = self.chunk_dir(index);
        let filename = item.target_filename();
        let candidate = dir.join(&filename);
        if !candidate.as_std_path().exists() {
            return candidate;
        }
        let (stem, ext) = match filename.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{ext}")),
            _ => (filename.clone(), String::new()),
        };
        dir.join(format!("{stem}_{}{ext}", item.id.as_str()))
    }
}
