use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ArchiverError;

/// Opaque identifier assigned by the catalog service. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ItemId {
    type Err = ArchiverError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ArchiverError::InvalidConfig(
                "item id must not be empty".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// One catalog entry to be archived. Immutable once read; the engine never
/// mutates catalog state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: ItemId,
    pub size_bytes: u64,
    pub display_name: String,
    pub original_path: String,
    pub created_at: DateTime<Utc>,
}

impl MediaItem {
    /// Extension of the original storage path, without the dot.
    pub fn extension(&self) -> Option<&str> {
        let name = self
            .original_path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.original_path);
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext),
            _ => None,
        }
    }

    /// Target file name: the display name, with the original path's extension
    /// appended unless the display name already ends with it
    /// (case-insensitive). Falls back to the id when the name is blank.
    pub fn target_filename(&self) -> String {
        let base = if self.display_name.trim().is_empty() {
            self.id.as_str()
        } else {
            self.display_name.trim()
        };
        match self.extension() {
            Some(ext) => {
                let suffix = format!(".{ext}");
                if base.to_lowercase().ends_with(&suffix.to_lowercase()) {
                    base.to_string()
                } else {
                    format!("{base}{suffix}")
                }
            }
            None => base.to_string(),
        }
    }
}

/// A capacity-bounded destination unit ("DVD").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// 1-based ordinal; monotonically increasing, never reused or merged.
    pub index: u32,
    pub capacity_bytes: u64,
    pub occupied_bytes: u64,
}

impl Chunk {
    pub fn new(index: u32, capacity_bytes: u64) -> Self {
        Self {
            index,
            capacity_bytes,
            occupied_bytes: 0,
        }
    }

    pub fn remaining_bytes(&self) -> u64 {
        self.capacity_bytes.saturating_sub(self.occupied_bytes)
    }
}

pub fn format_bytes(size: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = size as f64;
    for unit in UNITS {
        if value < 1024.0 {
            return format!("{value:.2} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.2} PB")
}
