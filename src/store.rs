//! Persistence collaborators: jump history and key/value settings.
//!
//! The engine never touches storage; the session hands finished results to a
//! [`JumpStore`] and restores/persists the scale factor through a
//! [`SettingsStore`]. [`MemoryStore`] implements both for tests and replay.

use std::collections::BTreeMap;

use crate::error::StoreError;
use crate::modes::ModeKind;
use crate::result::JumpResult;

/// Store-assigned jump identifier. Stable for the life of the record.
pub type JumpId = u64;

/// A persisted jump and its id.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StoredJump {
    pub id: JumpId,
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub result: JumpResult,
}

/// Jump history.
pub trait JumpStore {
    /// Persist a result and return its new id.
    fn save_jump(&mut self, result: &JumpResult) -> Result<JumpId, StoreError>;

    /// Up to `limit` jumps, newest first.
    fn load_history(&self, limit: usize) -> Result<Vec<StoredJump>, StoreError>;

    /// Remove one jump. Fails with [`StoreError::NotFound`] for unknown ids.
    fn delete_jump(&mut self, id: JumpId) -> Result<(), StoreError>;

    /// Remove all jumps. Settings are untouched.
    fn clear(&mut self) -> Result<(), StoreError>;

    /// Up to `limit` jumps recorded in `mode`, newest first.
    fn history_for_mode(&self, mode: ModeKind, limit: usize) -> Result<Vec<StoredJump>, StoreError> {
        let mut all = self.load_history(usize::MAX)?;
        all.retain(|j| j.result.mode == mode);
        all.truncate(limit);
        Ok(all)
    }
}

/// String key/value settings (e.g. `raw_per_kg`).
pub trait SettingsStore {
    fn load_setting(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn save_setting(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// In-process store. Ids start at 1 and are never reused, even after `clear`.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    next_id: JumpId,
    jumps: Vec<StoredJump>,
    settings: BTreeMap<String, String>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            jumps: Vec::new(),
            settings: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.jumps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jumps.is_empty()
    }
}

impl JumpStore for MemoryStore {
    fn save_jump(&mut self, result: &JumpResult) -> Result<JumpId, StoreError> {
        let id = self.next_id;
        self.next_id += 1;
        self.jumps.push(StoredJump {
            id,
            result: result.clone(),
        });
        Ok(id)
    }

    fn load_history(&self, limit: usize) -> Result<Vec<StoredJump>, StoreError> {
        // Insertion order is id order.
        Ok(self.jumps.iter().rev().take(limit).cloned().collect())
    }

    fn delete_jump(&mut self, id: JumpId) -> Result<(), StoreError> {
        let pos = self
            .jumps
            .iter()
            .position(|j| j.id == id)
            .ok_or(StoreError::NotFound { id })?;
        self.jumps.remove(pos);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.jumps.clear();
        Ok(())
    }
}

impl SettingsStore for MemoryStore {
    fn load_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.settings.get(key).cloned())
    }

    fn save_setting(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.settings.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
