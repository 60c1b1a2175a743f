//! Append-only JSON-lines journal of sandbox deltas.
//!
//! One line per closed sandbox session. The journal is an audit trail and
//! is never read back by the engine.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::snapshot::{DeltaKind, DeltaRow};
use crate::error::Result;
use crate::types::SessionId;

/// Journal operation, derived from the delta row kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalOp {
    /// Something appeared.
    Add,
    /// Something went away.
    Remove,
    /// Something changed in place.
    Modify,
}

impl From<DeltaKind> for JournalOp {
    fn from(kind: DeltaKind) -> Self {
        match kind {
            DeltaKind::ComponentAdded | DeltaKind::TechOpened | DeltaKind::EntityCreated => Self::Add,
            DeltaKind::ComponentRemoved | DeltaKind::EntityRemoved => Self::Remove,
            DeltaKind::ComponentChanged | DeltaKind::EntityPrefabChanged => Self::Modify,
        }
    }
}

/// One change inside a [`JournalEntry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEvent {
    /// Add, remove or modify.
    pub op: JournalOp,
    /// Row kind the event came from.
    pub kind: DeltaKind,
    /// Component key, tech name or entity key.
    pub key: String,
    /// Value before.
    pub before: String,
    /// Value after.
    pub after: String,
}

/// One journal line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// When the entry was written.
    pub at: DateTime<Utc>,
    /// Sandbox session the delta belongs to.
    pub session_id: SessionId,
    /// Snapshot correlation id.
    pub snapshot_id: String,
    /// Store key of the player.
    pub player_key: String,
    /// Zone left.
    pub zone_id: String,
    /// Changes, in delta order.
    pub events: Vec<JournalEvent>,
}

impl JournalEntry {
    /// Build an entry from delta rows.
    #[must_use]
    pub fn from_delta(session_id: SessionId, player_key: &str, zone_id: &str, snapshot_id: &str, delta: &[DeltaRow]) -> Self {
        Self {
            at: Utc::now(),
            session_id,
            snapshot_id: snapshot_id.to_string(),
            player_key: player_key.to_string(),
            zone_id: zone_id.to_string(),
            events: delta
                .iter()
                .map(|r| JournalEvent {
                    op: r.row_type.into(),
                    kind: r.row_type,
                    key: r.key.clone(),
                    before: r.before.clone(),
                    after: r.after.clone(),
                })
                .collect(),
        }
    }
}

/// Appends [`JournalEntry`] lines to a file.
#[derive(Debug, Clone)]
pub struct ProgressionJournal {
    path: PathBuf,
}

impl ProgressionJournal {
    /// Journal writing to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File the journal appends to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry, creating the file and its directories if needed.
    ///
    /// # Errors
    /// I/O and serialization failures.
    pub fn append(&self, entry: &JournalEntry) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        debug!(
            path = %self.path.display(),
            snapshot_id = %entry.snapshot_id,
            events = entry.events.len(),
            "Journal entry appended"
        );
        Ok(())
    }
}
