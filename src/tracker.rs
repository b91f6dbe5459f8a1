//! Checkpoint of documents already pushed to the remote index.

use crate::error::Result;
use crate::membership::{CompositeKey, MembershipEncoding};
use crate::persistence::{append_jsonl, ensure_parent_dir, read_jsonl};
use crate::sync::UploadMode;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// One line of the indexed-set log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedRecord {
    /// `{category}_{document_id}`.
    pub file_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    /// Number of remote documents the upload produced (1, or the page count).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<usize>,
    /// Upload mode the remote documents were built with. Lines written
    /// before this was tracked read as the default.
    #[serde(default)]
    pub mode: UploadMode,
    /// Metadata encoding the remote documents carry.
    #[serde(default)]
    pub encoding: MembershipEncoding,
}

impl IndexedRecord {
    /// Whether the remote copy can serve searches made with `mode` and `encoding`.
    pub fn matches(&self, mode: UploadMode, encoding: MembershipEncoding) -> bool {
        self.mode == mode && self.encoding == encoding
    }
}

/// Append-only log of indexed composite keys.
#[derive(Debug, Clone)]
pub struct IndexedSetTracker {
    path: PathBuf,
}

impl IndexedSetTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of every recorded `file_id`.
    ///
    /// Also prepares the log directory so a later [`record`](Self::record)
    /// does not fail on a fresh checkout.
    pub fn load(&self) -> Result<HashSet<String>> {
        Ok(self.latest()?.into_keys().collect())
    }

    /// The last record of every `file_id`; a later upload replaces the
    /// remote copy, so it is the one that counts.
    pub fn latest(&self) -> Result<HashMap<String, IndexedRecord>> {
        ensure_parent_dir(&self.path)?;
        let records: Vec<IndexedRecord> = read_jsonl(&self.path)?;
        Ok(records
            .into_iter()
            .map(|r| (r.file_id.clone(), r))
            .collect())
    }

    /// Mark `key` as indexed with the given upload settings.
    pub fn record(
        &self,
        key: &CompositeKey,
        collection: &str,
        units: usize,
        mode: UploadMode,
        encoding: MembershipEncoding,
    ) -> Result<()> {
        append_jsonl(
            &self.path,
            &IndexedRecord {
                file_id: key.file_id(),
                collection: Some(collection.to_string()),
                units: Some(units),
                mode,
                encoding,
            },
        )
    }
}
