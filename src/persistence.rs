//! Append-only JSON Lines files.
//!
//! Both the indexed-set log and the result log are written through here.
//! Each record is serialized to one line and appended with a single write,
//! then flushed to disk, so a crash leaves at worst one torn trailing line.
//! Readers skip lines that do not parse.

use crate::error::{EvalError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Create the parent directory of `path` if it is missing.
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| EvalError::io(parent, e))?;
        }
    }
    Ok(())
}

/// Append one record as a JSON line.
pub fn append_jsonl<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    ensure_parent_dir(path)?;

    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .map_err(|e| EvalError::io(path, e))?;

    // Terminate a torn tail first so it cannot swallow this record
    let mut line = String::new();
    if !ends_with_newline(&mut file).map_err(|e| EvalError::io(path, e))? {
        line.push('\n');
    }
    line.push_str(&serde_json::to_string(record)?);
    line.push('\n');

    file.write_all(line.as_bytes())
        .map_err(|e| EvalError::io(path, e))?;
    file.sync_data().map_err(|e| EvalError::io(path, e))?;

    Ok(())
}

fn ends_with_newline(file: &mut File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Read every parseable record. A missing file reads as empty.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path).map_err(|e| EvalError::io(path, e))?;
    let mut records = Vec::new();

    for (line_num, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(
                path = %path.display(),
                line = line_num + 1,
                error = %e,
                "skipping unreadable log line"
            ),
        }
    }

    Ok(records)
}
