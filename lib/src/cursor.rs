//! Durable record of how far the change feed has been consumed.
//!
//! The cursor file is a small JSON document:
//!
//! ```json
//! { "lastWatermark": "2024-05-01T12:00:00Z", "continuationToken": "20240501115959|2159131419" }
//! ```
//!
//! Writes go to a temporary sibling and are renamed into place, so readers see
//! either the previous cursor or the new one. The watermark never moves
//! backwards through [`CursorStore::persist`]; an explicit rewind goes through
//! [`CursorStore::reset`].

use crate::errors::SyncError;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const DEFAULT_CURSOR_FILE: &str = "changes.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Every change strictly before this instant has been applied downstream.
    #[serde(rename = "lastWatermark")]
    pub watermark: DateTime<Utc>,
    /// Token of the last feed page read. Informational; walks restart from
    /// the head of the feed.
    #[serde(
        rename = "continuationToken",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub continuation_token: Option<String>,
}

impl Cursor {
    pub fn new(watermark: DateTime<Utc>) -> Self {
        Self {
            watermark,
            continuation_token: None,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.continuation_token = token;
        self
    }
}

/// Holds the interprocess lock on a cursor file until dropped.
pub struct CursorLock {
    _file: File,
    path: PathBuf,
}

impl CursorLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Clone)]
pub struct CursorStore {
    path: PathBuf,
}

impl CursorStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    /// Takes an exclusive lock so that two updaters never share a cursor.
    pub fn lock(&self) -> Result<CursorLock> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)?;
        if let Err(e) = file.try_lock_exclusive() {
            return Err(anyhow!(
                "Could not acquire exclusive lock on {:?}: {}. Is another updater running with the same cursor?",
                lock_path,
                e
            ));
        }
        Ok(CursorLock {
            _file: file,
            path: lock_path,
        })
    }

    /// Reads the persisted cursor, if any.
    pub fn read(&self) -> Result<Option<Cursor>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open cursor file {:?}", self.path))?;
        let cursor: Cursor = serde_json::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("Failed to parse cursor file {:?}", self.path))?;
        Ok(Some(cursor))
    }

    /// Resolves the starting cursor. An explicit watermark wins and is
    /// recorded right away; otherwise the persisted one is used.
    pub fn load(&self, explicit: Option<DateTime<Utc>>) -> Result<Cursor> {
        match explicit {
            Some(watermark) => {
                let cursor = Cursor::new(watermark);
                self.reset(&cursor)?;
                Ok(cursor)
            }
            None => self.read()?.ok_or_else(|| {
                SyncError::config(format!(
                    "no watermark: pass a start date or provide the cursor file {:?}",
                    self.path
                ))
                .into()
            }),
        }
    }

    /// Atomically replaces the cursor. Refuses to move the watermark back.
    pub fn persist(&self, cursor: &Cursor) -> Result<()> {
        if let Some(previous) = self.read()? {
            if cursor.watermark < previous.watermark {
                return Err(SyncError::config(format!(
                    "refusing to move watermark back from {} to {}",
                    previous.watermark.to_rfc3339(),
                    cursor.watermark.to_rfc3339()
                ))
                .into());
            }
        }
        self.write(cursor)?;
        debug!("Cursor advanced to {}", cursor.watermark.to_rfc3339());
        Ok(())
    }

    /// Atomically replaces the cursor, including moving it backwards.
    pub fn reset(&self, cursor: &Cursor) -> Result<()> {
        self.write(cursor)?;
        info!("Cursor set to {}", cursor.watermark.to_rfc3339());
        Ok(())
    }

    fn write(&self, cursor: &Cursor) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, cursor)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to replace cursor file {:?}", self.path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn missing_cursor_without_date_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CursorStore::new(dir.path().join("changes.json"));
        let err = store.load(None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::Config(_))
        ));
    }

    #[test]
    fn explicit_date_is_recorded_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = CursorStore::new(dir.path().join("changes.json"));
        let c = store.load(Some(t(10))).unwrap();
        assert_eq!(c.watermark, t(10));
        assert_eq!(store.load(None).unwrap(), c);
    }

    #[test]
    fn watermark_never_regresses() {
        let dir = tempfile::tempdir().unwrap();
        let store = CursorStore::new(dir.path().join("changes.json"));
        store.persist(&Cursor::new(t(12))).unwrap();
        assert!(store.persist(&Cursor::new(t(11))).is_err());
        assert_eq!(store.read().unwrap().unwrap().watermark, t(12));
        store
            .persist(&Cursor::new(t(12) + Duration::seconds(1)).with_token(Some("x|1".into())))
            .unwrap();
        // an explicit rewind is allowed
        store.reset(&Cursor::new(t(1))).unwrap();
        assert_eq!(store.read().unwrap().unwrap().watermark, t(1));
    }

    #[test]
    fn file_format_uses_camel_case_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("changes.json");
        let store = CursorStore::new(&path);
        store
            .persist(&Cursor::new(t(9)).with_token(Some("20240501085959|42".into())))
            .unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw["lastWatermark"]
            .as_str()
            .unwrap()
            .starts_with("2024-05-01T09:00:00"));
        assert_eq!(raw["continuationToken"], "20240501085959|42");
        // no temporary files are left behind
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn second_lock_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = CursorStore::new(dir.path().join("changes.json"));
        let first = store.lock().unwrap();
        assert!(first.path().ends_with("changes.json.lock"));
        assert!(store.lock().is_err());
        drop(first);
        assert!(store.lock().is_ok());
    }
}
