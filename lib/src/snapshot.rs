//! Delta file production and consumption.
//!
//! A snapshot stores the raw entity documents of every entity changed in a
//! window, one record per entity named `<id>.ttl`; entities that no longer
//! exist get an empty record.

use crate::changes::{ChangeEntry, Discovery};
use crate::config::FetchConfig;
use crate::errors::SyncError;
use crate::fetch::{EntityFetcher, PageSource};
use crate::progress::ProgressObserver;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use deltafile::{DeltaFileReader, Header};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotReport {
    pub path: PathBuf,
    pub records: u64,
    pub deleted: u64,
}

pub fn record_name(entry: &ChangeEntry) -> String {
    format!("{}.ttl", entry.id)
}

/// IRI of the entity a record name stands for. Names must be UTF-8.
pub fn record_subject(name: &[u8], entity_iri_prefix: &str) -> Result<String> {
    let name = std::str::from_utf8(name).map_err(|_| {
        anyhow!(
            "record name {:?} is not UTF-8",
            String::from_utf8_lossy(name)
        )
    })?;
    let id = name.strip_suffix(".ttl").unwrap_or(name);
    Ok(format!("{}{}", entity_iri_prefix, id))
}

fn micros(instant: DateTime<Utc>) -> Result<u64> {
    u64::try_from(instant.timestamp_micros()).map_err(|_| {
        SyncError::config(format!("{} is before the Unix epoch", instant.to_rfc3339())).into()
    })
}

/// Header describing the window `[watermark, now]`; the range runs backwards
/// from the newest instant.
pub fn snapshot_header(
    url_count: u64,
    watermark: DateTime<Utc>,
    now: DateTime<Utc>,
    fetch: &FetchConfig,
) -> Result<Header> {
    Ok(Header {
        url_count,
        range_start: micros(now)?,
        range_end: micros(watermark)?,
        flavor: fetch.flavor.into(),
    })
}

/// Downloads the documents of every discovered entity into a new delta file
/// at `path`. A partially written file is removed on failure.
pub fn write_snapshot(
    path: &Path,
    discovery: &Discovery,
    watermark: DateTime<Utc>,
    fetch: &FetchConfig,
    source: &dyn PageSource,
    observer: &dyn ProgressObserver,
) -> Result<SnapshotReport> {
    let entities = discovery.entities();
    let header = snapshot_header(
        entities.len() as u64,
        watermark,
        discovery.cursor.watermark,
        fetch,
    )?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let result = fill_snapshot(path, &header, &entities, fetch, source, observer);
    if result.is_err() && path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("Could not remove partial delta file {:?}: {}", path, e);
        }
    }
    result
}

fn fill_snapshot(
    path: &Path,
    header: &Header,
    entities: &[ChangeEntry],
    fetch: &FetchConfig,
    source: &dyn PageSource,
    observer: &dyn ProgressObserver,
) -> Result<SnapshotReport> {
    let writer = deltafile::create_file(path, header)
        .with_context(|| format!("Failed to create delta file {:?}", path))?;
    let writer = Mutex::new(writer);
    let deleted = AtomicU64::new(0);
    let fetcher = EntityFetcher::new(source, fetch)?;
    fetcher.fetch_each(entities, observer, |entry, document| {
        let content = document.unwrap_or_default();
        let mut writer = writer.lock().map_err(|_| anyhow!("delta file writer poisoned"))?;
        writer.add_record(record_name(entry).as_bytes(), content)?;
        if content.is_empty() {
            deleted.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    })?;
    let writer = writer
        .into_inner()
        .map_err(|_| anyhow!("delta file writer poisoned"))?;
    let records = writer.records_written();
    writer.finish()?;
    let deleted = deleted.into_inner();
    info!(
        "Wrote {} record(s) ({} deleted) to {:?}",
        records, deleted, path
    );
    Ok(SnapshotReport {
        path: path.to_path_buf(),
        records,
        deleted,
    })
}

/// IRIs of the entities a delta file records as deleted.
pub fn deleted_subjects(path: &Path, entity_iri_prefix: &str) -> Result<Vec<String>> {
    let reader = DeltaFileReader::open(path)
        .with_context(|| format!("Failed to open delta file {:?}", path))?;
    let mut subjects = Vec::new();
    for record in reader {
        let record = record?;
        if !record.is_deletion() {
            continue;
        }
        subjects.push(record_subject(&record.name, entity_iri_prefix)?);
    }
    Ok(subjects)
}
