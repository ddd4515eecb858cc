//! Marks the triples of a dataset that a delta file makes stale.
//!
//! A [`TripleIndex`] assigns every triple of a dataset a position; the bitmap
//! gets one bit per position, set for each triple whose subject is an entity
//! recorded (changed or deleted) in the delta file. Bitmaps live in memory or
//! in a memory-mapped file laid out as an 8-byte little-endian bit count
//! followed by the bits, least significant bit first.

use crate::errors::SyncError;
use crate::snapshot::record_subject;
use anyhow::{anyhow, Context, Result};
use deltafile::DeltaFileReader;
use log::info;
use memmap2::MmapMut;
use oxigraph::model::{GraphNameRef, Triple};
use oxigraph::store::Store;
use std::fs::OpenOptions;
use std::path::Path;

const BITMAP_HEADER: usize = 8;

pub trait BitmapAccess {
    /// Number of addressable bits.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, position: u64) -> bool;

    fn set(&mut self, position: u64, value: bool) -> Result<()>;

    fn count_ones(&self) -> u64;

    /// Makes every change durable. Nothing may be set afterwards.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

fn out_of_range(position: u64, len: u64) -> anyhow::Error {
    anyhow!("bit {} out of range for a bitmap of {} bits", position, len)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InMemoryBitmap {
    words: Vec<u64>,
    bits: u64,
}

impl InMemoryBitmap {
    pub fn new(bits: u64) -> Self {
        Self {
            words: vec![0; ((bits + 63) / 64) as usize],
            bits,
        }
    }

    /// Writes the bitmap in the on-disk layout.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut disk = DiskBitmap::create(path, self.bits)?;
        for (i, word) in self.words.iter().enumerate() {
            let start = BITMAP_HEADER + i * 8;
            let end = (start + 8).min(disk.mmap.len());
            disk.mmap[start..end].copy_from_slice(&word.to_le_bytes()[..end - start]);
        }
        disk.flush()
    }
}

impl BitmapAccess for InMemoryBitmap {
    fn len(&self) -> u64 {
        self.bits
    }

    fn get(&self, position: u64) -> bool {
        position < self.bits && self.words[(position / 64) as usize] & (1 << (position % 64)) != 0
    }

    fn set(&mut self, position: u64, value: bool) -> Result<()> {
        if position >= self.bits {
            return Err(out_of_range(position, self.bits));
        }
        let word = &mut self.words[(position / 64) as usize];
        if value {
            *word |= 1 << (position % 64);
        } else {
            *word &= !(1 << (position % 64));
        }
        Ok(())
    }

    fn count_ones(&self) -> u64 {
        self.words.iter().map(|w| w.count_ones() as u64).sum()
    }
}

/// A bitmap backed by a memory-mapped file.
pub struct DiskBitmap {
    mmap: MmapMut,
    bits: u64,
}

impl DiskBitmap {
    pub fn create(path: &Path, bits: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("Failed to create bitmap {:?}", path))?;
        file.set_len(BITMAP_HEADER as u64 + ((bits + 7) / 8))?;
        // SAFETY: the file was just created and sized by us; nothing else maps it.
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        mmap[..BITMAP_HEADER].copy_from_slice(&bits.to_le_bytes());
        Ok(Self { mmap, bits })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open bitmap {:?}", path))?;
        // SAFETY: the mapping is only valid while no other process truncates the file.
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        if mmap.len() < BITMAP_HEADER {
            return Err(anyhow!("bitmap {:?} is too short", path));
        }
        let mut len = [0u8; BITMAP_HEADER];
        len.copy_from_slice(&mmap[..BITMAP_HEADER]);
        let bits = u64::from_le_bytes(len);
        if (mmap.len() - BITMAP_HEADER) as u64 != ((bits + 7) / 8) {
            return Err(anyhow!(
                "bitmap {:?} holds {} bytes for {} bits",
                path,
                mmap.len() - BITMAP_HEADER,
                bits
            ));
        }
        Ok(Self { mmap, bits })
    }

    pub fn flush(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }

    fn byte(position: u64) -> usize {
        BITMAP_HEADER + (position / 8) as usize
    }
}

impl BitmapAccess for DiskBitmap {
    fn len(&self) -> u64 {
        self.bits
    }

    fn get(&self, position: u64) -> bool {
        position < self.bits && self.mmap[Self::byte(position)] & (1 << (position % 8)) != 0
    }

    fn set(&mut self, position: u64, value: bool) -> Result<()> {
        if position >= self.bits {
            return Err(out_of_range(position, self.bits));
        }
        let byte = &mut self.mmap[Self::byte(position)];
        if value {
            *byte |= 1 << (position % 8);
        } else {
            *byte &= !(1 << (position % 8));
        }
        Ok(())
    }

    fn count_ones(&self) -> u64 {
        self.mmap[BITMAP_HEADER..]
            .iter()
            .map(|b| b.count_ones() as u64)
            .sum()
    }

    fn close(&mut self) -> Result<()> {
        self.flush()
    }
}

/// Positions of the triples of a dataset.
pub trait TripleIndex {
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Positions of every triple with `subject` (an IRI).
    fn positions_of_subject(&self, subject: &str) -> Vec<u64>;
}

/// Triples sorted by subject, predicate and object IRI strings; a triple's
/// position is its rank in that order.
#[derive(Debug, Clone, Default)]
pub struct SortedTripleIndex {
    triples: Vec<(String, Triple)>,
}

impl SortedTripleIndex {
    pub fn new(triples: impl IntoIterator<Item = Triple>) -> Self {
        let mut triples: Vec<(String, Triple)> = triples
            .into_iter()
            .map(|t| (subject_key(&t), t))
            .collect();
        triples.sort_by(|(a, ta), (b, tb)| {
            a.cmp(b)
                .then_with(|| ta.predicate.as_str().cmp(tb.predicate.as_str()))
                .then_with(|| ta.object.to_string().cmp(&tb.object.to_string()))
        });
        triples.dedup_by(|(_, a), (_, b)| a == b);
        Self { triples }
    }

    /// Indexes the default graph of a store.
    pub fn from_store(store: &Store) -> Result<Self> {
        let mut triples = Vec::new();
        for quad in store.quads_for_pattern(None, None, None, Some(GraphNameRef::DefaultGraph)) {
            let quad = quad?;
            triples.push(Triple::new(quad.subject, quad.predicate, quad.object));
        }
        Ok(Self::new(triples))
    }

    pub fn triple(&self, position: u64) -> Option<&Triple> {
        self.triples.get(position as usize).map(|(_, t)| t)
    }
}

fn subject_key(triple: &Triple) -> String {
    match &triple.subject {
        oxigraph::model::NamedOrBlankNode::NamedNode(n) => n.as_str().to_string(),
        other => other.to_string(),
    }
}

impl TripleIndex for SortedTripleIndex {
    fn len(&self) -> u64 {
        self.triples.len() as u64
    }

    fn positions_of_subject(&self, subject: &str) -> Vec<u64> {
        let start = self.triples.partition_point(|(s, _)| s.as_str() < subject);
        let end = self.triples.partition_point(|(s, _)| s.as_str() <= subject);
        (start as u64..end as u64).collect()
    }
}

/// Sets the bit of every triple whose subject is listed. Returns the number
/// of bits set.
pub fn mark_subjects<I, S>(
    index: &dyn TripleIndex,
    subjects: I,
    bitmap: &mut dyn BitmapAccess,
) -> Result<u64>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    if bitmap.len() < index.len() {
        return Err(SyncError::config(format!(
            "bitmap of {} bits is too small for {} triples",
            bitmap.len(),
            index.len()
        ))
        .into());
    }
    let mut marked = 0;
    for subject in subjects {
        for position in index.positions_of_subject(subject.as_ref()) {
            if !bitmap.get(position) {
                bitmap.set(position, true)?;
                marked += 1;
            }
        }
    }
    Ok(marked)
}

/// IRIs of every entity recorded in a delta file, changed or deleted.
pub fn recorded_subjects(path: &Path, entity_iri_prefix: &str) -> Result<Vec<String>> {
    let reader = DeltaFileReader::open(path)
        .with_context(|| format!("Failed to open delta file {:?}", path))?;
    let mut subjects = Vec::new();
    for record in reader {
        let record = record?;
        subjects.push(record_subject(&record.name, entity_iri_prefix)?);
    }
    Ok(subjects)
}

/// Marks, in `bitmap`, the triples of `index` that the delta file at `path`
/// supersedes.
pub fn compute_bitmap(
    path: &Path,
    entity_iri_prefix: &str,
    index: &dyn TripleIndex,
    bitmap: &mut dyn BitmapAccess,
) -> Result<u64> {
    let subjects = recorded_subjects(path, entity_iri_prefix)?;
    let marked = mark_subjects(index, &subjects, bitmap)?;
    info!(
        "Marked {} of {} triple(s) for {} entities",
        marked,
        index.len(),
        subjects.len()
    );
    Ok(marked)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_bits() {
        let mut bm = InMemoryBitmap::new(130);
        assert_eq!(bm.len(), 130);
        bm.set(0, true).unwrap();
        bm.set(64, true).unwrap();
        bm.set(129, true).unwrap();
        assert!(bm.set(130, true).is_err());
        assert!(bm.get(64) && !bm.get(63) && !bm.get(500));
        assert_eq!(bm.count_ones(), 3);
        bm.set(64, false).unwrap();
        assert!(!bm.get(64));
        assert_eq!(bm.count_ones(), 2);
    }

    #[test]
    fn disk_bitmap_matches_memory_layout() {
        let dir = tempfile::tempdir().unwrap();
        let mut mem = InMemoryBitmap::new(70);
        for i in [1, 9, 63, 64, 69] {
            mem.set(i, true).unwrap();
        }
        let saved = dir.path().join("saved.bits");
        mem.save(&saved).unwrap();

        let path = dir.path().join("direct.bits");
        {
            let mut disk = DiskBitmap::create(&path, 70).unwrap();
            for i in [1, 9, 63, 64, 69] {
                disk.set(i, true).unwrap();
            }
            disk.set(2, true).unwrap();
            disk.set(2, false).unwrap();
            disk.close().unwrap();
        }
        assert_eq!(std::fs::read(&saved).unwrap(), std::fs::read(&path).unwrap());
        let reopened = DiskBitmap::open(&path).unwrap();
        assert_eq!(reopened.len(), 70);
        assert_eq!(reopened.count_ones(), 5);
        assert!(reopened.get(69) && !reopened.get(68));
    }
}
