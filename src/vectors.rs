//! Vector derived index.
//!
//! Two files in the store directory:
//!
//! - `embeddings.bin`: concatenated vectors, `dims × 8` bytes each
//!   (little-endian `f64`), no header, insertion order.
//! - `embeddings.idx`: repeated `(u32 LE id length, UTF-8 id, u64 LE offset)`
//!   entries, rewritten in full (sorted by id) on every [`VectorIndex::store`].
//!
//! Storing a vector for an id that already has one appends a new copy and
//! repoints the offset; the old bytes are never reclaimed.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::{read_lock, write_lock, Result, StoreError};

pub const DATA_FILE: &str = "embeddings.bin";
pub const INDEX_FILE: &str = "embeddings.idx";

pub struct VectorIndex {
    data_path: PathBuf,
    index_path: PathBuf,
    dims: usize,
    offsets: RwLock<BTreeMap<String, u64>>,
}

impl VectorIndex {
    /// Load the offset index for `dir`. Missing files mean an empty index.
    pub fn open(dir: &Path, dims: usize) -> Result<Self> {
        if dims == 0 {
            return Err(StoreError::InvalidInput("vector dimension must be > 0".to_string()));
        }
        let index_path = dir.join(INDEX_FILE);
        let offsets = match fs::read(&index_path) {
            Ok(bytes) => decode_index(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            data_path: dir.join(DATA_FILE),
            index_path,
            dims,
            offsets: RwLock::new(offsets),
        })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn has(&self, id: &str) -> Result<bool> {
        Ok(read_lock(&self.offsets)?.contains_key(id))
    }

    pub fn count(&self) -> Result<usize> {
        Ok(read_lock(&self.offsets)?.len())
    }

    /// How many of `ids` have a vector.
    ///
    /// Vectors left behind by deleted or redated records are not counted.
    pub fn count_of<S: AsRef<str>>(&self, ids: &[S]) -> Result<usize> {
        let offsets = read_lock(&self.offsets)?;
        Ok(ids
            .iter()
            .filter(|id| {
                let id: &str = id.as_ref();
                offsets.contains_key(id)
            })
            .count())
    }

    /// Percentage of `ids` that have a vector; 100 when `ids` is empty.
    pub fn coverage<S: AsRef<str>>(&self, ids: &[S]) -> Result<f64> {
        if ids.is_empty() {
            return Ok(100.0);
        }
        Ok(self.count_of(ids)? as f64 / ids.len() as f64 * 100.0)
    }

    pub fn store(&self, id: &str, vector: &[f64]) -> Result<()> {
        if vector.len() != self.dims {
            return Err(StoreError::DimensionMismatch {
                expected: self.dims,
                actual: vector.len(),
            });
        }

        let mut offsets = write_lock(&self.offsets)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.data_path)?;
        let offset = file.metadata()?.len();
        file.write_all(&encode_vector(vector))?;
        file.sync_data()?;

        let previous = offsets.insert(id.to_string(), offset);
        if let Err(e) = write_index(&self.index_path, &offsets) {
            // Keep memory in step with the index file still on disk.
            match previous {
                Some(old) => offsets.insert(id.to_string(), old),
                None => offsets.remove(id),
            };
            return Err(e);
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Vec<f64>> {
        let offset = *read_lock(&self.offsets)?
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let past_end = || {
            StoreError::CorruptIndex(format!(
                "offset {} for {} is past the end of {}",
                offset, id, DATA_FILE
            ))
        };
        let mut file = File::open(&self.data_path)?;
        let width = self.dims * 8;
        let len = file.metadata()?.len();
        offset
            .checked_add(width as u64)
            .filter(|&end| end <= len)
            .ok_or_else(past_end)?;

        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; width];
        file.read_exact(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => past_end(),
            _ => StoreError::Io(e),
        })?;
        Ok(decode_vector(&buf))
    }

    /// Linear cosine-similarity scan. Returns `(id, similarity)` best first.
    pub fn search(&self, query: &[f64], limit: usize) -> Result<Vec<(String, f64)>> {
        if query.len() != self.dims {
            return Err(StoreError::DimensionMismatch {
                expected: self.dims,
                actual: query.len(),
            });
        }

        let offsets = read_lock(&self.offsets)?;
        if offsets.is_empty() {
            return Ok(Vec::new());
        }
        let data = fs::read(&self.data_path)?;
        let width = self.dims * 8;

        let mut scored = Vec::with_capacity(offsets.len());
        for (id, &offset) in offsets.iter() {
            let bytes = slot(&data, offset, width).ok_or_else(|| {
                StoreError::CorruptIndex(format!(
                    "offset {} for {} is past the end of {}",
                    offset, id, DATA_FILE
                ))
            })?;
            let similarity = crate::embedding::cosine_similarity(query, &decode_vector(bytes));
            scored.push((id.clone(), similarity));
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }
}

/// The `width` bytes at `offset`, or `None` if they are not all in `data`.
fn slot(data: &[u8], offset: u64, width: usize) -> Option<&[u8]> {
    let start = usize::try_from(offset).ok()?;
    let end = start.checked_add(width)?;
    data.get(start..end)
}

fn encode_vector(vector: &[f64]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 8);
    for &v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn decode_vector(bytes: &[u8]) -> Vec<f64> {
    bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            f64::from_le_bytes(raw)
        })
        .collect()
}

fn decode_index(bytes: &[u8]) -> Result<BTreeMap<String, u64>> {
    let mut offsets = BTreeMap::new();
    let mut pos = 0usize;

    while pos < bytes.len() {
        let len_bytes = bytes
            .get(pos..pos + 4)
            .ok_or_else(|| truncated(pos))?;
        let mut raw_len = [0u8; 4];
        raw_len.copy_from_slice(len_bytes);
        let id_len = u32::from_le_bytes(raw_len) as usize;
        pos += 4;

        let id_bytes = bytes
            .get(pos..pos + id_len)
            .ok_or_else(|| truncated(pos))?;
        let id = std::str::from_utf8(id_bytes)
            .map_err(|e| StoreError::CorruptIndex(format!("id at byte {} is not UTF-8: {}", pos, e)))?
            .to_string();
        pos += id_len;

        let off_bytes = bytes
            .get(pos..pos + 8)
            .ok_or_else(|| truncated(pos))?;
        let mut raw_off = [0u8; 8];
        raw_off.copy_from_slice(off_bytes);
        pos += 8;

        offsets.insert(id, u64::from_le_bytes(raw_off));
    }

    Ok(offsets)
}

fn truncated(pos: usize) -> StoreError {
    StoreError::CorruptIndex(format!("{} truncated at byte {}", INDEX_FILE, pos))
}

fn encode_index(offsets: &BTreeMap<String, u64>) -> Vec<u8> {
    let mut buf = Vec::new();
    for (id, offset) in offsets {
        buf.extend_from_slice(&(id.len() as u32).to_le_bytes());
        buf.extend_from_slice(id.as_bytes());
        buf.extend_from_slice(&offset.to_le_bytes());
    }
    buf
}

fn write_index(path: &Path, offsets: &BTreeMap<String, u64>) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".embeddings-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(&encode_index(offsets))?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}
