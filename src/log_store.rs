//! Canonical log store.
//!
//! The log is a UTF-8 file with one JSON [`Record`] per line. Appends go to
//! the end of the file and are fsynced before returning. Updates and deletes
//! rewrite the whole file into a temp file in the same directory and rename
//! it over the original, so the canonical file is never observed truncated.
//!
//! # Locking
//!
//! One `RwLock` per store serializes `append`, `update`, `delete`, and
//! `redate` against each other and against bulk reads. [`LogStore::append_new`]
//! computes the next sequence number and writes the record under a single
//! exclusive acquisition, so "compute sequence" and "write record" are one
//! atomic unit per writer. The lock is in-process only; a second process
//! writing the same directory is protected by the rename-based rewrite alone.
//!
//! # Retired ids
//!
//! Ids removed by `delete` or replaced by a date change are appended to
//! `retired.jsonl`. Sequence allocation treats them as taken, so an id is never
//! handed out twice within one store.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::config::{StoreConfig, LOG_FILE};
use crate::error::{read_lock, write_lock, Result, StoreError};
use crate::hooks::Notifier;
use crate::models::{format_id, id_sequence, NewRecord, Record, SearchResult};

/// Ledger of ids that may not be allocated again.
pub const RETIRED_FILE: &str = "retired.jsonl";

/// Result cap applied when a caller passes `max_results <= 0`.
pub const DEFAULT_MAX_RESULTS: usize = 20;

/// Records grouped by how they changed since a point in time.
#[derive(Debug, Default, Clone)]
pub struct Changes {
    /// Created at or after the cutoff.
    pub new: Vec<Record>,
    /// Created before the cutoff, updated at or after it.
    pub modified: Vec<Record>,
    /// Updated at or after the cutoff and carrying at least one link.
    pub linked: Vec<Record>,
}

pub struct LogStore {
    dir: PathBuf,
    path: PathBuf,
    retired_path: PathBuf,
    id_prefix: String,
    lock: RwLock<()>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl LogStore {
    /// Open (creating the directory if needed) the store described by `config`.
    ///
    /// A missing log file is an empty store, not an error.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.dir)?;
        Ok(Self {
            dir: config.dir.clone(),
            path: config.dir.join(LOG_FILE),
            retired_path: config.dir.join(RETIRED_FILE),
            id_prefix: config.id_prefix.clone(),
            lock: RwLock::new(()),
            notifier: None,
        })
    }

    /// Attach the sink notified after every successful append.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn id_prefix(&self) -> &str {
        &self.id_prefix
    }

    /// Append a record whose id and timestamps were assigned by the caller.
    ///
    /// Rejects ids that are live or retired.
    pub fn append(&self, record: Record) -> Result<()> {
        validate(&record)?;

        let all = {
            let _guard = write_lock(&self.lock)?;
            let mut records = self.read_unlocked()?;
            if records.iter().any(|r| r.id == record.id)
                || self.retired_unlocked()?.contains(&record.id)
            {
                return Err(StoreError::DuplicateId(record.id));
            }
            self.write_lines_unlocked(std::slice::from_ref(&record))?;
            records.push(record.clone());
            records
        };

        self.notify(&record, &all);
        Ok(())
    }

    /// Allocate an id for `draft` and append it, atomically.
    pub fn append_new(&self, draft: NewRecord) -> Result<Record> {
        let now = Utc::now();
        let date = draft.created_at.unwrap_or(now).date_naive();

        let (record, all) = {
            let _guard = write_lock(&self.lock)?;
            let mut records = self.read_unlocked()?;
            let retired = self.retired_unlocked()?;
            let seq = next_sequence_in(&self.id_prefix, date, &records, &retired);
            let record = draft.into_record(format_id(&self.id_prefix, date, seq), now);
            validate(&record)?;
            self.write_lines_unlocked(std::slice::from_ref(&record))?;
            records.push(record.clone());
            (record, records)
        };

        self.notify(&record, &all);
        Ok(record)
    }

    /// Append many caller-identified records with one open and one fsync.
    ///
    /// All ids are checked before anything is written. The notification sink
    /// is not invoked.
    pub fn append_bulk(&self, batch: &[Record]) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        for record in batch {
            validate(record)?;
        }

        let _guard = write_lock(&self.lock)?;
        let records = self.read_unlocked()?;
        let mut taken: HashSet<String> = self.retired_unlocked()?;
        taken.extend(records.into_iter().map(|r| r.id));
        for record in batch {
            if !taken.insert(record.id.clone()) {
                return Err(StoreError::DuplicateId(record.id.clone()));
            }
        }

        self.write_lines_unlocked(batch)?;
        Ok(batch.len())
    }

    /// Every record in log order.
    pub fn read_all(&self) -> Result<Vec<Record>> {
        let _guard = read_lock(&self.lock)?;
        self.read_unlocked()
    }

    pub fn get(&self, id: &str) -> Result<Record> {
        self.read_all()?
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Records whose ids are in `ids`, in log order.
    pub fn get_by_ids(&self, ids: &[String]) -> Result<Vec<Record>> {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|r| wanted.contains(r.id.as_str()))
            .collect())
    }

    /// Records associated with the external identifier `link`.
    pub fn get_by_link(&self, link: &str) -> Result<Vec<Record>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|r| r.links.contains(link))
            .collect())
    }

    /// The record with the latest `created_at`, if any.
    pub fn most_recent(&self) -> Result<Option<Record>> {
        let records = self.read_all()?;
        let mut best: Option<Record> = None;
        for record in records {
            match &best {
                Some(b) if record.created_at <= b.created_at => {}
                _ => best = Some(record),
            }
        }
        Ok(best)
    }

    pub fn get_since(&self, since: DateTime<Utc>) -> Result<Changes> {
        let mut changes = Changes::default();
        for record in self.read_all()? {
            let touched = record.updated_at >= since;
            if touched && !record.links.is_empty() {
                changes.linked.push(record.clone());
            }
            if record.created_at >= since {
                changes.new.push(record);
            } else if touched {
                changes.modified.push(record);
            }
        }
        Ok(changes)
    }

    /// Ids removed by delete or redate; never allocated again.
    pub fn retired_ids(&self) -> Result<HashSet<String>> {
        let _guard = read_lock(&self.lock)?;
        self.retired_unlocked()
    }

    /// Next free sequence number for `date`, computed from the current file.
    pub fn next_sequence(&self, date: NaiveDate) -> Result<u32> {
        let _guard = read_lock(&self.lock)?;
        let records = self.read_unlocked()?;
        let retired = self.retired_unlocked()?;
        Ok(next_sequence_in(&self.id_prefix, date, &records, &retired))
    }

    /// Apply `mutation` to the record `id` and rewrite the log.
    ///
    /// `updated_at` is bumped. If the mutation moves `created_at` to another
    /// calendar date, the record gets a fresh id for that date and the old id
    /// is retired. A failing mutation leaves the store untouched.
    pub fn update<F>(&self, id: &str, mutation: F) -> Result<Record>
    where
        F: FnOnce(&mut Record) -> Result<()>,
    {
        let _guard = write_lock(&self.lock)?;
        let mut records = self.read_unlocked()?;
        let idx = records
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let original_date = records[idx].date();
        let mut updated = records[idx].clone();
        mutation(&mut updated)?;

        if updated.id != id {
            return Err(StoreError::InvalidInput(
                "record ids are assigned by the store and cannot be edited".to_string(),
            ));
        }
        validate(&updated)?;
        updated.updated_at = Utc::now().max(updated.created_at);

        let new_date = updated.date();
        if new_date != original_date {
            let retired = self.retired_unlocked()?;
            let seq = next_sequence_in(&self.id_prefix, new_date, &records, &retired);
            updated.id = format_id(&self.id_prefix, new_date, seq);
            self.retire_unlocked(id)?;
        }

        records[idx] = updated.clone();
        self.rewrite_unlocked(&records)?;
        Ok(updated)
    }

    /// Move a record to a new `created_at`, regenerating its id when the date changes.
    pub fn redate(&self, id: &str, created_at: DateTime<Utc>) -> Result<Record> {
        self.update(id, |record| {
            record.created_at = created_at;
            Ok(())
        })
    }

    /// Remove the record `id`. The log is untouched if the id is absent.
    pub fn delete(&self, id: &str) -> Result<()> {
        let _guard = write_lock(&self.lock)?;
        let records = self.read_unlocked()?;
        if !records.iter().any(|r| r.id == id) {
            return Err(StoreError::NotFound(id.to_string()));
        }

        self.retire_unlocked(id)?;
        let remaining: Vec<Record> = records.into_iter().filter(|r| r.id != id).collect();
        self.rewrite_unlocked(&remaining)
    }

    /// Case-insensitive substring search over content and provenance label.
    ///
    /// Each matching field contributes 0.5. Results keep log order among equal
    /// scores.
    pub fn search(&self, query: &str, max_results: i64) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(StoreError::InvalidInput("query must not be empty".to_string()));
        }
        let needle = query.to_lowercase();

        let mut results: Vec<SearchResult> = self
            .read_all()?
            .iter()
            .filter_map(|record| {
                let mut score = 0.0;
                if record.content.to_lowercase().contains(&needle) {
                    score += 0.5;
                }
                if record.provenance.label.to_lowercase().contains(&needle) {
                    score += 0.5;
                }
                (score > 0.0).then(|| SearchResult::from_record(record, score))
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(result_cap(max_results));
        Ok(results)
    }

    fn notify(&self, record: &Record, all: &[Record]) {
        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.on_record_added(record, all) {
                tracing::warn!(record = %record.id, error = %e, "notification sink failed");
            }
        }
    }

    fn read_unlocked(&self) -> Result<Vec<Record>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line_no = i + 1;
            let line = line.map_err(|e| match e.kind() {
                std::io::ErrorKind::InvalidData => StoreError::CorruptLog {
                    line: line_no,
                    message: e.to_string(),
                },
                _ => StoreError::Io(e),
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let record: Record =
                serde_json::from_str(&line).map_err(|e| StoreError::CorruptLog {
                    line: line_no,
                    message: e.to_string(),
                })?;
            records.push(record);
        }
        Ok(records)
    }

    fn retired_unlocked(&self) -> Result<HashSet<String>> {
        match fs::read_to_string(&self.retired_path) {
            Ok(text) => Ok(text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashSet::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn retire_unlocked(&self, id: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.retired_path)?;
        file.write_all(format!("{}\n", id).as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    fn write_lines_unlocked(&self, records: &[Record]) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;

        let mut buf = Vec::new();
        if needs_leading_newline(&mut file)? {
            buf.push(b'\n');
        }
        for record in records {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }

        file.write_all(&buf)?;
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    fn rewrite_unlocked(&self, records: &[Record]) -> Result<()> {
        let mut tmp = tempfile::Builder::new()
            .prefix(".beats-")
            .suffix(".tmp")
            .tempfile_in(&self.dir)?;

        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            for record in records {
                serde_json::to_writer(&mut writer, record)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;

        if let Ok(meta) = fs::metadata(&self.path) {
            fs::set_permissions(tmp.path(), meta.permissions())?;
        }
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;

        // Directory fsync makes the rename durable; not supported everywhere.
        if let Ok(dir) = File::open(&self.dir) {
            let _ = dir.sync_all();
        }
        Ok(())
    }
}

/// `max_results <= 0` means the default cap, never "unlimited".
pub fn result_cap(max_results: i64) -> usize {
    if max_results <= 0 {
        DEFAULT_MAX_RESULTS
    } else {
        max_results as usize
    }
}

fn next_sequence_in(
    prefix: &str,
    date: NaiveDate,
    records: &[Record],
    retired: &HashSet<String>,
) -> u32 {
    records
        .iter()
        .map(|r| r.id.as_str())
        .chain(retired.iter().map(String::as_str))
        .filter_map(|id| id_sequence(id, prefix, date))
        .max()
        .unwrap_or(0)
        + 1
}

fn validate(record: &Record) -> Result<()> {
    if record.content.trim().is_empty() {
        return Err(StoreError::InvalidInput("content must not be empty".to_string()));
    }
    if record.id.trim().is_empty() {
        return Err(StoreError::InvalidInput("id must not be empty".to_string()));
    }
    if record.updated_at < record.created_at {
        return Err(StoreError::InvalidInput(
            "updated_at must not precede created_at".to_string(),
        ));
    }
    Ok(())
}

/// True if the file is non-empty and does not end with a newline.
fn needs_leading_newline(file: &mut File) -> Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}
