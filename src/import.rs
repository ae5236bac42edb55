//! Import records from a JSON array or JSONL file.
//!
//! Imported records keep their ids and timestamps unless they collide with a
//! live or retired id, in which case [`OnConflict`] decides. The whole batch is
//! written with a single [`LogStore::append_bulk`] call; hooks are not fired.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;

use crate::config::Config;
use crate::log_store::LogStore;
use crate::models::{format_id, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnConflict {
    #[default]
    Error,
    Skip,
    /// Allocate a fresh id for the record's date.
    Renumber,
}

impl FromStr for OnConflict {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "error" => Ok(OnConflict::Error),
            "skip" => Ok(OnConflict::Skip),
            "renumber" => Ok(OnConflict::Renumber),
            other => bail!("Unknown conflict strategy: {}. Use error, skip, or renumber.", other),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub on_conflict: OnConflict,
    /// Stored in `provenance.meta["source"]` of every imported record.
    pub source: Option<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    /// `(old id, new id)` pairs.
    pub renumbered: Vec<(String, String)>,
}

/// Parse a JSON array (first non-space byte is `[`) or JSONL.
pub fn parse_records(text: &str) -> Result<Vec<Record>> {
    if text.trim_start().starts_with('[') {
        return serde_json::from_str(text).context("Failed to parse JSON array of records");
    }

    let mut records = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: Record = serde_json::from_str(line)
            .with_context(|| format!("Failed to parse record at line {}", i + 1))?;
        records.push(record);
    }
    Ok(records)
}

pub fn import_records(
    store: &LogStore,
    incoming: Vec<Record>,
    options: &ImportOptions,
) -> Result<ImportReport> {
    let mut taken: HashSet<String> = store.retired_ids()?;
    taken.extend(store.read_all()?.into_iter().map(|r| r.id));
    // Renumbering must not steal an id a later record in the batch carries.
    let incoming_ids: HashSet<String> = incoming.iter().map(|r| r.id.clone()).collect();
    let mut next_seq: HashMap<NaiveDate, u32> = HashMap::new();
    let mut report = ImportReport::default();
    let mut batch = Vec::with_capacity(incoming.len());

    for mut record in incoming {
        if record.content.trim().is_empty() {
            bail!("Record {} has empty content", record.id);
        }
        if record.updated_at < record.created_at {
            record.updated_at = record.created_at;
        }
        if let Some(source) = &options.source {
            record
                .provenance
                .meta
                .insert("source".to_string(), source.clone());
        }

        if taken.contains(&record.id) {
            match options.on_conflict {
                OnConflict::Error => bail!(
                    "Record id already exists: {} (use --on-conflict skip or renumber)",
                    record.id
                ),
                OnConflict::Skip => {
                    report.skipped += 1;
                    continue;
                }
                OnConflict::Renumber => {
                    let date = record.date();
                    let new_id = loop {
                        let seq = match next_seq.get(&date) {
                            Some(&s) => s,
                            None => store.next_sequence(date)?,
                        };
                        next_seq.insert(date, seq + 1);
                        let candidate = format_id(store.id_prefix(), date, seq);
                        if !taken.contains(&candidate) && !incoming_ids.contains(&candidate) {
                            break candidate;
                        }
                    };
                    report.renumbered.push((record.id.clone(), new_id.clone()));
                    record.id = new_id;
                }
            }
        }

        taken.insert(record.id.clone());
        batch.push(record);
    }

    report.imported = batch.len();
    if !options.dry_run {
        store.append_bulk(&batch)?;
    }
    Ok(report)
}

/// `bt import`.
pub fn run_import(config: &Config, path: &Path, options: &ImportOptions) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let records = parse_records(&text)?;
    let store = LogStore::open(&config.store)?;
    let report = import_records(&store, records, options)?;

    println!("import{}", if options.dry_run { " (dry-run)" } else { "" });
    println!("  imported: {}", report.imported);
    println!("  skipped: {}", report.skipped);
    for (old, new) in &report.renumbered {
        println!("  renumbered: {} -> {}", old, new);
    }
    Ok(())
}
