//! Export records as JSON, JSONL, or CSV.
//!
//! Records are read from the canonical log, filtered, and written in log
//! order to a file or stdout.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use crate::config::Config;
use crate::log_store::LogStore;
use crate::models::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Jsonl,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(ExportFormat::Json),
            "jsonl" => Ok(ExportFormat::Jsonl),
            "csv" => Ok(ExportFormat::Csv),
            other => bail!("Unknown export format: {}. Use json, jsonl, or csv.", other),
        }
    }
}

/// All set fields must match.
#[derive(Debug, Clone, Default)]
pub struct ExportFilter {
    /// Inclusive lower bound on `created_at`.
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub until: Option<DateTime<Utc>>,
    /// Case-insensitive substring of the provenance label.
    pub provenance: Option<String>,
    /// Case-insensitive substring of the content.
    pub query: Option<String>,
}

impl ExportFilter {
    pub fn matches(&self, record: &Record) -> bool {
        if let Some(since) = self.since {
            if record.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if record.created_at > until {
                return false;
            }
        }
        if let Some(label) = &self.provenance {
            if !contains_ci(&record.provenance.label, label) {
                return false;
            }
        }
        if let Some(query) = &self.query {
            if !contains_ci(&record.content, query) {
                return false;
            }
        }
        true
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

const CSV_HEADER: &str = "id,created_at,updated_at,impetus,content,linked_beads,references,session_id";

pub fn write_records<W: Write>(out: &mut W, records: &[Record], format: ExportFormat) -> Result<()> {
    match format {
        ExportFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, records)?;
            writeln!(out)?;
        }
        ExportFormat::Jsonl => {
            for record in records {
                serde_json::to_writer(&mut *out, record)?;
                writeln!(out)?;
            }
        }
        ExportFormat::Csv => {
            writeln!(out, "{}", CSV_HEADER)?;
            for r in records {
                let links: Vec<&str> = r.links.iter().map(String::as_str).collect();
                let refs: Vec<&str> = r.references.iter().map(|x| x.locator.as_str()).collect();
                let fields = [
                    r.id.clone(),
                    r.created_at.to_rfc3339(),
                    r.updated_at.to_rfc3339(),
                    r.provenance.label.clone(),
                    r.content.clone(),
                    links.join(";"),
                    refs.join(";"),
                    r.session_tag.clone().unwrap_or_default(),
                ];
                let line: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
                writeln!(out, "{}", line.join(","))?;
            }
        }
    }
    Ok(())
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// `bt export`. Writes to `output` if given, else stdout.
pub fn run_export(
    config: &Config,
    format: ExportFormat,
    filter: &ExportFilter,
    output: Option<&Path>,
) -> Result<()> {
    let store = LogStore::open(&config.store)?;
    let records: Vec<Record> = store
        .read_all()?
        .into_iter()
        .filter(|r| filter.matches(r))
        .collect();

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let mut writer = std::io::BufWriter::new(file);
            write_records(&mut writer, &records, format)?;
            writer.flush()?;
            eprintln!("Exported {} records to {}", records.len(), path.display());
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            write_records(&mut lock, &records, format)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewRecord, Provenance};
    use chrono::TimeZone;

    fn record(id: &str, content: &str, label: &str, day: u32) -> Record {
        let mut d = NewRecord::new(content, Provenance::labeled(label));
        d.created_at = Some(Utc.with_ymd_and_hms(2025, 3, day, 9, 0, 0).unwrap());
        d.into_record(id.to_string(), Utc::now())
    }

    #[test]
    fn test_filter_by_dates_and_text() {
        let records = vec![
            record("beat-20250301-001", "Morning pages", "Journal", 1),
            record("beat-20250305-001", "Coaching call", "Coaching", 5),
            record("beat-20250310-001", "Evening review", "Journal", 10),
        ];
        let filter = ExportFilter {
            since: Some(Utc.with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap()),
            provenance: Some("journal".to_string()),
            ..Default::default()
        };
        let hits: Vec<_> = records.iter().filter(|r| filter.matches(r)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "beat-20250310-001");

        let until = ExportFilter {
            until: Some(Utc.with_ymd_and_hms(2025, 3, 5, 23, 0, 0).unwrap()),
            query: Some("CALL".to_string()),
            ..Default::default()
        };
        assert_eq!(records.iter().filter(|r| until.matches(r)).count(), 1);
    }

    #[test]
    fn test_csv_escaping() {
        let mut r = record("beat-20250301-001", "said \"hi\", then left\nok", "x", 1);
        r.links.insert("b-2".to_string());
        r.links.insert("b-1".to_string());
        let mut out = Vec::new();
        write_records(&mut out, &[r], ExportFormat::Csv).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with(CSV_HEADER));
        assert!(text.contains("\"said \"\"hi\"\", then left\nok\""));
        assert!(text.contains(",b-1;b-2,"));
    }

    #[test]
    fn test_jsonl_one_record_per_line() {
        let records = vec![
            record("beat-20250301-001", "a", "x", 1),
            record("beat-20250301-002", "b", "x", 1),
        ];
        let mut out = Vec::new();
        write_records(&mut out, &records, ExportFormat::Jsonl).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let back: Record = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(back, records[1]);
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("csv".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert!("xml".parse::<ExportFormat>().is_err());
    }
}
