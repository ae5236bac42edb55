//! Core data models used throughout beats.
//!
//! A [`Record`] ("beat") is one narrative entry in the canonical log. The
//! on-disk field names follow the existing JSONL format (`impetus`,
//! `linked_beads`, `session_id`); the Rust field names describe what the
//! values mean.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Default id prefix: `beat-YYYYMMDD-NNN`.
pub const DEFAULT_ID_PREFIX: &str = "beat";

/// Date component format used inside record ids.
pub const ID_DATE_FORMAT: &str = "%Y%m%d";

/// A persisted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "impetus")]
    pub provenance: Provenance,
    pub content: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub references: Vec<Reference>,
    #[serde(rename = "linked_beads", default, deserialize_with = "null_as_default")]
    pub links: BTreeSet<String>,
    #[serde(
        rename = "session_id",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_as_none"
    )]
    pub session_tag: Option<String>,
    /// Fields this version does not model (e.g. `entities`, `context`).
    /// Kept so full-file rewrites never drop data.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Origin label for a record, plus optional raw source text and metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "empty_as_none")]
    pub raw: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "BTreeMap::is_empty",
        deserialize_with = "null_as_default"
    )]
    pub meta: BTreeMap<String, String>,
}

impl Provenance {
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }
}

/// An external resource cited by a record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "empty_as_none")]
    pub subtype: Option<String>,
    pub locator: String,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "empty_as_none")]
    pub label: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "BTreeMap::is_empty",
        deserialize_with = "null_as_default"
    )]
    pub meta: BTreeMap<String, String>,
}

impl Reference {
    /// Parse the CLI shorthand `kind:locator` (the locator may itself contain `:`).
    pub fn parse_shorthand(s: &str) -> Option<Self> {
        let (kind, locator) = s.split_once(':')?;
        if kind.is_empty() || locator.is_empty() {
            return None;
        }
        Some(Self {
            kind: kind.to_string(),
            locator: locator.to_string(),
            ..Default::default()
        })
    }
}

/// Input for a new record; id and timestamps are assigned by the store.
#[derive(Debug, Clone, Default)]
pub struct NewRecord {
    pub content: String,
    pub provenance: Provenance,
    pub references: Vec<Reference>,
    pub links: BTreeSet<String>,
    pub session_tag: Option<String>,
    /// Backdate the record. Defaults to now.
    pub created_at: Option<DateTime<Utc>>,
}

impl NewRecord {
    pub fn new(content: impl Into<String>, provenance: Provenance) -> Self {
        Self {
            content: content.into(),
            provenance,
            ..Default::default()
        }
    }

    /// Materialize the draft with an allocated id.
    pub fn into_record(self, id: String, now: DateTime<Utc>) -> Record {
        let created_at = self.created_at.unwrap_or(now);
        Record {
            id,
            created_at,
            updated_at: created_at,
            provenance: self.provenance,
            content: self.content,
            references: self.references,
            links: self.links,
            session_tag: self.session_tag,
            extra: BTreeMap::new(),
        }
    }
}

impl Record {
    /// Calendar date (UTC) that the id's date component is derived from.
    pub fn date(&self) -> NaiveDate {
        self.created_at.date_naive()
    }

    /// Text fed to the embedding provider.
    pub fn embedding_text(&self) -> String {
        if self.provenance.label.is_empty() {
            self.content.clone()
        } else {
            format!("{}: {}", self.provenance.label, self.content)
        }
    }

    /// Reference labels and locators flattened into one searchable string.
    pub fn references_text(&self) -> String {
        self.references
            .iter()
            .map(|r| match &r.label {
                Some(label) => format!("{} {}", label, r.locator),
                None => r.locator.clone(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A ranked hit returned by every search path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub score: f64,
    pub content: String,
    #[serde(rename = "impetus")]
    pub provenance: Provenance,
}

impl SearchResult {
    pub fn from_record(record: &Record, score: f64) -> Self {
        Self {
            id: record.id.clone(),
            score,
            content: record.content.clone(),
            provenance: record.provenance.clone(),
        }
    }
}

/// Build an id: `<prefix>-<YYYYMMDD>-<seq>` with the sequence zero-padded to 3.
pub fn format_id(prefix: &str, date: NaiveDate, seq: u32) -> String {
    format!("{}-{}-{:03}", prefix, date.format(ID_DATE_FORMAT), seq)
}

/// Sequence component of `id` if it belongs to `prefix` and `date`.
pub fn id_sequence(id: &str, prefix: &str, date: NaiveDate) -> Option<u32> {
    let stem = format!("{}-{}-", prefix, date.format(ID_DATE_FORMAT));
    id.strip_prefix(&stem)?.parse().ok()
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_and_parse_id() {
        let date = NaiveDate::from_ymd_opt(2025, 12, 4).unwrap();
        let id = format_id("beat", date, 7);
        assert_eq!(id, "beat-20251204-007");
        assert_eq!(id_sequence(&id, "beat", date), Some(7));
        assert_eq!(id_sequence("beat-20251204-1234", "beat", date), Some(1234));
    }

    #[test]
    fn test_id_sequence_rejects_other_dates_and_prefixes() {
        let date = NaiveDate::from_ymd_opt(2025, 12, 4).unwrap();
        assert_eq!(id_sequence("beat-20251205-001", "beat", date), None);
        assert_eq!(id_sequence("note-20251204-001", "beat", date), None);
        assert_eq!(id_sequence("beat-20251204-abc", "beat", date), None);
    }

    #[test]
    fn test_null_collections_decode_as_empty() {
        let line = r#"{"id":"beat-20251204-001","created_at":"2025-12-04T10:00:00Z","updated_at":"2025-12-04T10:00:00Z","impetus":{"label":"x","meta":null},"content":"c","references":null,"linked_beads":null}"#;
        let record: Record = serde_json::from_str(line).unwrap();
        assert!(record.references.is_empty());
        assert!(record.links.is_empty());
        assert!(record.provenance.meta.is_empty());
        assert_eq!(record.session_tag, None);
    }

    #[test]
    fn test_serialization_always_writes_collections() {
        let record = NewRecord::new("hello", Provenance::labeled("test"))
            .into_record("beat-20251204-001".to_string(), Utc::now());
        let json: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(json["references"], serde_json::json!([]));
        assert_eq!(json["linked_beads"], serde_json::json!([]));
        assert_eq!(json["impetus"]["label"], "test");
        assert!(json.get("session_id").is_none());
    }

    #[test]
    fn test_unknown_fields_survive_roundtrip() {
        let line = r#"{"id":"beat-20251204-001","created_at":"2025-12-04T10:00:00Z","updated_at":"2025-12-04T10:00:00Z","impetus":{"label":"x"},"content":"c","entities":[{"label":"Rust","category":"tech"}]}"#;
        let record: Record = serde_json::from_str(line).unwrap();
        assert!(record.extra.contains_key("entities"));
        let out = serde_json::to_string(&record).unwrap();
        assert!(out.contains("\"entities\""));
    }

    #[test]
    fn test_links_are_a_set() {
        let line = r#"{"id":"beat-20251204-001","created_at":"2025-12-04T10:00:00Z","updated_at":"2025-12-04T10:00:00Z","impetus":{"label":"x"},"content":"c","linked_beads":["b-2","b-1","b-2"]}"#;
        let record: Record = serde_json::from_str(line).unwrap();
        assert_eq!(record.links.len(), 2);
        assert_eq!(record.links.iter().next().map(String::as_str), Some("b-1"));
    }

    #[test]
    fn test_reference_shorthand() {
        let r = Reference::parse_shorthand("url:https://example.com/a").unwrap();
        assert_eq!(r.kind, "url");
        assert_eq!(r.locator, "https://example.com/a");
        assert!(Reference::parse_shorthand("nokind").is_none());
        assert!(Reference::parse_shorthand(":x").is_none());
    }

    #[test]
    fn test_embedding_text_prefixes_label() {
        let record = NewRecord::new("content", Provenance::labeled("Coaching"))
            .into_record("beat-20251204-001".to_string(), Utc::now());
        assert_eq!(record.embedding_text(), "Coaching: content");
    }
}
