//! Content enrichment.
//!
//! Turns raw captured text into record content plus a provenance label.
//! Scraping and inference live outside this crate; the built-in
//! [`PassThrough`] keeps the text and applies a default label.

use crate::models::Provenance;

/// Label applied when the caller does not supply one.
pub const DEFAULT_LABEL: &str = "Manual entry";

#[derive(Debug, Clone, PartialEq)]
pub struct Enriched {
    pub content: String,
    pub label: String,
}

pub trait Enricher: Send + Sync {
    fn enrich(&self, raw: &str) -> Enriched;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PassThrough;

impl Enricher for PassThrough {
    fn enrich(&self, raw: &str) -> Enriched {
        Enriched {
            content: raw.trim().to_string(),
            label: DEFAULT_LABEL.to_string(),
        }
    }
}

/// Build the provenance for a new record.
///
/// An explicit `label` wins over the enricher's. The untouched input is kept in
/// `raw` only when enrichment changed it.
pub fn provenance_for(enricher: &dyn Enricher, raw: &str, label: Option<&str>) -> (String, Provenance) {
    let enriched = enricher.enrich(raw);
    let provenance = Provenance {
        label: label
            .map(str::to_string)
            .filter(|l| !l.trim().is_empty())
            .unwrap_or(enriched.label),
        raw: (enriched.content != raw).then(|| raw.to_string()),
        meta: Default::default(),
    };
    (enriched.content, provenance)
}
