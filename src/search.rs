//! Hybrid search facade.
//!
//! | Requested | Path | Falls back to keyword when |
//! |-----------|------|----------------------------|
//! | `keyword` | [`LogStore::search`] | never |
//! | `fulltext` | [`FtsIndex`] after `sync_if_needed` | index cannot be opened, synced, or queried |
//! | `semantic` | [`VectorIndex`] cosine scan | provider unreachable, index unopenable, embed or scan error |
//!
//! A fallback reports `mode = keyword, fallback = true`. The only error this
//! module returns for search itself is an empty query; errors from the
//! canonical log (e.g. a corrupt line) still surface through the keyword path.

use anyhow::bail;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::config::Config;
use crate::embedding::{self, Embedder};
use crate::error::{Result, StoreError};
use crate::fts::FtsIndex;
use crate::log_store::{result_cap, LogStore};
use crate::models::SearchResult;
use crate::vectors::VectorIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Keyword,
    #[serde(rename = "fulltext")]
    FullText,
    Semantic,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Keyword => "keyword",
            SearchMode::FullText => "fulltext",
            SearchMode::Semantic => "semantic",
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "keyword" => Ok(SearchMode::Keyword),
            "fulltext" | "fts" => Ok(SearchMode::FullText),
            "semantic" => Ok(SearchMode::Semantic),
            other => Err(StoreError::InvalidInput(format!(
                "Unknown search mode: {}. Use keyword, fulltext, or semantic.",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutput {
    pub results: Vec<SearchResult>,
    /// The path that actually produced `results`.
    pub mode: SearchMode,
    /// True when `mode` differs from what was requested.
    pub fallback: bool,
}

pub async fn hybrid_search(
    store: &LogStore,
    config: &Config,
    embedder: &dyn Embedder,
    query: &str,
    requested: SearchMode,
    max_results: i64,
) -> Result<SearchOutput> {
    if query.trim().is_empty() {
        return Err(StoreError::InvalidInput("query must not be empty".to_string()));
    }

    let attempt = match requested {
        SearchMode::Keyword => None,
        SearchMode::FullText => Some(fulltext_search(store, config, query, max_results).await),
        SearchMode::Semantic => {
            Some(semantic_search(store, config, embedder, query, max_results).await)
        }
    };

    match attempt {
        Some(Ok(results)) => Ok(SearchOutput {
            results,
            mode: requested,
            fallback: false,
        }),
        Some(Err(e)) => {
            tracing::info!(requested = %requested, error = %e, "falling back to keyword search");
            Ok(SearchOutput {
                results: store.search(query, max_results)?,
                mode: SearchMode::Keyword,
                fallback: true,
            })
        }
        None => Ok(SearchOutput {
            results: store.search(query, max_results)?,
            mode: SearchMode::Keyword,
            fallback: false,
        }),
    }
}

async fn fulltext_search(
    store: &LogStore,
    config: &Config,
    query: &str,
    max_results: i64,
) -> Result<Vec<SearchResult>> {
    let index = FtsIndex::open(config).await?;
    let result = match index.sync_if_needed(store).await {
        Ok(_) => index.search(query, max_results).await,
        Err(e) => Err(e),
    };
    index.close().await;
    result
}

async fn semantic_search(
    store: &LogStore,
    config: &Config,
    embedder: &dyn Embedder,
    query: &str,
    max_results: i64,
) -> Result<Vec<SearchResult>> {
    if !embedder.is_available().await {
        return Err(StoreError::ProviderUnavailable(format!(
            "{} is not reachable",
            embedder.model_name()
        )));
    }

    let index = VectorIndex::open(&config.store.dir, config.embedding.dims)?;
    let query_vec = embedder.embed(query).await?;
    let hits = index.search(&query_vec, usize::MAX)?;

    let records: HashMap<String, _> = store
        .read_all()?
        .into_iter()
        .map(|r| (r.id.clone(), r))
        .collect();

    // Vectors of deleted records are unreachable but still on disk.
    Ok(hits
        .into_iter()
        .filter_map(|(id, score)| records.get(&id).map(|r| SearchResult::from_record(r, score)))
        .take(result_cap(max_results))
        .collect())
}

/// `bt search`.
pub async fn run_search(
    config: &Config,
    query: &str,
    mode: &str,
    limit: Option<i64>,
    json: bool,
) -> anyhow::Result<()> {
    if query.trim().is_empty() {
        bail!("Search query must not be empty");
    }
    let mode: SearchMode = mode.parse()?;

    let store = LogStore::open(&config.store)?;
    let embedder: Box<dyn Embedder> = match embedding::create_provider(&config.embedding) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Warning: {}", e);
            Box::new(embedding::DisabledProvider)
        }
    };
    let limit = limit.unwrap_or(config.retrieval.max_results);

    let output = hybrid_search(&store, config, embedder.as_ref(), query, mode, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if output.fallback {
        eprintln!(
            "Warning: {} search unavailable, showing keyword results",
            mode
        );
    }

    if output.results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in output.results.iter().enumerate() {
        println!(
            "{}. [{:.2}] {} ({})",
            i + 1,
            result.score,
            result.id,
            result.provenance.label
        );
        println!(
            "    \"{}\"",
            excerpt(&result.content, 160).replace('\n', " ").trim()
        );
        println!();
    }

    Ok(())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{DisabledProvider, EmbedError};
    use crate::models::{NewRecord, Provenance};
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Maps text to a 2-d vector: x counts "sea", y counts "mountain".
    struct KeywordVectors;

    #[async_trait]
    impl Embedder for KeywordVectors {
        fn model_name(&self) -> &str {
            "keyword-vectors"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn is_available(&self) -> bool {
            true
        }
        async fn embed(&self, text: &str) -> std::result::Result<Vec<f64>, EmbedError> {
            let t = text.to_lowercase();
            Ok(vec![
                t.matches("sea").count() as f64,
                t.matches("mountain").count() as f64,
            ])
        }
    }

    struct BrokenProvider;

    #[async_trait]
    impl Embedder for BrokenProvider {
        fn model_name(&self) -> &str {
            "broken"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn is_available(&self) -> bool {
            true
        }
        async fn embed(&self, _text: &str) -> std::result::Result<Vec<f64>, EmbedError> {
            Err(EmbedError::Provider("500".to_string()))
        }
    }

    fn setup() -> (TempDir, Config, LogStore) {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::for_dir(tmp.path());
        config.embedding.dims = 2;
        let store = LogStore::open(&config.store).unwrap();
        for (content, label) in [
            ("alpha", "alpha notes"),
            ("beta alpha", "reading"),
            ("gamma", "reading"),
        ] {
            store
                .append_new(NewRecord::new(content, Provenance::labeled(label)))
                .unwrap();
        }
        (tmp, config, store)
    }

    #[tokio::test]
    async fn test_keyword_mode() {
        let (_tmp, config, store) = setup();
        let out = hybrid_search(&store, &config, &DisabledProvider, "alpha", SearchMode::Keyword, 10)
            .await
            .unwrap();
        assert_eq!(out.mode, SearchMode::Keyword);
        assert!(!out.fallback);
        assert_eq!(out.results.len(), 2);
    }

    #[tokio::test]
    async fn test_semantic_without_provider_falls_back() {
        let (_tmp, config, store) = setup();
        let out = hybrid_search(&store, &config, &DisabledProvider, "alpha", SearchMode::Semantic, 10)
            .await
            .unwrap();
        assert_eq!(out.mode, SearchMode::Keyword);
        assert!(out.fallback);
        assert_eq!(out.results, store.search("alpha", 10).unwrap());
    }

    #[tokio::test]
    async fn test_semantic_provider_error_falls_back() {
        let (_tmp, config, store) = setup();
        let out = hybrid_search(&store, &config, &BrokenProvider, "alpha", SearchMode::Semantic, 10)
            .await
            .unwrap();
        assert!(out.fallback);
        assert_eq!(out.mode, SearchMode::Keyword);
    }

    #[tokio::test]
    async fn test_semantic_with_corrupt_vector_index_falls_back() {
        let (tmp, config, store) = setup();
        std::fs::write(tmp.path().join(crate::vectors::INDEX_FILE), [1u8, 0, 0]).unwrap();
        let out = hybrid_search(&store, &config, &KeywordVectors, "alpha", SearchMode::Semantic, 10)
            .await
            .unwrap();
        assert!(out.fallback);
    }

    #[tokio::test]
    async fn test_semantic_ranks_by_similarity_and_skips_deleted() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::for_dir(tmp.path());
        config.embedding.dims = 2;
        let store = LogStore::open(&config.store).unwrap();
        let sea = store
            .append_new(NewRecord::new("walk by the sea", Provenance::labeled("x")))
            .unwrap();
        let hill = store
            .append_new(NewRecord::new("mountain hike", Provenance::labeled("x")))
            .unwrap();
        let gone = store
            .append_new(NewRecord::new("sea sea sea", Provenance::labeled("x")))
            .unwrap();

        let index = VectorIndex::open(tmp.path(), 2).unwrap();
        for r in [&sea, &hill, &gone] {
            let v = KeywordVectors.embed(&r.content).await.unwrap();
            index.store(&r.id, &v).unwrap();
        }
        store.delete(&gone.id).unwrap();

        let out = hybrid_search(&store, &config, &KeywordVectors, "the sea", SearchMode::Semantic, 10)
            .await
            .unwrap();
        assert_eq!(out.mode, SearchMode::Semantic);
        assert!(!out.fallback);
        assert_eq!(out.results.len(), 2);
        assert_eq!(out.results[0].id, sea.id);
        assert!((out.results[0].score - 1.0).abs() < 1e-9);
        assert_eq!(out.results[1].id, hill.id);
    }

    #[tokio::test]
    async fn test_fulltext_mode() {
        let (_tmp, config, store) = setup();
        let out = hybrid_search(&store, &config, &DisabledProvider, "alph", SearchMode::FullText, 10)
            .await
            .unwrap();
        assert_eq!(out.mode, SearchMode::FullText);
        assert!(!out.fallback);
        assert_eq!(out.results.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_query_is_an_error() {
        let (_tmp, config, store) = setup();
        let err = hybrid_search(&store, &config, &DisabledProvider, "  ", SearchMode::Semantic, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("fulltext".parse::<SearchMode>().unwrap(), SearchMode::FullText);
        assert!("hybrid".parse::<SearchMode>().is_err());
    }
}
