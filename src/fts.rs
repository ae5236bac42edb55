//! Full-text derived index.
//!
//! A SQLite FTS5 projection of the canonical log, rebuilt wholesale whenever
//! the log's fingerprint (modification time in nanoseconds plus size) differs
//! from the one stored in `sync_state` under `log_fingerprint`.
//!
//! The rebuild runs inside one transaction on a WAL database, so a reader that
//! queries during a rebuild sees the previous committed index, never a
//! half-populated one.

use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::config::Config;
use crate::db;
use crate::error::{Result, StoreError};
use crate::log_store::{result_cap, LogStore};
use crate::migrate;
use crate::models::{Provenance, SearchResult};

const MARKER_KEY: &str = "log_fingerprint";

pub struct FtsIndex {
    pool: SqlitePool,
    log_path: PathBuf,
}

impl FtsIndex {
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::ensure_schema(&pool).await?;
        Ok(Self {
            pool,
            log_path: config.store.log_path(),
        })
    }

    /// Rebuild if the log changed since the last sync. Returns whether it did.
    pub async fn sync_if_needed(&self, store: &LogStore) -> Result<bool> {
        let current = log_fingerprint(&self.log_path)?;
        let stored: Option<String> =
            sqlx::query_scalar("SELECT value FROM sync_state WHERE key = ?")
                .bind(MARKER_KEY)
                .fetch_optional(&self.pool)
                .await?;

        if stored.as_deref() == Some(current.as_str()) {
            tracing::debug!(fingerprint = %current, "full-text index is fresh");
            return Ok(false);
        }

        tracing::debug!(
            stored = stored.as_deref().unwrap_or("<none>"),
            current = %current,
            "full-text index is stale, rebuilding"
        );
        self.rebuild_with_marker(store, current).await?;
        Ok(true)
    }

    /// Unconditional full rebuild. Returns the number of indexed records.
    pub async fn rebuild(&self, store: &LogStore) -> Result<usize> {
        let fingerprint = log_fingerprint(&self.log_path)?;
        self.rebuild_with_marker(store, fingerprint).await
    }

    async fn rebuild_with_marker(&self, store: &LogStore, fingerprint: String) -> Result<usize> {
        // Fingerprint is taken before reading, so a write that lands mid-rebuild
        // leaves the marker stale and forces another pass.
        let records = store.read_all()?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM records").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM records_fts").execute(&mut *tx).await?;

        for record in &records {
            sqlx::query(
                "INSERT INTO records (id, created_at, label, content, provenance_json) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&record.id)
            .bind(record.created_at.to_rfc3339())
            .bind(&record.provenance.label)
            .bind(&record.content)
            .bind(serde_json::to_string(&record.provenance)?)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO records_fts (id, content, label, raw, refs) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&record.id)
            .bind(&record.content)
            .bind(&record.provenance.label)
            .bind(record.provenance.raw.as_deref().unwrap_or(""))
            .bind(record.references_text())
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO sync_state (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(MARKER_KEY)
        .bind(&fingerprint)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::debug!(records = records.len(), "full-text index rebuilt");
        Ok(records.len())
    }

    /// Ranked prefix search; engine errors fall back to a substring scan.
    pub async fn search(&self, query: &str, max_results: i64) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(StoreError::InvalidInput("query must not be empty".to_string()));
        }
        let limit = result_cap(max_results);

        match self.search_ranked(query, limit).await {
            Ok(results) => Ok(results),
            Err(e) => {
                tracing::debug!(error = %e, "fts query failed, using substring scan");
                self.search_substring(query, limit).await
            }
        }
    }

    async fn search_ranked(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let rows = sqlx::query(
            r#"
            SELECT r.id, r.content, r.provenance_json, bm25(records_fts) AS bm
            FROM records_fts
            JOIN records r ON r.id = records_fts.id
            WHERE records_fts MATCH ?
            ORDER BY bm
            LIMIT ?
            "#,
        )
        .bind(format!("{}*", query))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<SearchResult> {
                let bm: f64 = row.try_get("bm")?;
                Ok(SearchResult {
                    id: row.try_get("id")?,
                    score: -bm,
                    content: row.try_get("content")?,
                    provenance: decode_provenance(row.try_get("provenance_json")?),
                })
            })
            .collect()
    }

    async fn search_substring(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let rows = sqlx::query("SELECT id, label, content, provenance_json FROM records ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;

        let needle = query.to_lowercase();
        let mut results = Vec::new();
        for row in &rows {
            let content: String = row.try_get("content")?;
            let label: String = row.try_get("label")?;
            let in_content = content.to_lowercase().contains(&needle);
            let in_label = label.to_lowercase().contains(&needle);
            if !in_content && !in_label {
                continue;
            }

            let mut score = 0.5;
            if in_content {
                score += 0.25;
            }
            if in_label {
                score += 0.25;
            }
            results.push(SearchResult {
                id: row.try_get("id")?,
                score,
                content,
                provenance: decode_provenance(row.try_get("provenance_json")?),
            });
        }

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);
        Ok(results)
    }

    pub async fn count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

fn decode_provenance(json: String) -> Provenance {
    serde_json::from_str(&json).unwrap_or_default()
}

/// `"<mtime_ns>:<size>"`; a missing log is `"0:0"`.
pub fn log_fingerprint(path: &Path) -> Result<String> {
    match std::fs::metadata(path) {
        Ok(meta) => {
            let mtime = meta
                .modified()?
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            Ok(format!("{}:{}", mtime, meta.len()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok("0:0".to_string()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewRecord, Reference};
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Config, LogStore, FtsIndex) {
        let tmp = TempDir::new().unwrap();
        let config = Config::for_dir(tmp.path());
        let store = LogStore::open(&config.store).unwrap();
        let index = FtsIndex::open(&config).await.unwrap();
        (tmp, config, store, index)
    }

    fn draft(content: &str, label: &str) -> NewRecord {
        NewRecord::new(content, Provenance::labeled(label))
    }

    #[tokio::test]
    async fn test_sync_builds_once_then_is_fresh() {
        let (_tmp, _config, store, index) = setup().await;
        store.append_new(draft("rust ownership notes", "reading")).unwrap();

        assert!(index.sync_if_needed(&store).await.unwrap());
        assert!(!index.sync_if_needed(&store).await.unwrap());
        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mutation_makes_index_stale() {
        let (_tmp, _config, store, index) = setup().await;
        let rec = store.append_new(draft("first", "x")).unwrap();
        index.sync_if_needed(&store).await.unwrap();

        store.delete(&rec.id).unwrap();
        store.append_new(draft("second entry here", "x")).unwrap();
        assert!(index.sync_if_needed(&store).await.unwrap());

        let hits = index.search("second", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(index.search("first", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_log_clears_index() {
        let (_tmp, config, store, index) = setup().await;
        store.append_new(draft("soon gone", "x")).unwrap();
        index.sync_if_needed(&store).await.unwrap();

        std::fs::remove_file(config.store.log_path()).unwrap();
        assert!(index.sync_if_needed(&store).await.unwrap());
        assert_eq!(index.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_prefix_match_and_provenance() {
        let (_tmp, _config, store, index) = setup().await;
        let mut d = draft("coaching call with the team", "Coaching");
        d.references.push(Reference::parse_shorthand("url:https://example.com/notes").unwrap());
        store.append_new(d).unwrap();
        store.append_new(draft("unrelated", "x")).unwrap();
        index.sync_if_needed(&store).await.unwrap();

        let hits = index.search("coach", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].provenance.label, "Coaching");
        assert!(hits[0].score > 0.0);
    }

    #[tokio::test]
    async fn test_malformed_query_falls_back_to_substring() {
        let (_tmp, _config, store, index) = setup().await;
        store.append_new(draft("he said \"hi", "quote")).unwrap();
        store.append_new(draft("nothing", "x")).unwrap();
        index.sync_if_needed(&store).await.unwrap();

        let hits = index.search("\"hi", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].score, 0.75);
    }

    #[tokio::test]
    async fn test_empty_query_is_invalid() {
        let (_tmp, _config, _store, index) = setup().await;
        assert!(matches!(
            index.search(" ", 10).await.unwrap_err(),
            StoreError::InvalidInput(_)
        ));
    }

    #[test]
    fn test_fingerprint_of_missing_file() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(log_fingerprint(&tmp.path().join("nope")).unwrap(), "0:0");
    }
}
