//! Batch embedding computation and coverage status.
//!
//! Provider failures are counted per record and never abort the batch. The
//! cancel flag is checked before each provider request; a vector already being
//! stored always finishes writing its offset index first.

use anyhow::{bail, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::{self, Embedder};
use crate::log_store::LogStore;
use crate::vectors::VectorIndex;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ComputeReport {
    pub computed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
pub struct EmbedStatus {
    pub count: usize,
    pub total: usize,
    pub coverage: f64,
}

/// Embed every record that has no vector yet.
pub async fn compute_missing(
    store: &LogStore,
    index: &VectorIndex,
    embedder: &dyn Embedder,
    cancel: &AtomicBool,
) -> crate::error::Result<ComputeReport> {
    compute(store, index, embedder, cancel, false).await
}

/// Re-embed every record, appending fresh copies for ones already indexed.
pub async fn compute_all(
    store: &LogStore,
    index: &VectorIndex,
    embedder: &dyn Embedder,
    cancel: &AtomicBool,
) -> crate::error::Result<ComputeReport> {
    compute(store, index, embedder, cancel, true).await
}

async fn compute(
    store: &LogStore,
    index: &VectorIndex,
    embedder: &dyn Embedder,
    cancel: &AtomicBool,
    force: bool,
) -> crate::error::Result<ComputeReport> {
    let records = store.read_all()?;
    let mut report = ComputeReport::default();

    for record in &records {
        if cancel.load(Ordering::SeqCst) {
            report.cancelled = true;
            break;
        }
        if !force && index.has(&record.id)? {
            report.skipped += 1;
            continue;
        }

        match embedder.embed(&record.embedding_text()).await {
            Ok(vector) => match index.store(&record.id, &vector) {
                Ok(()) => report.computed += 1,
                Err(e) => {
                    tracing::warn!(record = %record.id, error = %e, "failed to store embedding");
                    report.errors += 1;
                }
            },
            Err(e) => {
                tracing::warn!(record = %record.id, error = %e, "embedding request failed");
                report.errors += 1;
            }
        }
    }

    Ok(report)
}

/// Coverage over the records currently in the log.
pub fn status(store: &LogStore, index: &VectorIndex) -> crate::error::Result<EmbedStatus> {
    let ids: Vec<String> = store.read_all()?.into_iter().map(|r| r.id).collect();
    Ok(EmbedStatus {
        count: index.count_of(&ids)?,
        total: ids.len(),
        coverage: index.coverage(&ids)?,
    })
}

/// `bt embed compute` / `bt embed rebuild`.
pub async fn run_embed_compute(config: &Config, rebuild: bool) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let embedder = embedding::create_provider(&config.embedding)?;
    if !embedder.is_available().await {
        bail!(
            "Embedding provider '{}' is not reachable",
            config.embedding.provider
        );
    }

    let store = LogStore::open(&config.store)?;
    let index = VectorIndex::open(&config.store.dir, config.embedding.dims)?;

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            flag.store(true, Ordering::SeqCst);
        }
    });

    let report = if rebuild {
        compute_all(&store, &index, embedder.as_ref(), &cancel).await?
    } else {
        compute_missing(&store, &index, embedder.as_ref(), &cancel).await?
    };

    println!("embed {}", if rebuild { "rebuild" } else { "compute" });
    println!("  model: {}", embedder.model_name());
    println!("  computed: {}", report.computed);
    println!("  skipped: {}", report.skipped);
    println!("  errors: {}", report.errors);
    if report.cancelled {
        println!("  cancelled before completion");
    }
    Ok(())
}

/// `bt embed status`.
pub fn run_embed_status(config: &Config) -> Result<()> {
    let store = LogStore::open(&config.store)?;
    let index = VectorIndex::open(&config.store.dir, config.embedding.dims)?;
    let status = status(&store, &index)?;

    println!("Embeddings");
    println!("  provider: {}", config.embedding.provider);
    println!("  dims:     {}", config.embedding.dims);
    println!(
        "  indexed:  {} / {} ({:.1}%)",
        status.count, status.total, status.coverage
    );
    Ok(())
}
