//! # Beats
//!
//! A local-first record store for a personal journal of short narrative
//! entries ("beats").
//!
//! The canonical store is an append-oriented JSONL log. Two derived indexes
//! are built from it and can always be rebuilt: a SQLite FTS5 full-text index
//! and a flat-file vector index of embeddings. A search facade picks the
//! requested path and falls back to a plain keyword scan when a derived path
//! is unavailable.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   append/rewrite   ┌───────────────┐
//! │   CLI    │───────────────────▶│  beats.jsonl   │  (canonical)
//! │   (bt)   │                    └───────┬───────┘
//! └────┬─────┘                            │ derive
//!      │ search              ┌────────────┴────────────┐
//!      ▼                     ▼                         ▼
//! ┌──────────┐        ┌─────────────┐          ┌──────────────┐
//! │  Facade  │───────▶│ FTS5 (SQLite)│          │ embeddings.* │
//! └──────────┘        └─────────────┘          └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! bt init                                 # create the store and index
//! bt add "Shipped the parser rewrite" --label "Work log"
//! bt search "parser" --mode fulltext
//! bt embed compute                        # needs [embedding] configured
//! bt search "refactoring wins" --mode semantic
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Records, provenance, references, id helpers |
//! | [`error`] | Store error taxonomy |
//! | [`config`] | TOML configuration parsing |
//! | [`log_store`] | Canonical JSONL log |
//! | [`hooks`] | Append notifications and the synthesis trigger |
//! | [`enrich`] | Content enrichment for new records |
//! | [`dates`] | User-facing date parsing |
//! | [`db`] | Index database connection |
//! | [`migrate`] | Index schema |
//! | [`fts`] | Full-text derived index |
//! | [`vectors`] | Vector derived index |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`embed_cmd`] | Batch embedding and coverage |
//! | [`search`] | Keyword, full-text, and semantic search |
//! | [`export`] | JSON / JSONL / CSV export |
//! | [`import`] | JSON / JSONL import |

pub mod config;
pub mod dates;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod enrich;
pub mod error;
pub mod export;
pub mod fts;
pub mod hooks;
pub mod import;
pub mod log_store;
pub mod migrate;
pub mod models;
pub mod search;
pub mod vectors;
