//! # Beats CLI (`bt`)
//!
//! The `bt` binary is the primary interface for a beats store. It provides
//! commands for capturing records, editing and re-dating them, search,
//! embedding management, synthesis hooks, and import/export.
//!
//! ## Usage
//!
//! ```bash
//! bt --dir ~/journal/.beats <command>
//! ```
//!
//! The store directory comes from `--dir`, then `BEATS_DIR`, then `./.beats`.
//! Configuration is read from `--config` if given, else from
//! `<dir>/beats.toml` if it exists; otherwise defaults apply.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `bt init` | Create the store directory and full-text index schema |
//! | `bt add "<text>"` | Capture a new record |
//! | `bt list` | List the most recent records |
//! | `bt show <id>` | Print one record |
//! | `bt search "<query>"` | Search records (`keyword`, `fulltext`, `semantic`) |
//! | `bt link <id> <bead>...` / `bt unlink` | Attach or detach external bead ids |
//! | `bt edit <id>` | Change content, label, references, links, or date |
//! | `bt amend` | Edit the most recent record |
//! | `bt redate <id> <date>` | Move a record to another date |
//! | `bt delete <id>` | Remove a record |
//! | `bt export` / `bt import` | Move records in and out as JSON, JSONL, or CSV |
//! | `bt embed compute` | Embed records that have no vector yet |
//! | `bt hooks status` | Show synthesis trigger state |

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use beats::config::{self, Config, CONFIG_FILE};
use beats::dates::parse_datetime;
use beats::enrich::{provenance_for, PassThrough};
use beats::export::{self, ExportFilter};
use beats::hooks::{self, SynthesisHooks};
use beats::import::{self, ImportOptions};
use beats::log_store::LogStore;
use beats::models::{NewRecord, Record, Reference};
use beats::{embed_cmd, fts, migrate, search, vectors};

/// Store directory used when neither `--dir` nor `BEATS_DIR` is set.
const DEFAULT_DIR: &str = ".beats";

/// Beats CLI: a local-first narrative journal.
#[derive(Parser)]
#[command(
    name = "bt",
    about = "Beats: a local-first narrative journal with full-text and semantic search",
    version
)]
struct Cli {
    /// Path to a configuration file (TOML). Defaults to `<dir>/beats.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store directory.
    #[arg(long, global = true, env = "BEATS_DIR")]
    dir: Option<PathBuf>,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store directory and the full-text index schema.
    ///
    /// Idempotent.
    Init,

    /// Capture a new record.
    Add {
        /// Record text. Reads stdin when omitted or `-`.
        content: Option<String>,

        /// Provenance label (defaults to "Manual entry").
        #[arg(long)]
        label: Option<String>,

        /// Linked bead id. Repeatable.
        #[arg(long = "link")]
        links: Vec<String>,

        /// Reference as `kind:locator`, e.g. `url:https://example.com`. Repeatable.
        #[arg(long = "ref")]
        refs: Vec<String>,

        /// Session tag.
        #[arg(long)]
        session: Option<String>,

        /// Backdate: RFC3339, YYYY-MM-DD, `today`, `yesterday`, or `3d ago`.
        #[arg(long)]
        date: Option<String>,
    },

    /// List records, most recent last.
    List {
        /// Number of records to show.
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Only records created at or after this date.
        #[arg(long)]
        since: Option<String>,
    },

    /// Print one record.
    Show { id: String },

    /// Search records.
    Search {
        query: String,

        /// Search mode: `keyword` (substring), `fulltext` (FTS5), or `semantic` (vectors).
        /// Unavailable modes fall back to keyword.
        #[arg(long, default_value = "keyword")]
        mode: String,

        /// Maximum number of results. Defaults to `[retrieval].max_results`.
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Attach one or more bead ids to a record.
    ///
    /// Bead ids are external and are stored as given.
    Link {
        id: String,
        #[arg(required = true)]
        beads: Vec<String>,
    },

    /// Detach one or more bead ids from a record.
    Unlink {
        id: String,
        #[arg(required = true)]
        beads: Vec<String>,
    },

    /// Edit a record.
    Edit {
        id: String,
        #[command(flatten)]
        edit: EditArgs,
    },

    /// Edit the most recent record.
    Amend {
        #[command(flatten)]
        edit: EditArgs,
    },

    /// Move a record to another date. The id changes when the calendar date does.
    Redate { id: String, date: String },

    /// Delete a record. Its id is never reused.
    Delete { id: String },

    /// Export records.
    Export {
        /// `json`, `jsonl`, or `csv`.
        #[arg(long, default_value = "json")]
        format: String,

        #[arg(long)]
        since: Option<String>,

        #[arg(long)]
        until: Option<String>,

        /// Provenance label substring.
        #[arg(long)]
        provenance: Option<String>,

        /// Content substring.
        #[arg(long)]
        query: Option<String>,

        /// Write to a file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Import records from a JSON array or JSONL file.
    Import {
        path: PathBuf,

        /// What to do with ids that already exist: `error`, `skip`, or `renumber`.
        #[arg(long, default_value = "error")]
        on_conflict: String,

        /// Stored as `source` in each record's provenance metadata.
        #[arg(long)]
        source: Option<String>,

        #[arg(long)]
        dry_run: bool,
    },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Manage the synthesis trigger.
    Hooks {
        #[command(subcommand)]
        action: HooksAction,
    },

    /// Print the resolved store paths.
    Where,
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed records that have no vector yet.
    Compute,
    /// Re-embed every record.
    Rebuild,
    /// Show embedding coverage.
    Status,
}

#[derive(Subcommand)]
enum HooksAction {
    /// Write a `beats.toml` with hooks enabled into the store directory.
    Init {
        /// Records between synthesis triggers.
        #[arg(long, default_value_t = 5)]
        threshold: usize,
    },
    /// Show trigger state and any pending request.
    Status,
    /// Discard the pending synthesis request.
    Clear,
}

/// Field changes shared by `edit` and `amend`.
#[derive(Args)]
struct EditArgs {
    /// Replace the content.
    #[arg(long)]
    content: Option<String>,

    /// Replace the provenance label.
    #[arg(long)]
    label: Option<String>,

    /// Replace the session tag.
    #[arg(long)]
    session: Option<String>,

    /// Add a `kind:locator` reference. Repeatable.
    #[arg(long = "add-ref")]
    add_refs: Vec<String>,

    /// Remove references by locator. Repeatable.
    #[arg(long = "rm-ref")]
    rm_refs: Vec<String>,

    #[arg(long = "add-link")]
    add_links: Vec<String>,

    #[arg(long = "rm-link")]
    rm_links: Vec<String>,

    /// Move the record to another date.
    #[arg(long)]
    date: Option<String>,
}

impl EditArgs {
    fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.label.is_none()
            && self.session.is_none()
            && self.add_refs.is_empty()
            && self.rm_refs.is_empty()
            && self.add_links.is_empty()
            && self.rm_links.is_empty()
            && self.date.is_none()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let dir = cli
        .dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DIR));

    // Commands that must work without a valid config
    if let Commands::Hooks {
        action: HooksAction::Init { threshold },
    } = &cli.command
    {
        return init_hooks(&dir, *threshold);
    }

    let cfg = resolve_config(cli.config.as_deref(), &dir, cli.dir.is_some())?;

    match cli.command {
        Commands::Init => {
            LogStore::open(&cfg.store)?;
            migrate::run_migrations(&cfg).await?;
            println!("Initialized beats store at {}", cfg.store.dir.display());
        }
        Commands::Add {
            content,
            label,
            links,
            refs,
            session,
            date,
        } => {
            let raw = match content.as_deref() {
                None | Some("-") => read_stdin()?,
                Some(text) => text.to_string(),
            };
            let (content, provenance) = provenance_for(&PassThrough, &raw, label.as_deref());
            let mut draft = NewRecord::new(content, provenance);
            draft.references = parse_refs(&refs)?;
            draft.links = links.into_iter().collect();
            draft.session_tag = session;
            if let Some(date) = date {
                draft.created_at = Some(parse_datetime(&date)?);
            }

            let store = open_store(&cfg)?;
            let record = store.append_new(draft)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                println!("{}", record.id);
            }
        }
        Commands::List { limit, since } => {
            let store = open_store(&cfg)?;
            let mut records = store.read_all()?;
            if let Some(since) = since {
                let cutoff = parse_datetime(&since)?;
                records.retain(|r| r.created_at >= cutoff);
            }
            let skip = records.len().saturating_sub(limit);
            let records = &records[skip..];

            if cli.json {
                println!("{}", serde_json::to_string_pretty(records)?);
            } else if records.is_empty() {
                println!("No records.");
            } else {
                for record in records {
                    println!(
                        "{}  {}  [{}]  {}",
                        record.id,
                        record.created_at.format("%Y-%m-%d %H:%M"),
                        record.provenance.label,
                        one_line(&record.content, 72)
                    );
                }
            }
        }
        Commands::Show { id } => {
            let store = open_store(&cfg)?;
            print_record(&store.get(&id)?, cli.json)?;
        }
        Commands::Search { query, mode, limit } => {
            search::run_search(&cfg, &query, &mode, limit, cli.json).await?;
        }
        Commands::Link { id, beads } => {
            let store = open_store(&cfg)?;
            let mut added = Vec::new();
            let record = store.update(&id, |r| {
                for bead in &beads {
                    if r.links.insert(bead.clone()) {
                        added.push(bead.as_str());
                    }
                }
                Ok(())
            })?;
            if cli.json {
                print_record(&record, true)?;
            } else if added.is_empty() {
                println!("{} already linked to {}", record.id, beads.join(", "));
            } else {
                println!("Linked {} -> {}", record.id, added.join(", "));
            }
        }
        Commands::Unlink { id, beads } => {
            let store = open_store(&cfg)?;
            let mut removed = Vec::new();
            let record = store.update(&id, |r| {
                for bead in &beads {
                    if r.links.remove(bead) {
                        removed.push(bead.as_str());
                    }
                }
                Ok(())
            })?;
            if cli.json {
                print_record(&record, true)?;
            } else if removed.is_empty() {
                println!("{} was not linked to {}", record.id, beads.join(", "));
            } else {
                println!("Unlinked {} -> {}", record.id, removed.join(", "));
            }
        }
        Commands::Edit { id, edit } => {
            let store = open_store(&cfg)?;
            let record = apply_edit(&store, &id, &edit)?;
            report_edit(&id, &record, cli.json)?;
        }
        Commands::Amend { edit } => {
            let store = open_store(&cfg)?;
            let latest = store.most_recent()?.context("No records to amend")?;
            let record = apply_edit(&store, &latest.id, &edit)?;
            report_edit(&latest.id, &record, cli.json)?;
        }
        Commands::Redate { id, date } => {
            let store = open_store(&cfg)?;
            let record = store.redate(&id, parse_datetime(&date)?)?;
            report_edit(&id, &record, cli.json)?;
        }
        Commands::Delete { id } => {
            let store = open_store(&cfg)?;
            store.delete(&id)?;
            println!("Deleted {}", id);
        }
        Commands::Export {
            format,
            since,
            until,
            provenance,
            query,
            output,
        } => {
            let filter = ExportFilter {
                since: since.as_deref().map(parse_datetime).transpose()?,
                until: until.as_deref().map(parse_datetime).transpose()?,
                provenance,
                query,
            };
            export::run_export(&cfg, format.parse()?, &filter, output.as_deref())?;
        }
        Commands::Import {
            path,
            on_conflict,
            source,
            dry_run,
        } => {
            let options = ImportOptions {
                on_conflict: on_conflict.parse()?,
                source,
                dry_run,
            };
            import::run_import(&cfg, &path, &options)?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Compute => embed_cmd::run_embed_compute(&cfg, false).await?,
            EmbedAction::Rebuild => embed_cmd::run_embed_compute(&cfg, true).await?,
            EmbedAction::Status => embed_cmd::run_embed_status(&cfg)?,
        },
        Commands::Hooks { action } => match action {
            HooksAction::Status => {
                let status = SynthesisHooks::new(cfg.store.dir.clone(), cfg.hooks.clone()).status()?;
                println!("Hooks");
                println!("  enabled:    {}", status.enabled);
                println!("  threshold:  {}", status.threshold);
                println!("  action:     {}", status.action);
                println!("  total:      {}", status.state.total_records);
                println!("  since last: {}", status.records_since_last());
                match status.state.last_synthesis_at {
                    Some(at) => println!("  last run:   {}", at.to_rfc3339()),
                    None => println!("  last run:   never"),
                }
                match status.pending {
                    Some(req) => println!(
                        "  pending:    yes ({} records, triggered {})",
                        req.recent_records.len(),
                        req.triggered_at.to_rfc3339()
                    ),
                    None => println!("  pending:    no"),
                }
            }
            HooksAction::Clear => {
                if hooks::clear_pending(&cfg.store.dir)? {
                    println!("Cleared pending synthesis request.");
                } else {
                    println!("No pending synthesis request.");
                }
            }
            HooksAction::Init { .. } => {
                // Handled above (before config loading)
                unreachable!()
            }
        },
        Commands::Where => {
            println!("store:   {}", cfg.store.dir.display());
            println!("log:     {}", cfg.store.log_path().display());
            println!("index:   {}", cfg.index_path().display());
            println!(
                "vectors: {}",
                cfg.store.dir.join(vectors::DATA_FILE).display()
            );
            println!(
                "marker:  {}",
                fts::log_fingerprint(&cfg.store.log_path())?
            );
        }
    }

    Ok(())
}

/// `--config`, else `<dir>/beats.toml`, else defaults for `dir`.
///
/// A config found inside the store directory always points at that directory,
/// as does an explicit `--dir`.
fn resolve_config(path: Option<&Path>, dir: &Path, dir_given: bool) -> Result<Config> {
    let mut cfg = match path {
        Some(path) => config::load_config(path)?,
        None => {
            let local = dir.join(CONFIG_FILE);
            if local.exists() {
                let mut cfg = config::load_config(&local)?;
                cfg.store.dir = dir.to_path_buf();
                cfg
            } else {
                Config::for_dir(dir)
            }
        }
    };
    if dir_given {
        cfg.store.dir = dir.to_path_buf();
    }
    Ok(cfg)
}

fn open_store(cfg: &Config) -> Result<LogStore> {
    let hooks = SynthesisHooks::new(cfg.store.dir.clone(), cfg.hooks.clone());
    Ok(LogStore::open(&cfg.store)?.with_notifier(Arc::new(hooks)))
}

fn init_hooks(dir: &Path, threshold: usize) -> Result<()> {
    let path = dir.join(CONFIG_FILE);
    if path.exists() {
        println!(
            "{} already exists; set [hooks] enabled = true there.",
            path.display()
        );
        return Ok(());
    }

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let body = format!(
        "[store]\ndir = {:?}\n\n[hooks]\nenabled = true\nthreshold = {}\naction = \"file\"\n",
        dir.display().to_string(),
        threshold.max(1)
    );
    std::fs::write(&path, body).with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Hooks enabled in {}", path.display());
    Ok(())
}

fn apply_edit(store: &LogStore, id: &str, edit: &EditArgs) -> Result<Record> {
    if edit.is_empty() {
        bail!("Nothing to change. Pass --content, --label, --date, or a ref/link option.");
    }
    let new_refs = parse_refs(&edit.add_refs)?;
    let created_at = edit.date.as_deref().map(parse_datetime).transpose()?;

    let record = store.update(id, |r| {
        if let Some(content) = &edit.content {
            r.content = content.trim().to_string();
        }
        if let Some(label) = &edit.label {
            r.provenance.label = label.clone();
        }
        if let Some(session) = &edit.session {
            r.session_tag = Some(session.clone()).filter(|s| !s.is_empty());
        }
        r.references
            .retain(|existing| !edit.rm_refs.contains(&existing.locator));
        for reference in &new_refs {
            if !r.references.iter().any(|x| x.locator == reference.locator) {
                r.references.push(reference.clone());
            }
        }
        for link in &edit.rm_links {
            r.links.remove(link);
        }
        r.links.extend(edit.add_links.iter().cloned());
        if let Some(at) = created_at {
            r.created_at = at;
        }
        Ok(())
    })?;
    Ok(record)
}

fn report_edit(old_id: &str, record: &Record, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(record)?);
    } else if record.id != old_id {
        println!("Updated {} (new id {})", old_id, record.id);
    } else {
        println!("Updated {}", record.id);
    }
    Ok(())
}

fn parse_refs(raw: &[String]) -> Result<Vec<Reference>> {
    raw.iter()
        .map(|s| {
            Reference::parse_shorthand(s)
                .with_context(|| format!("Invalid reference '{}': expected kind:locator", s))
        })
        .collect()
}

fn print_record(record: &Record, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(record)?);
        return Ok(());
    }

    println!("id:        {}", record.id);
    println!("created:   {}", record.created_at.to_rfc3339());
    println!("updated:   {}", record.updated_at.to_rfc3339());
    println!("impetus:   {}", record.provenance.label);
    if let Some(session) = &record.session_tag {
        println!("session:   {}", session);
    }
    for link in &record.links {
        println!("link:      {}", link);
    }
    for reference in &record.references {
        println!("reference: {} {}", reference.kind, reference.locator);
    }
    println!("---");
    println!("{}", record.content);
    Ok(())
}

fn read_stdin() -> Result<String> {
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("Failed to read record text from stdin")?;
    Ok(buf)
}

fn one_line(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut)
}
