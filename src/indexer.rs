//! Indexing run orchestration.
//!
//! Drives the full pipeline for one source: acquire the run lease, wipe the
//! previous chunk set, list the remote tree, filter to indexable
//! documentation files, then fetch + chunk + persist in fixed-size batches
//! with progress checkpoints after every batch.
//!
//! State machine: `pending → indexing → {ready | error}`, re-enterable from
//! either terminal state. A single file's failure is logged and skipped; a
//! listing failure or an empty filtered set aborts the run into `error`.
//! Batches run sequentially so persisted progress stays monotonic; within a
//! batch, files are fetched concurrently.

use anyhow::{bail, Context, Result};
use futures::future::join_all;
use globset::{Glob, GlobSet, GlobSetBuilder};
use sqlx::SqlitePool;
use std::path::Path;

use crate::chunker;
use crate::config::{Config, IndexingConfig};
use crate::github::{GithubClient, TreeEntry};
use crate::models::{Chunk, RunStatus, Source, SourceState};
use crate::progress::{IndexEvent, ProgressReporter};
use crate::store;

/// Counts from a completed run.
#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub files: u64,
    pub chunks: u64,
}

/// Execute one indexing run for `source_id`.
///
/// Refuses to start while another run holds the source's lease. On any
/// run-level failure the source is left in `error` with the message
/// captured and progress at its last checkpoint.
pub async fn run_index(
    pool: &SqlitePool,
    config: &Config,
    client: &GithubClient,
    reporter: &dyn ProgressReporter,
    source_id: &str,
) -> Result<RunSummary> {
    let source = store::get_source(pool, source_id)
        .await?
        .with_context(|| format!("source not found: {source_id}"))?;

    let Some(run_id) =
        store::acquire_lease(pool, &source.id, config.indexing.lease_secs).await?
    else {
        bail!("indexing already in progress for {}", source.repo_name());
    };

    run_leased(pool, config, client, reporter, source, run_id).await
}

/// Run with a lease already held. The HTTP trigger acquires the lease
/// synchronously (so a conflict can be reported to the caller) and then
/// drives the run in a background task through this entry point.
pub async fn run_leased(
    pool: &SqlitePool,
    config: &Config,
    client: &GithubClient,
    reporter: &dyn ProgressReporter,
    source: Source,
    run_id: String,
) -> Result<RunSummary> {
    let mut status = RunStatus::started();
    store::update_status(pool, &source.id, &status).await?;

    let result = drive(pool, config, client, reporter, &source, &mut status).await;

    match result {
        Ok(summary) => {
            store::release_lease(pool, &source.id, &run_id).await?;
            Ok(summary)
        }
        Err(err) => {
            tracing::warn!(source = %source.repo_name(), error = %err, "indexing run failed");
            status.state = SourceState::Error;
            // "{:#}" keeps the cause chain (e.g. the upstream HTTP status).
            status.error = Some(format!("{err:#}"));
            // Progress stays at the last checkpoint value.
            if let Err(write_err) = store::update_status(pool, &source.id, &status).await {
                tracing::warn!(error = %write_err, "failed to persist error status");
            }
            reporter.report(IndexEvent::Finished {
                source: source.repo_name(),
                state: SourceState::Error.as_str().to_string(),
                chunks: 0,
            });
            let _ = store::release_lease(pool, &source.id, &run_id).await;
            Err(err)
        }
    }
}

async fn drive(
    pool: &SqlitePool,
    config: &Config,
    client: &GithubClient,
    reporter: &dyn ProgressReporter,
    source: &Source,
    status: &mut RunStatus,
) -> Result<RunSummary> {
    let repo_name = source.repo_name();

    // No partial old data survives a new run.
    store::delete_chunks(pool, &source.id).await?;

    reporter.report(IndexEvent::Listing {
        source: repo_name.clone(),
    });
    let listing = client
        .list_tree(&source.owner, &source.repo, &source.branch)
        .await
        .with_context(|| format!("failed to list tree for {repo_name}@{}", source.branch))?;

    if listing.truncated {
        tracing::warn!(source = %repo_name, "tree listing truncated; indexing the returned entries");
    }
    if listing.entries.iter().filter(|e| e.is_blob()).count() == 0 {
        bail!("repository tree contains no files");
    }

    status.advance(10);
    store::update_status(pool, &source.id, status).await?;

    let filter = FileFilter::new(&config.indexing)?;
    let files: Vec<TreeEntry> = listing
        .entries
        .into_iter()
        .filter(|e| filter.keep(e))
        .collect();

    if files.is_empty() {
        bail!("no documentation files matched the indexing filters");
    }

    status.advance(20);
    store::update_status(pool, &source.id, status).await?;

    let files_total = files.len() as u64;
    let mut files_done = 0u64;
    let mut chunks_written = 0u64;

    for batch in files.chunks(config.indexing.batch_size) {
        let fetched = join_all(batch.iter().map(|entry| async move {
            let text = client
                .fetch_raw(&source.owner, &source.repo, &source.branch, &entry.path)
                .await;
            (entry, text)
        }))
        .await;

        let mut batch_chunks: Vec<Chunk> = Vec::new();
        for (entry, text) in fetched {
            match text {
                Ok(text) => {
                    batch_chunks.extend(chunker::chunk_file(
                        &source.id,
                        &repo_name,
                        &entry.path,
                        detect_language(&entry.path),
                        &text,
                        &config.chunking,
                    ));
                }
                Err(err) => {
                    tracing::warn!(
                        source = %repo_name,
                        file = %entry.path,
                        error = %err,
                        "skipping file"
                    );
                }
            }
        }

        store::insert_chunks(pool, &batch_chunks).await?;
        chunks_written += batch_chunks.len() as u64;
        files_done += batch.len() as u64;

        status.advance(batch_progress(files_done, files_total));
        store::update_status(pool, &source.id, status).await?;
        reporter.report(IndexEvent::Indexing {
            source: repo_name.clone(),
            files_done,
            files_total,
        });
    }

    status.state = SourceState::Ready;
    status.advance(100);
    status.file_count = Some(files_total as i64);
    status.chunk_count = Some(chunks_written as i64);
    status.last_sync = Some(chrono::Utc::now().timestamp());
    store::update_status(pool, &source.id, status).await?;

    reporter.report(IndexEvent::Finished {
        source: repo_name,
        state: SourceState::Ready.as_str().to_string(),
        chunks: chunks_written,
    });

    Ok(RunSummary {
        files: files_total,
        chunks: chunks_written,
    })
}

/// Linear progress between 20 and 90 proportional to files processed.
fn batch_progress(files_done: u64, files_total: u64) -> i64 {
    if files_total == 0 {
        return 20;
    }
    20 + (70 * files_done / files_total) as i64
}

/// Caller-side filtering over the raw tree listing: blobs only, bounded
/// size, no ignored directories, allow-listed extensions.
struct FileFilter {
    exclude: GlobSet,
    allowed_extensions: Vec<String>,
    max_file_size: i64,
}

impl FileFilter {
    fn new(config: &IndexingConfig) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for dir in &config.ignored_dirs {
            builder.add(Glob::new(&format!("**/{dir}/**"))?);
        }

        Ok(Self {
            exclude: builder.build()?,
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|e| e.to_lowercase())
                .collect(),
            max_file_size: config.max_file_size,
        })
    }

    fn keep(&self, entry: &TreeEntry) -> bool {
        if !entry.is_blob() {
            return false;
        }
        if entry.size.unwrap_or(0) > self.max_file_size {
            return false;
        }
        if self.exclude.is_match(&entry.path) {
            return false;
        }
        let Some(ext) = Path::new(&entry.path)
            .extension()
            .and_then(|e| e.to_str())
        else {
            return false;
        };
        self.allowed_extensions.contains(&ext.to_lowercase())
    }
}

/// Content-language tag derived from the file extension.
pub fn detect_language(path: &str) -> &'static str {
    match Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("md") | Some("mdx") | Some("markdown") => "markdown",
        Some("rst") => "restructuredtext",
        Some("adoc") => "asciidoc",
        Some("html") | Some("htm") => "html",
        _ => "plain",
    }
}
