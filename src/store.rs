//! Index Store: source records and chunk persistence.
//!
//! All writes go through whole-row updates or batched bulk inserts capped at
//! [`WRITE_BATCH`] rows to respect write-batch limits; there is no
//! optimistic concurrency, last writer wins. Delete-then-insert is not
//! atomic across a whole source — readers that need a consistent view must
//! check `Source::state == Ready` first.

use anyhow::Result;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{Chunk, RunStatus, Source, SourceState};

/// Rows per bulk write or cascade delete.
pub const WRITE_BATCH: usize = 500;

// ============ Sources ============

pub async fn create_source(
    pool: &SqlitePool,
    owner: &str,
    repo: &str,
    branch: &str,
) -> Result<Source> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO sources (id, owner, repo, branch, state, progress, created_at)
        VALUES (?, ?, ?, ?, 'pending', 0, ?)
        "#,
    )
    .bind(&id)
    .bind(owner)
    .bind(repo)
    .bind(branch)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(Source {
        id,
        owner: owner.to_string(),
        repo: repo.to_string(),
        branch: branch.to_string(),
        state: SourceState::Pending,
        progress: 0,
        error: None,
        file_count: 0,
        chunk_count: 0,
        last_sync: None,
        created_at: now,
    })
}

pub async fn get_source(pool: &SqlitePool, id: &str) -> Result<Option<Source>> {
    let row = sqlx::query("SELECT * FROM sources WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| source_from_row(&r)))
}

/// Look up by `owner/repo`, any branch. Used by the CLI.
pub async fn find_source(pool: &SqlitePool, owner: &str, repo: &str) -> Result<Option<Source>> {
    let row = sqlx::query("SELECT * FROM sources WHERE owner = ? AND repo = ? LIMIT 1")
        .bind(owner)
        .bind(repo)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| source_from_row(&r)))
}

pub async fn list_sources(pool: &SqlitePool) -> Result<Vec<Source>> {
    let rows = sqlx::query("SELECT * FROM sources ORDER BY created_at, id")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(source_from_row).collect())
}

/// Write a status checkpoint. `state`, `progress`, and `error` are always
/// written (a `None` error clears any stale message); counts and sync time
/// are only written when present so mid-run checkpoints leave the previous
/// run's totals readable.
pub async fn update_status(pool: &SqlitePool, source_id: &str, status: &RunStatus) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE sources SET
            state = ?,
            progress = ?,
            error = ?,
            file_count = COALESCE(?, file_count),
            chunk_count = COALESCE(?, chunk_count),
            last_sync = COALESCE(?, last_sync)
        WHERE id = ?
        "#,
    )
    .bind(status.state.as_str())
    .bind(status.progress)
    .bind(&status.error)
    .bind(status.file_count)
    .bind(status.chunk_count)
    .bind(status.last_sync)
    .bind(source_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Acquire the indexing lease for a source.
///
/// Atomic compare-and-set: succeeds only when no lease is held or the held
/// lease has expired. Returns the new run id, or `None` when another run is
/// live.
pub async fn acquire_lease(
    pool: &SqlitePool,
    source_id: &str,
    lease_secs: i64,
) -> Result<Option<String>> {
    let run_id = Uuid::new_v4().to_string();
    let now = Utc::now().timestamp();

    let result = sqlx::query(
        r#"
        UPDATE sources SET run_id = ?, run_expires_at = ?
        WHERE id = ? AND (run_id IS NULL OR run_expires_at < ?)
        "#,
    )
    .bind(&run_id)
    .bind(now + lease_secs)
    .bind(source_id)
    .bind(now)
    .execute(pool)
    .await?;

    Ok((result.rows_affected() == 1).then_some(run_id))
}

/// Release a lease, only if this run still holds it.
pub async fn release_lease(pool: &SqlitePool, source_id: &str, run_id: &str) -> Result<()> {
    sqlx::query("UPDATE sources SET run_id = NULL, run_expires_at = NULL WHERE id = ? AND run_id = ?")
        .bind(source_id)
        .bind(run_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete a source and all of its chunks (batched).
pub async fn delete_source(pool: &SqlitePool, source_id: &str) -> Result<()> {
    delete_chunks(pool, source_id).await?;
    sqlx::query("DELETE FROM sources WHERE id = ?")
        .bind(source_id)
        .execute(pool)
        .await?;
    Ok(())
}

fn source_from_row(row: &SqliteRow) -> Source {
    let state: String = row.get("state");
    Source {
        id: row.get("id"),
        owner: row.get("owner"),
        repo: row.get("repo"),
        branch: row.get("branch"),
        state: SourceState::parse(&state),
        progress: row.get("progress"),
        error: row.get("error"),
        file_count: row.get("file_count"),
        chunk_count: row.get("chunk_count"),
        last_sync: row.get("last_sync"),
        created_at: row.get("created_at"),
    }
}

// ============ Chunks ============

/// Delete all chunks for a source in [`WRITE_BATCH`]-sized rounds.
pub async fn delete_chunks(pool: &SqlitePool, source_id: &str) -> Result<u64> {
    let mut deleted = 0u64;
    loop {
        let result = sqlx::query(
            "DELETE FROM chunks WHERE id IN \
             (SELECT id FROM chunks WHERE source_id = ? LIMIT ?)",
        )
        .bind(source_id)
        .bind(WRITE_BATCH as i64)
        .execute(pool)
        .await?;

        deleted += result.rows_affected();
        if result.rows_affected() == 0 {
            break;
        }
    }
    Ok(deleted)
}

/// Append chunks in [`WRITE_BATCH`]-sized transactions.
pub async fn insert_chunks(pool: &SqlitePool, chunks: &[Chunk]) -> Result<()> {
    for batch in chunks.chunks(WRITE_BATCH) {
        let mut tx = pool.begin().await?;
        for chunk in batch {
            sqlx::query(
                r#"
                INSERT INTO chunks
                    (id, source_id, repo_name, file_path, chunk_index, content, language, hash, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.source_id)
            .bind(&chunk.repo_name)
            .bind(&chunk.file_path)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(&chunk.language)
            .bind(&chunk.hash)
            .bind(chunk.created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
    }
    Ok(())
}

/// Delete-all-then-insert for a source. Not atomic across the whole call.
pub async fn replace_chunks(pool: &SqlitePool, source_id: &str, chunks: &[Chunk]) -> Result<()> {
    delete_chunks(pool, source_id).await?;
    insert_chunks(pool, chunks).await?;
    Ok(())
}

/// Scan stored chunks in insertion order, optionally filtered to one
/// source, capped at `limit`. This is the retrieval scorer's candidate
/// window — deliberately a bounded scan, not an index lookup.
pub async fn query_chunks(
    pool: &SqlitePool,
    source_id: Option<&str>,
    limit: i64,
) -> Result<Vec<Chunk>> {
    let rows = match source_id {
        Some(sid) => {
            sqlx::query("SELECT * FROM chunks WHERE source_id = ? ORDER BY rowid LIMIT ?")
                .bind(sid)
                .bind(limit)
                .fetch_all(pool)
                .await?
        }
        None => {
            sqlx::query("SELECT * FROM chunks ORDER BY rowid LIMIT ?")
                .bind(limit)
                .fetch_all(pool)
                .await?
        }
    };

    Ok(rows.iter().map(chunk_from_row).collect())
}

pub async fn count_chunks(pool: &SqlitePool, source_id: &str) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunks WHERE source_id = ?")
        .bind(source_id)
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

fn chunk_from_row(row: &SqliteRow) -> Chunk {
    Chunk {
        id: row.get("id"),
        source_id: row.get("source_id"),
        repo_name: row.get("repo_name"),
        file_path: row.get("file_path"),
        chunk_index: row.get("chunk_index"),
        content: row.get("content"),
        language: row.get("language"),
        hash: row.get("hash"),
        created_at: row.get("created_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate;

    async fn test_pool() -> SqlitePool {
        let pool = db::connect_memory().await.unwrap();
        migrate::apply_schema(&pool).await.unwrap();
        pool
    }

    fn make_chunk(source_id: &str, path: &str, index: i64, content: &str) -> Chunk {
        Chunk {
            id: Uuid::new_v4().to_string(),
            source_id: source_id.to_string(),
            repo_name: "acme/docs".to_string(),
            file_path: path.to_string(),
            chunk_index: index,
            content: content.to_string(),
            language: "markdown".to_string(),
            hash: format!("h{index}"),
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn create_and_get_source() {
        let pool = test_pool().await;
        let src = create_source(&pool, "acme", "docs", "main").await.unwrap();

        let loaded = get_source(&pool, &src.id).await.unwrap().unwrap();
        assert_eq!(loaded.owner, "acme");
        assert_eq!(loaded.state, SourceState::Pending);
        assert_eq!(loaded.progress, 0);
    }

    #[tokio::test]
    async fn get_source_missing_returns_none() {
        let pool = test_pool().await;
        assert!(get_source(&pool, "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn status_checkpoint_preserves_counts_until_set() {
        let pool = test_pool().await;
        let src = create_source(&pool, "acme", "docs", "main").await.unwrap();

        let mut status = RunStatus::started();
        status.advance(20);
        update_status(&pool, &src.id, &status).await.unwrap();

        let mid = get_source(&pool, &src.id).await.unwrap().unwrap();
        assert_eq!(mid.state, SourceState::Indexing);
        assert_eq!(mid.progress, 20);
        assert_eq!(mid.file_count, 0);

        status.state = SourceState::Ready;
        status.advance(100);
        status.file_count = Some(4);
        status.chunk_count = Some(17);
        status.last_sync = Some(1_700_000_000);
        update_status(&pool, &src.id, &status).await.unwrap();

        let done = get_source(&pool, &src.id).await.unwrap().unwrap();
        assert_eq!(done.state, SourceState::Ready);
        assert_eq!(done.progress, 100);
        assert_eq!(done.file_count, 4);
        assert_eq!(done.chunk_count, 17);
        assert_eq!(done.last_sync, Some(1_700_000_000));
    }

    #[tokio::test]
    async fn lease_blocks_second_acquire() {
        let pool = test_pool().await;
        let src = create_source(&pool, "acme", "docs", "main").await.unwrap();

        let run = acquire_lease(&pool, &src.id, 900).await.unwrap();
        assert!(run.is_some());
        assert!(acquire_lease(&pool, &src.id, 900).await.unwrap().is_none());

        release_lease(&pool, &src.id, &run.unwrap()).await.unwrap();
        assert!(acquire_lease(&pool, &src.id, 900).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expired_lease_can_be_reacquired() {
        let pool = test_pool().await;
        let src = create_source(&pool, "acme", "docs", "main").await.unwrap();

        // Negative duration: expires immediately.
        assert!(acquire_lease(&pool, &src.id, -1).await.unwrap().is_some());
        assert!(acquire_lease(&pool, &src.id, 900).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stale_release_does_not_clear_new_lease() {
        let pool = test_pool().await;
        let src = create_source(&pool, "acme", "docs", "main").await.unwrap();

        let old = acquire_lease(&pool, &src.id, -1).await.unwrap().unwrap();
        let _new = acquire_lease(&pool, &src.id, 900).await.unwrap().unwrap();

        release_lease(&pool, &src.id, &old).await.unwrap();
        assert!(
            acquire_lease(&pool, &src.id, 900).await.unwrap().is_none(),
            "stale release must not free the live lease"
        );
    }

    #[tokio::test]
    async fn replace_chunks_replaces_not_appends() {
        let pool = test_pool().await;
        let src = create_source(&pool, "acme", "docs", "main").await.unwrap();

        let first: Vec<Chunk> = (0..3)
            .map(|i| make_chunk(&src.id, "a.md", i, "first run"))
            .collect();
        replace_chunks(&pool, &src.id, &first).await.unwrap();

        let second: Vec<Chunk> = (0..2)
            .map(|i| make_chunk(&src.id, "a.md", i, "second run"))
            .collect();
        replace_chunks(&pool, &src.id, &second).await.unwrap();

        assert_eq!(count_chunks(&pool, &src.id).await.unwrap(), 2);
        let stored = query_chunks(&pool, Some(&src.id), 100).await.unwrap();
        assert!(stored.iter().all(|c| c.content == "second run"));
    }

    #[tokio::test]
    async fn query_chunks_respects_limit_and_order() {
        let pool = test_pool().await;
        let src = create_source(&pool, "acme", "docs", "main").await.unwrap();

        let chunks: Vec<Chunk> = (0..10)
            .map(|i| make_chunk(&src.id, "a.md", i, &format!("chunk {i}")))
            .collect();
        insert_chunks(&pool, &chunks).await.unwrap();

        let scanned = query_chunks(&pool, Some(&src.id), 4).await.unwrap();
        assert_eq!(scanned.len(), 4);
        assert_eq!(scanned[0].content, "chunk 0");
        assert_eq!(scanned[3].content, "chunk 3");
    }

    #[tokio::test]
    async fn delete_source_cascades_chunks() {
        let pool = test_pool().await;
        let src = create_source(&pool, "acme", "docs", "main").await.unwrap();

        let chunks: Vec<Chunk> = (0..7)
            .map(|i| make_chunk(&src.id, "a.md", i, "text"))
            .collect();
        insert_chunks(&pool, &chunks).await.unwrap();

        delete_source(&pool, &src.id).await.unwrap();
        assert!(get_source(&pool, &src.id).await.unwrap().is_none());
        assert_eq!(count_chunks(&pool, &src.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn bulk_insert_handles_more_than_one_batch() {
        let pool = test_pool().await;
        let src = create_source(&pool, "acme", "docs", "main").await.unwrap();

        let chunks: Vec<Chunk> = (0..(WRITE_BATCH as i64 + 50))
            .map(|i| make_chunk(&src.id, "big.md", i, "text"))
            .collect();
        insert_chunks(&pool, &chunks).await.unwrap();

        assert_eq!(
            count_chunks(&pool, &src.id).await.unwrap(),
            WRITE_BATCH as i64 + 50
        );
    }
}
