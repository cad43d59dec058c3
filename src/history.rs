//! Conversation and turn persistence.
//!
//! Turns are strictly ordered by an autoincrement sequence so history
//! windows stay stable even when two turns share a timestamp. Citations are
//! stored as a JSON array on the assistant turn.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{Citation, Conversation, Role, Turn};

pub async fn create_conversation(
    pool: &SqlitePool,
    owner: &str,
    title: &str,
    guide_id: Option<&str>,
) -> Result<Conversation, sqlx::Error> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO conversations (id, owner, title, pinned, guide_id, message_count, created_at)
        VALUES (?, ?, ?, 0, ?, 0, ?)
        "#,
    )
    .bind(&id)
    .bind(owner)
    .bind(title)
    .bind(guide_id)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(Conversation {
        id,
        owner: owner.to_string(),
        title: title.to_string(),
        pinned: false,
        guide_id: guide_id.map(|s| s.to_string()),
        message_count: 0,
        created_at: now,
    })
}

pub async fn get_conversation(
    pool: &SqlitePool,
    id: &str,
) -> Result<Option<Conversation>, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM conversations WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| conversation_from_row(&r)))
}

/// Pinned conversations first, then most recent.
pub async fn list_conversations(
    pool: &SqlitePool,
    owner: Option<&str>,
) -> Result<Vec<Conversation>, sqlx::Error> {
    let rows = match owner {
        Some(owner) => {
            sqlx::query(
                "SELECT * FROM conversations WHERE owner = ? \
                 ORDER BY pinned DESC, created_at DESC, id",
            )
            .bind(owner)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query("SELECT * FROM conversations ORDER BY pinned DESC, created_at DESC, id")
                .fetch_all(pool)
                .await?
        }
    };
    Ok(rows.iter().map(conversation_from_row).collect())
}

pub async fn update_conversation(
    pool: &SqlitePool,
    id: &str,
    title: Option<&str>,
    pinned: Option<bool>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE conversations SET title = COALESCE(?, title), pinned = COALESCE(?, pinned) \
         WHERE id = ?",
    )
    .bind(title)
    .bind(pinned)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Delete a conversation and all of its turns.
pub async fn delete_conversation(pool: &SqlitePool, id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM turns WHERE conversation_id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM conversations WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Append a turn and bump the conversation's message count.
pub async fn append_turn(
    pool: &SqlitePool,
    conversation_id: &str,
    role: Role,
    content: &str,
    citations: &[Citation],
    is_error: bool,
) -> Result<Turn, sqlx::Error> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().timestamp();
    let citations_json =
        serde_json::to_string(citations).unwrap_or_else(|_| "[]".to_string());

    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"
        INSERT INTO turns (id, conversation_id, role, content, citations, is_error, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(conversation_id)
    .bind(role.as_str())
    .bind(content)
    .bind(&citations_json)
    .bind(is_error)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE conversations SET message_count = message_count + 1 WHERE id = ?")
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(Turn {
        id,
        conversation_id: conversation_id.to_string(),
        role,
        content: content.to_string(),
        citations: citations.to_vec(),
        is_error,
        created_at: now,
    })
}

/// Load the most recent `limit` turns in chronological order.
pub async fn load_recent_turns(
    pool: &SqlitePool,
    conversation_id: &str,
    limit: u32,
) -> Result<Vec<Turn>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT * FROM (\
            SELECT * FROM turns WHERE conversation_id = ? ORDER BY seq DESC LIMIT ?\
         ) ORDER BY seq ASC",
    )
    .bind(conversation_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(turn_from_row).collect())
}

/// All turns, oldest first.
pub async fn list_turns(
    pool: &SqlitePool,
    conversation_id: &str,
) -> Result<Vec<Turn>, sqlx::Error> {
    let rows = sqlx::query("SELECT * FROM turns WHERE conversation_id = ? ORDER BY seq ASC")
        .bind(conversation_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(turn_from_row).collect())
}

pub async fn count_turns(pool: &SqlitePool, conversation_id: &str) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM turns WHERE conversation_id = ?")
        .bind(conversation_id)
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

/// Conversation title derived from the first user message.
pub fn derive_title(text: &str) -> String {
    let first_line = text.trim().lines().next().unwrap_or("").trim();
    let mut title: String = first_line.chars().take(60).collect();
    if first_line.chars().count() > 60 {
        title.push('…');
    }
    if title.is_empty() {
        title.push_str("New conversation");
    }
    title
}

fn conversation_from_row(row: &SqliteRow) -> Conversation {
    Conversation {
        id: row.get("id"),
        owner: row.get("owner"),
        title: row.get("title"),
        pinned: row.get::<i64, _>("pinned") != 0,
        guide_id: row.get("guide_id"),
        message_count: row.get("message_count"),
        created_at: row.get("created_at"),
    }
}

fn turn_from_row(row: &SqliteRow) -> Turn {
    let role: String = row.get("role");
    let citations_json: String = row.get("citations");
    Turn {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        role: Role::parse(&role),
        content: row.get("content"),
        citations: serde_json::from_str(&citations_json).unwrap_or_default(),
        is_error: row.get::<i64, _>("is_error") != 0,
        created_at: row.get("created_at"),
    }
}
