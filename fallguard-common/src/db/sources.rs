//! Group and video source queries

use super::models::{Group, SourceKind, VideoSource};
use crate::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

/// Create a notification group
pub async fn insert_group(
    pool: &SqlitePool,
    name: &str,
    chat_id: Option<&str>,
    bot_token: Option<&str>,
) -> Result<i64> {
    let result = sqlx::query("INSERT INTO groups (name, chat_id, bot_token) VALUES (?, ?, ?)")
        .bind(name)
        .bind(chat_id)
        .bind(bot_token)
        .execute(pool)
        .await?;
    Ok(result.last_insert_rowid())
}

pub async fn get_group(pool: &SqlitePool, id: i64) -> Result<Option<Group>> {
    let row = sqlx::query("SELECT id, name, chat_id, bot_token FROM groups WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| Group {
        id: r.get("id"),
        name: r.get("name"),
        chat_id: r.get("chat_id"),
        bot_token: r.get("bot_token"),
    }))
}

/// Register a video source
pub async fn insert_source(
    pool: &SqlitePool,
    name: &str,
    source_url: &str,
    kind: SourceKind,
    group_id: Option<i64>,
) -> Result<i64> {
    if source_url.trim().is_empty() {
        return Err(Error::InvalidInput("source_url must not be empty".to_string()));
    }

    let result = sqlx::query(
        "INSERT INTO video_sources (name, source_url, kind, group_id) VALUES (?, ?, ?, ?)",
    )
    .bind(name)
    .bind(source_url)
    .bind(kind.as_str())
    .bind(group_id)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn get_source(pool: &SqlitePool, id: i64) -> Result<Option<VideoSource>> {
    let row = sqlx::query(
        "SELECT id, name, source_url, kind, group_id, is_active FROM video_sources WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(|r| row_to_source(&r)).transpose()
}

/// All sources flagged active, in id order
pub async fn list_active_sources(pool: &SqlitePool) -> Result<Vec<VideoSource>> {
    let rows = sqlx::query(
        "SELECT id, name, source_url, kind, group_id, is_active FROM video_sources \
         WHERE is_active = 1 ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_source).collect()
}

fn row_to_source(row: &SqliteRow) -> Result<VideoSource> {
    let kind: String = row.try_get("kind")?;
    Ok(VideoSource {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        source_url: row.try_get("source_url")?,
        kind: kind.parse()?,
        group_id: row.try_get("group_id")?,
        is_active: row.try_get::<i64, _>("is_active")? != 0,
    })
}
