//! Fall event queries
//!
//! A fall event row is written once when the fall is confirmed. Afterwards only the
//! resolution columns, the alert message reference and the clip path change.

use super::models::{FallEventRecord, NewFallEvent};
use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

const EVENT_COLUMNS: &str = "id, source_id, track_id, score, reason, timestamp, snapshot_path, \
     clip_path, is_resolved, responder_name, responder_id, resolved_at, message_ref";

/// Insert a confirmed fall, returning its id
pub async fn insert_event(pool: &SqlitePool, event: &NewFallEvent) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO fall_events (source_id, track_id, score, reason, timestamp, snapshot_path)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(event.source_id)
    .bind(event.track_id)
    .bind(event.score)
    .bind(&event.reason)
    .bind(event.timestamp)
    .bind(&event.snapshot_path)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Load one event by id
pub async fn load_event(pool: &SqlitePool, id: i64) -> Result<Option<FallEventRecord>> {
    let sql = format!("SELECT {} FROM fall_events WHERE id = ?", EVENT_COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    row.map(|r| row_to_event(&r)).transpose()
}

/// Most recent events, newest first
pub async fn recent_events(pool: &SqlitePool, limit: i64) -> Result<Vec<FallEventRecord>> {
    let sql = format!(
        "SELECT {} FROM fall_events ORDER BY timestamp DESC, id DESC LIMIT ?",
        EVENT_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(limit).fetch_all(pool).await?;
    rows.iter().map(row_to_event).collect()
}

/// Transition an event to resolved
///
/// The update is conditional on `is_resolved = 0`, so only the first caller wins.
/// Returns `false` when the event is missing or was already resolved; in that case no
/// column is touched.
pub async fn mark_resolved(
    pool: &SqlitePool,
    id: i64,
    responder_name: &str,
    responder_id: &str,
    resolved_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE fall_events
        SET is_resolved = 1, responder_name = ?, responder_id = ?, resolved_at = ?
        WHERE id = ? AND is_resolved = 0
        "#,
    )
    .bind(responder_name)
    .bind(responder_id)
    .bind(resolved_at)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Record the external message that carries the alert for this event
pub async fn set_message_ref(pool: &SqlitePool, id: i64, message_ref: &str) -> Result<()> {
    sqlx::query("UPDATE fall_events SET message_ref = ? WHERE id = ?")
        .bind(message_ref)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Attach the encoded clip to an event
pub async fn set_clip_path(pool: &SqlitePool, id: i64, clip_path: &str) -> Result<()> {
    sqlx::query("UPDATE fall_events SET clip_path = ? WHERE id = ?")
        .bind(clip_path)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

fn row_to_event(row: &SqliteRow) -> Result<FallEventRecord> {
    Ok(FallEventRecord {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        track_id: row.try_get("track_id")?,
        score: row.try_get("score")?,
        reason: row.try_get("reason")?,
        timestamp: row.try_get("timestamp")?,
        snapshot_path: row.try_get("snapshot_path")?,
        clip_path: row.try_get("clip_path")?,
        is_resolved: row.try_get::<i64, _>("is_resolved")? != 0,
        responder_name: row.try_get("responder_name")?,
        responder_id: row.try_get("responder_id")?,
        resolved_at: row.try_get("resolved_at")?,
        message_ref: row.try_get("message_ref")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_database;
    use chrono::Duration;

    fn sample_event(source_id: i64, track_id: i64) -> NewFallEvent {
        NewFallEvent {
            source_id,
            track_id,
            score: 0.9,
            reason: "Angle, Ratio".to_string(),
            timestamp: Utc::now(),
            snapshot_path: Some("fall_1_100_3.jpg".to_string()),
        }
    }

    #[tokio::test]
    async fn test_insert_and_load() {
        let pool = init_memory_database().await.unwrap();
        let id = insert_event(&pool, &sample_event(1, 3)).await.unwrap();

        let event = load_event(&pool, id).await.unwrap().unwrap();
        assert_eq!(event.source_id, 1);
        assert_eq!(event.track_id, 3);
        assert_eq!(event.reason, "Angle, Ratio");
        assert!(!event.is_resolved);
        assert!(event.resolved_at.is_none());
        assert!(event.message_ref.is_none());

        assert!(load_event(&pool, id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_first_resolution_wins() {
        let pool = init_memory_database().await.unwrap();
        let id = insert_event(&pool, &sample_event(1, 3)).await.unwrap();

        let first_time = Utc::now();
        assert!(mark_resolved(&pool, id, "alice", "111", first_time).await.unwrap());

        let later = first_time + Duration::seconds(30);
        assert!(!mark_resolved(&pool, id, "bob", "222", later).await.unwrap());

        let event = load_event(&pool, id).await.unwrap().unwrap();
        assert!(event.is_resolved);
        assert_eq!(event.responder_name.as_deref(), Some("alice"));
        assert_eq!(event.responder_id.as_deref(), Some("111"));
        assert_eq!(event.resolved_at, Some(first_time));
    }

    #[tokio::test]
    async fn test_resolving_missing_event_is_false() {
        let pool = init_memory_database().await.unwrap();
        assert!(!mark_resolved(&pool, 42, "alice", "1", Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_message_ref_and_clip_and_recent_order() {
        let pool = init_memory_database().await.unwrap();
        let mut older = sample_event(1, 1);
        older.timestamp = Utc::now() - Duration::minutes(5);
        let older_id = insert_event(&pool, &older).await.unwrap();
        let newer_id = insert_event(&pool, &sample_event(2, 7)).await.unwrap();

        set_message_ref(&pool, newer_id, "555").await.unwrap();
        set_clip_path(&pool, newer_id, "fall_clip_2_1_7.mp4").await.unwrap();

        let recent = recent_events(&pool, 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, newer_id);
        assert_eq!(recent[1].id, older_id);
        assert_eq!(recent[0].message_ref.as_deref(), Some("555"));
        assert_eq!(recent[0].clip_path.as_deref(), Some("fall_clip_2_1_7.mp4"));

        assert_eq!(recent_events(&pool, 1).await.unwrap().len(), 1);
    }
}
