//! Event persistence seam
//!
//! Workers and the resolution workflow talk to storage through [`EventStore`]; the
//! production implementation forwards to the SQLite queries in `fallguard_common::db`.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fallguard_common::db::{self, FallEventRecord, NewFallEvent};
use sqlx::SqlitePool;

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist a confirmed fall, returning its id
    async fn save_event(&self, event: &NewFallEvent) -> Result<i64>;

    async fn load_event(&self, id: i64) -> Result<Option<FallEventRecord>>;

    /// Resolve an event; `false` when missing or already resolved
    async fn mark_resolved(
        &self,
        id: i64,
        responder_name: &str,
        responder_id: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn set_message_ref(&self, id: i64, message_ref: &str) -> Result<()>;

    async fn set_clip_path(&self, id: i64, clip_path: &str) -> Result<()>;

    async fn recent_events(&self, limit: i64) -> Result<Vec<FallEventRecord>>;
}

/// SQLite-backed store
#[derive(Clone)]
pub struct SqliteEventStore {
    pool: SqlitePool,
}

impl SqliteEventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn save_event(&self, event: &NewFallEvent) -> Result<i64> {
        Ok(db::events::insert_event(&self.pool, event).await?)
    }

    async fn load_event(&self, id: i64) -> Result<Option<FallEventRecord>> {
        Ok(db::events::load_event(&self.pool, id).await?)
    }

    async fn mark_resolved(
        &self,
        id: i64,
        responder_name: &str,
        responder_id: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(db::events::mark_resolved(&self.pool, id, responder_name, responder_id, resolved_at).await?)
    }

    async fn set_message_ref(&self, id: i64, message_ref: &str) -> Result<()> {
        Ok(db::events::set_message_ref(&self.pool, id, message_ref).await?)
    }

    async fn set_clip_path(&self, id: i64, clip_path: &str) -> Result<()> {
        Ok(db::events::set_clip_path(&self.pool, id, clip_path).await?)
    }

    async fn recent_events(&self, limit: i64) -> Result<Vec<FallEventRecord>> {
        Ok(db::events::recent_events(&self.pool, limit).await?)
    }
}
