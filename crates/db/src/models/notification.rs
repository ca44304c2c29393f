use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Notification {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub async fn create(pool: &SqlitePool, title: &str, body: &str) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Notification>(
            "INSERT INTO notifications (id, title, body) VALUES ($1, $2, $3)
             RETURNING id, title, body, read, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(title)
        .bind(body)
        .fetch_one(pool)
        .await
    }

    pub async fn find_recent(
        pool: &SqlitePool,
        unread_only: bool,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Notification>(
            "SELECT id, title, body, read, created_at FROM notifications
             WHERE ($1 = 0 OR read = 0)
             ORDER BY created_at DESC, rowid DESC
             LIMIT $2",
        )
        .bind(unread_only)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    pub async fn mark_read(pool: &SqlitePool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("UPDATE notifications SET read = 1 WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn mark_all_read(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("UPDATE notifications SET read = 1 WHERE read = 0")
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
