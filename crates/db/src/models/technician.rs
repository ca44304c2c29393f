use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use ts_rs::TS;
use uuid::Uuid;

const TECHNICIAN_COLUMNS: &str =
    "id, name, phone, email, active, work_start_hour, work_end_hour, created_at, updated_at";

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Technician {
    pub id: Uuid,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub active: bool,
    pub work_start_hour: i32, // first bookable hour
    pub work_end_hour: i32,   // visits must finish by this hour
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateTechnician {
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub work_start_hour: Option<i32>,
    pub work_end_hour: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct UpdateTechnician {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub active: Option<bool>,
    pub work_start_hour: Option<i32>,
    pub work_end_hour: Option<i32>,
}

impl Technician {
    pub async fn find_all(pool: &SqlitePool, active_only: bool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Technician>(&format!(
            "SELECT {TECHNICIAN_COLUMNS} FROM technicians
             WHERE ($1 = 0 OR active = 1)
             ORDER BY name ASC"
        ))
        .bind(active_only)
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Technician>(&format!(
            "SELECT {TECHNICIAN_COLUMNS} FROM technicians WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn create(
        pool: &SqlitePool,
        data: &CreateTechnician,
        technician_id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Technician>(&format!(
            "INSERT INTO technicians (id, name, phone, email, work_start_hour, work_end_hour)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {TECHNICIAN_COLUMNS}"
        ))
        .bind(technician_id)
        .bind(&data.name)
        .bind(&data.phone)
        .bind(&data.email)
        .bind(data.work_start_hour.unwrap_or(8))
        .bind(data.work_end_hour.unwrap_or(18))
        .fetch_one(pool)
        .await
    }

    pub async fn update(
        pool: &SqlitePool,
        id: Uuid,
        data: &UpdateTechnician,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Technician>(&format!(
            "UPDATE technicians SET
                name = coalesce($2, name),
                phone = coalesce($3, phone),
                email = coalesce($4, email),
                active = coalesce($5, active),
                work_start_hour = coalesce($6, work_start_hour),
                work_end_hour = coalesce($7, work_end_hour),
                updated_at = datetime('now', 'subsec')
             WHERE id = $1
             RETURNING {TECHNICIAN_COLUMNS}"
        ))
        .bind(id)
        .bind(&data.name)
        .bind(&data.phone)
        .bind(&data.email)
        .bind(data.active)
        .bind(data.work_start_hour)
        .bind(data.work_end_hour)
        .fetch_optional(pool)
        .await
    }

    /// Technicians are never hard-deleted; past visits keep pointing at them
    pub async fn deactivate(pool: &SqlitePool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE technicians SET active = 0, updated_at = datetime('now', 'subsec') WHERE id = $1",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
