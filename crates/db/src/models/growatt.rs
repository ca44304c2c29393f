use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use ts_rs::TS;
use uuid::Uuid;

const PLANT_COLUMNS: &str = "plant_id, name, city, peak_power_kw, current_power_w, today_energy_kwh, total_energy_kwh, plant_status, data_updated_at, fetched_at, last_attempt_at, last_error";

/// Last known Growatt data for one plant. Failed refreshes keep the old numbers.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct GrowattPlantCache {
    pub plant_id: String,
    pub name: String,
    pub city: Option<String>,
    pub peak_power_kw: Option<f64>,
    pub current_power_w: Option<f64>,
    pub today_energy_kwh: Option<f64>,
    pub total_energy_kwh: Option<f64>,
    pub plant_status: Option<String>,
    pub data_updated_at: Option<String>, // as reported by Growatt, plant local time
    pub fetched_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Fresh values for one plant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantData {
    pub plant_id: String,
    pub name: String,
    pub city: Option<String>,
    pub peak_power_kw: Option<f64>,
    pub current_power_w: Option<f64>,
    pub today_energy_kwh: Option<f64>,
    pub total_energy_kwh: Option<f64>,
    pub plant_status: Option<String>,
    pub data_updated_at: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct GrowattSyncRun {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub plants_ok: i64,
    pub plants_failed: i64,
    pub error: Option<String>,
}

impl GrowattPlantCache {
    pub async fn find_by_plant_id(
        pool: &SqlitePool,
        plant_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, GrowattPlantCache>(&format!(
            "SELECT {PLANT_COLUMNS} FROM growatt_plants WHERE plant_id = $1"
        ))
        .bind(plant_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_all(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, GrowattPlantCache>(&format!(
            "SELECT {PLANT_COLUMNS} FROM growatt_plants ORDER BY name ASC"
        ))
        .fetch_all(pool)
        .await
    }

    /// Store a successful fetch and clear any previous error
    pub async fn upsert_data(
        pool: &SqlitePool,
        data: &PlantData,
        fetched_at: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, GrowattPlantCache>(&format!(
            "INSERT INTO growatt_plants (plant_id, name, city, peak_power_kw, current_power_w, today_energy_kwh, total_energy_kwh, plant_status, data_updated_at, fetched_at, last_attempt_at, last_error)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10, NULL)
             ON CONFLICT(plant_id) DO UPDATE SET
                name = excluded.name,
                city = coalesce(excluded.city, city),
                peak_power_kw = coalesce(excluded.peak_power_kw, peak_power_kw),
                current_power_w = excluded.current_power_w,
                today_energy_kwh = excluded.today_energy_kwh,
                total_energy_kwh = excluded.total_energy_kwh,
                plant_status = excluded.plant_status,
                data_updated_at = excluded.data_updated_at,
                fetched_at = excluded.fetched_at,
                last_attempt_at = excluded.last_attempt_at,
                last_error = NULL
             RETURNING {PLANT_COLUMNS}"
        ))
        .bind(&data.plant_id)
        .bind(&data.name)
        .bind(&data.city)
        .bind(data.peak_power_kw)
        .bind(data.current_power_w)
        .bind(data.today_energy_kwh)
        .bind(data.total_energy_kwh)
        .bind(&data.plant_status)
        .bind(&data.data_updated_at)
        .bind(fetched_at)
        .fetch_one(pool)
        .await
    }

    /// Remember a failed refresh without discarding the cached numbers
    pub async fn record_failure(
        pool: &SqlitePool,
        plant_id: &str,
        name: &str,
        error: &str,
        attempted_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO growatt_plants (plant_id, name, last_attempt_at, last_error)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT(plant_id) DO UPDATE SET
                last_attempt_at = excluded.last_attempt_at,
                last_error = excluded.last_error",
        )
        .bind(plant_id)
        .bind(name)
        .bind(attempted_at)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(())
    }
}

impl GrowattSyncRun {
    pub async fn start(pool: &SqlitePool) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, GrowattSyncRun>(
            "INSERT INTO growatt_sync_runs (id, started_at) VALUES ($1, $2)
             RETURNING id, started_at, finished_at, plants_ok, plants_failed, error",
        )
        .bind(Uuid::new_v4())
        .bind(Utc::now())
        .fetch_one(pool)
        .await
    }

    pub async fn finish(
        pool: &SqlitePool,
        id: Uuid,
        plants_ok: i64,
        plants_failed: i64,
        error: Option<&str>,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, GrowattSyncRun>(
            "UPDATE growatt_sync_runs SET finished_at = $2, plants_ok = $3, plants_failed = $4, error = $5
             WHERE id = $1
             RETURNING id, started_at, finished_at, plants_ok, plants_failed, error",
        )
        .bind(id)
        .bind(Utc::now())
        .bind(plants_ok)
        .bind(plants_failed)
        .bind(error)
        .fetch_one(pool)
        .await
    }

    pub async fn find_latest(pool: &SqlitePool) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, GrowattSyncRun>(
            "SELECT id, started_at, finished_at, plants_ok, plants_failed, error
             FROM growatt_sync_runs
             ORDER BY datetime(started_at) DESC, rowid DESC
             LIMIT 1",
        )
        .fetch_optional(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DBService;

    fn plant(power: f64) -> PlantData {
        PlantData {
            plant_id: "1234567".into(),
            name: "Casa Ramirez".into(),
            city: Some("Hermosillo".into()),
            peak_power_kw: Some(6.6),
            current_power_w: Some(power),
            today_energy_kwh: Some(21.4),
            total_energy_kwh: Some(9800.0),
            plant_status: Some("online".into()),
            data_updated_at: Some("2026-10-16 12:00:00".into()),
        }
    }

    #[tokio::test]
    async fn failure_keeps_previous_data() {
        let db = DBService::new_in_memory().await.unwrap();
        let fetched_at = Utc::now();
        GrowattPlantCache::upsert_data(&db.pool, &plant(4200.0), fetched_at)
            .await
            .unwrap();

        GrowattPlantCache::record_failure(&db.pool, "1234567", "Casa Ramirez", "timeout", Utc::now())
            .await
            .unwrap();

        let cached = GrowattPlantCache::find_by_plant_id(&db.pool, "1234567")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.current_power_w, Some(4200.0));
        assert_eq!(cached.last_error.as_deref(), Some("timeout"));
        assert!(cached.fetched_at.is_some());

        let refreshed = GrowattPlantCache::upsert_data(&db.pool, &plant(3900.0), Utc::now())
            .await
            .unwrap();
        assert_eq!(refreshed.current_power_w, Some(3900.0));
        assert!(refreshed.last_error.is_none());
    }

    #[tokio::test]
    async fn latest_sync_run_is_returned() {
        let db = DBService::new_in_memory().await.unwrap();
        assert!(GrowattSyncRun::find_latest(&db.pool).await.unwrap().is_none());
        let run = GrowattSyncRun::start(&db.pool).await.unwrap();
        GrowattSyncRun::finish(&db.pool, run.id, 3, 1, None).await.unwrap();
        let latest = GrowattSyncRun::find_latest(&db.pool).await.unwrap().unwrap();
        assert_eq!(latest.id, run.id);
        assert_eq!((latest.plants_ok, latest.plants_failed), (3, 1));
        assert!(latest.finished_at.is_some());
    }
}
