//! Periodic Growatt sync into the local cache, and cache reads with a stale fallback.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use db::{
    DBService,
    models::growatt::{GrowattPlantCache, GrowattSyncRun, PlantData},
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::{interval, sleep};
use tracing::{debug, error, info, warn};
use ts_rs::TS;

use super::{
    config::GrowattConfig,
    growatt::{GrowattError, GrowattSession, PlantOverview, PlantSummary},
};

/// A cached plant plus whether its numbers can still be trusted
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct PlantSnapshot {
    #[serde(flatten)]
    #[ts(flatten)]
    pub plant: GrowattPlantCache,
    pub stale: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct SolarOverview {
    pub plants: Vec<PlantSnapshot>,
    pub last_sync: Option<GrowattSyncRun>,
}

/// Fresh means fetched within the TTL with no failed attempt after that fetch
pub fn is_fresh(plant: &GrowattPlantCache, now: DateTime<Utc>, ttl_secs: i64) -> bool {
    let Some(fetched_at) = plant.fetched_at else {
        return false;
    };
    let failed_since = plant.last_error.is_some()
        && plant.last_attempt_at.is_some_and(|attempt| attempt > fetched_at);
    !failed_since && now - fetched_at <= chrono::Duration::seconds(ttl_secs)
}

fn plant_data(summary: &PlantSummary, overview: PlantOverview) -> PlantData {
    PlantData {
        plant_id: summary.plant_id.clone(),
        name: summary.name.clone(),
        city: summary.city.clone(),
        peak_power_kw: summary.peak_power,
        current_power_w: overview.current_power,
        today_energy_kwh: overview.today_energy,
        total_energy_kwh: overview.total_energy,
        plant_status: overview.status,
        data_updated_at: overview.last_update_time,
    }
}

#[derive(Clone)]
pub struct GrowattSyncService {
    db: DBService,
    session: Arc<GrowattSession>,
    config: GrowattConfig,
}

impl GrowattSyncService {
    pub fn new(db: DBService, session: Arc<GrowattSession>, config: GrowattConfig) -> Self {
        Self {
            db,
            session,
            config,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub async fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.start().await;
        })
    }

    async fn start(&self) {
        let poll_interval = Duration::from_secs(self.config.sync_interval_secs.max(60));
        info!(
            "Starting Growatt sync with interval {:?}, batch size {}",
            poll_interval, self.config.batch_size
        );

        let mut interval = interval(poll_interval);

        loop {
            interval.tick().await;
            match self.sync_once().await {
                Ok(run) if run.error.is_some() => {
                    warn!("Growatt sync run {} failed: {:?}", run.id, run.error)
                }
                Ok(run) => debug!(
                    run_id = %run.id,
                    ok = run.plants_ok,
                    failed = run.plants_failed,
                    "Growatt sync run finished"
                ),
                Err(e) => error!("Error running Growatt sync: {}", e),
            }
        }
    }

    /// Refresh every plant on the account. Login or listing failures end the run early;
    /// they are recorded on the run rather than returned. A cache write failure also ends
    /// the run, is recorded on it, and is returned.
    pub async fn sync_once(&self) -> Result<GrowattSyncRun, GrowattError> {
        let run = GrowattSyncRun::start(&self.db.pool).await?;

        let plants = match self.session.list_plants().await {
            Ok(plants) => plants,
            Err(e) => {
                warn!(run_id = %run.id, error = %e, "Growatt sync: failed to list plants");
                let finished =
                    GrowattSyncRun::finish(&self.db.pool, run.id, 0, 0, Some(&e.to_string()))
                        .await?;
                return Ok(finished);
            }
        };

        info!(run_id = %run.id, "Growatt sync: {} plants", plants.len());

        let batch_size = self.config.batch_size.max(1);
        let batch_count = plants.len().div_ceil(batch_size);
        let mut ok = 0;
        let mut failed = 0;
        let mut cache_error = None;

        'batches: for (i, batch) in plants.chunks(batch_size).enumerate() {
            let results = join_all(batch.iter().map(|plant| async move {
                (plant, self.session.plant_overview(&plant.plant_id).await)
            }))
            .await;

            let now = Utc::now();
            for (plant, result) in results {
                let stored = match result {
                    Ok(overview) => {
                        ok += 1;
                        GrowattPlantCache::upsert_data(
                            &self.db.pool,
                            &plant_data(plant, overview),
                            now,
                        )
                        .await
                        .map(|_| ())
                    }
                    Err(e) => {
                        warn!(
                            plant_id = %plant.plant_id,
                            error = %e,
                            "Growatt sync: plant fetch failed, keeping cached data"
                        );
                        failed += 1;
                        GrowattPlantCache::record_failure(
                            &self.db.pool,
                            &plant.plant_id,
                            &plant.name,
                            &e.to_string(),
                            now,
                        )
                        .await
                        .map(|_| ())
                    }
                };
                if let Err(e) = stored {
                    error!(run_id = %run.id, plant_id = %plant.plant_id, error = %e, "Growatt sync: cache write failed");
                    cache_error = Some(e);
                    break 'batches;
                }
            }

            if i + 1 < batch_count && self.config.batch_delay_ms > 0 {
                sleep(Duration::from_millis(self.config.batch_delay_ms)).await;
            }
        }

        let error = cache_error
            .as_ref()
            .map(|e| format!("cache write failed: {e}"));
        let finished =
            GrowattSyncRun::finish(&self.db.pool, run.id, ok, failed, error.as_deref()).await?;
        if let Some(e) = cache_error {
            return Err(e.into());
        }
        info!(run_id = %run.id, ok, failed, "Growatt sync finished");
        Ok(finished)
    }

    async fn fetch_live(
        &self,
        plant_id: &str,
        cached: Option<&GrowattPlantCache>,
    ) -> Result<GrowattPlantCache, GrowattError> {
        let summary = match cached {
            Some(row) => PlantSummary {
                plant_id: row.plant_id.clone(),
                name: row.name.clone(),
                city: row.city.clone(),
                peak_power: row.peak_power_kw,
            },
            None => self
                .session
                .list_plants()
                .await?
                .into_iter()
                .find(|p| p.plant_id == plant_id)
                .ok_or_else(|| GrowattError::PlantNotFound(plant_id.to_string()))?,
        };
        let overview = self.session.plant_overview(plant_id).await?;
        Ok(
            GrowattPlantCache::upsert_data(&self.db.pool, &plant_data(&summary, overview), Utc::now())
                .await?,
        )
    }

    /// Cached data for one plant, refreshed live when stale and `refresh` is set. A failed
    /// refresh falls back to the stale row.
    pub async fn snapshot(
        &self,
        plant_id: &str,
        refresh: bool,
    ) -> Result<PlantSnapshot, GrowattError> {
        let cached = GrowattPlantCache::find_by_plant_id(&self.db.pool, plant_id).await?;

        if let Some(row) = cached
            .as_ref()
            .filter(|row| is_fresh(row, Utc::now(), self.config.cache_ttl_secs))
        {
            return Ok(PlantSnapshot {
                plant: row.clone(),
                stale: false,
                error: None,
            });
        }

        if refresh && self.config.enabled {
            match self.fetch_live(plant_id, cached.as_ref()).await {
                Ok(plant) => {
                    return Ok(PlantSnapshot {
                        plant,
                        stale: false,
                        error: None,
                    });
                }
                Err(e) => {
                    warn!(plant_id = %plant_id, error = %e, "Growatt live refresh failed");
                    return match cached {
                        Some(row) => {
                            GrowattPlantCache::record_failure(
                                &self.db.pool,
                                plant_id,
                                &row.name,
                                &e.to_string(),
                                Utc::now(),
                            )
                            .await?;
                            Ok(PlantSnapshot {
                                plant: row,
                                stale: true,
                                error: Some(e.to_string()),
                            })
                        }
                        None => Err(GrowattError::Unavailable {
                            plant_id: plant_id.to_string(),
                            reason: e.to_string(),
                        }),
                    };
                }
            }
        }

        match cached {
            Some(row) => {
                let error = row.last_error.clone();
                Ok(PlantSnapshot {
                    plant: row,
                    stale: true,
                    error,
                })
            }
            None => Err(GrowattError::Unavailable {
                plant_id: plant_id.to_string(),
                reason: "not synced yet".to_string(),
            }),
        }
    }

    pub async fn overview(&self) -> Result<SolarOverview, GrowattError> {
        let now = Utc::now();
        let plants = GrowattPlantCache::find_all(&self.db.pool)
            .await?
            .into_iter()
            .map(|plant| {
                let stale = !is_fresh(&plant, now, self.config.cache_ttl_secs);
                let error = plant.last_error.clone();
                PlantSnapshot {
                    plant,
                    stale,
                    error,
                }
            })
            .collect();
        let last_sync = GrowattSyncRun::find_latest(&self.db.pool).await?;
        Ok(SolarOverview { plants, last_sync })
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex, time::Instant};

    use async_trait::async_trait;

    use super::*;
    use crate::services::growatt::{GrowattApi, LoginToken};

    /// Serves fixed plants; plant ids listed in `failing` error out
    #[derive(Default)]
    struct FakeApi {
        plants: Vec<PlantSummary>,
        failing: Mutex<Vec<String>>,
        list_fails: bool,
        calls: Mutex<Vec<(String, Instant)>>,
    }

    #[async_trait]
    impl GrowattApi for FakeApi {
        async fn login(&self, _: &str, _: &str) -> Result<LoginToken, GrowattError> {
            Ok(LoginToken {
                token: "tok".into(),
                expires_in: 3600,
            })
        }

        async fn list_plants(&self, _: &str) -> Result<Vec<PlantSummary>, GrowattError> {
            if self.list_fails {
                return Err(GrowattError::Http {
                    status: 502,
                    body: "bad gateway".into(),
                });
            }
            Ok(self.plants.clone())
        }

        async fn plant_overview(
            &self,
            _: &str,
            plant_id: &str,
        ) -> Result<PlantOverview, GrowattError> {
            self.calls
                .lock()
                .unwrap()
                .push((plant_id.to_string(), Instant::now()));
            if self.failing.lock().unwrap().iter().any(|p| p == plant_id) {
                return Err(GrowattError::Timeout);
            }
            Ok(PlantOverview {
                current_power: Some(1000.0),
                today_energy: Some(5.5),
                total_energy: Some(800.0),
                last_update_time: Some("2026-10-16 12:00:00".into()),
                status: Some("1".into()),
            })
        }
    }

    fn plant(id: &str) -> PlantSummary {
        PlantSummary {
            plant_id: id.into(),
            name: format!("Planta {id}"),
            city: Some("Saltillo".into()),
            peak_power: Some(5.0),
        }
    }

    async fn service(api: Arc<FakeApi>) -> (DBService, GrowattSyncService) {
        service_with_delay(api, 0).await
    }

    async fn service_with_delay(
        api: Arc<FakeApi>,
        batch_delay_ms: u64,
    ) -> (DBService, GrowattSyncService) {
        let db = DBService::new_in_memory().await.unwrap();
        let config = GrowattConfig {
            enabled: true,
            username: Some("u".into()),
            password: Some("p".into()),
            batch_size: 2,
            batch_delay_ms,
            ..Default::default()
        };
        let session = Arc::new(GrowattSession::new(api, &config));
        (db.clone(), GrowattSyncService::new(db, session, config))
    }

    fn cached(fetched_ago: i64, failed_ago: Option<i64>) -> GrowattPlantCache {
        let now = Utc::now();
        GrowattPlantCache {
            plant_id: "1".into(),
            name: "Planta".into(),
            city: None,
            peak_power_kw: None,
            current_power_w: Some(10.0),
            today_energy_kwh: None,
            total_energy_kwh: None,
            plant_status: None,
            data_updated_at: None,
            fetched_at: Some(now - chrono::Duration::seconds(fetched_ago)),
            last_attempt_at: failed_ago.map(|s| now - chrono::Duration::seconds(s)),
            last_error: failed_ago.map(|_| "timeout".to_string()),
        }
    }

    #[test]
    fn freshness_rules() {
        let now = Utc::now();
        assert!(is_fresh(&cached(60, None), now, 1800));
        assert!(!is_fresh(&cached(3600, None), now, 1800));
        // a failure after the last good fetch makes the data stale
        assert!(!is_fresh(&cached(600, Some(30)), now, 1800));
    }

    #[tokio::test]
    async fn sync_counts_failures_and_keeps_old_data() {
        let api = Arc::new(FakeApi {
            plants: vec![plant("1"), plant("2"), plant("3")],
            ..Default::default()
        });
        let (db, sync) = service(api.clone()).await;

        let run = sync.sync_once().await.unwrap();
        assert_eq!((run.plants_ok, run.plants_failed), (3, 0));
        assert!(run.finished_at.is_some());

        api.failing.lock().unwrap().push("2".into());
        let run = sync.sync_once().await.unwrap();
        assert_eq!((run.plants_ok, run.plants_failed), (2, 1));

        let plant = GrowattPlantCache::find_by_plant_id(&db.pool, "2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(plant.current_power_w, Some(1000.0));
        assert!(plant.last_error.is_some());

        let overview = sync.overview().await.unwrap();
        let stale: Vec<_> = overview
            .plants
            .iter()
            .filter(|p| p.stale)
            .map(|p| p.plant.plant_id.as_str())
            .collect();
        assert_eq!(stale, vec!["2"]);
        assert_eq!(overview.last_sync.unwrap().id, run.id);
    }

    #[tokio::test]
    async fn listing_failure_is_recorded_on_the_run() {
        let api = Arc::new(FakeApi {
            list_fails: true,
            ..Default::default()
        });
        let (_db, sync) = service(api).await;
        let run = sync.sync_once().await.unwrap();
        assert!(run.error.unwrap().contains("502"));
        assert_eq!(run.plants_ok, 0);
    }

    #[tokio::test]
    async fn snapshot_falls_back_to_stale_cache() {
        let api = Arc::new(FakeApi {
            plants: vec![plant("7")],
            ..Default::default()
        });
        let (_db, sync) = service(api.clone()).await;

        assert!(matches!(
            sync.snapshot("7", false).await,
            Err(GrowattError::Unavailable { .. })
        ));

        let live = sync.snapshot("7", true).await.unwrap();
        assert!(!live.stale);
        assert_eq!(live.plant.name, "Planta 7");

        api.failing.lock().unwrap().push("7".into());
        let mut sync = sync;
        sync.config.cache_ttl_secs = 0;

        let fallback = sync.snapshot("7", true).await.unwrap();
        assert!(fallback.stale);
        assert_eq!(fallback.error.as_deref(), Some("timeout"));
        assert_eq!(fallback.plant.current_power_w, Some(1000.0));
    }

    #[tokio::test]
    async fn unknown_plant_without_cache_is_unavailable() {
        let api = Arc::new(FakeApi::default());
        let (_db, sync) = service(api).await;
        assert!(matches!(
            sync.snapshot("404", true).await,
            Err(GrowattError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn plants_are_fetched_in_batches_with_a_pause_between() {
        let api = Arc::new(FakeApi {
            plants: ["1", "2", "3", "4", "5"].into_iter().map(plant).collect(),
            ..Default::default()
        });
        let (_db, sync) = service_with_delay(api.clone(), 60).await;

        let run = sync.sync_once().await.unwrap();
        assert_eq!(run.plants_ok, 5);

        let calls = api.calls.lock().unwrap();
        let ids: Vec<_> = calls.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);
        let gap = |a: usize, b: usize| calls[b].1.duration_since(calls[a].1);
        // batches of two: 1-2 | 3-4 | 5
        assert!(gap(1, 2) >= Duration::from_millis(60));
        assert!(gap(3, 4) >= Duration::from_millis(60));
        assert!(gap(0, 1) < Duration::from_millis(60));
        assert!(gap(2, 3) < Duration::from_millis(60));
    }

    #[tokio::test]
    async fn cache_write_failure_still_closes_the_run() {
        let api = Arc::new(FakeApi {
            plants: vec![plant("1"), plant("2")],
            ..Default::default()
        });
        let (db, sync) = service(api).await;
        sqlx::query(
            "CREATE TRIGGER block_cache BEFORE INSERT ON growatt_plants
             BEGIN SELECT RAISE(ABORT, 'disk full'); END",
        )
        .execute(&db.pool)
        .await
        .unwrap();

        let err = sync.sync_once().await.unwrap_err();
        assert!(matches!(err, GrowattError::Database(_)));

        let run = GrowattSyncRun::find_latest(&db.pool).await.unwrap().unwrap();
        assert!(run.finished_at.is_some());
        assert!(run.error.unwrap().contains("cache write failed"));
    }
}
