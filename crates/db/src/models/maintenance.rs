use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

const SCHEDULE_COLUMNS: &str = "id, client_id, service_type, frequency, next_due_date, due_day, duration_hours, notes, active, created_at, updated_at";
const VISIT_COLUMNS: &str = "id, client_id, schedule_id, technician_id, scheduled_date, start_hour, duration_hours, status, service_type, notes, completion_notes, completed_at, created_at, updated_at";

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display)]
#[sqlx(type_name = "maintenance_frequency", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MaintenanceFrequency {
    Monthly,
    Quarterly,
    Semiannual,
    Annual,
}

impl MaintenanceFrequency {
    pub fn months(&self) -> u32 {
        match self {
            MaintenanceFrequency::Monthly => 1,
            MaintenanceFrequency::Quarterly => 3,
            MaintenanceFrequency::Semiannual => 6,
            MaintenanceFrequency::Annual => 12,
        }
    }

    /// Next due date, aimed at `due_day` of the month and clamped to the end of shorter
    /// months. A date clamped once (Jan 31 -> Feb 28) returns to the 31st in March.
    pub fn advance(&self, from: NaiveDate, due_day: u32) -> NaiveDate {
        match from.checked_add_months(Months::new(self.months())) {
            Some(next) => (next.day()..=due_day.min(31))
                .rev()
                .find_map(|day| next.with_day(day))
                .unwrap_or(next),
            None => NaiveDate::MAX,
        }
    }
}

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display)]
#[sqlx(type_name = "service_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ServiceType {
    Cleaning,
    Inspection,
    Repair,
    InverterService,
    Installation,
}

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "visit_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VisitStatus {
    #[default]
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl VisitStatus {
    /// Whether a visit in this status occupies the technician's time
    pub fn occupies_slot(&self) -> bool {
        matches!(self, VisitStatus::Scheduled | VisitStatus::InProgress)
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct MaintenanceSchedule {
    pub id: Uuid,
    pub client_id: Uuid,
    pub service_type: ServiceType,
    pub frequency: MaintenanceFrequency,
    pub next_due_date: NaiveDate,
    /// Day of month the schedule recurs on
    pub due_day: i32,
    pub duration_hours: i32,
    pub notes: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateMaintenanceSchedule {
    pub client_id: Uuid,
    pub service_type: ServiceType,
    pub frequency: MaintenanceFrequency,
    pub next_due_date: NaiveDate,
    pub duration_hours: Option<i32>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct UpdateMaintenanceSchedule {
    pub service_type: Option<ServiceType>,
    pub frequency: Option<MaintenanceFrequency>,
    pub next_due_date: Option<NaiveDate>,
    pub duration_hours: Option<i32>,
    pub notes: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct MaintenanceVisit {
    pub id: Uuid,
    pub client_id: Uuid,
    pub schedule_id: Option<Uuid>,
    pub technician_id: Option<Uuid>,
    pub scheduled_date: NaiveDate,
    pub start_hour: i32,
    pub duration_hours: i32,
    pub status: VisitStatus,
    pub service_type: ServiceType,
    pub notes: Option<String>,
    pub completion_notes: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MaintenanceVisit {
    pub fn end_hour(&self) -> i32 {
        self.start_hour.saturating_add(self.duration_hours)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateMaintenanceVisit {
    pub client_id: Uuid,
    pub schedule_id: Option<Uuid>,
    pub technician_id: Option<Uuid>,
    pub scheduled_date: NaiveDate,
    pub start_hour: i32,
    pub duration_hours: i32,
    pub service_type: ServiceType,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct VisitFilter {
    pub client_id: Option<Uuid>,
    pub technician_id: Option<Uuid>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub status: Option<VisitStatus>,
}

impl MaintenanceSchedule {
    pub async fn find_all(
        pool: &SqlitePool,
        client_id: Option<Uuid>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, MaintenanceSchedule>(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM maintenance_schedules
             WHERE ($1 IS NULL OR client_id = $1)
             ORDER BY next_due_date ASC"
        ))
        .bind(client_id)
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, MaintenanceSchedule>(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM maintenance_schedules WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Active schedules due on or before `until`
    pub async fn find_due(pool: &SqlitePool, until: NaiveDate) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, MaintenanceSchedule>(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM maintenance_schedules
             WHERE active = 1 AND next_due_date <= $1
             ORDER BY next_due_date ASC"
        ))
        .bind(until)
        .fetch_all(pool)
        .await
    }

    pub async fn create(
        pool: &SqlitePool,
        data: &CreateMaintenanceSchedule,
        schedule_id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, MaintenanceSchedule>(&format!(
            "INSERT INTO maintenance_schedules (id, client_id, service_type, frequency, next_due_date, due_day, duration_hours, notes)
             VALUES ($1, $2, $3, $4, $5, $8, $6, $7)
             RETURNING {SCHEDULE_COLUMNS}"
        ))
        .bind(schedule_id)
        .bind(data.client_id)
        .bind(data.service_type)
        .bind(data.frequency)
        .bind(data.next_due_date)
        .bind(data.duration_hours.unwrap_or(2))
        .bind(&data.notes)
        .bind(data.next_due_date.day() as i32)
        .fetch_one(pool)
        .await
    }

    pub async fn update(
        pool: &SqlitePool,
        id: Uuid,
        data: &UpdateMaintenanceSchedule,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, MaintenanceSchedule>(&format!(
            "UPDATE maintenance_schedules SET
                service_type = coalesce($2, service_type),
                frequency = coalesce($3, frequency),
                next_due_date = coalesce($4, next_due_date),
                due_day = coalesce($8, due_day),
                duration_hours = coalesce($5, duration_hours),
                notes = coalesce($6, notes),
                active = coalesce($7, active),
                updated_at = datetime('now', 'subsec')
             WHERE id = $1
             RETURNING {SCHEDULE_COLUMNS}"
        ))
        .bind(id)
        .bind(data.service_type)
        .bind(data.frequency)
        .bind(data.next_due_date)
        .bind(data.duration_hours)
        .bind(&data.notes)
        .bind(data.active)
        .bind(data.next_due_date.map(|d| d.day() as i32))
        .fetch_optional(pool)
        .await
    }

    pub async fn set_next_due_date<'e, E>(
        executor: E,
        id: Uuid,
        next_due_date: NaiveDate,
    ) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            "UPDATE maintenance_schedules SET next_due_date = $2, updated_at = datetime('now', 'subsec') WHERE id = $1",
        )
        .bind(id)
        .bind(next_due_date)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM maintenance_schedules WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}

impl MaintenanceVisit {
    pub async fn find_all(
        pool: &SqlitePool,
        filter: &VisitFilter,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, MaintenanceVisit>(&format!(
            "SELECT {VISIT_COLUMNS} FROM maintenance_visits
             WHERE ($1 IS NULL OR client_id = $1)
               AND ($2 IS NULL OR technician_id = $2)
               AND ($3 IS NULL OR scheduled_date >= $3)
               AND ($4 IS NULL OR scheduled_date <= $4)
               AND ($5 IS NULL OR status = $5)
             ORDER BY scheduled_date ASC, start_hour ASC"
        ))
        .bind(filter.client_id)
        .bind(filter.technician_id)
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.status)
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, MaintenanceVisit>(&format!(
            "SELECT {VISIT_COLUMNS} FROM maintenance_visits WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Visits that occupy the technician's time on `date`
    pub async fn find_booked_for_technician_on(
        pool: &SqlitePool,
        technician_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, MaintenanceVisit>(&format!(
            "SELECT {VISIT_COLUMNS} FROM maintenance_visits
             WHERE technician_id = $1
               AND scheduled_date = $2
               AND status IN ('scheduled', 'in_progress')
             ORDER BY start_hour ASC"
        ))
        .bind(technician_id)
        .bind(date)
        .fetch_all(pool)
        .await
    }

    pub async fn find_unassigned(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, MaintenanceVisit>(&format!(
            "SELECT {VISIT_COLUMNS} FROM maintenance_visits
             WHERE technician_id IS NULL AND status = 'scheduled'
             ORDER BY scheduled_date ASC, start_hour ASC"
        ))
        .fetch_all(pool)
        .await
    }

    pub async fn create<'e, E>(
        executor: E,
        data: &CreateMaintenanceVisit,
        visit_id: Uuid,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, MaintenanceVisit>(&format!(
            "INSERT INTO maintenance_visits (id, client_id, schedule_id, technician_id, scheduled_date, start_hour, duration_hours, service_type, notes)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING {VISIT_COLUMNS}"
        ))
        .bind(visit_id)
        .bind(data.client_id)
        .bind(data.schedule_id)
        .bind(data.technician_id)
        .bind(data.scheduled_date)
        .bind(data.start_hour)
        .bind(data.duration_hours)
        .bind(data.service_type)
        .bind(&data.notes)
        .fetch_one(executor)
        .await
    }

    pub async fn reschedule(
        pool: &SqlitePool,
        id: Uuid,
        technician_id: Option<Uuid>,
        scheduled_date: NaiveDate,
        start_hour: i32,
        duration_hours: i32,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, MaintenanceVisit>(&format!(
            "UPDATE maintenance_visits SET
                technician_id = $2, scheduled_date = $3, start_hour = $4, duration_hours = $5,
                updated_at = datetime('now', 'subsec')
             WHERE id = $1
             RETURNING {VISIT_COLUMNS}"
        ))
        .bind(id)
        .bind(technician_id)
        .bind(scheduled_date)
        .bind(start_hour)
        .bind(duration_hours)
        .fetch_one(pool)
        .await
    }

    pub async fn set_status(
        pool: &SqlitePool,
        id: Uuid,
        status: VisitStatus,
        completion_notes: Option<&str>,
    ) -> Result<Self, sqlx::Error> {
        let completed_at = (status == VisitStatus::Completed).then(Utc::now);
        sqlx::query_as::<_, MaintenanceVisit>(&format!(
            "UPDATE maintenance_visits SET
                status = $2,
                completion_notes = coalesce($3, completion_notes),
                completed_at = coalesce($4, completed_at),
                updated_at = datetime('now', 'subsec')
             WHERE id = $1
             RETURNING {VISIT_COLUMNS}"
        ))
        .bind(id)
        .bind(status)
        .bind(completion_notes)
        .bind(completed_at)
        .fetch_one(pool)
        .await
    }

    pub async fn count_scheduled_between(
        pool: &SqlitePool,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM maintenance_visits
             WHERE status = 'scheduled' AND scheduled_date >= $1 AND scheduled_date <= $2",
        )
        .bind(from)
        .bind(to)
        .fetch_one(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn advancing_clamps_to_month_end() {
        let jan_31 = date(2026, 1, 31);
        assert_eq!(MaintenanceFrequency::Monthly.advance(jan_31, 31), date(2026, 2, 28));
        assert_eq!(MaintenanceFrequency::Semiannual.advance(jan_31, 31), date(2026, 7, 31));
        assert_eq!(
            MaintenanceFrequency::Annual.advance(date(2028, 2, 29), 29),
            date(2029, 2, 28)
        );
    }

    #[test]
    fn monthly_schedules_keep_their_day_after_short_months() {
        let mut due = date(2026, 1, 31);
        let mut dates = Vec::new();
        for _ in 0..4 {
            due = MaintenanceFrequency::Monthly.advance(due, 31);
            dates.push(due);
        }
        assert_eq!(
            dates,
            vec![date(2026, 2, 28), date(2026, 3, 31), date(2026, 4, 30), date(2026, 5, 31)]
        );
        // a schedule on the 15th is unaffected
        assert_eq!(MaintenanceFrequency::Quarterly.advance(date(2026, 11, 15), 15), date(2027, 2, 15));
    }

    #[test]
    fn only_open_visits_occupy_slots() {
        assert!(VisitStatus::Scheduled.occupies_slot());
        assert!(VisitStatus::InProgress.occupies_slot());
        assert!(!VisitStatus::Completed.occupies_slot());
        assert!(!VisitStatus::Cancelled.occupies_slot());
    }
}
