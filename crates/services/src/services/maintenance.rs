//! Maintenance visits and the background planner that turns recurring schedules into visits.

use std::time::Duration;

use chrono::{Local, NaiveDate};
use db::{
    DBService,
    models::{
        client::Client,
        maintenance::{
            CreateMaintenanceSchedule, CreateMaintenanceVisit, MaintenanceSchedule,
            MaintenanceVisit, UpdateMaintenanceSchedule, VisitStatus,
        },
    },
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use ts_rs::TS;
use uuid::Uuid;

use super::{
    config::MaintenanceConfig,
    notification::NotificationService,
    scheduling::{SchedulingError, SchedulingService, validate_slot_bounds},
};

#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Scheduling(#[from] SchedulingError),
    #[error("maintenance schedule {0} not found")]
    ScheduleNotFound(Uuid),
    #[error("visit {0} not found")]
    VisitNotFound(Uuid),
    #[error("client {0} not found")]
    ClientNotFound(Uuid),
    #[error("cannot move visit from {from} to {to}")]
    InvalidTransition { from: VisitStatus, to: VisitStatus },
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct RescheduleVisit {
    pub technician_id: Option<Uuid>,
    pub scheduled_date: NaiveDate,
    pub start_hour: i32,
    pub duration_hours: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct UpdateVisitStatus {
    pub status: VisitStatus,
    pub completion_notes: Option<String>,
}

/// What the planner did with one due schedule
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct GeneratedVisit {
    pub schedule_id: Uuid,
    pub visit: MaintenanceVisit,
    pub assigned: bool,
    pub next_due_date: NaiveDate,
}

pub fn can_transition(from: VisitStatus, to: VisitStatus) -> bool {
    use VisitStatus::*;
    matches!(
        (from, to),
        (Scheduled, InProgress) | (Scheduled, Cancelled) | (InProgress, Completed) | (InProgress, Cancelled)
    )
}

#[derive(Clone)]
pub struct MaintenanceService {
    db: DBService,
    scheduling: SchedulingService,
    config: MaintenanceConfig,
    notification_service: NotificationService,
}

impl MaintenanceService {
    pub fn new(
        db: DBService,
        scheduling: SchedulingService,
        config: MaintenanceConfig,
        notification_service: NotificationService,
    ) -> Self {
        Self {
            db,
            scheduling,
            config,
            notification_service,
        }
    }

    pub fn scheduling(&self) -> &SchedulingService {
        &self.scheduling
    }

    pub async fn create_schedule(
        &self,
        data: &CreateMaintenanceSchedule,
    ) -> Result<MaintenanceSchedule, MaintenanceError> {
        if let Some(duration_hours) = data.duration_hours.filter(|d| !(1..=24).contains(d)) {
            return Err(SchedulingError::InvalidDuration(duration_hours).into());
        }
        if Client::find_by_id(&self.db.pool, data.client_id).await?.is_none() {
            return Err(MaintenanceError::ClientNotFound(data.client_id));
        }
        let mut data = data.clone();
        data.duration_hours
            .get_or_insert(self.config.default_duration_hours);

        let schedule = MaintenanceSchedule::create(&self.db.pool, &data, Uuid::new_v4()).await?;
        info!(
            schedule_id = %schedule.id,
            client_id = %schedule.client_id,
            frequency = %schedule.frequency,
            next_due_date = %schedule.next_due_date,
            "Maintenance schedule created"
        );
        Ok(schedule)
    }

    pub async fn update_schedule(
        &self,
        schedule_id: Uuid,
        data: &UpdateMaintenanceSchedule,
    ) -> Result<MaintenanceSchedule, MaintenanceError> {
        if let Some(duration_hours) = data.duration_hours.filter(|d| !(1..=24).contains(d)) {
            return Err(SchedulingError::InvalidDuration(duration_hours).into());
        }
        MaintenanceSchedule::update(&self.db.pool, schedule_id, data)
            .await?
            .ok_or(MaintenanceError::ScheduleNotFound(schedule_id))
    }

    /// Create a visit. Assigned visits must fit the technician's agenda.
    pub async fn create_visit(
        &self,
        data: &CreateMaintenanceVisit,
    ) -> Result<MaintenanceVisit, MaintenanceError> {
        validate_slot_bounds(data.start_hour, data.duration_hours)?;
        if Client::find_by_id(&self.db.pool, data.client_id).await?.is_none() {
            return Err(MaintenanceError::ClientNotFound(data.client_id));
        }

        let _agenda = self.scheduling.lock_agenda().await;
        if let Some(technician_id) = data.technician_id {
            self.scheduling
                .check_slot(
                    technician_id,
                    data.scheduled_date,
                    data.start_hour,
                    data.duration_hours,
                    None,
                )
                .await?;
        }
        let visit = MaintenanceVisit::create(&self.db.pool, data, Uuid::new_v4()).await?;
        info!(
            visit_id = %visit.id,
            client_id = %visit.client_id,
            technician_id = ?visit.technician_id,
            date = %visit.scheduled_date,
            start_hour = visit.start_hour,
            "Maintenance visit created"
        );
        Ok(visit)
    }

    /// Move or (re)assign a scheduled visit
    pub async fn reschedule_visit(
        &self,
        visit_id: Uuid,
        data: &RescheduleVisit,
    ) -> Result<MaintenanceVisit, MaintenanceError> {
        let _agenda = self.scheduling.lock_agenda().await;
        let visit = MaintenanceVisit::find_by_id(&self.db.pool, visit_id)
            .await?
            .ok_or(MaintenanceError::VisitNotFound(visit_id))?;
        if visit.status != VisitStatus::Scheduled {
            return Err(MaintenanceError::InvalidTransition {
                from: visit.status,
                to: VisitStatus::Scheduled,
            });
        }

        let duration_hours = data.duration_hours.unwrap_or(visit.duration_hours);
        validate_slot_bounds(data.start_hour, duration_hours)?;
        if let Some(technician_id) = data.technician_id {
            self.scheduling
                .check_slot(
                    technician_id,
                    data.scheduled_date,
                    data.start_hour,
                    duration_hours,
                    Some(visit_id),
                )
                .await?;
        }

        let updated = MaintenanceVisit::reschedule(
            &self.db.pool,
            visit_id,
            data.technician_id,
            data.scheduled_date,
            data.start_hour,
            duration_hours,
        )
        .await?;
        info!(
            visit_id = %visit_id,
            technician_id = ?updated.technician_id,
            date = %updated.scheduled_date,
            start_hour = updated.start_hour,
            "Maintenance visit rescheduled"
        );
        Ok(updated)
    }

    pub async fn update_visit_status(
        &self,
        visit_id: Uuid,
        data: &UpdateVisitStatus,
    ) -> Result<MaintenanceVisit, MaintenanceError> {
        let visit = MaintenanceVisit::find_by_id(&self.db.pool, visit_id)
            .await?
            .ok_or(MaintenanceError::VisitNotFound(visit_id))?;
        if visit.status == data.status {
            return Ok(visit);
        }
        if !can_transition(visit.status, data.status) {
            return Err(MaintenanceError::InvalidTransition {
                from: visit.status,
                to: data.status,
            });
        }
        let updated = MaintenanceVisit::set_status(
            &self.db.pool,
            visit_id,
            data.status,
            data.completion_notes.as_deref(),
        )
        .await?;
        info!(visit_id = %visit_id, status = %updated.status, "Maintenance visit status changed");
        Ok(updated)
    }

    /// Every due schedule gets one visit; failures are logged per schedule
    pub async fn run_once(&self, today: NaiveDate) -> Result<Vec<GeneratedVisit>, MaintenanceError> {
        let until = today + chrono::Duration::days(self.config.lookahead_days);
        let due = MaintenanceSchedule::find_due(&self.db.pool, until).await?;

        if due.is_empty() {
            debug!("Maintenance planner: no schedules due until {}", until);
            return Ok(Vec::new());
        }

        info!("Maintenance planner: {} schedules due until {}", due.len(), until);

        let mut generated = Vec::with_capacity(due.len());
        for schedule in due {
            match self.generate_visit(&schedule, today).await {
                Ok(visit) => generated.push(visit),
                Err(e) => warn!(
                    schedule_id = %schedule.id,
                    error = %e,
                    "Maintenance planner: failed to generate visit"
                ),
            }
        }
        Ok(generated)
    }

    /// Generate the next visit for one schedule regardless of how far away it is due
    pub async fn generate_for_schedule(
        &self,
        schedule_id: Uuid,
        today: NaiveDate,
    ) -> Result<GeneratedVisit, MaintenanceError> {
        let schedule = MaintenanceSchedule::find_by_id(&self.db.pool, schedule_id)
            .await?
            .ok_or(MaintenanceError::ScheduleNotFound(schedule_id))?;
        self.generate_visit(&schedule, today).await
    }

    async fn generate_visit(
        &self,
        schedule: &MaintenanceSchedule,
        today: NaiveDate,
    ) -> Result<GeneratedVisit, MaintenanceError> {
        let search_from = schedule.next_due_date.max(today);
        let duration_hours = if schedule.duration_hours > 0 {
            schedule.duration_hours
        } else {
            self.config.default_duration_hours
        };

        let agenda = self.scheduling.lock_agenda().await;
        let suggestion = self
            .scheduling
            .next_available(None, search_from, duration_hours)
            .await?;

        let assigned = suggestion.is_some();
        let data = match &suggestion {
            Some(slot) => CreateMaintenanceVisit {
                client_id: schedule.client_id,
                schedule_id: Some(schedule.id),
                technician_id: Some(slot.technician_id),
                scheduled_date: slot.date,
                start_hour: slot.start_hour,
                duration_hours,
                service_type: schedule.service_type,
                notes: schedule.notes.clone(),
            },
            None => CreateMaintenanceVisit {
                client_id: schedule.client_id,
                schedule_id: Some(schedule.id),
                technician_id: None,
                scheduled_date: search_from,
                start_hour: self.scheduling.config().default_start_hour,
                duration_hours,
                service_type: schedule.service_type,
                notes: schedule.notes.clone(),
            },
        };

        // the visit and the schedule's advance land together, or the next run would
        // generate the same visit again
        let next_due_date = schedule
            .frequency
            .advance(schedule.next_due_date, schedule.due_day.max(1) as u32);
        let mut tx = self.db.pool.begin().await?;
        let visit = MaintenanceVisit::create(&mut *tx, &data, Uuid::new_v4()).await?;
        MaintenanceSchedule::set_next_due_date(&mut *tx, schedule.id, next_due_date).await?;
        tx.commit().await?;
        drop(agenda);

        let client_name = Client::find_by_id(&self.db.pool, schedule.client_id)
            .await?
            .map(|c| c.name)
            .unwrap_or_else(|| "cliente".to_string());

        let assignment = match &suggestion {
            Some(slot) => format!("a las {}:00 con {}", slot.start_hour, slot.technician_name),
            None => format!("a las {}:00, sin técnico", visit.start_hour),
        };
        self.notification_service
            .notify(
                "Mantenimiento programado",
                &format!(
                    "{} para {} el {} {}. Siguiente mantenimiento: {}",
                    schedule.service_type,
                    client_name,
                    visit.scheduled_date,
                    assignment,
                    next_due_date
                ),
            )
            .await;
        if !assigned {
            self.notification_service
                .notify(
                    "Visita sin técnico asignado",
                    &format!(
                        "No hay técnicos disponibles para {} de {} a partir del {}",
                        schedule.service_type, client_name, search_from
                    ),
                )
                .await;
        }

        info!(
            schedule_id = %schedule.id,
            visit_id = %visit.id,
            assigned,
            next_due_date = %next_due_date,
            "Maintenance planner: visit generated"
        );

        Ok(GeneratedVisit {
            schedule_id: schedule.id,
            visit,
            assigned,
            next_due_date,
        })
    }
}

/// Background loop around [`MaintenanceService::run_once`]
pub struct MaintenancePlanner {
    service: MaintenanceService,
    poll_interval: Duration,
}

impl MaintenancePlanner {
    pub async fn spawn(service: MaintenanceService) -> tokio::task::JoinHandle<()> {
        let planner = Self {
            poll_interval: Duration::from_secs(service.config.planner_interval_secs.max(60)),
            service,
        };
        tokio::spawn(async move {
            planner.start().await;
        })
    }

    async fn start(&self) {
        info!(
            "Starting maintenance planner with interval {:?}, lookahead {} days",
            self.poll_interval, self.service.config.lookahead_days
        );

        let mut interval = interval(self.poll_interval);

        loop {
            interval.tick().await;
            let today = Local::now().date_naive();
            if let Err(e) = self.service.run_once(today).await {
                error!("Error running maintenance planner: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use db::models::{
        client::CreateClient,
        maintenance::{CreateMaintenanceSchedule, MaintenanceFrequency, ServiceType, VisitFilter},
        notification::Notification,
        technician::{CreateTechnician, Technician},
    };

    use super::*;
    use crate::services::config::SchedulingConfig;

    async fn service() -> (DBService, MaintenanceService) {
        let db = DBService::new_in_memory().await.unwrap();
        let scheduling = SchedulingService::new(db.clone(), SchedulingConfig::default());
        let service = MaintenanceService::new(
            db.clone(),
            scheduling,
            MaintenanceConfig::default(),
            NotificationService::new(db.clone()),
        );
        (db, service)
    }

    async fn schedule(db: &DBService, due: NaiveDate) -> MaintenanceSchedule {
        let client = Client::create(&db.pool, &CreateClient::named("Granja Solar"), Uuid::new_v4())
            .await
            .unwrap();
        MaintenanceSchedule::create(
            &db.pool,
            &CreateMaintenanceSchedule {
                client_id: client.id,
                service_type: ServiceType::Cleaning,
                frequency: MaintenanceFrequency::Quarterly,
                next_due_date: due,
                duration_hours: Some(3),
                notes: None,
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap()
    }

    #[test]
    fn completed_visits_are_final() {
        assert!(can_transition(VisitStatus::Scheduled, VisitStatus::InProgress));
        assert!(can_transition(VisitStatus::InProgress, VisitStatus::Completed));
        assert!(!can_transition(VisitStatus::Completed, VisitStatus::Scheduled));
        assert!(!can_transition(VisitStatus::Scheduled, VisitStatus::Completed));
        assert!(!can_transition(VisitStatus::Cancelled, VisitStatus::InProgress));
    }

    #[tokio::test]
    async fn planner_assigns_a_technician_and_advances_the_schedule() {
        let (db, service) = service().await;
        Technician::create(
            &db.pool,
            &CreateTechnician {
                name: "Marta".into(),
                phone: None,
                email: None,
                work_start_hour: None,
                work_end_hour: None,
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let due = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let schedule = schedule(&db, due).await;

        let generated = service.run_once(today).await.unwrap();
        assert_eq!(generated.len(), 1);
        let result = &generated[0];
        assert!(result.assigned);
        assert_eq!(result.visit.scheduled_date, due);
        assert_eq!(result.visit.start_hour, 8);
        assert_eq!(result.visit.duration_hours, 3);
        assert_eq!(result.next_due_date, NaiveDate::from_ymd_opt(2027, 1, 19).unwrap());

        let stored = MaintenanceSchedule::find_by_id(&db.pool, schedule.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.next_due_date, result.next_due_date);

        // next run finds nothing due
        assert!(service.run_once(today).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn planner_leaves_visit_unassigned_without_technicians() {
        let (db, service) = service().await;
        let today = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        // overdue schedules are planned from today
        let schedule = schedule(&db, NaiveDate::from_ymd_opt(2026, 9, 1).unwrap()).await;

        let result = service
            .generate_for_schedule(schedule.id, today)
            .await
            .unwrap();
        assert!(!result.assigned);
        assert!(result.visit.technician_id.is_none());
        assert_eq!(result.visit.scheduled_date, today);
        assert_eq!(result.visit.start_hour, 9);

        let unassigned = MaintenanceVisit::find_unassigned(&db.pool).await.unwrap();
        assert_eq!(unassigned.len(), 1);
        let notifications = Notification::find_recent(&db.pool, true, 10).await.unwrap();
        assert_eq!(notifications.len(), 2);
        assert_eq!(notifications[0].title, "Visita sin técnico asignado");
        assert_eq!(notifications[1].title, "Mantenimiento programado");
    }

    #[tokio::test]
    async fn rescheduling_a_completed_visit_is_rejected() {
        let (db, service) = service().await;
        let client = Client::create(&db.pool, &CreateClient::named("Oficina"), Uuid::new_v4())
            .await
            .unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();
        let visit = service
            .create_visit(&CreateMaintenanceVisit {
                client_id: client.id,
                schedule_id: None,
                technician_id: None,
                scheduled_date: date,
                start_hour: 10,
                duration_hours: 2,
                service_type: ServiceType::Inspection,
                notes: None,
            })
            .await
            .unwrap();

        for status in [VisitStatus::InProgress, VisitStatus::Completed] {
            service
                .update_visit_status(
                    visit.id,
                    &UpdateVisitStatus {
                        status,
                        completion_notes: Some("Paneles limpios".into()),
                    },
                )
                .await
                .unwrap();
        }
        let done = MaintenanceVisit::find_by_id(&db.pool, visit.id).await.unwrap().unwrap();
        assert!(done.completed_at.is_some());

        let err = service
            .reschedule_visit(
                visit.id,
                &RescheduleVisit {
                    technician_id: None,
                    scheduled_date: date,
                    start_hour: 12,
                    duration_hours: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MaintenanceError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn schedules_need_a_client_and_a_positive_duration() {
        let (db, service) = service().await;
        let due = NaiveDate::from_ymd_opt(2026, 11, 2).unwrap();
        let mut data = CreateMaintenanceSchedule {
            client_id: Uuid::new_v4(),
            service_type: ServiceType::Inspection,
            frequency: MaintenanceFrequency::Annual,
            next_due_date: due,
            duration_hours: None,
            notes: None,
        };
        assert!(matches!(
            service.create_schedule(&data).await,
            Err(MaintenanceError::ClientNotFound(_))
        ));

        data.client_id = Client::create(&db.pool, &CreateClient::named("Hotel"), Uuid::new_v4())
            .await
            .unwrap()
            .id;
        let schedule = service.create_schedule(&data).await.unwrap();
        assert_eq!(schedule.duration_hours, 2);

        let err = service
            .update_schedule(
                schedule.id,
                &UpdateMaintenanceSchedule {
                    duration_hours: Some(0),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MaintenanceError::Scheduling(SchedulingError::InvalidDuration(0))
        ));
    }

    #[tokio::test]
    async fn concurrent_bookings_cannot_take_the_same_slot() {
        let (db, service) = service().await;
        let technician = Technician::create(
            &db.pool,
            &CreateTechnician {
                name: "Luis".into(),
                phone: None,
                email: None,
                work_start_hour: Some(8),
                work_end_hour: Some(18),
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        let client = Client::create(&db.pool, &CreateClient::named("Bodega"), Uuid::new_v4())
            .await
            .unwrap();
        let monday = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let visit = CreateMaintenanceVisit {
            client_id: client.id,
            schedule_id: None,
            technician_id: Some(technician.id),
            scheduled_date: monday,
            start_hour: 10,
            duration_hours: 2,
            service_type: ServiceType::Cleaning,
            notes: None,
        };

        let (a, b) = tokio::join!(service.create_visit(&visit), service.create_visit(&visit));
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        let err = a.err().or(b.err()).unwrap();
        assert!(matches!(
            err,
            MaintenanceError::Scheduling(SchedulingError::Conflict { .. })
        ));

        let booked = MaintenanceVisit::find_booked_for_technician_on(&db.pool, technician.id, monday)
            .await
            .unwrap();
        assert_eq!(booked.len(), 1);
    }

    #[tokio::test]
    async fn unassigned_visits_still_need_an_hour_of_the_day() {
        let (db, service) = service().await;
        let client = Client::create(&db.pool, &CreateClient::named("Taller"), Uuid::new_v4())
            .await
            .unwrap();
        let err = service
            .create_visit(&CreateMaintenanceVisit {
                client_id: client.id,
                schedule_id: None,
                technician_id: None,
                scheduled_date: NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
                start_hour: i32::MAX,
                duration_hours: 2,
                service_type: ServiceType::Repair,
                notes: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MaintenanceError::Scheduling(SchedulingError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn failed_advance_leaves_no_orphan_visit() {
        let (db, service) = service().await;
        let today = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let schedule = schedule(&db, today).await;
        sqlx::query(
            "CREATE TRIGGER block_advance BEFORE UPDATE OF next_due_date ON maintenance_schedules
             BEGIN SELECT RAISE(ABORT, 'advance blocked'); END",
        )
        .execute(&db.pool)
        .await
        .unwrap();

        let err = service
            .generate_for_schedule(schedule.id, today)
            .await
            .unwrap_err();
        assert!(matches!(err, MaintenanceError::Database(_)));

        let visits = MaintenanceVisit::find_all(
            &db.pool,
            &VisitFilter {
                client_id: Some(schedule.client_id),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(visits.is_empty());
        let stored = MaintenanceSchedule::find_by_id(&db.pool, schedule.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.next_due_date, today);
    }
}
