//! Technician availability: hour-slot conflict detection with travel buffers.

use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate};
use db::{
    DBService,
    models::{
        maintenance::MaintenanceVisit,
        technician::{CreateTechnician, Technician, UpdateTechnician},
    },
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use ts_rs::TS;
use uuid::Uuid;

use super::config::SchedulingConfig;

#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("technician {0} not found")]
    TechnicianNotFound(Uuid),
    #[error("technician {0} is inactive")]
    TechnicianInactive(Uuid),
    #[error("invalid working hours {start}:00-{end}:00")]
    InvalidWorkingHours { start: i32, end: i32 },
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("invalid duration: {0} hours")]
    InvalidDuration(i32),
    #[error("{0} is not a working day")]
    NonWorkingDay(NaiveDate),
    #[error("slot {start_hour}:00-{end_hour}:00 is outside working hours {work_start}:00-{work_end}:00")]
    OutsideWorkingHours {
        start_hour: i32,
        end_hour: i32,
        work_start: i32,
        work_end: i32,
    },
    #[error("slot conflicts with visit {visit_id}")]
    Conflict { visit_id: Uuid },
}

/// Hours `[start_hour, end_hour)` taken by an open visit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct Booking {
    pub visit_id: Uuid,
    pub start_hour: i32,
    pub end_hour: i32,
}

impl From<&MaintenanceVisit> for Booking {
    fn from(visit: &MaintenanceVisit) -> Self {
        Self {
            visit_id: visit.id,
            start_hour: visit.start_hour,
            end_hour: visit.end_hour(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct SlotSuggestion {
    pub date: NaiveDate,
    pub technician_id: Uuid,
    pub technician_name: String,
    pub start_hour: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct TechnicianAvailability {
    pub technician_id: Uuid,
    pub date: NaiveDate,
    pub duration_hours: i32,
    pub start_hours: Vec<i32>,
    pub bookings: Vec<Booking>,
}

/// First booking the candidate slot clashes with. Two visits clash unless `buffer` hours of
/// travel fit between them.
pub fn conflicting_booking(
    bookings: &[Booking],
    start_hour: i32,
    duration_hours: i32,
    buffer_hours: i32,
) -> Option<&Booking> {
    let end_hour = start_hour.saturating_add(duration_hours);
    bookings
        .iter()
        .find(|b| start_hour < b.end_hour + buffer_hours && b.start_hour < end_hour + buffer_hours)
}

/// Every start hour inside the working day whose slot clashes with nothing, ascending.
/// The buffer applies between visits only, never against the edges of the day.
pub fn free_slots(
    work_start: i32,
    work_end: i32,
    bookings: &[Booking],
    duration_hours: i32,
    buffer_hours: i32,
) -> Vec<i32> {
    if duration_hours < 1 || work_end - work_start < duration_hours {
        return Vec::new();
    }
    (work_start..=work_end - duration_hours)
        .filter(|&h| conflicting_booking(bookings, h, duration_hours, buffer_hours).is_none())
        .collect()
}

/// A slot must start within the day and last between one hour and a full day. Checked
/// before any hour arithmetic on caller input.
pub fn validate_slot_bounds(start_hour: i32, duration_hours: i32) -> Result<(), SchedulingError> {
    if !(1..=24).contains(&duration_hours) {
        return Err(SchedulingError::InvalidDuration(duration_hours));
    }
    if !(0..24).contains(&start_hour) {
        return Err(SchedulingError::Validation(format!(
            "start_hour must be between 0 and 23, got {start_hour}"
        )));
    }
    Ok(())
}

/// A working day must satisfy `0 <= start < end <= 24`
pub fn validate_working_hours(start: i32, end: i32) -> Result<(), SchedulingError> {
    if start < 0 || end > 24 || start >= end {
        return Err(SchedulingError::InvalidWorkingHours { start, end });
    }
    Ok(())
}

#[derive(Clone)]
pub struct SchedulingService {
    db: DBService,
    config: SchedulingConfig,
    agenda_lock: Arc<Mutex<()>>,
}

impl SchedulingService {
    pub fn new(db: DBService, config: SchedulingConfig) -> Self {
        Self {
            db,
            config,
            agenda_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Serialises check-then-write on technician agendas. Hold the guard from
    /// [`Self::check_slot`] until the visit row is written. Shared by every clone.
    pub async fn lock_agenda(&self) -> MutexGuard<'_, ()> {
        self.agenda_lock.lock().await
    }

    pub fn config(&self) -> &SchedulingConfig {
        &self.config
    }

    pub fn is_working_day(&self, date: NaiveDate) -> bool {
        self.config.working_weekdays.contains(&date.weekday())
    }

    /// Check everything about a slot except clashes with other visits
    pub fn validate_request(
        &self,
        technician: &Technician,
        date: NaiveDate,
        start_hour: i32,
        duration_hours: i32,
    ) -> Result<(), SchedulingError> {
        validate_slot_bounds(start_hour, duration_hours)?;
        if !technician.active {
            return Err(SchedulingError::TechnicianInactive(technician.id));
        }
        if !self.is_working_day(date) {
            return Err(SchedulingError::NonWorkingDay(date));
        }
        let end_hour = start_hour + duration_hours;
        if start_hour < technician.work_start_hour || end_hour > technician.work_end_hour {
            return Err(SchedulingError::OutsideWorkingHours {
                start_hour,
                end_hour,
                work_start: technician.work_start_hour,
                work_end: technician.work_end_hour,
            });
        }
        Ok(())
    }

    pub async fn create_technician(
        &self,
        data: &CreateTechnician,
    ) -> Result<Technician, SchedulingError> {
        if data.name.trim().is_empty() {
            return Err(SchedulingError::Validation("name is required".to_string()));
        }
        validate_working_hours(
            data.work_start_hour.unwrap_or(8),
            data.work_end_hour.unwrap_or(18),
        )?;
        let technician = Technician::create(&self.db.pool, data, Uuid::new_v4()).await?;
        info!(technician_id = %technician.id, name = %technician.name, "Technician created");
        Ok(technician)
    }

    /// Partial update; the merged working hours must still be valid
    pub async fn update_technician(
        &self,
        technician_id: Uuid,
        data: &UpdateTechnician,
    ) -> Result<Technician, SchedulingError> {
        if data.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(SchedulingError::Validation("name cannot be empty".to_string()));
        }
        let current = self.technician(technician_id).await?;
        validate_working_hours(
            data.work_start_hour.unwrap_or(current.work_start_hour),
            data.work_end_hour.unwrap_or(current.work_end_hour),
        )?;
        Technician::update(&self.db.pool, technician_id, data)
            .await?
            .ok_or(SchedulingError::TechnicianNotFound(technician_id))
    }

    /// Existing visits keep their technician; new ones can no longer be booked
    pub async fn deactivate_technician(&self, technician_id: Uuid) -> Result<(), SchedulingError> {
        if Technician::deactivate(&self.db.pool, technician_id).await? == 0 {
            return Err(SchedulingError::TechnicianNotFound(technician_id));
        }
        info!(technician_id = %technician_id, "Technician deactivated");
        Ok(())
    }

    pub async fn technician(&self, technician_id: Uuid) -> Result<Technician, SchedulingError> {
        Technician::find_by_id(&self.db.pool, technician_id)
            .await?
            .ok_or(SchedulingError::TechnicianNotFound(technician_id))
    }

    async fn bookings(
        &self,
        technician_id: Uuid,
        date: NaiveDate,
        exclude_visit: Option<Uuid>,
    ) -> Result<Vec<Booking>, SchedulingError> {
        let visits =
            MaintenanceVisit::find_booked_for_technician_on(&self.db.pool, technician_id, date)
                .await?;
        Ok(visits
            .iter()
            .filter(|v| Some(v.id) != exclude_visit)
            .map(Booking::from)
            .collect())
    }

    /// Start hours at which the technician can take a visit of `duration_hours` on `date`
    pub async fn available_slots(
        &self,
        technician_id: Uuid,
        date: NaiveDate,
        duration_hours: i32,
    ) -> Result<TechnicianAvailability, SchedulingError> {
        if !(1..=24).contains(&duration_hours) {
            return Err(SchedulingError::InvalidDuration(duration_hours));
        }
        let technician = self.technician(technician_id).await?;
        let bookings = self.bookings(technician_id, date, None).await?;

        let start_hours = if technician.active && self.is_working_day(date) {
            free_slots(
                technician.work_start_hour,
                technician.work_end_hour,
                &bookings,
                duration_hours,
                self.config.travel_buffer_hours,
            )
        } else {
            Vec::new()
        };

        Ok(TechnicianAvailability {
            technician_id,
            date,
            duration_hours,
            start_hours,
            bookings,
        })
    }

    /// Fail with the first clashing visit, if any. `exclude_visit` lets a visit be moved
    /// without clashing with itself.
    pub async fn check_slot(
        &self,
        technician_id: Uuid,
        date: NaiveDate,
        start_hour: i32,
        duration_hours: i32,
        exclude_visit: Option<Uuid>,
    ) -> Result<(), SchedulingError> {
        let technician = self.technician(technician_id).await?;
        self.validate_request(&technician, date, start_hour, duration_hours)?;

        let bookings = self.bookings(technician_id, date, exclude_visit).await?;
        if let Some(booking) = conflicting_booking(
            &bookings,
            start_hour,
            duration_hours,
            self.config.travel_buffer_hours,
        ) {
            debug!(
                technician_id = %technician_id,
                visit_id = %booking.visit_id,
                %date,
                start_hour,
                "Scheduling: slot conflicts with existing visit"
            );
            return Err(SchedulingError::Conflict {
                visit_id: booking.visit_id,
            });
        }
        Ok(())
    }

    /// Active technicians free for the whole slot
    pub async fn available_technicians(
        &self,
        date: NaiveDate,
        start_hour: i32,
        duration_hours: i32,
    ) -> Result<Vec<Technician>, SchedulingError> {
        validate_slot_bounds(start_hour, duration_hours)?;
        let technicians = Technician::find_all(&self.db.pool, true).await?;
        let mut available = Vec::new();
        for technician in technicians {
            match self
                .check_slot(technician.id, date, start_hour, duration_hours, None)
                .await
            {
                Ok(()) => available.push(technician),
                Err(SchedulingError::Database(e)) => return Err(SchedulingError::Database(e)),
                Err(_) => {}
            }
        }
        Ok(available)
    }

    /// Earliest free slot within the search horizon: dates ascending, then technicians by
    /// name, then hours ascending.
    pub async fn next_available(
        &self,
        technician_id: Option<Uuid>,
        from: NaiveDate,
        duration_hours: i32,
    ) -> Result<Option<SlotSuggestion>, SchedulingError> {
        if !(1..=24).contains(&duration_hours) {
            return Err(SchedulingError::InvalidDuration(duration_hours));
        }
        let technicians = match technician_id {
            Some(id) => vec![self.technician(id).await?],
            None => Technician::find_all(&self.db.pool, true).await?,
        };

        for offset in 0..self.config.search_horizon_days.max(1) {
            let date = from + Duration::days(offset);
            if !self.is_working_day(date) {
                continue;
            }
            for technician in technicians.iter().filter(|t| t.active) {
                let bookings = self.bookings(technician.id, date, None).await?;
                let slots = free_slots(
                    technician.work_start_hour,
                    technician.work_end_hour,
                    &bookings,
                    duration_hours,
                    self.config.travel_buffer_hours,
                );
                if let Some(&start_hour) = slots.first() {
                    return Ok(Some(SlotSuggestion {
                        date,
                        technician_id: technician.id,
                        technician_name: technician.name.clone(),
                        start_hour,
                    }));
                }
            }
        }
        Ok(None)
    }
}
