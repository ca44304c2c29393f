pub mod clients;
pub mod config;
pub mod dashboard;
pub mod facturalo;
pub mod growatt;
pub mod growatt_sync;
pub mod inventory;
pub mod invoicing;
pub mod maintenance;
pub mod notification;
pub mod scheduling;

/// Retries after the first attempt for the outbound HTTP clients
pub(crate) const HTTP_RETRY_TIMES: usize = 3;
