use db::{DBService, models::notification::Notification};
use tracing::{info, warn};

/// In-app notifications. Device push delivery is handled elsewhere.
#[derive(Clone)]
pub struct NotificationService {
    db: DBService,
}

impl NotificationService {
    pub fn new(db: DBService) -> Self {
        Self { db }
    }

    /// Record a notification. Failures are logged and swallowed so callers never abort on them.
    pub async fn notify(&self, title: &str, message: &str) {
        info!(title = %title, "Notification: {}", message);
        if let Err(e) = Notification::create(&self.db.pool, title, message).await {
            warn!(title = %title, error = %e, "Failed to store notification");
        }
    }
}
