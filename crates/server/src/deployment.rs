use std::sync::Arc;

use db::DBService;
use services::services::{
    clients::ClientService,
    config::Config,
    dashboard::DashboardService,
    facturalo::FacturaloClient,
    growatt::{GrowattApi, GrowattClient, GrowattError, GrowattSession},
    growatt_sync::GrowattSyncService,
    inventory::OrderWorkflow,
    invoicing::{InvoiceStamper, InvoicingService, UnconfiguredStamper},
    maintenance::MaintenanceService,
    notification::NotificationService,
    scheduling::SchedulingService,
};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Growatt(#[from] GrowattError),
}

/// Shared application state handed to every route
#[derive(Clone)]
pub struct DeploymentImpl {
    db: DBService,
    config: Arc<Config>,
    clients: ClientService,
    orders: OrderWorkflow,
    invoicing: InvoicingService,
    scheduling: SchedulingService,
    maintenance: MaintenanceService,
    notifications: NotificationService,
    growatt: GrowattSyncService,
    dashboard: DashboardService,
}

impl DeploymentImpl {
    pub async fn new(config: Config) -> Result<Self, DeploymentError> {
        let db = DBService::new().await?;

        let stamper: Arc<dyn InvoiceStamper> = match FacturaloClient::from_config(&config.facturalo)
        {
            Ok(client) => Arc::new(client),
            Err(e) => {
                warn!("Facturalo is not configured, invoices cannot be stamped: {}", e);
                Arc::new(UnconfiguredStamper)
            }
        };
        let growatt_api: Arc<dyn GrowattApi> = Arc::new(GrowattClient::new(&config.growatt.base_url)?);

        Ok(Self::with_db(db, config, stamper, growatt_api))
    }

    /// Wire the services over an already opened database
    pub fn with_db(
        db: DBService,
        config: Config,
        stamper: Arc<dyn InvoiceStamper>,
        growatt_api: Arc<dyn GrowattApi>,
    ) -> Self {
        let notifications = NotificationService::new(db.clone());
        let scheduling = SchedulingService::new(db.clone(), config.scheduling.clone());
        let maintenance = MaintenanceService::new(
            db.clone(),
            scheduling.clone(),
            config.maintenance.clone(),
            notifications.clone(),
        );
        let session = Arc::new(GrowattSession::new(growatt_api, &config.growatt));

        Self {
            clients: ClientService::new(db.clone()),
            orders: OrderWorkflow::new(db.clone()),
            invoicing: InvoicingService::new(db.clone(), stamper),
            growatt: GrowattSyncService::new(db.clone(), session, config.growatt.clone()),
            dashboard: DashboardService::new(db.clone(), config.growatt.cache_ttl_secs),
            scheduling,
            maintenance,
            notifications,
            config: Arc::new(config),
            db,
        }
    }

    pub fn db(&self) -> &DBService {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn clients(&self) -> &ClientService {
        &self.clients
    }

    pub fn orders(&self) -> &OrderWorkflow {
        &self.orders
    }

    pub fn invoicing(&self) -> &InvoicingService {
        &self.invoicing
    }

    pub fn scheduling(&self) -> &SchedulingService {
        &self.scheduling
    }

    pub fn maintenance(&self) -> &MaintenanceService {
        &self.maintenance
    }

    pub fn notifications(&self) -> &NotificationService {
        &self.notifications
    }

    pub fn growatt(&self) -> &GrowattSyncService {
        &self.growatt
    }

    pub fn dashboard(&self) -> &DashboardService {
        &self.dashboard
    }
}
