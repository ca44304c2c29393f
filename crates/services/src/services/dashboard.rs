use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use db::{
    DBService,
    models::{
        client::Client,
        growatt::{GrowattPlantCache, GrowattSyncRun},
        invoice::{Invoice, InvoiceStatus},
        maintenance::MaintenanceVisit,
        order::{Order, OrderStatusCount},
        product::Product,
    },
};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::growatt_sync::is_fresh;

const UPCOMING_VISIT_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct DashboardSummary {
    pub total_clients: i64,
    pub orders_by_status: Vec<OrderStatusCount>,
    /// Stamped this calendar month, centavos
    pub monthly_revenue: i64,
    pub pending_invoices: i64,
    pub low_stock_products: i64,
    pub upcoming_visits: i64,
    pub unassigned_visits: i64,
    pub solar: SolarSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct SolarSummary {
    pub plants: i64,
    pub stale_plants: i64,
    pub total_current_power_w: f64,
    pub last_sync: Option<GrowattSyncRun>,
}

/// `[first day of the month, first day of the next month)` in UTC
pub fn month_bounds(today: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = today.with_day(1).unwrap_or(today);
    let end = start
        .checked_add_months(Months::new(1))
        .unwrap_or(NaiveDate::MAX);
    (
        start.and_time(chrono::NaiveTime::MIN).and_utc(),
        end.and_time(chrono::NaiveTime::MIN).and_utc(),
    )
}

#[derive(Clone)]
pub struct DashboardService {
    db: DBService,
    cache_ttl_secs: i64,
}

impl DashboardService {
    pub fn new(db: DBService, cache_ttl_secs: i64) -> Self {
        Self { db, cache_ttl_secs }
    }

    pub async fn summary(&self, now: DateTime<Utc>) -> Result<DashboardSummary, sqlx::Error> {
        let pool = &self.db.pool;
        let today = now.date_naive();
        let (month_start, month_end) = month_bounds(today);

        let plants = GrowattPlantCache::find_all(pool).await?;
        let stale_plants = plants
            .iter()
            .filter(|p| !is_fresh(p, now, self.cache_ttl_secs))
            .count() as i64;
        let total_current_power_w = plants.iter().filter_map(|p| p.current_power_w).sum();

        Ok(DashboardSummary {
            total_clients: Client::count(pool).await?,
            orders_by_status: Order::count_by_status(pool).await?,
            monthly_revenue: Invoice::stamped_revenue_between(pool, month_start, month_end).await?,
            pending_invoices: Invoice::count_by_status(pool, InvoiceStatus::Draft).await?,
            low_stock_products: Product::count_low_stock(pool).await?,
            upcoming_visits: MaintenanceVisit::count_scheduled_between(
                pool,
                today,
                today + chrono::Duration::days(UPCOMING_VISIT_DAYS),
            )
            .await?,
            unassigned_visits: MaintenanceVisit::find_unassigned(pool).await?.len() as i64,
            solar: SolarSummary {
                plants: plants.len() as i64,
                stale_plants,
                total_current_power_w,
                last_sync: GrowattSyncRun::find_latest(pool).await?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use db::models::{
        client::CreateClient,
        growatt::PlantData,
        invoice::{InvoiceHeader, InvoiceItemInput},
        product::{CreateProduct, ProductCategory},
    };
    use uuid::Uuid;

    use super::*;

    #[test]
    fn december_rolls_into_january() {
        let (start, end) = month_bounds(NaiveDate::from_ymd_opt(2026, 12, 15).unwrap());
        assert_eq!(start.to_rfc3339(), "2026-12-01T00:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2027-01-01T00:00:00+00:00");
    }

    #[tokio::test]
    async fn summary_counts_business_state() {
        let db = DBService::new_in_memory().await.unwrap();
        let client = Client::create(&db.pool, &CreateClient::named("Ferretería Luz"), Uuid::new_v4())
            .await
            .unwrap();
        Product::create(
            &db.pool,
            &CreateProduct {
                sku: "INV-5K".into(),
                name: "Inversor 5kW".into(),
                description: None,
                category: ProductCategory::Inverter,
                unit_price: 1_800_000,
                sat_product_code: None,
                sat_unit_code: None,
                stock: Some(1),
                min_stock: Some(2),
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();

        let header = InvoiceHeader {
            client_id: client.id,
            order_id: None,
            series: "A".into(),
            payment_form: "03".into(),
            payment_method: "PUE".into(),
            cfdi_use: "G03".into(),
        };
        let items = [InvoiceItemInput {
            product_id: None,
            sat_product_code: "81101701".into(),
            sat_unit_code: "E48".into(),
            description: "Limpieza de paneles".into(),
            quantity: 1.0,
            unit_price: 100_000,
            discount: None,
            tax_rate: Some(0.16),
        }];
        let mut tx = db.pool.begin().await.unwrap();
        let stamped = Invoice::create_draft(&mut tx, &header, &items, Uuid::new_v4())
            .await
            .unwrap();
        Invoice::create_draft(&mut tx, &header, &items, Uuid::new_v4())
            .await
            .unwrap();
        tx.commit().await.unwrap();
        Invoice::mark_stamped(&db.pool, stamped.id, "UUID-1", "uid-1")
            .await
            .unwrap();

        GrowattPlantCache::upsert_data(
            &db.pool,
            &PlantData {
                plant_id: "1".into(),
                name: "Ferretería".into(),
                city: None,
                peak_power_kw: Some(10.0),
                current_power_w: Some(2500.0),
                today_energy_kwh: None,
                total_energy_kwh: None,
                plant_status: None,
                data_updated_at: None,
            },
            Utc::now(),
        )
        .await
        .unwrap();

        let summary = DashboardService::new(db.clone(), 1800)
            .summary(Utc::now())
            .await
            .unwrap();
        assert_eq!(summary.total_clients, 1);
        assert_eq!(summary.monthly_revenue, 116_000);
        assert_eq!(summary.pending_invoices, 1);
        assert_eq!(summary.low_stock_products, 1);
        assert_eq!(summary.solar.plants, 1);
        assert_eq!(summary.solar.stale_plants, 0);
        assert_eq!(summary.solar.total_current_power_w, 2500.0);
        assert!(summary.solar.last_sync.is_none());
    }
}
