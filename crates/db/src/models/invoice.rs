use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

const INVOICE_COLUMNS: &str = "id, client_id, order_id, series, folio, status, payment_form, payment_method, cfdi_use, currency, subtotal, tax, total, fiscal_uuid, pac_uid, cancellation_reason, stamped_at, cancelled_at, created_at, updated_at";
const ITEM_COLUMNS: &str = "id, invoice_id, product_id, sat_product_code, sat_unit_code, description, quantity, unit_price, discount, tax_rate";

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "invoice_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InvoiceStatus {
    #[default]
    Draft,
    /// Timbrada: carries a folio fiscal from the PAC
    Stamped,
    Cancelled,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Invoice {
    pub id: Uuid,
    pub client_id: Uuid,
    pub order_id: Option<Uuid>,
    pub series: String,
    pub folio: i64,
    pub status: InvoiceStatus,
    pub payment_form: String,   // forma de pago, e.g. 03 transferencia
    pub payment_method: String, // PUE / PPD
    pub cfdi_use: String,
    pub currency: String,
    pub subtotal: i64,
    pub tax: i64,
    pub total: i64,
    pub fiscal_uuid: Option<String>,
    pub pac_uid: Option<String>,
    pub cancellation_reason: Option<String>,
    pub stamped_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct InvoiceItem {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub product_id: Option<Uuid>,
    pub sat_product_code: String,
    pub sat_unit_code: String,
    pub description: String,
    pub quantity: f64,
    pub unit_price: i64,
    pub discount: i64,
    pub tax_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct InvoiceWithItems {
    #[serde(flatten)]
    #[ts(flatten)]
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
}

impl std::ops::Deref for InvoiceWithItems {
    type Target = Invoice;
    fn deref(&self) -> &Self::Target {
        &self.invoice
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct InvoiceItemInput {
    pub product_id: Option<Uuid>,
    pub sat_product_code: String,
    pub sat_unit_code: String,
    pub description: String,
    pub quantity: f64,
    pub unit_price: i64,
    pub discount: Option<i64>,
    pub tax_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateInvoice {
    pub client_id: Uuid,
    pub order_id: Option<Uuid>,
    pub series: Option<String>,
    pub payment_form: Option<String>,
    pub payment_method: Option<String>,
    pub cfdi_use: Option<String>,
    pub items: Vec<InvoiceItemInput>,
}

/// Header values after defaults have been applied
#[derive(Debug, Clone)]
pub struct InvoiceHeader {
    pub client_id: Uuid,
    pub order_id: Option<Uuid>,
    pub series: String,
    pub payment_form: String,
    pub payment_method: String,
    pub cfdi_use: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
pub struct InvoiceTotals {
    pub subtotal: i64,
    pub tax: i64,
    pub total: i64,
}

/// Line amount before tax: quantity times price, less the discount, never negative
pub fn line_amount(quantity: f64, unit_price: i64, discount: i64) -> i64 {
    let gross = (quantity * unit_price as f64).round() as i64;
    (gross - discount).max(0)
}

pub fn line_tax(amount: i64, tax_rate: f64) -> i64 {
    (amount as f64 * tax_rate).round() as i64
}

impl InvoiceTotals {
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a InvoiceItemInput>) -> Self {
        let mut totals = InvoiceTotals::default();
        for item in items {
            let amount = line_amount(item.quantity, item.unit_price, item.discount.unwrap_or(0));
            let tax = line_tax(amount, item.tax_rate.unwrap_or(0.16));
            totals.subtotal += amount;
            totals.tax += tax;
        }
        totals.total = totals.subtotal + totals.tax;
        totals
    }
}

impl Invoice {
    pub async fn find_all(
        pool: &SqlitePool,
        client_id: Option<Uuid>,
        status: Option<InvoiceStatus>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices
             WHERE ($1 IS NULL OR client_id = $1)
               AND ($2 IS NULL OR status = $2)
             ORDER BY series ASC, folio DESC"
        ))
        .bind(client_id)
        .bind(status)
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_with_items(
        pool: &SqlitePool,
        id: Uuid,
    ) -> Result<Option<InvoiceWithItems>, sqlx::Error> {
        let Some(invoice) = Self::find_by_id(pool, id).await? else {
            return Ok(None);
        };
        let items = InvoiceItem::find_by_invoice_id(pool, id).await?;
        Ok(Some(InvoiceWithItems { invoice, items }))
    }

    /// Insert a draft with the next folio of its series
    pub async fn create_draft(
        conn: &mut SqliteConnection,
        header: &InvoiceHeader,
        items: &[InvoiceItemInput],
        invoice_id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        let folio: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(folio), 0) + 1 FROM invoices WHERE series = $1")
                .bind(&header.series)
                .fetch_one(&mut *conn)
                .await?;

        sqlx::query(
            "INSERT INTO invoices (id, client_id, order_id, series, folio, payment_form, payment_method, cfdi_use)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(invoice_id)
        .bind(header.client_id)
        .bind(header.order_id)
        .bind(&header.series)
        .bind(folio)
        .bind(&header.payment_form)
        .bind(&header.payment_method)
        .bind(&header.cfdi_use)
        .execute(&mut *conn)
        .await?;

        Self::write_items(conn, invoice_id, items).await
    }

    /// Replace the items and store the recomputed totals
    pub async fn write_items(
        conn: &mut SqliteConnection,
        invoice_id: Uuid,
        items: &[InvoiceItemInput],
    ) -> Result<Self, sqlx::Error> {
        sqlx::query("DELETE FROM invoice_items WHERE invoice_id = $1")
            .bind(invoice_id)
            .execute(&mut *conn)
            .await?;

        for (position, item) in items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO invoice_items (id, invoice_id, product_id, sat_product_code, sat_unit_code, description, quantity, unit_price, discount, tax_rate, position)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            )
            .bind(Uuid::new_v4())
            .bind(invoice_id)
            .bind(item.product_id)
            .bind(&item.sat_product_code)
            .bind(&item.sat_unit_code)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.discount.unwrap_or(0))
            .bind(item.tax_rate.unwrap_or(0.16))
            .bind(position as i64)
            .execute(&mut *conn)
            .await?;
        }

        let totals = InvoiceTotals::from_items(items);
        sqlx::query_as::<_, Invoice>(&format!(
            "UPDATE invoices SET subtotal = $2, tax = $3, total = $4, updated_at = datetime('now', 'subsec')
             WHERE id = $1
             RETURNING {INVOICE_COLUMNS}"
        ))
        .bind(invoice_id)
        .bind(totals.subtotal)
        .bind(totals.tax)
        .bind(totals.total)
        .fetch_one(&mut *conn)
        .await
    }

    /// Draft -> stamped. `None` when the invoice is no longer a draft.
    pub async fn mark_stamped(
        pool: &SqlitePool,
        id: Uuid,
        fiscal_uuid: &str,
        pac_uid: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Invoice>(&format!(
            "UPDATE invoices SET status = 'stamped', fiscal_uuid = $2, pac_uid = $3, stamped_at = $4,
                updated_at = datetime('now', 'subsec')
             WHERE id = $1 AND status = 'draft'
             RETURNING {INVOICE_COLUMNS}"
        ))
        .bind(id)
        .bind(fiscal_uuid)
        .bind(pac_uid)
        .bind(Utc::now())
        .fetch_optional(pool)
        .await
    }

    /// Cancel an invoice that is still in `from`. `None` when its status moved on.
    pub async fn mark_cancelled(
        pool: &SqlitePool,
        id: Uuid,
        from: InvoiceStatus,
        reason: Option<&str>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Invoice>(&format!(
            "UPDATE invoices SET status = 'cancelled', cancellation_reason = $2, cancelled_at = $3,
                updated_at = datetime('now', 'subsec')
             WHERE id = $1 AND status = $4
             RETURNING {INVOICE_COLUMNS}"
        ))
        .bind(id)
        .bind(reason)
        .bind(Utc::now())
        .bind(from)
        .fetch_optional(pool)
        .await
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM invoices WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Sum of stamped totals with `stamped_at` in `[from, to)`
    pub async fn stamped_revenue_between(
        pool: &SqlitePool,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COALESCE(SUM(total), 0) FROM invoices
             WHERE status = 'stamped'
               AND datetime(stamped_at) >= datetime($1)
               AND datetime(stamped_at) < datetime($2)",
        )
        .bind(from)
        .bind(to)
        .fetch_one(pool)
        .await
    }

    pub async fn count_by_status(
        pool: &SqlitePool,
        status: InvoiceStatus,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM invoices WHERE status = $1")
            .bind(status)
            .fetch_one(pool)
            .await
    }
}

impl InvoiceItem {
    pub async fn find_by_invoice_id(
        pool: &SqlitePool,
        invoice_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, InvoiceItem>(&format!(
            "SELECT {ITEM_COLUMNS} FROM invoice_items WHERE invoice_id = $1 ORDER BY position ASC"
        ))
        .bind(invoice_id)
        .fetch_all(pool)
        .await
    }

    pub fn amount(&self) -> i64 {
        line_amount(self.quantity, self.unit_price, self.discount)
    }

    pub fn tax(&self) -> i64 {
        line_tax(self.amount(), self.tax_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        DBService,
        models::client::{Client, CreateClient},
    };

    fn item(quantity: f64, unit_price: i64, discount: Option<i64>) -> InvoiceItemInput {
        InvoiceItemInput {
            product_id: None,
            sat_product_code: "26111600".into(),
            sat_unit_code: "H87".into(),
            description: "Panel solar".into(),
            quantity,
            unit_price,
            discount,
            tax_rate: Some(0.16),
        }
    }

    #[test]
    fn totals_round_each_line() {
        // 2.5 m of cable at $33.33 -> 8332.5 rounds to 8333 centavos
        let items = [item(2.5, 3_333, None), item(1.0, 10_000, Some(1_000))];
        let totals = InvoiceTotals::from_items(&items);
        assert_eq!(totals.subtotal, 8_333 + 9_000);
        assert_eq!(totals.tax, 1_333 + 1_440);
        assert_eq!(totals.total, totals.subtotal + totals.tax);
    }

    #[test]
    fn discount_never_makes_a_line_negative() {
        assert_eq!(line_amount(1.0, 500, 900), 0);
    }

    #[tokio::test]
    async fn folios_increase_per_series() {
        let db = DBService::new_in_memory().await.unwrap();
        let client = Client::create(&db.pool, &CreateClient::named("Hotel Sol"), Uuid::new_v4())
            .await
            .unwrap();
        let header = |series: &str| InvoiceHeader {
            client_id: client.id,
            order_id: None,
            series: series.to_string(),
            payment_form: "03".into(),
            payment_method: "PUE".into(),
            cfdi_use: "G03".into(),
        };

        let mut conn = db.pool.acquire().await.unwrap();
        let a1 = Invoice::create_draft(&mut conn, &header("A"), &[item(1.0, 100, None)], Uuid::new_v4())
            .await
            .unwrap();
        let a2 = Invoice::create_draft(&mut conn, &header("A"), &[], Uuid::new_v4())
            .await
            .unwrap();
        let b1 = Invoice::create_draft(&mut conn, &header("B"), &[], Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!((a1.folio, a2.folio, b1.folio), (1, 2, 1));
        assert_eq!(a1.total, 116);
        assert_eq!(a1.status, InvoiceStatus::Draft);
    }
}
