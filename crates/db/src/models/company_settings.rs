use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use ts_rs::TS;

const SETTINGS_COLUMNS: &str = "business_name, rfc, tax_regime, postal_code, invoice_series, default_tax_rate, default_payment_form, default_payment_method, updated_at";

/// Issuer data used on every CFDI. There is exactly one row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct CompanySettings {
    pub business_name: String,
    pub rfc: Option<String>,
    pub tax_regime: String,
    pub postal_code: Option<String>, // lugar de expedicion
    pub invoice_series: String,
    pub default_tax_rate: f64,
    pub default_payment_form: String,
    pub default_payment_method: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct UpdateCompanySettings {
    pub business_name: Option<String>,
    pub rfc: Option<String>,
    pub tax_regime: Option<String>,
    pub postal_code: Option<String>,
    pub invoice_series: Option<String>,
    pub default_tax_rate: Option<f64>,
    pub default_payment_form: Option<String>,
    pub default_payment_method: Option<String>,
}

impl CompanySettings {
    /// Fetch the settings row, inserting the defaults the first time.
    pub async fn get(pool: &SqlitePool) -> Result<Self, sqlx::Error> {
        sqlx::query("INSERT OR IGNORE INTO company_settings (id) VALUES (1)")
            .execute(pool)
            .await?;
        sqlx::query_as::<_, CompanySettings>(&format!(
            "SELECT {SETTINGS_COLUMNS} FROM company_settings WHERE id = 1"
        ))
        .fetch_one(pool)
        .await
    }

    pub async fn update(
        pool: &SqlitePool,
        data: &UpdateCompanySettings,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query("INSERT OR IGNORE INTO company_settings (id) VALUES (1)")
            .execute(pool)
            .await?;
        sqlx::query_as::<_, CompanySettings>(&format!(
            "UPDATE company_settings SET
                business_name = coalesce($1, business_name),
                rfc = coalesce($2, rfc),
                tax_regime = coalesce($3, tax_regime),
                postal_code = coalesce($4, postal_code),
                invoice_series = coalesce($5, invoice_series),
                default_tax_rate = coalesce($6, default_tax_rate),
                default_payment_form = coalesce($7, default_payment_form),
                default_payment_method = coalesce($8, default_payment_method),
                updated_at = datetime('now', 'subsec')
             WHERE id = 1
             RETURNING {SETTINGS_COLUMNS}"
        ))
        .bind(&data.business_name)
        .bind(&data.rfc)
        .bind(&data.tax_regime)
        .bind(&data.postal_code)
        .bind(&data.invoice_series)
        .bind(data.default_tax_rate)
        .bind(&data.default_payment_form)
        .bind(&data.default_payment_method)
        .fetch_one(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DBService;

    #[tokio::test]
    async fn defaults_are_created_lazily() {
        let db = DBService::new_in_memory().await.unwrap();
        let settings = CompanySettings::get(&db.pool).await.unwrap();
        assert_eq!(settings.invoice_series, "A");
        assert!((settings.default_tax_rate - 0.16).abs() < f64::EPSILON);

        let updated = CompanySettings::update(
            &db.pool,
            &UpdateCompanySettings {
                rfc: Some("MSO200101AB1".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.rfc.as_deref(), Some("MSO200101AB1"));
        assert_eq!(updated.default_payment_method, "PUE");
    }
}
