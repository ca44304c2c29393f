use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use ts_rs::TS;
use uuid::Uuid;

const CLIENT_COLUMNS: &str = "id, name, email, phone, address, city, state, postal_code, rfc, tax_regime, cfdi_use, growatt_plant_id, portal_token, notes, created_at, updated_at";

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Client {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub rfc: Option<String>,
    pub tax_regime: String, // SAT regimen fiscal, e.g. 612
    pub cfdi_use: String,   // SAT uso CFDI, e.g. G03
    pub growatt_plant_id: Option<String>,
    #[serde(skip_serializing, default)]
    #[ts(skip)]
    pub portal_token: Uuid,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateClient {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub rfc: Option<String>,
    pub tax_regime: Option<String>,
    pub cfdi_use: Option<String>,
    pub growatt_plant_id: Option<String>,
    pub notes: Option<String>,
}

impl CreateClient {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: None,
            phone: None,
            address: None,
            city: None,
            state: None,
            postal_code: None,
            rfc: None,
            tax_regime: None,
            cfdi_use: None,
            growatt_plant_id: None,
            notes: None,
        }
    }
}

/// Partial update; `None` keeps the stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct UpdateClient {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub rfc: Option<String>,
    pub tax_regime: Option<String>,
    pub cfdi_use: Option<String>,
    pub growatt_plant_id: Option<String>,
    pub notes: Option<String>,
}

/// What a client sees of their own record through the portal
#[derive(Debug, Clone, Serialize, TS)]
pub struct PortalProfile {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub rfc: Option<String>,
    pub tax_regime: String,
    pub cfdi_use: String,
    pub has_solar: bool,
}

impl From<Client> for PortalProfile {
    fn from(client: Client) -> Self {
        Self {
            has_solar: client
                .growatt_plant_id
                .as_deref()
                .is_some_and(|id| !id.trim().is_empty()),
            name: client.name,
            email: client.email,
            phone: client.phone,
            address: client.address,
            city: client.city,
            state: client.state,
            postal_code: client.postal_code,
            rfc: client.rfc,
            tax_regime: client.tax_regime,
            cfdi_use: client.cfdi_use,
        }
    }
}

impl Client {
    pub async fn find_all(
        pool: &SqlitePool,
        search: Option<&str>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        match search.map(str::trim).filter(|s| !s.is_empty()) {
            Some(term) => {
                let pattern = format!("%{}%", term.to_lowercase());
                sqlx::query_as::<_, Client>(&format!(
                    "SELECT {CLIENT_COLUMNS} FROM clients
                     WHERE lower(name) LIKE $1 OR lower(coalesce(email, '')) LIKE $1 OR lower(coalesce(rfc, '')) LIKE $1
                     ORDER BY name ASC"
                ))
                .bind(pattern)
                .fetch_all(pool)
                .await
            }
            None => {
                sqlx::query_as::<_, Client>(&format!(
                    "SELECT {CLIENT_COLUMNS} FROM clients ORDER BY name ASC"
                ))
                .fetch_all(pool)
                .await
            }
        }
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Client>(&format!(
            "SELECT {CLIENT_COLUMNS} FROM clients WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_portal_token(
        pool: &SqlitePool,
        token: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Client>(&format!(
            "SELECT {CLIENT_COLUMNS} FROM clients WHERE portal_token = $1"
        ))
        .bind(token)
        .fetch_optional(pool)
        .await
    }

    /// Clients linked to a Growatt plant
    pub async fn find_with_growatt_plant(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Client>(&format!(
            "SELECT {CLIENT_COLUMNS} FROM clients WHERE growatt_plant_id IS NOT NULL ORDER BY name ASC"
        ))
        .fetch_all(pool)
        .await
    }

    pub async fn count(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM clients")
            .fetch_one(pool)
            .await
    }

    pub async fn create(
        pool: &SqlitePool,
        data: &CreateClient,
        client_id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        let tax_regime = data.tax_regime.clone().unwrap_or_else(|| "612".to_string());
        let cfdi_use = data.cfdi_use.clone().unwrap_or_else(|| "G03".to_string());
        sqlx::query_as::<_, Client>(&format!(
            "INSERT INTO clients (id, name, email, phone, address, city, state, postal_code, rfc, tax_regime, cfdi_use, growatt_plant_id, portal_token, notes)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
             RETURNING {CLIENT_COLUMNS}"
        ))
        .bind(client_id)
        .bind(&data.name)
        .bind(&data.email)
        .bind(&data.phone)
        .bind(&data.address)
        .bind(&data.city)
        .bind(&data.state)
        .bind(&data.postal_code)
        .bind(&data.rfc)
        .bind(tax_regime)
        .bind(cfdi_use)
        .bind(&data.growatt_plant_id)
        .bind(Uuid::new_v4())
        .bind(&data.notes)
        .fetch_one(pool)
        .await
    }

    /// `None` keeps a field; an empty string clears an optional one.
    pub async fn update(
        pool: &SqlitePool,
        id: Uuid,
        data: &UpdateClient,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Client>(&format!(
            "UPDATE clients SET
                name = coalesce($2, name),
                email = nullif(coalesce($3, email), ''),
                phone = nullif(coalesce($4, phone), ''),
                address = nullif(coalesce($5, address), ''),
                city = nullif(coalesce($6, city), ''),
                state = nullif(coalesce($7, state), ''),
                postal_code = nullif(coalesce($8, postal_code), ''),
                rfc = nullif(coalesce($9, rfc), ''),
                tax_regime = coalesce($10, tax_regime),
                cfdi_use = coalesce($11, cfdi_use),
                growatt_plant_id = nullif(coalesce($12, growatt_plant_id), ''),
                notes = nullif(coalesce($13, notes), ''),
                updated_at = datetime('now', 'subsec')
             WHERE id = $1
             RETURNING {CLIENT_COLUMNS}"
        ))
        .bind(id)
        .bind(&data.name)
        .bind(&data.email)
        .bind(&data.phone)
        .bind(&data.address)
        .bind(&data.city)
        .bind(&data.state)
        .bind(&data.postal_code)
        .bind(&data.rfc)
        .bind(&data.tax_regime)
        .bind(&data.cfdi_use)
        .bind(&data.growatt_plant_id)
        .bind(&data.notes)
        .fetch_optional(pool)
        .await
    }

    /// Issue a new portal token, invalidating any link shared before.
    pub async fn rotate_portal_token(
        pool: &SqlitePool,
        id: Uuid,
    ) -> Result<Option<Uuid>, sqlx::Error> {
        let token = Uuid::new_v4();
        let result = sqlx::query(
            "UPDATE clients SET portal_token = $2, updated_at = datetime('now', 'subsec') WHERE id = $1",
        )
        .bind(id)
        .bind(token)
        .execute(pool)
        .await?;
        Ok((result.rows_affected() > 0).then_some(token))
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM clients WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
