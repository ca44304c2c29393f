use std::sync::LazyLock;

use db::{
    DBService,
    models::client::{Client, CreateClient, UpdateClient},
};
use regex::Regex;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// SAT RFC shape: 3 letters for companies or 4 for individuals, a yymmdd date, then a
/// 3 character homoclave
static RFC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-ZÑ&]{3,4}\d{6}[A-Z0-9]{3}$").expect("Invalid RFC regex")
});

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("client {0} not found")]
    NotFound(Uuid),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("client {0} still has orders or invoices")]
    InUse(Uuid),
}

/// Upper-cased, trimmed RFC, or an error when it does not have the SAT shape.
/// Blank input means "no RFC".
pub fn normalize_rfc(raw: &str) -> Result<Option<String>, ClientError> {
    let rfc = raw.trim().to_uppercase();
    if rfc.is_empty() {
        return Ok(None);
    }
    if !RFC_RE.is_match(&rfc) {
        return Err(ClientError::Validation(format!("malformed RFC {rfc}")));
    }
    Ok(Some(rfc))
}

fn validate_name(name: &str) -> Result<(), ClientError> {
    if name.trim().is_empty() {
        return Err(ClientError::Validation("name is required".to_string()));
    }
    Ok(())
}

#[derive(Clone)]
pub struct ClientService {
    db: DBService,
}

impl ClientService {
    pub fn new(db: DBService) -> Self {
        Self { db }
    }

    pub async fn create(&self, data: &CreateClient) -> Result<Client, ClientError> {
        validate_name(&data.name)?;
        let mut data = data.clone();
        data.name = data.name.trim().to_string();
        data.rfc = match data.rfc.as_deref() {
            Some(raw) => normalize_rfc(raw)?,
            None => None,
        };

        let client = Client::create(&self.db.pool, &data, Uuid::new_v4()).await?;
        info!(client_id = %client.id, name = %client.name, "Client created");
        Ok(client)
    }

    pub async fn update(&self, client_id: Uuid, data: &UpdateClient) -> Result<Client, ClientError> {
        let mut data = data.clone();
        if let Some(name) = &data.name {
            validate_name(name)?;
            data.name = Some(name.trim().to_string());
        }
        if let Some(raw) = data.rfc.as_deref() {
            // a blank RFC clears the stored one
            data.rfc = Some(normalize_rfc(raw)?.unwrap_or_default());
        }

        Client::update(&self.db.pool, client_id, &data)
            .await?
            .ok_or(ClientError::NotFound(client_id))
    }

    pub async fn rotate_portal_token(&self, client_id: Uuid) -> Result<Uuid, ClientError> {
        let token = Client::rotate_portal_token(&self.db.pool, client_id)
            .await?
            .ok_or(ClientError::NotFound(client_id))?;
        info!(client_id = %client_id, "Portal token rotated");
        Ok(token)
    }

    pub async fn delete(&self, client_id: Uuid) -> Result<(), ClientError> {
        match Client::delete(&self.db.pool, client_id).await {
            Ok(0) => Err(ClientError::NotFound(client_id)),
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                Err(ClientError::InUse(client_id))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use db::models::order::{CreateOrder, Order};

    use super::*;

    #[test]
    fn rfc_shapes() {
        assert_eq!(
            normalize_rfc(" godE561231gr8 ").unwrap().as_deref(),
            Some("GODE561231GR8")
        );
        assert!(normalize_rfc("MSO120101AB1").unwrap().is_some());
        assert!(normalize_rfc("").unwrap().is_none());
        assert!(normalize_rfc("GODE5612").is_err());
        assert!(normalize_rfc("GODE561231GR8X").is_err());
    }

    #[tokio::test]
    async fn create_normalizes_and_validates() {
        let db = DBService::new_in_memory().await.unwrap();
        let service = ClientService::new(db);

        let mut data = CreateClient::named("  Paneles del Norte ");
        data.rfc = Some("pno120101ab1".into());
        let client = service.create(&data).await.unwrap();
        assert_eq!(client.name, "Paneles del Norte");
        assert_eq!(client.rfc.as_deref(), Some("PNO120101AB1"));

        assert!(matches!(
            service.create(&CreateClient::named("   ")).await,
            Err(ClientError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn blank_rfc_clears_the_stored_one() {
        let db = DBService::new_in_memory().await.unwrap();
        let service = ClientService::new(db);

        let mut data = CreateClient::named("Paneles del Norte");
        data.rfc = Some("PNO120101AB1".into());
        let client = service.create(&data).await.unwrap();

        // omitted fields are kept
        let kept = service
            .update(
                client.id,
                &UpdateClient {
                    phone: Some("8112345678".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(kept.rfc.as_deref(), Some("PNO120101AB1"));

        let cleared = service
            .update(
                client.id,
                &UpdateClient {
                    rfc: Some("   ".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(cleared.rfc, None);
        assert_eq!(cleared.phone.as_deref(), Some("8112345678"));

        assert!(matches!(
            service
                .update(
                    client.id,
                    &UpdateClient {
                        rfc: Some("NOPE".into()),
                        ..Default::default()
                    },
                )
                .await,
            Err(ClientError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn clients_with_orders_cannot_be_deleted() {
        let db = DBService::new_in_memory().await.unwrap();
        let service = ClientService::new(db.clone());
        let client = service.create(&CreateClient::named("Rancho")).await.unwrap();

        let mut tx = db.pool.begin().await.unwrap();
        Order::create(
            &mut tx,
            &CreateOrder {
                client_id: client.id,
                installation_date: None,
                notes: None,
                items: vec![],
            },
            &[],
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert!(matches!(
            service.delete(client.id).await,
            Err(ClientError::InUse(_))
        ));
        assert!(matches!(
            service.delete(Uuid::new_v4()).await,
            Err(ClientError::NotFound(_))
        ));
    }
}
