//! Factura-lo Plus PAC client: stamps and cancels CFDI 4.0 invoices.

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::{
    HTTP_RETRY_TIMES,
    config::FacturaloConfig,
    invoicing::{InvoiceStamper, StampedCfdi},
};

#[derive(Debug, Clone, Error)]
pub enum FacturaloError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("rate limited")]
    RateLimited,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("rejected by PAC: {0}")]
    Rejected(String),
    #[error("json error: {0}")]
    Serde(String),
    #[error("missing credentials: FACTURALO_API_KEY and FACTURALO_SECRET_KEY must be set")]
    MissingCredentials,
}

impl FacturaloError {
    /// Returns true if the error is transient and should be retried.
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::Http { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }
}

/// CFDI 4.0 body for `/v4/cfdi40/create`. Amounts are pesos with two decimals.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CfdiPayload {
    pub receptor: Receptor,
    pub tipo_documento: String,
    pub conceptos: Vec<Concepto>,
    #[serde(rename = "UsoCFDI")]
    pub uso_cfdi: String,
    pub serie: String,
    pub folio: i64,
    pub forma_pago: String,
    pub metodo_pago: String,
    pub moneda: String,
    pub lugar_expedicion: Option<String>,
    pub enviar_correo: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Receptor {
    pub rfc: String,
    pub nombre: String,
    pub regimen_fiscal: String,
    pub domicilio_fiscal: Option<String>,
    #[serde(rename = "UsoCFDI")]
    pub uso_cfdi: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Concepto {
    pub clave_prod_serv: String,
    pub clave_unidad: String,
    pub cantidad: f64,
    pub descripcion: String,
    pub valor_unitario: f64,
    pub importe: f64,
    pub descuento: f64,
    pub impuestos: Impuestos,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Impuestos {
    pub traslados: Vec<Traslado>,
}

/// IVA is tax `002`, always a rate (`Tasa`)
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Traslado {
    pub base: f64,
    pub impuesto: String,
    pub tipo_factor: String,
    pub tasa_o_cuota: String,
    pub importe: f64,
}

impl Traslado {
    pub fn iva(base_centavos: i64, rate: f64, tax_centavos: i64) -> Self {
        Self {
            base: pesos(base_centavos),
            impuesto: "002".to_string(),
            tipo_factor: "Tasa".to_string(),
            tasa_o_cuota: format!("{rate:.6}"),
            importe: pesos(tax_centavos),
        }
    }
}

pub fn pesos(centavos: i64) -> f64 {
    centavos as f64 / 100.0
}

#[derive(Debug, Serialize)]
struct CancelRequest<'a> {
    motivo: &'a str,
    #[serde(rename = "folioSustituto", skip_serializing_if = "Option::is_none")]
    folio_sustituto: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct FacturaloResponse {
    response: String,
    #[serde(rename = "UUID")]
    uuid: Option<String>,
    uid: Option<String>,
    message: Option<serde_json::Value>,
}

impl FacturaloResponse {
    fn error_message(&self) -> String {
        match &self.message {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => format!("response: {}", self.response),
        }
    }
}

/// Factura-lo Plus API client
#[derive(Debug, Clone)]
pub struct FacturaloClient {
    http: Client,
    base_url: String,
    api_key: String,
    secret_key: String,
    plugin_key: Option<String>,
    retry_min_delay: Duration,
}

impl FacturaloClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn from_config(config: &FacturaloConfig) -> Result<Self, FacturaloError> {
        let (Some(api_key), Some(secret_key)) = (&config.api_key, &config.secret_key) else {
            return Err(FacturaloError::MissingCredentials);
        };
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("mundosolar/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FacturaloError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.clone(),
            secret_key: secret_key.clone(),
            plugin_key: config.plugin_key.clone(),
            retry_min_delay: Duration::from_secs(1),
        })
    }

    /// Shorter backoff, for tests against a local mock
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_min_delay = delay;
        self
    }

    async fn post_with_retry<B: Serialize + Sync>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<FacturaloResponse, FacturaloError> {
        (|| async { self.post(url, body).await })
            .retry(
                &ExponentialBuilder::default()
                    .with_min_delay(self.retry_min_delay)
                    .with_max_delay(Duration::from_secs(30))
                    .with_max_times(HTTP_RETRY_TIMES)
                    .with_jitter(),
            )
            .when(|e: &FacturaloError| e.should_retry())
            .notify(|e, dur| {
                warn!(
                    "Factura-lo call failed, retrying after {:.2}s: {}",
                    dur.as_secs_f64(),
                    e
                )
            })
            .await
    }

    async fn post<B: Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<FacturaloResponse, FacturaloError> {
        let mut req = self
            .http
            .post(url)
            .header("F-Api-Key", &self.api_key)
            .header("F-Secret-Key", &self.secret_key)
            .header("Content-Type", "application/json");
        if let Some(plugin) = &self.plugin_key {
            req = req.header("F-PLUGIN", plugin);
        }
        let res = req.json(body).send().await.map_err(map_reqwest_error)?;

        match res.status() {
            StatusCode::UNAUTHORIZED => Err(FacturaloError::InvalidCredentials),
            StatusCode::TOO_MANY_REQUESTS => Err(FacturaloError::RateLimited),
            s if s.is_server_error() => {
                let body = res.text().await.unwrap_or_default();
                Err(FacturaloError::Http {
                    status: s.as_u16(),
                    body,
                })
            }
            s => {
                // validation errors come back as 4xx with the usual error envelope
                let text = res.text().await.map_err(map_reqwest_error)?;
                let parsed = serde_json::from_str::<FacturaloResponse>(&text).map_err(|e| {
                    if s.is_success() {
                        FacturaloError::Serde(e.to_string())
                    } else {
                        FacturaloError::Http {
                            status: s.as_u16(),
                            body: text.clone(),
                        }
                    }
                })?;
                if parsed.response == "success" {
                    Ok(parsed)
                } else {
                    Err(FacturaloError::Rejected(parsed.error_message()))
                }
            }
        }
    }
}

#[async_trait]
impl InvoiceStamper for FacturaloClient {
    async fn stamp(&self, payload: &CfdiPayload) -> Result<StampedCfdi, FacturaloError> {
        let url = format!("{}/v4/cfdi40/create", self.base_url);
        let res = self.post_with_retry(&url, payload).await?;
        let (Some(fiscal_uuid), Some(pac_uid)) = (res.uuid, res.uid) else {
            return Err(FacturaloError::Serde(
                "success response without UUID/uid".to_string(),
            ));
        };
        info!(
            serie = %payload.serie,
            folio = payload.folio,
            fiscal_uuid = %fiscal_uuid,
            "CFDI stamped"
        );
        Ok(StampedCfdi {
            fiscal_uuid,
            pac_uid,
        })
    }

    async fn cancel(
        &self,
        pac_uid: &str,
        motive: &str,
        substitute_uuid: Option<&str>,
    ) -> Result<(), FacturaloError> {
        let url = format!("{}/v4/cfdi40/{}/cancel", self.base_url, pac_uid);
        self.post_with_retry(
            &url,
            &CancelRequest {
                motivo: motive,
                folio_sustituto: substitute_uuid,
            },
        )
        .await?;
        info!(pac_uid = %pac_uid, motive = %motive, "CFDI cancelled");
        Ok(())
    }
}

fn map_reqwest_error(e: reqwest::Error) -> FacturaloError {
    if e.is_timeout() {
        FacturaloError::Timeout
    } else {
        FacturaloError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_partial_json, header, method, path},
    };

    use super::*;

    fn client(server: &MockServer) -> FacturaloClient {
        FacturaloClient::from_config(&FacturaloConfig {
            base_url: server.uri(),
            api_key: Some("api-key".into()),
            secret_key: Some("secret".into()),
            plugin_key: Some("plugin".into()),
        })
        .unwrap()
        .with_retry_delay(Duration::from_millis(10))
    }

    fn payload() -> CfdiPayload {
        CfdiPayload {
            receptor: Receptor {
                rfc: "XAXX010101000".into(),
                nombre: "PUBLICO EN GENERAL".into(),
                regimen_fiscal: "616".into(),
                domicilio_fiscal: Some("64000".into()),
                uso_cfdi: "S01".into(),
            },
            tipo_documento: "factura".into(),
            conceptos: vec![],
            uso_cfdi: "S01".into(),
            serie: "A".into(),
            folio: 7,
            forma_pago: "03".into(),
            metodo_pago: "PUE".into(),
            moneda: "MXN".into(),
            lugar_expedicion: None,
            enviar_correo: false,
        }
    }

    #[test]
    fn iva_traslado_uses_six_decimal_rate() {
        let traslado = Traslado::iva(100_000, 0.16, 16_000);
        assert_eq!(traslado.tasa_o_cuota, "0.160000");
        assert_eq!(traslado.base, 1000.0);
        assert_eq!(traslado.importe, 160.0);
    }

    #[test]
    fn missing_keys_are_reported() {
        let err = FacturaloClient::from_config(&FacturaloConfig::default()).unwrap_err();
        assert!(matches!(err, FacturaloError::MissingCredentials));
    }

    #[tokio::test]
    async fn stamp_sends_credentials_and_reads_uuid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v4/cfdi40/create"))
            .and(header("F-Api-Key", "api-key"))
            .and(header("F-Secret-Key", "secret"))
            .and(header("F-PLUGIN", "plugin"))
            .and(body_partial_json(json!({ "Serie": "A", "Folio": 7, "UsoCFDI": "S01" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": "success",
                "UUID": "5FB2822E-396D-4725-8521-CDC4BDD20CCF",
                "uid": "55c0fdc67593d",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let stamped = client(&server).stamp(&payload()).await.unwrap();
        assert_eq!(stamped.fiscal_uuid, "5FB2822E-396D-4725-8521-CDC4BDD20CCF");
        assert_eq!(stamped.pac_uid, "55c0fdc67593d");
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v4/cfdi40/create"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": "error",
                "message": "El RFC del receptor no existe en la lista de RFC inscritos",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).stamp(&payload()).await.unwrap_err();
        match err {
            FacturaloError::Rejected(message) => assert!(message.contains("RFC")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v4/cfdi40/create"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v4/cfdi40/create"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": "success",
                "UUID": "AAAA",
                "uid": "bbbb",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let stamped = client(&server).stamp(&payload()).await.unwrap();
        assert_eq!(stamped.pac_uid, "bbbb");
    }

    #[tokio::test]
    async fn unauthorized_maps_to_invalid_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).stamp(&payload()).await.unwrap_err();
        assert!(matches!(err, FacturaloError::InvalidCredentials));
    }

    #[tokio::test]
    async fn cancel_posts_motive_and_substitute() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v4/cfdi40/55c0fdc67593d/cancel"))
            .and(body_partial_json(json!({
                "motivo": "01",
                "folioSustituto": "5FB2822E-396D-4725-8521-CDC4BDD20CCF",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "success" })))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .cancel(
                "55c0fdc67593d",
                "01",
                Some("5FB2822E-396D-4725-8521-CDC4BDD20CCF"),
            )
            .await
            .unwrap();
    }
}
