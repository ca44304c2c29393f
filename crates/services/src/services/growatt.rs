//! Growatt OpenAPI client and the token-caching session on top of it.

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{HTTP_RETRY_TIMES, config::GrowattConfig};

/// Growatt's codes for a missing, invalid or expired token
const TOKEN_ERROR_CODES: [i64; 2] = [10011, 10012];
/// Log in again this long before the token actually expires
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;
const DEFAULT_TOKEN_TTL_SECS: i64 = 7200;

#[derive(Debug, Clone, Error)]
pub enum GrowattError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("growatt token rejected")]
    Unauthorized,
    #[error("growatt error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("json error: {0}")]
    Serde(String),
    #[error("missing credentials: GROWATT_USERNAME and GROWATT_PASSWORD must be set")]
    MissingCredentials,
    #[error("growatt integration is disabled")]
    Disabled,
    #[error("plant {0} not found")]
    PlantNotFound(String),
    #[error("no data for plant {plant_id}: {reason}")]
    Unavailable { plant_id: String, reason: String },
    #[error("database error: {0}")]
    Database(String),
}

impl GrowattError {
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::Http { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }
}

impl From<sqlx::Error> for GrowattError {
    fn from(e: sqlx::Error) -> Self {
        GrowattError::Database(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginToken {
    pub token: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlantSummary {
    #[serde(deserialize_with = "string_or_number")]
    pub plant_id: String,
    pub name: String,
    pub city: Option<String>,
    /// kW
    pub peak_power: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlantOverview {
    /// W
    pub current_power: Option<f64>,
    /// kWh
    pub today_energy: Option<f64>,
    /// kWh
    pub total_energy: Option<f64>,
    pub last_update_time: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub status: Option<String>,
}

/// Growatt sends some ids as numbers and others as strings
fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(d)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn opt_string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    match Option::<serde_json::Value>::deserialize(d)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(other) => Ok(Some(other.to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    error_code: i64,
    #[serde(default)]
    error_msg: Option<String>,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<T, GrowattError> {
        if TOKEN_ERROR_CODES.contains(&self.error_code) {
            return Err(GrowattError::Unauthorized);
        }
        if self.error_code != 0 {
            return Err(GrowattError::Api {
                code: self.error_code,
                message: self.error_msg.unwrap_or_default(),
            });
        }
        self.data
            .ok_or_else(|| GrowattError::Serde("response without data".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PlantListData {
    #[serde(default)]
    plants: Vec<PlantSummary>,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    account: &'a str,
    password: &'a str,
}

#[async_trait]
pub trait GrowattApi: Send + Sync {
    async fn login(&self, account: &str, password: &str) -> Result<LoginToken, GrowattError>;

    async fn list_plants(&self, token: &str) -> Result<Vec<PlantSummary>, GrowattError>;

    async fn plant_overview(
        &self,
        token: &str,
        plant_id: &str,
    ) -> Result<PlantOverview, GrowattError>;
}

/// Growatt OpenAPI over HTTP
#[derive(Debug, Clone)]
pub struct GrowattClient {
    http: Client,
    base_url: String,
    retry_min_delay: Duration,
}

impl GrowattClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(base_url: &str) -> Result<Self, GrowattError> {
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("mundosolar/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GrowattError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry_min_delay: Duration::from_secs(1),
        })
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_min_delay = delay;
        self
    }

    async fn send<T: DeserializeOwned>(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<T, GrowattError> {
        (|| async {
            let res = build().send().await.map_err(map_reqwest_error)?;
            match res.status() {
                s if s.is_success() => res
                    .json::<Envelope<T>>()
                    .await
                    .map_err(|e| GrowattError::Serde(e.to_string()))?
                    .into_data(),
                StatusCode::UNAUTHORIZED => Err(GrowattError::Unauthorized),
                s => {
                    let status = s.as_u16();
                    let body = res.text().await.unwrap_or_default();
                    Err(GrowattError::Http { status, body })
                }
            }
        })
        .retry(
            &ExponentialBuilder::default()
                .with_min_delay(self.retry_min_delay)
                .with_max_delay(Duration::from_secs(30))
                .with_max_times(HTTP_RETRY_TIMES)
                .with_jitter(),
        )
        .when(|e: &GrowattError| e.should_retry())
        .notify(|e, dur| {
            warn!(
                "Growatt call failed, retrying after {:.2}s: {}",
                dur.as_secs_f64(),
                e
            )
        })
        .await
    }
}

#[async_trait]
impl GrowattApi for GrowattClient {
    async fn login(&self, account: &str, password: &str) -> Result<LoginToken, GrowattError> {
        let url = format!("{}/v1/user/login", self.base_url);
        let data: LoginData = self
            .send(|| {
                self.http
                    .post(&url)
                    .json(&LoginRequest { account, password })
            })
            .await?;
        Ok(LoginToken {
            token: data.token,
            expires_in: data.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS),
        })
    }

    async fn list_plants(&self, token: &str) -> Result<Vec<PlantSummary>, GrowattError> {
        let url = format!("{}/v1/plant/list", self.base_url);
        let data: PlantListData = self
            .send(|| self.http.get(&url).header("token", token))
            .await?;
        Ok(data.plants)
    }

    async fn plant_overview(
        &self,
        token: &str,
        plant_id: &str,
    ) -> Result<PlantOverview, GrowattError> {
        let url = format!("{}/v1/plant/data", self.base_url);
        self.send(|| {
            self.http
                .get(&url)
                .header("token", token)
                .query(&[("plant_id", plant_id)])
        })
        .await
    }
}

fn map_reqwest_error(e: reqwest::Error) -> GrowattError {
    if e.is_timeout() {
        GrowattError::Timeout
    } else {
        GrowattError::Transport(e.to_string())
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_usable(&self, now: DateTime<Utc>) -> bool {
        now + chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) < self.expires_at
    }
}

/// Shares one Growatt login between all callers. A call rejected with
/// [`GrowattError::Unauthorized`] drops the token, logs in again and is retried once.
pub struct GrowattSession {
    api: Arc<dyn GrowattApi>,
    username: Option<String>,
    password: Option<String>,
    token: RwLock<Option<CachedToken>>,
}

impl GrowattSession {
    pub fn new(api: Arc<dyn GrowattApi>, config: &GrowattConfig) -> Self {
        Self {
            api,
            username: config.username.clone(),
            password: config.password.clone(),
            token: RwLock::new(None),
        }
    }

    async fn token(&self) -> Result<String, GrowattError> {
        {
            let cached = self.token.read().await;
            if let Some(t) = cached.as_ref().filter(|t| t.is_usable(Utc::now())) {
                return Ok(t.token.clone());
            }
        }

        let mut cached = self.token.write().await;
        // another caller may have logged in while we waited for the lock
        if let Some(t) = cached.as_ref().filter(|t| t.is_usable(Utc::now())) {
            return Ok(t.token.clone());
        }

        let (Some(username), Some(password)) = (&self.username, &self.password) else {
            return Err(GrowattError::MissingCredentials);
        };
        let login = self.api.login(username, password).await?;
        info!(expires_in = login.expires_in, "Logged in to Growatt");
        let token = login.token.clone();
        *cached = Some(CachedToken {
            token: login.token,
            expires_at: Utc::now() + chrono::Duration::seconds(login.expires_in),
        });
        Ok(token)
    }

    async fn invalidate(&self) {
        *self.token.write().await = None;
    }

    async fn with_token<T, F, Fut>(&self, call: F) -> Result<T, GrowattError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, GrowattError>>,
    {
        let token = self.token().await?;
        match call(token).await {
            Err(GrowattError::Unauthorized) => {
                debug!("Growatt token rejected, logging in again");
                self.invalidate().await;
                let token = self.token().await?;
                call(token).await
            }
            other => other,
        }
    }

    pub async fn list_plants(&self) -> Result<Vec<PlantSummary>, GrowattError> {
        let api = self.api.as_ref();
        self.with_token(|token| async move { api.list_plants(&token).await })
            .await
    }

    pub async fn plant_overview(&self, plant_id: &str) -> Result<PlantOverview, GrowattError> {
        let api = self.api.as_ref();
        self.with_token(|token| async move { api.plant_overview(&token, plant_id).await })
            .await
    }
}
