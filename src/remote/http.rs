use anyhow::{Context, Result};
use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::Config;
use crate::remote::{CheckSummary, MarketStatus, MarketStatusSource, TargetChecker};

const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(100);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const TOKEN_LIFETIME_SECS: u64 = 120;

const CHECK_TARGETS_PATH: &str = "/api/analysis/check-targets";
const MARKET_STATUS_PATH: &str = "/api/market-status";

#[derive(Debug, Serialize)]
struct JwtClaims {
    sub: String,
    iss: String,
    nbf: u64,
    exp: u64,
    uri: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckTargetsRequest {
    force_check: bool,
}

#[derive(Debug, Deserialize)]
struct CheckTargetsResponse {
    #[serde(default)]
    checked: usize,
    #[serde(default)]
    updated: usize,
}

/// Client for a remote analysis service that owns the records and runs the
/// evaluation itself.
pub struct HttpAnalysisApi {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    last_request: Mutex<Option<Instant>>,
}

impl HttpAnalysisApi {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: cfg.api_base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            api_secret: cfg.api_secret.clone(),
            last_request: Mutex::new(None),
        })
    }

    fn generate_jwt(&self, method: &str, path: &str) -> Result<String> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();

        let subject = if self.api_key.is_empty() {
            "target-monitor".to_string()
        } else {
            self.api_key.clone()
        };
        let claims = JwtClaims {
            sub: subject,
            iss: "target-monitor".to_string(),
            nbf: now,
            exp: now + TOKEN_LIFETIME_SECS,
            uri: format!("{} {}", method, path),
        };

        let mut header = Header::new(Algorithm::HS256);
        header.kid = (!self.api_key.is_empty()).then(|| self.api_key.clone());

        encode(
            &header,
            &claims,
            &EncodingKey::from_secret(self.api_secret.as_bytes()),
        )
        .context("Failed to encode JWT")
    }

    /// Adds a bearer token when a secret is configured. The key, if any, is
    /// sent as the token's `kid`.
    fn authorize(&self, req: RequestBuilder, method: &str, path: &str) -> Result<RequestBuilder> {
        if self.api_secret.is_empty() {
            return Ok(req);
        }
        let jwt = self.generate_jwt(method, path)?;
        Ok(req.header("Authorization", format!("Bearer {}", jwt)))
    }

    async fn rate_limit(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < MIN_REQUEST_INTERVAL {
                tokio::time::sleep(MIN_REQUEST_INTERVAL - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[async_trait]
impl TargetChecker for HttpAnalysisApi {
    async fn check_analysis_targets(&self, force_check: bool) -> Result<CheckSummary> {
        self.rate_limit().await;

        let req = self
            .client
            .post(format!("{}{}", self.base_url, CHECK_TARGETS_PATH))
            .json(&CheckTargetsRequest { force_check });
        let resp = self
            .authorize(req, "POST", CHECK_TARGETS_PATH)?
            .send()
            .await
            .context("Failed to reach analysis service")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Target check error {}: {}", status, body);
        }

        let data: CheckTargetsResponse = resp
            .json()
            .await
            .context("Failed to parse target check response")?;
        debug!("Remote target check: {} checked, {} updated", data.checked, data.updated);

        Ok(CheckSummary {
            checked: data.checked,
            updated: data.updated,
        })
    }
}

#[async_trait]
impl MarketStatusSource for HttpAnalysisApi {
    async fn check_market_status(&self, symbol: Option<&str>) -> Result<MarketStatus> {
        self.rate_limit().await;

        let mut req = self
            .client
            .get(format!("{}{}", self.base_url, MARKET_STATUS_PATH));
        if let Some(symbol) = symbol {
            req = req.query(&[("symbol", symbol)]);
        }
        let resp = self
            .authorize(req, "GET", MARKET_STATUS_PATH)?
            .send()
            .await
            .context("Failed to fetch market status")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Market status error {}: {}", status, body);
        }

        resp.json().await.context("Failed to parse market status")
    }
}
