//! Payment gateway client
//!
//! Speaks the gateway's transaction REST protocol directly over reqwest:
//! `POST /transaction/initialize` opens a checkout and returns the redirect
//! URL; `GET /transaction/verify/{reference}` reports the authoritative
//! transaction status. The gateway is a black-box protocol partner — every
//! call carries a bounded timeout, and a timeout is surfaced as
//! `GatewayTimeout` rather than folded into `GatewayError`.

use std::time::Duration;

use medsight_shared::PlanId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Total per-request budget for gateway round trips. A hung gateway call
/// must not block a handler indefinitely.
pub const GATEWAY_TIMEOUT: Duration = Duration::from_secs(15);

/// Gateway credentials and endpoint configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub base_url: String,
}

impl GatewayConfig {
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = std::env::var("GATEWAY_SECRET_KEY")
            .map_err(|_| BillingError::Internal("GATEWAY_SECRET_KEY not set".to_string()))?;
        let webhook_secret = std::env::var("GATEWAY_WEBHOOK_SECRET")
            .map_err(|_| BillingError::Internal("GATEWAY_WEBHOOK_SECRET not set".to_string()))?;
        let base_url = std::env::var("GATEWAY_BASE_URL")
            .unwrap_or_else(|_| "https://api.paystack.co".to_string());

        Ok(Self {
            secret_key,
            webhook_secret,
            base_url,
        })
    }
}

/// Metadata attached at transaction-open time and echoed back by the gateway
/// on verify responses and webhook events. This echo is the binding that ties
/// a gateway confirmation to a tenant and plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionMetadata {
    pub hospital_id: Uuid,
    pub plan: PlanId,
}

/// Request body for opening a transaction.
#[derive(Debug, Clone, Serialize)]
pub struct InitializeTransaction {
    pub email: String,
    /// Charge amount in minor units, computed from the plan catalog.
    pub amount: i64,
    pub reference: String,
    pub currency: String,
    pub callback_url: String,
    pub metadata: TransactionMetadata,
}

/// Checkout handle returned by a successful initialize call.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransactionHandle {
    pub authorization_url: String,
    pub access_code: String,
    pub reference: String,
}

/// Transaction status as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayTxStatus {
    Success,
    Failed,
    Abandoned,
    #[serde(other)]
    Pending,
}

/// Authoritative transaction state from `GET /transaction/verify`. Also
/// serialized into the payment row's metadata snapshot at finalize time.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayTransaction {
    pub id: i64,
    pub status: GatewayTxStatus,
    pub reference: String,
    pub amount: i64,
    pub currency: String,
    pub paid_at: Option<String>,
    pub metadata: Option<TransactionMetadata>,
}

/// Gateway response envelope: `status` is the call outcome, `data` the
/// payload when present.
#[derive(Debug, Deserialize)]
struct GatewayEnvelope<T> {
    status: bool,
    message: Option<String>,
    data: Option<T>,
}

/// HTTP client for the payment gateway.
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    config: GatewayConfig,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> BillingResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(GATEWAY_TIMEOUT)
            .build()
            .map_err(|e| BillingError::Internal(format!("http client: {}", e)))?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> BillingResult<Self> {
        Self::new(GatewayConfig::from_env()?)
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Open a transaction, returning the checkout redirect handle.
    pub async fn initialize(
        &self,
        request: &InitializeTransaction,
    ) -> BillingResult<TransactionHandle> {
        let url = format!("{}/transaction/initialize", self.config.base_url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.secret_key)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                reference = %request.reference,
                status = %status,
                body = %body,
                "Gateway rejected transaction initialize"
            );
            return Err(BillingError::GatewayError(format!(
                "initialize failed ({}): {}",
                status, body
            )));
        }

        let envelope: GatewayEnvelope<TransactionHandle> = response.json().await?;
        match envelope.data {
            Some(handle) if envelope.status => Ok(handle),
            _ => Err(BillingError::GatewayError(
                envelope
                    .message
                    .unwrap_or_else(|| "initialize returned no data".to_string()),
            )),
        }
    }

    /// Fetch the authoritative status of a transaction by reference.
    pub async fn verify(&self, reference: &str) -> BillingResult<GatewayTransaction> {
        let url = format!("{}/transaction/verify/{}", self.config.base_url, reference);

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.config.secret_key)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                reference = %reference,
                status = %status,
                "Gateway verify request failed"
            );
            return Err(BillingError::GatewayError(format!(
                "verify failed ({}): {}",
                status, body
            )));
        }

        let envelope: GatewayEnvelope<GatewayTransaction> = response.json().await?;
        match envelope.data {
            Some(tx) if envelope.status => Ok(tx),
            _ => Err(BillingError::GatewayError(
                envelope
                    .message
                    .unwrap_or_else(|| "verify returned no data".to_string()),
            )),
        }
    }
}
