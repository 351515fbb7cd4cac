//! Payment processor adapter
//!
//! The engine only needs to create an intent, confirm it and refund it. The
//! Stripe adapter talks to the REST API directly with form-encoded requests.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    config::ProcessorConfig,
    error::{AppError, AppResult},
};

/// Metadata attached to a payment intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentMetadata {
    pub booking_id: Uuid,
    pub payment_id: Uuid,
    pub renter_id: Uuid,
    pub owner_id: Uuid,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentIntent {
    #[serde(rename = "id")]
    pub payment_intent_id: String,
    pub client_secret: String,
}

/// State of an intent after confirmation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Succeeded,
    /// Accepted but not settled yet (e.g. bank debits, 3-D Secure)
    Processing,
    Declined { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RefundReceipt {
    #[serde(rename = "id")]
    pub refund_id: String,
    pub status: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_payment_intent(
        &self,
        amount: Decimal,
        metadata: PaymentMetadata,
    ) -> AppResult<PaymentIntent>;

    async fn confirm_payment(&self, payment_intent_id: &str) -> AppResult<PaymentOutcome>;

    /// Refund part or all of a captured intent. Retries with the same key
    /// never refund twice.
    async fn refund_payment_intent(
        &self,
        payment_intent_id: &str,
        amount: Decimal,
        idempotency_key: &str,
    ) -> AppResult<RefundReceipt>;
}

/// Idempotency key for a refund: same payment, same prior refunded total and
/// same amount always produce the same key.
pub fn refund_idempotency_key(payment_id: Uuid, refunded_before: Decimal, amount: Decimal) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payment_id.as_bytes());
    hasher.update(refunded_before.normalize().to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(amount.normalize().to_string().as_bytes());
    format!("refund-{}", hex::encode(&hasher.finalize()[..16]))
}

/// Convert a decimal amount into the processor's minor units (cents)
pub fn to_minor_units(amount: Decimal) -> AppResult<i64> {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or_else(|| AppError::Validation(format!("amount {} is out of range", amount)))
}

#[derive(Debug, Deserialize)]
struct StripeIntentStatus {
    status: String,
    last_payment_error: Option<StripeErrorBody>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorBody,
}

#[derive(Clone)]
pub struct StripeProcessor {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
}

impl StripeProcessor {
    pub fn new(config: &ProcessorConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        })
    }

    /// Map transport errors: a request that may have reached the processor is
    /// ambiguous, one that never left is safe to retry.
    fn transport_error(err: reqwest::Error) -> AppError {
        let may_have_acted = !err.is_connect() && !err.is_builder();
        AppError::ProcessorFailure {
            message: err.to_string(),
            may_have_acted,
        }
    }

    async fn parse<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> AppResult<T> {
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(Self::transport_error);
        }

        let message = response
            .json::<StripeErrorEnvelope>()
            .await
            .ok()
            .and_then(|e| e.error.message)
            .unwrap_or_else(|| format!("processor returned {}", status));

        Err(AppError::ProcessorFailure {
            message,
            // 4xx responses are definitive rejections
            may_have_acted: status.is_server_error(),
        })
    }
}

#[async_trait]
impl PaymentProcessor for StripeProcessor {
    async fn create_payment_intent(
        &self,
        amount: Decimal,
        metadata: PaymentMetadata,
    ) -> AppResult<PaymentIntent> {
        let form = [
            ("amount", to_minor_units(amount)?.to_string()),
            ("currency", metadata.currency.clone()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
            ("metadata[booking_id]", metadata.booking_id.to_string()),
            ("metadata[payment_id]", metadata.payment_id.to_string()),
            ("metadata[renter_id]", metadata.renter_id.to_string()),
            ("metadata[owner_id]", metadata.owner_id.to_string()),
        ];

        let response = self
            .client
            .post(format!("{}/payment_intents", self.api_base))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", format!("intent-{}", metadata.payment_id))
            .form(&form)
            .send()
            .await
            .map_err(Self::transport_error)?;

        Self::parse(response).await
    }

    async fn confirm_payment(&self, payment_intent_id: &str) -> AppResult<PaymentOutcome> {
        let response = self
            .client
            .get(format!("{}/payment_intents/{}", self.api_base, payment_intent_id))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(Self::transport_error)?;

        let intent: StripeIntentStatus = Self::parse(response).await?;
        let outcome = match intent.status.as_str() {
            "succeeded" => PaymentOutcome::Succeeded,
            "requires_payment_method" | "canceled" => PaymentOutcome::Declined {
                reason: intent
                    .last_payment_error
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| format!("payment intent is {}", intent.status)),
            },
            _ => PaymentOutcome::Processing,
        };
        Ok(outcome)
    }

    async fn refund_payment_intent(
        &self,
        payment_intent_id: &str,
        amount: Decimal,
        idempotency_key: &str,
    ) -> AppResult<RefundReceipt> {
        let form = [
            ("payment_intent", payment_intent_id.to_string()),
            ("amount", to_minor_units(amount)?.to_string()),
        ];

        let response = self
            .client
            .post(format!("{}/refunds", self.api_base))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", idempotency_key)
            .form(&form)
            .send()
            .await
            .map_err(Self::transport_error)?;

        let receipt: RefundReceipt = Self::parse(response).await?;
        if receipt.status == "failed" || receipt.status == "canceled" {
            return Err(AppError::ProcessorFailure {
                message: format!("refund {} {}", receipt.refund_id, receipt.status),
                may_have_acted: false,
            });
        }
        Ok(receipt)
    }
}
