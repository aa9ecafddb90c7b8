//! Push-payment gateway seam.
//!
//! A gateway validates subscriber numbers, starts a push payment on the
//! donor's handset and turns the provider's asynchronous confirmation into a
//! [`CallbackResult`]. It never touches the ledger.

use std::{collections::BTreeMap, fmt::Debug};

use async_trait::async_trait;
use thiserror::Error;

pub mod mpesa;

pub use mpesa::{MpesaConfig, MpesaGateway};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("provider unreachable: {0}")]
    Unavailable(String),
    #[error("provider request timed out")]
    Timeout,
    #[error("provider rejected the request: {0}")]
    Rejected(String),
    #[error("gateway misconfigured: {0}")]
    Config(String),
    #[error("malformed callback: {0}")]
    MalformedCallback(String),
}

/// A push payment to start on the donor's handset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushRequest {
    /// Normalized MSISDN (`254` followed by nine digits).
    pub phone: String,
    pub amount_minor: i64,
    /// Correlates the push with our donation on the provider statement.
    pub donation_ref: String,
    pub narrative: String,
}

/// The provider accepted the push; the outcome arrives later by callback.
#[derive(Clone, Debug, PartialEq)]
pub struct PushAccepted {
    /// Reference the callback will carry.
    pub reference: String,
    pub merchant_reference: Option<String>,
    pub customer_message: Option<String>,
    /// Provider response body, stored with the payment attempt.
    pub raw: serde_json::Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentOutcome {
    Success,
    Failure,
}

/// Provider-neutral view of a confirmation callback.
#[derive(Clone, Debug, PartialEq)]
pub struct CallbackResult {
    pub reference: String,
    pub outcome: PaymentOutcome,
    pub result_code: i64,
    pub description: String,
    pub provider_amount_minor: Option<i64>,
    pub receipt_number: Option<String>,
    pub phone: Option<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

#[async_trait]
pub trait PushGateway: Debug + Send + Sync {
    /// Provider name stored on payment attempts, e.g. `mpesa`.
    fn provider(&self) -> &'static str;

    fn validate_phone(&self, number: &str) -> bool {
        normalize_phone(number).is_some()
    }

    async fn initiate_push(&self, request: PushRequest) -> Result<PushAccepted, GatewayError>;

    /// Pure decoding of a callback body.
    fn parse_callback(&self, raw: &[u8]) -> Result<CallbackResult, GatewayError>;

    /// Body returned to the provider for every callback delivery.
    fn ack(&self) -> serde_json::Value;
}

/// Normalizes a Kenyan mobile number to `254XXXXXXXXX`.
///
/// Accepts `07…`/`01…` local forms and `2547…`/`2541…` international forms,
/// with or without a leading `+`. Spaces and dashes are ignored.
pub fn normalize_phone(number: &str) -> Option<String> {
    let compact: String = number
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-'))
        .collect();
    let digits = compact.strip_prefix('+').unwrap_or(&compact);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let subscriber = if let Some(rest) = digits.strip_prefix("254") {
        rest
    } else if let Some(rest) = digits.strip_prefix('0') {
        // `+0…` is not a valid form.
        if compact.starts_with('+') {
            return None;
        }
        rest
    } else {
        return None;
    };

    if subscriber.len() != 9 || !matches!(subscriber.as_bytes()[0], b'7' | b'1') {
        return None;
    }
    Some(format!("254{subscriber}"))
}
