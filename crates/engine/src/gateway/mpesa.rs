//! Safaricom Daraja (M-Pesa Express / STK push) client.

use std::{collections::BTreeMap, fmt, time::Duration};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::{sync::Mutex, time::Instant};

use super::{CallbackResult, GatewayError, PaymentOutcome, PushAccepted, PushGateway, PushRequest};

const ACCOUNT_REFERENCE_MAX: usize = 12;
const TRANSACTION_DESC_MAX: usize = 13;
/// Refresh tokens a little before the provider expires them.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

fn default_transaction_type() -> String {
    "CustomerPayBillOnline".to_string()
}

fn default_timeout_secs() -> u64 {
    15
}

#[derive(Clone, Deserialize)]
pub struct MpesaConfig {
    /// e.g. `https://sandbox.safaricom.co.ke`
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub shortcode: String,
    pub passkey: String,
    pub callback_url: String,
    #[serde(default = "default_transaction_type")]
    pub transaction_type: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl fmt::Debug for MpesaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MpesaConfig")
            .field("base_url", &self.base_url)
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &"<redacted>")
            .field("shortcode", &self.shortcode)
            .field("passkey", &"<redacted>")
            .field("callback_url", &self.callback_url)
            .field("transaction_type", &self.transaction_type)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct MpesaGateway {
    config: MpesaConfig,
    client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Seconds {
    Number(u64),
    Text(String),
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Seconds,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushBody<'a> {
    business_short_code: &'a str,
    password: String,
    timestamp: String,
    transaction_type: &'a str,
    amount: i64,
    party_a: &'a str,
    party_b: &'a str,
    phone_number: &'a str,
    #[serde(rename = "CallBackURL")]
    call_back_url: &'a str,
    account_reference: String,
    transaction_desc: String,
}

#[derive(Deserialize)]
struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: Option<String>,
    #[serde(rename = "ResponseCode")]
    response_code: Option<String>,
    #[serde(rename = "ResponseDescription")]
    response_description: Option<String>,
    #[serde(rename = "CustomerMessage")]
    customer_message: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "errorCode")]
    error_code: Option<String>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

impl MpesaGateway {
    pub fn new(config: MpesaConfig) -> Result<Self, GatewayError> {
        for (name, value) in [
            ("base_url", &config.base_url),
            ("consumer_key", &config.consumer_key),
            ("consumer_secret", &config.consumer_secret),
            ("shortcode", &config.shortcode),
            ("passkey", &config.passkey),
            ("callback_url", &config.callback_url),
        ] {
            if value.trim().is_empty() {
                return Err(GatewayError::Config(format!("mpesa.{name} must be set")));
            }
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| GatewayError::Config(err.to_string()))?;

        Ok(Self {
            config,
            client,
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    async fn access_token(&self) -> Result<String, GatewayError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && token.expires_at > Instant::now()
        {
            return Ok(token.value.clone());
        }

        let response = self
            .client
            .get(self.url("/oauth/v1/generate?grant_type=client_credentials"))
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(if status.is_server_error() {
                GatewayError::Unavailable(format!("token request failed with {status}"))
            } else {
                GatewayError::Rejected(format!("token request failed with {status}: {body}"))
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|err| GatewayError::Unavailable(format!("invalid token response: {err}")))?;
        let ttl = match token.expires_in {
            Seconds::Number(secs) => secs,
            Seconds::Text(text) => text.trim().parse().unwrap_or(0),
        };
        let ttl = Duration::from_secs(ttl).saturating_sub(TOKEN_EXPIRY_MARGIN);

        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + ttl,
        });
        Ok(token.access_token)
    }

    async fn forget_token(&self) {
        *self.token.lock().await = None;
    }
}

#[async_trait]
impl PushGateway for MpesaGateway {
    fn provider(&self) -> &'static str {
        "mpesa"
    }

    async fn initiate_push(&self, request: PushRequest) -> Result<PushAccepted, GatewayError> {
        if request.amount_minor <= 0 || request.amount_minor % 100 != 0 {
            return Err(GatewayError::Rejected(
                "amount must be a positive number of whole shillings".to_string(),
            ));
        }
        let token = self.access_token().await?;
        let timestamp = nairobi_timestamp(Utc::now());
        let body = StkPushBody {
            business_short_code: &self.config.shortcode,
            password: stk_password(&self.config.shortcode, &self.config.passkey, &timestamp),
            timestamp,
            transaction_type: &self.config.transaction_type,
            amount: request.amount_minor / 100,
            party_a: &request.phone,
            party_b: &self.config.shortcode,
            phone_number: &request.phone,
            call_back_url: &self.config.callback_url,
            account_reference: truncate(&request.donation_ref, ACCOUNT_REFERENCE_MAX),
            transaction_desc: truncate(&request.narrative, TRANSACTION_DESC_MAX),
        };

        let response = self
            .client
            .post(self.url("/mpesa/stkpush/v1/processrequest"))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let raw: Value = response
            .json()
            .await
            .map_err(|err| GatewayError::Unavailable(format!("invalid push response: {err}")))?;

        if !status.is_success() {
            if status == reqwest::StatusCode::UNAUTHORIZED {
                self.forget_token().await;
            }
            let error: ErrorBody = serde_json::from_value(raw).unwrap_or(ErrorBody {
                error_code: None,
                error_message: None,
            });
            let message = format!(
                "{} ({})",
                error.error_message.as_deref().unwrap_or("push request failed"),
                error.error_code.as_deref().unwrap_or(status.as_str()),
            );
            return Err(if status.is_server_error() {
                GatewayError::Unavailable(message)
            } else {
                GatewayError::Rejected(message)
            });
        }

        let accepted: StkPushResponse = serde_json::from_value(raw.clone())
            .map_err(|err| GatewayError::Unavailable(format!("invalid push response: {err}")))?;
        if accepted.response_code.as_deref() != Some("0") {
            return Err(GatewayError::Rejected(
                accepted
                    .response_description
                    .unwrap_or_else(|| "push request not accepted".to_string()),
            ));
        }
        let reference = accepted
            .checkout_request_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| GatewayError::Unavailable("push response without reference".to_string()))?;

        Ok(PushAccepted {
            reference,
            merchant_reference: accepted.merchant_request_id,
            customer_message: accepted.customer_message,
            raw,
        })
    }

    fn parse_callback(&self, raw: &[u8]) -> Result<CallbackResult, GatewayError> {
        parse_stk_callback(raw)
    }

    fn ack(&self) -> Value {
        accepted_ack()
    }
}

/// Acknowledgment Daraja expects for every callback delivery.
pub fn accepted_ack() -> Value {
    json!({ "ResultCode": 0, "ResultDesc": "Accepted" })
}

#[derive(Deserialize)]
struct CallbackEnvelope {
    #[serde(rename = "Body")]
    body: CallbackBody,
}

#[derive(Deserialize)]
struct CallbackBody {
    #[serde(rename = "stkCallback")]
    stk_callback: StkCallback,
}

#[derive(Deserialize)]
struct StkCallback {
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    result_code: Value,
    #[serde(rename = "ResultDesc", default)]
    result_desc: Option<String>,
    #[serde(rename = "CallbackMetadata", default)]
    callback_metadata: Option<CallbackMetadata>,
}

#[derive(Deserialize)]
struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    item: Vec<MetadataItem>,
}

#[derive(Deserialize)]
struct MetadataItem {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Value", default)]
    value: Option<Value>,
}

/// Decodes an STK push callback body.
pub fn parse_stk_callback(raw: &[u8]) -> Result<CallbackResult, GatewayError> {
    let envelope: CallbackEnvelope = serde_json::from_slice(raw)
        .map_err(|err| GatewayError::MalformedCallback(err.to_string()))?;
    let callback = envelope.body.stk_callback;

    let reference = callback.checkout_request_id.trim().to_string();
    if reference.is_empty() {
        return Err(GatewayError::MalformedCallback(
            "empty CheckoutRequestID".to_string(),
        ));
    }

    let result_code = match &callback.result_code {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| GatewayError::MalformedCallback("invalid ResultCode".to_string()))?;

    let metadata: BTreeMap<String, Value> = callback
        .callback_metadata
        .map(|m| m.item)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|item| item.value.map(|value| (item.name, value)))
        .collect();

    let provider_amount_minor = match metadata.get("Amount") {
        Some(value) => amount_minor(value)?,
        None => None,
    };

    Ok(CallbackResult {
        reference,
        outcome: if result_code == 0 {
            PaymentOutcome::Success
        } else {
            PaymentOutcome::Failure
        },
        result_code,
        description: callback.result_desc.unwrap_or_default(),
        provider_amount_minor,
        receipt_number: metadata.get("MpesaReceiptNumber").and_then(text),
        phone: metadata.get("PhoneNumber").and_then(text),
        metadata,
    })
}

/// Converts a reported shilling amount into cents. Non-numeric values are
/// treated as absent; numbers that do not fit in cents are malformed.
fn amount_minor(value: &Value) -> Result<Option<i64>, GatewayError> {
    let out_of_range =
        || GatewayError::MalformedCallback(format!("Amount out of range: {value}"));

    let units = match value {
        Value::Number(n) => {
            if let Some(units) = n.as_i64() {
                return units.checked_mul(100).map(Some).ok_or_else(out_of_range);
            }
            n.as_f64()
        }
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    let Some(units) = units else {
        return Ok(None);
    };

    let cents = (units * 100.0).round();
    // i64::MAX as f64 rounds up to 2^63, which itself does not fit.
    if !cents.is_finite() || cents >= i64::MAX as f64 || cents < i64::MIN as f64 {
        return Err(out_of_range());
    }
    Ok(Some(cents as i64))
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Unavailable(err.to_string())
    }
}

/// Daraja timestamps are Nairobi local time (UTC+3, no DST).
fn nairobi_timestamp(now: DateTime<Utc>) -> String {
    (now + TimeDelta::hours(3)).format("%Y%m%d%H%M%S").to_string()
}

fn stk_password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    STANDARD.encode(format!("{shortcode}{passkey}{timestamp}"))
}

fn truncate(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn parses_successful_callback() {
        let raw = br#"{
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 0,
                    "ResultDesc": "The service request is processed successfully.",
                    "CallbackMetadata": {
                        "Item": [
                            { "Name": "Amount", "Value": 10.00 },
                            { "Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV" },
                            { "Name": "Balance" },
                            { "Name": "TransactionDate", "Value": 20191219102115 },
                            { "Name": "PhoneNumber", "Value": 254708374149 }
                        ]
                    }
                }
            }
        }"#;

        let result = parse_stk_callback(raw).unwrap();
        assert_eq!(result.reference, "ws_CO_191220191020363925");
        assert_eq!(result.outcome, PaymentOutcome::Success);
        assert_eq!(result.provider_amount_minor, Some(1000));
        assert_eq!(result.receipt_number.as_deref(), Some("NLJ7RT61SV"));
        assert_eq!(result.phone.as_deref(), Some("254708374149"));
        assert!(!result.metadata.contains_key("Balance"));
    }

    #[test]
    fn parses_cancelled_callback() {
        let raw = br#"{"Body":{"stkCallback":{
            "MerchantRequestID":"8555-67195-1",
            "CheckoutRequestID":"ws_CO_27072017151044001",
            "ResultCode":1032,
            "ResultDesc":"Request cancelled by user"}}}"#;

        let result = parse_stk_callback(raw).unwrap();
        assert_eq!(result.outcome, PaymentOutcome::Failure);
        assert_eq!(result.result_code, 1032);
        assert_eq!(result.description, "Request cancelled by user");
        assert_eq!(result.provider_amount_minor, None);
    }

    #[test]
    fn accepts_string_result_code() {
        let raw = br#"{"Body":{"stkCallback":{"CheckoutRequestID":"ws_1","ResultCode":"0"}}}"#;
        assert_eq!(parse_stk_callback(raw).unwrap().outcome, PaymentOutcome::Success);
    }

    #[test]
    fn rejects_uninterpretable_payloads() {
        let payloads: [&[u8]; 4] = [
            b"not json",
            br#"{"Body":{}}"#,
            br#"{"Body":{"stkCallback":{"CheckoutRequestID":"","ResultCode":0}}}"#,
            br#"{"Body":{"stkCallback":{"CheckoutRequestID":"ws_1","ResultCode":"zero"}}}"#,
        ];
        for raw in payloads {
            assert!(matches!(
                parse_stk_callback(raw),
                Err(GatewayError::MalformedCallback(_))
            ));
        }
    }

    #[test]
    fn rejects_amounts_that_overflow_cents() {
        let payloads: [&[u8]; 4] = [
            br#"{"Body":{"stkCallback":{"CheckoutRequestID":"ws_1","ResultCode":0,
                "CallbackMetadata":{"Item":[{"Name":"Amount","Value":922337203685477581}]}}}}"#,
            br#"{"Body":{"stkCallback":{"CheckoutRequestID":"ws_1","ResultCode":0,
                "CallbackMetadata":{"Item":[{"Name":"Amount","Value":18446744073709551615}]}}}}"#,
            br#"{"Body":{"stkCallback":{"CheckoutRequestID":"ws_1","ResultCode":0,
                "CallbackMetadata":{"Item":[{"Name":"Amount","Value":1e300}]}}}}"#,
            br#"{"Body":{"stkCallback":{"CheckoutRequestID":"ws_1","ResultCode":0,
                "CallbackMetadata":{"Item":[{"Name":"Amount","Value":"inf"}]}}}}"#,
        ];
        for raw in payloads {
            assert!(matches!(
                parse_stk_callback(raw),
                Err(GatewayError::MalformedCallback(_))
            ));
        }
    }

    #[test]
    fn string_and_fractional_amounts_convert_to_cents() {
        let raw = br#"{"Body":{"stkCallback":{"CheckoutRequestID":"ws_1","ResultCode":0,
            "CallbackMetadata":{"Item":[{"Name":"Amount","Value":"12.5"}]}}}}"#;
        assert_eq!(parse_stk_callback(raw).unwrap().provider_amount_minor, Some(1250));

        let raw = br#"{"Body":{"stkCallback":{"CheckoutRequestID":"ws_1","ResultCode":0,
            "CallbackMetadata":{"Item":[{"Name":"Amount","Value":"ten"}]}}}}"#;
        assert_eq!(parse_stk_callback(raw).unwrap().provider_amount_minor, None);
    }

    #[test]
    fn password_and_timestamp() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 21, 30, 5).unwrap();
        let timestamp = nairobi_timestamp(now);
        assert_eq!(timestamp, "20240116003005");
        assert_eq!(
            stk_password("174379", "pk", &timestamp),
            STANDARD.encode("174379pk20240116003005")
        );
    }

    #[test]
    fn truncates_provider_limited_fields() {
        assert_eq!(truncate("Donation to Clean Water", TRANSACTION_DESC_MAX), "Donation to C");
        assert_eq!(truncate("short", ACCOUNT_REFERENCE_MAX), "short");
    }

    #[test]
    fn config_debug_hides_secrets() {
        let config = MpesaConfig {
            base_url: "https://sandbox.safaricom.co.ke".to_string(),
            consumer_key: "key".to_string(),
            consumer_secret: "s3cret".to_string(),
            shortcode: "174379".to_string(),
            passkey: "passkey-value".to_string(),
            callback_url: "https://example.org/cb".to_string(),
            transaction_type: default_transaction_type(),
            timeout_secs: default_timeout_secs(),
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("s3cret"));
        assert!(!debug.contains("passkey-value"));
    }
}
