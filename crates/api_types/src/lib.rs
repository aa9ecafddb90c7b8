//! Wire types of the Harambee HTTP API.
//!
//! Amounts are integer minor units (cents). Enumerations such as payment
//! methods, frequencies and states travel as snake_case strings so that the
//! engine, not the JSON decoder, decides what is supported.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod donation {
    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    pub struct DonationNew {
        pub campaign_id: String,
        pub amount_minor: i64,
        /// `mobile_money` (alias `mpesa`), `card` or `bank_transfer`.
        pub method: String,
        /// `monthly`, `quarterly` or `yearly` for a recurring pledge.
        pub frequency: Option<String>,
        #[serde(default)]
        pub is_anonymous: bool,
        pub dedication_message: Option<String>,
        pub idempotency_key: Option<String>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct Donation {
        pub id: Uuid,
        pub campaign_id: String,
        pub donor_id: String,
        pub amount_minor: i64,
        pub fee_minor: i64,
        pub net_minor: i64,
        pub method: String,
        pub state: String,
        pub is_recurring: bool,
        pub frequency: Option<String>,
        pub is_anonymous: bool,
        pub dedication_message: Option<String>,
        pub transaction_reference: Option<String>,
        pub needs_review: bool,
        pub created_at: DateTime<Utc>,
        pub completed_at: Option<DateTime<Utc>>,
    }
}

pub mod payment {
    use super::*;

    /// How the donor intends to pay a pending donation.
    #[derive(Debug, Serialize, Deserialize)]
    #[serde(tag = "kind", rename_all = "snake_case")]
    pub enum PaymentBegin {
        /// Push a payment prompt to this handset.
        Mpesa { phone: String },
        /// Claim a bank transfer or card payment made outside the push flow.
        Manual {
            reference: String,
            receipt_url: Option<String>,
        },
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct PaymentStarted {
        pub donation_id: Uuid,
        pub payment_id: Uuid,
        pub provider: String,
        pub reference: String,
        pub state: String,
        pub customer_message: Option<String>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct PaymentAttempt {
        pub id: Uuid,
        pub provider: String,
        pub reference: String,
        pub amount_minor: i64,
        pub status: String,
        pub receipt_number: Option<String>,
        pub created_at: DateTime<Utc>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct PaymentStatus {
        pub donation: super::donation::Donation,
        pub latest_attempt: Option<PaymentAttempt>,
    }
}

pub mod reconciliation {
    use super::*;

    /// Staff decision on a manual payment claim.
    #[derive(Debug, Serialize, Deserialize)]
    pub struct ClaimDecision {
        pub reference: String,
        /// Required when rejecting.
        pub reason: Option<String>,
    }
}

pub mod campaign {
    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    pub struct Campaign {
        pub id: String,
        pub title: String,
        pub status: String,
        pub goal_minor: i64,
        pub current_minor: i64,
    }
}

pub mod schedule {
    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    pub struct Schedule {
        pub id: Uuid,
        pub campaign_id: String,
        pub amount_minor: i64,
        pub frequency: String,
        pub method: String,
        pub next_due_date: NaiveDate,
        pub status: String,
        pub consecutive_failures: i32,
    }
}

/// Body of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub error: String,
}
