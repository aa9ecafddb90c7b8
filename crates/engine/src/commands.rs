//! Command structs for engine operations.
//!
//! These types group parameters for donor-facing writes (pledge, payment
//! start), keeping call sites readable and avoiding long argument lists.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{PaymentMethod, schedules::Frequency};

/// Pledge a donation to a campaign.
#[derive(Clone, Debug)]
pub struct CreateDonationCmd {
    pub donor_id: String,
    pub campaign_id: String,
    pub amount_minor: i64,
    pub method: PaymentMethod,
    /// `Some` registers a recurring schedule alongside the donation.
    pub frequency: Option<Frequency>,
    pub is_anonymous: bool,
    pub dedication_message: Option<String>,
    /// Retries with the same key return the donation created first.
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CreateDonationCmd {
    #[must_use]
    pub fn new(
        donor_id: impl Into<String>,
        campaign_id: impl Into<String>,
        amount_minor: i64,
        method: PaymentMethod,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            donor_id: donor_id.into(),
            campaign_id: campaign_id.into(),
            amount_minor,
            method,
            frequency: None,
            is_anonymous: false,
            dedication_message: None,
            idempotency_key: None,
            created_at,
        }
    }

    #[must_use]
    pub fn recurring(mut self, frequency: Frequency) -> Self {
        self.frequency = Some(frequency);
        self
    }

    #[must_use]
    pub fn anonymous(mut self, is_anonymous: bool) -> Self {
        self.is_anonymous = is_anonymous;
        self
    }

    #[must_use]
    pub fn dedication(mut self, message: impl Into<String>) -> Self {
        self.dedication_message = Some(message.into());
        self
    }

    #[must_use]
    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// A donor's claim that they paid outside the push flow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManualClaim {
    /// Bank or card slip reference quoted by the donor.
    pub reference: String,
    pub receipt_url: Option<String>,
}

impl ManualClaim {
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            receipt_url: None,
        }
    }

    #[must_use]
    pub fn receipt_url(mut self, url: impl Into<String>) -> Self {
        self.receipt_url = Some(url.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentParams {
    MobileMoney { phone: String },
    Manual(ManualClaim),
}

/// Start settling a pending donation.
#[derive(Clone, Debug)]
pub struct BeginPaymentCmd {
    pub donation_id: Uuid,
    pub donor_id: String,
    pub params: PaymentParams,
}

impl BeginPaymentCmd {
    #[must_use]
    pub fn mobile_money(
        donation_id: Uuid,
        donor_id: impl Into<String>,
        phone: impl Into<String>,
    ) -> Self {
        Self {
            donation_id,
            donor_id: donor_id.into(),
            params: PaymentParams::MobileMoney {
                phone: phone.into(),
            },
        }
    }

    #[must_use]
    pub fn manual(donation_id: Uuid, donor_id: impl Into<String>, claim: ManualClaim) -> Self {
        Self {
            donation_id,
            donor_id: donor_id.into(),
            params: PaymentParams::Manual(claim),
        }
    }
}
