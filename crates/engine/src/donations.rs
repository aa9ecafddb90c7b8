//! Donation primitives.
//!
//! A `Donation` is one pledge-to-payment attempt by a donor toward a campaign.
//! It moves through `pending → processing → {completed, failed}` and is never
//! deleted.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, MoneyCents, ResultEngine, schedules::Frequency, util::parse_uuid};

/// Card processing fee, in basis points of the pledged amount.
pub const CARD_FEE_BPS: i64 = 200;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    MobileMoney,
    Card,
    BankTransfer,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MobileMoney => "mobile_money",
            Self::Card => "card",
            Self::BankTransfer => "bank_transfer",
        }
    }

    /// Fee withheld by the payment channel for `amount`.
    #[must_use]
    pub fn fee(self, amount: MoneyCents) -> MoneyCents {
        match self {
            Self::Card => amount.basis_points(CARD_FEE_BPS),
            Self::MobileMoney | Self::BankTransfer => MoneyCents::ZERO,
        }
    }

    /// Methods that cannot report their own outcome and settle through
    /// manual reconciliation.
    #[must_use]
    pub fn is_manual(self) -> bool {
        matches!(self, Self::Card | Self::BankTransfer)
    }
}

impl TryFrom<&str> for PaymentMethod {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "mobile_money" | "mpesa" => Ok(Self::MobileMoney),
            "card" => Ok(Self::Card),
            "bank_transfer" => Ok(Self::BankTransfer),
            other => Err(EngineError::Validation(format!(
                "unsupported payment method: {other}"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DonationState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DonationState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl core::fmt::Display for DonationState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for DonationState {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(EngineError::InvalidState(format!(
                "unknown donation state: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Donation {
    pub id: Uuid,
    pub donor_id: String,
    pub campaign_id: String,
    pub amount_minor: i64,
    pub fee_minor: i64,
    pub net_minor: i64,
    pub method: PaymentMethod,
    pub is_recurring: bool,
    pub frequency: Option<Frequency>,
    /// Set on donations produced by a recurring cycle.
    pub schedule_id: Option<Uuid>,
    pub state: DonationState,
    pub transaction_reference: Option<String>,
    pub is_anonymous: bool,
    pub dedication_message: Option<String>,
    pub idempotency_key: Option<String>,
    pub needs_review: bool,
    pub review_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Donation {
    /// Builds a fresh `pending` donation. The fee is computed here, once.
    pub fn new(
        donor_id: String,
        campaign_id: String,
        amount: MoneyCents,
        method: PaymentMethod,
        created_at: DateTime<Utc>,
    ) -> ResultEngine<Self> {
        if !amount.is_positive() {
            return Err(EngineError::InvalidAmount(
                "amount_minor must be > 0".to_string(),
            ));
        }
        if method == PaymentMethod::MobileMoney && !amount.is_whole_units() {
            return Err(EngineError::InvalidAmount(format!(
                "mobile money accepts whole shillings only, got {amount}"
            )));
        }
        let fee = method.fee(amount);
        let net = amount
            .checked_sub(fee)
            .ok_or_else(|| EngineError::InvalidAmount("amount too large".to_string()))?;

        Ok(Self {
            id: Uuid::new_v4(),
            donor_id,
            campaign_id,
            amount_minor: amount.cents(),
            fee_minor: fee.cents(),
            net_minor: net.cents(),
            method,
            is_recurring: false,
            frequency: None,
            schedule_id: None,
            state: DonationState::Pending,
            transaction_reference: None,
            is_anonymous: false,
            dedication_message: None,
            idempotency_key: None,
            needs_review: false,
            review_note: None,
            created_at,
            updated_at: created_at,
            completed_at: None,
        })
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "donations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub donor_id: String,
    pub campaign_id: String,
    pub amount_minor: i64,
    pub fee_minor: i64,
    pub net_minor: i64,
    pub method: String,
    pub is_recurring: bool,
    pub frequency: Option<String>,
    pub schedule_id: Option<String>,
    pub state: String,
    pub transaction_reference: Option<String>,
    pub is_anonymous: bool,
    pub dedication_message: Option<String>,
    pub idempotency_key: Option<String>,
    pub needs_review: bool,
    pub review_note: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
    pub completed_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::payments::Entity")]
    Payments,
    #[sea_orm(
        belongs_to = "super::campaigns::Entity",
        from = "Column::CampaignId",
        to = "super::campaigns::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Campaigns,
}

impl Related<super::payments::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payments.def()
    }
}

impl Related<super::campaigns::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Campaigns.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Donation> for ActiveModel {
    fn from(value: &Donation) -> Self {
        Self {
            id: ActiveValue::Set(value.id.to_string()),
            donor_id: ActiveValue::Set(value.donor_id.clone()),
            campaign_id: ActiveValue::Set(value.campaign_id.clone()),
            amount_minor: ActiveValue::Set(value.amount_minor),
            fee_minor: ActiveValue::Set(value.fee_minor),
            net_minor: ActiveValue::Set(value.net_minor),
            method: ActiveValue::Set(value.method.as_str().to_string()),
            is_recurring: ActiveValue::Set(value.is_recurring),
            frequency: ActiveValue::Set(value.frequency.map(|f| f.as_str().to_string())),
            schedule_id: ActiveValue::Set(value.schedule_id.map(|id| id.to_string())),
            state: ActiveValue::Set(value.state.as_str().to_string()),
            transaction_reference: ActiveValue::Set(value.transaction_reference.clone()),
            is_anonymous: ActiveValue::Set(value.is_anonymous),
            dedication_message: ActiveValue::Set(value.dedication_message.clone()),
            idempotency_key: ActiveValue::Set(value.idempotency_key.clone()),
            needs_review: ActiveValue::Set(value.needs_review),
            review_note: ActiveValue::Set(value.review_note.clone()),
            created_at: ActiveValue::Set(value.created_at),
            updated_at: ActiveValue::Set(value.updated_at),
            completed_at: ActiveValue::Set(value.completed_at),
        }
    }
}

impl TryFrom<Model> for Donation {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&model.id, "donation")?,
            donor_id: model.donor_id,
            campaign_id: model.campaign_id,
            amount_minor: model.amount_minor,
            fee_minor: model.fee_minor,
            net_minor: model.net_minor,
            method: PaymentMethod::try_from(model.method.as_str())?,
            is_recurring: model.is_recurring,
            frequency: model
                .frequency
                .as_deref()
                .map(Frequency::try_from)
                .transpose()?,
            schedule_id: model
                .schedule_id
                .as_deref()
                .map(|id| parse_uuid(id, "schedule"))
                .transpose()?,
            state: DonationState::try_from(model.state.as_str())?,
            transaction_reference: model.transaction_reference,
            is_anonymous: model.is_anonymous,
            dedication_message: model.dedication_message,
            idempotency_key: model.idempotency_key,
            needs_review: model.needs_review,
            review_note: model.review_note,
            created_at: model.created_at,
            updated_at: model.updated_at,
            completed_at: model.completed_at,
        })
    }
}
