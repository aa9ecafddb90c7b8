//! Payment attempts.
//!
//! An attempt is one external settlement try for a donation. Mobile money
//! donations have exactly one; manual methods get a new attempt on every
//! reconciliation resubmission.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, util::parse_uuid};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStatus {
    Pending,
    Confirmed,
    Rejected,
}

impl ConfirmationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
        }
    }
}

impl TryFrom<&str> for ConfirmationStatus {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "rejected" => Ok(Self::Rejected),
            other => Err(EngineError::InvalidState(format!(
                "unknown confirmation status: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAttempt {
    pub id: Uuid,
    pub donation_id: Uuid,
    /// `mpesa`, `bank_transfer` or `card`.
    pub provider: String,
    pub provider_reference: String,
    pub amount_minor: i64,
    pub phone: Option<String>,
    pub confirmation_status: ConfirmationStatus,
    pub receipt_number: Option<String>,
    /// Opaque provider JSON, kept verbatim for audits.
    pub provider_payload: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentAttempt {
    pub fn new(
        donation_id: Uuid,
        provider: impl Into<String>,
        provider_reference: impl Into<String>,
        amount_minor: i64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            donation_id,
            provider: provider.into(),
            provider_reference: provider_reference.into(),
            amount_minor,
            phone: None,
            confirmation_status: ConfirmationStatus::Pending,
            receipt_number: None,
            provider_payload: None,
            created_at,
            updated_at: created_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub donation_id: String,
    pub provider: String,
    pub provider_reference: String,
    pub amount_minor: i64,
    pub phone: Option<String>,
    pub confirmation_status: String,
    pub receipt_number: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub provider_payload: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::donations::Entity",
        from = "Column::DonationId",
        to = "super::donations::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Donations,
}

impl Related<super::donations::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Donations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<&PaymentAttempt> for ActiveModel {
    fn from(value: &PaymentAttempt) -> Self {
        Self {
            id: ActiveValue::Set(value.id.to_string()),
            donation_id: ActiveValue::Set(value.donation_id.to_string()),
            provider: ActiveValue::Set(value.provider.clone()),
            provider_reference: ActiveValue::Set(value.provider_reference.clone()),
            amount_minor: ActiveValue::Set(value.amount_minor),
            phone: ActiveValue::Set(value.phone.clone()),
            confirmation_status: ActiveValue::Set(value.confirmation_status.as_str().to_string()),
            receipt_number: ActiveValue::Set(value.receipt_number.clone()),
            provider_payload: ActiveValue::Set(value.provider_payload.clone()),
            created_at: ActiveValue::Set(value.created_at),
            updated_at: ActiveValue::Set(value.updated_at),
        }
    }
}

impl TryFrom<Model> for PaymentAttempt {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&model.id, "payment")?,
            donation_id: parse_uuid(&model.donation_id, "donation")?,
            provider: model.provider,
            provider_reference: model.provider_reference,
            amount_minor: model.amount_minor,
            phone: model.phone,
            confirmation_status: ConfirmationStatus::try_from(model.confirmation_status.as_str())?,
            receipt_number: model.receipt_number,
            provider_payload: model.provider_payload,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}
