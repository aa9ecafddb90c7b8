//! The module contains the error the engine can throw.
//!
//! Every variant maps to a fixed machine-readable code through
//! [`EngineError::code`]; the API layer forwards that code and the display
//! message, never the underlying database error.
//!
//! The categories are:
//!
//! - validation: [`InvalidPhone`], [`InvalidAmount`], [`UnsupportedFrequency`],
//!   [`Validation`]
//! - state conflicts: [`InvalidState`], [`CampaignInactive`]
//! - lookups: [`CampaignNotFound`], [`DonationNotFound`], [`ScheduleNotFound`]
//! - external dependency: [`ProviderRejected`], [`ProviderUnavailable`],
//!   [`MalformedCallback`]
//!
//!  [`InvalidPhone`]: EngineError::InvalidPhone
//!  [`InvalidAmount`]: EngineError::InvalidAmount
//!  [`UnsupportedFrequency`]: EngineError::UnsupportedFrequency
//!  [`Validation`]: EngineError::Validation
//!  [`InvalidState`]: EngineError::InvalidState
//!  [`CampaignInactive`]: EngineError::CampaignInactive
//!  [`CampaignNotFound`]: EngineError::CampaignNotFound
//!  [`DonationNotFound`]: EngineError::DonationNotFound
//!  [`ScheduleNotFound`]: EngineError::ScheduleNotFound
//!  [`ProviderRejected`]: EngineError::ProviderRejected
//!  [`ProviderUnavailable`]: EngineError::ProviderUnavailable
//!  [`MalformedCallback`]: EngineError::MalformedCallback
use sea_orm::DbErr;
use thiserror::Error;

use crate::gateway::GatewayError;

/// Engine custom errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("\"{0}\" campaign not found!")]
    CampaignNotFound(String),
    #[error("Campaign is not active: {0}")]
    CampaignInactive(String),
    #[error("\"{0}\" donation not found!")]
    DonationNotFound(String),
    #[error("\"{0}\" schedule not found!")]
    ScheduleNotFound(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Invalid phone number: {0}")]
    InvalidPhone(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Unsupported frequency: {0}")]
    UnsupportedFrequency(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Payment provider rejected the request: {0}")]
    ProviderRejected(String),
    #[error("Payment provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("Malformed callback: {0}")]
    MalformedCallback(String),
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl EngineError {
    /// Machine-readable code exposed to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::CampaignNotFound(_) => "campaign_not_found",
            Self::CampaignInactive(_) => "campaign_inactive",
            Self::DonationNotFound(_) => "donation_not_found",
            Self::ScheduleNotFound(_) => "schedule_not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::InvalidPhone(_) => "invalid_phone",
            Self::InvalidAmount(_) | Self::Validation(_) => "validation_error",
            Self::UnsupportedFrequency(_) => "unsupported_frequency",
            Self::Forbidden(_) => "forbidden",
            Self::ProviderRejected(_) => "provider_rejected",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::MalformedCallback(_) => "malformed_callback",
            Self::Database(_) => "internal",
        }
    }
}

impl From<GatewayError> for EngineError {
    fn from(value: GatewayError) -> Self {
        match value {
            GatewayError::Unavailable(msg) => Self::ProviderUnavailable(msg),
            GatewayError::Timeout => Self::ProviderUnavailable("request timed out".to_string()),
            GatewayError::Rejected(msg) | GatewayError::Config(msg) => Self::ProviderRejected(msg),
            GatewayError::MalformedCallback(msg) => Self::MalformedCallback(msg),
        }
    }
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::CampaignNotFound(a), Self::CampaignNotFound(b)) => a == b,
            (Self::CampaignInactive(a), Self::CampaignInactive(b)) => a == b,
            (Self::DonationNotFound(a), Self::DonationNotFound(b)) => a == b,
            (Self::ScheduleNotFound(a), Self::ScheduleNotFound(b)) => a == b,
            (Self::InvalidState(a), Self::InvalidState(b)) => a == b,
            (Self::InvalidPhone(a), Self::InvalidPhone(b)) => a == b,
            (Self::InvalidAmount(a), Self::InvalidAmount(b)) => a == b,
            (Self::UnsupportedFrequency(a), Self::UnsupportedFrequency(b)) => a == b,
            (Self::Validation(a), Self::Validation(b)) => a == b,
            (Self::Forbidden(a), Self::Forbidden(b)) => a == b,
            (Self::ProviderRejected(a), Self::ProviderRejected(b)) => a == b,
            (Self::ProviderUnavailable(a), Self::ProviderUnavailable(b)) => a == b,
            (Self::MalformedCallback(a), Self::MalformedCallback(b)) => a == b,
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_errors_map_to_provider_codes() {
        assert_eq!(
            EngineError::from(GatewayError::Timeout).code(),
            "provider_unavailable"
        );
        assert_eq!(
            EngineError::from(GatewayError::Rejected("bad shortcode".to_string())).code(),
            "provider_rejected"
        );
        assert_eq!(
            EngineError::from(GatewayError::Unavailable("connection refused".to_string())),
            EngineError::ProviderUnavailable("connection refused".to_string())
        );
    }

    #[test]
    fn database_errors_are_internal() {
        let err = EngineError::from(DbErr::Custom("disk full".to_string()));
        assert_eq!(err.code(), "internal");
    }

    #[test]
    fn amount_and_field_validation_share_a_code() {
        assert_eq!(EngineError::InvalidAmount("x".into()).code(), "validation_error");
        assert_eq!(EngineError::Validation("x".into()).code(), "validation_error");
    }
}
