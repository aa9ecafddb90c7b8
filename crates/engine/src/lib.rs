//! Donation and payment lifecycle engine.
//!
//! The engine owns donations and their payment attempts, keeps campaign
//! totals in step with completed donations, drives recurring schedules and
//! the manual reconciliation of bank transfers and card slips. It is shared
//! behind an `Arc` and holds no per-request state; all coordination happens
//! through conditional row updates in the database.

pub use campaigns::{Campaign, CampaignStatus};
pub use commands::{BeginPaymentCmd, CreateDonationCmd, ManualClaim, PaymentParams};
pub use donations::{CARD_FEE_BPS, Donation, DonationState, PaymentMethod};
pub use error::EngineError;
pub use money::MoneyCents;
pub use notifications::Notification;
pub use ops::{
    AttemptHandle, CallbackDisposition, CallbackOutcome, CycleReport, DueScan, Engine,
    EngineBuilder, EnginePolicy,
};
pub use payments::{ConfirmationStatus, PaymentAttempt};
pub use schedules::{Frequency, RecurringSchedule, ScheduleStatus};
pub use users::Role;

mod campaigns;
mod commands;
mod donations;
mod error;
pub mod gateway;
mod money;
mod notifications;
pub mod notify;
mod ops;
mod payments;
mod schedules;
mod users;
mod util;

type ResultEngine<T> = Result<T, EngineError>;
