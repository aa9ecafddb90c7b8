//! Applying payment outcomes to the ledger.
//!
//! Provider callbacks and staff reconciliation decisions both end up in
//! [`Engine::settle`], so a confirmed bank transfer and a confirmed push take
//! exactly the same path: conditional state change, attempt resolution and
//! campaign increment, all in one transaction.

use chrono::{DateTime, Utc};
use sea_orm::{
    ConnectionTrait, DatabaseTransaction, QueryFilter, QueryOrder, TransactionTrait, prelude::*,
    sea_query::Expr,
};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    ConfirmationStatus, DonationState, PaymentAttempt, ResultEngine,
    gateway::{CallbackResult, PaymentOutcome},
    payments,
};

use super::{Engine, with_tx};

/// What a callback (or reconciliation decision) did to the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallbackDisposition {
    /// The donation moved to `completed` and its campaign was credited.
    Completed(Uuid),
    /// The donation moved to `failed`.
    Failed(Uuid),
    /// Same outcome already applied for this reference.
    Duplicate(Uuid),
    /// Outcome arrived for a donation that can no longer take it (failure
    /// after completion, or a superseded attempt).
    Ignored(Uuid),
    /// Success reported for a donation that cannot complete; flagged for review.
    Anomaly(Uuid),
    UnknownReference(String),
    Malformed(String),
    /// Storage failure while applying; the reference was logged.
    Internal(String),
}

/// Result of [`Engine::apply_callback`]. Applying a callback never fails from
/// the provider's point of view.
#[derive(Clone, Debug, PartialEq)]
pub struct CallbackOutcome {
    pub disposition: CallbackDisposition,
    ack: Value,
}

impl CallbackOutcome {
    /// Body to return to the provider.
    pub fn ack(&self) -> &Value {
        &self.ack
    }
}

/// Outcome to apply to a payment attempt.
pub(super) struct Settlement {
    pub outcome: PaymentOutcome,
    pub receipt_number: Option<String>,
    pub provider_amount_minor: Option<i64>,
    pub payload: Option<String>,
    pub note: String,
}

impl Settlement {
    fn from_callback(result: &CallbackResult, payload: String) -> Self {
        Self {
            outcome: result.outcome,
            receipt_number: result.receipt_number.clone(),
            provider_amount_minor: result.provider_amount_minor,
            payload: Some(payload),
            note: result.description.clone(),
        }
    }
}

impl Engine {
    /// Apply a provider confirmation callback.
    ///
    /// Correlates the callback with its payment attempt by provider reference
    /// and settles it. Malformed payloads, unknown references and storage
    /// failures are logged and still acknowledged.
    pub async fn apply_callback(&self, raw: &[u8]) -> CallbackOutcome {
        let disposition = match self.gateway.parse_callback(raw) {
            Ok(result) => match self.apply_callback_result(&result, raw).await {
                Ok(disposition) => disposition,
                Err(err) => {
                    error!(
                        reference = %result.reference,
                        outcome = ?result.outcome,
                        error = %err,
                        "callback could not be applied"
                    );
                    CallbackDisposition::Internal(err.code().to_string())
                }
            },
            Err(err) => {
                error!(
                    error = %err,
                    payload = %String::from_utf8_lossy(raw),
                    "malformed payment callback"
                );
                CallbackDisposition::Malformed(err.to_string())
            }
        };
        CallbackOutcome {
            disposition,
            ack: self.gateway.ack(),
        }
    }

    async fn apply_callback_result(
        &self,
        result: &CallbackResult,
        raw: &[u8],
    ) -> ResultEngine<CallbackDisposition> {
        let payload = String::from_utf8_lossy(raw).into_owned();
        with_tx!(self, |db_tx| {
            let attempt = payments::Entity::find()
                .filter(payments::Column::Provider.eq(self.gateway.provider()))
                .filter(payments::Column::ProviderReference.eq(result.reference.as_str()))
                .order_by_desc(payments::Column::CreatedAt)
                .one(&db_tx)
                .await?;
            match attempt {
                Some(model) => {
                    let attempt = PaymentAttempt::try_from(model)?;
                    self.settle(&db_tx, attempt, Settlement::from_callback(result, payload))
                        .await
                }
                None => {
                    warn!(reference = %result.reference, "callback for unknown reference");
                    Ok(CallbackDisposition::UnknownReference(result.reference.clone()))
                }
            }
        })
    }

    /// Apply an outcome to `attempt` and its donation inside `db_tx`.
    pub(super) async fn settle(
        &self,
        db_tx: &DatabaseTransaction,
        attempt: PaymentAttempt,
        settlement: Settlement,
    ) -> ResultEngine<CallbackDisposition> {
        let now = Utc::now();
        let donation = self.load_donation(db_tx, attempt.donation_id).await?;
        let reference = attempt.provider_reference.as_str();

        match settlement.outcome {
            PaymentOutcome::Success => {
                if self
                    .finish_donation(db_tx, donation.id, reference, DonationState::Completed, now)
                    .await?
                {
                    self.resolve_attempt(db_tx, attempt.id, ConfirmationStatus::Confirmed, &settlement, now)
                        .await?;
                    if let Some(reported) = settlement.provider_amount_minor
                        && reported != donation.amount_minor
                    {
                        warn!(
                            donation_id = %donation.id,
                            reference = %reference,
                            expected_minor = donation.amount_minor,
                            reported_minor = reported,
                            "provider reported a different amount"
                        );
                    }
                    self.record_completed_donation(db_tx, &donation.campaign_id, donation.net_minor)
                        .await?;
                    info!(donation_id = %donation.id, reference = %reference, "donation completed");
                    return Ok(CallbackDisposition::Completed(donation.id));
                }

                let current = self.load_donation(db_tx, donation.id).await?;
                if current.state == DonationState::Completed
                    && current.transaction_reference.as_deref() == Some(reference)
                {
                    debug!(donation_id = %donation.id, reference = %reference, "duplicate success ignored");
                    return Ok(CallbackDisposition::Duplicate(donation.id));
                }

                error!(
                    donation_id = %donation.id,
                    reference = %reference,
                    state = %current.state,
                    "success reported for a donation that cannot complete"
                );
                let note = format!(
                    "payment {reference} confirmed (receipt {}) while donation was {}",
                    settlement.receipt_number.as_deref().unwrap_or("n/a"),
                    current.state
                );
                self.flag_for_review(db_tx, donation.id, &note, now).await?;
                Ok(CallbackDisposition::Anomaly(donation.id))
            }
            PaymentOutcome::Failure => {
                if self
                    .finish_donation(db_tx, donation.id, reference, DonationState::Failed, now)
                    .await?
                {
                    self.resolve_attempt(db_tx, attempt.id, ConfirmationStatus::Rejected, &settlement, now)
                        .await?;
                    info!(
                        donation_id = %donation.id,
                        reference = %reference,
                        reason = %settlement.note,
                        "donation failed"
                    );
                    return Ok(CallbackDisposition::Failed(donation.id));
                }

                let current = self.load_donation(db_tx, donation.id).await?;
                if current.state == DonationState::Failed
                    && current.transaction_reference.as_deref() == Some(reference)
                {
                    debug!(donation_id = %donation.id, reference = %reference, "duplicate failure ignored");
                    return Ok(CallbackDisposition::Duplicate(donation.id));
                }

                // Leaves completed donations untouched; only the stale attempt is closed.
                self.resolve_attempt(db_tx, attempt.id, ConfirmationStatus::Rejected, &settlement, now)
                    .await?;
                info!(
                    donation_id = %donation.id,
                    reference = %reference,
                    state = %current.state,
                    "failure ignored"
                );
                Ok(CallbackDisposition::Ignored(donation.id))
            }
        }
    }

    /// Close a pending attempt with its final status.
    async fn resolve_attempt<C: ConnectionTrait>(
        &self,
        db: &C,
        attempt_id: Uuid,
        status: ConfirmationStatus,
        settlement: &Settlement,
        at: DateTime<Utc>,
    ) -> ResultEngine<bool> {
        let mut update = payments::Entity::update_many()
            .col_expr(
                payments::Column::ConfirmationStatus,
                Expr::value(status.as_str()),
            )
            .col_expr(payments::Column::UpdatedAt, Expr::value(at));
        if let Some(receipt) = settlement.receipt_number.as_deref() {
            update = update.col_expr(payments::Column::ReceiptNumber, Expr::value(receipt));
        }
        if let Some(payload) = settlement.payload.as_deref() {
            update = update.col_expr(payments::Column::ProviderPayload, Expr::value(payload));
        }
        let res = update
            .filter(payments::Column::Id.eq(attempt_id.to_string()))
            .filter(payments::Column::ConfirmationStatus.eq(ConfirmationStatus::Pending.as_str()))
            .exec(db)
            .await?;
        Ok(res.rows_affected == 1)
    }
}
