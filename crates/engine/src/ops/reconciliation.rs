//! Manual reconciliation for payment methods that cannot report their own
//! outcome (bank transfers and card slips).
//!
//! A donor claims a payment with the reference printed on their slip; staff
//! later confirm or reject the claim. Decisions go through
//! [`Engine::settle`](super::Engine), exactly like provider callbacks.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, QueryFilter, QueryOrder, TransactionTrait, prelude::*, sea_query::Expr,
};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    ConfirmationStatus, Donation, DonationState, EngineError, ManualClaim, MoneyCents,
    Notification, PaymentAttempt, PaymentMethod, ResultEngine, Role,
    gateway::PaymentOutcome,
    payments, users,
    util::normalize_optional_text,
};

use super::{
    AttemptHandle, Engine,
    settlement::{CallbackDisposition, Settlement},
    with_tx,
};

impl Engine {
    /// Record a donor's manual payment claim.
    ///
    /// The first claim moves a `pending` donation to `processing`. A later claim
    /// on a `processing` donation replaces the earlier one: older pending
    /// attempts are rejected and the donation takes the new reference. Staff
    /// are notified once the claim is stored.
    pub async fn submit_manual_payment(
        &self,
        donation_id: Uuid,
        donor_id: &str,
        claim: ManualClaim,
    ) -> ResultEngine<AttemptHandle> {
        let reference = claim.reference.trim().to_string();
        if reference.is_empty() {
            return Err(EngineError::Validation(
                "payment reference must not be empty".to_string(),
            ));
        }
        let receipt_url = normalize_optional_text(claim.receipt_url.as_deref());
        let now = Utc::now();

        let recorded: ResultEngine<(Donation, PaymentAttempt)> = with_tx!(self, |db_tx| {
            let donation = self.owned_donation(&db_tx, donation_id, donor_id).await?;
            if !donation.method.is_manual() {
                return Err(EngineError::Validation(format!(
                    "{} donations settle through the payment provider",
                    donation.method.as_str()
                )));
            }

            let mut attempt = PaymentAttempt::new(
                donation.id,
                donation.method.as_str(),
                reference.clone(),
                donation.amount_minor,
                now,
            );
            attempt.provider_payload = Some(json!({ "receipt_url": receipt_url }).to_string());

            match donation.state {
                DonationState::Pending => {
                    let model: payments::ActiveModel = (&attempt).into();
                    model.insert(&db_tx).await?;
                    if !self
                        .start_processing(&db_tx, donation.id, &reference, now)
                        .await?
                    {
                        return Err(EngineError::InvalidState(
                            "donation changed while the claim was recorded".to_string(),
                        ));
                    }
                }
                DonationState::Processing => {
                    let confirmed = payments::Entity::find()
                        .filter(payments::Column::DonationId.eq(donation.id.to_string()))
                        .filter(
                            payments::Column::ConfirmationStatus
                                .eq(ConfirmationStatus::Confirmed.as_str()),
                        )
                        .one(&db_tx)
                        .await?;
                    if confirmed.is_some() {
                        return Err(EngineError::InvalidState(
                            "payment already confirmed".to_string(),
                        ));
                    }
                    payments::Entity::update_many()
                        .col_expr(
                            payments::Column::ConfirmationStatus,
                            Expr::value(ConfirmationStatus::Rejected.as_str()),
                        )
                        .col_expr(payments::Column::UpdatedAt, Expr::value(now))
                        .filter(payments::Column::DonationId.eq(donation.id.to_string()))
                        .filter(
                            payments::Column::ConfirmationStatus
                                .eq(ConfirmationStatus::Pending.as_str()),
                        )
                        .exec(&db_tx)
                        .await?;
                    let model: payments::ActiveModel = (&attempt).into();
                    model.insert(&db_tx).await?;
                    let res = crate::donations::Entity::update_many()
                        .col_expr(
                            crate::donations::Column::TransactionReference,
                            Expr::value(reference.as_str()),
                        )
                        .col_expr(crate::donations::Column::UpdatedAt, Expr::value(now))
                        .filter(crate::donations::Column::Id.eq(donation.id.to_string()))
                        .filter(
                            crate::donations::Column::State
                                .eq(DonationState::Processing.as_str()),
                        )
                        .exec(&db_tx)
                        .await?;
                    if res.rows_affected == 0 {
                        return Err(EngineError::InvalidState(
                            "donation changed while the claim was recorded".to_string(),
                        ));
                    }
                }
                DonationState::Completed | DonationState::Failed => {
                    return Err(EngineError::InvalidState(format!(
                        "donation is {}",
                        donation.state
                    )));
                }
            }
            Ok((donation, attempt))
        });
        let (donation, attempt) = recorded?;

        info!(
            donation_id = %donation.id,
            reference = %reference,
            method = donation.method.as_str(),
            "manual payment claim recorded"
        );
        self.notify_staff(&donation, &reference).await;

        Ok(AttemptHandle {
            donation_id: donation.id,
            payment_id: attempt.id,
            provider: attempt.provider,
            reference,
            state: DonationState::Processing,
            customer_message: None,
        })
    }

    /// Confirm a manual payment claim. Staff only.
    ///
    /// Confirming the same reference twice returns the completed donation
    /// without crediting the campaign again.
    pub async fn confirm_bank_transfer(
        &self,
        donation_id: Uuid,
        admin_id: &str,
        reference: &str,
    ) -> ResultEngine<Donation> {
        self.require_staff(admin_id).await?;
        let note = format!("confirmed by {admin_id}");
        self.decide_manual_claim(donation_id, reference, PaymentOutcome::Success, note)
            .await
    }

    /// Reject a manual payment claim, failing the donation. Staff only.
    pub async fn reject_bank_transfer(
        &self,
        donation_id: Uuid,
        admin_id: &str,
        reference: &str,
        reason: &str,
    ) -> ResultEngine<Donation> {
        self.require_staff(admin_id).await?;
        let note = format!("rejected by {admin_id}: {}", reason.trim());
        self.decide_manual_claim(donation_id, reference, PaymentOutcome::Failure, note)
            .await
    }

    async fn decide_manual_claim(
        &self,
        donation_id: Uuid,
        reference: &str,
        outcome: PaymentOutcome,
        note: String,
    ) -> ResultEngine<Donation> {
        let reference = reference.trim();
        with_tx!(self, |db_tx| {
            let donation = self.load_donation(&db_tx, donation_id).await?;
            if !donation.method.is_manual() {
                return Err(EngineError::InvalidState(format!(
                    "{} donations are settled by the payment provider",
                    donation.method.as_str()
                )));
            }

            let already_decided = match outcome {
                PaymentOutcome::Success => DonationState::Completed,
                PaymentOutcome::Failure => DonationState::Failed,
            };
            let same_claim = donation.transaction_reference.as_deref() == Some(reference);
            match donation.state {
                DonationState::Processing if same_claim => {}
                DonationState::Processing => {
                    return Err(EngineError::InvalidState(format!(
                        "claim {reference} was superseded by a newer claim"
                    )));
                }
                state if state == already_decided && same_claim => {}
                state => {
                    return Err(EngineError::InvalidState(format!("donation is {state}")));
                }
            }

            let model = payments::Entity::find()
                .filter(payments::Column::DonationId.eq(donation.id.to_string()))
                .filter(payments::Column::ProviderReference.eq(reference))
                .order_by_desc(payments::Column::CreatedAt)
                .one(&db_tx)
                .await?
                .ok_or_else(|| {
                    EngineError::InvalidState(format!("no claim with reference {reference}"))
                })?;
            let attempt = PaymentAttempt::try_from(model)?;

            let settlement = Settlement {
                outcome,
                receipt_number: None,
                provider_amount_minor: None,
                payload: None,
                note,
            };
            match self.settle(&db_tx, attempt, settlement).await? {
                CallbackDisposition::Completed(_)
                | CallbackDisposition::Failed(_)
                | CallbackDisposition::Duplicate(_) => self.load_donation(&db_tx, donation.id).await,
                _ => Err(EngineError::InvalidState(format!(
                    "claim {reference} is no longer the current claim"
                ))),
            }
        })
    }

    /// Tell every admin and finance user about a new claim. Failures are logged.
    async fn notify_staff(&self, donation: &Donation, reference: &str) {
        let staff = match users::Entity::find()
            .filter(users::Column::Role.is_in([Role::Admin.as_str(), Role::Finance.as_str()]))
            .all(&self.database)
            .await
        {
            Ok(staff) => staff,
            Err(err) => {
                warn!(donation_id = %donation.id, error = %err, "could not load reconciliation staff");
                return;
            }
        };

        let (kind, title) = match donation.method {
            PaymentMethod::Card => ("card_payment_pending", "Card Payment Pending"),
            _ => ("bank_transfer_pending", "Bank Transfer Pending"),
        };
        for user in staff {
            let notification = Notification::new(
                user.id,
                kind,
                title,
                format!(
                    "Donation {} of {} awaits reconciliation (reference {reference})",
                    donation.id,
                    MoneyCents::new(donation.amount_minor)
                ),
            )
            .action_ref(format!("/admin/reconciliation?donation_id={}", donation.id));
            self.notify_quietly(notification).await;
        }
    }
}
