use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, QueryFilter, QueryOrder, TransactionTrait, prelude::*,
    sea_query::Expr,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    BeginPaymentCmd, CreateDonationCmd, Donation, DonationState, EngineError, MoneyCents,
    PaymentAttempt, PaymentMethod, PaymentParams, RecurringSchedule, ResultEngine, campaigns,
    donations,
    gateway::{GatewayError, PushRequest, normalize_phone},
    payments, schedules,
    util::normalize_optional_text,
};

use super::{AttemptHandle, Engine, with_tx};

impl Engine {
    /// Pledge a donation.
    ///
    /// The donation starts `pending`. When the command carries a frequency, the
    /// recurring schedule is registered in the same transaction, so a pledge
    /// never exists without its schedule (or vice versa).
    ///
    /// With an idempotency key, a retry returns the donation created by the
    /// first call instead of a second pledge.
    pub async fn create_donation(&self, cmd: CreateDonationCmd) -> ResultEngine<Donation> {
        let donor_id = cmd.donor_id.trim();
        if donor_id.is_empty() {
            return Err(EngineError::Validation("donor_id must not be empty".to_string()));
        }
        let mut donation = Donation::new(
            donor_id.to_string(),
            cmd.campaign_id.trim().to_string(),
            MoneyCents::new(cmd.amount_minor),
            cmd.method,
            cmd.created_at,
        )?;
        donation.is_recurring = cmd.frequency.is_some();
        donation.frequency = cmd.frequency;
        donation.is_anonymous = cmd.is_anonymous;
        donation.dedication_message = normalize_optional_text(cmd.dedication_message.as_deref());
        donation.idempotency_key = normalize_optional_text(cmd.idempotency_key.as_deref());

        with_tx!(self, |db_tx| {
            if let Some(key) = donation.idempotency_key.as_deref()
                && let Some(existing) = self.donation_by_key(&db_tx, &donation.donor_id, key).await?
            {
                return Ok(existing);
            }

            self.require_active_campaign(&db_tx, &donation.campaign_id)
                .await?;

            let model: donations::ActiveModel = (&donation).into();
            if let Err(err) = model.insert(&db_tx).await {
                // A concurrent request with the same key won the unique index.
                if let Some(key) = donation.idempotency_key.as_deref()
                    && let Some(existing) =
                        self.donation_by_key(&db_tx, &donation.donor_id, key).await?
                {
                    return Ok(existing);
                }
                return Err(err.into());
            }

            if let Some(frequency) = cmd.frequency {
                let schedule = RecurringSchedule::new(
                    donation.donor_id.clone(),
                    donation.campaign_id.clone(),
                    donation.id,
                    donation.amount_minor,
                    frequency,
                    donation.method,
                    donation.created_at,
                )?;
                let schedule_model: schedules::ActiveModel = (&schedule).into();
                schedule_model.insert(&db_tx).await?;
                info!(
                    schedule_id = %schedule.id,
                    donation_id = %donation.id,
                    next_due_date = %schedule.next_due_date,
                    "recurring schedule registered"
                );
            }

            info!(
                donation_id = %donation.id,
                campaign_id = %donation.campaign_id,
                method = donation.method.as_str(),
                amount_minor = donation.amount_minor,
                "donation created"
            );
            Ok(donation)
        })
    }

    /// Start settling a pending donation.
    ///
    /// Mobile money sends a push to the donor's handset; manual methods record
    /// the donor's payment claim for reconciliation.
    pub async fn begin_payment(&self, cmd: BeginPaymentCmd) -> ResultEngine<AttemptHandle> {
        match cmd.params {
            PaymentParams::MobileMoney { phone } => {
                let donation = self
                    .owned_donation(&self.database, cmd.donation_id, &cmd.donor_id)
                    .await?;
                self.initiate_mobile_money(&donation, &phone).await
            }
            PaymentParams::Manual(claim) => {
                self.submit_manual_payment(cmd.donation_id, &cmd.donor_id, claim)
                    .await
            }
        }
    }

    /// Push a payment request for `donation` and move it to `processing`.
    ///
    /// The provider call happens outside any transaction and is bounded by the
    /// policy timeout; nothing is written unless the provider accepted.
    pub(super) async fn initiate_mobile_money(
        &self,
        donation: &Donation,
        phone: &str,
    ) -> ResultEngine<AttemptHandle> {
        if donation.method != PaymentMethod::MobileMoney {
            return Err(EngineError::Validation(format!(
                "{} donations cannot be paid by mobile money push",
                donation.method.as_str()
            )));
        }
        if donation.state != DonationState::Pending {
            return Err(EngineError::InvalidState(format!(
                "donation is {}",
                donation.state
            )));
        }
        if !self.gateway.validate_phone(phone) {
            return Err(EngineError::InvalidPhone(phone.to_string()));
        }
        let msisdn =
            normalize_phone(phone).ok_or_else(|| EngineError::InvalidPhone(phone.to_string()))?;

        let campaign = campaigns::Entity::find_by_id(donation.campaign_id.clone())
            .one(&self.database)
            .await?
            .ok_or_else(|| EngineError::CampaignNotFound(donation.campaign_id.clone()))?;

        let request = PushRequest {
            phone: msisdn.clone(),
            amount_minor: donation.amount_minor,
            donation_ref: donation.id.simple().to_string(),
            narrative: format!("Donation {}", campaign.title),
        };
        let accepted = match tokio::time::timeout(
            self.policy.initiation_timeout,
            self.gateway.initiate_push(request),
        )
        .await
        {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(err)) => {
                warn!(donation_id = %donation.id, error = %err, "push initiation failed");
                return Err(err.into());
            }
            Err(_) => {
                warn!(donation_id = %donation.id, "push initiation timed out");
                return Err(GatewayError::Timeout.into());
            }
        };

        let now = Utc::now();
        let mut attempt = PaymentAttempt::new(
            donation.id,
            self.gateway.provider(),
            accepted.reference.clone(),
            donation.amount_minor,
            now,
        );
        attempt.phone = Some(msisdn.clone());
        attempt.provider_payload = Some(accepted.raw.to_string());

        let recorded: ResultEngine<()> = with_tx!(self, |db_tx| {
            let attempt_model: payments::ActiveModel = (&attempt).into();
            attempt_model.insert(&db_tx).await?;

            if self
                .start_processing(&db_tx, donation.id, &accepted.reference, now)
                .await?
            {
                if donation.is_recurring && donation.schedule_id.is_none() {
                    self.remember_schedule_phone(&db_tx, donation.id, &msisdn)
                        .await?;
                }
                Ok(())
            } else {
                let current = self.load_donation(&db_tx, donation.id).await?;
                Err(EngineError::InvalidState(format!(
                    "donation is {}",
                    current.state
                )))
            }
        });
        if let Err(err) = recorded {
            // The handset already received the prompt; its callback will not match.
            error!(
                donation_id = %donation.id,
                reference = %accepted.reference,
                error = %err,
                "push accepted but attempt not recorded"
            );
            return Err(err);
        }

        info!(
            donation_id = %donation.id,
            reference = %accepted.reference,
            "mobile money push started"
        );
        Ok(AttemptHandle {
            donation_id: donation.id,
            payment_id: attempt.id,
            provider: attempt.provider,
            reference: accepted.reference,
            state: DonationState::Processing,
            customer_message: accepted.customer_message,
        })
    }

    /// Donor cancellation, allowed only while the donation is `pending`.
    pub async fn cancel_donation(
        &self,
        donation_id: Uuid,
        donor_id: &str,
    ) -> ResultEngine<Donation> {
        let now = Utc::now();
        let donation = with_tx!(self, |db_tx| {
            self.owned_donation(&db_tx, donation_id, donor_id).await?;
            if self.fail_pending(&db_tx, donation_id, now).await? {
                self.load_donation(&db_tx, donation_id).await
            } else {
                let current = self.load_donation(&db_tx, donation_id).await?;
                Err(EngineError::InvalidState(format!(
                    "cannot cancel a {} donation",
                    current.state
                )))
            }
        })?;
        info!(donation_id = %donation_id, "donation cancelled by donor");
        Ok(donation)
    }

    /// Return a donation snapshot from DB.
    pub async fn donation(&self, donation_id: Uuid) -> ResultEngine<Donation> {
        self.load_donation(&self.database, donation_id).await
    }

    /// Donation together with its most recent payment attempt.
    pub async fn payment_status(
        &self,
        donation_id: Uuid,
    ) -> ResultEngine<(Donation, Option<PaymentAttempt>)> {
        let donation = self.load_donation(&self.database, donation_id).await?;
        let latest = payments::Entity::find()
            .filter(payments::Column::DonationId.eq(donation_id.to_string()))
            .order_by_desc(payments::Column::CreatedAt)
            .one(&self.database)
            .await?
            .map(PaymentAttempt::try_from)
            .transpose()?;
        Ok((donation, latest))
    }

    /// All payment attempts of a donation, oldest first.
    pub async fn payment_attempts(&self, donation_id: Uuid) -> ResultEngine<Vec<PaymentAttempt>> {
        payments::Entity::find()
            .filter(payments::Column::DonationId.eq(donation_id.to_string()))
            .order_by_asc(payments::Column::CreatedAt)
            .all(&self.database)
            .await?
            .into_iter()
            .map(PaymentAttempt::try_from)
            .collect()
    }

    pub(super) async fn donation_by_key<C: ConnectionTrait>(
        &self,
        db: &C,
        donor_id: &str,
        key: &str,
    ) -> ResultEngine<Option<Donation>> {
        donations::Entity::find()
            .filter(donations::Column::DonorId.eq(donor_id.to_string()))
            .filter(donations::Column::IdempotencyKey.eq(key.to_string()))
            .one(db)
            .await?
            .map(Donation::try_from)
            .transpose()
    }

    /// Save the number used for the first push so later cycles can reuse it.
    async fn remember_schedule_phone<C: ConnectionTrait>(
        &self,
        db: &C,
        origin_donation_id: Uuid,
        msisdn: &str,
    ) -> ResultEngine<()> {
        schedules::Entity::update_many()
            .col_expr(schedules::Column::Phone, Expr::value(msisdn))
            .col_expr(schedules::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(schedules::Column::OriginDonationId.eq(origin_donation_id.to_string()))
            .exec(db)
            .await?;
        Ok(())
    }
}
