use std::collections::VecDeque;

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
    prelude::*,
    sea_query::Expr,
};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    Donation, DonationState, EngineError, MoneyCents, Notification, PaymentMethod,
    RecurringSchedule, ResultEngine, ScheduleStatus, donations, schedules,
};

use super::{Engine, with_tx};

/// Counters of one due-schedule poll.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub due: u32,
    pub started: u32,
    /// Advanced concurrently by another poll.
    pub skipped: u32,
    pub failed: u32,
    pub paused: u32,
}

/// Keyset-paged cursor over schedules due on or before a date.
///
/// Pages are ordered by schedule id and each page starts after the last id
/// seen, so a scan visits each schedule at most once even while cycles are
/// advancing rows behind it. Nothing is persisted; a new scan starts over.
pub struct DueScan<'a> {
    engine: &'a Engine,
    today: NaiveDate,
    after: Option<String>,
    buffer: VecDeque<RecurringSchedule>,
    exhausted: bool,
}

impl DueScan<'_> {
    /// Next due schedule, fetching another page when the buffer runs dry.
    pub async fn next(&mut self) -> ResultEngine<Option<RecurringSchedule>> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fill().await?;
        }
        Ok(self.buffer.pop_front())
    }

    async fn fill(&mut self) -> ResultEngine<()> {
        let batch = self.engine.policy.due_scan_batch;
        let mut query = schedules::Entity::find()
            .filter(schedules::Column::Status.eq(ScheduleStatus::Active.as_str()))
            .filter(schedules::Column::NextDueDate.lte(self.today))
            .order_by_asc(schedules::Column::Id)
            .limit(batch);
        if let Some(after) = &self.after {
            query = query.filter(schedules::Column::Id.gt(after.clone()));
        }
        let page = query.all(&self.engine.database).await?;

        if (page.len() as u64) < batch {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.after = Some(last.id.clone());
        }
        for model in page {
            self.buffer.push_back(RecurringSchedule::try_from(model)?);
        }
        Ok(())
    }
}

impl Engine {
    /// Return a schedule snapshot from DB.
    pub async fn schedule(&self, schedule_id: Uuid) -> ResultEngine<RecurringSchedule> {
        let model = schedules::Entity::find_by_id(schedule_id.to_string())
            .one(&self.database)
            .await?
            .ok_or_else(|| EngineError::ScheduleNotFound(schedule_id.to_string()))?;
        RecurringSchedule::try_from(model)
    }

    /// Active schedules due on or before `now`.
    pub fn due_schedules(&self, now: DateTime<Utc>) -> DueScan<'_> {
        DueScan {
            engine: self,
            today: now.date_naive(),
            after: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Move a schedule one interval forward.
    ///
    /// Returns `false` when another poll already advanced (or paused) it.
    pub async fn advance_schedule(&self, schedule: &RecurringSchedule) -> ResultEngine<bool> {
        let next = schedule
            .frequency
            .next_due_after(schedule.start_date, schedule.next_due_date)?;
        let res = schedules::Entity::update_many()
            .col_expr(schedules::Column::NextDueDate, Expr::value(next))
            .col_expr(schedules::Column::ConsecutiveFailures, Expr::value(0))
            .col_expr(schedules::Column::LastFailure, Expr::value(Option::<String>::None))
            .col_expr(schedules::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(schedules::Column::Id.eq(schedule.id.to_string()))
            .filter(schedules::Column::NextDueDate.eq(schedule.next_due_date))
            .filter(schedules::Column::Status.eq(ScheduleStatus::Active.as_str()))
            .exec(&self.database)
            .await?;
        let advanced = res.rows_affected == 1;
        if advanced {
            info!(schedule_id = %schedule.id, next_due_date = %next, "schedule advanced");
        }
        Ok(advanced)
    }

    /// Count a failed cycle; pauses the schedule once the policy threshold is reached.
    pub async fn record_schedule_failure(
        &self,
        schedule: &RecurringSchedule,
        reason: &str,
    ) -> ResultEngine<ScheduleStatus> {
        let threshold = self.policy.max_consecutive_failures;
        let now = Utc::now();
        let updated = with_tx!(self, |db_tx| {
            schedules::Entity::update_many()
                .col_expr(
                    schedules::Column::ConsecutiveFailures,
                    Expr::col(schedules::Column::ConsecutiveFailures).add(1),
                )
                .col_expr(schedules::Column::LastFailure, Expr::value(reason))
                .col_expr(schedules::Column::UpdatedAt, Expr::value(now))
                .filter(schedules::Column::Id.eq(schedule.id.to_string()))
                .filter(schedules::Column::Status.eq(ScheduleStatus::Active.as_str()))
                .exec(&db_tx)
                .await?;
            schedules::Entity::update_many()
                .col_expr(
                    schedules::Column::Status,
                    Expr::value(ScheduleStatus::Paused.as_str()),
                )
                .filter(schedules::Column::Id.eq(schedule.id.to_string()))
                .filter(schedules::Column::Status.eq(ScheduleStatus::Active.as_str()))
                .filter(schedules::Column::ConsecutiveFailures.gte(threshold))
                .exec(&db_tx)
                .await?;
            let model = schedules::Entity::find_by_id(schedule.id.to_string())
                .one(&db_tx)
                .await?
                .ok_or_else(|| EngineError::ScheduleNotFound(schedule.id.to_string()))?;
            RecurringSchedule::try_from(model)
        })?;

        if updated.status == ScheduleStatus::Paused {
            warn!(
                schedule_id = %schedule.id,
                failures = updated.consecutive_failures,
                reason = %reason,
                "schedule paused after repeated failures"
            );
        } else {
            info!(
                schedule_id = %schedule.id,
                failures = updated.consecutive_failures,
                reason = %reason,
                "schedule cycle failed"
            );
        }
        Ok(updated.status)
    }

    /// Run every cycle due on or before `now`.
    ///
    /// Safe to retry: each cycle donation carries an idempotency key derived
    /// from the schedule and its due date, so an interrupted poll resumes the
    /// same donation instead of creating another.
    pub async fn run_due_cycles(&self, now: DateTime<Utc>) -> ResultEngine<CycleReport> {
        let mut report = CycleReport::default();
        let mut scan = self.due_schedules(now);

        while let Some(schedule) = scan.next().await? {
            report.due += 1;
            match self.run_cycle(&schedule, now).await {
                Ok(true) => report.started += 1,
                Ok(false) => report.skipped += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(schedule_id = %schedule.id, error = %err, "recurring cycle failed");
                    match self.record_schedule_failure(&schedule, &err.to_string()).await {
                        Ok(ScheduleStatus::Paused) => report.paused += 1,
                        Ok(_) => {}
                        Err(err) => {
                            error!(schedule_id = %schedule.id, error = %err, "could not record cycle failure");
                        }
                    }
                }
            }
        }

        info!(
            due = report.due,
            started = report.started,
            skipped = report.skipped,
            failed = report.failed,
            paused = report.paused,
            "recurring poll finished"
        );
        Ok(report)
    }

    async fn run_cycle(&self, schedule: &RecurringSchedule, now: DateTime<Utc>) -> ResultEngine<bool> {
        let donation = self.cycle_donation(schedule, now).await?;

        match donation.state {
            DonationState::Pending => match schedule.method {
                PaymentMethod::MobileMoney => {
                    let pushed = match schedule.phone.as_deref() {
                        Some(phone) => self.initiate_mobile_money(&donation, phone).await,
                        None => Err(EngineError::Validation(
                            "no mobile money number on file".to_string(),
                        )),
                    };
                    if let Err(err) = pushed {
                        self.abandon_cycle_donation(&donation).await;
                        return Err(err);
                    }
                }
                PaymentMethod::BankTransfer | PaymentMethod::Card => {
                    self.notify_payment_due(schedule, &donation).await;
                }
            },
            // Started by an earlier, interrupted poll.
            DonationState::Processing | DonationState::Completed => {}
            DonationState::Failed => {
                return Err(EngineError::InvalidState(format!(
                    "cycle donation {} already failed",
                    donation.id
                )));
            }
        }

        self.advance_schedule(schedule).await
    }

    /// Create (or find) the donation for the schedule's current cycle.
    ///
    /// The key counts the failed donations already made for this due date, so
    /// a retry after a failure starts afresh while an interrupted poll finds
    /// the donation it left behind.
    async fn cycle_donation(
        &self,
        schedule: &RecurringSchedule,
        now: DateTime<Utc>,
    ) -> ResultEngine<Donation> {
        let prefix = format!("recurring:{}:{}:", schedule.id, schedule.next_due_date);
        let mut donation = Donation::new(
            schedule.donor_id.clone(),
            schedule.campaign_id.clone(),
            MoneyCents::new(schedule.amount_minor),
            schedule.method,
            now,
        )?;
        donation.is_recurring = true;
        donation.frequency = Some(schedule.frequency);
        donation.schedule_id = Some(schedule.id);

        with_tx!(self, |db_tx| {
            let failed = donations::Entity::find()
                .filter(donations::Column::ScheduleId.eq(schedule.id.to_string()))
                .filter(donations::Column::IdempotencyKey.starts_with(prefix.as_str()))
                .filter(donations::Column::State.eq(DonationState::Failed.as_str()))
                .count(&db_tx)
                .await?;
            let key = format!("{prefix}{failed}");
            if let Some(existing) = self
                .donation_by_key(&db_tx, &schedule.donor_id, &key)
                .await?
            {
                return Ok(existing);
            }
            self.require_active_campaign(&db_tx, &schedule.campaign_id)
                .await?;
            donation.idempotency_key = Some(key);
            let model: donations::ActiveModel = (&donation).into();
            model.insert(&db_tx).await?;
            info!(
                schedule_id = %schedule.id,
                donation_id = %donation.id,
                due_date = %schedule.next_due_date,
                "cycle donation created"
            );
            Ok(donation)
        })
    }

    /// Fail a cycle donation whose push could not be started.
    async fn abandon_cycle_donation(&self, donation: &Donation) {
        if let Err(err) = self.fail_pending(&self.database, donation.id, Utc::now()).await {
            error!(donation_id = %donation.id, error = %err, "could not fail cycle donation");
        }
    }

    async fn notify_payment_due(&self, schedule: &RecurringSchedule, donation: &Donation) {
        let notification = Notification::new(
            schedule.donor_id.clone(),
            "recurring_payment_due",
            "Recurring donation due",
            format!(
                "Your {} donation of {} is due. Submit your {} reference to complete it.",
                schedule.frequency,
                MoneyCents::new(schedule.amount_minor),
                schedule.method.as_str().replace('_', " ")
            ),
        )
        .action_ref(format!("/donations/{}", donation.id));
        self.notify_quietly(notification).await;
    }

    /// Resume a paused schedule. Staff only.
    pub async fn reactivate_schedule(
        &self,
        admin_id: &str,
        schedule_id: Uuid,
    ) -> ResultEngine<RecurringSchedule> {
        self.require_staff(admin_id).await?;
        let res = schedules::Entity::update_many()
            .col_expr(
                schedules::Column::Status,
                Expr::value(ScheduleStatus::Active.as_str()),
            )
            .col_expr(schedules::Column::ConsecutiveFailures, Expr::value(0))
            .col_expr(schedules::Column::LastFailure, Expr::value(Option::<String>::None))
            .col_expr(schedules::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(schedules::Column::Id.eq(schedule_id.to_string()))
            .filter(schedules::Column::Status.eq(ScheduleStatus::Paused.as_str()))
            .exec(&self.database)
            .await?;
        let schedule = self.schedule(schedule_id).await?;
        if res.rows_affected == 0 {
            return Err(EngineError::InvalidState(format!(
                "schedule is {}",
                schedule.status.as_str()
            )));
        }
        info!(schedule_id = %schedule_id, admin_id = %admin_id, "schedule reactivated");
        Ok(schedule)
    }

    /// Stop a schedule for good. Only its donor may cancel it.
    pub async fn cancel_schedule(
        &self,
        donor_id: &str,
        schedule_id: Uuid,
    ) -> ResultEngine<RecurringSchedule> {
        let schedule = self.schedule(schedule_id).await?;
        if schedule.donor_id != donor_id {
            return Err(EngineError::ScheduleNotFound(schedule_id.to_string()));
        }
        let res = schedules::Entity::update_many()
            .col_expr(
                schedules::Column::Status,
                Expr::value(ScheduleStatus::Cancelled.as_str()),
            )
            .col_expr(schedules::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(schedules::Column::Id.eq(schedule_id.to_string()))
            .filter(schedules::Column::Status.is_in([
                ScheduleStatus::Active.as_str(),
                ScheduleStatus::Paused.as_str(),
            ]))
            .exec(&self.database)
            .await?;
        if res.rows_affected == 0 {
            return Err(EngineError::InvalidState(
                "schedule is already cancelled".to_string(),
            ));
        }
        info!(schedule_id = %schedule_id, "schedule cancelled by donor");
        self.schedule(schedule_id).await
    }
}
