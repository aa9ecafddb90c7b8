use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use sea_orm::{ConnectionTrait, DatabaseConnection, QueryFilter, prelude::*, sea_query::Expr};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::{
    Donation, DonationState, EngineError, Notification, ResultEngine, Role,
    gateway::PushGateway,
    notify::{DatabaseNotifier, NotificationSink},
    users,
};

mod campaigns;
mod donations;
mod reconciliation;
mod schedules;
mod settlement;

pub use schedules::{CycleReport, DueScan};
pub use settlement::{CallbackDisposition, CallbackOutcome};

/// Run a block inside a DB transaction, committing on success and rolling back on error.
macro_rules! with_tx {
    ($self:expr, |$tx:ident| $body:expr) => {{
        let $tx = $self.database.begin().await?;
        let result = $body;
        match result {
            Ok(value) => {
                $tx.commit().await?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }};
}

pub(crate) use with_tx;

/// Tunables for the lifecycle engine.
#[derive(Clone, Debug)]
pub struct EnginePolicy {
    /// Upper bound on a single push initiation, on top of the HTTP client timeout.
    pub initiation_timeout: Duration,
    /// Consecutive failed cycles after which a schedule is paused.
    pub max_consecutive_failures: i32,
    /// Page size of the due-schedule scan.
    pub due_scan_batch: u64,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            initiation_timeout: Duration::from_secs(30),
            max_consecutive_failures: 3,
            due_scan_batch: 50,
        }
    }
}

/// A payment attempt that has been started for a donation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AttemptHandle {
    pub donation_id: Uuid,
    pub payment_id: Uuid,
    pub provider: String,
    pub reference: String,
    pub state: DonationState,
    /// Message the provider wants shown to the donor, if any.
    pub customer_message: Option<String>,
}

#[derive(Debug)]
pub struct Engine {
    database: DatabaseConnection,
    gateway: Arc<dyn PushGateway>,
    notifier: Arc<dyn NotificationSink>,
    policy: EnginePolicy,
}

impl Engine {
    /// Return a builder for `Engine`. Help to build the struct.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn policy(&self) -> &EnginePolicy {
        &self.policy
    }

    async fn load_donation<C: ConnectionTrait>(
        &self,
        db: &C,
        donation_id: Uuid,
    ) -> ResultEngine<Donation> {
        let model = crate::donations::Entity::find_by_id(donation_id.to_string())
            .one(db)
            .await?
            .ok_or_else(|| EngineError::DonationNotFound(donation_id.to_string()))?;
        Donation::try_from(model)
    }

    /// Load a donation on behalf of its donor. Other callers see it as missing.
    async fn owned_donation<C: ConnectionTrait>(
        &self,
        db: &C,
        donation_id: Uuid,
        donor_id: &str,
    ) -> ResultEngine<Donation> {
        let donation = self.load_donation(db, donation_id).await?;
        if donation.donor_id != donor_id {
            return Err(EngineError::DonationNotFound(donation_id.to_string()));
        }
        Ok(donation)
    }

    /// `pending → processing`, recording the attempt reference.
    async fn start_processing<C: ConnectionTrait>(
        &self,
        db: &C,
        donation_id: Uuid,
        reference: &str,
        at: DateTime<Utc>,
    ) -> ResultEngine<bool> {
        let res = crate::donations::Entity::update_many()
            .col_expr(
                crate::donations::Column::State,
                Expr::value(DonationState::Processing.as_str()),
            )
            .col_expr(crate::donations::Column::TransactionReference, Expr::value(reference))
            .col_expr(crate::donations::Column::UpdatedAt, Expr::value(at))
            .filter(crate::donations::Column::Id.eq(donation_id.to_string()))
            .filter(crate::donations::Column::State.eq(DonationState::Pending.as_str()))
            .exec(db)
            .await?;
        Ok(res.rows_affected == 1)
    }

    /// `processing → completed | failed` for the attempt holding `reference`.
    async fn finish_donation<C: ConnectionTrait>(
        &self,
        db: &C,
        donation_id: Uuid,
        reference: &str,
        to: DonationState,
        at: DateTime<Utc>,
    ) -> ResultEngine<bool> {
        let mut update = crate::donations::Entity::update_many()
            .col_expr(crate::donations::Column::State, Expr::value(to.as_str()))
            .col_expr(crate::donations::Column::UpdatedAt, Expr::value(at));
        if to == DonationState::Completed {
            update = update.col_expr(crate::donations::Column::CompletedAt, Expr::value(Some(at)));
        }
        let res = update
            .filter(crate::donations::Column::Id.eq(donation_id.to_string()))
            .filter(crate::donations::Column::State.eq(DonationState::Processing.as_str()))
            .filter(crate::donations::Column::TransactionReference.eq(reference))
            .exec(db)
            .await?;
        Ok(res.rows_affected == 1)
    }

    /// `pending → failed`.
    async fn fail_pending<C: ConnectionTrait>(
        &self,
        db: &C,
        donation_id: Uuid,
        at: DateTime<Utc>,
    ) -> ResultEngine<bool> {
        let res = crate::donations::Entity::update_many()
            .col_expr(
                crate::donations::Column::State,
                Expr::value(DonationState::Failed.as_str()),
            )
            .col_expr(crate::donations::Column::UpdatedAt, Expr::value(at))
            .filter(crate::donations::Column::Id.eq(donation_id.to_string()))
            .filter(crate::donations::Column::State.eq(DonationState::Pending.as_str()))
            .exec(db)
            .await?;
        Ok(res.rows_affected == 1)
    }

    async fn flag_for_review<C: ConnectionTrait>(
        &self,
        db: &C,
        donation_id: Uuid,
        note: &str,
        at: DateTime<Utc>,
    ) -> ResultEngine<()> {
        crate::donations::Entity::update_many()
            .col_expr(crate::donations::Column::NeedsReview, Expr::value(true))
            .col_expr(crate::donations::Column::ReviewNote, Expr::value(note))
            .col_expr(crate::donations::Column::UpdatedAt, Expr::value(at))
            .filter(crate::donations::Column::Id.eq(donation_id.to_string()))
            .exec(db)
            .await?;
        Ok(())
    }

    /// Ensure `user_id` is an admin or finance user.
    async fn require_staff(&self, user_id: &str) -> ResultEngine<Role> {
        let forbidden = || EngineError::Forbidden(format!("{user_id} may not reconcile payments"));
        let user = users::Entity::find_by_id(user_id.to_string())
            .one(&self.database)
            .await?
            .ok_or_else(forbidden)?;
        let role = Role::try_from(user.role.as_str())?;
        if !role.is_staff() {
            return Err(forbidden());
        }
        Ok(role)
    }

    /// Fire-and-forget delivery; must only run after the owning transaction committed.
    async fn notify_quietly(&self, notification: Notification) {
        let user_id = notification.user_id.clone();
        let kind = notification.kind.clone();
        if let Err(err) = self.notifier.notify(notification).await {
            warn!(user_id = %user_id, kind = %kind, error = %err, "notification not delivered");
        }
    }
}

/// The builder for `Engine`
#[derive(Default)]
pub struct EngineBuilder {
    database: DatabaseConnection,
    gateway: Option<Arc<dyn PushGateway>>,
    notifier: Option<Arc<dyn NotificationSink>>,
    policy: EnginePolicy,
}

impl EngineBuilder {
    /// Pass the required database
    pub fn database(mut self, db: DatabaseConnection) -> EngineBuilder {
        self.database = db;
        self
    }

    /// Pass the required push gateway
    pub fn gateway(mut self, gateway: Arc<dyn PushGateway>) -> EngineBuilder {
        self.gateway = Some(gateway);
        self
    }

    /// Override the notification sink (defaults to the `notifications` table)
    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> EngineBuilder {
        self.notifier = Some(notifier);
        self
    }

    pub fn policy(mut self, policy: EnginePolicy) -> EngineBuilder {
        self.policy = policy;
        self
    }

    /// Construct `Engine`
    pub async fn build(self) -> ResultEngine<Engine> {
        let gateway = self
            .gateway
            .ok_or_else(|| EngineError::Validation("a push gateway is required".to_string()))?;
        if self.policy.max_consecutive_failures < 1 {
            return Err(EngineError::Validation(
                "max_consecutive_failures must be >= 1".to_string(),
            ));
        }
        if self.policy.due_scan_batch == 0 {
            return Err(EngineError::Validation(
                "due_scan_batch must be >= 1".to_string(),
            ));
        }
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(DatabaseNotifier::new(self.database.clone())));
        Ok(Engine {
            database: self.database,
            gateway,
            notifier,
            policy: self.policy,
        })
    }
}
