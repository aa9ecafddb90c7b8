//! Outbound notifications.
//!
//! The engine never waits on a notification for correctness: every send
//! happens after the owning transaction committed and failures are only
//! logged by the caller.

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, DbErr};
use thiserror::Error;

use crate::notifications::{self, Notification};

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("notification store failed: {0}")]
    Store(#[from] DbErr),
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait NotificationSink: Debug + Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Persists notifications in the `notifications` table, where the staff
/// dashboard and donor inbox read them.
#[derive(Clone, Debug)]
pub struct DatabaseNotifier {
    database: DatabaseConnection,
}

impl DatabaseNotifier {
    pub fn new(database: DatabaseConnection) -> Self {
        Self { database }
    }
}

#[async_trait]
impl NotificationSink for DatabaseNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        notifications::ActiveModel::from_notification(&notification, Utc::now())
            .insert(&self.database)
            .await?;
        Ok(())
    }
}
