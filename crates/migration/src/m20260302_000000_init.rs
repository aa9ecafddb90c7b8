//! Initial schema migration.
//!
//! Creates the complete schema for Harambee:
//!
//! - `users`: donors and staff (identity is issued elsewhere, roles live here)
//! - `campaigns`: fundraising targets and their running totals
//! - `donations`: one pledge-to-payment attempt each
//! - `payments`: external settlement attempts for a donation
//! - `recurring_schedules`: standing instructions that re-create donations
//! - `notifications`: staff/donor alerts (reconciliation, payments due)

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

// ─────────────────────────────────────────────────────────────────────────────
// Table identifiers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Iden)]
enum Users {
    Table,
    Id,
    DisplayName,
    Role,
    CreatedAt,
}

#[derive(Iden)]
enum Campaigns {
    Table,
    Id,
    Title,
    Status,
    GoalMinor,
    CurrentMinor,
    CreatedAt,
}

#[derive(Iden)]
enum Donations {
    Table,
    Id,
    DonorId,
    CampaignId,
    AmountMinor,
    FeeMinor,
    NetMinor,
    Method,
    IsRecurring,
    Frequency,
    ScheduleId,
    State,
    TransactionReference,
    IsAnonymous,
    DedicationMessage,
    IdempotencyKey,
    CreatedAt,
    UpdatedAt,
    CompletedAt,
}

#[derive(Iden)]
enum Payments {
    Table,
    Id,
    DonationId,
    Provider,
    ProviderReference,
    AmountMinor,
    Phone,
    ConfirmationStatus,
    ReceiptNumber,
    ProviderPayload,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum RecurringSchedules {
    Table,
    Id,
    DonorId,
    CampaignId,
    OriginDonationId,
    AmountMinor,
    Frequency,
    Method,
    Phone,
    NextDueDate,
    Status,
    StartDate,
    ConsecutiveFailures,
    LastFailure,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Notifications {
    Table,
    Id,
    UserId,
    Kind,
    Title,
    Message,
    ActionRef,
    CreatedAt,
    ReadAt,
}

// ─────────────────────────────────────────────────────────────────────────────
// Migration implementation
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ───────────────────────────────────────────────────────────────────
        // 1. Users
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Users::Id).string().not_null().primary_key())
                    .col(ColumnDef::new(Users::DisplayName).string().not_null())
                    .col(
                        ColumnDef::new(Users::Role)
                            .string()
                            .not_null()
                            .default("donor"),
                    )
                    .col(ColumnDef::new(Users::CreatedAt).timestamp().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-users-role")
                    .table(Users::Table)
                    .col(Users::Role)
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 2. Campaigns
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Campaigns::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Campaigns::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Campaigns::Title).string().not_null())
                    .col(
                        ColumnDef::new(Campaigns::Status)
                            .string()
                            .not_null()
                            .default("active"),
                    )
                    .col(ColumnDef::new(Campaigns::GoalMinor).big_integer().not_null())
                    .col(
                        ColumnDef::new(Campaigns::CurrentMinor)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Campaigns::CreatedAt).timestamp().not_null())
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 3. Donations
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Donations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Donations::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Donations::DonorId).string().not_null())
                    .col(ColumnDef::new(Donations::CampaignId).string().not_null())
                    .col(
                        ColumnDef::new(Donations::AmountMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Donations::FeeMinor).big_integer().not_null())
                    .col(ColumnDef::new(Donations::NetMinor).big_integer().not_null())
                    .col(ColumnDef::new(Donations::Method).string().not_null())
                    .col(
                        ColumnDef::new(Donations::IsRecurring)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Donations::Frequency).string())
                    .col(ColumnDef::new(Donations::ScheduleId).string())
                    .col(
                        ColumnDef::new(Donations::State)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(Donations::TransactionReference).string())
                    .col(
                        ColumnDef::new(Donations::IsAnonymous)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Donations::DedicationMessage).string())
                    .col(ColumnDef::new(Donations::IdempotencyKey).string())
                    .col(ColumnDef::new(Donations::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(Donations::UpdatedAt).timestamp().not_null())
                    .col(ColumnDef::new(Donations::CompletedAt).timestamp())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-donations-campaign_id")
                            .from(Donations::Table, Donations::CampaignId)
                            .to(Campaigns::Table, Campaigns::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-donations-campaign_id-state")
                    .table(Donations::Table)
                    .col(Donations::CampaignId)
                    .col(Donations::State)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-donations-transaction_reference")
                    .table(Donations::Table)
                    .col(Donations::TransactionReference)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uidx-donations-donor_id-idempotency_key")
                    .table(Donations::Table)
                    .col(Donations::DonorId)
                    .col(Donations::IdempotencyKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 4. Payments
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Payments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Payments::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Payments::DonationId).string().not_null())
                    .col(ColumnDef::new(Payments::Provider).string().not_null())
                    .col(
                        ColumnDef::new(Payments::ProviderReference)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Payments::AmountMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Payments::Phone).string())
                    .col(
                        ColumnDef::new(Payments::ConfirmationStatus)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(Payments::ReceiptNumber).string())
                    .col(ColumnDef::new(Payments::ProviderPayload).text())
                    .col(ColumnDef::new(Payments::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(Payments::UpdatedAt).timestamp().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-payments-donation_id")
                            .from(Payments::Table, Payments::DonationId)
                            .to(Donations::Table, Donations::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-payments-provider-provider_reference")
                    .table(Payments::Table)
                    .col(Payments::Provider)
                    .col(Payments::ProviderReference)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-payments-donation_id")
                    .table(Payments::Table)
                    .col(Payments::DonationId)
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 5. Recurring schedules
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(RecurringSchedules::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RecurringSchedules::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(RecurringSchedules::DonorId).string().not_null())
                    .col(
                        ColumnDef::new(RecurringSchedules::CampaignId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RecurringSchedules::OriginDonationId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RecurringSchedules::AmountMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RecurringSchedules::Frequency)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(RecurringSchedules::Method).string().not_null())
                    .col(ColumnDef::new(RecurringSchedules::Phone).string())
                    .col(
                        ColumnDef::new(RecurringSchedules::NextDueDate)
                            .date()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RecurringSchedules::Status)
                            .string()
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        ColumnDef::new(RecurringSchedules::StartDate)
                            .date()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RecurringSchedules::ConsecutiveFailures)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(RecurringSchedules::LastFailure).string())
                    .col(
                        ColumnDef::new(RecurringSchedules::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RecurringSchedules::UpdatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-recurring_schedules-origin_donation_id")
                            .from(
                                RecurringSchedules::Table,
                                RecurringSchedules::OriginDonationId,
                            )
                            .to(Donations::Table, Donations::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-recurring_schedules-status-next_due_date")
                    .table(RecurringSchedules::Table)
                    .col(RecurringSchedules::Status)
                    .col(RecurringSchedules::NextDueDate)
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 6. Notifications
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Notifications::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Notifications::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Notifications::UserId).string().not_null())
                    .col(ColumnDef::new(Notifications::Kind).string().not_null())
                    .col(ColumnDef::new(Notifications::Title).string().not_null())
                    .col(ColumnDef::new(Notifications::Message).string().not_null())
                    .col(ColumnDef::new(Notifications::ActionRef).string())
                    .col(
                        ColumnDef::new(Notifications::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Notifications::ReadAt).timestamp())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-notifications-user_id")
                    .table(Notifications::Table)
                    .col(Notifications::UserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Drop in reverse order of creation (respecting FK dependencies)
        manager
            .drop_table(Table::drop().table(Notifications::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RecurringSchedules::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Payments::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Donations::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Campaigns::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await?;
        Ok(())
    }
}
