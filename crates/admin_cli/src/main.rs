use std::{error::Error, sync::Arc};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use engine::{
    Engine, MoneyCents,
    gateway::{
        CallbackResult, GatewayError, MpesaConfig, MpesaGateway, PushAccepted, PushGateway,
        PushRequest,
        mpesa::{accepted_ack, parse_stk_callback},
    },
};
use migration::MigratorTrait;
use sea_orm::{Database, DatabaseConnection, EntityTrait, Set};
use uuid::Uuid;

mod users {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
    #[sea_orm(table_name = "users")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        pub display_name: String,
        pub role: String,
        pub created_at: DateTimeUtc,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

mod campaigns {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
    #[sea_orm(table_name = "campaigns")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        pub title: String,
        pub status: String,
        pub goal_minor: i64,
        pub current_minor: i64,
        pub created_at: DateTimeUtc,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

#[derive(Parser, Debug)]
#[command(name = "harambee_admin")]
#[command(about = "Admin utilities for Harambee (bootstrap data, reconciliation, recurring runs)")]
struct Cli {
    /// Database connection string (also read from `DATABASE_URL`).
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "sqlite:./harambee.db?mode=rwc"
    )]
    database_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    User(User),
    Campaign(Campaign),
    Schedule(Schedule),
    Recurring(Recurring),
    Transfer(Transfer),
}

#[derive(Args, Debug)]
struct User {
    #[command(subcommand)]
    command: UserCommand,
}

#[derive(Subcommand, Debug)]
enum UserCommand {
    Create(UserCreateArgs),
}

#[derive(Args, Debug)]
struct UserCreateArgs {
    #[arg(long)]
    id: String,
    #[arg(long)]
    name: Option<String>,
    /// `donor`, `admin` or `finance`.
    #[arg(long, default_value = "donor")]
    role: String,
}

#[derive(Args, Debug)]
struct Campaign {
    #[command(subcommand)]
    command: CampaignCommand,
}

#[derive(Subcommand, Debug)]
enum CampaignCommand {
    Create(CampaignCreateArgs),
}

#[derive(Args, Debug)]
struct CampaignCreateArgs {
    #[arg(long)]
    id: String,
    #[arg(long)]
    title: String,
    /// Goal in shillings, e.g. `250000` or `250000.50`.
    #[arg(long)]
    goal: String,
}

#[derive(Args, Debug)]
struct Schedule {
    #[command(subcommand)]
    command: ScheduleCommand,
}

#[derive(Subcommand, Debug)]
enum ScheduleCommand {
    Reactivate(ScheduleReactivateArgs),
}

#[derive(Args, Debug)]
struct ScheduleReactivateArgs {
    #[arg(long)]
    admin: String,
    #[arg(long)]
    id: Uuid,
}

#[derive(Args, Debug)]
struct Recurring {
    #[command(subcommand)]
    command: RecurringCommand,
}

#[derive(Subcommand, Debug)]
enum RecurringCommand {
    RunDue(RunDueArgs),
}

#[derive(Args, Debug)]
struct RunDueArgs {
    /// Run as of this date (defaults to today).
    #[arg(long)]
    date: Option<NaiveDate>,
    #[command(flatten)]
    mpesa: MpesaArgs,
}

#[derive(Args, Debug)]
struct MpesaArgs {
    #[arg(long, env = "HARAMBEE__MPESA__BASE_URL")]
    mpesa_base_url: String,
    #[arg(long, env = "HARAMBEE__MPESA__CONSUMER_KEY")]
    mpesa_consumer_key: String,
    #[arg(long, env = "HARAMBEE__MPESA__CONSUMER_SECRET", hide_env_values = true)]
    mpesa_consumer_secret: String,
    #[arg(long, env = "HARAMBEE__MPESA__SHORTCODE")]
    mpesa_shortcode: String,
    #[arg(long, env = "HARAMBEE__MPESA__PASSKEY", hide_env_values = true)]
    mpesa_passkey: String,
    #[arg(long, env = "HARAMBEE__MPESA__CALLBACK_URL")]
    mpesa_callback_url: String,
}

impl MpesaArgs {
    fn into_config(self) -> MpesaConfig {
        MpesaConfig {
            base_url: self.mpesa_base_url,
            consumer_key: self.mpesa_consumer_key,
            consumer_secret: self.mpesa_consumer_secret,
            shortcode: self.mpesa_shortcode,
            passkey: self.mpesa_passkey,
            callback_url: self.mpesa_callback_url,
            transaction_type: "CustomerPayBillOnline".to_string(),
            timeout_secs: 15,
        }
    }
}

#[derive(Args, Debug)]
struct Transfer {
    #[command(subcommand)]
    command: TransferCommand,
}

#[derive(Subcommand, Debug)]
enum TransferCommand {
    Confirm(TransferConfirmArgs),
    Reject(TransferRejectArgs),
}

#[derive(Args, Debug)]
struct TransferConfirmArgs {
    #[arg(long)]
    admin: String,
    #[arg(long)]
    donation: Uuid,
    #[arg(long)]
    reference: String,
}

#[derive(Args, Debug)]
struct TransferRejectArgs {
    #[arg(long)]
    admin: String,
    #[arg(long)]
    donation: Uuid,
    #[arg(long)]
    reference: String,
    #[arg(long)]
    reason: String,
}

/// Gateway for commands that never push: every push is refused.
#[derive(Debug)]
struct OfflineGateway;

#[async_trait]
impl PushGateway for OfflineGateway {
    fn provider(&self) -> &'static str {
        "mpesa"
    }

    async fn initiate_push(&self, _request: PushRequest) -> Result<PushAccepted, GatewayError> {
        Err(GatewayError::Config(
            "push payments are not available from this command".to_string(),
        ))
    }

    fn parse_callback(&self, raw: &[u8]) -> Result<CallbackResult, GatewayError> {
        parse_stk_callback(raw)
    }

    fn ack(&self) -> serde_json::Value {
        accepted_ack()
    }
}

fn parse_role(raw: &str) -> Result<engine::Role, String> {
    engine::Role::try_from(raw.trim().to_lowercase().as_str()).map_err(|err| err.to_string())
}

async fn connect_db(
    database_url: &str,
) -> Result<DatabaseConnection, Box<dyn Error + Send + Sync>> {
    let db = Database::connect(database_url).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(db)
}

async fn offline_engine(db: &DatabaseConnection) -> Result<Engine, Box<dyn Error + Send + Sync>> {
    Ok(Engine::builder()
        .database(db.clone())
        .gateway(Arc::new(OfflineGateway))
        .build()
        .await?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();

    let db = connect_db(&cli.database_url).await?;

    match cli.command {
        Command::User(User {
            command: UserCommand::Create(args),
        }) => {
            let role = match parse_role(&args.role) {
                Ok(role) => role,
                Err(err) => {
                    eprintln!("{err}");
                    std::process::exit(2);
                }
            };

            if users::Entity::find_by_id(args.id.clone())
                .one(&db)
                .await?
                .is_some()
            {
                eprintln!("user already exists: {}", args.id);
                std::process::exit(1);
            }

            let user = users::ActiveModel {
                id: Set(args.id.clone()),
                display_name: Set(args.name.unwrap_or_else(|| args.id.clone())),
                role: Set(role.as_str().to_string()),
                created_at: Set(Utc::now()),
            };
            users::Entity::insert(user).exec(&db).await?;

            println!("created user: {} ({})", args.id, role.as_str());
        }
        Command::Campaign(Campaign {
            command: CampaignCommand::Create(args),
        }) => {
            let goal: MoneyCents = match args.goal.parse() {
                Ok(goal) => goal,
                Err(err) => {
                    eprintln!("{err}");
                    std::process::exit(2);
                }
            };
            if !goal.is_positive() {
                eprintln!("goal must be positive");
                std::process::exit(2);
            }

            if campaigns::Entity::find_by_id(args.id.clone())
                .one(&db)
                .await?
                .is_some()
            {
                eprintln!("campaign already exists: {}", args.id);
                std::process::exit(1);
            }

            let campaign = campaigns::ActiveModel {
                id: Set(args.id.clone()),
                title: Set(args.title.clone()),
                status: Set("active".to_string()),
                goal_minor: Set(goal.cents()),
                current_minor: Set(0),
                created_at: Set(Utc::now()),
            };
            campaigns::Entity::insert(campaign).exec(&db).await?;

            println!("created campaign: {} ({}, goal {goal})", args.title, args.id);
        }
        Command::Schedule(Schedule {
            command: ScheduleCommand::Reactivate(args),
        }) => {
            let engine = offline_engine(&db).await?;
            let schedule = engine.reactivate_schedule(&args.admin, args.id).await?;
            println!(
                "reactivated schedule {} (next due {})",
                schedule.id, schedule.next_due_date
            );
        }
        Command::Recurring(Recurring {
            command: RecurringCommand::RunDue(args),
        }) => {
            let now = match args.date {
                Some(date) => date
                    .and_hms_opt(0, 0, 0)
                    .map(|dt| dt.and_utc())
                    .unwrap_or_else(Utc::now),
                None => Utc::now(),
            };
            let gateway = MpesaGateway::new(args.mpesa.into_config())?;
            let engine = Engine::builder()
                .database(db.clone())
                .gateway(Arc::new(gateway))
                .build()
                .await?;

            let report = engine.run_due_cycles(now).await?;
            println!(
                "due: {}, started: {}, skipped: {}, failed: {}, paused: {}",
                report.due, report.started, report.skipped, report.failed, report.paused
            );
        }
        Command::Transfer(Transfer {
            command: TransferCommand::Confirm(args),
        }) => {
            let engine = offline_engine(&db).await?;
            let donation = engine
                .confirm_bank_transfer(args.donation, &args.admin, &args.reference)
                .await?;
            println!("donation {} is {}", donation.id, donation.state);
        }
        Command::Transfer(Transfer {
            command: TransferCommand::Reject(args),
        }) => {
            let engine = offline_engine(&db).await?;
            let donation = engine
                .reject_bank_transfer(args.donation, &args.admin, &args.reference, &args.reason)
                .await?;
            println!("donation {} is {}", donation.id, donation.state);
        }
    }

    Ok(())
}
