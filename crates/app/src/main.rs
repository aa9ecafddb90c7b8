use std::{sync::Arc, time::Duration};

use chrono::Utc;
use engine::{Engine, gateway::MpesaGateway};
use migration::{Migrator, MigratorTrait};
use sea_orm::ConnectOptions;
use settings::Database;
use tokio::time::MissedTickBehavior;

mod settings;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let settings = settings::Settings::new()?;
    let mut tasks = tokio::task::JoinSet::new();

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "harambee={level},server={level},engine={level}",
            level = settings.app.level
        ))
        .init();

    let db = parse_database(&settings.database).await?;
    let gateway = MpesaGateway::new(settings.mpesa)?;
    let engine = Arc::new(
        Engine::builder()
            .database(db.clone())
            .gateway(Arc::new(gateway))
            .policy(settings.engine.policy())
            .build()
            .await?,
    );

    if let Some(server) = settings.server {
        let engine = engine.clone();
        let db = db.clone();
        tasks.spawn(async move {
            tracing::info!("Found server settings...");
            let bind = server.bind.unwrap_or_else(|| "127.0.0.1".to_string());
            let addr = format!("{}:{}", bind, server.port);
            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(listener) => listener,
                Err(err) => {
                    tracing::error!("failed to bind server listener: {err}");
                    return;
                }
            };
            if let Err(err) = server::run_with_listener(engine, db, listener).await {
                tracing::error!("server failed: {err}");
            }
        });
    }

    let poll = Duration::from_secs(settings.engine.recurring_poll_secs.max(1));
    tasks.spawn(async move {
        tracing::info!("Recurring poll every {}s", poll.as_secs());
        let mut interval = tokio::time::interval(poll);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(err) = engine.run_due_cycles(Utc::now()).await {
                tracing::error!("recurring poll failed: {err}");
            }
        }
    });

    while tasks.join_next().await.is_some() {
        tasks.shutdown().await;
    }

    Ok(())
}

async fn parse_database(
    config: &settings::Database,
) -> Result<sea_orm::DatabaseConnection, Box<dyn std::error::Error + Send + Sync>> {
    let mut options = match config {
        Database::Memory => {
            let mut options = ConnectOptions::new("sqlite::memory:");
            // Every pooled connection would see its own empty database.
            options.max_connections(1);
            options
        }
        Database::Sqlite(path) => ConnectOptions::new(format!("sqlite:{}?mode=rwc", path)),
    };
    options
        .connect_timeout(Duration::from_secs(5))
        .acquire_timeout(Duration::from_secs(5))
        .sqlx_logging(false);

    let database = sea_orm::Database::connect(options).await?;
    Migrator::up(&database, None).await?;
    Ok(database)
}
