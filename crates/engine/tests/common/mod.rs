#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement};
use serde_json::{Value, json};

use engine::{
    Engine, EnginePolicy, Notification,
    gateway::{
        CallbackResult, GatewayError, PushAccepted, PushGateway, PushRequest,
        mpesa::{accepted_ack, parse_stk_callback},
    },
    notify::{NotificationSink, NotifyError},
};
use migration::MigratorTrait;

/// Push gateway that accepts every push unless told otherwise.
#[derive(Debug, Default)]
pub struct FakeGateway {
    pushes: Mutex<Vec<PushRequest>>,
    failures: Mutex<Vec<GatewayError>>,
}

impl FakeGateway {
    /// Queue an error for the next push.
    pub fn fail_next(&self, err: GatewayError) {
        self.failures.lock().unwrap().push(err);
    }

    pub fn pushes(&self) -> Vec<PushRequest> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushGateway for FakeGateway {
    fn provider(&self) -> &'static str {
        "mpesa"
    }

    async fn initiate_push(&self, request: PushRequest) -> Result<PushAccepted, GatewayError> {
        let queued = {
            let mut failures = self.failures.lock().unwrap();
            if failures.is_empty() {
                None
            } else {
                Some(failures.remove(0))
            }
        };
        if let Some(err) = queued {
            return Err(err);
        }

        let mut pushes = self.pushes.lock().unwrap();
        pushes.push(request);
        let reference = format!("ws_CO_{:04}", pushes.len());
        Ok(PushAccepted {
            reference: reference.clone(),
            merchant_reference: Some(format!("mr-{}", pushes.len())),
            customer_message: Some("Success. Request accepted for processing".to_string()),
            raw: json!({ "CheckoutRequestID": reference, "ResponseCode": "0" }),
        })
    }

    fn parse_callback(&self, raw: &[u8]) -> Result<CallbackResult, GatewayError> {
        parse_stk_callback(raw)
    }

    fn ack(&self) -> Value {
        accepted_ack()
    }
}

/// Notification sink that keeps everything in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    broken: Mutex<bool>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn break_delivery(&self) {
        *self.broken.lock().unwrap() = true;
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        if *self.broken.lock().unwrap() {
            return Err(NotifyError::Delivery("smtp relay down".to_string()));
        }
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

pub struct Harness {
    pub engine: Engine,
    pub db: DatabaseConnection,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<RecordingNotifier>,
}

pub async fn harness() -> Harness {
    harness_with_policy(EnginePolicy::default()).await
}

pub async fn harness_with_policy(policy: EnginePolicy) -> Harness {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();

    insert_user(&db, "alice", "donor").await;
    insert_user(&db, "bob", "donor").await;
    insert_user(&db, "amina", "admin").await;
    insert_user(&db, "otieno", "finance").await;
    insert_campaign(&db, "water", "Clean Water", "active").await;

    let gateway = Arc::new(FakeGateway::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = Engine::builder()
        .database(db.clone())
        .gateway(gateway.clone())
        .notifier(notifier.clone())
        .policy(policy)
        .build()
        .await
        .unwrap();

    Harness {
        engine,
        db,
        gateway,
        notifier,
    }
}

pub async fn insert_user(db: &DatabaseConnection, id: &str, role: &str) {
    let backend = db.get_database_backend();
    db.execute(Statement::from_sql_and_values(
        backend,
        "INSERT INTO users (id, display_name, role, created_at) VALUES (?, ?, ?, ?)",
        vec![id.into(), id.into(), role.into(), Utc::now().into()],
    ))
    .await
    .unwrap();
}

pub async fn insert_campaign(db: &DatabaseConnection, id: &str, title: &str, status: &str) {
    let backend = db.get_database_backend();
    db.execute(Statement::from_sql_and_values(
        backend,
        "INSERT INTO campaigns (id, title, status, goal_minor, current_minor, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
        vec![
            id.into(),
            title.into(),
            status.into(),
            10_000_000_i64.into(),
            0_i64.into(),
            Utc::now().into(),
        ],
    ))
    .await
    .unwrap();
}

pub async fn count_rows(db: &DatabaseConnection, table: &str) -> i64 {
    let backend = db.get_database_backend();
    let row = db
        .query_one(Statement::from_string(
            backend,
            format!("SELECT COUNT(*) AS n FROM {table}"),
        ))
        .await
        .unwrap()
        .unwrap();
    row.try_get::<i64>("", "n").unwrap()
}

pub fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).unwrap()
}

pub fn success_callback(reference: &str, amount_units: i64) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": reference,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {
                    "Item": [
                        { "Name": "Amount", "Value": amount_units },
                        { "Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV" },
                        { "Name": "TransactionDate", "Value": 20240115102115_i64 },
                        { "Name": "PhoneNumber", "Value": 254712345678_i64 }
                    ]
                }
            }
        }
    }))
    .unwrap()
}

pub fn failure_callback(reference: &str, code: i64) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": reference,
                "ResultCode": code,
                "ResultDesc": "Request cancelled by user"
            }
        }
    }))
    .unwrap()
}
