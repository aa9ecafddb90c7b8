use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement};
use serde_json::{Value, json};
use tower::ServiceExt;

use engine::{
    Engine,
    gateway::{
        CallbackResult, GatewayError, PushAccepted, PushGateway, PushRequest,
        mpesa::{accepted_ack, parse_stk_callback},
    },
};
use migration::MigratorTrait;

#[derive(Debug)]
struct AcceptingGateway;

#[async_trait]
impl PushGateway for AcceptingGateway {
    fn provider(&self) -> &'static str {
        "mpesa"
    }

    async fn initiate_push(&self, request: PushRequest) -> Result<PushAccepted, GatewayError> {
        Ok(PushAccepted {
            reference: format!("ws_CO_{}", request.donation_ref),
            merchant_reference: None,
            customer_message: Some("Enter your M-PESA PIN".to_string()),
            raw: json!({ "ResponseCode": "0" }),
        })
    }

    fn parse_callback(&self, raw: &[u8]) -> Result<CallbackResult, GatewayError> {
        parse_stk_callback(raw)
    }

    fn ack(&self) -> Value {
        accepted_ack()
    }
}

async fn seed(db: &DatabaseConnection, sql: &str, values: Vec<sea_orm::Value>) {
    db.execute(Statement::from_sql_and_values(
        db.get_database_backend(),
        sql,
        values,
    ))
    .await
    .unwrap();
}

async fn app() -> Router {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    for (id, role) in [("alice", "donor"), ("bob", "donor"), ("amina", "admin")] {
        seed(
            &db,
            "INSERT INTO users (id, display_name, role, created_at) VALUES (?, ?, ?, ?)",
            vec![id.into(), id.into(), role.into(), chrono::Utc::now().into()],
        )
        .await;
    }
    seed(
        &db,
        "INSERT INTO campaigns (id, title, status, goal_minor, current_minor, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
        vec![
            "water".into(),
            "Clean Water".into(),
            "active".into(),
            5_000_000_i64.into(),
            0_i64.into(),
            chrono::Utc::now().into(),
        ],
    )
    .await;

    let engine = Engine::builder()
        .database(db.clone())
        .gateway(Arc::new(AcceptingGateway))
        .build()
        .await
        .unwrap();
    server::app(Arc::new(engine), db)
}

async fn call(app: &Router, method: &str, uri: &str, user: Option<&str>, body: Value) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user) = user {
        request = request.header("x-user-id", user);
    }
    let request = request.body(Body::from(body.to_string())).unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn requests_without_known_caller_are_unauthorized() {
    let app = app().await;

    let (status, _) = call(&app, "GET", "/campaigns/water", None, Value::Null).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&app, "GET", "/campaigns/water", Some("mallory"), Value::Null).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn mobile_money_donation_end_to_end() {
    let app = app().await;

    let (status, donation) = call(
        &app,
        "POST",
        "/donations",
        Some("alice"),
        json!({ "campaign_id": "water", "amount_minor": 1000, "method": "mpesa" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(donation["state"], "pending");
    assert_eq!(donation["method"], "mobile_money");
    let id = donation["id"].as_str().unwrap().to_string();

    let (status, started) = call(
        &app,
        "POST",
        &format!("/donations/{id}/payments"),
        Some("alice"),
        json!({ "kind": "mpesa", "phone": "0712345678" }),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(started["state"], "processing");
    let reference = started["reference"].as_str().unwrap().to_string();

    let callback = json!({
        "Body": { "stkCallback": {
            "MerchantRequestID": "1",
            "CheckoutRequestID": reference,
            "ResultCode": 0,
            "ResultDesc": "The service request is processed successfully.",
            "CallbackMetadata": { "Item": [
                { "Name": "Amount", "Value": 10 },
                { "Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV" }
            ]}
        }}
    });
    let (status, ack) = call(&app, "POST", "/payments/mpesa/callback", None, callback).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack, json!({ "ResultCode": 0, "ResultDesc": "Accepted" }));

    let (status, payment) =
        call(&app, "GET", &format!("/donations/{id}"), Some("alice"), Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payment["donation"]["state"], "completed");
    assert_eq!(payment["latest_attempt"]["status"], "confirmed");

    let (_, campaign) = call(&app, "GET", "/campaigns/water", Some("bob"), Value::Null).await;
    assert_eq!(campaign["current_minor"], 1000);

    // Other donors cannot see it.
    let (status, body) =
        call(&app, "GET", &format!("/donations/{id}"), Some("bob"), Value::Null).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "donation_not_found");
}

#[tokio::test]
async fn garbage_callbacks_are_still_acknowledged() {
    let app = app().await;

    let request = Request::builder()
        .method("POST")
        .uri("/payments/mpesa/callback")
        .body(Body::from("definitely not json"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn engine_errors_carry_their_code() {
    let app = app().await;

    let (status, body) = call(
        &app,
        "POST",
        "/donations",
        Some("alice"),
        json!({ "campaign_id": "water", "amount_minor": 1000, "method": "card", "frequency": "weekly" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "unsupported_frequency");

    let (status, body) = call(
        &app,
        "POST",
        "/donations",
        Some("alice"),
        json!({ "campaign_id": "roads", "amount_minor": 1000, "method": "card" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "campaign_not_found");
}

#[tokio::test]
async fn bank_transfer_reconciliation_flow() {
    let app = app().await;

    let (_, donation) = call(
        &app,
        "POST",
        "/donations",
        Some("alice"),
        json!({ "campaign_id": "water", "amount_minor": 250000, "method": "bank_transfer" }),
    )
    .await;
    let id = donation["id"].as_str().unwrap().to_string();

    let (status, _) = call(
        &app,
        "POST",
        &format!("/donations/{id}/payments"),
        Some("alice"),
        json!({ "kind": "manual", "reference": "FT24015ABC" }),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = call(
        &app,
        "POST",
        &format!("/donations/{id}/confirm"),
        Some("bob"),
        json!({ "reference": "FT24015ABC" }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");

    let (status, body) = call(
        &app,
        "POST",
        &format!("/donations/{id}/reject"),
        Some("amina"),
        json!({ "reference": "FT24015ABC" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");

    let (status, confirmed) = call(
        &app,
        "POST",
        &format!("/donations/{id}/confirm"),
        Some("amina"),
        json!({ "reference": "FT24015ABC" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(confirmed["state"], "completed");

    let (status, body) = call(
        &app,
        "POST",
        &format!("/donations/{id}/cancel"),
        Some("alice"),
        Value::Null,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "invalid_state");
}
