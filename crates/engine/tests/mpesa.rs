use engine::gateway::{GatewayError, MpesaConfig, MpesaGateway, PushGateway, PushRequest};
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, header_exists, method, path, query_param},
};

fn config(base_url: &str) -> MpesaConfig {
    MpesaConfig {
        base_url: base_url.to_string(),
        consumer_key: "key".to_string(),
        consumer_secret: "secret".to_string(),
        shortcode: "174379".to_string(),
        passkey: "passkey".to_string(),
        callback_url: "https://harambee.example.org/api/payments/mpesa/callback".to_string(),
        transaction_type: "CustomerPayBillOnline".to_string(),
        timeout_secs: 5,
    }
}

fn request() -> PushRequest {
    PushRequest {
        phone: "254712345678".to_string(),
        amount_minor: 1000,
        donation_ref: "0f8c7a1d2e3b4c5d".to_string(),
        narrative: "Donation Clean Water".to_string(),
    }
}

async fn mount_token(server: &MockServer, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/oauth/v1/generate"))
        .and(query_param("grant_type", "client_credentials"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok-1",
            "expires_in": "3599"
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn push_sends_stk_request_and_returns_reference() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/mpesa/stkpush/v1/processrequest"))
        .and(header("authorization", "Bearer tok-1"))
        .and(body_partial_json(json!({
            "BusinessShortCode": "174379",
            "TransactionType": "CustomerPayBillOnline",
            "Amount": 10,
            "PartyA": "254712345678",
            "PartyB": "174379",
            "PhoneNumber": "254712345678",
            "CallBackURL": "https://harambee.example.org/api/payments/mpesa/callback",
            "AccountReference": "0f8c7a1d2e3b",
            "TransactionDesc": "Donation Clea"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "MerchantRequestID": "29115-34620561-1",
            "CheckoutRequestID": "ws_CO_191220191020363925",
            "ResponseCode": "0",
            "ResponseDescription": "Success. Request accepted for processing",
            "CustomerMessage": "Success. Request accepted for processing"
        })))
        .expect(2)
        .mount(&server)
        .await;

    let gateway = MpesaGateway::new(config(&server.uri())).unwrap();
    let accepted = gateway.initiate_push(request()).await.unwrap();
    assert_eq!(accepted.reference, "ws_CO_191220191020363925");
    assert_eq!(accepted.merchant_reference.as_deref(), Some("29115-34620561-1"));
    assert_eq!(accepted.raw["ResponseCode"], "0");

    // The cached token is reused.
    gateway.initiate_push(request()).await.unwrap();
}

#[tokio::test]
async fn non_zero_response_code_is_a_rejection() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/mpesa/stkpush/v1/processrequest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ResponseCode": "1",
            "ResponseDescription": "Invalid PhoneNumber"
        })))
        .mount(&server)
        .await;

    let gateway = MpesaGateway::new(config(&server.uri())).unwrap();
    let err = gateway.initiate_push(request()).await.unwrap_err();
    assert_eq!(err, GatewayError::Rejected("Invalid PhoneNumber".to_string()));
}

#[tokio::test]
async fn server_errors_mean_unavailable() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/mpesa/stkpush/v1/processrequest"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "errorCode": "503.001.01",
            "errorMessage": "Service Unavailable"
        })))
        .mount(&server)
        .await;

    let gateway = MpesaGateway::new(config(&server.uri())).unwrap();
    let err = gateway.initiate_push(request()).await.unwrap_err();
    assert!(matches!(err, GatewayError::Unavailable(msg) if msg.contains("503.001.01")));
}

#[tokio::test]
async fn unauthorized_push_drops_cached_token() {
    let server = MockServer::start().await;
    mount_token(&server, 2).await;
    Mock::given(method("POST"))
        .and(path("/mpesa/stkpush/v1/processrequest"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "errorCode": "404.001.03",
            "errorMessage": "Invalid Access Token"
        })))
        .mount(&server)
        .await;

    let gateway = MpesaGateway::new(config(&server.uri())).unwrap();
    let err = gateway.initiate_push(request()).await.unwrap_err();
    assert!(matches!(err, GatewayError::Rejected(_)));
    // A second push fetches a fresh token.
    gateway.initiate_push(request()).await.unwrap_err();
}

#[tokio::test]
async fn token_failure_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/oauth/v1/generate"))
        .respond_with(ResponseTemplate::new(400).set_body_string("Bad Request"))
        .mount(&server)
        .await;

    let gateway = MpesaGateway::new(config(&server.uri())).unwrap();
    let err = gateway.initiate_push(request()).await.unwrap_err();
    assert!(matches!(err, GatewayError::Rejected(msg) if msg.contains("400")));
}

#[tokio::test]
async fn fractional_amounts_never_reach_the_provider() {
    let server = MockServer::start().await;
    mount_token(&server, 0).await;

    let gateway = MpesaGateway::new(config(&server.uri())).unwrap();
    let mut push = request();
    push.amount_minor = 1050;
    let err = gateway.initiate_push(push).await.unwrap_err();
    assert!(matches!(err, GatewayError::Rejected(_)));
}

#[test]
fn missing_credentials_are_a_config_error() {
    let mut cfg = config("https://sandbox.safaricom.co.ke");
    cfg.passkey = String::new();
    let err = MpesaGateway::new(cfg).unwrap_err();
    assert_eq!(err, GatewayError::Config("mpesa.passkey must be set".to_string()));
}
