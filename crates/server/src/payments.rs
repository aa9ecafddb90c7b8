//! Payment API endpoints: starting payments, provider callbacks and staff
//! reconciliation of manual claims.

use api_types::{
    donation::Donation,
    payment::{PaymentBegin, PaymentStarted},
    reconciliation::ClaimDecision,
};
use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
};
use engine::{BeginPaymentCmd, ManualClaim};
use serde_json::Value;
use uuid::Uuid;

use crate::{ServerError, donations::donation_view, server::ServerState, user};

/// Start paying a pending donation
pub async fn begin(
    Extension(user): Extension<user::Model>,
    State(state): State<ServerState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PaymentBegin>,
) -> Result<(StatusCode, Json<PaymentStarted>), ServerError> {
    let cmd = match payload {
        PaymentBegin::Mpesa { phone } => BeginPaymentCmd::mobile_money(id, user.id, phone),
        PaymentBegin::Manual {
            reference,
            receipt_url,
        } => {
            let mut claim = ManualClaim::new(reference);
            if let Some(url) = receipt_url {
                claim = claim.receipt_url(url);
            }
            BeginPaymentCmd::manual(id, user.id, claim)
        }
    };

    let handle = state.engine.begin_payment(cmd).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(PaymentStarted {
            donation_id: handle.donation_id,
            payment_id: handle.payment_id,
            provider: handle.provider,
            reference: handle.reference,
            state: handle.state.as_str().to_string(),
            customer_message: handle.customer_message,
        }),
    ))
}

/// M-Pesa STK callback. Always answered with the provider acknowledgment.
pub async fn mpesa_callback(State(state): State<ServerState>, body: Bytes) -> Json<Value> {
    let outcome = state.engine.apply_callback(&body).await;
    tracing::debug!("callback handled: {:?}", outcome.disposition);
    Json(outcome.ack().clone())
}

/// Staff confirmation of a manual payment claim
pub async fn confirm(
    Extension(user): Extension<user::Model>,
    State(state): State<ServerState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ClaimDecision>,
) -> Result<Json<Donation>, ServerError> {
    let donation = state
        .engine
        .confirm_bank_transfer(id, &user.id, &payload.reference)
        .await?;
    Ok(Json(donation_view(&donation)))
}

/// Staff rejection of a manual payment claim
pub async fn reject(
    Extension(user): Extension<user::Model>,
    State(state): State<ServerState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ClaimDecision>,
) -> Result<Json<Donation>, ServerError> {
    let Some(reason) = payload.reason.filter(|r| !r.trim().is_empty()) else {
        return Err(ServerError::Generic("reason required".to_string()));
    };

    let donation = state
        .engine
        .reject_bank_transfer(id, &user.id, &payload.reference, &reason)
        .await?;
    Ok(Json(donation_view(&donation)))
}
