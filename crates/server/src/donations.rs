//! Donation API endpoints

use api_types::{
    donation::{Donation, DonationNew},
    payment::{PaymentAttempt, PaymentStatus},
};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;
use engine::{CreateDonationCmd, EngineError, Frequency, PaymentMethod};
use uuid::Uuid;

use crate::{ServerError, server::ServerState, user};

pub(crate) fn donation_view(donation: &engine::Donation) -> Donation {
    Donation {
        id: donation.id,
        campaign_id: donation.campaign_id.clone(),
        donor_id: donation.donor_id.clone(),
        amount_minor: donation.amount_minor,
        fee_minor: donation.fee_minor,
        net_minor: donation.net_minor,
        method: donation.method.as_str().to_string(),
        state: donation.state.as_str().to_string(),
        is_recurring: donation.is_recurring,
        frequency: donation.frequency.map(|f| f.as_str().to_string()),
        is_anonymous: donation.is_anonymous,
        dedication_message: donation.dedication_message.clone(),
        transaction_reference: donation.transaction_reference.clone(),
        needs_review: donation.needs_review,
        created_at: donation.created_at,
        completed_at: donation.completed_at,
    }
}

fn attempt_view(attempt: &engine::PaymentAttempt) -> PaymentAttempt {
    PaymentAttempt {
        id: attempt.id,
        provider: attempt.provider.clone(),
        reference: attempt.provider_reference.clone(),
        amount_minor: attempt.amount_minor,
        status: attempt.confirmation_status.as_str().to_string(),
        receipt_number: attempt.receipt_number.clone(),
        created_at: attempt.created_at,
    }
}

/// Handle requests for pledging a new donation
pub async fn donation_new(
    Extension(user): Extension<user::Model>,
    State(state): State<ServerState>,
    Json(payload): Json<DonationNew>,
) -> Result<(StatusCode, Json<Donation>), ServerError> {
    let method = PaymentMethod::try_from(payload.method.as_str())?;
    let mut cmd = CreateDonationCmd::new(
        user.id,
        payload.campaign_id,
        payload.amount_minor,
        method,
        Utc::now(),
    )
    .anonymous(payload.is_anonymous);
    if let Some(frequency) = payload.frequency.as_deref() {
        cmd = cmd.recurring(Frequency::try_from(frequency)?);
    }
    if let Some(message) = payload.dedication_message {
        cmd = cmd.dedication(message);
    }
    if let Some(key) = payload.idempotency_key {
        cmd = cmd.idempotency_key(key);
    }

    let donation = state.engine.create_donation(cmd).await?;
    Ok((StatusCode::CREATED, Json(donation_view(&donation))))
}

/// Donation with its latest payment attempt. Visible to its donor and staff.
pub async fn status(
    Extension(user): Extension<user::Model>,
    State(state): State<ServerState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentStatus>, ServerError> {
    let (donation, latest) = state.engine.payment_status(id).await?;
    if donation.donor_id != user.id && !user.is_staff() {
        return Err(EngineError::DonationNotFound(id.to_string()).into());
    }

    Ok(Json(PaymentStatus {
        donation: donation_view(&donation),
        latest_attempt: latest.as_ref().map(attempt_view),
    }))
}

/// Donor cancellation of a pending donation
pub async fn cancel(
    Extension(user): Extension<user::Model>,
    State(state): State<ServerState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Donation>, ServerError> {
    let donation = state.engine.cancel_donation(id, &user.id).await?;
    Ok(Json(donation_view(&donation)))
}
