//! Recurring schedule API endpoints

use api_types::schedule::Schedule;
use axum::{
    Extension, Json,
    extract::{Path, State},
};
use engine::RecurringSchedule;
use uuid::Uuid;

use crate::{ServerError, server::ServerState, user};

fn schedule_view(schedule: RecurringSchedule) -> Schedule {
    Schedule {
        id: schedule.id,
        campaign_id: schedule.campaign_id,
        amount_minor: schedule.amount_minor,
        frequency: schedule.frequency.as_str().to_string(),
        method: schedule.method.as_str().to_string(),
        next_due_date: schedule.next_due_date,
        status: schedule.status.as_str().to_string(),
        consecutive_failures: schedule.consecutive_failures,
    }
}

/// Donor cancellation of their schedule
pub async fn cancel(
    Extension(user): Extension<user::Model>,
    State(state): State<ServerState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Schedule>, ServerError> {
    let schedule = state.engine.cancel_schedule(&user.id, id).await?;
    Ok(Json(schedule_view(schedule)))
}

/// Staff reactivation of a paused schedule
pub async fn reactivate(
    Extension(user): Extension<user::Model>,
    State(state): State<ServerState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Schedule>, ServerError> {
    let schedule = state.engine.reactivate_schedule(&user.id, id).await?;
    Ok(Json(schedule_view(schedule)))
}
