//! Campaign API endpoints

use api_types::campaign::Campaign;
use axum::{
    Json,
    extract::{Path, State},
};

use crate::{ServerError, server::ServerState};

/// Handle requests for a campaign and its running total
pub async fn get(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Json<Campaign>, ServerError> {
    let campaign = state.engine.campaign(&id).await?;

    Ok(Json(Campaign {
        id: campaign.id,
        title: campaign.title,
        status: campaign.status.as_str().to_string(),
        goal_minor: campaign.goal_minor,
        current_minor: campaign.current_minor,
    }))
}
