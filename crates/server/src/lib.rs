use axum::{Json, http::StatusCode, response::IntoResponse};
use engine::EngineError;

use api_types::ErrorBody;
pub use server::{ServerState, app, run_with_listener};

mod campaigns;
mod donations;
mod payments;
mod schedules;
mod server;
mod user;

pub mod types {
    pub mod donation {
        pub use api_types::donation::{Donation, DonationNew};
    }

    pub mod payment {
        pub use api_types::payment::{PaymentAttempt, PaymentBegin, PaymentStarted, PaymentStatus};
    }

    pub mod reconciliation {
        pub use api_types::reconciliation::ClaimDecision;
    }

    pub mod campaign {
        pub use api_types::campaign::Campaign;
    }

    pub mod schedule {
        pub use api_types::schedule::Schedule;
    }
}

pub enum ServerError {
    Engine(EngineError),
    Generic(String),
}

fn status_for_engine_error(err: &EngineError) -> StatusCode {
    match err {
        EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
        EngineError::CampaignNotFound(_)
        | EngineError::DonationNotFound(_)
        | EngineError::ScheduleNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::InvalidState(_) | EngineError::CampaignInactive(_) => StatusCode::CONFLICT,
        EngineError::InvalidPhone(_)
        | EngineError::InvalidAmount(_)
        | EngineError::Validation(_)
        | EngineError::UnsupportedFrequency(_)
        | EngineError::MalformedCallback(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::ProviderRejected(_) => StatusCode::BAD_GATEWAY,
        EngineError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn message_for_engine_error(err: EngineError) -> String {
    match err {
        EngineError::Database(db_err) => {
            tracing::error!("database error: {db_err}");
            "internal server error".to_string()
        }
        other => other.to_string(),
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        let (status, code, error) = match self {
            ServerError::Engine(err) => (
                status_for_engine_error(&err),
                err.code().to_string(),
                message_for_engine_error(err),
            ),
            ServerError::Generic(err) => (StatusCode::BAD_REQUEST, "bad_request".to_string(), err),
        };

        (status, Json(ErrorBody { code, error })).into_response()
    }
}

impl From<EngineError> for ServerError {
    fn from(value: EngineError) -> Self {
        Self::Engine(value)
    }
}
