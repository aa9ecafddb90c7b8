use axum::{
    Router,
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use axum_extra::{
    TypedHeader,
    headers::{Error as AxumError, Header},
};
use sea_orm::{DatabaseConnection, EntityTrait};

use std::sync::Arc;

use crate::{campaigns, donations, payments, schedules, user};
use engine::Engine;

static USER_HEADER: axum::http::HeaderName = axum::http::HeaderName::from_static("x-user-id");

#[derive(Clone)]
pub struct ServerState {
    pub engine: Arc<Engine>,
    pub db: DatabaseConnection,
}

/// `TypedHeader` for the caller identity.
///
/// The API sits behind a gateway that authenticates users and forwards their
/// id in the "x-user-id" header.
#[derive(Debug)]
struct UserHeader(String);

impl Header for UserHeader {
    fn name() -> &'static axum::http::HeaderName {
        &USER_HEADER
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, AxumError>
    where
        Self: Sized,
        I: Iterator<Item = &'i axum::http::HeaderValue>,
    {
        let value = values.next().ok_or_else(AxumError::invalid)?;
        let Ok(value) = value.to_str() else {
            return Err(AxumError::invalid());
        };
        let value = value.trim();
        if value.is_empty() {
            return Err(AxumError::invalid());
        }

        Ok(UserHeader(value.to_string()))
    }

    fn encode<E: Extend<axum::http::HeaderValue>>(&self, values: &mut E) {
        match axum::http::HeaderValue::from_str(&self.0) {
            Ok(value) => values.extend(std::iter::once(value)),
            Err(_) => tracing::error!("failed to encode x-user-id header"),
        }
    }
}

async fn auth(
    user_header: Option<TypedHeader<UserHeader>>,
    State(state): State<ServerState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(TypedHeader(UserHeader(user_id))) = user_header else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    let user = user::Entity::find_by_id(user_id)
        .one(&state.db)
        .await
        .map_err(|err| {
            tracing::error!("failed to load caller: {err}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

fn router(state: ServerState) -> Router {
    let authenticated = Router::new()
        .route("/donations", post(donations::donation_new))
        .route("/donations/{id}", get(donations::status))
        .route("/donations/{id}/cancel", post(donations::cancel))
        .route("/donations/{id}/payments", post(payments::begin))
        .route("/donations/{id}/confirm", post(payments::confirm))
        .route("/donations/{id}/reject", post(payments::reject))
        .route("/campaigns/{id}", get(campaigns::get))
        .route("/schedules/{id}/cancel", post(schedules::cancel))
        .route("/schedules/{id}/reactivate", post(schedules::reactivate))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth));

    // The provider cannot authenticate as a user.
    let callbacks = Router::new().route("/payments/mpesa/callback", post(payments::mpesa_callback));

    authenticated.merge(callbacks).with_state(state)
}

/// Build the API router around a shared engine.
pub fn app(engine: Arc<Engine>, db: DatabaseConnection) -> Router {
    router(ServerState { engine, db })
}

pub async fn run_with_listener(
    engine: Arc<Engine>,
    db: DatabaseConnection,
    listener: tokio::net::TcpListener,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app(engine, db)).await
}
