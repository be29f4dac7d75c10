pub mod api;
mod middleware;
mod public;

pub use api::{ApiState, build_api_router as build_api_v1_router};
pub use middleware::RequestContext;
pub use public::{PublicState, build_router};

use crate::application::error::ErrorReport;
use axum::Router;
use axum::extract::FromRef;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sqlx::Error as SqlxError;

fn db_health_response(result: Result<(), SqlxError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::db_health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}

#[derive(Clone)]
pub struct RouterState {
    pub public: PublicState,
    pub api: ApiState,
}

impl FromRef<RouterState> for PublicState {
    fn from_ref(state: &RouterState) -> Self {
        state.public.clone()
    }
}

impl FromRef<RouterState> for ApiState {
    fn from_ref(state: &RouterState) -> Self {
        state.api.clone()
    }
}

/// Public site, subscription endpoints, webhooks and the admin API on one router.
pub fn build_app(state: RouterState) -> Router {
    build_router(state.clone())
        .merge(build_api_v1_router(state.clone()))
        .with_state(state)
}
