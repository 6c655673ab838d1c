//! API module for the fanboy daemon
//!
//! Contains the REST and WebSocket front end with the Axum router and handlers.

pub(crate) mod handlers;

use crate::shutdown::ShutdownTrigger;
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use fanboy_hardware::FanDriver;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// Application state shared across all handlers
#[derive(Clone)]
pub(crate) struct AppState {
    /// Running fan driver
    pub driver: Arc<FanDriver>,
    /// Fired by `/stop` and by OS signals
    pub shutdown: ShutdownTrigger,
    /// Server start time for uptime calculation
    pub start_time: Instant,
}

impl AppState {
    pub fn new(driver: Arc<FanDriver>, shutdown: ShutdownTrigger) -> Self {
        Self {
            driver,
            shutdown,
            start_time: Instant::now(),
        }
    }
}

/// Create the main API router with all endpoints
pub(crate) fn create_router(state: AppState) -> Router {
    info!("Setting up API router...");

    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any);

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(64 * 1024));

    Router::new()
        // Fan status and control endpoints
        .route(
            "/fans",
            get(handlers::fans::list_fans).post(handlers::fans::set_all_fans),
        )
        .route(
            "/fans/:id",
            get(handlers::fans::get_fan).post(handlers::fans::set_fan),
        )
        // Live updates
        .route("/ws", get(handlers::ws::ws_handler))
        // Service endpoints
        .route("/stop", get(handlers::info::stop))
        .route("/", get(handlers::info::root))
        .layer(middleware_stack)
        .with_state(state)
}

/// Error handling utilities
pub(crate) mod error {
    use axum::{
        http::StatusCode,
        response::{IntoResponse, Response},
        Json,
    };
    use fanboy_core::{api::ApiResponse, FanboyError};

    use tracing::error;

    /// Custom error type for API responses
    #[derive(Debug)]
    pub struct ApiError {
        pub status_code: StatusCode,
        pub message: String,
    }

    impl ApiError {
        pub fn new(status_code: StatusCode, message: impl Into<String>) -> Self {
            Self {
                status_code,
                message: message.into(),
            }
        }

        pub fn bad_request(message: impl Into<String>) -> Self {
            Self::new(StatusCode::BAD_REQUEST, message)
        }

        pub fn internal_error(message: impl Into<String>) -> Self {
            Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
        }

        /// Hardware link or driver unavailable
        pub fn service_unavailable(message: impl Into<String>) -> Self {
            Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
        }
    }

    impl IntoResponse for ApiError {
        fn into_response(self) -> Response {
            error!("API Error {}: {}", self.status_code, self.message);

            let response: ApiResponse<()> = ApiResponse::error(self.message);

            (self.status_code, Json(response)).into_response()
        }
    }

    impl From<FanboyError> for ApiError {
        fn from(err: FanboyError) -> Self {
            match err {
                FanboyError::InvalidInput(_) | FanboyError::InvalidChannel { .. } => {
                    Self::bad_request(err.to_string())
                }
                FanboyError::DriverStopped
                | FanboyError::Io(_)
                | FanboyError::Timeout(_)
                | FanboyError::Protocol(_)
                | FanboyError::Connect { .. }
                | FanboyError::FatalCommand { .. } => Self::service_unavailable(err.to_string()),
                _ => Self::internal_error(err.to_string()),
            }
        }
    }
}

/// Helper macros for common responses
#[macro_export]
macro_rules! api_ok {
    ($data:expr) => {
        Ok(axum::Json(fanboy_core::api::ApiResponse::success($data)))
    };
}

#[macro_export]
macro_rules! api_fail {
    ($message:expr) => {
        Err($crate::api::error::ApiError::bad_request($message))
    };
}
