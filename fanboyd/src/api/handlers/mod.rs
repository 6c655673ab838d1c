//! API request handlers for the fanboy daemon.
//!
//! - [`info`] - Service identification and the stop endpoint
//! - [`fans`] - Channel snapshots and speed control
//! - [`ws`] - WebSocket live updates
//!
//! REST handlers take `State<AppState>` and return
//! `Result<Json<ApiResponse<T>>, ApiError>`, built with the `api_ok!()` and
//! `api_fail!()` macros.

pub mod fans;
pub mod info;
pub mod ws;
