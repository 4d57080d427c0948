//! Parley API crate - axum HTTP server, chat streaming over SSE, session
//! lifecycle and feedback endpoints.

pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod routes;
pub mod sse;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
