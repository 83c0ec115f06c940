//! HTTP boundary for fileswap: token-gated download serving over axum.

pub mod server;

pub use server::{build_router, start_server, AppState};
