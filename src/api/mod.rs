//! HTTP surface for the decoder, built on axum.

pub mod routes;
pub mod server;

pub use server::{build_router, start_server, AppState};
