//! HTTP surface for the enrichment trigger

#[cfg(feature = "server")]
pub mod enrichment_routes;

#[cfg(feature = "server")]
pub use enrichment_routes::{create_router, ApiResponse, AppState};
