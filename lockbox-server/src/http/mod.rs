//! HTTP endpoints for lockbox-server.
//!
//! Provides health checks and Prometheus metrics.

pub mod health;
mod metrics;

use crate::server::Gateway;
use axum::{routing::get, Extension, Router};
use std::sync::Arc;

pub use health::{init_start_time, HealthStatus};

/// Build the HTTP router.
///
/// `/metrics` is only mounted when `http.metrics_enabled` is set.
pub fn build_router(gateway: Arc<Gateway>) -> Router {
    let mut router = Router::new().route("/health", get(health::health_handler));
    if gateway.config().http.metrics_enabled {
        router = router.route("/metrics", get(metrics::metrics_handler));
    }
    router.layer(Extension(gateway))
}
