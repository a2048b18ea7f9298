//! Prometheus metrics endpoint.

use crate::server::Gateway;
use crate::storage::StorageStats;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use lockbox_types::RequestKind;
use std::fmt::Write;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format.
pub async fn metrics_handler(Extension(gateway): Extension<Arc<Gateway>>) -> impl IntoResponse {
    // Row counts are best effort
    let stats = match gateway.storage().stats().await {
        Ok(stats) => stats,
        Err(e) => {
            tracing::warn!("metrics: storage stats unavailable: {}", e);
            StorageStats::default()
        }
    };

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        render(&gateway, stats),
    )
}

fn render(gateway: &Gateway, stats: StorageStats) -> String {
    let m = gateway.metrics();
    let connections = gateway.active_connections();
    let conns_total = m.connections_total.load(Ordering::Relaxed);
    let auth_failures = m.auth_failures.load(Ordering::Relaxed);
    let key_derivations = m.key_derivations.load(Ordering::Relaxed);
    let internal_failures = m.internal_failures.load(Ordering::Relaxed);
    let bytes_rx = m.bytes_received.load(Ordering::Relaxed);
    let bytes_tx = m.bytes_sent.load(Ordering::Relaxed);
    let rate_limits = m.rate_limit_hits.load(Ordering::Relaxed);
    let swept = m.release_keys_swept.load(Ordering::Relaxed);

    let mut body = format!(
        r#"# HELP lockbox_connections_active Number of open client connections
# TYPE lockbox_connections_active gauge
lockbox_connections_active {connections}

# HELP lockbox_info Server information
# TYPE lockbox_info gauge
lockbox_info{{version="{version}"}} 1

# HELP lockbox_connections_total Total connections accepted
# TYPE lockbox_connections_total counter
lockbox_connections_total {conns_total}

# HELP lockbox_auth_failures_total Requests rejected for a wrong key
# TYPE lockbox_auth_failures_total counter
lockbox_auth_failures_total {auth_failures}

# HELP lockbox_key_derivations_total Argon2 derivations run for auth keys
# TYPE lockbox_key_derivations_total counter
lockbox_key_derivations_total {key_derivations}

# HELP lockbox_internal_failures_total Requests answered with a generic failure
# TYPE lockbox_internal_failures_total counter
lockbox_internal_failures_total {internal_failures}

# HELP lockbox_bytes_received_total Total frame payload bytes received
# TYPE lockbox_bytes_received_total counter
lockbox_bytes_received_total {bytes_rx}

# HELP lockbox_bytes_sent_total Total frame payload bytes sent
# TYPE lockbox_bytes_sent_total counter
lockbox_bytes_sent_total {bytes_tx}

# HELP lockbox_rate_limit_hits_total Total rate limit rejections
# TYPE lockbox_rate_limit_hits_total counter
lockbox_rate_limit_hits_total {rate_limits}

# HELP lockbox_release_keys_swept_total Expired release keys deleted by cleanup
# TYPE lockbox_release_keys_swept_total counter
lockbox_release_keys_swept_total {swept}

# HELP lockbox_storage_users Number of user accounts
# TYPE lockbox_storage_users gauge
lockbox_storage_users {users}

# HELP lockbox_storage_items Number of items
# TYPE lockbox_storage_items gauge
lockbox_storage_items {items}

# HELP lockbox_storage_release_keys Number of stored release keys
# TYPE lockbox_storage_release_keys gauge
lockbox_storage_release_keys {release_keys}

# HELP lockbox_requests_total Requests dispatched, by kind
# TYPE lockbox_requests_total counter
"#,
        version = env!("CARGO_PKG_VERSION"),
        users = stats.users,
        items = stats.items,
        release_keys = stats.release_keys,
    );

    for kind in RequestKind::ALL {
        // Writing to a String cannot fail
        let _ = writeln!(
            body,
            "lockbox_requests_total{{kind=\"{}\"}} {}",
            kind.as_str(),
            m.requests(kind)
        );
    }
    body
}
