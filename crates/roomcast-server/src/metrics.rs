//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Returns the handle that renders `/metrics`. Fails if a recorder is
/// already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric names shared across modules.

/// WebSocket upgrades accepted by the gateway (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "roomcast_ws_connections_total";
/// WebSocket sockets closed (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "roomcast_ws_disconnections_total";
/// Open WebSocket sockets (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "roomcast_ws_connections_active";
/// Sockets closed for missing heartbeats (counter).
pub const WS_HEARTBEAT_TIMEOUTS_TOTAL: &str = "roomcast_ws_heartbeat_timeouts_total";
/// Sockets admitted into a room (counter).
pub const CONNECTIONS_ACCEPTED_TOTAL: &str = "roomcast_connections_accepted_total";
/// Sockets refused during the handshake (counter).
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roomcast_connections_rejected_total";
/// Inbound frames (counter).
pub const FRAMES_RECEIVED_TOTAL: &str = "roomcast_frames_received_total";
/// Inbound frames dropped as malformed (counter).
pub const FRAMES_MALFORMED_TOTAL: &str = "roomcast_frames_malformed_total";
/// Outbound frames queued on a socket (counter).
pub const FRAMES_DELIVERED_TOTAL: &str = "roomcast_frames_delivered_total";
/// Outbound frames that did not reach a socket (counter).
pub const FRAMES_DROPPED_TOTAL: &str = "roomcast_frames_dropped_total";
/// Registry entries pruned during fan-out (counter).
pub const SESSIONS_PRUNED_TOTAL: &str = "roomcast_sessions_pruned_total";
/// Sessions restored by reconciliation (counter).
pub const SESSIONS_RESTORED_TOTAL: &str = "roomcast_sessions_restored_total";
/// Open sockets skipped by reconciliation (counter).
pub const SESSIONS_SKIPPED_TOTAL: &str = "roomcast_sessions_skipped_total";
/// Events that reached at least one handler (counter).
pub const EVENTS_DISPATCHED_TOTAL: &str = "roomcast_events_dispatched_total";
/// Handler failures (counter, labels: kind).
pub const HANDLER_ERRORS_TOTAL: &str = "roomcast_handler_errors_total";
/// Time spent in one event handler (histogram).
pub const EVENT_HANDLER_DURATION_SECONDS: &str = "roomcast_event_handler_duration_seconds";
/// Room instances started, first boot or after hibernation (counter).
pub const ROOMS_STARTED_TOTAL: &str = "roomcast_rooms_started_total";
