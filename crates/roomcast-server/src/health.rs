//! `/health` endpoint body.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"`, or `"draining"` once shutdown has begun.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open sockets across all rooms.
    pub connections: usize,
    /// Rooms with a running instance.
    pub rooms: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    connections: usize,
    rooms: usize,
    draining: bool,
) -> HealthResponse {
    HealthResponse {
        status: if draining { "draining" } else { "ok" },
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        rooms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_reflects_draining() {
        assert_eq!(health_check(Instant::now(), 0, 0, false).status, "ok");
        assert_eq!(health_check(Instant::now(), 0, 0, true).status, "draining");
    }

    #[test]
    fn uptime_counts_from_start() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        assert!(health_check(start, 0, 0, false).uptime_secs >= 59);
    }

    #[test]
    fn serialization() {
        let resp = health_check(Instant::now(), 4, 2, false);
        insta::assert_json_snapshot!(resp, { ".uptime_secs" => "[uptime]" }, @r###"
        {
          "status": "ok",
          "uptime_secs": "[uptime]",
          "connections": 4,
          "rooms": 2
        }
        "###);
    }
}
