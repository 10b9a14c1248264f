//! Socket plumbing: per-socket state, liveness checks, and the session loop.

pub mod connection;
pub mod heartbeat;
pub mod session;
