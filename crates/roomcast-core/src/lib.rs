//! # roomcast-core
//!
//! Shared vocabulary for the roomcast server and client crates:
//!
//! - **Frames**: the `{type, channel?, data?}` wire envelope, its codec, and
//!   the routed-event wrapper used by channel/user addressing
//! - **Connection metadata**: `ConnectionMeta` (user, client, channels)
//! - **Branded IDs**: `ConnectionId`, `ClientId` as newtypes
//! - **Logging**: `tracing` subscriber bootstrap and an in-memory capture
//!   layer for tests

#![deny(unsafe_code)]

pub mod frame;
pub mod ids;
pub mod logging;
pub mod meta;

pub use frame::{Frame, FrameError};
pub use ids::{ClientId, ConnectionId};
pub use meta::{ConnectionMeta, DEFAULT_CHANNEL};
