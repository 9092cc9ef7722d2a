//! Client-facing transport.
//!
//! The actors never see sockets. This layer turns WebSocket frames into
//! registry calls and drains each participant's outbound queue back onto
//! the wire.

pub mod ws;

pub use ws::{ws_router, TransportState, CREATE_ROUTE_CODE};
