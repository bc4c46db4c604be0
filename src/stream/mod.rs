//! The live channel: one server-pushed event stream per process, with a
//! polling fallback and bounded reconnection.

pub mod controller;
pub mod reconnect;
pub mod sse;
pub mod state;
pub mod transport;
mod worker;

pub use controller::{ConnectionHandle, ConnectionManager};
pub use reconnect::ReconnectPolicy;
pub use state::ConnectionState;
pub use transport::{
    EventStream, NegotiatedTransport, PollingTransport, SseTransport, StreamEvent, Transport,
};
