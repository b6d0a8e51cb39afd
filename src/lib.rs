//! Client-side reliable messaging layer for the Slidewire presentation
//! backend: one persistent WebSocket per session, turned into a dependable
//! request/response and event-dispatch facility.

pub mod config;
pub mod error;
pub mod protocol;
pub mod session;

pub use config::{SessionConfig, SessionConfigBuilder};
pub use error::SessionError;
pub use protocol::EventKind;
pub use session::{ConnectionState, SessionCallbacks, SessionStatus, SlideSession};
