//! Realtime sync: wire events, dispatch, transport and the connection manager.

pub mod connection;
pub mod dispatcher;
pub mod events;
pub mod session;
pub mod transport;

pub use connection::{ConnectionStatus, SyncClient};
pub use dispatcher::{DispatchReport, EventDispatcher, HandlerError, HandlerResult, Subscription};
pub use events::{EventKind, SyncEvent, on};
pub use session::{AppState, spawn_lifecycle_listener};
pub use transport::{Transport, WebSocketTransport};
