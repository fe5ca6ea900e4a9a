//! homesync: realtime synchronization core for the household task client.
//!
//! The client keeps one WebSocket connection to the server, joins the
//! active household's room and keeps a local query cache consistent with
//! the events the server pushes.
//!
//! # Architecture
//!
//! - **Connection manager** ([`realtime::connection`]): state machine,
//!   linear reconnect backoff, room replay after every open
//! - **Event dispatcher** ([`realtime::dispatcher`]): typed pub/sub over a
//!   closed set of event kinds
//! - **Cache reconciler** ([`cache::reconciler`]): idempotent task upserts,
//!   query invalidation, full invalidation on (re)connect
//! - **Room coordinator** ([`realtime::session`]): at most one joined
//!   household, foreground/background policy
//!
//! ```no_run
//! use std::sync::Arc;
//! use homesync::cache::MemoryQueryCache;
//! use homesync::credentials::StaticTokenStore;
//! use homesync::realtime::{SyncClient, WebSocketTransport, on};
//!
//! # async fn run() -> homesync::Result<()> {
//! let client = SyncClient::new(
//!     homesync::SyncConfig::default(),
//!     Arc::new(StaticTokenStore::new(Some("token".into()))),
//!     Arc::new(MemoryQueryCache::new()),
//!     Arc::new(WebSocketTransport::new()),
//! );
//! client.on::<on::TaskCreated, _>(|change| {
//!     println!("new task {}", change.task.title);
//!     Ok(())
//! });
//! client.join_room("household-1")?;
//! client.connect().await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod model;
pub mod realtime;
pub mod reminders;

pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use realtime::{ConnectionStatus, SyncClient};
