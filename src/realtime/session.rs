//! Household room tracking and app lifecycle policy.
//!
//! At most one household room is joined per connection. The tracker decides
//! which control messages a join or leave produces; the connection manager
//! sends them and replays the join after every (re)connection.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use super::connection::SyncClient;
use super::events::ClientMessage;
use crate::config::LifecycleConfig;

/// Foreground state reported by the host app.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppState {
    #[default]
    Active,
    /// Transitional state (incoming call, app switcher).
    Inactive,
    Background,
}

impl AppState {
    pub fn is_foreground(self) -> bool {
        self == Self::Active
    }
}

/// What the connection should do after an app state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Connect,
    Disconnect,
    Nothing,
}

/// Decide how to react to `previous -> next`.
///
/// Returning to the foreground reconnects only when a room is known; there
/// is nothing to listen to otherwise. Leaving the foreground disconnects
/// unless the config keeps the socket alive in the background.
pub fn lifecycle_action(
    previous: AppState,
    next: AppState,
    has_room: bool,
    config: &LifecycleConfig,
) -> LifecycleAction {
    match (previous.is_foreground(), next.is_foreground()) {
        (false, true) if has_room => LifecycleAction::Connect,
        (_, false) if config.disconnect_in_background => LifecycleAction::Disconnect,
        _ => LifecycleAction::Nothing,
    }
}

/// Forward app state changes from `states` to `client` until either side goes away.
pub fn spawn_lifecycle_listener(
    client: SyncClient,
    mut states: watch::Receiver<AppState>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            if client.set_app_state(state).is_err() {
                break;
            }
        }
        debug!("lifecycle listener stopped");
    })
}

/// The currently joined household, if any.
#[derive(Debug, Default, Clone)]
pub struct RoomTracker {
    current: Option<String>,
}

impl RoomTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Track `household_id` as the room and return the frames to send now.
    ///
    /// A different room is left first. While disconnected nothing is sent;
    /// the join goes out on the next open via [`replay`](Self::replay).
    pub fn join(&mut self, household_id: &str, connected: bool) -> Vec<ClientMessage> {
        let mut out = Vec::new();
        if let Some(previous) = self.current.take()
            && previous != household_id
            && connected
        {
            out.push(ClientMessage::leave(previous));
        }
        self.current = Some(household_id.to_owned());
        if connected {
            out.push(ClientMessage::join(household_id));
        }
        out
    }

    /// Forget the room, returning the leave frame to send when connected.
    pub fn leave(&mut self, household_id: &str, connected: bool) -> Option<ClientMessage> {
        self.current = None;
        connected.then(|| ClientMessage::leave(household_id))
    }

    /// Join frame to send after a successful open.
    pub fn replay(&self) -> Option<ClientMessage> {
        self.current.as_deref().map(ClientMessage::join)
    }
}
