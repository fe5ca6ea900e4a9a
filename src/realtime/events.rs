//! Event kinds, typed payloads and the JSON wire envelope.
//!
//! Every frame on the socket is a text frame carrying
//! `{"type": "<kind>", "data": <payload>}`. Inbound frames are decoded into a
//! [`SyncEvent`]; the four connection lifecycle kinds are never accepted from
//! the wire, they are synthesized by the connection manager.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::model::{Household, Task, User};

// ---------------------------------------------------------------------------
// Event kinds
// ---------------------------------------------------------------------------

/// The closed set of event kinds a subscriber can listen for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    TaskCreated,
    TaskUpdated,
    TaskDeleted,
    TaskCompleted,
    TaskAssigned,
    TaskUnassigned,
    HouseholdUpdated,
    MemberJoined,
    MemberLeft,
    InviteCodeRefreshed,
    UserUpdated,
    Connect,
    Disconnect,
    Reconnect,
    ConnectError,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; 15] = [
        Self::TaskCreated,
        Self::TaskUpdated,
        Self::TaskDeleted,
        Self::TaskCompleted,
        Self::TaskAssigned,
        Self::TaskUnassigned,
        Self::HouseholdUpdated,
        Self::MemberJoined,
        Self::MemberLeft,
        Self::InviteCodeRefreshed,
        Self::UserUpdated,
        Self::Connect,
        Self::Disconnect,
        Self::Reconnect,
        Self::ConnectError,
    ];

    /// Wire name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TaskCreated => "task:created",
            Self::TaskUpdated => "task:updated",
            Self::TaskDeleted => "task:deleted",
            Self::TaskCompleted => "task:completed",
            Self::TaskAssigned => "task:assigned",
            Self::TaskUnassigned => "task:unassigned",
            Self::HouseholdUpdated => "household:updated",
            Self::MemberJoined => "household:member_joined",
            Self::MemberLeft => "household:member_left",
            Self::InviteCodeRefreshed => "household:invite_code_refreshed",
            Self::UserUpdated => "user:updated",
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Reconnect => "reconnect",
            Self::ConnectError => "connect_error",
        }
    }

    /// Look up a kind by its wire name.
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == raw)
    }

    /// Kinds synthesized locally rather than received from the server.
    pub fn is_lifecycle(self) -> bool {
        matches!(
            self,
            Self::Connect | Self::Disconnect | Self::Reconnect | Self::ConnectError
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// `task:created` / `task:updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskChange {
    pub task: Task,
    pub household_id: String,
}

/// `task:deleted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDeletion {
    pub task_id: String,
    pub household_id: String,
}

/// `task:completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCompletion {
    pub task: Task,
    pub household_id: String,
    #[serde(default)]
    pub completed_by: Option<User>,
}

/// `task:assigned` / `task:unassigned`. The member is sent as `assignedTo`
/// or `unassignedFrom` depending on the kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAssignmentChange {
    pub task: Task,
    pub household_id: String,
    #[serde(default, alias = "assignedTo", alias = "unassignedFrom")]
    pub member: Option<User>,
}

/// `household:updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HouseholdChange {
    pub household: Household,
}

/// `household:member_joined`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberJoin {
    pub user: User,
    pub household: Household,
}

/// `household:member_left`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberLeave {
    pub user_id: String,
    pub household: Household,
}

/// `household:invite_code_refreshed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteCodeRefresh {
    #[serde(default)]
    pub invite_code: String,
    pub household: Household,
}

/// `user:updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserChange {
    pub user: User,
    pub household_id: String,
}

/// Details attached to a local `disconnect` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectInfo {
    pub reason: String,
    /// Close code, when the transport reported one.
    pub code: Option<u16>,
}

/// Details attached to a local `connect_error` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectFailure {
    pub error: SyncError,
}

// ---------------------------------------------------------------------------
// SyncEvent
// ---------------------------------------------------------------------------

/// One dispatched event: the kind plus its typed payload.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    TaskCreated(TaskChange),
    TaskUpdated(TaskChange),
    TaskDeleted(TaskDeletion),
    TaskCompleted(TaskCompletion),
    TaskAssigned(TaskAssignmentChange),
    TaskUnassigned(TaskAssignmentChange),
    HouseholdUpdated(HouseholdChange),
    MemberJoined(MemberJoin),
    MemberLeft(MemberLeave),
    InviteCodeRefreshed(InviteCodeRefresh),
    UserUpdated(UserChange),
    Connect,
    Disconnect(DisconnectInfo),
    Reconnect,
    ConnectError(ConnectFailure),
}

impl SyncEvent {
    /// The kind this event is dispatched under.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::TaskCreated(_) => EventKind::TaskCreated,
            Self::TaskUpdated(_) => EventKind::TaskUpdated,
            Self::TaskDeleted(_) => EventKind::TaskDeleted,
            Self::TaskCompleted(_) => EventKind::TaskCompleted,
            Self::TaskAssigned(_) => EventKind::TaskAssigned,
            Self::TaskUnassigned(_) => EventKind::TaskUnassigned,
            Self::HouseholdUpdated(_) => EventKind::HouseholdUpdated,
            Self::MemberJoined(_) => EventKind::MemberJoined,
            Self::MemberLeft(_) => EventKind::MemberLeft,
            Self::InviteCodeRefreshed(_) => EventKind::InviteCodeRefreshed,
            Self::UserUpdated(_) => EventKind::UserUpdated,
            Self::Connect => EventKind::Connect,
            Self::Disconnect(_) => EventKind::Disconnect,
            Self::Reconnect => EventKind::Reconnect,
            Self::ConnectError(_) => EventKind::ConnectError,
        }
    }

    /// Household the event is scoped to, when it has one.
    pub fn household_id(&self) -> Option<&str> {
        match self {
            Self::TaskCreated(p) | Self::TaskUpdated(p) => Some(&p.household_id),
            Self::TaskDeleted(p) => Some(&p.household_id),
            Self::TaskCompleted(p) => Some(&p.household_id),
            Self::TaskAssigned(p) | Self::TaskUnassigned(p) => Some(&p.household_id),
            Self::HouseholdUpdated(p) => Some(&p.household.id),
            Self::MemberJoined(p) => Some(&p.household.id),
            Self::MemberLeft(p) => Some(&p.household.id),
            Self::InviteCodeRefreshed(p) => Some(&p.household.id),
            Self::UserUpdated(p) => Some(&p.household_id),
            Self::Connect | Self::Disconnect(_) | Self::Reconnect | Self::ConnectError(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Typed subscription markers
// ---------------------------------------------------------------------------

/// Ties a marker type to an event kind and its payload type, so handlers
/// registered through [`EventDispatcher::on`](super::dispatcher::EventDispatcher::on)
/// receive the payload they expect.
pub trait Event: 'static {
    /// Payload handed to the handler.
    type Payload: 'static;
    /// Kind the marker subscribes to.
    const KIND: EventKind;
    /// Extract the payload from a dispatched event of this kind.
    fn payload(event: &SyncEvent) -> Option<&Self::Payload>;
}

macro_rules! event_markers {
    ($( $(#[$doc:meta])* $marker:ident => $variant:ident ( $payload:ty ) ),* $(,)?) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, Copy)]
            pub struct $marker;

            impl Event for $marker {
                type Payload = $payload;
                const KIND: EventKind = EventKind::$variant;

                fn payload(event: &SyncEvent) -> Option<&Self::Payload> {
                    match event {
                        SyncEvent::$variant(payload) => Some(payload),
                        _ => None,
                    }
                }
            }
        )*
    };
}

/// Marker types for typed subscriptions, one per event kind.
pub mod on {
    use super::*;

    event_markers! {
        /// `task:created`
        TaskCreated => TaskCreated(TaskChange),
        /// `task:updated`
        TaskUpdated => TaskUpdated(TaskChange),
        /// `task:deleted`
        TaskDeleted => TaskDeleted(TaskDeletion),
        /// `task:completed`
        TaskCompleted => TaskCompleted(TaskCompletion),
        /// `task:assigned`
        TaskAssigned => TaskAssigned(TaskAssignmentChange),
        /// `task:unassigned`
        TaskUnassigned => TaskUnassigned(TaskAssignmentChange),
        /// `household:updated`
        HouseholdUpdated => HouseholdUpdated(HouseholdChange),
        /// `household:member_joined`
        MemberJoined => MemberJoined(MemberJoin),
        /// `household:member_left`
        MemberLeft => MemberLeft(MemberLeave),
        /// `household:invite_code_refreshed`
        InviteCodeRefreshed => InviteCodeRefreshed(InviteCodeRefresh),
        /// `user:updated`
        UserUpdated => UserUpdated(UserChange),
        /// `disconnect`
        Disconnect => Disconnect(DisconnectInfo),
        /// `connect_error`
        ConnectError => ConnectError(ConnectFailure),
    }

    /// `connect`
    #[derive(Debug, Clone, Copy)]
    pub struct Connect;

    impl Event for Connect {
        type Payload = ();
        const KIND: EventKind = EventKind::Connect;

        fn payload(event: &SyncEvent) -> Option<&()> {
            matches!(event, SyncEvent::Connect).then_some(&())
        }
    }

    /// `reconnect`
    #[derive(Debug, Clone, Copy)]
    pub struct Reconnect;

    impl Event for Reconnect {
        type Payload = ();
        const KIND: EventKind = EventKind::Reconnect;

        fn payload(event: &SyncEvent) -> Option<&()> {
            matches!(event, SyncEvent::Reconnect).then_some(&())
        }
    }
}

// ---------------------------------------------------------------------------
// Wire framing
// ---------------------------------------------------------------------------

/// Raw inbound envelope before the payload is typed.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

fn typed_payload<T: DeserializeOwned>(kind: EventKind, data: serde_json::Value) -> Result<T> {
    serde_json::from_value(data)
        .map_err(|e| SyncError::MalformedMessage(format!("{kind} payload: {e}")))
}

/// Decode one inbound text frame.
///
/// Returns `Ok(None)` for frames whose kind is unknown or reserved for local
/// lifecycle events; those are dropped for forward compatibility.
///
/// # Errors
///
/// Returns [`SyncError::MalformedMessage`] when the frame is not a JSON
/// envelope or the payload does not match the kind's shape.
pub fn decode_frame(text: &str) -> Result<Option<SyncEvent>> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| SyncError::MalformedMessage(e.to_string()))?;

    let Some(kind) = EventKind::parse(&envelope.kind).filter(|k| !k.is_lifecycle()) else {
        return Ok(None);
    };

    let data = envelope.data;
    let event = match kind {
        EventKind::TaskCreated => SyncEvent::TaskCreated(typed_payload(kind, data)?),
        EventKind::TaskUpdated => SyncEvent::TaskUpdated(typed_payload(kind, data)?),
        EventKind::TaskDeleted => SyncEvent::TaskDeleted(typed_payload(kind, data)?),
        EventKind::TaskCompleted => SyncEvent::TaskCompleted(typed_payload(kind, data)?),
        EventKind::TaskAssigned => SyncEvent::TaskAssigned(typed_payload(kind, data)?),
        EventKind::TaskUnassigned => SyncEvent::TaskUnassigned(typed_payload(kind, data)?),
        EventKind::HouseholdUpdated => SyncEvent::HouseholdUpdated(typed_payload(kind, data)?),
        EventKind::MemberJoined => SyncEvent::MemberJoined(typed_payload(kind, data)?),
        EventKind::MemberLeft => SyncEvent::MemberLeft(typed_payload(kind, data)?),
        EventKind::InviteCodeRefreshed => SyncEvent::InviteCodeRefreshed(typed_payload(kind, data)?),
        EventKind::UserUpdated => SyncEvent::UserUpdated(typed_payload(kind, data)?),
        EventKind::Connect
        | EventKind::Disconnect
        | EventKind::Reconnect
        | EventKind::ConnectError => return Ok(None),
    };
    Ok(Some(event))
}

/// Household reference carried by join/leave requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRef {
    pub household_id: String,
}

/// Control messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Subscribe to a household's events.
    #[serde(rename = "join:household")]
    JoinHousehold { data: RoomRef },
    /// Unsubscribe from a household's events.
    #[serde(rename = "leave:household")]
    LeaveHousehold { data: RoomRef },
    /// Handshake authentication, sent right after open in handshake mode.
    #[serde(rename = "auth")]
    Auth { token: String },
}

impl ClientMessage {
    pub fn join(household_id: impl Into<String>) -> Self {
        Self::JoinHousehold {
            data: RoomRef {
                household_id: household_id.into(),
            },
        }
    }

    pub fn leave(household_id: impl Into<String>) -> Self {
        Self::LeaveHousehold {
            data: RoomRef {
                household_id: household_id.into(),
            },
        }
    }

    /// Serialize to a text frame.
    ///
    /// # Errors
    ///
    /// Only fails if serde cannot serialize the message, which would be a bug.
    pub fn to_frame(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| SyncError::MalformedMessage(e.to_string()))
    }
}
