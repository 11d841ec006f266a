//! Wire message definitions for client-server communication.
//!
//! This module defines the JSON messages exchanged over the WebSocket,
//! dispatched by their `type` tag. Unknown or malformed messages are treated
//! as protocol violations by the session handler: the message is ignored and
//! the connection survives.

use crate::{UserId, ZoneId};
use serde::{Deserialize, Serialize};

/// A message sent from a client to the server.
///
/// # Examples
///
/// Movement update:
/// ```json
/// { "type": "player_move", "x": 12.0, "y": 7.0, "direction": "left", "moving": true }
/// ```
///
/// Zone-scoped chat:
/// ```json
/// { "type": "chat_message", "scope": "zone", "message": "hi" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// The client moved to a new tile
    PlayerMove {
        x: f64,
        y: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        direction: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        moving: Option<bool>,
    },

    /// The client walked into a declared zone
    ZoneEnter {
        zone_id: ZoneId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        zone_type: Option<String>,
    },

    /// The client walked out of a declared zone
    ZoneExit { zone_id: ZoneId },

    /// The client asks for the current online snapshot of the world
    RequestUsers,

    /// Scoped chat relay
    ChatMessage {
        scope: ChatScope,
        message: String,
        /// Channel identifier, required for [`ChatScope::Channel`]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel_id: Option<String>,
        /// Target user, required for [`ChatScope::Direct`]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<UserId>,
        /// Opaque message object passed through to recipients unchanged
        /// (persistence is owned by the REST surface, not this layer)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_data: Option<serde_json::Value>,
    },

    /// Radius-limited chat relay around the sender's last known position
    ProximityChat { message: String },

    /// Direct-message notification fan-out (the DM itself is persisted by
    /// the REST surface; this only nudges the recipient in real time)
    DmSent {
        target_id: UserId,
        message: serde_json::Value,
    },

    /// A previously sent DM was edited
    DmUpdated {
        target_id: UserId,
        message: serde_json::Value,
    },

    /// A previously sent DM was deleted
    DmDeleted {
        target_id: UserId,
        message_id: String,
    },

    /// Peer-to-peer negotiation offer, forwarded opaquely
    SignalOffer {
        target: UserId,
        payload: serde_json::Value,
    },

    /// Peer-to-peer negotiation answer, forwarded opaquely
    SignalAnswer {
        target: UserId,
        payload: serde_json::Value,
    },

    /// ICE candidate exchange, forwarded opaquely
    SignalIce {
        target: UserId,
        payload: serde_json::Value,
    },
}

/// Delivery scope of a [`ClientEvent::ChatMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatScope {
    /// Everyone connected to the world
    Global,
    /// Members of the sender's current zone only; never persisted
    Zone,
    /// One target user, echoed back to the sender
    Direct,
    /// World-wide relay tagged with a channel id; persistence happens in the
    /// REST surface before the relay
    Channel,
    /// Users within a fixed Manhattan-distance radius of the sender; never
    /// persisted. Inbound traffic normally arrives as `proximity_chat`, but
    /// the scope also marks the outbound relays
    Proximity,
}

/// A message sent from the server to one or more clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Online snapshot reply
    UserList { users: Vec<OnlineUser> },

    /// A user joined the world
    UserJoined {
        user_id: UserId,
        username: String,
        x: f64,
        y: f64,
    },

    /// A user left the world
    UserLeft { user_id: UserId, username: String },

    /// Another user moved; `zone` names the containing zone, if any
    PlayerMove {
        user_id: UserId,
        x: f64,
        y: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        zone: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        direction: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        moving: Option<bool>,
    },

    /// Reply to the entering user: the zone's full member snapshot
    ZoneMembers {
        zone_id: ZoneId,
        zone_type: String,
        members: Vec<UserId>,
        member_count: usize,
    },

    /// Sent to each prior member of a zone when someone enters
    UserEnteredZone {
        zone_id: ZoneId,
        user_id: UserId,
        username: String,
        member_count: usize,
    },

    /// Sent to each remaining member of a zone when someone exits
    UserLeftZone {
        zone_id: ZoneId,
        user_id: UserId,
        member_count: usize,
    },

    /// Chat relay; `persist` is false for zone and proximity scopes, which
    /// are never written anywhere
    ChatMessage {
        scope: ChatScope,
        user_id: UserId,
        username: String,
        message: String,
        persist: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        channel_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        zone_id: Option<ZoneId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message_data: Option<serde_json::Value>,
    },

    /// DM notification relays
    DmReceived { message: serde_json::Value },
    DmUpdated { message: serde_json::Value },
    DmDeleted { message_id: String },

    /// Signaling relays; `from` is stamped from the authenticated sender,
    /// never trusted from the client
    SignalOffer {
        from: UserId,
        payload: serde_json::Value,
    },
    SignalAnswer {
        from: UserId,
        payload: serde_json::Value,
    },
    SignalIce {
        from: UserId,
        payload: serde_json::Value,
    },
}

/// One entry of a [`ServerEvent::UserList`] snapshot.
///
/// Coordinates are present when the fast store had a live position record
/// for the user, and absent when the snapshot fell back to the local
/// registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnlineUser {
    pub user_id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
}
