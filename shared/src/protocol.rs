use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::vec2::Vec2;

/// Protocol version - increment when making breaking changes.
pub const PROTOCOL_VERSION: u32 = 1;

/// Broadcast event names. Peers built independently must agree on these.
pub mod events {
    pub const PLAYER_JOIN: &str = "player-join";
    pub const PLAYER_MOVE: &str = "player-move";
    pub const PLAYER_LEAVE: &str = "player-leave";
    pub const PLAYER_DEATH: &str = "player-death";
    pub const PLAYER_BUMP: &str = "player-bump";
    pub const FIREBALL_SHOT: &str = "fireball-shot";
    pub const ROUND_RESET: &str = "round-reset";
    pub const RING_UPDATE: &str = "ring-update";

    pub const ALL: [&str; 8] = [
        PLAYER_JOIN,
        PLAYER_MOVE,
        PLAYER_LEAVE,
        PLAYER_DEATH,
        PLAYER_BUMP,
        FIREBALL_SHOT,
        ROUND_RESET,
        RING_UPDATE,
    ];
}

// === Relay framing ===

/// An opaque named event as carried by the pub/sub transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../bindings/")]
pub struct Envelope {
    pub event: String,
    pub payload: serde_json::Value,
}

/// Relay -> Peer
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../bindings/")]
#[serde(tag = "type")]
pub enum RelayMsg {
    #[serde(rename = "subscribed")]
    Subscribed(SubscribedMsg),
    #[serde(rename = "broadcast")]
    Broadcast(Envelope),
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../bindings/")]
#[serde(rename_all = "camelCase")]
pub struct SubscribedMsg {
    pub protocol_version: u32,
    pub server_version: String,
    pub connection_id: u32,
    pub channel: String,
}

/// Peer -> Relay
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../bindings/")]
#[serde(tag = "type")]
pub enum PeerMsg {
    #[serde(rename = "broadcast")]
    Broadcast(Envelope),
}

// === Game event payloads ===

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../bindings/")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FireballKind {
    #[default]
    Normal,
    Fast,
    Heavy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../bindings/")]
#[serde(rename_all = "camelCase")]
pub struct PlayerJoin {
    pub id: String,
    pub world_x: f64,
    pub world_y: f64,
    pub health: f64,
    #[serde(default, alias = "isRingMaster")]
    pub is_authority: bool,
    /// Set on answers to another peer's announcement; replies are never answered.
    #[serde(default)]
    pub reply: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../bindings/")]
#[serde(rename_all = "camelCase")]
pub struct PlayerMove {
    pub id: String,
    pub world_x: f64,
    pub world_y: f64,
    pub health: f64,
    #[serde(default)]
    pub moving: bool,
    #[serde(default)]
    pub in_combat: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../bindings/")]
#[serde(rename_all = "camelCase")]
pub struct FireballShot {
    pub x: f64,
    pub y: f64,
    pub direction: Vec2,
    pub player_id: String,
    #[serde(rename = "type", default)]
    pub kind: FireballKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../bindings/")]
pub struct PlayerDeath {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../bindings/")]
pub struct PlayerLeave {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../bindings/")]
#[serde(rename_all = "camelCase")]
pub struct RoundReset {
    pub round: u32,
    /// Wall-clock epoch milliseconds at which every peer restarts
    pub start_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../bindings/")]
#[serde(rename_all = "camelCase")]
pub struct RingUpdate {
    pub radius: f64,
    /// Authority's round start, epoch milliseconds
    pub start_time: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../bindings/")]
pub struct PlayerBump {
    pub a: String,
    pub b: String,
    pub nx: f64,
    pub ny: f64,
    pub force: f64,
}

/// Every game event a peer understands, keyed by its broadcast name.
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    Join(PlayerJoin),
    Move(PlayerMove),
    Leave(PlayerLeave),
    Death(PlayerDeath),
    Bump(PlayerBump),
    FireballShot(FireballShot),
    RoundReset(RoundReset),
    RingUpdate(RingUpdate),
}

impl GameEvent {
    pub fn name(&self) -> &'static str {
        match self {
            GameEvent::Join(_) => events::PLAYER_JOIN,
            GameEvent::Move(_) => events::PLAYER_MOVE,
            GameEvent::Leave(_) => events::PLAYER_LEAVE,
            GameEvent::Death(_) => events::PLAYER_DEATH,
            GameEvent::Bump(_) => events::PLAYER_BUMP,
            GameEvent::FireballShot(_) => events::FIREBALL_SHOT,
            GameEvent::RoundReset(_) => events::ROUND_RESET,
            GameEvent::RingUpdate(_) => events::RING_UPDATE,
        }
    }

    pub fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            GameEvent::Join(p) => serde_json::to_value(p),
            GameEvent::Move(p) => serde_json::to_value(p),
            GameEvent::Leave(p) => serde_json::to_value(p),
            GameEvent::Death(p) => serde_json::to_value(p),
            GameEvent::Bump(p) => serde_json::to_value(p),
            GameEvent::FireballShot(p) => serde_json::to_value(p),
            GameEvent::RoundReset(p) => serde_json::to_value(p),
            GameEvent::RingUpdate(p) => serde_json::to_value(p),
        }
    }

    /// Decode a payload received under `name`. Unknown names yield `Ok(None)`.
    pub fn decode(name: &str, payload: serde_json::Value) -> Result<Option<Self>, serde_json::Error> {
        let event = match name {
            events::PLAYER_JOIN => GameEvent::Join(serde_json::from_value(payload)?),
            events::PLAYER_MOVE => GameEvent::Move(serde_json::from_value(payload)?),
            events::PLAYER_LEAVE => GameEvent::Leave(serde_json::from_value(payload)?),
            events::PLAYER_DEATH => GameEvent::Death(serde_json::from_value(payload)?),
            events::PLAYER_BUMP => GameEvent::Bump(serde_json::from_value(payload)?),
            events::FIREBALL_SHOT => GameEvent::FireballShot(serde_json::from_value(payload)?),
            events::ROUND_RESET => GameEvent::RoundReset(serde_json::from_value(payload)?),
            events::RING_UPDATE => GameEvent::RingUpdate(serde_json::from_value(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}
