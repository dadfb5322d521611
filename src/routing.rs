// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Peril Routing Vocabulary
//!
//! Exchange names, routing key prefixes and the wire types exchanged between
//! game clients and the server. Field names on the wire are PascalCase so
//! payloads stay readable by clients written in other languages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use crate::topology::DEFAULT_DEAD_LETTER_EXCHANGE as EXCHANGE_PERIL_DLX;

/// Direct exchange carrying pause/resume signals
pub const EXCHANGE_PERIL_DIRECT: &str = "peril_direct";
/// Topic exchange carrying moves, wars and game logs
pub const EXCHANGE_PERIL_TOPIC: &str = "peril_topic";
/// Queue collecting everything routed through the dead-letter exchange
pub const QUEUE_PERIL_DLQ: &str = "peril_dlq";

pub const PAUSE_KEY: &str = "pause";
pub const ARMY_MOVES_PREFIX: &str = "army_moves";
pub const WAR_RECOGNITIONS_PREFIX: &str = "war";
pub const GAME_LOG_SLUG: &str = "game_logs";

/// Builds `<prefix>.<username>`.
pub fn user_key(prefix: &str, username: &str) -> String {
    format!("{prefix}.{username}")
}

/// Builds the `<prefix>.*` pattern matching every player.
pub fn any_user_key(prefix: &str) -> String {
    format!("{prefix}.*")
}

pub type Location = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitRank {
    Infantry,
    Cavalry,
    Artillery,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Unit {
    #[serde(rename = "ID")]
    pub id: i32,
    pub rank: UnitRank,
    pub location: Location,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Player {
    pub username: String,
    pub units: HashMap<i32, Unit>,
}

/// Sent on `peril_direct` with key `pause` by the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlayingState {
    pub is_paused: bool,
}

/// Sent on `peril_topic` with key `army_moves.<username>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ArmyMove {
    pub player: Player,
    pub units: Vec<Unit>,
    pub to_location: Location,
}

/// Sent on `peril_topic` with key `war.<username>` when a move provokes a war.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RecognitionOfWar {
    pub attacker: Player,
    pub defender: Player,
}

/// Sent on `peril_topic` with key `game_logs.<username>`, binary encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GameLog {
    pub current_time: DateTime<Utc>,
    pub message: String,
    pub username: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys() {
        assert_eq!(user_key(WAR_RECOGNITIONS_PREFIX, "alice"), "war.alice");
        assert_eq!(any_user_key(ARMY_MOVES_PREFIX), "army_moves.*");
        assert_eq!(EXCHANGE_PERIL_DLX, "peril_dlx");
    }

    #[test]
    fn army_move_wire_shape() {
        let mv: ArmyMove = serde_json::from_str(
            r#"{
                "Player": {"Username": "alice", "Units": {}},
                "Units": [{"ID": 3, "Rank": "cavalry", "Location": "europe"}],
                "ToLocation": "asia"
            }"#,
        )
        .unwrap();

        assert_eq!(mv.player.username, "alice");
        assert_eq!(mv.units[0].id, 3);
        assert_eq!(mv.units[0].rank, UnitRank::Cavalry);
        assert_eq!(mv.to_location, "asia");
    }

    #[test]
    fn playing_state_wire_shape() {
        let json = serde_json::to_string(&PlayingState { is_paused: true }).unwrap();
        assert_eq!(json, r#"{"IsPaused":true}"#);
    }
}
