// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Game Handlers
//!
//! Handlers a game client subscribes with. The game rules themselves live
//! outside this crate behind [`GameRules`]; the handlers only translate each
//! outcome into a disposition and perform the follow-up publishes:
//!
//! | payload            | outcome         | follow-up                   | disposition   |
//! |--------------------|-----------------|-----------------------------|---------------|
//! | `PlayingState`     | any             |                             | `Ack`         |
//! | `ArmyMove`         | `SamePlayer`    |                             | `NackDiscard` |
//! | `ArmyMove`         | `Safe`          |                             | `Ack`         |
//! | `ArmyMove`         | `MakeWar`       | `war.<user>` (JSON)         | `Ack`         |
//! | `RecognitionOfWar` | `NotInvolved`   | `game_logs.<user>` (binary) | `NackRequeue` |
//! | `RecognitionOfWar` | `NoUnits`       | `game_logs.<user>` (binary) | `NackDiscard` |
//! | `RecognitionOfWar` | won, lost, draw | `game_logs.<user>` (binary) | `Ack`         |
//!
//! A failed follow-up publish turns the disposition into `NackRequeue` so
//! the event is processed again.

use crate::{
    disposition::Disposition,
    publisher::{publish_binary, publish_json, Publisher},
    routing::{
        user_key, ArmyMove, GameLog, Player, PlayingState, RecognitionOfWar,
        EXCHANGE_PERIL_TOPIC, GAME_LOG_SLUG, WAR_RECOGNITIONS_PREFIX,
    },
    subscriber::Handler,
};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The move was made by the local player
    SamePlayer,
    Safe,
    MakeWar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarOutcome {
    /// Neither side belongs to the local player
    NotInvolved,
    /// The local player has no units at the contested location
    NoUnits,
    OpponentWon,
    YouWon,
    Draw,
}

/// Resolution of a war as seen by the local player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarResolution {
    pub outcome: WarOutcome,
    pub winner: String,
    pub loser: String,
}

/// The game state a client holds, as the handlers need it.
pub trait GameRules: Send + Sync + 'static {
    /// Name of the local player.
    fn username(&self) -> String;

    fn handle_pause(&self, state: PlayingState);

    fn handle_move(&self, mv: &ArmyMove) -> MoveOutcome;

    fn handle_war(&self, war: &RecognitionOfWar) -> WarResolution;

    /// Current state of the local player.
    fn player_snapshot(&self) -> Player;
}

/// Applies pause signals from `peril_direct`; always acknowledged.
pub fn pause_handler<G: GameRules>(rules: Arc<G>) -> impl Handler<PlayingState> {
    move |state: PlayingState| {
        info!(paused = state.is_paused, "playing state received");
        rules.handle_pause(state);
        Disposition::Ack
    }
}

/// Applies moves from other players and declares war when they collide.
pub struct MoveHandler<G, P: ?Sized> {
    rules: Arc<G>,
    publisher: Arc<P>,
}

impl<G, P: ?Sized> MoveHandler<G, P> {
    pub fn new(rules: Arc<G>, publisher: Arc<P>) -> Self {
        MoveHandler { rules, publisher }
    }
}

#[async_trait]
impl<G, P> Handler<ArmyMove> for MoveHandler<G, P>
where
    G: GameRules,
    P: Publisher + ?Sized + 'static,
{
    async fn handle(&self, mv: ArmyMove) -> Disposition {
        match self.rules.handle_move(&mv) {
            MoveOutcome::SamePlayer => Disposition::NackDiscard,
            MoveOutcome::Safe => Disposition::Ack,
            MoveOutcome::MakeWar => {
                let username = self.rules.username();
                let war = RecognitionOfWar {
                    attacker: mv.player,
                    defender: self.rules.player_snapshot(),
                };

                match publish_json(
                    self.publisher.as_ref(),
                    EXCHANGE_PERIL_TOPIC,
                    &user_key(WAR_RECOGNITIONS_PREFIX, &username),
                    &war,
                )
                .await
                {
                    Ok(()) => Disposition::Ack,
                    Err(err) => {
                        error!(error = err.to_string(), "could not publish war recognition");
                        Disposition::NackRequeue
                    }
                }
            }
        }
    }
}

/// Resolves wars and records the result in the game log.
pub struct WarHandler<G, P: ?Sized> {
    rules: Arc<G>,
    publisher: Arc<P>,
}

impl<G, P: ?Sized> WarHandler<G, P> {
    pub fn new(rules: Arc<G>, publisher: Arc<P>) -> Self {
        WarHandler { rules, publisher }
    }
}

impl<G, P> WarHandler<G, P>
where
    G: GameRules,
    P: Publisher + ?Sized,
{
    async fn log(&self, message: String) -> bool {
        let username = self.rules.username();
        let log = GameLog {
            current_time: Utc::now(),
            message,
            username: username.clone(),
        };

        match publish_binary(
            self.publisher.as_ref(),
            EXCHANGE_PERIL_TOPIC,
            &user_key(GAME_LOG_SLUG, &username),
            &log,
        )
        .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!(error = err.to_string(), "could not publish game log");
                false
            }
        }
    }
}

#[async_trait]
impl<G, P> Handler<RecognitionOfWar> for WarHandler<G, P>
where
    G: GameRules,
    P: Publisher + ?Sized + 'static,
{
    async fn handle(&self, war: RecognitionOfWar) -> Disposition {
        let resolution = self.rules.handle_war(&war);

        let (message, disposition) = match resolution.outcome {
            WarOutcome::NotInvolved => (
                "was not involved in the war".to_owned(),
                Disposition::NackRequeue,
            ),
            WarOutcome::NoUnits => ("had no units to fight".to_owned(), Disposition::NackDiscard),
            WarOutcome::OpponentWon | WarOutcome::YouWon => (
                format!("{} won a war against {}", resolution.winner, resolution.loser),
                Disposition::Ack,
            ),
            WarOutcome::Draw => (
                format!(
                    "A war between {} and {} resulted in a draw",
                    war.attacker.username, war.defender.username
                ),
                Disposition::Ack,
            ),
        };

        if self.log(message).await {
            disposition
        } else {
            Disposition::NackRequeue
        }
    }
}
