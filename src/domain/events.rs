//! Chain events consumed by the arbiter.
//!
//! The chain collaborator hands over dynamically shaped payloads; they are
//! converted to the typed variants here, at the boundary, so malformed
//! events are rejected before any protocol logic runs on them.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::codec::SealedPayload;
use crate::domain::{GameId, PlayerIdentity, TurnNumber, SLOT_CAPACITY};

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("malformed {kind} event: {reason}")]
    MalformedEvent { kind: String, reason: String },

    #[error("no {kind} event found for game {game_id} turn {turn}")]
    MissingEvent {
        kind: String,
        game_id: GameId,
        turn: TurnNumber,
    },

    #[error("chain transport failure")]
    Transport(#[from] anyhow::Error),
}

/// A proposal ciphertext observed on chain, in submission order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalSubmitted {
    pub game_id: GameId,
    pub turn: TurnNumber,
    pub proposer: PlayerIdentity,
    pub payload: SealedPayload,
}

/// A ballot ciphertext observed on chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotSubmitted {
    pub game_id: GameId,
    pub turn: TurnNumber,
    pub voter: PlayerIdentity,
    pub payload: SealedPayload,
}

/// Emitted when a turn closes: the player list and the recorded payloads
/// in original (non-permuted) player order. `None` marks a player who
/// submitted nothing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnClosed {
    pub game_id: GameId,
    pub turn: TurnNumber,
    pub players: Vec<PlayerIdentity>,
    pub original_payloads: Vec<Option<SealedPayload>>,
}

impl TurnClosed {
    fn check(&self) -> Result<(), String> {
        if self.players.len() != self.original_payloads.len() {
            return Err(format!(
                "{} players but {} payload slots",
                self.players.len(),
                self.original_payloads.len()
            ));
        }
        if self.players.len() > SLOT_CAPACITY {
            return Err(format!(
                "{} players exceed the {SLOT_CAPACITY}-slot capacity",
                self.players.len()
            ));
        }
        let mut seen = HashSet::new();
        for player in &self.players {
            if !seen.insert(player.address) {
                return Err(format!("player {} listed twice", player.address));
            }
        }
        Ok(())
    }
}

/// All event kinds the arbiter reacts to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainEvent {
    ProposalSubmitted(ProposalSubmitted),
    BallotSubmitted(BallotSubmitted),
    TurnClosed(TurnClosed),
}

/// An event as the chain collaborator delivers it: a kind tag plus an
/// untyped payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawChainEvent {
    pub kind: String,
    pub payload: Value,
}

impl TryFrom<RawChainEvent> for ChainEvent {
    type Error = ChainError;

    fn try_from(raw: RawChainEvent) -> Result<Self, Self::Error> {
        let malformed = |reason: String| ChainError::MalformedEvent {
            kind: raw.kind.clone(),
            reason,
        };
        match raw.kind.as_str() {
            "proposal_submitted" => {
                let event: ProposalSubmitted = serde_json::from_value(raw.payload.clone())
                    .map_err(|e| malformed(e.to_string()))?;
                Ok(ChainEvent::ProposalSubmitted(event))
            }
            "ballot_submitted" => {
                let event: BallotSubmitted = serde_json::from_value(raw.payload.clone())
                    .map_err(|e| malformed(e.to_string()))?;
                Ok(ChainEvent::BallotSubmitted(event))
            }
            "turn_closed" => {
                let event: TurnClosed = serde_json::from_value(raw.payload.clone())
                    .map_err(|e| malformed(e.to_string()))?;
                event.check().map_err(malformed)?;
                Ok(ChainEvent::TurnClosed(event))
            }
            other => Err(ChainError::MalformedEvent {
                kind: other.to_string(),
                reason: "unknown event kind".to_string(),
            }),
        }
    }
}
