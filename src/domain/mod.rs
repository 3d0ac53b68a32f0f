//! Core domain types for the conclave arbiter.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub mod events;

/// ---------- Common type aliases ----------
pub type GameId = u64;
pub type TurnNumber = u64;
pub type ChainId = u64;

/// Fixed slot domain shared by permutations, commitments and witness
/// arrays. Games with fewer players carry identity-mapped, zero-valued
/// padding up to this bound; games with more players are rejected
/// outright.
pub const SLOT_CAPACITY: usize = 15;

/// ---------- Addresses ----------

/// Address of the on-chain verifier contract a game is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VerifierAddress([u8; 20]);

impl VerifierAddress {
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn from_hex(raw: &str) -> Result<Self, ValidationError> {
        parse_address(raw).map(Self)
    }
}

impl fmt::Display for VerifierAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Address a player is known by on chain, derived from their public key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerAddress([u8; 20]);

impl PlayerAddress {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for PlayerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

fn parse_address(raw: &str) -> Result<[u8; 20], ValidationError> {
    let trimmed = raw.trim();
    let without_prefix = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(without_prefix)
        .map_err(|_| ValidationError::MalformedAddress(trimmed.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| ValidationError::MalformedAddress(trimmed.to_string()))
}

/// ---------- Identities ----------

/// x25519 public key of a protocol participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerPublicKey([u8; 32]);

impl PlayerPublicKey {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Public key plus the address derived from it (Keccak-256, last 20
/// bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerIdentity {
    pub public_key: PlayerPublicKey,
    pub address: PlayerAddress,
}

impl PlayerIdentity {
    pub fn from_public_key(public_key: PlayerPublicKey) -> Self {
        let digest = Keccak256::digest(public_key.as_bytes());
        let mut address = [0u8; 20];
        address.copy_from_slice(&digest[12..]);
        Self {
            public_key,
            address: PlayerAddress(address),
        }
    }
}

/// ---------- Secrets ----------

/// A player's x25519 agreement secret. Held only when the library acts on
/// that player's behalf (tests, local play).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PlayerSecret([u8; 32]);

impl PlayerSecret {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn agreement(&self) -> StaticSecret {
        StaticSecret::from(self.0)
    }

    pub fn identity(&self) -> PlayerIdentity {
        let public = PublicKey::from(&self.agreement());
        PlayerIdentity::from_public_key(PlayerPublicKey(public.to_bytes()))
    }
}

impl fmt::Debug for PlayerSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PlayerSecret(..)")
    }
}

/// The arbiter's per-game secret. Root of turn-salt derivation and the
/// arbiter's side of every shared-key agreement.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ArbiterSecret([u8; 32]);

impl ArbiterSecret {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn agreement(&self) -> StaticSecret {
        StaticSecret::from(self.0)
    }

    pub fn public_key(&self) -> PlayerPublicKey {
        PlayerPublicKey(PublicKey::from(&self.agreement()).to_bytes())
    }
}

impl fmt::Debug for ArbiterSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ArbiterSecret(..)")
    }
}

/// ---------- Game state ----------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GamePhase {
    Open,
    Proposing,
    Voting,
    Ended,
}

/// Everything a key derivation is scoped by. Turn number is part of the
/// tuple, so a leaked key is only good for one turn of one game.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TurnContext {
    pub game_id: GameId,
    pub turn: TurnNumber,
    pub verifier: VerifierAddress,
    pub chain_id: ChainId,
}

/// ---------- Submissions ----------

/// A proposal as the author sees it. Only the sealed form ever leaves the
/// process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proposal {
    pub proposer: PlayerIdentity,
    pub plaintext: String,
    pub turn: TurnNumber,
}

/// A decrypted ballot: one weight per player slot, in slot order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ballot {
    pub voter: PlayerIdentity,
    pub weights: Vec<u64>,
    pub turn: TurnNumber,
}

impl Ballot {
    /// A ballot must carry exactly one weight per player and zero weight
    /// at the voter's own slot.
    pub fn validate(&self, voter_slot: usize, player_count: usize) -> Result<(), ValidationError> {
        if self.weights.len() != player_count {
            return Err(ValidationError::BallotShape {
                expected: player_count,
                actual: self.weights.len(),
            });
        }
        if self.weights[voter_slot] != 0 {
            return Err(ValidationError::SelfVote { slot: voter_slot });
        }
        Ok(())
    }
}

/// ---------- Validation taxonomy ----------

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("ballot carries nonzero weight at the voter's own slot {slot}")]
    SelfVote { slot: usize },

    #[error("operation requires phase {expected:?}, game is in {actual:?}")]
    WrongPhase { expected: GamePhase, actual: GamePhase },

    #[error("voter {voter} already submitted a ballot this turn")]
    DuplicateBallot { voter: PlayerAddress },

    #[error("player {player} is registered more than once")]
    DuplicateRegistration { player: PlayerAddress },

    #[error("player count {players} exceeds the 15-slot capacity")]
    CapacityExceeded { players: usize },

    #[error("ballot has {actual} weights, game has {expected} players")]
    BallotShape { expected: usize, actual: usize },

    #[error("key agreement produced a degenerate shared secret")]
    DegenerateSharedSecret,

    #[error("voter {voter} is not a registered player")]
    UnknownVoter { voter: PlayerAddress },

    #[error("no prior turn exists to reconcile")]
    NoPriorTurn,

    #[error("malformed address: {0}")]
    MalformedAddress(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(byte: u8) -> PlayerIdentity {
        PlayerSecret::from_bytes([byte; 32]).identity()
    }

    #[test]
    fn address_derivation_is_stable() {
        let a = identity(1);
        let b = identity(1);
        assert_eq!(a.address, b.address);
        assert_ne!(a.address, identity(2).address);
    }

    #[test]
    fn verifier_address_round_trips_through_hex() {
        let addr = VerifierAddress::new([0xab; 20]);
        let parsed = VerifierAddress::from_hex(&addr.to_string()).unwrap();
        assert_eq!(parsed, addr);
    }

    #[test]
    fn malformed_address_is_rejected() {
        assert!(matches!(
            VerifierAddress::from_hex("0x1234"),
            Err(ValidationError::MalformedAddress(_))
        ));
        assert!(VerifierAddress::from_hex("not hex").is_err());
    }

    #[test]
    fn ballot_rejects_self_vote() {
        let ballot = Ballot {
            voter: identity(3),
            weights: vec![0, 2, 1],
            turn: 1,
        };
        assert!(ballot.validate(0, 3).is_ok());
        assert!(matches!(
            ballot.validate(1, 3),
            Err(ValidationError::SelfVote { slot: 1 })
        ));
    }

    #[test]
    fn ballot_rejects_wrong_shape() {
        let ballot = Ballot {
            voter: identity(4),
            weights: vec![0, 1],
            turn: 1,
        };
        assert!(matches!(
            ballot.validate(0, 3),
            Err(ValidationError::BallotShape {
                expected: 3,
                actual: 2
            })
        ));
    }
}
