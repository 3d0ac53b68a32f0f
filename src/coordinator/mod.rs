//! Turn sequencing over the chain, signing, and proving collaborators.

pub mod manager;

pub use manager::{TurnCoordinator, TurnCoordinatorConfig};

use async_trait::async_trait;
use thiserror::Error;

use ark_bn254::Fr;

use crate::domain::events::{BallotSubmitted, ChainError, ProposalSubmitted, TurnClosed};
use crate::domain::{GameId, GamePhase, PlayerIdentity, TurnNumber, SLOT_CAPACITY};
use crate::signing::{Attested, BallotAttestation, ProposalAttestation};
use crate::witness::ProofCalldata;

pub type TxHash = [u8; 32];

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("transaction simulation rejected: {0}")]
    Simulation(String),

    #[error("transaction submission failed: {0}")]
    Submission(String),

    #[error("transaction transport failure")]
    Transport(#[from] anyhow::Error),
}

/// Read side of the chain collaborator. The coordinator holds no game
/// state of its own; every operation re-reads through this trait.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn game_phase(&self, game_id: GameId) -> Result<GamePhase, ChainError>;

    async fn current_turn(&self, game_id: GameId) -> Result<TurnNumber, ChainError>;

    async fn players(&self, game_id: GameId) -> Result<Vec<PlayerIdentity>, ChainError>;

    async fn proposal_events(
        &self,
        game_id: GameId,
        turn: TurnNumber,
    ) -> Result<Vec<ProposalSubmitted>, ChainError>;

    async fn ballot_events(
        &self,
        game_id: GameId,
        turn: TurnNumber,
    ) -> Result<Vec<BallotSubmitted>, ChainError>;

    async fn turn_close_event(
        &self,
        game_id: GameId,
        turn: TurnNumber,
    ) -> Result<TurnClosed, ChainError>;
}

/// The turn-close transaction as handed to the submission collaborator.
#[derive(Clone, Debug)]
pub struct EndTurnCall {
    pub game_id: GameId,
    /// Tallied vote totals, one per player slot.
    pub votes: Vec<u64>,
    pub permuted_proposals: [Fr; SLOT_CAPACITY],
    pub permutation: [usize; SLOT_CAPACITY],
    pub nullifier: Fr,
    pub calldata: ProofCalldata,
}

/// Write side of the chain collaborator. Simulation, signing and
/// broadcast all live behind this seam; failures come back as
/// [`TransactionError`] with their cause attached.
#[async_trait]
pub trait TransactionSubmitter: Send + Sync {
    async fn submit_proposal(
        &self,
        attestation: Attested<ProposalAttestation>,
    ) -> Result<TxHash, TransactionError>;

    async fn submit_ballot(
        &self,
        attestation: Attested<BallotAttestation>,
    ) -> Result<TxHash, TransactionError>;

    async fn end_turn(&self, call: EndTurnCall) -> Result<TxHash, TransactionError>;
}
