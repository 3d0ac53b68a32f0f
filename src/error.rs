//! Crate-level error aggregation.
//!
//! Every failure keeps its cause; nothing is downgraded to a default or
//! swallowed on the way up.

use thiserror::Error;

use crate::codec::CodecError;
use crate::coordinator::TransactionError;
use crate::domain::events::ChainError;
use crate::domain::ValidationError;
use crate::reconcile::ReconciliationError;
use crate::signing::SignError;
use crate::witness::ProofGenerationError;

#[derive(Debug, Error)]
pub enum ArbiterError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Reconciliation(#[from] ReconciliationError),

    #[error(transparent)]
    Proof(#[from] ProofGenerationError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Sign(#[from] SignError),
}
