//! Integrity witness assembly for the external proving system.
//!
//! The witness proves that the permuted proposal array published at turn
//! close is a permutation of the originally submitted proposals,
//! consistent with the committed permutation, without revealing the
//! mapping beyond what the commitment binds. Proving itself is an opaque
//! blocking collaborator; its output is already deterministic for a given
//! witness, so nothing here retries it.

use ark_bn254::Fr;
use ark_ff::PrimeField;
use ark_std::Zero;
use sha3::{Digest, Keccak256};
use thiserror::Error;

use crate::domain::{ArbiterSecret, ValidationError, VerifierAddress, SLOT_CAPACITY};
use crate::permutation::PermutationEngine;
use crate::reconcile::ReconciledTurn;

const LOG_TARGET: &str = "conclave::witness";

#[derive(Debug, Error)]
pub enum ProofGenerationError {
    #[error("circuit artifacts unavailable: {0}")]
    MissingArtifacts(String),

    #[error("witness rejected by prover: {0}")]
    MalformedWitness(String),

    #[error("proving backend failed: {0}")]
    Backend(String),

    #[error("proving task interrupted: {0}")]
    Interrupted(String),
}

/// Private and public inputs handed to the proving collaborator. Always
/// exactly 15 slots wide; inactive slots carry zeros and identity
/// indices.
#[derive(Clone, Debug)]
pub struct IntegrityWitness {
    pub commitments: [Fr; SLOT_CAPACITY],
    pub permuted_proposals: [Fr; SLOT_CAPACITY],
    pub permutation_commitment: Fr,
    pub num_active: usize,
    pub permutation: [usize; SLOT_CAPACITY],
    pub randomnesses: [Fr; SLOT_CAPACITY],
    pub permutation_randomness: Fr,
}

/// Opaque proof returned by the proving collaborator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofArtifact {
    pub bytes: Vec<u8>,
}

/// Proof decomposed into the three positional calldata groups the
/// verifier contract takes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofCalldata {
    pub a: [Fr; 2],
    pub b: [[Fr; 2]; 2],
    pub c: [Fr; 2],
}

/// Blocking proving collaborator. Failures are terminal for the turn:
/// proof generation is deterministic given the witness, so a blind retry
/// with unchanged inputs cannot succeed and is never attempted.
pub trait ProofBackend: Send + Sync {
    fn generate_proof(&self, witness: &IntegrityWitness)
        -> Result<ProofArtifact, ProofGenerationError>;

    fn generate_calldata(
        &self,
        artifact: &ProofArtifact,
    ) -> Result<ProofCalldata, ProofGenerationError>;
}

/// Field representation of proposal text. Empty proposals are the zero
/// element, matching the zero-padding of inactive slots.
pub fn proposal_value(plaintext: &str) -> Fr {
    if plaintext.is_empty() {
        return Fr::zero();
    }
    Fr::from_le_bytes_mod_order(&Keccak256::digest(plaintext.as_bytes()))
}

/// Builds integrity witnesses from reconciled turns.
pub struct IntegrityProofAssembler<'a> {
    engine: &'a PermutationEngine,
}

impl<'a> IntegrityProofAssembler<'a> {
    pub fn new(engine: &'a PermutationEngine) -> Self {
        Self { engine }
    }

    /// Re-derives the turn's permutation and packages the witness:
    /// per-slot value commitments, the scattered permuted array, and the
    /// salt doubling as permutation randomness.
    #[tracing::instrument(target = LOG_TARGET, skip_all, fields(game_id = reconciled.game_id, turn = reconciled.turn))]
    pub fn assemble(
        &self,
        reconciled: &ReconciledTurn,
        secret: &ArbiterSecret,
        verifier: &VerifierAddress,
    ) -> Result<IntegrityWitness, ValidationError> {
        let num_active = reconciled.slots.len();
        if num_active > SLOT_CAPACITY {
            return Err(ValidationError::CapacityExceeded {
                players: num_active,
            });
        }

        let (permutation, salt) = self.engine.derive_permutation(
            reconciled.game_id,
            reconciled.turn,
            num_active,
            secret,
            verifier,
        )?;

        let mut values = [Fr::zero(); SLOT_CAPACITY];
        for (slot, entry) in reconciled.slots.iter().enumerate() {
            values[slot] = proposal_value(&entry.plaintext);
        }

        let mut randomnesses = [Fr::zero(); SLOT_CAPACITY];
        let mut commitments = [Fr::zero(); SLOT_CAPACITY];
        for slot in 0..SLOT_CAPACITY {
            randomnesses[slot] = self.engine.slot_randomness(&salt, slot);
            commitments[slot] = self
                .engine
                .hasher()
                .hash(&[values[slot], randomnesses[slot]]);
        }

        let mut permuted_proposals = [Fr::zero(); SLOT_CAPACITY];
        for slot in 0..SLOT_CAPACITY {
            permuted_proposals[permutation.destination(slot)] = values[slot];
        }

        let permutation_commitment = self.engine.commit(&permutation, &salt);

        tracing::debug!(target: LOG_TARGET, num_active, "assembled integrity witness");

        Ok(IntegrityWitness {
            commitments,
            permuted_proposals,
            permutation_commitment,
            num_active,
            permutation: *permutation.slots(),
            randomnesses,
            permutation_randomness: salt.scalar(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoseidonHasher;
    use crate::domain::PlayerSecret;
    use crate::reconcile::ReconciledSlot;
    use std::collections::HashSet;

    fn reconciled(texts: &[&str]) -> ReconciledTurn {
        ReconciledTurn {
            game_id: 11,
            turn: 4,
            slots: texts
                .iter()
                .enumerate()
                .map(|(i, text)| ReconciledSlot {
                    proposer: PlayerSecret::from_bytes([i as u8 + 1; 32]).identity(),
                    plaintext: text.to_string(),
                })
                .collect(),
        }
    }

    fn assemble(turn: &ReconciledTurn) -> IntegrityWitness {
        let engine = PermutationEngine::new(PoseidonHasher::bn254());
        IntegrityProofAssembler::new(&engine)
            .assemble(
                turn,
                &ArbiterSecret::from_bytes([0x42; 32]),
                &VerifierAddress::new([0x99; 20]),
            )
            .unwrap()
    }

    #[test]
    fn witness_preserves_the_proposal_multiset() {
        let witness = assemble(&reconciled(&["alpha", "beta", "gamma"]));

        let values: HashSet<Fr> = ["alpha", "beta", "gamma"]
            .iter()
            .map(|text| proposal_value(text))
            .collect();
        let permuted_active: HashSet<Fr> = witness
            .permuted_proposals
            .iter()
            .copied()
            .filter(|value| !value.is_zero())
            .collect();

        assert_eq!(witness.num_active, 3);
        assert_eq!(permuted_active, values);
    }

    #[test]
    fn inactive_slots_are_zero_padded() {
        let witness = assemble(&reconciled(&["alpha", "beta"]));

        for slot in 2..SLOT_CAPACITY {
            assert_eq!(witness.permutation[slot], slot);
            assert!(witness.permuted_proposals[slot].is_zero());
        }
    }

    #[test]
    fn scatter_follows_the_derived_permutation() {
        let turn = reconciled(&["alpha", "beta", "gamma", "delta"]);
        let witness = assemble(&turn);

        for (slot, entry) in turn.slots.iter().enumerate() {
            let target = witness.permutation[slot];
            assert_eq!(
                witness.permuted_proposals[target],
                proposal_value(&entry.plaintext)
            );
        }
    }

    #[test]
    fn empty_proposals_commit_as_zero_values() {
        let witness = assemble(&reconciled(&["alpha", "", "gamma"]));

        // The empty slot's value is zero, but its commitment still binds
        // slot randomness.
        let hasher = PoseidonHasher::bn254();
        assert_eq!(
            witness.commitments[1],
            hasher.hash(&[Fr::zero(), witness.randomnesses[1]])
        );
    }

    #[test]
    fn witness_is_deterministic() {
        let turn = reconciled(&["alpha", "beta"]);
        let first = assemble(&turn);
        let second = assemble(&turn);

        assert_eq!(first.permutation, second.permutation);
        assert_eq!(first.permutation_commitment, second.permutation_commitment);
        assert_eq!(first.commitments, second.commitments);
        assert_eq!(first.permutation_randomness, second.permutation_randomness);
    }
}
