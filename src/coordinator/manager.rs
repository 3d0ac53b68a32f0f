//! The coordinator sequencing propose, vote and end-turn operations.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::info;

use crate::codec;
use crate::config::PoseidonHasher;
use crate::coordinator::{ChainReader, EndTurnCall, TransactionSubmitter, TxHash};
use crate::domain::{
    ArbiterSecret, Ballot, ChainId, GameId, GamePhase, PlayerAddress, PlayerIdentity, PlayerSecret,
    Proposal, TurnContext, TurnNumber, ValidationError, VerifierAddress, SLOT_CAPACITY,
};
use crate::error::ArbiterError;
use crate::permutation::PermutationEngine;
use crate::reconcile::TurnReconciler;
use crate::signing::{
    ballot_hash, payload_commitment, Attested, AttestationSigner, BallotAttestation,
    ProposalAttestation, SecretContext, SecretSource,
};
use crate::turn_key::{derive_shared_key, TurnKey};
use crate::witness::{IntegrityProofAssembler, ProofBackend, ProofGenerationError};

const LOG_TARGET: &str = "conclave::coordinator";

/// Collaborators and chain binding for one coordinator instance.
pub struct TurnCoordinatorConfig {
    pub chain: Arc<dyn ChainReader>,
    pub submitter: Arc<dyn TransactionSubmitter>,
    pub prover: Arc<dyn ProofBackend>,
    pub secrets: Arc<dyn SecretSource>,
    pub signer: Arc<dyn AttestationSigner>,
    pub hasher: PoseidonHasher,
    pub verifier: VerifierAddress,
    pub chain_id: ChainId,
}

/// Sequences the protocol per game. Holds no game state between calls;
/// phase, turn and players are re-read from the chain on every
/// operation, and keys, permutations and commitments are re-derived.
pub struct TurnCoordinator {
    chain: Arc<dyn ChainReader>,
    submitter: Arc<dyn TransactionSubmitter>,
    prover: Arc<dyn ProofBackend>,
    secrets: Arc<dyn SecretSource>,
    signer: Arc<dyn AttestationSigner>,
    engine: PermutationEngine,
    verifier: VerifierAddress,
    chain_id: ChainId,
}

impl TurnCoordinator {
    pub fn new(config: TurnCoordinatorConfig) -> Self {
        Self {
            chain: config.chain,
            submitter: config.submitter,
            prover: config.prover,
            secrets: config.secrets,
            signer: config.signer,
            engine: PermutationEngine::new(config.hasher),
            verifier: config.verifier,
            chain_id: config.chain_id,
        }
    }

    fn secret_context(&self, game_id: GameId) -> SecretContext {
        SecretContext {
            game_id,
            verifier: self.verifier,
            chain_id: self.chain_id,
        }
    }

    fn turn_context(&self, game_id: GameId, turn: TurnNumber) -> TurnContext {
        TurnContext {
            game_id,
            turn,
            verifier: self.verifier,
            chain_id: self.chain_id,
        }
    }

    async fn require_phase(
        &self,
        game_id: GameId,
        expected: GamePhase,
    ) -> Result<(), ArbiterError> {
        let actual = self.chain.game_phase(game_id).await?;
        if actual != expected {
            return Err(ValidationError::WrongPhase { expected, actual }.into());
        }
        Ok(())
    }

    /// Derive the arbiter-side turn key for every player. Keys are never
    /// cached; each call recomputes from the context.
    fn player_keys(
        &self,
        secret: &ArbiterSecret,
        players: &[PlayerIdentity],
        ctx: &TurnContext,
    ) -> Result<HashMap<PlayerAddress, TurnKey>, ValidationError> {
        let mut keys = HashMap::with_capacity(players.len());
        for player in players {
            let key = derive_shared_key(&secret.agreement(), &player.public_key, ctx)?;
            if keys.insert(player.address, key).is_some() {
                return Err(ValidationError::DuplicateRegistration {
                    player: player.address,
                });
            }
        }
        Ok(keys)
    }

    /// Seal and submit a proposal on behalf of `author` for the current
    /// turn.
    #[tracing::instrument(target = LOG_TARGET, skip_all, fields(game_id))]
    pub async fn submit_proposal(
        &self,
        game_id: GameId,
        author: &PlayerSecret,
        plaintext: &str,
    ) -> Result<TxHash, ArbiterError> {
        self.require_phase(game_id, GamePhase::Proposing).await?;
        let turn = self.chain.current_turn(game_id).await?;

        let proposal = Proposal {
            proposer: author.identity(),
            plaintext: plaintext.to_string(),
            turn,
        };

        let secret = self.secrets.derive_secret(&self.secret_context(game_id))?;
        let key = derive_shared_key(
            &author.agreement(),
            &secret.public_key(),
            &self.turn_context(game_id, turn),
        )?;
        let payload = codec::seal_proposal(&proposal.plaintext, &key, &mut rand::thread_rng())?;

        let attested = Attested::new(
            ProposalAttestation {
                game_id,
                proposer: proposal.proposer.address,
                payload,
                commitment: payload_commitment(&proposal.plaintext),
            },
            self.signer.as_ref(),
        )?;

        info!(target: LOG_TARGET, game_id, turn, proposer = %proposal.proposer.address, "submitting proposal");
        Ok(self.submitter.submit_proposal(attested).await?)
    }

    /// Seal and submit a ballot on behalf of `voter` for the current
    /// turn. The self-vote and shape invariants are checked locally,
    /// before anything is sent.
    #[tracing::instrument(target = LOG_TARGET, skip_all, fields(game_id))]
    pub async fn submit_ballot(
        &self,
        game_id: GameId,
        voter: &PlayerSecret,
        weights: &[u64],
    ) -> Result<TxHash, ArbiterError> {
        self.require_phase(game_id, GamePhase::Voting).await?;
        let players = self.chain.players(game_id).await?;
        let turn = self.chain.current_turn(game_id).await?;

        let identity = voter.identity();
        let slot = players
            .iter()
            .position(|player| player.address == identity.address)
            .ok_or(ValidationError::UnknownVoter {
                voter: identity.address,
            })?;

        let ballot = Ballot {
            voter: identity,
            weights: weights.to_vec(),
            turn,
        };
        ballot.validate(slot, players.len())?;

        let secret = self.secrets.derive_secret(&self.secret_context(game_id))?;
        let key = derive_shared_key(
            &voter.agreement(),
            &secret.public_key(),
            &self.turn_context(game_id, turn),
        )?;
        let payload = codec::seal_ballot(&ballot.weights, &key, &mut rand::thread_rng())?;

        let attested = Attested::new(
            BallotAttestation {
                game_id,
                voter: identity.address,
                payload,
                ballot_hash: ballot_hash(&ballot.weights),
            },
            self.signer.as_ref(),
        )?;

        info!(target: LOG_TARGET, game_id, turn, voter = %identity.address, "submitting ballot");
        Ok(self.submitter.submit_ballot(attested).await?)
    }

    /// Close the current turn: reconcile the previous turn's proposals,
    /// decrypt and validate this turn's ballots, assemble the integrity
    /// proof, and submit the turn-close transaction. All-or-nothing: any
    /// failure aborts before submission.
    #[tracing::instrument(target = LOG_TARGET, skip_all, fields(game_id))]
    pub async fn end_turn(&self, game_id: GameId) -> Result<TxHash, ArbiterError> {
        self.require_phase(game_id, GamePhase::Voting).await?;
        let turn = self.chain.current_turn(game_id).await?;
        let previous = turn.checked_sub(1).ok_or(ValidationError::NoPriorTurn)?;

        let players = self.chain.players(game_id).await?;
        if players.len() > SLOT_CAPACITY {
            return Err(ValidationError::CapacityExceeded {
                players: players.len(),
            }
            .into());
        }

        let secret = self.secrets.derive_secret(&self.secret_context(game_id))?;

        // Rebuild the previous turn exactly as transmitted.
        let previous_keys =
            self.player_keys(&secret, &players, &self.turn_context(game_id, previous))?;
        let close = self.chain.turn_close_event(game_id, previous).await?;
        let submissions = self.chain.proposal_events(game_id, previous).await?;
        let reconciled = TurnReconciler::new(&previous_keys)
            .reconcile(&close, &submissions)
            .await?;

        // Decrypt this turn's ballots, fanned out; one failure fails the
        // turn close.
        let keys = self.player_keys(&secret, &players, &self.turn_context(game_id, turn))?;
        let events = self.chain.ballot_events(game_id, turn).await?;
        let ballots = try_join_all(events.iter().map(|event| {
            let keys = &keys;
            async move {
                let key = keys
                    .get(&event.voter.address)
                    .ok_or(ValidationError::UnknownVoter {
                        voter: event.voter.address,
                    })?;
                let weights = codec::open_ballot(&event.payload, key)?;
                Ok::<_, ArbiterError>(Ballot {
                    voter: event.voter,
                    weights,
                    turn,
                })
            }
        }))
        .await?;

        let slot_of: HashMap<PlayerAddress, usize> = players
            .iter()
            .enumerate()
            .map(|(slot, player)| (player.address, slot))
            .collect();

        let mut votes = vec![0u64; players.len()];
        let mut voted = HashSet::new();
        for ballot in &ballots {
            if !voted.insert(ballot.voter.address) {
                return Err(ValidationError::DuplicateBallot {
                    voter: ballot.voter.address,
                }
                .into());
            }
            ballot.validate(slot_of[&ballot.voter.address], players.len())?;
            for (slot, weight) in ballot.weights.iter().enumerate() {
                votes[slot] += weight;
            }
        }

        let witness = IntegrityProofAssembler::new(&self.engine).assemble(
            &reconciled,
            &secret,
            &self.verifier,
        )?;
        let nullifier = witness.permutation_randomness;
        let permuted_proposals = witness.permuted_proposals;
        let permutation = witness.permutation;

        // Proving blocks on the external service; run it off the async
        // executor. Its failures are terminal, never retried here.
        let prover = Arc::clone(&self.prover);
        let proving_witness = witness.clone();
        let calldata = tokio::task::spawn_blocking(move || {
            let artifact = prover.generate_proof(&proving_witness)?;
            prover.generate_calldata(&artifact)
        })
        .await
        .map_err(|e| ProofGenerationError::Interrupted(e.to_string()))??;

        info!(
            target: LOG_TARGET,
            game_id,
            turn,
            ballots = ballots.len(),
            "submitting turn close"
        );
        Ok(self
            .submitter
            .end_turn(EndTurnCall {
                game_id,
                votes,
                permuted_proposals,
                permutation,
                nullifier,
                calldata,
            })
            .await?)
    }
}
