//! Rebuilds a closed turn's slot-to-proposal mapping from chain events.
//!
//! Two independently sourced views have to agree: the turn-close event's
//! recorded payload array in original player order, and the individual
//! submission events decrypted with each proposer's derived key. Any
//! disagreement is a protocol violation and aborts the whole turn close;
//! there is no skip-bad-slot path.

use std::collections::{HashMap, HashSet};

use futures::future::try_join_all;
use thiserror::Error;

use crate::codec::{self, CodecError};
use crate::domain::events::{ProposalSubmitted, TurnClosed};
use crate::domain::{GameId, PlayerAddress, PlayerIdentity, TurnNumber};
use crate::turn_key::TurnKey;

const LOG_TARGET: &str = "conclave::reconcile";

#[derive(Debug, Error)]
pub enum ReconciliationError {
    #[error("submission from {proposer} does not belong to any registered proposer")]
    UnknownProposer { proposer: PlayerAddress },

    #[error("slot {slot} plaintext does not match its submission event")]
    PlaintextMismatch { slot: usize },

    #[error("proposer {proposer} appears in more than one submission event")]
    DuplicateSubmission { proposer: PlayerAddress },

    #[error("slot {slot} has a recorded payload but no submission event")]
    MissingSubmission { slot: usize },

    #[error("no turn key available for player {player}")]
    MissingKey { player: PlayerAddress },

    #[error("payload for slot {slot} could not be opened")]
    Payload {
        slot: usize,
        #[source]
        source: CodecError,
    },
}

/// One reconciled slot: the proposer in original order and their
/// plaintext. Players who submitted nothing carry an empty string, never
/// an absent entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconciledSlot {
    pub proposer: PlayerIdentity,
    pub plaintext: String,
}

/// The previous turn as originally transmitted, one entry per player.
#[derive(Clone, Debug)]
pub struct ReconciledTurn {
    pub game_id: GameId,
    pub turn: TurnNumber,
    pub slots: Vec<ReconciledSlot>,
}

/// Reconciles one closed turn against the per-player turn keys derived
/// for it.
pub struct TurnReconciler<'a> {
    keys: &'a HashMap<PlayerAddress, TurnKey>,
}

impl<'a> TurnReconciler<'a> {
    pub fn new(keys: &'a HashMap<PlayerAddress, TurnKey>) -> Self {
        Self { keys }
    }

    fn key_for(&self, player: &PlayerAddress) -> Result<&TurnKey, ReconciliationError> {
        self.keys
            .get(player)
            .ok_or(ReconciliationError::MissingKey { player: *player })
    }

    /// Rebuild the slot mapping for `close`, cross-checked against the
    /// individual `submissions`. Per-slot decryptions run concurrently;
    /// one failure fails the turn.
    #[tracing::instrument(target = LOG_TARGET, skip_all, fields(game_id = close.game_id, turn = close.turn))]
    pub async fn reconcile(
        &self,
        close: &TurnClosed,
        submissions: &[ProposalSubmitted],
    ) -> Result<ReconciledTurn, ReconciliationError> {
        let decryptions = close
            .players
            .iter()
            .zip(close.original_payloads.iter())
            .enumerate()
            .map(|(slot, (player, payload))| async move {
                let plaintext = match payload {
                    None => String::new(),
                    Some(sealed) => codec::open_proposal(sealed, self.key_for(&player.address)?)
                        .map_err(|source| ReconciliationError::Payload { slot, source })?,
                };
                Ok::<_, ReconciliationError>(plaintext)
            });
        let slot_plaintexts = try_join_all(decryptions).await?;

        let slot_of: HashMap<PlayerAddress, usize> = close
            .players
            .iter()
            .enumerate()
            .map(|(slot, player)| (player.address, slot))
            .collect();

        let mut matched_slots = HashSet::new();
        for submission in submissions {
            let proposer = submission.proposer.address;
            let slot = *slot_of
                .get(&proposer)
                .ok_or(ReconciliationError::UnknownProposer { proposer })?;
            if !matched_slots.insert(slot) {
                return Err(ReconciliationError::DuplicateSubmission { proposer });
            }

            let plaintext = codec::open_proposal(&submission.payload, self.key_for(&proposer)?)
                .map_err(|source| ReconciliationError::Payload { slot, source })?;
            if plaintext != slot_plaintexts[slot] {
                return Err(ReconciliationError::PlaintextMismatch { slot });
            }
        }

        for (slot, payload) in close.original_payloads.iter().enumerate() {
            if payload.is_some() && !matched_slots.contains(&slot) {
                return Err(ReconciliationError::MissingSubmission { slot });
            }
        }

        tracing::debug!(
            target: LOG_TARGET,
            slots = slot_plaintexts.len(),
            submissions = submissions.len(),
            "turn reconciled"
        );

        Ok(ReconciledTurn {
            game_id: close.game_id,
            turn: close.turn,
            slots: close
                .players
                .iter()
                .zip(slot_plaintexts)
                .map(|(player, plaintext)| ReconciledSlot {
                    proposer: *player,
                    plaintext,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::seal_proposal;
    use crate::domain::{PlayerSecret, TurnContext, VerifierAddress};
    use crate::turn_key::derive_shared_key;
    use rand::{rngs::StdRng, SeedableRng};

    struct Fixture {
        arbiter: PlayerSecret,
        players: Vec<PlayerSecret>,
        ctx: TurnContext,
    }

    impl Fixture {
        fn new(count: u8) -> Self {
            Self {
                arbiter: PlayerSecret::from_bytes([0xaa; 32]),
                players: (1..=count)
                    .map(|i| PlayerSecret::from_bytes([i; 32]))
                    .collect(),
                ctx: TurnContext {
                    game_id: 7,
                    turn: 1,
                    verifier: VerifierAddress::new([0x22; 20]),
                    chain_id: 1,
                },
            }
        }

        fn keys(&self) -> HashMap<PlayerAddress, TurnKey> {
            self.players
                .iter()
                .map(|player| {
                    let key = derive_shared_key(
                        &self.arbiter.agreement(),
                        &player.identity().public_key,
                        &self.ctx,
                    )
                    .unwrap();
                    (player.identity().address, key)
                })
                .collect()
        }

        fn sealed(&self, player: usize, plaintext: &str) -> crate::codec::SealedPayload {
            let keys = self.keys();
            let key = &keys[&self.players[player].identity().address];
            seal_proposal(plaintext, key, &mut StdRng::seed_from_u64(player as u64)).unwrap()
        }

        fn close(&self, payloads: Vec<Option<crate::codec::SealedPayload>>) -> TurnClosed {
            TurnClosed {
                game_id: self.ctx.game_id,
                turn: self.ctx.turn,
                players: self.players.iter().map(|p| p.identity()).collect(),
                original_payloads: payloads,
            }
        }

        fn submission(&self, player: usize, plaintext: &str) -> ProposalSubmitted {
            ProposalSubmitted {
                game_id: self.ctx.game_id,
                turn: self.ctx.turn,
                proposer: self.players[player].identity(),
                payload: self.sealed(player, plaintext),
            }
        }
    }

    #[tokio::test]
    async fn three_players_reconcile_in_order() {
        let fixture = Fixture::new(3);
        let close = fixture.close(vec![
            Some(fixture.sealed(0, "open the gates")),
            Some(fixture.sealed(1, "tax the harbor")),
            Some(fixture.sealed(2, "burn the fleet")),
        ]);
        let submissions = vec![
            fixture.submission(2, "burn the fleet"),
            fixture.submission(0, "open the gates"),
            fixture.submission(1, "tax the harbor"),
        ];

        let keys = fixture.keys();
        let reconciled = TurnReconciler::new(&keys)
            .reconcile(&close, &submissions)
            .await
            .unwrap();

        assert_eq!(reconciled.slots.len(), 3);
        assert_eq!(reconciled.slots[0].plaintext, "open the gates");
        assert_eq!(reconciled.slots[1].plaintext, "tax the harbor");
        assert_eq!(reconciled.slots[2].plaintext, "burn the fleet");
        assert_eq!(
            reconciled.slots[1].proposer,
            fixture.players[1].identity()
        );
    }

    #[tokio::test]
    async fn silent_player_maps_to_empty_string() {
        let fixture = Fixture::new(3);
        let close = fixture.close(vec![
            Some(fixture.sealed(0, "open the gates")),
            None,
            Some(fixture.sealed(2, "burn the fleet")),
        ]);
        let submissions = vec![
            fixture.submission(0, "open the gates"),
            fixture.submission(2, "burn the fleet"),
        ];

        let keys = fixture.keys();
        let reconciled = TurnReconciler::new(&keys)
            .reconcile(&close, &submissions)
            .await
            .unwrap();

        assert_eq!(reconciled.slots[1].plaintext, "");
        assert_eq!(
            reconciled.slots[1].proposer,
            fixture.players[1].identity()
        );
    }

    #[tokio::test]
    async fn unknown_proposer_is_fatal() {
        let fixture = Fixture::new(2);
        let close = fixture.close(vec![Some(fixture.sealed(0, "motion")), None]);
        let outsider = Fixture::new(3);
        let submissions = vec![
            fixture.submission(0, "motion"),
            outsider.submission(2, "sneaky rider"),
        ];

        let keys = fixture.keys();
        let result = TurnReconciler::new(&keys)
            .reconcile(&close, &submissions)
            .await;

        assert!(matches!(
            result,
            Err(ReconciliationError::UnknownProposer { .. })
        ));
    }

    #[tokio::test]
    async fn mismatched_plaintext_is_fatal() {
        let fixture = Fixture::new(2);
        let close = fixture.close(vec![Some(fixture.sealed(0, "motion A")), None]);
        let submissions = vec![fixture.submission(0, "motion B")];

        let keys = fixture.keys();
        let result = TurnReconciler::new(&keys)
            .reconcile(&close, &submissions)
            .await;

        assert!(matches!(
            result,
            Err(ReconciliationError::PlaintextMismatch { slot: 0 })
        ));
    }

    #[tokio::test]
    async fn wrong_key_surfaces_decryption_failure() {
        let fixture = Fixture::new(2);
        // Payload sealed under a key no player owns.
        let stray = seal_proposal(
            "motion",
            &TurnKey::from_bytes([0xee; 32]),
            &mut StdRng::seed_from_u64(99),
        )
        .unwrap();
        let close = fixture.close(vec![Some(stray), None]);

        let keys = fixture.keys();
        let result = TurnReconciler::new(&keys).reconcile(&close, &[]).await;

        assert!(matches!(
            result,
            Err(ReconciliationError::Payload {
                slot: 0,
                source: CodecError::Decryption
            })
        ));
    }

    #[tokio::test]
    async fn recorded_payload_without_submission_is_fatal() {
        let fixture = Fixture::new(2);
        let close = fixture.close(vec![Some(fixture.sealed(0, "motion")), None]);

        let keys = fixture.keys();
        let result = TurnReconciler::new(&keys).reconcile(&close, &[]).await;

        assert!(matches!(
            result,
            Err(ReconciliationError::MissingSubmission { slot: 0 })
        ));
    }
}
