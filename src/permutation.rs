//! Deterministic per-turn permutation and commitment derivation.
//!
//! Everything here is a pure function of (game, turn, arbiter secret,
//! verifier address): any process holding the same secret reproduces the
//! same salt, permutation and commitment byte for byte, which is what
//! dispute resolution relies on. Nothing is cached across turns.

use std::fmt;

use ark_bn254::Fr;
use ark_ff::PrimeField;
use sha3::{Digest, Keccak256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::PoseidonHasher;
use crate::domain::{
    ArbiterSecret, GameId, TurnNumber, ValidationError, VerifierAddress, SLOT_CAPACITY,
};

const LOG_TARGET: &str = "conclave::permutation";

const SALT_DOMAIN_TAG: &[u8] = b"conclave/turn-salt/v1";
const SLOT_RAND_DOMAIN_TAG: &[u8] = b"conclave/slot-rand/v1";

/// Per-turn secret scalar binding a permutation to (game, turn).
/// Revealed on chain as the nullifier when the turn closes.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct TurnSalt([u8; 32]);

impl TurnSalt {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Field representation, used when the salt is folded into a
    /// commitment or published as the nullifier.
    pub fn scalar(&self) -> Fr {
        Fr::from_le_bytes_mod_order(&self.0)
    }
}

impl fmt::Debug for TurnSalt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TurnSalt(..)")
    }
}

/// Bijection over the fixed 15-slot domain. `slots[i]` is the
/// destination of slot `i`'s proposal; slots at or above the active
/// player count map to themselves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Permutation {
    slots: [usize; SLOT_CAPACITY],
}

impl Permutation {
    pub fn slots(&self) -> &[usize; SLOT_CAPACITY] {
        &self.slots
    }

    pub fn destination(&self, slot: usize) -> usize {
        self.slots[slot]
    }
}

/// Derives per-turn permutations, salts and commitments. Stateless; the
/// Poseidon service is injected once at construction.
pub struct PermutationEngine {
    hasher: PoseidonHasher,
}

impl PermutationEngine {
    pub fn new(hasher: PoseidonHasher) -> Self {
        Self { hasher }
    }

    pub fn hasher(&self) -> &PoseidonHasher {
        &self.hasher
    }

    /// One-way salt derivation over (secret, game, verifier, turn).
    /// Unrecoverable without the arbiter's secret.
    pub fn derive_turn_salt(
        &self,
        secret: &ArbiterSecret,
        game_id: GameId,
        verifier: &VerifierAddress,
        turn: TurnNumber,
    ) -> TurnSalt {
        let mut hasher = Keccak256::new();
        hasher.update(SALT_DOMAIN_TAG);
        hasher.update(secret.as_bytes());
        hasher.update(game_id.to_be_bytes());
        hasher.update(verifier.as_bytes());
        hasher.update(turn.to_be_bytes());
        TurnSalt(hasher.finalize().into())
    }

    /// Deterministic Fisher-Yates over `[0, slot_count)`, seeded by the
    /// turn salt. Indices at or above `slot_count` map to themselves.
    #[tracing::instrument(target = LOG_TARGET, skip_all, fields(game_id, turn, slot_count))]
    pub fn derive_permutation(
        &self,
        game_id: GameId,
        turn: TurnNumber,
        slot_count: usize,
        secret: &ArbiterSecret,
        verifier: &VerifierAddress,
    ) -> Result<(Permutation, TurnSalt), ValidationError> {
        if slot_count > SLOT_CAPACITY {
            return Err(ValidationError::CapacityExceeded {
                players: slot_count,
            });
        }

        let salt = self.derive_turn_salt(secret, game_id, verifier, turn);

        let mut slots: [usize; SLOT_CAPACITY] = std::array::from_fn(|i| i);
        for i in (0..slot_count).rev() {
            let j = salt_draw(&salt, i as u64) % (i as u128 + 1);
            slots.swap(i, j as usize);
        }

        tracing::debug!(target: LOG_TARGET, ?slots, "derived turn permutation");
        Ok((Permutation { slots }, salt))
    }

    /// Commit to a permutation and its salt: three fixed-arity Poseidon
    /// groups (5, then 6, then 6, each folding the prior group's hash),
    /// then fold the salt. The shape never varies with `slot_count`.
    pub fn commit(&self, permutation: &Permutation, salt: &TurnSalt) -> Fr {
        let p: Vec<Fr> = permutation
            .slots
            .iter()
            .map(|&slot| Fr::from(slot as u64))
            .collect();

        let mut first = Vec::with_capacity(5);
        first.extend_from_slice(&p[0..5]);
        let h1 = self.hasher.hash(&first);

        let mut second = Vec::with_capacity(6);
        second.push(h1);
        second.extend_from_slice(&p[5..10]);
        let h2 = self.hasher.hash(&second);

        let mut third = Vec::with_capacity(6);
        third.push(h2);
        third.extend_from_slice(&p[10..15]);
        let h3 = self.hasher.hash(&third);

        self.hasher.hash(&[h3, salt.scalar()])
    }

    /// Deterministic per-slot commitment randomness, scoped by the salt.
    pub fn slot_randomness(&self, salt: &TurnSalt, slot: usize) -> Fr {
        let mut hasher = Keccak256::new();
        hasher.update(SLOT_RAND_DOMAIN_TAG);
        hasher.update(salt.as_bytes());
        hasher.update((slot as u64).to_be_bytes());
        Fr::from_le_bytes_mod_order(&hasher.finalize())
    }
}

/// Draw for Fisher-Yates step `i`: `keccak(salt ‖ i)` reduced to a wide
/// integer, taken modulo `i + 1` by the caller.
fn salt_draw(salt: &TurnSalt, step: u64) -> u128 {
    let mut hasher = Keccak256::new();
    hasher.update(salt.as_bytes());
    hasher.update(step.to_be_bytes());
    let digest = hasher.finalize();
    u128::from_be_bytes(digest[..16].try_into().expect("digest is 32 bytes"))
}
