//! Per-player, per-turn symmetric key agreement.
//!
//! Both directions of `derive_shared_key` agree on the same key for a
//! given context, and the turn number is folded into the derivation, so a
//! leaked key is scoped to a single turn of a single game.

use std::fmt;

use sha3::{Digest, Keccak256};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::domain::{PlayerPublicKey, TurnContext, ValidationError};

const LOG_TARGET: &str = "conclave::turn_key";

const KEY_DOMAIN_TAG: &[u8] = b"conclave/turn-key/v1";

/// Symmetric key for one (player, game, turn, verifier, chain) tuple.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct TurnKey([u8; 32]);

impl TurnKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for TurnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TurnKey(..)")
    }
}

/// Derive the shared symmetric key between `my_secret` and
/// `their_public` for the given turn context.
///
/// Symmetric: `derive_shared_key(a, B, ctx) == derive_shared_key(b, A,
/// ctx)` for matching contexts, since x25519 agreement commutes and the
/// context bytes are identical on both sides.
#[tracing::instrument(target = LOG_TARGET, skip_all, fields(game_id = ctx.game_id, turn = ctx.turn))]
pub fn derive_shared_key(
    my_secret: &StaticSecret,
    their_public: &PlayerPublicKey,
    ctx: &TurnContext,
) -> Result<TurnKey, ValidationError> {
    let their_point = PublicKey::from(*their_public.as_bytes());
    let shared = my_secret.diffie_hellman(&their_point);

    // A low-order peer point collapses the agreement to all zeros.
    if shared.as_bytes() == &[0u8; 32] {
        return Err(ValidationError::DegenerateSharedSecret);
    }

    let mut hasher = Keccak256::new();
    hasher.update(KEY_DOMAIN_TAG);
    hasher.update(shared.as_bytes());
    hasher.update(ctx.game_id.to_be_bytes());
    hasher.update(ctx.turn.to_be_bytes());
    hasher.update(ctx.verifier.as_bytes());
    hasher.update(ctx.chain_id.to_be_bytes());

    Ok(TurnKey(hasher.finalize().into()))
}
