//! AEAD sealing of proposal text and ballot weight vectors.
//!
//! ChaCha20-Poly1305 under a [`TurnKey`]. Tampering and wrong keys fail
//! authentication (`CodecError::Decryption`); content that authenticates
//! but does not parse is a distinct `CodecError::Decode`, so protocol
//! violations and transport corruption stay distinguishable.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::turn_key::TurnKey;

const LOG_TARGET: &str = "conclave::codec";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("payload encryption failed")]
    Encryption,

    #[error("payload decryption failed: wrong key or corrupted ciphertext")]
    Decryption,

    #[error("decrypted payload is malformed: {0}")]
    Decode(String),
}

/// Nonce plus ciphertext, the durable transport form of every payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPayload {
    pub nonce: [u8; 12],
    pub ciphertext: Vec<u8>,
}

fn seal_bytes(
    plaintext: &[u8],
    key: &TurnKey,
    rng: &mut impl RngCore,
) -> Result<SealedPayload, CodecError> {
    let cipher =
        ChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|_| CodecError::Encryption)?;

    let mut nonce = [0u8; 12];
    rng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CodecError::Encryption)?;

    Ok(SealedPayload { nonce, ciphertext })
}

fn open_bytes(sealed: &SealedPayload, key: &TurnKey) -> Result<Vec<u8>, CodecError> {
    let cipher =
        ChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|_| CodecError::Decryption)?;

    cipher
        .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_slice())
        .map_err(|_| CodecError::Decryption)
}

/// Seal proposal text for transport.
pub fn seal_proposal(
    plaintext: &str,
    key: &TurnKey,
    rng: &mut impl RngCore,
) -> Result<SealedPayload, CodecError> {
    seal_bytes(plaintext.as_bytes(), key, rng)
}

/// Open a sealed proposal back into text.
pub fn open_proposal(sealed: &SealedPayload, key: &TurnKey) -> Result<String, CodecError> {
    let plaintext = open_bytes(sealed, key)?;
    String::from_utf8(plaintext).map_err(|e| CodecError::Decode(e.to_string()))
}

/// Canonical ballot framing: a big-endian `u16` weight count followed by
/// one big-endian `u64` per slot.
pub fn encode_ballot(weights: &[u64]) -> Vec<u8> {
    debug_assert!(weights.len() <= u16::MAX as usize);
    let mut bytes = Vec::with_capacity(2 + weights.len() * 8);
    bytes.extend_from_slice(&(weights.len() as u16).to_be_bytes());
    for weight in weights {
        bytes.extend_from_slice(&weight.to_be_bytes());
    }
    bytes
}

pub fn decode_ballot(bytes: &[u8]) -> Result<Vec<u64>, CodecError> {
    if bytes.len() < 2 {
        return Err(CodecError::Decode("ballot frame shorter than header".to_string()));
    }
    let count = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
    let expected = 2 + count * 8;
    if bytes.len() != expected {
        return Err(CodecError::Decode(format!(
            "ballot frame of {} bytes, header promises {expected}",
            bytes.len()
        )));
    }
    let weights = bytes[2..]
        .chunks_exact(8)
        .map(|chunk| u64::from_be_bytes(chunk.try_into().expect("chunks_exact yields 8 bytes")))
        .collect();
    Ok(weights)
}

/// Seal an ordered ballot weight vector.
pub fn seal_ballot(
    weights: &[u64],
    key: &TurnKey,
    rng: &mut impl RngCore,
) -> Result<SealedPayload, CodecError> {
    tracing::debug!(target: LOG_TARGET, slots = weights.len(), "sealing ballot");
    seal_bytes(&encode_ballot(weights), key, rng)
}

/// Open a sealed ballot back into its weight vector.
pub fn open_ballot(sealed: &SealedPayload, key: &TurnKey) -> Result<Vec<u64>, CodecError> {
    let bytes = open_bytes(sealed, key)?;
    decode_ballot(&bytes)
}
