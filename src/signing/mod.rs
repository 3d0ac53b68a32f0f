//! Canonical signing transcripts, attestation envelopes, and the
//! arbiter's secret-derivation oracle.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::codec::{encode_ballot, SealedPayload};
use crate::domain::{ArbiterSecret, ChainId, GameId, PlayerAddress, VerifierAddress};

const DOMAIN_TAG: &[u8] = b"conclave/attest/v1";
const SECRET_DOMAIN_TAG: &[u8] = b"conclave/arbiter-secret/v1";

/// Builder for canonical attestation transcripts.
pub struct TranscriptBuilder {
    buffer: Vec<u8>,
}

impl TranscriptBuilder {
    pub fn new(kind: &'static str) -> Self {
        let mut buffer = Vec::with_capacity(128);
        buffer.extend_from_slice(DOMAIN_TAG);
        buffer.extend_from_slice(&(kind.len() as u16).to_be_bytes());
        buffer.extend_from_slice(kind.as_bytes());
        Self { buffer }
    }

    pub fn append_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) {
        self.buffer
            .extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        self.buffer.extend_from_slice(bytes);
    }

    pub fn finish(self) -> Vec<u8> {
        self.buffer
    }
}

/// Values that can be signed into a canonical transcript.
pub trait Signable {
    /// Logical kind string used for domain separation.
    fn domain_kind(&self) -> &'static str;

    /// Append this value's canonical representation into the builder.
    fn write_transcript(&self, builder: &mut TranscriptBuilder);

    /// Obtain canonical signing bytes.
    fn to_signing_bytes(&self) -> Vec<u8> {
        let mut builder = TranscriptBuilder::new(self.domain_kind());
        self.write_transcript(&mut builder);
        builder.finish()
    }
}

#[derive(Debug, Error)]
#[error("attestation signing failed: {0}")]
pub struct SignError(pub String);

/// Produces signatures over canonical transcripts. The actual scheme
/// (EOA typed data, hardware signer, ...) lives with the collaborator.
pub trait AttestationSigner: Send + Sync {
    fn sign(&self, transcript: &[u8]) -> Result<Vec<u8>, SignError>;
}

/// A signed envelope carrying a signable value, its signature, and the
/// exact transcript bytes that were signed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Attested<T>
where
    T: Signable,
{
    pub value: T,
    pub signature: Vec<u8>,
    /// Canonical bytes used for signing/verification.
    pub transcript: Vec<u8>,
}

impl<T> Attested<T>
where
    T: Signable,
{
    pub fn new(value: T, signer: &dyn AttestationSigner) -> Result<Self, SignError> {
        let transcript = value.to_signing_bytes();
        let signature = signer.sign(&transcript)?;
        Ok(Self {
            value,
            signature,
            transcript,
        })
    }
}

/// Binding commitment to proposal text, published alongside the sealed
/// payload.
pub fn payload_commitment(plaintext: &str) -> [u8; 32] {
    Keccak256::digest(plaintext.as_bytes()).into()
}

/// Binding hash of a ballot weight vector in canonical framing.
pub fn ballot_hash(weights: &[u64]) -> [u8; 32] {
    Keccak256::digest(encode_ballot(weights)).into()
}

/// Fields the contract requires a proposal submission to attest to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProposalAttestation {
    pub game_id: GameId,
    pub proposer: PlayerAddress,
    pub payload: SealedPayload,
    pub commitment: [u8; 32],
}

impl Signable for ProposalAttestation {
    fn domain_kind(&self) -> &'static str {
        "proposal_v1"
    }

    fn write_transcript(&self, builder: &mut TranscriptBuilder) {
        builder.append_u64(self.game_id);
        builder.append_bytes(self.proposer.as_bytes());
        builder.append_bytes(&self.payload.nonce);
        builder.append_bytes(&self.payload.ciphertext);
        builder.append_bytes(&self.commitment);
    }
}

/// Fields the contract requires a ballot submission to attest to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BallotAttestation {
    pub game_id: GameId,
    pub voter: PlayerAddress,
    pub payload: SealedPayload,
    pub ballot_hash: [u8; 32],
}

impl Signable for BallotAttestation {
    fn domain_kind(&self) -> &'static str {
        "ballot_v1"
    }

    fn write_transcript(&self, builder: &mut TranscriptBuilder) {
        builder.append_u64(self.game_id);
        builder.append_bytes(self.voter.as_bytes());
        builder.append_bytes(&self.payload.nonce);
        builder.append_bytes(&self.payload.ciphertext);
        builder.append_bytes(&self.ballot_hash);
    }
}

/// Context an arbiter secret is derived for. One secret per (game,
/// verifier, chain) binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SecretContext {
    pub game_id: GameId,
    pub verifier: VerifierAddress,
    pub chain_id: ChainId,
}

/// Key-derivation oracle. Production deployments derive the secret from
/// a deterministic signature over the context; the mechanism is the
/// collaborator's business, only the function contract matters here: the
/// same context must always yield the same secret.
pub trait SecretSource: Send + Sync {
    fn derive_secret(&self, ctx: &SecretContext) -> Result<ArbiterSecret, SignError>;
}

/// Derives game secrets from locally held key material.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct StaticSecretSource {
    material: [u8; 32],
}

impl StaticSecretSource {
    pub const fn new(material: [u8; 32]) -> Self {
        Self { material }
    }
}

impl SecretSource for StaticSecretSource {
    fn derive_secret(&self, ctx: &SecretContext) -> Result<ArbiterSecret, SignError> {
        let mut hasher = Keccak256::new();
        hasher.update(SECRET_DOMAIN_TAG);
        hasher.update(self.material);
        hasher.update(ctx.game_id.to_be_bytes());
        hasher.update(ctx.verifier.as_bytes());
        hasher.update(ctx.chain_id.to_be_bytes());
        Ok(ArbiterSecret::from_bytes(hasher.finalize().into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PlayerSecret;

    struct EchoSigner;

    impl AttestationSigner for EchoSigner {
        fn sign(&self, transcript: &[u8]) -> Result<Vec<u8>, SignError> {
            Ok(Keccak256::digest(transcript).to_vec())
        }
    }

    fn attestation() -> ProposalAttestation {
        ProposalAttestation {
            game_id: 9,
            proposer: PlayerSecret::from_bytes([2; 32]).identity().address,
            payload: SealedPayload {
                nonce: [0; 12],
                ciphertext: vec![1, 2, 3],
            },
            commitment: payload_commitment("motion text"),
        }
    }

    #[test]
    fn transcript_is_canonical() {
        assert_eq!(
            attestation().to_signing_bytes(),
            attestation().to_signing_bytes()
        );
    }

    #[test]
    fn transcript_separates_kinds() {
        let proposal = attestation();
        let ballot = BallotAttestation {
            game_id: proposal.game_id,
            voter: proposal.proposer,
            payload: proposal.payload.clone(),
            ballot_hash: proposal.commitment,
        };
        assert_ne!(proposal.to_signing_bytes(), ballot.to_signing_bytes());
    }

    #[test]
    fn envelope_carries_signed_transcript() {
        let attested = Attested::new(attestation(), &EchoSigner).unwrap();
        assert_eq!(attested.transcript, attested.value.to_signing_bytes());
        assert_eq!(
            attested.signature,
            Keccak256::digest(&attested.transcript).to_vec()
        );
    }

    #[test]
    fn secret_source_is_deterministic_and_context_scoped() {
        let source = StaticSecretSource::new([7; 32]);
        let ctx = SecretContext {
            game_id: 1,
            verifier: VerifierAddress::new([3; 20]),
            chain_id: 10,
        };
        let other_game = SecretContext { game_id: 2, ..ctx };

        let first = source.derive_secret(&ctx).unwrap();
        let second = source.derive_secret(&ctx).unwrap();
        let other = source.derive_secret(&other_game).unwrap();

        assert_eq!(first.as_bytes(), second.as_bytes());
        assert_ne!(first.as_bytes(), other.as_bytes());
    }
}
