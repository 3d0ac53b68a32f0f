//! Poseidon parameters and environment-based arbiter configuration.

use anyhow::{anyhow, Context, Result};
use ark_bn254::Fr;
use ark_crypto_primitives::sponge::{
    poseidon::{find_poseidon_ark_and_mds, PoseidonConfig, PoseidonSponge},
    CryptographicSponge,
};
use ark_ff::PrimeField;
use serde::Deserialize;

use crate::domain::{ArbiterSecret, ChainId, VerifierAddress};

/// Returns the Poseidon configuration shared by permutation commitments
/// and witness assembly: rate 2, capacity 1, alpha = 5.
pub fn poseidon_config<F: PrimeField>() -> PoseidonConfig<F> {
    let full_rounds = 8;
    let partial_rounds = 31;
    let rate = 2;
    let (ark, mds) = find_poseidon_ark_and_mds::<F>(
        F::MODULUS_BIT_SIZE as u64,
        rate,
        full_rounds as u64,
        partial_rounds as u64,
        0,
    );
    PoseidonConfig::new(full_rounds, partial_rounds, 5, mds, ark, rate, 1)
}

/// Stateless Poseidon hashing service. Built once and injected into the
/// components that fold field elements; no hidden global sponge state.
#[derive(Clone)]
pub struct PoseidonHasher {
    config: PoseidonConfig<Fr>,
}

impl PoseidonHasher {
    pub fn new(config: PoseidonConfig<Fr>) -> Self {
        Self { config }
    }

    pub fn bn254() -> Self {
        Self::new(poseidon_config::<Fr>())
    }

    /// Hash a fixed group of field elements into one.
    pub fn hash(&self, inputs: &[Fr]) -> Fr {
        let mut sponge = PoseidonSponge::new(&self.config);
        for input in inputs {
            sponge.absorb(input);
        }
        sponge.squeeze_field_elements::<Fr>(1)[0]
    }
}

/// Everything the arbiter needs to operate on one chain.
pub struct ArbiterConfig {
    pub secret: ArbiterSecret,
    pub verifier: VerifierAddress,
    pub chain_id: ChainId,
}

#[derive(Deserialize)]
struct EnvArbiterRecord {
    secret: String,
    verifier: String,
    chain_id: ChainId,
}

/// Load the arbiter configuration from a JSON env record:
/// `{"secret": "0x..32 bytes..", "verifier": "0x..20 bytes..",
/// "chain_id": 1}`.
pub fn load_arbiter_config_from_env(var: &str) -> Result<ArbiterConfig> {
    dotenv::dotenv().ok();

    let raw = std::env::var(var).with_context(|| format!("environment variable {var} not set"))?;
    let record: EnvArbiterRecord =
        serde_json::from_str(&raw).context("failed to parse arbiter config JSON record")?;

    let trimmed = record.secret.trim();
    let without_prefix = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(without_prefix).context("invalid hex encoding for arbiter secret")?;
    let secret: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow!("arbiter secret must be exactly 32 bytes"))?;

    let verifier = VerifierAddress::from_hex(&record.verifier)
        .map_err(|e| anyhow!("invalid verifier address: {e}"))?;

    Ok(ArbiterConfig {
        secret: ArbiterSecret::from_bytes(secret),
        verifier,
        chain_id: record.chain_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_std::Zero;

    #[test]
    fn poseidon_hash_is_deterministic() {
        let a = PoseidonHasher::bn254();
        let b = PoseidonHasher::bn254();
        let inputs = [Fr::from(1u64), Fr::from(2u64), Fr::from(3u64)];
        assert_eq!(a.hash(&inputs), b.hash(&inputs));
    }

    #[test]
    fn poseidon_hash_separates_inputs() {
        let hasher = PoseidonHasher::bn254();
        let one = hasher.hash(&[Fr::from(1u64)]);
        let two = hasher.hash(&[Fr::from(2u64)]);
        assert_ne!(one, two);
        assert_ne!(one, Fr::zero());
    }

    #[test]
    fn env_config_round_trips() {
        let var = "CONCLAVE_TEST_ARBITER_CONFIG";
        std::env::set_var(
            var,
            format!(
                r#"{{"secret": "0x{}", "verifier": "0x{}", "chain_id": 31337}}"#,
                hex::encode([0x5a; 32]),
                hex::encode([0x11; 20]),
            ),
        );
        let config = load_arbiter_config_from_env(var).unwrap();
        assert_eq!(config.secret.as_bytes(), &[0x5a; 32]);
        assert_eq!(config.verifier.as_bytes(), &[0x11; 20]);
        assert_eq!(config.chain_id, 31337);
        std::env::remove_var(var);
    }

    #[test]
    fn env_config_rejects_short_secret() {
        let var = "CONCLAVE_TEST_ARBITER_CONFIG_SHORT";
        std::env::set_var(
            var,
            format!(
                r#"{{"secret": "0xabcd", "verifier": "0x{}", "chain_id": 1}}"#,
                hex::encode([0x11; 20]),
            ),
        );
        assert!(load_arbiter_config_from_env(var).is_err());
        std::env::remove_var(var);
    }
}
