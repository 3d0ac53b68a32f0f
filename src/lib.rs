//! Arbiter-side protocol for a turn-based proposal/voting game with
//! hidden authorship: deterministic per-turn permutations bound to
//! Poseidon commitments, turn-scoped shared keys, AEAD-sealed payloads,
//! chain-event reconciliation, and integrity-proof witness assembly for
//! an external proving system.

pub mod codec;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod permutation;
pub mod reconcile;
pub mod signing;
pub mod turn_key;
pub mod witness;

pub use config::{poseidon_config, PoseidonHasher};
pub use coordinator::{TurnCoordinator, TurnCoordinatorConfig};
pub use error::ArbiterError;
pub use permutation::PermutationEngine;
