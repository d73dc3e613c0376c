//! Agora Types - primitive values shared by the governance crates.
//!
//! - Addresses (20-byte, Bech32m encoded with the `agr` prefix)
//! - Hashes (32-byte blake3 digests)
//! - Ed25519 public keys and signatures used for off-chain authorizations

pub mod address;
pub mod hash;
pub mod signature;
pub mod error;

#[cfg(any(feature = "serde", feature = "borsh"))]
mod serialization;

pub use address::Address;
pub use hash::Hash;
pub use signature::{Ed25519PublicKey, Ed25519Signature};
pub use error::TypesError;

/// Block height.
pub type BlockNumber = u64;

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// Token amounts and voting power.
pub type Amount = u128;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Address, Amount, BlockNumber, Ed25519PublicKey, Ed25519Signature, Hash, Timestamp,
        TypesError,
    };
}
