//! Agora Crypto - signing and hashing primitives for governance.
//!
//! This crate provides:
//! - Ed25519 keypairs and signature verification
//! - Blake3 hashing with domain separation
//! - Typed structured-data signing for off-chain vote and delegation
//!   authorizations

pub mod ed25519;
pub mod hash;
pub mod typed_data;
pub mod error;

pub use ed25519::{Keypair, verify as ed25519_verify};
pub use hash::{hash, hash_multi, hash_with_domain};
pub use typed_data::{Domain, SignedMessage, recover_signer, sign_typed, typed_digest};
pub use error::CryptoError;
