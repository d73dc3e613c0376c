//! Typed structured-data signing.
//!
//! Off-chain authorizations (a ballot, a delegation) are signed over a digest
//! that binds three things together: the signing domain (application name,
//! chain id and the component that will verify the signature), a type tag
//! describing the message layout, and the canonical message bytes. A
//! signature produced for one component or chain never verifies on another.
//!
//! Verification is a pure function, [`recover_signer`], so it can be tested
//! apart from whatever state change the signature authorizes.

use agora_types::{Address, Ed25519PublicKey, Ed25519Signature, Hash};

use crate::ed25519::{verify, Keypair};
use crate::error::CryptoError;
use crate::hash::{hash, hash_multi, hash_with_domain};

const DOMAIN_TAG: &str = "agora.typed-data.domain";
const DIGEST_PREFIX: &[u8; 2] = b"\x19\x01";

/// Signing domain of a verifying component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    pub name: String,
    pub chain_id: u64,
    pub verifying_component: Address,
}

impl Domain {
    pub fn new(name: impl Into<String>, chain_id: u64, verifying_component: Address) -> Self {
        Self {
            name: name.into(),
            chain_id,
            verifying_component,
        }
    }

    /// Domain separator mixed into every digest signed under this domain.
    pub fn separator(&self) -> Result<Hash, CryptoError> {
        let encoded = borsh::to_vec(&(&self.name, self.chain_id, self.verifying_component))?;
        Ok(hash_with_domain(&encoded, DOMAIN_TAG))
    }
}

/// A signature plus the key that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedMessage {
    pub public_key: Ed25519PublicKey,
    pub signature: Ed25519Signature,
}

/// Digest that is actually signed: `H(0x1901 ‖ separator ‖ H(type_tag) ‖ message)`.
pub fn typed_digest(domain_separator: &Hash, type_tag: &str, message: &[u8]) -> Hash {
    let type_hash = hash(type_tag.as_bytes());
    hash_multi(&[
        DIGEST_PREFIX,
        domain_separator.as_bytes(),
        type_hash.as_bytes(),
        message,
    ])
}

/// Sign `message` of type `type_tag` under the given domain.
pub fn sign_typed(
    keypair: &Keypair,
    domain_separator: &Hash,
    type_tag: &str,
    message: &[u8],
) -> SignedMessage {
    let digest = typed_digest(domain_separator, type_tag, message);
    SignedMessage {
        public_key: keypair.public_key(),
        signature: keypair.sign(digest.as_bytes()),
    }
}

/// Returns the signer's address when `signed` is a valid signature over the
/// typed message, `None` otherwise.
pub fn recover_signer(
    domain_separator: &Hash,
    type_tag: &str,
    message: &[u8],
    signed: &SignedMessage,
) -> Option<Address> {
    let digest = typed_digest(domain_separator, type_tag, message);
    verify(&signed.public_key, digest.as_bytes(), &signed.signature)
        .ok()
        .map(|_| signed.public_key.to_address())
}
