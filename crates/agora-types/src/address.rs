use crate::error::TypesError;
use std::fmt;
use std::str::FromStr;

/// 20-byte account or component address.
/// Display format: Bech32m with the "agr" human-readable prefix.
///
/// Externally owned accounts derive their address from an ed25519 public key
/// (`blake3(pubkey)[0..20]`); governance components derive theirs from a
/// label (`blake3("agora.component:" ++ label)[0..20]`), so two deployments
/// with the same labels agree on every address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; 20]);

impl Address {
    pub const ZERO: Self = Self([0u8; 20]);
    pub const LEN: usize = 20;

    /// Bech32m human-readable prefix
    pub const BECH32_HRP: &'static str = "agr";

    const COMPONENT_DOMAIN: &'static [u8] = b"agora.component:";

    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Create from a byte slice
    pub fn from_slice(slice: &[u8]) -> Result<Self, TypesError> {
        if slice.len() != 20 {
            return Err(TypesError::InvalidAddressLength(slice.len()));
        }
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// Derive address from ed25519 public key bytes (32 bytes).
    pub fn from_public_key(pubkey: &[u8; 32]) -> Self {
        Self::truncate(blake3::hash(pubkey))
    }

    /// Derive the deterministic address of a named component
    /// (engine, timelock, token ledger, ...).
    pub fn from_label(label: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(Self::COMPONENT_DOMAIN);
        hasher.update(label.as_bytes());
        Self::truncate(hasher.finalize())
    }

    fn truncate(hash: blake3::Hash) -> Self {
        let mut addr = [0u8; 20];
        addr.copy_from_slice(&hash.as_bytes()[..20]);
        Self(addr)
    }

    /// Check if this is the zero (unset) address
    pub fn is_zero(&self) -> bool {
        self == &Self::ZERO
    }

    /// Convert to hex string without 0x prefix
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hrp = bech32::Hrp::parse_unchecked(Self::BECH32_HRP);
        match bech32::encode::<bech32::Bech32m>(hrp, &self.0) {
            Ok(encoded) => write!(f, "{}", encoded),
            Err(_) => Err(fmt::Error),
        }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(0x{})", hex::encode(self.0))
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with("agr1") {
            let (hrp, data) = bech32::decode(s).map_err(|e| TypesError::Bech32Error(e.to_string()))?;

            let expected_hrp = bech32::Hrp::parse_unchecked(Self::BECH32_HRP);
            if hrp != expected_hrp {
                return Err(TypesError::InvalidAddressFormat(format!(
                    "Invalid HRP: expected '{}', got '{}'",
                    Self::BECH32_HRP,
                    hrp
                )));
            }

            Self::from_slice(&data)
        } else if let Some(hex_part) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            let bytes = hex::decode(hex_part)?;
            Self::from_slice(&bytes)
        } else {
            Err(TypesError::InvalidAddressFormat(s.to_string()))
        }
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_zero() {
        assert_eq!(Address::ZERO.as_bytes(), &[0u8; 20]);
        assert!(Address::ZERO.is_zero());
        assert_eq!(Address::default(), Address::ZERO);
    }

    #[test]
    fn test_address_from_label_is_deterministic() {
        let engine = Address::from_label("engine");
        assert_eq!(engine, Address::from_label("engine"));
        assert_ne!(engine, Address::from_label("timelock"));
        assert!(!engine.is_zero());
    }

    #[test]
    fn test_label_and_key_derivations_differ() {
        // Same input bytes, different derivation domains.
        let bytes = [7u8; 32];
        let label = std::str::from_utf8(&bytes).unwrap();
        assert_ne!(Address::from_label(label), Address::from_public_key(&bytes));
    }

    #[test]
    fn test_address_bech32m_roundtrip() {
        let addr = Address::from_label("token:EUL");
        let encoded = addr.to_string();
        assert!(encoded.starts_with("agr1"));

        let decoded: Address = encoded.parse().unwrap();
        assert_eq!(addr, decoded);
    }

    #[test]
    fn test_address_hex_parse() {
        let addr = Address::from_bytes([0xab; 20]);
        let parsed: Address = format!("{:x}", addr).parse().unwrap();
        assert_eq!(addr, parsed);
    }

    #[test]
    fn test_address_from_str_invalid() {
        assert!(Address::from_str("invalid").is_err());
        assert!(Address::from_str("0x1234").is_err());
        assert!(Address::from_str("agr1qqqq").is_err());
    }
}
