//! Serde and borsh for addresses and hashes.
//!
//! Serde goes through the display strings (bech32m addresses, 0x hashes) so
//! config files and event dumps stay readable. Borsh writes the raw
//! fixed-width bytes so hashed payloads stay canonical.

use crate::{Address, Hash};

#[cfg(feature = "serde")]
macro_rules! serde_as_display {
    ($ty:ty) => {
        impl serde::Serialize for $ty {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = <String as serde::Deserialize>::deserialize(deserializer)?;
                s.parse::<$ty>().map_err(serde::de::Error::custom)
            }
        }
    };
}

#[cfg(feature = "serde")]
serde_as_display!(Address);
#[cfg(feature = "serde")]
serde_as_display!(Hash);

#[cfg(feature = "borsh")]
macro_rules! borsh_as_bytes {
    ($ty:ty, $len:expr) => {
        impl borsh::BorshSerialize for $ty {
            fn serialize<W: std::io::Write>(&self, writer: &mut W) -> std::io::Result<()> {
                writer.write_all(self.as_bytes())
            }
        }

        impl borsh::BorshDeserialize for $ty {
            fn deserialize_reader<R: std::io::Read>(reader: &mut R) -> std::io::Result<Self> {
                let mut bytes = [0u8; $len];
                reader.read_exact(&mut bytes)?;
                Ok(<$ty>::from_bytes(bytes))
            }
        }
    };
}

#[cfg(feature = "borsh")]
borsh_as_bytes!(Address, 20);
#[cfg(feature = "borsh")]
borsh_as_bytes!(Hash, 32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(feature = "serde")]
    fn test_address_serializes_as_bech32m() {
        let addr = Address::from_label("timelock");
        let json = serde_json::to_string(&addr).unwrap();
        assert!(json.starts_with("\"agr1"));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(addr, back);
    }

    #[test]
    #[cfg(feature = "serde")]
    fn test_hash_serializes_as_hex() {
        let hash = Hash::compute(b"queued");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash));
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(hash, back);
        assert!(serde_json::from_str::<Hash>("\"0x12\"").is_err());
    }

    #[test]
    #[cfg(feature = "borsh")]
    fn test_address_borsh_is_raw_bytes() {
        let addr = Address::from_bytes([9u8; 20]);
        let encoded = borsh::to_vec(&addr).unwrap();
        assert_eq!(encoded, vec![9u8; 20]);
    }

    #[test]
    #[cfg(feature = "borsh")]
    fn test_borsh_vec_of_addresses_is_length_prefixed() {
        let list = vec![Address::from_bytes([1u8; 20]), Address::from_bytes([2u8; 20])];
        let encoded = borsh::to_vec(&list).unwrap();
        assert_eq!(encoded.len(), 4 + 40);
        let decoded: Vec<Address> = borsh::from_slice(&encoded).unwrap();
        assert_eq!(decoded, list);
    }
}
