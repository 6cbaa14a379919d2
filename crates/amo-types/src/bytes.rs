use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use sha2::{Digest, Sha256};

use crate::{ADDRESS_SIZE, PUB_KEY_SIZE};

/// A 20-byte account address. Validator addresses use the same form, derived
/// from the validator pubkey by the consensus engine.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; ADDRESS_SIZE]);

impl Address {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn from_slice(b: &[u8]) -> Option<Address> {
        Some(Address(b.try_into().ok()?))
    }

    /// The address of an ed25519 public key: the first 20 bytes of its
    /// SHA-256 digest.
    pub fn from_pub_key(pub_key: &PubKey) -> Address {
        let digest = Sha256::digest(pub_key.0);
        Address(digest[..ADDRESS_SIZE].try_into().expect("SHA256 output is 32 bytes"))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", hex::encode(self.0))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let b = hex::decode(&s).map_err(de::Error::custom)?;
        Address::from_slice(&b)
            .ok_or_else(|| de::Error::custom(format!("address must be {ADDRESS_SIZE} bytes")))
    }
}

/// A 32-byte ed25519 public key, as carried in validator stake records.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PubKey(pub [u8; PUB_KEY_SIZE]);

impl PubKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn from_slice(b: &[u8]) -> Option<PubKey> {
        Some(PubKey(b.try_into().ok()?))
    }

    pub fn address(&self) -> Address {
        Address::from_pub_key(self)
    }
}

impl fmt::Display for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PubKey({})", hex::encode(self.0))
    }
}

impl Serialize for PubKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for PubKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let b = hex::decode(&s).map_err(de::Error::custom)?;
        PubKey::from_slice(&b)
            .ok_or_else(|| de::Error::custom(format!("pubkey must be {PUB_KEY_SIZE} bytes")))
    }
}

/// A variable-length byte string that serializes as lowercase hex. Used for
/// parcel ids, custody blobs, and signatures.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HexBytes(pub Vec<u8>);

impl HexBytes {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<Vec<u8>> for HexBytes {
    fn from(v: Vec<u8>) -> Self {
        HexBytes(v)
    }
}

impl From<&[u8]> for HexBytes {
    fn from(v: &[u8]) -> Self {
        HexBytes(v.to_vec())
    }
}

impl fmt::Display for HexBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl fmt::Debug for HexBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HexBytes({})", hex::encode(&self.0))
    }
}

impl Serialize for HexBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for HexBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let b = hex::decode(&s).map_err(de::Error::custom)?;
        Ok(HexBytes(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_roundtrip() {
        let addr = Address([0xab; ADDRESS_SIZE]);
        let json = serde_json::to_string(&addr).expect("serialize");
        assert_eq!(json, format!("\"{}\"", "ab".repeat(ADDRESS_SIZE)));
        let back: Address = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(addr, back);
    }

    #[test]
    fn address_rejects_wrong_size() {
        let err = serde_json::from_str::<Address>("\"abcd\"");
        assert!(err.is_err());
    }

    #[test]
    fn address_derivation_is_stable() {
        let key = PubKey([7; PUB_KEY_SIZE]);
        assert_eq!(key.address(), key.address());
        assert_ne!(key.address(), PubKey([8; PUB_KEY_SIZE]).address());
    }
}
