use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use sha2::{Digest, Sha256};

use crate::{Address, Currency, HexBytes, PubKey, SIGNATURE_SIZE};

#[derive(thiserror::Error, Debug)]
pub enum TxParseError {
    #[error("malformed tx: {0}")]
    Json(#[from] serde_json::Error),
}

/// The signature block of a transaction. The nonce is chosen by the sender
/// and bound into the signing bytes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Signature {
    pub pubkey: PubKey,
    pub sig_bytes: HexBytes,
    pub nonce: u32,
}

/// The signed transaction envelope.
///
/// The payload is kept as the raw JSON the sender submitted: it is both the
/// bytes that were signed and the bytes each operation parses, so no
/// re-serialization can disturb either.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tx {
    #[serde(rename = "type")]
    pub kind: String,
    pub sender: Address,
    pub fee: Currency,
    pub last_height: u64,
    pub payload: Box<RawValue>,
    pub signature: Signature,
}

impl Tx {
    pub fn parse(bytes: &[u8]) -> Result<Tx, TxParseError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Canonical signing bytes: `type ‖ sender ‖ pubkey ‖ payload ‖ LE-u32(nonce)`.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let payload = self.payload.get().as_bytes();
        let mut buf =
            Vec::with_capacity(self.kind.len() + 20 + 32 + payload.len() + 4);
        buf.extend_from_slice(self.kind.as_bytes());
        buf.extend_from_slice(self.sender.as_bytes());
        buf.extend_from_slice(self.signature.pubkey.as_bytes());
        buf.extend_from_slice(payload);
        buf.extend_from_slice(&self.signature.nonce.to_le_bytes());
        buf
    }

    /// Verify the ed25519 signature over the signing bytes, and that the
    /// sender is the address of the signing key.
    pub fn verify(&self) -> bool {
        if self.signature.sig_bytes.len() != SIGNATURE_SIZE {
            return false;
        }
        if self.sender != self.signature.pubkey.address() {
            return false;
        }
        let Ok(key) = VerifyingKey::from_bytes(&self.signature.pubkey.0) else {
            return false;
        };
        let sig_bytes: [u8; SIGNATURE_SIZE] = self
            .signature
            .sig_bytes
            .as_slice()
            .try_into()
            .expect("length checked above");
        let signature = ed25519_dalek::Signature::from_bytes(&sig_bytes);
        key.verify(&self.signing_bytes(), &signature).is_ok()
    }

    /// Fill in the signature with the given key. Used by the CLI and tests.
    pub fn sign(&mut self, key: &SigningKey, nonce: u32) {
        self.signature.pubkey = PubKey(key.verifying_key().to_bytes());
        self.signature.nonce = nonce;
        self.sender = self.signature.pubkey.address();
        let sig = key.sign(&self.signing_bytes());
        self.signature.sig_bytes = HexBytes(sig.to_bytes().to_vec());
    }

    /// The digest under which this tx is remembered for replay prevention and
    /// indexed by block: SHA-256 over the tx bytes as delivered.
    pub fn hash_bytes(tx_bytes: &[u8]) -> [u8; 32] {
        Sha256::digest(tx_bytes).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_tx(kind: &str, payload: &str) -> Tx {
        let key = SigningKey::from_bytes(&[42; 32]);
        let mut tx = Tx {
            kind: kind.to_string(),
            sender: Address::default(),
            fee: Currency::zero(),
            last_height: 1,
            payload: RawValue::from_string(payload.to_string()).expect("valid JSON"),
            signature: Signature {
                pubkey: PubKey([0; 32]),
                sig_bytes: HexBytes::default(),
                nonce: 0,
            },
        };
        tx.sign(&key, 7);
        tx
    }

    #[test]
    fn sign_then_verify() {
        let tx = signed_tx("transfer", r#"{"to":"00","amount":"1"}"#);
        assert!(tx.verify());
    }

    #[test]
    fn verify_rejects_tampered_payload() {
        let mut tx = signed_tx("transfer", r#"{"to":"00","amount":"1"}"#);
        tx.payload = RawValue::from_string(r#"{"to":"00","amount":"2"}"#.to_string())
            .expect("valid JSON");
        assert!(!tx.verify());
    }

    #[test]
    fn verify_rejects_wrong_sender() {
        let mut tx = signed_tx("transfer", r#"{"amount":"1"}"#);
        tx.sender = Address([0xee; 20]);
        assert!(!tx.verify());
    }

    #[test]
    fn envelope_json_roundtrip_preserves_payload_bytes() {
        let tx = signed_tx("register", r#"{"target":"beef", "custody":"aa"}"#);
        let bytes = serde_json::to_vec(&tx).expect("serialize");
        let back = Tx::parse(&bytes).expect("parse");
        assert_eq!(back.payload.get(), tx.payload.get());
        assert!(back.verify());
    }

    #[test]
    fn hash_is_stable() {
        assert_eq!(Tx::hash_bytes(b"abc"), Tx::hash_bytes(b"abc"));
        assert_ne!(Tx::hash_bytes(b"abc"), Tx::hash_bytes(b"abd"));
    }
}
