//! Compact message signatures for gossip authentication.
//!
//! Mixers sign their queue advertisements and broadcast-transaction records
//! with the key behind their staking input. Signatures are 65-byte
//! recoverable ECDSA over the double-SHA256 of a fixed message magic plus
//! the payload text; verification recovers the public key and compares it
//! against the mixer's registered one.

use crate::MixingError;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use umbra_types::{sha256d, Hash256};

/// Header byte offset for recoverable signatures, as used by the message
/// signing convention of Bitcoin-derived chains.
const COMPACT_SIG_HEADER: u8 = 27;

/// A 65-byte recoverable signature: `[header, r, s]`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompactSignature(pub Vec<u8>);

impl CompactSignature {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A compressed secp256k1 public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixPublicKey(pub [u8; 33]);

/// Signing keypair held by an active mixer.
#[derive(Clone)]
pub struct MixKeypair {
    secret: SigningKey,
}

impl MixKeypair {
    /// Generate a fresh keypair.
    pub fn random() -> Self {
        MixKeypair {
            secret: SigningKey::random(&mut rand::thread_rng()),
        }
    }

    /// Load from 32 secret bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, MixingError> {
        let secret =
            SigningKey::from_slice(bytes).map_err(|e| MixingError::Signature(e.to_string()))?;
        Ok(MixKeypair { secret })
    }

    pub fn public(&self) -> MixPublicKey {
        let point = self.secret.verifying_key().to_encoded_point(true);
        let mut bytes = [0u8; 33];
        bytes.copy_from_slice(point.as_bytes());
        MixPublicKey(bytes)
    }
}

/// Hash signed messages the way the host chain hashes them: double-SHA256
/// over the message magic followed by the payload.
fn message_hash(magic: &str, payload: &str) -> Hash256 {
    let mut data = Vec::with_capacity(magic.len() + payload.len());
    data.extend_from_slice(magic.as_bytes());
    data.extend_from_slice(payload.as_bytes());
    sha256d(&data)
}

/// Produce a recoverable compact signature over `payload`.
pub fn sign_message(
    keypair: &MixKeypair,
    magic: &str,
    payload: &str,
) -> Result<CompactSignature, MixingError> {
    let hash = message_hash(magic, payload);
    let (sig, recovery) = keypair
        .secret
        .sign_prehash_recoverable(hash.as_bytes())
        .map_err(|e| MixingError::Signature(e.to_string()))?;

    let mut bytes = Vec::with_capacity(65);
    bytes.push(COMPACT_SIG_HEADER + recovery.to_byte());
    bytes.extend_from_slice(&sig.to_bytes());
    Ok(CompactSignature(bytes))
}

/// Verify a compact signature against a known public key.
pub fn verify_message(
    pubkey: &MixPublicKey,
    magic: &str,
    payload: &str,
    signature: &CompactSignature,
) -> Result<(), MixingError> {
    if signature.0.len() != 65 {
        return Err(MixingError::Signature(format!(
            "bad signature length: {}",
            signature.0.len()
        )));
    }

    let header = signature.0[0];
    if header < COMPACT_SIG_HEADER {
        return Err(MixingError::Signature("bad recovery header".into()));
    }
    let recovery = RecoveryId::from_byte((header - COMPACT_SIG_HEADER) & 0x03)
        .ok_or_else(|| MixingError::Signature("bad recovery id".into()))?;
    let sig = Signature::from_slice(&signature.0[1..65])
        .map_err(|e| MixingError::Signature(e.to_string()))?;

    let hash = message_hash(magic, payload);
    let recovered = VerifyingKey::recover_from_prehash(hash.as_bytes(), &sig, recovery)
        .map_err(|e| MixingError::Signature(format!("error recovering public key: {}", e)))?;

    let recovered_bytes = recovered.to_encoded_point(true);
    if recovered_bytes.as_bytes() != pubkey.0 {
        return Err(MixingError::Signature("keys don't match".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC: &str = "Umbra Signed Message:\n";

    #[test]
    fn test_sign_verify_roundtrip() {
        let keypair = MixKeypair::random();
        let sig = sign_message(&keypair, MAGIC, "payload").unwrap();
        assert_eq!(sig.0.len(), 65);
        assert!(verify_message(&keypair.public(), MAGIC, "payload", &sig).is_ok());
    }

    #[test]
    fn test_verify_rejects_wrong_payload() {
        let keypair = MixKeypair::random();
        let sig = sign_message(&keypair, MAGIC, "payload").unwrap();
        assert!(verify_message(&keypair.public(), MAGIC, "other", &sig).is_err());
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let keypair = MixKeypair::random();
        let other = MixKeypair::random();
        let sig = sign_message(&keypair, MAGIC, "payload").unwrap();
        assert!(verify_message(&other.public(), MAGIC, "payload", &sig).is_err());
    }

    #[test]
    fn test_verify_rejects_garbage() {
        let keypair = MixKeypair::random();
        assert!(verify_message(
            &keypair.public(),
            MAGIC,
            "payload",
            &CompactSignature(vec![0u8; 10])
        )
        .is_err());
        assert!(verify_message(
            &keypair.public(),
            MAGIC,
            "payload",
            &CompactSignature(vec![0u8; 65])
        )
        .is_err());
    }

    #[test]
    fn test_from_bytes_roundtrip() {
        let keypair = MixKeypair::random();
        let bytes: [u8; 32] = keypair.secret.to_bytes().into();
        let restored = MixKeypair::from_bytes(&bytes).unwrap();
        assert_eq!(restored.public(), keypair.public());
    }
}
