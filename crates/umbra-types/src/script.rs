//! Output and signature scripts.
//!
//! Only the small surface the mixing core needs: building pay-to-pubkey-hash
//! outputs and recognizing the standard payment shapes that are allowed into
//! a mix.

use serde::{Deserialize, Serialize};

// Opcodes used by the standard payment templates.
const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;
const OP_EQUAL: u8 = 0x87;

/// Serialized script bytes.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Script(pub Vec<u8>);

impl Script {
    pub fn new() -> Self {
        Script(Vec::new())
    }

    /// Build a pay-to-pubkey-hash output script for a 20-byte key hash.
    pub fn pay_to_pubkey_hash(key_hash: &[u8; 20]) -> Self {
        let mut bytes = Vec::with_capacity(25);
        bytes.push(OP_DUP);
        bytes.push(OP_HASH160);
        bytes.push(20);
        bytes.extend_from_slice(key_hash);
        bytes.push(OP_EQUALVERIFY);
        bytes.push(OP_CHECKSIG);
        Script(bytes)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// `OP_DUP OP_HASH160 <20 bytes> OP_EQUALVERIFY OP_CHECKSIG`
    pub fn is_pay_to_pubkey_hash(&self) -> bool {
        let b = &self.0;
        b.len() == 25
            && b[0] == OP_DUP
            && b[1] == OP_HASH160
            && b[2] == 20
            && b[23] == OP_EQUALVERIFY
            && b[24] == OP_CHECKSIG
    }

    /// `OP_HASH160 <20 bytes> OP_EQUAL`
    pub fn is_pay_to_script_hash(&self) -> bool {
        let b = &self.0;
        b.len() == 23 && b[0] == OP_HASH160 && b[1] == 20 && b[22] == OP_EQUAL
    }

    /// Whether this is one of the standard payment shapes accepted by the
    /// mixing protocol (P2PKH or P2SH).
    pub fn is_standard_payment(&self) -> bool {
        self.is_pay_to_pubkey_hash() || self.is_pay_to_script_hash()
    }
}

impl std::fmt::Debug for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Script({})", hex::encode(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_p2pkh_shape() {
        let s = Script::pay_to_pubkey_hash(&[0x11; 20]);
        assert_eq!(s.len(), 25);
        assert!(s.is_pay_to_pubkey_hash());
        assert!(s.is_standard_payment());
        assert!(!s.is_pay_to_script_hash());
    }

    #[test]
    fn test_non_standard_rejected() {
        assert!(!Script(vec![0x6a, 0x04, 1, 2, 3, 4]).is_standard_payment()); // OP_RETURN
        assert!(!Script::new().is_standard_payment());
        // Truncated P2PKH.
        let mut s = Script::pay_to_pubkey_hash(&[0x11; 20]);
        s.0.pop();
        assert!(!s.is_standard_payment());
    }
}
