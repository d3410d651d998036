//! Typed transaction structures with deterministic BIP69 ordering.
//!
//! The canonical byte encoding here is the ledger's consensus serialization
//! (little-endian integers, varint-prefixed collections); `txid` is the
//! double-SHA256 of that encoding.

use crate::amount::Amount;
use crate::hash::{sha256d, Hash256};
use crate::script::Script;
use serde::{Deserialize, Serialize};

/// Reference to an output of a prior transaction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, vout: u32) -> Self {
        OutPoint { txid, vout }
    }

    /// The null outpoint marks coinbase inputs and uninitialized slots.
    pub fn null() -> Self {
        OutPoint {
            txid: Hash256::ZERO,
            vout: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.vout == u32::MAX
    }
}

impl std::fmt::Display for OutPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// Transaction input.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Script,
    pub sequence: u32,
}

impl TxIn {
    pub fn from_outpoint(prevout: OutPoint) -> Self {
        TxIn {
            prevout,
            script_sig: Script::new(),
            sequence: u32::MAX,
        }
    }
}

/// Transaction output.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct TxOut {
    pub value: Amount,
    pub script_pubkey: Script,
}

impl TxOut {
    pub fn new(value: Amount, script_pubkey: Script) -> Self {
        TxOut {
            value,
            script_pubkey,
        }
    }
}

/// Complete transaction.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub lock_time: u32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
}

impl Transaction {
    pub fn new() -> Self {
        Transaction {
            version: 1,
            lock_time: 0,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Whether the transaction carries no inputs and no outputs.
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }

    /// Sum of output values.
    pub fn value_out(&self) -> Amount {
        self.outputs.iter().map(|o| o.value).sum()
    }

    /// Consensus serialization.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.version.to_le_bytes());
        write_varint(&mut out, self.inputs.len() as u64);
        for input in &self.inputs {
            out.extend_from_slice(input.prevout.txid.as_bytes());
            out.extend_from_slice(&input.prevout.vout.to_le_bytes());
            write_varint(&mut out, input.script_sig.len() as u64);
            out.extend_from_slice(input.script_sig.as_bytes());
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }
        write_varint(&mut out, self.outputs.len() as u64);
        for output in &self.outputs {
            out.extend_from_slice(&output.value.to_le_bytes());
            write_varint(&mut out, output.script_pubkey.len() as u64);
            out.extend_from_slice(output.script_pubkey.as_bytes());
        }
        out.extend_from_slice(&self.lock_time.to_le_bytes());
        out
    }

    /// Transaction id: double-SHA256 of the consensus encoding.
    pub fn txid(&self) -> Hash256 {
        sha256d(&self.to_bytes())
    }

    /// Sort inputs and outputs in place per BIP69: inputs by
    /// `(prev txid, prev index)`, outputs by `(value, script)`.
    pub fn sort_bip69(&mut self) {
        self.inputs.sort_by(|a, b| a.prevout.cmp(&b.prevout));
        self.outputs
            .sort_by(|a, b| (a.value, &a.script_pubkey).cmp(&(b.value, &b.script_pubkey)));
    }

    /// Whether inputs and outputs are already in BIP69 order.
    pub fn is_bip69_sorted(&self) -> bool {
        self.inputs
            .windows(2)
            .all(|w| w[0].prevout <= w[1].prevout)
            && self
                .outputs
                .windows(2)
                .all(|w| (w[0].value, &w[0].script_pubkey) <= (w[1].value, &w[1].script_pubkey))
    }
}

fn write_varint(out: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => out.push(n as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x10000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&n.to_le_bytes());
        }
    }
}
