//! Shared session state and client entries.
//!
//! A [`Session`] is the state of one mix attempt, held by both roles; the
//! mixer additionally tracks one collateral per accepted client. Entries own
//! their inputs, outputs, and collateral; resetting the session drops them.

use crate::messages::PoolState;
use serde::{Deserialize, Serialize};
use umbra_types::{OutPoint, Script, Transaction, TxIn, TxOut};

/// One input offered into a mix, keeping the previous output script needed
/// for signing and the signature state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixTxIn {
    pub prevout: OutPoint,
    pub prev_script: Script,
    pub sequence: u32,
    pub script_sig: Script,
    pub has_sig: bool,
}

impl MixTxIn {
    pub fn new(prevout: OutPoint, prev_script: Script) -> Self {
        MixTxIn {
            prevout,
            prev_script,
            sequence: u32::MAX,
            script_sig: Script::new(),
            has_sig: false,
        }
    }

    /// The plain transaction input this will become in the final tx.
    pub fn to_txin(&self) -> TxIn {
        TxIn {
            prevout: self.prevout,
            script_sig: self.script_sig.clone(),
            sequence: self.sequence,
        }
    }
}

/// A client's contribution to a session: inputs, equal-value fresh outputs,
/// and the collateral backing them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolEntry {
    pub inputs: Vec<MixTxIn>,
    pub outputs: Vec<TxOut>,
    pub collateral: Transaction,
}

impl PoolEntry {
    pub fn new(inputs: Vec<MixTxIn>, outputs: Vec<TxOut>, collateral: Transaction) -> Self {
        PoolEntry {
            inputs,
            outputs,
            collateral,
        }
    }

    /// Attach an incoming scriptSig to the matching input. Fails on unknown
    /// outpoints, sequence mismatches, and inputs that are already signed.
    pub fn add_script_sig(&mut self, txin: &TxIn) -> bool {
        for input in &mut self.inputs {
            if input.prevout == txin.prevout && input.sequence == txin.sequence {
                if input.has_sig {
                    return false;
                }
                input.script_sig = txin.script_sig.clone();
                input.has_sig = true;
                return true;
            }
        }
        false
    }

    /// Whether every input carries a signature.
    pub fn is_fully_signed(&self) -> bool {
        self.inputs.iter().all(|i| i.has_sig)
    }
}

/// State of one mix attempt.
#[derive(Debug)]
pub struct Session {
    pub state: PoolState,
    /// Random nonzero id while a session is active.
    pub id: i32,
    /// Denomination mask every entry must encode.
    pub denom_mask: u32,
    pub entries: Vec<PoolEntry>,
    /// Mixer side: one collateral per client accepted into the session.
    pub collaterals: Vec<Transaction>,
    /// Merged transaction; empty until the signing phase.
    pub final_tx: Transaction,
    /// Epoch milliseconds of the last observable progress.
    pub last_step_ms: u64,
}

impl Session {
    pub fn new(now_ms: u64) -> Self {
        Session {
            state: PoolState::Idle,
            id: 0,
            denom_mask: 0,
            entries: Vec::new(),
            collaterals: Vec::new(),
            final_tx: Transaction::new(),
            last_step_ms: now_ms,
        }
    }

    /// Reset to the idle state, dropping entries, collaterals, and the
    /// final transaction.
    pub fn set_null(&mut self, now_ms: u64) {
        self.state = PoolState::Idle;
        self.id = 0;
        self.denom_mask = 0;
        self.entries.clear();
        self.collaterals.clear();
        self.final_tx = Transaction::new();
        self.last_step_ms = now_ms;
    }

    pub fn touch(&mut self, now_ms: u64) {
        self.last_step_ms = now_ms;
    }

    /// Whether an input outpoint is already claimed by an earlier entry.
    pub fn has_input(&self, prevout: &OutPoint) -> bool {
        self.entries
            .iter()
            .any(|e| e.inputs.iter().any(|i| i.prevout == *prevout))
    }

    /// Whether every entry's every input is signed.
    pub fn signatures_complete(&self) -> bool {
        self.entries.iter().all(|e| e.is_fully_signed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_types::{sha256d, COIN};

    fn outpoint(tag: &[u8], vout: u32) -> OutPoint {
        OutPoint::new(sha256d(tag), vout)
    }

    fn entry_with_inputs(tags: &[&[u8]]) -> PoolEntry {
        let inputs = tags
            .iter()
            .map(|t| MixTxIn::new(outpoint(t, 0), Script::pay_to_pubkey_hash(&[2; 20])))
            .collect();
        PoolEntry::new(inputs, Vec::new(), Transaction::new())
    }

    #[test]
    fn test_set_null_restores_idle_invariant() {
        let mut session = Session::new(1000);
        session.state = PoolState::Success;
        session.id = 42;
        session.denom_mask = 0b0100;
        session.entries.push(entry_with_inputs(&[b"a"]));
        session.collaterals.push(Transaction::new());
        session.final_tx.outputs.push(TxOut::new(COIN, Script::new()));

        session.set_null(2000);
        assert_eq!(session.state, PoolState::Idle);
        assert_eq!(session.id, 0);
        assert_eq!(session.denom_mask, 0);
        assert!(session.entries.is_empty());
        assert!(session.collaterals.is_empty());
        assert!(session.final_tx.is_empty());
        assert_eq!(session.last_step_ms, 2000);
    }

    #[test]
    fn test_has_input() {
        let mut session = Session::new(0);
        session.entries.push(entry_with_inputs(&[b"a", b"b"]));
        assert!(session.has_input(&outpoint(b"a", 0)));
        assert!(!session.has_input(&outpoint(b"c", 0)));
    }

    #[test]
    fn test_add_script_sig_matches_outpoint_and_sequence() {
        let mut entry = entry_with_inputs(&[b"a"]);
        let mut signed = entry.inputs[0].to_txin();
        signed.script_sig = Script(vec![1, 2, 3]);

        // Sequence mismatch fails.
        let mut wrong_seq = signed.clone();
        wrong_seq.sequence = 0;
        assert!(!entry.add_script_sig(&wrong_seq));

        assert!(entry.add_script_sig(&signed));
        assert!(entry.inputs[0].has_sig);
        assert_eq!(entry.inputs[0].script_sig, Script(vec![1, 2, 3]));

        // Re-signing the same input fails.
        assert!(!entry.add_script_sig(&signed));
    }

    #[test]
    fn test_signatures_complete() {
        let mut session = Session::new(0);
        session.entries.push(entry_with_inputs(&[b"a", b"b"]));
        assert!(!session.signatures_complete());

        for idx in 0..2 {
            let mut signed = session.entries[0].inputs[idx].to_txin();
            signed.script_sig = Script(vec![idx as u8 + 1]);
            assert!(session.entries[0].add_script_sig(&signed));
        }
        assert!(session.signatures_complete());
    }
}
