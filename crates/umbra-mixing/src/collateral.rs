//! Collateral transaction validation.
//!
//! A collateral is a prepared transaction every client posts on entry. It is
//! only ever broadcast when the poster misbehaves, at which point its excess
//! of inputs over outputs pays miners. Until then it sits with the mixer.

use crate::interfaces::Ledger;
use crate::MIXING_COLLATERAL;
use log::debug;
use umbra_types::{format_amount, Amount, Transaction};

/// Check a candidate collateral: shape, known inputs, fee floor, and
/// mempool acceptability. No side effects.
pub fn is_collateral_valid(tx: &Transaction, ledger: &dyn Ledger) -> bool {
    if tx.outputs.is_empty() {
        return false;
    }
    if tx.lock_time != 0 {
        return false;
    }

    let mut value_out: Amount = 0;
    for out in &tx.outputs {
        value_out += out.value;
        if !out.script_pubkey.is_standard_payment() {
            debug!("collateral rejected: non-standard output script");
            return false;
        }
    }

    let mut value_in: Amount = 0;
    for input in &tx.inputs {
        match ledger.get_output_value(&input.prevout) {
            Some(v) => value_in += v,
            None => {
                debug!("collateral rejected: unknown input {}", input.prevout);
                return false;
            }
        }
    }

    if value_in - value_out < MIXING_COLLATERAL {
        debug!(
            "collateral rejected: fee {} below {}",
            format_amount(value_in - value_out),
            format_amount(MIXING_COLLATERAL)
        );
        return false;
    }

    if !ledger.accept_to_mempool(tx) {
        debug!("collateral rejected: didn't pass mempool acceptance");
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use umbra_types::{sha256d, Hash256, OutPoint, Script, TxIn, TxOut};

    struct MapLedger {
        outputs: Mutex<HashMap<OutPoint, Amount>>,
        mempool_ok: bool,
    }

    impl MapLedger {
        fn new(mempool_ok: bool) -> Self {
            MapLedger {
                outputs: Mutex::new(HashMap::new()),
                mempool_ok,
            }
        }

        fn fund(&self, outpoint: OutPoint, value: Amount) {
            self.outputs.lock().unwrap().insert(outpoint, value);
        }
    }

    impl Ledger for MapLedger {
        fn get_output_value(&self, outpoint: &OutPoint) -> Option<Amount> {
            self.outputs.lock().unwrap().get(outpoint).copied()
        }
        fn accept_to_mempool(&self, _tx: &Transaction) -> bool {
            self.mempool_ok
        }
        fn relay_transaction(&self, _tx: &Transaction) {}
        fn relay_inventory(&self, _txid: &Hash256) {}
        fn tip_height(&self) -> u32 {
            0
        }
    }

    fn collateral_tx(input_value: Amount, output_value: Amount) -> (Transaction, MapLedger) {
        let ledger = MapLedger::new(true);
        let prevout = OutPoint::new(sha256d(b"funding"), 0);
        ledger.fund(prevout, input_value);

        let mut tx = Transaction::new();
        tx.inputs.push(TxIn::from_outpoint(prevout));
        tx.outputs
            .push(TxOut::new(output_value, Script::pay_to_pubkey_hash(&[1; 20])));
        (tx, ledger)
    }

    #[test]
    fn test_valid_collateral() {
        let (tx, ledger) = collateral_tx(4 * MIXING_COLLATERAL, 3 * MIXING_COLLATERAL);
        assert!(is_collateral_valid(&tx, &ledger));
    }

    #[test]
    fn test_fee_exactly_at_floor() {
        let (tx, ledger) = collateral_tx(2 * MIXING_COLLATERAL, MIXING_COLLATERAL);
        assert!(is_collateral_valid(&tx, &ledger));
    }

    #[test]
    fn test_fee_below_floor() {
        let (tx, ledger) = collateral_tx(2 * MIXING_COLLATERAL, 2 * MIXING_COLLATERAL - 1);
        assert!(!is_collateral_valid(&tx, &ledger));
    }

    #[test]
    fn test_unknown_input() {
        let (mut tx, ledger) = collateral_tx(4 * MIXING_COLLATERAL, MIXING_COLLATERAL);
        tx.inputs
            .push(TxIn::from_outpoint(OutPoint::new(sha256d(b"unknown"), 1)));
        assert!(!is_collateral_valid(&tx, &ledger));
    }

    #[test]
    fn test_locktime_rejected() {
        let (mut tx, ledger) = collateral_tx(4 * MIXING_COLLATERAL, MIXING_COLLATERAL);
        tx.lock_time = 1;
        assert!(!is_collateral_valid(&tx, &ledger));
    }

    #[test]
    fn test_no_outputs_rejected() {
        let (mut tx, ledger) = collateral_tx(4 * MIXING_COLLATERAL, MIXING_COLLATERAL);
        tx.outputs.clear();
        assert!(!is_collateral_valid(&tx, &ledger));
    }

    #[test]
    fn test_non_standard_output_rejected() {
        let (mut tx, ledger) = collateral_tx(4 * MIXING_COLLATERAL, MIXING_COLLATERAL);
        tx.outputs[0].script_pubkey = Script(vec![0x6a]); // OP_RETURN
        assert!(!is_collateral_valid(&tx, &ledger));
    }

    #[test]
    fn test_mempool_rejection_propagates() {
        let (tx, _) = collateral_tx(4 * MIXING_COLLATERAL, MIXING_COLLATERAL);
        let strict = MapLedger::new(false);
        strict.fund(tx.inputs[0].prevout, 4 * MIXING_COLLATERAL);
        assert!(!is_collateral_valid(&tx, &strict));
    }
}
