//! Denomination table and mask arithmetic.
//!
//! Mixing only ever combines outputs of identical denominations. The table is
//! chosen so that each denomination converts down to the next by an exact
//! factor of ten while never being an exact multiple of it:
//!
//! ```text
//! 10.01    == 1.001   * 10
//! 1.001    == 0.1001  * 10
//! 0.1001   == 0.01001 * 10
//! ```
//!
//! A denomination *mask* is a bitfield over the table: bit `i` set means
//! denomination `i` is present. Mask `0` means "non-denominated".

use rand::Rng;
use umbra_types::{format_amount, Amount, TxOut, COIN};

/// The denomination table, smallest first.
pub const DENOMINATIONS: [Amount; 4] = [
    COIN / 100 + 1_000,  // 0.01001
    COIN / 10 + 10_000,  // 0.1001
    COIN + 100_000,      // 1.001
    10 * COIN + 1_000_000, // 10.01
];

/// The smallest denomination; also the largest fee tolerated on a submitted
/// entry.
pub fn smallest_denomination() -> Amount {
    DENOMINATIONS[0]
}

/// Whether `value` is exactly one of the denominations.
pub fn is_denominated(value: Amount) -> bool {
    DENOMINATIONS.contains(&value)
}

/// Encode the denominations present in `outputs` as a mask.
///
/// Returns 0 as soon as any output is not exactly denominated.
pub fn mask_from_outputs(outputs: &[TxOut]) -> u32 {
    let mut mask = 0u32;
    for out in outputs {
        match DENOMINATIONS.iter().position(|&d| d == out.value) {
            Some(i) => mask |= 1 << i,
            None => return 0,
        }
    }
    mask
}

/// Derive a single-denomination mask from a list of wallet amounts.
///
/// Walks the table and keeps at most one randomly-chosen present bit, the
/// way a session denomination is picked from whatever the wallet holds. Can
/// return 0; callers retry.
pub fn single_random_mask_from_amounts(amounts: &[Amount]) -> u32 {
    let mut rng = rand::thread_rng();
    let mut present = [false; DENOMINATIONS.len()];
    for &amount in amounts {
        if let Some(i) = DENOMINATIONS.iter().position(|&d| d == amount) {
            present[i] = true;
        }
    }

    for (i, &p) in present.iter().enumerate() {
        if p && rng.gen_range(0..2) == 1 {
            return 1 << i;
        }
    }
    0
}

/// Decode a mask into the list of set bit indices.
///
/// Rejects masks with bits beyond the table and the empty mask.
pub fn mask_bits(mask: u32) -> Option<Vec<usize>> {
    if mask >= 1 << DENOMINATIONS.len() {
        return None;
    }
    let bits: Vec<usize> = (0..DENOMINATIONS.len()).filter(|i| mask & (1 << i) != 0).collect();
    if bits.is_empty() {
        None
    } else {
        Some(bits)
    }
}

/// Render a mask for humans: present denominations largest-first joined
/// with `+`, e.g. `10.01+1.001`.
pub fn mask_to_string(mask: u32) -> String {
    if mask >= 1 << DENOMINATIONS.len() {
        return "out-of-bounds".to_string();
    }

    let mut parts = Vec::new();
    for i in (0..DENOMINATIONS.len()).rev() {
        if mask & (1 << i) != 0 {
            parts.push(format_amount(DENOMINATIONS[i]));
        }
    }

    if parts.is_empty() {
        "non-denom".to_string()
    } else {
        parts.join("+")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_types::Script;

    fn outs(values: &[Amount]) -> Vec<TxOut> {
        values
            .iter()
            .map(|&v| TxOut::new(v, Script::pay_to_pubkey_hash(&[7; 20])))
            .collect()
    }

    #[test]
    fn test_table_converts_by_tens() {
        for w in DENOMINATIONS.windows(2) {
            assert_eq!(w[0] * 10, w[1]);
        }
    }

    #[test]
    fn test_table_avoids_round_amounts() {
        // The suffix keeps every denomination off the round 0.01/0.1/1/10
        // grid, so denominated outputs never collide with ordinary payments.
        let round = [COIN / 100, COIN / 10, COIN, 10 * COIN];
        for &d in &DENOMINATIONS {
            assert_ne!(d % COIN, 0);
            for &r in &round {
                assert_ne!(d, r);
            }
        }
    }

    #[test]
    fn test_mask_from_outputs() {
        assert_eq!(mask_from_outputs(&outs(&[DENOMINATIONS[2]])), 0b0100);
        assert_eq!(
            mask_from_outputs(&outs(&[DENOMINATIONS[0], DENOMINATIONS[3]])),
            0b1001
        );
        // Duplicate denominations set the bit once.
        assert_eq!(
            mask_from_outputs(&outs(&[DENOMINATIONS[1], DENOMINATIONS[1]])),
            0b0010
        );
    }

    #[test]
    fn test_non_denom_output_voids_mask() {
        assert_eq!(mask_from_outputs(&outs(&[DENOMINATIONS[2], 12345])), 0);
        assert_eq!(mask_from_outputs(&outs(&[COIN])), 0);
    }

    #[test]
    fn test_empty_outputs_yield_zero() {
        assert_eq!(mask_from_outputs(&[]), 0);
    }

    #[test]
    fn test_mask_bits_roundtrip() {
        for mask in 1u32..(1 << DENOMINATIONS.len()) {
            let bits = mask_bits(mask).unwrap();
            let rebuilt = bits.iter().fold(0u32, |m, &b| m | (1 << b));
            assert_eq!(rebuilt, mask);
        }
    }

    #[test]
    fn test_mask_bits_rejects_out_of_bounds() {
        assert!(mask_bits(0).is_none());
        assert!(mask_bits(1 << DENOMINATIONS.len()).is_none());
        assert!(mask_bits(u32::MAX).is_none());
    }

    #[test]
    fn test_mask_to_string() {
        assert_eq!(mask_to_string(0), "non-denom");
        assert_eq!(mask_to_string(0b0100), "1.001");
        assert_eq!(mask_to_string(0b1001), "10.01+0.01001");
        assert_eq!(mask_to_string(1 << DENOMINATIONS.len()), "out-of-bounds");
    }

    #[test]
    fn test_mask_to_string_injective_on_valid_masks() {
        let mut seen = std::collections::HashSet::new();
        for mask in 0u32..(1 << DENOMINATIONS.len()) {
            assert!(seen.insert(mask_to_string(mask)), "collision at {}", mask);
        }
    }

    #[test]
    fn test_single_random_mask_is_singleton_subset() {
        let amounts = [DENOMINATIONS[0], DENOMINATIONS[2], 777];
        for _ in 0..50 {
            let mask = single_random_mask_from_amounts(&amounts);
            assert!(mask == 0 || mask == 0b0001 || mask == 0b0100);
            if mask != 0 {
                assert_eq!(mask.count_ones(), 1);
            }
        }
    }

    #[test]
    fn test_single_random_mask_no_denoms() {
        assert_eq!(single_random_mask_from_amounts(&[123, 456]), 0);
        assert_eq!(single_random_mask_from_amounts(&[]), 0);
    }
}
