//! Automatic-denomination driver.
//!
//! Runs from the periodic worker and walks the wallet through the mix on
//! its own: split funds into denominations, keep collateral-sized inputs
//! around, pick a mixer (preferring gossiped queues), and submit. Every
//! outcome lands in a user-visible status string; failures are retried on
//! the next tick rather than propagated.

use crate::client::{ClientInner, ClientPool, Outbound};
use crate::collateral::is_collateral_valid;
use crate::denom::{
    is_denominated, mask_bits, mask_from_outputs, single_random_mask_from_amounts,
    smallest_denomination, DENOMINATIONS,
};
use crate::interfaces::CoinFilter;
use crate::messages::{MixMessage, PoolState};
use crate::session::{MixTxIn, PoolEntry};
use crate::{
    MixingError, DENOMS_COUNT_MAX, MIXING_COLLATERAL, MIXING_KEYS_THRESHOLD_STOP,
    MIXING_KEYS_THRESHOLD_WARNING, MIXING_POOL_MAX,
};
use log::{debug, info, warn};
use rand::Rng;
use umbra_types::{format_amount, Amount, Transaction, TxOut, COIN};

/// Client mixing configuration.
#[derive(Debug, Clone)]
pub struct MixingOptions {
    /// Master switch; the driver flips this off on fatal local conditions.
    pub enabled: bool,
    /// Target number of mixing rounds per coin.
    pub rounds: u32,
    /// Keep denominating until this much balance is denominated.
    pub target_balance: Amount,
    /// Nonzero for liquidity providers, which always follow queues and
    /// never open sessions of their own.
    pub liquidity_provider: u32,
    /// Allow several sessions without waiting for confirmations between.
    pub multi_session: bool,
    /// Blocks to wait after a successful mix before the next one.
    pub min_block_spacing: u32,
}

impl Default for MixingOptions {
    fn default() -> Self {
        MixingOptions {
            enabled: false,
            rounds: 2,
            target_balance: 1000 * COIN,
            liquidity_provider: 0,
            multi_session: false,
            min_block_spacing: 16,
        }
    }
}

impl ClientPool {
    /// One pass of the automatic mixing loop. Returns whether any forward
    /// progress was made; the reason lands in the status string either way.
    ///
    /// With `dry_run` every gate and balance is evaluated but nothing is
    /// sent, created, or locked.
    pub fn do_automatic_denominating(&self, dry_run: bool, now_ms: u64) -> bool {
        let mut out = Vec::new();
        let result = {
            let Ok(mut inner) = self.inner.try_lock() else {
                return false;
            };
            self.auto_denominate(&mut inner, &mut out, dry_run, now_ms)
        };
        self.flush(out);
        result
    }

    fn auto_denominate(
        &self,
        inner: &mut ClientInner,
        out: &mut Vec<Outbound>,
        dry_run: bool,
        now_ms: u64,
    ) -> bool {
        if !inner.options.enabled {
            return false;
        }
        if inner.session.state != PoolState::Idle {
            return false;
        }
        if !self.sync.is_mixer_list_synced() {
            inner.auto_denom_result = "Can't mix while sync is in progress.".to_string();
            return false;
        }

        // Keypool guard: mixing burns fresh keys fast.
        let keys_left = self.wallet.keys_left_since_backup();
        if keys_left < MIXING_KEYS_THRESHOLD_STOP {
            warn!("very low number of keys left: {}, stopping mixing", keys_left);
            inner.auto_denom_result = format!(
                "Very low number of keys left: {}, no mixing available.",
                keys_left
            );
            inner.options.enabled = false;
            return false;
        } else if keys_left < MIXING_KEYS_THRESHOLD_WARNING {
            inner.auto_denom_result = format!("Very low number of keys left: {}", keys_left);
            if let Err(e) = self.wallet.auto_backup() {
                warn!("failed to create automatic backup: {}", e);
                inner.auto_denom_result =
                    format!("ERROR! Failed to create automatic backup: {}", e);
                return false;
            }
        }

        if !inner.session.entries.is_empty() {
            inner.auto_denom_result = "Mixing in progress...".to_string();
            return false;
        }
        if self.wallet.is_locked() {
            inner.auto_denom_result = "Wallet is locked.".to_string();
            return false;
        }

        if !inner.options.multi_session
            && self.ledger.tip_height()
                < inner.cached_last_success_height + inner.options.min_block_spacing
            && inner.cached_last_success_height != 0
        {
            inner.auto_denom_result = "Last successful mixing action was too recent.".to_string();
            return false;
        }

        if self.directory.size() == 0 {
            debug!("no mixers detected");
            inner.auto_denom_result = "No mixers detected.".to_string();
            return false;
        }

        let mut value_min = smallest_denomination();
        // If there are no collateral inputs yet, plan for creating them.
        if !self.wallet.has_collateral_inputs(true) {
            value_min += MIXING_COLLATERAL * 4;
        }

        let needs_anonymized = self.wallet.get_needs_to_be_anonymized_balance(value_min);
        if needs_anonymized < value_min {
            inner.auto_denom_result = "Not enough funds to anonymize.".to_string();
            return false;
        }

        let non_denom = self.wallet.get_anonymizable_balance(true);
        let denom_confirmed = self.wallet.get_denominated_balance(false);
        let denom_unconfirmed = self.wallet.get_denominated_balance(true);
        let denom_total = denom_confirmed + denom_unconfirmed;

        debug!(
            "value_min: {}, needs: {}, non-denom: {}, denom: {}+{}",
            format_amount(value_min),
            format_amount(needs_anonymized),
            format_amount(non_denom),
            format_amount(denom_confirmed),
            format_amount(denom_unconfirmed),
        );

        if dry_run {
            return true;
        }

        // More denominated inputs wanted and funds available to split?
        if non_denom >= value_min + MIXING_COLLATERAL && denom_total < inner.options.target_balance
        {
            return self.create_denominated(inner);
        }

        // Make sure collateral-sized inputs exist before anything else.
        if !self.wallet.has_collateral_inputs(true) {
            return !self.wallet.has_collateral_inputs(false) && self.make_collateral_amounts(inner);
        }

        if inner.session.id != 0 {
            inner.auto_denom_result = "Mixing in progress...".to_string();
            return false;
        }

        // Initial phase: clean leftovers from the previous attempt.
        self.unlock_coins(inner);
        inner.session.set_null(now_ms);

        if !inner.options.multi_session && denom_unconfirmed > 0 {
            inner.auto_denom_result =
                "Found unconfirmed denominated outputs, will wait till they confirm to continue."
                    .to_string();
            return false;
        }

        // Check our collateral and create a fresh one if needed.
        if inner.my_collateral.is_empty()
            || !is_collateral_valid(&inner.my_collateral, self.ledger.as_ref())
        {
            match self.wallet.create_collateral_transaction() {
                Ok(tx) => inner.my_collateral = tx,
                Err(e) => {
                    warn!("create collateral error: {}", e);
                    return false;
                }
            }
        }

        let min_proto = self.params.min_mixing_proto_version;
        let enabled_count = self.directory.count_enabled(min_proto);

        // If we've burned through 90% of the mixer list, forget the oldest.
        let threshold_high = enabled_count * 9 / 10;
        let threshold_low = threshold_high * 7 / 10;
        if inner.used_mixers.len() > threshold_high {
            let drop = inner.used_mixers.len() - threshold_low;
            inner.used_mixers.drain(0..drop);
            debug!("trimmed used mixer list to {}", inner.used_mixers.len());
        }

        // Don't rely on queues all the time, unless providing liquidity.
        let use_queue =
            inner.options.liquidity_provider != 0 || rand::thread_rng().gen_range(0..100) > 33;

        if use_queue && self.try_queue_mixers(inner, out, needs_anonymized, now_ms) {
            return true;
        }

        // Liquidity providers never open sessions of their own.
        if inner.options.liquidity_provider != 0 {
            return false;
        }

        self.try_random_mixer(inner, out, value_min, needs_anonymized, now_ms)
    }

    /// First selection path: join a gossiped queue with a matching
    /// denomination.
    fn try_queue_mixers(
        &self,
        inner: &mut ClientInner,
        out: &mut Vec<Outbound>,
        needs_anonymized: Amount,
        now_ms: u64,
    ) -> bool {
        let min_proto = self.params.min_mixing_proto_version;
        let now_secs = (now_ms / 1000) as i64;

        for i in 0..inner.queue_book.queues().len() {
            let (mixer, denom_mask, tried, expired) = {
                let q = &inner.queue_book.queues()[i];
                (q.mixer, q.denom_mask, q.tried, q.is_expired(now_secs))
            };

            // Only try each queue once.
            if tried {
                continue;
            }
            inner.queue_book.queues_mut()[i].tried = true;

            if expired {
                continue;
            }
            let Some(info) = self.directory.find(&mixer) else {
                debug!("queue mixer {} is not in the mixer list", mixer);
                continue;
            };
            if info.protocol_version < min_proto {
                continue;
            }
            let Some(bits) = mask_bits(denom_mask) else {
                continue; // incompatible denom
            };

            // Try to match their denomination; the rate limit already
            // passed when the queue entered the book.
            if self
                .wallet
                .select_coins_by_denominations(
                    denom_mask,
                    DENOMINATIONS[bits[0]],
                    needs_anonymized,
                    0,
                    inner.options.rounds,
                )
                .is_none()
            {
                debug!("couldn't match denominations for queue {}", mixer);
                continue;
            }

            inner.used_mixers.push(mixer);

            let Some(peer) = self.network.find_peer(&mixer) else {
                inner.auto_denom_result = "Error connecting to mixer.".to_string();
                continue;
            };

            info!(
                "joining queue of mixer {}, denom {}",
                mixer,
                crate::denom::mask_to_string(denom_mask)
            );
            inner.submitted_to = Some(mixer);
            inner.submitted_peer = Some(peer);
            inner.session.denom_mask = denom_mask;
            out.push(Outbound::To(
                peer,
                MixMessage::Accept {
                    denom_mask,
                    collateral: inner.my_collateral.clone(),
                },
            ));
            inner.session.state = PoolState::Queue;
            inner.session.touch(now_ms);
            inner.auto_denom_result = "Mixing in progress...".to_string();
            return true;
        }
        false
    }

    /// Second selection path: up to ten attempts at a uniformly random
    /// mixer not recently used, honoring the rate limit.
    fn try_random_mixer(
        &self,
        inner: &mut ClientInner,
        out: &mut Vec<Outbound>,
        value_min: Amount,
        needs_anonymized: Amount,
        now_ms: u64,
    ) -> bool {
        let min_proto = self.params.min_mixing_proto_version;
        let enabled_count = self.directory.count_enabled(min_proto) as u64;

        let Some(amounts) = self.wallet.select_mixing_amounts(
            value_min,
            needs_anonymized,
            0,
            inner.options.rounds,
        ) else {
            // Should never happen this deep into the ladder.
            warn!("can't mix: no compatible inputs found");
            inner.auto_denom_result = "Can't mix: no compatible inputs found!".to_string();
            return false;
        };
        if !amounts.iter().any(|&a| is_denominated(a)) {
            inner.auto_denom_result = "Can't mix: no compatible inputs found!".to_string();
            return false;
        }

        let mut tries = 0;
        while tries < 10 {
            let Some(info) = self
                .directory
                .find_random_not_in(&inner.used_mixers, min_proto)
            else {
                inner.auto_denom_result = "Can't find random mixer.".to_string();
                return false;
            };
            inner.used_mixers.push(info.id);

            if info.last_dsq != 0
                && info.last_dsq + enabled_count / 5 > inner.queue_book.dsq_count()
            {
                debug!("too early to mix on mixer {}", info.id);
                tries += 1;
                continue;
            }

            let Some(peer) = self.network.find_peer(&info.id) else {
                debug!("can't connect to mixer {}", info.id);
                tries += 1;
                continue;
            };

            // Pick a single random denomination out of what we hold.
            let mut denom_mask = 0;
            while denom_mask == 0 {
                denom_mask = single_random_mask_from_amounts(&amounts);
            }

            info!(
                "connected to mixer {}, sending accept for denom {}",
                info.id,
                crate::denom::mask_to_string(denom_mask)
            );
            inner.submitted_to = Some(info.id);
            inner.submitted_peer = Some(peer);
            inner.session.denom_mask = denom_mask;
            out.push(Outbound::To(
                peer,
                MixMessage::Accept {
                    denom_mask,
                    collateral: inner.my_collateral.clone(),
                },
            ));
            inner.session.state = PoolState::Queue;
            inner.session.touch(now_ms);
            inner.auto_denom_result = "Mixing in progress...".to_string();
            return true;
        }

        inner.auto_denom_result = "No compatible mixer found.".to_string();
        false
    }

    // ── Entry submission ─────────────────────────────────────────────────

    /// Build and send our entry, preferring inputs of equal round counts
    /// before falling back to the whole range.
    pub(crate) fn submit_denominate(
        &self,
        inner: &mut ClientInner,
        out: &mut Vec<Outbound>,
        now_ms: u64,
    ) -> bool {
        let rounds = inner.options.rounds;
        for r in 0..rounds {
            match self.prepare_denominate(inner, r, r + 1) {
                Ok((inputs, outputs)) => {
                    debug!("denominating for {} rounds", r);
                    return self.send_denominate(inner, out, inputs, outputs, now_ms);
                }
                Err(e) => debug!("preparing for {} rounds failed: {}", r, e),
            }
        }

        // Strange, but make a final attempt with everything we have.
        match self.prepare_denominate(inner, 0, rounds) {
            Ok((inputs, outputs)) => {
                debug!("denominating for all rounds");
                self.send_denominate(inner, out, inputs, outputs, now_ms)
            }
            Err(e) => {
                warn!("denominating failed: {}", e);
                inner.auto_denom_result = e.to_string();
                false
            }
        }
    }

    /// Select denominated inputs for the session's denomination and pair
    /// each with a freshly reserved equal-value output.
    fn prepare_denominate(
        &self,
        inner: &mut ClientInner,
        min_rounds: u32,
        max_rounds: u32,
    ) -> Result<(Vec<MixTxIn>, Vec<TxOut>), MixingError> {
        if self.wallet.is_locked() {
            return Err(MixingError::WalletLocked);
        }
        if !inner.session.entries.is_empty() {
            return Err(MixingError::PendingEntries);
        }

        let bits = mask_bits(inner.session.denom_mask).ok_or(MixingError::BadDenomination)?;

        let mut coins = self
            .wallet
            .select_coins_by_denominations(
                inner.session.denom_mask,
                DENOMINATIONS[bits[0]],
                MIXING_POOL_MAX,
                min_rounds,
                max_rounds,
            )
            .ok_or(MixingError::NoInputs)?;

        for coin in &coins {
            self.wallet.lock_coin(&coin.outpoint);
        }

        let unlock_all = |coins: &[crate::interfaces::DenomCoin]| {
            for coin in coins {
                self.wallet.unlock_coin(&coin.outpoint);
            }
        };

        let mut value_left: Amount = coins.iter().map(|c| c.value).sum();
        let mut inputs: Vec<MixTxIn> = Vec::new();
        let mut outputs = Vec::new();

        // Add every needed denomination a few times over; the coin list is
        // already shuffled, so no extra randomization here.
        let steps_max = 5 + rand::thread_rng().gen_range(0..5);
        'steps: for _ in 0..steps_max {
            for &bit in &bits {
                let denom_value = DENOMINATIONS[bit];
                if value_left < denom_value {
                    continue;
                }

                if let Some(pos) = coins.iter().position(|c| c.value == denom_value) {
                    let coin = coins.remove(pos);

                    let Some(script) = self.wallet.reserve_key() else {
                        unlock_all(&coins);
                        for input in &inputs {
                            self.wallet.unlock_coin(&input.prevout);
                        }
                        return Err(MixingError::KeypoolExhausted);
                    };

                    inputs.push(MixTxIn::new(coin.outpoint, coin.prev_script));
                    outputs.push(TxOut::new(denom_value, script));
                    value_left -= denom_value;
                }
            }
            if value_left == 0 {
                break 'steps;
            }
        }

        // Unlock whatever we selected but didn't use.
        unlock_all(&coins);

        if mask_from_outputs(&outputs) != inner.session.denom_mask {
            for input in &inputs {
                self.wallet.unlock_coin(&input.prevout);
            }
            return Err(MixingError::OutputMismatch);
        }

        // The full amount doesn't matter as long as the denominations fit.
        Ok((inputs, outputs))
    }

    /// Lock the funds, self-check the entry against the mempool, record it,
    /// and relay it to the mixer.
    fn send_denominate(
        &self,
        inner: &mut ClientInner,
        out: &mut Vec<Outbound>,
        inputs: Vec<MixTxIn>,
        outputs: Vec<TxOut>,
        now_ms: u64,
    ) -> bool {
        if inner.my_collateral.is_empty() {
            warn!("mixing collateral not set");
            return false;
        }

        // Lock the funds we're about to spend.
        let collateral_outpoints: Vec<_> =
            inner.my_collateral.inputs.iter().map(|i| i.prevout).collect();
        inner.locked_coins.extend(collateral_outpoints);
        inner.locked_coins.extend(inputs.iter().map(|i| i.prevout));

        // We should already be connected to a mixer with a session.
        if inner.session.id == 0 {
            warn!("no mixer has been selected yet");
            self.unlock_coins(inner);
            inner.session.set_null(now_ms);
            return false;
        }

        if !self.ledger.has_enough_disk_space() {
            self.unlock_coins(inner);
            inner.session.set_null(now_ms);
            inner.options.enabled = false;
            warn!("not enough disk space, disabling mixing");
            inner.auto_denom_result = "Not enough disk space, disabling mixing.".to_string();
            return false;
        }

        inner.session.state = PoolState::AcceptingEntries;
        inner.last_message.clear();

        // Check the entry against the mempool before anyone else does.
        let mut tx = Transaction::new();
        tx.inputs.extend(inputs.iter().map(|i| i.to_txin()));
        tx.outputs.extend(outputs.iter().cloned());
        if !self.ledger.accept_to_mempool(&tx) {
            warn!("own entry failed mempool check, resetting");
            self.unlock_coins(inner);
            inner.session.set_null(now_ms);
            return false;
        }

        let entry = PoolEntry::new(inputs, outputs, inner.my_collateral.clone());
        inner.session.entries.push(entry.clone());

        if let Some(peer) = inner.submitted_peer {
            out.push(Outbound::To(peer, MixMessage::Entry(entry)));
        }
        inner.session.touch(now_ms);
        true
    }

    // ── Wallet shaping ───────────────────────────────────────────────────

    /// Split non-denominated funds into denominated outputs, one address
    /// group at a time.
    pub(crate) fn create_denominated(&self, inner: &mut ClientInner) -> bool {
        let groups = self.wallet.select_coins_grouped_by_address(true);
        if groups.is_empty() {
            debug!("create_denominated: no inputs to group");
            return false;
        }

        let create_collaterals = !self.wallet.has_collateral_inputs(true);
        for group in &groups {
            if self.create_denominated_from_group(inner, group, create_collaterals) {
                return true;
            }
        }

        debug!("create_denominated failed");
        false
    }

    fn create_denominated_from_group(
        &self,
        inner: &mut ClientInner,
        group: &crate::interfaces::CoinGroup,
        create_collaterals: bool,
    ) -> bool {
        let mut outputs: Vec<TxOut> = Vec::new();
        // Leave some room for fees.
        let mut value_left = group.total - MIXING_COLLATERAL;

        if create_collaterals {
            let Some(script) = self.wallet.reserve_key() else {
                return false;
            };
            outputs.push(TxOut::new(MIXING_COLLATERAL * 4, script));
            value_left -= MIXING_COLLATERAL * 4;
        }

        let largest = DENOMINATIONS[DENOMINATIONS.len() - 1];
        let mut outputs_total = 0usize;
        let mut skip = true;
        loop {
            for &denom_value in DENOMINATIONS.iter().rev() {
                if skip {
                    if inner.skipped_denoms.contains(&denom_value) {
                        continue;
                    }
                    // Denominations the wallet is flush with are skipped,
                    // except the largest one.
                    if denom_value != largest
                        && self.wallet.count_inputs_with_amount(denom_value) > DENOMS_COUNT_MAX
                    {
                        inner.auto_denom_result = format!(
                            "Too many {} denominations, removing.",
                            format_amount(denom_value)
                        );
                        inner.skipped_denoms.push(denom_value);
                        continue;
                    }
                }

                // Add each output up to ten times per pass.
                let mut added = 0usize;
                while value_left >= denom_value && added <= 10 {
                    let Some(script) = self.wallet.reserve_key() else {
                        return false;
                    };
                    outputs.push(TxOut::new(denom_value, script));
                    added += 1;
                    value_left -= denom_value;
                }
                outputs_total += added;
                if value_left == 0 {
                    break;
                }
            }
            // If nothing was added, start over without skipping.
            if outputs_total == 0 && skip {
                skip = false;
                continue;
            }
            break;
        }

        if outputs_total == 0 {
            return false;
        }
        // Anything left over comes back as change automatically.

        let tx = match self.wallet.create_transaction(
            &outputs,
            &group.address_script,
            &group.outpoints,
            CoinFilter::NonDenominated,
        ) {
            Ok(tx) => tx,
            Err(e) => {
                warn!("create_denominated: {}", e);
                return false;
            }
        };
        if !self.wallet.commit_transaction(&tx) {
            warn!("create_denominated: commit failed");
            return false;
        }

        inner.cached_last_success_height = self.ledger.tip_height();
        info!("created denominations, txid={}", tx.txid());
        true
    }

    /// Create a collateral-sized output from a single address's funds.
    pub(crate) fn make_collateral_amounts(&self, inner: &mut ClientInner) -> bool {
        let groups = self.wallet.select_coins_grouped_by_address(false);
        if groups.is_empty() {
            debug!("make_collateral_amounts: no inputs to group");
            return false;
        }

        for group in &groups {
            if self.make_collateral_from_group(inner, group) {
                return true;
            }
        }

        debug!("make_collateral_amounts failed");
        false
    }

    fn make_collateral_from_group(
        &self,
        inner: &mut ClientInner,
        group: &crate::interfaces::CoinGroup,
    ) -> bool {
        let Some(script) = self.wallet.reserve_key() else {
            return false;
        };
        let outputs = [TxOut::new(MIXING_COLLATERAL * 4, script)];

        // Prefer funds that are not yet denominated; fall back to any
        // spendable coin, since mixing can't run without collaterals.
        let tx = self
            .wallet
            .create_transaction(
                &outputs,
                &group.address_script,
                &group.outpoints,
                CoinFilter::NonDenominated,
            )
            .or_else(|e| {
                debug!("collateral from non-denominated failed: {}", e);
                self.wallet.create_transaction(
                    &outputs,
                    &group.address_script,
                    &[],
                    CoinFilter::AnySpendable,
                )
            });

        let tx = match tx {
            Ok(tx) => tx,
            Err(e) => {
                warn!("make_collateral_amounts: {}", e);
                return false;
            }
        };
        if !self.wallet.commit_transaction(&tx) {
            warn!("make_collateral_amounts: commit failed");
            return false;
        }

        inner.cached_last_success_height = self.ledger.tip_height();
        info!("created collateral inputs, txid={}", tx.txid());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = MixingOptions::default();
        assert!(!options.enabled);
        assert_eq!(options.rounds, 2);
        assert_eq!(options.target_balance, 1000 * COIN);
        assert_eq!(options.liquidity_provider, 0);
        assert!(!options.multi_session);
    }
}
