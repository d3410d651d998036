//! Client-side mixing pool.
//!
//! A [`ClientPool`] shepherds one wallet through a mix: it reacts to queue
//! gossip, submits entries to its chosen mixer, verifies and signs the final
//! transaction, and resets on completion or timeout. The automatic driver
//! that decides *when* to mix lives in [`crate::driver`].

use crate::driver::MixingOptions;
use crate::interfaces::{
    Ledger, MixerDirectory, MixerId, NetworkRelay, PeerId, SyncTracker, WalletAccess,
    SIGHASH_ALL, SIGHASH_ANYONECANPAY,
};
use crate::messages::{MixMessage, PoolMessage, PoolState, PoolStatusUpdate};
use crate::queue::{MixBroadcastTx, MixQueue, QueueBook};
use crate::session::Session;
use crate::{
    CLIENT_TIMEOUT_LAG_MS, MIXING_QUEUE_TIMEOUT_SECS, MIXING_SIGNING_TIMEOUT_SECS,
    POOL_RESET_DWELL_MS,
};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use umbra_types::{Amount, ChainParams, Hash256, OutPoint, Transaction};

/// Outbound traffic staged while the session lock is held.
pub(crate) enum Outbound {
    To(PeerId, MixMessage),
    All(MixMessage),
}

pub(crate) struct ClientInner {
    pub(crate) session: Session,
    pub(crate) queue_book: QueueBook,
    pub(crate) broadcast_txs: HashMap<Hash256, MixBroadcastTx>,
    pub(crate) options: MixingOptions,

    /// Our prepared collateral; empty until created.
    pub(crate) my_collateral: Transaction,
    /// Mixer we submitted to, by staking outpoint, and the peer it answers
    /// on. Re-resolved through the directory at each use.
    pub(crate) submitted_to: Option<MixerId>,
    pub(crate) submitted_peer: Option<PeerId>,
    /// Mixers tried recently; trimmed by the driver.
    pub(crate) used_mixers: Vec<MixerId>,
    /// Coins locked in the wallet for the ongoing attempt.
    pub(crate) locked_coins: Vec<OutPoint>,

    /// Progress reported by the mixer.
    pub(crate) entries_count: usize,
    pub(crate) last_entry_accepted: bool,

    pub(crate) cached_last_success_height: u32,
    pub(crate) last_message: String,
    pub(crate) auto_denom_result: String,
    /// Denominations skipped while splitting because the wallet already
    /// holds too many of them.
    pub(crate) skipped_denoms: Vec<Amount>,

    status_progress: u32,
    last_new_block_secs: i64,
}

/// Client half of the mixing state machine.
pub struct ClientPool {
    pub(crate) params: &'static ChainParams,
    pub(crate) ledger: Arc<dyn Ledger>,
    pub(crate) wallet: Arc<dyn WalletAccess>,
    pub(crate) directory: Arc<dyn MixerDirectory>,
    pub(crate) network: Arc<dyn NetworkRelay>,
    pub(crate) sync: Arc<dyn SyncTracker>,
    pub(crate) inner: Mutex<ClientInner>,
}

impl ClientPool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        params: &'static ChainParams,
        options: MixingOptions,
        ledger: Arc<dyn Ledger>,
        wallet: Arc<dyn WalletAccess>,
        directory: Arc<dyn MixerDirectory>,
        network: Arc<dyn NetworkRelay>,
        sync: Arc<dyn SyncTracker>,
        now_ms: u64,
    ) -> Self {
        ClientPool {
            params,
            ledger,
            wallet,
            directory,
            network,
            sync,
            inner: Mutex::new(ClientInner {
                session: Session::new(now_ms),
                queue_book: QueueBook::new(),
                broadcast_txs: HashMap::new(),
                options,
                my_collateral: Transaction::new(),
                submitted_to: None,
                submitted_peer: None,
                used_mixers: Vec::new(),
                locked_coins: Vec::new(),
                entries_count: 0,
                last_entry_accepted: false,
                cached_last_success_height: 0,
                last_message: String::new(),
                auto_denom_result: String::new(),
                skipped_denoms: Vec::new(),
                status_progress: 0,
                last_new_block_secs: 0,
            }),
        }
    }

    // ── Introspection ────────────────────────────────────────────────────

    pub fn state(&self) -> PoolState {
        self.inner.lock().unwrap().session.state
    }

    pub fn session_id(&self) -> i32 {
        self.inner.lock().unwrap().session.id
    }

    pub fn dsq_count(&self) -> u64 {
        self.inner.lock().unwrap().queue_book.dsq_count()
    }

    pub fn queued_count(&self) -> usize {
        self.inner.lock().unwrap().queue_book.queues().len()
    }

    pub fn auto_denom_result(&self) -> String {
        self.inner.lock().unwrap().auto_denom_result.clone()
    }

    pub fn last_message(&self) -> String {
        self.inner.lock().unwrap().last_message.clone()
    }

    pub fn is_mixing_enabled(&self) -> bool {
        self.inner.lock().unwrap().options.enabled
    }

    pub fn set_mixing_enabled(&self, enabled: bool) {
        self.inner.lock().unwrap().options.enabled = enabled;
    }

    /// Whether a verified broadcast record exists for `txid`.
    pub fn has_broadcast_tx(&self, txid: &Hash256) -> bool {
        self.inner.lock().unwrap().broadcast_txs.contains_key(txid)
    }

    // ── Message entry point ──────────────────────────────────────────────

    /// Handle one peer message. Contention on the session lock drops the
    /// message; gossip makes that safe.
    pub fn process_message(&self, peer: PeerId, peer_proto: u32, msg: MixMessage, now_ms: u64) {
        let mut out = Vec::new();
        {
            let Ok(mut inner) = self.inner.try_lock() else {
                return;
            };
            match msg {
                MixMessage::Queue(queue) => {
                    self.handle_queue(&mut inner, &mut out, peer_proto, queue, now_ms)
                }
                MixMessage::StatusUpdate {
                    session_id,
                    state,
                    entries_count,
                    status_update,
                    message_id,
                } => self.handle_status_update(
                    &mut inner,
                    peer,
                    peer_proto,
                    session_id,
                    state,
                    entries_count,
                    status_update,
                    message_id,
                    now_ms,
                ),
                MixMessage::FinalTx { session_id, tx } => self.handle_final_tx(
                    &mut inner, &mut out, peer, peer_proto, session_id, tx, now_ms,
                ),
                MixMessage::Complete {
                    session_id,
                    message_id,
                } => self.handle_complete(
                    &mut inner, peer, peer_proto, session_id, message_id, now_ms,
                ),
                MixMessage::BroadcastTx(dstx) => self.handle_broadcast_tx(&mut inner, dstx),
                // Mixer-addressed requests: we are not a mixer.
                MixMessage::Accept { .. } | MixMessage::Entry(_) => {
                    out.push(Outbound::To(
                        peer,
                        MixMessage::StatusUpdate {
                            session_id: inner.session.id,
                            state: inner.session.state as i32,
                            entries_count: inner.session.entries.len() as i32,
                            status_update: PoolStatusUpdate::Rejected as i32,
                            message_id: PoolMessage::ErrNotAMixer as i32,
                        },
                    ));
                }
                MixMessage::SignFinalTx { .. } => {}
            }
        }
        self.flush(out);
    }

    // ── DSQUEUE gossip ───────────────────────────────────────────────────

    fn handle_queue(
        &self,
        inner: &mut ClientInner,
        out: &mut Vec<Outbound>,
        peer_proto: u32,
        mut queue: MixQueue,
        now_ms: u64,
    ) {
        if peer_proto < self.params.min_mixing_proto_version {
            return;
        }
        if inner.queue_book.contains(&queue) {
            return; // process every queue only once
        }
        if queue.is_expired((now_ms / 1000) as i64) {
            return;
        }

        let Some(info) = self.directory.find(&queue.mixer) else {
            return;
        };
        if queue.verify(&info.pubkey, self.params.message_magic).is_err() {
            // We probably have outdated info about this mixer.
            self.directory.ask_for(&queue.mixer);
            return;
        }

        if queue.ready {
            // The mixer we joined has enough clients; submit if we are
            // still waiting in its queue.
            if inner.submitted_to != Some(queue.mixer) {
                return;
            }
            if inner.session.state == PoolState::Queue {
                info!("mixing queue is ready, submitting to {}", queue.mixer);
                self.submit_denominate(inner, out, now_ms);
            }
            return;
        }

        if inner.queue_book.has_pending_from(&queue.mixer) {
            debug!("mixer {} is flooding queue messages", queue.mixer);
            return;
        }

        // Queues from the mixer we already submitted to need no retry.
        queue.tried = inner.submitted_to == Some(queue.mixer);

        if inner.queue_book.admit(
            queue.clone(),
            &info,
            self.directory.as_ref(),
            self.params.min_mixing_proto_version,
        ) {
            out.push(Outbound::All(MixMessage::Queue(queue)));
        }
    }

    // ── DSSTATUSUPDATE ───────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    fn handle_status_update(
        &self,
        inner: &mut ClientInner,
        peer: PeerId,
        peer_proto: u32,
        session_id: i32,
        state: i32,
        entries_count: i32,
        status_update: i32,
        message_id: i32,
        now_ms: u64,
    ) {
        if peer_proto < self.params.min_mixing_proto_version {
            return;
        }
        if inner.submitted_peer != Some(peer) {
            return;
        }

        let Some(state_new) = PoolState::from_i32(state) else {
            return;
        };
        let Some(status) = PoolStatusUpdate::from_i32(status_update) else {
            return;
        };
        let Some(message) = PoolMessage::from_i32(message_id) else {
            return;
        };

        if !self.check_pool_state_update(
            inner,
            state_new,
            entries_count.max(0) as usize,
            status,
            message,
            session_id,
            now_ms,
        ) {
            debug!("status update not applied");
        }
    }

    /// Apply the mixer's progress report to our session.
    fn check_pool_state_update(
        &self,
        inner: &mut ClientInner,
        state_new: PoolState,
        entries_count_new: usize,
        status: PoolStatusUpdate,
        message: PoolMessage,
        session_id_new: i32,
        now_ms: u64,
    ) -> bool {
        // Nothing to update in idle or terminal states.
        if matches!(
            inner.session.state,
            PoolState::Idle | PoolState::Error | PoolState::Success
        ) {
            return false;
        }

        inner.auto_denom_result = format!("Mixer: {}", message.description());

        if status == PoolStatusUpdate::Rejected {
            warn!("entry rejected by mixer: {}", message.description());
            self.unlock_coins(inner);
            inner.session.set_null(now_ms);
            inner.session.state = PoolState::Error;
            inner.last_message = message.description().to_string();
            return true;
        }

        if status == PoolStatusUpdate::Accepted && state_new == inner.session.state {
            if state_new == PoolState::Queue && inner.session.id == 0 && session_id_new != 0 {
                // Session id is only ever assigned while queueing.
                inner.session.id = session_id_new;
                inner.session.touch(now_ms);
                debug!("set session id to {}", session_id_new);
                return true;
            }
            if state_new == PoolState::AcceptingEntries
                && inner.entries_count != entries_count_new
            {
                inner.entries_count = entries_count_new;
                inner.session.touch(now_ms);
                inner.last_entry_accepted = true;
                debug!("new entry accepted ({} total)", entries_count_new);
                return true;
            }
        }

        false
    }

    // ── DSFINALTX ────────────────────────────────────────────────────────

    fn handle_final_tx(
        &self,
        inner: &mut ClientInner,
        out: &mut Vec<Outbound>,
        peer: PeerId,
        peer_proto: u32,
        session_id: i32,
        tx: Transaction,
        now_ms: u64,
    ) {
        if peer_proto < self.params.min_mixing_proto_version {
            return;
        }
        if inner.submitted_peer != Some(peer) {
            return;
        }
        if inner.session.id != session_id {
            debug!(
                "final tx for session {} doesn't match ours ({})",
                session_id, inner.session.id
            );
            return;
        }

        self.sign_final_transaction(inner, out, tx, peer, now_ms);
    }

    /// Verify our inputs and outputs survived the merge, then sign our
    /// inputs and send the signatures back. Refusing to sign risks being
    /// charged collateral, but beats signing a transaction that doesn't
    /// pay us what we put in.
    fn sign_final_transaction(
        &self,
        inner: &mut ClientInner,
        out: &mut Vec<Outbound>,
        final_tx: Transaction,
        peer: PeerId,
        now_ms: u64,
    ) -> bool {
        inner.session.final_tx = final_tx;

        // Locate and vet every one of our inputs before signing anything.
        let mut to_sign: Vec<(usize, umbra_types::Script, OutPoint)> = Vec::new();
        for entry in &inner.session.entries {
            let found_outputs = inner
                .session
                .final_tx
                .outputs
                .iter()
                .filter(|o| entry.outputs.contains(o))
                .count();
            let value_found: Amount = inner
                .session
                .final_tx
                .outputs
                .iter()
                .filter(|o| entry.outputs.contains(o))
                .map(|o| o.value)
                .sum();
            let value_ours: Amount = entry.outputs.iter().map(|o| o.value).sum();

            if found_outputs < entry.outputs.len() || value_found != value_ours {
                warn!("my entries are not correct, refusing to sign");
                self.unlock_coins(inner);
                inner.session.set_null(now_ms);
                return false;
            }

            for input in &entry.inputs {
                let index = inner
                    .session
                    .final_tx
                    .inputs
                    .iter()
                    .position(|i| i.prevout == input.prevout && i.sequence == input.sequence);
                if let Some(index) = index {
                    to_sign.push((index, input.prev_script.clone(), input.prevout));
                }
            }
        }

        let mut signed = Vec::new();
        for (index, prev_script, prevout) in to_sign {
            let value = self.ledger.get_output_value(&prevout).unwrap_or(0);
            if !self.wallet.sign_input(
                &mut inner.session.final_tx,
                index,
                &prev_script,
                value,
                SIGHASH_ALL | SIGHASH_ANYONECANPAY,
            ) {
                // Not much to do; the session will time out.
                warn!("unable to sign own input {}", prevout);
                continue;
            }
            signed.push(inner.session.final_tx.inputs[index].clone());
        }

        if signed.is_empty() {
            warn!("can't sign anything, resetting");
            self.unlock_coins(inner);
            inner.session.set_null(now_ms);
            return false;
        }

        debug!("pushing {} signatures to the mixer", signed.len());
        out.push(Outbound::To(peer, MixMessage::SignFinalTx { inputs: signed }));
        inner.session.state = PoolState::Signing;
        inner.session.touch(now_ms);
        true
    }

    // ── DSCOMPLETE ───────────────────────────────────────────────────────

    fn handle_complete(
        &self,
        inner: &mut ClientInner,
        peer: PeerId,
        peer_proto: u32,
        session_id: i32,
        message_id: i32,
        now_ms: u64,
    ) {
        if peer_proto < self.params.min_mixing_proto_version {
            return;
        }
        if inner.submitted_peer != Some(peer) {
            return;
        }
        let Some(message) = PoolMessage::from_i32(message_id) else {
            return;
        };
        if inner.session.id != session_id {
            debug!(
                "completion for session {} doesn't match ours ({})",
                session_id, inner.session.id
            );
            return;
        }

        self.completed_transaction(inner, message, now_ms);
    }

    /// The mix finished, successfully or not; park in the terminal state
    /// until the reset dwell elapses.
    fn completed_transaction(&self, inner: &mut ClientInner, message: PoolMessage, now_ms: u64) {
        if message == PoolMessage::MsgSuccess {
            info!("mixing transaction completed successfully");
            inner.cached_last_success_height = self.ledger.tip_height();
            inner.session.state = PoolState::Success;
        } else {
            warn!("mixing transaction failed: {}", message.description());
            inner.session.state = PoolState::Error;
        }
        self.unlock_coins(inner);
        inner.session.touch(now_ms);
        inner.last_message = message.description().to_string();
    }

    // ── DSTX ─────────────────────────────────────────────────────────────

    fn handle_broadcast_tx(&self, inner: &mut ClientInner, dstx: MixBroadcastTx) {
        let Some(info) = self.directory.find(&dstx.mixer) else {
            return;
        };
        if dstx.verify(&info.pubkey, self.params.message_magic).is_err() {
            warn!("got bad broadcast-tx signature from {}", dstx.mixer);
            return;
        }
        let txid = dstx.tx.txid();
        inner.broadcast_txs.entry(txid).or_insert(dstx);
    }

    // ── Timer hooks ──────────────────────────────────────────────────────

    /// Reap expired queues, leave terminal states after the dwell, and
    /// reset a stalled session with an error.
    pub fn check_timeout(&self, now_ms: u64) {
        let Ok(mut inner) = self.inner.try_lock() else {
            return; // fine to fail, we run this frequently
        };
        inner.queue_book.remove_expired((now_ms / 1000) as i64);

        if !inner.options.enabled {
            return;
        }

        // Terminal states drain back to idle after the dwell.
        if inner.session.state.is_terminal()
            && now_ms.saturating_sub(inner.session.last_step_ms) >= POOL_RESET_DWELL_MS
        {
            debug!("terminal state dwell over, resetting");
            self.unlock_coins(&mut inner);
            inner.session.set_null(now_ms);
            return;
        }

        let timeout_secs = if inner.session.state == PoolState::Signing {
            MIXING_SIGNING_TIMEOUT_SECS
        } else {
            MIXING_QUEUE_TIMEOUT_SECS
        };
        // Give the mixer a head start before declaring failure.
        let deadline = timeout_secs as u64 * 1000 + CLIENT_TIMEOUT_LAG_MS;
        let timed_out = now_ms.saturating_sub(inner.session.last_step_ms) >= deadline;

        if inner.session.state != PoolState::Idle
            && !inner.session.state.is_terminal()
            && timed_out
        {
            warn!("mixing session timed out ({}s)", timeout_secs);
            self.unlock_coins(&mut inner);
            inner.session.set_null(now_ms);
            inner.session.state = PoolState::Error;
            inner.last_message = "Session timed out.".to_string();
        }
    }

    /// Block-tip notification; runs the timeout check at most once per ten
    /// seconds while blocks stream in.
    pub fn new_block(&self, now_ms: u64) {
        {
            let Ok(mut inner) = self.inner.try_lock() else {
                return;
            };
            let now_secs = (now_ms / 1000) as i64;
            if now_secs - inner.last_new_block_secs < 10 {
                return;
            }
            inner.last_new_block_secs = now_secs;
        }
        self.check_timeout(now_ms);
    }

    // ── Status & reset ───────────────────────────────────────────────────

    /// User-facing progress line.
    pub fn status(&self) -> String {
        let mut inner = self.inner.lock().unwrap();
        inner.status_progress = inner.status_progress.wrapping_add(10);
        let progress = inner.status_progress;
        let dots = match progress % 70 {
            0..=30 => ".",
            31..=50 => "..",
            _ => "...",
        };

        let spacing_blocked = self.ledger.tip_height()
            < inner.cached_last_success_height + inner.options.min_block_spacing;
        if (inner.cached_last_success_height != 0 && spacing_blocked)
            || !self.sync.is_blockchain_synced()
        {
            return inner.auto_denom_result.clone();
        }

        match inner.session.state {
            PoolState::Idle => "Mixing is idle.".to_string(),
            PoolState::Queue => format!("Submitted to mixer, waiting in queue {}", dots),
            PoolState::AcceptingEntries => {
                if inner.entries_count == 0 {
                    inner.status_progress = 0;
                    inner.auto_denom_result.clone()
                } else if inner.last_entry_accepted {
                    if progress % 10 > 8 {
                        inner.last_entry_accepted = false;
                        inner.status_progress = 0;
                    }
                    "Mixing request complete: your transaction was accepted into the pool!"
                        .to_string()
                } else {
                    format!(
                        "Submitted to mixer, waiting for more entries ({}/{}) {}",
                        inner.entries_count, self.params.pool_max_participants, dots
                    )
                }
            }
            PoolState::Signing => format!("Found enough users, signing {}", dots),
            PoolState::Error => format!(
                "Mixing request incomplete: {} Will retry...",
                inner.last_message
            ),
            PoolState::Success => format!("Mixing request complete: {}", inner.last_message),
        }
    }

    /// Full reset: cached success height, own collateral, used-mixer list,
    /// locked coins, and the session itself.
    pub fn reset_pool(&self, now_ms: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.cached_last_success_height = 0;
        inner.my_collateral = Transaction::new();
        inner.used_mixers.clear();
        self.unlock_coins(&mut inner);
        inner.session.set_null(now_ms);
    }

    // ── Shared helpers ───────────────────────────────────────────────────

    /// Release every coin locked for the current attempt.
    pub(crate) fn unlock_coins(&self, inner: &mut ClientInner) {
        for outpoint in &inner.locked_coins {
            self.wallet.unlock_coin(outpoint);
        }
        inner.locked_coins.clear();
    }

    pub(crate) fn flush(&self, out: Vec<Outbound>) {
        for item in out {
            match item {
                Outbound::To(peer, msg) => self.network.push_message(peer, msg),
                Outbound::All(msg) => self
                    .network
                    .relay(msg, self.params.min_mixing_proto_version),
            }
        }
    }
}

impl std::fmt::Debug for ClientPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientPool").finish_non_exhaustive()
    }
}
