//! Mixer-side session host.
//!
//! A [`MixerPool`] accepts clients into a session, gathers their entries,
//! merges them into the final transaction, collects signatures, commits the
//! result, and charges collateral against anyone who stalls the mix. Mixers
//! never enter the terminal `Error`/`Success` states; they reset straight to
//! idle after commit or abort.
//!
//! Lock discipline: the session state sits behind a single mutex taken with
//! `try_lock` in every handler and timer entry point (a dropped message is
//! retransmitted by gossip), and no lock is held across a peer send —
//! handlers stage outbound messages and flush them after unlocking.

use crate::collateral::is_collateral_valid;
use crate::denom::{mask_bits, mask_from_outputs, smallest_denomination};
use crate::interfaces::{Ledger, MixerDirectory, MixerId, NetworkRelay, PeerId};
use crate::messages::{MixMessage, PoolMessage, PoolState, PoolStatusUpdate};
use crate::queue::{MixBroadcastTx, MixQueue, QueueBook};
use crate::session::{PoolEntry, Session};
use crate::signer::MixKeypair;
use crate::{MIXING_POOL_MAX, MIXING_QUEUE_TIMEOUT_SECS, MIXING_SIGNING_TIMEOUT_SECS};
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use umbra_types::{Amount, ChainParams, Hash256, Transaction, TxIn};

/// Outbound traffic staged while the session lock is held.
enum Outbound {
    To(PeerId, MixMessage),
    All(MixMessage),
}

struct MixerInner {
    session: Session,
    queue_book: QueueBook,
    broadcast_txs: HashMap<Hash256, MixBroadcastTx>,
}

/// Session host run by an active mixer.
pub struct MixerPool {
    params: &'static ChainParams,
    mixer_id: MixerId,
    keypair: MixKeypair,
    ledger: Arc<dyn Ledger>,
    directory: Arc<dyn MixerDirectory>,
    network: Arc<dyn NetworkRelay>,
    inner: Mutex<MixerInner>,
}

impl MixerPool {
    pub fn new(
        params: &'static ChainParams,
        mixer_id: MixerId,
        keypair: MixKeypair,
        ledger: Arc<dyn Ledger>,
        directory: Arc<dyn MixerDirectory>,
        network: Arc<dyn NetworkRelay>,
        now_ms: u64,
    ) -> Self {
        MixerPool {
            params,
            mixer_id,
            keypair,
            ledger,
            directory,
            network,
            inner: Mutex::new(MixerInner {
                session: Session::new(now_ms),
                queue_book: QueueBook::new(),
                broadcast_txs: HashMap::new(),
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

    pub fn entries_count(&self) -> usize {
        self.inner.lock().unwrap().session.entries.len()
    }

    pub fn dsq_count(&self) -> u64 {
        self.inner.lock().unwrap().queue_book.dsq_count()
    }

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
                MixMessage::Accept {
                    denom_mask,
                    collateral,
                } => self.handle_accept(
                    &mut inner, &mut out, peer, peer_proto, denom_mask, collateral, now_ms,
                ),
                MixMessage::Queue(queue) => {
                    self.handle_queue(&mut inner, &mut out, peer_proto, queue, now_ms)
                }
                MixMessage::Entry(entry) => {
                    self.handle_entry(&mut inner, &mut out, peer, peer_proto, entry, now_ms)
                }
                MixMessage::SignFinalTx { inputs } => {
                    self.handle_sign_final_tx(&mut inner, &mut out, peer_proto, inputs, now_ms)
                }
                // Client-addressed messages have no meaning on this role.
                _ => {}
            }
        }
        self.flush(out);
    }

    // ── Timer hooks ──────────────────────────────────────────────────────

    /// Reap expired queues and reset a stalled session, charging fees.
    pub fn check_timeout(&self, now_ms: u64) {
        let Ok(mut inner) = self.inner.try_lock() else {
            return;
        };
        inner.queue_book.remove_expired((now_ms / 1000) as i64);

        let timeout_secs = if inner.session.state == PoolState::Signing {
            MIXING_SIGNING_TIMEOUT_SECS
        } else {
            MIXING_QUEUE_TIMEOUT_SECS
        };
        let timed_out =
            now_ms.saturating_sub(inner.session.last_step_ms) >= timeout_secs as u64 * 1000;

        if inner.session.state != PoolState::Idle && timed_out {
            warn!(
                "mixing session timed out in {} ({}s)",
                inner.session.state, timeout_secs
            );
            self.charge_fees(&mut inner, &mut rand::thread_rng());
            inner.session.set_null(now_ms);
        }
    }

    /// Flip a filled queue into the accepting phase and invite submissions
    /// with a signed ready queue.
    pub fn check_for_complete_queue(&self, now_ms: u64) {
        let mut out = Vec::new();
        {
            let Ok(mut inner) = self.inner.try_lock() else {
                return;
            };
            if inner.session.state == PoolState::Queue && self.is_session_ready(&inner) {
                self.set_state(&mut inner, PoolState::AcceptingEntries);

                let mut queue = MixQueue::new(
                    inner.session.denom_mask,
                    self.mixer_id,
                    (now_ms / 1000) as i64,
                    true,
                );
                match queue.sign(&self.keypair, self.params.message_magic) {
                    Ok(()) => {
                        info!("queue is ready, relaying {}", queue);
                        out.push(Outbound::All(MixMessage::Queue(queue)));
                    }
                    Err(e) => warn!("failed to sign ready queue: {}", e),
                }
            }
        }
        self.flush(out);
    }

    // ── DSACCEPT ─────────────────────────────────────────────────────────

    fn handle_accept(
        &self,
        inner: &mut MixerInner,
        out: &mut Vec<Outbound>,
        peer: PeerId,
        peer_proto: u32,
        denom_mask: u32,
        collateral: Transaction,
        now_ms: u64,
    ) {
        if peer_proto < self.params.min_mixing_proto_version {
            self.push_status(out, peer, inner, PoolStatusUpdate::Rejected, PoolMessage::ErrVersion);
            return;
        }

        if self.is_session_ready(inner) {
            // Enough users already; the late client keeps its queue slot.
            debug!("accept rejected: queue is already full");
            self.push_status(out, peer, inner, PoolStatusUpdate::Accepted, PoolMessage::ErrQueueFull);
            return;
        }

        let Some(our_info) = self.directory.find(&self.mixer_id) else {
            self.push_status(out, peer, inner, PoolStatusUpdate::Rejected, PoolMessage::ErrMixerList);
            return;
        };

        // A mixer that queued too recently may not open a fresh session.
        if inner.session.collaterals.is_empty() {
            let enabled = self.directory.count_enabled(self.params.min_mixing_proto_version);
            if inner.queue_book.is_too_recent(&our_info, enabled) {
                debug!("accept rejected: our last queue is too recent");
                self.push_status(out, peer, inner, PoolStatusUpdate::Rejected, PoolMessage::ErrRecent);
                return;
            }
        }

        let result = if inner.session.id == 0 {
            self.create_new_session(inner, out, denom_mask, collateral, now_ms)
        } else {
            self.add_user_to_existing_session(inner, denom_mask, collateral, now_ms)
        };

        match result {
            Ok(msg) => {
                debug!("accept is compatible, please submit");
                self.push_status(out, peer, inner, PoolStatusUpdate::Accepted, msg);
            }
            Err(msg) => {
                debug!("accept not compatible: {}", msg);
                self.push_status(out, peer, inner, PoolStatusUpdate::Rejected, msg);
            }
        }
    }

    fn is_acceptable_denom_and_collateral(
        &self,
        denom_mask: u32,
        collateral: &Transaction,
    ) -> Result<(), PoolMessage> {
        if mask_bits(denom_mask).is_none() {
            return Err(PoolMessage::ErrDenom);
        }
        if !is_collateral_valid(collateral, self.ledger.as_ref()) {
            return Err(PoolMessage::ErrInvalidCollateral);
        }
        Ok(())
    }

    fn create_new_session(
        &self,
        inner: &mut MixerInner,
        out: &mut Vec<Outbound>,
        denom_mask: u32,
        collateral: Transaction,
        now_ms: u64,
    ) -> Result<PoolMessage, PoolMessage> {
        // A new session can only start from idle.
        if inner.session.state != PoolState::Idle {
            return Err(PoolMessage::ErrMode);
        }
        self.is_acceptable_denom_and_collateral(denom_mask, &collateral)?;

        inner.session.id = rand::thread_rng().gen_range(1..=1_000_000);
        inner.session.denom_mask = denom_mask;
        self.set_state(inner, PoolState::Queue);
        inner.session.touch(now_ms);

        // Broadcast that we are accepting entries.
        let mut queue = MixQueue::new(denom_mask, self.mixer_id, (now_ms / 1000) as i64, false);
        match queue.sign(&self.keypair, self.params.message_magic) {
            Ok(()) => {
                debug!("signing and relaying new {}", queue);
                out.push(Outbound::All(MixMessage::Queue(queue.clone())));
                inner.queue_book.push(queue);
            }
            Err(e) => warn!("failed to sign new queue: {}", e),
        }

        inner.session.collaterals.push(collateral);
        info!(
            "new session created, id={} denom={}",
            inner.session.id,
            crate::denom::mask_to_string(inner.session.denom_mask)
        );
        Ok(PoolMessage::MsgNoErr)
    }

    fn add_user_to_existing_session(
        &self,
        inner: &mut MixerInner,
        denom_mask: u32,
        collateral: Transaction,
        now_ms: u64,
    ) -> Result<PoolMessage, PoolMessage> {
        if inner.session.id == 0 || self.is_session_ready(inner) {
            return Err(PoolMessage::ErrMode);
        }
        self.is_acceptable_denom_and_collateral(denom_mask, &collateral)?;

        // New users only join while the session is still queueing.
        if inner.session.state != PoolState::Queue {
            return Err(PoolMessage::ErrMode);
        }
        if denom_mask != inner.session.denom_mask {
            debug!(
                "incompatible denom {} != session {}",
                crate::denom::mask_to_string(denom_mask),
                crate::denom::mask_to_string(inner.session.denom_mask)
            );
            return Err(PoolMessage::ErrDenom);
        }

        inner.session.touch(now_ms);
        inner.session.collaterals.push(collateral);
        info!(
            "new user accepted, id={} collaterals={}",
            inner.session.id,
            inner.session.collaterals.len()
        );
        Ok(PoolMessage::MsgNoErr)
    }

    // ── DSQUEUE gossip ───────────────────────────────────────────────────

    fn handle_queue(
        &self,
        inner: &mut MixerInner,
        out: &mut Vec<Outbound>,
        peer_proto: u32,
        queue: MixQueue,
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

        // Ready queues address clients; a hosting mixer only tracks the
        // not-ready advertisements of its peers.
        if queue.ready {
            return;
        }

        if inner.queue_book.has_pending_from(&queue.mixer) {
            debug!("mixer {} is flooding queue messages", queue.mixer);
            return;
        }

        if inner
            .queue_book
            .admit(queue.clone(), &info, self.directory.as_ref(), self.params.min_mixing_proto_version)
        {
            out.push(Outbound::All(MixMessage::Queue(queue)));
        }
    }

    // ── DSVIN ────────────────────────────────────────────────────────────

    fn handle_entry(
        &self,
        inner: &mut MixerInner,
        out: &mut Vec<Outbound>,
        peer: PeerId,
        peer_proto: u32,
        entry: PoolEntry,
        now_ms: u64,
    ) {
        if peer_proto < self.params.min_mixing_proto_version {
            self.push_status(out, peer, inner, PoolStatusUpdate::Rejected, PoolMessage::ErrVersion);
            return;
        }

        // Entries are only taken once the session gathered enough users.
        if !self.is_session_ready(inner) {
            debug!("entry rejected: session not complete");
            self.push_status(out, peer, inner, PoolStatusUpdate::Rejected, PoolMessage::ErrSession);
            return;
        }

        if let Err(msg) = self.check_entry_as_transaction(&inner.session, &entry) {
            self.push_status(out, peer, inner, PoolStatusUpdate::Rejected, msg);
            return;
        }

        match self.add_entry(inner, entry, now_ms) {
            Ok(msg) => {
                self.push_status(out, peer, inner, PoolStatusUpdate::Accepted, msg);
                self.check_pool(inner, out, now_ms);
                self.relay_status(out, inner, PoolStatusUpdate::Accepted, PoolMessage::MsgNoErr);
            }
            Err(msg) => {
                self.push_status(out, peer, inner, PoolStatusUpdate::Rejected, msg);
                inner.session.set_null(now_ms);
            }
        }
    }

    /// Validate a submitted entry the way the mempool would see it.
    fn check_entry_as_transaction(
        &self,
        session: &Session,
        entry: &PoolEntry,
    ) -> Result<(), PoolMessage> {
        // Same denominations as the current session?
        let mask = mask_from_outputs(&entry.outputs);
        if mask == 0 || mask != session.denom_mask {
            return Err(PoolMessage::ErrExistingTx);
        }

        let mut tx = Transaction::new();
        let mut value_out: Amount = 0;
        for output in &entry.outputs {
            value_out += output.value;
            if output.script_pubkey.len() != 25 {
                debug!("entry rejected: non-standard pubkey script");
                return Err(PoolMessage::ErrNonStandardPubkey);
            }
            if !output.script_pubkey.is_standard_payment() {
                debug!("entry rejected: invalid script");
                return Err(PoolMessage::ErrInvalidScript);
            }
            tx.outputs.push(output.clone());
        }

        let mut value_in: Amount = 0;
        for input in &entry.inputs {
            tx.inputs.push(input.to_txin());
            match self.ledger.get_output_value(&input.prevout) {
                Some(v) => value_in += v,
                None => {
                    debug!("entry rejected: missing input {}", input.prevout);
                    return Err(PoolMessage::ErrMissingTx);
                }
            }
        }

        if value_in > MIXING_POOL_MAX {
            debug!("entry rejected: more than mixing pool maximum");
            return Err(PoolMessage::ErrMaximum);
        }

        // Allow the lowest denomination (at most) as a fee.
        if value_in - value_out > smallest_denomination() {
            debug!("entry rejected: fees too high");
            return Err(PoolMessage::ErrFees);
        }

        if !self.ledger.accept_to_mempool(&tx) {
            debug!("entry rejected: transaction not valid");
            return Err(PoolMessage::ErrInvalidTx);
        }

        Ok(())
    }

    fn add_entry(
        &self,
        inner: &mut MixerInner,
        entry: PoolEntry,
        now_ms: u64,
    ) -> Result<PoolMessage, PoolMessage> {
        if entry.inputs.iter().any(|i| i.prevout.is_null()) {
            return Err(PoolMessage::ErrInvalidInput);
        }
        if !is_collateral_valid(&entry.collateral, self.ledger.as_ref()) {
            return Err(PoolMessage::ErrInvalidCollateral);
        }
        if inner.session.entries.len() >= self.params.pool_max_participants {
            return Err(PoolMessage::ErrEntriesFull);
        }
        for input in &entry.inputs {
            if inner.session.has_input(&input.prevout) {
                debug!("entry rejected: input {} already in pool", input.prevout);
                return Err(PoolMessage::ErrAlreadyHave);
            }
        }

        inner.session.entries.push(entry);
        inner.session.touch(now_ms);
        debug!("entry added, {} total", inner.session.entries.len());
        Ok(PoolMessage::MsgEntriesAdded)
    }

    // ── DSSIGNFINALTX ────────────────────────────────────────────────────

    fn handle_sign_final_tx(
        &self,
        inner: &mut MixerInner,
        out: &mut Vec<Outbound>,
        peer_proto: u32,
        inputs: Vec<TxIn>,
        now_ms: u64,
    ) {
        if peer_proto < self.params.min_mixing_proto_version {
            return;
        }

        let total = inputs.len();
        for (n, txin) in inputs.into_iter().enumerate() {
            if !self.add_script_sig(inner, &txin) {
                debug!("add_script_sig failed at {}/{}", n + 1, total);
                self.relay_status(out, inner, PoolStatusUpdate::Rejected, PoolMessage::MsgNoErr);
                return;
            }
            debug!("add_script_sig {}/{} success", n + 1, total);
        }
        self.check_pool(inner, out, now_ms);
    }

    fn add_script_sig(&self, inner: &mut MixerInner, txin: &TxIn) -> bool {
        // Duplicate scriptSigs are rejected outright.
        let duplicate = inner.session.entries.iter().any(|e| {
            e.inputs
                .iter()
                .any(|i| !i.script_sig.is_empty() && i.script_sig == txin.script_sig)
        });
        if duplicate {
            debug!("scriptSig already exists");
            return false;
        }

        // The signed input must correspond to an input the pool knows.
        if !inner.session.has_input(&txin.prevout) {
            debug!("failed to find matching input in pool for {}", txin.prevout);
            return false;
        }

        for final_in in &mut inner.session.final_tx.inputs {
            if final_in.prevout == txin.prevout && final_in.sequence == txin.sequence {
                final_in.script_sig = txin.script_sig.clone();
            }
        }
        for entry in &mut inner.session.entries {
            if entry.add_script_sig(txin) {
                return true;
            }
        }

        debug!("couldn't set scriptSig");
        false
    }

    // ── Progress ─────────────────────────────────────────────────────────

    /// Advance the session when entries fill up or signatures complete.
    fn check_pool(&self, inner: &mut MixerInner, out: &mut Vec<Outbound>, now_ms: u64) {
        if inner.session.state == PoolState::AcceptingEntries
            && inner.session.entries.len() >= self.params.pool_max_participants
        {
            self.create_final_transaction(inner, out);
            return;
        }

        if inner.session.state == PoolState::Signing && inner.session.signatures_complete() {
            self.commit_final_transaction(inner, out, now_ms);
        }
    }

    fn create_final_transaction(&self, inner: &mut MixerInner, out: &mut Vec<Outbound>) {
        let mut tx = Transaction::new();
        for entry in &inner.session.entries {
            tx.outputs.extend(entry.outputs.iter().cloned());
            tx.inputs.extend(entry.inputs.iter().map(|i| i.to_txin()));
        }
        // Deterministic ordering severs the per-client grouping.
        tx.sort_bip69();

        inner.session.final_tx = tx.clone();
        info!(
            "final transaction assembled: {} inputs, {} outputs",
            tx.inputs.len(),
            tx.outputs.len()
        );

        out.push(Outbound::All(MixMessage::FinalTx {
            session_id: inner.session.id,
            tx,
        }));
        self.set_state(inner, PoolState::Signing);
    }

    fn commit_final_transaction(&self, inner: &mut MixerInner, out: &mut Vec<Outbound>, now_ms: u64) {
        let tx = inner.session.final_tx.clone();
        let txid = tx.txid();

        if !self.ledger.accept_to_mempool(&tx) {
            warn!("final transaction rejected by mempool, resetting");
            let session_id = inner.session.id;
            inner.session.set_null(now_ms);
            out.push(Outbound::All(MixMessage::Complete {
                session_id,
                message_id: PoolMessage::ErrInvalidTx as i32,
            }));
            return;
        }

        // Sign and register the broadcast record so clients can
        // authenticate the mix.
        if !inner.broadcast_txs.contains_key(&txid) {
            let mut dstx = MixBroadcastTx::new(tx, self.mixer_id, (now_ms / 1000) as i64);
            if let Err(e) = dstx.sign(&self.keypair, self.params.message_magic) {
                warn!("failed to sign broadcast tx: {}", e);
            }
            out.push(Outbound::All(MixMessage::BroadcastTx(dstx.clone())));
            inner.broadcast_txs.insert(txid, dstx);
        }
        self.ledger.relay_inventory(&txid);

        info!("final transaction {} committed", txid);
        out.push(Outbound::All(MixMessage::Complete {
            session_id: inner.session.id,
            message_id: PoolMessage::MsgSuccess as i32,
        }));

        self.charge_random_fees(inner, &mut rand::thread_rng());
        inner.session.set_null(now_ms);
    }

    // ── Collateral charging ──────────────────────────────────────────────

    /// Broadcast one offender's collateral, sometimes.
    ///
    /// Submission and signing are separate steps; without a cost a client
    /// could submit and then refuse to sign forever.
    fn charge_fees<R: Rng>(&self, inner: &mut MixerInner, rng: &mut R) {
        // Not every offence is charged.
        if rng.gen_range(0..100) > 33 {
            return;
        }

        let mut offenders: Vec<Transaction> = Vec::new();

        if inner.session.state == PoolState::AcceptingEntries {
            // Whoever got a queue slot but never sent the promised entry.
            for collateral in &inner.session.collaterals {
                let found = inner.session.entries.iter().any(|e| e.collateral == *collateral);
                if !found {
                    debug!("found uncooperative node (didn't send entry)");
                    offenders.push(collateral.clone());
                }
            }
        }

        if inner.session.state == PoolState::Signing {
            // Whoever submitted but never signed.
            for entry in &inner.session.entries {
                if entry.inputs.iter().any(|i| !i.has_sig) {
                    debug!("found uncooperative node (didn't sign)");
                    offenders.push(entry.collateral.clone());
                }
            }
        }

        if offenders.is_empty() {
            return;
        }
        // Mostly offenders? Charge only sometimes.
        if offenders.len() >= self.params.pool_max_participants - 1 && rng.gen_range(0..100) > 33 {
            return;
        }
        // Everyone an offender? Then the fault is likely ours.
        if offenders.len() >= self.params.pool_max_participants {
            return;
        }

        offenders.shuffle(rng);
        let victim = &offenders[0];
        if self.ledger.accept_to_mempool(victim) {
            info!("charging collateral {}", victim.txid());
            self.ledger.relay_transaction(victim);
        } else {
            warn!("charge_fees: mempool rejected collateral");
        }
    }

    /// Mixing has no direct fee; roughly one in ten successful sessions
    /// pays miners through a participant's collateral.
    fn charge_random_fees<R: Rng>(&self, inner: &mut MixerInner, rng: &mut R) {
        for collateral in &inner.session.collaterals {
            if rng.gen_range(0..100) > 10 {
                continue;
            }
            if self.ledger.accept_to_mempool(collateral) {
                info!("charging random collateral {}", collateral.txid());
                self.ledger.relay_transaction(collateral);
            } else {
                warn!("charge_random_fees: mempool rejected collateral");
            }
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    fn is_session_ready(&self, inner: &MixerInner) -> bool {
        inner.session.collaterals.len() >= self.params.pool_max_participants
    }

    fn set_state(&self, inner: &mut MixerInner, state: PoolState) {
        // Terminal states live on clients only.
        if state.is_terminal() {
            debug!("refusing to set mixer state to {}", state);
            return;
        }
        debug!("mixer state {} -> {}", inner.session.state, state);
        inner.session.state = state;
    }

    fn push_status(
        &self,
        out: &mut Vec<Outbound>,
        peer: PeerId,
        inner: &MixerInner,
        update: PoolStatusUpdate,
        message_id: PoolMessage,
    ) {
        out.push(Outbound::To(
            peer,
            MixMessage::StatusUpdate {
                session_id: inner.session.id,
                state: inner.session.state as i32,
                entries_count: inner.session.entries.len() as i32,
                status_update: update as i32,
                message_id: message_id as i32,
            },
        ));
    }

    fn relay_status(
        &self,
        out: &mut Vec<Outbound>,
        inner: &MixerInner,
        update: PoolStatusUpdate,
        message_id: PoolMessage,
    ) {
        out.push(Outbound::All(MixMessage::StatusUpdate {
            session_id: inner.session.id,
            state: inner.session.state as i32,
            entries_count: inner.session.entries.len() as i32,
            status_update: update as i32,
            message_id: message_id as i32,
        }));
    }

    fn flush(&self, out: Vec<Outbound>) {
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

impl std::fmt::Debug for MixerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixerPool")
            .field("mixer_id", &self.mixer_id)
            .finish_non_exhaustive()
    }
}
