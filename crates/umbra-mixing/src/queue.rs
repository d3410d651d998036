//! Signed gossip objects and the queue book.
//!
//! Mixers advertise sessions with [`MixQueue`] messages and authenticate
//! their finished mixes with [`MixBroadcastTx`] records; both carry a
//! compact signature made with the mixer's staking key. The [`QueueBook`]
//! holds the gossiped queue FIFO plus the global `dsq` counter that stops a
//! handful of mixers from dominating the queue.

use crate::interfaces::{MixerDirectory, MixerId, MixerInfo};
use crate::signer::{self, CompactSignature, MixKeypair, MixPublicKey};
use crate::{MixingError, MIXING_QUEUE_TIMEOUT_SECS};
use log::debug;
use serde::{Deserialize, Serialize};
use umbra_types::Transaction;

/// A mixer's signed session advertisement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixQueue {
    pub denom_mask: u32,
    /// Staking outpoint of the advertising mixer.
    pub mixer: MixerId,
    /// Unix seconds at creation.
    pub time: i64,
    /// True once the mixer has enough clients and invites submissions.
    pub ready: bool,
    pub signature: CompactSignature,
    /// Local bookkeeping: whether this client already tried the queue.
    #[serde(skip)]
    pub tried: bool,
}

impl MixQueue {
    pub fn new(denom_mask: u32, mixer: MixerId, time: i64, ready: bool) -> Self {
        MixQueue {
            denom_mask,
            mixer,
            time,
            ready,
            signature: CompactSignature::default(),
            tried: false,
        }
    }

    /// Text the signature commits to.
    fn signing_payload(&self) -> String {
        format!(
            "{}{}{}{}",
            self.mixer,
            self.denom_mask,
            self.time,
            self.ready as u8
        )
    }

    /// Sign with the mixer's staking key, then verify against our own
    /// public key as a sanity check.
    pub fn sign(&mut self, keypair: &MixKeypair, magic: &str) -> Result<(), MixingError> {
        self.signature = signer::sign_message(keypair, magic, &self.signing_payload())?;
        self.verify(&keypair.public(), magic)
    }

    pub fn verify(&self, pubkey: &MixPublicKey, magic: &str) -> Result<(), MixingError> {
        signer::verify_message(pubkey, magic, &self.signing_payload(), &self.signature)
    }

    /// A queue is expired when its timestamp is more than the queue timeout
    /// away from `now` in either direction.
    pub fn is_expired(&self, now_secs: i64) -> bool {
        (now_secs - self.time).abs() > MIXING_QUEUE_TIMEOUT_SECS
    }
}

/// Duplicate detection ignores the signature and local bookkeeping.
impl PartialEq for MixQueue {
    fn eq(&self, other: &Self) -> bool {
        self.denom_mask == other.denom_mask
            && self.mixer == other.mixer
            && self.time == other.time
            && self.ready == other.ready
    }
}

impl Eq for MixQueue {}

impl std::fmt::Display for MixQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "queue[denom={}, mixer={}, time={}, ready={}]",
            crate::denom::mask_to_string(self.denom_mask),
            self.mixer,
            self.time,
            self.ready
        )
    }
}

/// Authenticated record of a mixed transaction, keyed by txid in the
/// process-wide broadcast map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixBroadcastTx {
    pub tx: Transaction,
    pub mixer: MixerId,
    pub sig_time: i64,
    pub signature: CompactSignature,
}

impl MixBroadcastTx {
    pub fn new(tx: Transaction, mixer: MixerId, sig_time: i64) -> Self {
        MixBroadcastTx {
            tx,
            mixer,
            sig_time,
            signature: CompactSignature::default(),
        }
    }

    fn signing_payload(&self) -> String {
        format!("{}{}", self.tx.txid(), self.sig_time)
    }

    pub fn sign(&mut self, keypair: &MixKeypair, magic: &str) -> Result<(), MixingError> {
        self.signature = signer::sign_message(keypair, magic, &self.signing_payload())?;
        self.verify(&keypair.public(), magic)
    }

    pub fn verify(&self, pubkey: &MixPublicKey, magic: &str) -> Result<(), MixingError> {
        signer::verify_message(pubkey, magic, &self.signing_payload(), &self.signature)
    }
}

/// The gossiped queue FIFO and the global fairness counter.
#[derive(Debug, Default)]
pub struct QueueBook {
    queues: Vec<MixQueue>,
    /// Increments on each accepted queue; monotonically nondecreasing.
    dsq_count: u64,
}

impl QueueBook {
    pub fn new() -> Self {
        QueueBook::default()
    }

    pub fn dsq_count(&self) -> u64 {
        self.dsq_count
    }

    pub fn queues(&self) -> &[MixQueue] {
        &self.queues
    }

    pub fn queues_mut(&mut self) -> &mut Vec<MixQueue> {
        &mut self.queues
    }

    pub fn contains(&self, queue: &MixQueue) -> bool {
        self.queues.iter().any(|q| q == queue)
    }

    /// Whether a not-yet-ready queue from this mixer is already pending.
    /// The same mixer cannot legitimately advertise twice this fast.
    pub fn has_pending_from(&self, mixer: &MixerId) -> bool {
        self.queues.iter().any(|q| q.mixer == *mixer)
    }

    pub fn push(&mut self, queue: MixQueue) {
        self.queues.push(queue);
    }

    /// Drop expired queue entries.
    pub fn remove_expired(&mut self, now_secs: i64) {
        self.queues.retain(|q| {
            if q.is_expired(now_secs) {
                debug!("removing expired {}", q);
                false
            } else {
                true
            }
        });
    }

    /// Whether `info`'s last queue is still too recent under the fairness
    /// rule, given the number of enabled mixers.
    pub fn is_too_recent(&self, info: &MixerInfo, enabled: usize) -> bool {
        info.last_dsq != 0 && info.last_dsq + enabled as u64 / 5 > self.dsq_count
    }

    /// Admit a new, valid, non-duplicate, non-ready queue: applies the
    /// fairness rule, bumps the counter, records the mixer's slot, and
    /// appends to the FIFO. Returns false when the queue must be dropped
    /// without relay.
    pub fn admit(
        &mut self,
        queue: MixQueue,
        info: &MixerInfo,
        directory: &dyn MixerDirectory,
        min_proto: u32,
    ) -> bool {
        let enabled = directory.count_enabled(min_proto);
        if self.is_too_recent(info, enabled) {
            debug!(
                "mixer {} is sending too many queue messages (last_dsq={}, count={})",
                info.id, info.last_dsq, self.dsq_count
            );
            return false;
        }

        self.dsq_count += 1;
        directory.set_last_dsq(&info.id, self.dsq_count);
        directory.set_allow_mixing(&info.id, true);
        debug!("new {} accepted, dsq_count={}", queue, self.dsq_count);
        self.queues.push(queue);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::MixerId;
    use std::sync::Mutex;
    use umbra_types::{sha256d, OutPoint};

    const MAGIC: &str = "Umbra Signed Message:\n";

    fn mixer_id(tag: &[u8]) -> MixerId {
        OutPoint::new(sha256d(tag), 0)
    }

    /// Directory stub tracking a single mixer's rate-limit slot.
    struct OneMixer {
        info: Mutex<MixerInfo>,
        enabled: usize,
    }

    impl OneMixer {
        fn new(id: MixerId, last_dsq: u64, enabled: usize) -> Self {
            OneMixer {
                info: Mutex::new(MixerInfo {
                    id,
                    pubkey: MixKeypair::random().public(),
                    protocol_version: 70208,
                    last_dsq,
                    allow_mixing: false,
                }),
                enabled,
            }
        }
    }

    impl MixerDirectory for OneMixer {
        fn find(&self, id: &MixerId) -> Option<MixerInfo> {
            let info = self.info.lock().unwrap();
            (info.id == *id).then(|| info.clone())
        }
        fn find_random_not_in(&self, _exclude: &[MixerId], _min: u32) -> Option<MixerInfo> {
            Some(self.info.lock().unwrap().clone())
        }
        fn count_enabled(&self, _min: u32) -> usize {
            self.enabled
        }
        fn size(&self) -> usize {
            1
        }
        fn ask_for(&self, _id: &MixerId) {}
        fn set_last_dsq(&self, _id: &MixerId, value: u64) {
            self.info.lock().unwrap().last_dsq = value;
        }
        fn set_allow_mixing(&self, _id: &MixerId, allow: bool) {
            self.info.lock().unwrap().allow_mixing = allow;
        }
        fn check_and_remove(&self) {}
        fn verify_step(&self) {}
    }

    #[test]
    fn test_sign_and_verify() {
        let keypair = MixKeypair::random();
        let mut queue = MixQueue::new(0b0100, mixer_id(b"m1"), 1_700_000_000, false);
        queue.sign(&keypair, MAGIC).unwrap();
        assert!(queue.verify(&keypair.public(), MAGIC).is_ok());

        // Tampering breaks the signature.
        let mut tampered = queue.clone();
        tampered.ready = true;
        assert!(tampered.verify(&keypair.public(), MAGIC).is_err());
    }

    #[test]
    fn test_expiry_both_directions() {
        let queue = MixQueue::new(0b0001, mixer_id(b"m1"), 1_000, false);
        assert!(!queue.is_expired(1_000 + MIXING_QUEUE_TIMEOUT_SECS));
        assert!(queue.is_expired(1_000 + MIXING_QUEUE_TIMEOUT_SECS + 1));
        // A queue stamped in the future is just as dead.
        assert!(queue.is_expired(1_000 - MIXING_QUEUE_TIMEOUT_SECS - 1));
    }

    #[test]
    fn test_duplicate_detection_ignores_signature() {
        let mut book = QueueBook::new();
        let queue = MixQueue::new(0b0001, mixer_id(b"m1"), 5, false);
        book.push(queue.clone());

        let mut resigned = queue.clone();
        resigned.signature = CompactSignature(vec![9; 65]);
        assert!(book.contains(&resigned));
    }

    #[test]
    fn test_rate_limit_rejects_recent_mixer() {
        // enabled = 50, dsq_count = 100, last_dsq = 95:
        // 95 + 50/5 = 105 > 100 → drop, counter unchanged.
        let id = mixer_id(b"m1");
        let directory = OneMixer::new(id, 95, 50);
        let mut book = QueueBook::new();
        book.dsq_count = 100;

        let queue = MixQueue::new(0b0001, id, 5, false);
        let info = directory.find(&id).unwrap();
        assert!(!book.admit(queue, &info, &directory, 70208));
        assert_eq!(book.dsq_count(), 100);
        assert!(book.queues().is_empty());
    }

    #[test]
    fn test_rate_limit_admits_and_records() {
        // 80 + 50/5 = 90 <= 100 → admit.
        let id = mixer_id(b"m1");
        let directory = OneMixer::new(id, 80, 50);
        let mut book = QueueBook::new();
        book.dsq_count = 100;

        let queue = MixQueue::new(0b0001, id, 5, false);
        let info = directory.find(&id).unwrap();
        assert!(book.admit(queue, &info, &directory, 70208));
        assert_eq!(book.dsq_count(), 101);
        let updated = directory.find(&id).unwrap();
        assert_eq!(updated.last_dsq, 101);
        assert!(updated.allow_mixing);
        assert_eq!(book.queues().len(), 1);
    }

    #[test]
    fn test_first_queue_always_admitted() {
        let id = mixer_id(b"m1");
        let directory = OneMixer::new(id, 0, 1000);
        let mut book = QueueBook::new();

        let queue = MixQueue::new(0b0001, id, 5, false);
        let info = directory.find(&id).unwrap();
        assert!(book.admit(queue, &info, &directory, 70208));
        assert_eq!(book.dsq_count(), 1);
    }

    #[test]
    fn test_remove_expired() {
        let mut book = QueueBook::new();
        book.push(MixQueue::new(0b0001, mixer_id(b"old"), 0, false));
        book.push(MixQueue::new(0b0001, mixer_id(b"new"), 1_000, false));
        book.remove_expired(1_010);
        assert_eq!(book.queues().len(), 1);
        assert_eq!(book.queues()[0].mixer, mixer_id(b"new"));
    }

    #[test]
    fn test_broadcast_tx_roundtrip() {
        let keypair = MixKeypair::random();
        let mut dstx = MixBroadcastTx::new(Transaction::new(), mixer_id(b"m1"), 77);
        dstx.sign(&keypair, MAGIC).unwrap();
        assert!(dstx.verify(&keypair.public(), MAGIC).is_ok());

        let mut tampered = dstx.clone();
        tampered.sig_time = 78;
        assert!(tampered.verify(&keypair.public(), MAGIC).is_err());
    }
}
