//! Narrow trait seams toward the out-of-scope collaborators: the ledger and
//! mempool, the wallet, the gossiped mixer directory, the peer transport,
//! and the chain-sync tracker.
//!
//! Every trait is object-safe; the pools hold them as `Arc<dyn ...>` so
//! hosts and tests can plug in their own implementations.

use crate::messages::MixMessage;
use crate::signer::MixPublicKey;
use umbra_types::{Amount, Hash256, OutPoint, Script, Transaction, TxOut};

/// Signature hash flags used when signing final-transaction inputs.
pub const SIGHASH_ALL: u32 = 0x01;
pub const SIGHASH_ANYONECANPAY: u32 = 0x80;

/// Opaque peer handle assigned by the transport.
pub type PeerId = u64;

/// Mixers are identified by the outpoint of their staking input.
pub type MixerId = OutPoint;

/// Directory record for one known mixer.
#[derive(Debug, Clone)]
pub struct MixerInfo {
    pub id: MixerId,
    pub pubkey: MixPublicKey,
    pub protocol_version: u32,
    /// Value of the global queue counter when this mixer last issued a
    /// queue; 0 if it never has.
    pub last_dsq: u64,
    pub allow_mixing: bool,
}

/// A denominated coin the wallet offers for mixing.
#[derive(Debug, Clone)]
pub struct DenomCoin {
    pub outpoint: OutPoint,
    pub value: Amount,
    pub prev_script: Script,
    /// How many mixing rounds this output has already passed through.
    pub rounds: u32,
}

/// UTXOs grouped under one address, used when splitting funds into
/// denominations or collaterals.
#[derive(Debug, Clone)]
pub struct CoinGroup {
    /// Destination script of the shared address; change is sent back here.
    pub address_script: Script,
    pub total: Amount,
    pub outpoints: Vec<OutPoint>,
}

/// Coin classes `create_transaction` may spend from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoinFilter {
    /// Only coins that are not already denominated.
    NonDenominated,
    /// Any spendable coin.
    AnySpendable,
}

/// The UTXO ledger and its mempool.
pub trait Ledger: Send + Sync {
    /// Value of a prior transaction output, `None` if the outpoint is
    /// unknown to the ledger.
    fn get_output_value(&self, outpoint: &OutPoint) -> Option<Amount>;

    /// Standard mempool acceptance, no bypass.
    fn accept_to_mempool(&self, tx: &Transaction) -> bool;

    /// Relay a full transaction to peers.
    fn relay_transaction(&self, tx: &Transaction);

    /// Announce a mixed transaction by inventory.
    fn relay_inventory(&self, txid: &Hash256);

    /// Height of the current chain tip.
    fn tip_height(&self) -> u32;

    /// Whether the host has room to keep operating.
    fn has_enough_disk_space(&self) -> bool {
        true
    }
}

/// Wallet operations the mixing client needs.
pub trait WalletAccess: Send + Sync {
    fn is_locked(&self) -> bool;

    fn lock_coin(&self, outpoint: &OutPoint);
    fn unlock_coin(&self, outpoint: &OutPoint);

    /// Reserve a fresh key and return its destination script. `None` when
    /// the keypool is exhausted.
    fn reserve_key(&self) -> Option<Script>;

    /// Build a transaction paying `recipients`, drawing only on
    /// `restrict_to` when non-empty, sending change to `change_script`.
    fn create_transaction(
        &self,
        recipients: &[TxOut],
        change_script: &Script,
        restrict_to: &[OutPoint],
        filter: CoinFilter,
    ) -> Result<Transaction, String>;

    /// Commit and broadcast a transaction built by `create_transaction`.
    fn commit_transaction(&self, tx: &Transaction) -> bool;

    /// Sign input `index` of `tx` against `prev_script`, placing the
    /// scriptSig in the transaction. Returns false if the key is missing.
    fn sign_input(
        &self,
        tx: &mut Transaction,
        index: usize,
        prev_script: &Script,
        value: Amount,
        sighash: u32,
    ) -> bool;

    /// Select denominated coins matching `denom_mask`, worth at least
    /// `value_min` and at most `value_max` in total, whose round count lies
    /// in `[min_rounds, max_rounds]`. Returned coins are pre-shuffled.
    fn select_coins_by_denominations(
        &self,
        denom_mask: u32,
        value_min: Amount,
        value_max: Amount,
        min_rounds: u32,
        max_rounds: u32,
    ) -> Option<Vec<DenomCoin>>;

    /// Amounts of mixable coins in `[value_min, value_max]`, for deriving a
    /// session denomination.
    fn select_mixing_amounts(
        &self,
        value_min: Amount,
        value_max: Amount,
        min_rounds: u32,
        max_rounds: u32,
    ) -> Option<Vec<Amount>>;

    /// Spendable UTXOs grouped by address.
    fn select_coins_grouped_by_address(&self, include_denominated: bool) -> Vec<CoinGroup>;

    fn get_anonymizable_balance(&self, exclude_denominated: bool) -> Amount;
    fn get_needs_to_be_anonymized_balance(&self, value_min: Amount) -> Amount;
    fn get_denominated_balance(&self, unconfirmed: bool) -> Amount;

    /// Whether collateral-sized inputs exist (optionally counting
    /// unconfirmed ones).
    fn has_collateral_inputs(&self, only_confirmed: bool) -> bool;

    /// Number of UTXOs worth exactly `value`.
    fn count_inputs_with_amount(&self, value: Amount) -> usize;

    /// Build (without committing) a fresh collateral transaction.
    fn create_collateral_transaction(&self) -> Result<Transaction, String>;

    fn keys_left_since_backup(&self) -> u32;
    fn auto_backup(&self) -> Result<(), String>;
}

/// The gossip-maintained list of known mixers.
pub trait MixerDirectory: Send + Sync {
    fn find(&self, id: &MixerId) -> Option<MixerInfo>;

    /// A uniformly random mixer meeting `min_proto`, excluding `exclude`.
    fn find_random_not_in(&self, exclude: &[MixerId], min_proto: u32) -> Option<MixerInfo>;

    fn count_enabled(&self, min_proto: u32) -> usize;
    fn size(&self) -> usize;

    /// Request a fresh announcement for a mixer we have stale data for.
    fn ask_for(&self, id: &MixerId);

    fn set_last_dsq(&self, id: &MixerId, value: u64);
    fn set_allow_mixing(&self, id: &MixerId, allow: bool);

    /// Reap stale entries; run from the periodic worker.
    fn check_and_remove(&self);

    /// One step of mixer self-verification; run from the periodic worker.
    fn verify_step(&self);
}

/// Outbound message paths on the host transport.
pub trait NetworkRelay: Send + Sync {
    /// Send to one connected peer.
    fn push_message(&self, peer: PeerId, msg: MixMessage);

    /// Send to every peer meeting `min_proto`.
    fn relay(&self, msg: MixMessage, min_proto: u32);

    /// Resolve (connecting if needed) the peer a mixer is reachable at.
    fn find_peer(&self, mixer: &MixerId) -> Option<PeerId>;
}

/// Progress of blockchain and mixer-list synchronization.
pub trait SyncTracker: Send + Sync {
    /// Advance the sync state machine one step.
    fn process_tick(&self);

    fn is_blockchain_synced(&self) -> bool;
    fn is_mixer_list_synced(&self) -> bool;
}
