//! Coin-mixing coordination protocol core.
//!
//! Wallet clients and designated mixer nodes cooperate in time-bounded
//! sessions: clients contribute denominated inputs with fresh equal-value
//! outputs, the hosting mixer merges them into a single BIP69-ordered
//! transaction, collects per-input signatures, and broadcasts the result.
//! Misbehavior is disincentivized through prepared collateral transactions
//! that the mixer may broadcast against offenders.
//!
//! This crate holds the session state machine (both roles), the signed queue
//! gossip and its rate limiting, denomination arithmetic, collateral
//! validation, the signing protocol, the client-side automatic-denomination
//! driver, and the periodic worker that drives timeouts. The ledger, wallet,
//! mixer directory, and network transport are reached through the narrow
//! traits in [`interfaces`].

pub mod client;
pub mod collateral;
pub mod denom;
pub mod driver;
pub mod interfaces;
pub mod messages;
pub mod mixer;
pub mod queue;
pub mod session;
pub mod signer;
pub mod worker;

pub use client::ClientPool;
pub use denom::DENOMINATIONS;
pub use driver::MixingOptions;
pub use messages::{MixMessage, PoolMessage, PoolState, PoolStatusUpdate};
pub use mixer::MixerPool;
pub use queue::{MixBroadcastTx, MixQueue};
pub use session::{MixTxIn, PoolEntry, Session};
pub use worker::MixWorker;

use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use umbra_types::{Amount, COIN};

// ─── Protocol constants ─────────────────────────────────────────────────────

/// Collateral fee a client must provably stake to enter a session.
pub const MIXING_COLLATERAL: Amount = COIN / 1000;

/// Maximum aggregate input value per submitted entry (999.99 coins).
pub const MIXING_POOL_MAX: Amount = 99_999_000_000;

/// Queue advertisements expire this many seconds after their timestamp; also
/// the session timeout outside the signing phase.
pub const MIXING_QUEUE_TIMEOUT_SECS: i64 = 30;

/// Session timeout while collecting signatures.
pub const MIXING_SIGNING_TIMEOUT_SECS: i64 = 15;

/// Keypool sizes at which the driver warns / stops mixing.
pub const MIXING_KEYS_THRESHOLD_WARNING: u32 = 100;
pub const MIXING_KEYS_THRESHOLD_STOP: u32 = 50;

/// Per-denomination wallet UTXO count before new outputs of that size are
/// skipped when splitting funds.
pub const DENOMS_COUNT_MAX: usize = 100;

/// Bounds of the jittered interval between automatic driver runs.
pub const AUTO_MIX_INTERVAL_MIN_SECS: u64 = 5;
pub const AUTO_MIX_INTERVAL_MAX_SECS: u64 = 15;

/// Dwell in a terminal state before the session resets to idle.
pub const POOL_RESET_DWELL_MS: u64 = 10_000;

/// Extra slack clients grant the mixer before declaring a timeout.
pub const CLIENT_TIMEOUT_LAG_MS: u64 = 10_000;

/// Milliseconds since the unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ─── Errors ─────────────────────────────────────────────────────────────────

/// Local operation failures. Protocol-level rejections travel as
/// [`messages::PoolMessage`] codes instead.
#[derive(Debug, Error)]
pub enum MixingError {
    #[error("signature error: {0}")]
    Signature(String),

    #[error("wallet error: {0}")]
    Wallet(String),

    #[error("wallet is locked, unable to create transaction")]
    WalletLocked,

    #[error("already have pending entries in the mixing pool")]
    PendingEntries,

    #[error("incorrect session denomination")]
    BadDenomination,

    #[error("can't select current denominated inputs")]
    NoInputs,

    #[error("can't make current denominated outputs")]
    OutputMismatch,

    #[error("keypool exhausted")]
    KeypoolExhausted,

    #[error("{0}")]
    Other(String),
}
