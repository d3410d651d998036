//! Core types and constants for the Umbra cryptocurrency.
//!
//! This crate provides the foundational types used across all Umbra crates:
//! atomic amounts, hashes, scripts, transactions with deterministic BIP69
//! ordering, and per-network chain parameters.

pub mod amount;
pub mod hash;
pub mod params;
pub mod script;
pub mod transaction;

pub use amount::{format_amount, parse_amount, Amount, COIN};
pub use hash::{sha256d, Hash256};
pub use params::{chain_params, ChainParams, Network};
pub use script::Script;
pub use transaction::{OutPoint, Transaction, TxIn, TxOut};
