//! Wire-coded protocol enums and message payloads.
//!
//! The integer discriminants are part of the wire format and must not be
//! renumbered. Incoming integers are range-checked through the `from_i32`
//! constructors; anything out of bounds is dropped by the handlers.

use crate::queue::{MixBroadcastTx, MixQueue};
use crate::session::PoolEntry;
use serde::{Deserialize, Serialize};
use umbra_types::{Transaction, TxIn};

/// Session state, shared between the state machine and `DSSTATUSUPDATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum PoolState {
    Idle = 0,
    Queue = 1,
    AcceptingEntries = 2,
    Signing = 3,
    Error = 4,
    Success = 5,
}

impl PoolState {
    pub const MIN: i32 = PoolState::Idle as i32;
    pub const MAX: i32 = PoolState::Success as i32;

    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::Idle),
            1 => Some(Self::Queue),
            2 => Some(Self::AcceptingEntries),
            3 => Some(Self::Signing),
            4 => Some(Self::Error),
            5 => Some(Self::Success),
            _ => None,
        }
    }

    /// Whether this is a terminal client-side state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error | Self::Success)
    }
}

impl std::fmt::Display for PoolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Queue => "QUEUE",
            Self::AcceptingEntries => "ACCEPTING_ENTRIES",
            Self::Signing => "SIGNING",
            Self::Error => "ERROR",
            Self::Success => "SUCCESS",
        };
        write!(f, "{}", s)
    }
}

/// Accept/reject verdict carried by `DSSTATUSUPDATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum PoolStatusUpdate {
    Rejected = 0,
    Accepted = 1,
}

impl PoolStatusUpdate {
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::Rejected),
            1 => Some(Self::Accepted),
            _ => None,
        }
    }
}

/// Protocol result codes. `Err*` values reject, `Msg*` values report
/// progress; both travel in the same wire field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum PoolMessage {
    ErrAlreadyHave = 0,
    ErrDenom = 1,
    ErrEntriesFull = 2,
    ErrExistingTx = 3,
    ErrFees = 4,
    ErrInvalidCollateral = 5,
    ErrInvalidInput = 6,
    ErrInvalidScript = 7,
    ErrInvalidTx = 8,
    ErrMaximum = 9,
    ErrMixerList = 10,
    ErrMode = 11,
    ErrNonStandardPubkey = 12,
    ErrNotAMixer = 13,
    ErrQueueFull = 14,
    ErrRecent = 15,
    ErrSession = 16,
    ErrMissingTx = 17,
    ErrVersion = 18,
    MsgNoErr = 19,
    MsgSuccess = 20,
    MsgEntriesAdded = 21,
}

impl PoolMessage {
    pub const MIN: i32 = PoolMessage::ErrAlreadyHave as i32;
    pub const MAX: i32 = PoolMessage::MsgEntriesAdded as i32;

    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::ErrAlreadyHave),
            1 => Some(Self::ErrDenom),
            2 => Some(Self::ErrEntriesFull),
            3 => Some(Self::ErrExistingTx),
            4 => Some(Self::ErrFees),
            5 => Some(Self::ErrInvalidCollateral),
            6 => Some(Self::ErrInvalidInput),
            7 => Some(Self::ErrInvalidScript),
            8 => Some(Self::ErrInvalidTx),
            9 => Some(Self::ErrMaximum),
            10 => Some(Self::ErrMixerList),
            11 => Some(Self::ErrMode),
            12 => Some(Self::ErrNonStandardPubkey),
            13 => Some(Self::ErrNotAMixer),
            14 => Some(Self::ErrQueueFull),
            15 => Some(Self::ErrRecent),
            16 => Some(Self::ErrSession),
            17 => Some(Self::ErrMissingTx),
            18 => Some(Self::ErrVersion),
            19 => Some(Self::MsgNoErr),
            20 => Some(Self::MsgSuccess),
            21 => Some(Self::MsgEntriesAdded),
            _ => None,
        }
    }

    /// User-facing description.
    pub fn description(&self) -> &'static str {
        match self {
            Self::ErrAlreadyHave => "Already have that input.",
            Self::ErrDenom => "No matching denominations found for mixing.",
            Self::ErrEntriesFull => "Entries are full.",
            Self::ErrExistingTx => "Not compatible with existing transactions.",
            Self::ErrFees => "Transaction fees are too high.",
            Self::ErrInvalidCollateral => "Collateral not valid.",
            Self::ErrInvalidInput => "Input is not valid.",
            Self::ErrInvalidScript => "Invalid script detected.",
            Self::ErrInvalidTx => "Transaction not valid.",
            Self::ErrMaximum => "Value more than mixing pool maximum allows.",
            Self::ErrMixerList => "Not in the mixer list.",
            Self::ErrMode => "Incompatible mode.",
            Self::ErrNonStandardPubkey => "Non-standard public key detected.",
            Self::ErrNotAMixer => "This is not a mixer.",
            Self::ErrQueueFull => "Mixer queue is full.",
            Self::ErrRecent => "Last mixing attempt was too recent.",
            Self::ErrSession => "Session not complete!",
            Self::ErrMissingTx => "Missing input transaction information.",
            Self::ErrVersion => "Incompatible version.",
            Self::MsgNoErr => "No errors detected.",
            Self::MsgSuccess => "Transaction created successfully.",
            Self::MsgEntriesAdded => "Your entries added successfully.",
        }
    }
}

impl std::fmt::Display for PoolMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Everything the mixing protocol puts on the wire. Framing and transport
/// belong to the host peer layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MixMessage {
    /// Client asks to join (or open) a session: `DSACCEPT`.
    Accept {
        denom_mask: u32,
        collateral: Transaction,
    },
    /// Gossiped session advertisement: `DSQUEUE`.
    Queue(MixQueue),
    /// Client's inputs/outputs/collateral submission: `DSVIN`.
    Entry(PoolEntry),
    /// Mixer progress report: `DSSTATUSUPDATE`. Raw integers; receivers
    /// range-check before use.
    StatusUpdate {
        session_id: i32,
        state: i32,
        entries_count: i32,
        status_update: i32,
        message_id: i32,
    },
    /// Merged transaction for signing: `DSFINALTX`.
    FinalTx { session_id: i32, tx: Transaction },
    /// Client's signed inputs: `DSSIGNFINALTX`.
    SignFinalTx { inputs: Vec<TxIn> },
    /// Session outcome: `DSCOMPLETE`.
    Complete { session_id: i32, message_id: i32 },
    /// Authenticated mixed-transaction broadcast: `DSTX`.
    BroadcastTx(MixBroadcastTx),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_message_discriminants_are_wire_stable() {
        assert_eq!(PoolMessage::ErrAlreadyHave as i32, 0);
        assert_eq!(PoolMessage::ErrFees as i32, 4);
        assert_eq!(PoolMessage::ErrVersion as i32, 18);
        assert_eq!(PoolMessage::MsgNoErr as i32, 19);
        assert_eq!(PoolMessage::MsgEntriesAdded as i32, 21);
    }

    #[test]
    fn test_pool_message_roundtrip() {
        for v in PoolMessage::MIN..=PoolMessage::MAX {
            let m = PoolMessage::from_i32(v).unwrap();
            assert_eq!(m as i32, v);
        }
        assert!(PoolMessage::from_i32(-1).is_none());
        assert!(PoolMessage::from_i32(22).is_none());
    }

    #[test]
    fn test_pool_state_roundtrip() {
        for v in PoolState::MIN..=PoolState::MAX {
            let s = PoolState::from_i32(v).unwrap();
            assert_eq!(s as i32, v);
        }
        assert!(PoolState::from_i32(6).is_none());
    }

    #[test]
    fn test_terminal_states() {
        assert!(PoolState::Error.is_terminal());
        assert!(PoolState::Success.is_terminal());
        assert!(!PoolState::Queue.is_terminal());
    }

    #[test]
    fn test_status_update_bounds() {
        assert_eq!(PoolStatusUpdate::from_i32(0), Some(PoolStatusUpdate::Rejected));
        assert_eq!(PoolStatusUpdate::from_i32(1), Some(PoolStatusUpdate::Accepted));
        assert!(PoolStatusUpdate::from_i32(2).is_none());
    }
}
