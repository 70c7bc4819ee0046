//! Typed errors for each component boundary. C1-C6 never return raw
//! strings between each other; only the outermost ws/http handlers
//! collapse these into wire-level `error` events.

use thiserror::Error;

/// Errors from the pure rules engine (C1): `apply(State, Action)`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("must draw before acting again")]
    MustDrawFirst,
    #[error("already drew this turn")]
    AlreadyDrew,
    #[error("stock is empty")]
    StockEmpty,
    #[error("discard pile is empty")]
    DiscardEmpty,
    #[error("no such card in hand")]
    CardNotInHand,
    #[error("not a valid spread")]
    InvalidSpread,
    #[error("card does not extend the target spread")]
    InvalidHit,
    #[error("no such spread")]
    SpreadNotFound,
    #[error("cannot drop while penalized for {rounds} more round(s)")]
    PenalizedDrop { rounds: u8 },
    #[error("score {score} does not qualify for a special win")]
    IneligibleSpecialWin { score: u32 },
    #[error("hand is already over")]
    HandOver,
    #[error("seat index {0} out of range")]
    SeatOutOfRange(usize),
}

/// Errors from the bot driver (C2).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BotError {
    #[error("acting seat is not a bot")]
    NotABot,
    #[error("bot policy found no legal action")]
    NoLegalAction,
}

/// Errors from the wagering ledger (C3).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient balance for user {user_id}: has {balance}, needs {needed}")]
    InsufficientBalance {
        user_id: String,
        balance: i64,
        needed: i64,
    },
    #[error("unknown user {0}")]
    UnknownUser(String),
    #[error("transaction {0} already applied")]
    DuplicateTransaction(String),
}

/// Errors from the queue manager (C4).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("user {0} already queued at this stake")]
    AlreadyQueued(String),
    #[error("user {0} not found in this stake's queue")]
    NotQueued(String),
}

/// Errors surfaced to a single client connection; never cross table
/// boundaries (spec.md §7 "Propagation").
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("unknown table {0}")]
    UnknownTable(String),
    #[error("not a seat at this table")]
    NotASeat,
    #[error(transparent)]
    Rule(#[from] RuleError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("turn validation failed: {0}")]
    TurnValidation(String),
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("authentication failed")]
    AuthFailed,
    #[error("persistence conflict on {0} after retries")]
    PersistenceConflict(String),
}
