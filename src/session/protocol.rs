//! The wire protocol (§6): JSON frames of `{event, payload}` in both
//! directions. Grounded on the Zobbo reference backend's tagged
//! `ClientToServer`/`ServerToClient` enums, generalized from its 2-seat
//! card game to Tonk/Reem's seated/spectator/queue model.

use serde::{Deserialize, Serialize};

use crate::card::{Card, Rank, Suit};
use crate::rules::{Action, HandPhase, HandState, Outcome, WinType};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireAction {
    DrawStock,
    DrawDiscard,
    Discard { index: usize },
    Spread { cards: Vec<Card> },
    Hit {
        hand_index: usize,
        target_seat: usize,
        spread_index: usize,
    },
    Drop,
    DeclareSpecialWin,
}

impl From<WireAction> for Action {
    fn from(a: WireAction) -> Action {
        match a {
            WireAction::DrawStock => Action::DrawStock,
            WireAction::DrawDiscard => Action::DrawDiscard,
            WireAction::Discard { index } => Action::Discard { index },
            WireAction::Spread { cards } => Action::Spread { cards },
            WireAction::Hit {
                hand_index,
                target_seat,
                spread_index,
            } => Action::Hit {
                hand_index,
                target_seat,
                spread_index,
            },
            WireAction::Drop => Action::Drop,
            WireAction::DeclareSpecialWin => Action::DeclareSpecialWin,
        }
    }
}

/// Inbound events (§6): `join_queue`, `leave_queue`, `join_table`,
/// `join_spectator`, `player_ready`, `game_action`, `leave_table`,
/// `request_state_sync`, `verify_state`, `reconnect_player`, `pong`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum Inbound {
    JoinQueue { stake: u64 },
    LeaveQueue { stake: u64 },
    JoinTable { table_id: String },
    JoinSpectator { table_id: String },
    PlayerReady,
    GameAction { action: WireAction, client_hash: Option<String> },
    LeaveTable,
    RequestStateSync,
    VerifyState { hash: String },
    ReconnectPlayer { table_id: String },
    Pong,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicCard {
    rank: PublicRank,
    suit: PublicSuit,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum PublicRank {
    Known(Rank),
    Hidden(&'static str),
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum PublicSuit {
    Known(Suit),
    Hidden(&'static str),
}

impl PublicCard {
    fn visible(card: Card) -> Self {
        Self {
            rank: PublicRank::Known(card.rank),
            suit: PublicSuit::Known(card.suit),
        }
    }

    fn hidden() -> Self {
        Self {
            rank: PublicRank::Hidden("hidden"),
            suit: PublicSuit::Hidden("hidden"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PublicPhase {
    Waiting,
    InProgress,
    Over(Outcome),
}

/// The client-facing projection of a `HandState` (§4.6 "Redacted
/// spectator view"). `viewer_seat = None` (a spectator, or any client
/// once the hand is `over`) hides every hand; a seated viewer sees only
/// their own cards. The stock is never revealed, only its count.
#[derive(Debug, Clone, Serialize)]
pub struct PublicHandState {
    pub seat_count: usize,
    pub hands: Vec<Vec<PublicCard>>,
    pub spreads: Vec<Vec<Vec<Card>>>,
    pub discard: Vec<Card>,
    pub stock_count: usize,
    pub turn: usize,
    pub has_drawn: bool,
    pub stake: u64,
    pub pot: u64,
    pub phase: PublicPhase,
    pub state_hash: String,
}

pub fn redact(state: &HandState, viewer_seat: Option<usize>) -> PublicHandState {
    let reveal_all = state.is_over();
    let hands = state
        .hands
        .iter()
        .enumerate()
        .map(|(i, hand)| {
            if reveal_all || viewer_seat == Some(i) {
                hand.iter().map(|&c| PublicCard::visible(c)).collect()
            } else {
                hand.iter().map(|_| PublicCard::hidden()).collect()
            }
        })
        .collect();

    let phase = match &state.phase {
        HandPhase::Waiting => PublicPhase::Waiting,
        HandPhase::InProgress => PublicPhase::InProgress,
        HandPhase::Over(outcome) => PublicPhase::Over(outcome.clone()),
    };

    PublicHandState {
        seat_count: state.seat_count,
        hands,
        spreads: state.spreads.clone(),
        discard: state.discard.clone(),
        stock_count: state.stock.len(),
        turn: state.turn,
        has_drawn: state.has_drawn,
        stake: state.stake,
        pot: state.pot,
        phase,
        state_hash: crate::hash::state_hash(state),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SeatSummary {
    pub username: Option<String>,
    pub is_human: bool,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableSummary {
    pub table_id: String,
    pub stake: u64,
    pub seats: Vec<SeatSummary>,
    pub spectator_count: usize,
    pub status: String,
}

/// Outbound events (§6): `tables_update`, `queue_status`, `state_sync`,
/// `game_update`, `game_over`, `turn_start`, `player_joined`,
/// `player_left`, `player_reconnected`, `spectator_mode_active`,
/// `transition_initiated`, `transition_completed`, `state_reconciled`,
/// `error`, `ping`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum Outbound {
    TablesUpdate { tables: Vec<TableSummary> },
    QueueStatus { stake: u64, position: usize, eta_secs: u64 },
    StateSync { state: PublicHandState },
    GameUpdate { state: PublicHandState },
    GameOver { winners: Vec<usize>, win_type: WinType, state: PublicHandState },
    TurnStart { seat: usize },
    PlayerJoined { username: String, seat: usize },
    PlayerLeft { username: String },
    PlayerReconnected { username: String },
    SpectatorModeActive { state: PublicHandState },
    TransitionInitiated { username: String },
    TransitionCompleted { username: String, seat: usize },
    StateReconciled { state: PublicHandState },
    TurnValidationError { message: String },
    Error { message: String },
    Ping,
}
