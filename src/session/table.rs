//! C6: the per-table state machine. One `Table` owns one room's seats,
//! spectators, ready set and (when a hand is live) its `HandState`.
//! Grounded on the Zobbo reference backend's `Room` (a `Mutex`-guarded
//! struct reachable only through `Arc<Room>`, §9 "global singletons ->
//! explicit context"), generalized from its fixed 2-player room to
//! Tonk/Reem's up-to-4-seat, spectator-carrying, bot-backed table.
//!
//! All writes to a table's state pass through `self.inner.lock()`: the
//! "one logical actor per table" requirement (§5) is met by the mutex
//! rather than a mailbox task, exactly the choice the spec calls out as
//! equally valid.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::bot;
use crate::error::SessionError;
use crate::hash::state_hash;
use crate::ledger::{Ledger, LedgerSeat};
use crate::matchmaker::{MatchmakerTarget, MAX_SEATS};
use crate::rules::{self, Action, HandState, WinType};
use crate::store::{save_table_with_retry, GameRecord, Store, TableSnapshot};

use super::protocol::{redact, Outbound, PublicHandState, SeatSummary, TableSummary, WireAction};

pub const DISCONNECT_GRACE_IN_HAND: Duration = Duration::from_secs(20);
pub const DISCONNECT_GRACE_IDLE: Duration = Duration::from_secs(5 * 60);
pub const TRANSITION_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const RECONCILE_THROTTLE: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeatStatus {
    Active,
    Disconnected,
    Left,
}

#[derive(Clone, Debug)]
pub struct Seat {
    pub username: String,
    pub is_human: bool,
    pub connection_id: Option<Uuid>,
    pub chips_snapshot: i64,
    pub status: SeatStatus,
    pub hit_penalty_rounds: u8,
    pub hit_count: u32,
    pub disconnected_at: Option<Instant>,
}

impl Seat {
    fn human(username: &str, connection_id: Uuid, chips: i64) -> Self {
        Self {
            username: username.to_string(),
            is_human: true,
            connection_id: Some(connection_id),
            chips_snapshot: chips,
            status: SeatStatus::Active,
            hit_penalty_rounds: 0,
            hit_count: 0,
            disconnected_at: None,
        }
    }

    fn bot(index: usize) -> Self {
        Self {
            username: format!("bot-{index}"),
            is_human: false,
            connection_id: None,
            chips_snapshot: 0,
            status: SeatStatus::Active,
            hit_penalty_rounds: 0,
            hit_count: 0,
            disconnected_at: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SpectatorEntry {
    pub username: String,
    pub connection_id: Uuid,
    pub joined_at: Instant,
    pub transition_id: Option<Uuid>,
    pub will_join_next_hand: bool,
}

#[derive(Clone, Debug)]
pub struct Transition {
    pub transition_id: Uuid,
    pub pending_seat_username: String,
    pub started_at: Instant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableStatus {
    Empty,
    Waiting,
    Countdown,
    InHand,
    Settling,
}

impl TableStatus {
    fn as_str(&self) -> &'static str {
        match self {
            TableStatus::Empty => "empty",
            TableStatus::Waiting => "waiting",
            TableStatus::Countdown => "countdown",
            TableStatus::InHand => "in_hand",
            TableStatus::Settling => "settling",
        }
    }
}

struct Inner {
    seats: Vec<Option<Seat>>,
    spectators: Vec<SpectatorEntry>,
    ready: std::collections::HashSet<String>,
    hand: Option<HandState>,
    game_id: Option<String>,
    status: TableStatus,
    transition: Option<Transition>,
    last_hand_ended_at: Option<Instant>,
    last_sync_request: Option<Instant>,
}

/// A seat at the table, a room of spectators and a live-or-idle hand, all
/// behind one lock (§3 "Table", §5 "one logical actor per table").
pub struct Table {
    pub table_id: String,
    pub stake: u64,
    inner: Mutex<Inner>,
    connections: DashMap<Uuid, tokio::sync::mpsc::UnboundedSender<Outbound>>,
    ledger: Ledger,
    store: Arc<dyn Store>,
    /// Lets `&self` methods reached through the `MatchmakerTarget` trait
    /// object (held as `Arc<dyn MatchmakerTarget>` by the pool) spawn
    /// work against `Arc<Table>` — e.g. the countdown in
    /// `start_countdown_and_deal` — without widening every trait method
    /// to an `Arc<Self>` receiver.
    weak_self: std::sync::Weak<Table>,
}

pub enum JoinOutcome {
    Seated { seat: usize },
    TransitionPending,
    SpectatingUntilNextHand,
}

impl Table {
    pub fn new(table_id: String, stake: u64, ledger: Ledger, store: Arc<dyn Store>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            table_id,
            stake,
            inner: Mutex::new(Inner {
                seats: vec![None, None, None, None],
                spectators: Vec::new(),
                ready: std::collections::HashSet::new(),
                hand: None,
                game_id: None,
                status: TableStatus::Empty,
                transition: None,
                last_hand_ended_at: None,
                last_sync_request: None,
            }),
            connections: DashMap::new(),
            ledger,
            store,
            weak_self: weak_self.clone(),
        })
    }

    pub fn register_connection(&self, id: Uuid, tx: tokio::sync::mpsc::UnboundedSender<Outbound>) {
        self.connections.insert(id, tx);
    }

    pub fn unregister_connection(&self, id: &Uuid) {
        self.connections.remove(id);
    }

    fn send_to(&self, connection_id: Uuid, msg: Outbound) {
        if let Some(tx) = self.connections.get(&connection_id) {
            let _ = tx.send(msg);
        }
    }

    /// Broadcasts to every seat and spectator connection (§9 "Broadcast
    /// to rooms": seats and spectators share one connection set).
    fn broadcast(&self, msg: Outbound) {
        for entry in self.connections.iter() {
            let _ = entry.value().send(msg.clone());
        }
    }

    fn summary(inner: &Inner, table_id: &str, stake: u64) -> TableSummary {
        TableSummary {
            table_id: table_id.to_string(),
            stake,
            seats: inner
                .seats
                .iter()
                .map(|s| match s {
                    Some(seat) => SeatSummary {
                        username: Some(seat.username.clone()),
                        is_human: seat.is_human,
                        status: match seat.status {
                            SeatStatus::Active => "active",
                            SeatStatus::Disconnected => "disconnected",
                            SeatStatus::Left => "left",
                        }
                        .to_string(),
                    },
                    None => SeatSummary {
                        username: None,
                        is_human: false,
                        status: "empty".to_string(),
                    },
                })
                .collect(),
            spectator_count: inner.spectators.len(),
            status: inner.status.as_str().to_string(),
        }
    }

    pub async fn table_summary(&self) -> TableSummary {
        let inner = self.inner.lock().await;
        Self::summary(&inner, &self.table_id, self.stake)
    }

    /// Snapshots the roster to the durable store with an optimistic
    /// concurrency retry (§5 "Shared resources": "an optimistic-
    /// concurrency retry (up to 3 attempts) wraps table saves to
    /// tolerate version conflicts from background sweeps"). Called at
    /// the state-machine's boundary transitions; failure here is logged,
    /// not fatal — the in-memory `Table` remains authoritative.
    fn persist_snapshot(&self, summary: &TableSummary) {
        let payload = serde_json::to_value(summary).expect("TableSummary always serializes");
        let table_id = self.table_id.clone();
        let result = save_table_with_retry(self.store.as_ref(), &table_id, |current| {
            let version = current.map(|c| c.version + 1).unwrap_or(1);
            TableSnapshot {
                table_id: table_id.clone(),
                version,
                payload: payload.clone(),
            }
        });
        if let Err(e) = result {
            warn!(error = %e, table = %self.table_id, "table snapshot persistence failed after retries");
        }
    }

    fn view_for(hand: &HandState, seats: &[Option<Seat>], connection_id: Uuid) -> PublicHandState {
        let viewer_seat = seats
            .iter()
            .position(|s| matches!(s, Some(seat) if seat.connection_id == Some(connection_id)));
        redact(hand, viewer_seat)
    }

    /// Hydrates the ledger's balance for a user the first time this table
    /// sees them, from the `users` collection the out-of-scope profile
    /// service maintains (§6); a user this store has never heard of
    /// starts at 0, same as the teacher's own unauthenticated-guest path.
    /// `Ledger::credit_new_user` is itself a no-op past the first call, so
    /// this is safe to call on every join/reseat.
    fn ensure_ledger_balance(&self, username: &str) {
        let starting_chips = self.store.get_user(username).map(|u| u.chip_balance).unwrap_or(0);
        self.ledger.credit_new_user(username, starting_chips);
    }

    /// `join_table` (§4.6): seat directly if no hand is running; create a
    /// `Transition` if a hand is in progress with a bot seated; otherwise
    /// spectate with a promise for the next hand.
    #[instrument(skip(self))]
    pub async fn join_table(&self, username: &str, connection_id: Uuid) -> Result<JoinOutcome, SessionError> {
        let mut inner = self.inner.lock().await;

        if inner.hand.is_none() {
            let Some(seat_idx) = inner.seats.iter().position(|s| s.is_none()) else {
                return Err(SessionError::TurnValidation("table is full".to_string()));
            };
            self.ensure_ledger_balance(username);
            inner.seats[seat_idx] = Some(Seat::human(username, connection_id, self.ledger.balance(username)));
            if inner.status == TableStatus::Empty {
                inner.status = TableStatus::Waiting;
            }
            let summary = Self::summary(&inner, &self.table_id, self.stake);
            drop(inner);
            self.broadcast(Outbound::PlayerJoined {
                username: username.to_string(),
                seat: seat_idx,
            });
            self.broadcast(Outbound::TablesUpdate { tables: vec![summary] });
            return Ok(JoinOutcome::Seated { seat: seat_idx });
        }

        let has_bot = inner.seats.iter().flatten().any(|s| !s.is_human);
        if has_bot {
            let transition_id = Uuid::new_v4();
            inner.transition = Some(Transition {
                transition_id,
                pending_seat_username: username.to_string(),
                started_at: Instant::now(),
            });
            inner.spectators.push(SpectatorEntry {
                username: username.to_string(),
                connection_id,
                joined_at: Instant::now(),
                transition_id: Some(transition_id),
                will_join_next_hand: true,
            });
            let view = Self::view_for(inner.hand.as_ref().expect("hand present"), &inner.seats, connection_id);
            drop(inner);
            self.send_to(connection_id, Outbound::SpectatorModeActive { state: view });
            self.broadcast(Outbound::TransitionInitiated {
                username: username.to_string(),
            });
            return Ok(JoinOutcome::TransitionPending);
        }

        inner.spectators.push(SpectatorEntry {
            username: username.to_string(),
            connection_id,
            joined_at: Instant::now(),
            transition_id: None,
            will_join_next_hand: true,
        });
        let view = Self::view_for(inner.hand.as_ref().expect("hand present"), &inner.seats, connection_id);
        drop(inner);
        self.send_to(connection_id, Outbound::SpectatorModeActive { state: view });
        Ok(JoinOutcome::SpectatingUntilNextHand)
    }

    pub async fn join_spectator(&self, username: &str, connection_id: Uuid) {
        let mut inner = self.inner.lock().await;
        inner.spectators.push(SpectatorEntry {
            username: username.to_string(),
            connection_id,
            joined_at: Instant::now(),
            transition_id: None,
            will_join_next_hand: false,
        });
        let view = inner
            .hand
            .as_ref()
            .map(|h| Self::view_for(h, &inner.seats, connection_id));
        drop(inner);
        if let Some(view) = view {
            self.send_to(connection_id, Outbound::StateSync { state: view });
        }
    }

    /// `player_ready` (§4.6): bots auto-ready whenever a human readies
    /// and no hand is running. Once every human seat is ready and there
    /// are >= 2 seats, starts the countdown.
    pub async fn player_ready(&self, username: &str) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        if inner.hand.is_some() {
            return Ok(());
        }
        inner.ready.insert(username.to_string());
        for seat in inner.seats.iter().flatten() {
            if !seat.is_human {
                inner.ready.insert(seat.username.clone());
            }
        }

        let human_usernames: Vec<String> = inner
            .seats
            .iter()
            .flatten()
            .filter(|s| s.is_human)
            .map(|s| s.username.clone())
            .collect();
        let seat_count = inner.seats.iter().flatten().count();
        let all_ready = seat_count >= 2 && human_usernames.iter().all(|u| inner.ready.contains(u));

        if all_ready {
            inner.status = TableStatus::Countdown;
            drop(inner);
            self.broadcast(Outbound::TurnStart { seat: 0 });
            self.start_hand_after_countdown().await;
        }
        Ok(())
    }

    async fn start_hand_after_countdown(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            this.deal_new_hand().await;
        });
    }

    #[instrument(skip(self))]
    async fn deal_new_hand(&self) {
        let mut inner = self.inner.lock().await;
        if inner.hand.is_some() || inner.status != TableStatus::Countdown {
            return;
        }

        let seats: Vec<LedgerSeat> = inner
            .seats
            .iter()
            .flatten()
            .map(|s| LedgerSeat {
                user_id: s.username.clone(),
                is_human: s.is_human,
            })
            .collect();
        let game_id = Uuid::new_v4().to_string();

        match self.ledger.deduct_stakes(&seats, self.stake, &self.table_id, &game_id) {
            Ok(txns) => {
                for txn in txns {
                    self.store.append_transaction(txn);
                }
            }
            Err(e) => {
                warn!(error = %e, table = %self.table_id, "stake deduction failed, aborting hand start");
                inner.status = TableStatus::Waiting;
                inner.ready.clear();
                drop(inner);
                self.broadcast(Outbound::Error {
                    message: "could not start hand: insufficient balance".to_string(),
                });
                return;
            }
        }

        let seat_count = inner.seats.iter().flatten().count();
        let mut seed = [0u8; 32];
        getrandom::getrandom(&mut seed).expect("getrandom failed");
        let hand = rules::deal(seat_count, self.stake, seed);

        inner.status = TableStatus::InHand;
        inner.game_id = Some(game_id);
        let hand_is_over = hand.is_over();
        inner.hand = Some(hand.clone());
        let summary = Self::summary(&inner, &self.table_id, self.stake);
        drop(inner);
        self.persist_snapshot(&summary);

        info!(table = %self.table_id, "hand dealt");
        self.broadcast(Outbound::GameUpdate {
            state: redact(&hand, None),
        });
        if hand_is_over {
            self.settle_hand(hand).await;
        }
    }

    /// `game_action` turn driving (§4.6): validates the sender owns the
    /// acting seat, applies the action via C1, persists and broadcasts,
    /// settles on terminal states, and schedules the next bot turn.
    #[instrument(skip(self, wire_action))]
    pub async fn apply_player_action(
        self: &Arc<Self>,
        username: &str,
        connection_id: Uuid,
        wire_action: WireAction,
        client_hash: Option<String>,
    ) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        let Some(hand) = inner.hand.clone() else {
            return Err(SessionError::TurnValidation("no hand in progress".to_string()));
        };
        if hand.is_over() {
            return Err(SessionError::TurnValidation("hand is already over".to_string()));
        }

        let acting_seat = hand.turn;
        let Some(seat) = inner.seats[acting_seat].clone() else {
            return Err(SessionError::NotASeat);
        };
        if seat.username != username {
            return Err(SessionError::TurnValidation("not your turn".to_string()));
        }
        // Reconnect race (§4.6): sender owns the seat by username but the
        // connection id is stale; patch it rather than rejecting.
        if seat.connection_id != Some(connection_id) {
            inner.seats[acting_seat].as_mut().unwrap().connection_id = Some(connection_id);
        }

        if let Some(client_hash) = &client_hash {
            let server_hash = state_hash(&hand);
            if *client_hash != server_hash {
                let view = Self::view_for(&hand, &inner.seats, connection_id);
                drop(inner);
                self.send_to(connection_id, Outbound::StateReconciled { state: view });
                return Err(SessionError::TurnValidation("state desync".to_string()));
            }
        }

        let action: Action = wire_action.into();
        let is_discard = matches!(action, Action::Discard { .. });
        let next = match rules::apply(&hand, action) {
            Ok(next) => next,
            Err(e) => {
                let view = Self::view_for(&hand, &inner.seats, connection_id);
                drop(inner);
                self.send_to(connection_id, Outbound::TurnValidationError { message: e.to_string() });
                if is_discard {
                    self.send_to(connection_id, Outbound::StateSync { state: view });
                }
                return Err(SessionError::Rule(e));
            }
        };

        if let Some(hit_seat) = newly_hit_seat(&hand, &next) {
            if let Some(seat) = inner.seats[hit_seat].as_mut() {
                seat.hit_count = next.hit_count[hit_seat];
                seat.hit_penalty_rounds = next.hit_penalty_rounds[hit_seat];
            }
        }
        // §4.1: the penalty decays at the start of the penalized seat's
        // own next turn. Decay the *stored* hand, not just the mirrored
        // `Seat` field — `apply`'s `Drop` arm and the bot both read
        // `HandState.hit_penalty_rounds`, never the `Seat`.
        let next = if next.turn != hand.turn {
            let decayed = rules::decay_hit_penalty(&next, next.turn);
            if let Some(seat) = inner.seats[next.turn].as_mut() {
                seat.hit_penalty_rounds = decayed.hit_penalty_rounds[next.turn];
            }
            decayed
        } else {
            next
        };

        let hand_is_over = next.is_over();
        inner.hand = Some(next.clone());
        let table_id = self.table_id.clone();
        drop(inner);

        self.broadcast(Outbound::GameUpdate { state: redact(&next, None) });

        if hand_is_over {
            self.settle_hand(next).await;
        } else {
            let next_seat = next.turn;
            let is_bot = {
                let inner = self.inner.lock().await;
                inner.seats[next_seat].as_ref().map(|s| !s.is_human).unwrap_or(false)
            };
            if is_bot {
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(800)).await;
                    this.play_bot_turn().await;
                });
            } else {
                self.broadcast(Outbound::TurnStart { seat: next_seat });
            }
            let _ = table_id;
        }
        Ok(())
    }

    async fn play_bot_turn(self: &Arc<Self>) {
        let hand = {
            let inner = self.inner.lock().await;
            match &inner.hand {
                Some(h) if !h.is_over() => h.clone(),
                _ => return,
            }
        };
        let seat = hand.turn;
        let is_bot = {
            let inner = self.inner.lock().await;
            inner.seats[seat].as_ref().map(|s| !s.is_human).unwrap_or(false)
        };
        if !is_bot {
            return;
        }
        let action = match bot::decide(&hand) {
            Ok(a) => a,
            Err(e) => {
                warn!(error = %e, table = %self.table_id, "bot turn aborted, no legal action");
                return;
            }
        };
        let next = match rules::apply(&hand, action) {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, table = %self.table_id, "bot action rejected by rules engine");
                return;
            }
        };

        let mut inner = self.inner.lock().await;
        if newly_hit_seat(&hand, &next).is_some() {
            for (i, seat) in inner.seats.iter_mut().enumerate() {
                if let Some(seat) = seat {
                    seat.hit_count = next.hit_count[i];
                    seat.hit_penalty_rounds = next.hit_penalty_rounds[i];
                }
            }
        }
        // Same decay as the human path (§4.1): mutate the stored hand,
        // not just the mirrored `Seat`, or a bot's own penalty never
        // actually expires.
        let next = if next.turn != hand.turn {
            let decayed = rules::decay_hit_penalty(&next, next.turn);
            if let Some(seat) = inner.seats[next.turn].as_mut() {
                seat.hit_penalty_rounds = decayed.hit_penalty_rounds[next.turn];
            }
            decayed
        } else {
            next
        };
        let hand_is_over = next.is_over();
        inner.hand = Some(next.clone());
        drop(inner);

        self.broadcast(Outbound::GameUpdate { state: redact(&next, None) });
        if hand_is_over {
            self.settle_hand(next).await;
        } else {
            let next_seat = next.turn;
            let is_bot = {
                let inner = self.inner.lock().await;
                inner.seats[next_seat].as_ref().map(|s| !s.is_human).unwrap_or(false)
            };
            if is_bot {
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(800)).await;
                    this.play_bot_turn().await;
                });
            } else {
                self.broadcast(Outbound::TurnStart { seat: next_seat });
            }
        }
    }

    /// Hand-end settlement (§4.3, §4.6): pay out via the ledger, persist
    /// a `GameRecord`, resolve pending transitions, clear ready state,
    /// and fall back to `waiting`.
    #[instrument(skip(self, hand))]
    async fn settle_hand(&self, hand: HandState) {
        let outcome = hand.outcome().expect("settle_hand called on a terminal hand").clone();
        let mut inner = self.inner.lock().await;
        inner.status = TableStatus::Settling;

        let ledger_seats: Vec<LedgerSeat> = inner
            .seats
            .iter()
            .flatten()
            .map(|s| LedgerSeat {
                user_id: s.username.clone(),
                is_human: s.is_human,
            })
            .collect();
        let game_id = inner.game_id.clone().unwrap_or_default();

        match outcome.win_type {
            WinType::DropCaught => {
                let dropper = outcome.dropped_seat.expect("DropCaught always has a dropped seat");
                match self.ledger.apply_drop_penalty(
                    &ledger_seats,
                    dropper,
                    &outcome.round_scores,
                    self.stake,
                    &self.table_id,
                    &game_id,
                ) {
                    Ok(txns) => {
                        for txn in txns {
                            self.store.append_transaction(txn);
                        }
                    }
                    Err(e) => warn!(error = %e, "drop penalty settlement failed after hand end"),
                }
            }
            _ => {
                match self.ledger.distribute_winnings(
                    &ledger_seats,
                    &outcome.winners,
                    outcome.win_type,
                    self.stake,
                    &self.table_id,
                    &game_id,
                ) {
                    Ok(txns) => {
                        for txn in txns {
                            self.store.append_transaction(txn);
                        }
                    }
                    Err(e) => warn!(error = %e, "payout settlement failed after hand end"),
                }
            }
        }

        self.store.save_game(GameRecord {
            game_id,
            table_id: self.table_id.clone(),
            stake: self.stake,
            seat_usernames: inner.seats.iter().flatten().map(|s| s.username.clone()).collect(),
            winners: outcome.winners.clone(),
            win_type: outcome.win_type,
            round_scores: outcome.round_scores.clone(),
            started_at: chrono::Utc::now(),
            ended_at: chrono::Utc::now(),
        });

        // Resolve a pending transition: the promised spectator replaces
        // the earmarked bot seat.
        if let Some(transition) = inner.transition.take() {
            if let Some(bot_idx) = inner.seats.iter().position(|s| matches!(s, Some(seat) if !seat.is_human)) {
                if let Some(spec_idx) = inner
                    .spectators
                    .iter()
                    .position(|s| s.transition_id == Some(transition.transition_id))
                {
                    let spectator = inner.spectators.remove(spec_idx);
                    self.ensure_ledger_balance(&spectator.username);
                    let balance = self.ledger.balance(&spectator.username);
                    inner.seats[bot_idx] = Some(Seat::human(&spectator.username, spectator.connection_id, balance));
                    let username = spectator.username.clone();
                    drop(inner);
                    self.broadcast(Outbound::TransitionCompleted {
                        username,
                        seat: bot_idx,
                    });
                    inner = self.inner.lock().await;
                }
            }
        }

        // Promote any spectators promised a seat for "the next hand" with
        // no transition (mid-hand joins while no bot was present).
        let promotable: Vec<usize> = inner
            .spectators
            .iter()
            .enumerate()
            .filter(|(_, s)| s.will_join_next_hand && s.transition_id.is_none())
            .map(|(i, _)| i)
            .collect();
        for spec_idx in promotable {
            let Some(empty_idx) = inner.seats.iter().position(|s| s.is_none()) else {
                break;
            };
            let spectator = inner.spectators.remove(spec_idx.min(inner.spectators.len().saturating_sub(1)));
            self.ensure_ledger_balance(&spectator.username);
            let balance = self.ledger.balance(&spectator.username);
            inner.seats[empty_idx] = Some(Seat::human(&spectator.username, spectator.connection_id, balance));
        }

        inner.hand = None;
        inner.game_id = None;
        inner.ready.clear();
        inner.status = if inner.seats.iter().flatten().count() == 0 {
            TableStatus::Empty
        } else {
            TableStatus::Waiting
        };
        inner.last_hand_ended_at = Some(Instant::now());
        let summary = Self::summary(&inner, &self.table_id, self.stake);
        drop(inner);
        self.persist_snapshot(&summary);

        self.broadcast(Outbound::GameOver {
            winners: outcome.winners,
            win_type: outcome.win_type,
            state: redact(&hand, None),
        });
        self.broadcast(Outbound::TablesUpdate { tables: vec![summary] });
    }

    /// `request_state_sync`, throttled to one per second per connection
    /// (§4.6 "Desync reconciliation").
    pub async fn request_state_sync(&self, connection_id: Uuid) {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        if let Some(last) = inner.last_sync_request {
            if now.duration_since(last) < RECONCILE_THROTTLE {
                return;
            }
        }
        inner.last_sync_request = Some(now);
        let view = inner
            .hand
            .as_ref()
            .map(|h| Self::view_for(h, &inner.seats, connection_id));
        drop(inner);
        if let Some(view) = view {
            self.send_to(connection_id, Outbound::StateSync { state: view });
        }
    }

    /// `verify_state` / the `/tables/:id/validate-state` HTTP surface:
    /// compares a client-claimed hash against the authoritative one.
    pub async fn verify_state(&self, claimed_hash: &str) -> bool {
        let inner = self.inner.lock().await;
        match &inner.hand {
            Some(hand) => state_hash(hand) == claimed_hash,
            None => false,
        }
    }

    /// Disconnect (§4.6): mark the seat, start its grace period. If that
    /// leaves zero humans, abandon the hand.
    pub async fn disconnect(self: &Arc<Self>, connection_id: Uuid) {
        self.unregister_connection(&connection_id);
        let mut inner = self.inner.lock().await;
        let Some(idx) = inner
            .seats
            .iter()
            .position(|s| matches!(s, Some(seat) if seat.connection_id == Some(connection_id)))
        else {
            inner.spectators.retain(|s| s.connection_id != connection_id);
            return;
        };
        let username = inner.seats[idx].as_ref().unwrap().username.clone();
        if let Some(seat) = inner.seats[idx].as_mut() {
            seat.status = SeatStatus::Disconnected;
            seat.disconnected_at = Some(Instant::now());
        }
        let grace = if inner.hand.is_some() {
            DISCONNECT_GRACE_IN_HAND
        } else {
            DISCONNECT_GRACE_IDLE
        };
        drop(inner);
        self.broadcast(Outbound::PlayerLeft { username: username.clone() });

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            this.expire_disconnect_if_still_gone(idx, &username).await;
        });
    }

    async fn expire_disconnect_if_still_gone(self: &Arc<Self>, idx: usize, username: &str) {
        let mut inner = self.inner.lock().await;
        let still_gone = matches!(
            &inner.seats[idx],
            Some(seat) if seat.username == username && seat.status == SeatStatus::Disconnected
        );
        if !still_gone {
            return;
        }
        inner.seats[idx] = None;
        let humans_left = inner.seats.iter().flatten().filter(|s| s.is_human).count();
        drop(inner);
        if humans_left == 0 {
            self.abandon_hand().await;
        }
    }

    /// `reconnect_player` (§4.6, §8 scenario 5): restores the seat and
    /// patches the connection id in both the `Table` and the live
    /// `HandState`'s addressable seats.
    pub async fn reconnect(&self, username: &str, connection_id: Uuid) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        let Some(idx) = inner.seats.iter().position(|s| matches!(s, Some(seat) if seat.username == username))
        else {
            return Err(SessionError::NotASeat);
        };
        if let Some(seat) = inner.seats[idx].as_mut() {
            seat.connection_id = Some(connection_id);
            seat.status = SeatStatus::Active;
            seat.disconnected_at = None;
        }
        let view = inner
            .hand
            .as_ref()
            .map(|h| Self::view_for(h, &inner.seats, connection_id));
        drop(inner);
        self.broadcast(Outbound::PlayerReconnected {
            username: username.to_string(),
        });
        if let Some(view) = view {
            self.send_to(connection_id, Outbound::StateSync { state: view });
        }
        Ok(())
    }

    /// Mid-hand leave (§4.6): advance the turn if the leaver was acting;
    /// end the hand with `ForfeitWin` if only one human remains.
    pub async fn leave(self: &Arc<Self>, username: &str) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        let Some(idx) = inner.seats.iter().position(|s| matches!(s, Some(seat) if seat.username == username))
        else {
            return Err(SessionError::NotASeat);
        };

        if let Some(hand) = inner.hand.clone() {
            if !hand.is_over() {
                let humans_remaining = inner
                    .seats
                    .iter()
                    .enumerate()
                    .filter(|(i, s)| *i != idx && matches!(s, Some(seat) if seat.is_human))
                    .count();
                if humans_remaining == 0 {
                    inner.seats[idx] = None;
                    drop(inner);
                    self.abandon_hand().await;
                    return Ok(());
                }
                if humans_remaining == 1 {
                    let winner = inner
                        .seats
                        .iter()
                        .position(|s| matches!(s, Some(seat) if seat.is_human && seat.username != username))
                        .expect("exactly one human remains");
                    let mut terminal = hand.clone();
                    terminal.phase = rules::HandPhase::Over(rules::Outcome {
                        winners: vec![winner],
                        win_type: WinType::ForfeitWin,
                        round_scores: (0..terminal.seat_count).map(|i| terminal.seat_score(i)).collect(),
                        dropped_seat: None,
                    });
                    inner.seats[idx] = None;
                    inner.hand = Some(terminal.clone());
                    drop(inner);
                    self.broadcast(Outbound::PlayerLeft { username: username.to_string() });
                    self.settle_hand(terminal).await;
                    return Ok(());
                }
                // >= 2 humans remain: §4.6 "continue with seats
                // compacted". `HandState.seats` position is stable for
                // the hand (§3 invariant), so reindexing `hands`/
                // `spreads`/`turn` would itself break an invariant;
                // instead the vacated seat becomes a bot in place, which
                // keeps every index stable and lets the turn keep
                // advancing through the normal bot-turn path.
                inner.seats[idx] = Some(Seat::bot(idx));
                let is_its_turn = hand.turn == idx;
                drop(inner);
                self.broadcast(Outbound::PlayerLeft { username: username.to_string() });
                if is_its_turn {
                    let this = Arc::clone(self);
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(800)).await;
                        this.play_bot_turn().await;
                    });
                }
                return Ok(());
            }
        }

        inner.seats[idx] = None;
        drop(inner);
        self.broadcast(Outbound::PlayerLeft { username: username.to_string() });
        Ok(())
    }

    /// Any state -> `waiting` when humans drop to 0 (§4.6 state
    /// machine's universal transition).
    async fn abandon_hand(&self) {
        let mut inner = self.inner.lock().await;
        inner.hand = None;
        inner.game_id = None;
        inner.ready.clear();
        inner.transition = None;
        inner.status = if inner.seats.iter().flatten().count() == 0 {
            TableStatus::Empty
        } else {
            TableStatus::Waiting
        };
        let summary = Self::summary(&inner, &self.table_id, self.stake);
        drop(inner);
        self.broadcast(Outbound::TablesUpdate { tables: vec![summary] });
    }
}

/// Identifies the seat a `Hit` just penalised, if any, by diffing hit
/// counts between two states (used to mirror the penalty back onto the
/// `Table`'s `Seat` records, which persist across hands unlike `HandState`).
fn newly_hit_seat(before: &HandState, after: &HandState) -> Option<usize> {
    (0..before.seat_count).find(|&i| after.hit_count.get(i) != before.hit_count.get(i))
}

impl MatchmakerTarget for Table {
    fn stake(&self) -> u64 {
        self.stake
    }

    fn human_count(&self) -> usize {
        self.inner
            .try_lock()
            .map(|inner| inner.seats.iter().flatten().filter(|s| s.is_human).count())
            .unwrap_or(0)
    }

    fn bot_count(&self) -> usize {
        self.inner
            .try_lock()
            .map(|inner| inner.seats.iter().flatten().filter(|s| !s.is_human).count())
            .unwrap_or(0)
    }

    fn hand_in_progress(&self) -> bool {
        self.inner.try_lock().map(|inner| inner.hand.is_some()).unwrap_or(true)
    }

    fn has_pending_transition(&self) -> bool {
        self.inner.try_lock().map(|inner| inner.transition.is_some()).unwrap_or(false)
    }

    fn resolve_pending_transition(&self) -> bool {
        // Transitions resolve inside `settle_hand`, driven by the table
        // actor itself once its hand reaches `over`; the matchmaker tick
        // only needs to observe whether one is still outstanding.
        false
    }

    fn seat_player(&self, username: &str) {
        if let Ok(mut inner) = self.inner.try_lock() {
            if let Some(idx) = inner.seats.iter().position(|s| s.is_none()) {
                self.ensure_ledger_balance(username);
                let balance = self.ledger.balance(username);
                inner.seats[idx] = Some(Seat::human(username, Uuid::nil(), balance));
                if inner.status == TableStatus::Empty {
                    inner.status = TableStatus::Waiting;
                }
            }
        }
    }

    fn begin_transition(&self, username: &str) {
        if let Ok(mut inner) = self.inner.try_lock() {
            inner.transition = Some(Transition {
                transition_id: Uuid::new_v4(),
                pending_seat_username: username.to_string(),
                started_at: Instant::now(),
            });
        }
    }

    fn add_bot(&self) {
        if let Ok(mut inner) = self.inner.try_lock() {
            if let Some(idx) = inner.seats.iter().position(|s| s.is_none()) {
                inner.seats[idx] = Some(Seat::bot(idx));
            }
        }
    }

    fn evict_bots_down_to(&self, keep: usize) {
        if let Ok(mut inner) = self.inner.try_lock() {
            let mut remaining = keep;
            for seat in inner.seats.iter_mut() {
                if matches!(seat, Some(s) if !s.is_human) {
                    if remaining == 0 {
                        *seat = None;
                    } else {
                        remaining -= 1;
                    }
                }
            }
        }
    }

    fn start_countdown_and_deal(&self) {
        let armed = if let Ok(mut inner) = self.inner.try_lock() {
            if inner.hand.is_none() {
                inner.status = TableStatus::Countdown;
                for seat in inner.seats.iter().flatten() {
                    inner.ready.insert(seat.username.clone());
                }
                true
            } else {
                false
            }
        } else {
            false
        };
        // §4.5 step 3: "after a 2 s countdown broadcast".
        if armed {
            if let Some(this) = self.weak_self.upgrade() {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    this.deal_new_hand().await;
                });
            }
        }
    }
}

pub fn max_seats() -> usize {
    MAX_SEATS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn test_table() -> Arc<Table> {
        Table::new("t1".to_string(), 10, Ledger::new(), InMemoryStore::new())
    }

    #[tokio::test]
    async fn first_join_seats_directly_and_marks_waiting() {
        let table = test_table();
        let outcome = table.join_table("alice", Uuid::new_v4()).await.unwrap();
        assert!(matches!(outcome, JoinOutcome::Seated { seat: 0 }));
        assert_eq!(table.human_count(), 1);
    }

    #[tokio::test]
    async fn verify_state_false_with_no_active_hand() {
        let table = test_table();
        assert!(!table.verify_state("deadbeef").await);
    }

    #[tokio::test]
    async fn leave_before_any_hand_just_frees_the_seat() {
        let table = test_table();
        table.join_table("alice", Uuid::new_v4()).await.unwrap();
        table.leave("alice").await.unwrap();
        assert_eq!(table.human_count(), 0);
    }
}
