//! C1: the pure turn-and-rules engine. `apply(&HandState, Action) ->
//! Result<HandState, RuleError>` is a free function with no I/O: every
//! call allocates and returns a new state, never mutates its input
//! (design note "nested mutable arrays -> value semantics").

pub mod spread;

use serde::{Deserialize, Serialize};

use crate::card::{full_deck, score_cards, shuffle_with_seed, Card};
use crate::error::RuleError;

use spread::{is_valid_hit, is_valid_spread};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum WinType {
    Reem,
    Immediate50,
    SpecialWin,
    RegularWin,
    StockEmpty,
    DropWin,
    DropCaught,
    /// Not produced by C1; set by the session manager (C6) when a
    /// mid-hand leave collapses a hand to a single human (§4.6).
    ForfeitWin,
}

/// Discriminated terminal payload (design note "duck-typed game state ->
/// tagged state record"): these fields only exist once a hand is over.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub winners: Vec<usize>,
    pub win_type: WinType,
    pub round_scores: Vec<u32>,
    pub dropped_seat: Option<usize>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum HandPhase {
    Waiting,
    InProgress,
    Over(Outcome),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct HandState {
    pub seat_count: usize,
    pub hands: Vec<Vec<Card>>,
    pub spreads: Vec<Vec<Vec<Card>>>,
    pub stock: Vec<Card>,
    pub discard: Vec<Card>,
    pub turn: usize,
    pub has_drawn: bool,
    pub stake: u64,
    pub pot: u64,
    pub phase: HandPhase,
    /// Per-seat hit penalty, reset at deal; mirrors `Seat.hitPenaltyRounds`
    /// for the session layer to snapshot back onto the Table's seats.
    pub hit_penalty_rounds: Vec<u8>,
    pub hit_count: Vec<u32>,
}

impl HandState {
    pub fn is_over(&self) -> bool {
        matches!(self.phase, HandPhase::Over(_))
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        match &self.phase {
            HandPhase::Over(o) => Some(o),
            _ => None,
        }
    }

    /// Score of cards still held (not laid in spreads) for seat `i`.
    pub fn seat_score(&self, i: usize) -> u32 {
        score_cards(&self.hands[i])
    }

    fn all_scores(&self) -> Vec<u32> {
        (0..self.seat_count).map(|i| self.seat_score(i)).collect()
    }

    /// §8 "card conservation": exactly 40 distinct cards across stock,
    /// discard, hands and spreads, each exactly once.
    pub fn check_card_conservation(&self) -> bool {
        let mut seen = std::collections::HashSet::new();
        let mut count = 0usize;
        for c in self.stock.iter().chain(self.discard.iter()) {
            if !seen.insert(*c) {
                return false;
            }
            count += 1;
        }
        for hand in &self.hands {
            for c in hand {
                if !seen.insert(*c) {
                    return false;
                }
                count += 1;
            }
        }
        for seat_spreads in &self.spreads {
            for spread in seat_spreads {
                for c in spread {
                    if !seen.insert(*c) {
                        return false;
                    }
                    count += 1;
                }
            }
        }
        count == 40
    }

    pub fn check_invariants(&self) -> bool {
        if !self.check_card_conservation() {
            return false;
        }
        if self.turn >= self.seat_count {
            return false;
        }
        for seat_spreads in &self.spreads {
            for spread in seat_spreads {
                if !is_valid_spread(spread) {
                    return false;
                }
            }
        }
        true
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
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

/// Deals a fresh hand: 5 cards to each seat in round-robin order from a
/// deck shuffled with the injected seed (§4.1 "Deal"). Detects
/// `IMMEDIATE_50` at deal time only (§4.1 terminal priority, item 2).
pub fn deal(seat_count: usize, stake: u64, seed: [u8; 32]) -> HandState {
    let mut deck = full_deck();
    shuffle_with_seed(&mut deck, seed);

    let mut hands = vec![Vec::with_capacity(5); seat_count];
    for _round in 0..5 {
        for seat in 0..seat_count {
            let card = deck.pop().expect("40-card deck deals 5 * seats <= 40");
            hands[seat].push(card);
        }
    }
    let stock = deck;

    let phase = hands
        .iter()
        .enumerate()
        .find(|(_, h)| score_cards(*h) == 50)
        .map(|(i, _)| HandPhase::Over(Outcome {
            winners: vec![i],
            win_type: WinType::Immediate50,
            round_scores: hands.iter().map(|h| score_cards(h)).collect(),
            dropped_seat: None,
        }))
        .unwrap_or(HandPhase::InProgress);

    HandState {
        seat_count,
        hands,
        spreads: vec![Vec::new(); seat_count],
        stock,
        discard: Vec::new(),
        turn: 0,
        has_drawn: false,
        stake,
        pot: stake * seat_count as u64,
        phase,
        hit_penalty_rounds: vec![0; seat_count],
        hit_count: vec![0; seat_count],
    }
}

/// Advances a hand by one action. Pure: never mutates `state`, and two
/// calls with equal inputs produce equal outputs (§8 "apply is pure").
pub fn apply(state: &HandState, action: Action) -> Result<HandState, RuleError> {
    if state.is_over() {
        return Err(RuleError::HandOver);
    }
    let mut next = state.clone();
    let acting = next.turn;

    match action {
        Action::DrawStock => {
            if next.has_drawn {
                return Err(RuleError::AlreadyDrew);
            }
            let card = next.stock.pop().ok_or(RuleError::StockEmpty)?;
            next.hands[acting].push(card);
            next.has_drawn = true;
        }
        Action::DrawDiscard => {
            if next.has_drawn {
                return Err(RuleError::AlreadyDrew);
            }
            let card = next.discard.pop().ok_or(RuleError::DiscardEmpty)?;
            next.hands[acting].push(card);
            next.has_drawn = true;
        }
        Action::Discard { index } => {
            if index >= next.hands[acting].len() {
                return Err(RuleError::CardNotInHand);
            }
            let card = next.hands[acting].remove(index);
            next.discard.push(card);

            if next.hands[acting].is_empty() {
                next.phase = HandPhase::Over(Outcome {
                    winners: vec![acting],
                    win_type: WinType::RegularWin,
                    round_scores: next.all_scores(),
                    dropped_seat: None,
                });
            } else if next.stock.is_empty() {
                let scores = next.all_scores();
                let min = *scores.iter().min().expect("seat_count > 0");
                let winners = scores
                    .iter()
                    .enumerate()
                    .filter(|(_, &s)| s == min)
                    .map(|(i, _)| i)
                    .collect();
                next.phase = HandPhase::Over(Outcome {
                    winners,
                    win_type: WinType::StockEmpty,
                    round_scores: scores,
                    dropped_seat: None,
                });
            } else {
                next.turn = (next.turn + 1) % next.seat_count;
                next.has_drawn = false;
            }
        }
        Action::Spread { cards } => {
            if !next.has_drawn {
                return Err(RuleError::MustDrawFirst);
            }
            if !is_valid_spread(&cards) {
                return Err(RuleError::InvalidSpread);
            }
            let mut hand = next.hands[acting].clone();
            for card in &cards {
                let pos = hand.iter().position(|c| c == card).ok_or(RuleError::CardNotInHand)?;
                hand.remove(pos);
            }
            next.hands[acting] = hand;
            next.spreads[acting].push(cards);

            if next.spreads[acting].len() >= 2 {
                next.phase = HandPhase::Over(Outcome {
                    winners: vec![acting],
                    win_type: WinType::Reem,
                    round_scores: next.all_scores(),
                    dropped_seat: None,
                });
            }
        }
        Action::Hit {
            hand_index,
            target_seat,
            spread_index,
        } => {
            if !next.has_drawn {
                return Err(RuleError::MustDrawFirst);
            }
            if target_seat >= next.seat_count {
                return Err(RuleError::SeatOutOfRange(target_seat));
            }
            if hand_index >= next.hands[acting].len() {
                return Err(RuleError::CardNotInHand);
            }
            let spread = next
                .spreads
                .get(target_seat)
                .and_then(|s| s.get(spread_index))
                .ok_or(RuleError::SpreadNotFound)?
                .clone();
            let card = next.hands[acting][hand_index];
            if !is_valid_hit(&card, &spread) {
                return Err(RuleError::InvalidHit);
            }
            next.hands[acting].remove(hand_index);
            next.spreads[target_seat][spread_index].push(card);

            next.hit_count[target_seat] += 1;
            next.hit_penalty_rounds[target_seat] = if next.hit_count[target_seat] == 1 { 2 } else { 1 };

            next.turn = (next.turn + 1) % next.seat_count;
            next.has_drawn = false;
        }
        Action::Drop => {
            let rounds = next.hit_penalty_rounds[acting];
            if rounds > 0 {
                return Err(RuleError::PenalizedDrop { rounds });
            }
            let scores = next.all_scores();
            let min = *scores.iter().min().expect("seat_count > 0");
            let winners: Vec<usize> = scores
                .iter()
                .enumerate()
                .filter(|(_, &s)| s == min)
                .map(|(i, _)| i)
                .collect();
            let win_type = if scores[acting] == min {
                WinType::DropWin
            } else {
                WinType::DropCaught
            };
            next.phase = HandPhase::Over(Outcome {
                winners,
                win_type,
                round_scores: scores,
                dropped_seat: Some(acting),
            });
        }
        Action::DeclareSpecialWin => {
            let score = next.seat_score(acting);
            if !(score == 41 || score <= 10) {
                return Err(RuleError::IneligibleSpecialWin { score });
            }
            next.phase = HandPhase::Over(Outcome {
                winners: vec![acting],
                win_type: WinType::SpecialWin,
                round_scores: next.all_scores(),
                dropped_seat: None,
            });
        }
    }

    Ok(next)
}

/// Advances to the start of `seat`'s next turn: decrements its hit
/// penalty (§9 open question 2). Called by the session manager once
/// per turn boundary, not by `apply` itself, since turn boundaries for
/// a seat don't coincide with every `apply` call (e.g. `Spread` doesn't
/// advance the turn at all).
pub fn decay_hit_penalty(state: &HandState, seat: usize) -> HandState {
    let mut next = state.clone();
    if next.hit_penalty_rounds[seat] > 0 {
        next.hit_penalty_rounds[seat] -= 1;
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::{Rank, Suit};

    fn two_seat_state(stake: u64) -> HandState {
        HandState {
            seat_count: 2,
            hands: vec![vec![], vec![]],
            spreads: vec![vec![], vec![]],
            stock: vec![],
            discard: vec![],
            turn: 0,
            has_drawn: false,
            stake,
            pot: stake * 2,
            phase: HandPhase::InProgress,
            hit_penalty_rounds: vec![0, 0],
            hit_count: vec![0, 0],
        }
    }

    #[test]
    fn deal_determinism_for_fixed_seed() {
        let a = deal(4, 10, [3u8; 32]);
        let b = deal(4, 10, [3u8; 32]);
        assert_eq!(a, b);
    }

    #[test]
    fn deal_conserves_all_40_cards() {
        let s = deal(4, 10, [9u8; 32]);
        assert!(s.check_card_conservation());
    }

    #[test]
    fn reem_win_via_two_spreads() {
        let mut s = two_seat_state(10);
        s.hands[0] = vec![
            Card::new(Rank::King, Suit::Spades),
            Card::new(Rank::King, Suit::Hearts),
            Card::new(Rank::King, Suit::Diamonds),
            Card::new(Rank::Four, Suit::Clubs),
            Card::new(Rank::Five, Suit::Clubs),
        ];
        s.stock = vec![Card::new(Rank::Three, Suit::Clubs)];
        s.hands[1] = vec![Card::new(Rank::Seven, Suit::Hearts)];

        let s = apply(&s, Action::DrawStock).unwrap();
        assert!(s.has_drawn);
        let s = apply(
            &s,
            Action::Spread {
                cards: vec![
                    Card::new(Rank::King, Suit::Spades),
                    Card::new(Rank::King, Suit::Hearts),
                    Card::new(Rank::King, Suit::Diamonds),
                ],
            },
        )
        .unwrap();
        assert!(!s.is_over());
        let s = apply(
            &s,
            Action::Spread {
                cards: vec![
                    Card::new(Rank::Three, Suit::Clubs),
                    Card::new(Rank::Four, Suit::Clubs),
                    Card::new(Rank::Five, Suit::Clubs),
                ],
            },
        )
        .unwrap();
        let outcome = s.outcome().unwrap();
        assert_eq!(outcome.win_type, WinType::Reem);
        assert_eq!(outcome.winners, vec![0]);
        assert_eq!(s.pot, 20);
    }

    #[test]
    fn discard_emptying_hand_is_regular_win() {
        let mut s = two_seat_state(5);
        s.hands[0] = vec![Card::new(Rank::Two, Suit::Clubs)];
        s.hands[1] = vec![Card::new(Rank::Three, Suit::Clubs)];
        s.stock = vec![Card::new(Rank::Four, Suit::Clubs)];
        let s = apply(&s, Action::Discard { index: 0 }).unwrap();
        assert_eq!(s.outcome().unwrap().win_type, WinType::RegularWin);
        assert_eq!(s.outcome().unwrap().winners, vec![0]);
    }

    #[test]
    fn discard_with_empty_stock_is_stock_empty_before_turn_advance() {
        let mut s = two_seat_state(5);
        s.hands[0] = vec![
            Card::new(Rank::Two, Suit::Clubs),
            Card::new(Rank::Three, Suit::Clubs),
        ];
        s.hands[1] = vec![Card::new(Rank::Five, Suit::Clubs)];
        s.stock = vec![];
        let before_turn = s.turn;
        let s = apply(&s, Action::Discard { index: 0 }).unwrap();
        assert_eq!(s.turn, before_turn, "turn must not advance on a terminal discard");
        let outcome = s.outcome().unwrap();
        assert_eq!(outcome.win_type, WinType::StockEmpty);
    }

    #[test]
    fn draw_stock_rejected_when_empty() {
        let s = two_seat_state(5);
        let err = apply(&s, Action::DrawStock).unwrap_err();
        assert_eq!(err, RuleError::StockEmpty);
    }

    #[test]
    fn drop_caught_when_dropper_not_minimum() {
        let mut s = HandState {
            seat_count: 3,
            ..two_seat_state(10)
        };
        s.hands = vec![
            vec![Card::new(Rank::Six, Suit::Clubs)],
            vec![Card::new(Rank::Three, Suit::Clubs)],
            vec![Card::new(Rank::Four, Suit::Clubs)],
        ];
        s.spreads = vec![vec![], vec![], vec![]];
        s.hit_penalty_rounds = vec![0, 0, 0];
        s.hit_count = vec![0, 0, 0];
        s.pot = 30;
        let s = apply(&s, Action::Drop).unwrap();
        let outcome = s.outcome().unwrap();
        assert_eq!(outcome.win_type, WinType::DropCaught);
        assert_eq!(outcome.winners, vec![1]);
        assert_eq!(outcome.dropped_seat, Some(0));
    }

    #[test]
    fn drop_rejected_while_penalized() {
        let mut s = two_seat_state(10);
        s.hit_penalty_rounds[0] = 2;
        let err = apply(&s, Action::Drop).unwrap_err();
        assert_eq!(err, RuleError::PenalizedDrop { rounds: 2 });
    }

    #[test]
    fn hit_penalty_escalates_then_decays() {
        let mut s = two_seat_state(10);
        s.hands[0] = vec![Card::new(Rank::Two, Suit::Clubs)];
        s.spreads[1] = vec![vec![
            Card::new(Rank::Three, Suit::Clubs),
            Card::new(Rank::Four, Suit::Clubs),
            Card::new(Rank::Five, Suit::Clubs),
        ]];
        s.hands[0].push(Card::new(Rank::Six, Suit::Clubs));
        s.has_drawn = false;
        s.stock = vec![Card::new(Rank::Ace, Suit::Spades)];
        let s = apply(&s, Action::DrawStock).unwrap();
        // hand now: [Two(clubs), Six(clubs), Ace(spades)]; hit with Six extends the run
        let hit_index = s.hands[0]
            .iter()
            .position(|c| c.rank == Rank::Six && c.suit == Suit::Clubs)
            .unwrap();
        let s = apply(
            &s,
            Action::Hit {
                hand_index: hit_index,
                target_seat: 1,
                spread_index: 0,
            },
        )
        .unwrap();
        assert_eq!(s.hit_penalty_rounds[1], 2);
        assert_eq!(s.hit_count[1], 1);
        let s = decay_hit_penalty(&s, 1);
        assert_eq!(s.hit_penalty_rounds[1], 1);
    }

    #[test]
    fn apply_is_pure() {
        let s = deal(3, 5, [1u8; 32]);
        let a = apply(&s, Action::DrawStock).unwrap();
        let b = apply(&s, Action::DrawStock).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn immediate_50_detected_only_at_deal() {
        // Construct a hand state with a seat whose held cards sum to 50
        // post-deal and confirm apply() never re-checks for it.
        let mut s = two_seat_state(10);
        s.hands[0] = vec![
            Card::new(Rank::King, Suit::Spades),
            Card::new(Rank::King, Suit::Hearts),
            Card::new(Rank::King, Suit::Diamonds),
            Card::new(Rank::King, Suit::Clubs),
            Card::new(Rank::Queen, Suit::Clubs),
        ];
        assert_eq!(score_cards(&s.hands[0]), 50);
        assert!(!s.is_over());
    }
}
