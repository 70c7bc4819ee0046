//! C2: the bot driver. `decide(&HandState) -> Action` is deterministic and
//! stateless between calls (§4.2); the policy is fixed on purpose so bots
//! replay identically across re-implementations.

use tracing::debug;

use crate::card::Card;
use crate::error::BotError;
use crate::rules::spread::{is_valid_hit, is_valid_spread};
use crate::rules::{Action, HandState};

/// Selects the action for the seat currently on turn, assuming that seat
/// is a bot. Does not itself check `is_human` — the session manager (C6)
/// only calls this when it already knows the acting seat is non-human.
pub fn decide(state: &HandState) -> Result<Action, BotError> {
    if state.is_over() {
        return Err(BotError::NoLegalAction);
    }
    let seat = state.turn;
    let hand = &state.hands[seat];

    if !state.has_drawn {
        // §4.2 step 1: draw from discard only when it would extend the
        // bot's own first spread (an intentionally odd proxy, fixed by
        // spec.md §9 open question 1 to be bot-only policy).
        if let (Some(top), Some(first_spread)) = (state.discard.last(), state.spreads[seat].first()) {
            if is_valid_hit(top, first_spread) {
                debug!(seat, "bot drawing from discard to extend its own spread");
                return Ok(Action::DrawDiscard);
            }
        }
        debug!(seat, "bot drawing from stock");
        return Ok(Action::DrawStock);
    }

    if let Some(cards) = first_legal_spread(hand) {
        debug!(seat, "bot laying a spread");
        return Ok(Action::Spread { cards });
    }

    if let Some((hand_index, target_seat, spread_index)) = first_legal_hit(state, seat) {
        debug!(seat, target_seat, "bot hitting an opponent's spread");
        return Ok(Action::Hit {
            hand_index,
            target_seat,
            spread_index,
        });
    }

    let score = state.seat_score(seat);
    if score <= 5 && state.hit_penalty_rounds[seat] == 0 {
        debug!(seat, score, "bot dropping on a low score");
        return Ok(Action::Drop);
    }

    let index = highest_value_card_index(hand);
    debug!(seat, index, "bot discarding its highest-value card");
    Ok(Action::Discard { index })
}

/// First legal spread found in the bot's hand, in enumeration order:
/// same-rank groups first (by rank, ascending), then suited runs.
fn first_legal_spread(hand: &[Card]) -> Option<Vec<Card>> {
    use crate::card::RANKS;

    for rank in RANKS {
        let matching: Vec<Card> = hand.iter().filter(|c| c.rank == rank).copied().collect();
        if matching.len() >= 3 {
            return Some(matching.into_iter().take(3).collect());
        }
    }

    for suit in crate::card::SUITS {
        let mut by_suit: Vec<Card> = hand.iter().filter(|c| c.suit == suit).copied().collect();
        by_suit.sort_by_key(|c| c.rank.order());
        for window in by_suit.windows(3) {
            if is_valid_spread(window) {
                return Some(window.to_vec());
            }
        }
    }

    None
}

/// First legal hit, enumerating the bot's own hand cards against every
/// spread on the table (including its own), own seat first.
fn first_legal_hit(state: &HandState, seat: usize) -> Option<(usize, usize, usize)> {
    let hand = &state.hands[seat];
    let seat_order: Vec<usize> = std::iter::once(seat)
        .chain((0..state.seat_count).filter(|&s| s != seat))
        .collect();
    for &target in &seat_order {
        for (spread_index, spread) in state.spreads[target].iter().enumerate() {
            for (hand_index, card) in hand.iter().enumerate() {
                if is_valid_hit(card, spread) {
                    return Some((hand_index, target, spread_index));
                }
            }
        }
    }
    None
}

fn highest_value_card_index(hand: &[Card]) -> usize {
    hand.iter()
        .enumerate()
        .max_by_key(|(i, c)| (c.rank.score_value(), std::cmp::Reverse(*i)))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::{Rank, Suit};
    use crate::rules::{deal, HandPhase};

    fn bot_state() -> HandState {
        let mut s = deal(2, 5, [4u8; 32]);
        s.phase = HandPhase::InProgress;
        s
    }

    #[test]
    fn draws_from_stock_when_undrawn_and_no_own_spread() {
        let s = bot_state();
        assert_eq!(decide(&s).unwrap(), Action::DrawStock);
    }

    #[test]
    fn lays_a_same_rank_spread_when_available() {
        let mut s = bot_state();
        s.has_drawn = true;
        s.hands[0] = vec![
            Card::new(Rank::Seven, Suit::Clubs),
            Card::new(Rank::Seven, Suit::Hearts),
            Card::new(Rank::Seven, Suit::Diamonds),
            Card::new(Rank::Two, Suit::Spades),
        ];
        let action = decide(&s).unwrap();
        match action {
            Action::Spread { cards } => assert_eq!(cards.len(), 3),
            other => panic!("expected Spread, got {other:?}"),
        }
    }

    #[test]
    fn drops_on_a_low_score_when_unpenalized() {
        let mut s = bot_state();
        s.has_drawn = true;
        s.hands[0] = vec![Card::new(Rank::Two, Suit::Clubs), Card::new(Rank::Three, Suit::Hearts)];
        assert_eq!(decide(&s).unwrap(), Action::Drop);
    }

    #[test]
    fn discards_highest_value_card_as_a_fallback() {
        let mut s = bot_state();
        s.has_drawn = true;
        s.hands[0] = vec![
            Card::new(Rank::Two, Suit::Clubs),
            Card::new(Rank::King, Suit::Hearts),
            Card::new(Rank::Seven, Suit::Spades),
        ];
        assert_eq!(decide(&s).unwrap(), Action::Discard { index: 1 });
    }
}
