//! Spread and hit validity (§4.1).

use crate::card::Card;

/// A spread is valid when it has >= 3 cards and is either all one rank, or
/// all one suit with ranks forming a contiguous window in the closed
/// rank order (Ace low, no wrap).
pub fn is_valid_spread(cards: &[Card]) -> bool {
    if cards.len() < 3 {
        return false;
    }
    let same_rank = cards.iter().all(|c| c.rank == cards[0].rank);
    if same_rank {
        return true;
    }
    is_suited_run(cards)
}

fn is_suited_run(cards: &[Card]) -> bool {
    let suit = cards[0].suit;
    if !cards.iter().all(|c| c.suit == suit) {
        return false;
    }
    let mut orders: Vec<u8> = cards.iter().map(|c| c.rank.order()).collect();
    orders.sort_unstable();
    orders.dedup();
    if orders.len() != cards.len() {
        // a rank repeated within a suited run is never valid
        return false;
    }
    let span = orders[orders.len() - 1] - orders[0] + 1;
    span as usize == orders.len()
}

/// Whether `card` legally extends `spread` (§4.1 "Hit validity").
pub fn is_valid_hit(card: &Card, spread: &[Card]) -> bool {
    if spread.is_empty() {
        return false;
    }
    let same_rank = spread.iter().all(|c| c.rank == spread[0].rank);
    if same_rank {
        return card.rank == spread[0].rank;
    }
    // suited run: card must match suit, and the combined rank set must
    // still be a contiguous window.
    let suit = spread[0].suit;
    if card.suit != suit {
        return false;
    }
    let mut orders: Vec<u8> = spread.iter().map(|c| c.rank.order()).collect();
    orders.push(card.rank.order());
    orders.sort_unstable();
    orders.dedup();
    if orders.len() != spread.len() + 1 {
        return false; // card's rank already in the run
    }
    let span = orders[orders.len() - 1] - orders[0] + 1;
    span as usize == orders.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::{Card, Rank, Suit};

    #[test]
    fn same_rank_triple_is_valid() {
        let cards = vec![
            Card::new(Rank::King, Suit::Spades),
            Card::new(Rank::King, Suit::Hearts),
            Card::new(Rank::King, Suit::Diamonds),
        ];
        assert!(is_valid_spread(&cards));
    }

    #[test]
    fn suited_run_is_valid_no_wrap() {
        let cards = vec![
            Card::new(Rank::Three, Suit::Clubs),
            Card::new(Rank::Four, Suit::Clubs),
            Card::new(Rank::Five, Suit::Clubs),
        ];
        assert!(is_valid_spread(&cards));

        let wrap = vec![
            Card::new(Rank::King, Suit::Clubs),
            Card::new(Rank::Ace, Suit::Clubs),
            Card::new(Rank::Two, Suit::Clubs),
        ];
        assert!(!is_valid_spread(&wrap));
    }

    #[test]
    fn two_pairs_is_not_a_spread() {
        let cards = vec![
            Card::new(Rank::King, Suit::Spades),
            Card::new(Rank::King, Suit::Hearts),
        ];
        assert!(!is_valid_spread(&cards));
    }

    #[test]
    fn hit_extends_suited_run_at_either_end() {
        let spread = vec![
            Card::new(Rank::Three, Suit::Clubs),
            Card::new(Rank::Four, Suit::Clubs),
            Card::new(Rank::Five, Suit::Clubs),
        ];
        assert!(is_valid_hit(&Card::new(Rank::Two, Suit::Clubs), &spread));
        assert!(is_valid_hit(&Card::new(Rank::Six, Suit::Clubs), &spread));
        assert!(!is_valid_hit(&Card::new(Rank::Seven, Suit::Clubs), &spread));
        assert!(!is_valid_hit(&Card::new(Rank::Two, Suit::Hearts), &spread));
    }

    #[test]
    fn hit_extends_same_rank_spread_by_rank_only() {
        let spread = vec![
            Card::new(Rank::Seven, Suit::Clubs),
            Card::new(Rank::Seven, Suit::Hearts),
            Card::new(Rank::Seven, Suit::Diamonds),
        ];
        assert!(is_valid_hit(&Card::new(Rank::Seven, Suit::Spades), &spread));
        assert!(!is_valid_hit(&Card::new(Rank::Six, Suit::Spades), &spread));
    }
}
