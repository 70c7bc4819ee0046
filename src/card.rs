//! Cards and the 40-card Tonk/Reem deck (8, 9, 10 removed).

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Suit {
    Hearts,
    Diamonds,
    Clubs,
    Spades,
}

pub const SUITS: [Suit; 4] = [Suit::Hearts, Suit::Diamonds, Suit::Clubs, Suit::Spades];

/// Closed rank order used for spreads and hits: Ace low, no wrap past King.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Rank {
    #[serde(rename = "A")]
    Ace,
    #[serde(rename = "2")]
    Two,
    #[serde(rename = "3")]
    Three,
    #[serde(rename = "4")]
    Four,
    #[serde(rename = "5")]
    Five,
    #[serde(rename = "6")]
    Six,
    #[serde(rename = "7")]
    Seven,
    #[serde(rename = "J")]
    Jack,
    #[serde(rename = "Q")]
    Queen,
    #[serde(rename = "K")]
    King,
}

pub const RANKS: [Rank; 10] = [
    Rank::Ace,
    Rank::Two,
    Rank::Three,
    Rank::Four,
    Rank::Five,
    Rank::Six,
    Rank::Seven,
    Rank::Jack,
    Rank::Queen,
    Rank::King,
];

impl Rank {
    /// Position in the closed rank order, used for "consecutive" checks.
    pub fn order(&self) -> u8 {
        RANKS.iter().position(|r| r == self).expect("rank in RANKS") as u8
    }

    /// Point value for scoring: 2-7 face, J/Q/K = 10, A = 1.
    pub fn score_value(&self) -> u32 {
        match self {
            Rank::Ace => 1,
            Rank::Two => 2,
            Rank::Three => 3,
            Rank::Four => 4,
            Rank::Five => 5,
            Rank::Six => 6,
            Rank::Seven => 7,
            Rank::Jack | Rank::Queen | Rank::King => 10,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Card {
    pub rank: Rank,
    pub suit: Suit,
}

impl Card {
    pub fn new(rank: Rank, suit: Suit) -> Self {
        Self { rank, suit }
    }
}

/// Builds the 40-card deck in a fixed order; callers shuffle it.
pub fn full_deck() -> Vec<Card> {
    let mut deck = Vec::with_capacity(40);
    for suit in SUITS {
        for rank in RANKS {
            deck.push(Card::new(rank, suit));
        }
    }
    deck
}

/// Shuffles in place with an injected seed so deals are reproducible (§4.1, §8).
pub fn shuffle_with_seed(deck: &mut [Card], seed: [u8; 32]) {
    let mut rng = ChaCha20Rng::from_seed(seed);
    for i in (1..deck.len()).rev() {
        let j = (rng.next_u32() as usize) % (i + 1);
        deck.swap(i, j);
    }
}

/// Score of a set of cards still held in hand (not laid in spreads).
pub fn score_cards<'a>(cards: impl IntoIterator<Item = &'a Card>) -> u32 {
    cards.into_iter().map(|c| c.rank.score_value()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deck_has_40_unique_cards() {
        let deck = full_deck();
        assert_eq!(deck.len(), 40);
        let unique: std::collections::HashSet<_> = deck.iter().collect();
        assert_eq!(unique.len(), 40);
        for rank in [Rank::Ace] {
            let _ = rank; // Ace present, 8/9/10 absent by construction of RANKS
        }
    }

    #[test]
    fn shuffle_is_deterministic_for_a_fixed_seed() {
        let seed = [7u8; 32];
        let mut a = full_deck();
        let mut b = full_deck();
        shuffle_with_seed(&mut a, seed);
        shuffle_with_seed(&mut b, seed);
        assert_eq!(a, b);
    }

    #[test]
    fn rank_order_has_no_wrap() {
        assert_eq!(Rank::Ace.order(), 0);
        assert_eq!(Rank::King.order(), 9);
    }
}
