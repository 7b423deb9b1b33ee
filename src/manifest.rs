//! The fixed card manifest: every asset a complete deck needs.
//!
//! A deck is 55 work items, always enumerated in the same order:
//!
//! ```text
//! Hearts   Ace, 2 … 10, Jack, Queen, King     (13)
//! Spades   Ace … King                         (13)
//! Diamonds Ace … King                         (13)
//! Clubs    Ace … King                         (13)
//! Joker 1, Joker 2                            (2)
//! Card Back                                   (1)
//! ```
//!
//! Each item carries an `order_index` used only for filenames and display
//! (Ace = 1 … King = 13, jokers 14 and 15, the back 0). See
//! [`naming`](crate::naming) for the filename convention built on top of it.

use crate::naming;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of items in a complete deck.
pub const DECK_SIZE: usize = 55;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Suit {
    Hearts,
    Spades,
    Diamonds,
    Clubs,
}

impl Suit {
    /// Suit groups in manifest order.
    pub const ALL: [Suit; 4] = [Suit::Hearts, Suit::Spades, Suit::Diamonds, Suit::Clubs];

    pub fn name(self) -> &'static str {
        match self {
            Suit::Hearts => "Hearts",
            Suit::Spades => "Spades",
            Suit::Diamonds => "Diamonds",
            Suit::Clubs => "Clubs",
        }
    }

    /// Parse a suit name, case-insensitive, singular or plural.
    pub fn parse(s: &str) -> Option<Suit> {
        let lower = s.trim().to_ascii_lowercase();
        let stem = lower.strip_suffix('s').unwrap_or(&lower);
        match stem {
            "heart" => Some(Suit::Hearts),
            "spade" => Some(Suit::Spades),
            "diamond" => Some(Suit::Diamonds),
            "club" => Some(Suit::Clubs),
            _ => None,
        }
    }
}

impl fmt::Display for Suit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Rank {
    Ace,
    Two,
    Three,
    Four,
    Five,
    Six,
    Seven,
    Eight,
    Nine,
    Ten,
    Jack,
    Queen,
    King,
}

impl Rank {
    /// Ranks in manifest order within a suit.
    pub const ALL: [Rank; 13] = [
        Rank::Ace,
        Rank::Two,
        Rank::Three,
        Rank::Four,
        Rank::Five,
        Rank::Six,
        Rank::Seven,
        Rank::Eight,
        Rank::Nine,
        Rank::Ten,
        Rank::Jack,
        Rank::Queen,
        Rank::King,
    ];

    /// Label used in prompts, display names and filenames ("Ace", "7", "King").
    pub fn label(self) -> &'static str {
        match self {
            Rank::Ace => "Ace",
            Rank::Two => "2",
            Rank::Three => "3",
            Rank::Four => "4",
            Rank::Five => "5",
            Rank::Six => "6",
            Rank::Seven => "7",
            Rank::Eight => "8",
            Rank::Nine => "9",
            Rank::Ten => "10",
            Rank::Jack => "Jack",
            Rank::Queen => "Queen",
            Rank::King => "King",
        }
    }

    /// 1-based position within the suit (Ace = 1, King = 13).
    pub fn order(self) -> u32 {
        Rank::ALL
            .iter()
            .position(|r| *r == self)
            .map(|p| p as u32 + 1)
            .unwrap_or(0)
    }

    pub fn is_face(self) -> bool {
        matches!(self, Rank::Jack | Rank::Queen | Rank::King)
    }

    /// Parse a rank label. Accepts the full label or the usual one-letter
    /// abbreviations (`A`, `J`, `Q`, `K`), case-insensitive.
    pub fn parse(s: &str) -> Option<Rank> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "a" | "ace" | "1" => Some(Rank::Ace),
            "j" | "jack" => Some(Rank::Jack),
            "q" | "queen" => Some(Rank::Queen),
            "k" | "king" => Some(Rank::King),
            other => Rank::ALL
                .iter()
                .copied()
                .find(|r| r.label().eq_ignore_ascii_case(other)),
        }
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What a work item depicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Card {
    Standard { suit: Suit, rank: Rank },
    /// Joker number, 1 or 2.
    Joker { number: u8 },
    Back,
}

/// Coarse category of a [`Card`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardKind {
    Standard,
    Joker,
    Back,
}

/// One deck asset to be generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub card: Card,
    /// Ordering number used for filenames and display only.
    pub order_index: u32,
    /// Human label, e.g. "Ace of Hearts", "Joker 2", "Card Back".
    pub display_name: String,
}

impl WorkItem {
    pub fn standard(suit: Suit, rank: Rank) -> Self {
        Self {
            card: Card::Standard { suit, rank },
            order_index: rank.order(),
            display_name: format!("{} of {}", rank.label(), suit.name()),
        }
    }

    pub fn joker(number: u8) -> Self {
        Self {
            card: Card::Joker { number },
            order_index: 13 + u32::from(number),
            display_name: format!("Joker {}", number),
        }
    }

    pub fn back() -> Self {
        Self {
            card: Card::Back,
            order_index: 0,
            display_name: "Card Back".to_string(),
        }
    }

    pub fn kind(&self) -> CardKind {
        match self.card {
            Card::Standard { .. } => CardKind::Standard,
            Card::Joker { .. } => CardKind::Joker,
            Card::Back => CardKind::Back,
        }
    }

    pub fn suit(&self) -> Option<Suit> {
        match self.card {
            Card::Standard { suit, .. } => Some(suit),
            _ => None,
        }
    }

    pub fn rank(&self) -> Option<Rank> {
        match self.card {
            Card::Standard { rank, .. } => Some(rank),
            _ => None,
        }
    }

    /// Filename stem identifying this item, e.g. `Hearts_01_Ace`.
    pub fn key(&self) -> String {
        naming::card_key(self)
    }
}

/// Enumerate the full deck in manifest order.
///
/// Deterministic: every call returns the same 55 items in the same order.
pub fn enumerate() -> Vec<WorkItem> {
    let mut items = Vec::with_capacity(DECK_SIZE);
    for suit in Suit::ALL {
        for rank in Rank::ALL {
            items.push(WorkItem::standard(suit, rank));
        }
    }
    items.push(WorkItem::joker(1));
    items.push(WorkItem::joker(2));
    items.push(WorkItem::back());
    items
}

/// Keep only the manifest items whose key is in `keys`, preserving manifest
/// order. Unknown keys are returned in the second element.
pub fn select_keys(items: &[WorkItem], keys: &[String]) -> (Vec<WorkItem>, Vec<String>) {
    let selected: Vec<WorkItem> = items
        .iter()
        .filter(|item| keys.iter().any(|k| *k == item.key()))
        .cloned()
        .collect();
    let unknown = keys
        .iter()
        .filter(|k| !items.iter().any(|item| item.key() == **k))
        .cloned()
        .collect();
    (selected, unknown)
}
