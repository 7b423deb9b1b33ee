//! Centralized filename convention for generated card images.
//!
//! Every work item maps to a **card key**, the output filename without its
//! extension. Keys sort the way a deck is laid out: suits grouped, ranks in
//! numeric order, jokers and the back last.
//!
//! | Item | Key |
//! |------|-----|
//! | Ace of Hearts | `Hearts_01_Ace` |
//! | 10 of Clubs | `Clubs_10_10` |
//! | King of Spades | `Spades_13_King` |
//! | Joker 1 | `ZZ_Joker_14_Joker1` |
//! | Card Back | `ZZ_ZZ_00_Card-Back` |
//!
//! [`parse_card_key`] is the inverse, used when a previous run's summary is
//! turned back into work items (retrying failed cards).

use crate::manifest::{Card, Rank, Suit, WorkItem};

/// Key of the card back.
pub const BACK_KEY: &str = "ZZ_ZZ_00_Card-Back";

/// Build the card key for a work item.
pub fn card_key(item: &WorkItem) -> String {
    match item.card {
        Card::Standard { suit, rank } => {
            format!("{}_{:02}_{}", suit.name(), item.order_index, rank.label())
        }
        Card::Joker { number } => format!("ZZ_Joker_{:02}_Joker{}", item.order_index, number),
        Card::Back => BACK_KEY.to_string(),
    }
}

/// Output filename for a work item with the given extension (no leading dot).
pub fn file_name(item: &WorkItem, extension: &str) -> String {
    format!("{}.{}", card_key(item), extension)
}

/// Parse a card key (or a filename whose stem is a card key) back into a
/// work item.
///
/// Handles these patterns:
/// - `"Hearts_01_Ace"` → Ace of Hearts
/// - `"Clubs_10_10.png"` → 10 of Clubs (extension ignored)
/// - `"ZZ_Joker_14_Joker1"` → Joker 1
/// - `"ZZ_ZZ_00_Card-Back"` → Card Back
///
/// Returns `None` when the key does not describe a deck item, or when the
/// order number disagrees with the rank.
pub fn parse_card_key(key: &str) -> Option<WorkItem> {
    let stem = strip_extension(key);
    if stem == BACK_KEY {
        return Some(WorkItem::back());
    }
    if let Some(rest) = stem.strip_prefix("ZZ_Joker_") {
        let (_, name) = rest.split_once('_')?;
        let number: u8 = name.strip_prefix("Joker")?.parse().ok()?;
        if !(1..=2).contains(&number) {
            return None;
        }
        let item = WorkItem::joker(number);
        return (card_key(&item) == stem).then_some(item);
    }
    let mut parts = stem.splitn(3, '_');
    let suit = Suit::parse(parts.next()?)?;
    let order: u32 = parts.next()?.parse().ok()?;
    let rank = Rank::parse(parts.next()?)?;
    if rank.order() != order {
        return None;
    }
    Some(WorkItem::standard(suit, rank))
}

fn strip_extension(key: &str) -> &str {
    match key.rsplit_once('.') {
        Some((stem, ext)) if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
            stem
        }
        _ => key,
    }
}
