//! # deck-gen
//!
//! Batch generation of a themed playing-card deck through a text-to-image
//! backend. A deck is 55 images: 52 standard cards, two jokers and a card
//! back, all rendered in one shared style.
//!
//! # Architecture
//!
//! ```text
//! manifest  →  prompt  →  backend  →  batch  →  summary
//! 55 items     request    image bytes  files +   batch_results.json
//!                                      outcomes
//! ```
//!
//! The card manifest is fixed and enumerated in the same order every time.
//! Each item is turned into a generation request by a pure prompt builder,
//! sent to a [`GenerationClient`](backend::GenerationClient), and the result
//! written atomically to `{card key}.png`. The batch runner records one
//! outcome per item, checkpoints the run summary after each, and never lets
//! a single card's failure stop the deck.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`manifest`] | The 55 work items in deck order |
//! | [`naming`] | Card key / filename convention and its parser |
//! | [`presets`] | Built-in technique and background styles |
//! | [`prompt`] | Validated run style and the pure request builder |
//! | [`backend`] | `GenerationClient` trait, error taxonomy, remote and local backends |
//! | [`batch`] | Sequential runner: retries, atomic writes, cancellation, early abort |
//! | [`progress`] | Progress, average and ETA arithmetic |
//! | [`summary`] | Per-item outcomes and the persisted run summary |
//! | [`config`] | `deck-gen.toml` loading, validation and merging |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Sequential Processing
//!
//! One item is in flight at a time. Both backends are rate- or
//! memory-bound, so parallel requests would mostly produce 429s or
//! out-of-memory errors, and strict ordering keeps the run log and the
//! progress display trivially consistent.
//!
//! ## Error Taxonomy at the Boundary
//!
//! Backends translate every failure into `Transient`, `Resource` or `Fatal`.
//! The runner only reacts to those three kinds, so adding a backend never
//! touches retry or abort logic.
//!
//! ## Seeds Are Configuration
//!
//! The seed policy is explicit: `random` sends none, `fixed` sends the same
//! seed for every card, `per-card` derives one from the base seed and the
//! card key. With either of the last two a re-run sends byte-identical
//! requests.

pub mod backend;
pub mod batch;
pub mod config;
pub mod manifest;
pub mod naming;
pub mod output;
pub mod presets;
pub mod progress;
pub mod prompt;
pub mod summary;

#[cfg(test)]
pub(crate) mod test_helpers;
