//! Prompt builder: turns a work item plus the run style into a generation
//! request.
//!
//! [`build`] is a pure function. With a `fixed` or `per-card` seed policy the
//! same inputs always produce a byte-identical [`GenerationRequest`]; with
//! `random` the seed is left unset and the backend chooses.
//!
//! Every prompt names the card it depicts (rank and suit, joker number, or
//! "card back") so that all 55 outputs are distinguishable.

use crate::config::{self, ConfigError, DeckConfig, MAX_STEPS, SeedMode};
use crate::manifest::{Card, Rank, Suit, WorkItem};
use crate::presets::{self, BACKGROUNDS, TECHNIQUES};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Validated, run-wide style applied uniformly to every card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleConfig {
    pub theme: String,
    /// Technique description (presets already expanded).
    pub technique: String,
    /// Background description (presets already expanded).
    pub background: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub seed_mode: SeedMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u32>,
}

impl StyleConfig {
    /// Build the run style from the config, expanding preset names.
    pub fn from_config(config: &DeckConfig) -> Result<Self, ConfigError> {
        let style = Self {
            theme: config.style.theme.trim().to_string(),
            technique: presets::resolve(TECHNIQUES, &config.style.technique),
            background: presets::resolve(BACKGROUNDS, &config.style.background),
            width: config.image.width,
            height: config.image.height,
            steps: config.image.steps,
            seed_mode: config.seed.mode,
            seed: config.seed.value,
        };
        style.validate()?;
        Ok(style)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.theme.trim().is_empty() {
            return Err(ConfigError::Validation("theme must not be empty".into()));
        }
        config::validate_dimension("width", self.width)?;
        config::validate_dimension("height", self.height)?;
        if self.steps == 0 || self.steps > MAX_STEPS {
            return Err(ConfigError::Validation(format!(
                "steps must be 1-{MAX_STEPS}, got {}",
                self.steps
            )));
        }
        if self.seed_mode != SeedMode::Random && self.seed.is_none() {
            return Err(ConfigError::Validation(format!(
                "a seed value is required for seed mode \"{}\"",
                self.seed_mode.as_str()
            )));
        }
        Ok(())
    }
}

/// Everything a backend needs to render one card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Things the image must not contain. Backends without a dedicated field
    /// append it to the prompt.
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub seed: Option<u32>,
}

/// Aspect ratios commonly accepted by text-to-image APIs.
const ASPECT_RATIOS: &[(u32, u32)] = &[
    (1, 1),
    (2, 3),
    (3, 2),
    (3, 4),
    (4, 3),
    (4, 5),
    (5, 4),
    (9, 16),
    (16, 9),
    (21, 9),
];

impl GenerationRequest {
    /// Closest common aspect ratio to the requested dimensions, as `"W:H"`.
    ///
    /// 640×1152 is not exactly 9:16 but is reported as such.
    pub fn aspect_ratio(&self) -> String {
        let target = self.width as f64 / self.height as f64;
        let (w, h) = ASPECT_RATIOS
            .iter()
            .copied()
            .min_by(|a, b| {
                let da = (a.0 as f64 / a.1 as f64 - target).abs();
                let db = (b.0 as f64 / b.1 as f64 - target).abs();
                da.total_cmp(&db)
            })
            .unwrap_or((1, 1));
        format!("{w}:{h}")
    }

    /// Prompt with the negative prompt folded in as a trailing section.
    pub fn combined_prompt(&self) -> String {
        format!(
            "{}\n**NEGATIVE PROMPT:**\n- {}.\n",
            self.prompt.trim_end(),
            self.negative_prompt
        )
    }
}

/// Derive a per-card seed from the run seed and the card key.
///
/// SHA-256 over both inputs, truncated to 32 bits: stable across runs and
/// platforms, and distinct per card.
pub fn derive_seed(base: u32, card_key: &str) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(b"deck-gen-seed\0");
    hasher.update(base.to_le_bytes());
    hasher.update(card_key.as_bytes());
    let digest = hasher.finalize();
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

fn seed_for(item: &WorkItem, style: &StyleConfig) -> Option<u32> {
    match style.seed_mode {
        SeedMode::Random => None,
        SeedMode::Fixed => style.seed,
        SeedMode::PerCard => style.seed.map(|base| derive_seed(base, &item.key())),
    }
}

fn orientation(width: u32, height: u32) -> &'static str {
    match width.cmp(&height) {
        std::cmp::Ordering::Less => "Vertical",
        std::cmp::Ordering::Greater => "Horizontal",
        std::cmp::Ordering::Equal => "Square",
    }
}

/// Build the generation request for one work item.
pub fn build(item: &WorkItem, style: &StyleConfig) -> Result<GenerationRequest, ConfigError> {
    style.validate()?;

    let header = format!(
        "**ART STYLE:** {technique}.\n**THEME:** {theme}.\n**FORMAT:** {orientation} Art Print ({w}x{h}).\n",
        technique = style.technique,
        theme = style.theme,
        orientation = orientation(style.width, style.height),
        w = style.width,
        h = style.height,
    );

    let (body, negative) = match item.card {
        Card::Standard { suit, rank } => (standard_body(suit, rank, style), STANDARD_NEGATIVE),
        Card::Joker { number } => (joker_body(number, style), JOKER_NEGATIVE),
        Card::Back => (back_body(style), BACK_NEGATIVE),
    };

    Ok(GenerationRequest {
        prompt: format!("{header}\n{body}"),
        negative_prompt: negative.to_string(),
        width: style.width,
        height: style.height,
        steps: style.steps,
        seed: seed_for(item, style),
    })
}

const STANDARD_NEGATIVE: &str = "playing card, border, frame, corner text, numbers, letters, symbols, typography, zoomed out, table surface, 3d render, text, watermark";
const JOKER_NEGATIVE: &str = "playing card, border, frame, corner text, numbers, letters, typography, zoomed out, 3d render, text, watermark";
const BACK_NEGATIVE: &str = "playing card front, face cards, numbers, suit symbols (hearts, spades, diamonds, clubs), asymmetrical design, text, letters, portraits, faces, 3d render, watermark";

fn standard_body(suit: Suit, rank: Rank, style: &StyleConfig) -> String {
    let value = rank.label();
    let (subject, composition) = if rank.is_face() {
        (
            format!("A majestic portrait of a character representing the {value} of {suit}"),
            "centered character bust, facing forward, vertical composition",
        )
    } else {
        (
            format!("A symmetrical decorative arrangement of {value} distinct items representing {suit}"),
            "objects arranged in a tight central cluster, vertical composition",
        )
    };
    format!(
        "**SUBJECT:**\n\
         {subject}.\n\
         The artwork must interpret the concept of \"{value}\" and \"{suit}\" using the visual language of {theme}.\n\
         \n\
         **COMPOSITION RULES:**\n\
         - **Background:** {background} texture. Full bleed. No borders.\n\
         - **Layout:** {composition}.\n\
         - **Spacing:** Keep the important details clustered in the CENTER. Leave empty negative space around the edges.\n\
         - **Style:** Detailed, high-contrast, clean lines.\n",
        theme = style.theme,
        background = style.background,
    )
}

fn joker_body(number: u8, style: &StyleConfig) -> String {
    format!(
        "**SUBJECT:**\n\
         A whimsical, mischievous jester or trickster character representing a Joker card (Joker #{number}).\n\
         The character should be playful, mysterious, and embody chaos and unpredictability.\n\
         \n\
         **COMPOSITION RULES:**\n\
         - **Background:** {background} texture. Full bleed.\n\
         - **Layout:** Centered character, dynamic pose, vertical composition.\n\
         - **Character:** Jester, fool, or trickster in the {theme} style.\n\
         - **Style:** Detailed, high-contrast, playful yet elegant.\n",
        theme = style.theme,
        background = style.background,
    )
}

fn back_body(style: &StyleConfig) -> String {
    format!(
        "**SUBJECT:**\n\
         A decorative card back design for a playing card deck. This is the BACK of the card, not the front.\n\
         The design should be symmetrical, ornate, and reflect the {theme} theme.\n\
         \n\
         **COMPOSITION RULES:**\n\
         - **Background:** {background} texture. Full bleed.\n\
         - **Layout:** Perfectly symmetrical design (180-degree rotational symmetry).\n\
         - **Central Element:** An ornate medallion, crest, or decorative motif centered on the card.\n\
         - **Border:** Intricate repeating pattern forming a decorative frame around the edges.\n\
         - **Pattern:** Fill the space between the border and center with repeating {theme}-themed decorative elements.\n\
         - **Style:** Detailed, high-contrast, clean lines, suitable for the back of playing cards.\n",
        theme = style.theme,
        background = style.background,
    )
}
