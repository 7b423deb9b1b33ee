//! Run configuration.
//!
//! Handles loading, validating, and merging `deck-gen.toml`. User values are
//! merged over the stock defaults, so a config file only needs the keys it
//! wants to change. Command-line flags are applied on top by the binary, and
//! the result is validated once, before any generation starts.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [style]
//! theme = "Western Steampunk"
//! technique = "Victorian engraving"   # free text or a preset (see `deck-gen presets`)
//! background = "aged parchment"       # free text or a preset
//!
//! [image]
//! width = 640               # 64-4096, multiple of 8
//! height = 1152             # 64-4096, multiple of 8
//! steps = 9                 # inference steps, 1-200
//! format = "png"            # "png" re-encodes, "original" keeps backend bytes
//!
//! [seed]
//! mode = "random"           # "random" | "fixed" | "per-card"
//! # value = 42              # required for "fixed" and "per-card"
//!
//! [retry]
//! max_retries = 3           # extra attempts after a transient failure
//! base_delay_ms = 800       # exponential backoff base
//!
//! [run]
//! output_dir = "card_images"
//! abort_on_first_fatal = true
//! max_consecutive_fatal = 3
//!
//! [backend]
//! kind = "remote"           # "remote" | "local"
//! timeout_secs = 120
//!
//! [backend.remote]
//! endpoint = "https://generativelanguage.googleapis.com"
//! model = "gemini-2.5-flash-image"
//! api_key_env = "GEMINI_API_KEY"
//!
//! [backend.local]
//! endpoint = "http://127.0.0.1:7860"
//! cfg_scale = 0.0
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Smallest and largest accepted image edge, in pixels.
pub const MIN_DIMENSION: u32 = 64;
pub const MAX_DIMENSION: u32 = 4096;
pub const MAX_STEPS: u32 = 200;

/// Complete run configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeckConfig {
    /// Theme, technique and background shared by every card.
    pub style: ArtConfig,
    /// Output dimensions, step count and file format.
    pub image: ImageConfig,
    /// Seed policy.
    pub seed: SeedConfig,
    /// Transient-failure retry policy.
    pub retry: RetryConfig,
    /// Output directory and abort thresholds.
    pub run: RunConfig,
    /// Which generation backend to use and how to reach it.
    pub backend: BackendConfig,
}

impl DeckConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.style.theme.trim().is_empty() {
            return Err(ConfigError::Validation("style.theme must not be empty".into()));
        }
        if self.style.technique.trim().is_empty() {
            return Err(ConfigError::Validation(
                "style.technique must not be empty".into(),
            ));
        }
        if self.style.background.trim().is_empty() {
            return Err(ConfigError::Validation(
                "style.background must not be empty".into(),
            ));
        }
        validate_dimension("image.width", self.image.width)?;
        validate_dimension("image.height", self.image.height)?;
        if self.image.steps == 0 || self.image.steps > MAX_STEPS {
            return Err(ConfigError::Validation(format!(
                "image.steps must be 1-{MAX_STEPS}"
            )));
        }
        if self.seed.mode != SeedMode::Random && self.seed.value.is_none() {
            return Err(ConfigError::Validation(format!(
                "seed.value is required when seed.mode = \"{}\"",
                self.seed.mode.as_str()
            )));
        }
        if self.run.output_dir.trim().is_empty() {
            return Err(ConfigError::Validation(
                "run.output_dir must not be empty".into(),
            ));
        }
        if self.run.max_consecutive_fatal == 0 {
            return Err(ConfigError::Validation(
                "run.max_consecutive_fatal must be at least 1".into(),
            ));
        }
        if self.backend.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "backend.timeout_secs must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

pub(crate) fn validate_dimension(key: &str, value: u32) -> Result<(), ConfigError> {
    if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&value) {
        return Err(ConfigError::Validation(format!(
            "{key} must be {MIN_DIMENSION}-{MAX_DIMENSION}, got {value}"
        )));
    }
    if value % 8 != 0 {
        return Err(ConfigError::Validation(format!(
            "{key} must be a multiple of 8, got {value}"
        )));
    }
    Ok(())
}

/// Deck-wide art direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArtConfig {
    /// Visual theme, e.g. "Pirates" or "Western Steampunk".
    pub theme: String,
    /// Art technique. A preset number, slug or name expands to its description.
    pub technique: String,
    /// Background texture. A preset number, slug or name expands to its description.
    pub background: String,
}

impl Default for ArtConfig {
    fn default() -> Self {
        Self {
            theme: "Western Steampunk".to_string(),
            technique: "Victorian engraving".to_string(),
            background: "aged parchment".to_string(),
        }
    }
}

/// How generated images are written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// Decode and re-encode everything as PNG.
    #[default]
    Png,
    /// Keep the bytes the backend returned, extension from the sniffed format.
    Original,
}

/// Image generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageConfig {
    pub width: u32,
    pub height: u32,
    /// Diffusion inference steps. Ignored by backends that do not expose it.
    pub steps: u32,
    pub format: OutputFormat,
}

impl Default for ImageConfig {
    fn default() -> Self {
        // 9:16 portrait, the proportions of a poker card with bleed.
        Self {
            width: 640,
            height: 1152,
            steps: 9,
            format: OutputFormat::Png,
        }
    }
}

/// Seed policy for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SeedMode {
    /// No seed is sent; the backend picks one per request.
    #[default]
    Random,
    /// Every card uses `seed.value`.
    Fixed,
    /// Every card gets its own seed, derived from `seed.value` and the card key.
    PerCard,
}

impl SeedMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SeedMode::Random => "random",
            SeedMode::Fixed => "fixed",
            SeedMode::PerCard => "per-card",
        }
    }

    pub fn parse(s: &str) -> Option<SeedMode> {
        match s {
            "random" => Some(SeedMode::Random),
            "fixed" => Some(SeedMode::Fixed),
            "per-card" => Some(SeedMode::PerCard),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SeedConfig {
    pub mode: SeedMode,
    /// Base seed. Both supported backends take 32-bit seeds.
    pub value: Option<u32>,
}

/// Retry policy for transient backend failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Extra attempts after the first one. 0 disables retrying.
    pub max_retries: u32,
    /// Backoff base: attempt `n` waits `base_delay_ms * 2^n` plus jitter,
    /// never more than 60 s.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Directory receiving the images and `batch_results.json`.
    pub output_dir: String,
    /// Abort when the very first card fails with a fatal error.
    pub abort_on_first_fatal: bool,
    /// Abort after this many consecutive cards fail with a fatal error.
    pub max_consecutive_fatal: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            output_dir: "card_images".to_string(),
            abort_on_first_fatal: true,
            max_consecutive_fatal: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    #[default]
    Remote,
    Local,
}

impl BackendKind {
    pub fn parse(s: &str) -> Option<BackendKind> {
        match s {
            "remote" => Some(BackendKind::Remote),
            "local" => Some(BackendKind::Local),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Per-attempt request timeout.
    pub timeout_secs: u64,
    pub remote: RemoteConfig,
    pub local: LocalConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Remote,
            timeout_secs: 120,
            remote: RemoteConfig::default(),
            local: LocalConfig::default(),
        }
    }
}

impl BackendConfig {
    /// Short identifier recorded in the run summary.
    pub fn label(&self) -> String {
        match self.kind {
            BackendKind::Remote => format!("remote:{}", self.remote.model),
            BackendKind::Local => format!("local:{}", self.local.endpoint),
        }
    }
}

/// Cloud text-to-image API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-2.5-flash-image".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
        }
    }
}

/// Local diffusion server exposing a txt2img endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocalConfig {
    pub endpoint: String,
    /// Classifier-free guidance scale. Turbo models expect 0.
    pub cfg_scale: f32,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:7860".to_string(),
            cfg_scale: 0.0,
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(DeckConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto the stock defaults and deserialize.
///
/// Checks types and unknown keys only; value ranges are left to
/// [`DeckConfig::validate`].
pub fn merge_config(overlay: Option<toml::Value>) -> Result<DeckConfig, ConfigError> {
    let base = stock_defaults_value();
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    Ok(merged.try_into()?)
}

/// Merge an optional overlay onto the stock defaults, then deserialize and
/// validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<DeckConfig, ConfigError> {
    let config = merge_config(overlay)?;
    config.validate()?;
    Ok(config)
}

/// Load the config file at `path`, falling back to defaults when it is absent.
pub fn load_config(path: &Path) -> Result<DeckConfig, ConfigError> {
    resolve_config(load_raw_config(path)?)
}

/// Like [`load_config`] but without validation, for callers that layer
/// command-line overrides on top and validate the result once.
pub fn load_unvalidated(path: &Path) -> Result<DeckConfig, ConfigError> {
    merge_config(load_raw_config(path)?)
}

/// Returns a fully-commented stock config file with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# deck-gen Configuration
# ======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys will cause an error.
# Command-line flags override values from this file.

# ---------------------------------------------------------------------------
# Style (applied to every card)
# ---------------------------------------------------------------------------
[style]
theme = "Western Steampunk"
# Free text, or a preset number/name from `deck-gen presets`.
technique = "Victorian engraving"
background = "aged parchment"

# ---------------------------------------------------------------------------
# Image parameters
# ---------------------------------------------------------------------------
[image]
# Pixels, 64-4096, multiples of 8. 640x1152 is a 9:16 portrait.
width = 640
height = 1152
# Diffusion inference steps (1-200). Turbo models need very few.
steps = 9
# "png" re-encodes every image as PNG; "original" keeps the backend's bytes.
format = "png"

# ---------------------------------------------------------------------------
# Seed policy
# ---------------------------------------------------------------------------
[seed]
# "random"   - no seed is sent, every run differs
# "fixed"    - every card uses `value`
# "per-card" - each card gets its own seed derived from `value` and its key
mode = "random"
# value = 42

# ---------------------------------------------------------------------------
# Retry policy for transient failures (timeouts, rate limits, 5xx)
# ---------------------------------------------------------------------------
[retry]
max_retries = 3
base_delay_ms = 800

# ---------------------------------------------------------------------------
# Run behaviour
# ---------------------------------------------------------------------------
[run]
output_dir = "card_images"
# Stop immediately if the first card fails with a fatal error (bad key, ...).
abort_on_first_fatal = true
# Stop after this many cards in a row fail with a fatal error.
max_consecutive_fatal = 3

# ---------------------------------------------------------------------------
# Generation backend
# ---------------------------------------------------------------------------
[backend]
# "remote" (cloud API) or "local" (txt2img server on this machine)
kind = "remote"
# Per-attempt request timeout in seconds.
timeout_secs = 120

[backend.remote]
endpoint = "https://generativelanguage.googleapis.com"
model = "gemini-2.5-flash-image"
# Environment variable holding the API key.
api_key_env = "GEMINI_API_KEY"

[backend.local]
endpoint = "http://127.0.0.1:7860"
cfg_scale = 0.0
"##
}
