//! Shared test utilities for the deck-gen test suite.
//!
//! Provides a scripted generation backend, tiny real images to feed it, and
//! default style/options pointing at a temp directory.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! let client = ScriptedBackend::new(vec![
//!     Err(GenerationError::Transient("busy".into())),
//!     Ok(png_image()),
//! ]);
//! let summary = BatchRunner::new(&client, items, test_style(), test_options(tmp.path()), "test".into())
//!     .unwrap()
//!     .run(&AtomicBool::new(false), None)
//!     .unwrap();
//! assert_eq!(client.request_count(), 2);
//! ```

use std::collections::VecDeque;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::backend::{GeneratedImage, GenerationClient, GenerationError};
use crate::batch::BatchOptions;
use crate::config::{DeckConfig, OutputFormat, RetryConfig};
use crate::prompt::{GenerationRequest, StyleConfig};

type Scripted = Result<GeneratedImage, GenerationError>;

// =========================================================================
// Scripted backend
// =========================================================================

/// Backend that replays a queue of canned results and records every request.
///
/// When the queue is empty it keeps returning `fallback`, which defaults to
/// a valid PNG. Uses Mutex (not RefCell) so it matches the trait's `&self`.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Scripted,
    requests: Mutex<Vec<GenerationRequest>>,
    latency: Duration,
    cancel_after: Option<(usize, Arc<AtomicBool>)>,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: Ok(png_image()),
            requests: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
            cancel_after: None,
        }
    }

    /// Sleep this long inside every call, like a real backend would.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Raise `flag` while serving call number `calls` (1-based), as a Ctrl-C
    /// arriving mid-request would.
    pub fn cancelling_after(mut self, calls: usize, flag: Arc<AtomicBool>) -> Self {
        self.cancel_after = Some((calls, flag));
        self
    }

    /// Succeeds on every call.
    pub fn always_ok() -> Self {
        Self::new(Vec::new())
    }

    /// Returns `result` on every call.
    pub fn repeat(result: Scripted) -> Self {
        Self {
            fallback: result,
            ..Self::new(Vec::new())
        }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl GenerationClient for ScriptedBackend {
    fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage, GenerationError> {
        let count = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };
        if let Some((after, flag)) = &self.cancel_after {
            if count >= *after {
                flag.store(true, Ordering::SeqCst);
            }
        }
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

// =========================================================================
// Images
// =========================================================================

fn encoded(format: image::ImageFormat) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(8, 8, image::Rgb([200, 30, 30]));
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, format)
        .unwrap();
    buf.into_inner()
}

/// An 8×8 PNG, as a backend would return it.
pub fn png_image() -> GeneratedImage {
    GeneratedImage {
        bytes: encoded(image::ImageFormat::Png),
        mime_type: "image/png".to_string(),
    }
}

/// An 8×8 JPEG, as a backend would return it.
pub fn jpeg_image() -> GeneratedImage {
    GeneratedImage {
        bytes: encoded(image::ImageFormat::Jpeg),
        mime_type: "image/jpeg".to_string(),
    }
}

// =========================================================================
// Run setup
// =========================================================================

/// Default style: the stock config, random seed.
pub fn test_style() -> StyleConfig {
    StyleConfig::from_config(&DeckConfig::default()).unwrap()
}

/// Options writing PNGs to `dir`, 3 retries with no backoff delay.
pub fn test_options(dir: &Path) -> BatchOptions {
    BatchOptions {
        output_dir: dir.to_path_buf(),
        format: OutputFormat::Png,
        retry: RetryConfig {
            max_retries: 3,
            base_delay_ms: 0,
        },
        abort_on_first_fatal: true,
        max_consecutive_fatal: 3,
    }
}

/// Assert that no `.tmp` file was left in `dir`.
pub fn assert_no_temp_files(dir: &Path) {
    let leftovers: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
}
