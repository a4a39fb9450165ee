//! Capture collaborator abstraction for visual evidence.
//!
//! The engine consumes screenshots through [`CaptureSource`]; production
//! drivers wrap the browser session's screenshot facility, while
//! [`MockCapture`] renders synthetic frames for dry runs and tests.

use async_trait::async_trait;
use image::{ImageBuffer, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::session::GameSession;

/// Result type for capture operations
pub type CaptureError = String;

/// Result of a capture operation
#[derive(Debug, Clone)]
pub struct CaptureResult {
    /// PNG-encoded image data
    pub image_data: Vec<u8>,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

/// Trait for screenshot sources.
///
/// Given a live session, produces the current visual state as a PNG.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Capture the session's current visual state
    async fn capture(&self, session: &dyn GameSession) -> Result<CaptureResult, CaptureError>;

    /// Source type identifier (e.g. "browser", "mock")
    fn source_type(&self) -> &str;
}

/// A synthetic capture source producing solid-color frames.
///
/// Each capture shifts the fill color by a frame counter so successive
/// screenshots are distinguishable in tests.
#[derive(Debug)]
pub struct MockCapture {
    width: u32,
    height: u32,
    frame: AtomicU32,
}

impl MockCapture {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame: AtomicU32::new(0),
        }
    }

    /// Number of frames captured so far
    pub fn frames_captured(&self) -> u32 {
        self.frame.load(Ordering::SeqCst)
    }

    fn render(&self, frame: u32) -> Result<Vec<u8>, CaptureError> {
        let shade = (40 + (frame * 16) % 160) as u8;
        let image: RgbImage = ImageBuffer::from_pixel(self.width, self.height, Rgb([shade, shade, 64]));

        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .map_err(|e| format!("failed to encode mock frame: {}", e))?;
        Ok(png)
    }
}

impl Default for MockCapture {
    fn default() -> Self {
        Self::new(800, 600)
    }
}

#[async_trait]
impl CaptureSource for MockCapture {
    async fn capture(&self, _session: &dyn GameSession) -> Result<CaptureResult, CaptureError> {
        let frame = self.frame.fetch_add(1, Ordering::SeqCst);
        let image_data = self.render(frame)?;
        Ok(CaptureResult {
            image_data,
            width: self.width,
            height: self.height,
        })
    }

    fn source_type(&self) -> &str {
        "mock"
    }
}
