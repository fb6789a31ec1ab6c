//! Boundary with the 3D scene: where the base texture comes from and where
//! composed frames go.

use std::time::{Duration, Instant};

use image::{GrayImage, RgbaImage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// The model or its material is not loaded yet.
    #[error("texture unavailable: {0}")]
    Unavailable(String),
    #[error("texture rejected: {0}")]
    Rejected(String),
}

/// Reads the model's current base colour texture.
pub trait TextureSource {
    fn base_color_texture(&self) -> Result<RgbaImage, BridgeError>;
}

/// Applies a composed frame as the model's live texture.
pub trait TextureSink {
    fn apply_texture(&mut self, frame: &RgbaImage) -> Result<(), BridgeError>;

    /// Puff print heights for scenes that displace the surface. Ignored by
    /// default.
    fn apply_height_map(&mut self, _map: &GrayImage) -> Result<(), BridgeError> {
        Ok(())
    }
}

/// Outcome of a push attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Applied,
    /// Throttled while a stroke is in progress.
    Skipped,
    /// Fully transparent frame refused after a real frame went out.
    RefusedPlaceholder,
    Failed,
}

/// Wraps the sink with the one rule the engine owes the 3D scene: never
/// replace a real texture with an empty frame.
pub struct TextureSync<S: TextureSink> {
    sink: S,
    has_pushed_valid: bool,
}

impl<S: TextureSink> TextureSync<S> {
    pub fn new(sink: S) -> Self {
        Self { sink, has_pushed_valid: false }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn push(&mut self, frame: &RgbaImage) -> PushOutcome {
        let empty = frame.pixels().all(|p| p[3] == 0);
        if empty && self.has_pushed_valid {
            tracing::warn!("refusing to push an empty frame over a valid texture");
            return PushOutcome::RefusedPlaceholder;
        }
        match self.sink.apply_texture(frame) {
            Ok(()) => {
                if !empty {
                    self.has_pushed_valid = true;
                }
                PushOutcome::Applied
            }
            Err(e) => {
                tracing::warn!("texture sink failed: {e}");
                PushOutcome::Failed
            }
        }
    }

    /// Forget the pushed-valid state, e.g. after the model is swapped.
    pub fn reset(&mut self) {
        self.has_pushed_valid = false;
    }
}

/// Rate limiter for pushes during a stroke. The last frame of a stroke
/// bypasses it through [`FrameThrottle::force`].
#[derive(Clone, Debug)]
pub struct FrameThrottle {
    min_interval: Duration,
    last: Option<Instant>,
}

impl FrameThrottle {
    pub fn new(max_per_sec: u32) -> Self {
        let min_interval = if max_per_sec == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(1.0 / max_per_sec as f64)
        };
        Self { min_interval, last: None }
    }

    /// Whether a push at `now` is allowed; records it if so.
    pub fn allow(&mut self, now: Instant) -> bool {
        match self.last {
            Some(prev) if now.saturating_duration_since(prev) < self.min_interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    pub fn force(&mut self, now: Instant) {
        self.last = Some(now);
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Sink that discards frames, for headless use without a 3D scene.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TextureSink for NullSink {
    fn apply_texture(&mut self, _frame: &RgbaImage) -> Result<(), BridgeError> {
        Ok(())
    }
}

/// Sink that keeps every applied frame and height map. Useful for headless
/// runs and tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub frames: Vec<RgbaImage>,
    pub height_maps: Vec<GrayImage>,
}

impl TextureSink for RecordingSink {
    fn apply_texture(&mut self, frame: &RgbaImage) -> Result<(), BridgeError> {
        self.frames.push(frame.clone());
        Ok(())
    }

    fn apply_height_map(&mut self, map: &GrayImage) -> Result<(), BridgeError> {
        self.height_maps.push(map.clone());
        Ok(())
    }
}

/// Source backed by an image already in memory (e.g. loaded from disk).
#[derive(Debug, Clone)]
pub struct StaticSource(pub Option<RgbaImage>);

impl TextureSource for StaticSource {
    fn base_color_texture(&self) -> Result<RgbaImage, BridgeError> {
        self.0
            .clone()
            .ok_or_else(|| BridgeError::Unavailable("no texture loaded".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn empty_frame_never_replaces_a_real_one() {
        let mut sync = TextureSync::new(RecordingSink::default());
        let empty = RgbaImage::new(4, 4);
        assert_eq!(sync.push(&empty), PushOutcome::Applied);
        let real = RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255]));
        assert_eq!(sync.push(&real), PushOutcome::Applied);
        assert_eq!(sync.push(&empty), PushOutcome::RefusedPlaceholder);
        assert_eq!(sync.sink().frames.len(), 2);
    }

    #[test]
    fn throttle_spaces_pushes() {
        let t0 = Instant::now();
        let mut throttle = FrameThrottle::new(10);
        assert!(throttle.allow(t0));
        assert!(!throttle.allow(t0 + Duration::from_millis(50)));
        assert!(throttle.allow(t0 + Duration::from_millis(100)));
    }
}
