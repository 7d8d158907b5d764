//! Frame and geometry types shared by the provider boundary and the core logic.

use image::{imageops, RgbImage};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A 2D landmark point in image coordinates (y grows downward).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance(self, other: Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Axis-aligned face bounding box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub const fn new(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Where a frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOrigin {
    /// A still image submitted for enrollment.
    Still,
    /// A live camera frame, numbered in capture order.
    Camera { sequence: u64 },
}

/// A decoded RGB frame plus its capture metadata.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub origin: FrameOrigin,
    /// Monotonic capture timestamp, relative to when the capture was opened.
    /// Every timer comparison for this frame uses this single sample.
    pub captured_at: Duration,
}

impl Frame {
    /// Wrap a still image (enrollment input).
    pub fn still(image: RgbImage) -> Self {
        Self {
            image,
            origin: FrameOrigin::Still,
            captured_at: Duration::ZERO,
        }
    }

    /// Wrap a live camera frame.
    pub fn captured(image: RgbImage, sequence: u64, captured_at: Duration) -> Self {
        Self {
            image,
            origin: FrameOrigin::Camera { sequence },
            captured_at,
        }
    }

    /// Horizontally mirrored copy, as shown to the user during the hand challenge.
    pub fn mirrored(&self) -> Self {
        Self {
            image: imageops::flip_horizontal(&self.image),
            origin: self.origin,
            captured_at: self.captured_at,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}
