//! Picture geometry and the display-size policy

use serde::{Deserialize, Serialize};

/// Pixel dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Pixel count
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Shrink to fit within `bound`, keeping the aspect ratio
    ///
    /// Never enlarges. A zero bound dimension means unbounded on that axis.
    pub fn fit_within(&self, bound: Size) -> Size {
        if self.is_empty() {
            return *self;
        }
        let sx = if bound.width == 0 {
            1.0
        } else {
            bound.width as f64 / self.width as f64
        };
        let sy = if bound.height == 0 {
            1.0
        } else {
            bound.height as f64 / self.height as f64
        };
        let scale = sx.min(sy);
        if scale >= 1.0 {
            return *self;
        }
        Size {
            width: ((self.width as f64 * scale).round() as u32).max(1),
            height: ((self.height as f64 * scale).round() as u32).max(1),
        }
    }
}

/// How decoded pictures are sized for display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayPolicy {
    /// Largest size a picture is displayed at
    pub max_size: Size,
    /// Also decode at no more than `max_size`, trading quality for memory
    pub limit_source_size: bool,
}

impl Default for DisplayPolicy {
    fn default() -> Self {
        Self {
            max_size: Size::new(4096, 4096),
            limit_source_size: false,
        }
    }
}

impl DisplayPolicy {
    /// Display size of a picture with the given natural size
    pub fn clamp(&self, natural: Size) -> Size {
        natural.fit_within(self.max_size)
    }

    /// Size to downscale the decoded pixels to, if any
    pub fn decode_target(&self, natural: Size) -> Option<Size> {
        if !self.limit_source_size {
            return None;
        }
        let clamped = self.clamp(natural);
        (clamped != natural).then_some(clamped)
    }
}

/// Metadata describing a decoded payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureInfo {
    /// Natural size of the source
    pub original_size: Size,
    /// Display size after clamping
    pub size: Size,
    pub bits_per_pixel: u32,
    /// Name of the decoder that produced the payload
    pub decoder: String,
}

impl PictureInfo {
    pub fn new(
        original_size: Size,
        policy: &DisplayPolicy,
        bits_per_pixel: u32,
        decoder: impl Into<String>,
    ) -> Self {
        Self {
            original_size,
            size: policy.clamp(original_size),
            bits_per_pixel,
            decoder: decoder.into(),
        }
    }

    /// Recompute the display size under a new policy
    pub fn refreshed(&self, policy: &DisplayPolicy) -> Self {
        Self {
            size: policy.clamp(self.original_size),
            ..self.clone()
        }
    }
}
