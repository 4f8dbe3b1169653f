//! Geometric value types shared by the mode and plane code
//!
//! Resolutions, rectangles and the 16.16 fixed-point conversion
//! used for plane source coordinates.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::{FIXED_POINT_SHIFT, MAX_UNSUPPORTED_OUTPUT_HEIGHT, MIN_UNSUPPORTED_OUTPUT_HEIGHT};

/// Width and height of a mode or buffer in pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when either dimension is zero
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Pixel count, used to order modes
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Kernel mode name for this size ("1920x1080")
    pub fn mode_name(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    /// Parse "WxH" (as accepted on the command line)
    pub fn parse(s: &str) -> Option<Self> {
        let (w, h) = s.trim().split_once(['x', 'X'])?;
        Some(Self::new(w.parse().ok()?, h.parse().ok()?))
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Axis-aligned rectangle
///
/// Destination rectangles are signed so a plane can be partially
/// off screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Source rectangle in 16.16 fixed point, as the kernel expects it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixedRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FixedRect {
    /// Convert integer source coordinates to 16.16 fixed point.
    ///
    /// Negative origins are clamped to zero (sources cannot start
    /// outside the buffer). Returns `None` when a value does not fit
    /// the 16-bit integer part.
    pub fn from_pixels(rect: Rect) -> Option<Self> {
        let fixed = |v: u32| v.checked_mul(1 << FIXED_POINT_SHIFT);
        Some(Self {
            x: fixed(rect.x.max(0) as u32)?,
            y: fixed(rect.y.max(0) as u32)?,
            width: fixed(rect.width)?,
            height: fixed(rect.height)?,
        })
    }
}

/// Check an output height against the scaler limitation.
///
/// Heights strictly between 1 and 12 are rejected; the consuming layer
/// must filter them before requesting a mode or plane geometry.
pub fn is_supported_output_height(height: u32) -> bool {
    !(MIN_UNSUPPORTED_OUTPUT_HEIGHT < height && height < MAX_UNSUPPORTED_OUTPUT_HEIGHT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resolution() {
        assert_eq!(Resolution::parse("1920x1080"), Some(Resolution::new(1920, 1080)));
        assert_eq!(Resolution::parse(" 640X480 "), Some(Resolution::new(640, 480)));
        assert_eq!(Resolution::parse("1920"), None);
        assert_eq!(Resolution::parse("axb"), None);
    }

    #[test]
    fn test_mode_name() {
        assert_eq!(Resolution::new(1280, 720).mode_name(), "1280x720");
    }

    #[test]
    fn test_fixed_point_source() {
        let fixed = FixedRect::from_pixels(Rect::new(2, -5, 1920, 1080)).unwrap();
        assert_eq!(fixed.x, 2 << 16);
        assert_eq!(fixed.y, 0);
        assert_eq!(fixed.width, 1920 << 16);
        assert_eq!(fixed.height, 1080 << 16);

        let edge = FixedRect::from_pixels(Rect::new(0, 0, 65535, 1)).unwrap();
        assert_eq!(edge.width, 0xFFFF_0000);
        assert_eq!(FixedRect::from_pixels(Rect::new(0, 0, 65536, 1)), None);
        assert_eq!(FixedRect::from_pixels(Rect::new(70000, 0, 1, 1)), None);
    }

    #[test]
    fn test_output_height_policy() {
        assert!(is_supported_output_height(0));
        assert!(is_supported_output_height(1));
        assert!(!is_supported_output_height(2));
        assert!(!is_supported_output_height(11));
        assert!(is_supported_output_height(12));
        assert!(is_supported_output_height(1080));
    }
}
