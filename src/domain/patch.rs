// ============================================================
// Layer 3 — Patch and Label Domain Types
// ============================================================
// A patch is one sliding-window position inside a full image.
// The model only sees the window; its prediction covers the
// masked centre of the window, and that centre is what gets
// written back into the full-image anomaly map.
//
//   full image (H x W)
//   ┌──────────────────────┐
//   │    ┌────────┐        │
//   │    │ ┌────┐ │ window │
//   │    │ │mask│ │        │   PatchSlice = the mask region
//   │    │ └────┘ │        │   in full-image coordinates
//   │    └────────┘        │
//   └──────────────────────┘

use serde::{Deserialize, Serialize};

/// Half-open placement of a patch prediction inside its full image.
/// Rows run along axis 1 and columns along axis 2 of a C x H x W tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSlice {
    pub row_start: usize,
    pub row_stop:  usize,
    pub col_start: usize,
    pub col_stop:  usize,
}

impl PatchSlice {
    pub fn new(row_start: usize, row_stop: usize, col_start: usize, col_stop: usize) -> Self {
        Self { row_start, row_stop, col_start, col_stop }
    }

    pub fn height(&self) -> usize {
        self.row_stop.saturating_sub(self.row_start)
    }

    pub fn width(&self) -> usize {
        self.col_stop.saturating_sub(self.col_start)
    }

    pub fn is_empty(&self) -> bool {
        self.height() == 0 || self.width() == 0
    }

    /// True when the slice lies entirely inside an image of the given size.
    pub fn fits_within(&self, size: ImageSize) -> bool {
        !self.is_empty() && self.row_stop <= size.height && self.col_stop <= size.width
    }
}

/// Spatial size of an image in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub height: usize,
    pub width:  usize,
}

impl ImageSize {
    pub fn new(height: usize, width: usize) -> Self {
        Self { height, width }
    }

    pub fn pixels(&self) -> usize {
        self.height * self.width
    }
}

/// Symmetric border, in pixels per axis, that is excluded from scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Margin {
    pub rows: usize,
    pub cols: usize,
}

impl Margin {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    /// Size left after cropping, or None when the margin eats the whole image.
    pub fn cropped(&self, size: ImageSize) -> Option<ImageSize> {
        let height = size.height.checked_sub(2 * self.rows)?;
        let width  = size.width.checked_sub(2 * self.cols)?;
        if height == 0 || width == 0 {
            return None;
        }
        Some(ImageSize::new(height, width))
    }
}

/// Ground-truth segmentation for one image, stored channel-major (C x H x W).
#[derive(Debug, Clone, PartialEq)]
pub struct LabelImage {
    pub channels: usize,
    pub size:     ImageSize,
    pub values:   Vec<f32>,
}

impl LabelImage {
    pub fn new(channels: usize, size: ImageSize, values: Vec<f32>) -> Self {
        debug_assert_eq!(values.len(), channels * size.pixels());
        Self { channels, size, values }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_dimensions() {
        let s = PatchSlice::new(2, 6, 1, 4);
        assert_eq!(s.height(), 4);
        assert_eq!(s.width(), 3);
        assert!(!s.is_empty());
    }

    #[test]
    fn test_slice_bounds() {
        let size = ImageSize::new(8, 8);
        assert!(PatchSlice::new(0, 8, 0, 8).fits_within(size));
        assert!(!PatchSlice::new(0, 9, 0, 8).fits_within(size));
        assert!(!PatchSlice::new(3, 3, 0, 8).fits_within(size));
    }

    #[test]
    fn test_margin_crop_size() {
        let m = Margin::new(1, 2);
        assert_eq!(m.cropped(ImageSize::new(10, 10)), Some(ImageSize::new(8, 6)));
        assert_eq!(m.cropped(ImageSize::new(2, 10)), None);
        assert_eq!(m.cropped(ImageSize::new(10, 3)), None);
    }
}
