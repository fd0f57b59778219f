// ============================================================
// Layer 4 — Sliding-Window Inpainting Dataset
// ============================================================
// Every image is covered by windows of a fixed size. The centre
// of each window is blanked out in the input, and the model has
// to paint it back in:
//
//   input   = window with the centre region set to 0
//   target  = original pixels of the centre region
//   slice   = where that centre region sits in the full image
//
// Items are ordered image by image, row-major within an image,
// so a sequential DataLoader emits patches grouped by image.
// Windows step by `stride`; one extra window is added flush
// with the bottom/right border when the stride does not land
// there exactly.

use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::data::images::{ImageData, ImageFolder};
use crate::domain::patch::{ImageSize, PatchSlice};
use crate::domain::settings::ConfigError;

/// Window, mask and stride sizes as [rows, cols].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowGeometry {
    pub window: [usize; 2],
    pub mask:   [usize; 2],
    pub stride: [usize; 2],
}

impl WindowGeometry {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for axis in 0..2 {
            if self.mask[axis] == 0 || self.stride[axis] == 0 {
                return Err(ConfigError::Invalid("mask and stride sizes must be positive".into()));
            }
            if self.mask[axis] > self.window[axis] {
                return Err(ConfigError::Invalid(format!(
                    "mask {:?} does not fit inside window {:?}",
                    self.mask, self.window
                )));
            }
        }
        Ok(())
    }

    /// Offset of the mask's top-left corner inside the window.
    pub fn mask_offset(&self) -> [usize; 2] {
        [
            (self.window[0] - self.mask[0]) / 2,
            (self.window[1] - self.mask[1]) / 2,
        ]
    }

    /// Top-left corners of all windows over an image, row-major.
    pub fn positions(&self, size: ImageSize) -> Vec<(usize, usize)> {
        let rows = axis_starts(size.height, self.window[0], self.stride[0]);
        let cols = axis_starts(size.width, self.window[1], self.stride[1]);
        rows.iter()
            .flat_map(|&r| cols.iter().map(move |&c| (r, c)))
            .collect()
    }

    /// Placement of the predicted mask region for a window at (row, col).
    pub fn mask_slice(&self, row: usize, col: usize) -> PatchSlice {
        let [dr, dc] = self.mask_offset();
        PatchSlice::new(
            row + dr,
            row + dr + self.mask[0],
            col + dc,
            col + dc + self.mask[1],
        )
    }
}

fn axis_starts(len: usize, window: usize, stride: usize) -> Vec<usize> {
    if len < window {
        return Vec::new();
    }
    let last = len - window;
    let mut starts: Vec<usize> = (0..=last).step_by(stride).collect();
    if starts.last() != Some(&last) {
        starts.push(last);
    }
    starts
}

/// Map an intensity in 0..=255 to [-1, 1].
pub fn normalise_intensity(v: u8) -> f32 {
    (v as f32 / 255.0 - 0.5) / 0.5
}

/// One inpainting sample, flattened channel-major.
#[derive(Debug, Clone)]
pub struct PatchItem {
    pub image_index:    usize,
    pub slice:          PatchSlice,
    /// C x window_h x window_w, centre blanked.
    pub input:          Vec<f32>,
    /// C x mask_h x mask_w in [-1, 1].
    pub target:         Vec<f32>,
    /// C x mask_h x mask_w raw intensities, the class labels for classification.
    pub target_classes: Vec<i64>,
}

pub struct PatchDataset {
    folder:   Arc<ImageFolder>,
    geometry: WindowGeometry,
    /// (image index, window row, window col) per item
    windows:  Vec<(usize, usize, usize)>,
}

impl PatchDataset {
    pub fn new(folder: Arc<ImageFolder>, geometry: WindowGeometry) -> Self {
        let windows: Vec<(usize, usize, usize)> = folder
            .images()
            .iter()
            .enumerate()
            .flat_map(|(idx, img)| {
                geometry
                    .positions(img.size)
                    .into_iter()
                    .map(move |(r, c)| (idx, r, c))
            })
            .collect();

        let skipped = folder
            .images()
            .iter()
            .filter(|img| geometry.positions(img.size).is_empty())
            .count();
        if skipped > 0 {
            tracing::warn!("{skipped} images are smaller than the window and produce no patches");
        }
        tracing::debug!("{} windows over {} images", windows.len(), folder.images().len());

        Self { folder, geometry, windows }
    }

    pub fn geometry(&self) -> WindowGeometry {
        self.geometry
    }

    fn build_item(&self, image_index: usize, img: &ImageData, row: usize, col: usize) -> PatchItem {
        let g     = &self.geometry;
        let slice = g.mask_slice(row, col);
        let [wh, ww] = g.window;

        let mut input = Vec::with_capacity(img.channels * wh * ww);
        for c in 0..img.channels {
            for r in row..row + wh {
                for x in col..col + ww {
                    let masked = r >= slice.row_start && r < slice.row_stop
                        && x >= slice.col_start && x < slice.col_stop;
                    input.push(if masked { 0.0 } else { normalise_intensity(img.pixel(c, r, x)) });
                }
            }
        }

        let mut target = Vec::with_capacity(img.channels * slice.height() * slice.width());
        let mut target_classes = Vec::with_capacity(target.capacity());
        for c in 0..img.channels {
            for r in slice.row_start..slice.row_stop {
                for x in slice.col_start..slice.col_stop {
                    let v = img.pixel(c, r, x);
                    target.push(normalise_intensity(v));
                    target_classes.push(v as i64);
                }
            }
        }

        PatchItem { image_index, slice, input, target, target_classes }
    }
}

impl Dataset<PatchItem> for PatchDataset {
    fn get(&self, index: usize) -> Option<PatchItem> {
        let &(image_index, row, col) = self.windows.get(index)?;
        let img = self.folder.image(image_index)?;
        Some(self.build_item(image_index, img, row, col))
    }

    fn len(&self) -> usize {
        self.windows.len()
    }
}
