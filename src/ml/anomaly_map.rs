// ============================================================
// Layer 5 — Anomaly Map
// ============================================================
// One image-sized score map, built up from overlapping patch
// scores. Next to the scores it keeps a coverage count: how many
// patches have touched each pixel.
//
//   mean  scores hold the running sum; finalising divides by
//         coverage (pixels never covered stay 0)
//   min   first touch takes the patch score, later touches keep
//         the elementwise minimum
//   max   same as min with the maximum
//
// Post-processing helpers for finished maps live here too:
// resizing to label resolution and cropping a border margin.

use burn::{
    prelude::*,
    tensor::{
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};
use thiserror::Error;

use crate::domain::patch::{ImageSize, Margin, PatchSlice};
use crate::domain::settings::{AggregationMethod, ResizeMode};

#[derive(Debug, Error, PartialEq)]
pub enum AggregationError {
    #[error("patch for image {got} arrived after image {current}; patches must come grouped by non-decreasing image index")]
    OrderViolation { current: usize, got: usize },

    #[error("slice {slice:?} lies outside image {image_index} of size {size:?}")]
    SliceOutOfBounds { image_index: usize, slice: PatchSlice, size: ImageSize },

    #[error("patch scores of shape {got:?} do not match slice {slice:?}")]
    ShapeMismatch { slice: PatchSlice, got: Vec<usize> },

    #[error("no image with index {0} in the dataset")]
    UnknownImage(usize),

    #[error("margin {margin:?} leaves nothing of a {size:?} map")]
    MarginTooLarge { margin: Margin, size: ImageSize },

    #[error("anomaly map of size {map:?} does not match its label of size {label:?}")]
    LabelSizeMismatch { map: ImageSize, label: ImageSize },
}

#[derive(Debug, Clone)]
pub struct AnomalyMap<B: Backend> {
    image_index: usize,
    size:        ImageSize,
    method:      AggregationMethod,
    /// [1, H, W]
    scores:      Tensor<B, 3>,
    /// [1, H, W]
    coverage:    Tensor<B, 3>,
}

impl<B: Backend> AnomalyMap<B> {
    pub fn new(image_index: usize, size: ImageSize, method: AggregationMethod, device: &B::Device) -> Self {
        Self {
            image_index,
            size,
            method,
            scores:   Tensor::zeros([1, size.height, size.width], device),
            coverage: Tensor::zeros([1, size.height, size.width], device),
        }
    }

    pub fn image_index(&self) -> usize {
        self.image_index
    }

    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// Fold one patch's scores [1, slice_h, slice_w] into the map.
    pub fn accumulate(&mut self, slice: PatchSlice, patch: Tensor<B, 3>) -> Result<(), AggregationError> {
        if slice.is_empty() || !slice.fits_within(self.size) {
            return Err(AggregationError::SliceOutOfBounds {
                image_index: self.image_index,
                slice,
                size: self.size,
            });
        }
        let dims = patch.dims();
        if dims != [1, slice.height(), slice.width()] {
            return Err(AggregationError::ShapeMismatch { slice, got: dims.to_vec() });
        }

        let region = [0..1, slice.row_start..slice.row_stop, slice.col_start..slice.col_stop];

        let coverage    = self.coverage.clone().slice(region.clone()).add_scalar(1.0);
        let current     = self.scores.clone().slice(region.clone());
        let first_touch = coverage.clone().equal_elem(1.0);
        let updated = match self.method {
            AggregationMethod::Mean => current + patch,
            AggregationMethod::Min  => current.min_pair(patch.clone()).mask_where(first_touch, patch),
            AggregationMethod::Max  => current.max_pair(patch.clone()).mask_where(first_touch, patch),
        };

        // Sole owners of the full-size buffers, so the region is written in place.
        self.coverage = take(&mut self.coverage).slice_assign(region.clone(), coverage);
        self.scores   = take(&mut self.scores).slice_assign(region, updated);
        Ok(())
    }

    /// Final per-pixel scores [1, H, W].
    pub fn into_scores(self) -> Tensor<B, 3> {
        match self.method {
            AggregationMethod::Mean => self.scores / self.coverage.clamp_min(1.0),
            AggregationMethod::Min | AggregationMethod::Max => self.scores,
        }
    }
}

fn take<B: Backend>(slot: &mut Tensor<B, 3>) -> Tensor<B, 3> {
    let device = slot.device();
    core::mem::replace(slot, Tensor::empty([1, 0, 0], &device))
}

/// Rescale a [C, H, W] map to `size`.
pub fn resize_map<B: Backend>(map: Tensor<B, 3>, size: ImageSize, mode: ResizeMode) -> Tensor<B, 3> {
    let [c, h, w] = map.dims();
    if [h, w] == [size.height, size.width] {
        return map;
    }
    let mode = match mode {
        ResizeMode::Nearest  => InterpolateMode::Nearest,
        ResizeMode::Bilinear => InterpolateMode::Bilinear,
    };
    interpolate(
        map.reshape([1, c, h, w]),
        [size.height, size.width],
        InterpolateOptions::new(mode),
    )
    .reshape([c, size.height, size.width])
}

/// Drop `margin` pixels from every border of a [C, H, W] tensor.
pub fn crop_margin<B: Backend>(map: Tensor<B, 3>, margin: Margin) -> Result<Tensor<B, 3>, AggregationError> {
    let [c, h, w] = map.dims();
    let size = ImageSize::new(h, w);
    margin
        .cropped(size)
        .ok_or(AggregationError::MarginTooLarge { margin, size })?;
    Ok(map.slice([0..c, margin.rows..h - margin.rows, margin.cols..w - margin.cols]))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type TestBackend = NdArray<f32>;

    fn patch(values: Vec<f32>, h: usize, w: usize) -> Tensor<TestBackend, 3> {
        Tensor::from_data(TensorData::new(values, [1, h, w]), &Default::default())
    }

    fn values(t: Tensor<TestBackend, 3>) -> Vec<f32> {
        t.into_data().to_vec::<f32>().unwrap()
    }

    fn map(method: AggregationMethod) -> AnomalyMap<TestBackend> {
        AnomalyMap::new(0, ImageSize::new(2, 2), method, &Default::default())
    }

    #[test]
    fn test_min_keeps_smallest_score() {
        let mut m = map(AggregationMethod::Min);
        let slice = PatchSlice::new(0, 1, 0, 1);
        for s in [5.0, 2.0, 8.0] {
            m.accumulate(slice, patch(vec![s], 1, 1)).unwrap();
        }
        assert_eq!(values(m.into_scores()), vec![2.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_max_keeps_largest_score() {
        let mut m = map(AggregationMethod::Max);
        let slice = PatchSlice::new(0, 1, 0, 1);
        for s in [5.0, 2.0, 8.0] {
            m.accumulate(slice, patch(vec![s], 1, 1)).unwrap();
        }
        assert_eq!(values(m.into_scores()), vec![8.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_min_first_touch_ignores_initial_zero() {
        let mut m = map(AggregationMethod::Min);
        m.accumulate(PatchSlice::new(0, 1, 0, 2), patch(vec![3.0, 4.0], 1, 2)).unwrap();
        assert_eq!(values(m.into_scores()), vec![3.0, 4.0, 0.0, 0.0]);
    }

    #[test]
    fn test_mean_of_overlaps() {
        let mut m = map(AggregationMethod::Mean);
        m.accumulate(PatchSlice::new(0, 1, 0, 2), patch(vec![1.0, 3.0], 1, 2)).unwrap();
        m.accumulate(PatchSlice::new(0, 2, 1, 2), patch(vec![5.0, 6.0], 2, 1)).unwrap();

        assert_eq!(values(m.coverage.clone()), vec![1.0, 2.0, 0.0, 1.0]);
        assert_eq!(values(m.into_scores()), vec![1.0, 4.0, 0.0, 6.0]);
    }

    #[test]
    fn test_sliding_windows_keep_full_buffers() {
        let device = Default::default();
        let mut m  = AnomalyMap::<TestBackend>::new(0, ImageSize::new(4, 4), AggregationMethod::Mean, &device);
        for row in 0..3 {
            for col in 0..3 {
                let score = (row * 3 + col) as f32;
                m.accumulate(PatchSlice::new(row, row + 2, col, col + 2), patch(vec![score; 4], 2, 2)).unwrap();
                assert_eq!(m.scores.dims(), [1, 4, 4]);
                assert_eq!(m.coverage.dims(), [1, 4, 4]);
            }
        }
        assert_eq!(
            values(m.coverage.clone()),
            vec![1.0, 2.0, 2.0, 1.0, 2.0, 4.0, 4.0, 2.0, 2.0, 4.0, 4.0, 2.0, 1.0, 2.0, 2.0, 1.0]
        );
        let scores = values(m.into_scores());
        assert_eq!(scores[0], 0.0);
        assert_eq!(scores[5], 2.0); // windows 0, 1, 3, 4
        assert_eq!(scores[15], 8.0);
    }

    #[test]
    fn test_out_of_bounds_and_shape_mismatch() {
        let mut m = map(AggregationMethod::Mean);
        let err = m.accumulate(PatchSlice::new(1, 3, 0, 1), patch(vec![0.0; 2], 2, 1)).unwrap_err();
        assert!(matches!(err, AggregationError::SliceOutOfBounds { .. }));

        let err = m.accumulate(PatchSlice::new(0, 2, 0, 2), patch(vec![0.0; 2], 1, 2)).unwrap_err();
        assert!(matches!(err, AggregationError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_crop_margin() {
        let t = patch((0..36).map(|v| v as f32).collect(), 6, 6);
        let cropped = crop_margin(t.clone(), Margin::new(1, 2)).unwrap();
        assert_eq!(cropped.dims(), [1, 4, 2]);
        assert_eq!(values(cropped)[0], 8.0);

        let err = crop_margin(t, Margin::new(3, 0)).unwrap_err();
        assert!(matches!(err, AggregationError::MarginTooLarge { .. }));
    }

    #[test]
    fn test_resize_nearest_upsamples_blocks() {
        let t = patch(vec![1.0, 2.0, 3.0, 4.0], 2, 2);
        let resized = resize_map(t, ImageSize::new(4, 4), ResizeMode::Nearest);
        assert_eq!(resized.dims(), [1, 4, 4]);
        let v = values(resized);
        assert_eq!(&v[0..4], &[1.0, 1.0, 2.0, 2.0]);
        assert_eq!(&v[12..16], &[3.0, 3.0, 4.0, 4.0]);
    }

    #[test]
    fn test_resize_same_size_is_identity() {
        let t = patch(vec![1.0, 2.0], 1, 2);
        assert_eq!(values(resize_map(t, ImageSize::new(1, 2), ResizeMode::Bilinear)), vec![1.0, 2.0]);
    }
}
