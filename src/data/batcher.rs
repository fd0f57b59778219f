// ============================================================
// Layer 4 — Patch Batcher
// ============================================================
// Implements Burn's Batcher trait to stack PatchItems into
// tensors. Image indices and placement slices are per-patch
// bookkeeping for the anomaly map aggregator, so they stay as
// plain Vecs next to the tensors instead of becoming tensors.
//
//   Input:  Vec of N PatchItems
//   Output: inputs          [N, C, window_h, window_w]
//           targets         [N, C, mask_h,   mask_w]
//           target_classes  [N, C, mask_h,   mask_w]  (Int)

use burn::{data::dataloader::batcher::Batcher, prelude::*, tensor::TensorData};

use crate::data::dataset::{PatchItem, WindowGeometry};
use crate::domain::patch::PatchSlice;

#[derive(Debug, Clone)]
pub struct PatchBatch<B: Backend> {
    pub inputs:         Tensor<B, 4>,
    pub targets:        Tensor<B, 4>,
    pub target_classes: Tensor<B, 4, Int>,
    /// Source image of each patch, in batch order.
    pub image_indices:  Vec<usize>,
    /// Placement of each patch's prediction in its source image.
    pub slices:         Vec<PatchSlice>,
}

#[derive(Clone, Debug)]
pub struct PatchBatcher {
    channels: usize,
    geometry: WindowGeometry,
}

impl PatchBatcher {
    pub fn new(channels: usize, geometry: WindowGeometry) -> Self {
        Self { channels, geometry }
    }
}

impl<B: Backend> Batcher<B, PatchItem, PatchBatch<B>> for PatchBatcher {
    fn batch(&self, items: Vec<PatchItem>, device: &B::Device) -> PatchBatch<B> {
        let n = items.len();
        let c = self.channels;
        let [wh, ww] = self.geometry.window;
        let [mh, mw] = self.geometry.mask;

        let inputs: Vec<f32>  = items.iter().flat_map(|p| p.input.iter().copied()).collect();
        let targets: Vec<f32> = items.iter().flat_map(|p| p.target.iter().copied()).collect();
        let classes: Vec<i64> = items.iter().flat_map(|p| p.target_classes.iter().copied()).collect();

        PatchBatch {
            inputs:         Tensor::from_data(TensorData::new(inputs, [n, c, wh, ww]), device),
            targets:        Tensor::from_data(TensorData::new(targets, [n, c, mh, mw]), device),
            target_classes: Tensor::from_data(TensorData::new(classes, [n, c, mh, mw]), device),
            image_indices:  items.iter().map(|p| p.image_index).collect(),
            slices:         items.iter().map(|p| p.slice).collect(),
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn item(image_index: usize, fill: f32) -> PatchItem {
        PatchItem {
            image_index,
            slice:          PatchSlice::new(1, 2, 1, 2),
            input:          vec![fill; 9],
            target:         vec![fill],
            target_classes: vec![7],
        }
    }

    #[test]
    fn test_batch_shapes_and_metadata() {
        let geometry = WindowGeometry { window: [3, 3], mask: [1, 1], stride: [1, 1] };
        let batcher  = PatchBatcher::new(1, geometry);
        let device   = Default::default();

        let batch: PatchBatch<TestBackend> = Batcher::<TestBackend, _, _>::batch(
            &batcher,
            vec![item(0, 0.25), item(0, 0.5), item(1, 0.75)],
            &device,
        );

        assert_eq!(batch.inputs.dims(), [3, 1, 3, 3]);
        assert_eq!(batch.targets.dims(), [3, 1, 1, 1]);
        assert_eq!(batch.target_classes.dims(), [3, 1, 1, 1]);
        assert_eq!(batch.image_indices, vec![0, 0, 1]);
        assert_eq!(batch.slices.len(), 3);

        let targets = batch.targets.into_data().to_vec::<f32>().unwrap();
        assert_eq!(targets, vec![0.25, 0.5, 0.75]);
    }
}
