// ============================================================
// Layer 5 — Anomaly Map Aggregator
// ============================================================
// Streams scored patches, grouped by source image, and turns
// them into one finished anomaly map per image:
//
//   (image_index, slice, scores) ──▶ AnomalyMap for image i
//                                        │  next image's first patch,
//                                        │  or finish()
//                                        ▼
//                                   finalise:
//                                     1. normalise (mean)
//                                     2. resize to label size
//                                     3. persist (uncropped)
//                                     4. crop margin off map + label
//                                     5. AUC against the label
//
// Only one image's map is held at a time. Image indices may
// skip values but must never go down; a lower index than one
// already seen is an OrderViolation.

use anyhow::{ensure, Result};
use burn::{prelude::*, tensor::TensorData};

use crate::domain::agreement::{roc_auc, Agreement};
use crate::domain::patch::{ImageSize, Margin, PatchSlice};
use crate::domain::settings::{AggregationMethod, ResizeMode};
use crate::domain::traits::ImageRepository;
use crate::infra::map_store::MapStore;
use crate::ml::anomaly_map::{crop_margin, resize_map, AggregationError, AnomalyMap};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregatorSettings {
    pub method: AggregationMethod,
    pub margin: Option<Margin>,
    /// Set when maps are computed at a different resolution than the labels.
    pub resize: Option<ResizeMode>,
}

/// A finalised image: its map (resized, before margin cropping) and its AUC.
#[derive(Debug, Clone)]
pub struct FinishedImage<B: Backend> {
    pub image_index: usize,
    pub map:         Tensor<B, 3>,
    pub agreement:   Agreement,
}

pub struct AnomalyMapAggregator<'a, B: Backend, R: ImageRepository + ?Sized> {
    repo:       &'a R,
    store:      Option<&'a MapStore>,
    settings:   AggregatorSettings,
    device:     B::Device,
    current:    Option<AnomalyMap<B>>,
    last_index: Option<usize>,
}

impl<'a, B: Backend, R: ImageRepository + ?Sized> AnomalyMapAggregator<'a, B, R> {
    pub fn new(repo: &'a R, settings: AggregatorSettings, device: B::Device) -> Self {
        Self { repo, store: None, settings, device, current: None, last_index: None }
    }

    /// Persist every finished map to `store`.
    pub fn with_store(mut self, store: &'a MapStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Add one patch's scores [1, h, w]. Returns the previous image when
    /// this patch starts a new one.
    pub fn push_patch(
        &mut self,
        image_index: usize,
        slice:       PatchSlice,
        scores:      Tensor<B, 3>,
    ) -> Result<Option<FinishedImage<B>>> {
        if let Some(last) = self.last_index {
            if image_index < last {
                return Err(AggregationError::OrderViolation { current: last, got: image_index }.into());
            }
        }

        let finished = match self.current.take() {
            Some(map) if map.image_index() != image_index => Some(self.finalise(map)?),
            Some(map) => {
                self.current = Some(map);
                None
            }
            None => None,
        };

        if self.current.is_none() {
            let size = self
                .repo
                .image_size(image_index)
                .ok_or(AggregationError::UnknownImage(image_index))?;
            self.current = Some(AnomalyMap::new(image_index, size, self.settings.method, &self.device));
        }
        if let Some(map) = self.current.as_mut() {
            map.accumulate(slice, scores)?;
        }
        self.last_index = Some(image_index);
        Ok(finished)
    }

    /// Add a batch of patch scores [N, 1, h, w] in batch order.
    pub fn push_batch(
        &mut self,
        scores:        Tensor<B, 4>,
        image_indices: &[usize],
        slices:        &[PatchSlice],
    ) -> Result<Vec<FinishedImage<B>>> {
        let [n, c, h, w] = scores.dims();
        ensure!(
            n == image_indices.len() && n == slices.len(),
            "batch of {n} scores came with {} image indices and {} slices",
            image_indices.len(),
            slices.len()
        );
        ensure!(c == 1, "expected single-channel scores, got {c} channels");

        let mut finished = Vec::new();
        for (i, (&image_index, &slice)) in image_indices.iter().zip(slices).enumerate() {
            let patch = scores.clone().slice([i..i + 1, 0..1, 0..h, 0..w]).reshape([1, h, w]);
            if let Some(done) = self.push_patch(image_index, slice, patch)? {
                finished.push(done);
            }
        }
        Ok(finished)
    }

    /// Finalise the last image at end of stream.
    pub fn finish(&mut self) -> Result<Option<FinishedImage<B>>> {
        match self.current.take() {
            Some(map) => Ok(Some(self.finalise(map)?)),
            None => Ok(None),
        }
    }

    fn finalise(&self, map: AnomalyMap<B>) -> Result<FinishedImage<B>> {
        let image_index = map.image_index();
        let mut scores  = map.into_scores();

        let label = self.repo.label_image(image_index)?;
        let label_tensor = Tensor::<B, 3>::from_data(
            TensorData::new(label.values, [label.channels, label.size.height, label.size.width]),
            &self.device,
        );
        let label_tensor = if label.channels > 1 { label_tensor.max_dim(0) } else { label_tensor };

        if let Some(mode) = self.settings.resize {
            scores = resize_map(scores, label.size, mode);
        }
        let [_, h, w] = scores.dims();
        let map_size = ImageSize::new(h, w);
        if map_size != label.size {
            return Err(AggregationError::LabelSizeMismatch { map: map_size, label: label.size }.into());
        }

        if let (Some(store), Some(name)) = (self.store, self.repo.image_name(image_index)) {
            store.save(name, scores.clone())?;
        }

        let (eval_map, eval_label) = match self.settings.margin {
            Some(margin) => (crop_margin(scores.clone(), margin)?, crop_margin(label_tensor, margin)?),
            None => (scores.clone(), label_tensor),
        };

        let labels: Vec<f32> = eval_label
            .into_data()
            .to_vec()
            .map_err(|e| anyhow::anyhow!("Cannot read label values: {e:?}"))?;
        let predictions: Vec<f32> = eval_map
            .into_data()
            .to_vec()
            .map_err(|e| anyhow::anyhow!("Cannot read anomaly map values: {e:?}"))?;
        let agreement = roc_auc(&labels, &predictions);

        tracing::debug!("Image {} finished: auc={}", image_index, agreement);
        Ok(FinishedImage { image_index, map: scores, agreement })
    }
}
