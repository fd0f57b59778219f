// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The anomaly pipeline only needs three things from wherever
// the images live: how big each image is, what it is called,
// and what its ground-truth segmentation looks like.
//
// Implementations:
//   - ImageFolder → images/ and labels/ directories on disk
//   - test doubles → in-memory labels for the aggregator tests

use anyhow::Result;

use crate::domain::patch::{ImageSize, LabelImage};

/// Read access to the full-size images a patch stream was cut from.
/// Image indices are positions in a stable, ordered image list.
pub trait ImageRepository {
    /// Number of images in the repository.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Original file name of the image, used to name persisted maps.
    fn image_name(&self, index: usize) -> Option<&str>;

    /// Size of the image as the model saw it (after any scaling).
    fn image_size(&self, index: usize) -> Option<ImageSize>;

    /// Ground-truth label at native resolution, C x H x W.
    fn label_image(&self, index: usize) -> Result<LabelImage>;
}
