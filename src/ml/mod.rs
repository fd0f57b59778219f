// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// Everything that runs on tensors:
//
//   model.rs       — context encoder (conv encoder, 1x1 bottleneck,
//                    conv-transpose decoder) and its shape planner
//
//   scorer.rs      — turns predictions into per-pixel anomaly
//                    scores, losses and batch metrics
//
//   anomaly_map.rs — accumulates patch scores into one
//                    image-sized map (mean / min / max)
//
//   aggregator.rs  — streams scored patches, finalises one map per
//                    image and scores it against the label image
//
//   trainer.rs     — train / validate / test loop with best-epoch
//                    tracking and checkpointing
//
// Backends: NdArray on the CPU by default, Wgpu with the `wgpu`
// feature. Training wraps the inference backend in Autodiff.

/// Context encoder architecture
pub mod model;

/// Per-pixel anomaly scores, losses and metrics
pub mod scorer;

/// Image-sized anomaly map accumulator
pub mod anomaly_map;

/// Streaming per-image map aggregation and evaluation
pub mod aggregator;

/// Training loop with validation, checkpointing and test pass
pub mod trainer;

#[cfg(not(feature = "wgpu"))]
pub type InferBackend = burn::backend::NdArray<f32>;
#[cfg(feature = "wgpu")]
pub type InferBackend = burn::backend::Wgpu;

pub type TrainBackend = burn::backend::Autodiff<InferBackend>;

pub fn default_device() -> <InferBackend as burn::tensor::backend::Backend>::Device {
    Default::default()
}
