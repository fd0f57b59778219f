// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// From image files on disk to tensor batches:
//
//   images/ + labels/
//       │
//       ▼
//   ImageFolder     → decodes (and optionally rescales) images,
//       │             serves label images by index
//       ▼
//   PatchDataset    → sliding windows with a blanked centre,
//       │             implements Burn's Dataset trait
//       ▼
//   PatchBatcher    → stacks items into a PatchBatch
//       │
//       ▼
//   DataLoader      → feeds batches to training or detection

/// Image folder per split, implements ImageRepository
pub mod images;

/// Sliding-window inpainting samples
pub mod dataset;

/// Burn Batcher for patch samples
pub mod batcher;
