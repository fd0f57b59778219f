// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types and traits that describe the problem:
// patches and where they sit, label images, run settings,
// and the agreement score between a map and its label.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, traits and pure functions

// Patch placement, image sizes, margins and label images
pub mod patch;

// Configuration enums and the Task sum type
pub mod settings;

// AUC-ROC and mean-of-defined-values
pub mod agreement;

// Abstractions other layers implement
pub mod traits;
