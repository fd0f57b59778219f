// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Everything that touches the file system on behalf of the
// other layers:
//
//   checkpoint.rs — model weights (full precision .mpk.gz) plus
//                   the JSON training state needed to resume,
//                   and the saved training config
//
//   statistics.rs — append-only CSV tables for epoch summaries,
//                   test results and per-image AUCs
//
//   map_store.rs  — one persisted anomaly map per image
//
//   layout.rs     — where a training or detection run puts
//                   its files

/// Model checkpoint saving and loading
pub mod checkpoint;

/// CSV statistics tables
pub mod statistics;

/// Anomaly map persistence
pub mod map_store;

/// Run directory layout
pub mod layout;
