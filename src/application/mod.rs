// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Orchestrates the other layers for one goal each. No tensor
// math and no argument parsing here, only workflow:
//
//   train_use_case  — validate config, create run directories,
//                     load splits, run the training loop
//
//   detect_use_case — reload a trained experiment's best
//                     checkpoint and produce scored anomaly maps
//                     for the val and test splits

/// The training workflow
pub mod train_use_case;

/// The anomaly detection workflow
pub mod detect_use_case;
