// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates a training run in order:
//
//   Step 1: Validate the configuration       (Layer 3 - domain)
//   Step 2: Create the run directories       (Layer 6 - infra)
//   Step 3: Load train / val / test splits   (Layer 4 - data)
//   Step 4: Run the training loop            (Layer 5 - ml)
//
// Data layout expected under `data_dir`:
//
//   train/{images,labels}/   val/{images,labels}/   test/{images,labels}/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, sync::Arc};

use crate::data::{
    dataset::{PatchDataset, WindowGeometry},
    images::ImageFolder,
};
use crate::domain::settings::{ConfigError, LossKind, ResumeMode, Task, TaskKind};
use crate::domain::traits::ImageRepository;
use crate::infra::layout::ExperimentLayout;
use crate::ml::{
    default_device,
    model::ContextEncoderConfig,
    trainer::{run_training, TrainingData},
    TrainBackend,
};

// ─── Training Configuration ──────────────────────────────────────────────────
// Everything needed to rebuild the model and its windowing.
// Saved as train_config.json next to the checkpoints so that
// detection uses exactly the same setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub experiment_name:         String,
    pub results_dir:             PathBuf,
    pub data_dir:                PathBuf,
    pub image_channels:          usize,
    pub scale_image:             Option<f32>,
    pub window:                  [usize; 2],
    pub mask:                    [usize; 2],
    pub stride:                  [usize; 2],
    pub task:                    TaskKind,
    pub loss:                    LossKind,
    pub num_epochs:              usize,
    pub batch_size:              usize,
    pub learning_rate:           f64,
    pub beta_1:                  f32,
    pub beta_2:                  f32,
    pub weight_decay:            f32,
    pub seed:                    u64,
    pub num_workers:             usize,
    pub resume:                  ResumeMode,
    pub kernel_size:             usize,
    pub num_channels_enc:        usize,
    pub channel_progression_enc: Vec<usize>,
    pub num_channels_bottleneck: usize,
    pub num_channels_dec:        usize,
    pub channel_progression_dec: Vec<usize>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            experiment_name:         "context_encoder".to_string(),
            results_dir:             PathBuf::from("results"),
            data_dir:                PathBuf::from("data"),
            image_channels:          1,
            scale_image:             None,
            window:                  [64, 64],
            mask:                    [32, 32],
            stride:                  [32, 32],
            task:                    TaskKind::Regression,
            loss:                    LossKind::L2,
            num_epochs:              100,
            batch_size:              100,
            learning_rate:           2e-4,
            beta_1:                  0.9,
            beta_2:                  0.999,
            weight_decay:            0.0,
            seed:                    7112018,
            num_workers:             1,
            resume:                  ResumeMode::Fresh,
            kernel_size:             4,
            num_channels_enc:        64,
            channel_progression_enc: vec![1, 2, 4, 8],
            num_channels_bottleneck: 4000,
            num_channels_dec:        64,
            channel_progression_dec: vec![8, 4, 2],
        }
    }
}

impl TrainConfig {
    pub fn task(&self) -> Result<Task, ConfigError> {
        Task::resolve(self.task, self.loss)
    }

    pub fn geometry(&self) -> WindowGeometry {
        WindowGeometry { window: self.window, mask: self.mask, stride: self.stride }
    }

    pub fn model_config(&self) -> ContextEncoderConfig {
        ContextEncoderConfig {
            image_channels:          self.image_channels,
            input_size:              self.window,
            output_size:             self.mask,
            kernel_size:             self.kernel_size,
            num_channels_enc:        self.num_channels_enc,
            channel_progression_enc: self.channel_progression_enc.clone(),
            num_channels_bottleneck: self.num_channels_bottleneck,
            num_channels_dec:        self.num_channels_dec,
            channel_progression_dec: self.channel_progression_dec.clone(),
            task:                    self.task,
        }
    }

    /// Reject unsupported combinations before anything is computed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.task()?;
        self.geometry().validate()?;
        self.model_config().plan()?;
        if self.image_channels != 1 && self.image_channels != 3 {
            return Err(ConfigError::Invalid(format!(
                "image channels must be 1 or 3, got {}",
                self.image_channels
            )));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch size must be positive".into()));
        }
        if let Some(scale) = self.scale_image {
            if scale.is_nan() || scale <= 0.0 {
                return Err(ConfigError::Invalid(format!("image scale must be positive, got {scale}")));
            }
        }
        Ok(())
    }

    pub fn layout(&self) -> ExperimentLayout {
        ExperimentLayout::new(&self.results_dir, &self.experiment_name)
    }

    /// Open one split's image folder under `data_dir`.
    pub fn open_split(&self, split: &str) -> Result<ImageFolder> {
        ImageFolder::open(self.data_dir.join(split), self.image_channels, self.scale_image)
            .with_context(|| format!("Cannot load the '{split}' split"))
    }
}

/// Load the train, val and test splits as patch datasets.
pub fn load_splits(cfg: &TrainConfig) -> Result<TrainingData> {
    let load = |split: &str| -> Result<PatchDataset> {
        let folder = cfg.open_split(split)?;
        if folder.is_empty() {
            tracing::warn!("The '{split}' split has no images");
        }
        Ok(PatchDataset::new(Arc::new(folder), cfg.geometry()))
    };
    Ok(TrainingData { train: load("train")?, val: load("val")?, test: load("test")? })
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<()> {
        let cfg = &self.config;

        // ── Step 1: Validate ──────────────────────────────────────────────────
        cfg.validate()?;
        tracing::info!(
            "Experiment '{}': task={} loss={} window={:?} mask={:?} stride={:?}",
            cfg.experiment_name, cfg.task, cfg.loss, cfg.window, cfg.mask, cfg.stride,
        );

        // ── Step 2: Run directories ───────────────────────────────────────────
        let layout = cfg.layout();
        layout.create_dirs()?;
        tracing::info!("Writing experiment outputs to '{}'", layout.root().display());

        // ── Step 3: Datasets ──────────────────────────────────────────────────
        let data = load_splits(cfg)?;

        // ── Step 4: Training loop (Layer 5) ───────────────────────────────────
        let outcome = run_training::<TrainBackend>(cfg, data, &layout, &default_device())?;
        tracing::info!(
            "Ran {} epochs, best epoch {} (val_loss={:?})",
            outcome.epochs_run, outcome.best.epoch, outcome.best.measure,
        );
        for (metric, value) in &outcome.test_metrics {
            tracing::info!("Test {} of best epoch: {:.4}", metric.name(), value);
        }
        Ok(())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::images::tests::write_split;
    use std::path::Path;

    /// Small end-to-end setup: two 24x16 images per split, 16x16 windows
    /// with an 8x8 mask, and a model sized to match.
    pub(crate) fn tiny_config(root: &Path, task: TaskKind, num_epochs: usize) -> TrainConfig {
        for split in ["train", "val", "test"] {
            write_split(&root.join("data").join(split), 2, 24, 16);
        }
        TrainConfig {
            experiment_name:         "tiny".to_string(),
            results_dir:             root.join("results"),
            data_dir:                root.join("data"),
            window:                  [16, 16],
            mask:                    [8, 8],
            stride:                  [8, 8],
            task,
            loss:                    match task {
                TaskKind::Classification => LossKind::CrossEntropy,
                TaskKind::Regression     => LossKind::L2,
            },
            num_epochs,
            batch_size:              2,
            learning_rate:           1e-3,
            num_channels_enc:        4,
            channel_progression_enc: vec![1, 2],
            num_channels_bottleneck: 8,
            num_channels_dec:        4,
            channel_progression_dec: vec![2],
            ..TrainConfig::default()
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(TrainConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_mismatched_loss() {
        let cfg = TrainConfig { loss: LossKind::CrossEntropy, ..TrainConfig::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::UnsupportedLoss { .. })));
    }

    #[test]
    fn test_rejects_decoder_not_matching_mask() {
        let cfg = TrainConfig { mask: [16, 16], ..TrainConfig::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_config_json_round_trip() {
        let cfg  = TrainConfig { resume: ResumeMode::FromEpoch(4), scale_image: Some(0.5), ..TrainConfig::default() };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: TrainConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.resume, ResumeMode::FromEpoch(4));
        assert_eq!(back.scale_image, Some(0.5));
        assert_eq!(back.channel_progression_dec, cfg.channel_progression_dec);
    }

    #[test]
    fn test_load_splits() {
        let tmp  = tempfile::tempdir().unwrap();
        let cfg  = tiny_config(tmp.path(), TaskKind::Regression, 1);
        let data = load_splits(&cfg).unwrap();
        // 24x16 image, 16x16 window, stride 8 → 2 windows per image
        use burn::data::dataset::Dataset;
        assert_eq!(data.train.len(), 4);
        assert_eq!(data.test.len(), 4);
    }

    #[test]
    fn test_execute_creates_run_files() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = tiny_config(tmp.path(), TaskKind::Regression, 1);
        TrainUseCase::new(cfg.clone()).execute().unwrap();

        let layout = cfg.layout();
        assert!(layout.summary_csv().exists());
        assert!(layout.saved_models_dir().join("train_config.json").exists());
        assert!(layout.saved_models_dir().join("train_model_0_best.mpk.gz").exists());
    }
}
