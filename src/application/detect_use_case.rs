// ============================================================
// Layer 2 — DetectUseCase
// ============================================================
// Runs anomaly detection with the best checkpoint of a trained
// experiment, once over the val split and once over the test
// split:
//
//   Step 1: Reload train_config.json and check the measure  (infra)
//   Step 2: Rebuild the model, load the _best weights       (ml)
//   Step 3: Per split: patches → scores → anomaly maps      (data, ml)
//   Step 4: One table row per image, mean AUC to stdout     (infra)
//
// Patches are fed in dataset order (no shuffling) so that all
// patches of an image arrive together.

use anyhow::{Context, Result};
use burn::prelude::*;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, sync::Arc};

use crate::application::train_use_case::TrainConfig;
use crate::data::{batcher::PatchBatcher, dataset::PatchDataset, images::ImageFolder};
use crate::domain::{
    agreement::{mean_defined, Agreement},
    patch::Margin,
    settings::{AggregationMethod, AnomalyMeasure, ResizeMode},
    traits::ImageRepository,
};
use crate::infra::{
    checkpoint::{CheckpointManager, CheckpointTag},
    layout::{DetectionLayout, ExperimentLayout},
    map_store::MapStore,
    statistics::{Cell, Continuation, Row, StatisticsTable},
};
use crate::ml::{
    aggregator::{AggregatorSettings, AnomalyMapAggregator, FinishedImage},
    default_device,
    model::{ContextEncoder, PatchModel},
    scorer::anomaly_scores,
    trainer::eval_loader,
    InferBackend,
};

const SPLITS: [&str; 2] = ["val", "test"];

// ─── Detection Configuration ─────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectConfig {
    /// Experiment whose best checkpoint is used.
    pub experiment_name:   String,
    /// Name of this detection run, used for its output directory.
    pub detection_name:    String,
    pub results_dir:       PathBuf,
    /// Overrides the data directory stored with the training config.
    pub data_dir:          Option<PathBuf>,
    pub aggregation:       AggregationMethod,
    pub margin:            Option<Margin>,
    pub measure:           AnomalyMeasure,
    pub resize_mode:       ResizeMode,
    pub save_maps:         bool,
    pub batch_size:        usize,
    /// Continue existing per-image tables instead of starting them fresh.
    pub append_statistics: bool,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            experiment_name:   "context_encoder".to_string(),
            detection_name:    "detection".to_string(),
            results_dir:       PathBuf::from("results"),
            data_dir:          None,
            aggregation:       AggregationMethod::Mean,
            margin:            None,
            measure:           AnomalyMeasure::AbsoluteDistance,
            resize_mode:       ResizeMode::Nearest,
            save_maps:         true,
            batch_size:        100,
            append_statistics: false,
        }
    }
}

/// Per-image agreements of one split.
#[derive(Debug, Clone)]
pub struct SplitReport {
    pub split:      String,
    pub agreements: Vec<(usize, Agreement)>,
    /// Mean over defined agreements; None when every image was undefined.
    pub mean_auc:   Option<f64>,
}

// ─── DetectUseCase ────────────────────────────────────────────────────────────
pub struct DetectUseCase {
    config: DetectConfig,
}

impl DetectUseCase {
    pub fn new(config: DetectConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<Vec<SplitReport>> {
        run_detection::<InferBackend>(&self.config, &default_device())
    }
}

pub fn run_detection<B: Backend>(cfg: &DetectConfig, device: &B::Device) -> Result<Vec<SplitReport>> {
    // ── Step 1: Training setup ────────────────────────────────────────────────
    let experiment = ExperimentLayout::new(&cfg.results_dir, &cfg.experiment_name);
    let ckpt       = CheckpointManager::new(experiment.saved_models_dir())?;
    let mut train_cfg: TrainConfig = ckpt.load_config()?;
    if let Some(dir) = &cfg.data_dir {
        train_cfg.data_dir = dir.clone();
    }
    train_cfg.task()?.check_measure(cfg.measure)?;

    // ── Step 2: Best model ────────────────────────────────────────────────────
    let best_epoch = ckpt.find_best()?.with_context(|| {
        format!(
            "No best checkpoint in '{}'. Has training finished for '{}'?",
            ckpt.dir().display(),
            cfg.experiment_name
        )
    })?;
    let model: ContextEncoder<B> = train_cfg.model_config().init(device)?;
    let (model, _) = ckpt.load(model, CheckpointTag::Best(best_epoch), device)?;
    tracing::info!("Detecting with epoch {} of '{}'", best_epoch, cfg.experiment_name);

    let layout = DetectionLayout::new(&cfg.results_dir, &cfg.experiment_name, &cfg.detection_name);
    layout.create_dirs(&SPLITS)?;
    tracing::info!("Writing detection outputs to '{}'", layout.root().display());

    let settings = AggregatorSettings {
        method: cfg.aggregation,
        margin: cfg.margin,
        resize: train_cfg.scale_image.map(|_| cfg.resize_mode),
    };

    // ── Step 3 + 4: Per split ─────────────────────────────────────────────────
    let mut reports = Vec::new();
    for split in SPLITS {
        let folder = Arc::new(train_cfg.open_split(split)?);
        if folder.is_empty() {
            tracing::info!("The '{split}' split has no images, skipping");
            continue;
        }
        let store = if cfg.save_maps { Some(MapStore::new(layout.maps_dir(split))?) } else { None };
        if let Some(store) = &store {
            tracing::info!("Saving '{split}' anomaly maps to '{}'", store.dir().display());
        }
        let table = StatisticsTable::open(
            layout.table_csv(split),
            vec!["image_index".into(), "image_name".into(), "aucroc".into()],
            if cfg.append_statistics { Continuation::Append } else { Continuation::Fresh },
        )?;

        let report = detect_split(
            &model, &train_cfg, cfg, settings, folder, store.as_ref(), &table, split, device,
        )?;
        println!("{split} set results:");
        match report.mean_auc {
            Some(mean) => println!("Mean aucroc: {mean:.4}"),
            None       => println!("Mean aucroc: undefined (no image has both classes)"),
        }
        reports.push(report);
    }
    Ok(reports)
}

#[allow(clippy::too_many_arguments)]
fn detect_split<B: Backend, M: PatchModel<B>>(
    model:     &M,
    train_cfg: &TrainConfig,
    cfg:       &DetectConfig,
    settings:  AggregatorSettings,
    folder:    Arc<ImageFolder>,
    store:     Option<&MapStore>,
    table:     &StatisticsTable,
    split:     &str,
    device:    &B::Device,
) -> Result<SplitReport> {
    let dataset = PatchDataset::new(folder.clone(), train_cfg.geometry());
    let batcher = PatchBatcher::new(train_cfg.image_channels, train_cfg.geometry());
    let loader  = eval_loader::<B>(batcher, cfg.batch_size, device, dataset);

    let mut aggregator = AnomalyMapAggregator::<B, _>::new(folder.as_ref(), settings, device.clone());
    if let Some(store) = store {
        aggregator = aggregator.with_store(store);
    }

    let mut agreements = Vec::with_capacity(folder.len());
    let mut record = |done: FinishedImage<B>| -> Result<()> {
        let name = folder.image_name(done.image_index).unwrap_or_default().to_string();
        tracing::debug!("Map for '{}' is {:?}, aucroc {}", name, done.map.dims(), done.agreement);
        table.append(
            &Row::new()
                .with("image_index", Cell::Index(done.image_index))
                .with("image_name", Cell::Text(name))
                .with("aucroc", Cell::Agreement(done.agreement)),
        )?;
        agreements.push((done.image_index, done.agreement));
        Ok(())
    };

    for batch in loader.iter() {
        let output = model.predict(batch.inputs);
        let scores = anomaly_scores(cfg.measure, output, batch.targets, batch.target_classes);
        for done in aggregator.push_batch(scores, &batch.image_indices, &batch.slices)? {
            record(done)?;
        }
    }
    if let Some(done) = aggregator.finish()? {
        record(done)?;
    }

    let values: Vec<Agreement> = agreements.iter().map(|(_, a)| *a).collect();
    let mean_auc = mean_defined(&values);
    tracing::info!(
        "'{}': {} images, {} with a defined AUC",
        split,
        values.len(),
        values.iter().filter(|a| a.value().is_some()).count(),
    );
    Ok(SplitReport { split: split.to_string(), agreements, mean_auc })
}
