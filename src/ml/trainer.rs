// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Train + validation loop using Burn's DataLoader and Adam,
// followed by one test pass with the best epoch's weights.
//
//   for epoch in start..num_epochs
//     train    → forward, loss, backward, Adam step
//     validate → model.valid() on the inner backend
//     best     → strictly lower mean val loss wins
//     save     → train_model_<epoch> and train_model_latest
//   reload best epoch → test pass → test_summary.csv
//   rename best checkpoint to train_model_<epoch>_best
//
// Best-epoch selection uses the validation loss for both
// tasks, classification included.
//
// Reference: Burn Book §5, Kingma & Ba (2015) Adam

use anyhow::Result;
use burn::{
    data::dataloader::{DataLoader, DataLoaderBuilder},
    module::AutodiffModule,
    optim::{decay::WeightDecayConfig, AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use std::sync::Arc;

use crate::application::train_use_case::TrainConfig;
use crate::data::{
    batcher::{PatchBatch, PatchBatcher},
    dataset::PatchDataset,
};
use crate::domain::settings::{Metric, Task};
use crate::infra::{
    checkpoint::{CheckpointManager, CheckpointTag, TrainingState},
    layout::ExperimentLayout,
    statistics::{Cell, Continuation, Row, StatisticsTable},
};
use crate::ml::model::ContextEncoder;
use crate::ml::scorer::{batch_loss, batch_metrics, MetricTotals};

/// The three splits a training run works on.
pub struct TrainingData {
    pub train: PatchDataset,
    pub val:   PatchDataset,
    pub test:  PatchDataset,
}

/// Best validation epoch seen so far.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestEpoch {
    pub epoch:   usize,
    pub measure: Option<f64>,
}

impl BestEpoch {
    pub fn new() -> Self {
        Self { epoch: 0, measure: None }
    }

    /// Record `measure` for `epoch` if it is strictly lower than the best so far.
    pub fn update(&mut self, epoch: usize, measure: Option<f64>) -> bool {
        match measure {
            Some(m) if m < self.measure.unwrap_or(f64::INFINITY) => {
                self.epoch   = epoch;
                self.measure = Some(m);
                true
            }
            _ => false,
        }
    }
}

impl Default for BestEpoch {
    fn default() -> Self {
        Self::new()
    }
}

impl From<TrainingState> for BestEpoch {
    fn from(state: TrainingState) -> Self {
        Self { epoch: state.best_epoch, measure: state.best_measure }
    }
}

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub best:         BestEpoch,
    pub epochs_run:   usize,
    /// Mean test metrics of the best epoch; empty if no test pass ran.
    pub test_metrics: Vec<(Metric, f64)>,
}

pub fn run_training<B: AutodiffBackend>(
    cfg:    &TrainConfig,
    data:   TrainingData,
    layout: &ExperimentLayout,
    device: &B::Device,
) -> Result<TrainingOutcome> {
    let task      = cfg.task()?;
    let model_cfg = cfg.model_config();

    // ── Build model ───────────────────────────────────────────────────────────
    let model: ContextEncoder<B> = model_cfg.init(device)?;
    tracing::info!("Model ready: {} trainable parameters", model.num_params());

    let ckpt = CheckpointManager::new(layout.saved_models_dir())?;
    ckpt.save_config(cfg)?;

    let (mut model, resumed) = ckpt.resume(model, cfg.resume, device)?;
    let start_epoch = resumed.map_or(0, |s| s.current_epoch + 1);
    let mut best    = resumed.map(BestEpoch::from).unwrap_or_default();
    if start_epoch > 0 {
        tracing::info!("Resuming at epoch {} (best so far: epoch {})", start_epoch, best.epoch);
    }

    let summary = StatisticsTable::open(
        layout.summary_csv(),
        task.epoch_columns(),
        if start_epoch > 0 { Continuation::Append } else { Continuation::Fresh },
    )?;

    // ── Adam optimiser ────────────────────────────────────────────────────────
    let mut optim_cfg = AdamConfig::new()
        .with_beta_1(cfg.beta_1)
        .with_beta_2(cfg.beta_2)
        .with_epsilon(1e-8);
    if cfg.weight_decay > 0.0 {
        optim_cfg = optim_cfg.with_weight_decay(Some(WeightDecayConfig::new(cfg.weight_decay)));
    }
    let mut optim = optim_cfg.init();

    // ── Data loaders ──────────────────────────────────────────────────────────
    let batcher = PatchBatcher::new(cfg.image_channels, cfg.geometry());
    let mut train_builder = DataLoaderBuilder::new(batcher.clone())
        .batch_size(cfg.batch_size)
        .shuffle(cfg.seed)
        .set_device(device.clone());
    if cfg.num_workers > 1 {
        train_builder = train_builder.num_workers(cfg.num_workers);
    }
    let train_loader: Arc<dyn DataLoader<B, PatchBatch<B>>> = train_builder.build(data.train);
    let val_loader  = eval_loader::<B::InnerBackend>(batcher.clone(), cfg.batch_size, device, data.val);
    let test_loader = eval_loader::<B::InnerBackend>(batcher, cfg.batch_size, device, data.test);

    // ── Epoch loop ────────────────────────────────────────────────────────────
    let mut epochs_run = 0;
    for epoch in start_epoch..cfg.num_epochs {
        let mut train_totals = MetricTotals::default();
        for batch in train_loader.iter() {
            let output = model.forward(batch.inputs);
            let loss   = batch_loss(task, output.clone(), batch.targets, batch.target_classes.clone());
            let loss_value: f64 = loss.clone().into_scalar().elem::<f64>();
            train_totals.add(&batch_metrics(task, loss_value, output, batch.target_classes));

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(cfg.learning_rate, model, grads);
        }

        let val_totals = evaluate(&model.valid(), task, val_loader.as_ref());
        if best.update(epoch, val_totals.mean(Metric::Loss)) {
            tracing::info!("New best epoch {} (val_loss={:.4})", epoch, best.measure.unwrap_or(f64::NAN));
        }

        let mut row = Row::new().with("curr_epoch", Cell::Index(epoch));
        let mut line = format!("Epoch {:>3}/{}", epoch, cfg.num_epochs);
        for (split, totals) in [("train", &train_totals), ("val", &val_totals)] {
            for &metric in task.metrics() {
                let value = totals.mean(metric).unwrap_or(f64::NAN);
                row.set(metric.column(split), Cell::Float(value));
                line.push_str(&format!(" | {}={:.4}", metric.column(split), value));
            }
        }
        summary.append(&row)?;
        println!("{line}");

        let state = TrainingState { current_epoch: epoch, best_epoch: best.epoch, best_measure: best.measure };
        ckpt.save(&model, &state, CheckpointTag::Epoch(epoch))?;
        ckpt.save(&model, &state, CheckpointTag::Latest)?;
        epochs_run += 1;
    }

    // ── Test pass on the best epoch ───────────────────────────────────────────
    // A resumed run that never beat its best epoch finds it already tagged.
    let best_tag = if ckpt.exists(CheckpointTag::Epoch(best.epoch)) {
        CheckpointTag::Epoch(best.epoch)
    } else if ckpt.exists(CheckpointTag::Best(best.epoch)) {
        CheckpointTag::Best(best.epoch)
    } else {
        tracing::warn!("No checkpoint for best epoch {}, skipping test evaluation", best.epoch);
        return Ok(TrainingOutcome { best, epochs_run, test_metrics: Vec::new() });
    };
    println!("Generating test set evaluation metrics");
    let (best_model, _) = ckpt.load(model_cfg.init::<B::InnerBackend>(device)?, best_tag, device)?;
    let test_totals  = evaluate(&best_model, task, test_loader.as_ref());
    let test_metrics: Vec<(Metric, f64)> = task
        .metrics()
        .iter()
        .map(|&m| (m, test_totals.mean(m).unwrap_or(f64::NAN)))
        .collect();

    let test_table = StatisticsTable::open(
        layout.test_summary_csv(),
        task.metrics().iter().map(|m| m.column("test")).collect(),
        Continuation::Fresh,
    )?;
    let row = test_metrics
        .iter()
        .fold(Row::new(), |row, &(m, v)| row.with(m.column("test"), Cell::Float(v)));
    test_table.append(&row)?;
    for (metric, value) in &test_metrics {
        println!("{}: {:.4}", metric.column("test"), value);
    }

    if best_tag == CheckpointTag::Epoch(best.epoch) {
        ckpt.mark_best(best.epoch)?;
    }
    tracing::info!("Training complete!");
    Ok(TrainingOutcome { best, epochs_run, test_metrics })
}

/// Sequential loader for evaluation: no shuffling, batches in dataset order.
pub fn eval_loader<B: Backend>(
    batcher:    PatchBatcher,
    batch_size: usize,
    device:     &B::Device,
    dataset:    PatchDataset,
) -> Arc<dyn DataLoader<B, PatchBatch<B>>> {
    DataLoaderBuilder::new(batcher)
        .batch_size(batch_size)
        .set_device(device.clone())
        .build(dataset)
}

fn evaluate<B: Backend>(
    model:  &ContextEncoder<B>,
    task:   Task,
    loader: &dyn DataLoader<B, PatchBatch<B>>,
) -> MetricTotals {
    let mut totals = MetricTotals::default();
    for batch in loader.iter() {
        let output = model.forward(batch.inputs);
        let loss: f64 = batch_loss(task, output.clone(), batch.targets, batch.target_classes.clone())
            .into_scalar()
            .elem::<f64>();
        totals.add(&batch_metrics(task, loss, output, batch.target_classes));
    }
    totals
}
