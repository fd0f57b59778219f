// ============================================================
// Layer 3 — Run Settings and Task Definition
// ============================================================
// Every option a run can be configured with, as plain enums.
// Combinations are checked once, when a Task is resolved,
// so nothing downstream has to re-check strings per batch.
//
// Supported combinations:
//
//   task            loss            anomaly measure
//   ──────────────  ──────────────  ─────────────────
//   classification  cross_entropy   likelihood
//   regression      l2              absolute-distance

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("loss '{loss}' is not supported for task '{task}'")]
    UnsupportedLoss { task: TaskKind, loss: LossKind },

    #[error("anomaly measure '{measure}' is not supported for task '{task}'")]
    UnsupportedMeasure { task: TaskKind, measure: AnomalyMeasure },

    #[error("invalid resume mode '{0}': expected 'fresh', 'latest' or an epoch index")]
    InvalidResume(String),

    #[error("invalid margin '{0}': expected two comma-separated pixel counts, e.g. '8,8'")]
    InvalidMargin(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Classification,
    Regression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    #[value(name = "cross_entropy")]
    CrossEntropy,
    #[value(name = "l2", alias = "L2")]
    L2,
}

/// Rule for combining overlapping patch scores at a shared pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    Mean,
    Min,
    Max,
}

/// How a patch prediction becomes a per-pixel anomaly score.
/// Both variants are oriented so that a higher score means more anomalous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyMeasure {
    /// Mean over channels of |prediction - target|.
    AbsoluteDistance,
    /// Negative log-likelihood of the target intensity, summed over channels.
    Likelihood,
}

/// Interpolation used when a map is rescaled to label resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ResizeMode {
    #[default]
    Nearest,
    Bilinear,
}

/// Where a training run starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResumeMode {
    #[default]
    Fresh,
    /// Continue from the `latest` checkpoint; start fresh if there is none.
    Latest,
    /// Continue from a specific epoch; a missing checkpoint is fatal.
    FromEpoch(usize),
}

impl FromStr for ResumeMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "fresh"  => Ok(Self::Fresh),
            "latest" => Ok(Self::Latest),
            other => other
                .parse::<usize>()
                .map(Self::FromEpoch)
                .map_err(|_| ConfigError::InvalidResume(s.to_string())),
        }
    }
}

/// Parse a margin given as "rows,cols".
pub fn parse_margin(s: &str) -> Result<crate::domain::patch::Margin, ConfigError> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    match parts.as_slice() {
        [rows, cols] => {
            let rows = rows.parse().map_err(|_| ConfigError::InvalidMargin(s.to_string()))?;
            let cols = cols.parse().map_err(|_| ConfigError::InvalidMargin(s.to_string()))?;
            Ok(crate::domain::patch::Margin::new(rows, cols))
        }
        _ => Err(ConfigError::InvalidMargin(s.to_string())),
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Classification => "classification",
            Self::Regression     => "regression",
        })
    }
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CrossEntropy => "cross_entropy",
            Self::L2           => "l2",
        })
    }
}

impl fmt::Display for AnomalyMeasure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AbsoluteDistance => "absolute-distance",
            Self::Likelihood       => "likelihood",
        })
    }
}

// ─── Metrics ─────────────────────────────────────────────────────────────────

/// A per-batch training/evaluation metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Loss,
    /// Fraction of pixels whose most likely intensity equals the target.
    Accuracy,
    /// MSE of the most likely intensity vs. target, both rescaled to [-1, 1].
    MapMseRange11,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Loss          => "loss",
            Self::Accuracy      => "accuracy",
            Self::MapMseRange11 => "map_mse_range11",
        }
    }

    /// Column name for this metric on a dataset split, e.g. "val_loss".
    pub fn column(&self, split: &str) -> String {
        format!("{split}_{}", self.name())
    }
}

// ─── Task ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassificationLoss {
    CrossEntropy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegressionLoss {
    L2,
}

/// What the model predicts and how it is scored, resolved once per run.
///
/// Classification predicts a 256-way distribution over pixel intensities;
/// regression predicts intensities directly in [-1, 1].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Task {
    Classification { loss: ClassificationLoss },
    Regression     { loss: RegressionLoss },
}

const CLASSIFICATION_METRICS: &[Metric] = &[Metric::Loss, Metric::Accuracy, Metric::MapMseRange11];
const REGRESSION_METRICS:     &[Metric] = &[Metric::Loss];

impl Task {
    pub fn resolve(kind: TaskKind, loss: LossKind) -> Result<Self, ConfigError> {
        match (kind, loss) {
            (TaskKind::Classification, LossKind::CrossEntropy) => Ok(Self::Classification {
                loss: ClassificationLoss::CrossEntropy,
            }),
            (TaskKind::Regression, LossKind::L2) => Ok(Self::Regression {
                loss: RegressionLoss::L2,
            }),
            (task, loss) => Err(ConfigError::UnsupportedLoss { task, loss }),
        }
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Classification { .. } => TaskKind::Classification,
            Self::Regression { .. }     => TaskKind::Regression,
        }
    }

    pub fn metrics(&self) -> &'static [Metric] {
        match self {
            Self::Classification { .. } => CLASSIFICATION_METRICS,
            Self::Regression { .. }     => REGRESSION_METRICS,
        }
    }

    /// Check that an anomaly measure can be computed from this task's outputs.
    pub fn check_measure(&self, measure: AnomalyMeasure) -> Result<(), ConfigError> {
        match (self, measure) {
            (Self::Classification { .. }, AnomalyMeasure::Likelihood)
            | (Self::Regression { .. }, AnomalyMeasure::AbsoluteDistance) => Ok(()),
            (task, measure) => Err(ConfigError::UnsupportedMeasure { task: task.kind(), measure }),
        }
    }

    /// Columns of the per-epoch summary table, in write order.
    pub fn epoch_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = ["train", "val"]
            .iter()
            .flat_map(|split| self.metrics().iter().map(move |m| m.column(split)))
            .collect();
        columns.push("curr_epoch".to_string());
        columns
    }
}
