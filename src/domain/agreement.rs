// ============================================================
// Layer 3 — Agreement between Anomaly Scores and Labels
// ============================================================
// AUC-ROC is the probability that a randomly chosen anomalous
// pixel receives a higher score than a randomly chosen normal
// pixel. It is computed here from ranks (Mann–Whitney U):
//
//   AUC = (R_pos - n_pos * (n_pos + 1) / 2) / (n_pos * n_neg)
//
// where R_pos is the sum of the ranks of the positive pixels.
// Tied scores share the average of their ranks, which gives the
// same value as the trapezoidal area under the ROC curve.
//
// If the label contains only one class, AUC does not exist.
// That is reported as Agreement::Undefined, never as 0.

use std::fmt;

/// Label values at or above this threshold count as anomalous.
pub const POSITIVE_THRESHOLD: f32 = 0.5;

/// Agreement score for one image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Agreement {
    Defined(f64),
    Undefined,
}

impl Agreement {
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Defined(v) => Some(*v),
            Self::Undefined  => None,
        }
    }
}

impl fmt::Display for Agreement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Defined(v) => write!(f, "{v:.6}"),
            Self::Undefined  => f.write_str("NaN"),
        }
    }
}

/// AUC-ROC of `scores` against binarized `labels`.
///
/// Both slices are flattened pixels in the same order; higher scores must
/// mean "more anomalous".
pub fn roc_auc(labels: &[f32], scores: &[f32]) -> Agreement {
    debug_assert_eq!(labels.len(), scores.len());

    let mut pairs: Vec<(f32, bool)> = scores
        .iter()
        .zip(labels)
        .map(|(&s, &l)| (s, l >= POSITIVE_THRESHOLD))
        .collect();

    let n_pos = pairs.iter().filter(|(_, p)| *p).count();
    let n_neg = pairs.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Agreement::Undefined;
    }

    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    // Walk runs of equal scores, giving each member the mean rank of the run.
    let mut rank_sum_pos = 0.0f64;
    let mut i = 0;
    while i < pairs.len() {
        let mut j = i;
        while j + 1 < pairs.len() && pairs[j + 1].0 == pairs[i].0 {
            j += 1;
        }
        // ranks are 1-based: positions i..=j hold ranks (i+1)..=(j+1)
        let mean_rank = (i + j + 2) as f64 / 2.0;
        let positives_in_run = pairs[i..=j].iter().filter(|(_, p)| *p).count();
        rank_sum_pos += mean_rank * positives_in_run as f64;
        i = j + 1;
    }

    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    let u = rank_sum_pos - n_pos * (n_pos + 1.0) / 2.0;
    Agreement::Defined(u / (n_pos * n_neg))
}

/// Mean over the defined values only; None if every value is undefined.
pub fn mean_defined(values: &[Agreement]) -> Option<f64> {
    let defined: Vec<f64> = values.iter().filter_map(Agreement::value).collect();
    if defined.is_empty() {
        return None;
    }
    Some(defined.iter().sum::<f64>() / defined.len() as f64)
}
