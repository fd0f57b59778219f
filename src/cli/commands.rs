// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `train` and `detect`, and all
// their flags. Option sets (task, loss, aggregation, measure,
// resize) are ValueEnums from the domain layer, so clap rejects
// unknown values before anything runs.

use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::application::{detect_use_case::DetectConfig, train_use_case::TrainConfig};
use crate::domain::{
    patch::Margin,
    settings::{parse_margin, AggregationMethod, AnomalyMeasure, LossKind, ResizeMode, ResumeMode, TaskKind},
};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a context encoder on image patches
    Train(TrainArgs),

    /// Build anomaly maps with a trained experiment's best checkpoint
    Detect(DetectArgs),
}

/// Parse "rows,cols" or a single value used for both axes.
pub fn parse_size(s: &str) -> Result<[usize; 2], String> {
    let parse = |v: &str| v.trim().parse::<usize>().map_err(|_| format!("invalid size '{s}'"));
    match s.split_once(',') {
        Some((rows, cols)) => Ok([parse(rows)?, parse(cols)?]),
        None => {
            let v = parse(s)?;
            Ok([v, v])
        }
    }
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Name of the run; outputs go to <results_dir>/<experiment_name>
    #[arg(long, default_value = "context_encoder")]
    pub experiment_name: String,

    #[arg(long, default_value = "results")]
    pub results_dir: PathBuf,

    /// Directory holding train/, val/ and test/ splits
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    /// 1 for grayscale, 3 for RGB
    #[arg(long, default_value_t = 1)]
    pub image_channels: usize,

    /// Rescale images (not labels) by this factor before cutting windows
    #[arg(long)]
    pub scale_image: Option<f32>,

    /// Window size, "rows,cols" or a single value
    #[arg(long, value_parser = parse_size, default_value = "64,64")]
    pub window: [usize; 2],

    /// Size of the blanked centre the model paints in
    #[arg(long, value_parser = parse_size, default_value = "32,32")]
    pub mask: [usize; 2],

    /// Step between neighbouring windows
    #[arg(long, value_parser = parse_size, default_value = "32,32")]
    pub stride: [usize; 2],

    #[arg(long, value_enum, default_value_t = TaskKind::Regression)]
    pub task: TaskKind,

    #[arg(long, value_enum, default_value_t = LossKind::L2)]
    pub loss: LossKind,

    #[arg(long, default_value_t = 100)]
    pub num_epochs: usize,

    #[arg(long, default_value_t = 100)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 2e-4)]
    pub learning_rate: f64,

    #[arg(long, default_value_t = 0.9)]
    pub beta_1: f32,

    #[arg(long, default_value_t = 0.999)]
    pub beta_2: f32,

    #[arg(long, default_value_t = 0.0)]
    pub weight_decay: f32,

    #[arg(long, default_value_t = 7112018)]
    pub seed: u64,

    #[arg(long, default_value_t = 1)]
    pub num_workers: usize,

    /// "fresh", "latest" or an epoch index
    #[arg(long, default_value = "fresh")]
    pub resume: ResumeMode,

    #[arg(long, default_value_t = 4)]
    pub kernel_size: usize,

    #[arg(long, default_value_t = 64)]
    pub num_channels_enc: usize,

    /// Channel multipliers of the strided encoder layers
    #[arg(long, value_delimiter = ',', default_values_t = [1, 2, 4, 8])]
    pub channel_progression_enc: Vec<usize>,

    #[arg(long, default_value_t = 4000)]
    pub num_channels_bottleneck: usize,

    #[arg(long, default_value_t = 64)]
    pub num_channels_dec: usize,

    /// Channel multipliers of every decoder layer but the last
    #[arg(long, value_delimiter = ',', default_values_t = [8, 4, 2])]
    pub channel_progression_dec: Vec<usize>,
}

/// The application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            experiment_name:         a.experiment_name,
            results_dir:             a.results_dir,
            data_dir:                a.data_dir,
            image_channels:          a.image_channels,
            scale_image:             a.scale_image,
            window:                  a.window,
            mask:                    a.mask,
            stride:                  a.stride,
            task:                    a.task,
            loss:                    a.loss,
            num_epochs:              a.num_epochs,
            batch_size:              a.batch_size,
            learning_rate:           a.learning_rate,
            beta_1:                  a.beta_1,
            beta_2:                  a.beta_2,
            weight_decay:            a.weight_decay,
            seed:                    a.seed,
            num_workers:             a.num_workers,
            resume:                  a.resume,
            kernel_size:             a.kernel_size,
            num_channels_enc:        a.num_channels_enc,
            channel_progression_enc: a.channel_progression_enc,
            num_channels_bottleneck: a.num_channels_bottleneck,
            num_channels_dec:        a.num_channels_dec,
            channel_progression_dec: a.channel_progression_dec,
        }
    }
}

#[derive(Args, Debug)]
pub struct DetectArgs {
    /// Trained experiment to take the best checkpoint from
    #[arg(long)]
    pub experiment_name: String,

    /// Name of this detection run
    #[arg(long, default_value = "detection")]
    pub detection_name: String,

    #[arg(long, default_value = "results")]
    pub results_dir: PathBuf,

    /// Use a different data directory than the one stored at training time
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// How overlapping window scores are combined per pixel
    #[arg(long, value_enum, default_value_t = AggregationMethod::Mean)]
    pub aggregation: AggregationMethod,

    /// Border ignored when scoring, "rows,cols"
    #[arg(long, value_parser = parse_margin)]
    pub margin: Option<Margin>,

    #[arg(long, value_enum, default_value_t = AnomalyMeasure::AbsoluteDistance)]
    pub measure: AnomalyMeasure,

    /// Interpolation when maps are resized back to label resolution
    #[arg(long, value_enum, default_value_t = ResizeMode::Nearest)]
    pub resize_mode: ResizeMode,

    /// Do not write anomaly maps to disk
    #[arg(long)]
    pub no_save_maps: bool,

    #[arg(long, default_value_t = 100)]
    pub batch_size: usize,

    /// Append to existing per-image tables instead of overwriting them
    #[arg(long)]
    pub append_statistics: bool,
}

impl From<DetectArgs> for DetectConfig {
    fn from(a: DetectArgs) -> Self {
        DetectConfig {
            experiment_name:   a.experiment_name,
            detection_name:    a.detection_name,
            results_dir:       a.results_dir,
            data_dir:          a.data_dir,
            aggregation:       a.aggregation,
            margin:            a.margin,
            measure:           a.measure,
            resize_mode:       a.resize_mode,
            save_maps:         !a.no_save_maps,
            batch_size:        a.batch_size,
            append_statistics: a.append_statistics,
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("64,32"), Ok([64, 32]));
        assert_eq!(parse_size("16"), Ok([16, 16]));
        assert!(parse_size("a,b").is_err());
    }

    #[test]
    fn test_train_defaults_match_config_defaults() {
        let cli = Cli::try_parse_from(["inpaint-anomaly", "train"]).unwrap();
        let Commands::Train(args) = cli.command else { panic!("expected train") };
        let cfg: TrainConfig = args.into();
        let default = TrainConfig::default();
        assert_eq!(cfg.window, default.window);
        assert_eq!(cfg.channel_progression_enc, default.channel_progression_enc);
        assert_eq!(cfg.channel_progression_dec, default.channel_progression_dec);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_train_flags() {
        let cli = Cli::try_parse_from([
            "inpaint-anomaly", "train",
            "--task", "classification", "--loss", "cross_entropy",
            "--resume", "3", "--window", "32", "--channel-progression-dec", "4,2",
        ])
        .unwrap();
        let Commands::Train(args) = cli.command else { panic!("expected train") };
        let cfg: TrainConfig = args.into();
        assert_eq!(cfg.task, TaskKind::Classification);
        assert_eq!(cfg.loss, LossKind::CrossEntropy);
        assert_eq!(cfg.resume, ResumeMode::FromEpoch(3));
        assert_eq!(cfg.window, [32, 32]);
        assert_eq!(cfg.channel_progression_dec, vec![4, 2]);
    }

    #[test]
    fn test_detect_flags() {
        let cli = Cli::try_parse_from([
            "inpaint-anomaly", "detect",
            "--experiment-name", "ce", "--aggregation", "min",
            "--margin", "8,4", "--measure", "likelihood", "--no-save-maps",
        ])
        .unwrap();
        let Commands::Detect(args) = cli.command else { panic!("expected detect") };
        let cfg: DetectConfig = args.into();
        assert_eq!(cfg.aggregation, AggregationMethod::Min);
        assert_eq!(cfg.margin, Some(Margin::new(8, 4)));
        assert_eq!(cfg.measure, AnomalyMeasure::Likelihood);
        assert!(!cfg.save_maps);
    }

    #[test]
    fn test_rejects_unknown_values() {
        assert!(Cli::try_parse_from(["inpaint-anomaly", "train", "--loss", "hinge"]).is_err());
        assert!(Cli::try_parse_from(["inpaint-anomaly", "train", "--resume", "soon"]).is_err());
        assert!(Cli::try_parse_from(["inpaint-anomaly", "detect", "--experiment-name", "x", "--margin", "8"]).is_err());
    }
}
