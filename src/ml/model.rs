// ============================================================
// Layer 5 — Context Encoder
// ============================================================
// Encoder/decoder network that paints in the blanked centre of
// a window:
//
//   window [C, H, W]
//     │  strided conv (k, s=2, p=1) + BN + LeakyReLU(0.2)  × len(enc progression)
//     │  conv with kernel = remaining feature size + BN    → [bottleneck, 1, 1]
//     │  conv-transpose (k, s=1, p=0) + BN + ReLU          → [.., k, k]
//     │  conv-transpose (k, s=2, p=1) + BN + ReLU          × (len(dec progression) - 1)
//     ▼  conv-transpose (k, s=2, p=1)                     → [C or C*256, mask_h, mask_w]
//
// The first encoder layer and the last decoder layer carry no
// batch norm.
//
// Regression ends in tanh and predicts intensities in [-1, 1].
// Classification emits 256 logits per channel and pixel; the
// output channels are laid out channel-major, i.e. index
// c * 256 + intensity.
//
// Layer shapes are computed from the declared sizes by
// `ContextEncoderConfig::plan`, so construction never needs a
// dummy forward pass.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d,
    },
    prelude::*,
    tensor::activation::{leaky_relu, relu, tanh},
};
use serde::{Deserialize, Serialize};

use crate::domain::settings::{ConfigError, TaskKind};

/// Number of intensity classes per channel in classification mode.
pub const INTENSITY_CLASSES: usize = 256;

const LEAKY_SLOPE: f64 = 0.2;

/// Anything that maps a batch of patch inputs to patch outputs.
pub trait PatchModel<B: Backend> {
    /// inputs [N, C, window_h, window_w] → outputs [N, C or C*256, mask_h, mask_w]
    fn predict(&self, inputs: Tensor<B, 4>) -> Tensor<B, 4>;

    /// Channels of the images the model was built for.
    fn image_channels(&self) -> usize;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEncoderConfig {
    pub image_channels:          usize,
    /// Window size [rows, cols] fed to the encoder.
    pub input_size:              [usize; 2],
    /// Mask size [rows, cols] the decoder must produce.
    pub output_size:             [usize; 2],
    pub kernel_size:             usize,
    pub num_channels_enc:        usize,
    /// Multipliers of `num_channels_enc` for the strided encoder layers.
    pub channel_progression_enc: Vec<usize>,
    pub num_channels_bottleneck: usize,
    pub num_channels_dec:        usize,
    /// Multipliers of `num_channels_dec` for every decoder layer but the last.
    pub channel_progression_dec: Vec<usize>,
    pub task:                    TaskKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Conv,
    ConvTranspose,
}

/// Declared shape of one layer, derived without running the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerSpec {
    pub kind:         LayerKind,
    pub in_channels:  usize,
    pub out_channels: usize,
    pub kernel:       [usize; 2],
    pub stride:       usize,
    pub padding:      usize,
    pub out_size:     [usize; 2],
    /// Batch norm over `out_channels` before the activation.
    pub batch_norm:   bool,
}

impl ContextEncoderConfig {
    pub fn output_channels(&self) -> usize {
        match self.task {
            TaskKind::Classification => self.image_channels * INTENSITY_CLASSES,
            TaskKind::Regression     => self.image_channels,
        }
    }

    /// Compute every layer's shape, checking that the decoder ends at `output_size`.
    pub fn plan(&self) -> Result<(Vec<LayerSpec>, Vec<LayerSpec>), ConfigError> {
        if self.channel_progression_dec.is_empty() {
            return Err(ConfigError::Invalid("decoder needs at least one progression entry".into()));
        }
        let k = self.kernel_size;
        let mut size = self.input_size;
        let mut channels = self.image_channels;

        let mut encoder = Vec::with_capacity(self.channel_progression_enc.len() + 1);
        for (i, &mult) in self.channel_progression_enc.iter().enumerate() {
            let out_channels = self.num_channels_enc * mult;
            let mut out_size = [0; 2];
            for axis in 0..2 {
                if size[axis] + 2 < k {
                    return Err(ConfigError::Invalid(format!(
                        "encoder shrinks the window below the kernel size at {size:?}"
                    )));
                }
                out_size[axis] = (size[axis] + 2 - k) / 2 + 1;
            }
            encoder.push(LayerSpec {
                kind: LayerKind::Conv, in_channels: channels, out_channels,
                kernel: [k, k], stride: 2, padding: 1, out_size, batch_norm: i > 0,
            });
            channels = out_channels;
            size = out_size;
        }
        // bottleneck: kernel covers what is left, output is 1x1
        encoder.push(LayerSpec {
            kind: LayerKind::Conv, in_channels: channels, out_channels: self.num_channels_bottleneck,
            kernel: size, stride: 1, padding: 0, out_size: [1, 1],
            batch_norm: !self.channel_progression_enc.is_empty(),
        });
        channels = self.num_channels_bottleneck;
        size = [1, 1];

        let mut decoder = Vec::with_capacity(self.channel_progression_dec.len() + 1);
        for (i, &mult) in self.channel_progression_dec.iter().enumerate() {
            let (stride, padding) = if i == 0 { (1, 0) } else { (2, 1) };
            let out_channels = self.num_channels_dec * mult;
            let out_size = size.map(|s| transposed_size(s, k, stride, padding));
            decoder.push(LayerSpec {
                kind: LayerKind::ConvTranspose, in_channels: channels, out_channels,
                kernel: [k, k], stride, padding, out_size, batch_norm: true,
            });
            channels = out_channels;
            size = out_size;
        }
        let out_size = size.map(|s| transposed_size(s, k, 2, 1));
        decoder.push(LayerSpec {
            kind: LayerKind::ConvTranspose, in_channels: channels,
            out_channels: self.output_channels(), kernel: [k, k], stride: 2, padding: 1, out_size,
            batch_norm: false,
        });

        if out_size != self.output_size {
            return Err(ConfigError::Invalid(format!(
                "decoder produces {out_size:?} but the mask is {:?}; adjust the decoder progression",
                self.output_size
            )));
        }
        Ok((encoder, decoder))
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<ContextEncoder<B>, ConfigError> {
        let (enc_specs, dec_specs) = self.plan()?;
        let init = Initializer::Normal { mean: 0.0, std: 0.02 };

        let encoder = enc_specs
            .iter()
            .map(|s| {
                Conv2dConfig::new([s.in_channels, s.out_channels], s.kernel)
                    .with_stride([s.stride, s.stride])
                    .with_padding(PaddingConfig2d::Explicit(s.padding, s.padding))
                    .with_bias(false)
                    .with_initializer(init.clone())
                    .init(device)
            })
            .collect();
        let decoder = dec_specs
            .iter()
            .map(|s| {
                ConvTranspose2dConfig::new([s.in_channels, s.out_channels], s.kernel)
                    .with_stride([s.stride, s.stride])
                    .with_padding([s.padding, s.padding])
                    .with_bias(false)
                    .with_initializer(init.clone())
                    .init(device)
            })
            .collect();

        let norms = |specs: &[LayerSpec]| -> Vec<Option<BatchNorm<B>>> {
            specs
                .iter()
                .map(|s| s.batch_norm.then(|| BatchNormConfig::new(s.out_channels).init(device)))
                .collect()
        };

        Ok(ContextEncoder {
            encoder,
            encoder_norms: norms(&enc_specs),
            decoder,
            decoder_norms: norms(&dec_specs),
            image_channels: self.image_channels,
            classification: self.task == TaskKind::Classification,
        })
    }
}

fn transposed_size(input: usize, kernel: usize, stride: usize, padding: usize) -> usize {
    (input - 1) * stride + kernel - 2 * padding
}

#[derive(Module, Debug)]
pub struct ContextEncoder<B: Backend> {
    pub encoder:        Vec<Conv2d<B>>,
    pub encoder_norms:  Vec<Option<BatchNorm<B>>>,
    pub decoder:        Vec<ConvTranspose2d<B>>,
    pub decoder_norms:  Vec<Option<BatchNorm<B>>>,
    pub image_channels: usize,
    pub classification: bool,
}

impl<B: Backend> ContextEncoder<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = x;
        for (conv, norm) in self.encoder.iter().zip(&self.encoder_norms) {
            x = conv.forward(x);
            if let Some(norm) = norm {
                x = norm.forward(x);
            }
            x = leaky_relu(x, LEAKY_SLOPE);
        }
        let last = self.decoder.len() - 1;
        for (i, (deconv, norm)) in self.decoder.iter().zip(&self.decoder_norms).enumerate() {
            x = deconv.forward(x);
            if let Some(norm) = norm {
                x = norm.forward(x);
            }
            if i < last {
                x = relu(x);
            } else if !self.classification {
                x = tanh(x);
            }
        }
        x
    }
}

impl<B: Backend> PatchModel<B> for ContextEncoder<B> {
    fn predict(&self, inputs: Tensor<B, 4>) -> Tensor<B, 4> {
        self.forward(inputs)
    }

    fn image_channels(&self) -> usize {
        self.image_channels
    }
}

/// [N, C*256, h, w] → [N*C*h*w, 256], one row of intensity logits per pixel value.
pub fn class_logits<B: Backend>(output: Tensor<B, 4>, channels: usize) -> Tensor<B, 2> {
    let [n, _, h, w] = output.dims();
    output
        .reshape([n, channels, INTENSITY_CLASSES, h, w])
        .permute([0, 1, 3, 4, 2])
        .reshape([n * channels * h * w, INTENSITY_CLASSES])
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    /// 16x16 window → 8x8 mask with small channel counts.
    pub(crate) fn small_config(task: TaskKind) -> ContextEncoderConfig {
        ContextEncoderConfig {
            image_channels:          1,
            input_size:              [16, 16],
            output_size:             [8, 8],
            kernel_size:             4,
            num_channels_enc:        4,
            channel_progression_enc: vec![1, 2],
            num_channels_bottleneck: 8,
            num_channels_dec:        4,
            channel_progression_dec: vec![2],
            task,
        }
    }

    #[test]
    fn test_plan_shapes() {
        let (enc, dec) = small_config(TaskKind::Regression).plan().unwrap();
        let enc_sizes: Vec<[usize; 2]> = enc.iter().map(|s| s.out_size).collect();
        let dec_sizes: Vec<[usize; 2]> = dec.iter().map(|s| s.out_size).collect();
        assert_eq!(enc_sizes, vec![[8, 8], [4, 4], [1, 1]]);
        assert_eq!(enc[2].kernel, [4, 4]);
        assert_eq!(dec_sizes, vec![[4, 4], [8, 8]]);
        assert_eq!(dec[0].stride, 1);
        assert_eq!(dec.last().unwrap().out_channels, 1);

        let enc_norms: Vec<bool> = enc.iter().map(|s| s.batch_norm).collect();
        let dec_norms: Vec<bool> = dec.iter().map(|s| s.batch_norm).collect();
        assert_eq!(enc_norms, vec![false, true, true]);
        assert_eq!(dec_norms, vec![true, false]);
    }

    #[test]
    fn test_batch_norm_layers_follow_plan() {
        let device = Default::default();
        let model  = small_config(TaskKind::Regression).init::<TestBackend>(&device).unwrap();
        let widths = |norms: &[Option<BatchNorm<TestBackend>>]| -> Vec<Option<usize>> {
            norms.iter().map(|n| n.as_ref().map(|bn| bn.gamma.val().dims()[0])).collect()
        };
        assert_eq!(widths(&model.encoder_norms), vec![None, Some(8), Some(8)]);
        assert_eq!(widths(&model.decoder_norms), vec![Some(8), None]);
    }

    #[test]
    fn test_plan_rejects_wrong_output_size() {
        let mut cfg = small_config(TaskKind::Regression);
        cfg.output_size = [16, 16];
        assert!(cfg.plan().is_err());
    }

    #[test]
    fn test_forward_shapes() {
        let device = Default::default();
        let input  = Tensor::<TestBackend, 4>::zeros([2, 1, 16, 16], &device);

        let reg = small_config(TaskKind::Regression).init::<TestBackend>(&device).unwrap();
        assert_eq!(reg.predict(input.clone()).dims(), [2, 1, 8, 8]);

        let cls = small_config(TaskKind::Classification).init::<TestBackend>(&device).unwrap();
        let out = cls.predict(input);
        assert_eq!(out.dims(), [2, 256, 8, 8]);
        assert_eq!(class_logits(out, 1).dims(), [2 * 64, 256]);
    }

    #[test]
    fn test_regression_output_bounded() {
        let device = Default::default();
        let model  = small_config(TaskKind::Regression).init::<TestBackend>(&device).unwrap();
        let input  = Tensor::<TestBackend, 4>::ones([1, 1, 16, 16], &device).mul_scalar(5.0);
        let values = model.predict(input).into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn test_class_logits_layout() {
        let device = Default::default();
        // one pixel, two channels: channel c, class k holds c * 1000 + k
        let values: Vec<f32> = (0..2)
            .flat_map(|c| (0..INTENSITY_CLASSES).map(move |k| (c * 1000 + k) as f32))
            .collect();
        let output = Tensor::<TestBackend, 4>::from_data(
            burn::tensor::TensorData::new(values, [1, 2 * INTENSITY_CLASSES, 1, 1]),
            &device,
        );
        let rows = class_logits(output, 2).into_data().to_vec::<f32>().unwrap();
        assert_eq!(rows[0], 0.0);
        assert_eq!(rows[255], 255.0);
        assert_eq!(rows[256], 1000.0);
    }
}
