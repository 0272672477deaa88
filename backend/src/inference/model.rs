use serde::{Deserialize, Serialize};
use shared::ClassLabel;
use std::fmt;
use std::str::FromStr;
use tch::{nn, TchError, Tensor};

pub const INPUT_SIZE: i64 = 224;
pub const INPUT_CHANNELS: i64 = 3;
const KERNEL_SIZE: i64 = 3;

/// The three published sizes of the classifier. Serialized as the tag letter
/// used in checkpoint names (`Vbai-2.1c.pt` and friends).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ModelVariant {
    #[serde(rename = "f", alias = "narrow")]
    Narrow,
    #[default]
    #[serde(rename = "c", alias = "standard")]
    Standard,
    #[serde(rename = "q", alias = "wide")]
    Wide,
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown model variant '{0}', expected one of f/narrow, c/standard, q/wide")]
pub struct UnknownVariant(pub String);

impl ModelVariant {
    pub fn tag(self) -> &'static str {
        match self {
            ModelVariant::Narrow => "f",
            ModelVariant::Standard => "c",
            ModelVariant::Wide => "q",
        }
    }

    pub fn model_version(self) -> String {
        format!("Vbai-DPA 2.1{}", self.tag())
    }

    pub fn spec(self) -> VariantSpec {
        match self {
            ModelVariant::Narrow => VariantSpec {
                conv_channels: &[16, 32, 64],
                hidden_units: 256,
                dropout: 0.5,
            },
            ModelVariant::Standard => VariantSpec {
                conv_channels: &[32, 64, 128],
                hidden_units: 512,
                dropout: 0.5,
            },
            ModelVariant::Wide => VariantSpec {
                conv_channels: &[64, 128, 256, 512],
                hidden_units: 1024,
                dropout: 0.3,
            },
        }
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ModelVariant {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "f" | "narrow" => Ok(ModelVariant::Narrow),
            "c" | "standard" => Ok(ModelVariant::Standard),
            "q" | "wide" => Ok(ModelVariant::Wide),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

/// Layer widths of one variant. Every conv block halves the spatial size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariantSpec {
    pub conv_channels: &'static [i64],
    pub hidden_units: i64,
    pub dropout: f64,
}

impl VariantSpec {
    /// Spatial side length after the last pooling stage.
    pub fn feature_map_side(&self) -> i64 {
        INPUT_SIZE >> self.conv_channels.len()
    }

    pub fn flattened_features(&self) -> i64 {
        let side = self.feature_map_side();
        self.last_channels() * side * side
    }

    fn last_channels(&self) -> i64 {
        self.conv_channels.last().copied().unwrap_or(INPUT_CHANNELS)
    }

    /// Weights plus biases of every layer.
    pub fn parameter_count(&self) -> u64 {
        let mut in_channels = INPUT_CHANNELS;
        let mut total = 0;
        for &out in self.conv_channels {
            total += (out * in_channels * KERNEL_SIZE * KERNEL_SIZE + out) as u64;
            in_channels = out;
        }
        total += (self.flattened_features() * self.hidden_units + self.hidden_units) as u64;
        let classes = ClassLabel::COUNT as i64;
        total += (self.hidden_units * classes + classes) as u64;
        total
    }

    /// Multiply-accumulate operations for one image. Biases, activations,
    /// pooling and dropout count as zero.
    pub fn multiply_accumulates(&self) -> u64 {
        let mut in_channels = INPUT_CHANNELS;
        let mut side = INPUT_SIZE;
        let mut total = 0;
        for &out in self.conv_channels {
            total += (out * side * side * in_channels * KERNEL_SIZE * KERNEL_SIZE) as u64;
            in_channels = out;
            side /= 2;
        }
        total += (self.flattened_features() * self.hidden_units) as u64;
        total += (self.hidden_units * ClassLabel::COUNT as i64) as u64;
        total
    }
}

/// Conv/pool stack with a two-layer fully connected head. Parameter names
/// follow the PyTorch state dict (`conv1.weight`, ..., `fc2.bias`).
#[derive(Debug)]
pub struct SimpleCnn {
    convs: Vec<nn::Conv2D>,
    fc1: nn::Linear,
    fc2: nn::Linear,
    dropout: f64,
}

impl SimpleCnn {
    pub fn new(vs: &nn::Path, variant: ModelVariant) -> Self {
        let spec = variant.spec();

        let mut convs = Vec::with_capacity(spec.conv_channels.len());
        let mut in_channels = INPUT_CHANNELS;
        for (i, &out_channels) in spec.conv_channels.iter().enumerate() {
            let config = nn::ConvConfig {
                stride: 1,
                padding: 1,
                ..Default::default()
            };
            convs.push(nn::conv2d(
                vs / format!("conv{}", i + 1),
                in_channels,
                out_channels,
                KERNEL_SIZE,
                config,
            ));
            in_channels = out_channels;
        }

        let fc1 = nn::linear(
            vs / "fc1",
            spec.flattened_features(),
            spec.hidden_units,
            Default::default(),
        );
        let fc2 = nn::linear(
            vs / "fc2",
            spec.hidden_units,
            ClassLabel::COUNT as i64,
            Default::default(),
        );

        Self {
            convs,
            fc1,
            fc2,
            dropout: spec.dropout,
        }
    }

    /// Returns raw logits of shape `[batch, 6]`. Dropout is only applied when
    /// `train` is set.
    pub fn f_forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor, TchError> {
        let mut xs = xs.shallow_clone();
        for conv in &self.convs {
            xs = xs
                .f_conv2d(&conv.ws, conv.bs.as_ref(), [1, 1], [1, 1], [1, 1], 1)?
                .f_relu()?
                .f_max_pool2d([2, 2], [2, 2], [0, 0], [1, 1], false)?;
        }
        xs.f_flatten(1, -1)?
            .f_linear(&self.fc1.ws, self.fc1.bs.as_ref())?
            .f_relu()?
            .f_dropout(self.dropout, train)?
            .f_linear(&self.fc2.ws, self.fc2.bs.as_ref())
    }
}
