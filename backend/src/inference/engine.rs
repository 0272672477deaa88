use log::{debug, info};
use shared::{ClassLabel, ModelInfo, PredictionResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tch::{nn, Device, Kind, TchError, Tensor};

use super::model::{ModelVariant, SimpleCnn, INPUT_CHANNELS, INPUT_SIZE};
use super::preprocess;
use super::Classifier;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Error processing image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Preprocessing error: {0}")]
    PreprocessingError(String),
    #[error("Prediction error: {0}")]
    ModelError(#[from] TchError),
    #[error("Failed to read checkpoint {path}: {source}")]
    Checkpoint { path: PathBuf, source: TchError },
    #[error("Checkpoint is missing parameter '{0}'")]
    MissingParameter(String),
    #[error("Checkpoint has unexpected parameter '{0}'")]
    UnexpectedParameter(String),
    #[error("Shape mismatch for '{name}': model expects {expected:?}, checkpoint has {found:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<i64>,
        found: Vec<i64>,
    },
    #[error("Model produced {0} probabilities, expected {expected}", expected = ClassLabel::COUNT)]
    OutputWidth(usize),
    #[error("Model produced a non-finite probability")]
    NonFiniteOutput,
}

/// A loaded network plus the var store that owns its weights. Weights are
/// never written after construction, so the engine is shared without locking.
pub struct InferenceEngine {
    vs: nn::VarStore,
    network: SimpleCnn,
    variant: ModelVariant,
}

impl InferenceEngine {
    /// Builds a randomly initialised network on `device`.
    pub fn new(variant: ModelVariant, device: Device) -> Self {
        let vs = nn::VarStore::new(device);
        let network = SimpleCnn::new(&vs.root(), variant);
        Self {
            vs,
            network,
            variant,
        }
    }

    /// Builds the `variant` architecture on the best available device and
    /// loads `path` into it strictly.
    pub fn load<P: AsRef<Path>>(path: P, variant: ModelVariant) -> Result<Self, InferenceError> {
        let device = Device::cuda_if_available();
        let mut engine = Self::new(variant, device);
        engine.load_weights(path.as_ref())?;
        info!(
            "Loaded {} ({} parameters) from {} on {}",
            variant.model_version(),
            engine.parameter_count(),
            path.as_ref().display(),
            device_label(device)
        );
        Ok(engine)
    }

    /// Copies every parameter from the checkpoint. Missing parameters, extra
    /// parameters and shape mismatches are all errors.
    pub fn load_weights(&mut self, path: &Path) -> Result<(), InferenceError> {
        let mut checkpoint: HashMap<String, Tensor> = read_checkpoint(path, self.vs.device())
            .map_err(|source| InferenceError::Checkpoint {
                path: path.to_path_buf(),
                source,
            })?
            .into_iter()
            .collect();

        let mut variables = self.vs.variables();
        if let Some(extra) = checkpoint.keys().find(|name| !variables.contains_key(*name)) {
            return Err(InferenceError::UnexpectedParameter(extra.clone()));
        }

        tch::no_grad(|| -> Result<(), InferenceError> {
            for (name, var) in variables.iter_mut() {
                let source = checkpoint
                    .remove(name)
                    .ok_or_else(|| InferenceError::MissingParameter(name.clone()))?;
                if source.size() != var.size() {
                    return Err(InferenceError::ShapeMismatch {
                        name: name.clone(),
                        expected: var.size(),
                        found: source.size(),
                    });
                }
                var.f_copy_(&source)?;
                debug!("Loaded parameter {} {:?}", name, var.size());
            }
            Ok(())
        })
    }

    pub fn device(&self) -> Device {
        self.vs.device()
    }

    pub fn parameter_count(&self) -> usize {
        self.vs.trainable_variables().iter().map(Tensor::numel).sum()
    }

    fn input_tensor(&self, bytes: &[u8]) -> Result<Tensor, InferenceError> {
        let batch = preprocess::preprocess(bytes)?;
        let data = batch.as_slice().ok_or_else(|| {
            InferenceError::PreprocessingError("input batch is not contiguous".to_string())
        })?;
        let tensor = Tensor::f_from_slice(data)?
            .f_view([1, INPUT_CHANNELS, INPUT_SIZE, INPUT_SIZE])?
            .to_device(self.device());
        Ok(tensor)
    }

    /// Runs the network on one batch and returns softmax probabilities along
    /// with the time spent in the forward pass.
    fn probabilities(&self, input: &Tensor) -> Result<(Vec<f32>, Duration), InferenceError> {
        tch::no_grad(|| -> Result<(Vec<f32>, Duration), InferenceError> {
            let start = Instant::now();
            let logits = self.network.f_forward_t(input, false)?;
            let elapsed = start.elapsed();

            let probabilities = logits
                .f_softmax(-1, Kind::Float)?
                .f_squeeze_dim(0)?
                .to_device(Device::Cpu);
            let probabilities = Vec::<f32>::try_from(&probabilities)?;
            Ok((probabilities, elapsed))
        })
    }
}

impl Classifier for InferenceEngine {
    fn predict(&self, image: &[u8]) -> Result<PredictionResult, InferenceError> {
        let input = self.input_tensor(image)?;
        let (probabilities, elapsed) = self.probabilities(&input)?;
        PredictionResult::from_probabilities(&probabilities, elapsed).ok_or_else(|| {
            if probabilities.len() != ClassLabel::COUNT {
                InferenceError::OutputWidth(probabilities.len())
            } else {
                InferenceError::NonFiniteOutput
            }
        })
    }

    fn model_info(&self) -> Result<ModelInfo, InferenceError> {
        let input = Tensor::f_randn(
            [1, INPUT_CHANNELS, INPUT_SIZE, INPUT_SIZE],
            (Kind::Float, self.device()),
        )?;
        let elapsed = tch::no_grad(|| -> Result<Duration, InferenceError> {
            let start = Instant::now();
            let _ = self.network.f_forward_t(&input, false)?;
            Ok(start.elapsed())
        })?;

        let macs = self.variant.spec().multiply_accumulates();
        Ok(ModelInfo {
            model_type: self.variant.tag().to_string(),
            parameters_million: round2(self.parameter_count() as f64 / 1e6),
            flops_billion: round2(macs as f64 / 1e9),
            inference_time_ms: round2(elapsed.as_secs_f64() * 1000.0),
            input_size: format!("{INPUT_SIZE}x{INPUT_SIZE}"),
            num_classes: ClassLabel::COUNT,
            device: device_label(self.device()),
        })
    }

    fn variant(&self) -> ModelVariant {
        self.variant
    }
}

fn read_checkpoint(path: &Path, device: Device) -> Result<Vec<(String, Tensor)>, TchError> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("safetensors") => Tensor::read_safetensors(path),
        _ => Tensor::load_multi_with_device(path, device),
    }
}

pub fn device_label(device: Device) -> String {
    match device {
        Device::Cpu => "cpu".to_string(),
        Device::Cuda(_) => "cuda".to_string(),
        other => format!("{:?}", other).to_lowercase(),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png(color: [u8; 3], width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn temp_checkpoint(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "neuroinsight-{}-{}.safetensors",
            std::process::id(),
            name
        ))
    }

    fn assert_same_distribution(a: &PredictionResult, b: &PredictionResult) {
        assert_eq!(a.predicted_class_index, b.predicted_class_index);
        for (label, p) in &a.all_class_probabilities {
            assert!((p - b.all_class_probabilities[label]).abs() < 1e-6, "{label}");
        }
    }

    fn narrow_engine(seed: i64) -> InferenceEngine {
        tch::manual_seed(seed);
        InferenceEngine::new(ModelVariant::Narrow, Device::Cpu)
    }

    #[test]
    fn prediction_is_a_distribution_over_all_labels() {
        let engine = narrow_engine(1);
        let result = engine.predict(&png([90, 120, 30], 300, 180)).unwrap();

        assert_eq!(result.all_class_probabilities.len(), ClassLabel::COUNT);
        for label in ClassLabel::all() {
            let p = result.all_class_probabilities[&label.to_string()];
            assert!((0.0..=1.0).contains(&p));
        }
        let sum: f64 = result.all_class_probabilities.values().sum();
        assert!((sum - 1.0).abs() < 1e-3);

        let best = ClassLabel::all()
            .max_by(|a, b| {
                let pa = result.all_class_probabilities[&a.to_string()];
                let pb = result.all_class_probabilities[&b.to_string()];
                pa.total_cmp(&pb)
            })
            .unwrap();
        assert_eq!(
            result.all_class_probabilities[&best.to_string()],
            result.confidence
        );
        assert_eq!(
            ClassLabel::from_index(result.predicted_class_index)
                .unwrap()
                .to_string(),
            result.predicted_class
        );
        assert!((result.confidence_percentage - result.confidence * 100.0).abs() < 1e-9);
        assert!(result.inference_time_ms >= 0.0);
    }

    #[test]
    fn repeated_predictions_are_identical() {
        let engine = narrow_engine(2);
        let bytes = png([128, 128, 128], 224, 224);
        let first = engine.predict(&bytes).unwrap();
        let second = engine.predict(&bytes).unwrap();
        assert_same_distribution(&first, &second);
    }

    #[test]
    fn undecodable_bytes_are_a_decode_error() {
        let engine = narrow_engine(3);
        let err = engine.predict(b"GIF89a-but-not-really").unwrap_err();
        assert!(matches!(err, InferenceError::Decode(_)));
    }

    #[test]
    fn model_info_reports_costs_and_metadata() {
        let engine = narrow_engine(4);
        let info = engine.model_info().unwrap();

        assert_eq!(info.model_type, "f");
        assert_eq!(info.parameters_million, 12.87);
        assert_eq!(info.flops_billion, 0.15);
        assert_eq!(info.input_size, "224x224");
        assert_eq!(info.num_classes, 6);
        assert_eq!(info.device, "cpu");
        assert!(info.inference_time_ms >= 0.0);
    }

    #[test]
    fn parameter_count_matches_layer_arithmetic() {
        let engine = narrow_engine(5);
        assert_eq!(
            engine.parameter_count() as u64,
            ModelVariant::Narrow.spec().parameter_count()
        );
    }

    #[test]
    fn saved_weights_reload_to_identical_predictions() {
        let path = temp_checkpoint("roundtrip");
        let original = narrow_engine(6);
        original.vs.save(&path).unwrap();

        let mut reloaded = narrow_engine(7);
        reloaded.load_weights(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let bytes = png([40, 200, 90], 64, 64);
        assert_same_distribution(
            &original.predict(&bytes).unwrap(),
            &reloaded.predict(&bytes).unwrap(),
        );
    }

    #[test]
    fn checkpoint_with_extra_layers_is_rejected() {
        let path = temp_checkpoint("extra");
        let source = nn::VarStore::new(Device::Cpu);
        let _net = SimpleCnn::new(&source.root(), ModelVariant::Narrow);
        let _ = (source.root() / "conv4").zeros("weight", &[8, 64, 3, 3]);
        source.save(&path).unwrap();

        let mut engine = narrow_engine(8);
        let err = engine.load_weights(&path).unwrap_err();
        std::fs::remove_file(&path).ok();

        assert!(
            matches!(err, InferenceError::UnexpectedParameter(ref name) if name == "conv4.weight")
        );
    }

    #[test]
    fn checkpoint_with_other_widths_is_rejected() {
        let path = temp_checkpoint("widths");
        narrow_engine(9).vs.save(&path).unwrap();

        let mut standard = InferenceEngine::new(ModelVariant::Standard, Device::Cpu);
        let err = standard.load_weights(&path).unwrap_err();
        std::fs::remove_file(&path).ok();

        assert!(matches!(err, InferenceError::ShapeMismatch { .. }));
    }

    #[test]
    fn checkpoint_missing_layers_is_rejected() {
        let path = temp_checkpoint("missing");
        let source = nn::VarStore::new(Device::Cpu);
        let _ = (source.root() / "conv1").zeros("weight", &[16, 3, 3, 3]);
        source.save(&path).unwrap();

        let mut engine = narrow_engine(10);
        let err = engine.load_weights(&path).unwrap_err();
        std::fs::remove_file(&path).ok();

        assert!(matches!(err, InferenceError::MissingParameter(_)));
    }

    #[test]
    fn wide_model_info_runs_four_blocks() {
        tch::manual_seed(12);
        let engine = InferenceEngine::new(ModelVariant::Wide, Device::Cpu);
        let info = engine.model_info().unwrap();

        assert_eq!(info.model_type, "q");
        assert_eq!(info.parameters_million, 104.32);
        assert_eq!(info.flops_billion, 2.96);
        assert_eq!(info.num_classes, 6);
    }

    #[test]
    fn standard_model_info_matches_layer_arithmetic() {
        tch::manual_seed(13);
        let engine = InferenceEngine::new(ModelVariant::Standard, Device::Cpu);
        let info = engine.model_info().unwrap();

        assert_eq!(info.model_type, "c");
        assert_eq!(info.parameters_million, 51.48);
        assert_eq!(info.flops_billion, 0.56);
    }

    #[test]
    fn missing_checkpoint_fails_construction() {
        let result = InferenceEngine::load("/nonexistent/Vbai-2.1c.pt", ModelVariant::Standard);
        assert!(matches!(result, Err(InferenceError::Checkpoint { .. })));
    }

    #[test]
    fn device_labels() {
        assert_eq!(device_label(Device::Cpu), "cpu");
        assert_eq!(device_label(Device::Cuda(0)), "cuda");
    }
}
