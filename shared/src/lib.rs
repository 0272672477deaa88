use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumCount, EnumIter, FromRepr};

pub const ANALYSIS_TYPE: &str = "CNN_Prediction";
pub const SERVICE_NAME: &str = "NeuroInsight CNN Service";

/// Diagnosis categories the classifier scores. The declaration order is the
/// order of the network's output logits.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumCount,
    FromRepr,
)]
#[repr(usize)]
pub enum ClassLabel {
    #[serde(rename = "Alzheimer Disease")]
    #[strum(serialize = "Alzheimer Disease")]
    AlzheimerDisease,
    #[serde(rename = "Mild Alzheimer Risk")]
    #[strum(serialize = "Mild Alzheimer Risk")]
    MildAlzheimerRisk,
    #[serde(rename = "Moderate Alzheimer Risk")]
    #[strum(serialize = "Moderate Alzheimer Risk")]
    ModerateAlzheimerRisk,
    #[serde(rename = "Very Mild Alzheimer Risk")]
    #[strum(serialize = "Very Mild Alzheimer Risk")]
    VeryMildAlzheimerRisk,
    #[serde(rename = "No Risk")]
    #[strum(serialize = "No Risk")]
    NoRisk,
    #[serde(rename = "Parkinson Disease")]
    #[strum(serialize = "Parkinson Disease")]
    ParkinsonDisease,
}

impl ClassLabel {
    pub const COUNT: usize = <Self as strum::EnumCount>::COUNT;

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::from_repr(index)
    }

    pub fn all() -> impl Iterator<Item = ClassLabel> {
        Self::iter()
    }

    pub fn description(self) -> &'static str {
        match self {
            ClassLabel::AlzheimerDisease => "Patient definitely has Alzheimer's disease",
            ClassLabel::MildAlzheimerRisk => {
                "Patient has a little more time to develop Alzheimer's disease"
            }
            ClassLabel::ModerateAlzheimerRisk => {
                "Patient may develop Alzheimer's disease in the near future"
            }
            ClassLabel::VeryMildAlzheimerRisk => {
                "Patient has time to reach the level of Alzheimer's disease"
            }
            ClassLabel::NoRisk => "Person does not have any risk",
            ClassLabel::ParkinsonDisease => "Person has Parkinson's disease",
        }
    }
}

/// JSON body accepted by `/predict` as an alternative to a multipart upload.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ImageRequest {
    /// Base64 image, optionally wrapped in a `data:image/...;base64,` header.
    pub image: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PredictionResult {
    pub predicted_class: String,
    pub predicted_class_index: usize,
    pub confidence: f64,
    pub confidence_percentage: f64,
    pub inference_time_ms: f64,
    pub all_class_probabilities: BTreeMap<String, f64>,
}

impl PredictionResult {
    /// Builds a result from a softmax distribution ordered like [`ClassLabel`].
    /// Returns `None` when the distribution does not have one entry per label
    /// or contains a non-finite value.
    pub fn from_probabilities(probabilities: &[f32], inference_time: Duration) -> Option<Self> {
        if probabilities.len() != ClassLabel::COUNT
            || !probabilities.iter().all(|p| p.is_finite())
        {
            return None;
        }

        // First maximum wins on ties, like torch.max.
        let (predicted_index, confidence) = probabilities.iter().enumerate().fold(
            (0usize, f32::NEG_INFINITY),
            |(best_idx, best), (idx, &p)| {
                if p > best {
                    (idx, p)
                } else {
                    (best_idx, best)
                }
            },
        );
        let label = ClassLabel::from_index(predicted_index)?;

        let all_class_probabilities = ClassLabel::all()
            .zip(probabilities)
            .map(|(label, &p)| (label.to_string(), p as f64))
            .collect();

        let confidence = confidence as f64;
        Some(Self {
            predicted_class: label.to_string(),
            predicted_class_index: predicted_index,
            confidence,
            confidence_percentage: confidence * 100.0,
            inference_time_ms: inference_time.as_secs_f64() * 1000.0,
            all_class_probabilities,
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PredictionResponse {
    #[serde(flatten)]
    pub result: PredictionResult,
    pub model_version: String,
    pub analysis_type: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub filename: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ModelInfo {
    pub model_type: String,
    pub parameters_million: f64,
    pub flops_billion: f64,
    pub inference_time_ms: f64,
    pub input_size: String,
    pub num_classes: usize,
    pub device: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    pub service: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ClassCatalog {
    pub classes: Vec<String>,
    pub num_classes: usize,
    pub descriptions: BTreeMap<String, String>,
}

impl ClassCatalog {
    pub fn new() -> Self {
        Self {
            classes: ClassLabel::all().map(|label| label.to_string()).collect(),
            num_classes: ClassLabel::COUNT,
            descriptions: ClassLabel::all()
                .map(|label| (label.to_string(), label.description().to_string()))
                .collect(),
        }
    }
}

impl Default for ClassCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ErrorResponse {
    pub error: String,
}
