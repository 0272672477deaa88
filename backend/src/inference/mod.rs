pub mod engine;
pub mod model;
pub mod preprocess;

pub use engine::{InferenceEngine, InferenceError};
pub use model::ModelVariant;

use shared::{ModelInfo, PredictionResult};

/// What the HTTP layer needs from a loaded model.
pub trait Classifier: Send + Sync {
    fn predict(&self, image: &[u8]) -> Result<PredictionResult, InferenceError>;

    /// Diagnostic metrics. Runs a synthetic forward pass on every call.
    fn model_info(&self) -> Result<ModelInfo, InferenceError>;

    fn variant(&self) -> ModelVariant;
}
