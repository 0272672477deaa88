use std::sync::Arc;

use crate::error::ApiError;
use crate::inference::Classifier;

/// Shared by every worker through `web::Data`. `classifier` is `None` when the
/// checkpoint failed to load at startup.
pub struct AppState {
    classifier: Option<Arc<dyn Classifier>>,
    max_upload_bytes: usize,
}

impl AppState {
    pub fn new(classifier: Option<Arc<dyn Classifier>>, max_upload_bytes: usize) -> Self {
        Self {
            classifier,
            max_upload_bytes,
        }
    }

    pub fn model_loaded(&self) -> bool {
        self.classifier.is_some()
    }

    pub fn classifier(&self) -> Result<Arc<dyn Classifier>, ApiError> {
        self.classifier.clone().ok_or(ApiError::ModelUnavailable)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }
}
