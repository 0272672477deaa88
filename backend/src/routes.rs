use actix_web::{web, HttpRequest, HttpResponse};
use log::info;
use shared::{ClassCatalog, HealthResponse, PredictionResponse, ANALYSIS_TYPE, SERVICE_NAME};
use std::sync::Arc;

use crate::error::ApiError;
use crate::inference::Classifier;
use crate::state::AppState;
use crate::upload::{self, NO_IMAGE_DATA};

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/model-info").route(web::get().to(model_info)))
        .service(web::resource("/classes").route(web::get().to(classes)))
        .service(web::resource("/predict").route(web::post().to(predict)))
        .service(web::resource("/predict-file").route(web::post().to(predict_file)));
}

async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        model_loaded: state.model_loaded(),
        service: SERVICE_NAME.to_string(),
    })
}

async fn model_info(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let classifier = state.classifier()?;
    let info = web::block(move || classifier.model_info())
        .await?
        .map_err(|e| ApiError::Inference(format!("Error getting model info: {}", e)))?;
    Ok(HttpResponse::Ok().json(info))
}

async fn classes(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    state.classifier()?;
    Ok(HttpResponse::Ok().json(ClassCatalog::new()))
}

/// Accepts a multipart `image` field or a JSON body with a base64 `image`.
async fn predict(
    req: HttpRequest,
    payload: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let classifier = state.classifier()?;
    let limit = state.max_upload_bytes();

    let image = if upload::is_multipart(&req) {
        let upload = upload::read_multipart_field(&req, payload, "image", limit)
            .await?
            .ok_or_else(|| ApiError::InvalidInput(NO_IMAGE_DATA.to_string()))?
            .validated()?;
        info!("Received multipart file upload: {} bytes", upload.bytes.len());
        upload.bytes
    } else if upload::is_json(&req) {
        let body = upload::read_body(payload, limit).await?;
        let bytes = upload::image_from_json(&body)?;
        info!("Received JSON base64 data: {} bytes", bytes.len());
        bytes
    } else {
        return Err(ApiError::InvalidInput(NO_IMAGE_DATA.to_string()));
    };

    let response = run_prediction(classifier, image, None).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// Multipart-only variant keyed on `file`; echoes the upload's filename.
async fn predict_file(
    req: HttpRequest,
    payload: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let classifier = state.classifier()?;
    let no_file = || ApiError::InvalidInput("No file provided".to_string());

    if !upload::is_multipart(&req) {
        return Err(no_file());
    }
    let upload = upload::read_multipart_field(&req, payload, "file", state.max_upload_bytes())
        .await?
        .ok_or_else(no_file)?
        .validated()?;
    info!(
        "Received file {:?}: {} bytes",
        upload.filename.as_deref().unwrap_or_default(),
        upload.bytes.len()
    );

    let filename = upload.filename.unwrap_or_default();
    let response = run_prediction(classifier, upload.bytes, Some(filename)).await?;
    Ok(HttpResponse::Ok().json(response))
}

async fn run_prediction(
    classifier: Arc<dyn Classifier>,
    image: Vec<u8>,
    filename: Option<String>,
) -> Result<PredictionResponse, ApiError> {
    let model_version = classifier.variant().model_version();
    let result = web::block(move || classifier.predict(&image)).await??;
    info!(
        "Predicted {} ({:.2}%) in {:.2} ms",
        result.predicted_class, result.confidence_percentage, result.inference_time_ms
    );

    Ok(PredictionResponse {
        result,
        model_version,
        analysis_type: ANALYSIS_TYPE.to_string(),
        filename,
    })
}
