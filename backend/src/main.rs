mod config;
mod error;
mod inference;
mod routes;
mod state;
mod upload;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use config::ServiceConfig;
use inference::{Classifier, InferenceEngine};
use routes::configure_routes;
use state::AppState;
use std::env;
use std::sync::Arc;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let config = ServiceConfig::load().map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;
    log::info!("Model path: {}", config.model_path.display());
    log::info!("Model variant: {}", config.model_variant.model_version());

    // A missing or mismatched checkpoint keeps the server up so /health can
    // report it; prediction routes answer "Model not loaded".
    let classifier: Option<Arc<dyn Classifier>> =
        match InferenceEngine::load(&config.model_path, config.model_variant) {
            Ok(engine) => {
                log::info!("CNN model loaded successfully");
                Some(Arc::new(engine))
            }
            Err(e) => {
                log::error!("Error loading model: {}", e);
                None
            }
        };

    let state = web::Data::new(AppState::new(classifier, config.max_upload_bytes));
    let bind_address = format!("{}:{}", config.host, config.port);
    log::info!("Starting server on {}", bind_address);

    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(state.clone())
            .configure(configure_routes)
    });
    if let Some(workers) = config.workers {
        server = server.workers(workers);
    }

    server.bind(&bind_address)?.run().await
}
