use std::{error::Error, net::SocketAddr, sync::Arc};

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tokio::{signal, sync::Semaphore};

use crate::{
    config::Config,
    metrics::{track_requests, RequestMetrics},
    model::{Classifier, ImageClassifier, ModelSource},
    routes::{docs, health_check, metrics_handler, predict_handler, redirect_to_docs},
    utils::ensure_model_file,
};

pub struct LoadedModel {
    pub classifier: Box<dyn ImageClassifier>,
    pub source: ModelSource,
}

/// Everything a request handler may touch. Built once in `start_app`.
#[derive(Clone)]
pub struct AppState {
    pub model: Option<Arc<LoadedModel>>,
    pub metrics: Arc<RequestMetrics>,
    pub inference_slots: Arc<Semaphore>,
}

impl AppState {
    pub fn new(model: Option<LoadedModel>, max_concurrent_inferences: usize) -> Self {
        Self {
            model: model.map(Arc::new),
            metrics: Arc::new(RequestMetrics::new()),
            inference_slots: Arc::new(Semaphore::new(max_concurrent_inferences)),
        }
    }
}

pub fn build_router(state: AppState, body_limit_bytes: usize) -> Router {
    let metrics = state.metrics.clone();

    Router::new()
        .route("/", get(redirect_to_docs))
        .route("/docs", get(docs))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/predict", post(predict_handler))
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .layer(middleware::from_fn_with_state(metrics, track_requests))
        .with_state(state)
}

async fn load_model(config: &Config) -> Result<Option<LoadedModel>, Box<dyn Error>> {
    let model_config = &config.model;
    ensure_model_file(&model_config.path, model_config.url.as_deref()).await?;

    if !model_config.path.exists() && !model_config.fallback_to_untrained {
        tracing::warn!(
            "Model file {} not found and fallback is disabled, serving without a model",
            model_config.path.display()
        );
        return Ok(None);
    }

    let path = model_config.path.clone();
    let (classifier, source) = tokio::task::spawn_blocking(move || Classifier::load(path)).await??;

    Ok(Some(LoadedModel {
        classifier: Box::new(classifier),
        source,
    }))
}

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let model = match load_model(&config).await {
        Ok(model) => model,
        Err(e) => {
            tracing::error!("Failed to load model: {}", e);
            return Err(e);
        }
    };

    let state = AppState::new(model, config.model.max_concurrent_inferences);
    let app = build_router(state, config.server.body_limit_bytes());

    let addr: SocketAddr = config.server.get_address().parse()?;
    tracing::info!("Listening on http://{}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LogLevel, ModelConfig, ServerConfig};
    use std::path::PathBuf;

    fn config_for(path: PathBuf, fallback_to_untrained: bool) -> Config {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                body_limit_mb: 5,
            },
            log_level: LogLevel::Info,
            model: ModelConfig {
                path,
                url: None,
                fallback_to_untrained,
                max_concurrent_inferences: 1,
            },
        }
    }

    fn temp_weights(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "catdog-app-{}-{}.safetensors",
            name,
            std::process::id()
        ))
    }

    #[tokio::test]
    async fn test_missing_weights_fall_back_to_untrained() {
        let config = config_for(temp_weights("missing-fallback"), true);

        let model = load_model(&config).await.unwrap().unwrap();
        assert_eq!(model.source, ModelSource::Untrained);
    }

    #[tokio::test]
    async fn test_missing_weights_without_fallback_serve_no_model() {
        let config = config_for(temp_weights("missing-strict"), false);

        assert!(load_model(&config).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_saved_weights_are_loaded() {
        let path = temp_weights("saved");
        Classifier::untrained().unwrap().save(&path).unwrap();
        let config = config_for(path.clone(), false);

        let model = load_model(&config).await.unwrap();
        std::fs::remove_file(&path).unwrap();

        let model = model.unwrap();
        assert_eq!(model.source, ModelSource::Loaded { path });
    }

    #[tokio::test]
    async fn test_corrupt_weights_fail_startup() {
        let path = temp_weights("corrupt");
        std::fs::write(&path, b"not safetensors").unwrap();
        let config = config_for(path.clone(), true);

        let result = load_model(&config).await;
        std::fs::remove_file(&path).unwrap();

        assert!(result.is_err());
    }
}
