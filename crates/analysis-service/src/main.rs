use analysis_service::{
    analysis::FfmpegOpener,
    api,
    config::AnalysisServiceConfig,
    inference::GeminiClient,
    video::VideoIntelligenceClient,
    AnalysisServiceState, MemoryDataStore,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Held for the life of the process so file logs get flushed
    let _log_guard = telemetry::init_with_service("analysis-service");

    info!("Starting Analysis Service...");

    let config = AnalysisServiceConfig::from_env()?;
    info!(
        bind = %config.bind_addr,
        text_model = %config.gemini.text_model,
        vision_model = %config.gemini.vision_model,
        sample_interval_ms = config.analysis.sample_interval.as_millis() as u64,
        "Analysis Service configuration loaded"
    );
    if config.gemini.api_key.is_none() {
        warn!("GEMINI_API_KEY is not set; frame and text inference will be rejected");
    }

    let store = Arc::new(MemoryDataStore::new());
    if config.seed_demo_data {
        store.seed_defaults().await;
    }

    let inference = Arc::new(
        GeminiClient::new(config.gemini.clone(), config.analysis.inference_timeout)
            .context("Failed to build inference client")?,
    );
    let annotator = Arc::new(
        VideoIntelligenceClient::new(
            config.video_intelligence.clone(),
            config.analysis.inference_timeout,
        )
        .context("Failed to build video annotation client")?,
    );
    let opener = Arc::new(FfmpegOpener::new(config.analysis.media_root.clone()));

    let state = AnalysisServiceState::new(
        store,
        inference,
        annotator,
        opener,
        config.analysis.clone(),
    );

    let app = api::router(state.clone(), config.max_upload_bytes);

    info!("Binding to {}", config.bind_addr);
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Analysis Service listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}

async fn shutdown_signal(state: AnalysisServiceState) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }

    info!("Shutting down gracefully...");
    state.shutdown().await;
}
