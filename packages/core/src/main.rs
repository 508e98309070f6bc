use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dotenvy::dotenv;

use cityguard::alerts::{Mailer, Notifier, SmtpMailer};
use cityguard::api::{self, AppState};
use cityguard::cli::Cli;
use cityguard::config::Config;
use cityguard::db;
use cityguard::error::AppError;
use cityguard::ingest::{Classifier, IncidentSource, IngestionPipeline, PipelineConfig, Summarizer};
use cityguard::logging::init_logging;
use cityguard::metrics::AppMetrics;
use cityguard::repository::IncidentRepository;
use cityguard::scheduler;
use cityguard::services::{GeminiClient, GeminiSettings, NewsClient, WeatherClient};

#[tokio::main]
async fn main() {
    dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = run(cli).await {
        tracing::error!("{}", err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let mut config = Config::from_env().map_err(AppError::Config)?;
    config.apply_cli(&cli).map_err(AppError::Config)?;
    tracing::info!("Service started with config: {:?}", config);

    let pool = db::create_pool(&config.database_url).await?;
    let repository = Arc::new(IncidentRepository::with_dedup(pool, config.dedup.clone()));

    let sources = build_sources(&config);
    if sources.is_empty() {
        tracing::warn!("No incident sources configured; set OPENWEATHERMAP_API_KEY and/or NEWS_API_KEY");
    }

    let gemini = Arc::new(GeminiClient::new(GeminiSettings {
        base_url: config.gemini_url.clone(),
        api_key: config.gemini_api_key.clone(),
        model: config.gemini_model.clone(),
        fast_model: config.gemini_fast_model.clone(),
    }));
    let classifier: Arc<dyn Classifier> = gemini.clone();
    let summarizer: Arc<dyn Summarizer> = gemini;

    let metrics = Arc::new(
        AppMetrics::new().map_err(|e| AppError::Internal(format!("metrics registry: {}", e)))?,
    );

    let pipeline_config = PipelineConfig {
        dedup: config.dedup.clone(),
        ..PipelineConfig::default()
    };
    let notify_threshold = pipeline_config.high_priority_threshold;
    let mut pipeline = IngestionPipeline::new(sources, classifier, repository.clone(), pipeline_config)
        .with_metrics(metrics.clone());

    match &config.smtp {
        Some(smtp) => {
            let mailer: Arc<dyn Mailer> = Arc::new(SmtpMailer::new(smtp).map_err(AppError::Config)?);
            let notifier = Notifier::new(repository.clone(), mailer)
                .with_threshold(notify_threshold);
            pipeline = pipeline.with_notifier(Arc::new(notifier));
            tracing::info!("E-mail notifications enabled via {}:{}", smtp.host, smtp.port);
        }
        None => tracing::warn!("SMTP_HOST not set; e-mail notifications disabled"),
    }
    let pipeline = Arc::new(pipeline);

    if cli.once {
        let reports = scheduler::run_all_locations(&pipeline, &config.locations).await;
        for report in &reports {
            tracing::info!(
                "{}: fetched {}, stored {}, duplicates {}, discarded {}, notified {}",
                report.location,
                report.fetched,
                report.stored,
                report.duplicates,
                report.discarded,
                report.notified
            );
        }
        return Ok(());
    }

    tokio::spawn(scheduler::run_ingestion(
        pipeline,
        config.locations.clone(),
        config.poll_interval_seconds,
    ));

    let state = AppState::new(
        repository,
        Some(summarizer),
        Duration::from_secs(config.summary_cache_seconds),
    );
    let app = api::create_router(state, Some(metrics));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::Network(format!("failed to bind {}: {}", addr, e)))?;
    tracing::info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AppError::Internal(format!("server error: {}", e)))?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn build_sources(config: &Config) -> Vec<Arc<dyn IncidentSource>> {
    let mut sources: Vec<Arc<dyn IncidentSource>> = Vec::new();

    match &config.weather_api_key {
        Some(key) => sources.push(Arc::new(WeatherClient::new(config.weather_url.clone(), key.clone()))),
        None => tracing::warn!("OPENWEATHERMAP_API_KEY not set; weather source disabled"),
    }
    match &config.news_api_key {
        Some(key) => sources.push(Arc::new(NewsClient::new(config.news_url.clone(), key.clone()))),
        None => tracing::warn!("NEWS_API_KEY not set; news source disabled"),
    }

    sources
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", err);
        // Without a signal handler the server runs until killed.
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
