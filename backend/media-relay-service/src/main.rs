//! Media relay bot
//!
//! Runs the Telegram intake, the worker pool and the health/metrics listener
//! in one process. Exits non-zero when the queue backend is lost so the
//! supervisor can restart it.
//!
//! Configuration is read from the environment; see `config.rs`.

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use media_relay_service::config::Config;
use media_relay_service::frontend::{CommandTable, Frontend};
use media_relay_service::handlers::{self, HealthState};
use media_relay_service::services::pipeline::{
    AnimationConfig, FfmpegAnimationTransformer, MediaPipeline, OpenAiSummarizer,
    OpenAiSummaryConfig, PipelineSettings, YtDlpConfig, YtDlpFetcher,
};
use media_relay_service::services::{
    Backend, DeliveryAdapter, QuotaCalendar, RateLimiter, TierDirectory,
};
use media_relay_service::telegram::{self, TelegramDelivery};
use media_relay_service::workers::{run_worker_pool, JobWorker};
use resilience::RetryConfig;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("media_relay_service=info,info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        env = %config.app.env,
        workers = config.queue.workers,
        daily_limit = config.quota.daily_limit,
        max_delivery_bytes = config.pipeline.max_delivery_bytes,
        json_logs = config.app.json_logs,
        caption_summary = config.summary.is_active(),
        "Starting media-relay-service"
    );

    let calendar = QuotaCalendar::with_offset_minutes(config.quota.utc_offset_minutes)?;
    let backend = Backend::connect(&config, calendar).await?;

    // Chat channel
    let bot = telegram::build_bot(&config.telegram.bot_token)
        .context("Failed to build Telegram client")?;
    let delivery = DeliveryAdapter::new(
        Arc::new(TelegramDelivery::new(bot.clone())),
        config.pipeline.delivery_timeout,
    );

    // Pipeline capabilities
    let fetcher = Arc::new(YtDlpFetcher::new(YtDlpConfig {
        binary: config.pipeline.yt_dlp_path.clone(),
        cookies_file: config.pipeline.cookies_file.clone(),
        work_dir: config.pipeline.work_dir.clone(),
        timeout: config.pipeline.fetch_timeout,
        retry: RetryConfig::default(),
    }));
    let transformer = Arc::new(FfmpegAnimationTransformer::new(AnimationConfig {
        ffmpeg: config.pipeline.ffmpeg_path.clone(),
        ffprobe: config.pipeline.ffprobe_path.clone(),
        timeout: config.pipeline.transform_timeout,
        ..AnimationConfig::default()
    }));
    let mut pipeline = MediaPipeline::new(
        fetcher,
        transformer,
        delivery,
        PipelineSettings {
            max_delivery_bytes: config.pipeline.max_delivery_bytes,
            caption_max_chars: config.pipeline.caption_max_chars,
        },
    );
    let summary_key = config.summary.api_key.clone().filter(|_| config.summary.enabled);
    if let Some(api_key) = summary_key {
        let summarizer = OpenAiSummarizer::new(OpenAiSummaryConfig {
            api_key,
            base_url: config.summary.base_url.clone(),
            summary_model: config.summary.summary_model.clone(),
            transcription_model: config.summary.transcription_model.clone(),
            ffmpeg: config.pipeline.ffmpeg_path.clone(),
            timeout: config.summary.timeout,
        })
        .context("Failed to build caption summarizer")?;
        pipeline = pipeline.with_summarizer(Arc::new(summarizer));
    }
    let pipeline = Arc::new(pipeline);

    let frontend = Arc::new(Frontend::new(
        CommandTable::default(),
        RateLimiter::new(backend.counters(), calendar),
        TierDirectory::new(config.quota.unrestricted_identities.clone()),
        backend.queue(),
        config.quota.daily_limit,
    ));

    let mut workers = Vec::with_capacity(config.queue.workers);
    for id in 0..config.queue.workers {
        workers.push(JobWorker::new(
            id,
            backend.consumer_queue().await?,
            pipeline.clone(),
            backend.counters(),
            calendar,
            config.queue.pop_timeout,
        ));
    }

    // Setup shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, finishing in-flight jobs");
        let _ = signal_tx.send(true);
    });

    // Health and metrics
    let health_state = HealthState {
        queue: backend.queue(),
        durable: backend.is_durable(),
    };
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(health_state.clone()))
            .configure(handlers::configure)
    })
    .bind((config.app.host.as_str(), config.app.port))
    .with_context(|| format!("Failed to bind {}:{}", config.app.host, config.app.port))?
    .disable_signals()
    .run();
    let server_handle = server.handle();
    info!(host = %config.app.host, port = config.app.port, "Health server started");
    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    let mut pool_task = tokio::spawn(run_worker_pool(workers, shutdown_rx.clone()));
    let mut intake_task = tokio::spawn(telegram::run_intake(bot, frontend, shutdown_rx));

    let outcome: Result<()> = tokio::select! {
        joined = &mut pool_task => match joined {
            Ok(result) => result.context("Worker pool stopped"),
            Err(e) => Err(anyhow::Error::from(e).context("Worker pool panicked")),
        },
        joined = &mut intake_task => match joined {
            Ok(result) => result.context("Telegram intake stopped"),
            Err(e) => Err(anyhow::Error::from(e).context("Telegram intake panicked")),
        },
    };

    let _ = shutdown_tx.send(true);
    if !pool_task.is_finished() {
        // workers stop between jobs
        if let Ok(Err(e)) = pool_task.await {
            error!(error = %e, "Worker pool failed during shutdown");
        }
    }
    intake_task.abort();
    server_handle.stop(true).await;

    match &outcome {
        Ok(()) => info!("media-relay-service stopped"),
        Err(e) => error!(error = %format!("{e:#}"), "media-relay-service exiting"),
    }
    outcome
}
