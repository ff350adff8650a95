use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use appointment_cell::services::directory::{Directory, InMemoryDirectory};
use appointment_cell::services::email::{HttpEmailSink, LoggingEmailSink};
use appointment_cell::services::engine::AppointmentLifecycleEngine;
use appointment_cell::services::notifications::{EmailSink, NotificationDispatcher};
use appointment_cell::services::store::{AppointmentStore, InMemoryAppointmentStore};
use appointment_cell::AppointmentState;
use orchestrator_cell::{SchedulerState, SchedulerWorkerService, SweepRunner};
use shared_config::AppConfig;

fn load_directory(config: &AppConfig) -> anyhow::Result<InMemoryDirectory> {
    let Some(path) = config.directory_seed_path.as_deref() else {
        warn!("DIRECTORY_SEED_PATH not set; starting with an empty directory");
        return Ok(InMemoryDirectory::new());
    };

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading directory seed {}", path))?;
    let directory = InMemoryDirectory::from_json(&raw)
        .with_context(|| format!("parsing directory seed {}", path))?;
    info!("Loaded directory seed from {}", path);
    Ok(directory)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting clinic appointment API server");

    // Load configuration
    let config = Arc::new(AppConfig::from_env());

    let directory: Arc<dyn Directory> = Arc::new(load_directory(&config)?);
    let store: Arc<dyn AppointmentStore> = Arc::new(InMemoryAppointmentStore::new());
    let sink: Arc<dyn EmailSink> = match config.email_relay_url.as_deref() {
        Some(url) => {
            info!("Delivering notifications through relay {}", url);
            Arc::new(HttpEmailSink::new(url))
        }
        None => {
            warn!("EMAIL_RELAY_URL not set; notifications are only logged");
            Arc::new(LoggingEmailSink)
        }
    };

    let engine = Arc::new(AppointmentLifecycleEngine::new(
        store,
        directory,
        NotificationDispatcher::detached(sink),
        config.clone(),
    ));

    // Background sweeps share the engine with the request handlers
    let runner = Arc::new(SweepRunner::new(engine.clone(), config.scheduler.batch_size));
    let scheduler = Arc::new(SchedulerWorkerService::new(
        runner,
        config.scheduler.clone(),
        config.lifecycle.booking_timezone,
    ));
    let scheduler_task = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            if let Err(e) = scheduler.start().await {
                error!("Scheduler worker exited with error: {}", e);
            }
        })
    };

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(
        AppointmentState::new(config.clone(), engine),
        SchedulerState::new(config.clone(), scheduler.clone()),
    )
    .layer(
        TraceLayer::new_for_http()
            .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
            .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
    )
    .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
        })
        .await
        .context("serving HTTP")?;

    scheduler.shutdown().await;
    scheduler_task.await.ok();
    info!("Server stopped");
    Ok(())
}
