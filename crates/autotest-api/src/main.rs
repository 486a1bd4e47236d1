//! AutoTest webhook server

use autotest_api::services::github::GitHubCommentPoster;
use autotest_api::{AppState, routes};
use autotest_config::{CourseConfig, CoursePortal, SystemConfig};
use autotest_db::{MemoryStore, PersistenceStore, PgStore, create_pool, run_migrations};
use autotest_executor::DockerLauncher;
use autotest_scheduler::{CommitScheduler, RendezvousServer, SchedulerConfig, SchedulerServices};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = SystemConfig::from_env()?;

    let course = CourseConfig::load(&config.course_file)?;
    info!(
        course = %course.name,
        deliverables = course.deliverables.len(),
        default = ?course.default_deliverable,
        "Loaded course file"
    );
    let portal = Arc::new(CoursePortal::new(course));

    let store: Arc<dyn PersistenceStore> = match &config.database_url {
        Some(url) => {
            info!("Connecting to database...");
            let pool = create_pool(url).await?;
            run_migrations(&pool).await?;
            info!("Database connected");
            Arc::new(PgStore::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set; records are kept in memory");
            Arc::new(MemoryStore::new())
        }
    };

    if !config.postback {
        warn!("Postback disabled; feedback is recorded but not posted to GitHub");
    }
    let poster = Arc::new(GitHubCommentPoster::from_config(&config));
    let launcher = Arc::new(DockerLauncher::new(config.docker_network.clone())?);

    let rendezvous = Arc::new(RendezvousServer::new(config.rendezvous_bind));
    let rendezvous_addr = rendezvous.start().await?;

    let scheduler = CommitScheduler::new(
        SchedulerConfig::from_system(&config, rendezvous_addr.port()),
        SchedulerServices {
            portal,
            store,
            poster,
            launcher,
            rendezvous: rendezvous.clone(),
        },
    );

    let state = AppState::new(
        scheduler,
        rendezvous.clone(),
        config.bot_name.clone(),
        config.webhook_secret.clone(),
    );
    let app = routes::router(state).layer(TraceLayer::new_for_http());

    info!("Starting server on {}", config.listen);
    let listener = TcpListener::bind(config.listen).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    rendezvous.stop();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal, initiating graceful shutdown");
}
