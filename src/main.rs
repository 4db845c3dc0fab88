use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use depot::http::{self, AppState};
use depot::janitor;
use depot::objects::ObjectStore;
use depot::streaming::{StreamTokenCache, StreamingService, TOKEN_SWEEP_PERIOD};
use depot::uploads::{SessionJanitor, SessionTable, UploadCoordinator, SESSION_SWEEP_PERIOD};
use depot::Config;

#[derive(Parser)]
struct Cli {
    /// Override the listen address from the environment.
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(true)
        .compact()
        .init();

    let config = Config::from_env()?;

    // initialize the object store and make sure the bucket exists
    let store: Arc<dyn ObjectStore> = Arc::new(config.s3.new_objects().await?);
    store.ensure_bucket().await?;

    let sessions = Arc::new(SessionTable::new());
    let tokens = Arc::new(StreamTokenCache::new());

    let _session_janitor = janitor::spawn(
        "upload-sessions",
        SESSION_SWEEP_PERIOD,
        Arc::new(SessionJanitor::new(sessions.clone(), store.clone())),
    );
    let _token_janitor = janitor::spawn("stream-tokens", TOKEN_SWEEP_PERIOD, tokens.clone());

    let state = AppState {
        coordinator: Arc::new(UploadCoordinator::new(sessions, store.clone())),
        streaming: Arc::new(StreamingService::new(store, tokens)),
    };
    let router = http::router(state);

    let addr = cli.listen.unwrap_or(config.listen_addr).parse()?;
    tracing::info!("listening on {addr}");

    // run HTTP server
    axum::Server::bind(&addr)
        .serve(router.into_make_service())
        .await?;

    Ok(())
}
