use holdview::config::Config;
use holdview::services::{
    jobs, AiClient, Broker, RedisStore, SqliteStore, TaskDispatcher, TaskStore, WorkerPool,
};
use holdview::sources::YahooFinanceClient;
use holdview::{api, AppState};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "holdview=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env());
    info!("Starting Holdview server on {}:{}", config.host, config.port);

    let store = Arc::new(SqliteStore::new(&config.database_path)?);
    info!("Opened database at {}", config.database_path);

    // Shared pipeline state lives in Redis when available, otherwise in-process
    let redis = match config.redis_url {
        Some(ref url) => RedisStore::connect(url).await,
        None => None,
    };
    let (broker, task_store) = match redis {
        Some(ref redis) => (
            Broker::redis(redis, &config.worker.queue),
            TaskStore::redis(redis, config.worker.result_ttl),
        ),
        None => {
            info!("Using in-process broker and task store");
            (Broker::memory(), TaskStore::memory(config.worker.result_ttl))
        }
    };
    let dispatcher = TaskDispatcher::new(broker.clone(), task_store.clone());

    let provider = Arc::new(YahooFinanceClient::with_config(
        &config.market_data_base_url,
        config.market_data_api_key.as_deref(),
    ));
    let state = AppState::new(config.clone(), store, provider, dispatcher.clone());

    let ai = Arc::new(AiClient::new(config.ai.clone()));
    if !ai.is_configured() {
        info!("OPENROUTER_API_KEY not set, AI jobs will fail with a configuration error");
    }

    // Start the worker pool
    let handler = Arc::new(state.job_context(ai));
    WorkerPool::new(broker, task_store.clone(), handler, config.worker.workers).spawn();

    // Start the snapshot scheduler
    tokio::spawn(jobs::run_snapshot_scheduler(
        state.portfolios.clone(),
        dispatcher,
        config.worker.snapshot_interval,
    ));

    // Start periodic cache and task expiry
    {
        let market = state.market.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                market.purge_caches();
                task_store.purge_expired();
            }
        });
    }

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the router
    let app = api::router()
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start the server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Holdview server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
