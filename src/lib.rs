//! Holdview - portfolio valuation and market analysis server

pub mod api;
pub mod config;
pub mod error;
pub mod services;
pub mod sources;
pub mod types;

use std::sync::Arc;

use config::Config;
use services::{
    AiClient, JobContext, MarketDataService, PortfolioService, SqliteStore, TaskDispatcher,
};
use sources::MarketDataProvider;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub portfolios: Arc<PortfolioService>,
    pub market: Arc<MarketDataService>,
    pub dispatcher: TaskDispatcher,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        store: Arc<SqliteStore>,
        provider: Arc<dyn MarketDataProvider>,
        dispatcher: TaskDispatcher,
    ) -> Self {
        let market = Arc::new(MarketDataService::new(
            provider,
            config.quote_cache_ttl,
            config.market_data_retry.clone(),
        ));
        let portfolios = Arc::new(PortfolioService::new(store, market.clone()));
        Self {
            config,
            portfolios,
            market,
            dispatcher,
        }
    }

    /// Job collaborators sharing this state's services.
    pub fn job_context(&self, ai: Arc<AiClient>) -> JobContext {
        JobContext::new(self.market.clone(), ai, self.portfolios.clone())
    }
}

pub use error::{AppError, Result};
pub use types::*;
