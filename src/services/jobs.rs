//! Job handlers run by the worker pool, and the snapshot scheduler.
//!
//! Every handler is safe to re-run: enrichment overwrites its cache entry and
//! snapshots upsert by date.

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use super::ai_client::{AiClient, AiError};
use super::dispatcher::TaskDispatcher;
use super::market_data::MarketDataService;
use super::portfolio_service::PortfolioService;
use super::worker::JobHandler;
use crate::error::AppError;
use crate::sources::SourceError;
use crate::types::{AnalysisResult, JobRequest};

/// History window given to the AI jobs.
const AI_CONTEXT_PERIOD: &str = "1y";
const AI_CONTEXT_INTERVAL: &str = "1d";

pub const EMPTY_PORTFOLIO_ANALYSIS: &str = "Portfolio has no holdings to analyze.";

#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Ai(#[from] AiError),

    #[error(transparent)]
    App(#[from] AppError),

    #[error("Failed to encode result: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Collaborators shared by every job, constructed once at startup.
#[derive(Clone)]
pub struct JobContext {
    pub market: Arc<MarketDataService>,
    pub ai: Arc<AiClient>,
    pub portfolios: Arc<PortfolioService>,
}

impl JobContext {
    pub fn new(market: Arc<MarketDataService>, ai: Arc<AiClient>, portfolios: Arc<PortfolioService>) -> Self {
        Self {
            market,
            ai,
            portfolios,
        }
    }

    pub async fn run(&self, job: JobRequest) -> Result<Value, JobError> {
        match job {
            JobRequest::MarketDataEnrich {
                symbol,
                period,
                interval,
            } => {
                let data = self.market.enrich(&symbol, &period, &interval).await?;
                Ok(serde_json::to_value(data)?)
            }
            JobRequest::AiAnalyze { symbol, language } => {
                let data = self
                    .market
                    .enriched_or_fetch(&symbol, AI_CONTEXT_PERIOD, AI_CONTEXT_INTERVAL)
                    .await?;
                let content = self.ai.analyze_market_data(&data, &language).await?;
                Ok(serde_json::to_value(AnalysisResult { content })?)
            }
            JobRequest::AiStrategize { symbol, language } => {
                let data = self
                    .market
                    .enriched_or_fetch(&symbol, AI_CONTEXT_PERIOD, AI_CONTEXT_INTERVAL)
                    .await?;
                let strategy = self.ai.generate_strategy(&data, &language).await?;
                Ok(serde_json::to_value(strategy)?)
            }
            JobRequest::AiPortfolioAnalyze {
                portfolio_id,
                language,
            } => {
                let valuation = self.portfolios.value_portfolio(portfolio_id).await?;
                let content = if valuation.holdings.is_empty() {
                    EMPTY_PORTFOLIO_ANALYSIS.to_string()
                } else {
                    self.ai.analyze_portfolio(&valuation.holdings, &language).await?
                };
                Ok(serde_json::to_value(AnalysisResult { content })?)
            }
            JobRequest::SymbolSearch { query } => {
                let results = self.market.search(&query).await?;
                Ok(serde_json::to_value(results)?)
            }
            JobRequest::PortfolioSnapshot { portfolio_id } => {
                let snapshot = self.portfolios.take_snapshot(portfolio_id).await?;
                Ok(json!({
                    "portfolio_id": snapshot.portfolio_id,
                    "date": snapshot.date,
                    "total_market_value": snapshot.total_market_value,
                }))
            }
        }
    }
}

impl JobHandler for JobContext {
    fn handle<'a>(&'a self, job: JobRequest) -> BoxFuture<'a, Result<Value, String>> {
        async move { self.run(job).await.map_err(|e| e.to_string()) }.boxed()
    }
}

/// Enqueue one `portfolio_snapshot` job per portfolio every `interval`.
/// The first fan-out happens one interval after startup.
pub async fn run_snapshot_scheduler(
    portfolios: Arc<PortfolioService>,
    dispatcher: TaskDispatcher,
    interval: Duration,
) {
    if interval.is_zero() {
        info!("Snapshot scheduler disabled");
        return;
    }
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let ids = match portfolios.store().all_portfolio_ids() {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Snapshot scheduler could not list portfolios: {}", e);
                continue;
            }
        };
        info!("Scheduling snapshots for {} portfolios", ids.len());
        for portfolio_id in ids {
            if let Err(e) = dispatcher
                .enqueue(JobRequest::PortfolioSnapshot { portfolio_id })
                .await
            {
                warn!(portfolio_id, "Failed to schedule snapshot: {}", e);
            }
        }
    }
}
