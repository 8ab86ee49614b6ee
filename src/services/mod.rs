pub mod ai_client;
pub mod broker;
pub mod cache;
pub mod dispatcher;
pub mod indicators;
pub mod jobs;
pub mod market_data;
pub mod poller;
pub mod portfolio_service;
pub mod redis_store;
pub mod sqlite_store;
pub mod task_store;
pub mod valuation;
pub mod worker;

pub use ai_client::{AiClient, AiError};
pub use broker::Broker;
pub use cache::TtlCache;
pub use dispatcher::TaskDispatcher;
pub use jobs::{JobContext, JobError};
pub use market_data::MarketDataService;
pub use poller::{PollOutcome, TaskPoller};
pub use portfolio_service::PortfolioService;
pub use redis_store::RedisStore;
pub use sqlite_store::SqliteStore;
pub use task_store::TaskStore;
pub use valuation::{valuate, ValuationError};
pub use worker::{JobHandler, WorkerPool};
