//! AI client: retry/backoff around a chat transport plus response validation.
//!
//! Callers see only the final outcome. Every failed attempt is logged with its
//! attempt number and failure class.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::AiConfig;
use crate::sources::openrouter::{ChatMessage, ChatRequest, FailureClass};
use crate::sources::{ChatTransport, OpenRouterClient, TransportError};
use crate::types::{EnrichedMarketData, Holding, TradingStrategy};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AiError {
    #[error("AI analysis is not configured. Missing OPENROUTER_API_KEY.")]
    NotConfigured,

    #[error("AI service unavailable after {attempts} attempts: {last}")]
    Unavailable { attempts: u32, last: TransportError },

    #[error("AI service rejected the request: {0}")]
    Rejected(TransportError),

    #[error("AI response did not match the expected schema: {0}")]
    SchemaViolation(String),
}

pub struct AiClient {
    transport: Option<Arc<dyn ChatTransport>>,
    config: AiConfig,
}

impl AiClient {
    /// Client over OpenRouter. Without an API key every call fails with `NotConfigured`.
    pub fn new(config: AiConfig) -> Self {
        let transport = config.api_key.as_deref().map(|key| {
            Arc::new(OpenRouterClient::new(&config.base_url, key, config.timeout))
                as Arc<dyn ChatTransport>
        });
        Self { transport, config }
    }

    pub fn with_transport(transport: Arc<dyn ChatTransport>, config: AiConfig) -> Self {
        Self {
            transport: Some(transport),
            config,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.transport.is_some()
    }

    fn jitter(&self) -> Duration {
        let max = self.config.retry.jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }

    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, AiError> {
        let transport = self.transport.as_ref().ok_or(AiError::NotConfigured)?;
        let policy = &self.config.retry;
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages,
            response_format: None,
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let err = match transport.complete(&request).await {
                Ok(content) => {
                    if attempt > 1 {
                        info!(attempt, "AI request succeeded after retry");
                    }
                    return Ok(content);
                }
                Err(err) => err,
            };

            let class = err.class();
            warn!(
                attempt,
                max_attempts = policy.max_attempts,
                class = class.as_str(),
                error = %err,
                "AI request attempt failed"
            );

            if class == FailureClass::Permanent {
                return Err(AiError::Rejected(err));
            }
            if attempt >= policy.max_attempts {
                return Err(AiError::Unavailable {
                    attempts: attempt,
                    last: err,
                });
            }
            tokio::time::sleep(policy.backoff(attempt) + self.jitter()).await;
        }
    }

    /// Free-text completion.
    pub async fn generate_text(&self, system: &str, user: &str) -> Result<String, AiError> {
        let content = self
            .complete(vec![ChatMessage::system(system), ChatMessage::user(user)])
            .await?;
        let content = strip_reasoning(&content).trim().to_string();
        if content.is_empty() {
            return Err(AiError::SchemaViolation("empty completion".to_string()));
        }
        Ok(content)
    }

    /// Ask for a trading strategy and validate it against the fixed schema.
    pub async fn generate_strategy(
        &self,
        data: &EnrichedMarketData,
        language: &str,
    ) -> Result<TradingStrategy, AiError> {
        let content = self
            .complete(vec![
                ChatMessage::system(strategy_system_prompt(language)),
                ChatMessage::user(market_context(data)),
            ])
            .await?;
        parse_strategy(&content)
    }

    /// One-paragraph commentary on a single symbol.
    pub async fn analyze_market_data(
        &self,
        data: &EnrichedMarketData,
        language: &str,
    ) -> Result<String, AiError> {
        self.generate_text(&analysis_system_prompt(language), &market_context(data))
            .await
    }

    /// One-paragraph commentary on portfolio composition.
    pub async fn analyze_portfolio(&self, holdings: &[Holding], language: &str) -> Result<String, AiError> {
        self.generate_text(&portfolio_system_prompt(language), &holdings_context(holdings))
            .await
    }
}

const STRATEGY_SCHEMA: &str = r#"{"strategy_type": "bullish" | "bearish" | "neutral" | "range_bound" | "breakout", "confidence": "low" | "medium" | "high", "entry_price_suggestion": number | null, "stop_loss_suggestion": number | null, "take_profit_suggestion": number | null, "rationale": string}"#;

fn strategy_system_prompt(language: &str) -> String {
    format!(
        "You are a market technician. Based on the market data provided, propose a short-term \
         trading strategy. Respond with a single JSON object and nothing else, matching exactly: {}. \
         Write the rationale in language '{}'.",
        STRATEGY_SCHEMA, language
    )
}

fn analysis_system_prompt(language: &str) -> String {
    format!(
        "You are a helpful financial analyst. You will be given price history statistics, technical \
         indicators, fundamentals and recent headlines for one security. Summarize the technical \
         picture and the fundamental profile in a single paragraph. Do not give financial advice. \
         Respond in language '{}'.",
        language
    )
}

fn portfolio_system_prompt(language: &str) -> String {
    format!(
        "You are a helpful financial analyst. You will be given a list of holdings in a portfolio. \
         Provide a brief, high-level analysis of the portfolio's composition. Focus on \
         diversification, risk profile and any concentrations. Do not give financial advice, \
         buy/sell recommendations, or predict future performance. The analysis should be a single \
         paragraph. Respond in language '{}'.",
        language
    )
}

/// Compact JSON context for one symbol; history is reduced to the latest bars.
fn market_context(data: &EnrichedMarketData) -> String {
    let recent: Vec<_> = data
        .historical_prices
        .iter()
        .rev()
        .take(30)
        .rev()
        .map(|b| serde_json::json!({"date": b.date.date_naive(), "close": b.close, "volume": b.volume}))
        .collect();
    let headlines: Vec<&str> = data.news.iter().map(|n| n.title.as_str()).take(5).collect();

    serde_json::json!({
        "symbol": data.symbol,
        "name": data.long_name.as_ref().or(data.short_name.as_ref()),
        "current_price": data.current_price,
        "recent_closes": recent,
        "technicals": data.technicals,
        "fundamentals": data.fundamentals,
        "trading_info": data.trading_info,
        "headlines": headlines,
    })
    .to_string()
}

fn holdings_context(holdings: &[Holding]) -> String {
    let lines: Vec<String> = holdings
        .iter()
        .map(|h| {
            let value = h
                .market_value
                .map(|v| format!("${:.2}", v))
                .unwrap_or_else(|| "unknown value".to_string());
            format!(
                "- {} {} at average cost ${:.2} ({})",
                h.quantity,
                h.position_key,
                h.average_cost_basis,
                value
            )
        })
        .collect();
    format!("Here are the portfolio holdings:\n{}", lines.join("\n"))
}

/// Drop `<think>...</think>` blocks some reasoning models prepend.
fn strip_reasoning(content: &str) -> &str {
    match content.rfind("</think>") {
        Some(end) => &content[end + "</think>".len()..],
        None => content,
    }
}

/// Extract the JSON object from a completion, tolerating code fences and prose around it.
fn extract_json_object(content: &str) -> Option<&str> {
    let content = strip_reasoning(content);
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (end > start).then(|| &content[start..=end])
}

/// Parse and validate a strategy completion.
pub fn parse_strategy(content: &str) -> Result<TradingStrategy, AiError> {
    let json = extract_json_object(content)
        .ok_or_else(|| AiError::SchemaViolation("no JSON object in response".to_string()))?;
    let strategy: TradingStrategy =
        serde_json::from_str(json).map_err(|e| AiError::SchemaViolation(e.to_string()))?;
    strategy.check().map_err(AiError::SchemaViolation)?;
    Ok(strategy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::types::{Confidence, StrategyType};
    use futures_util::future::{BoxFuture, FutureExt};
    use std::sync::Mutex;

    /// Transport replaying a fixed script of outcomes.
    struct Scripted {
        outcomes: Mutex<Vec<Result<String, TransportError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(mut outcomes: Vec<Result<String, TransportError>>) -> Arc<Self> {
            outcomes.reverse();
            Arc::new(Self {
                outcomes: Mutex::new(outcomes),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    impl ChatTransport for Scripted {
        fn complete<'a>(&'a self, _request: &'a ChatRequest) -> BoxFuture<'a, Result<String, TransportError>> {
            *self.calls.lock().unwrap() += 1;
            let next = self
                .outcomes
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(TransportError::Connect("script exhausted".into())));
            async move { next }.boxed()
        }
    }

    fn config(max_attempts: u32) -> AiConfig {
        AiConfig {
            api_key: Some("test".to_string()),
            retry: RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
                jitter: Duration::ZERO,
            },
            ..AiConfig::default()
        }
    }

    fn server_error() -> Result<String, TransportError> {
        Err(TransportError::Status {
            status: 503,
            body: "unavailable".into(),
        })
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let transport = Scripted::new(vec![Err(TransportError::Status {
            status: 401,
            body: "bad key".into(),
        })]);
        let client = AiClient::with_transport(transport.clone(), config(4));

        let err = client.generate_text("s", "u").await.unwrap_err();
        assert!(matches!(err, AiError::Rejected(_)));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_exhaust_attempts() {
        let transport = Scripted::new(vec![server_error(), server_error(), server_error()]);
        let client = AiClient::with_transport(transport.clone(), config(3));

        let err = client.generate_text("s", "u").await.unwrap_err();
        assert!(matches!(err, AiError::Unavailable { attempts: 3, .. }));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_not_configured() {
        let client = AiClient::new(AiConfig::default());
        assert!(!client.is_configured());
        assert_eq!(
            client.generate_text("s", "u").await.unwrap_err(),
            AiError::NotConfigured
        );
    }

    #[test]
    fn test_parse_strategy_fenced() {
        let content = "<think>hmm</think>```json\n{\"strategy_type\":\"bullish\",\"confidence\":\"high\",\
            \"entry_price_suggestion\":150.0,\"stop_loss_suggestion\":140.0,\
            \"take_profit_suggestion\":null,\"rationale\":\"Uptrend intact.\"}\n```";
        let strategy = parse_strategy(content).unwrap();
        assert_eq!(strategy.strategy_type, StrategyType::Bullish);
        assert_eq!(strategy.confidence, Confidence::High);
        assert_eq!(strategy.take_profit_suggestion, None);
    }

    #[test]
    fn test_parse_strategy_rejects_out_of_enum() {
        let content = r#"{"strategy_type":"moon","confidence":"high","entry_price_suggestion":null,
            "stop_loss_suggestion":null,"take_profit_suggestion":null,"rationale":"x"}"#;
        assert!(matches!(parse_strategy(content), Err(AiError::SchemaViolation(_))));
        assert!(matches!(parse_strategy("no json here"), Err(AiError::SchemaViolation(_))));
    }

    #[test]
    fn test_parse_strategy_rejects_negative_price() {
        let content = r#"{"strategy_type":"bearish","confidence":"low","entry_price_suggestion":-5,
            "stop_loss_suggestion":null,"take_profit_suggestion":null,"rationale":"x"}"#;
        assert!(matches!(parse_strategy(content), Err(AiError::SchemaViolation(_))));
    }
}
