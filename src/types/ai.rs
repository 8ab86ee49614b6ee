use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    Bullish,
    Bearish,
    Neutral,
    RangeBound,
    Breakout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Structured output of `ai_strategize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TradingStrategy {
    pub strategy_type: StrategyType,
    pub confidence: Confidence,
    pub entry_price_suggestion: Option<f64>,
    pub stop_loss_suggestion: Option<f64>,
    pub take_profit_suggestion: Option<f64>,
    pub rationale: String,
}

impl TradingStrategy {
    /// Semantic checks serde cannot express.
    pub fn check(&self) -> Result<(), String> {
        let prices = [
            ("entry_price_suggestion", self.entry_price_suggestion),
            ("stop_loss_suggestion", self.stop_loss_suggestion),
            ("take_profit_suggestion", self.take_profit_suggestion),
        ];
        for (field, value) in prices {
            if let Some(v) = value {
                if !v.is_finite() || v <= 0.0 {
                    return Err(format!("{} must be a positive number, got {}", field, v));
                }
            }
        }
        if self.rationale.trim().is_empty() {
            return Err("rationale must not be empty".to_string());
        }
        Ok(())
    }
}

/// Free-text AI output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub content: String,
}

/// Body of the analyze/strategize endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct LanguageRequest {
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "en".to_string()
}

impl Default for LanguageRequest {
    fn default() -> Self {
        Self {
            language: default_language(),
        }
    }
}
