//! Ledger types: transactions and the position key they aggregate under.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Direction of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionSide {
    Buy,
    Sell,
}

impl TransactionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionSide::Buy => "BUY",
            TransactionSide::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Some(TransactionSide::Buy),
            "SELL" => Some(TransactionSide::Sell),
            _ => None,
        }
    }
}

/// Option contract right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionType::Call => "CALL",
            OptionType::Put => "PUT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CALL" => Some(OptionType::Call),
            "PUT" => Some(OptionType::Put),
            _ => None,
        }
    }

    fn letter(&self) -> char {
        match self {
            OptionType::Call => 'C',
            OptionType::Put => 'P',
        }
    }
}

/// A recorded buy or sell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub portfolio_id: i64,
    pub symbol: String,
    pub side: TransactionSide,
    pub quantity: f64,
    pub price: f64,
    pub transaction_date: NaiveDate,
    pub is_option: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub option_type: Option<OptionType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strike_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub underlying_symbol: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Position key this transaction aggregates under.
    ///
    /// Option rows missing their contract terms fall back to an equity key on
    /// the raw symbol; `NewTransaction::validate` prevents such rows from being written.
    pub fn position_key(&self) -> PositionKey {
        match (self.is_option, self.option_type, self.strike_price, self.expiration_date) {
            (true, Some(option_type), Some(strike), Some(expiration)) => PositionKey::Option {
                underlying: self
                    .underlying_symbol
                    .clone()
                    .unwrap_or_else(|| self.symbol.clone())
                    .to_uppercase(),
                option_type,
                strike,
                expiration,
            },
            _ => PositionKey::Equity(self.symbol.to_uppercase()),
        }
    }
}

/// Request body for creating or replacing a transaction.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTransaction {
    pub symbol: String,
    #[serde(alias = "transaction_type")]
    pub side: TransactionSide,
    pub quantity: f64,
    pub price: f64,
    pub transaction_date: NaiveDate,
    #[serde(default)]
    pub is_option: bool,
    #[serde(default)]
    pub option_type: Option<OptionType>,
    #[serde(default)]
    pub strike_price: Option<f64>,
    #[serde(default)]
    pub expiration_date: Option<NaiveDate>,
    #[serde(default)]
    pub underlying_symbol: Option<String>,
}

/// Maximum symbol length accepted (OCC option symbols are 21 characters).
const MAX_SYMBOL_LEN: usize = 21;

fn valid_symbol(symbol: &str) -> bool {
    !symbol.is_empty()
        && symbol.len() <= MAX_SYMBOL_LEN
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^'))
}

/// Trimmed, uppercased symbol, or `None` when it is not a valid ticker.
pub fn normalize_symbol(raw: &str) -> Option<String> {
    let symbol = raw.trim().to_uppercase();
    valid_symbol(&symbol).then_some(symbol)
}

impl NewTransaction {
    /// Check field-level constraints and normalize symbols.
    pub fn validate(mut self) -> Result<Self, String> {
        self.symbol = self.symbol.trim().to_uppercase();
        if !valid_symbol(&self.symbol) {
            return Err(format!("Invalid symbol '{}'", self.symbol));
        }
        if !self.quantity.is_finite() || self.quantity <= 0.0 {
            return Err("Quantity must be greater than zero".to_string());
        }
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err("Price must be greater than zero".to_string());
        }

        if self.is_option {
            if self.option_type.is_none() {
                return Err("Option transactions require option_type".to_string());
            }
            match self.strike_price {
                Some(strike) if strike.is_finite() && strike > 0.0 => {}
                _ => return Err("Option transactions require a positive strike_price".to_string()),
            }
            if self.expiration_date.is_none() {
                return Err("Option transactions require expiration_date".to_string());
            }
            let underlying = self
                .underlying_symbol
                .take()
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| self.symbol.clone());
            if !valid_symbol(&underlying) {
                return Err(format!("Invalid underlying symbol '{}'", underlying));
            }
            self.underlying_symbol = Some(underlying);
        } else {
            self.option_type = None;
            self.strike_price = None;
            self.expiration_date = None;
            self.underlying_symbol = None;
        }

        Ok(self)
    }

    /// Materialize into a ledger row with the given identity.
    pub fn into_transaction(self, id: i64, portfolio_id: i64, created_at: DateTime<Utc>) -> Transaction {
        Transaction {
            id,
            portfolio_id,
            symbol: self.symbol,
            side: self.side,
            quantity: self.quantity,
            price: self.price,
            transaction_date: self.transaction_date,
            is_option: self.is_option,
            option_type: self.option_type,
            strike_price: self.strike_price,
            expiration_date: self.expiration_date,
            underlying_symbol: self.underlying_symbol,
            created_at,
        }
    }
}

/// Identity used to group transactions into one holding.
#[derive(Debug, Clone)]
pub enum PositionKey {
    Equity(String),
    Option {
        underlying: String,
        option_type: OptionType,
        strike: f64,
        expiration: NaiveDate,
    },
}

impl PositionKey {
    pub fn equity(symbol: &str) -> Self {
        PositionKey::Equity(symbol.to_uppercase())
    }

    pub fn is_option(&self) -> bool {
        matches!(self, PositionKey::Option { .. })
    }

    /// Symbol used for quote lookups (the underlying for options).
    pub fn underlying(&self) -> &str {
        match self {
            PositionKey::Equity(symbol) => symbol,
            PositionKey::Option { underlying, .. } => underlying,
        }
    }

    /// Human-readable label, e.g. `AAPL` or `AAPL 01/17/25 150C`. Strikes print in
    /// shortest form, so a whole strike has no `.0`.
    pub fn display_symbol(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionKey::Equity(symbol) => write!(f, "{}", symbol),
            PositionKey::Option {
                underlying,
                option_type,
                strike,
                expiration,
            } => write!(
                f,
                "{} {} {}{}",
                underlying,
                expiration.format("%m/%d/%y"),
                strike,
                option_type.letter()
            ),
        }
    }
}

// Strikes compare bitwise; they are validated finite and positive at write time.
impl PartialEq for PositionKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PositionKey::Equity(a), PositionKey::Equity(b)) => a == b,
            (
                PositionKey::Option {
                    underlying: ua,
                    option_type: ta,
                    strike: sa,
                    expiration: ea,
                },
                PositionKey::Option {
                    underlying: ub,
                    option_type: tb,
                    strike: sb,
                    expiration: eb,
                },
            ) => ua == ub && ta == tb && sa.to_bits() == sb.to_bits() && ea == eb,
            _ => false,
        }
    }
}

impl Eq for PositionKey {}

impl Hash for PositionKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            PositionKey::Equity(symbol) => {
                0u8.hash(state);
                symbol.hash(state);
            }
            PositionKey::Option {
                underlying,
                option_type,
                strike,
                expiration,
            } => {
                1u8.hash(state);
                underlying.hash(state);
                option_type.hash(state);
                strike.to_bits().hash(state);
                expiration.hash(state);
            }
        }
    }
}
