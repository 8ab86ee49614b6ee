//! Portfolio valuation engine.
//!
//! Pure functions that fold an ordered transaction ledger into positions using
//! weighted-average cost basis, then price those positions against live quotes.
//! Fold order is chronological by `transaction_date`, ties broken by id
//! (insertion order); changing the order changes the average cost.

use std::collections::HashMap;
use thiserror::Error;

use crate::types::{
    finite, Holding, LivePrice, Portfolio, PositionKey, Transaction, TransactionSide,
};

/// Quantities below this are treated as zero.
pub const QUANTITY_EPSILON: f64 = 1e-9;

/// Shares per listed option contract.
pub const OPTION_CONTRACT_MULTIPLIER: f64 = 100.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValuationError {
    #[error("Insufficient quantity for {symbol}: requested {requested}, held {available}")]
    InsufficientQuantity {
        symbol: String,
        requested: f64,
        available: f64,
    },

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
}

/// Running state of one position key after folding.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionState {
    pub key: PositionKey,
    /// Symbol of the most recent transaction, used for quote lookups.
    pub quote_symbol: String,
    pub quantity: f64,
    /// Cost of the open quantity in per-unit prices, before the contract multiplier.
    pub total_cost: f64,
}

impl PositionState {
    fn new(key: PositionKey, quote_symbol: String) -> Self {
        Self {
            key,
            quote_symbol,
            quantity: 0.0,
            total_cost: 0.0,
        }
    }

    pub fn average_cost_basis(&self) -> f64 {
        if self.quantity > QUANTITY_EPSILON {
            self.total_cost / self.quantity
        } else {
            0.0
        }
    }

    pub fn is_open(&self) -> bool {
        self.quantity > QUANTITY_EPSILON
    }

    fn multiplier(&self) -> f64 {
        if self.key.is_option() {
            OPTION_CONTRACT_MULTIPLIER
        } else {
            1.0
        }
    }
}

/// Outcome of folding a whole ledger.
#[derive(Debug, Clone, Default)]
pub struct FoldedLedger {
    /// Positions in order of first appearance, closed ones included.
    pub positions: Vec<PositionState>,
    /// Realized gain or loss per SELL transaction id, contract multiplier applied.
    pub realized: HashMap<i64, f64>,
}

impl FoldedLedger {
    pub fn open_positions(&self) -> impl Iterator<Item = &PositionState> {
        self.positions.iter().filter(|p| p.is_open())
    }
}

/// Sort a ledger into fold order.
pub fn sort_ledger(transactions: &mut [Transaction]) {
    transactions.sort_by(|a, b| {
        a.transaction_date
            .cmp(&b.transaction_date)
            .then(a.id.cmp(&b.id))
    });
}

/// Fold transactions into positions.
///
/// Fails with `InsufficientQuantity` when a SELL exceeds the quantity held at
/// that point in the ledger.
pub fn fold_ledger(transactions: &[Transaction]) -> Result<FoldedLedger, ValuationError> {
    let mut ordered = transactions.to_vec();
    sort_ledger(&mut ordered);

    let mut index: HashMap<PositionKey, usize> = HashMap::new();
    let mut ledger = FoldedLedger::default();

    for tx in &ordered {
        if !(tx.quantity.is_finite() && tx.quantity > 0.0 && tx.price.is_finite() && tx.price > 0.0) {
            return Err(ValuationError::InvalidTransaction(format!(
                "transaction {} has non-positive quantity or price",
                tx.id
            )));
        }

        let key = tx.position_key();
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            ledger
                .positions
                .push(PositionState::new(key.clone(), tx.symbol.clone()));
            ledger.positions.len() - 1
        });
        let state = &mut ledger.positions[slot];
        state.quote_symbol = tx.symbol.clone();

        match tx.side {
            TransactionSide::Buy => {
                state.total_cost += tx.quantity * tx.price;
                state.quantity += tx.quantity;
            }
            TransactionSide::Sell => {
                if tx.quantity > state.quantity + QUANTITY_EPSILON {
                    return Err(ValuationError::InsufficientQuantity {
                        symbol: key.display_symbol(),
                        requested: tx.quantity,
                        available: state.quantity,
                    });
                }
                let average = state.average_cost_basis();
                let realized = (tx.price - average) * tx.quantity * state.multiplier();
                ledger.realized.insert(tx.id, realized);

                state.total_cost -= tx.quantity * average;
                state.quantity -= tx.quantity;
                if state.quantity <= QUANTITY_EPSILON {
                    state.quantity = 0.0;
                    state.total_cost = 0.0;
                }
            }
        }
    }

    Ok(ledger)
}

/// Reject a ledger that would oversell at any point.
pub fn check_ledger(transactions: &[Transaction]) -> Result<(), ValuationError> {
    fold_ledger(transactions).map(|_| ())
}

fn ratio_percent(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator.abs() > f64::EPSILON {
        finite(Some(numerator / denominator * 100.0))
    } else {
        None
    }
}

/// Price one open position. A missing live price leaves the market fields null.
pub fn value_position(state: &PositionState, price: Option<&LivePrice>) -> Holding {
    let multiplier = state.multiplier();
    let quantity = state.quantity;
    let total_cost_basis = state.total_cost * multiplier;

    let current_price = price.and_then(|p| finite(Some(p.price)));
    let market_value = current_price.map(|p| p * quantity * multiplier);
    let unrealized_gain_loss = market_value.map(|mv| mv - total_cost_basis);
    let unrealized_gain_loss_percent =
        unrealized_gain_loss.and_then(|gain| ratio_percent(gain, total_cost_basis));

    let prior_close = price.and_then(|p| finite(p.prior_close));
    let (todays_change, todays_change_percent) = match (current_price, prior_close) {
        (Some(current), Some(prior)) => (
            finite(Some((current - prior) * quantity * multiplier)),
            ratio_percent(current - prior, prior),
        ),
        _ => (None, None),
    };

    let (option_type, strike_price, expiration_date, underlying_symbol) = match &state.key {
        PositionKey::Option {
            underlying,
            option_type,
            strike,
            expiration,
        } => (
            Some(*option_type),
            Some(*strike),
            Some(*expiration),
            Some(underlying.clone()),
        ),
        PositionKey::Equity(_) => (None, None, None, None),
    };

    Holding {
        position_key: state.key.display_symbol(),
        symbol: state.quote_symbol.clone(),
        quantity,
        average_cost_basis: state.average_cost_basis(),
        total_cost_basis,
        current_price,
        market_value,
        unrealized_gain_loss,
        unrealized_gain_loss_percent,
        todays_change,
        todays_change_percent,
        is_option: state.key.is_option(),
        option_type,
        strike_price,
        expiration_date,
        underlying_symbol,
    }
}

/// Value a ledger against live prices keyed by position.
///
/// Holdings are ordered equities first, then options, each by display symbol.
/// Totals sum the non-null per-holding figures.
pub fn valuate(
    transactions: &[Transaction],
    live_prices: &HashMap<PositionKey, LivePrice>,
) -> Result<Portfolio, ValuationError> {
    let ledger = fold_ledger(transactions)?;

    let mut holdings: Vec<Holding> = ledger
        .open_positions()
        .map(|state| value_position(state, live_prices.get(&state.key)))
        .collect();
    holdings.sort_by(|a, b| {
        a.is_option
            .cmp(&b.is_option)
            .then_with(|| a.position_key.cmp(&b.position_key))
    });

    Ok(aggregate(holdings))
}

fn aggregate(holdings: Vec<Holding>) -> Portfolio {
    let total_cost_basis: f64 = holdings.iter().map(|h| h.total_cost_basis).sum();
    let total_market_value: f64 = holdings.iter().filter_map(|h| h.market_value).sum();
    let total_todays_change: f64 = holdings.iter().filter_map(|h| h.todays_change).sum();

    let priced_cost: f64 = holdings
        .iter()
        .filter(|h| h.unrealized_gain_loss.is_some())
        .map(|h| h.total_cost_basis)
        .sum();
    let total_unrealized_gain_loss: f64 =
        holdings.iter().filter_map(|h| h.unrealized_gain_loss).sum();
    let total_unrealized_gain_loss_percent = ratio_percent(total_unrealized_gain_loss, priced_cost);

    Portfolio {
        holdings,
        total_market_value,
        total_cost_basis,
        total_unrealized_gain_loss,
        total_unrealized_gain_loss_percent,
        total_todays_change,
    }
}
