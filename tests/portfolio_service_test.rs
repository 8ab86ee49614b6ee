//! Integration tests for portfolio management, ledger writes and valuation

mod common;

use chrono::NaiveDate;
use common::{test_state, FakeProvider};
use holdview::types::{NewTransaction, PortfolioInput, TransactionSide, WatchlistInput};
use holdview::AppError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};

const USER: &str = "user-1";

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

fn trade(symbol: &str, side: TransactionSide, quantity: f64, price: f64, date: NaiveDate) -> NewTransaction {
    NewTransaction {
        symbol: symbol.to_string(),
        side,
        quantity,
        price,
        transaction_date: date,
        is_option: false,
        option_type: None,
        strike_price: None,
        expiration_date: None,
        underlying_symbol: None,
    }
}

fn priced_provider() -> Arc<FakeProvider> {
    Arc::new(
        FakeProvider::new()
            .with_quote("AAPL", 165.0, Some(160.0))
            .with_quote("MSFT", 410.0, Some(400.0)),
    )
}

// ============================================================================
// Portfolios
// ============================================================================

#[tokio::test]
async fn test_default_portfolio_created_once() {
    let state = test_state(priced_provider());
    let first = state.portfolios.get_or_create_default(USER).unwrap();
    let second = state.portfolios.get_or_create_default(USER).unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.name, "My Portfolio");
    assert_eq!(state.portfolios.list_portfolios(USER).unwrap().len(), 1);
}

#[tokio::test]
async fn test_portfolio_name_validated() {
    let state = test_state(priced_provider());
    let input = PortfolioInput {
        name: "   ".to_string(),
        description: None,
    };
    assert!(matches!(
        state.portfolios.create_portfolio(USER, &input),
        Err(AppError::Validation(_))
    ));
}

#[tokio::test]
async fn test_other_users_portfolio_is_not_found() {
    let state = test_state(priced_provider());
    let portfolio = state.portfolios.get_or_create_default(USER).unwrap();

    assert!(matches!(
        state.portfolios.owned("intruder", portfolio.id),
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        state
            .portfolios
            .add_transaction("intruder", portfolio.id, trade("AAPL", TransactionSide::Buy, 1.0, 1.0, day(1)))
            .await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        state.portfolios.delete_portfolio("intruder", portfolio.id).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_portfolio_removes_ledger() {
    let state = test_state(priced_provider());
    let portfolio = state
        .portfolios
        .create_portfolio(
            USER,
            &PortfolioInput {
                name: "Scratch".to_string(),
                description: Some("temporary".to_string()),
            },
        )
        .unwrap();
    state
        .portfolios
        .add_transaction(USER, portfolio.id, trade("AAPL", TransactionSide::Buy, 1.0, 100.0, day(1)))
        .await
        .unwrap();

    state.portfolios.delete_portfolio(USER, portfolio.id).await.unwrap();
    assert!(state.portfolios.store().list_transactions(portfolio.id).unwrap().is_empty());
    assert!(matches!(
        state.portfolios.owned(USER, portfolio.id),
        Err(AppError::NotFound(_))
    ));
}

// ============================================================================
// Ledger writes
// ============================================================================

#[tokio::test]
async fn test_sell_receipt_carries_realized_gain() {
    let state = test_state(priced_provider());
    let pid = state.portfolios.get_or_create_default(USER).unwrap().id;

    let buy = state
        .portfolios
        .add_transaction(USER, pid, trade("aapl ", TransactionSide::Buy, 10.0, 150.0, day(1)))
        .await
        .unwrap();
    assert_eq!(buy.transaction.symbol, "AAPL");
    assert!(buy.realized_gain_loss.is_none());

    let sell = state
        .portfolios
        .add_transaction(USER, pid, trade("AAPL", TransactionSide::Sell, 4.0, 170.0, day(2)))
        .await
        .unwrap();
    assert_eq!(sell.realized_gain_loss, Some(80.0));
}

#[tokio::test]
async fn test_oversell_rejected_and_not_recorded() {
    let state = test_state(priced_provider());
    let pid = state.portfolios.get_or_create_default(USER).unwrap().id;
    state
        .portfolios
        .add_transaction(USER, pid, trade("AAPL", TransactionSide::Buy, 10.0, 150.0, day(1)))
        .await
        .unwrap();

    let result = state
        .portfolios
        .add_transaction(USER, pid, trade("AAPL", TransactionSide::Sell, 15.0, 160.0, day(2)))
        .await;
    match result {
        Err(AppError::InsufficientQuantity {
            symbol,
            requested,
            available,
        }) => {
            assert_eq!(symbol, "AAPL");
            assert_eq!(requested, 15.0);
            assert_eq!(available, 10.0);
        }
        other => panic!("expected InsufficientQuantity, got {:?}", other),
    }
    assert_eq!(state.portfolios.list_transactions(USER, pid).unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_transaction_rejected() {
    let state = test_state(priced_provider());
    let pid = state.portfolios.get_or_create_default(USER).unwrap().id;

    let result = state
        .portfolios
        .add_transaction(USER, pid, trade("AAPL", TransactionSide::Buy, 0.0, 150.0, day(1)))
        .await;
    assert!(matches!(result, Err(AppError::Validation(_))));

    let mut option = trade("AAPL", TransactionSide::Buy, 1.0, 5.0, day(1));
    option.is_option = true;
    let result = state.portfolios.add_transaction(USER, pid, option).await;
    assert!(matches!(result, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn test_edits_that_oversell_are_rejected() {
    let state = test_state(priced_provider());
    let pid = state.portfolios.get_or_create_default(USER).unwrap().id;
    let buy = state
        .portfolios
        .add_transaction(USER, pid, trade("AAPL", TransactionSide::Buy, 10.0, 150.0, day(1)))
        .await
        .unwrap();
    state
        .portfolios
        .add_transaction(USER, pid, trade("AAPL", TransactionSide::Sell, 8.0, 160.0, day(2)))
        .await
        .unwrap();

    // Shrinking the buy below the later sell.
    let shrink = state
        .portfolios
        .update_transaction(
            USER,
            pid,
            buy.transaction.id,
            trade("AAPL", TransactionSide::Buy, 5.0, 150.0, day(1)),
        )
        .await;
    assert!(matches!(shrink, Err(AppError::InsufficientQuantity { .. })));

    // Removing the buy entirely.
    let delete = state
        .portfolios
        .delete_transaction(USER, pid, buy.transaction.id)
        .await;
    assert!(matches!(delete, Err(AppError::InsufficientQuantity { .. })));

    // The ledger is untouched.
    let ledger = state.portfolios.list_transactions(USER, pid).unwrap();
    assert_eq!(ledger.len(), 2);
    assert_eq!(ledger.iter().find(|t| t.id == buy.transaction.id).unwrap().quantity, 10.0);
}

#[tokio::test]
async fn test_valid_edit_recomputes_receipt() {
    let state = test_state(priced_provider());
    let pid = state.portfolios.get_or_create_default(USER).unwrap().id;
    state
        .portfolios
        .add_transaction(USER, pid, trade("MSFT", TransactionSide::Buy, 10.0, 300.0, day(1)))
        .await
        .unwrap();
    let sell = state
        .portfolios
        .add_transaction(USER, pid, trade("MSFT", TransactionSide::Sell, 5.0, 350.0, day(2)))
        .await
        .unwrap();

    let edited = state
        .portfolios
        .update_transaction(
            USER,
            pid,
            sell.transaction.id,
            trade("MSFT", TransactionSide::Sell, 5.0, 400.0, day(2)),
        )
        .await
        .unwrap();
    assert_eq!(edited.transaction.id, sell.transaction.id);
    assert_eq!(edited.realized_gain_loss, Some(500.0));
}

// ============================================================================
// Valuation
// ============================================================================

#[tokio::test]
async fn test_view_values_holdings() {
    let state = test_state(priced_provider());
    let pid = state.portfolios.get_or_create_default(USER).unwrap().id;
    state
        .portfolios
        .add_transaction(USER, pid, trade("AAPL", TransactionSide::Buy, 10.0, 150.0, day(1)))
        .await
        .unwrap();

    let view = state.portfolios.default_view(USER).await.unwrap();
    assert_eq!(view.record.id, pid);
    let holding = &view.valuation.holdings[0];
    assert_eq!(holding.market_value, Some(1650.0));
    assert_eq!(holding.unrealized_gain_loss, Some(150.0));
    assert_eq!(view.valuation.total_todays_change, 50.0);
}

#[tokio::test]
async fn test_quotes_down_degrades_valuation() {
    let provider = priced_provider();
    provider.set_quotes_down(true);
    let state = test_state(provider.clone());
    let pid = state.portfolios.get_or_create_default(USER).unwrap().id;
    state
        .portfolios
        .add_transaction(USER, pid, trade("AAPL", TransactionSide::Buy, 10.0, 150.0, day(1)))
        .await
        .unwrap();

    let view = state.portfolios.view(USER, pid).await.unwrap();
    let holding = &view.valuation.holdings[0];
    assert!(holding.current_price.is_none());
    assert!(holding.market_value.is_none());
    assert_eq!(holding.total_cost_basis, 1500.0);
    assert_eq!(view.valuation.total_market_value, 0.0);
    // HTTP 400 is permanent: one call, no retries.
    assert_eq!(provider.quote_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_quotes_served_from_cache() {
    let provider = priced_provider();
    let state = test_state(provider.clone());
    let pid = state.portfolios.get_or_create_default(USER).unwrap().id;
    state
        .portfolios
        .add_transaction(USER, pid, trade("AAPL", TransactionSide::Buy, 1.0, 150.0, day(1)))
        .await
        .unwrap();

    state.portfolios.value_portfolio(pid).await.unwrap();
    state.portfolios.value_portfolio(pid).await.unwrap();
    assert_eq!(provider.quote_calls.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Snapshots and performance
// ============================================================================

#[tokio::test]
async fn test_snapshot_and_performance_history() {
    let state = test_state(priced_provider());
    let pid = state.portfolios.get_or_create_default(USER).unwrap().id;
    state
        .portfolios
        .add_transaction(USER, pid, trade("MSFT", TransactionSide::Buy, 2.0, 300.0, day(1)))
        .await
        .unwrap();

    let snapshot = state.portfolios.take_snapshot(pid).await.unwrap();
    assert_eq!(snapshot.total_market_value, 820.0);
    assert_eq!(snapshot.total_cost_basis, 600.0);

    let history = state
        .portfolios
        .performance_history(USER, pid, None, None)
        .unwrap();
    assert_eq!(history.portfolio_id, pid);
    assert_eq!(history.performance_history.len(), 1);
    assert_eq!(history.performance_history[0].date, snapshot.date);

    // A window that excludes today is empty.
    let empty = state
        .portfolios
        .performance_history(USER, pid, Some(day(1)), Some(day(2)))
        .unwrap();
    assert!(empty.performance_history.is_empty());
}

#[tokio::test]
async fn test_performance_range_validated() {
    let state = test_state(priced_provider());
    let pid = state.portfolios.get_or_create_default(USER).unwrap().id;
    assert!(matches!(
        state
            .portfolios
            .performance_history(USER, pid, Some(day(5)), Some(day(1))),
        Err(AppError::BadRequest(_))
    ));
}

#[tokio::test]
async fn test_snapshot_of_missing_portfolio() {
    let state = test_state(priced_provider());
    assert!(matches!(
        state.portfolios.take_snapshot(999).await,
        Err(AppError::NotFound(_))
    ));
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_first_access_creates_one_default() {
    let state = test_state(priced_provider());
    const CALLERS: usize = 8;

    for round in 0..50 {
        let user = format!("racer-{}", round);
        let barrier = Barrier::new(CALLERS);
        let ids: Vec<i64> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..CALLERS)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        state.portfolios.get_or_create_default(&user).unwrap().id
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(state.portfolios.list_portfolios(&user).unwrap().len(), 1);
        assert!(ids.iter().all(|id| *id == ids[0]));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sells_never_oversell() {
    let state = test_state(priced_provider());
    let pid = state.portfolios.get_or_create_default(USER).unwrap().id;
    state
        .portfolios
        .add_transaction(USER, pid, trade("AAPL", TransactionSide::Buy, 10.0, 150.0, day(1)))
        .await
        .unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let portfolios = state.portfolios.clone();
        let done = done.clone();
        tokio::spawn(async move {
            let mut observed = Vec::new();
            while !done.load(Ordering::SeqCst) {
                let valuation = portfolios.value_portfolio(pid).await.unwrap();
                observed.push(valuation.holdings.first().map(|h| h.quantity).unwrap_or(0.0));
                tokio::task::yield_now().await;
            }
            observed
        })
    };

    let sells: Vec<_> = (0..16)
        .map(|_| {
            let portfolios = state.portfolios.clone();
            tokio::spawn(async move {
                portfolios
                    .add_transaction(USER, pid, trade("AAPL", TransactionSide::Sell, 3.0, 160.0, day(2)))
                    .await
            })
        })
        .collect();

    let mut accepted = 0;
    for sell in sells {
        match sell.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(AppError::InsufficientQuantity { .. }) => {}
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }
    done.store(true, Ordering::SeqCst);
    let observed = reader.await.unwrap();

    assert_eq!(accepted, 3);
    assert_eq!(state.portfolios.list_transactions(USER, pid).unwrap().len(), 4);
    let holding = &state.portfolios.value_portfolio(pid).await.unwrap().holdings[0];
    assert_eq!(holding.quantity, 1.0);
    // Every valuation saw a whole number of committed sells.
    for quantity in observed {
        assert!([10.0, 7.0, 4.0, 1.0].contains(&quantity), "observed {}", quantity);
    }
}

// ============================================================================
// Watchlist
// ============================================================================

#[tokio::test]
async fn test_watchlist_lifecycle() {
    let state = test_state(priced_provider());
    let item = state
        .portfolios
        .add_to_watchlist(
            USER,
            &WatchlistInput {
                symbol: " nvda".to_string(),
                name: None,
            },
        )
        .unwrap();
    assert_eq!(item.symbol, "NVDA");
    assert_eq!(item.name, "NVDA");

    let duplicate = state.portfolios.add_to_watchlist(
        USER,
        &WatchlistInput {
            symbol: "NVDA".to_string(),
            name: Some("Nvidia".to_string()),
        },
    );
    assert!(matches!(duplicate, Err(AppError::Conflict(_))));

    // Watchlists are per user.
    assert!(state.portfolios.watchlist("someone-else").unwrap().is_empty());

    state.portfolios.remove_from_watchlist(USER, "nvda").unwrap();
    assert!(state.portfolios.watchlist(USER).unwrap().is_empty());
    assert!(matches!(
        state.portfolios.remove_from_watchlist(USER, "NVDA"),
        Err(AppError::NotFound(_))
    ));
}
