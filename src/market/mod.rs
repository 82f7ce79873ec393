pub mod types;
pub mod yahoo;

use crate::errors::DeskResult;
use crate::payoff::ContractQuote;
use chrono::NaiveDate;
use futures_util::future::BoxFuture;

/// One daily closing price.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DailyClose {
    pub date: NaiveDate,
    pub close: f64,
}

/// Source of quotes, prices and calendar data.
/// Every failure is reported as DataUnavailable; callers never see
/// transport details. Object-safe so the server can hold `Arc<dyn ...>`.
pub trait MarketDataProvider: Send + Sync {
    fn list_expirations<'a>(&'a self, ticker: &'a str) -> BoxFuture<'a, DeskResult<Vec<NaiveDate>>>;

    fn get_chain<'a>(
        &'a self,
        ticker: &'a str,
        expiration: NaiveDate,
    ) -> BoxFuture<'a, DeskResult<Vec<ContractQuote>>>;

    fn get_last_price<'a>(&'a self, ticker: &'a str) -> BoxFuture<'a, DeskResult<f64>>;

    fn get_daily_closes<'a>(
        &'a self,
        ticker: &'a str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> BoxFuture<'a, DeskResult<Vec<DailyClose>>>;

    fn get_earnings_date<'a>(&'a self, ticker: &'a str) -> BoxFuture<'a, DeskResult<Option<NaiveDate>>>;
}

/// Canonical form for user-typed tickers.
pub fn normalize_ticker(raw: &str) -> Option<String> {
    let t = raw.trim().to_ascii_uppercase();
    let valid = !t.is_empty()
        && t.len() <= 12
        && t.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '^' | '.' | '-' | '='));
    valid.then_some(t)
}
