use super::types::*;
use super::{DailyClose, MarketDataProvider};
use crate::errors::{DeskError, DeskResult};
use crate::payoff::{ContractQuote, ContractType, QuoteExtras};
use chrono::{DateTime, NaiveDate};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use reqwest::Client;

/// Yahoo Finance JSON client. All methods return Result, never panic.
#[derive(Clone)]
pub struct YahooClient {
    client: Client,
    base_url: String,
}

impl YahooClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(timeout_secs))
                .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
                .pool_max_idle_per_host(4)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> DeskResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.client.get(&url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DeskError::DataUnavailable(format!("GET {path}: HTTP {status}: {body}")));
        }

        resp.json::<T>()
            .await
            .map_err(|e| DeskError::DataUnavailable(format!("GET {path}: {e}")))
    }

    async fn options(&self, ticker: &str, expiration: Option<NaiveDate>) -> DeskResult<OptionChainResult> {
        let query = expiration
            .map(|d| format!("?date={}", expiration_timestamp(d)))
            .unwrap_or_default();
        let resp: OptionsResponse = self
            .get_json(&format!("/v7/finance/options/{ticker}{query}"))
            .await?;
        first_result(resp.option_chain.result, resp.option_chain.error, ticker)
    }

    async fn chart(&self, ticker: &str, query: &str) -> DeskResult<ChartResult> {
        let resp: ChartResponse = self
            .get_json(&format!("/v8/finance/chart/{ticker}?{query}"))
            .await?;
        first_result(resp.chart.result, resp.chart.error, ticker)
    }
}

impl MarketDataProvider for YahooClient {
    fn list_expirations<'a>(&'a self, ticker: &'a str) -> BoxFuture<'a, DeskResult<Vec<NaiveDate>>> {
        async move {
            let result = self.options(ticker, None).await?;
            let dates = expirations_from(&result);
            if dates.is_empty() {
                return Err(DeskError::DataUnavailable(format!("no options listed for {ticker}")));
            }
            tracing::debug!(ticker, count = dates.len(), "expirations fetched");
            Ok(dates)
        }
        .boxed()
    }

    fn get_chain<'a>(
        &'a self,
        ticker: &'a str,
        expiration: NaiveDate,
    ) -> BoxFuture<'a, DeskResult<Vec<ContractQuote>>> {
        async move {
            let result = self.options(ticker, Some(expiration)).await?;
            let quotes = quotes_from(&result, expiration);
            if quotes.is_empty() {
                return Err(DeskError::DataUnavailable(format!(
                    "no chain for {ticker} expiring {expiration}"
                )));
            }
            tracing::debug!(ticker, %expiration, rows = quotes.len(), "chain fetched");
            Ok(quotes)
        }
        .boxed()
    }

    fn get_last_price<'a>(&'a self, ticker: &'a str) -> BoxFuture<'a, DeskResult<f64>> {
        async move {
            let result = self.chart(ticker, "range=1d&interval=1d").await?;
            result
                .meta
                .and_then(|m| m.regular_market_price)
                .filter(|p| p.is_finite() && *p > 0.0)
                .ok_or_else(|| DeskError::DataUnavailable(format!("no last price for {ticker}")))
        }
        .boxed()
    }

    fn get_daily_closes<'a>(
        &'a self,
        ticker: &'a str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> BoxFuture<'a, DeskResult<Vec<DailyClose>>> {
        async move {
            if end < start {
                return Err(DeskError::InvalidParameter(format!(
                    "end {end} is before start {start}"
                )));
            }
            let mut parts: smallvec::SmallVec<[String; 4]> = smallvec::SmallVec::new();
            parts.push(format!("period1={}", day_start_timestamp(start)));
            // period2 is exclusive; include the whole end day
            parts.push(format!("period2={}", day_start_timestamp(end) + 86_400));
            parts.push("interval=1d".to_string());
            parts.push("events=history".to_string());

            let result = self.chart(ticker, &parts.join("&")).await?;
            let closes = closes_from(&result);
            if closes.is_empty() {
                return Err(DeskError::DataUnavailable(format!(
                    "no price history for {ticker} between {start} and {end}"
                )));
            }
            Ok(closes)
        }
        .boxed()
    }

    fn get_earnings_date<'a>(&'a self, ticker: &'a str) -> BoxFuture<'a, DeskResult<Option<NaiveDate>>> {
        async move {
            let resp: QuoteSummaryResponse = self
                .get_json(&format!("/v10/finance/quoteSummary/{ticker}?modules=calendarEvents"))
                .await?;
            let result = first_result(resp.quote_summary.result, resp.quote_summary.error, ticker)?;
            Ok(earnings_from(&result))
        }
        .boxed()
    }
}

fn first_result<T>(result: Option<Vec<T>>, error: Option<ApiError>, ticker: &str) -> DeskResult<T> {
    if let Some(err) = error {
        return Err(DeskError::DataUnavailable(format!("{ticker}: {}", err.message())));
    }
    result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| DeskError::DataUnavailable(format!("no data returned for {ticker}")))
}

/// Listed expirations are keyed by midnight UTC of the expiration day.
fn expiration_timestamp(date: NaiveDate) -> i64 {
    day_start_timestamp(date)
}

fn day_start_timestamp(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}

fn ts_to_date(ts: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(ts, 0).map(|dt| dt.date_naive())
}

fn expirations_from(result: &OptionChainResult) -> Vec<NaiveDate> {
    result
        .expiration_dates
        .iter()
        .filter_map(|&ts| ts_to_date(ts))
        .collect()
}

/// Calls and puts in provider order, calls first.
fn quotes_from(result: &OptionChainResult, expiration: NaiveDate) -> Vec<ContractQuote> {
    let Some(block) = result.options.first() else {
        return Vec::new();
    };

    let convert = |data: &OptionContractData, contract_type: ContractType| ContractQuote {
        contract_type: Some(contract_type),
        strike: data.strike,
        bid: data.bid,
        ask: data.ask,
        extras: QuoteExtras {
            contract_symbol: data.contract_symbol.clone(),
            expiration: data.expiration.and_then(ts_to_date).or(Some(expiration)),
            last_price: data.last_price,
            volume: data.volume.and_then(|v| u64::try_from(v).ok()),
            open_interest: data.open_interest.and_then(|v| u64::try_from(v).ok()),
            implied_volatility: data.implied_volatility,
        },
    };

    block
        .calls
        .iter()
        .map(|c| convert(c, ContractType::Call))
        .chain(block.puts.iter().map(|p| convert(p, ContractType::Put)))
        .collect()
}

/// Prefers adjusted closes; falls back to raw closes. Days without a
/// value are skipped.
fn closes_from(result: &ChartResult) -> Vec<DailyClose> {
    let Some(indicators) = result.indicators.as_ref() else {
        return Vec::new();
    };
    let series: &[Option<f64>] = indicators
        .adjclose
        .first()
        .map(|a| a.adjclose.as_slice())
        .filter(|s| !s.is_empty())
        .or_else(|| indicators.quote.first().map(|q| q.close.as_slice()))
        .unwrap_or(&[]);

    result
        .timestamp
        .iter()
        .zip(series.iter())
        .filter_map(|(&ts, close)| {
            let close = close.filter(|c| c.is_finite())?;
            Some(DailyClose {
                date: ts_to_date(ts)?,
                close,
            })
        })
        .collect()
}

fn earnings_from(result: &QuoteSummaryResult) -> Option<NaiveDate> {
    result
        .calendar_events
        .as_ref()?
        .earnings
        .as_ref()?
        .earnings_date
        .first()?
        .raw
        .and_then(ts_to_date)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPTIONS_JSON: &str = r#"{
      "optionChain": {
        "result": [{
          "expirationDates": [1752796800, 1755216000],
          "quote": {"regularMarketPrice": 10.42},
          "options": [{
            "calls": [
              {"contractSymbol": "SOUN250718C00010000", "strike": 10.0, "bid": 1.1, "ask": 1.3,
               "lastPrice": 1.2, "volume": 340, "openInterest": 5120, "impliedVolatility": 0.91,
               "expiration": 1752796800}
            ],
            "puts": [
              {"contractSymbol": "SOUN250718P00010000", "strike": 10.0, "ask": 0.9}
            ]
          }]
        }],
        "error": null
      }
    }"#;

    #[test]
    fn test_parse_option_chain() {
        let resp: OptionsResponse = serde_json::from_str(OPTIONS_JSON).unwrap();
        let result = first_result(resp.option_chain.result, resp.option_chain.error, "SOUN").unwrap();

        let expiries = expirations_from(&result);
        assert_eq!(expiries[0], NaiveDate::from_ymd_opt(2025, 7, 18).unwrap());
        assert_eq!(expiries.len(), 2);

        let quotes = quotes_from(&result, expiries[0]);
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].contract_type, Some(ContractType::Call));
        assert_eq!(quotes[0].extras.open_interest, Some(5120));
        assert_eq!(quotes[1].contract_type, Some(ContractType::Put));
        // missing bid is kept missing, not zeroed
        assert_eq!(quotes[1].bid, None);
        assert_eq!(quotes[1].extras.expiration, Some(expiries[0]));
    }

    #[test]
    fn test_api_error_is_data_unavailable() {
        let json = r#"{"optionChain": {"result": null,
            "error": {"code": "Not Found", "description": "No data found"}}}"#;
        let resp: OptionsResponse = serde_json::from_str(json).unwrap();
        let err = first_result(resp.option_chain.result, resp.option_chain.error, "ZZZZ").unwrap_err();
        assert!(matches!(err, DeskError::DataUnavailable(_)), "got {err:?}");
    }

    #[test]
    fn test_parse_chart_closes() {
        let json = r#"{"chart": {"result": [{
            "meta": {"regularMarketPrice": 101.5},
            "timestamp": [1451914200, 1452000600, 1452087000],
            "indicators": {
              "quote": [{"close": [100.0, 98.0, null]}],
              "adjclose": [{"adjclose": [99.0, 97.0, null]}]
            }}], "error": null}}"#;
        let resp: ChartResponse = serde_json::from_str(json).unwrap();
        let result = first_result(resp.chart.result, resp.chart.error, "^IXIC").unwrap();
        let closes = closes_from(&result);
        assert_eq!(closes.len(), 2, "null close is skipped");
        assert_eq!(closes[0].close, 99.0, "adjusted close preferred");
        assert_eq!(closes[0].date, NaiveDate::from_ymd_opt(2016, 1, 4).unwrap());
    }

    #[test]
    fn test_parse_earnings_date() {
        let json = r#"{"quoteSummary": {"result": [{"calendarEvents": {"earnings":
            {"earningsDate": [{"raw": 1753272000, "fmt": "2025-07-23"}]}}}], "error": null}}"#;
        let resp: QuoteSummaryResponse = serde_json::from_str(json).unwrap();
        let result = first_result(resp.quote_summary.result, resp.quote_summary.error, "GOOG").unwrap();
        assert_eq!(earnings_from(&result), NaiveDate::from_ymd_opt(2025, 7, 23));
    }

    #[test]
    fn test_expiration_timestamp_is_midnight_utc() {
        let d = NaiveDate::from_ymd_opt(2025, 7, 18).unwrap();
        assert_eq!(expiration_timestamp(d), 1752796800);
    }

    #[tokio::test]
    #[ignore] // Requires network
    async fn test_live_expirations() {
        let client = YahooClient::new("https://query1.finance.yahoo.com", 10);
        let expiries = client.list_expirations("SPY").await.unwrap();
        assert!(!expiries.is_empty());
    }
}
