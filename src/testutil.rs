//! Fixtures shared by the engine and handler tests.

use crate::config::AppConfig;
use crate::db;
use crate::errors::{DeskError, DeskResult};
use crate::market::{DailyClose, MarketDataProvider};
use crate::payoff::{ContractQuote, ContractType};
use crate::state::{AppState, DbCommand, EngineEvent, ParamsUpdate, Session, SessionSource};
use chrono::NaiveDate;
use futures_util::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Canned market data. Tickers listed in `earnings_down` fail their
/// earnings lookup; every other ticker reports `earnings_date`.
#[derive(Default)]
pub struct StubProvider {
    pub chain: Vec<ContractQuote>,
    pub last_price: Option<f64>,
    pub earnings_date: Option<NaiveDate>,
    pub earnings_down: Vec<&'static str>,
}

impl MarketDataProvider for StubProvider {
    fn list_expirations<'a>(&'a self, _: &'a str) -> BoxFuture<'a, DeskResult<Vec<NaiveDate>>> {
        async { Ok(Vec::new()) }.boxed()
    }

    fn get_chain<'a>(&'a self, _: &'a str, _: NaiveDate) -> BoxFuture<'a, DeskResult<Vec<ContractQuote>>> {
        async move { Ok(self.chain.clone()) }.boxed()
    }

    fn get_last_price<'a>(&'a self, ticker: &'a str) -> BoxFuture<'a, DeskResult<f64>> {
        async move {
            self.last_price
                .ok_or_else(|| DeskError::DataUnavailable(format!("no last price for {ticker}")))
        }
        .boxed()
    }

    fn get_daily_closes<'a>(
        &'a self,
        _: &'a str,
        _: NaiveDate,
        _: NaiveDate,
    ) -> BoxFuture<'a, DeskResult<Vec<DailyClose>>> {
        async { Ok(Vec::new()) }.boxed()
    }

    fn get_earnings_date<'a>(&'a self, ticker: &'a str) -> BoxFuture<'a, DeskResult<Option<NaiveDate>>> {
        async move {
            if self.earnings_down.iter().any(|t| *t == ticker) {
                return Err(DeskError::DataUnavailable(format!("{ticker}: Not Found")));
            }
            Ok(self.earnings_date)
        }
        .boxed()
    }
}

pub struct Harness {
    pub state: Arc<AppState>,
    pub engine_rx: Option<mpsc::Receiver<EngineEvent>>,
    pub db_rx: mpsc::Receiver<DbCommand>,
}

impl Harness {
    pub fn new(provider: StubProvider, env: &[(&str, &str)]) -> Self {
        let env: Vec<(String, String)> = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let config = AppConfig::from_lookup(move |key| {
            env.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
        })
        .unwrap();
        let (engine_tx, engine_rx) = mpsc::channel(64);
        let (db_tx, db_rx) = mpsc::channel(16);
        let state = AppState::new(
            config,
            db::init_memory_db().unwrap(),
            Arc::new(provider),
            engine_tx,
            db_tx,
        );
        Self {
            state,
            engine_rx: Some(engine_rx),
            db_rx,
        }
    }

    /// Starts the engine task against this harness's state.
    pub fn spawn_engine(&mut self) {
        let rx = self.engine_rx.take().expect("engine already running");
        tokio::spawn(crate::engine::run_engine(self.state.clone(), rx));
    }
}

pub fn sample_session(last_price: Option<f64>) -> Arc<Session> {
    Arc::new(Session::new(
        "SOUN".into(),
        None,
        vec![
            ContractQuote::new(ContractType::Put, 100.0, 4.0, 6.0),
            ContractQuote::new(ContractType::Call, 100.0, 4.0, 6.0),
        ],
        last_price,
        SessionSource::Csv,
    ))
}

pub fn update(target_price: f64, commission: Option<f64>) -> ParamsUpdate {
    ParamsUpdate {
        target_price,
        commission,
    }
}
