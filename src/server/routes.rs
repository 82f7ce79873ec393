use crate::analysis::daily_change;
use crate::db;
use crate::errors::DeskError;
use crate::market::normalize_ticker;
use crate::payoff::calculator::validate_params;
use crate::payoff::{ContractQuote, PayoffParams};
use crate::state::{
    AppState, DbCommand, EngineEvent, ParamsUpdate, PayoffSnapshot, Session, SessionSource,
};
use crate::tabular;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use chrono::NaiveDate;
use portable_atomic::Ordering;
use smallvec::SmallVec;
use std::sync::Arc;

const MAX_EARNINGS_TICKERS: usize = 50;

// ── Error responses ──

pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn new(kind: &'static str, message: String) -> Self {
        Self {
            status: status_for_kind(kind),
            kind,
            message,
        }
    }

    fn not_found(message: String) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            kind: "not_found",
            message,
        }
    }
}

fn status_for_kind(kind: &str) -> StatusCode {
    match kind {
        "invalid_parameter" | "missing_field" | "parse" => StatusCode::BAD_REQUEST,
        "data_unavailable" => StatusCode::BAD_GATEWAY,
        "no_session" => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<DeskError> for ApiError {
    fn from(e: DeskError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(kind = self.kind, "{}", self.message);
        }
        let body = serde_json::json!({ "error": self.kind, "message": self.message });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn ticker_param(raw: &str) -> ApiResult<String> {
    normalize_ticker(raw)
        .ok_or_else(|| DeskError::InvalidParameter(format!("invalid ticker {raw:?}")).into())
}

fn csv_response(filename: &str, body: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\"")),
        ],
        body,
    )
        .into_response()
}

/// Archives (unless reopened from the archive) and hands the session to the engine.
async fn start_session(state: &AppState, session: Session) -> ApiResult<Arc<Session>> {
    let session = Arc::new(session);
    state.counters.sessions_loaded.fetch_add(1, Ordering::Relaxed);

    if session.source != SessionSource::Archive {
        state.counters.archive_requests.fetch_add(1, Ordering::Relaxed);
        if state.db_tx.send(DbCommand::ArchiveChain(session.clone())).await.is_err() {
            tracing::warn!(ticker = %session.ticker, "db writer gone, chain not archived");
        }
    }

    state
        .engine_tx
        .send(EngineEvent::SessionLoaded(session.clone()))
        .await
        .map_err(|_| DeskError::ChannelClosed("engine".into()))?;
    Ok(session)
}

// ── Handlers ──

#[derive(serde::Deserialize)]
pub struct TickerQuery {
    pub ticker: String,
}

/// GET /api/expirations?ticker=
pub async fn get_expirations(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TickerQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let ticker = ticker_param(&q.ticker)?;
    let expirations = state.provider.list_expirations(&ticker).await?;
    Ok(Json(serde_json::json!({ "ticker": ticker, "expirations": expirations })))
}

#[derive(serde::Deserialize)]
pub struct LoadSessionRequest {
    pub ticker: String,
    pub expiration: NaiveDate,
}

/// POST /api/session -- fetch a chain from the provider
pub async fn load_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoadSessionRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let ticker = ticker_param(&req.ticker)?;
    let quotes = state.provider.get_chain(&ticker, req.expiration).await?;

    // the table is still useful without a spot price; only the stock comparison needs it
    let last_price = match state.provider.get_last_price(&ticker).await {
        Ok(p) => Some(p),
        Err(e) => {
            tracing::warn!(ticker = %ticker, "last price unavailable: {e}");
            None
        }
    };

    let session = Session::new(ticker, Some(req.expiration), quotes, last_price, SessionSource::Provider);
    let session = start_session(&state, session).await?;
    Ok(Json(serde_json::json!({ "session": session })))
}

#[derive(serde::Deserialize)]
pub struct CsvSessionQuery {
    pub ticker: String,
    pub expiration: Option<NaiveDate>,
    pub last_price: Option<f64>,
}

/// POST /api/session/csv -- body is a saved chain file
pub async fn load_session_csv(
    State(state): State<Arc<AppState>>,
    Query(q): Query<CsvSessionQuery>,
    body: String,
) -> ApiResult<Json<serde_json::Value>> {
    let ticker = ticker_param(&q.ticker)?;
    if let Some(p) = q.last_price {
        if !p.is_finite() || p <= 0.0 {
            return Err(DeskError::InvalidParameter(format!("last_price must be > 0, got {p}")).into());
        }
    }
    let quotes: Vec<ContractQuote> = tabular::chain_from_csv(&body)?;
    let expiration = q
        .expiration
        .or_else(|| quotes.iter().find_map(|c| c.extras.expiration));

    let session = Session::new(ticker, expiration, quotes, q.last_price, SessionSource::Csv);
    let session = start_session(&state, session).await?;
    Ok(Json(serde_json::json!({ "session": session })))
}

#[derive(serde::Deserialize)]
pub struct ArchiveQuery {
    pub ticker: Option<String>,
    pub limit: Option<usize>,
}

/// GET /api/archive
pub async fn list_archive(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ArchiveQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let limit = q.limit.unwrap_or(50).min(500);
    let ticker = q.ticker.as_deref().map(ticker_param).transpose()?;
    let snapshots = db::list_snapshots(&state.db, ticker.as_deref(), limit)?;
    Ok(Json(serde_json::json!({ "snapshots": snapshots })))
}

/// POST /api/archive/{id}/session
pub async fn reopen_archive(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let (header, quotes) = db::load_snapshot(&state.db, id)?
        .ok_or_else(|| ApiError::not_found(format!("no archived chain with id {id}")))?;

    let session = Session::new(
        header.ticker.clone(),
        header.expiration_date(),
        quotes,
        header.last_price,
        SessionSource::Archive,
    );
    let session = start_session(&state, session).await?;
    Ok(Json(serde_json::json!({ "snapshot_id": id, "session": session })))
}

#[derive(serde::Deserialize)]
pub struct ParamsRequest {
    pub target_price: f64,
    pub commission: Option<f64>,
}

/// PUT /api/params -- validated here, applied by the engine after debounce
pub async fn put_params(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ParamsRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    // an omitted commission is resolved by the engine against the one in force
    let checked = PayoffParams::new(req.target_price).with_commission(req.commission.unwrap_or(0.0));
    validate_params(&checked)?;

    let update = ParamsUpdate {
        target_price: req.target_price,
        commission: req.commission,
    };
    state.counters.param_updates.fetch_add(1, Ordering::Relaxed);
    state
        .engine_tx
        .send(EngineEvent::Params(update))
        .await
        .map_err(|_| DeskError::ChannelClosed("engine".into()))?;
    Ok((StatusCode::ACCEPTED, Json(serde_json::json!({ "params": update }))))
}

/// GET /api/payoffs -- latest snapshot (from watch channel, no lock)
pub async fn get_payoffs(State(state): State<Arc<AppState>>) -> Json<PayoffSnapshot> {
    let snapshot = state.snapshot_rx.borrow().clone();
    Json(snapshot)
}

/// GET /api/payoffs.csv
pub async fn get_payoffs_csv(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let snapshot = state.snapshot_rx.borrow().clone();
    let Some(session) = &snapshot.session else {
        return Err(DeskError::NoSession.into());
    };
    if let Some(err) = snapshot.error {
        return Err(ApiError::new(err.kind, err.message));
    }
    if snapshot.params.is_none() {
        return Err(DeskError::InvalidParameter("no target price set".into()).into());
    }

    let filename = match session.expiration {
        Some(exp) => format!("{}_{}_payoffs.csv", session.ticker, exp),
        None => format!("{}_payoffs.csv", session.ticker),
    };
    Ok(csv_response(&filename, tabular::enriched_to_csv(&snapshot.rows)))
}

/// GET /api/chain.csv -- the current session's raw chain
pub async fn get_chain_csv(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let session = state.current_session().ok_or(DeskError::NoSession)?;
    let filename = match session.expiration {
        Some(exp) => format!("{}_{}_chain.csv", session.ticker, exp),
        None => format!("{}_chain.csv", session.ticker),
    };
    Ok(csv_response(&filename, tabular::chain_to_csv(&session.quotes)))
}

#[derive(serde::Deserialize)]
pub struct DailyChangeQuery {
    pub ticker: String,
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
    pub threshold: Option<f64>,
    pub streak: Option<usize>,
    pub format: Option<String>,
}

/// GET /api/daily-changes -- close-to-close moves, threshold hits, decline streaks
pub async fn get_daily_changes(
    State(state): State<Arc<AppState>>,
    Query(q): Query<DailyChangeQuery>,
) -> ApiResult<Response> {
    let ticker = ticker_param(&q.ticker)?;
    let end = q.end.unwrap_or_else(|| chrono::Utc::now().date_naive());
    if end < q.start {
        return Err(DeskError::InvalidParameter(format!("end {end} is before start {}", q.start)).into());
    }

    let closes = state.provider.get_daily_closes(&ticker, q.start, end).await?;
    let report = daily_change::build_report(
        &ticker,
        q.start,
        end,
        &closes,
        q.threshold.unwrap_or(-2.0),
        q.streak.unwrap_or(5),
    )?;

    if q.format.as_deref() == Some("csv") {
        let filename = format!("{ticker}_daily_changes.csv");
        return Ok(csv_response(&filename, tabular::daily_changes_to_csv(&report.days)));
    }
    Ok(Json(report).into_response())
}

#[derive(serde::Deserialize)]
pub struct EarningsQuery {
    pub tickers: String,
}

/// GET /api/earnings?tickers=A,B -- one entry per ticker, failures inline
pub async fn get_earnings(
    State(state): State<Arc<AppState>>,
    Query(q): Query<EarningsQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let tickers: SmallVec<[String; 8]> = q
        .tickers
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(ticker_param)
        .collect::<ApiResult<_>>()?;
    if tickers.is_empty() || tickers.len() > MAX_EARNINGS_TICKERS {
        return Err(DeskError::InvalidParameter(format!(
            "between 1 and {MAX_EARNINGS_TICKERS} tickers required"
        ))
        .into());
    }

    let lookups = tickers.iter().map(|t| state.provider.get_earnings_date(t));
    let results = futures_util::future::join_all(lookups).await;

    let entries: Vec<serde_json::Value> = tickers
        .iter()
        .zip(results)
        .map(|(ticker, res)| match res {
            Ok(date) => serde_json::json!({ "ticker": ticker, "earnings_date": date }),
            Err(e) => {
                tracing::warn!(ticker = %ticker, "earnings lookup failed: {e}");
                serde_json::json!({ "ticker": ticker, "error": e.to_string() })
            }
        })
        .collect();
    Ok(Json(serde_json::json!({ "earnings": entries })))
}

/// GET /api/counters -- performance counters (lock-free reads)
pub async fn get_counters(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    use portable_atomic::Ordering::Relaxed;
    Json(serde_json::json!({
        "sessions_loaded": state.counters.sessions_loaded.load(Relaxed),
        "param_updates": state.counters.param_updates.load(Relaxed),
        "recomputes": state.counters.recomputes.load(Relaxed),
        "updates_coalesced": state.counters.updates_coalesced.load(Relaxed),
        "compute_errors": state.counters.compute_errors.load(Relaxed),
        "archive_requests": state.counters.archive_requests.load(Relaxed),
        "ws_messages_sent": state.counters.ws_messages_sent.load(Relaxed),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{Harness, StubProvider};

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(DeskError::InvalidParameter("x".into())).status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(DeskError::MissingField { field: "bid", row: 3 }).status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(DeskError::DataUnavailable("down".into())).status,
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(ApiError::from(DeskError::NoSession).status, StatusCode::CONFLICT);
        assert_eq!(
            ApiError::from(DeskError::Database("locked".into())).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_ticker_param() {
        assert_eq!(ticker_param(" aapl ").ok().as_deref(), Some("AAPL"));
        let err = ticker_param("a b").err().map(|e| e.kind);
        assert_eq!(err, Some("invalid_parameter"));
    }

    fn params_req(target_price: f64, commission: Option<f64>) -> Json<ParamsRequest> {
        Json(ParamsRequest {
            target_price,
            commission,
        })
    }

    fn csv_query(last_price: Option<f64>) -> Query<CsvSessionQuery> {
        Query(CsvSessionQuery {
            ticker: "soun".into(),
            expiration: None,
            last_price,
        })
    }

    #[tokio::test]
    async fn test_put_params_without_commission_keeps_previous() {
        let mut h = Harness::new(StubProvider::default(), &[("RECOMPUTE_DEBOUNCE_MS", "30")]);
        let state = h.state.clone();
        let mut snapshots = state.snapshot_rx.clone();
        h.spawn_engine();

        let first = put_params(State(state.clone()), params_req(120.0, Some(2.0))).await;
        assert_eq!(first.ok().map(|(status, _)| status), Some(StatusCode::ACCEPTED));

        // no wait: the published snapshot has not caught up yet
        let (status, Json(body)) = put_params(State(state.clone()), params_req(125.0, None))
            .await
            .ok()
            .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["params"]["target_price"], 125.0);
        assert!(body["params"]["commission"].is_null());

        snapshots.changed().await.unwrap();
        let params = snapshots.borrow_and_update().params;
        assert_eq!(params, Some(PayoffParams::new(125.0).with_commission(2.0)));
        assert_eq!(state.counters.param_updates.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_put_params_rejects_bad_values() {
        let mut h = Harness::new(StubProvider::default(), &[]);
        let state = h.state.clone();

        for (target, commission) in [(0.0, None), (f64::NAN, None), (100.0, Some(-1.0))] {
            let res = put_params(State(state.clone()), params_req(target, commission)).await;
            assert_eq!(res.err().map(|e| e.status), Some(StatusCode::BAD_REQUEST));
        }
        let engine_rx = h.engine_rx.as_mut().unwrap();
        assert!(engine_rx.try_recv().is_err(), "rejected params must not reach the engine");
    }

    #[tokio::test]
    async fn test_csv_session_rejects_non_positive_last_price() {
        let mut h = Harness::new(StubProvider::default(), &[]);
        let body = "type,strike,bid,ask\nCall,10,1,1.2\n".to_string();

        for bad in [0.0, -3.5, f64::INFINITY] {
            let res = load_session_csv(State(h.state.clone()), csv_query(Some(bad)), body.clone()).await;
            let err = res.err().unwrap();
            assert_eq!(err.status, StatusCode::BAD_REQUEST);
            assert_eq!(err.kind, "invalid_parameter");
        }
        assert!(h.engine_rx.as_mut().unwrap().try_recv().is_err());
        assert!(h.db_rx.try_recv().is_err());

        let Json(ok) = load_session_csv(State(h.state.clone()), csv_query(Some(12.5)), body)
            .await
            .ok()
            .unwrap();
        assert_eq!(ok["session"]["ticker"], "SOUN");
        assert_eq!(ok["session"]["contracts"], 1);
        assert!(matches!(
            h.engine_rx.as_mut().unwrap().try_recv(),
            Ok(EngineEvent::SessionLoaded(s)) if s.last_price == Some(12.5)
        ));
        assert!(matches!(h.db_rx.try_recv(), Ok(DbCommand::ArchiveChain(_))));
    }

    #[tokio::test]
    async fn test_reopen_unknown_archive_is_not_found() {
        let mut h = Harness::new(StubProvider::default(), &[]);
        let res = reopen_archive(State(h.state.clone()), Path(9999)).await;
        let err = res.err().unwrap();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.kind, "not_found");
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
        assert!(h.engine_rx.as_mut().unwrap().try_recv().is_err());
    }

    #[tokio::test]
    async fn test_payoffs_csv_without_session_is_conflict() {
        let h = Harness::new(StubProvider::default(), &[]);
        let res = get_payoffs_csv(State(h.state.clone())).await;
        let err = res.err().unwrap();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.kind, "no_session");

        let res = get_chain_csv(State(h.state.clone())).await;
        assert_eq!(res.err().map(|e| e.status), Some(StatusCode::CONFLICT));
    }

    #[tokio::test]
    async fn test_earnings_failures_are_reported_inline() {
        let provider = StubProvider {
            earnings_date: NaiveDate::from_ymd_opt(2025, 8, 7),
            earnings_down: vec!["ZZZZ"],
            ..StubProvider::default()
        };
        let h = Harness::new(provider, &[]);
        let query = Query(EarningsQuery {
            tickers: "soun, zzzz ,AAPL".into(),
        });

        let Json(body) = get_earnings(State(h.state.clone()), query).await.ok().unwrap();
        let entries = body["earnings"].as_array().unwrap();
        assert_eq!(entries.len(), 3);

        assert_eq!(entries[0]["ticker"], "SOUN");
        assert_eq!(entries[0]["earnings_date"], "2025-08-07");
        assert!(entries[0].get("error").is_none());

        assert_eq!(entries[1]["ticker"], "ZZZZ");
        assert!(entries[1]["error"].as_str().unwrap().contains("Not Found"));
        assert!(entries[1].get("earnings_date").is_none());

        assert_eq!(entries[2]["ticker"], "AAPL");
        assert_eq!(entries[2]["earnings_date"], "2025-08-07");
    }
}
