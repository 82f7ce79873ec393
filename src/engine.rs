//! Recompute loop. Owns the current session and parameters, coalesces bursts
//! of updates, and publishes one payoff table per burst.

use crate::errors::DeskResult;
use crate::payoff::calculator::compute_payoffs;
use crate::payoff::stock::{compare_with_stock, StockComparison};
use crate::payoff::{EnrichedQuote, PayoffParams};
use crate::state::{AppState, EngineEvent, PayoffSnapshot, Session, SnapshotError, WsMessage};
use portable_atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// What one burst of events left behind. Param updates are folded in
/// arrival order, each resolved against the one before it.
struct Batch {
    session: Option<Arc<Session>>,
    params: Option<PayoffParams>,
    default_commission: f64,
    events: u64,
    shutdown: bool,
}

impl Batch {
    fn new(params: Option<PayoffParams>, default_commission: f64) -> Self {
        Self {
            session: None,
            params,
            default_commission,
            events: 0,
            shutdown: false,
        }
    }

    fn absorb(&mut self, event: EngineEvent) {
        self.events += 1;
        match event {
            EngineEvent::SessionLoaded(s) => self.session = Some(s),
            EngineEvent::Params(update) => {
                self.params = Some(update.resolve(self.params, self.default_commission));
            }
            EngineEvent::Shutdown => self.shutdown = true,
        }
    }
}

/// Debounce-and-replace: on the first event of a burst, wait out the
/// debounce window, drain whatever queued up meanwhile, then compute once
/// against the newest session and params.
pub async fn run_engine(state: Arc<AppState>, mut rx: mpsc::Receiver<EngineEvent>) {
    tracing::info!("engine task started");

    let debounce = Duration::from_millis(state.config.recompute_debounce_ms);
    let mut session: Option<Arc<Session>> = None;
    let mut params: Option<PayoffParams> = state
        .config
        .default_target_price
        .map(|t| PayoffParams::new(t).with_commission(state.config.default_commission));
    let mut generation: u64 = 0;

    while let Some(first) = rx.recv().await {
        let mut batch = Batch::new(params, state.config.default_commission);
        batch.absorb(first);

        if !batch.shutdown && !debounce.is_zero() {
            tokio::time::sleep(debounce).await;
        }
        while let Ok(event) = rx.try_recv() {
            batch.absorb(event);
        }

        if batch.shutdown {
            tracing::info!("shutdown event received");
            break;
        }
        if batch.events > 1 {
            state
                .counters
                .updates_coalesced
                .fetch_add(batch.events - 1, Ordering::Relaxed);
        }

        if let Some(s) = batch.session {
            tracing::info!(
                ticker = %s.ticker,
                expiration = ?s.expiration,
                contracts = s.contracts,
                source = s.source.as_str(),
                "session loaded"
            );
            state.broadcast(WsMessage::SessionLoaded {
                session_id: s.id.clone(),
                ticker: s.ticker.clone(),
                expiration: s.expiration,
                contracts: s.contracts,
                source: s.source,
            });
            session = Some(s);
        }
        params = batch.params;

        generation += 1;
        let snapshot = build_snapshot(generation, session.clone(), params);
        state.counters.recomputes.fetch_add(1, Ordering::Relaxed);
        if let Some(err) = &snapshot.error {
            state.counters.compute_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(generation, kind = err.kind, "recompute failed: {}", err.message);
        } else {
            tracing::debug!(generation, rows = snapshot.rows.len(), "payoffs recomputed");
        }

        state.snapshot_tx.send_replace(snapshot.clone());
        state.broadcast(WsMessage::PayoffsUpdate(Box::new(snapshot)));
    }

    tracing::info!("engine task shutting down");
}

/// Without both a session and params there is nothing to compute yet; the
/// snapshot still goes out so clients see the new session.
fn build_snapshot(
    generation: u64,
    session: Option<Arc<Session>>,
    params: Option<PayoffParams>,
) -> PayoffSnapshot {
    let mut snapshot = PayoffSnapshot {
        generation,
        params,
        computed_at: chrono::Utc::now().to_rfc3339(),
        ..PayoffSnapshot::default()
    };

    if let (Some(s), Some(p)) = (&session, &params) {
        match recompute(s, p) {
            Ok((rows, stock)) => {
                snapshot.rows = rows;
                snapshot.stock_comparison = stock;
            }
            Err(e) => {
                snapshot.error = Some(SnapshotError {
                    kind: e.kind(),
                    message: e.to_string(),
                });
            }
        }
    }
    snapshot.session = session;
    snapshot
}

type Computed = (Vec<EnrichedQuote>, Option<Vec<StockComparison>>);

fn recompute(session: &Session, params: &PayoffParams) -> DeskResult<Computed> {
    let rows = compute_payoffs(&session.quotes, params)?;
    let stock = match session.last_price {
        Some(current) if current.is_finite() && current > 0.0 => {
            Some(compare_with_stock(&rows, params.target_price, current)?)
        }
        _ => None,
    };
    Ok((rows, stock))
}
