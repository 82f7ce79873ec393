use crate::config::AppConfig;
use crate::db::DbPool;
use crate::market::MarketDataProvider;
use crate::payoff::stock::StockComparison;
use crate::payoff::{ContractQuote, EnrichedQuote, PayoffParams};
use chrono::{DateTime, NaiveDate, Utc};
use portable_atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};

// ── Session (immutable once built) ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionSource {
    Provider,
    Csv,
    Archive,
}

impl SessionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::Csv => "csv",
            Self::Archive => "archive",
        }
    }
}

/// One loaded chain. Handlers build a fresh Session and hand it to the
/// engine; nothing mutates it afterwards.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Session {
    pub id: String,
    pub ticker: String,
    pub expiration: Option<NaiveDate>,
    #[serde(skip)]
    pub quotes: Arc<[ContractQuote]>,
    pub contracts: usize,
    pub last_price: Option<f64>,
    pub source: SessionSource,
    pub loaded_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        ticker: String,
        expiration: Option<NaiveDate>,
        quotes: Vec<ContractQuote>,
        last_price: Option<f64>,
        source: SessionSource,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            ticker,
            expiration,
            contracts: quotes.len(),
            quotes: quotes.into(),
            last_price,
            source,
            loaded_at: Utc::now(),
        }
    }
}

// ── Messages INTO the engine (bounded channel) ──

/// A parameter change as requested. An absent commission keeps the one
/// in force, so it can only be resolved in queue order by the engine.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ParamsUpdate {
    pub target_price: f64,
    pub commission: Option<f64>,
}

impl ParamsUpdate {
    pub fn resolve(&self, prior: Option<PayoffParams>, default_commission: f64) -> PayoffParams {
        let commission = self
            .commission
            .or(prior.map(|p| p.commission))
            .unwrap_or(default_commission);
        PayoffParams::new(self.target_price).with_commission(commission)
    }
}

#[derive(Debug, Clone)]
pub enum EngineEvent {
    SessionLoaded(Arc<Session>),
    Params(ParamsUpdate),
    Shutdown,
}

// ── Engine output (watch channel, latest wins) ──

#[derive(Debug, Clone, serde::Serialize)]
pub struct SnapshotError {
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PayoffSnapshot {
    /// Bumped on every publish; 0 means nothing computed yet.
    pub generation: u64,
    pub session: Option<Arc<Session>>,
    pub params: Option<PayoffParams>,
    pub rows: Vec<EnrichedQuote>,
    pub stock_comparison: Option<Vec<StockComparison>>,
    pub computed_at: String,
    pub error: Option<SnapshotError>,
}

impl Default for PayoffSnapshot {
    fn default() -> Self {
        Self {
            generation: 0,
            session: None,
            params: None,
            rows: Vec::new(),
            stock_comparison: None,
            computed_at: String::new(),
            error: None,
        }
    }
}

// ── Messages OUT to WebSocket clients ──

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    #[serde(rename = "session_loaded")]
    SessionLoaded {
        session_id: String,
        ticker: String,
        expiration: Option<NaiveDate>,
        contracts: usize,
        source: SessionSource,
    },

    #[serde(rename = "payoffs_update")]
    PayoffsUpdate(Box<PayoffSnapshot>),
}

// ── DB Commands (sent to writer task via bounded channel) ──

#[derive(Debug)]
pub enum DbCommand {
    ArchiveChain(Arc<Session>),
}

// ── Performance Counters (lock-free) ──

pub struct PerfCounters {
    pub sessions_loaded: AtomicU64,
    pub param_updates: AtomicU64,
    pub recomputes: AtomicU64,
    pub updates_coalesced: AtomicU64,
    pub compute_errors: AtomicU64,
    pub archive_requests: AtomicU64,
    pub ws_messages_sent: AtomicU64,
}

impl PerfCounters {
    pub fn new() -> Self {
        Self {
            sessions_loaded: AtomicU64::new(0),
            param_updates: AtomicU64::new(0),
            recomputes: AtomicU64::new(0),
            updates_coalesced: AtomicU64::new(0),
            compute_errors: AtomicU64::new(0),
            archive_requests: AtomicU64::new(0),
            ws_messages_sent: AtomicU64::new(0),
        }
    }
}

// ── Application shared state (channels, not locks) ──

pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,
    pub provider: Arc<dyn MarketDataProvider>,

    // Engine -> readers: latest payoff table
    pub snapshot_tx: watch::Sender<PayoffSnapshot>,
    pub snapshot_rx: watch::Receiver<PayoffSnapshot>,

    // Engine -> WS clients
    pub ws_tx: broadcast::Sender<WsMessage>,

    // Handlers -> Engine
    pub engine_tx: mpsc::Sender<EngineEvent>,

    // Handlers -> DB writer
    pub db_tx: mpsc::Sender<DbCommand>,

    pub counters: PerfCounters,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db: DbPool,
        provider: Arc<dyn MarketDataProvider>,
        engine_tx: mpsc::Sender<EngineEvent>,
        db_tx: mpsc::Sender<DbCommand>,
    ) -> Arc<Self> {
        let (ws_tx, _) = broadcast::channel(256);
        let (snapshot_tx, snapshot_rx) = watch::channel(PayoffSnapshot::default());

        Arc::new(Self {
            config,
            db,
            provider,
            snapshot_tx,
            snapshot_rx,
            ws_tx,
            engine_tx,
            db_tx,
            counters: PerfCounters::new(),
        })
    }

    #[inline]
    pub fn broadcast(&self, msg: WsMessage) {
        self.counters.ws_messages_sent.fetch_add(1, Ordering::Relaxed);
        let _ = self.ws_tx.send(msg);
    }

    pub fn current_session(&self) -> Option<Arc<Session>> {
        self.snapshot_rx.borrow().session.clone()
    }
}
