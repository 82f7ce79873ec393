use crate::errors::{DeskError, DeskResult};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server_port: u16,
    pub data_dir: PathBuf,
    pub yahoo_base_url: String,
    pub http_timeout_secs: u64,
    /// Target price applied to a new session before the user sets one.
    pub default_target_price: Option<f64>,
    pub default_commission: f64,
    pub recompute_debounce_ms: u64,
}

impl AppConfig {
    pub fn from_env() -> DeskResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup so tests don't touch
    /// the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> DeskResult<Self> {
        let get_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let server_port = get_or("SERVER_PORT", "3001")
            .parse::<u16>()
            .map_err(|e| DeskError::Config(format!("SERVER_PORT: {e}")))?;

        let http_timeout_secs = get_or("HTTP_TIMEOUT_SECS", "10")
            .parse::<u64>()
            .map_err(|e| DeskError::Config(format!("HTTP_TIMEOUT_SECS: {e}")))?;

        let default_commission = get_or("DEFAULT_COMMISSION", "0")
            .parse::<f64>()
            .map_err(|e| DeskError::Config(format!("DEFAULT_COMMISSION: {e}")))?;
        if !default_commission.is_finite() || default_commission < 0.0 {
            return Err(DeskError::Config(format!(
                "DEFAULT_COMMISSION must be >= 0, got {default_commission}"
            )));
        }

        let default_target_price = match lookup("DEFAULT_TARGET_PRICE") {
            Some(raw) => {
                let v = raw
                    .parse::<f64>()
                    .map_err(|e| DeskError::Config(format!("DEFAULT_TARGET_PRICE: {e}")))?;
                if !v.is_finite() || v <= 0.0 {
                    return Err(DeskError::Config(format!(
                        "DEFAULT_TARGET_PRICE must be > 0, got {v}"
                    )));
                }
                Some(v)
            }
            None => None,
        };

        let recompute_debounce_ms = get_or("RECOMPUTE_DEBOUNCE_MS", "75")
            .parse::<u64>()
            .map_err(|e| DeskError::Config(format!("RECOMPUTE_DEBOUNCE_MS: {e}")))?;

        Ok(Self {
            server_port,
            data_dir: PathBuf::from(get_or("DATA_DIR", "data")),
            yahoo_base_url: get_or("YAHOO_BASE_URL", "https://query1.finance.yahoo.com"),
            http_timeout_secs,
            default_target_price,
            default_commission,
            recompute_debounce_ms,
        })
    }
}
