pub mod calculator;
pub mod stock;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Shares controlled by one listed equity option contract.
pub const CONTRACT_MULTIPLIER: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContractType {
    Call,
    Put,
}

impl ContractType {
    /// Value of one share's worth of the option at expiration, floored at zero.
    #[inline]
    pub fn intrinsic(&self, underlying: f64, strike: f64) -> f64 {
        match self {
            ContractType::Call => (underlying - strike).max(0.0),
            ContractType::Put => (strike - underlying).max(0.0),
        }
    }

    /// Accepts "call"/"put" in any case, plus the "C"/"P" shorthand.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "call" | "calls" | "c" => Some(ContractType::Call),
            "put" | "puts" | "p" => Some(ContractType::Put),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContractType::Call => "CALL",
            ContractType::Put => "PUT",
        }
    }
}

impl std::fmt::Display for ContractType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Columns that ride along with a quote but never feed the calculation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuoteExtras {
    pub contract_symbol: Option<String>,
    pub expiration: Option<NaiveDate>,
    pub last_price: Option<f64>,
    pub volume: Option<u64>,
    pub open_interest: Option<u64>,
    pub implied_volatility: Option<f64>,
}

/// One contract as delivered by the provider or read from a chain file.
/// Required fields are optional here so incomplete rows can be reported
/// by index instead of being dropped on the way in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractQuote {
    pub contract_type: Option<ContractType>,
    pub strike: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    #[serde(flatten)]
    pub extras: QuoteExtras,
}

impl ContractQuote {
    pub fn new(contract_type: ContractType, strike: f64, bid: f64, ask: f64) -> Self {
        Self {
            contract_type: Some(contract_type),
            strike: Some(strike),
            bid: Some(bid),
            ask: Some(ask),
            extras: QuoteExtras::default(),
        }
    }
}

/// Target price and commission for one recompute.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PayoffParams {
    pub target_price: f64,
    #[serde(default)]
    pub commission: f64,
}

impl PayoffParams {
    pub fn new(target_price: f64) -> Self {
        Self {
            target_price,
            commission: 0.0,
        }
    }

    pub fn with_commission(mut self, commission: f64) -> Self {
        self.commission = commission;
        self
    }
}

/// A quote after the payoff columns have been filled in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedQuote {
    pub contract_type: ContractType,
    pub strike: f64,
    pub bid: f64,
    pub ask: f64,
    pub premium: f64,
    pub break_even: f64,
    pub option_profit: Option<f64>,
    pub option_percent_profit: Option<f64>,
    #[serde(flatten)]
    pub extras: QuoteExtras,
}

/// Rounds to cents, ties to even (numpy `rint` semantics).
#[inline]
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round_ties_even() / 100.0
}
