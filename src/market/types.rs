use serde::Deserialize;

// Response shapes for the finance JSON endpoints. Every field is optional:
// the provider omits keys freely and an absent value must not fail a whole
// response.

// ── v7/finance/options ──

#[derive(Debug, Clone, Deserialize)]
pub struct OptionsResponse {
    #[serde(rename = "optionChain")]
    pub option_chain: OptionChainEnvelope,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptionChainEnvelope {
    pub result: Option<Vec<OptionChainResult>>,
    pub error: Option<ApiError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptionChainResult {
    #[serde(rename = "expirationDates", default)]
    pub expiration_dates: Vec<i64>,
    #[serde(default)]
    pub options: Vec<OptionsBlock>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptionsBlock {
    #[serde(default)]
    pub calls: Vec<OptionContractData>,
    #[serde(default)]
    pub puts: Vec<OptionContractData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptionContractData {
    #[serde(rename = "contractSymbol")]
    pub contract_symbol: Option<String>,
    pub strike: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    #[serde(rename = "lastPrice")]
    pub last_price: Option<f64>,
    pub volume: Option<i64>,
    #[serde(rename = "openInterest")]
    pub open_interest: Option<i64>,
    #[serde(rename = "impliedVolatility")]
    pub implied_volatility: Option<f64>,
    pub expiration: Option<i64>,
}

// ── v8/finance/chart ──

#[derive(Debug, Clone, Deserialize)]
pub struct ChartResponse {
    pub chart: ChartEnvelope,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChartEnvelope {
    pub result: Option<Vec<ChartResult>>,
    pub error: Option<ApiError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChartResult {
    pub meta: Option<ChartMeta>,
    #[serde(default)]
    pub timestamp: Vec<i64>,
    pub indicators: Option<Indicators>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChartMeta {
    #[serde(rename = "regularMarketPrice")]
    pub regular_market_price: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Indicators {
    #[serde(default)]
    pub quote: Vec<QuoteSeries>,
    #[serde(default)]
    pub adjclose: Vec<AdjCloseSeries>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteSeries {
    #[serde(default)]
    pub close: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdjCloseSeries {
    #[serde(default)]
    pub adjclose: Vec<Option<f64>>,
}

// ── v10/finance/quoteSummary?modules=calendarEvents ──

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteSummaryResponse {
    #[serde(rename = "quoteSummary")]
    pub quote_summary: QuoteSummaryEnvelope,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteSummaryEnvelope {
    pub result: Option<Vec<QuoteSummaryResult>>,
    pub error: Option<ApiError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteSummaryResult {
    #[serde(rename = "calendarEvents")]
    pub calendar_events: Option<CalendarEvents>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalendarEvents {
    pub earnings: Option<EarningsBlock>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EarningsBlock {
    #[serde(rename = "earningsDate", default)]
    pub earnings_date: Vec<RawValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawValue {
    pub raw: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub code: Option<String>,
    pub description: Option<String>,
}

impl ApiError {
    pub fn message(&self) -> String {
        format!(
            "{}: {}",
            self.code.as_deref().unwrap_or("error"),
            self.description.as_deref().unwrap_or("")
        )
    }
}
