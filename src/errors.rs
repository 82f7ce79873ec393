/// Error taxonomy for the payoff desk.
/// The payoff calculator only ever returns InvalidParameter or MissingField.
/// Everything the data provider can do wrong collapses into DataUnavailable.
#[derive(Debug, thiserror::Error)]
pub enum DeskError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("missing field `{field}` in row {row}")]
    MissingField { field: &'static str, row: usize },

    #[error("market data unavailable: {0}")]
    DataUnavailable(String),

    #[error("no session loaded")]
    NoSession,

    #[error("parse error: {0}")]
    Parse(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

impl DeskError {
    /// Short machine-readable kind, used in HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidParameter(_) => "invalid_parameter",
            Self::MissingField { .. } => "missing_field",
            Self::DataUnavailable(_) => "data_unavailable",
            Self::NoSession => "no_session",
            Self::Parse(_) => "parse",
            Self::Database(_) => "database",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::ChannelClosed(_) => "channel_closed",
        }
    }
}

impl From<reqwest::Error> for DeskError {
    fn from(e: reqwest::Error) -> Self {
        DeskError::DataUnavailable(e.to_string())
    }
}

impl From<rusqlite::Error> for DeskError {
    fn from(e: rusqlite::Error) -> Self {
        DeskError::Database(e.to_string())
    }
}

impl From<std::io::Error> for DeskError {
    fn from(e: std::io::Error) -> Self {
        DeskError::Io(e.to_string())
    }
}

pub type DeskResult<T> = Result<T, DeskError>;
