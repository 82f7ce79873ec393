//! Delimited-text export and import.
//!
//! Export writes a header row and one line per record, nulls as empty fields.
//! Import reads an option chain saved by this tool or by the provider's own
//! download (camelCase column names, a `Type` column, "nan" for gaps).

use crate::analysis::daily_change::DailyChange;
use crate::errors::{DeskError, DeskResult};
use crate::payoff::{ContractQuote, ContractType, EnrichedQuote, QuoteExtras};
use chrono::NaiveDate;

pub const ENRICHED_COLUMNS: [&str; 14] = [
    "contract_type",
    "strike",
    "bid",
    "ask",
    "premium",
    "break_even",
    "option_profit",
    "option_percent_profit",
    "contract_symbol",
    "expiration",
    "last_price",
    "volume",
    "open_interest",
    "implied_volatility",
];

pub const CHAIN_COLUMNS: [&str; 10] = [
    "contract_type",
    "strike",
    "bid",
    "ask",
    "contract_symbol",
    "expiration",
    "last_price",
    "volume",
    "open_interest",
    "implied_volatility",
];

fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn num(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

fn int(v: Option<u64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

fn extras_cells(e: &QuoteExtras) -> [String; 6] {
    [
        csv_escape(e.contract_symbol.as_deref().unwrap_or("")),
        e.expiration.map(|d| d.to_string()).unwrap_or_default(),
        num(e.last_price),
        int(e.volume),
        int(e.open_interest),
        num(e.implied_volatility),
    ]
}

fn join_lines(header: &[&str], rows: impl Iterator<Item = String>) -> String {
    let mut out = header.join(",");
    out.push('\n');
    for row in rows {
        out.push_str(&row);
        out.push('\n');
    }
    out
}

pub fn enriched_to_csv(rows: &[EnrichedQuote]) -> String {
    join_lines(
        &ENRICHED_COLUMNS,
        rows.iter().map(|r| {
            let head = [
                r.contract_type.as_str().to_string(),
                r.strike.to_string(),
                r.bid.to_string(),
                r.ask.to_string(),
                r.premium.to_string(),
                r.break_even.to_string(),
                num(r.option_profit),
                num(r.option_percent_profit),
            ];
            head.into_iter()
                .chain(extras_cells(&r.extras))
                .collect::<Vec<_>>()
                .join(",")
        }),
    )
}

pub fn chain_to_csv(rows: &[ContractQuote]) -> String {
    join_lines(
        &CHAIN_COLUMNS,
        rows.iter().map(|q| {
            let head = [
                q.contract_type.map(|t| t.as_str().to_string()).unwrap_or_default(),
                num(q.strike),
                num(q.bid),
                num(q.ask),
            ];
            head.into_iter()
                .chain(extras_cells(&q.extras))
                .collect::<Vec<_>>()
                .join(",")
        }),
    )
}

pub fn daily_changes_to_csv(days: &[DailyChange]) -> String {
    join_lines(
        &["date", "close", "daily_change_pct", "category"],
        days.iter().map(|d| {
            let category = d.category.map(|c| c.as_str()).unwrap_or_default();
            format!("{},{},{},{}", d.date, d.close, num(d.change_pct), category)
        }),
    )
}

/// Splits CSV text into records. Handles quoted fields with embedded
/// commas, doubled quotes and line breaks; accepts LF and CRLF.
fn parse_records(text: &str) -> DeskResult<Vec<Vec<String>>> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }
    if in_quotes {
        return Err(DeskError::Parse("unterminated quoted field".into()));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }

    // blank lines carry no data
    records.retain(|r| !(r.len() == 1 && r[0].trim().is_empty()));
    Ok(records)
}

/// Lowercased header with separators removed, so `openInterest`,
/// `open_interest` and `Open Interest` all match.
fn header_key(h: &str) -> String {
    h.trim()
        .trim_start_matches('\u{feff}')
        .chars()
        .filter(|c| !matches!(c, '_' | ' ' | '-'))
        .collect::<String>()
        .to_ascii_lowercase()
}

struct ColumnMap {
    contract_type: Option<usize>,
    strike: Option<usize>,
    bid: Option<usize>,
    ask: Option<usize>,
    contract_symbol: Option<usize>,
    expiration: Option<usize>,
    last_price: Option<usize>,
    volume: Option<usize>,
    open_interest: Option<usize>,
    implied_volatility: Option<usize>,
}

impl ColumnMap {
    fn from_header(header: &[String]) -> Self {
        let keys: Vec<String> = header.iter().map(|h| header_key(h)).collect();
        let find = |names: &[&str]| keys.iter().position(|k| names.contains(&k.as_str()));
        Self {
            contract_type: find(&["contracttype", "type", "optiontype"]),
            strike: find(&["strike"]),
            bid: find(&["bid"]),
            ask: find(&["ask"]),
            contract_symbol: find(&["contractsymbol", "symbol"]),
            expiration: find(&["expiration", "expiry", "expirationdate"]),
            last_price: find(&["lastprice"]),
            volume: find(&["volume"]),
            open_interest: find(&["openinterest"]),
            implied_volatility: find(&["impliedvolatility", "iv"]),
        }
    }

    fn require(&self) -> DeskResult<()> {
        let required = [
            ("contract_type", self.contract_type),
            ("strike", self.strike),
            ("bid", self.bid),
            ("ask", self.ask),
        ];
        for (field, col) in required {
            if col.is_none() {
                return Err(DeskError::MissingField { field, row: 0 });
            }
        }
        Ok(())
    }
}

/// Empty, "nan" and "null" cells are absent values.
fn cell<'a>(record: &'a [String], col: Option<usize>) -> Option<&'a str> {
    let raw = record.get(col?)?.trim();
    match raw.to_ascii_lowercase().as_str() {
        "" | "nan" | "null" | "none" => None,
        _ => Some(raw),
    }
}

fn parse_f64(record: &[String], col: Option<usize>, field: &str, row: usize) -> DeskResult<Option<f64>> {
    cell(record, col)
        .map(|s| {
            s.parse::<f64>()
                .map_err(|e| DeskError::Parse(format!("row {row}, {field}: {e}")))
        })
        .transpose()
}

/// Counts are often written as floats ("340.0") when the column had gaps.
fn parse_count(record: &[String], col: Option<usize>, field: &str, row: usize) -> DeskResult<Option<u64>> {
    Ok(parse_f64(record, col, field, row)?
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v as u64))
}

/// Reads a chain file. A missing required column fails the whole file;
/// blank required cells are left absent for the calculator to report.
pub fn chain_from_csv(text: &str) -> DeskResult<Vec<ContractQuote>> {
    let mut records = parse_records(text)?.into_iter();
    let Some(header) = records.next() else {
        return Ok(Vec::new());
    };
    let cols = ColumnMap::from_header(&header);
    cols.require()?;

    records
        .enumerate()
        .map(|(row, record)| -> DeskResult<ContractQuote> {
            let contract_type = cell(&record, cols.contract_type)
                .map(|s| {
                    ContractType::parse(s).ok_or_else(|| {
                        DeskError::Parse(format!("row {row}, contract_type: unknown value {s:?}"))
                    })
                })
                .transpose()?;
            let expiration = cell(&record, cols.expiration)
                .map(|s| {
                    // provider downloads may carry a time component
                    let date_part = s.split([' ', 'T']).next().unwrap_or(s);
                    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
                        .map_err(|e| DeskError::Parse(format!("row {row}, expiration: {e}")))
                })
                .transpose()?;

            Ok(ContractQuote {
                contract_type,
                strike: parse_f64(&record, cols.strike, "strike", row)?,
                bid: parse_f64(&record, cols.bid, "bid", row)?,
                ask: parse_f64(&record, cols.ask, "ask", row)?,
                extras: QuoteExtras {
                    contract_symbol: cell(&record, cols.contract_symbol).map(str::to_string),
                    expiration,
                    last_price: parse_f64(&record, cols.last_price, "last_price", row)?,
                    volume: parse_count(&record, cols.volume, "volume", row)?,
                    open_interest: parse_count(&record, cols.open_interest, "open_interest", row)?,
                    implied_volatility: parse_f64(&record, cols.implied_volatility, "implied_volatility", row)?,
                },
            })
        })
        .collect()
}
