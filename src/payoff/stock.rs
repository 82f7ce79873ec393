use super::{round2, ContractType, EnrichedQuote, CONTRACT_MULTIPLIER};
use crate::errors::{DeskError, DeskResult};

/// What the money spent on one call would have earned in shares.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct StockComparison {
    pub contract_type: ContractType,
    pub contract_symbol: Option<String>,
    pub strike: f64,
    pub premium: f64,
    pub stock_units: f64,
    pub stock_profit: f64,
    pub stock_percent_profit: Option<f64>,
}

/// Same capital, bought as stock at `current_price` and sold at `target_price`.
/// Only calls are compared (a put is a bet the other way); one entry per
/// call row, in the same order.
pub fn compare_with_stock(
    rows: &[EnrichedQuote],
    target_price: f64,
    current_price: f64,
) -> DeskResult<Vec<StockComparison>> {
    if !current_price.is_finite() || current_price <= 0.0 {
        return Err(DeskError::InvalidParameter(format!(
            "current_price must be a finite positive number, got {current_price}"
        )));
    }
    if !target_price.is_finite() || target_price <= 0.0 {
        return Err(DeskError::InvalidParameter(format!(
            "target_price must be a finite positive number, got {target_price}"
        )));
    }

    Ok(rows
        .iter()
        .filter(|r| r.contract_type == ContractType::Call)
        .map(|r| {
            let capital = r.premium * CONTRACT_MULTIPLIER;
            let stock_units = round2(capital / current_price);
            let stock_profit = round2(stock_units * (target_price - current_price));
            let stock_percent_profit = if capital > 0.0 {
                Some(round2(stock_profit / capital * 100.0))
            } else {
                None
            };
            StockComparison {
                contract_type: r.contract_type,
                contract_symbol: r.extras.contract_symbol.clone(),
                strike: r.strike,
                premium: r.premium,
                stock_units,
                stock_profit,
                stock_percent_profit,
            }
        })
        .collect())
}
