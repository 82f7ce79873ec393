//! Payoff-at-expiration economics for a batch of long option contracts.
//!
//! premium     = mid(bid, ask)
//! break_even  = strike ± premium
//! profit      = intrinsic(target) * 100 - (premium * 100 + commission)
//! percent     = profit / (premium * 100 + commission) * 100
//!
//! Rows whose break-even is on the wrong side of the target report no profit
//! at all rather than a loss. Pure function, no logging, no I/O.

use super::{round2, ContractQuote, ContractType, EnrichedQuote, PayoffParams, CONTRACT_MULTIPLIER};
use crate::errors::{DeskError, DeskResult};

/// A quote whose required fields have all been checked present.
struct CheckedQuote<'a> {
    contract_type: ContractType,
    strike: f64,
    bid: f64,
    ask: f64,
    source: &'a ContractQuote,
}

/// Validates the parameters, then every row, then enriches.
/// Output holds all calls followed by all puts, each group in input order.
pub fn compute_payoffs(
    quotes: &[ContractQuote],
    params: &PayoffParams,
) -> DeskResult<Vec<EnrichedQuote>> {
    validate_params(params)?;

    let checked = quotes
        .iter()
        .enumerate()
        .map(|(row, q)| check_row(row, q))
        .collect::<DeskResult<Vec<_>>>()?;

    let calls = checked.iter().filter(|q| q.contract_type == ContractType::Call);
    let puts = checked.iter().filter(|q| q.contract_type == ContractType::Put);

    Ok(calls
        .chain(puts)
        .map(|q| enrich(q, params.target_price, params.commission))
        .collect())
}

pub fn validate_params(params: &PayoffParams) -> DeskResult<()> {
    if !params.target_price.is_finite() || params.target_price <= 0.0 {
        return Err(DeskError::InvalidParameter(format!(
            "target_price must be a finite positive number, got {}",
            params.target_price
        )));
    }
    if !params.commission.is_finite() || params.commission < 0.0 {
        return Err(DeskError::InvalidParameter(format!(
            "commission must be a finite non-negative number, got {}",
            params.commission
        )));
    }
    Ok(())
}

fn check_row(row: usize, q: &ContractQuote) -> DeskResult<CheckedQuote<'_>> {
    let present = |v: Option<f64>, field: &'static str| {
        v.filter(|x| x.is_finite())
            .ok_or(DeskError::MissingField { field, row })
    };

    Ok(CheckedQuote {
        contract_type: q
            .contract_type
            .ok_or(DeskError::MissingField { field: "contract_type", row })?,
        strike: present(q.strike, "strike")?,
        bid: present(q.bid, "bid")?,
        ask: present(q.ask, "ask")?,
        source: q,
    })
}

fn enrich(q: &CheckedQuote<'_>, target_price: f64, commission: f64) -> EnrichedQuote {
    let premium = round2((q.bid + q.ask) / 2.0);

    let break_even = match q.contract_type {
        ContractType::Call => round2(q.strike + premium),
        ContractType::Put => round2(q.strike - premium),
    };

    let intrinsic = q.contract_type.intrinsic(target_price, q.strike);
    let paid_basis = premium * CONTRACT_MULTIPLIER + commission;
    let raw_profit = round2(intrinsic * CONTRACT_MULTIPLIER - paid_basis);

    let out_of_the_money = match q.contract_type {
        ContractType::Call => break_even > target_price,
        ContractType::Put => break_even < target_price,
    };

    // Profit and percent are published as a pair. A free contract has no
    // percent return, so it reports neither.
    let (option_profit, option_percent_profit) = if out_of_the_money || paid_basis == 0.0 {
        (None, None)
    } else {
        (
            Some(raw_profit),
            Some(round2(raw_profit / paid_basis * 100.0)),
        )
    };

    EnrichedQuote {
        contract_type: q.contract_type,
        strike: q.strike,
        bid: q.bid,
        ask: q.ask,
        premium,
        break_even,
        option_profit,
        option_percent_profit,
        extras: q.source.extras.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(strike: f64, bid: f64, ask: f64) -> ContractQuote {
        ContractQuote::new(ContractType::Call, strike, bid, ask)
    }

    fn put(strike: f64, bid: f64, ask: f64) -> ContractQuote {
        ContractQuote::new(ContractType::Put, strike, bid, ask)
    }

    fn one(q: ContractQuote, params: PayoffParams) -> EnrichedQuote {
        let mut out = compute_payoffs(&[q], &params).unwrap();
        assert_eq!(out.len(), 1);
        out.remove(0)
    }

    #[test]
    fn test_equal_bid_ask_is_premium() {
        let r = one(call(50.0, 2.35, 2.35), PayoffParams::new(60.0));
        assert_eq!(r.premium, 2.35);
    }

    #[test]
    fn test_penny_quote_mid_rounds_to_even() {
        let r = one(call(10.0, 0.02, 0.03), PayoffParams::new(11.0));
        assert_eq!(r.premium, 0.02);
        assert_eq!(r.break_even, 10.02);
        assert_eq!(r.option_profit, Some(98.0));
        assert_eq!(r.option_percent_profit, Some(4900.0));
    }

    #[test]
    fn test_break_even_direction() {
        let rows = vec![call(100.0, 1.1, 1.3), put(100.0, 1.1, 1.3)];
        let out = compute_payoffs(&rows, &PayoffParams::new(100.0)).unwrap();
        for r in &out {
            match r.contract_type {
                ContractType::Call => assert_eq!(r.break_even, round2(r.strike + r.premium)),
                ContractType::Put => assert_eq!(r.break_even, round2(r.strike - r.premium)),
            }
        }
        assert_eq!(out[0].break_even, 101.2);
        assert_eq!(out[1].break_even, 98.8);
    }

    #[test]
    fn test_call_below_break_even_is_nulled() {
        let r = one(call(100.0, 4.0, 6.0), PayoffParams::new(100.0));
        assert_eq!(r.premium, 5.0);
        assert_eq!(r.break_even, 105.0);
        assert!(r.option_profit.is_none());
        assert!(r.option_percent_profit.is_none());
    }

    #[test]
    fn test_call_profit() {
        let r = one(call(100.0, 4.0, 6.0), PayoffParams::new(120.0));
        assert_eq!(r.option_profit, Some(1500.0));
        assert_eq!(r.option_percent_profit, Some(300.0));
    }

    #[test]
    fn test_put_mirrors_call() {
        let r = one(put(100.0, 4.0, 6.0), PayoffParams::new(80.0));
        assert_eq!(r.premium, 5.0);
        assert_eq!(r.break_even, 95.0);
        assert_eq!(r.option_profit, Some(1500.0));
        assert_eq!(r.option_percent_profit, Some(300.0));
    }

    #[test]
    fn test_put_above_break_even_is_nulled() {
        let r = one(put(100.0, 4.0, 6.0), PayoffParams::new(96.0));
        assert!(r.option_profit.is_none());
        assert!(r.option_percent_profit.is_none());
    }

    #[test]
    fn test_commission_enters_paid_basis() {
        let r = one(
            call(100.0, 4.0, 6.0),
            PayoffParams::new(120.0).with_commission(2.0),
        );
        assert_eq!(r.option_profit, Some(1498.0));
        assert_eq!(r.option_percent_profit, Some(298.41));
    }

    #[test]
    fn test_zero_paid_basis_does_not_divide() {
        let r = one(call(100.0, 0.0, 0.0), PayoffParams::new(120.0));
        assert_eq!(r.premium, 0.0);
        assert!(r.option_percent_profit.is_none());
        assert!(r.option_profit.is_none(), "profit and percent are null together");
    }

    #[test]
    fn test_empty_batch() {
        let out = compute_payoffs(&[], &PayoffParams::new(10.0)).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_missing_strike_names_field_and_row() {
        let mut bad = call(100.0, 1.0, 2.0);
        bad.strike = None;
        let rows = vec![call(90.0, 1.0, 2.0), bad];
        let err = compute_payoffs(&rows, &PayoffParams::new(100.0)).unwrap_err();
        match err {
            DeskError::MissingField { field, row } => {
                assert_eq!(field, "strike");
                assert_eq!(row, 1);
            }
            other => panic!("expected MissingField, got {other:?}"),
        }
    }

    #[test]
    fn test_nan_bid_counts_as_missing() {
        let rows = vec![call(90.0, f64::NAN, 2.0)];
        let err = compute_payoffs(&rows, &PayoffParams::new(100.0)).unwrap_err();
        assert!(matches!(err, DeskError::MissingField { field: "bid", row: 0 }), "got {err:?}");
    }

    #[test]
    fn test_missing_type_fails_whole_batch() {
        let mut bad = put(100.0, 1.0, 2.0);
        bad.contract_type = None;
        let err = compute_payoffs(&[bad], &PayoffParams::new(100.0)).unwrap_err();
        assert!(matches!(err, DeskError::MissingField { field: "contract_type", row: 0 }));
    }

    #[test]
    fn test_negative_target_rejected() {
        let err = compute_payoffs(&[call(100.0, 1.0, 2.0)], &PayoffParams::new(-5.0)).unwrap_err();
        assert!(matches!(err, DeskError::InvalidParameter(_)), "got {err:?}");
    }

    #[test]
    fn test_non_finite_target_rejected() {
        for target in [0.0, f64::NAN, f64::INFINITY] {
            let err = compute_payoffs(&[], &PayoffParams::new(target)).unwrap_err();
            assert!(matches!(err, DeskError::InvalidParameter(_)), "target {target}: {err:?}");
        }
    }

    #[test]
    fn test_negative_commission_rejected() {
        let params = PayoffParams::new(100.0).with_commission(-0.5);
        let err = compute_payoffs(&[], &params).unwrap_err();
        assert!(matches!(err, DeskError::InvalidParameter(_)), "got {err:?}");
    }

    #[test]
    fn test_calls_before_puts_stable() {
        let rows = vec![
            put(90.0, 1.0, 1.0),
            call(110.0, 1.0, 1.0),
            put(80.0, 1.0, 1.0),
            call(100.0, 1.0, 1.0),
        ];
        let out = compute_payoffs(&rows, &PayoffParams::new(100.0)).unwrap();
        let order: Vec<(ContractType, f64)> =
            out.iter().map(|r| (r.contract_type, r.strike)).collect();
        assert_eq!(
            order,
            vec![
                (ContractType::Call, 110.0),
                (ContractType::Call, 100.0),
                (ContractType::Put, 90.0),
                (ContractType::Put, 80.0),
            ]
        );
    }

    #[test]
    fn test_idempotent() {
        let rows = vec![call(100.0, 4.0, 6.0), put(100.0, 3.9, 4.3), call(95.0, 7.2, 7.9)];
        let params = PayoffParams::new(112.5).with_commission(0.65);
        let a = compute_payoffs(&rows, &params).unwrap();
        let b = compute_payoffs(&rows, &params).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_crossed_quote_tolerated() {
        let r = one(call(100.0, 6.0, 4.0), PayoffParams::new(120.0));
        assert_eq!(r.premium, 5.0);
        assert_eq!(r.bid, 6.0);
    }

    #[test]
    fn test_extras_pass_through() {
        let mut q = call(100.0, 4.0, 6.0);
        q.extras.contract_symbol = Some("SOUN250718C00100000".into());
        q.extras.open_interest = Some(1200);
        let r = one(q, PayoffParams::new(120.0));
        assert_eq!(r.extras.contract_symbol.as_deref(), Some("SOUN250718C00100000"));
        assert_eq!(r.extras.open_interest, Some(1200));
    }
}
