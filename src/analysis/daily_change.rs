use crate::errors::{DeskError, DeskResult};
use crate::market::DailyClose;
use crate::payoff::round2;
use chrono::NaiveDate;
use statrs::statistics::Statistics;

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct DailyChange {
    pub date: NaiveDate,
    pub close: f64,
    /// Percent move from the previous close. None on the first day.
    pub change_pct: Option<f64>,
    pub category: Option<ChangeCategory>,
}

/// Size bucket for one day's move. Half a percent either way is flat;
/// beyond 1.2 % is a big move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCategory {
    BigDip,
    Dip,
    Neutral,
    Up,
    BigUp,
}

impl ChangeCategory {
    pub fn for_change(pct: f64) -> Self {
        if (-0.5..=0.5).contains(&pct) {
            ChangeCategory::Neutral
        } else if pct < -1.2 {
            ChangeCategory::BigDip
        } else if pct > 1.2 {
            ChangeCategory::BigUp
        } else if pct < -0.5 {
            ChangeCategory::Dip
        } else {
            ChangeCategory::Up
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeCategory::BigDip => "big_dip",
            ChangeCategory::Dip => "dip",
            ChangeCategory::Neutral => "neutral",
            ChangeCategory::Up => "up",
            ChangeCategory::BigUp => "big_up",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ChangeSummary {
    pub count: usize,
    pub mean: f64,
    pub max: f64,
    pub min: f64,
    /// Sample standard deviation; needs at least two changes.
    pub std_dev: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Drops,
    Rises,
}

impl Direction {
    pub fn for_threshold(threshold: f64) -> Self {
        if threshold < 0.0 {
            Direction::Drops
        } else {
            Direction::Rises
        }
    }
}

/// Everything the daily-change endpoint reports for one ticker and range.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChangeReport {
    pub ticker: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub threshold: f64,
    pub direction: Direction,
    pub summary: Option<ChangeSummary>,
    pub beyond_threshold: Vec<DailyChange>,
    pub streak_length: usize,
    pub decline_streaks: usize,
    pub days: Vec<DailyChange>,
}

pub fn daily_changes(closes: &[DailyClose]) -> Vec<DailyChange> {
    let mut out = Vec::with_capacity(closes.len());
    let mut prev: Option<f64> = None;
    for c in closes {
        let change_pct = prev
            .filter(|p| *p != 0.0)
            .map(|p| (c.close - p) / p * 100.0);
        out.push(DailyChange {
            date: c.date,
            close: c.close,
            change_pct,
            category: change_pct.map(ChangeCategory::for_change),
        });
        prev = Some(c.close);
    }
    out
}

pub fn summarize(changes: &[DailyChange]) -> Option<ChangeSummary> {
    let values: Vec<f64> = changes.iter().filter_map(|c| c.change_pct).collect();
    if values.is_empty() {
        return None;
    }
    let std_dev = if values.len() >= 2 {
        Some(values.iter().std_dev())
    } else {
        None
    };
    Some(ChangeSummary {
        count: values.len(),
        mean: values.iter().mean(),
        max: Statistics::max(values.iter()),
        min: Statistics::min(values.iter()),
        std_dev,
    })
}

/// Negative threshold selects drops at or below it, otherwise rises at or above it.
pub fn beyond_threshold(changes: &[DailyChange], threshold: f64) -> Vec<DailyChange> {
    let direction = Direction::for_threshold(threshold);
    changes
        .iter()
        .filter(|c| match (c.change_pct, direction) {
            (Some(pct), Direction::Drops) => pct <= threshold,
            (Some(pct), Direction::Rises) => pct >= threshold,
            (None, _) => false,
        })
        .copied()
        .collect()
}

/// Counts windows of `length` consecutive down days. Windows overlap, so a
/// run of six down days holds two windows of five.
pub fn count_decline_streaks(changes: &[DailyChange], length: usize) -> DeskResult<usize> {
    if length == 0 {
        return Err(DeskError::InvalidParameter("streak length must be at least 1".into()));
    }
    let mut count = 0;
    let mut streak = 0;
    for c in changes {
        match c.change_pct {
            Some(pct) if pct < 0.0 => {
                streak += 1;
                if streak == length {
                    count += 1;
                    streak -= 1;
                }
            }
            _ => streak = 0,
        }
    }
    Ok(count)
}

pub fn build_report(
    ticker: &str,
    start: NaiveDate,
    end: NaiveDate,
    closes: &[DailyClose],
    threshold: f64,
    streak_length: usize,
) -> DeskResult<ChangeReport> {
    if !threshold.is_finite() {
        return Err(DeskError::InvalidParameter(format!("threshold must be finite, got {threshold}")));
    }
    let days = daily_changes(closes);
    let decline_streaks = count_decline_streaks(&days, streak_length)?;
    let summary = summarize(&days).map(|s| ChangeSummary {
        mean: round2(s.mean),
        max: round2(s.max),
        min: round2(s.min),
        std_dev: s.std_dev.map(round2),
        ..s
    });

    Ok(ChangeReport {
        ticker: ticker.to_string(),
        start,
        end,
        threshold,
        direction: Direction::for_threshold(threshold),
        summary,
        beyond_threshold: beyond_threshold(&days, threshold),
        streak_length,
        decline_streaks,
        days,
    })
}
