//! Signals and the rolling statistics they are folded into.
//!
//! Statistics are stored on documents as four arrays keyed by signal name:
//! `_dailyStats`, `_weeklyStats`, `_monthlyStats` and `_overallStats`.
//! Period ids are integers: days as `YYYYMMDD`, weeks as `YYYYMMWW`
//! (calendar year, month, ISO week number) and months as `YYYYMM`.

use serde::{Deserialize, Serialize};

pub const DAILY_STATS_FIELD: &str = "_dailyStats";
pub const WEEKLY_STATS_FIELD: &str = "_weeklyStats";
pub const MONTHLY_STATS_FIELD: &str = "_monthlyStats";
pub const OVERALL_STATS_FIELD: &str = "_overallStats";

/// All statistics fields, in the order they are projected from the store.
pub const STATS_FIELDS: [&str; 4] = [
    DAILY_STATS_FIELD,
    WEEKLY_STATS_FIELD,
    MONTHLY_STATS_FIELD,
    OVERALL_STATS_FIELD,
];

/// Unit of [`Signal::time_in_unit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    /// Milliseconds since the Unix epoch
    #[default]
    Timestamp,
    /// `YYYYMMDD`
    Day,
    /// `YYYYMMWW`
    Week,
    /// `YYYYMM`
    Month,
}

/// A timestamped, named event with a numeric value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub name: String,

    #[serde(default)]
    pub time_unit: TimeUnit,

    /// Absent means "now" for timestamp signals.
    #[serde(default)]
    pub time_in_unit: Option<i64>,

    #[serde(default = "default_signal_value")]
    pub value: f64,
}

fn default_signal_value() -> f64 {
    1.0
}

impl Signal {
    /// A signal of value 1 at the given epoch-millisecond timestamp.
    pub fn at_timestamp(name: impl Into<String>, timestamp_ms: i64) -> Self {
        Self {
            name: name.into(),
            time_unit: TimeUnit::Timestamp,
            time_in_unit: Some(timestamp_ms),
            value: default_signal_value(),
        }
    }

    /// A signal of value 1 in the given period.
    pub fn in_period(name: impl Into<String>, time_unit: TimeUnit, period: i64) -> Self {
        Self {
            name: name.into(),
            time_unit,
            time_in_unit: Some(period),
            value: default_signal_value(),
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = value;
        self
    }
}

/// Rolling statistic for one signal name in one period granularity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsEntry {
    pub name: String,

    /// Id of the current bucket.
    pub time_in_unit: i64,

    /// Accumulated value of the current bucket.
    pub value: f64,

    /// Values of the previous N buckets, oldest first. `None` until the
    /// first rollover.
    #[serde(default)]
    pub last_n_values: Option<Vec<f64>>,

    /// Epoch milliseconds of the last fold.
    #[serde(default)]
    pub last_update_time: i64,
}

/// All-time accumulation for one signal name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallStatsEntry {
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub last_update_time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_signal_defaults() {
        let signal: Signal = serde_json::from_value(json!({"name": "view"})).unwrap();
        assert_eq!(signal.time_unit, TimeUnit::Timestamp);
        assert_eq!(signal.time_in_unit, None);
        assert_eq!(signal.value, 1.0);
    }

    #[test]
    fn test_stats_entry_wire_format() {
        let entry = StatsEntry {
            name: "view".to_string(),
            time_in_unit: 20240105,
            value: 2.0,
            last_n_values: None,
            last_update_time: 1,
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["timeInUnit"], json!(20240105));
        assert_eq!(value["lastNValues"], json!(null));
    }
}
