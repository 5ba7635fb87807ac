//! Rolling signal statistics.
//!
//! A document carries up to four stats groups, each an array of entries keyed
//! by signal name: daily, weekly and monthly buckets with a window of previous
//! values, plus an all-time total. Folding a signal advances the bucket of
//! its period, rolling the window forward when the period changed.
//!
//! Period ids are decimal dates: days `YYYYMMDD`, weeks `YYYYMMWW` (calendar
//! year and month, ISO week number) and months `YYYYMM`. Timestamps are
//! converted in UTC.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc, Weekday};
use indexer_types::{
    Document, OverallStatsEntry, Signal, StatsEntry, TimeUnit, DAILY_STATS_FIELD,
    MONTHLY_STATS_FIELD, OVERALL_STATS_FIELD, WEEKLY_STATS_FIELD,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

pub const DAILY_WINDOW: usize = 30;
pub const WEEKLY_WINDOW: usize = 12;
pub const MONTHLY_WINDOW: usize = 12;

/// Fold `signals` into the stats groups of `doc`.
pub fn aggregate_signals(doc: &mut Document, signals: &[Signal], now: DateTime<Utc>) {
    if signals.is_empty() {
        return;
    }
    let mut book = StatsBook::read(doc);
    for signal in signals {
        book.fold(signal, now);
    }
    book.write(doc);
}

struct Group<T> {
    entries: BTreeMap<String, T>,
    present: bool,
}

impl<T: DeserializeOwned + Serialize> Group<T> {
    fn read(doc: &Document, field: &str, name_of: fn(&T) -> &str) -> Self {
        let mut entries = BTreeMap::new();
        let value = doc.get(field);
        if let Some(Value::Array(items)) = value {
            for item in items {
                match serde_json::from_value::<T>(item.clone()) {
                    Ok(entry) => {
                        entries.insert(name_of(&entry).to_string(), entry);
                    }
                    Err(e) => warn!(field, error = %e, "Dropping malformed stats entry"),
                }
            }
        }
        Self {
            entries,
            present: matches!(value, Some(v) if !v.is_null()),
        }
    }

    fn write(self, doc: &mut Document, field: &str) {
        if !self.present && self.entries.is_empty() {
            return;
        }
        let items: Vec<Value> = self
            .entries
            .values()
            .filter_map(|entry| serde_json::to_value(entry).ok())
            .collect();
        doc.insert(field.to_string(), Value::Array(items));
    }
}

struct StatsBook {
    daily: Group<StatsEntry>,
    weekly: Group<StatsEntry>,
    monthly: Group<StatsEntry>,
    overall: Group<OverallStatsEntry>,
}

impl StatsBook {
    fn read(doc: &Document) -> Self {
        Self {
            daily: Group::read(doc, DAILY_STATS_FIELD, |e: &StatsEntry| e.name.as_str()),
            weekly: Group::read(doc, WEEKLY_STATS_FIELD, |e: &StatsEntry| e.name.as_str()),
            monthly: Group::read(doc, MONTHLY_STATS_FIELD, |e: &StatsEntry| e.name.as_str()),
            overall: Group::read(doc, OVERALL_STATS_FIELD, |e: &OverallStatsEntry| e.name.as_str()),
        }
    }

    fn write(self, doc: &mut Document) {
        self.daily.write(doc, DAILY_STATS_FIELD);
        self.weekly.write(doc, WEEKLY_STATS_FIELD);
        self.monthly.write(doc, MONTHLY_STATS_FIELD);
        self.overall.write(doc, OVERALL_STATS_FIELD);
    }

    fn fold(&mut self, signal: &Signal, now: DateTime<Utc>) {
        let now_ms = now.timestamp_millis();
        let name = signal.name.as_str();

        match signal.time_unit {
            TimeUnit::Timestamp => {
                let timestamp = signal.time_in_unit.unwrap_or(now_ms);
                match DateTime::from_timestamp_millis(timestamp) {
                    Some(at) => self.fold_day(at.date_naive(), signal, now_ms),
                    None => warn!(name, timestamp, "Signal timestamp out of range"),
                }
            }
            TimeUnit::Day => match signal.time_in_unit.and_then(parse_day) {
                Some(day) => self.fold_day(day, signal, now_ms),
                None => warn!(name, period = ?signal.time_in_unit, "Invalid day period"),
            },
            TimeUnit::Week => match signal.time_in_unit.and_then(|id| parse_week(id).map(|d| (id, d))) {
                Some((id, anchor)) => {
                    let window = last_weeks(anchor, WEEKLY_WINDOW);
                    fold_period(&mut self.weekly.entries, signal, id, &window, now_ms);
                }
                None => warn!(name, period = ?signal.time_in_unit, "Invalid week period"),
            },
            TimeUnit::Month => match signal.time_in_unit.and_then(|id| parse_month(id).map(|d| (id, d))) {
                Some((id, anchor)) => {
                    let window = last_months(anchor, MONTHLY_WINDOW);
                    fold_period(&mut self.monthly.entries, signal, id, &window, now_ms);
                }
                None => warn!(name, period = ?signal.time_in_unit, "Invalid month period"),
            },
        }

        let overall = self
            .overall
            .entries
            .entry(name.to_string())
            .or_insert_with(|| OverallStatsEntry {
                name: name.to_string(),
                value: 0.0,
                last_update_time: now_ms,
            });
        overall.value += signal.value;
        overall.last_update_time = now_ms;
    }

    /// A day signal also feeds the week and month containing the day.
    fn fold_day(&mut self, day: NaiveDate, signal: &Signal, now_ms: i64) {
        let window = last_days(day, DAILY_WINDOW);
        fold_period(&mut self.daily.entries, signal, day_id(day), &window, now_ms);

        let window = last_weeks(day, WEEKLY_WINDOW);
        fold_period(&mut self.weekly.entries, signal, week_id(day), &window, now_ms);

        let window = last_months(day, MONTHLY_WINDOW);
        fold_period(&mut self.monthly.entries, signal, month_id(day), &window, now_ms);
    }
}

/// Advance one bucket.
///
/// `window` holds the ids of the periods preceding `current`, oldest first.
fn fold_period(
    entries: &mut BTreeMap<String, StatsEntry>,
    signal: &Signal,
    current: i64,
    window: &[i64],
    now_ms: i64,
) {
    let Some(entry) = entries.get_mut(&signal.name) else {
        entries.insert(
            signal.name.clone(),
            StatsEntry {
                name: signal.name.clone(),
                time_in_unit: current,
                value: signal.value,
                last_n_values: None,
                last_update_time: now_ms,
            },
        );
        return;
    };

    let previous = entry.time_in_unit;
    if previous == current {
        entry.value += signal.value;
        entry.last_update_time = now_ms;
    } else if let Some(index) = window.iter().position(|period| *period == previous) {
        let n = window.len();
        let mut values = vec![0.0; n];
        if let Some(old) = entry.last_n_values.as_ref().filter(|old| old.len() == n) {
            for (i, slot) in values.iter_mut().enumerate().take(index) {
                *slot = old[n - index + i];
            }
        }
        values[index] = entry.value;

        entry.time_in_unit = current;
        entry.value = signal.value;
        entry.last_n_values = Some(values);
        entry.last_update_time = now_ms;
    } else if window.first().is_some_and(|first| previous < *first) {
        entry.time_in_unit = current;
        entry.value = signal.value;
        entry.last_n_values = None;
        entry.last_update_time = now_ms;
    }
    // Otherwise the signal belongs to a period before the current bucket and
    // only the overall total counts it.
}

fn day_id(day: NaiveDate) -> i64 {
    i64::from(day.year()) * 10_000 + i64::from(day.month()) * 100 + i64::from(day.day())
}

fn week_id(day: NaiveDate) -> i64 {
    i64::from(day.year()) * 10_000 + i64::from(day.month()) * 100 + i64::from(day.iso_week().week())
}

fn month_id(day: NaiveDate) -> i64 {
    i64::from(day.year()) * 100 + i64::from(day.month())
}

fn last_days(day: NaiveDate, n: usize) -> Vec<i64> {
    (1..=n as i64)
        .rev()
        .filter_map(|k| day.checked_sub_signed(Duration::days(k)))
        .map(day_id)
        .collect()
}

fn last_weeks(day: NaiveDate, n: usize) -> Vec<i64> {
    (1..=n as i64)
        .rev()
        .filter_map(|k| day.checked_sub_signed(Duration::weeks(k)))
        .map(week_id)
        .collect()
}

fn last_months(day: NaiveDate, n: usize) -> Vec<i64> {
    (1..=n as u32)
        .rev()
        .filter_map(|k| day.checked_sub_months(Months::new(k)))
        .map(month_id)
        .collect()
}

fn split(id: i64, divisor: i64) -> Option<(i32, u32)> {
    if id <= 0 {
        return None;
    }
    let head = i32::try_from(id / divisor).ok()?;
    let tail = u32::try_from(id % divisor).ok()?;
    Some((head, tail))
}

fn parse_day(id: i64) -> Option<NaiveDate> {
    let (year_month, day) = split(id, 100)?;
    let (year, month) = split(i64::from(year_month), 100)?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn parse_month(id: i64) -> Option<NaiveDate> {
    let (year, month) = split(id, 100)?;
    NaiveDate::from_ymd_opt(year, month, 1)
}

/// A day of the ISO week `WW` that falls in calendar month `YYYYMM`.
fn parse_week(id: i64) -> Option<NaiveDate> {
    let (year_month, week) = split(id, 100)?;
    let (year, month) = split(i64::from(year_month), 100)?;
    for iso_year in [year, year + 1, year - 1] {
        let mut weekday = Weekday::Mon;
        for _ in 0..7 {
            if let Some(day) = NaiveDate::from_isoywd_opt(iso_year, week, weekday) {
                if day.year() == year && day.month() == month {
                    return Some(day);
                }
            }
            weekday = weekday.succ();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 3, 10, 12, 0, 0).unwrap()
    }

    fn entry(doc: &Document, field: &str, name: &str) -> StatsEntry {
        let items = doc.get(field).and_then(Value::as_array).unwrap();
        let item = items
            .iter()
            .find(|i| i.get("name") == Some(&json!(name)))
            .unwrap();
        serde_json::from_value(item.clone()).unwrap()
    }

    fn overall(doc: &Document, name: &str) -> f64 {
        let items = doc.get(OVERALL_STATS_FIELD).and_then(Value::as_array).unwrap();
        items
            .iter()
            .find(|i| i.get("name") == Some(&json!(name)))
            .and_then(|i| i.get("value"))
            .and_then(Value::as_f64)
            .unwrap()
    }

    #[test]
    fn test_period_ids() {
        let day = NaiveDate::from_ymd_opt(2016, 3, 10).unwrap();
        assert_eq!(day_id(day), 20160310);
        assert_eq!(week_id(day), 20160310);
        assert_eq!(month_id(day), 201603);

        let new_year = NaiveDate::from_ymd_opt(2016, 1, 1).unwrap();
        assert_eq!(week_id(new_year), 20160153);
    }

    #[test]
    fn test_parse_periods() {
        assert_eq!(parse_day(20160310), NaiveDate::from_ymd_opt(2016, 3, 10));
        assert_eq!(parse_day(20160231), None);
        assert_eq!(parse_month(201612), NaiveDate::from_ymd_opt(2016, 12, 1));

        let week = parse_week(20141201).unwrap();
        assert_eq!(week_id(week), 20141201);
        let week = parse_week(20160153).unwrap();
        assert_eq!(week_id(week), 20160153);
    }

    #[test]
    fn test_windows_are_oldest_first() {
        let day = NaiveDate::from_ymd_opt(2016, 3, 10).unwrap();
        let days = last_days(day, DAILY_WINDOW);
        assert_eq!(days.len(), 30);
        assert_eq!(days[0], 20160209);
        assert_eq!(days[29], 20160309);

        let months = last_months(day, MONTHLY_WINDOW);
        assert_eq!(months[0], 201503);
        assert_eq!(months[11], 201602);
    }

    #[test]
    fn test_first_signal_creates_all_groups() {
        let mut doc = Document::new();
        let at = Utc.with_ymd_and_hms(2016, 3, 10, 8, 0, 0).unwrap();
        aggregate_signals(
            &mut doc,
            &[Signal::at_timestamp("view", at.timestamp_millis())],
            now(),
        );

        let daily = entry(&doc, DAILY_STATS_FIELD, "view");
        assert_eq!(daily.time_in_unit, 20160310);
        assert_eq!(daily.value, 1.0);
        assert_eq!(daily.last_n_values, None);
        assert_eq!(entry(&doc, WEEKLY_STATS_FIELD, "view").time_in_unit, 20160310);
        assert_eq!(entry(&doc, MONTHLY_STATS_FIELD, "view").time_in_unit, 201603);
        assert_eq!(overall(&doc, "view"), 1.0);
    }

    #[test]
    fn test_same_day_accumulates() {
        let mut doc = Document::new();
        let signal = Signal::in_period("view", TimeUnit::Day, 20160310).with_value(2.0);
        aggregate_signals(&mut doc, &[signal.clone(), signal], now());
        assert_eq!(entry(&doc, DAILY_STATS_FIELD, "view").value, 4.0);
        assert_eq!(overall(&doc, "view"), 4.0);
    }

    #[test]
    fn test_rollover_zero_fills_gap() {
        let mut doc = Document::new();
        aggregate_signals(&mut doc, &[Signal::in_period("view", TimeUnit::Day, 20160301).with_value(3.0)], now());
        aggregate_signals(&mut doc, &[Signal::in_period("view", TimeUnit::Day, 20160306)], now());

        let daily = entry(&doc, DAILY_STATS_FIELD, "view");
        assert_eq!(daily.time_in_unit, 20160306);
        assert_eq!(daily.value, 1.0);
        let values = daily.last_n_values.unwrap();
        assert_eq!(values.len(), DAILY_WINDOW);
        assert_eq!(values[25], 3.0);
        assert_eq!(&values[26..], &[0.0, 0.0, 0.0, 0.0]);
        assert!(values[..25].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_rollover_shifts_previous_window() {
        let previous: Vec<f64> = (1..=30).map(f64::from).collect();
        let mut doc = Document::new();
        doc.insert(
            DAILY_STATS_FIELD.to_string(),
            json!([{
                "name": "view",
                "timeInUnit": 20160309,
                "value": 100.0,
                "lastNValues": previous,
                "lastUpdateTime": 0
            }]),
        );

        aggregate_signals(&mut doc, &[Signal::in_period("view", TimeUnit::Day, 20160310)], now());

        let values = entry(&doc, DAILY_STATS_FIELD, "view").last_n_values.unwrap();
        assert_eq!(values[0], 2.0);
        assert_eq!(values[28], 30.0);
        assert_eq!(values[29], 100.0);
    }

    #[test]
    fn test_stale_bucket_resets() {
        let mut doc = Document::new();
        aggregate_signals(&mut doc, &[Signal::in_period("view", TimeUnit::Day, 20150101)], now());
        aggregate_signals(&mut doc, &[Signal::in_period("view", TimeUnit::Day, 20160310).with_value(5.0)], now());

        let daily = entry(&doc, DAILY_STATS_FIELD, "view");
        assert_eq!(daily.time_in_unit, 20160310);
        assert_eq!(daily.value, 5.0);
        assert_eq!(daily.last_n_values, None);
    }

    #[test]
    fn test_late_signal_only_counts_overall() {
        let mut doc = Document::new();
        aggregate_signals(&mut doc, &[Signal::in_period("view", TimeUnit::Day, 20160310)], now());
        aggregate_signals(&mut doc, &[Signal::in_period("view", TimeUnit::Day, 20160305)], now());

        let daily = entry(&doc, DAILY_STATS_FIELD, "view");
        assert_eq!(daily.time_in_unit, 20160310);
        assert_eq!(daily.value, 1.0);
        assert_eq!(overall(&doc, "view"), 2.0);
    }

    #[test]
    fn test_month_signal_touches_only_monthly() {
        let mut doc = Document::new();
        aggregate_signals(&mut doc, &[Signal::in_period("sale", TimeUnit::Month, 201603)], now());
        assert_eq!(entry(&doc, MONTHLY_STATS_FIELD, "sale").time_in_unit, 201603);
        assert!(doc.get(DAILY_STATS_FIELD).is_none());
        assert!(doc.get(WEEKLY_STATS_FIELD).is_none());
    }

    #[test]
    fn test_entries_kept_per_name() {
        let mut doc = Document::new();
        aggregate_signals(
            &mut doc,
            &[
                Signal::in_period("view", TimeUnit::Day, 20160310),
                Signal::in_period("click", TimeUnit::Day, 20160310),
            ],
            now(),
        );
        let names: Vec<&str> = doc
            .get(DAILY_STATS_FIELD)
            .and_then(Value::as_array)
            .unwrap()
            .iter()
            .filter_map(|i| i.get("name").and_then(Value::as_str))
            .collect();
        assert_eq!(names, vec!["click", "view"]);
    }
}
