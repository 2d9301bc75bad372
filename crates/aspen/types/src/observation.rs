//! Metric observations
//!
//! Observations are per-entity, per-date metric maps. Ingestion may capture
//! several snapshots of the same (entity, date) bucket during a day; only
//! the most recently captured snapshot per bucket participates in sums, so
//! intra-day resyncs never double count.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Inclusive date range for observation queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// The trailing `days`-day range ending today (UTC).
    pub fn trailing_days(days: i64, now: DateTime<Utc>) -> Self {
        let end = now.date_naive();
        Self {
            start: end - chrono::Duration::days(days.max(1) - 1),
            end,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// A metric map for one evaluation window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationSet(BTreeMap<String, f64>);

impl ObservationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_metrics(metrics: BTreeMap<String, f64>) -> Self {
        Self(metrics)
    }

    pub fn get(&self, metric: &str) -> Option<f64> {
        self.0.get(metric).copied()
    }

    pub fn insert(&mut self, metric: impl Into<String>, value: f64) {
        self.0.insert(metric.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.0.iter()
    }

    pub fn metrics(&self) -> &BTreeMap<String, f64> {
        &self.0
    }

    /// Add every metric from `other` into this set.
    pub fn merge_sum(&mut self, other: &ObservationSet) {
        for (metric, value) in other.iter() {
            *self.0.entry(metric.clone()).or_insert(0.0) += value;
        }
    }

    /// Recompute ratio metrics from their summed parts.
    ///
    /// Ratios cannot be summed across entities; after summation the derived
    /// values are rebuilt from the summed numerators and denominators.
    pub fn recompute_derived(&mut self) {
        let spend = self.get("spend");
        let revenue = self.get("revenue");
        let clicks = self.get("clicks");
        let impressions = self.get("impressions");
        let conversions = self.get("conversions");

        if let (Some(revenue), Some(spend)) = (revenue, spend) {
            if spend > 0.0 {
                self.insert("roas", revenue / spend);
            }
        }
        if let (Some(clicks), Some(impressions)) = (clicks, impressions) {
            if impressions > 0.0 {
                self.insert("ctr", clicks / impressions);
            }
        }
        if let (Some(spend), Some(clicks)) = (spend, clicks) {
            if clicks > 0.0 {
                self.insert("cpc", spend / clicks);
            }
        }
        if let (Some(spend), Some(conversions)) = (spend, conversions) {
            if conversions > 0.0 {
                self.insert("cpa", spend / conversions);
            }
        }
    }
}

/// One captured snapshot of an (entity, date) metric bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub entity_id: crate::ids::EntityId,
    pub date: NaiveDate,
    pub captured_at: DateTime<Utc>,
    pub metrics: BTreeMap<String, f64>,
}

/// Per-date metric maps used as change-condition references.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoricalObservations(BTreeMap<NaiveDate, BTreeMap<String, f64>>);

impl HistoricalObservations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_day(&mut self, date: NaiveDate, metrics: BTreeMap<String, f64>) {
        self.0.insert(date, metrics);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn value_on(&self, date: NaiveDate, metric: &str) -> Option<f64> {
        self.0.get(&date).and_then(|m| m.get(metric)).copied()
    }

    /// Most recent bucket strictly before `date` that carries the metric.
    pub fn latest_before(&self, date: NaiveDate, metric: &str) -> Option<(NaiveDate, f64)> {
        self.0
            .range(..date)
            .rev()
            .find_map(|(d, m)| m.get(metric).map(|v| (*d, *v)))
    }

    /// Earliest bucket in the map that carries the metric.
    pub fn earliest(&self, metric: &str) -> Option<(NaiveDate, f64)> {
        self.0
            .iter()
            .find_map(|(d, m)| m.get(metric).map(|v| (*d, *v)))
    }
}

/// Collapse raw snapshots into one summed observation set.
///
/// For each (entity, date) bucket only the latest `captured_at` snapshot is
/// kept; the survivors are summed and derived ratios recomputed.
pub fn sum_latest_snapshots(snapshots: &[MetricSnapshot]) -> ObservationSet {
    let mut latest: BTreeMap<(crate::ids::EntityId, NaiveDate), &MetricSnapshot> = BTreeMap::new();
    for snapshot in snapshots {
        let key = (snapshot.entity_id.clone(), snapshot.date);
        match latest.get(&key) {
            Some(existing) if existing.captured_at >= snapshot.captured_at => {}
            _ => {
                latest.insert(key, snapshot);
            }
        }
    }

    let mut summed = ObservationSet::new();
    for snapshot in latest.values() {
        summed.merge_sum(&ObservationSet::from_metrics(snapshot.metrics.clone()));
    }
    summed.recompute_derived();
    summed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::EntityId;
    use chrono::Duration;

    fn metrics(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_merge_sum_and_derived() {
        let mut total = ObservationSet::new();
        total.merge_sum(&ObservationSet::from_metrics(metrics(&[
            ("spend", 10.0),
            ("revenue", 5.0),
        ])));
        total.merge_sum(&ObservationSet::from_metrics(metrics(&[
            ("spend", 20.0),
            ("revenue", 60.0),
        ])));
        total.merge_sum(&ObservationSet::from_metrics(metrics(&[
            ("spend", 30.0),
            ("revenue", 15.0),
        ])));
        total.recompute_derived();

        assert_eq!(total.get("spend"), Some(60.0));
        assert_eq!(total.get("revenue"), Some(80.0));
        let roas = total.get("roas").unwrap();
        assert!((roas - 1.333).abs() < 0.01);
    }

    #[test]
    fn test_sum_latest_snapshots_dedups_resyncs() {
        let now = Utc::now();
        let date = now.date_naive();
        let entity = EntityId::new("c1");

        // Two captures of the same bucket: only the newer participates.
        let snapshots = vec![
            MetricSnapshot {
                entity_id: entity.clone(),
                date,
                captured_at: now - Duration::hours(6),
                metrics: metrics(&[("spend", 40.0)]),
            },
            MetricSnapshot {
                entity_id: entity.clone(),
                date,
                captured_at: now,
                metrics: metrics(&[("spend", 55.0)]),
            },
            MetricSnapshot {
                entity_id: EntityId::new("c2"),
                date,
                captured_at: now,
                metrics: metrics(&[("spend", 10.0)]),
            },
        ];

        let summed = sum_latest_snapshots(&snapshots);
        assert_eq!(summed.get("spend"), Some(65.0));
    }

    #[test]
    fn test_historical_lookups() {
        let mut historical = HistoricalObservations::new();
        let today = Utc::now().date_naive();
        historical.insert_day(today - Duration::days(9), metrics(&[("spend", 1.0)]));
        historical.insert_day(today - Duration::days(7), metrics(&[("spend", 2.0)]));
        historical.insert_day(today - Duration::days(1), metrics(&[("spend", 3.0)]));

        let (date, value) = historical.latest_before(today, "spend").unwrap();
        assert_eq!(date, today - Duration::days(1));
        assert_eq!(value, 3.0);

        let (date, value) = historical.earliest("spend").unwrap();
        assert_eq!(date, today - Duration::days(9));
        assert_eq!(value, 1.0);

        assert!(historical.latest_before(today, "missing").is_none());
    }

    #[test]
    fn test_trailing_range() {
        let now = Utc::now();
        let range = DateRange::trailing_days(7, now);
        assert!(range.contains(now.date_naive()));
        assert!(range.contains(now.date_naive() - Duration::days(6)));
        assert!(!range.contains(now.date_naive() - Duration::days(7)));
    }
}
