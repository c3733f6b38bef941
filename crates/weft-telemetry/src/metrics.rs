use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

/// In-memory counter. Monotonically increasing.
struct Counter {
    value: AtomicU64,
}

impl Counter {
    fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }
    fn increment(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }
    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// In-memory gauge. Can go up or down.
struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    fn new() -> Self {
        Self {
            value: AtomicU64::new(0f64.to_bits()),
        }
    }
    fn set(&self, v: f64) {
        self.value.store(v.to_bits(), Ordering::Relaxed);
    }
    fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed))
    }
}

/// In-memory histogram. Stores all observations for percentile computation.
struct Histogram {
    observations: Mutex<Vec<f64>>,
}

impl Histogram {
    fn new() -> Self {
        Self {
            observations: Mutex::new(Vec::new()),
        }
    }
    fn observe(&self, value: f64) {
        self.observations.lock().push(value);
    }
    fn summary(&self) -> HistogramSummary {
        let mut obs = self.observations.lock();
        if obs.is_empty() {
            return HistogramSummary::default();
        }
        obs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let count = obs.len();
        let sum: f64 = obs.iter().sum();
        let at = |q: f64| obs[((count as f64 * q) as usize).min(count - 1)];
        HistogramSummary {
            count: count as u64,
            sum,
            min: obs[0],
            max: obs[count - 1],
            p50: at(0.50),
            p95: at(0.95),
            p99: at(0.99),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Point-in-time view of every registered metric, names sorted.
#[derive(Clone, Debug, Default, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, f64>,
    pub histograms: BTreeMap<String, HistogramSummary>,
}

/// Process-local metrics registry. Names are registered on first use.
#[derive(Default)]
pub struct MetricsRecorder {
    counters: RwLock<BTreeMap<String, Arc<Counter>>>,
    gauges: RwLock<BTreeMap<String, Arc<Gauge>>>,
    histograms: RwLock<BTreeMap<String, Arc<Histogram>>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_counter(&self, name: &str, n: u64) {
        if let Some(counter) = self.counters.read().get(name) {
            counter.increment(n);
            return;
        }
        let counter = self
            .counters
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Counter::new()))
            .clone();
        counter.increment(n);
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.read().get(name).map(|c| c.get()).unwrap_or(0)
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        if let Some(gauge) = self.gauges.read().get(name) {
            gauge.set(value);
            return;
        }
        let gauge = self
            .gauges
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Gauge::new()))
            .clone();
        gauge.set(value);
    }

    pub fn gauge(&self, name: &str) -> f64 {
        self.gauges.read().get(name).map(|g| g.get()).unwrap_or(0.0)
    }

    pub fn observe(&self, name: &str, value: f64) {
        if let Some(histogram) = self.histograms.read().get(name) {
            histogram.observe(value);
            return;
        }
        let histogram = self
            .histograms
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Histogram::new()))
            .clone();
        histogram.observe(value);
    }

    pub fn histogram_summary(&self, name: &str) -> HistogramSummary {
        self.histograms
            .read()
            .get(name)
            .map(|h| h.summary())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self
                .counters
                .read()
                .iter()
                .map(|(k, v)| (k.clone(), v.get()))
                .collect(),
            gauges: self
                .gauges
                .read()
                .iter()
                .map(|(k, v)| (k.clone(), v.get()))
                .collect(),
            histograms: self
                .histograms
                .read()
                .iter()
                .map(|(k, v)| (k.clone(), v.summary()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_monotonic() {
        let recorder = MetricsRecorder::new();
        assert_eq!(recorder.counter("requests_total"), 0);
        recorder.incr_counter("requests_total", 1);
        recorder.incr_counter("requests_total", 2);
        assert_eq!(recorder.counter("requests_total"), 3);
    }

    #[test]
    fn gauges_overwrite() {
        let recorder = MetricsRecorder::new();
        recorder.set_gauge("workers_connected", 3.0);
        recorder.set_gauge("workers_connected", 1.0);
        assert_eq!(recorder.gauge("workers_connected"), 1.0);
    }

    #[test]
    fn histogram_percentiles_are_ordered() {
        let recorder = MetricsRecorder::new();
        for i in 1..=100 {
            recorder.observe("latency_ms", i as f64);
        }
        let summary = recorder.histogram_summary("latency_ms");
        assert_eq!(summary.count, 100);
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.max, 100.0);
        assert!(summary.p50 <= summary.p95);
        assert!(summary.p95 <= summary.p99);
        assert!(summary.p99 <= summary.max);
    }

    #[test]
    fn empty_histogram_has_default_summary() {
        let recorder = MetricsRecorder::new();
        let summary = recorder.histogram_summary("never_observed");
        assert_eq!(summary, HistogramSummary::default());
    }

    #[test]
    fn snapshot_collects_everything_sorted() {
        let recorder = MetricsRecorder::new();
        recorder.incr_counter("b_counter", 5);
        recorder.incr_counter("a_counter", 1);
        recorder.set_gauge("g", 2.5);
        recorder.observe("h", 10.0);

        let snapshot = recorder.snapshot();
        let names: Vec<&String> = snapshot.counters.keys().collect();
        assert_eq!(names, vec!["a_counter", "b_counter"]);
        assert_eq!(snapshot.counters["b_counter"], 5);
        assert_eq!(snapshot.gauges["g"], 2.5);
        assert_eq!(snapshot.histograms["h"].count, 1);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["counters"]["a_counter"], 1);
    }
}
