//! Metrics primitives and registry.
//!
//! Provides lightweight labelled metric types (counter, histogram) and a
//! registry to create and retrieve them. Values live in memory with atomics
//! and a small lock per histogram; [`MetricsRegistry::render_prometheus`]
//! exposes them in the Prometheus text format for scraping.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

/// Default histogram buckets, in seconds.
pub const DEFAULT_DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Sorted label set identifying one series of a metric.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Labels(Vec<(String, String)>);

impl Labels {
    /// Build a label set; order of `pairs` does not matter.
    pub fn new<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut labels: Vec<(String, String)> = pairs
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        labels.sort();
        Self(labels)
    }

    /// The empty label set.
    pub fn none() -> Self {
        Self::default()
    }

    fn render(&self, extra: Option<(&str, &str)>) -> String {
        let mut parts: Vec<String> = self
            .0
            .iter()
            .map(|(k, v)| format!("{k}=\"{}\"", escape_label(v)))
            .collect();
        if let Some((k, v)) = extra {
            parts.push(format!("{k}=\"{v}\""));
        }
        if parts.is_empty() {
            String::new()
        } else {
            format!("{{{}}}", parts.join(","))
        }
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// An incrementing counter.
#[derive(Debug, Clone, Default)]
pub struct Counter {
    value: Arc<AtomicU64>,
}

impl Counter {
    /// Create a new counter starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment by one.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by a given amount.
    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct HistogramState {
    bounds: Vec<f64>,
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

/// A bucketed histogram.
#[derive(Debug, Clone)]
pub struct Histogram {
    state: Arc<Mutex<HistogramState>>,
}

/// Point-in-time copy of a histogram.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramSnapshot {
    /// `(upper_bound, cumulative_count)` per bucket.
    pub buckets: Vec<(f64, u64)>,
    /// Sum of all observations.
    pub sum: f64,
    /// Number of observations.
    pub count: u64,
}

impl Histogram {
    /// Create a histogram with the given upper bounds (sorted ascending).
    #[must_use]
    pub fn with_buckets(bounds: &[f64]) -> Self {
        let mut bounds = bounds.to_vec();
        bounds.sort_by(f64::total_cmp);
        let counts = vec![0; bounds.len()];
        Self {
            state: Arc::new(Mutex::new(HistogramState {
                bounds,
                counts,
                sum: 0.0,
                count: 0,
            })),
        }
    }

    /// Record an observation.
    pub fn observe(&self, value: f64) {
        let mut state = self.state.lock();
        if let Some(idx) = state.bounds.iter().position(|b| value <= *b) {
            state.counts[idx] += 1;
        }
        state.sum += value;
        state.count += 1;
    }

    /// Number of observations recorded.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.state.lock().count
    }

    /// Sum of all observations.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.state.lock().sum
    }

    /// Cumulative bucket counts, sum and count.
    #[must_use]
    pub fn snapshot(&self) -> HistogramSnapshot {
        let state = self.state.lock();
        let mut running = 0;
        let buckets = state
            .bounds
            .iter()
            .zip(&state.counts)
            .map(|(bound, count)| {
                running += count;
                (*bound, running)
            })
            .collect();
        HistogramSnapshot {
            buckets,
            sum: state.sum,
            count: state.count,
        }
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::with_buckets(DEFAULT_DURATION_BUCKETS)
    }
}

type Series<T> = BTreeMap<String, BTreeMap<Labels, T>>;

/// Registry for creating and retrieving named, labelled metrics.
///
/// Cloning shares the underlying storage.
///
/// # Examples
///
/// ```
/// use stepkit_telemetry::metrics::{Labels, MetricsRegistry};
///
/// let registry = MetricsRegistry::new();
/// let counter = registry.counter("file_bytes_read_total", Labels::none());
/// counter.inc_by(5);
///
/// // Retrieving the same name and labels returns the same metric.
/// let same = registry.counter("file_bytes_read_total", Labels::none());
/// assert_eq!(same.get(), 5);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetricsRegistry {
    counters: Arc<RwLock<Series<Counter>>>,
    histograms: Arc<RwLock<Series<Histogram>>>,
}

impl MetricsRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create a counter series.
    pub fn counter(&self, name: &str, labels: Labels) -> Counter {
        if let Some(c) = self.counters.read().get(name).and_then(|s| s.get(&labels)) {
            return c.clone();
        }
        let mut map = self.counters.write();
        map.entry(name.to_owned())
            .or_default()
            .entry(labels)
            .or_default()
            .clone()
    }

    /// Get or create a histogram series with the default duration buckets.
    pub fn histogram(&self, name: &str, labels: Labels) -> Histogram {
        if let Some(h) = self.histograms.read().get(name).and_then(|s| s.get(&labels)) {
            return h.clone();
        }
        let mut map = self.histograms.write();
        map.entry(name.to_owned())
            .or_default()
            .entry(labels)
            .or_default()
            .clone()
    }

    /// Current value of a counter series, zero if it was never created.
    pub fn counter_value(&self, name: &str, labels: &Labels) -> u64 {
        self.counters
            .read()
            .get(name)
            .and_then(|s| s.get(labels))
            .map_or(0, Counter::get)
    }

    /// Snapshot of a histogram series, if it exists.
    pub fn histogram_snapshot(&self, name: &str, labels: &Labels) -> Option<HistogramSnapshot> {
        self.histograms
            .read()
            .get(name)
            .and_then(|s| s.get(labels))
            .map(Histogram::snapshot)
    }

    /// Render every series in the Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();

        for (name, series) in self.counters.read().iter() {
            let _ = writeln!(out, "# TYPE {name} counter");
            for (labels, counter) in series {
                let _ = writeln!(out, "{name}{} {}", labels.render(None), counter.get());
            }
        }

        for (name, series) in self.histograms.read().iter() {
            let _ = writeln!(out, "# TYPE {name} histogram");
            for (labels, histogram) in series {
                let snap = histogram.snapshot();
                for (bound, count) in &snap.buckets {
                    let le = bound.to_string();
                    let _ = writeln!(
                        out,
                        "{name}_bucket{} {count}",
                        labels.render(Some(("le", &le)))
                    );
                }
                let _ = writeln!(
                    out,
                    "{name}_bucket{} {}",
                    labels.render(Some(("le", "+Inf"))),
                    snap.count
                );
                let _ = writeln!(out, "{name}_sum{} {}", labels.render(None), snap.sum);
                let _ = writeln!(out, "{name}_count{} {}", labels.render(None), snap.count);
            }
        }

        out
    }
}
