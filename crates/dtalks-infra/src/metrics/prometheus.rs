//! Prometheus metric primitives
//!
//! Atomic counter, gauge and histogram cells plus labelled families that
//! render in the Prometheus text exposition format.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counter metric
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Create a new counter
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the counter by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the counter by a value
    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Get the current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Overwrite the value, used when restoring a dump
    pub fn set(&self, n: u64) {
        self.value.store(n, Ordering::Relaxed);
    }
}

/// Gauge metric
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    /// Create a new gauge
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the gauge value
    pub fn set(&self, value: f64) {
        self.value.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Get the current value
    pub fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed))
    }
}

/// Histogram metric
///
/// Bucket counts are stored per bucket; they are made cumulative on export.
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<f64>,
    bucket_counts: Vec<AtomicU64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Create a new histogram with the given upper bounds
    pub fn new(buckets: Vec<f64>) -> Self {
        let bucket_counts = (0..buckets.len() + 1)
            .map(|_| AtomicU64::new(0))
            .collect();

        Self {
            buckets,
            bucket_counts,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Observe a value
    pub fn observe(&self, value: f64) {
        let idx = self
            .buckets
            .iter()
            .position(|&bound| value <= bound)
            .unwrap_or(self.buckets.len());
        self.bucket_counts[idx].fetch_add(1, Ordering::Relaxed);

        loop {
            let current = self.sum.load(Ordering::Relaxed);
            let next = (f64::from_bits(current) + value).to_bits();
            if self
                .sum
                .compare_exchange(current, next, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }

        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn get_sum(&self) -> f64 {
        f64::from_bits(self.sum.load(Ordering::Relaxed))
    }

    /// Cumulative `(upper_bound, count)` pairs, excluding `+Inf`
    pub fn cumulative_buckets(&self) -> Vec<(f64, u64)> {
        let mut running = 0u64;
        self.buckets
            .iter()
            .enumerate()
            .map(|(i, &bound)| {
                running += self.bucket_counts[i].load(Ordering::Relaxed);
                (bound, running)
            })
            .collect()
    }
}

/// One exported time series value
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

impl Sample {
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Format a bucket bound the way Prometheus client libraries do (`5.0`, `0.5`)
pub fn format_le(bound: f64) -> String {
    if bound.is_infinite() {
        "+Inf".to_string()
    } else if bound.fract() == 0.0 {
        format!("{:.1}", bound)
    } else {
        bound.to_string()
    }
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// A metric family partitioned by label values
pub struct MetricFamily<M> {
    name: String,
    help: String,
    label_names: Vec<&'static str>,
    children: RwLock<HashMap<Vec<String>, Arc<M>>>,
    make: Box<dyn Fn() -> M + Send + Sync>,
}

pub type CounterVec = MetricFamily<Counter>;
pub type GaugeVec = MetricFamily<Gauge>;
pub type HistogramVec = MetricFamily<Histogram>;

impl<M> MetricFamily<M> {
    fn with_factory(
        name: &str,
        help: &str,
        label_names: &[&'static str],
        make: impl Fn() -> M + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            label_names: label_names.to_vec(),
            children: RwLock::new(HashMap::new()),
            make: Box::new(make),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label_names(&self) -> &[&'static str] {
        &self.label_names
    }

    /// Child for the given label values, created on first use
    pub fn with_label_values(&self, values: &[&str]) -> Arc<M> {
        debug_assert_eq!(values.len(), self.label_names.len(), "label arity for {}", self.name);
        let key: Vec<String> = values.iter().map(|v| v.to_string()).collect();

        if let Some(child) = self.children.read().get(&key) {
            return Arc::clone(child);
        }
        let mut children = self.children.write();
        Arc::clone(children.entry(key).or_insert_with(|| Arc::new((self.make)())))
    }

    /// Label values and child of every series, sorted by label values
    pub fn children(&self) -> Vec<(Vec<String>, Arc<M>)> {
        let mut out: Vec<_> = self
            .children
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn clear(&self) {
        self.children.write().clear();
    }

    fn labelled(&self, values: &[String]) -> Vec<(String, String)> {
        self.label_names
            .iter()
            .zip(values)
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn header(&self, out: &mut String, kind: &str) {
        let _ = writeln!(out, "# HELP {} {}", self.name, self.help);
        let _ = writeln!(out, "# TYPE {} {}", self.name, kind);
    }
}

impl CounterVec {
    pub fn new(name: &str, help: &str, label_names: &[&'static str]) -> Self {
        Self::with_factory(name, help, label_names, Counter::new)
    }

    pub fn collect(&self, out: &mut Vec<Sample>) {
        for (values, counter) in self.children() {
            out.push(Sample {
                name: self.name.clone(),
                labels: self.labelled(&values),
                value: counter.get() as f64,
            });
        }
    }

    pub fn render(&self, out: &mut String) {
        self.header(out, "counter");
        render_samples(out, self);
    }
}

impl GaugeVec {
    pub fn new(name: &str, help: &str, label_names: &[&'static str]) -> Self {
        Self::with_factory(name, help, label_names, Gauge::new)
    }

    pub fn collect(&self, out: &mut Vec<Sample>) {
        for (values, gauge) in self.children() {
            out.push(Sample {
                name: self.name.clone(),
                labels: self.labelled(&values),
                value: gauge.get(),
            });
        }
    }

    pub fn render(&self, out: &mut String) {
        self.header(out, "gauge");
        render_samples(out, self);
    }
}

impl HistogramVec {
    pub fn new(name: &str, help: &str, label_names: &[&'static str], buckets: Vec<f64>) -> Self {
        Self::with_factory(name, help, label_names, move || Histogram::new(buckets.clone()))
    }

    /// `_bucket` (cumulative, with `le`), `_sum` and `_count` series
    pub fn collect(&self, out: &mut Vec<Sample>) {
        for (values, histogram) in self.children() {
            let base = self.labelled(&values);
            for (bound, count) in histogram.cumulative_buckets() {
                let mut labels = base.clone();
                labels.push(("le".to_string(), format_le(bound)));
                out.push(Sample {
                    name: format!("{}_bucket", self.name),
                    labels,
                    value: count as f64,
                });
            }
            let mut labels = base.clone();
            labels.push(("le".to_string(), "+Inf".to_string()));
            out.push(Sample {
                name: format!("{}_bucket", self.name),
                labels,
                value: histogram.get_count() as f64,
            });
            out.push(Sample {
                name: format!("{}_sum", self.name),
                labels: base.clone(),
                value: histogram.get_sum(),
            });
            out.push(Sample {
                name: format!("{}_count", self.name),
                labels: base,
                value: histogram.get_count() as f64,
            });
        }
    }

    pub fn render(&self, out: &mut String) {
        self.header(out, "histogram");
        render_samples(out, self);
    }
}

trait Collect {
    fn collect_into(&self, out: &mut Vec<Sample>);
}

impl Collect for CounterVec {
    fn collect_into(&self, out: &mut Vec<Sample>) {
        self.collect(out)
    }
}

impl Collect for GaugeVec {
    fn collect_into(&self, out: &mut Vec<Sample>) {
        self.collect(out)
    }
}

impl Collect for HistogramVec {
    fn collect_into(&self, out: &mut Vec<Sample>) {
        self.collect(out)
    }
}

fn render_samples(out: &mut String, family: &dyn Collect) {
    let mut samples = Vec::new();
    family.collect_into(&mut samples);
    for sample in samples {
        out.push_str(&sample.name);
        if !sample.labels.is_empty() {
            let labels: Vec<String> = sample
                .labels
                .iter()
                .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
                .collect();
            let _ = write!(out, "{{{}}}", labels.join(","));
        }
        let _ = writeln!(out, " {}", sample.value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        assert_eq!(counter.get(), 0);

        counter.inc();
        assert_eq!(counter.get(), 1);

        counter.inc_by(5);
        assert_eq!(counter.get(), 6);

        counter.set(2);
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn test_gauge() {
        let gauge = Gauge::new();
        assert_eq!(gauge.get(), 0.0);

        gauge.set(42.5);
        assert_eq!(gauge.get(), 42.5);
    }

    #[test]
    fn test_histogram() {
        let histogram = Histogram::new(vec![0.1, 0.5, 1.0]);

        histogram.observe(0.05);
        histogram.observe(0.3);
        histogram.observe(0.8);
        histogram.observe(2.0);

        assert_eq!(histogram.get_count(), 4);
        assert!((histogram.get_sum() - 3.15).abs() < 0.001);
        assert_eq!(
            histogram.cumulative_buckets(),
            vec![(0.1, 1), (0.5, 2), (1.0, 3)]
        );
    }

    #[test]
    fn test_histogram_bound_is_inclusive() {
        let histogram = Histogram::new(vec![5.0, 10.0]);
        histogram.observe(5.0);
        assert_eq!(histogram.cumulative_buckets()[0], (5.0, 1));
    }

    #[test]
    fn test_format_le() {
        assert_eq!(format_le(5.0), "5.0");
        assert_eq!(format_le(0.5), "0.5");
        assert_eq!(format_le(f64::INFINITY), "+Inf");
    }

    #[test]
    fn test_counter_vec_children_are_shared() {
        let family = CounterVec::new("hits_total", "Hits", &["kind"]);
        family.with_label_values(&["a"]).inc();
        family.with_label_values(&["a"]).inc();
        family.with_label_values(&["b"]).inc();

        let children = family.children();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].0, vec!["a".to_string()]);
        assert_eq!(children[0].1.get(), 2);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let family = Arc::new(CounterVec::new("c_total", "C", &["k"]));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let family = Arc::clone(&family);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        family.with_label_values(&["x"]).inc();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(family.with_label_values(&["x"]).get(), 8000);
    }

    #[test]
    fn test_render_counter_family() {
        let family = CounterVec::new("chatbot_test_total", "Test counter", &["a", "b"]);
        family.with_label_values(&["x", "y\"z"]).inc_by(3);

        let mut out = String::new();
        family.render(&mut out);

        assert!(out.contains("# TYPE chatbot_test_total counter"));
        assert!(out.contains("chatbot_test_total{a=\"x\",b=\"y\\\"z\"} 3"));
    }

    #[test]
    fn test_render_histogram_family() {
        let family = HistogramVec::new("latency_seconds", "Latency", &["status"], vec![5.0, 10.0]);
        family.with_label_values(&["success"]).observe(4.0);
        family.with_label_values(&["success"]).observe(12.0);

        let mut out = String::new();
        family.render(&mut out);

        assert!(out.contains("latency_seconds_bucket{status=\"success\",le=\"5.0\"} 1"));
        assert!(out.contains("latency_seconds_bucket{status=\"success\",le=\"10.0\"} 1"));
        assert!(out.contains("latency_seconds_bucket{status=\"success\",le=\"+Inf\"} 2"));
        assert!(out.contains("latency_seconds_sum{status=\"success\"} 16"));
        assert!(out.contains("latency_seconds_count{status=\"success\"} 2"));
    }
}
