//! Chatbot metrics: primitives, the durable store, queries and analytics

pub mod analytics;
pub mod prometheus;
pub mod query;
pub mod store;

pub use analytics::MetricsAnalytics;
pub use prometheus::{format_le, Counter, CounterVec, Gauge, GaugeVec, Histogram, HistogramVec, Sample};
pub use query::{LocalMetricsQuery, MetricsQuery, PrometheusQuery, QuerySample};
pub use store::{
    confidence_level, FeedbackKind, LatencyStats, MetricEvent, MetricsSnapshot, MetricsStore,
    TemplateKind,
};
