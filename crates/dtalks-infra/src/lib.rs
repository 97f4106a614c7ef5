pub mod cache;
pub mod clients;
pub mod metrics;
pub mod resilience;

pub use cache::redis::{RedisContextConfig, RedisContextStore};
pub use cache::semantic::{cosine_similarity, question_id, MemorySemanticCache, SemanticCacheConfig};
pub use cache::vector::{RedisCacheConfig, RedisSemanticCache};

pub use clients::{
    ChatClient, ChatClientConfig, ChatModerator, DeepLConfig, DeepLTranslator, EmbeddingClient,
    EmbeddingClientConfig, HttpIngestionSink, JsonDocumentAccess, JsonFaqCatalog, QdrantClient,
    QdrantConfig, WeatherConfig, WeatherSituationProvider,
};

pub use metrics::{
    analytics::{
        ConversationStats, MetricsAnalytics, RateStats, ResponseTimeStats, TemplateUsageStats,
        WeekResponseStats,
    },
    prometheus::{Counter, CounterVec, Gauge, GaugeVec, Histogram, HistogramVec},
    query::{LocalMetricsQuery, MetricsQuery, PrometheusQuery, QuerySample},
    store::{
        FeedbackKind, LatencyStats, MetricEvent, MetricsSnapshot, MetricsStore, TemplateKind,
        LATENCY_BUCKETS, ZONE_BOUNDS,
    },
};

pub use resilience::retry::{
    retry_with, DelayStrategy, RetryConfig, RetryPolicy,
};

#[derive(Debug, thiserror::Error)]
pub enum InfraError {
    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Query error: {0}")]
    Query(String),

    #[error("{service} returned HTTP {status}: {body}")]
    Status {
        service: String,
        status: u16,
        body: String,
    },

    #[error("External service error ({service}): {message}")]
    External { service: String, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl InfraError {
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    pub fn external(service: impl Into<String>, message: impl ToString) -> Self {
        Self::External {
            service: service.into(),
            message: message.to_string(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Worth another attempt: rate limits, server errors, timeouts and refused connections
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, InfraError>;

impl From<InfraError> for dtalks_core::AppError {
    fn from(err: InfraError) -> Self {
        match err {
            InfraError::Cache(e) => dtalks_core::AppError::external("redis", e),
            InfraError::Http(e) => dtalks_core::AppError::external("http", e),
            InfraError::Serialization(e) => dtalks_core::AppError::Serialization(e),
            InfraError::Io(e) => dtalks_core::AppError::Io(e),
            InfraError::Query(msg) => dtalks_core::AppError::external("metrics-query", msg),
            InfraError::Status {
                service,
                status,
                body,
            } => dtalks_core::AppError::External {
                service,
                message: format!("HTTP {}: {}", status, body),
            },
            InfraError::External { service, message } => {
                dtalks_core::AppError::External { service, message }
            }
            InfraError::Internal(msg) => dtalks_core::AppError::internal(msg),
        }
    }
}
