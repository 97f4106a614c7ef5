use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub transport: TransportConfig,
    pub classifier: ClassifierConfig,
    pub context: ContextConfig,
    pub cache: CacheConfig,
    pub guardrail: GuardrailConfig,
    pub metrics: MetricsSettings,
    pub services: ServicesConfig,
    pub retrieval: RetrievalConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_env("DTALKS")
    }

    /// Load configuration from environment with custom prefix
    pub fn load_from_env(prefix: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(
                Environment::with_prefix(prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        config.try_deserialize()
    }

    /// Load configuration from an optional file with environment overrides
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("DTALKS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        config.try_deserialize()
    }
}

/// HTTP server and worker settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on concurrently running pipelines
    pub max_concurrent_pipelines: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8001,
            max_concurrent_pipelines: 32,
        }
    }
}

/// Chat socket and webhook settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub ws_url: String,
    pub bot_token: String,
    pub webhook_url: String,
    pub max_retries: u32,
    pub retry_min_delay_secs: f64,
    pub retry_max_delay_secs: f64,
    pub ping_interval_secs: u64,
    pub webhook_timeout_secs: u64,
    /// Probability of asking for a rating after a completed exchange
    pub feedback_probability: f64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ws_url: String::new(),
            bot_token: String::new(),
            webhook_url: String::new(),
            max_retries: 5,
            retry_min_delay_secs: 3.0,
            retry_max_delay_secs: 10.0,
            ping_interval_secs: 30,
            webhook_timeout_secs: 10,
            feedback_probability: 0.1,
        }
    }
}

impl TransportConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }
}

/// Intent classifier settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub model_path: String,
    pub centroids_path: String,
    pub train_file: String,
    pub top_k: usize,
    /// Confidence at or below which a query without context is bounced
    pub low_confidence_threshold: f64,
    pub learning_rate: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_path: "./pretrained/model.json".to_string(),
            centroids_path: "./pretrained/centroids.json".to_string(),
            train_file: "./dataset/train.txt".to_string(),
            top_k: 1,
            low_confidence_threshold: 0.6,
            learning_rate: 0.1,
        }
    }
}

/// Rolling conversation history settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub max_turns: usize,
    pub ttl_secs: u64,
    /// Replies longer than this many characters are summarised before storing
    pub summary_threshold: usize,
    /// Redis URL; in-memory storage is used when unset
    pub redis_url: Option<String>,
    pub dialog_state_ttl_secs: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_turns: 5,
            ttl_secs: 32_400,
            summary_threshold: 200,
            redis_url: None,
            dialog_state_ttl_secs: 32_400,
        }
    }
}

impl ContextConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn dialog_state_ttl(&self) -> Duration {
        Duration::from_secs(self.dialog_state_ttl_secs)
    }
}

/// Semantic response cache settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub min_similarity: f32,
    pub ttl_secs: u64,
    /// Entry cap for the in-process cache
    pub max_entries: usize,
    /// `maxmemory` applied to Redis together with `allkeys-lru`; unset leaves
    /// the server configuration alone
    pub redis_max_memory: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            min_similarity: 0.85,
            ttl_secs: 3600,
            max_entries: 10_000,
            redis_max_memory: Some("100mb".to_string()),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Safety filter settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GuardrailConfig {
    pub blacklist_file: String,
    pub moderation_model: String,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            blacklist_file: "./dataset/blacklist.json".to_string(),
            moderation_model: "meta-llama/llama-guard-4-12b".to_string(),
        }
    }
}

/// Metrics persistence and query settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub dump_file: String,
    pub latency_stats_file: String,
    /// Prometheus instant-query endpoint; the local registry answers when unset
    pub prometheus_query_url: Option<String>,
    pub query_timeout_secs: u64,
    pub autosave_interval_secs: u64,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            dump_file: "metrics_dump.json".to_string(),
            latency_stats_file: "./prometheus/response_time_stats.json".to_string(),
            prometheus_query_url: None,
            query_timeout_secs: 5,
            autosave_interval_secs: 300,
        }
    }
}

/// Endpoints and credentials of the external services
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub llm_base_url: String,
    pub llm_api_key: String,
    pub llm_model: String,
    pub llm_temperature: f32,
    pub moderation_base_url: String,
    pub moderation_api_key: String,
    pub embedding_base_url: String,
    pub embedding_api_key: String,
    pub embedding_model: String,
    pub embedding_dim: usize,
    pub translation_base_url: String,
    pub translation_api_key: String,
    pub vector_search_url: String,
    pub faq_catalog_file: String,
    pub document_access_file: String,
    pub ingestion_url: Option<String>,
    /// Nowcast endpoint; small talk uses static conditions when unset
    pub weather_url: Option<String>,
    pub weather_service_key: String,
    pub weather_grid_x: i32,
    pub weather_grid_y: i32,
    pub weather_location: String,
    pub request_timeout_secs: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            llm_base_url: "https://api.openai.com/v1".to_string(),
            llm_api_key: String::new(),
            llm_model: "gpt-4o-mini".to_string(),
            llm_temperature: 0.7,
            moderation_base_url: "https://api.groq.com/openai/v1".to_string(),
            moderation_api_key: String::new(),
            embedding_base_url: "https://api.openai.com/v1".to_string(),
            embedding_api_key: String::new(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dim: 768,
            translation_base_url: "https://api-free.deepl.com/v2".to_string(),
            translation_api_key: String::new(),
            vector_search_url: "http://localhost:6333".to_string(),
            faq_catalog_file: "./dataset/faq.json".to_string(),
            document_access_file: "./dataset/document_access.json".to_string(),
            ingestion_url: None,
            weather_url: None,
            weather_service_key: String::new(),
            weather_grid_x: 61,
            weather_grid_y: 125,
            weather_location: "서울특별시 강남구 역삼1동".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl ServicesConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Retrieval thresholds for the strategy sources
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub member_collection: String,
    pub member_min_score: f32,
    pub member_limit: usize,
    pub template_collection: String,
    pub template_threshold: f32,
    pub faq_collection: String,
    pub faq_threshold: f32,
    pub faq_limit: usize,
    pub document_collections: Vec<String>,
    pub document_min_score: f32,
    pub document_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            member_collection: "member_vectors".to_string(),
            member_min_score: 0.5,
            member_limit: 5,
            template_collection: "template_vectors".to_string(),
            template_threshold: 0.65,
            faq_collection: "faq-vectors".to_string(),
            faq_threshold: 0.78,
            faq_limit: 3,
            document_collections: vec![
                "internal_documents".to_string(),
                "meeting_vectors".to_string(),
            ],
            document_min_score: 0.5,
            document_limit: 4,
        }
    }
}
