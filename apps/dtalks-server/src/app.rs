//! Application state and initialization

use anyhow::{Context, Result};
use dtalks_conversation::{
    ChatHandler, ContextSettings, ConversationContext, DialogStateStore, Guardrail,
    HandlerSettings, MemoryContextStore, Pipeline, PipelineDeps, PipelineSettings,
    StrategySources,
};
use dtalks_core::{
    AppConfig, ContextStore, DocumentAccess, Embedder, FaqCatalog, Generator, IngestionSink,
    MessageSink, ResponseCache, SafetyModerator, SituationProvider, Translator, VectorSearch,
};
use dtalks_infra::{
    ChatClient, ChatClientConfig, ChatModerator, DeepLConfig, DeepLTranslator, EmbeddingClient,
    EmbeddingClientConfig, HttpIngestionSink, JsonDocumentAccess, JsonFaqCatalog,
    LocalMetricsQuery, MemorySemanticCache, MetricsAnalytics, MetricsQuery, MetricsStore,
    PrometheusQuery, QdrantClient, QdrantConfig, RedisCacheConfig, RedisContextConfig,
    RedisContextStore, RedisSemanticCache, SemanticCacheConfig, WeatherConfig,
    WeatherSituationProvider,
};
use dtalks_nlp::HybridIntentClassifier;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cli::Args;
use crate::outbound::WebhookSink;
use crate::server::Server;
use crate::transport::{Dispatcher, InboundHandler, TransportClient};

const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(300);

/// State shared with the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub metrics: Arc<MetricsStore>,
    pub analytics: Arc<MetricsAnalytics>,
    pub classifier: Arc<HybridIntentClassifier>,
    /// Absent when no ingestion endpoint is configured
    pub ingestion: Option<Arc<dyn IngestionSink>>,
    pub train_file: PathBuf,
}

/// Main application
pub struct App {
    config: AppConfig,
    addr: SocketAddr,
    state: AppState,
    handler: Arc<ChatHandler>,
    sink: Arc<dyn MessageSink>,
    memory_context: Option<Arc<MemoryContextStore>>,
}

impl App {
    /// Build the application with all dependencies
    pub async fn build(args: Args) -> Result<Self> {
        let config = AppConfig::load_from_file(&args.config_path())
            .context("Failed to load configuration")?;
        let port = args.port.unwrap_or(config.server.port);
        let addr: SocketAddr = format!("{}:{}", config.server.host, port)
            .parse()
            .context("Invalid server address")?;

        info!("Initializing application components");

        let services = &config.services;
        let timeout = services.request_timeout();

        let metrics = Arc::new(MetricsStore::new());
        let dump_file = PathBuf::from(&config.metrics.dump_file);
        let latency_file = PathBuf::from(&config.metrics.latency_stats_file);
        if let Err(e) = metrics.load(&dump_file, &latency_file).await {
            warn!(error = %e, "Starting with empty metrics");
        }

        let classifier = Arc::new(
            HybridIntentClassifier::from_config(&config.classifier)
                .context("Failed to load intent classifier")?,
        );

        let generator: Arc<dyn Generator> = Arc::new(ChatClient::new(
            ChatClientConfig::new(
                &services.llm_base_url,
                &services.llm_api_key,
                &services.llm_model,
            )
            .with_temperature(services.llm_temperature)
            .with_timeout(timeout),
        )?);

        let moderator: Option<Arc<dyn SafetyModerator>> = if services.moderation_api_key.is_empty() {
            None
        } else {
            Some(Arc::new(ChatModerator::new(
                ChatClientConfig::new(
                    &services.moderation_base_url,
                    &services.moderation_api_key,
                    &config.guardrail.moderation_model,
                )
                .with_temperature(0.0)
                .with_timeout(timeout),
            )?))
        };
        let guardrail = Arc::new(Guardrail::from_file(&config.guardrail.blacklist_file, moderator).await);

        let embedder: Arc<dyn Embedder> = Arc::new(EmbeddingClient::new(
            EmbeddingClientConfig::new(
                &services.embedding_base_url,
                &services.embedding_api_key,
                &services.embedding_model,
            )
            .with_dimensions(services.embedding_dim)
            .with_timeout(timeout),
        )?);

        let translator: Arc<dyn Translator> = Arc::new(DeepLTranslator::new(
            DeepLConfig::new(&services.translation_base_url, &services.translation_api_key)
                .with_timeout(timeout),
        )?);

        let mut qdrant = QdrantConfig::new(&services.vector_search_url);
        qdrant.timeout = timeout;
        let search: Arc<dyn VectorSearch> = Arc::new(QdrantClient::new(qdrant)?);

        let mut memory_context = None;
        let context_store: Arc<dyn ContextStore> = match &config.context.redis_url {
            Some(url) => {
                let store = RedisContextStore::new(RedisContextConfig::new(url))
                    .await
                    .context("Failed to connect to Redis")?;
                info!("Conversation history kept in Redis");
                Arc::new(store)
            }
            None => {
                let store = Arc::new(MemoryContextStore::new());
                info!("Conversation history kept in memory");
                memory_context = Some(Arc::clone(&store));
                store
            }
        };
        let context = Arc::new(ConversationContext::new(
            context_store,
            Arc::clone(&generator),
            ContextSettings::from(&config.context),
        ));

        let cache: Arc<dyn ResponseCache> = match &config.context.redis_url {
            Some(url) => {
                let cache = RedisSemanticCache::new(
                    Arc::clone(&embedder),
                    RedisCacheConfig::from_cache_config(url, &config.cache),
                )
                .await
                .context("Failed to connect response cache to Redis")?;
                info!("Response cache kept in Redis");
                Arc::new(cache)
            }
            None => {
                info!("Response cache kept in memory");
                Arc::new(MemorySemanticCache::new(
                    Arc::clone(&embedder),
                    SemanticCacheConfig::from(&config.cache),
                ))
            }
        };

        let faq: Arc<dyn FaqCatalog> = Arc::new(
            JsonFaqCatalog::load(&services.faq_catalog_file)
                .await
                .context("Failed to load FAQ catalog")?,
        );
        let access: Arc<dyn DocumentAccess> =
            match JsonDocumentAccess::load(&services.document_access_file).await {
                Ok(access) => Arc::new(access),
                Err(e) => {
                    warn!(error = %e, "Document grants unavailable, internal documents disabled");
                    Arc::new(JsonDocumentAccess::from_grants(HashMap::new()))
                }
            };

        let situation: Option<Arc<dyn SituationProvider>> = match &services.weather_url {
            Some(url) => Some(Arc::new(WeatherSituationProvider::new(
                WeatherConfig::new(url, &services.weather_service_key).with_grid(
                    services.weather_grid_x,
                    services.weather_grid_y,
                    &services.weather_location,
                ),
            )?)),
            None => None,
        };

        let sources = Arc::new(StrategySources::new(
            embedder,
            search,
            access,
            situation,
            &config.retrieval,
        ));

        let pipeline = Arc::new(Pipeline::new(
            PipelineDeps {
                classifier: Arc::clone(&classifier),
                guardrail,
                context,
                cache,
                generator,
                translator,
                metrics: Arc::clone(&metrics),
                sources,
            },
            PipelineSettings::from(&config.classifier),
        ));

        let dialogs = Arc::new(DialogStateStore::new(config.context.dialog_state_ttl()));
        let handler = Arc::new(ChatHandler::new(
            pipeline,
            dialogs,
            faq,
            HandlerSettings {
                feedback_probability: config.transport.feedback_probability,
                learning_rate: config.classifier.learning_rate,
            },
        ));

        let sink: Arc<dyn MessageSink> = Arc::new(WebhookSink::new(
            &config.transport.webhook_url,
            config.transport.webhook_timeout(),
        )?);

        let query: Arc<dyn MetricsQuery> = match &config.metrics.prometheus_query_url {
            Some(url) => Arc::new(PrometheusQuery::new(
                url,
                Duration::from_secs(config.metrics.query_timeout_secs),
            )?),
            None => Arc::new(LocalMetricsQuery::new(Arc::clone(&metrics))),
        };
        let analytics = Arc::new(MetricsAnalytics::new(query, Arc::clone(&metrics)));

        let ingestion: Option<Arc<dyn IngestionSink>> = match &services.ingestion_url {
            Some(url) => Some(Arc::new(HttpIngestionSink::new(url, timeout)?)),
            None => None,
        };

        let state = AppState {
            metrics,
            analytics,
            classifier,
            ingestion,
            train_file: PathBuf::from(&config.classifier.train_file),
        };

        Ok(Self {
            config,
            addr,
            state,
            handler,
            sink,
            memory_context,
        })
    }

    /// Run the socket client and HTTP server until shutdown
    pub async fn run(self) -> Result<()> {
        let shutdown = CancellationToken::new();

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&self.handler) as Arc<dyn InboundHandler>,
            Arc::clone(&self.sink),
            self.config.server.max_concurrent_pipelines,
        ));
        let transport = TransportClient::new(self.config.transport.clone(), dispatcher);
        let transport_token = shutdown.clone();
        let transport_task = tokio::spawn(async move {
            if let Err(e) = transport.run(transport_token.clone()).await {
                error!(error = %e, "Chat socket client stopped");
                transport_token.cancel();
            }
        });

        let autosave_task = tokio::spawn(autosave(
            Arc::clone(&self.state.metrics),
            PathBuf::from(&self.config.metrics.dump_file),
            PathBuf::from(&self.config.metrics.latency_stats_file),
            Duration::from_secs(self.config.metrics.autosave_interval_secs.max(1)),
            shutdown.clone(),
        ));
        let housekeeping_task = tokio::spawn(housekeeping(
            Arc::clone(self.handler.dialogs()),
            self.memory_context.clone(),
            shutdown.clone(),
        ));

        let signal_token = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
            }
            signal_token.cancel();
        });

        let server = Server::new(self.addr, self.state.clone());
        let served = server.run(shutdown.clone()).await;
        shutdown.cancel();

        let _ = tokio::join!(transport_task, autosave_task, housekeeping_task);

        let dump_file = PathBuf::from(&self.config.metrics.dump_file);
        let latency_file = PathBuf::from(&self.config.metrics.latency_stats_file);
        save_metrics(&self.state.metrics, &dump_file, &latency_file).await;

        served
    }
}

async fn save_metrics(metrics: &MetricsStore, dump_file: &Path, latency_file: &Path) {
    if let Err(e) = metrics.save(dump_file, latency_file).await {
        error!(file = %dump_file.display(), error = %e, "Failed to save metrics");
    }
}

async fn autosave(
    metrics: Arc<MetricsStore>,
    dump_file: PathBuf,
    latency_file: PathBuf,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => save_metrics(&metrics, &dump_file, &latency_file).await,
            _ = shutdown.cancelled() => return,
        }
    }
}

async fn housekeeping(
    dialogs: Arc<DialogStateStore>,
    memory_context: Option<Arc<MemoryContextStore>>,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(HOUSEKEEPING_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let dialogs_evicted = dialogs.evict_idle();
                let turns_purged = match &memory_context {
                    Some(store) => store.purge_expired().await,
                    None => 0,
                };
                if dialogs_evicted > 0 || turns_purged > 0 {
                    info!(dialogs_evicted, turns_purged, "Evicted idle conversation state");
                }
            }
            _ = shutdown.cancelled() => return,
        }
    }
}
