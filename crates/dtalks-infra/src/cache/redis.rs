use async_trait::async_trait;
use dtalks_core::{ContextStore, ConversationTurn};
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{InfraError, Result};

#[derive(Debug, Clone)]
pub struct RedisContextConfig {
    pub url: String,
    pub key_prefix: String,
}

impl Default for RedisContextConfig {
    fn default() -> Self {
        Self {
            url: String::from("redis://127.0.0.1:6379"),
            key_prefix: String::from("chat_context:"),
        }
    }
}

impl RedisContextConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn key_for(&self, user_id: &str) -> String {
        format!("{}{}", self.key_prefix, user_id)
    }
}

/// Per-user history kept as a Redis list, newest first.
///
/// The whole list shares one expiry that is refreshed on every push.
#[derive(Clone)]
pub struct RedisContextStore {
    connection: ConnectionManager,
    config: RedisContextConfig,
}

impl RedisContextStore {
    pub async fn new(config: RedisContextConfig) -> Result<Self> {
        info!("Connecting to Redis at {}", config.url);

        let client = Client::open(config.url.clone())?;
        let connection = ConnectionManager::new(client).await?;

        info!("Redis connection established");

        Ok(Self { connection, config })
    }

    async fn push_turn(
        &self,
        user_id: &str,
        turn: &ConversationTurn,
        max_turns: usize,
        ttl: Duration,
    ) -> Result<()> {
        let key = self.config.key_for(user_id);
        let serialized = serde_json::to_string(turn)?;
        let keep = max_turns.max(1) as isize;

        let mut conn = self.connection.clone();
        redis::pipe()
            .atomic()
            .lpush(&key, serialized)
            .ignore()
            .ltrim(&key, 0, keep - 1)
            .ignore()
            .expire(&key, ttl.as_secs().max(1) as i64)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;

        debug!(key = %key, "Pushed conversation turn");
        Ok(())
    }

    async fn read_turns(&self, user_id: &str, max_turns: usize) -> Result<Vec<ConversationTurn>> {
        if max_turns == 0 {
            return Ok(Vec::new());
        }
        let key = self.config.key_for(user_id);
        let mut conn = self.connection.clone();
        let raw: Vec<String> = conn.lrange(&key, 0, max_turns as isize - 1).await?;

        Ok(raw
            .into_iter()
            .filter_map(|item| match serde_json::from_str::<ConversationTurn>(&item) {
                Ok(turn) => Some(turn),
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping unreadable history entry");
                    None
                }
            })
            .collect())
    }

    /// Drop a user's history
    pub async fn clear(&self, user_id: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .del(self.config.key_for(user_id))
            .await
            .map_err(InfraError::Cache)?;
        Ok(())
    }
}

#[async_trait]
impl ContextStore for RedisContextStore {
    async fn push(
        &self,
        user_id: &str,
        turn: ConversationTurn,
        max_turns: usize,
        ttl: Duration,
    ) -> dtalks_core::Result<()> {
        Ok(self.push_turn(user_id, &turn, max_turns, ttl).await?)
    }

    async fn recent(
        &self,
        user_id: &str,
        max_turns: usize,
    ) -> dtalks_core::Result<Vec<ConversationTurn>> {
        Ok(self.read_turns(user_id, max_turns).await?)
    }
}
