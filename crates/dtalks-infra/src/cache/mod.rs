//! Response cache and conversation history storage

pub mod redis;
pub mod semantic;
pub mod vector;

pub use self::redis::{RedisContextConfig, RedisContextStore};
pub use semantic::{MemorySemanticCache, SemanticCacheConfig};
pub use vector::{RedisCacheConfig, RedisSemanticCache};
