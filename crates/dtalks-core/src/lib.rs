//! # Dtalks Core
//!
//! Shared building blocks for the Dtalks chatbot: the application error type,
//! configuration loading, domain types, block-formatted outbound payloads, and
//! the async traits behind which every external service sits.

pub mod blocks;
pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::*;
pub use types::*;

pub use blocks::{Block, BlockMessage, Inline, OutboundMessage, TextContent};
pub use traits::{
    CachedAnswer, ContextStore, DocumentAccess, Embedder, FaqCatalog, Generator, IngestionSink,
    MessageSink, ModerationVerdict, ResponseCache, SafetyModerator, ScoredPoint, SearchFilter,
    Situation, SituationProvider, Translation, Translator, VectorSearch,
};
