//! # Dtalks Conversation
//!
//! Everything that happens between an inbound chat message and its reply.
//!
//! - **Guardrail**: keyword blacklist, then a moderation model
//! - **Context**: rolling per-user history with LLM relevance selection
//! - **Pipeline**: classification, cache lookup, strategy prompts, generation
//! - **Handler**: FAQ drill-down and feedback commands ahead of the pipeline

pub mod commands;
pub mod context;
pub mod dialog;
pub mod error;
pub mod guardrail;
pub mod handler;
pub mod pipeline;
pub mod prompts;

pub use commands::{parse_selection, Command};
pub use context::{build_context_prompt, parse_indices, ContextSettings, ConversationContext, MemoryContextStore};
pub use dialog::{DialogMode, DialogStateStore, Exchange, UserDialogState};
pub use error::{ConversationError, Result};
pub use guardrail::{BlacklistEntry, Guardrail, GuardrailVerdict, DEFAULT_REFUSAL};
pub use handler::{ChatHandler, HandlerSettings};
pub use pipeline::{Outcome, Pipeline, PipelineDeps, PipelineReply, PipelineSettings, CLARIFY, NO_MATCHING_INFO};
pub use prompts::StrategySources;
