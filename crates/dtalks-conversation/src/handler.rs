//! Entry point for one inbound chat message.
//!
//! Side-channel input (FAQ drill-down, feedback and other `@` commands) is
//! handled here; everything else goes through the [`Pipeline`]. A user's
//! dialog state stays locked while their message is handled.

use dtalks_core::{BlockMessage, FaqCatalog, MessageSink, TransportConfig};
use dtalks_infra::FeedbackKind;
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::commands::{
    parse_selection, Command, EMPTY_MESSAGE, FAQ_EXITED, FAQ_UNAVAILABLE, FEEDBACK_THANKS,
    FEEDBACK_WITHOUT_EXCHANGE, NUMBERS_ONLY, UNKNOWN_COMMAND, UNKNOWN_SELECTION,
};
use crate::dialog::{DialogMode, DialogStateStore, UserDialogState};
use crate::error::{ConversationError, Result};
use crate::pipeline::Pipeline;

#[derive(Debug, Clone)]
pub struct HandlerSettings {
    /// Chance of asking for feedback after an answer
    pub feedback_probability: f64,
    /// Centroid step applied per feedback
    pub learning_rate: f32,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            feedback_probability: TransportConfig::default().feedback_probability,
            learning_rate: 0.1,
        }
    }
}

pub struct ChatHandler {
    pipeline: Arc<Pipeline>,
    dialogs: Arc<DialogStateStore>,
    faq: Arc<dyn FaqCatalog>,
    settings: HandlerSettings,
}

impl ChatHandler {
    pub fn new(
        pipeline: Arc<Pipeline>,
        dialogs: Arc<DialogStateStore>,
        faq: Arc<dyn FaqCatalog>,
        settings: HandlerSettings,
    ) -> Self {
        Self {
            pipeline,
            dialogs,
            faq,
            settings,
        }
    }

    pub fn dialogs(&self) -> &Arc<DialogStateStore> {
        &self.dialogs
    }

    /// Handle one message from `user_id`, replying through `sink`
    #[instrument(skip(self, text, sink))]
    pub async fn handle(&self, user_id: &str, text: &str, sink: &dyn MessageSink) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return send_text(sink, EMPTY_MESSAGE).await;
        }

        let mut state = self.dialogs.lock(user_id).await;

        if let Some(mode) = state.pending_mode {
            return self.handle_faq_mode(&mut state, mode, text, sink).await;
        }

        if let Some(command) = Command::parse(text) {
            return self.handle_command(&mut state, command, sink).await;
        }

        let reply = match self.pipeline.run(user_id, text, sink).await {
            Ok(reply) => reply,
            Err(e) => {
                state.last_exchange = None;
                return Err(e);
            }
        };
        send_text(sink, &reply.text).await?;

        let Some(label) = reply.label.clone().filter(|_| reply.is_answered()) else {
            state.last_exchange = None;
            return Ok(());
        };

        if let Some(link) = &reply.link {
            send_blocks(sink, &BlockMessage::form_link(link)).await?;
        }

        let probability = self.settings.feedback_probability.clamp(0.0, 1.0);
        let ask_feedback = rand::thread_rng().gen_bool(probability);
        if ask_feedback {
            state.complete(reply.query, label);
            send_blocks(sink, &BlockMessage::feedback_prompt()).await?;
        } else {
            state.last_exchange = None;
        }
        Ok(())
    }

    async fn handle_command(
        &self,
        state: &mut UserDialogState,
        command: Command,
        sink: &dyn MessageSink,
    ) -> Result<()> {
        match command {
            Command::Like | Command::Dislike => {
                let Some(exchange) = state.take_exchange() else {
                    return send_text(sink, FEEDBACK_WITHOUT_EXCHANGE).await;
                };
                let (is_like, kind) = if command == Command::Like {
                    (true, FeedbackKind::Like)
                } else {
                    (false, FeedbackKind::Dislike)
                };
                self.pipeline
                    .classifier()
                    .feedback(&exchange.query, &exchange.label, is_like, self.settings.learning_rate)
                    .await;
                self.pipeline
                    .metrics()
                    .record_feedback(&exchange.label.tag(), kind);
                info!(label = %exchange.label, feedback = kind.as_str(), "Feedback applied");
                send_text(sink, FEEDBACK_THANKS).await
            }
            Command::Faq => self.show_categories(state, sink).await,
            Command::ExitFaq | Command::Unknown(_) => {
                debug!(command = ?command, "Unsupported command");
                send_text(sink, UNKNOWN_COMMAND).await
            }
        }
    }

    async fn handle_faq_mode(
        &self,
        state: &mut UserDialogState,
        mode: DialogMode,
        text: &str,
        sink: &dyn MessageSink,
    ) -> Result<()> {
        match Command::parse(text) {
            Some(Command::ExitFaq) => {
                state.pending_mode = None;
                return send_text(sink, FAQ_EXITED).await;
            }
            Some(Command::Faq) => return self.show_categories(state, sink).await,
            _ => {}
        }

        let Some(selection) = parse_selection(text) else {
            return send_text(sink, NUMBERS_ONLY).await;
        };

        match mode {
            DialogMode::FaqCategory => match self.faq.questions(selection).await {
                Ok(questions) if !questions.is_empty() => {
                    send_blocks(sink, &BlockMessage::faq_questions(&questions)).await?;
                    state.pending_mode = Some(DialogMode::FaqQuestion);
                    Ok(())
                }
                Ok(_) => send_text(sink, UNKNOWN_SELECTION).await,
                Err(e) => {
                    warn!(category_id = selection, error = %e, "FAQ questions unavailable");
                    send_text(sink, FAQ_UNAVAILABLE).await
                }
            },
            DialogMode::FaqQuestion => match self.faq.answer(selection).await {
                Ok(Some(answer)) => {
                    send_blocks(sink, &BlockMessage::faq_answer(&answer)).await?;
                    state.pending_mode = None;
                    Ok(())
                }
                Ok(None) => send_text(sink, UNKNOWN_SELECTION).await,
                Err(e) => {
                    warn!(faq_id = selection, error = %e, "FAQ answer unavailable");
                    send_text(sink, FAQ_UNAVAILABLE).await
                }
            },
        }
    }

    async fn show_categories(&self, state: &mut UserDialogState, sink: &dyn MessageSink) -> Result<()> {
        match self.faq.categories().await {
            Ok(categories) => {
                send_blocks(sink, &BlockMessage::faq_categories(&categories)).await?;
                state.pending_mode = Some(DialogMode::FaqCategory);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "FAQ categories unavailable");
                send_text(sink, FAQ_UNAVAILABLE).await
            }
        }
    }
}

async fn send_text(sink: &dyn MessageSink, text: &str) -> Result<()> {
    sink.send_text(text)
        .await
        .map_err(|e| ConversationError::delivery(e.to_string()))
}

async fn send_blocks(sink: &dyn MessageSink, message: &BlockMessage) -> Result<()> {
    sink.send_blocks(message)
        .await
        .map_err(|e| ConversationError::delivery(e.to_string()))
}
