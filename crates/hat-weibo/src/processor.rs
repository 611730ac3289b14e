//! One background unit: decode → dedup → draft reply → chunk → post.

use std::sync::Arc;

use hat_ai::{normalize_completion_text, ChatRequest, LlmClient, Message, VisionClient};

use crate::{CommentDispatcher, CommentRequest, DeliveryFilter, EventKind, TextChunker, WeiboEvent};

pub const DEFAULT_REPLY_MODEL: &str = "deepseek-chat";
pub const DEFAULT_MENTION_TEXT: &str = "@MBTI分院帽之电子聊愈版";

#[derive(Debug, Clone)]
/// Public struct `EventProcessorConfig` used across sorting-hat components.
pub struct EventProcessorConfig {
    pub system_prompt: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Status events must contain this text to be answered. `None` answers
    /// every status event.
    pub mention_text: Option<String>,
    /// Post the static holding text when the model cannot be reached.
    pub placeholder_on_failure: bool,
}

impl Default for EventProcessorConfig {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            model: DEFAULT_REPLY_MODEL.to_string(),
            max_tokens: 4096,
            temperature: 0.3,
            mention_text: Some(DEFAULT_MENTION_TEXT.to_string()),
            placeholder_on_failure: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Enumerates supported `ProcessOutcome` values.
pub enum ProcessOutcome {
    Ignored { reason: String },
    Duplicate,
    Failed { reason: String },
    Dispatched { chunks: usize, delivered: usize },
}

/// Turns one accepted webhook event into posted comments.
pub struct EventProcessor {
    filter: DeliveryFilter,
    llm: Arc<dyn LlmClient>,
    vision: Option<Arc<dyn VisionClient>>,
    dispatcher: Arc<CommentDispatcher>,
    chunker: TextChunker,
    config: EventProcessorConfig,
}

impl EventProcessor {
    pub fn new(
        filter: DeliveryFilter,
        llm: Arc<dyn LlmClient>,
        dispatcher: Arc<CommentDispatcher>,
        config: EventProcessorConfig,
    ) -> Self {
        Self {
            filter,
            llm,
            vision: None,
            dispatcher,
            chunker: TextChunker::default(),
            config,
        }
    }

    pub fn with_vision(mut self, vision: Arc<dyn VisionClient>) -> Self {
        self.vision = Some(vision);
        self
    }

    pub fn with_chunker(mut self, chunker: TextChunker) -> Self {
        self.chunker = chunker;
        self
    }

    pub async fn process(&self, event: &WeiboEvent, reply_ip: &str) -> ProcessOutcome {
        if !event.is_add() {
            return ignored(format!("event action '{}'", event.action));
        }
        let mention = self.config.mention_text.as_deref().unwrap_or_default();
        if event.kind == EventKind::Status && !mention.is_empty() && !event.text.contains(mention) {
            tracing::info!(
                status_id = %event.id,
                user_id = event.user_id.as_deref().unwrap_or("-"),
                "status does not mention the bot; skipping"
            );
            return ignored("status without bot mention".to_string());
        }

        let key = event.event_key();
        match self.filter.is_duplicate(&key).await {
            Ok(true) => return ProcessOutcome::Duplicate,
            Ok(false) => {}
            Err(error) => {
                tracing::warn!(event = %key, %error, "duplicate check failed; dropping event");
                return ProcessOutcome::Failed {
                    reason: error.to_string(),
                };
            }
        }

        tracing::info!(
            event = %key,
            user_id = event.user_id.as_deref().unwrap_or("-"),
            screen_name = event.screen_name.as_deref().unwrap_or("-"),
            images = event.images.len(),
            text = %event.text,
            "processing event"
        );

        let prompt = self.build_prompt(event).await;
        let reply = match self.draft_reply(prompt).await {
            Ok(reply) => reply,
            Err(reason) => {
                tracing::warn!(event = %key, %reason, "model reply failed");
                if self.config.placeholder_on_failure {
                    let target = event.comment_target();
                    let placeholder = target.placeholder_text();
                    self.dispatcher
                        .dispatch(&CommentRequest::new(target, reply_ip, placeholder))
                        .await;
                }
                return ProcessOutcome::Failed { reason };
            }
        };

        let chunks = self.chunker.split(&reply);
        let mut delivered = 0_usize;
        for (index, chunk) in chunks.iter().enumerate() {
            let outcome = self
                .dispatcher
                .post_comment(event.comment_target(), reply_ip, chunk)
                .await;
            if outcome.is_delivered() {
                delivered += 1;
            } else {
                tracing::warn!(event = %key, chunk = index, "chunk was not delivered");
            }
        }
        tracing::info!(event = %key, chunks = chunks.len(), delivered, "event processed");
        ProcessOutcome::Dispatched {
            chunks: chunks.len(),
            delivered,
        }
    }

    async fn build_prompt(&self, event: &WeiboEvent) -> String {
        let (Some(vision), Some(image_url)) = (&self.vision, event.first_image_url()) else {
            return event.text.clone();
        };
        match vision.describe_image(image_url).await {
            Ok(description) if !description.trim().is_empty() => {
                format!("{}\n\n[图片内容] {}", event.text, description.trim())
            }
            Ok(_) => event.text.clone(),
            Err(error) => {
                tracing::warn!(%error, image_url, "image description failed; continuing with text");
                event.text.clone()
            }
        }
    }

    async fn draft_reply(&self, prompt: String) -> Result<String, String> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                Message::system(self.config.system_prompt.clone()),
                Message::user(prompt),
            ],
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(self.config.temperature),
        };
        let response = self
            .llm
            .complete(request)
            .await
            .map_err(|error| error.to_string())?;
        let reply = normalize_completion_text(&response.message.content);
        if reply.trim().is_empty() {
            return Err("model returned an empty reply".to_string());
        }
        Ok(reply)
    }
}

fn ignored(reason: String) -> ProcessOutcome {
    tracing::debug!(%reason, "event ignored");
    ProcessOutcome::Ignored { reason }
}
