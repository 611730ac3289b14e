//! Model backends used to draft replies.
//!
//! Exposes an OpenAI-compatible chat-completion client (DeepSeek by default)
//! and a vision client that describes an image URL.
mod openai;
mod retry;
mod types;
mod vision;

pub use openai::{OpenAiClient, OpenAiConfig};
pub use types::{
    normalize_completion_text, ChatRequest, ChatResponse, ChatUsage, HatAiError, LlmClient,
    Message, MessageRole,
};
pub use vision::{HttpVisionClient, HttpVisionConfig, VisionClient};
