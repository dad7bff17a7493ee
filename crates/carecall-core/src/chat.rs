//! Chat persistence seam.

use async_trait::async_trait;
use carecall_common::ChatMessage;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
#[error("Chat store error: {0}")]
pub struct ChatStoreError(pub String);

/// Where in-call chat messages are persisted.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn save(&self, message: &ChatMessage) -> Result<(), ChatStoreError>;
}

/// What the user typed or attached.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatContent {
    pub text: String,
    pub audio_url: Option<String>,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
}

impl ChatContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Keeps messages in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemoryChatStore {
    messages: Mutex<Vec<ChatMessage>>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.messages.lock().await.clone()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn save(&self, message: &ChatMessage) -> Result<(), ChatStoreError> {
        self.messages.lock().await.push(message.clone());
        Ok(())
    }
}
