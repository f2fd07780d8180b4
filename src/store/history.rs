use async_trait::async_trait;

use super::ChatHistoryStore;
use crate::error::StorageError;
use crate::models::ChatMessage;

/// History backend for deployments that do not retain conversations
pub struct EmptyChatHistory;

#[async_trait]
impl ChatHistoryStore for EmptyChatHistory {
    async fn get_history(&self, _thread_id: &str) -> Result<Vec<ChatMessage>, StorageError> {
        Ok(Vec::new())
    }
}
