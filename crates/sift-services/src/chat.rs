//! Chat containers that own research tasks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::store::StoreError;

const TITLE_LIMIT: usize = 80;
const DEFAULT_TITLE: &str = "Research session";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Public,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
}

impl Chat {
    /// Chat titled after the prompt that opened it.
    pub fn for_prompt(
        id: impl Into<String>,
        user_id: impl Into<String>,
        prompt: &str,
        visibility: Visibility,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            title: title_from_prompt(prompt),
            visibility,
            created_at: now,
        }
    }
}

/// Collapse whitespace and cap the prompt at 80 chars.
pub fn title_from_prompt(prompt: &str) -> String {
    let cleaned = prompt.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    if cleaned.chars().count() <= TITLE_LIMIT {
        return cleaned;
    }
    let mut title: String = cleaned.chars().take(TITLE_LIMIT - 3).collect();
    title.push_str("...");
    title
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn get(&self, chat_id: &str) -> Result<Option<Chat>, StoreError>;

    /// Create the chat unless one with that id already exists. Returns the
    /// chat now stored under the id, which is the existing one if another
    /// creator got there first.
    async fn insert(&self, chat: Chat) -> Result<Chat, StoreError>;
}

#[derive(Clone, Default)]
pub struct MemoryChatStore {
    chats: Arc<DashMap<String, Chat>>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn get(&self, chat_id: &str) -> Result<Option<Chat>, StoreError> {
        Ok(self.chats.get(chat_id).map(|c| c.clone()))
    }

    async fn insert(&self, chat: Chat) -> Result<Chat, StoreError> {
        let stored = self.chats.entry(chat.id.clone()).or_insert(chat);
        Ok(stored.clone())
    }
}
