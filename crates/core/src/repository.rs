//! Repository traits for sessions and messages.
//!
//! Durable storage is an external collaborator; the core only needs simple
//! CRUD and a newest-first page query. In-process implementations backed by
//! `tokio::sync::RwLock` are provided for tests and embedded use.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::message::{ChatId, ChatMessage, ChatSession};

/// Storage for chat sessions.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Find a session; `Error::SessionNotFound` when absent.
    async fn find_by_id(&self, id: &ChatId) -> Result<ChatSession>;

    /// Find a session, `None` when absent.
    async fn try_find_by_id(&self, id: &ChatId) -> Result<Option<ChatSession>>;

    /// Insert or replace a session.
    async fn upsert(&self, session: ChatSession) -> Result<()>;
}

/// Storage for chat messages.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Persist a new message.
    async fn create(&self, message: ChatMessage) -> Result<()>;

    /// Insert or replace a message by ID.
    async fn upsert(&self, message: ChatMessage) -> Result<()>;

    /// Page a chat's messages, newest first.
    async fn find_by_chat_id(
        &self,
        chat_id: &ChatId,
        skip: usize,
        count: usize,
    ) -> Result<Vec<ChatMessage>>;

    /// Find one message in a chat, `None` when absent.
    async fn try_find_by_id(
        &self,
        chat_id: &ChatId,
        message_id: &str,
    ) -> Result<Option<ChatMessage>>;
}

/// In-process session store.
pub struct InProcessSessionStore {
    sessions: RwLock<HashMap<String, ChatSession>>,
}

impl InProcessSessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InProcessSessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionRepository for InProcessSessionStore {
    async fn find_by_id(&self, id: &ChatId) -> Result<ChatSession> {
        self.sessions
            .read()
            .await
            .get(&id.0)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(id.clone()))
    }

    async fn try_find_by_id(&self, id: &ChatId) -> Result<Option<ChatSession>> {
        Ok(self.sessions.read().await.get(&id.0).cloned())
    }

    async fn upsert(&self, session: ChatSession) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(session.id.0.clone(), session);
        Ok(())
    }
}

/// In-process message store. Messages are kept in insertion order;
/// queries reverse into newest-first.
pub struct InProcessMessageStore {
    messages: RwLock<Vec<ChatMessage>>,
}

impl InProcessMessageStore {
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(Vec::new()),
        }
    }

    /// Total stored messages, across all chats.
    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

impl Default for InProcessMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageRepository for InProcessMessageStore {
    async fn create(&self, message: ChatMessage) -> Result<()> {
        self.messages.write().await.push(message);
        Ok(())
    }

    async fn upsert(&self, message: ChatMessage) -> Result<()> {
        let mut messages = self.messages.write().await;
        match messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message,
            None => messages.push(message),
        }
        Ok(())
    }

    async fn find_by_chat_id(
        &self,
        chat_id: &ChatId,
        skip: usize,
        count: usize,
    ) -> Result<Vec<ChatMessage>> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .rev()
            .filter(|m| &m.chat_id == chat_id)
            .skip(skip)
            .take(count)
            .cloned()
            .collect())
    }

    async fn try_find_by_id(
        &self,
        chat_id: &ChatId,
        message_id: &str,
    ) -> Result<Option<ChatMessage>> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .find(|m| &m.chat_id == chat_id && m.id == message_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn session_lookup_not_found() {
        let store = InProcessSessionStore::new();
        let missing = ChatId::from("nope");

        let err = store.find_by_id(&missing).await.unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
        assert!(store.try_find_by_id(&missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn session_upsert_and_find() {
        let store = InProcessSessionStore::new();
        let session = ChatSession::new("Trip planning", "You plan trips.");
        let id = session.id.clone();
        store.upsert(session).await.unwrap();

        let found = store.find_by_id(&id).await.unwrap();
        assert_eq!(found.title, "Trip planning");
    }

    #[tokio::test]
    async fn messages_page_newest_first() {
        let store = InProcessMessageStore::new();
        let chat_id = ChatId::from("c1");
        for i in 0..5 {
            store
                .create(ChatMessage::user(&chat_id, "u1", "Alice", format!("msg {i}")))
                .await
                .unwrap();
        }

        let page = store.find_by_chat_id(&chat_id, 0, 3).await.unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].content, "msg 4");
        assert_eq!(page[2].content, "msg 2");

        let rest = store.find_by_chat_id(&chat_id, 3, 10).await.unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].content, "msg 1");
    }

    #[tokio::test]
    async fn messages_scoped_by_chat() {
        let store = InProcessMessageStore::new();
        let a = ChatId::from("a");
        let b = ChatId::from("b");
        store
            .create(ChatMessage::user(&a, "u1", "Alice", "in a"))
            .await
            .unwrap();
        store
            .create(ChatMessage::user(&b, "u1", "Alice", "in b"))
            .await
            .unwrap();

        let page = store.find_by_chat_id(&a, 0, 10).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].content, "in a");
    }

    #[tokio::test]
    async fn upsert_replaces_in_place() {
        let store = InProcessMessageStore::new();
        let chat_id = ChatId::from("c1");
        let mut msg = ChatMessage::bot(&chat_id, "Assistant", "partial");
        store.create(msg.clone()).await.unwrap();

        msg.append_content(" and more");
        store.upsert(msg.clone()).await.unwrap();

        assert_eq!(store.len().await, 1);
        let found = store.try_find_by_id(&chat_id, &msg.id).await.unwrap().unwrap();
        assert_eq!(found.content, "partial and more");
    }
}
