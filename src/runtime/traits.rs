//! Trait abstractions for runtime I/O
//!
//! These traits let the session run against the HTTP service, the local
//! SQLite store, or the mocks in `testing`.

use crate::db::{Conversation, Database, DbError, Exchange, NewExchange};
use crate::remote::{Answer, AskRequest, QueryMindClient, RemoteError};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Error returned by conversation and exchange stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Database(#[from] DbError),
}

/// The answering capability
#[async_trait]
pub trait AnswerService: Send + Sync {
    async fn ask(&self, request: &AskRequest) -> Result<Answer, RemoteError>;
}

/// Storage for question/answer exchanges
#[async_trait]
pub trait ExchangeStore: Send + Sync {
    /// All exchanges of a conversation, oldest first
    async fn fetch_exchanges(&self, conversation_id: &str) -> Result<Vec<Exchange>, StoreError>;

    async fn append_exchange(&self, exchange: &NewExchange) -> Result<Exchange, StoreError>;
}

/// Storage for an owner's conversations
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>, StoreError>;

    async fn create_conversation(
        &self,
        owner_id: &str,
        title: &str,
    ) -> Result<Conversation, StoreError>;

    async fn delete_conversation(&self, conversation_id: &str) -> Result<(), StoreError>;

    /// Returns the conversation as stored, including the title actually written
    async fn rename_conversation(
        &self,
        conversation_id: &str,
        title: &str,
    ) -> Result<Conversation, StoreError>;
}

/// Combined storage trait for convenience
pub trait Storage: ConversationStore + ExchangeStore {}
impl<T: ConversationStore + ExchangeStore + ?Sized> Storage for T {}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: AnswerService + ?Sized> AnswerService for Arc<T> {
    async fn ask(&self, request: &AskRequest) -> Result<Answer, RemoteError> {
        (**self).ask(request).await
    }
}

#[async_trait]
impl<T: ExchangeStore + ?Sized> ExchangeStore for Arc<T> {
    async fn fetch_exchanges(&self, conversation_id: &str) -> Result<Vec<Exchange>, StoreError> {
        (**self).fetch_exchanges(conversation_id).await
    }

    async fn append_exchange(&self, exchange: &NewExchange) -> Result<Exchange, StoreError> {
        (**self).append_exchange(exchange).await
    }
}

#[async_trait]
impl<T: ConversationStore + ?Sized> ConversationStore for Arc<T> {
    async fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>, StoreError> {
        (**self).list_conversations(owner_id).await
    }

    async fn create_conversation(
        &self,
        owner_id: &str,
        title: &str,
    ) -> Result<Conversation, StoreError> {
        (**self).create_conversation(owner_id, title).await
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<(), StoreError> {
        (**self).delete_conversation(conversation_id).await
    }

    async fn rename_conversation(
        &self,
        conversation_id: &str,
        title: &str,
    ) -> Result<Conversation, StoreError> {
        (**self).rename_conversation(conversation_id, title).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

#[async_trait]
impl AnswerService for QueryMindClient {
    async fn ask(&self, request: &AskRequest) -> Result<Answer, RemoteError> {
        QueryMindClient::ask(self, request).await
    }
}

#[async_trait]
impl ExchangeStore for QueryMindClient {
    async fn fetch_exchanges(&self, conversation_id: &str) -> Result<Vec<Exchange>, StoreError> {
        Ok(self.get_exchanges(conversation_id).await?)
    }

    async fn append_exchange(&self, exchange: &NewExchange) -> Result<Exchange, StoreError> {
        Ok(QueryMindClient::append_exchange(self, exchange).await?)
    }
}

#[async_trait]
impl ConversationStore for QueryMindClient {
    async fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>, StoreError> {
        Ok(QueryMindClient::list_conversations(self, owner_id).await?)
    }

    async fn create_conversation(
        &self,
        owner_id: &str,
        title: &str,
    ) -> Result<Conversation, StoreError> {
        Ok(QueryMindClient::create_conversation(self, owner_id, title).await?)
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<(), StoreError> {
        Ok(QueryMindClient::delete_conversation(self, conversation_id).await?)
    }

    async fn rename_conversation(
        &self,
        conversation_id: &str,
        title: &str,
    ) -> Result<Conversation, StoreError> {
        Ok(QueryMindClient::rename_conversation(self, conversation_id, title).await?)
    }
}

/// Adapter to use the local SQLite database as Storage
#[derive(Clone)]
pub struct LocalStorage {
    db: Database,
}

impl LocalStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ExchangeStore for LocalStorage {
    async fn fetch_exchanges(&self, conversation_id: &str) -> Result<Vec<Exchange>, StoreError> {
        Ok(self.db.get_exchanges(conversation_id)?)
    }

    async fn append_exchange(&self, exchange: &NewExchange) -> Result<Exchange, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        Ok(self.db.add_exchange(&id, exchange)?)
    }
}

#[async_trait]
impl ConversationStore for LocalStorage {
    async fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>, StoreError> {
        Ok(self.db.list_conversations(owner_id)?)
    }

    async fn create_conversation(
        &self,
        owner_id: &str,
        title: &str,
    ) -> Result<Conversation, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        Ok(self.db.create_conversation(&id, owner_id, title)?)
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<(), StoreError> {
        Ok(self.db.delete_conversation(conversation_id)?)
    }

    async fn rename_conversation(
        &self,
        conversation_id: &str,
        title: &str,
    ) -> Result<Conversation, StoreError> {
        Ok(self.db.rename_conversation(conversation_id, title)?)
    }
}
