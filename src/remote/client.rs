//! HTTP client for the QueryMind service

use super::types::{
    AppendExchangeBody, ConversationRecord, CreateConversationBody, ExchangeRecord,
    RenameConversationBody,
};
use super::{Answer, AskRequest, HealthStatus, RemoteError};
use crate::db::{Conversation, Exchange, NewExchange};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Talks to the answering endpoint and the conversation/message endpoints
#[derive(Clone)]
pub struct QueryMindClient {
    client: Client,
    base_url: String,
}

impl QueryMindClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Send a request and decode a JSON body
    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, RemoteError> {
        let body = self.send(request).await?;
        serde_json::from_str(&body).map_err(|e| {
            RemoteError::invalid_response(format!("Failed to parse response: {e} - body: {body}"))
        })
    }

    /// Send a request, failing on non-2xx, and return the raw body
    async fn send(&self, request: RequestBuilder) -> Result<String, RemoteError> {
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::from_transport(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(RemoteError::from_status(status, &body));
        }
        Ok(body)
    }

    pub async fn health(&self) -> Result<HealthStatus, RemoteError> {
        self.send_json(self.client.get(self.url("/health"))).await
    }

    pub async fn ask(&self, request: &AskRequest) -> Result<Answer, RemoteError> {
        self.send_json(self.client.post(self.url("/api/ask")).json(request))
            .await
    }

    pub async fn list_conversations(
        &self,
        owner_id: &str,
    ) -> Result<Vec<Conversation>, RemoteError> {
        let url = self.url(&format!("/api/conversations/{owner_id}"));
        let records: Vec<ConversationRecord> = self.send_json(self.client.get(url)).await?;
        Ok(records.into_iter().map(Conversation::from).collect())
    }

    pub async fn create_conversation(
        &self,
        owner_id: &str,
        title: &str,
    ) -> Result<Conversation, RemoteError> {
        let body = CreateConversationBody {
            user_id: owner_id,
            title,
        };
        let record: ConversationRecord = self
            .send_json(self.client.post(self.url("/api/conversations")).json(&body))
            .await?;
        Ok(record.into())
    }

    pub async fn rename_conversation(
        &self,
        conversation_id: &str,
        title: &str,
    ) -> Result<Conversation, RemoteError> {
        let record: ConversationRecord = self
            .send_json(
                self.client
                    .put(self.url(&format!("/api/conversations/{conversation_id}")))
                    .json(&RenameConversationBody { title }),
            )
            .await?;
        Ok(record.into())
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<(), RemoteError> {
        self.send(
            self.client
                .delete(self.url(&format!("/api/conversations/{conversation_id}"))),
        )
        .await?;
        Ok(())
    }

    pub async fn get_exchanges(&self, conversation_id: &str) -> Result<Vec<Exchange>, RemoteError> {
        let records: Vec<ExchangeRecord> = self
            .send_json(
                self.client
                    .get(self.url(&format!("/api/messages/{conversation_id}"))),
            )
            .await?;
        Ok(records.into_iter().map(Exchange::from).collect())
    }

    pub async fn append_exchange(&self, exchange: &NewExchange) -> Result<Exchange, RemoteError> {
        let record: ExchangeRecord = self
            .send_json(
                self.client
                    .post(self.url("/api/messages"))
                    .json(&AppendExchangeBody::from(exchange)),
            )
            .await?;
        Ok(record.into())
    }
}
