//! Request/response types for the QueryMind service

use crate::db::{Conversation, Exchange, NewExchange};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Shown in place of a blank answer
pub const EMPTY_ANSWER_FALLBACK: &str = "Sorry, I couldn't process your question.";

/// A question for the answering service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(rename = "user_id")]
    pub owner_id: String,
}

/// What the answering service returned
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Answer {
    #[serde(default)]
    pub answer: String,
    #[serde(rename = "confidence_logit", default)]
    pub confidence: Option<f64>,
}

impl Answer {
    pub fn new(answer: impl Into<String>, confidence: Option<f64>) -> Self {
        Self {
            answer: answer.into(),
            confidence,
        }
    }

    /// Answer text as it should be displayed and stored
    pub fn display_text(&self) -> &str {
        if self.answer.trim().is_empty() {
            EMPTY_ANSWER_FALLBACK
        } else {
            &self.answer
        }
    }
}

/// `GET /health` body
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub passages_count: Option<u64>,
    #[serde(default)]
    pub index_size: Option<u64>,
}

// ============================================================================
// Wire records
// ============================================================================

#[derive(Debug, Serialize)]
pub(crate) struct CreateConversationBody<'a> {
    pub user_id: &'a str,
    pub title: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct RenameConversationBody<'a> {
    pub title: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct AppendExchangeBody<'a> {
    pub conversation_id: &'a str,
    pub user_id: &'a str,
    pub question: &'a str,
    pub answer: &'a str,
    pub confidence: Option<f64>,
}

impl<'a> From<&'a NewExchange> for AppendExchangeBody<'a> {
    fn from(exchange: &'a NewExchange) -> Self {
        Self {
            conversation_id: &exchange.conversation_id,
            user_id: &exchange.owner_id,
            question: &exchange.question,
            answer: &exchange.answer,
            confidence: exchange.confidence,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConversationRecord {
    pub id: String,
    pub user_id: String,
    pub title: String,
    #[serde(deserialize_with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "optional_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<ConversationRecord> for Conversation {
    fn from(record: ConversationRecord) -> Self {
        Self {
            updated_at: record.updated_at.unwrap_or(record.created_at),
            id: record.id,
            owner_id: record.user_id,
            title: record.title,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ExchangeRecord {
    pub id: String,
    pub conversation_id: String,
    #[serde(default)]
    pub user_id: String,
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(deserialize_with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl From<ExchangeRecord> for Exchange {
    fn from(record: ExchangeRecord) -> Self {
        Self {
            id: record.id,
            conversation_id: record.conversation_id,
            owner_id: record.user_id,
            question: record.question,
            answer: record.answer,
            confidence: record.confidence,
            created_at: record.created_at,
        }
    }
}

/// Parse an ISO-8601 timestamp. The service emits naive local-less
/// timestamps (`2024-05-01T10:00:00.123456`); those are read as UTC.
pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

fn optional_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}
