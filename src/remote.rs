//! Client side of the QueryMind HTTP service
//!
//! The answering model is opaque: a question (plus optional conversation id
//! and owner) goes in, an answer string and a confidence score come out.

mod client;
mod error;
mod types;

pub use client::QueryMindClient;
pub use error::{RemoteError, RemoteErrorKind};
pub use types::{Answer, AskRequest, HealthStatus, EMPTY_ANSWER_FALLBACK};

use crate::runtime::AnswerService;
use async_trait::async_trait;
use std::sync::Arc;

/// Logging wrapper for answer services
pub struct LoggingAnswerService {
    inner: Arc<dyn AnswerService>,
}

impl LoggingAnswerService {
    pub fn new(inner: Arc<dyn AnswerService>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl AnswerService for LoggingAnswerService {
    async fn ask(&self, request: &AskRequest) -> Result<Answer, RemoteError> {
        let start = std::time::Instant::now();
        let result = self.inner.ask(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(answer) => {
                tracing::info!(
                    conv_id = ?request.conversation_id,
                    duration_ms = %duration.as_millis(),
                    confidence = ?answer.confidence,
                    "Question answered"
                );
            }
            Err(e) => {
                tracing::error!(
                    conv_id = ?request.conversation_id,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    kind = ?e.kind,
                    "Question failed"
                );
            }
        }

        result
    }
}
