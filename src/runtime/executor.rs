//! Session runtime executor
//!
//! Owns the live `SessionState` and performs the effects the state machine
//! asks for. The state lock is held only around `transition`, never across
//! an `.await`, so a conversation switch can land while an ask is in flight.

use super::traits::{AnswerService, Storage};
use crate::db::Conversation;
use crate::remote::RemoteError;
use crate::state_machine::{
    transition, DisplayTurn, Effect, Event, SessionState, Timeline, TransitionError,
    TransitionResult,
};
use crate::title::{title_from_question, truncate_title, DEFAULT_TITLE};
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Default bound on a single ask call
pub const DEFAULT_ASK_TIMEOUT: Duration = Duration::from_secs(30);

/// Session-level failures. None of them poisons the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Answer service failed: {0}")]
    AskFailed(String),
    #[error("Could not save: {0}")]
    PersistenceFailed(String),
    #[error("Could not load conversation: {0}")]
    LoadFailed(String),
    #[error("Title is empty")]
    EmptyTitle,
    #[error("No user is signed in")]
    SignedOut,
}

/// How a submission ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionStatus {
    Rejected(TransitionError),
    Answered,
    /// The sentinel turn was shown instead of an answer
    AskFailed(String),
    /// The user switched away or logged out before the answer arrived
    Detached,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceOutcome {
    NotAttempted,
    /// Answered outside any conversation
    Skipped,
    Saved,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TitleOutcome {
    NotRequired,
    Renamed(String),
    Failed(String),
}

/// Everything that happened to one submitted question
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionReport {
    pub status: SubmissionStatus,
    /// Turns appended to the visible timeline, in order
    pub timeline_delta: Vec<DisplayTurn>,
    pub persistence: PersistenceOutcome,
    pub title: TitleOutcome,
}

impl SubmissionReport {
    fn rejected(reason: TransitionError) -> Self {
        Self {
            status: SubmissionStatus::Rejected(reason),
            timeline_delta: Vec::new(),
            persistence: PersistenceOutcome::NotAttempted,
            title: TitleOutcome::NotRequired,
        }
    }

    /// Degraded outcomes worth showing to the user
    pub fn warnings(&self) -> Vec<SessionError> {
        let mut warnings = Vec::new();
        if let SubmissionStatus::AskFailed(reason) = &self.status {
            warnings.push(SessionError::AskFailed(reason.clone()));
        }
        if let PersistenceOutcome::Failed(reason) = &self.persistence {
            warnings.push(SessionError::PersistenceFailed(reason.clone()));
        }
        if let TitleOutcome::Failed(reason) = &self.title {
            warnings.push(SessionError::PersistenceFailed(reason.clone()));
        }
        warnings
    }
}

/// Runtime for one open UI session
pub struct SessionRuntime<S, A>
where
    S: Storage,
    A: AnswerService,
{
    state: Mutex<SessionState>,
    storage: S,
    answers: A,
    ask_timeout: Duration,
}

impl<S, A> SessionRuntime<S, A>
where
    S: Storage,
    A: AnswerService,
{
    pub fn new(owner_id: impl Into<String>, storage: S, answers: A) -> Self {
        Self {
            state: Mutex::new(SessionState::new(owner_id)),
            storage,
            answers,
            ask_timeout: DEFAULT_ASK_TIMEOUT,
        }
    }

    pub fn with_ask_timeout(mut self, timeout: Duration) -> Self {
        self.ask_timeout = timeout;
        self
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one pure transition and swap in the new state
    fn dispatch(&self, event: Event) -> Result<TransitionResult, TransitionError> {
        let mut state = self.lock();
        let result = transition(&state, event)?;
        state.clone_from(&result.new_state);
        Ok(result)
    }

    /// Dispatch an event that cannot be refused
    fn apply(&self, event: Event) -> TransitionResult {
        let mut state = self.lock();
        match transition(&state, event) {
            Ok(result) => {
                state.clone_from(&result.new_state);
                result
            }
            Err(e) => {
                tracing::error!(error = %e, "Unexpected transition error");
                TransitionResult::new(state.clone())
            }
        }
    }

    // ==================== Accessors ====================

    pub fn snapshot(&self) -> SessionState {
        self.lock().clone()
    }

    pub fn timeline(&self) -> Vec<DisplayTurn> {
        self.lock().timeline.turns().to_vec()
    }

    pub fn current_conversation(&self) -> Option<Conversation> {
        self.lock().current.clone()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.lock().conversations.clone()
    }

    pub fn owner_id(&self) -> Option<String> {
        self.lock().owner_id.clone()
    }

    pub fn is_pending(&self) -> bool {
        self.lock().is_pending()
    }

    fn require_owner(&self) -> Result<String, SessionError> {
        self.owner_id().ok_or(SessionError::SignedOut)
    }

    // ==================== Submission ====================

    /// Ask a question in the current conversation.
    ///
    /// Never fails: rejected input, ask failures and store failures all
    /// come back in the report.
    pub async fn submit_question(&self, text: &str) -> SubmissionReport {
        let event = Event::Submit {
            text: text.to_string(),
            request_id: uuid::Uuid::new_v4().to_string(),
            user_turn_id: uuid::Uuid::new_v4().to_string(),
            assistant_turn_id: uuid::Uuid::new_v4().to_string(),
            now: Utc::now(),
        };

        let result = match self.dispatch(event) {
            Ok(result) => result,
            Err(e) => {
                tracing::debug!(reason = %e, "Question rejected");
                return SubmissionReport::rejected(e);
            }
        };

        let mut report = SubmissionReport {
            status: SubmissionStatus::Detached,
            timeline_delta: result.appended,
            persistence: PersistenceOutcome::NotAttempted,
            title: TitleOutcome::NotRequired,
        };

        // Effects run in order; each may feed one event back
        let mut effects: VecDeque<Effect> = result.effects.into();
        while let Some(effect) = effects.pop_front() {
            let Some(event) = self.execute_effect(effect, &mut report).await else {
                continue;
            };

            let answer_event = match &event {
                Event::AnswerReceived { ticket, result, .. } => {
                    Some((result.as_ref().err().cloned(), ticket.conversation_id.is_some()))
                }
                _ => None,
            };

            let result = self.apply(event);
            if let Some((failure, has_conversation)) = answer_event {
                report.status = match (result.appended.is_empty(), failure) {
                    (true, _) => SubmissionStatus::Detached,
                    (false, None) => SubmissionStatus::Answered,
                    (false, Some(reason)) => SubmissionStatus::AskFailed(reason),
                };
                if report.status == SubmissionStatus::Answered && !has_conversation {
                    report.persistence = PersistenceOutcome::Skipped;
                }
            }
            report.timeline_delta.extend(result.appended);
            effects.extend(result.effects);
        }

        report
    }

    async fn execute_effect(
        &self,
        effect: Effect,
        report: &mut SubmissionReport,
    ) -> Option<Event> {
        match effect {
            Effect::RequestAnswer { ticket } => {
                let request = Effect::ask_request(&ticket);
                let asked = tokio::time::timeout(self.ask_timeout, self.answers.ask(&request));
                let result = match asked.await {
                    Ok(result) => result,
                    Err(_) => Err(RemoteError::timeout(format!(
                        "No answer after {}s",
                        self.ask_timeout.as_secs()
                    ))),
                };
                if let Err(e) = &result {
                    tracing::warn!(
                        conv_id = ?ticket.conversation_id,
                        error = %e,
                        kind = ?e.kind,
                        "Ask failed; showing error turn"
                    );
                }
                Some(Event::AnswerReceived {
                    ticket,
                    result: result.map_err(|e| e.to_string()),
                    now: Utc::now(),
                })
            }

            Effect::PersistExchange { ticket, answer } => {
                let exchange = Effect::new_exchange(&ticket, &answer)?;
                match self.storage.append_exchange(&exchange).await {
                    Ok(stored) => {
                        tracing::info!(
                            conv_id = %stored.conversation_id,
                            exchange_id = %stored.id,
                            "Exchange saved"
                        );
                        report.persistence = PersistenceOutcome::Saved;
                        Some(Event::ExchangePersisted {
                            ticket,
                            exchange: stored,
                        })
                    }
                    Err(e) => {
                        tracing::warn!(
                            conv_id = %exchange.conversation_id,
                            error = %e,
                            "Failed to save exchange; answer stays visible unsaved"
                        );
                        report.persistence = PersistenceOutcome::Failed(e.to_string());
                        Some(Event::ExchangePersistFailed { ticket })
                    }
                }
            }

            Effect::DeriveTitle {
                conversation_id,
                question,
            } => {
                report.title = self.derive_title(&conversation_id, &question).await;
                None
            }
        }
    }

    /// Title a conversation after its first question.
    ///
    /// Failures are logged and reported, never raised.
    pub async fn derive_title(&self, conversation_id: &str, question: &str) -> TitleOutcome {
        let Some(title) = title_from_question(question) else {
            return TitleOutcome::NotRequired;
        };

        match self.storage.rename_conversation(conversation_id, &title).await {
            Ok(conversation) => {
                let stored = conversation.title.clone();
                tracing::info!(conv_id = %conversation_id, title = %stored, "Conversation titled");
                self.apply(Event::ConversationRenamed { conversation });
                TitleOutcome::Renamed(stored)
            }
            Err(e) => {
                tracing::warn!(
                    conv_id = %conversation_id,
                    error = %e,
                    "Failed to title conversation"
                );
                TitleOutcome::Failed(e.to_string())
            }
        }
    }

    // ==================== Timeline ====================

    /// Stored exchanges of a conversation as display turns.
    ///
    /// Fails closed: a fetch error gives an empty timeline, never a partial one.
    pub async fn load_timeline(&self, conversation_id: &str) -> Vec<DisplayTurn> {
        match self.fetch_timeline(conversation_id).await {
            Ok(timeline) => timeline.into_turns(),
            Err(e) => {
                tracing::warn!(conv_id = %conversation_id, error = %e, "Showing empty timeline");
                Vec::new()
            }
        }
    }

    async fn fetch_timeline(&self, conversation_id: &str) -> Result<Timeline, SessionError> {
        let exchanges = self
            .storage
            .fetch_exchanges(conversation_id)
            .await
            .map_err(|e| SessionError::LoadFailed(e.to_string()))?;
        Ok(Timeline::from_exchanges(&exchanges))
    }

    /// Make `conversation` current and show its stored history
    pub async fn open(&self, conversation: Conversation) -> Vec<DisplayTurn> {
        let conversation_id = conversation.id.clone();
        self.select_conversation(conversation);
        self.reload_conversation(&conversation_id).await;
        self.timeline()
    }

    /// Reload the current conversation, keeping turns not yet stored
    pub async fn reload(&self) -> Vec<DisplayTurn> {
        let current = self.lock().current_id().map(String::from);
        if let Some(conversation_id) = current {
            self.reload_conversation(&conversation_id).await;
        }
        self.timeline()
    }

    async fn reload_conversation(&self, conversation_id: &str) {
        let epoch = self.lock().epoch;
        let turns = self.load_timeline(conversation_id).await;
        self.apply(Event::TimelineLoaded {
            conversation_id: conversation_id.to_string(),
            epoch,
            turns,
        });
    }

    // ==================== Directory ====================

    /// Fetch the owner's conversations, newest first
    pub async fn refresh_conversations(&self) -> Result<Vec<Conversation>, SessionError> {
        let owner_id = self.require_owner()?;
        let conversations = self
            .storage
            .list_conversations(&owner_id)
            .await
            .map_err(|e| {
                tracing::warn!(owner_id = %owner_id, error = %e, "Failed to list conversations");
                SessionError::PersistenceFailed(e.to_string())
            })?;
        self.apply(Event::ConversationsListed { conversations });
        Ok(self.conversations())
    }

    /// Create a conversation and make it current with an empty timeline
    pub async fn create_conversation(
        &self,
        title: Option<&str>,
    ) -> Result<Conversation, SessionError> {
        let owner_id = self.require_owner()?;
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map_or_else(|| DEFAULT_TITLE.to_string(), truncate_title);

        let conversation = self
            .storage
            .create_conversation(&owner_id, &title)
            .await
            .map_err(|e| {
                tracing::warn!(owner_id = %owner_id, error = %e, "Failed to create conversation");
                SessionError::PersistenceFailed(e.to_string())
            })?;
        tracing::info!(conv_id = %conversation.id, "Conversation created");
        self.apply(Event::ConversationCreated {
            conversation: conversation.clone(),
        });
        Ok(conversation)
    }

    /// Delete a conversation; deleting the current one clears the selection
    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<(), SessionError> {
        self.storage
            .delete_conversation(conversation_id)
            .await
            .map_err(|e| {
                tracing::warn!(
                    conv_id = %conversation_id,
                    error = %e,
                    "Failed to delete conversation"
                );
                SessionError::PersistenceFailed(e.to_string())
            })?;
        tracing::info!(conv_id = %conversation_id, "Conversation deleted");
        self.apply(Event::ConversationDeleted {
            conversation_id: conversation_id.to_string(),
        });
        Ok(())
    }

    /// Make `conversation` current. Switching clears the timeline and
    /// detaches any in-flight question; the caller loads history after.
    pub fn select_conversation(&self, conversation: Conversation) {
        self.apply(Event::ConversationSelected { conversation });
    }

    pub fn clear_selection(&self) {
        self.apply(Event::SelectionCleared);
    }

    /// Rename a conversation; the stored title is mirrored into the session
    pub async fn rename_conversation(
        &self,
        conversation_id: &str,
        title: &str,
    ) -> Result<Conversation, SessionError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(SessionError::EmptyTitle);
        }
        let conversation = self
            .storage
            .rename_conversation(conversation_id, &truncate_title(title))
            .await
            .map_err(|e| {
                tracing::warn!(
                    conv_id = %conversation_id,
                    error = %e,
                    "Failed to rename conversation"
                );
                SessionError::PersistenceFailed(e.to_string())
            })?;
        self.apply(Event::ConversationRenamed {
            conversation: conversation.clone(),
        });
        Ok(conversation)
    }

    // ==================== Identity ====================

    pub fn sign_in(&self, owner_id: impl Into<String>) {
        self.apply(Event::SignedIn {
            owner_id: owner_id.into(),
        });
    }

    /// Drop the owner's session; answers still in flight are discarded
    pub fn logout(&self) {
        tracing::info!("Logged out");
        self.apply(Event::LoggedOut);
    }
}
