//! Mock implementations for testing
//!
//! These mocks enable session tests without real I/O.

use super::executor::SessionRuntime;
use super::traits::*;
use crate::db::{Conversation, Exchange, NewExchange};
use crate::remote::{Answer, AskRequest, RemoteError};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

// ============================================================================
// Mock Answer Service
// ============================================================================

/// Answer service that returns queued responses
pub struct MockAnswerService {
    responses: Mutex<VecDeque<Result<Answer, RemoteError>>>,
    /// Record of all requests made
    pub requests: Mutex<Vec<AskRequest>>,
}

impl MockAnswerService {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful answer
    pub fn queue_answer(&self, answer: impl Into<String>) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(Answer::new(answer, Some(4.2))));
    }

    /// Queue an error response
    pub fn queue_error(&self, error: RemoteError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<AskRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_response(&self, request: &AskRequest) -> Result<Answer, RemoteError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(RemoteError::network("No mock response queued")))
    }
}

impl Default for MockAnswerService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnswerService for MockAnswerService {
    async fn ask(&self, request: &AskRequest) -> Result<Answer, RemoteError> {
        self.next_response(request)
    }
}

// ============================================================================
// Gated Answer Service (for switch race testing)
// ============================================================================

/// Answer service that holds every call until the test releases it
pub struct GatedAnswerService {
    inner: MockAnswerService,
    /// Notified when a request starts (for test synchronization)
    pub request_started: Arc<Notify>,
    gate: Arc<Notify>,
}

impl GatedAnswerService {
    pub fn new() -> Self {
        Self {
            inner: MockAnswerService::new(),
            request_started: Arc::new(Notify::new()),
            gate: Arc::new(Notify::new()),
        }
    }

    pub fn queue_answer(&self, answer: impl Into<String>) {
        self.inner.queue_answer(answer);
    }

    /// Let the waiting request complete
    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub fn recorded_requests(&self) -> Vec<AskRequest> {
        self.inner.recorded_requests()
    }
}

impl Default for GatedAnswerService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnswerService for GatedAnswerService {
    async fn ask(&self, request: &AskRequest) -> Result<Answer, RemoteError> {
        self.inner.requests.lock().unwrap().push(request.clone());
        self.request_started.notify_one();
        self.gate.notified().await;
        self.inner
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(RemoteError::network("No mock response queued")))
    }
}

// ============================================================================
// In-Memory Storage
// ============================================================================

/// In-memory conversation and exchange store with failure injection
#[derive(Default)]
pub struct InMemoryStorage {
    conversations: Mutex<Vec<Conversation>>,
    exchanges: Mutex<HashMap<String, Vec<Exchange>>>,
    next_id: AtomicUsize,
    pub fail_appends: AtomicBool,
    pub fail_renames: AtomicBool,
    pub fail_fetches: AtomicBool,
    pub fail_directory: AtomicBool,
    pub append_calls: AtomicUsize,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Monotonic clock so ordering never depends on wall-clock resolution
    fn tick(&self) -> (usize, DateTime<Utc>) {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        #[allow(clippy::cast_possible_wrap)]
        let at = DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(1_700_000_000 + n as i64);
        (n, at)
    }

    /// All exchanges stored for a conversation
    pub fn stored_exchanges(&self, conversation_id: &str) -> Vec<Exchange> {
        self.exchanges
            .lock()
            .unwrap()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn stored_conversation(&self, conversation_id: &str) -> Option<Conversation> {
        self.conversations
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == conversation_id)
            .cloned()
    }

    fn check(flag: &AtomicBool, what: &str) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            Err(RemoteError::server(format!("HTTP 500: {what} unavailable")).into())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ExchangeStore for InMemoryStorage {
    async fn fetch_exchanges(&self, conversation_id: &str) -> Result<Vec<Exchange>, StoreError> {
        Self::check(&self.fail_fetches, "messages")?;
        Ok(self.stored_exchanges(conversation_id))
    }

    async fn append_exchange(&self, exchange: &NewExchange) -> Result<Exchange, StoreError> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        Self::check(&self.fail_appends, "messages")?;
        if self.stored_conversation(&exchange.conversation_id).is_none() {
            return Err(RemoteError::not_found(format!(
                "HTTP 404: Conversation {} not found",
                exchange.conversation_id
            ))
            .into());
        }

        let (n, now) = self.tick();
        let stored = Exchange {
            id: format!("ex-{n}"),
            conversation_id: exchange.conversation_id.clone(),
            owner_id: exchange.owner_id.clone(),
            question: exchange.question.clone(),
            answer: exchange.answer.clone(),
            confidence: exchange.confidence,
            created_at: now,
        };
        self.exchanges
            .lock()
            .unwrap()
            .entry(exchange.conversation_id.clone())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl ConversationStore for InMemoryStorage {
    async fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>, StoreError> {
        Self::check(&self.fail_directory, "conversations")?;
        let mut listed: Vec<Conversation> = self
            .conversations
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.owner_id == owner_id)
            .cloned()
            .collect();
        listed.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(listed)
    }

    async fn create_conversation(
        &self,
        owner_id: &str,
        title: &str,
    ) -> Result<Conversation, StoreError> {
        Self::check(&self.fail_directory, "conversations")?;
        let (n, now) = self.tick();
        let conversation = Conversation {
            id: format!("conv-{n}"),
            owner_id: owner_id.to_string(),
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.conversations.lock().unwrap().push(conversation.clone());
        Ok(conversation)
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<(), StoreError> {
        Self::check(&self.fail_directory, "conversations")?;
        let mut conversations = self.conversations.lock().unwrap();
        let before = conversations.len();
        conversations.retain(|c| c.id != conversation_id);
        if conversations.len() == before {
            return Err(RemoteError::not_found("HTTP 404: Conversation not found").into());
        }
        self.exchanges.lock().unwrap().remove(conversation_id);
        Ok(())
    }

    async fn rename_conversation(
        &self,
        conversation_id: &str,
        title: &str,
    ) -> Result<Conversation, StoreError> {
        Self::check(&self.fail_renames, "conversations")?;
        let (_, now) = self.tick();
        let mut conversations = self.conversations.lock().unwrap();
        let conversation = conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
            .ok_or_else(|| RemoteError::not_found("HTTP 404: Conversation not found"))?;
        conversation.title = title.to_string();
        conversation.updated_at = now;
        Ok(conversation.clone())
    }
}

// ============================================================================
// Test Session Helper
// ============================================================================

/// A session wired to in-memory mocks, with handles kept for assertions
pub struct TestSession<A: AnswerService + 'static> {
    pub runtime: SessionRuntime<Arc<InMemoryStorage>, Arc<A>>,
    pub storage: Arc<InMemoryStorage>,
    pub answers: Arc<A>,
}

impl<A: AnswerService + 'static> TestSession<A> {
    pub fn new(answers: A) -> Self {
        let storage = Arc::new(InMemoryStorage::new());
        let answers = Arc::new(answers);
        let runtime = SessionRuntime::new("user-1", storage.clone(), answers.clone());
        Self {
            runtime,
            storage,
            answers,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{PersistenceOutcome, SessionError, SubmissionStatus, TitleOutcome};
    use crate::state_machine::{Role, TransitionError, TurnOrigin, ERROR_SENTINEL};
    use crate::remote::EMPTY_ANSWER_FALLBACK;
    use std::time::Duration;

    fn new_exchange(conversation_id: &str, n: usize) -> NewExchange {
        NewExchange {
            conversation_id: conversation_id.to_string(),
            owner_id: "user-1".to_string(),
            question: format!("question {n}"),
            answer: format!("answer {n}"),
            confidence: None,
        }
    }

    #[tokio::test]
    async fn test_mock_answer_service() {
        let mock = MockAnswerService::new();
        mock.queue_answer("Paris");

        let request = AskRequest {
            question: "Capital of France?".to_string(),
            conversation_id: None,
            owner_id: "user-1".to_string(),
        };
        let answer = mock.ask(&request).await.unwrap();
        assert_eq!(answer.answer, "Paris");
        assert!(mock.ask(&request).await.is_err());
        assert_eq!(mock.recorded_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_in_memory_storage() {
        let storage = InMemoryStorage::new();
        let first = storage.create_conversation("user-1", "one").await.unwrap();
        let second = storage.create_conversation("user-1", "two").await.unwrap();
        storage.create_conversation("user-2", "other").await.unwrap();

        let listed = storage.list_conversations("user-1").await.unwrap();
        assert_eq!(listed, vec![second, first.clone()]);

        storage.append_exchange(&new_exchange(&first.id, 1)).await.unwrap();
        assert_eq!(storage.fetch_exchanges(&first.id).await.unwrap().len(), 1);

        storage.delete_conversation(&first.id).await.unwrap();
        assert!(storage.fetch_exchanges(&first.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_first_question_is_answered_saved_and_titles_conversation() {
        let session = TestSession::new(MockAnswerService::new());
        session.answers.queue_answer("Paris");
        let conv = session.runtime.create_conversation(None).await.unwrap();
        assert_eq!(conv.title, "New conversation");

        let report = session
            .runtime
            .submit_question("  What is the capital of France?  ")
            .await;

        assert_eq!(report.status, SubmissionStatus::Answered);
        assert_eq!(report.persistence, PersistenceOutcome::Saved);
        assert_eq!(
            report.title,
            TitleOutcome::Renamed("What is the capital of France?".to_string())
        );
        assert!(report.warnings().is_empty());

        let roles: Vec<_> = report.timeline_delta.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
        assert_eq!(report.timeline_delta[0].content, "What is the capital of France?");
        assert_eq!(report.timeline_delta[1].content, "Paris");

        let requests = session.answers.recorded_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].conversation_id.as_deref(), Some(conv.id.as_str()));

        let stored = session.storage.stored_exchanges(&conv.id);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].confidence, Some(4.2));

        let timeline = session.runtime.timeline();
        assert!(timeline
            .iter()
            .all(|t| t.origin == TurnOrigin::Confirmed { exchange_id: stored[0].id.clone() }));
        assert_eq!(
            session.runtime.current_conversation().map(|c| c.title),
            Some("What is the capital of France?".to_string())
        );
        assert_eq!(
            session.runtime.conversations()[0].title,
            "What is the capital of France?"
        );
        assert!(!session.runtime.is_pending());
    }

    #[tokio::test]
    async fn test_second_question_keeps_title() {
        let session = TestSession::new(MockAnswerService::new());
        session.answers.queue_answer("one");
        session.answers.queue_answer("two");
        let conv = session.runtime.create_conversation(None).await.unwrap();

        session.runtime.submit_question("first").await;
        let report = session.runtime.submit_question("second").await;

        assert_eq!(report.title, TitleOutcome::NotRequired);
        assert_eq!(
            session.storage.stored_conversation(&conv.id).map(|c| c.title),
            Some("first".to_string())
        );
        assert_eq!(session.runtime.timeline().len(), 4);
    }

    #[tokio::test]
    async fn test_reopened_conversation_is_not_retitled() {
        let session = TestSession::new(MockAnswerService::new());
        session.answers.queue_answer("a");
        let conv = session.runtime.create_conversation(Some("Kept")).await.unwrap();
        session
            .storage
            .append_exchange(&new_exchange(&conv.id, 1))
            .await
            .unwrap();

        let turns = session.runtime.open(conv.clone()).await;
        assert_eq!(turns.len(), 2);

        let report = session.runtime.submit_question("follow up").await;
        assert_eq!(report.title, TitleOutcome::NotRequired);
        assert_eq!(
            session.storage.stored_conversation(&conv.id).map(|c| c.title),
            Some("Kept".to_string())
        );
    }

    #[tokio::test]
    async fn test_long_question_title_is_truncated() {
        let session = TestSession::new(MockAnswerService::new());
        session.answers.queue_answer("answer");
        let conv = session.runtime.create_conversation(None).await.unwrap();

        let question = "q".repeat(65);
        let report = session.runtime.submit_question(&question).await;

        let expected = format!("{}...", "q".repeat(57));
        assert_eq!(report.title, TitleOutcome::Renamed(expected.clone()));
        assert_eq!(expected.chars().count(), 60);
        assert_eq!(
            session.storage.stored_conversation(&conv.id).map(|c| c.title),
            Some(expected)
        );
    }

    #[tokio::test]
    async fn test_forty_character_question_is_title_unchanged() {
        let session = TestSession::new(MockAnswerService::new());
        session.answers.queue_answer("answer");
        session.runtime.create_conversation(None).await.unwrap();

        let question = "x".repeat(40);
        let report = session.runtime.submit_question(&question).await;
        assert_eq!(report.title, TitleOutcome::Renamed(question));
    }

    #[tokio::test]
    async fn test_blank_question_is_ignored() {
        let session = TestSession::new(MockAnswerService::new());
        session.runtime.create_conversation(None).await.unwrap();

        let report = session.runtime.submit_question("   \n").await;

        assert_eq!(
            report.status,
            SubmissionStatus::Rejected(TransitionError::EmptyQuestion)
        );
        assert!(session.runtime.timeline().is_empty());
        assert!(session.answers.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn test_submit_while_pending_is_a_no_op() {
        let session = TestSession::new(GatedAnswerService::new());
        session.answers.queue_answer("first answer");
        session.runtime.create_conversation(None).await.unwrap();

        let (first, second) = tokio::join!(session.runtime.submit_question("first"), async {
            session.answers.request_started.notified().await;
            let before = session.runtime.timeline();
            let report = session.runtime.submit_question("second").await;
            assert_eq!(session.runtime.timeline(), before);
            session.answers.release();
            report
        });

        assert_eq!(
            second.status,
            SubmissionStatus::Rejected(TransitionError::RequestPending)
        );
        assert!(second.timeline_delta.is_empty());
        assert_eq!(first.status, SubmissionStatus::Answered);
        assert_eq!(session.answers.recorded_requests().len(), 1);
        assert_eq!(session.runtime.timeline().len(), 2);
    }

    #[tokio::test]
    async fn test_ask_failure_adds_one_sentinel_and_saves_nothing() {
        let session = TestSession::new(MockAnswerService::new());
        session
            .answers
            .queue_error(RemoteError::server("HTTP 500: model crashed"));
        let conv = session.runtime.create_conversation(None).await.unwrap();

        let report = session.runtime.submit_question("hello?").await;

        assert!(matches!(report.status, SubmissionStatus::AskFailed(_)));
        assert_eq!(report.persistence, PersistenceOutcome::NotAttempted);
        assert_eq!(report.title, TitleOutcome::NotRequired);
        assert!(matches!(
            report.warnings().as_slice(),
            [SessionError::AskFailed(_)]
        ));

        let timeline = session.runtime.timeline();
        assert_eq!(timeline.len(), 2);
        assert!(timeline[1].is_error());
        assert_eq!(timeline[1].content, ERROR_SENTINEL);
        assert_eq!(session.storage.append_calls.load(Ordering::SeqCst), 0);
        assert!(session.storage.stored_exchanges(&conv.id).is_empty());
        assert!(!session.runtime.is_pending());
    }

    #[tokio::test]
    async fn test_ask_timeout_takes_failure_path() {
        let storage = Arc::new(InMemoryStorage::new());
        let answers = Arc::new(GatedAnswerService::new());
        let runtime = SessionRuntime::new("user-1", storage.clone(), answers.clone())
            .with_ask_timeout(Duration::from_millis(20));
        runtime.create_conversation(None).await.unwrap();

        let report = runtime.submit_question("anyone there?").await;

        assert!(matches!(report.status, SubmissionStatus::AskFailed(_)));
        assert!(runtime.timeline()[1].is_error());
        assert!(!runtime.is_pending());
    }

    #[tokio::test]
    async fn test_blank_answer_is_replaced() {
        let session = TestSession::new(MockAnswerService::new());
        session.answers.queue_answer("   ");
        let conv = session.runtime.create_conversation(None).await.unwrap();

        let report = session.runtime.submit_question("q").await;

        assert_eq!(report.timeline_delta[1].content, EMPTY_ANSWER_FALLBACK);
        assert_eq!(
            session.storage.stored_exchanges(&conv.id)[0].answer,
            EMPTY_ANSWER_FALLBACK
        );
    }

    #[tokio::test]
    async fn test_question_outside_conversation_is_not_saved() {
        let session = TestSession::new(MockAnswerService::new());
        session.answers.queue_answer("a");

        let report = session.runtime.submit_question("q").await;

        assert_eq!(report.status, SubmissionStatus::Answered);
        assert_eq!(report.persistence, PersistenceOutcome::Skipped);
        assert_eq!(report.title, TitleOutcome::NotRequired);
        assert_eq!(session.storage.append_calls.load(Ordering::SeqCst), 0);
        assert_eq!(session.answers.recorded_requests()[0].conversation_id, None);
    }

    #[tokio::test]
    async fn test_save_failure_keeps_answer_visible() {
        let session = TestSession::new(MockAnswerService::new());
        session.answers.queue_answer("kept");
        session.runtime.create_conversation(None).await.unwrap();
        session.storage.fail_appends.store(true, Ordering::SeqCst);

        let report = session.runtime.submit_question("q").await;

        assert_eq!(report.status, SubmissionStatus::Answered);
        assert!(matches!(report.persistence, PersistenceOutcome::Failed(_)));
        assert!(matches!(
            report.warnings().as_slice(),
            [SessionError::PersistenceFailed(_)]
        ));
        // Title still follows the first question
        assert_eq!(report.title, TitleOutcome::Renamed("q".to_string()));

        let timeline = session.runtime.timeline();
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[1].content, "kept");
        assert!(timeline.iter().all(|t| t.is_provisional()));
    }

    #[tokio::test]
    async fn test_title_failure_is_reported_not_raised() {
        let session = TestSession::new(MockAnswerService::new());
        session.answers.queue_answer("a");
        let conv = session.runtime.create_conversation(None).await.unwrap();
        session.storage.fail_renames.store(true, Ordering::SeqCst);

        let report = session.runtime.submit_question("q").await;

        assert_eq!(report.persistence, PersistenceOutcome::Saved);
        assert!(matches!(report.title, TitleOutcome::Failed(_)));
        assert_eq!(
            session.runtime.current_conversation().map(|c| c.title),
            Some(conv.title)
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_switch_during_ask_reroutes_answer() {
        let session = TestSession::new(GatedAnswerService::new());
        session.answers.queue_answer("answer for A");
        let conv_b = session.runtime.create_conversation(Some("B")).await.unwrap();
        let conv_a = session.runtime.create_conversation(None).await.unwrap();

        let (report, ()) = tokio::join!(session.runtime.submit_question("asked in A"), async {
            session.answers.request_started.notified().await;
            let turns = session.runtime.open(conv_b.clone()).await;
            assert!(turns.is_empty());
            // B is free to take a question right away
            assert!(!session.runtime.is_pending());
            session.answers.release();
        });

        assert_eq!(report.status, SubmissionStatus::Detached);
        assert_eq!(report.timeline_delta.len(), 1);
        assert_eq!(report.persistence, PersistenceOutcome::Saved);
        assert_eq!(report.title, TitleOutcome::Renamed("asked in A".to_string()));

        // Nothing from A leaked into B
        assert_eq!(
            session.runtime.current_conversation().map(|c| c.id),
            Some(conv_b.id.clone())
        );
        assert!(session.runtime.timeline().is_empty());
        assert!(session.storage.stored_exchanges(&conv_b.id).is_empty());

        // The answer was filed under A and titled it
        let stored = session.storage.stored_exchanges(&conv_a.id);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].answer, "answer for A");
        let titles: Vec<_> = session
            .runtime
            .conversations()
            .into_iter()
            .map(|c| c.title)
            .collect();
        assert_eq!(titles, vec!["asked in A".to_string(), "B".to_string()]);

        let reopened = session.runtime.open(conv_a).await;
        assert_eq!(reopened.len(), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_logout_discards_in_flight_answer() {
        let session = TestSession::new(GatedAnswerService::new());
        session.answers.queue_answer("too late");
        let conv = session.runtime.create_conversation(None).await.unwrap();

        let (report, ()) = tokio::join!(session.runtime.submit_question("q"), async {
            session.answers.request_started.notified().await;
            session.runtime.logout();
            session.answers.release();
        });

        assert_eq!(report.status, SubmissionStatus::Detached);
        assert_eq!(report.persistence, PersistenceOutcome::NotAttempted);
        assert_eq!(report.title, TitleOutcome::NotRequired);
        assert!(session.storage.stored_exchanges(&conv.id).is_empty());
        assert_eq!(
            session.storage.stored_conversation(&conv.id).map(|c| c.title),
            Some("New conversation".to_string())
        );

        let state = session.runtime.snapshot();
        assert_eq!(state.owner_id, None);
        assert!(state.conversations.is_empty());
        assert!(state.timeline.is_empty());
        assert!(!state.is_pending());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_delete_during_ask_discards_answer() {
        let session = TestSession::new(GatedAnswerService::new());
        session.answers.queue_answer("orphan");
        let conv = session.runtime.create_conversation(None).await.unwrap();

        let (report, ()) = tokio::join!(session.runtime.submit_question("q"), async {
            session.answers.request_started.notified().await;
            session.runtime.delete_conversation(&conv.id).await.unwrap();
            session.answers.release();
        });

        assert_eq!(report.status, SubmissionStatus::Detached);
        assert_eq!(report.persistence, PersistenceOutcome::NotAttempted);
        assert_eq!(report.title, TitleOutcome::NotRequired);
        assert!(report.warnings().is_empty());
        assert_eq!(session.storage.append_calls.load(Ordering::SeqCst), 0);
        assert!(session.storage.stored_exchanges(&conv.id).is_empty());
        assert!(session.storage.stored_conversation(&conv.id).is_none());

        let state = session.runtime.snapshot();
        assert_eq!(state.current, None);
        assert!(state.conversations.is_empty());
        assert!(!state.is_pending());
    }

    #[tokio::test]
    async fn test_signed_out_session_refuses_work() {
        let session = TestSession::new(MockAnswerService::new());
        session.runtime.logout();

        let report = session.runtime.submit_question("hello").await;
        assert_eq!(
            report.status,
            SubmissionStatus::Rejected(TransitionError::SignedOut)
        );
        assert_eq!(
            session.runtime.refresh_conversations().await,
            Err(SessionError::SignedOut)
        );

        session.runtime.sign_in("user-2");
        assert_eq!(session.runtime.owner_id().as_deref(), Some("user-2"));
        assert!(session.runtime.refresh_conversations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_current_clears_selection_and_timeline() {
        let session = TestSession::new(MockAnswerService::new());
        session.answers.queue_answer("a");
        let other = session.runtime.create_conversation(Some("other")).await.unwrap();
        let conv = session.runtime.create_conversation(None).await.unwrap();
        session.runtime.submit_question("q").await;
        assert_eq!(session.runtime.timeline().len(), 2);

        session.runtime.delete_conversation(&conv.id).await.unwrap();

        let state = session.runtime.snapshot();
        assert_eq!(state.current, None);
        assert!(state.timeline.is_empty());
        assert_eq!(state.conversations, vec![other]);
        assert!(session.storage.stored_conversation(&conv.id).is_none());
    }

    #[tokio::test]
    async fn test_delete_other_keeps_current() {
        let session = TestSession::new(MockAnswerService::new());
        let other = session.runtime.create_conversation(Some("other")).await.unwrap();
        let conv = session.runtime.create_conversation(None).await.unwrap();

        session.runtime.delete_conversation(&other.id).await.unwrap();

        assert_eq!(session.runtime.current_conversation(), Some(conv.clone()));
        assert_eq!(session.runtime.conversations(), vec![conv]);
    }

    #[tokio::test]
    async fn test_load_timeline_expands_each_exchange() {
        let session = TestSession::new(MockAnswerService::new());
        let conv = session.runtime.create_conversation(None).await.unwrap();
        for n in 0..3 {
            session
                .storage
                .append_exchange(&new_exchange(&conv.id, n))
                .await
                .unwrap();
        }

        let turns = session.runtime.load_timeline(&conv.id).await;

        assert_eq!(turns.len(), 6);
        for (i, turn) in turns.iter().enumerate() {
            let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
            assert_eq!(turn.role, expected);
            assert!(!turn.is_provisional());
        }
        assert!(turns.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(turns[0].content, "question 0");
        assert_eq!(turns[5].content, "answer 2");
    }

    #[tokio::test]
    async fn test_load_failure_gives_empty_timeline() {
        let session = TestSession::new(MockAnswerService::new());
        let conv = session.runtime.create_conversation(None).await.unwrap();
        session
            .storage
            .append_exchange(&new_exchange(&conv.id, 1))
            .await
            .unwrap();
        session.storage.fail_fetches.store(true, Ordering::SeqCst);

        assert!(session.runtime.load_timeline(&conv.id).await.is_empty());
        assert!(session.runtime.open(conv).await.is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_reload_during_ask_keeps_unsaved_turn() {
        let session = TestSession::new(GatedAnswerService::new());
        session.answers.queue_answer("new answer");
        let conv = session.runtime.create_conversation(None).await.unwrap();
        session
            .storage
            .append_exchange(&new_exchange(&conv.id, 1))
            .await
            .unwrap();
        session.runtime.open(conv.clone()).await;

        let (report, ()) = tokio::join!(session.runtime.submit_question("another"), async {
            session.answers.request_started.notified().await;
            let turns = session.runtime.reload().await;
            assert_eq!(turns.len(), 3);
            assert!(turns[2].is_provisional());
            assert_eq!(turns[2].content, "another");
            session.answers.release();
        });

        assert_eq!(report.status, SubmissionStatus::Answered);
        let turns = session.runtime.timeline();
        assert_eq!(turns.len(), 4);
        assert!(turns.iter().all(|t| !t.is_provisional()));
    }

    #[tokio::test]
    async fn test_rename_truncates_and_mirrors() {
        let session = TestSession::new(MockAnswerService::new());
        let conv = session.runtime.create_conversation(None).await.unwrap();

        let long = "r".repeat(80);
        let renamed = session
            .runtime
            .rename_conversation(&conv.id, &long)
            .await
            .unwrap();

        assert_eq!(renamed.title, format!("{}...", "r".repeat(57)));
        assert_eq!(session.runtime.conversations()[0].title, renamed.title);
        assert_eq!(
            session.runtime.current_conversation().map(|c| c.title),
            Some(renamed.title)
        );
        assert_eq!(
            session.runtime.rename_conversation(&conv.id, "  ").await,
            Err(SessionError::EmptyTitle)
        );
    }

    #[tokio::test]
    async fn test_directory_failure_leaves_session_untouched() {
        let session = TestSession::new(MockAnswerService::new());
        let conv = session.runtime.create_conversation(None).await.unwrap();
        session.storage.fail_directory.store(true, Ordering::SeqCst);
        let before = session.runtime.snapshot();

        assert!(matches!(
            session.runtime.create_conversation(None).await,
            Err(SessionError::PersistenceFailed(_))
        ));
        assert!(matches!(
            session.runtime.delete_conversation(&conv.id).await,
            Err(SessionError::PersistenceFailed(_))
        ));
        assert!(matches!(
            session.runtime.refresh_conversations().await,
            Err(SessionError::PersistenceFailed(_))
        ));
        assert_eq!(session.runtime.snapshot(), before);
    }

    #[tokio::test]
    async fn test_refresh_lists_newest_first() {
        let session = TestSession::new(MockAnswerService::new());
        let older = session.storage.create_conversation("user-1", "older").await.unwrap();
        let newer = session.storage.create_conversation("user-1", "newer").await.unwrap();
        session.storage.create_conversation("user-2", "foreign").await.unwrap();

        let listed = session.runtime.refresh_conversations().await.unwrap();
        assert_eq!(listed, vec![newer, older]);
    }
}
