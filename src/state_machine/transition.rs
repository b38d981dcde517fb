//! Pure state transition function
//!
//! Every session change goes through here. No I/O: the runtime performs the
//! returned effects and feeds their results back in as events.

use super::state::AskTicket;
use super::timeline::DisplayTurn;
use super::{Effect, Event, SessionState};
use crate::db::Conversation;
use crate::remote::Answer;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: SessionState,
    pub effects: Vec<Effect>,
    /// Turns this transition appended to the visible timeline
    pub appended: Vec<DisplayTurn>,
}

impl TransitionResult {
    pub fn new(state: SessionState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
            appended: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }

    pub fn with_appended(mut self, turn: DisplayTurn) -> Self {
        self.appended.push(turn);
        self
    }
}

/// Reasons a submission is refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Question is empty")]
    EmptyQuestion,
    #[error("No user is signed in")]
    SignedOut,
    #[error("A question is already being answered")]
    RequestPending,
}

/// Pure transition function
pub fn transition(state: &SessionState, event: Event) -> Result<TransitionResult, TransitionError> {
    match event {
        Event::Submit {
            text,
            request_id,
            user_turn_id,
            assistant_turn_id,
            now,
        } => submit(
            state,
            &text,
            AskIds {
                request_id,
                user_turn_id,
                assistant_turn_id,
            },
            now,
        ),

        Event::AnswerReceived { ticket, result, now } => {
            Ok(answer_received(state, ticket, result, now))
        }

        Event::ExchangePersisted { ticket, exchange } => {
            let mut next = state.clone();
            if next.is_attached(&ticket) {
                next.timeline.confirm(
                    [ticket.user_turn_id.as_str(), ticket.assistant_turn_id.as_str()],
                    &exchange.id,
                );
            }
            let title = title_effect(&mut next, &ticket);
            Ok(TransitionResult::new(next).with_effects(title))
        }

        // Title still follows the first exchange; only the save was lost
        Event::ExchangePersistFailed { ticket } => {
            let mut next = state.clone();
            let title = title_effect(&mut next, &ticket);
            Ok(TransitionResult::new(next).with_effects(title))
        }

        Event::TimelineLoaded {
            conversation_id,
            epoch,
            turns,
        } => {
            let mut next = state.clone();
            if next.current_id() == Some(conversation_id.as_str()) && epoch == next.epoch {
                next.timeline.reconcile(turns);
            }
            Ok(TransitionResult::new(next))
        }

        Event::ConversationsListed { mut conversations } => {
            let mut next = state.clone();
            conversations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            if let Some(current) = next.current.as_mut() {
                if let Some(fresh) = conversations.iter().find(|c| c.id == current.id) {
                    current.clone_from(fresh);
                }
            }
            next.conversations = conversations;
            Ok(TransitionResult::new(next))
        }

        Event::ConversationCreated { conversation } => {
            let mut next = state.clone();
            next.conversations.retain(|c| c.id != conversation.id);
            next.conversations.insert(0, conversation.clone());
            next.current = Some(conversation);
            next.reset_view();
            Ok(TransitionResult::new(next))
        }

        Event::ConversationSelected { conversation } => {
            let mut next = state.clone();
            let switching = next.current_id() != Some(conversation.id.as_str());
            next.current = Some(conversation);
            if switching {
                next.reset_view();
            }
            Ok(TransitionResult::new(next))
        }

        Event::ConversationDeleted { conversation_id } => {
            let mut next = state.clone();
            next.conversations.retain(|c| c.id != conversation_id);
            next.titled.remove(&conversation_id);
            next.deleted.insert(conversation_id.clone());
            if next.current_id() == Some(conversation_id.as_str()) {
                next.current = None;
                next.reset_view();
            }
            Ok(TransitionResult::new(next))
        }

        Event::ConversationRenamed { conversation } => {
            let mut next = state.clone();
            for existing in next
                .conversations
                .iter_mut()
                .chain(next.current.as_mut())
                .filter(|c| c.id == conversation.id)
            {
                mirror_title(existing, &conversation);
            }
            Ok(TransitionResult::new(next))
        }

        Event::SelectionCleared => {
            let mut next = state.clone();
            next.current = None;
            next.reset_view();
            Ok(TransitionResult::new(next))
        }

        Event::SignedIn { owner_id } => {
            if state.owner_id.as_deref() == Some(owner_id.as_str()) {
                return Ok(TransitionResult::new(state.clone()));
            }
            Ok(TransitionResult::new(SessionState {
                epoch: state.epoch + 1,
                ..SessionState::new(owner_id)
            }))
        }

        Event::LoggedOut => Ok(TransitionResult::new(SessionState {
            epoch: state.epoch + 1,
            ..SessionState::default()
        })),
    }
}

/// Locally generated identifiers for one submission
struct AskIds {
    request_id: String,
    user_turn_id: String,
    assistant_turn_id: String,
}

fn submit(
    state: &SessionState,
    text: &str,
    ids: AskIds,
    now: DateTime<Utc>,
) -> Result<TransitionResult, TransitionError> {
    let question = text.trim();
    if question.is_empty() {
        return Err(TransitionError::EmptyQuestion);
    }
    let owner_id = state.owner_id.clone().ok_or(TransitionError::SignedOut)?;
    if state.is_pending() {
        return Err(TransitionError::RequestPending);
    }

    let ticket = AskTicket {
        request_id: ids.request_id,
        owner_id,
        conversation_id: state.current_id().map(String::from),
        epoch: state.epoch,
        question: question.to_string(),
        user_turn_id: ids.user_turn_id,
        assistant_turn_id: ids.assistant_turn_id,
        first_exchange: state.timeline.is_empty(),
    };

    let turn = DisplayTurn::provisional_user(ticket.user_turn_id.clone(), question, now);
    let mut next = state.clone();
    next.timeline.push(turn.clone());
    next.in_flight = Some(ticket.clone());

    Ok(TransitionResult::new(next)
        .with_appended(turn)
        .with_effect(Effect::request_answer(ticket)))
}

fn answer_received(
    state: &SessionState,
    ticket: AskTicket,
    result: Result<Answer, String>,
    now: DateTime<Utc>,
) -> TransitionResult {
    let mut next = state.clone();

    if next.is_in_flight(&ticket) && next.is_attached(&ticket) {
        next.in_flight = None;
        return match result {
            Ok(answer) => {
                let turn = DisplayTurn::provisional_assistant(
                    ticket.assistant_turn_id.clone(),
                    answer.display_text(),
                    now,
                );
                next.timeline.push(turn.clone());
                let persist = ticket
                    .conversation_id
                    .is_some()
                    .then(|| Effect::persist_exchange(ticket, answer));
                TransitionResult::new(next)
                    .with_appended(turn)
                    .with_effects(persist)
            }
            Err(_) => {
                let turn = DisplayTurn::error(ticket.assistant_turn_id, now);
                next.timeline.push(turn.clone());
                TransitionResult::new(next).with_appended(turn)
            }
        };
    }

    // Detached: the user moved on. Keep the answer out of the visible
    // timeline but still file it under the conversation it was asked in,
    // unless the asker signed out or that conversation was deleted.
    let rerouted = match result {
        Ok(answer) if next.accepts_exchange(&ticket) => {
            Some(Effect::persist_exchange(ticket, answer))
        }
        _ => None,
    };
    TransitionResult::new(next).with_effects(rerouted)
}

/// Title derivation for a finished first exchange, at most once per
/// conversation per session.
fn title_effect(state: &mut SessionState, ticket: &AskTicket) -> Option<Effect> {
    let conversation_id = ticket.conversation_id.as_ref()?;
    if !ticket.first_exchange || !state.accepts_exchange(ticket) {
        return None;
    }
    if !state.titled.insert(conversation_id.clone()) {
        return None;
    }
    Some(Effect::DeriveTitle {
        conversation_id: conversation_id.clone(),
        question: ticket.question.clone(),
    })
}

fn mirror_title(target: &mut Conversation, stored: &Conversation) {
    target.title.clone_from(&stored.title);
    target.updated_at = stored.updated_at;
}
