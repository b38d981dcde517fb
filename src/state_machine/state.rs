//! Session state types

use super::timeline::Timeline;
use crate::db::Conversation;
use std::collections::HashSet;

/// Live view state of one open UI instance.
///
/// Changed only through [`super::transition`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    /// Signed-in user; None after logout
    pub owner_id: Option<String>,
    /// Owner's conversations, newest first
    pub conversations: Vec<Conversation>,
    pub current: Option<Conversation>,
    pub timeline: Timeline,
    /// The single question in flight, if any
    pub in_flight: Option<AskTicket>,
    /// Bumped on every conversation switch and logout
    pub epoch: u64,
    /// Conversations whose title derivation already fired in this session
    pub titled: HashSet<String>,
    /// Conversations deleted in this session; late answers for them are dropped
    pub deleted: HashSet<String>,
}

impl SessionState {
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            ..Self::default()
        }
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current.as_ref().map(|c| c.id.as_str())
    }

    pub fn is_pending(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Whether results for `ticket` still belong on the visible timeline
    pub fn is_attached(&self, ticket: &AskTicket) -> bool {
        ticket.epoch == self.epoch
            && ticket.conversation_id.as_deref() == self.current_id()
            && self.owner_id.as_deref() == Some(ticket.owner_id.as_str())
    }

    /// Whether the conversation `ticket` was asked in can still take its exchange
    pub fn accepts_exchange(&self, ticket: &AskTicket) -> bool {
        ticket
            .conversation_id
            .as_ref()
            .is_some_and(|id| !self.deleted.contains(id))
            && self.owner_id.as_deref() == Some(ticket.owner_id.as_str())
    }

    /// Whether `ticket` is the question currently awaited
    pub fn is_in_flight(&self, ticket: &AskTicket) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|f| f.request_id == ticket.request_id)
    }

    /// Leave the current view: drop the timeline and detach in-flight work
    pub(crate) fn reset_view(&mut self) {
        self.timeline.clear();
        self.in_flight = None;
        self.epoch += 1;
    }
}

/// Everything captured about a question at submission time.
///
/// Results are matched against the session through this, never through
/// whatever conversation happens to be current when they arrive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AskTicket {
    pub request_id: String,
    pub owner_id: String,
    pub conversation_id: Option<String>,
    pub epoch: u64,
    pub question: String,
    pub user_turn_id: String,
    pub assistant_turn_id: String,
    /// Timeline was empty before this submission
    pub first_exchange: bool,
}
