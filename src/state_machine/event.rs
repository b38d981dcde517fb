//! Events that drive the session

use super::state::AskTicket;
use super::timeline::DisplayTurn;
use crate::db::{Conversation, Exchange};
use crate::remote::Answer;
use chrono::{DateTime, Utc};

/// Events that trigger state transitions.
///
/// Ids and timestamps are generated by the runtime and carried in, so the
/// transition function stays pure.
#[derive(Debug, Clone)]
pub enum Event {
    // Submission pipeline
    Submit {
        text: String,
        request_id: String,
        user_turn_id: String,
        assistant_turn_id: String,
        now: DateTime<Utc>,
    },
    AnswerReceived {
        ticket: AskTicket,
        result: Result<Answer, String>,
        now: DateTime<Utc>,
    },
    ExchangePersisted {
        ticket: AskTicket,
        exchange: Exchange,
    },
    ExchangePersistFailed {
        ticket: AskTicket,
    },

    // Timeline
    TimelineLoaded {
        conversation_id: String,
        epoch: u64,
        turns: Vec<DisplayTurn>,
    },

    // Directory
    ConversationsListed {
        conversations: Vec<Conversation>,
    },
    ConversationCreated {
        conversation: Conversation,
    },
    ConversationSelected {
        conversation: Conversation,
    },
    ConversationDeleted {
        conversation_id: String,
    },
    ConversationRenamed {
        conversation: Conversation,
    },
    SelectionCleared,

    // Identity
    SignedIn {
        owner_id: String,
    },
    LoggedOut,
}
