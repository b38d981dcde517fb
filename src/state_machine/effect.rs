//! Effects produced by state transitions

use super::state::AskTicket;
use crate::db::NewExchange;
use crate::remote::{Answer, AskRequest};

/// Effects to be executed after a state transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Call the answering service
    RequestAnswer { ticket: AskTicket },

    /// Store the question/answer pair as one exchange
    PersistExchange { ticket: AskTicket, answer: Answer },

    /// Title the conversation after its first question
    DeriveTitle {
        conversation_id: String,
        question: String,
    },
}

impl Effect {
    pub fn request_answer(ticket: AskTicket) -> Self {
        Effect::RequestAnswer { ticket }
    }

    pub fn persist_exchange(ticket: AskTicket, answer: Answer) -> Self {
        Effect::PersistExchange { ticket, answer }
    }

    /// Request body for a [`Effect::RequestAnswer`]
    pub fn ask_request(ticket: &AskTicket) -> AskRequest {
        AskRequest {
            question: ticket.question.clone(),
            conversation_id: ticket.conversation_id.clone(),
            owner_id: ticket.owner_id.clone(),
        }
    }

    /// Store record for a [`Effect::PersistExchange`]; None without a conversation
    pub fn new_exchange(ticket: &AskTicket, answer: &Answer) -> Option<NewExchange> {
        Some(NewExchange {
            conversation_id: ticket.conversation_id.clone()?,
            owner_id: ticket.owner_id.clone(),
            question: ticket.question.clone(),
            answer: answer.display_text().to_string(),
            confidence: answer.confidence,
        })
    }
}
