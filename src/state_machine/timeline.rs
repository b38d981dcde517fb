//! Display timeline for the open conversation

use crate::db::Exchange;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Assistant turn shown when the answering service could not be reached
pub const ERROR_SENTINEL: &str = "Sorry, an error occurred. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// Where a turn came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnOrigin {
    /// Shown before its exchange is stored
    Provisional,
    /// Backed by a stored exchange
    Confirmed { exchange_id: String },
    /// Error sentinel for a failed ask; never stored
    Failed,
}

/// One rendered timeline entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayTurn {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub origin: TurnOrigin,
}

impl DisplayTurn {
    pub fn provisional_user(
        id: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            role: Role::User,
            content: content.into(),
            timestamp,
            origin: TurnOrigin::Provisional,
        }
    }

    pub fn provisional_assistant(
        id: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            content: content.into(),
            timestamp,
            origin: TurnOrigin::Provisional,
        }
    }

    pub fn error(id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            content: ERROR_SENTINEL.to_string(),
            timestamp,
            origin: TurnOrigin::Failed,
        }
    }

    /// Expand a stored exchange into its question and answer turns
    pub fn from_exchange(exchange: &Exchange) -> [DisplayTurn; 2] {
        let origin = TurnOrigin::Confirmed {
            exchange_id: exchange.id.clone(),
        };
        [
            DisplayTurn {
                id: format!("{}_user", exchange.id),
                role: Role::User,
                content: exchange.question.clone(),
                timestamp: exchange.created_at,
                origin: origin.clone(),
            },
            DisplayTurn {
                id: format!("{}_assistant", exchange.id),
                role: Role::Assistant,
                content: exchange.answer.clone(),
                timestamp: exchange.created_at,
                origin,
            },
        ]
    }

    pub fn is_provisional(&self) -> bool {
        !matches!(self.origin, TurnOrigin::Confirmed { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self.origin, TurnOrigin::Failed)
    }

    pub fn exchange_id(&self) -> Option<&str> {
        match &self.origin {
            TurnOrigin::Confirmed { exchange_id } => Some(exchange_id),
            _ => None,
        }
    }
}

/// Ordered turns of the open conversation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    turns: Vec<DisplayTurn>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a confirmed timeline from stored exchanges.
    ///
    /// Exchanges are ordered by `created_at`; ties keep store order.
    pub fn from_exchanges(exchanges: &[Exchange]) -> Self {
        let mut ordered: Vec<&Exchange> = exchanges.iter().collect();
        ordered.sort_by_key(|e| e.created_at);
        Self {
            turns: ordered
                .into_iter()
                .flat_map(DisplayTurn::from_exchange)
                .collect(),
        }
    }

    pub fn turns(&self) -> &[DisplayTurn] {
        &self.turns
    }

    pub fn into_turns(self) -> Vec<DisplayTurn> {
        self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn push(&mut self, turn: DisplayTurn) {
        self.turns.push(turn);
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Mark the turns of a freshly stored exchange as confirmed.
    /// Local ids stay as they are. Returns how many turns were updated.
    pub fn confirm(&mut self, turn_ids: [&str; 2], exchange_id: &str) -> usize {
        let mut updated = 0;
        for turn in &mut self.turns {
            if turn_ids.contains(&turn.id.as_str()) && turn.is_provisional() && !turn.is_error() {
                turn.origin = TurnOrigin::Confirmed {
                    exchange_id: exchange_id.to_string(),
                };
                updated += 1;
            }
        }
        updated
    }

    /// Replace the timeline with a reload from the store.
    ///
    /// Confirmed turns are superseded by the reload. Exchanges the reload
    /// holds that this timeline has not confirmed yet take the place of the
    /// oldest answered provisional pairs. Error turns and unsaved turns stay
    /// where they were, and reloaded turns keep store order.
    pub fn reconcile(&mut self, confirmed: Vec<DisplayTurn>) {
        let known: HashSet<&str> = self
            .turns
            .iter()
            .filter_map(DisplayTurn::exchange_id)
            .collect();
        let mut fresh: Vec<&str> = Vec::new();
        for id in confirmed.iter().filter_map(DisplayTurn::exchange_id) {
            if !known.contains(id) && fresh.last() != Some(&id) {
                fresh.push(id);
            }
        }
        let reloaded: HashSet<&str> = confirmed
            .iter()
            .filter_map(DisplayTurn::exchange_id)
            .collect();

        // Index of the reload turn each old turn maps to, None to keep it
        let mut matched: Vec<Option<usize>> = Vec::with_capacity(self.turns.len());
        let mut fresh_iter = fresh.into_iter();
        let mut i = 0;
        while i < self.turns.len() {
            let turn = &self.turns[i];
            if let Some(id) = turn.exchange_id() {
                let at = if reloaded.contains(id) {
                    last_turn_of(&confirmed, id)
                } else {
                    None
                };
                matched.push(at);
                i += 1;
                continue;
            }
            let answered_pair = turn.role == Role::User
                && turn.origin == TurnOrigin::Provisional
                && self.turns.get(i + 1).is_some_and(|next| {
                    next.role == Role::Assistant && next.origin == TurnOrigin::Provisional
                });
            if answered_pair {
                if let Some(id) = fresh_iter.next() {
                    let at = last_turn_of(&confirmed, id);
                    matched.push(at);
                    matched.push(at);
                    i += 2;
                    continue;
                }
            }
            matched.push(None);
            i += 1;
        }

        let mut merged = Vec::with_capacity(confirmed.len() + self.turns.len());
        let mut emitted = 0;
        let mut insert_at = 0;
        for (turn, slot) in self.turns.drain(..).zip(matched) {
            match slot {
                Some(last) => {
                    if last >= emitted {
                        merged.extend_from_slice(&confirmed[emitted..=last]);
                        emitted = last + 1;
                    }
                    insert_at = merged.len();
                }
                None if turn.exchange_id().is_none() => merged.push(turn),
                // Confirmed here but gone from the store
                None => {}
            }
        }
        merged.splice(insert_at..insert_at, confirmed[emitted..].iter().cloned());
        self.turns = merged;
    }
}

/// Position of the last reload turn belonging to `exchange_id`
fn last_turn_of(turns: &[DisplayTurn], exchange_id: &str) -> Option<usize> {
    turns
        .iter()
        .rposition(|t| t.exchange_id() == Some(exchange_id))
}
