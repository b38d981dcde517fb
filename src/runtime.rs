//! Runtime for a chat session
//!
//! Executes the effects of the session state machine against a store and
//! an answer service.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::{
    PersistenceOutcome, SessionError, SessionRuntime, SubmissionReport, SubmissionStatus,
    TitleOutcome, DEFAULT_ASK_TIMEOUT,
};
pub use traits::*;
