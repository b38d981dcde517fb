//! Session state machine
//!
//! Elm-style: `transition` is pure, the runtime executes the returned
//! effects and feeds their outcomes back as events.

mod effect;
pub mod event;
pub mod state;
pub mod timeline;
pub(crate) mod transition;


pub use effect::Effect;
pub use event::Event;
pub use state::{AskTicket, SessionState};
pub use timeline::{DisplayTurn, Role, Timeline, TurnOrigin, ERROR_SENTINEL};
pub use transition::{transition, TransitionError, TransitionResult};
