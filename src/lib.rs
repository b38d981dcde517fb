//! QueryMind chat client
//!
//! Keeps one user's conversations, the visible timeline of the open
//! conversation, and the question/answer sync with the QueryMind service.

pub mod config;
pub mod db;
pub mod remote;
pub mod runtime;
pub mod state_machine;
pub mod title;
