//! Core primitives.
//!
//! Identifiers and the rating formula. No I/O, no async.

pub mod ids;
pub mod rating;

// Re-export core types
pub use ids::{AccountId, MatchId, RecordId, SessionToken};
pub use rating::{Rating, Outcome, DEFAULT_RATING};
