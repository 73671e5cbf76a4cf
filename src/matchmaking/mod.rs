//! Matchmaking - queues, ratings, and the pairing service

pub mod queue;
pub mod rating;
pub mod service;

pub use queue::{MatchQueues, PairingPolicy, QueueEntry, QueueStatus};
pub use rating::RatingTable;
pub use service::Matchmaker;
