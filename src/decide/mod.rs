//! Move decisions.
//!
//! Candidate collection from engine output, repetition bookkeeping, the
//! human-like selector and the coordinator that ties them to the session.

pub mod candidate;
pub mod coordinator;
pub mod repetition;
pub mod stealth;

pub use candidate::{best_score, close_alternatives, CandidateSet, MoveCandidate};
pub use coordinator::{Coordinator, CoordinatorEvent, DecisionConfig, Directive, State};
pub use repetition::RepetitionTracker;
pub use stealth::{pick_move, StealthError, StealthParams};
