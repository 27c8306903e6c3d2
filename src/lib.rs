//! Kibitz: watches a chess board on screen and answers it.
//!
//! Frames of the board go to a vision worker that reports positions; an
//! evaluation engine proposes moves; the coordinator picks one, optionally
//! with deliberate imperfection, and a move worker plays it back with a
//! human-looking delay. Every decision is logged for later statistics.

pub mod board;
pub mod capture;
pub mod config;
pub mod decide;
pub mod execute;
pub mod locate;
pub mod protocol;
pub mod session;
pub mod telemetry;
pub mod worker;
