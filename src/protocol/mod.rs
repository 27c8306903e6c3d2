//! Line protocols.
//!
//! Serialisation of the commands sent to the engine and vision workers,
//! classification of the lines they print back, and the operator commands
//! accepted by a running session.

pub mod classify;
pub mod control;
pub mod engine;
pub mod vision;

pub use classify::{classify_line, WorkerLine};
pub use control::{parse_control, Control};
pub use engine::{parse_engine_line, EngineCommand, EngineLine, GoParams, InfoLine, Score};
pub use vision::VisionRequest;
