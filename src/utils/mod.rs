//! Utility helpers
//!
//! Logging setup, timing and deterministic randomness.

pub mod logger;
pub mod random;
pub mod timer;

pub use logger::{init_logger, LogLevel};
pub use random::SeededRandom;
pub use timer::Timer;
