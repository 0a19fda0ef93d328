//! USI engine integration
//!
//! Drives a USI-compatible engine (YaneuraOu and friends) as a subprocess.

pub mod analysis;
pub mod protocol;
pub mod queue;
pub mod session;

// Re-export main types for convenience
pub use analysis::{AnalysisResult, BatchEntry, BatchOutcome, EngineHealth, SessionState};
pub use protocol::{parse_line, Command, EngineEvent};
pub use queue::RequestId;
pub use session::{EngineSession, Submission};
