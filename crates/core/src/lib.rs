//! Shogi Analyzer Core Library
//!
//! Position analysis backed by an external USI engine process.

pub mod analyzer;
pub mod config;
pub mod engine;
pub mod error;

pub use analyzer::Analyzer;
pub use config::{AnalyzerConfig, EngineConfig, EngineOption};
pub use engine::{AnalysisResult, BatchEntry, BatchOutcome, EngineHealth, SessionState};
pub use error::{Error, Result};
