//! Types for representing analysis results and engine health

use std::fmt;

use serde::Serialize;

/// Outcome of analysing one position
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisResult {
    /// Centipawn-like score from the side to move's point of view.
    /// 0 when the engine never printed `score cp`.
    pub score: i32,
    /// Best move in USI notation (e.g. "7g7f"), or "resign"/"win"
    #[serde(rename = "bestmove")]
    pub best_move: String,
    /// Requested search depth
    pub depth: u32,
}

impl AnalysisResult {
    /// Returns a brief summary of the analysis
    pub fn summary(&self) -> String {
        format!(
            "Eval: {} | Best: {} | Depth: {}",
            Score(self.score),
            self.best_move,
            self.depth
        )
    }
}

/// Display helper: centipawns as signed pawn units
struct Score(i32);

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pawns = self.0 as f32 / 100.0;
        if pawns >= 0.0 {
            write!(f, "+{:.2}", pawns)
        } else {
            write!(f, "{:.2}", pawns)
        }
    }
}

/// One entry of a batch run; a failure here never aborts the batch
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEntry {
    /// 1-based position index within the batch
    pub move_num: usize,
    #[serde(flatten)]
    pub outcome: BatchOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BatchOutcome {
    Analyzed(AnalysisResult),
    Failed { error: String },
}

impl BatchEntry {
    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, BatchOutcome::Analyzed(_))
    }
}

/// Lifecycle of the engine subprocess
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    #[default]
    NotStarted,
    Handshaking,
    AwaitingReady,
    Ready,
    Degraded,
    Terminated,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::NotStarted => "notStarted",
            SessionState::Handshaking => "handshaking",
            SessionState::AwaitingReady => "awaitingReady",
            SessionState::Ready => "ready",
            SessionState::Degraded => "degraded",
            SessionState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot served to health checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineHealth {
    pub state: SessionState,
    pub has_evaluation_data: bool,
    pub queue_depth: usize,
}

impl Default for EngineHealth {
    fn default() -> Self {
        Self {
            state: SessionState::NotStarted,
            has_evaluation_data: true,
            queue_depth: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary() {
        let result = AnalysisResult {
            score: -35,
            best_move: "7g7f".into(),
            depth: 12,
        };
        assert_eq!(result.summary(), "Eval: -0.35 | Best: 7g7f | Depth: 12");
    }

    #[test]
    fn test_batch_entry_wire_shape() {
        let ok = BatchEntry {
            move_num: 1,
            outcome: BatchOutcome::Analyzed(AnalysisResult {
                score: 50,
                best_move: "2g2f".into(),
                depth: 12,
            }),
        };
        let failed = BatchEntry {
            move_num: 2,
            outcome: BatchOutcome::Failed {
                error: "Analysis timeout after 30s".into(),
            },
        };

        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            serde_json::json!({"moveNum": 1, "score": 50, "bestmove": "2g2f", "depth": 12})
        );
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            serde_json::json!({"moveNum": 2, "error": "Analysis timeout after 30s"})
        );
    }

    #[test]
    fn test_health_wire_shape() {
        let health = EngineHealth {
            state: SessionState::AwaitingReady,
            has_evaluation_data: false,
            queue_depth: 3,
        };
        assert_eq!(
            serde_json::to_value(health).unwrap(),
            serde_json::json!({"state": "awaitingReady", "hasEvaluationData": false, "queueDepth": 3})
        );
    }
}
