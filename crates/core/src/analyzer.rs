//! Analysis coordinator: the entry point used by the HTTP layer

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::AnalyzerConfig;
use crate::engine::{
    AnalysisResult, BatchEntry, BatchOutcome, EngineHealth, EngineSession, SessionState,
};
use crate::error::{Error, Result};

#[derive(Clone)]
enum Backend {
    Engine(EngineSession),
    /// Startup failed; kept so the service can still answer health checks
    Unavailable(Arc<str>),
}

/// Serializes analysis requests onto one engine session and enforces the
/// per-request deadline. Cheap to clone.
#[derive(Clone)]
pub struct Analyzer {
    backend: Backend,
    timeout: Duration,
    default_depth: u32,
    batch_depth: u32,
}

impl Analyzer {
    /// Launches the engine and waits for `readyok`.
    pub async fn start(config: &AnalyzerConfig) -> Result<Self> {
        let session = EngineSession::launch(&config.engine).await?;
        if let Err(e) = session.wait_ready(config.startup_timeout).await {
            error!("engine failed to become ready: {}", e);
            session.shutdown().await;
            return Err(e);
        }

        let health = session.health();
        info!(
            state = %health.state,
            has_evaluation_data = health.has_evaluation_data,
            "engine ready"
        );
        Ok(Self::with_session(session, config))
    }

    /// Wraps an already launched session.
    pub fn with_session(session: EngineSession, config: &AnalyzerConfig) -> Self {
        Self {
            backend: Backend::Engine(session),
            timeout: config.analysis_timeout,
            default_depth: config.default_depth,
            batch_depth: config.batch_depth,
        }
    }

    /// An analyzer with no engine behind it. Health reports `notStarted` and
    /// every analysis fails with `EngineDegraded`.
    pub fn unavailable(reason: impl Into<String>, config: &AnalyzerConfig) -> Self {
        let reason: String = reason.into();
        Self {
            backend: Backend::Unavailable(Arc::from(reason)),
            timeout: config.analysis_timeout,
            default_depth: config.default_depth,
            batch_depth: config.batch_depth,
        }
    }

    pub fn health(&self) -> EngineHealth {
        match &self.backend {
            Backend::Engine(session) => session.health(),
            Backend::Unavailable(_) => EngineHealth {
                state: SessionState::NotStarted,
                has_evaluation_data: false,
                queue_depth: 0,
            },
        }
    }

    /// Analyses one position.
    ///
    /// `depth` defaults to the configured default depth. Fails with
    /// `InvalidRequest` for a blank position or zero depth, with `NotReady`,
    /// `EngineDegraded` or `SubprocessExited` when the engine cannot take
    /// work, and with `Timeout` when no `bestmove` arrives in time.
    pub async fn analyze(&self, position: &str, depth: Option<u32>) -> Result<AnalysisResult> {
        self.analyze_with_default(position, depth, self.default_depth)
            .await
    }

    async fn analyze_with_default(
        &self,
        position: &str,
        depth: Option<u32>,
        default_depth: u32,
    ) -> Result<AnalysisResult> {
        let position = position.trim();
        if position.is_empty() {
            return Err(Error::InvalidRequest("SFEN required".to_string()));
        }
        let depth = depth.unwrap_or(default_depth);
        if depth == 0 {
            return Err(Error::InvalidRequest(
                "depth must be a positive integer".to_string(),
            ));
        }

        let session = match &self.backend {
            Backend::Engine(session) => session,
            Backend::Unavailable(reason) => return Err(Error::EngineDegraded(reason.to_string())),
        };

        let mut submission = session.submit(position.to_string(), depth)?;
        let outcome = match tokio::time::timeout(self.timeout, &mut submission.outcome).await {
            Ok(outcome) => outcome.unwrap_or(Err(Error::SubprocessExited)),
            Err(_) => {
                if session.expire(submission.id).await {
                    warn!(id = submission.id, depth, "analysis timed out");
                    return Err(Error::Timeout(self.timeout));
                }
                // Settled while the timer fired; that outcome stands.
                submission
                    .outcome
                    .await
                    .unwrap_or(Err(Error::SubprocessExited))
            }
        };

        if let Ok(result) = &outcome {
            debug!(id = submission.id, "{}", result.summary());
        }
        outcome
    }

    /// Analyses positions one after another. A failed entry is recorded and
    /// the batch carries on.
    pub async fn analyze_batch(&self, positions: &[String], depth: Option<u32>) -> Vec<BatchEntry> {
        info!(count = positions.len(), "batch analysis started");

        let mut entries = Vec::with_capacity(positions.len());
        for (i, position) in positions.iter().enumerate() {
            let move_num = i + 1;
            let outcome = match self
                .analyze_with_default(position, depth, self.batch_depth)
                .await
            {
                Ok(result) => BatchOutcome::Analyzed(result),
                Err(e) => {
                    warn!(move_num, "batch entry failed: {}", e);
                    BatchOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };
            entries.push(BatchEntry { move_num, outcome });

            if move_num % 10 == 0 {
                info!("batch progress: {}/{}", move_num, positions.len());
            }
        }

        info!(
            count = entries.len(),
            failed = entries.iter().filter(|e| !e.is_ok()).count(),
            "batch analysis finished"
        );
        entries
    }

    /// Sends `quit` to the engine and kills it.
    pub async fn shutdown(&self) {
        if let Backend::Engine(session) = &self.backend {
            session.shutdown().await;
        }
    }
}
