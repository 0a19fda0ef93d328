//! Engine subprocess session
//!
//! Spawns the engine and runs a single task that owns its stdin, its stdout
//! and the request queue. Everything that mutates session state goes through
//! that task, so no locks guard the subprocess.

use std::collections::HashSet;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as ProcessCommand};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use super::analysis::{AnalysisResult, EngineHealth, SessionState};
use super::protocol::{parse_line, Command, EngineEvent};
use super::queue::{Dispatch, Expiry, PendingRequest, RequestId, RequestQueue, Responder};
use crate::config::{EngineConfig, EngineOption};
use crate::error::{Error, Result};

/// How long the engine gets to honour `quit` before it is killed
const QUIT_GRACE: Duration = Duration::from_millis(100);

enum Message {
    Request(Request),
    Shutdown { done: oneshot::Sender<()> },
}

/// Messages handled by the session state machine itself
enum Request {
    Submit {
        id: RequestId,
        position: String,
        depth: u32,
        responder: Responder,
    },
    Expire {
        id: RequestId,
        removed: oneshot::Sender<bool>,
    },
}

/// A request handed to the session, awaiting its outcome
pub struct Submission {
    pub id: RequestId,
    pub outcome: oneshot::Receiver<Result<AnalysisResult>>,
}

/// Handle to a running engine session. Cheap to clone; the subprocess lives
/// until `shutdown` is called, it exits on its own, or every handle is dropped.
#[derive(Clone)]
pub struct EngineSession {
    inbox: mpsc::UnboundedSender<Message>,
    status: watch::Receiver<EngineHealth>,
    next_id: Arc<AtomicU64>,
}

impl EngineSession {
    /// Spawns the engine and starts the USI handshake.
    ///
    /// Returns as soon as `usi` has been written; use [`wait_ready`] to wait
    /// for `readyok`.
    ///
    /// [`wait_ready`]: EngineSession::wait_ready
    pub async fn launch(config: &EngineConfig) -> Result<Self> {
        info!(path = %config.path.display(), "starting engine");

        let mut child = ProcessCommand::new(&config.path)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Error::EngineNotFound(config.path.clone()),
                _ => Error::Spawn(e),
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Spawn(std::io::Error::other("failed to open stdin")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Spawn(std::io::Error::other("failed to open stdout")))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = LineReader::new(stderr);
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => warn!("engine stderr: {}", line),
                        Ok(None) => break,
                        Err(e) => {
                            warn!("engine stderr unreadable: {}", e);
                            break;
                        }
                    }
                }
            });
        }

        let (status_tx, status_rx) = watch::channel(EngineHealth::default());
        let mut core = SessionCore::new(stdin, config.options.clone(), status_tx);
        core.begin_handshake().await;

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        tokio::spawn(run(core, child, stdout, inbox_rx));

        Ok(Self {
            inbox: inbox_tx,
            status: status_rx,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Waits until the handshake has finished.
    ///
    /// Succeeds on `Ready` and on `Degraded`; a degraded engine is alive but
    /// refuses analysis, which callers see through [`health`].
    ///
    /// [`health`]: EngineSession::health
    pub async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let mut status = self.status.clone();
        let settled = status.wait_for(|h| {
            matches!(
                h.state,
                SessionState::Ready | SessionState::Degraded | SessionState::Terminated
            )
        });

        let state = match tokio::time::timeout(timeout, settled).await {
            Ok(Ok(health)) => health.state,
            Ok(Err(_)) => SessionState::Terminated,
            Err(_) => return Err(Error::StartupTimeout(timeout)),
        };

        if state == SessionState::Terminated {
            return Err(Error::SubprocessExited);
        }
        Ok(())
    }

    pub fn health(&self) -> EngineHealth {
        *self.status.borrow()
    }

    /// Queues a position for analysis.
    ///
    /// Admission is decided by the session task; a refused request settles
    /// its outcome with an error without touching the engine.
    pub fn submit(&self, position: String, depth: u32) -> Result<Submission> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (responder, outcome) = oneshot::channel();
        self.inbox
            .send(Message::Request(Request::Submit {
                id,
                position,
                depth,
                responder,
            }))
            .map_err(|_| Error::SubprocessExited)?;
        Ok(Submission { id, outcome })
    }

    /// Removes a request whose deadline passed. Returns false if it had
    /// already been settled.
    pub async fn expire(&self, id: RequestId) -> bool {
        let (removed, rx) = oneshot::channel();
        if self.inbox
            .send(Message::Request(Request::Expire { id, removed }))
            .is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Sends `quit`, then kills the engine. Safe to call more than once.
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.inbox.send(Message::Shutdown { done }).is_ok() {
            let _ = rx.await;
        }
    }
}

/// Newline-framed reader that tolerates output which is not UTF-8
/// (Shift-JIS `info string` text, for one).
///
/// Partial lines stay buffered between calls, so `next_line` can be
/// cancelled by `select!` without losing bytes.
struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        let read = self.reader.read_until(b'\n', &mut self.buf).await?;
        if read == 0 && self.buf.is_empty() {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&self.buf)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        self.buf.clear();
        Ok(Some(line))
    }
}

enum Step {
    Inbox(Option<Message>),
    Stdout(std::io::Result<Option<String>>),
    Exited(std::io::Result<ExitStatus>),
}

/// The session task: one loop over caller messages, engine stdout and
/// process exit.
async fn run(
    mut core: SessionCore<ChildStdin>,
    mut child: Child,
    stdout: ChildStdout,
    mut inbox: mpsc::UnboundedReceiver<Message>,
) {
    let mut lines = LineReader::new(stdout);
    let mut stdout_open = true;
    let mut alive = true;

    loop {
        // Buffered output is consumed before an exit is acted on, so a
        // `bestmove` printed just before exiting still settles its request.
        let step = tokio::select! {
            biased;
            line = lines.next_line(), if stdout_open => Step::Stdout(line),
            msg = inbox.recv() => Step::Inbox(msg),
            status = child.wait(), if alive => Step::Exited(status),
        };

        match step {
            Step::Inbox(Some(Message::Shutdown { done })) => {
                if alive {
                    core.shutdown(&mut child).await;
                    alive = false;
                }
                let _ = done.send(());
            }
            Step::Inbox(Some(Message::Request(request))) => core.handle(request).await,
            Step::Inbox(None) => {
                if alive {
                    core.shutdown(&mut child).await;
                }
                break;
            }
            Step::Stdout(Ok(Some(line))) => core.on_line(&line).await,
            Step::Stdout(Ok(None)) => stdout_open = false,
            Step::Stdout(Err(e)) => {
                warn!("engine stdout unreadable: {}", e);
                stdout_open = false;
            }
            Step::Exited(status) => {
                alive = false;
                core.on_exit(status);
            }
        }
    }
    debug!("engine session task finished");
}

/// Session state machine, independent of the actual subprocess
pub(crate) struct SessionCore<W> {
    /// `None` once the engine is gone
    writer: Option<W>,
    state: SessionState,
    has_evaluation_data: bool,
    queue: RequestQueue,
    options: Vec<EngineOption>,
    advertised: HashSet<String>,
    status: watch::Sender<EngineHealth>,
}

impl<W: AsyncWrite + Unpin> SessionCore<W> {
    pub(crate) fn new(
        writer: W,
        options: Vec<EngineOption>,
        status: watch::Sender<EngineHealth>,
    ) -> Self {
        Self {
            writer: Some(writer),
            state: SessionState::NotStarted,
            has_evaluation_data: true,
            queue: RequestQueue::new(),
            options,
            advertised: HashSet::new(),
            status,
        }
    }

    fn publish(&self) {
        self.status.send_replace(EngineHealth {
            state: self.state,
            has_evaluation_data: self.has_evaluation_data,
            queue_depth: self.queue.len(),
        });
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "engine state");
            self.state = next;
        }
    }

    async fn send(&mut self, cmd: Command) {
        let Some(writer) = self.writer.as_mut() else {
            warn!(%cmd, "engine stdin closed, dropping command");
            return;
        };
        debug!("> {}", cmd);
        let line = cmd.to_line();
        let written = match writer.write_all(line.as_bytes()).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!(%cmd, "failed to write to engine: {}", e);
        }
    }

    async fn dispatch(&mut self, dispatch: Option<Dispatch>) {
        if let Some(Dispatch { position, depth }) = dispatch {
            self.send(Command::Position { sfen: position }).await;
            self.send(Command::Go { depth }).await;
        }
    }

    pub(crate) async fn begin_handshake(&mut self) {
        self.transition(SessionState::Handshaking);
        self.send(Command::Usi).await;
        self.publish();
    }

    fn admission(&self) -> Result<()> {
        match self.state {
            SessionState::Ready if self.has_evaluation_data => Ok(()),
            SessionState::Ready | SessionState::Degraded => Err(Error::EngineDegraded(
                "evaluation data unavailable".to_string(),
            )),
            SessionState::Terminated => Err(Error::SubprocessExited),
            _ => Err(Error::NotReady),
        }
    }

    async fn handle(&mut self, request: Request) {
        match request {
            Request::Submit {
                id,
                position,
                depth,
                responder,
            } => self.submit(id, position, depth, responder).await,
            Request::Expire { id, removed } => {
                let _ = removed.send(self.expire(id).await);
            }
        }
    }

    pub(crate) async fn submit(
        &mut self,
        id: RequestId,
        position: String,
        depth: u32,
        responder: Responder,
    ) {
        if let Err(e) = self.admission() {
            debug!(id, "request refused: {}", e);
            let _ = responder.send(Err(e));
            return;
        }
        let dispatch = self
            .queue
            .push(PendingRequest::new(id, position, depth, responder));
        self.dispatch(dispatch).await;
        self.publish();
    }

    pub(crate) async fn expire(&mut self, id: RequestId) -> bool {
        let expiry = self.queue.expire(id);
        match expiry {
            Expiry::NotFound => {}
            Expiry::Queued => warn!(id, "request expired while queued"),
            Expiry::InFlight => {
                warn!(id, "request expired during search, stopping engine");
                self.send(Command::Stop).await;
            }
        }
        self.publish();
        expiry != Expiry::NotFound
    }

    pub(crate) async fn on_line(&mut self, line: &str) {
        debug!("< {}", line);
        let Some(event) = parse_line(line) else {
            return;
        };

        match event {
            EngineEvent::OptionDecl { name } => {
                if self.state == SessionState::Handshaking {
                    self.advertised.insert(name);
                }
            }
            EngineEvent::HandshakeAck => {
                if self.state == SessionState::Handshaking {
                    self.configure().await;
                    self.transition(SessionState::AwaitingReady);
                    self.send(Command::IsReady).await;
                }
            }
            EngineEvent::InitError => {
                warn!("engine reports missing data, analysis disabled: {}", line);
                self.has_evaluation_data = false;
                if self.state == SessionState::Ready {
                    self.transition(SessionState::Degraded);
                }
            }
            EngineEvent::ReadyAck => {
                if self.state == SessionState::AwaitingReady {
                    self.transition(SessionState::Ready);
                    if !self.has_evaluation_data {
                        warn!("engine ready without evaluation data");
                    }
                }
            }
            EngineEvent::ScoreUpdate(cp) => self.queue.record_score(cp),
            EngineEvent::BestMove { best_move, score } => {
                let next = self.queue.complete(&best_move, score);
                self.dispatch(next).await;
            }
        }
        self.publish();
    }

    /// Sends the configured options the engine advertised.
    async fn configure(&mut self) {
        let options = std::mem::take(&mut self.options);
        for option in &options {
            if !self.advertised.contains(&option.name) {
                warn!(option = %option.name, "engine does not advertise option, skipping");
                continue;
            }
            self.send(Command::SetOption {
                name: option.name.clone(),
                value: option.value.clone(),
            })
            .await;
        }
        self.options = options;
    }

    pub(crate) fn on_exit(&mut self, status: std::io::Result<ExitStatus>) {
        match status {
            Ok(status) => warn!(%status, "engine exited"),
            Err(e) => error!("failed to wait for engine: {}", e),
        }
        self.terminate();
    }

    fn terminate(&mut self) {
        self.writer = None;
        self.transition(SessionState::Terminated);
        let failed = self.queue.fail_all(|| Error::SubprocessExited);
        if failed > 0 {
            warn!(failed, "failed pending requests after engine exit");
        }
        self.publish();
    }

    async fn shutdown(&mut self, child: &mut Child) {
        info!("shutting down engine");
        self.send(Command::Quit).await;
        self.writer = None;

        if tokio::time::timeout(QUIT_GRACE, child.wait()).await.is_err() {
            if let Err(e) = child.kill().await {
                warn!("failed to kill engine: {}", e);
            }
        }
        self.terminate();
    }
}
