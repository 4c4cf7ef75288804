//! Agent abstraction for iteration sessions.
//!
//! The [`Agent`] trait decouples orchestration from the actual coding-agent
//! backend (by default `claude -p --output-format stream-json`). A session
//! is pulled for events one at a time; the orchestrator decides how long it
//! is willing to wait and when to cancel. Tests use scripted agents that
//! replay predetermined events without spawning processes.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::events::{AgentEvent, EventEnvelope};
use crate::core::stream_decode::StreamDecoder;
use crate::io::process::{LineRecv, StreamingChild, spawn_streaming};

/// How long to wait for the process to exit once its stdout closed.
const EXIT_GRACE: Duration = Duration::from_secs(10);
/// How long to wait for output readers once the process is gone.
const READER_GRACE: Duration = Duration::from_secs(2);

/// Parameters for one agent session.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Working directory for the agent (the project root).
    pub workdir: PathBuf,
    /// Rendered task context.
    pub prompt: String,
    /// Size points the iteration may spend.
    pub budget_points: u32,
    /// Tasks the agent is asked to work on.
    pub task_ids: Vec<String>,
    /// Where to tee raw agent stdout, if anywhere.
    pub stream_path: Option<PathBuf>,
}

/// Result of polling a session for its next event.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionPoll {
    Event(EventEnvelope),
    /// Nothing arrived within the wait.
    Idle,
    /// The session ended; no more events will arrive.
    Closed,
}

/// Abstraction over coding-agent backends.
pub trait Agent {
    type Session: AgentSession;

    /// Start a session for one iteration.
    fn start(&self, request: &AgentRequest) -> Result<Self::Session>;
}

/// A live agent session producing events.
pub trait AgentSession {
    /// Wait up to `wait` for the next event.
    fn next_event(&mut self, wait: Duration) -> Result<SessionPoll>;

    /// Tear the session down. Safe to call more than once.
    fn cancel(&mut self) -> Result<()>;

    /// Diagnostic output (e.g. stderr) for the iteration log, once the
    /// session is over.
    fn transcript(&mut self) -> Option<String> {
        None
    }
}

/// Agent that spawns a configured command and reads its stdout.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    command: Vec<String>,
    stderr_limit_bytes: usize,
}

impl CommandAgent {
    pub fn new(command: Vec<String>, stderr_limit_bytes: usize) -> Self {
        Self {
            command,
            stderr_limit_bytes,
        }
    }
}

impl Agent for CommandAgent {
    type Session = CommandSession;

    #[instrument(skip_all, fields(program = self.command.first().map(String::as_str).unwrap_or(""), tasks = ?request.task_ids))]
    fn start(&self, request: &AgentRequest) -> Result<CommandSession> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("agent command is empty"))?;
        info!(workdir = %request.workdir.display(), "starting agent");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&request.workdir)
            .env("SPECLOOP_BUDGET_POINTS", request.budget_points.to_string())
            .env("SPECLOOP_TASK_IDS", request.task_ids.join(","));

        let child = spawn_streaming(
            cmd,
            Some(request.prompt.clone().into_bytes()),
            request.stream_path.as_deref(),
            self.stderr_limit_bytes,
        )
        .with_context(|| format!("start agent {program}"))?;

        Ok(CommandSession {
            child,
            decoder: StreamDecoder::new(),
            queue: VecDeque::new(),
            seq: 0,
            started: Instant::now(),
            closed: false,
            stderr: None,
        })
    }
}

pub struct CommandSession {
    child: StreamingChild,
    decoder: StreamDecoder,
    queue: VecDeque<AgentEvent>,
    seq: u64,
    started: Instant,
    closed: bool,
    stderr: Option<String>,
}

impl CommandSession {
    fn envelope(&mut self, event: AgentEvent) -> EventEnvelope {
        let envelope = EventEnvelope {
            seq: self.seq,
            at_ms: self.started.elapsed().as_millis() as u64,
            event,
        };
        self.seq += 1;
        envelope
    }

    /// Stdout closed: reap the process and report a failed exit that never
    /// produced a `complete` event.
    fn on_stdout_closed(&mut self) -> Result<()> {
        self.closed = true;
        let status = match self.child.wait_exit(EXIT_GRACE)? {
            Some(status) => status,
            None => {
                warn!("agent closed stdout but did not exit");
                self.child.kill()?
            }
        };
        self.stderr = Some(self.child.finish(READER_GRACE)?);
        debug!(exit_code = ?status.code(), "agent exited");
        if !status.success() && !self.decoder.saw_complete() {
            let tail = self
                .stderr
                .as_deref()
                .and_then(|s| s.lines().rev().find(|l| !l.trim().is_empty()))
                .map(|l| format!(": {}", l.trim()))
                .unwrap_or_default();
            self.queue.push_back(AgentEvent::Error {
                message: format!("agent exited with {status}{tail}"),
            });
        }
        Ok(())
    }
}

impl AgentSession for CommandSession {
    fn next_event(&mut self, wait: Duration) -> Result<SessionPoll> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(event) = self.queue.pop_front() {
                return Ok(SessionPoll::Event(self.envelope(event)));
            }
            if self.closed {
                return Ok(SessionPoll::Closed);
            }
            match self
                .child
                .recv_line(deadline.saturating_duration_since(Instant::now()))
            {
                LineRecv::Line(line) => {
                    let events = self.decoder.decode_line(&line);
                    if events.is_empty() && !line.trim().is_empty() {
                        debug!(line = %truncate(&line, 120), "skipping undecodable agent line");
                    }
                    self.queue.extend(events);
                }
                LineRecv::Timeout => return Ok(SessionPoll::Idle),
                LineRecv::Eof => self.on_stdout_closed()?,
            }
        }
    }

    fn cancel(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.queue.clear();
        let status = self.child.kill().context("cancel agent")?;
        debug!(exit_code = ?status.code(), "agent cancelled");
        self.stderr = Some(self.child.finish(READER_GRACE)?);
        Ok(())
    }

    fn transcript(&mut self) -> Option<String> {
        self.stderr.take().filter(|s| !s.trim().is_empty())
    }
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
