//! Test-only helpers: spec builders, a temp project and a scripted agent.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::core::events::{AgentEvent, EventEnvelope};
use crate::io::agent::{Agent, AgentRequest, AgentSession, SessionPoll};
use crate::io::init::{InitOptions, ProjectPaths, init_project};
use crate::io::locator::locate_active_spec;
use crate::io::run_state::{RunState, load_run_state, write_run_state};
use crate::io::spec_store::{load_spec, write_spec};
use crate::spec::{Spec, Task, TaskSize, TaskStatus};

/// Create a deterministic task with one deliverable and no dependencies.
pub fn task(id: &str, status: TaskStatus, size: TaskSize) -> Task {
    Task {
        id: id.to_string(),
        title: format!("{id} title"),
        status,
        size,
        depends_on: Vec::new(),
        deliverables: vec![format!("{id} deliverable")],
        verify_command: None,
        notes: None,
    }
}

/// Create a task that depends on `depends_on`.
pub fn task_depending(id: &str, status: TaskStatus, size: TaskSize, depends_on: &[&str]) -> Task {
    Task {
        depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
        ..task(id, status, size)
    }
}

/// Create a spec titled "Demo" holding `tasks`.
pub fn spec_with(tasks: Vec<Task>) -> Spec {
    Spec {
        title: "Demo".to_string(),
        context: None,
        tasks,
        acceptance_criteria: Vec::new(),
        completed_at: None,
    }
}

/// An initialized project in a temporary directory.
pub struct TestProject {
    _temp: TempDir,
    paths: ProjectPaths,
}

impl TestProject {
    /// Temp dir with `specloop init` applied.
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let paths = init_project(temp.path(), &InitOptions { force: false })?;
        Ok(Self { _temp: temp, paths })
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    pub fn paths(&self) -> &ProjectPaths {
        &self.paths
    }

    /// Path of the single active spec written by [`Self::write_spec`].
    pub fn spec_path(&self) -> PathBuf {
        self.paths.active_dir.join("feature.md")
    }

    pub fn write_spec(&self, spec: &Spec) -> Result<PathBuf> {
        let path = self.spec_path();
        write_spec(&path, spec)?;
        Ok(path)
    }

    pub fn read_spec(&self) -> Result<Spec> {
        load_spec(&self.spec_path())
    }

    /// Start a run the way `specloop run` does, with a fixed id.
    pub fn begin_run(&self, run_id: &str) -> Result<()> {
        write_run_state(&self.paths.run_state_path, &RunState::begin(run_id.to_string()))
    }

    pub fn run_state(&self) -> Result<RunState> {
        load_run_state(&self.paths.run_state_path)
    }
}

/// One step of a scripted agent session.
#[derive(Debug, Clone)]
pub enum ScriptedStep {
    /// Emit an event.
    Event(AgentEvent),
    /// Rewrite a task status in the active spec, as an agent would.
    SetStatus(String, TaskStatus),
    /// Stay silent until cancelled.
    Hang,
    /// Emit a thinking event every interval until cancelled.
    Chatter(Duration),
}

impl ScriptedStep {
    pub fn complete(success: bool) -> Self {
        Self::Event(AgentEvent::Complete {
            success,
            duration_ms: 10,
            cost: None,
            usage: None,
        })
    }
}

/// Agent replaying one script per session without spawning processes.
///
/// Once the scripts run out, further sessions close immediately without
/// emitting anything.
#[derive(Default)]
pub struct ScriptedAgent {
    scripts: RefCell<VecDeque<Vec<ScriptedStep>>>,
    requests: RefCell<Vec<AgentRequest>>,
    specs_at_start: RefCell<Vec<Spec>>,
    cancellations: Rc<Cell<usize>>,
}

impl ScriptedAgent {
    pub fn new(scripts: Vec<Vec<ScriptedStep>>) -> Self {
        Self {
            scripts: RefCell::new(scripts.into()),
            ..Self::default()
        }
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.borrow().clone()
    }

    /// The active spec as it was on disk when each session started.
    pub fn spec_seen_at_start(&self) -> Vec<Spec> {
        self.specs_at_start.borrow().clone()
    }

    pub fn cancellations(&self) -> usize {
        self.cancellations.get()
    }
}

impl Agent for ScriptedAgent {
    type Session = ScriptedSession;

    fn start(&self, request: &AgentRequest) -> Result<ScriptedSession> {
        let spec_path = locate_active_spec(&request.workdir)?;
        self.specs_at_start.borrow_mut().push(load_spec(&spec_path)?);
        self.requests.borrow_mut().push(request.clone());
        let steps = self.scripts.borrow_mut().pop_front().unwrap_or_default();
        Ok(ScriptedSession {
            steps: steps.into(),
            spec_path,
            seq: 0,
            cancelled: false,
            cancellations: Rc::clone(&self.cancellations),
        })
    }
}

pub struct ScriptedSession {
    steps: VecDeque<ScriptedStep>,
    spec_path: PathBuf,
    seq: u64,
    cancelled: bool,
    cancellations: Rc<Cell<usize>>,
}

impl AgentSession for ScriptedSession {
    fn next_event(&mut self, wait: Duration) -> Result<SessionPoll> {
        loop {
            if self.cancelled {
                return Ok(SessionPoll::Closed);
            }
            match self.steps.pop_front() {
                None => return Ok(SessionPoll::Closed),
                Some(ScriptedStep::Event(event)) => {
                    let envelope = EventEnvelope {
                        seq: self.seq,
                        at_ms: self.seq * 10,
                        event,
                    };
                    self.seq += 1;
                    return Ok(SessionPoll::Event(envelope));
                }
                Some(ScriptedStep::SetStatus(id, status)) => {
                    let mut spec = load_spec(&self.spec_path)?;
                    if let Some(task) = spec.task_mut(&id) {
                        task.status = status;
                    }
                    write_spec(&self.spec_path, &spec)?;
                }
                Some(ScriptedStep::Hang) => {
                    self.steps.push_front(ScriptedStep::Hang);
                    thread::sleep(wait);
                    return Ok(SessionPoll::Idle);
                }
                Some(ScriptedStep::Chatter(interval)) => {
                    self.steps.push_front(ScriptedStep::Chatter(interval));
                    thread::sleep(interval.min(wait));
                    if wait < interval {
                        return Ok(SessionPoll::Idle);
                    }
                    let envelope = EventEnvelope {
                        seq: self.seq,
                        at_ms: self.seq * 10,
                        event: AgentEvent::Thinking {
                            text: "still working".to_string(),
                        },
                    };
                    self.seq += 1;
                    return Ok(SessionPoll::Event(envelope));
                }
            }
        }
    }

    fn cancel(&mut self) -> Result<()> {
        if !self.cancelled {
            self.cancelled = true;
            self.cancellations.set(self.cancellations.get() + 1);
        }
        Ok(())
    }
}
