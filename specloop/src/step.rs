//! Orchestration for a single iteration of `specloop run`.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::activity::{ActivitySummary, EndReason, IterationMachine};
use crate::core::events::Resequencer;
use crate::core::progress::{ProgressReport, evaluate};
use crate::core::selector::{SelectionMode, plan_iteration};
use crate::io::agent::{Agent, AgentRequest, AgentSession, SessionPoll};
use crate::io::config::{LoopConfig, load_config};
use crate::io::init::ProjectPaths;
use crate::io::iteration_log::{
    EventLog, IterationMeta, IterationPaths, write_agent_log, write_meta, write_prompt,
};
use crate::io::locator::locate_active_spec;
use crate::io::prompt::{LearningRequest, TaskContext, render_task_context};
use crate::io::run_state::{load_run_state, write_run_state};
use crate::io::spec_store::{load_spec, write_spec};
use crate::io::status_history::StatusHistory;
use crate::spec::{Spec, TaskStatus};

/// How long to let the agent wind down after its `complete` event.
const WIND_DOWN: Duration = Duration::from_secs(5);

/// Returned when the active spec has unresolved tasks but none can be planned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "no task can be selected ({pending} pending, {} blocked, budget {budget_points} points)",
    .blocked.len()
)]
pub struct NoTaskSelectedError {
    pub pending: usize,
    pub blocked: Vec<String>,
    pub budget_points: u32,
}

/// Per-iteration options.
#[derive(Debug, Clone, Default)]
pub struct IterationOptions {
    /// Overrides the configured budget.
    pub budget_points: Option<u32>,
    pub mode: SelectionMode,
}

/// Result of a single iteration.
#[derive(Debug, Clone)]
pub struct IterationReport {
    pub run_id: String,
    /// Iteration number (1-indexed).
    pub iter: u32,
    pub spec_path: PathBuf,
    pub task_ids: Vec<String>,
    pub resumed: bool,
    /// Tasks whose learning capture was requested in this iteration.
    pub learnings: Vec<String>,
    /// Whether the agent session completed successfully.
    pub success: bool,
    pub end_reason: EndReason,
    pub activity: ActivitySummary,
    /// Progress of the spec after the iteration.
    pub progress: ProgressReport,
    /// Task statuses after the iteration.
    pub spec_after: Spec,
}

/// Execute one iteration against the active spec.
///
/// Plans tasks, marks them in progress, renders the task context, drives the
/// agent session through the activity machine, then re-reads the spec and
/// records statuses. A resolved spec with queued learnings gets an iteration
/// with no tasks that only asks for the learning records. Agent failures and timeouts produce an unsuccessful
/// report rather than an error; structural problems (malformed spec,
/// missing or ambiguous active spec) are returned as errors.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn run_iteration<A: Agent>(
    root: &Path,
    agent: &A,
    options: &IterationOptions,
) -> Result<IterationReport> {
    let started_at = Utc::now();
    let paths = ProjectPaths::new(root);
    let cfg = load_config(&paths.config_path)?;
    let budget_points = options.budget_points.unwrap_or(cfg.budget_points);

    let mut run_state = load_run_state(&paths.run_state_path)
        .with_context(|| "load run state (run `specloop init` first)")?;
    let run_id = run_state
        .run_id
        .clone()
        .ok_or_else(|| anyhow!("missing run id (start iterations through `specloop run`)"))?;
    let iter = run_state.next_iter;

    let spec_path = locate_active_spec(root)?;
    let mut spec = load_spec(&spec_path)?;

    let mut history = StatusHistory::load_for_spec(&paths.status_history_path, &spec_path);
    history.observe(&spec.tasks, started_at);

    let plan = plan_iteration(&spec, budget_points, options.mode);
    let capture_only = plan.is_empty()
        && !history.pending_learnings().is_empty()
        && evaluate(&spec).completed;
    if plan.is_empty() && !capture_only {
        persist_history(&history);
        let report = evaluate(&spec);
        return Err(NoTaskSelectedError {
            pending: report.counts.pending,
            blocked: report.blocked,
            budget_points,
        }
        .into());
    }
    let task_ids = plan.task_ids();
    let resumed = plan.resumed;
    info!(iter, tasks = ?task_ids, resumed, capture_only, "planned iteration");

    if mark_in_progress(&mut spec, &task_ids) {
        write_spec(&spec_path, &spec)?;
    }

    let learning_ids = history.pending_learnings().to_vec();
    let learnings = LearningRequest::for_ids(&spec, &learning_ids);
    let planned: Vec<&_> = task_ids.iter().filter_map(|id| spec.task(id)).collect();
    let prompt = render_task_context(&TaskContext {
        spec: &spec,
        spec_path: paths.relative(&spec_path),
        tasks: &planned,
        mode: options.mode,
        resumed,
        budget_points,
        learnings: &learnings,
        learnings_path: paths.relative(&paths.learnings_path),
    })?;

    let iter_paths = IterationPaths::new(root, &run_id, iter);
    iter_paths.create()?;
    write_prompt(&iter_paths, &prompt)?;

    let request = AgentRequest {
        workdir: root.to_path_buf(),
        prompt,
        budget_points,
        task_ids: task_ids.clone(),
        stream_path: Some(iter_paths.stream_path.clone()),
    };
    let machine = drive_session(agent, &request, &cfg, &iter_paths)?;
    let activity = machine.summary();
    let (success, end_reason) = machine
        .outcome()
        .map(|o| (o.success, o.reason))
        .unwrap_or((false, EndReason::StreamClosed));
    if !success {
        warn!(iter, reason = ?end_reason, "iteration did not succeed");
    }

    let spec_after = load_spec(&spec_path).context("re-read spec after iteration")?;
    warn_on_illegal_transitions(&spec, &spec_after);

    let ended_at = Utc::now();
    history.take_pending_learnings();
    let detected = history.observe(&spec_after.tasks, ended_at);
    if !detected.is_empty() {
        info!(ids = ?detected, "queued learning capture for next iteration");
    }
    persist_history(&history);

    let meta = IterationMeta {
        run_id: run_id.clone(),
        iter,
        task_ids: task_ids.clone(),
        mode: options.mode,
        resumed,
        learnings: learning_ids.clone(),
        started_at,
        ended_at,
        duration_ms: (ended_at - started_at).num_milliseconds().max(0) as u64,
        activity: activity.clone(),
        statuses_after: spec_after
            .tasks
            .iter()
            .map(|t| (t.id.clone(), t.status.to_string()))
            .collect(),
    };
    write_meta(&iter_paths, &meta)?;

    run_state.next_iter = iter + 1;
    run_state.last_tasks = task_ids.clone();
    run_state.last_success = Some(success);
    write_run_state(&paths.run_state_path, &run_state)?;

    Ok(IterationReport {
        run_id,
        iter,
        spec_path,
        task_ids,
        resumed,
        learnings: learning_ids,
        success,
        end_reason,
        activity,
        progress: evaluate(&spec_after),
        spec_after,
    })
}

/// Set planned `pending` tasks to `in_progress`. Returns true if anything changed.
fn mark_in_progress(spec: &mut Spec, task_ids: &[String]) -> bool {
    let mut changed = false;
    for id in task_ids {
        if let Some(task) = spec.task_mut(id)
            && task.status == TaskStatus::Pending
        {
            task.status = TaskStatus::InProgress;
            changed = true;
        }
    }
    changed
}

fn warn_on_illegal_transitions(before: &Spec, after: &Spec) {
    for task in &after.tasks {
        let Some(prev) = before.task(&task.id) else {
            warn!(task = %task.id, "task appeared during iteration");
            continue;
        };
        if !prev.status.can_transition_to(task.status) {
            warn!(
                task = %task.id,
                from = %prev.status,
                to = %task.status,
                "task status moved backwards"
            );
        }
    }
}

fn persist_history(history: &StatusHistory) {
    if let Err(err) = history.persist() {
        warn!(err = %format!("{err:#}"), "failed to persist status history");
    }
}

/// Run the agent session to completion or timeout.
///
/// The session is polled with a wait bounded by both the idle timeout and
/// the remaining iteration budget; whichever expires first cancels the
/// session and finalizes the machine as failed.
fn drive_session<A: Agent>(
    agent: &A,
    request: &AgentRequest,
    cfg: &LoopConfig,
    iter_paths: &IterationPaths,
) -> Result<IterationMachine> {
    let mut session = agent.start(request)?;
    let mut events = EventLog::create(&iter_paths.events_path)?;
    let mut machine = IterationMachine::new();
    let mut reseq = Resequencer::new();

    let started = Instant::now();
    let mut last_event = started;
    let iteration_timeout = cfg.iteration_timeout();
    let idle_timeout = cfg.idle_timeout();

    while !machine.is_done() {
        let elapsed = started.elapsed();
        let idle = last_event.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;
        if elapsed >= iteration_timeout {
            warn!(timeout_secs = cfg.iteration_timeout_secs, "iteration timed out");
            cancel_session(&mut session);
            machine.abort(EndReason::IterationTimeout, elapsed_ms);
            break;
        }
        if idle >= idle_timeout {
            warn!(idle_secs = cfg.idle_timeout_secs, "agent idle too long");
            cancel_session(&mut session);
            machine.abort(EndReason::IdleTimeout, elapsed_ms);
            break;
        }

        let wait = (iteration_timeout - elapsed).min(idle_timeout - idle);
        match session.next_event(wait) {
            Ok(SessionPoll::Event(envelope)) => {
                last_event = Instant::now();
                for ready in reseq.push(envelope) {
                    events.append(&ready)?;
                    machine.apply(&ready);
                }
            }
            Ok(SessionPoll::Idle) => {}
            Ok(SessionPoll::Closed) => {
                for ready in reseq.drain() {
                    events.append(&ready)?;
                    machine.apply(&ready);
                }
                if !machine.is_done() {
                    debug!("agent stream closed without completion");
                    machine.abort(EndReason::StreamClosed, elapsed_ms);
                }
                break;
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "agent stream failed");
                cancel_session(&mut session);
                machine.abort(EndReason::StreamClosed, elapsed_ms);
                break;
            }
        }
    }

    wind_down(&mut session);
    if reseq.dropped() > 0 {
        warn!(dropped = reseq.dropped(), "dropped duplicate or stale events");
    }
    if let Some(log) = session.transcript() {
        write_agent_log(iter_paths, &log)?;
    }
    Ok(machine)
}

/// Give the agent a moment to exit on its own, then cancel it.
fn wind_down<S: AgentSession>(session: &mut S) {
    let deadline = Instant::now() + WIND_DOWN;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            cancel_session(session);
            return;
        }
        match session.next_event(remaining) {
            Ok(SessionPoll::Closed) => return,
            Ok(SessionPoll::Event(_)) => {}
            Ok(SessionPoll::Idle) | Err(_) => {
                cancel_session(session);
                return;
            }
        }
    }
}

fn cancel_session<S: AgentSession>(session: &mut S) {
    if let Err(err) = session.cancel() {
        warn!(err = %format!("{err:#}"), "failed to cancel agent session");
    }
}
