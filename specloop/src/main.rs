//! Spec-driven agent loop.
//!
//! Works through the sized tasks of the active spec (`specs/active/*.md`),
//! handing each iteration's tasks to a coding agent until every task is
//! resolved or the loop stops making progress.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};

use specloop::archive::archive_active_spec;
use specloop::core::selector::SelectionMode;
use specloop::exit_codes;
use specloop::io::agent::CommandAgent;
use specloop::io::config::load_config;
use specloop::io::init::{InitOptions, ProjectPaths, init_project};
use specloop::io::locator::locate_active_spec;
use specloop::logging;
use specloop::looping::{LoopStop, RunOptions, run_loop};
use specloop::select::{SelectOutcome, select_from_root};
use specloop::status::status_report;
use specloop::step::{IterationOptions, IterationReport};
use specloop::validate::validate_project;

#[derive(Parser)]
#[command(
    name = "specloop",
    version,
    about = "Spec-driven coding-agent loop"
)]
struct Cli {
    /// Log progress to stderr (`RUST_LOG` overrides).
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.specloop/` and the `specs/` directories.
    Init {
        /// Overwrite existing loop-owned files.
        #[arg(short, long)]
        force: bool,
    },
    /// Check the layout, config and active spec.
    Validate,
    /// Show progress of the active spec.
    Status,
    /// Print the tasks the next iteration would work on.
    Select {
        /// Size points per iteration (defaults to config).
        #[arg(long)]
        budget: Option<u32>,
        /// Select every task that fits the budget.
        #[arg(long)]
        greedy: bool,
    },
    /// Run agent iterations until the spec completes or the loop gets stuck.
    Run {
        /// Stop after this many iterations.
        #[arg(long)]
        iterations: Option<u32>,
        /// Size points per iteration (defaults to config).
        #[arg(long)]
        budget: Option<u32>,
        /// Hand every task that fits the budget to the agent at once.
        #[arg(long)]
        greedy: bool,
    },
    /// Move a fully resolved active spec into `specs/completed/`.
    Archive,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli.command) {
        Ok(code) => ExitCode::from(code as u8),
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(exit_codes::INVALID as u8)
        }
    }
}

fn run(command: Command) -> Result<i32> {
    let root = std::env::current_dir().context("resolve current directory")?;
    match command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Validate => cmd_validate(&root),
        Command::Status => cmd_status(&root),
        Command::Select { budget, greedy } => cmd_select(&root, budget, mode(greedy)),
        Command::Run {
            iterations,
            budget,
            greedy,
        } => cmd_run(
            &root,
            &RunOptions {
                iterations,
                iteration: IterationOptions {
                    budget_points: budget,
                    mode: mode(greedy),
                },
            },
        ),
        Command::Archive => cmd_archive(&root),
    }
}

fn mode(greedy: bool) -> SelectionMode {
    if greedy {
        SelectionMode::Greedy
    } else {
        SelectionMode::Standard
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_project(root, &InitOptions { force })?;
    println!("initialized {}", paths.relative(&paths.loop_dir).display());
    println!(
        "add a spec document to {}",
        paths.relative(&paths.active_dir).display()
    );
    Ok(exit_codes::OK)
}

fn cmd_validate(root: &Path) -> Result<i32> {
    let outcome = validate_project(root)?;
    let paths = ProjectPaths::new(root);
    println!(
        "ok: {} ({} tasks)",
        paths.relative(&outcome.spec_path).display(),
        outcome.tasks
    );
    Ok(exit_codes::OK)
}

fn cmd_status(root: &Path) -> Result<i32> {
    let report = status_report(root)?;
    let paths = ProjectPaths::new(root);
    let counts = &report.progress.counts;
    println!(
        "{} ({})",
        report.title,
        paths.relative(&report.spec_path).display()
    );
    println!(
        "{}% resolved: {} passed, {} failed, {} in progress, {} pending",
        report.progress.percentage,
        counts.passed,
        counts.failed,
        counts.in_progress,
        counts.pending
    );
    for task in &report.tasks {
        let marker = if report.progress.blocked.contains(&task.id) {
            " (blocked)"
        } else {
            ""
        };
        println!(
            "  {:<12} {} [{}] {}{}",
            task.status.as_str(),
            task.id,
            task.size,
            task.title,
            marker
        );
    }
    if !report.pending_learnings.is_empty() {
        println!(
            "learning capture pending: {}",
            report.pending_learnings.join(", ")
        );
    }
    if let Some(state) = &report.run_state
        && let Some(run_id) = &state.run_id
    {
        let last = match state.last_success {
            Some(true) => "succeeded",
            Some(false) => "failed",
            None => "none",
        };
        println!(
            "run {run_id}: {} iterations, last iteration {last}",
            state.next_iter.saturating_sub(1)
        );
    }
    Ok(exit_codes::OK)
}

fn cmd_select(root: &Path, budget: Option<u32>, mode: SelectionMode) -> Result<i32> {
    let (_, outcome) = select_from_root(root, budget, mode)?;
    match outcome {
        SelectOutcome::Complete => {
            println!("complete");
            Ok(exit_codes::COMPLETE)
        }
        SelectOutcome::Selected(selection) => {
            for id in &selection.task_ids {
                println!("{id}");
            }
            Ok(exit_codes::OK)
        }
        SelectOutcome::NoProgressPossible {
            pending,
            in_progress,
            blocked,
        } => {
            eprintln!(
                "no selectable task: {pending} pending, {in_progress} in progress, {} blocked",
                blocked.len()
            );
            Ok(exit_codes::STUCK)
        }
    }
}

fn cmd_run(root: &Path, options: &RunOptions) -> Result<i32> {
    let cfg = load_config(&ProjectPaths::new(root).config_path)?;
    let agent = CommandAgent::new(cfg.agent.command.clone(), cfg.agent_output_limit_bytes);
    let outcome = run_loop(root, &agent, options, print_iteration)?;

    match outcome.stop {
        LoopStop::Complete { archived } => {
            println!(
                "complete after {} iterations, archived to {}",
                outcome.iterations_executed,
                ProjectPaths::new(root).relative(&archived).display()
            );
            Ok(exit_codes::OK)
        }
        LoopStop::Stuck { iterations } => {
            eprintln!("stuck: no task status changed in {iterations} iterations");
            Ok(exit_codes::STUCK)
        }
        LoopStop::NoProgressPossible { pending, blocked } => {
            if blocked.is_empty() {
                eprintln!("no progress possible: {pending} pending tasks exceed the budget");
            } else {
                eprintln!(
                    "no progress possible: {pending} pending, blocked by failed dependencies: {}",
                    blocked.join(", ")
                );
            }
            Ok(exit_codes::STUCK)
        }
        LoopStop::IterationLimit { limit } => {
            println!("stopped after {limit} iterations");
            Ok(exit_codes::ITERATION_LIMIT)
        }
    }
}

fn print_iteration(report: &IterationReport) {
    let verdict = if report.success { "ok" } else { "failed" };
    let commit = report
        .activity
        .last_commit
        .as_ref()
        .map(|c| format!(", commit {}", c.sha))
        .unwrap_or_default();
    println!(
        "iter {} [{}] {verdict}: {} tools, {}% resolved{commit}",
        report.iter,
        report.task_ids.join(", "),
        report.activity.tools.total(),
        report.progress.percentage
    );
}

fn cmd_archive(root: &Path) -> Result<i32> {
    let paths = ProjectPaths::new(root);
    let spec_path = locate_active_spec(root)?;
    let archived = archive_active_spec(&paths, &spec_path, Utc::now())?;
    println!("archived to {}", paths.relative(&archived).display());
    Ok(exit_codes::OK)
}
