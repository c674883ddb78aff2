//! Runs an [`ExecutionPlan`] to completion.
//!
//! Ready sets are executed one after another. Inside a ready set every task
//! gets its own scoped thread, and the executor blocks until all of them
//! report back over a channel. Only then does it move on to the next
//! set, so a task never starts before everything it depends on is done.
//!
//! When a task fails, its siblings in the same set are left to finish; no
//! further set is started and the first failure becomes the outcome of the
//! run.

use std::sync::mpsc::channel;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{Level, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::Environment;
use crate::error::BuildError;
use crate::graph::{ExecutionPlan, Task};
use crate::utils::{STYLE_RUN, STYLE_TASK};

/// Timing of a single task inside a Build Run.
#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub id: String,
    /// Index of the ready set the task belonged to.
    pub step: usize,
    /// Offset from the start of the run.
    pub start: Duration,
    pub duration: Duration,
    pub success: bool,
}

/// Log and outcome of one Build Run.
#[derive(Debug)]
pub struct RunReport {
    pub plan: ExecutionPlan,
    /// Finished tasks in completion order.
    pub executions: Vec<TaskExecution>,
    pub elapsed: Duration,
    failure: Option<BuildError>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn failure(&self) -> Option<&BuildError> {
        self.failure.as_ref()
    }

    /// Identifiers of the tasks that ran, in completion order.
    pub fn ran(&self) -> impl Iterator<Item = &str> {
        self.executions.iter().map(|e| e.id.as_str())
    }

    pub fn execution(&self, id: &str) -> Option<&TaskExecution> {
        self.executions.iter().find(|e| e.id == id)
    }

    pub fn into_result(mut self) -> Result<RunReport, BuildError> {
        match self.failure.take() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

type Message = (String, Duration, Duration, Result<(), BuildError>);

pub fn run(plan: &ExecutionPlan, env: &Environment) -> RunReport {
    let run_start = Instant::now();

    let root_span = tracing::span!(Level::INFO, "build_run");
    root_span.pb_set_style(&STYLE_RUN);
    root_span.pb_set_length(plan.len() as u64);
    root_span.pb_set_message("Running tasks...");
    let _enter = root_span.enter();

    let mut executions = Vec::with_capacity(plan.len());
    let mut failure = None;

    for (step, set) in plan.ready_sets().iter().enumerate() {
        let (tx, rx) = channel::<Message>();

        // One thread per member: a ready set must overlap even when the
        // rayon pool has a single worker.
        thread::scope(|s| {
            for task in set.tasks() {
                let tx = tx.clone();
                let parent = &root_span;
                s.spawn(move || {
                    let start = run_start.elapsed();
                    let timer = Instant::now();
                    let result = run_task(task, env, parent);
                    // The receiver outlives the scope.
                    let _ = tx.send((task.id().to_string(), start, timer.elapsed(), result));
                });
            }
        });

        drop(tx);

        for (id, start, duration, result) in rx {
            root_span.pb_inc(1);

            let success = result.is_ok();
            match result {
                Ok(()) => tracing::debug!(task = %id, ?duration, "task finished"),
                Err(err) => {
                    tracing::error!(task = %id, "task failed");
                    failure.get_or_insert(err);
                }
            }

            executions.push(TaskExecution {
                id,
                step,
                start,
                duration,
                success,
            });
        }

        if failure.is_some() {
            break;
        }
    }

    RunReport {
        plan: plan.clone(),
        executions,
        elapsed: run_start.elapsed(),
        failure,
    }
}

fn run_task(task: &Task, env: &Environment, parent: &Span) -> Result<(), BuildError> {
    let span = tracing::span!(parent: parent, Level::INFO, "task", name = task.id());
    span.pb_set_style(&STYLE_TASK);
    span.pb_set_message(&format!("Running {}", task.id()));
    let _enter = span.enter();

    // The task only sees shared references, a panic cannot leave them half
    // updated.
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| task.run(env))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(BuildError::Task {
            id: task.id().to_string(),
            source,
        }),
        Err(panic) => {
            let message = if let Some(s) = panic.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                String::from("unknown payload")
            };

            Err(BuildError::Panicked {
                id: task.id().to_string(),
                message,
            })
        }
    }
}
