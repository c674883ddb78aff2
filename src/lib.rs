#![forbid(unsafe_code)]
//! Build orchestrator for the Gem Check site.
//!
//! A [`Site`] couples a validated [`TaskGraph`] with the [`Environment`] every
//! task runs in. Requesting a task resolves its dependency closure into an
//! [`ExecutionPlan`] of ready sets, which the [`executor`] runs set by set
//! with the members of each set in parallel.
//!
//! With the `live` feature, [`watch::WatchCoordinator`] reruns parts of the
//! graph on file changes and notifies browsers through a
//! [`reload::ReloadSink`]. The `server` feature adds a static file server for
//! the output tree.

pub mod config;
mod core;
mod error;
pub mod executor;
mod graph;
#[cfg(feature = "server")]
pub mod http;
pub mod output;
pub mod reload;
pub mod tasks;
mod utils;
#[cfg(feature = "live")]
pub mod watch;

use std::time::Instant;

use console::style;

pub use crate::config::Config;
pub use crate::core::{Environment, Mode, Profile, ReloadScope};
pub use crate::error::*;
pub use crate::executor::RunReport;
pub use crate::graph::{ExecutionPlan, ReadySet, Task, TaskFn, TaskGraph};
use crate::utils::as_overhead;

/// A project ready to be built: the task graph together with the environment
/// its tasks run in. Immutable once constructed.
#[derive(Debug)]
pub struct Site {
    config: Config,
    graph: TaskGraph,
    env: Environment,
}

impl Site {
    /// Builds the task graph from the definition. Fails on cycles, unknown
    /// references and duplicate identifiers.
    pub fn new(config: Config, env: Environment) -> Result<Self, GraphError> {
        let graph = tasks::build_graph(&config.tasks)?;
        Ok(Self { config, graph, env })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Resolves the requested tasks into one execution plan.
    pub fn plan(&self, requested: &[&str]) -> Result<ExecutionPlan, GraphError> {
        self.graph.resolve_many(requested.iter().copied())
    }

    /// Runs an already resolved plan. Never fails as a whole; the outcome is
    /// carried by the report.
    pub fn run_plan(&self, plan: &ExecutionPlan) -> RunReport {
        executor::run(plan, &self.env)
    }

    /// Resolves and runs the requested tasks, returning the first failure.
    pub fn run(&self, requested: &[&str]) -> Result<RunReport, GemcheckError> {
        let s = Instant::now();
        let plan = self.plan(requested)?;

        tracing::info!(
            "running {} ({} tasks, {} steps)",
            style(requested.join(", ")).cyan(),
            plan.len(),
            plan.ready_sets().len(),
        );

        let report = self.run_plan(&plan).into_result()?;
        tracing::info!("finished {}", as_overhead(s));

        Ok(report)
    }
}
