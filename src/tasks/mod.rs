//! Task functions built from declarative [`Action`]s.

mod clean;
mod copy;
pub mod html;
pub mod styles;

use crate::config::{Action, TaskConfig};
use crate::error::GraphError;
use crate::graph::{Task, TaskGraph};

pub use clean::clean;
pub use copy::copy;

/// Turns one task definition into a runnable [`Task`].
pub fn task_from_config(config: &TaskConfig) -> Task {
    let mut task = Task::new(&config.id)
        .deps(&config.deps)
        .after(&config.after);

    if let Some(group) = &config.group {
        task = task.group(group);
    }

    match config.action.clone() {
        None => task,
        Some(Action::Clean) => task.run_with(clean),
        Some(Action::Styles { entry, dest }) => {
            task.run_with(move |env| styles::styles(env, &entry, &dest))
        }
        Some(Action::Html {
            content,
            template,
            dest,
        }) => task.run_with(move |env| html::html(env, &content, &template, &dest)),
        Some(Action::Copy { from, to }) => task.run_with(move |env| copy(env, &from, &to)),
    }
}

/// Builds and validates the task graph of a definition.
pub fn build_graph(tasks: &[TaskConfig]) -> Result<TaskGraph, GraphError> {
    TaskGraph::new(tasks.iter().map(task_from_config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_builtin_graph_is_valid() {
        let config = Config::default();
        let graph = build_graph(&config.tasks).unwrap();

        assert_eq!(graph.len(), 9);
        assert!(graph.get("build").unwrap().is_aggregate());
        assert!(!graph.get("styles").unwrap().is_aggregate());
        assert_eq!(graph.get("copy:fonts").unwrap().group_tag(), Some("copy"));
    }

    #[test]
    fn test_clean_precedes_everything_in_build() {
        let graph = build_graph(&Config::default().tasks).unwrap();
        let plan = graph.resolve("build").unwrap();

        let sets = plan.ids();
        assert_eq!(sets[0], ["clean"]);
        assert_eq!(sets[1].len(), 6);
        for id in ["styles", "html", "copy:images", "copy:root", "copy:vendor", "copy:fonts"] {
            assert!(sets[1].contains(&id), "{id} should be in the second ready set");
        }
    }
}
