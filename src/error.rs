use thiserror::Error;

#[derive(Debug, Error)]
pub enum GemcheckError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid task graph:\n{0}")]
    Graph(#[from] GraphError),

    #[error("Build failed.\n{0}")]
    Build(#[from] BuildError),

    #[cfg(feature = "live")]
    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Structural problems with the task graph, detected when the graph is built
/// or when a task is requested.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Cycle detected between tasks: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("Unknown task '{0}'")]
    UnknownTask(String),

    #[error("Task '{task}' references unknown task '{missing}'")]
    UnknownDependency { task: String, missing: String },

    #[error("Task '{0}' is declared more than once")]
    DuplicateTask(String),
}

impl GraphError {
    /// Identifiers involved in a cycle, empty for other variants.
    pub fn cycle(&self) -> &[String] {
        match self {
            GraphError::Cycle(ids) => ids,
            _ => &[],
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read config file '{0}'.\n{1}")]
    Io(camino::Utf8PathBuf, std::io::Error),

    #[error("Malformed config:\n{0}")]
    Toml(#[from] toml::de::Error),
}

/// Failure of one of the transform collaborators.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Sass compilation error: {0}")]
    Sass(#[from] Box<grass::Error>),

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("Malformed frontmatter in '{0}':\n{1}")]
    FrontMatter(camino::Utf8PathBuf, String),

    #[error("No content files matched '{0}'")]
    NoContent(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a single task function.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't compile glob pattern.\n{0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Path '{0}' is outside of '{1}'")]
    Path(camino::Utf8PathBuf, camino::Utf8PathBuf),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The first failure of a Build Run.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Task '{id}':\n{source}")]
    Task {
        id: String,
        #[source]
        source: TaskError,
    },

    #[error("Task '{id}' panicked: {message}")]
    Panicked { id: String, message: String },
}

impl BuildError {
    /// Identifier of the task that failed.
    pub fn task_id(&self) -> &str {
        match self {
            BuildError::Task { id, .. } | BuildError::Panicked { id, .. } => id,
        }
    }
}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Couldn't bind the live reload socket.\n{0}")]
    Bind(std::io::Error),
}
