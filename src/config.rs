//! Declarative definition of the task graph and watch rules.
//!
//! The definition is read once at startup from `gemcheck.toml`. Without one,
//! the built-in [`DEFAULT_CONFIG`] is used. A file that leaves out `[[task]]`
//! or `[[watch]]` entirely inherits the built-in ones.
//!
//! ```toml
//! [paths]
//! build = "build"
//!
//! [serve]
//! port = 3000
//! reload_port = 1337
//!
//! [[task]]
//! id = "styles"
//! after = ["clean"]
//! group = "compile"
//! action = { kind = "styles", entry = "src/stylesheets/main.scss", dest = "stylesheets/main.css" }
//!
//! [[watch]]
//! globs = ["src/stylesheets/**/*.scss"]
//! tasks = ["styles"]
//! reload = "stream"
//! ```

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::core::ReloadScope;
use crate::error::ConfigError;

pub const CONFIG_FILE: &str = "gemcheck.toml";

/// Built-in pipeline: clean, compile the checklist and stylesheets, copy the
/// static assets.
pub const DEFAULT_CONFIG: &str = r#"
[paths]
build = "build"

[serve]
port = 3000
reload_port = 1337

[[task]]
id = "clean"
group = "clean"
action = { kind = "clean" }

[[task]]
id = "styles"
after = ["clean"]
group = "compile"
action = { kind = "styles", entry = "src/stylesheets/main.scss", dest = "stylesheets/main.css" }

[[task]]
id = "html"
after = ["clean"]
group = "compile"
action = { kind = "html", content = "src/content/*.md", template = "src/templates/index.html", dest = "index.html" }

[[task]]
id = "copy:images"
after = ["clean"]
group = "copy"
action = { kind = "copy", from = ["src/images/**/*"], to = "images" }

[[task]]
id = "copy:root"
after = ["clean"]
group = "copy"
action = { kind = "copy", from = ["src/root/*"], to = "" }

[[task]]
id = "copy:vendor"
after = ["clean"]
group = "copy"
action = { kind = "copy", from = ["src/vendor/**/*"], to = "vendor" }

[[task]]
id = "copy:fonts"
after = ["clean"]
group = "copy"
action = { kind = "copy", from = ["src/fonts/**/*"], to = "fonts" }

[[task]]
id = "copy"
deps = ["copy:images", "copy:root", "copy:vendor", "copy:fonts"]

[[task]]
id = "build"
deps = ["clean", "styles", "html", "copy"]

[[watch]]
name = "styles"
globs = ["src/stylesheets/**/*.scss"]
tasks = ["styles"]
reload = "stream"

[[watch]]
name = "content"
globs = ["src/content/**/*.md", "src/templates/**/*.html"]
tasks = ["html"]
reload = "full"

[[watch]]
name = "images"
globs = ["src/images/**/*"]
tasks = ["copy:images"]
reload = "full"
"#;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub serve: ServeConfig,
    #[serde(default, rename = "task")]
    pub tasks: Vec<TaskConfig>,
    #[serde(default, rename = "watch")]
    pub watch: Vec<WatchConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    /// Output tree, relative to the project root.
    pub build: Utf8PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            build: Utf8PathBuf::from("build"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServeConfig {
    /// HTTP port of the dev server.
    pub port: u16,
    /// Preferred websocket port for live reload.
    pub reload_port: u16,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            reload_port: 1337,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    pub id: String,
    #[serde(default)]
    pub deps: Vec<String>,
    #[serde(default)]
    pub after: Vec<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub action: Option<Action>,
}

/// The work a task performs. Source paths are relative to the project root,
/// destinations relative to the output tree.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Action {
    /// Empty the output tree.
    Clean,
    /// Compile one Sass entry point.
    Styles { entry: String, dest: String },
    /// Render the Markdown content through the page template.
    Html {
        content: String,
        template: String,
        dest: String,
    },
    /// Copy files verbatim, keeping their path below the glob's static base.
    Copy { from: Vec<String>, to: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub globs: Vec<String>,
    pub tasks: Vec<String>,
    #[serde(default)]
    pub reload: ReloadScope,
}

impl WatchConfig {
    pub fn name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.tasks.join("+"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse(DEFAULT_CONFIG).unwrap_or_else(|_| Self::empty())
    }
}

impl Config {
    fn empty() -> Self {
        Self {
            paths: PathsConfig::default(),
            serve: ServeConfig::default(),
            tasks: Vec::new(),
            watch: Vec::new(),
        }
    }

    /// Parses a definition, filling in the built-in tasks and watch rules when
    /// the text declares none.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(text)?;

        if config.tasks.is_empty() || config.watch.is_empty() {
            let builtin: Config = toml::from_str(DEFAULT_CONFIG)?;
            if config.tasks.is_empty() {
                config.tasks = builtin.tasks;
            }
            if config.watch.is_empty() {
                config.watch = builtin.watch;
            }
        }

        Ok(config)
    }

    /// Loads the definition for a project.
    ///
    /// An explicit `path` must exist. Otherwise `gemcheck.toml` in `root` is
    /// used if present, and the built-in definition if not.
    pub fn load(root: &Utf8Path, path: Option<&Utf8Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => root.join(path),
            None => {
                let candidate = root.join(CONFIG_FILE);
                if !candidate.is_file() {
                    tracing::debug!("no {CONFIG_FILE} found, using the built-in pipeline");
                    return Self::parse(DEFAULT_CONFIG);
                }
                candidate
            }
        };

        let text = fs::read_to_string(&path).map_err(|e| ConfigError::Io(path.clone(), e))?;
        tracing::debug!(%path, "loaded config");
        Self::parse(&text)
    }
}
