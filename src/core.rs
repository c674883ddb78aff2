use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::config::Config;

/// The mode in which the orchestrator is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// A one-time build.
    Build,
    /// A continuous watch mode for development.
    Watch,
}

/// Target environment handed to the transform collaborators. It changes what
/// they emit (compressed stylesheets, template switches) but never how tasks
/// are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Development,
    Production,
}

impl Profile {
    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Development => "development",
            Profile::Production => "production",
        }
    }
}

/// What a browser should do after a successful rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloadScope {
    /// Reload the whole page.
    #[default]
    Full,
    /// Swap stylesheets in place without reloading.
    Stream,
}

impl ReloadScope {
    /// Message pushed over the live reload socket.
    pub fn message(self) -> &'static str {
        match self {
            ReloadScope::Full => "reload",
            ReloadScope::Stream => "css",
        }
    }
}

/// Settings shared by every task of a Build Run. Immutable for the lifetime of
/// the process.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Project root; every configured source path is relative to it.
    pub root: Utf8PathBuf,
    /// Absolute path to the output tree.
    pub build_dir: Utf8PathBuf,
    /// The current mode (Build or Watch).
    pub mode: Mode,
    /// Target environment for the transforms.
    pub profile: Profile,
    /// Port of the live reload socket, if one is open.
    pub reload_port: Option<u16>,
}

impl Environment {
    pub fn new(root: impl Into<Utf8PathBuf>, config: &Config, mode: Mode, profile: Profile) -> Self {
        let root = root.into();
        let build_dir = root.join(&config.paths.build);

        Self {
            root,
            build_dir,
            mode,
            profile,
            reload_port: None,
        }
    }

    pub fn with_reload_port(mut self, port: u16) -> Self {
        self.reload_port = Some(port);
        self
    }

    /// Resolves a project-relative path.
    pub fn source(&self, path: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.root.join(path)
    }

    /// Resolves a path inside the output tree.
    pub fn output(&self, path: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.build_dir.join(path)
    }

    /// Returns a JavaScript snippet to enable live-reloading.
    ///
    /// Only available in `Watch` mode with an open reload socket. The script
    /// reloads the page on `"reload"` and re-fetches every stylesheet on
    /// `"css"`.
    pub fn get_refresh_script(&self) -> Option<String> {
        if self.mode != Mode::Watch {
            return None;
        }

        self.reload_port.map(|port| {
            format!(
                r#"
(() => {{
    const socket = new WebSocket("ws://localhost:{port}");
    socket.addEventListener("message", event => {{
        if (event.data === "{css}") {{
            for (const link of document.querySelectorAll('link[rel="stylesheet"]')) {{
                const url = new URL(link.href);
                url.searchParams.set("t", Date.now());
                link.href = url.toString();
            }}
        }} else {{
            window.location.reload();
        }}
    }});
}})();
"#,
                css = ReloadScope::Stream.message(),
            )
        })
    }
}
