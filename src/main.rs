use std::process::ExitCode;
use std::sync::Arc;

use anyhow::anyhow;
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use console::style;
use gemcheck::reload::{LiveReload, ReloadSink};
use gemcheck::watch::WatchCoordinator;
use gemcheck::{Config, Environment, GemcheckError, Mode, Profile, Site};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(version, about = "Builds, serves and watches the Gem Check site")]
struct Cli {
    /// Project root. Every configured path is relative to it.
    #[arg(long, global = true, default_value = ".")]
    root: Utf8PathBuf,

    /// Task definition file, relative to the root. Defaults to `gemcheck.toml`
    /// when present, the built-in pipeline otherwise.
    #[arg(long, global = true)]
    config: Option<Utf8PathBuf>,

    /// Build for production.
    #[arg(long, global = true)]
    production: bool,

    /// Log debug output.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Build the site once.
    Build,
    /// Build the site once for production.
    #[command(name = "build:prod")]
    BuildProd,
    /// Rebuild parts of the site whenever sources change.
    Watch,
    /// Serve the output tree over HTTP.
    Serve,
    /// Empty the output tree.
    Clean,
    /// Build, serve and watch with live reload. Used when no command is given.
    Default,
    /// Run arbitrary tasks together with their dependencies.
    Run {
        #[arg(required = true)]
        tasks: Vec<String>,
    },
    /// Print the ready sets a task resolves to.
    Plan { task: String },
    /// Print the task graph as a Mermaid diagram.
    Graph,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(GemcheckError::Build(err)) = e.downcast_ref::<GemcheckError>() {
                eprintln!("{} task '{}' failed", style("error:").red().bold(), err.task_id());
            }
            eprintln!("{} {e:#}", style("error:").red().bold());
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let indicatif_layer = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(indicatif_layer)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let root = cli.root.canonicalize_utf8().map_err(GemcheckError::from)?;
    let config = Config::load(&root, cli.config.as_deref()).map_err(GemcheckError::from)?;

    let command = cli.command.unwrap_or(Command::Default);
    let profile = match (&command, cli.production) {
        (Command::BuildProd, _) | (_, true) => Profile::Production,
        _ => Profile::Development,
    };

    let site = |mode: Mode, reload_port: Option<u16>| -> Result<Site, GemcheckError> {
        let mut env = Environment::new(&root, &config, mode, profile);
        if let Some(port) = reload_port {
            env = env.with_reload_port(port);
        }
        Ok(Site::new(config.clone(), env)?)
    };

    match command {
        Command::Build | Command::BuildProd => {
            site(Mode::Build, None)?.run(&["build"])?;
        }
        Command::Clean => {
            site(Mode::Build, None)?.run(&["clean"])?;
        }
        Command::Run { tasks } => {
            let tasks: Vec<_> = tasks.iter().map(String::as_str).collect();
            site(Mode::Build, None)?.run(&tasks)?;
        }
        Command::Plan { task } => {
            let plan = site(Mode::Build, None)?.plan(&[task.as_str()]).map_err(GemcheckError::from)?;
            print!("{plan}");
        }
        Command::Graph => {
            print!("{}", site(Mode::Build, None)?.graph());
        }
        Command::Serve => {
            let site = site(Mode::Build, None)?;
            serve(&site)?;
        }
        Command::Watch => {
            let reload = LiveReload::bind(config.serve.reload_port).map_err(GemcheckError::from)?;
            let site = Arc::new(site(Mode::Watch, Some(reload.port()))?);
            watch(site, Arc::new(reload))?;
        }
        Command::Default => {
            let reload = LiveReload::bind(config.serve.reload_port).map_err(GemcheckError::from)?;
            let site = Arc::new(site(Mode::Watch, Some(reload.port()))?);

            // A broken source should not keep the server from starting.
            if let Err(e) = site.run(&["build"]) {
                tracing::error!("initial build failed: {e}");
            }

            let _server = gemcheck::http::start(site.env().build_dir.clone(), config.serve.port);
            watch(site, Arc::new(reload))?;
        }
    }

    Ok(())
}

fn serve(site: &Site) -> anyhow::Result<()> {
    let handle = gemcheck::http::start(site.env().build_dir.clone(), site.config().serve.port);
    handle
        .join()
        .map_err(|_| anyhow!("HTTP server thread panicked"))?
}

fn watch(site: Arc<Site>, sink: Arc<dyn ReloadSink>) -> anyhow::Result<()> {
    let coordinator = WatchCoordinator::new(site, sink)?;

    for rule in coordinator.rules() {
        tracing::debug!(rule = %rule.name, tasks = ?rule.tasks, "watch rule");
    }

    tracing::info!("watching for changes...");
    coordinator.run().map_err(GemcheckError::from)?;
    Ok(())
}
