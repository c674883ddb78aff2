//! Watch mode maps filesystem changes to Build Runs.
//!
//! 1. **File watcher**: `notify` monitors the static base of every rule glob
//!    recursively, with a short debounce so a burst of saves arrives as one
//!    batch.
//! 2. **Dispatch**: every changed path is matched against the globs of each
//!    [`WatchRule`]. A rule that matches is triggered once per batch.
//! 3. **Rule workers**: each rule owns a worker thread running its plan.
//!    Triggers that arrive while a run is in progress collapse into a single
//!    queued rerun. Different rules run independently of each other.
//!
//! After a successful run the rule's [`ReloadScope`] goes to the
//! [`ReloadSink`]. A failed run is logged and the coordinator keeps watching.

use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::channel;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::new_debouncer;

use crate::Site;
use crate::config::WatchConfig;
use crate::core::{Environment, ReloadScope};
use crate::error::{GemcheckError, WatchError};
use crate::graph::ExecutionPlan;
use crate::reload::ReloadSink;
use crate::utils::{as_overhead, split_glob};

const DEBOUNCE: Duration = Duration::from_millis(250);

/// A set of globs paired with the tasks to rerun when a matching path
/// changes. The plan is resolved once, when the coordinator is built.
#[derive(Debug)]
pub struct WatchRule {
    pub name: String,
    pub globs: Vec<String>,
    pub tasks: Vec<String>,
    pub reload: ReloadScope,
    plan: ExecutionPlan,
    patterns: Vec<Pattern>,
    disabled: AtomicBool,
}

impl WatchRule {
    fn new(site: &Site, config: &WatchConfig) -> Result<Self, GemcheckError> {
        let plan = site
            .graph()
            .resolve_many(config.tasks.iter().map(String::as_str))?;

        let patterns = config
            .globs
            .iter()
            .map(|glob| Pattern::new(site.env().source(glob).as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(WatchError::from)?;

        Ok(Self {
            name: config.name(),
            globs: config.globs.clone(),
            tasks: config.tasks.clone(),
            reload: config.reload,
            plan,
            patterns,
            disabled: AtomicBool::new(false),
        })
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    /// Rules whose files cannot be watched stop reacting to changes.
    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    fn disable(&self, err: &WatchError) {
        if !self.disabled.swap(true, Ordering::SeqCst) {
            tracing::error!(rule = %self.name, "rule disabled: {err}");
        }
    }

    /// Whether an absolute path falls under one of the rule's globs.
    pub fn matches(&self, path: &Utf8Path) -> bool {
        self.patterns.iter().any(|p| p.matches_path(path.as_std_path()))
    }
}

/// Outcome of a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The worker was idle and starts a run.
    Started,
    /// A run is in progress; one rerun is now queued behind it.
    Queued,
    /// A rerun was already queued; this trigger folds into it.
    Coalesced,
}

#[derive(Debug, Default)]
struct Gate {
    running: bool,
    pending: bool,
    closed: bool,
}

type Shared = Arc<(Mutex<Gate>, Condvar)>;

fn lock(shared: &Shared) -> MutexGuard<'_, Gate> {
    shared.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Single-flight executor for one watch rule.
pub(crate) struct RuleWorker {
    shared: Shared,
    handle: Option<JoinHandle<()>>,
}

impl RuleWorker {
    pub(crate) fn spawn<F>(name: &str, job: F) -> Result<Self, WatchError>
    where
        F: Fn() + Send + 'static,
    {
        let shared = Shared::default();

        let handle = thread::Builder::new()
            .name(format!("watch:{name}"))
            .spawn({
                let shared = shared.clone();
                let name = name.to_string();
                move || worker_loop(&name, &shared, job)
            })?;

        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    pub(crate) fn trigger(&self) -> Trigger {
        let mut gate = lock(&self.shared);

        if gate.pending {
            return Trigger::Coalesced;
        }

        gate.pending = true;
        self.shared.1.notify_all();

        if gate.running {
            Trigger::Queued
        } else {
            Trigger::Started
        }
    }

    /// Blocks until the worker has nothing running or queued.
    pub(crate) fn wait_idle(&self) {
        let mut gate = lock(&self.shared);
        while gate.running || gate.pending {
            gate = self
                .shared
                .1
                .wait(gate)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

impl Drop for RuleWorker {
    fn drop(&mut self) {
        lock(&self.shared).closed = true;
        self.shared.1.notify_all();

        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
    }
}

fn worker_loop(name: &str, shared: &Shared, job: impl Fn()) {
    loop {
        {
            let mut gate = lock(shared);
            while !gate.pending && !gate.closed {
                gate = shared.1.wait(gate).unwrap_or_else(|p| p.into_inner());
            }
            if !gate.pending {
                return;
            }
            gate.pending = false;
            gate.running = true;
        }

        if catch_unwind(AssertUnwindSafe(&job)).is_err() {
            tracing::error!(rule = name, "watch job panicked");
        }

        lock(shared).running = false;
        shared.1.notify_all();
    }
}

/// Owns the watch rules and their workers.
pub struct WatchCoordinator {
    env: Environment,
    rules: Vec<Arc<WatchRule>>,
    workers: Vec<RuleWorker>,
}

impl WatchCoordinator {
    /// Resolves every rule against the task graph and starts one worker per
    /// rule. An unknown task in a rule is a construction error.
    pub fn new(site: Arc<Site>, sink: Arc<dyn ReloadSink>) -> Result<Self, GemcheckError> {
        let mut rules = Vec::new();
        let mut workers = Vec::new();

        for config in &site.config().watch {
            let rule = Arc::new(WatchRule::new(&site, config)?);

            let job = {
                let site = site.clone();
                let rule = rule.clone();
                let sink = sink.clone();
                move || run_rule(&site, &rule, sink.as_ref())
            };

            workers.push(RuleWorker::spawn(&rule.name, job)?);
            rules.push(rule);
        }

        Ok(Self {
            env: site.env().clone(),
            rules,
            workers,
        })
    }

    pub fn rules(&self) -> impl Iterator<Item = &WatchRule> {
        self.rules.iter().map(AsRef::as_ref)
    }

    /// Triggers every rule matching at least one of `paths`, once.
    pub fn dispatch(&self, paths: &[Utf8PathBuf]) -> Vec<(String, Trigger)> {
        self.rules
            .iter()
            .zip(&self.workers)
            .filter(|(rule, _)| !rule.is_disabled())
            .filter(|(rule, _)| paths.iter().any(|path| rule.matches(path)))
            .map(|(rule, worker)| {
                let trigger = worker.trigger();
                tracing::debug!(rule = %rule.name, ?trigger, "change detected");
                (rule.name.clone(), trigger)
            })
            .collect()
    }

    /// Blocks until no rule has a run in progress or queued.
    pub fn wait_idle(&self) {
        for worker in &self.workers {
            worker.wait_idle();
        }
    }

    /// Watches the filesystem until the event channel closes.
    ///
    /// A rule whose glob base cannot be resolved or registered is disabled;
    /// the remaining rules keep working.
    pub fn run(&self) -> Result<(), WatchError> {
        let (tx, rx) = channel();
        let mut debouncer = new_debouncer(DEBOUNCE, None, tx)?;

        let roots = self.resolve_roots();
        let watched: HashSet<_> = roots.iter().flatten().cloned().collect();

        for path in collapse_watch_paths(watched) {
            match debouncer.watch(&path, RecursiveMode::Recursive) {
                Ok(()) => tracing::info!("watching {path}"),
                Err(e) => self.disable_rules_under(&roots, &path, &e.into()),
            }
        }

        for result in rx {
            match result {
                Ok(events) => {
                    let mut paths = Vec::new();
                    for de in events {
                        if !matches!(
                            de.event.kind,
                            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                        ) {
                            continue;
                        }
                        for path in &de.event.paths {
                            if let Some(path) = Utf8Path::from_path(path) {
                                paths.push(path.to_path_buf());
                            }
                        }
                    }

                    if !paths.is_empty() {
                        self.dispatch(&paths);
                    }
                }
                Err(errors) => {
                    for e in errors {
                        tracing::error!("watch error: {e}");
                    }
                }
            }
        }

        Ok(())
    }
}

impl WatchCoordinator {
    /// Directories each rule needs watched, in rule order. A rule with a
    /// glob base that does not exist is disabled and gets no roots.
    fn resolve_roots(&self) -> Vec<Vec<Utf8PathBuf>> {
        self.rules
            .iter()
            .map(|rule| {
                let roots: Result<Vec<_>, _> = rule
                    .globs
                    .iter()
                    .map(|glob| resolve_watch_root(&self.env.source(glob)))
                    .collect();

                roots.unwrap_or_else(|e| {
                    rule.disable(&e);
                    Vec::new()
                })
            })
            .collect()
    }

    /// Disables every rule with a root below `path`, which failed to register.
    fn disable_rules_under(&self, roots: &[Vec<Utf8PathBuf>], path: &Utf8Path, err: &WatchError) {
        tracing::error!("couldn't watch {path}: {err}");
        for (rule, roots) in self.rules.iter().zip(roots) {
            if roots.iter().any(|root| root.starts_with(path)) {
                rule.disable(err);
            }
        }
    }
}

fn run_rule(site: &Site, rule: &WatchRule, sink: &dyn ReloadSink) {
    let s = std::time::Instant::now();
    tracing::info!(rule = %rule.name, "rebuilding {}", rule.tasks.join(", "));

    match site.run_plan(&rule.plan).into_result() {
        Ok(report) => {
            tracing::info!(
                rule = %rule.name,
                tasks = report.executions.len(),
                "rebuild complete {}",
                as_overhead(s)
            );
            sink.notify(rule.reload);
        }
        Err(e) => tracing::error!(rule = %rule.name, "{e}"),
    }
}

/// Directory to watch for an absolute glob: its static base, or the parent
/// directory when the glob names a single file. The base must exist.
fn resolve_watch_root(glob: &Utf8Path) -> Result<Utf8PathBuf, WatchError> {
    let (base, suffix) = split_glob(glob.as_str());
    let base = base.canonicalize_utf8()?;

    if suffix.as_str().is_empty() && base.is_file() {
        return Ok(base.parent().unwrap_or(&base).to_path_buf());
    }

    Ok(base)
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `/a` and `/a/b`, we only need to watch `/a` because
/// the watcher is recursive.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::{Mode, Profile};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::Receiver;
    use tempfile::TempDir;

    #[test]
    fn test_single_flight_queues_one_rerun() {
        let runs = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = channel();
        let (release_tx, release_rx) = channel::<()>();
        let release_rx = Mutex::new(release_rx);

        let worker = RuleWorker::spawn("test", {
            let runs = runs.clone();
            move || {
                runs.fetch_add(1, Ordering::SeqCst);
                started_tx.send(()).unwrap();
                release_rx.lock().unwrap().recv().unwrap();
            }
        })
        .unwrap();

        assert_eq!(worker.trigger(), Trigger::Started);
        started_rx.recv().unwrap();

        // Two events while the first run is still in progress.
        assert_eq!(worker.trigger(), Trigger::Queued);
        assert_eq!(worker.trigger(), Trigger::Coalesced);

        release_tx.send(()).unwrap();
        started_rx.recv().unwrap();
        release_tx.send(()).unwrap();

        worker.wait_idle();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_worker_survives_a_panicking_job() {
        let runs = Arc::new(AtomicUsize::new(0));
        let worker = RuleWorker::spawn("panics", {
            let runs = runs.clone();
            move || {
                runs.fetch_add(1, Ordering::SeqCst);
                panic!("boom");
            }
        })
        .unwrap();

        worker.trigger();
        worker.wait_idle();
        worker.trigger();
        worker.wait_idle();

        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    struct Recorder(Mutex<std::sync::mpsc::Sender<ReloadScope>>);

    impl ReloadSink for Recorder {
        fn notify(&self, scope: ReloadScope) {
            self.0.lock().unwrap().send(scope).ok();
        }
    }

    fn site(dir: &TempDir) -> (Arc<Site>, Receiver<ReloadScope>, Arc<dyn ReloadSink>) {
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let config = Config::parse(
            r#"
            [[task]]
            id = "root"
            action = { kind = "copy", from = ["src/root/*"], to = "" }

            [[task]]
            id = "styles"
            action = { kind = "styles", entry = "src/main.scss", dest = "main.css" }

            [[watch]]
            globs = ["src/root/*"]
            tasks = ["root"]

            [[watch]]
            name = "css"
            globs = ["src/**/*.scss"]
            tasks = ["styles"]
            reload = "stream"
            "#,
        )
        .unwrap();

        let env = Environment::new(&root, &config, Mode::Watch, Profile::Development);
        let site = Arc::new(Site::new(config, env).unwrap());
        let (tx, rx) = channel();
        let sink: Arc<dyn ReloadSink> = Arc::new(Recorder(Mutex::new(tx)));
        (site, rx, sink)
    }

    #[test]
    fn test_dispatch_routes_to_matching_rules() {
        let dir = TempDir::new().unwrap();
        let (site, rx, sink) = site(&dir);
        let root = site.env().root.clone();

        std::fs::create_dir_all(root.join("src/root")).unwrap();
        std::fs::write(root.join("src/root/CNAME"), "example.org").unwrap();
        std::fs::write(root.join("src/main.scss"), ".a { color: red; }").unwrap();

        let coordinator = WatchCoordinator::new(site.clone(), sink).unwrap();

        let triggered = coordinator.dispatch(&[root.join("src/root/CNAME")]);
        assert_eq!(triggered, [("root".to_string(), Trigger::Started)]);
        coordinator.wait_idle();
        assert_eq!(rx.recv().unwrap(), ReloadScope::Full);
        assert!(site.env().output("CNAME").is_file());

        let triggered = coordinator.dispatch(&[root.join("src/main.scss")]);
        assert_eq!(triggered, [("css".to_string(), Trigger::Started)]);
        coordinator.wait_idle();
        assert_eq!(rx.recv().unwrap(), ReloadScope::Stream);

        assert!(coordinator.dispatch(&[root.join("README.md")]).is_empty());
    }

    #[test]
    fn test_failed_run_sends_no_reload() {
        let dir = TempDir::new().unwrap();
        let (site, rx, sink) = site(&dir);
        let root = site.env().root.clone();

        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(root.join("src/main.scss"), ".a { color: ").unwrap();

        let coordinator = WatchCoordinator::new(site, sink).unwrap();
        coordinator.dispatch(&[root.join("src/main.scss")]);
        coordinator.wait_idle();

        assert!(rx.try_recv().is_err());
    }

    fn split_rules(dir: &TempDir) -> (WatchCoordinator, Utf8PathBuf) {
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        std::fs::create_dir_all(root.join("src/notes")).unwrap();
        std::fs::write(root.join("src/main.scss"), ".a { color: red; }").unwrap();
        std::fs::write(root.join("src/notes/a.txt"), "a").unwrap();

        let config = Config::parse(
            r#"
            [[task]]
            id = "styles"
            action = { kind = "styles", entry = "src/main.scss", dest = "main.css" }

            [[task]]
            id = "notes"
            action = { kind = "copy", from = ["src/notes/*"], to = "notes" }

            [[watch]]
            name = "broken"
            globs = ["missing/*", "src/*.scss"]
            tasks = ["styles"]

            [[watch]]
            name = "notes"
            globs = ["src/**/*.txt"]
            tasks = ["notes"]
            "#,
        )
        .unwrap();

        let env = Environment::new(&root, &config, Mode::Watch, Profile::Development);
        let site = Arc::new(Site::new(config, env).unwrap());
        let coordinator = WatchCoordinator::new(site, Arc::new(crate::reload::NoReload)).unwrap();
        (coordinator, root)
    }

    #[test]
    fn test_unresolvable_rule_is_disabled() {
        let dir = TempDir::new().unwrap();
        let (coordinator, root) = split_rules(&dir);

        let roots = coordinator.resolve_roots();
        assert!(roots[0].is_empty());
        assert_eq!(roots[1].len(), 1);

        let disabled: Vec<_> = coordinator
            .rules()
            .filter(|rule| rule.is_disabled())
            .map(|rule| rule.name.as_str())
            .collect();
        assert_eq!(disabled, ["broken"]);

        assert!(coordinator.dispatch(&[root.join("src/main.scss")]).is_empty());
        assert_eq!(
            coordinator.dispatch(&[root.join("src/notes/a.txt")]),
            [("notes".to_string(), Trigger::Started)]
        );
        coordinator.wait_idle();
    }

    #[test]
    fn test_registration_failure_disables_rules_below_the_path() {
        let dir = TempDir::new().unwrap();
        let (coordinator, root) = split_rules(&dir);

        let roots = vec![
            vec![root.join("src")],
            vec![Utf8PathBuf::from("/elsewhere")],
        ];
        let err = WatchError::Io(std::io::Error::other("inotify limit reached"));
        coordinator.disable_rules_under(&roots, &root, &err);

        let disabled: Vec<_> = coordinator.rules().map(|rule| rule.is_disabled()).collect();
        assert_eq!(disabled, [true, false]);
        assert!(coordinator.dispatch(&[root.join("src/main.scss")]).is_empty());
    }

    #[test]
    fn test_unknown_task_in_rule_is_rejected() {
        let config = Config::parse(
            "[[task]]\nid = \"a\"\n\n[[watch]]\nglobs = [\"*\"]\ntasks = [\"missing\"]\n",
        )
        .unwrap();
        let env = Environment::new("/site", &config, Mode::Watch, Profile::Development);
        let site = Arc::new(Site::new(config, env).unwrap());

        let result = WatchCoordinator::new(site, Arc::new(crate::reload::NoReload));
        assert!(matches!(result, Err(GemcheckError::Graph(_))));
    }

    #[test]
    fn test_resolve_watch_root() {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().canonicalize().unwrap()).unwrap();
        std::fs::create_dir_all(root.join("src/images")).unwrap();
        std::fs::write(root.join("src/CNAME"), "").unwrap();

        assert_eq!(
            resolve_watch_root(&root.join("src/images/**/*")).unwrap(),
            root.join("src/images")
        );
        assert_eq!(resolve_watch_root(&root.join("src/CNAME")).unwrap(), root.join("src"));
        assert!(resolve_watch_root(&root.join("missing/*")).is_err());
    }

    #[test]
    fn test_collapse_watch_paths() {
        let mut paths = HashSet::new();
        paths.insert(Utf8PathBuf::from("/a"));
        paths.insert(Utf8PathBuf::from("/a/b"));
        paths.insert(Utf8PathBuf::from("/a/b/c"));
        paths.insert(Utf8PathBuf::from("/b"));
        paths.insert(Utf8PathBuf::from("/c/d"));

        let collapsed = collapse_watch_paths(paths);

        assert_eq!(
            collapsed,
            vec![
                Utf8PathBuf::from("/a"),
                Utf8PathBuf::from("/b"),
                Utf8PathBuf::from("/c/d")
            ]
        );
    }

    #[test]
    fn test_collapse_watch_paths_similar_names() {
        let mut paths = HashSet::new();
        paths.insert(Utf8PathBuf::from("/foo"));
        paths.insert(Utf8PathBuf::from("/foo-bar"));

        let collapsed = collapse_watch_paths(paths);

        // /foo-bar is not a subdirectory of /foo
        assert_eq!(
            collapsed,
            vec![Utf8PathBuf::from("/foo"), Utf8PathBuf::from("/foo-bar")]
        );
    }
}
