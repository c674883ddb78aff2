use std::fmt::Display;
use std::sync::LazyLock;
use std::time::Instant;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use console::Style;
use indicatif::ProgressStyle;

const ANSI_BLUE: Style = Style::new().blue();

pub(crate) static STYLE_RUN: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .expect("Error setting progress bar template")
        .progress_chars("=>-")
});

pub(crate) static STYLE_TASK: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_spinner()
        .template("{spinner:.blue} {msg}")
        .expect("Error setting progress bar template")
});

pub fn as_overhead(s: Instant) -> impl Display {
    let f = format!("(+{}ms)", s.elapsed().as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Splits a glob into its static base directory and the wildcard suffix.
///
/// - `src/images/**/*` -> (`src/images`, `**/*`)
/// - `src/root/CNAME` -> (`src/root/CNAME`, ``)
pub(crate) fn split_glob(glob: &str) -> (Utf8PathBuf, Utf8PathBuf) {
    let path = Utf8Path::new(glob);
    let components: Vec<_> = path.components().collect();
    let split_idx = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or(components.len());

    let base = components.iter().take(split_idx).collect();
    let suffix = components.iter().skip(split_idx).collect();

    (base, suffix)
}

/// Resolves `.` and `..` components without touching the filesystem.
/// `..` never climbs above the root of an absolute path.
pub(crate) fn normalize_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut acc = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => match acc.components().next_back() {
                Some(Utf8Component::Normal(_)) => {
                    acc.pop();
                }
                Some(Utf8Component::RootDir | Utf8Component::Prefix(_)) => {}
                _ => acc.push(".."),
            },
            other => acc.push(other),
        }
    }
    acc
}
