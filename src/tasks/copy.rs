use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;

use crate::core::Environment;
use crate::error::TaskError;
use crate::output::copy_if_changed;
use crate::utils::split_glob;

/// Copies every file matched by `from` into `to` inside the output tree.
///
/// The path below each glob's static base is preserved, so
/// `src/images/**/*` copies `src/images/icons/a.svg` to `images/icons/a.svg`.
/// A glob without wildcards names a single file, which lands directly in `to`.
pub fn copy(env: &Environment, from: &[String], to: &str) -> Result<(), TaskError> {
    let mut pairs = Vec::new();

    for pattern in from {
        let (base, suffix) = split_glob(pattern);
        let base = match suffix.as_str() {
            "" => base.parent().map(Utf8Path::to_path_buf).unwrap_or_default(),
            _ => base,
        };
        let base = env.source(&base);

        for path in glob::glob(env.source(pattern).as_str())? {
            let path = Utf8PathBuf::try_from(path?)?;
            if path.is_dir() {
                continue;
            }

            let rel = path
                .strip_prefix(&base)
                .map_err(|_| TaskError::Path(path.clone(), base.clone()))?;

            let dst = env.output(to).join(rel);
            pairs.push((path, dst));
        }
    }

    let copied = pairs
        .par_iter()
        .map(|(src, dst)| copy_if_changed(src, dst))
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .filter(|&written| written)
        .count();

    tracing::debug!(to, matched = pairs.len(), copied, "copied files");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::{Mode, Profile};
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Environment) {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let env = Environment::new(root, &Config::default(), Mode::Build, Profile::Development);
        (dir, env)
    }

    fn touch(env: &Environment, path: &str, text: &str) {
        let path = env.source(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn test_copy_keeps_relative_structure() {
        let (_dir, env) = setup();
        touch(&env, "src/images/logo.png", "png");
        touch(&env, "src/images/icons/check.svg", "svg");

        copy(&env, &["src/images/**/*".into()], "images").unwrap();

        assert_eq!(fs::read_to_string(env.output("images/logo.png")).unwrap(), "png");
        assert_eq!(fs::read_to_string(env.output("images/icons/check.svg")).unwrap(), "svg");
    }

    #[test]
    fn test_copy_to_output_root() {
        let (_dir, env) = setup();
        touch(&env, "src/root/CNAME", "example.org");
        touch(&env, "src/root/robots.txt", "User-agent: *");

        copy(&env, &["src/root/*".into()], "").unwrap();

        assert!(env.output("CNAME").is_file());
        assert!(env.output("robots.txt").is_file());
    }

    #[test]
    fn test_copy_single_file() {
        let (_dir, env) = setup();
        touch(&env, "src/vendor/lib/app.js", "js");

        copy(&env, &["src/vendor/lib/app.js".into()], "vendor").unwrap();

        assert!(env.output("vendor/app.js").is_file());
    }

    #[test]
    fn test_copy_without_matches_is_a_no_op() {
        let (_dir, env) = setup();
        copy(&env, &["src/fonts/**/*".into()], "fonts").unwrap();
        assert!(!env.output("fonts").exists());
    }
}
