use std::fs;

use crate::core::Environment;
use crate::error::TaskError;
use crate::utils::normalize_path;

/// Empties the output tree, recreating the directory itself.
pub fn clean(env: &Environment) -> Result<(), TaskError> {
    let root = normalize_path(&env.root);
    let dir = normalize_path(&env.build_dir);

    if dir == root || !dir.starts_with(&root) {
        return Err(TaskError::Path(env.build_dir.clone(), env.root.clone()));
    }

    if fs::metadata(&dir).is_ok() {
        fs::remove_dir_all(&dir)?;
    }

    fs::create_dir_all(&dir)?;
    tracing::debug!(%dir, "cleaned the output tree");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::{Mode, Profile};
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_clean_removes_previous_output() {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let env = Environment::new(&root, &Config::default(), Mode::Build, Profile::Development);

        fs::create_dir_all(env.output("stale")).unwrap();
        fs::write(env.output("stale/old.css"), "x").unwrap();

        clean(&env).unwrap();

        assert!(env.build_dir.is_dir());
        assert_eq!(fs::read_dir(&env.build_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_clean_refuses_the_project_root() {
        let mut env = Environment::new("/site", &Config::default(), Mode::Build, Profile::Development);
        env.build_dir = env.root.clone();
        assert!(matches!(clean(&env), Err(TaskError::Path(..))));
    }

    #[test]
    fn test_clean_refuses_to_escape_the_root() {
        let dir = TempDir::new().unwrap();
        let base = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let root = base.join("project");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(base.join("precious")).unwrap();
        fs::write(base.join("precious/keep.txt"), "keep").unwrap();

        let config = Config::parse("[paths]\nbuild = \"../precious\"\n").unwrap();
        let env = Environment::new(&root, &config, Mode::Build, Profile::Development);

        assert!(matches!(clean(&env), Err(TaskError::Path(..))));
        assert!(base.join("precious/keep.txt").is_file());
    }

    #[test]
    fn test_clean_accepts_dotted_paths_inside_the_root() {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

        let config = Config::parse("[paths]\nbuild = \"./out/../build\"\n").unwrap();
        let env = Environment::new(&root, &config, Mode::Build, Profile::Development);

        clean(&env).unwrap();
        assert!(root.join("build").is_dir());
    }
}
