use camino::Utf8Path;

use crate::core::{Environment, Profile};
use crate::error::{RenderError, TaskError};
use crate::output::write_if_changed;

/// Compiles a Sass entry point to CSS. Production output is compressed.
pub fn render(entry: &Utf8Path, profile: Profile) -> Result<String, RenderError> {
    let style = match profile {
        Profile::Development => grass::OutputStyle::Expanded,
        Profile::Production => grass::OutputStyle::Compressed,
    };

    let options = grass::Options::default().style(style);
    Ok(grass::from_path(entry, &options)?)
}

pub(crate) fn styles(env: &Environment, entry: &str, dest: &str) -> Result<(), TaskError> {
    let css = render(&env.source(entry), env.profile)?;
    write_if_changed(&env.output(dest), css.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use std::fs;
    use tempfile::TempDir;

    fn entry(dir: &TempDir, scss: &str) -> Utf8PathBuf {
        let path = Utf8PathBuf::try_from(dir.path().join("main.scss")).unwrap();
        fs::write(&path, scss).unwrap();
        path
    }

    #[test]
    fn test_render_nested_rules() {
        let dir = TempDir::new().unwrap();
        let path = entry(&dir, "$c: red;\n.list { li { color: $c; } }\n");

        let css = render(&path, Profile::Development).unwrap();
        assert!(css.contains(".list li"));
        assert!(css.contains("color: red"));
    }

    #[test]
    fn test_production_is_compressed() {
        let dir = TempDir::new().unwrap();
        let path = entry(&dir, ".a {\n  color: red;\n}\n");

        let css = render(&path, Profile::Production).unwrap();
        assert!(!css.contains('\n') || css.trim_end().lines().count() == 1);
        assert!(css.contains(".a{color:red}"));
    }

    #[test]
    fn test_syntax_error() {
        let dir = TempDir::new().unwrap();
        let path = entry(&dir, ".a { color: ");

        assert!(matches!(
            render(&path, Profile::Development),
            Err(RenderError::Sass(_))
        ));
    }
}
