//! Content transform: Markdown sections rendered into one page template.
//!
//! Every Markdown file becomes a section of the page. An optional YAML front
//! matter block sets the section title, a short description, and its position
//! (`order`, ties broken by path). The template receives:
//!
//! * `title`: title of the first section, or "Gem Check"
//! * `sections`: list of `{ title, description, slug, html }`
//! * `environment`: `"development"` or `"production"`
//! * `production`: boolean shortcut
//! * `refresh_script`: live reload client, only in watch mode

use std::fs;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use comrak::{Options, markdown_to_html};
use gray_matter::engine::YAML;
use gray_matter::{Matter, Pod};
use minijinja::context;
use serde::{Deserialize, Serialize};

use crate::core::{Environment, Profile};
use crate::error::{RenderError, TaskError};
use crate::output::write_if_changed;

const DEFAULT_TITLE: &str = "Gem Check";

/// A content file handed to the renderer.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: Utf8PathBuf,
    pub text: String,
}

/// Options recognized by [`render`].
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    pub profile: Profile,
    pub refresh_script: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FrontMatter {
    title: Option<String>,
    description: Option<String>,
    order: i64,
}

#[derive(Debug, Serialize)]
struct Section {
    title: String,
    description: Option<String>,
    slug: String,
    html: String,
    #[serde(skip)]
    order: i64,
    #[serde(skip)]
    path: Utf8PathBuf,
}

fn parse_section(file: &SourceFile) -> Result<Section, RenderError> {
    static PARSER: LazyLock<Matter<YAML>> = LazyLock::new(Matter::<YAML>::new);

    let malformed = |e: &dyn std::fmt::Display| RenderError::FrontMatter(file.path.clone(), e.to_string());

    let entity = PARSER.parse(&file.text).map_err(|e| malformed(&e))?;
    let matter = entity
        .data
        .unwrap_or_else(Pod::new_hash)
        .deserialize::<FrontMatter>()
        .map_err(|e| malformed(&e))?;

    let mut options = Options::default();
    options.extension.table = true;
    options.extension.strikethrough = true;
    options.extension.tasklist = true;
    options.extension.header_ids = Some("".to_string());

    let stem = file.path.file_stem().unwrap_or("section");
    let title = matter.title.unwrap_or_else(|| stem.to_string());

    Ok(Section {
        slug: slugify(&title),
        title,
        description: matter.description,
        html: markdown_to_html(&entity.content, &options),
        order: matter.order,
        path: file.path.clone(),
    })
}

fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// Renders the content files through `template` into a single HTML page.
pub fn render(
    sources: &[SourceFile],
    template: &str,
    options: &RenderOptions,
) -> Result<String, RenderError> {
    let mut sections = sources
        .iter()
        .map(parse_section)
        .collect::<Result<Vec<_>, _>>()?;

    sections.sort_by(|a, b| (a.order, &a.path).cmp(&(b.order, &b.path)));

    let title = sections
        .first()
        .map(|s| s.title.clone())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());

    let mut jinja = minijinja::Environment::new();
    jinja.add_template("page.html", template)?;

    let html = jinja.get_template("page.html")?.render(context! {
        title,
        sections,
        environment => options.profile.as_str(),
        production => options.profile == Profile::Production,
        refresh_script => options.refresh_script.as_deref(),
    })?;

    Ok(html)
}

fn read_sources(env: &Environment, pattern: &str) -> Result<Vec<SourceFile>, TaskError> {
    let mut paths = Vec::new();
    for path in glob::glob(env.source(pattern).as_str())? {
        paths.push(Utf8PathBuf::try_from(path?)?);
    }
    paths.sort();

    if paths.is_empty() {
        return Err(RenderError::NoContent(pattern.to_string()).into());
    }

    paths
        .into_iter()
        .map(|path| -> Result<SourceFile, TaskError> {
            let text = fs::read_to_string(&path)?;
            let path = path
                .strip_prefix(&env.root)
                .map(Utf8Path::to_path_buf)
                .unwrap_or(path);
            Ok(SourceFile { path, text })
        })
        .collect()
}

pub(crate) fn html(
    env: &Environment,
    content: &str,
    template: &str,
    dest: &str,
) -> Result<(), TaskError> {
    let sources = read_sources(env, content)?;
    let template = fs::read_to_string(env.source(template)).map_err(RenderError::Io)?;

    let options = RenderOptions {
        profile: env.profile,
        refresh_script: env.get_refresh_script(),
    };

    let page = render(&sources, &template, &options)?;
    write_if_changed(&env.output(dest), page.as_bytes())?;

    Ok(())
}
