use std::{
    collections::{BTreeSet, HashMap},
    fs,
    path::{Component, Path},
};

use minijinja::Environment;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;
use walkdir::WalkDir;

use super::{RenderError, RenderOptions, ThemeTemplates};

/// How many levels of include/extends/import a template may pull in.
pub const MAX_DEPTH: usize = 5;

static REFERENCE_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\{%-?\s*(?:include|extends|import|from)\s+["']([^"']+)["']"#).unwrap()
});

static MACRO_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{%-?\s*macro\s").unwrap());

/// Read a template, refusing files with nothing but whitespace.
fn read_template(base: &Path, rel: &str) -> Result<String, RenderError> {
    let content = fs::read_to_string(base.join(rel)).map_err(|source| RenderError::Read {
        path: rel.to_string(),
        source,
    })?;
    if content.trim().is_empty() {
        return Err(RenderError::EmptyTemplate(rel.to_string()));
    }
    Ok(content)
}

/// Files holding only macro definitions are merged into the templates that
/// use them rather than served on their own.
pub fn is_fragment(content: &str) -> bool {
    MACRO_TAG.is_match(content)
}

fn has_known_extension(path: &str, extensions: &[String]) -> bool {
    extensions.iter().any(|ext| path.ends_with(ext.as_str()))
}

/// Paths referenced by `content` that carry one of `extensions`.
pub fn references(content: &str, extensions: &[String]) -> Vec<String> {
    REFERENCE_TAG
        .captures_iter(content)
        .map(|caps| caps[1].trim().to_string())
        .filter(|path| has_known_extension(path, extensions))
        .collect()
}

fn collect_dependencies(
    base: &Path,
    rel: &str,
    depth: usize,
    extensions: &[String],
    found: &mut BTreeSet<String>,
) -> Result<(), RenderError> {
    if depth >= MAX_DEPTH {
        return Err(RenderError::TooDeep(rel.to_string()));
    }

    let content = read_template(base, rel)?;
    for reference in references(&content, extensions) {
        collect_dependencies(base, &reference, depth + 1, extensions, found)?;
        found.insert(reference);
    }
    Ok(())
}

/// `a/b/c.html` regardless of the host's separator.
fn relative_name(base: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    let parts: Vec<&str> = rel
        .components()
        .map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect::<Option<_>>()?;
    Some(parts.join("/"))
}

fn build_environment(
    base: &Path,
    rel: &str,
    content: String,
    options: &RenderOptions,
) -> Result<Environment<'static>, RenderError> {
    let mut dependencies = BTreeSet::new();
    collect_dependencies(base, rel, 0, &options.extensions, &mut dependencies)?;

    let mut env = Environment::new();
    if let Some(configure) = &options.configure {
        configure(&mut env);
    }

    env.add_template_owned(rel.to_string(), content)?;
    for dependency in dependencies {
        if dependency == rel {
            continue;
        }
        let source = read_template(base, &dependency)?;
        env.add_template_owned(dependency, source)?;
    }
    Ok(env)
}

/// Compile every template of one theme.
pub fn compile(options: &RenderOptions) -> Result<ThemeTemplates, RenderError> {
    let base = options.base()?;
    let mut templates = HashMap::new();

    for entry in WalkDir::new(&base).follow_links(true).min_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(rel) = relative_name(&base, entry.path()) else {
            continue;
        };
        if !has_known_extension(&rel, &options.extensions) {
            continue;
        }

        let content = read_template(&base, &rel)?;
        if is_fragment(&content) {
            debug!("Skipping template fragment {}", rel);
            continue;
        }

        let env = build_environment(&base, &rel, content, options)?;
        templates.insert(rel, env);
    }

    debug!(
        "Compiled {} templates for theme '{}'",
        templates.len(),
        options.theme
    );
    Ok(ThemeTemplates {
        options: options.clone(),
        templates,
    })
}
