//! Themed HTML templates compiled from a directory tree, with optional
//! recompilation when files change.
//!
//! Each theme lives in `directory/theme`. Every template file becomes its own
//! [`minijinja::Environment`] holding the file plus everything it includes,
//! extends or imports, so a broken partial only fails the pages that use it
//! at compile time rather than at render time.

mod compile;
mod watch;

use std::{
    collections::HashMap,
    io,
    path::PathBuf,
    sync::Arc,
    time::Instant,
};

use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use minijinja::Environment;
use notify::RecommendedWatcher;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

pub use compile::{compile, is_fragment, references, MAX_DEPTH};

pub const DEFAULT_THEME: &str = "default";
pub const RENDER_DURATION_HEADER: &str = "X-Render-Duration";

const DEFAULT_DIRECTORY: &str = "templates";
const DEFAULT_CONTENT_TYPE: &str = "text/html";
const CHARSET_SUFFIX: &str = "; charset=UTF-8";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no render options given")]
    NoOptions,

    #[error("template set dir \"{}\" is not found", .0.display())]
    MissingDir(PathBuf),

    #[error("read template {path}: {source}")]
    Read { path: String, source: io::Error },

    #[error("template {0} is empty")]
    EmptyTemplate(String),

    #[error("template {0} nests more than 5 levels deep")]
    TooDeep(String),

    #[error("walk template dir: {0}")]
    Walk(#[from] walkdir::Error),

    #[error(transparent)]
    Template(#[from] minijinja::Error),

    #[error("template set \"{0}\" is undefined")]
    UndefinedSet(String),

    #[error("template \"{0}:{1}\" is undefined")]
    UndefinedTemplate(String, String),

    #[error("watch templates: {0}")]
    Watch(#[from] notify::Error),
}

/// Hook run on every fresh environment before templates are added; register
/// functions and filters here.
pub type ConfigureEnv = Arc<dyn Fn(&mut Environment<'static>) + Send + Sync>;

#[derive(Clone)]
pub struct RenderOptions {
    pub directory: PathBuf,
    pub theme: String,
    pub extensions: Vec<String>,
    /// Sent as `Content-Type`; a UTF-8 charset is appended.
    pub html_content_type: String,
    /// Recompile the theme whenever a file under it changes.
    pub watch: bool,
    pub configure: Option<ConfigureEnv>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_DIRECTORY),
            theme: DEFAULT_THEME.to_string(),
            extensions: vec![".tmpl".to_string(), ".html".to_string()],
            html_content_type: DEFAULT_CONTENT_TYPE.to_string(),
            watch: false,
            configure: None,
        }
    }
}

impl std::fmt::Debug for RenderOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderOptions")
            .field("directory", &self.directory)
            .field("theme", &self.theme)
            .field("extensions", &self.extensions)
            .field("html_content_type", &self.html_content_type)
            .field("watch", &self.watch)
            .field("configure", &self.configure.is_some())
            .finish()
    }
}

impl RenderOptions {
    pub fn with_configure(
        mut self,
        configure: impl Fn(&mut Environment<'static>) + Send + Sync + 'static,
    ) -> Self {
        self.configure = Some(Arc::new(configure));
        self
    }

    /// Fill unset fields with defaults.
    pub fn normalized(mut self) -> Self {
        if self.directory.as_os_str().is_empty() {
            self.directory = PathBuf::from(DEFAULT_DIRECTORY);
        }
        if self.theme.is_empty() {
            self.theme = DEFAULT_THEME.to_string();
        }
        if self.extensions.is_empty() {
            self.extensions = RenderOptions::default().extensions;
        }
        if self.html_content_type.is_empty() {
            self.html_content_type = DEFAULT_CONTENT_TYPE.to_string();
        }
        if !self.html_content_type.contains("charset") {
            self.html_content_type.push_str(CHARSET_SUFFIX);
        }
        self
    }

    /// Root directory of the theme; it must exist.
    pub fn base(&self) -> Result<PathBuf, RenderError> {
        let base = self.directory.join(&self.theme);
        if base.is_dir() {
            Ok(base)
        } else {
            Err(RenderError::MissingDir(base))
        }
    }
}

/// One compiled theme: relative path to the environment that renders it.
pub struct ThemeTemplates {
    pub options: RenderOptions,
    pub templates: HashMap<String, Environment<'static>>,
}

impl ThemeTemplates {
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[derive(Default)]
struct Themes {
    sets: RwLock<HashMap<String, Arc<ThemeTemplates>>>,
}

impl Themes {
    fn get(&self, theme: &str) -> Option<Arc<ThemeTemplates>> {
        self.sets.read().get(theme).cloned()
    }

    /// Compile then swap; on error the current theme stays in place.
    fn install(&self, options: &RenderOptions) -> Result<(), RenderError> {
        let compiled = compile(options)?;
        self.sets
            .write()
            .insert(options.theme.clone(), Arc::new(compiled));
        Ok(())
    }
}

/// All themes of an application. Cheap to clone; clones share templates and
/// watchers.
#[derive(Clone)]
pub struct TemplateSet {
    themes: Arc<Themes>,
    watchers: Arc<Mutex<HashMap<String, RecommendedWatcher>>>,
}

impl TemplateSet {
    /// Compile every theme. Any compile error is returned, so a server never
    /// starts with broken templates.
    pub fn new(options: Vec<RenderOptions>) -> Result<Self, RenderError> {
        if options.is_empty() {
            return Err(RenderError::NoOptions);
        }

        let set = Self {
            themes: Arc::new(Themes::default()),
            watchers: Arc::new(Mutex::new(HashMap::new())),
        };
        for option in options {
            set.set(option)?;
        }
        Ok(set)
    }

    /// (Re)compile one theme. A theme has at most one watcher: setting it
    /// again replaces the old watcher, or stops it when `watch` is off.
    pub fn set(&self, options: RenderOptions) -> Result<(), RenderError> {
        let options = options.normalized();
        self.themes.install(&options)?;
        info!(
            "Loaded theme '{}' from {}",
            options.theme,
            options.directory.display()
        );

        if options.watch {
            let theme = options.theme.clone();
            let watcher = watch::watch_theme(Arc::downgrade(&self.themes), options)?;
            self.watchers.lock().insert(theme, watcher);
        } else {
            self.watchers.lock().remove(&options.theme);
        }
        Ok(())
    }

    pub fn is_watched(&self, theme: &str) -> bool {
        self.watchers.lock().contains_key(theme)
    }

    pub fn theme(&self, theme: &str) -> Option<Arc<ThemeTemplates>> {
        self.themes.get(theme)
    }

    fn render_with_type<S: Serialize>(
        &self,
        theme: &str,
        name: &str,
        ctx: S,
    ) -> Result<(String, String), RenderError> {
        let compiled = self
            .themes
            .get(theme)
            .ok_or_else(|| RenderError::UndefinedSet(theme.to_string()))?;
        let env = compiled.templates.get(name).ok_or_else(|| {
            RenderError::UndefinedTemplate(theme.to_string(), name.to_string())
        })?;

        let body = env.get_template(name)?.render(ctx)?;
        Ok((body, compiled.options.html_content_type.clone()))
    }

    pub fn render<S: Serialize>(&self, theme: &str, name: &str, ctx: S) -> Result<String, RenderError> {
        self.render_with_type(theme, name, ctx).map(|(body, _)| body)
    }

    /// Render into a response. Failures become a 500 carrying the error text.
    pub fn html<S: Serialize>(&self, status: StatusCode, theme: &str, name: &str, ctx: S) -> Response {
        let started = Instant::now();

        let (body, content_type) = match self.render_with_type(theme, name, ctx) {
            Ok(rendered) => rendered,
            Err(e) => {
                error!("Failed to render {}:{}: {}", theme, name, e);
                return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
            }
        };

        let mut response = (status, body).into_response();
        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(&content_type) {
            headers.insert(CONTENT_TYPE, value);
        }
        headers.insert(
            RENDER_DURATION_HEADER,
            HeaderValue::from(started.elapsed().as_millis() as u64),
        );
        response
    }
}
