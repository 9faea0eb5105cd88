use std::{
    path::{Path, PathBuf},
    sync::Weak,
};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{error, info, warn};
use walkdir::WalkDir;

use super::{RenderError, RenderOptions, Themes};

/// Every directory of the theme tree. The watcher is registered on each one
/// non-recursively, so directories created later are not picked up.
fn watch_list(base: &Path) -> Result<Vec<PathBuf>, RenderError> {
    let mut dirs = Vec::new();
    for entry in WalkDir::new(base).follow_links(true) {
        let entry = entry?;
        if entry.file_type().is_dir() {
            dirs.push(entry.into_path());
        }
    }
    Ok(dirs)
}

fn is_reload_event(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Recompile the theme described by `options` whenever one of its files
/// changes. The watcher stops when the returned handle is dropped or the
/// template set is gone.
pub(super) fn watch_theme(
    themes: Weak<Themes>,
    options: RenderOptions,
) -> Result<RecommendedWatcher, RenderError> {
    let dirs = watch_list(&options.base()?)?;
    let theme = options.theme.clone();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) if is_reload_event(&event.kind) => {
                let Some(themes) = themes.upgrade() else {
                    return;
                };
                info!("Reloading templates for theme '{}'", options.theme);
                if let Err(e) = themes.install(&options) {
                    error!(
                        "Reload of theme '{}' failed, keeping previous templates: {}",
                        options.theme, e
                    );
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Template watch error: {}", e),
        },
        Config::default(),
    )?;

    for dir in &dirs {
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
    }

    info!("Watching {} directories of theme '{}'", dirs.len(), theme);
    Ok(watcher)
}
