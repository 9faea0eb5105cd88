pub mod test_helpers {
    use std::{fs, io, path::Path, sync::Arc};

    use axum::http::{header::SET_COOKIE, HeaderMap};
    use tempfile::TempDir;

    use crate::{
        middleware::csrf::{CsrfConfig, CsrfGuard, TokenSource},
        session::{CookieTracker, MemoryStore, Sha1Generator, SessionManager, SessionOptions},
    };

    /// Secret long enough for the CSRF guard.
    pub const TEST_CSRF_SECRET: &str = "123456789987654321";

    /// Write `files` (relative path, content) under `root/theme`, creating
    /// directories as needed.
    pub fn try_write_theme(root: &Path, theme: &str, files: &[(&str, &str)]) -> io::Result<()> {
        let base = root.join(theme);
        fs::create_dir_all(&base)?;
        for (name, content) in files {
            let path = base.join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, content)?;
        }
        Ok(())
    }

    /// Temporary template directory holding one theme.
    pub fn template_dir(theme: &str, files: &[(&str, &str)]) -> io::Result<TempDir> {
        let dir = TempDir::new()?;
        try_write_theme(dir.path(), theme, files)?;
        Ok(dir)
    }

    /// Session manager on an in-memory store, tracking ids in the
    /// `session` cookie.
    pub fn memory_session_manager() -> (Arc<SessionManager>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(SessionOptions::new(
            store.clone(),
            Arc::new(Sha1Generator::new("test")),
            Arc::new(CookieTracker::new("session", 0, false, "/", "")),
        ));
        (Arc::new(manager), store)
    }

    pub fn csrf_guard(from: TokenSource) -> Result<Arc<CsrfGuard>, crate::middleware::CsrfConfigError> {
        let mut config = CsrfConfig::new(TEST_CSRF_SECRET);
        config.from = from;
        Ok(Arc::new(CsrfGuard::new(config)?))
    }

    /// `name=value` pairs of every `Set-Cookie` header, ready to send back
    /// in a `Cookie` header.
    pub fn cookie_header(headers: &HeaderMap) -> String {
        headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .map(str::trim)
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Value of the named cookie set on a response.
    pub fn set_cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
        headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .filter_map(|pair| pair.split_once('='))
            .find(|(n, _)| n.trim() == name)
            .map(|(_, value)| value.trim().to_string())
    }
}

// Test-only shortcuts. Panic on error is acceptable here.
#[cfg(test)]
pub fn write_theme(root: &std::path::Path, theme: &str, files: &[(&str, &str)]) {
    if let Err(e) = test_helpers::try_write_theme(root, theme, files) {
        panic!("Failed to write theme {}: {}", theme, e);
    }
}

pub use test_helpers::{
    cookie_header, csrf_guard, memory_session_manager, set_cookie_value, template_dir,
    try_write_theme, TEST_CSRF_SECRET,
};
