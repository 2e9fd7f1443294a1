//! Mail template lookup and caching.
//!
//! A message on `<exchange>` with action `<action>` uses the template
//! `<root>/<exchange>/<action>.tmpl` unless its mail data names an explicit
//! `templatePath`. Template sources are read once and kept for the life of
//! the process.

mod render;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{MailerError, Result};
use crate::mail::MailData;

pub use render::{render_template, RenderError};

/// File extension of implicit templates
pub const TEMPLATE_EXTENSION: &str = "tmpl";

/// Resolve the template file for a mail.
///
/// An explicit `template_path` wins; a relative one is taken from `root`.
/// Otherwise the path is derived from the exchange and action. Fails if the
/// resolved file does not exist.
pub fn resolve_template_path(
    root: &Path,
    exchange: &str,
    action: &str,
    mail: &MailData,
) -> Result<PathBuf> {
    let path = match &mail.template_path {
        // Joining an absolute path yields that path unchanged
        Some(explicit) => root.join(explicit),
        None => root
            .join(exchange)
            .join(format!("{}.{}", action, TEMPLATE_EXTENSION)),
    };

    if !path.exists() {
        return Err(MailerError::TemplateNotFound { path });
    }

    Ok(path)
}

/// Raw template sources keyed by resolved path.
///
/// Entries are never invalidated. Two tasks loading the same path at once
/// may both read the file; the first insert wins and both get its text.
#[derive(Debug, Default)]
pub struct TemplateCache {
    entries: DashMap<PathBuf, Arc<str>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached source for `path`, reading the file on first use.
    ///
    /// Read failures are returned and not cached.
    pub async fn get_or_load(&self, path: &Path) -> Result<Arc<str>> {
        if let Some(source) = self.entries.get(path) {
            return Ok(source.clone());
        }

        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| MailerError::TemplateRead {
                path: path.to_path_buf(),
                source,
            })?;

        let source = self
            .entries
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::from(text))
            .clone();

        tracing::debug!(path = %path.display(), "Template loaded into cache");
        Ok(source)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixtures() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/subscriptions")
    }

    fn mail_with_path(path: PathBuf) -> MailData {
        MailData {
            template_path: Some(path),
            ..MailData::to("nisse@blubb.com")
        }
    }

    #[test]
    fn test_resolve_implicit_path() {
        let root = fixtures();
        let mail = MailData::to("nisse@blubb.com");

        let path = resolve_template_path(&root, "foo", "blubb", &mail).unwrap();
        assert_eq!(path, root.join("foo").join("blubb.tmpl"));
    }

    #[test]
    fn test_resolve_missing_implicit_path() {
        let root = fixtures();
        let mail = MailData::to("nisse@blubb.com");

        let err = resolve_template_path(&root, "foo", "bar", &mail).unwrap_err();

        assert!(matches!(err, MailerError::TemplateNotFound { .. }));
        assert!(err.to_string().contains("bar.tmpl"));
    }

    #[test]
    fn test_resolve_explicit_path_wins() {
        let root = fixtures();
        let custom = root.join("testExchange").join("custom.tmpl");

        let mail = mail_with_path(custom.clone());

        let path = resolve_template_path(&root, "foo", "blubb", &mail).unwrap();
        assert_eq!(path, custom);
    }

    #[test]
    fn test_resolve_relative_explicit_path_from_root() {
        let root = fixtures();
        let mail = mail_with_path(PathBuf::from("testExchange/custom.tmpl"));

        let path = resolve_template_path(&root, "foo", "blubb", &mail).unwrap();
        assert_eq!(path, root.join("testExchange").join("custom.tmpl"));
    }

    #[test]
    fn test_relative_explicit_path_ignores_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("shared")).unwrap();
        std::fs::write(dir.path().join("shared/footer.tmpl"), "Bye").unwrap();
        // Resolvable from the crate root only if taken from the working directory
        let mail = mail_with_path(PathBuf::from("tests/fixtures/subscriptions/foo/blubb.tmpl"));

        assert!(resolve_template_path(dir.path(), "foo", "blubb", &mail).is_err());

        let mail = mail_with_path(PathBuf::from("shared/footer.tmpl"));
        let path = resolve_template_path(dir.path(), "foo", "blubb", &mail).unwrap();
        assert_eq!(path, dir.path().join("shared/footer.tmpl"));
    }

    #[test]
    fn test_resolve_missing_explicit_path() {
        let root = fixtures();
        let custom = root.join("testExchange").join("wupp.tmpl");

        let mail = mail_with_path(custom);

        let err = resolve_template_path(&root, "foo", "blubb", &mail).unwrap_err();
        assert!(err.to_string().contains("wupp.tmpl"));
    }

    #[tokio::test]
    async fn test_cache_serves_after_file_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("welcome.tmpl");
        std::fs::write(&path, "Hello <%= name %>").unwrap();

        let cache = TemplateCache::new();
        let first = cache.get_or_load(&path).await.unwrap();
        assert_eq!(&*first, "Hello <%= name %>");
        assert!(cache.contains(&path));

        std::fs::remove_file(&path).unwrap();
        let second = cache.get_or_load(&path).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_read_failure_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TemplateCache::new();

        // A directory exists but cannot be read as text
        let err = cache.get_or_load(dir.path()).await.unwrap_err();
        assert!(matches!(err, MailerError::TemplateRead { .. }));
        assert!(cache.is_empty());
    }
}
