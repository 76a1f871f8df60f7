//! Loading of `xsl:import` and `xsl:include` targets.

use crate::error::XsltError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A loaded stylesheet module.
#[derive(Debug, Clone)]
pub struct Resolved {
    /// Identifies the module in diagnostics and cycle checks, and is the
    /// base for hrefs inside it.
    pub id: String,
    pub source: String,
}

pub trait StylesheetResolver {
    /// Loads `href` as written in a module whose id is `base` (`None` for
    /// the main stylesheet).
    fn resolve(&self, href: &str, base: Option<&str>) -> Result<Resolved, XsltError>;
}

/// Resolves hrefs against the local file system, confined to `base_dir`.
#[derive(Debug, Clone)]
pub struct FileSystemResolver {
    base_dir: PathBuf,
}

impl FileSystemResolver {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

fn import_error(href: &str, message: impl Into<String>) -> XsltError {
    XsltError::Import {
        href: href.to_string(),
        message: message.into(),
    }
}

/// `scheme:` prefixes other than `file:`. A single letter is a Windows drive.
fn remote_scheme(href: &str) -> Option<&str> {
    let (scheme, _) = href.split_once(':')?;
    let is_scheme = scheme.len() > 1
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    (is_scheme && !scheme.eq_ignore_ascii_case("file")).then_some(scheme)
}

impl StylesheetResolver for FileSystemResolver {
    fn resolve(&self, href: &str, base: Option<&str>) -> Result<Resolved, XsltError> {
        if let Some(scheme) = remote_scheme(href) {
            return Err(import_error(
                href,
                format!("'{}:' locations are not allowed, only local files", scheme),
            ));
        }
        let relative = href.strip_prefix("file://").unwrap_or(href);
        let directory = base
            .map(Path::new)
            .and_then(Path::parent)
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or(&self.base_dir);
        let candidate = directory.join(relative);

        let root = self
            .base_dir
            .canonicalize()
            .map_err(|e| import_error(href, format!("base directory unavailable: {}", e)))?;
        let path = candidate
            .canonicalize()
            .map_err(|e| import_error(href, e.to_string()))?;
        if !path.starts_with(&root) {
            return Err(import_error(href, "the file is outside the stylesheet directory"));
        }
        let source =
            std::fs::read_to_string(&path).map_err(|e| import_error(href, e.to_string()))?;
        log::debug!("Loaded stylesheet module {}", path.display());
        Ok(Resolved {
            id: path.display().to_string(),
            source,
        })
    }
}

/// In-memory modules keyed by href.
impl StylesheetResolver for HashMap<String, String> {
    fn resolve(&self, href: &str, _base: Option<&str>) -> Result<Resolved, XsltError> {
        self.get(href)
            .map(|source| Resolved {
                id: href.to_string(),
                source: source.clone(),
            })
            .ok_or_else(|| import_error(href, "no such stylesheet"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_hrefs_are_refused() {
        let resolver = FileSystemResolver::new(".");
        for href in ["http://example.com/a.xsl", "https://x/a.xsl", "ftp://x/a.xsl"] {
            let err = resolver.resolve(href, None).unwrap_err();
            assert!(err.to_string().contains("not allowed"), "{}", err);
        }
        assert_eq!(remote_scheme("C:/styles/a.xsl"), None);
        assert_eq!(remote_scheme("file:///tmp/a.xsl"), None);
    }

    #[test]
    fn resolves_relative_to_the_including_module() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("lib/a.xsl"), "<a/>").unwrap();
        std::fs::write(dir.path().join("lib/b.xsl"), "<b/>").unwrap();
        let resolver = FileSystemResolver::new(dir.path());

        let a = resolver.resolve("lib/a.xsl", None).unwrap();
        assert_eq!(a.source, "<a/>");
        let b = resolver.resolve("b.xsl", Some(&a.id)).unwrap();
        assert_eq!(b.source, "<b/>");
    }

    #[test]
    fn escaping_the_base_directory_fails() {
        let outer = tempfile::tempdir().unwrap();
        let inner = outer.path().join("site");
        std::fs::create_dir(&inner).unwrap();
        std::fs::write(outer.path().join("secret.xsl"), "<s/>").unwrap();
        let resolver = FileSystemResolver::new(&inner);
        let err = resolver.resolve("../secret.xsl", None).unwrap_err();
        assert!(err.to_string().contains("outside"));
    }

    #[test]
    fn missing_files_are_import_errors() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = FileSystemResolver::new(dir.path());
        assert!(matches!(
            resolver.resolve("nope.xsl", None),
            Err(XsltError::Import { .. })
        ));
    }
}
