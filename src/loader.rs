//! Template loading for `include` and `render`.
//!
//! The evaluator resolves child templates through the [`TemplateLoader`]
//! trait and keeps parsed results in a [`TemplateCache`]. How the loader is
//! satisfied (an in-memory map, the filesystem, packaged resources) is up
//! to the caller.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::ast::Statement;
use crate::error::{Error, Result};
use crate::parser::Parser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    View,
    Partial,
}

#[async_trait]
pub trait TemplateLoader: Send + Sync {
    /// Maps a logical template name to a loadable path.
    fn resolve(&self, name: &str, kind: TemplateKind) -> String;

    /// Fetches template source. Failures surface as evaluation errors.
    async fn load(&self, path: &str) -> Result<String>;
}

/// Loader over an in-memory map, mainly for tests and embedded templates.
#[derive(Default)]
pub struct MemoryLoader {
    templates: HashMap<String, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.templates.insert(name.into(), source.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.templates.insert(name.into(), source.into());
    }
}

#[async_trait]
impl TemplateLoader for MemoryLoader {
    fn resolve(&self, name: &str, _kind: TemplateKind) -> String {
        name.to_string()
    }

    async fn load(&self, path: &str) -> Result<String> {
        self.templates
            .get(path)
            .cloned()
            .ok_or_else(|| Error::TemplateNotFound(path.to_string()))
    }
}

/// Filesystem loader that probes a list of location format strings and
/// returns the first hit. `{name}` in a format is replaced by the logical
/// template name.
pub struct FileLoader {
    view_locations: Vec<PathBuf>,
    partial_locations: Vec<PathBuf>,
}

impl FileLoader {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            view_locations: vec![root.join("{name}.liquid")],
            partial_locations: vec![
                root.join("partials").join("{name}.liquid"),
                root.join("{name}.liquid"),
            ],
        }
    }

    pub fn with_view_locations(mut self, locations: Vec<PathBuf>) -> Self {
        self.view_locations = locations;
        self
    }

    pub fn with_partial_locations(mut self, locations: Vec<PathBuf>) -> Self {
        self.partial_locations = locations;
        self
    }

    fn locations(&self, kind: TemplateKind) -> &[PathBuf] {
        match kind {
            TemplateKind::View => &self.view_locations,
            TemplateKind::Partial => &self.partial_locations,
        }
    }
}

#[async_trait]
impl TemplateLoader for FileLoader {
    fn resolve(&self, name: &str, kind: TemplateKind) -> String {
        let locations = self.locations(kind);
        for location in locations {
            let candidate = location.to_string_lossy().replace("{name}", name);
            if Path::new(&candidate).is_file() {
                return candidate;
            }
        }
        log::warn!("no location matched template '{name}', falling back to first format");
        locations
            .first()
            .map(|location| location.to_string_lossy().replace("{name}", name))
            .unwrap_or_else(|| name.to_string())
    }

    async fn load(&self, path: &str) -> Result<String> {
        match std::fs::read_to_string(path) {
            Ok(source) => Ok(source),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::TemplateNotFound(path.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Cache of parsed child templates keyed by resolved path. Reads share the
/// map; parsing happens outside the lock. Hot reload disables caching.
#[derive(Clone)]
pub struct TemplateCache {
    cache: Arc<RwLock<HashMap<String, Arc<Vec<Statement>>>>>,
    hot_reload: bool,
}

impl TemplateCache {
    pub fn new(hot_reload: bool) -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            hot_reload,
        }
    }

    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }

    pub async fn get_or_parse(
        &self,
        path: &str,
        loader: &dyn TemplateLoader,
        parser: &Parser,
    ) -> Result<Arc<Vec<Statement>>> {
        if !self.hot_reload {
            if let Ok(cache) = self.cache.read() {
                if let Some(statements) = cache.get(path) {
                    return Ok(Arc::clone(statements));
                }
            }
        }

        log::debug!("template cache miss, compiling '{path}'");
        let source = loader.load(path).await?;
        let statements = Arc::new(parser.parse(&source)?);

        if !self.hot_reload {
            if let Ok(mut cache) = self.cache.write() {
                cache.insert(path.to_string(), Arc::clone(&statements));
            }
        }
        Ok(statements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_loader() {
        let loader = MemoryLoader::new().with_template("header", "Hello");
        let path = loader.resolve("header", TemplateKind::Partial);
        assert_eq!(loader.load(&path).await.unwrap(), "Hello");
        assert!(matches!(
            loader.load("missing").await,
            Err(Error::TemplateNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_file_loader_probes_locations() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("partials")).unwrap();
        std::fs::write(dir.path().join("partials").join("card.liquid"), "card").unwrap();
        std::fs::write(dir.path().join("page.liquid"), "page").unwrap();

        let loader = FileLoader::new(dir.path());
        let card = loader.resolve("card", TemplateKind::Partial);
        assert!(card.contains("partials"));
        assert_eq!(loader.load(&card).await.unwrap(), "card");

        // Falls back past the partials directory.
        let page = loader.resolve("page", TemplateKind::Partial);
        assert_eq!(loader.load(&page).await.unwrap(), "page");
    }

    #[tokio::test]
    async fn test_cache_parses_once() {
        let loader = MemoryLoader::new().with_template("x", "a{{ 1 }}b");
        let parser = Parser::new();
        let cache = TemplateCache::new(false);
        let first = cache.get_or_parse("x", &loader, &parser).await.unwrap();
        let second = cache.get_or_parse("x", &loader, &parser).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_hot_reload_skips_cache() {
        let loader = MemoryLoader::new().with_template("x", "a");
        let parser = Parser::new();
        let cache = TemplateCache::new(true);
        let first = cache.get_or_parse("x", &loader, &parser).await.unwrap();
        let second = cache.get_or_parse("x", &loader, &parser).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
