//! Where template text comes from.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::UNIX_EPOCH;

use parking_lot::RwLock;

use crate::config::TemplateConfig;
use crate::error::{SqlError, SqlResult};

const KEY_SEPARATOR: &str = "===";
const COMMENT: &str = "//";

/// Opaque marker that changes whenever the template source changes.
pub type Version = u64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplateText {
    pub sql: String,
    pub version: Option<Version>,
}

/// Resolves template ids (`namespace.command`) to template text.
pub trait TemplateSource: Send + Sync {
    fn load(&self, id: &str) -> SqlResult<TemplateText>;

    /// Live version of `id`, or `None` when the source keeps no marker.
    fn version(&self, id: &str) -> Option<Version>;
}

/// Split `namespace.command` at its last dot.
pub fn split_id(id: &str) -> SqlResult<(&str, &str)> {
    match id.rsplit_once('.') {
        Some((ns, cmd)) if !ns.is_empty() && !cmd.is_empty() => Ok((ns, cmd)),
        _ => Err(SqlError::TemplateNotFound { id: id.to_owned() }),
    }
}

/// Parse a namespace file: a key line, a `===` line, then SQL lines until the
/// next key. Blank lines and `//` comment lines are dropped.
pub fn parse_markdown(namespace: &str, text: &str) -> SqlResult<HashMap<String, String>> {
    let malformed = |reason: String| SqlError::render(namespace, reason);

    let mut templates = HashMap::new();
    let mut current: Option<String> = None;
    let mut body: Vec<&str> = Vec::new();

    let mut finish = |key: Option<String>, body: &mut Vec<&str>| -> SqlResult<()> {
        if let Some(key) = key {
            if templates.insert(key.clone(), body.join("\n")).is_some() {
                return Err(malformed(format!("duplicate template key '{key}'")));
            }
        }
        body.clear();
        Ok(())
    };

    for (n, line) in text.lines().enumerate() {
        let line = line.trim_end();
        if line.starts_with(KEY_SEPARATOR) {
            let key = body
                .pop()
                .map(|k| k.trim().to_owned())
                .ok_or_else(|| malformed(format!("'{KEY_SEPARATOR}' without a key at line {}", n + 1)))?;
            if current.is_none() && !body.is_empty() {
                return Err(malformed(format!("text before the first key at line {}", n + 1)));
            }
            finish(current.take(), &mut body)?;
            current = Some(key);
        } else if !line.trim().is_empty() && !line.trim_start().starts_with(COMMENT) {
            body.push(line);
        }
    }
    if current.is_none() && !body.is_empty() {
        return Err(malformed("no template keys found".to_owned()));
    }
    finish(current, &mut body)?;
    Ok(templates)
}

/// Namespace files under a root directory, one file per namespace:
/// `root/[product/]namespace.ext`. The product directory wins when present.
#[derive(Clone, Debug)]
pub struct FileSystemSource {
    root: PathBuf,
    extension: String,
    product: Option<String>,
}

impl FileSystemSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extension: "md".to_owned(),
            product: None,
        }
    }

    pub fn from_config(cfg: &TemplateConfig) -> Self {
        Self::new(cfg.root.clone()).with_extension(&cfg.extension)
    }

    pub fn with_extension(mut self, ext: &str) -> Self {
        self.extension = ext.trim_start_matches('.').to_owned();
        self
    }

    /// Prefer `root/<product>/` over `root/`.
    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_for(&self, namespace: &str) -> Option<PathBuf> {
        let file = format!("{namespace}.{}", self.extension);
        self.product
            .as_ref()
            .map(|p| self.root.join(p).join(&file))
            .filter(|p| p.is_file())
            .or_else(|| Some(self.root.join(&file)).filter(|p| p.is_file()))
    }

    fn modified(path: &Path) -> Option<Version> {
        let modified = std::fs::metadata(path).ok()?.modified().ok()?;
        let nanos = modified.duration_since(UNIX_EPOCH).ok()?.as_nanos();
        Some(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

impl TemplateSource for FileSystemSource {
    fn load(&self, id: &str) -> SqlResult<TemplateText> {
        let (namespace, command) = split_id(id)?;
        let not_found = || SqlError::TemplateNotFound { id: id.to_owned() };
        let path = self.file_for(namespace).ok_or_else(not_found)?;
        let text = std::fs::read_to_string(&path).map_err(|e| {
            tracing::debug!(sql_id = %id, path = %path.display(), error = %e, "template file unreadable");
            not_found()
        })?;
        let version = Self::modified(&path);
        let mut templates = parse_markdown(namespace, &text)?;
        let sql = templates.remove(command).ok_or_else(not_found)?;
        tracing::debug!(sql_id = %id, path = %path.display(), "template loaded");
        Ok(TemplateText { sql, version })
    }

    fn version(&self, id: &str) -> Option<Version> {
        let (namespace, _) = split_id(id).ok()?;
        Self::modified(&self.file_for(namespace)?)
    }
}

/// Templates held in memory; every insert bumps the entry's version.
#[derive(Debug, Default)]
pub struct InMemorySource {
    templates: RwLock<HashMap<String, TemplateText>>,
    clock: AtomicU64,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, id: impl Into<String>, sql: impl Into<String>) -> Self {
        self.insert(id, sql);
        self
    }

    pub fn insert(&self, id: impl Into<String>, sql: impl Into<String>) {
        let version = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
        self.templates.write().insert(
            id.into(),
            TemplateText {
                sql: sql.into(),
                version: Some(version),
            },
        );
    }

    /// Insert a template that carries no version marker.
    pub fn insert_unversioned(&self, id: impl Into<String>, sql: impl Into<String>) {
        self.templates.write().insert(
            id.into(),
            TemplateText {
                sql: sql.into(),
                version: None,
            },
        );
    }

    /// Add every template of a namespace file.
    pub fn insert_markdown(&self, namespace: &str, text: &str) -> SqlResult<()> {
        for (command, sql) in parse_markdown(namespace, text)? {
            self.insert(format!("{namespace}.{command}"), sql);
        }
        Ok(())
    }
}

impl TemplateSource for InMemorySource {
    fn load(&self, id: &str) -> SqlResult<TemplateText> {
        self.templates
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| SqlError::TemplateNotFound { id: id.to_owned() })
    }

    fn version(&self, id: &str) -> Option<Version> {
        self.templates.read().get(id).and_then(|t| t.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USERS: &str = "\
// user queries
findAll
===
// every user
SELECT * FROM users
ORDER BY id

findByName
===
SELECT * FROM users
WHERE name = :name
";

    #[test]
    fn parses_markdown_namespaces() {
        let t = parse_markdown("user", USERS).unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t["findAll"], "SELECT * FROM users\nORDER BY id");
        assert_eq!(t["findByName"], "SELECT * FROM users\nWHERE name = :name");
    }

    #[test]
    fn rejects_malformed_files() {
        assert!(parse_markdown("x", "===\nSELECT 1").is_err());
        assert!(parse_markdown("x", "one\ntwo\n===\nSELECT 1").is_err());
        assert!(parse_markdown("x", "SELECT 1").is_err());
        assert!(parse_markdown("x", "a\n===\nSELECT 1\na\n===\nSELECT 2").is_err());
        assert!(parse_markdown("x", "").unwrap().is_empty());
    }

    #[test]
    fn ids_split_at_last_dot() {
        assert_eq!(split_id("reports.sales.monthly").unwrap(), ("reports.sales", "monthly"));
        assert_eq!(split_id("$sql.findPage").unwrap(), ("$sql", "findPage"));
        assert!(split_id("nodot").is_err());
        assert!(split_id("trailing.").is_err());
    }

    #[test]
    fn file_source_prefers_product_directory() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir_all(dir.path().join("SQLite"))?;
        std::fs::write(dir.path().join("user.md"), "findAll\n===\nSELECT 'generic'")?;
        std::fs::write(dir.path().join("SQLite/user.md"), "findAll\n===\nSELECT 'sqlite'")?;
        std::fs::write(dir.path().join("order.md"), "count\n===\nSELECT COUNT(1) FROM orders")?;

        let src = FileSystemSource::new(dir.path()).with_product("SQLite");
        assert_eq!(src.load("user.findAll")?.sql, "SELECT 'sqlite'");
        assert_eq!(src.load("order.count")?.sql, "SELECT COUNT(1) FROM orders");
        assert!(src.version("user.findAll").is_some());

        let generic = FileSystemSource::new(dir.path());
        assert_eq!(generic.load("user.findAll")?.sql, "SELECT 'generic'");
        Ok(())
    }

    #[test]
    fn missing_files_and_keys_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("user.md"), "findAll\n===\nSELECT 1").unwrap();
        let src = FileSystemSource::new(dir.path());
        assert!(matches!(src.load("nope.findAll"), Err(SqlError::TemplateNotFound { id }) if id == "nope.findAll"));
        assert!(matches!(src.load("user.nope"), Err(SqlError::TemplateNotFound { .. })));
        assert!(src.version("nope.findAll").is_none());
    }

    #[test]
    fn in_memory_versions_advance() {
        let src = InMemorySource::new().with("a.b", "SELECT 1");
        let v1 = src.version("a.b");
        src.insert("a.b", "SELECT 2");
        assert_ne!(src.version("a.b"), v1);
        src.insert_unversioned("a.c", "SELECT 3");
        assert_eq!(src.version("a.c"), None);
        src.insert_markdown("user", USERS).unwrap();
        assert!(src.load("user.findByName").is_ok());
    }
}
