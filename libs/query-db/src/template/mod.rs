//! SQL templates addressed by `namespace.command` ids.
//!
//! The loader caches template text per id and renders it with the caller's
//! model on every call. Per id: unloaded, loaded (cached), stale once the
//! source reports a new version (checked when `auto_check` is on), then
//! loaded again.

mod resolver;
mod source;

pub use resolver::{SimpleResolver, TemplateResolver};
pub use source::{
    parse_markdown, split_id, FileSystemSource, InMemorySource, TemplateSource, TemplateText,
    Version,
};

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::binding::SqlParams;
use crate::config::TemplateConfig;
use crate::error::SqlResult;

/// Reserved namespace for the generic paging wrappers.
pub const RESERVED_NAMESPACE: &str = "$sql";
pub const FIND_PAGE_ID: &str = "$sql.findPage";
pub const FIND_TOTAL_ID: &str = "$sql.findTotal";

#[derive(Debug, Clone)]
struct Cached {
    sql: Arc<str>,
    version: Option<Version>,
}

pub struct SqlTemplateLoader {
    source: Arc<dyn TemplateSource>,
    resolver: Arc<dyn TemplateResolver>,
    cache: DashMap<String, Cached>,
    use_cache: Mutex<bool>,
    auto_check: bool,
}

impl std::fmt::Debug for SqlTemplateLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlTemplateLoader")
            .field("cached", &self.cache.len())
            .field("use_cache", &*self.use_cache.lock())
            .field("auto_check", &self.auto_check)
            .finish()
    }
}

impl SqlTemplateLoader {
    pub fn new(source: Arc<dyn TemplateSource>) -> Self {
        Self {
            source,
            resolver: Arc::new(SimpleResolver),
            cache: DashMap::new(),
            use_cache: Mutex::new(true),
            auto_check: true,
        }
    }

    /// File-backed loader configured from `cfg`; `product` selects the
    /// product-specific template directory.
    pub fn from_config(cfg: &TemplateConfig, product: Option<&str>) -> Self {
        let mut source = FileSystemSource::from_config(cfg);
        if let Some(p) = product {
            source = source.with_product(p);
        }
        let loader = Self::new(Arc::new(source)).with_auto_check(cfg.auto_check);
        loader.set_cache_enabled(cfg.cache);
        loader
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn TemplateResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_auto_check(mut self, auto_check: bool) -> Self {
        self.auto_check = auto_check;
        self
    }

    pub fn enable_cache(&self) {
        self.set_cache_enabled(true);
    }

    /// Turn caching off; cached entries are dropped.
    pub fn disable_cache(&self) {
        self.set_cache_enabled(false);
    }

    fn set_cache_enabled(&self, enabled: bool) {
        let mut flag = self.use_cache.lock();
        if *flag != enabled {
            *flag = enabled;
            if !enabled {
                self.cache.clear();
            }
            tracing::info!(enabled, "sql template cache toggled");
        }
    }

    pub fn is_cache_enabled(&self) -> bool {
        *self.use_cache.lock()
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Whether `id` exists in the source.
    pub fn contains(&self, id: &str) -> bool {
        self.cache.contains_key(id) || self.source.load(id).is_ok()
    }

    /// True when `id` is not cached or its source moved past the cached
    /// version. A cached template without a version marker stays fresh.
    pub fn is_modified(&self, id: &str) -> bool {
        let cached = self.cache.get(id).map(|c| c.version);
        match cached {
            None => true,
            Some(None) => false,
            Some(Some(v)) => self.source.version(id) != Some(v),
        }
    }

    /// Raw template text for `id`.
    pub fn template(&self, id: &str) -> SqlResult<Arc<str>> {
        if !self.is_cache_enabled() {
            return Ok(self.source.load(id)?.sql.into());
        }
        if self.auto_check && self.cache.contains_key(id) && self.is_modified(id) {
            tracing::debug!(sql_id = %id, "template changed, reloading");
            self.cache.remove(id);
        }
        // The shard stays locked while loading so concurrent first reads load once.
        let entry = self.cache.entry(id.to_owned()).or_try_insert_with(|| {
            self.source.load(id).map(|t| Cached {
                sql: t.sql.into(),
                version: t.version,
            })
        })?;
        Ok(Arc::clone(&entry.sql))
    }

    /// Render `id` with `model`.
    pub fn get_sql(&self, id: &str, model: &SqlParams) -> SqlResult<String> {
        let template = self.template(id)?;
        let sql = self.resolver.render(id, &template, model)?;
        tracing::trace!(sql_id = %id, sql = %sql, "template rendered");
        Ok(sql)
    }
}
