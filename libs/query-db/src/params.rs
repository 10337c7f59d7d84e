//! Named-parameter parsing and the parsed-statement cache.
//!
//! Rendered SQL uses `:name` / `:{name}` placeholders. Parsing splits the
//! text into literal fragments around those placeholders so the statement
//! can be emitted with driver placeholders (`?` or `$n`) and its values
//! bound positionally.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::binding::{bind_value, lookup, BindValue, SqlParams};
use crate::error::{SqlError, SqlResult};

/// Default number of parsed statements kept.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

const PARAMETER_SEPARATORS: &str = "\"':&,;()|=+-*%/\\<>^";

/// How positional placeholders are spelled by the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?` (MySQL, SQLite)
    Question,
    /// `$1`, `$2`, ... (PostgreSQL)
    Dollar,
}

/// One named placeholder occurrence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamedParam {
    pub name: String,
    /// Element of a list parameter, from `:name[i]`.
    pub index: Option<usize>,
}

impl NamedParam {
    fn from_token(token: &str) -> Self {
        if let Some(open) = token.find('[') {
            if let Some(idx) = token
                .strip_suffix(']')
                .and_then(|t| t[open + 1..].parse::<usize>().ok())
            {
                return Self {
                    name: token[..open].to_owned(),
                    index: Some(idx),
                };
            }
        }
        Self {
            name: token.to_owned(),
            index: None,
        }
    }
}

/// A statement split around its named placeholders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedSql {
    original: String,
    /// Always `params.len() + 1` entries.
    fragments: Vec<String>,
    params: Vec<NamedParam>,
    unnamed: usize,
}

fn is_separator(c: char) -> bool {
    c.is_whitespace() || PARAMETER_SEPARATORS.contains(c)
}

/// End (exclusive) of the quote or comment starting at `i`, if one starts there.
fn skip_quoted(chars: &[char], i: usize) -> Option<usize> {
    let next = chars.get(i + 1).copied();
    const SINGLE: &[char] = &['\''];
    const DOUBLE: &[char] = &['"'];
    const LINE_END: &[char] = &['\n'];
    const BLOCK_END: &[char] = &['*', '/'];
    let (stop, from) = match (chars[i], next) {
        ('\'', _) => (SINGLE, i + 1),
        ('"', _) => (DOUBLE, i + 1),
        ('-', Some('-')) => (LINE_END, i + 2),
        ('/', Some('*')) => (BLOCK_END, i + 2),
        _ => return None,
    };
    let end = (from..chars.len())
        .find(|&m| chars[m..].starts_with(stop))
        .map(|m| m + stop.len())
        .unwrap_or(chars.len());
    Some(end)
}

impl ParsedSql {
    /// Parse `sql`; `id` only labels errors.
    pub fn parse(id: &str, sql: &str) -> SqlResult<Self> {
        let chars: Vec<char> = sql.chars().collect();
        let mut fragments = Vec::new();
        let mut params = Vec::new();
        let mut unnamed = 0;
        let mut current = String::with_capacity(sql.len());
        let mut i = 0;

        while i < chars.len() {
            if let Some(end) = skip_quoted(&chars, i) {
                current.extend(&chars[i..end]);
                i = end;
                continue;
            }
            let c = chars[i];
            let next = chars.get(i + 1).copied();
            match (c, next) {
                // `::` cast
                (':', Some(':')) => {
                    current.push_str("::");
                    i += 2;
                }
                (':', Some('{')) => {
                    let start = i + 2;
                    let close = (start..chars.len())
                        .find(|&j| chars[j] == '}')
                        .ok_or_else(|| {
                            SqlError::render(id, format!("unterminated ':{{' parameter at {i}"))
                        })?;
                    let name: String = chars[start..close].iter().collect();
                    if name.is_empty() || name.contains([':', '{']) {
                        return Err(SqlError::render(
                            id,
                            format!("invalid parameter name ':{{{name}}}' at {i}"),
                        ));
                    }
                    fragments.push(std::mem::take(&mut current));
                    params.push(NamedParam::from_token(name.trim()));
                    i = close + 1;
                }
                (':', _) => {
                    let end = (i + 1..chars.len())
                        .find(|&j| is_separator(chars[j]))
                        .unwrap_or(chars.len());
                    if end - i > 1 {
                        let token: String = chars[i + 1..end].iter().collect();
                        fragments.push(std::mem::take(&mut current));
                        params.push(NamedParam::from_token(&token));
                    } else {
                        current.push(':');
                    }
                    i = end.max(i + 1);
                }
                // `\:` is a literal colon
                ('\\', Some(':')) => {
                    current.push(':');
                    i += 2;
                }
                // `??`, `?|`, `?&` are operators, not placeholders
                ('?', Some('?' | '|' | '&')) => {
                    current.push(c);
                    current.push(chars[i + 1]);
                    i += 2;
                }
                ('?', _) => {
                    unnamed += 1;
                    current.push('?');
                    i += 1;
                }
                _ => {
                    current.push(c);
                    i += 1;
                }
            }
        }
        fragments.push(current);

        Ok(Self {
            original: sql.to_owned(),
            fragments,
            params,
            unnamed,
        })
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn params(&self) -> &[NamedParam] {
        &self.params
    }

    pub fn named_count(&self) -> usize {
        self.params.len()
    }

    pub fn unnamed_count(&self) -> usize {
        self.unnamed
    }

    pub fn total_count(&self) -> usize {
        self.params.len() + self.unnamed
    }

    /// Statement text with driver placeholders in place of the named ones.
    pub fn to_sql(&self, style: PlaceholderStyle) -> String {
        let mut out = String::with_capacity(self.original.len());
        for (n, fragment) in self.fragments.iter().enumerate() {
            out.push_str(fragment);
            if n < self.params.len() {
                match style {
                    PlaceholderStyle::Question => out.push('?'),
                    PlaceholderStyle::Dollar => {
                        out.push('$');
                        out.push_str(&(n + 1).to_string());
                    }
                }
            }
        }
        out
    }

    /// Values for every placeholder, in statement order.
    pub fn bind_values(&self, params: &SqlParams) -> SqlResult<Vec<BindValue>> {
        if self.unnamed > 0 {
            return Err(SqlError::binding(
                "?",
                "inferred",
                "positional '?' placeholders cannot be bound from named parameters",
            ));
        }
        self.params
            .iter()
            .map(|p| {
                let value = lookup(params, &p.name, p.index)?;
                bind_value(&p.name, &value)
            })
            .collect()
    }
}

/// Bounded LRU of parsed statements keyed by their exact text.
///
/// A capacity of zero disables caching; every lookup parses afresh.
pub struct ParsedSqlCache {
    inner: Option<Mutex<LruCache<String, Arc<ParsedSql>>>>,
}

impl Default for ParsedSqlCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl std::fmt::Debug for ParsedSqlCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParsedSqlCache")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

impl ParsedSqlCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: NonZeroUsize::new(capacity).map(|c| Mutex::new(LruCache::new(c))),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn capacity(&self) -> usize {
        self.inner.as_ref().map_or(0, |c| c.lock().cap().get())
    }

    pub fn len(&self) -> usize {
        self.inner.as_ref().map_or(0, |c| c.lock().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Some(cache) = &self.inner {
            cache.lock().clear();
        }
    }

    /// Return the cached parse of `sql` or parse and remember it.
    pub fn get_or_parse(&self, id: &str, sql: &str) -> SqlResult<Arc<ParsedSql>> {
        let Some(cache) = &self.inner else {
            return ParsedSql::parse(id, sql).map(Arc::new);
        };
        if let Some(hit) = cache.lock().get(sql) {
            tracing::trace!(sql_id = %id, "parsed sql cache hit");
            return Ok(Arc::clone(hit));
        }
        // Parse outside the lock; a racing insert of the same text wins.
        let parsed = Arc::new(ParsedSql::parse(id, sql)?);
        let mut guard = cache.lock();
        Ok(Arc::clone(guard.get_or_insert(sql.to_owned(), || parsed)))
    }
}
