//! Pagination and count wrappers per database product.
//!
//! A trailing `ORDER BY` of the base statement is located and stripped so a
//! caller-supplied sort can replace it without two competing order clauses.
//! Each product gets its own [`Dialect`]; the shared code here only deals
//! with the order clause.

use std::fmt;
use std::sync::LazyLock;

use query_core::{QueryError, SortSpec};
use regex::Regex;

use crate::error::{SqlError, SqlResult};

static TRAILING_ORDER_BY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)order\s+by[^)]+").expect("static regex"));

static SORT_IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*$").expect("static regex"));

/// Alias of the wrapped base statement.
pub const INNER_ALIAS: &str = "Q_";
/// Alias of the statement wrapped for counting.
pub const COUNT_ALIAS: &str = "OUT_ALIAS";

/// Rows `offset + 1 ..= offset + limit`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageWindow {
    pub offset: u64,
    pub limit: u64,
}

impl PageWindow {
    pub fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }

    /// Upper row bound, inclusive.
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.limit)
    }
}

/// Split `sql` into the statement without its trailing `ORDER BY` and that
/// clause. Only an order clause that runs to the end of the statement is
/// taken; one inside a subquery is left alone.
pub fn split_order_by(sql: &str) -> (&str, Option<&str>) {
    let sql = sql.trim_end().trim_end_matches(';').trim_end();
    match TRAILING_ORDER_BY.find_iter(sql).last() {
        Some(m) if m.end() == sql.len() => (sql[..m.start()].trim_end(), Some(m.as_str().trim_end())),
        _ => (sql, None),
    }
}

/// `ORDER BY` text for a caller-supplied sort; `None` when the sort is empty.
///
/// Sort fields end up verbatim in SQL text, so each one must be a plain
/// (optionally dotted) identifier.
pub fn order_clause(sort: &SortSpec) -> Result<Option<String>, QueryError> {
    if sort.is_empty() {
        return Ok(None);
    }
    for key in sort.iter() {
        let field = key.path.to_string();
        if !SORT_IDENT.is_match(&field) {
            return Err(QueryError::MalformedSort { token: field });
        }
    }
    Ok(Some(format!("ORDER BY {}", sort.to_order_clause())))
}

/// Pagination strategy of one database product.
pub trait Dialect: Send + Sync + fmt::Debug {
    /// Product name this dialect is registered under.
    fn name(&self) -> &'static str;

    /// Wrap `base` (already stripped of its order clause) so that it yields
    /// the rows of `window` ordered by `order`.
    fn page_sql(&self, base: &str, order: Option<&str>, window: PageWindow) -> String;

    /// Count the rows of `base`; a trailing order clause is dropped first.
    fn count_sql(&self, base: &str) -> String {
        let (stripped, _) = split_order_by(base);
        format!("SELECT COUNT(1) FROM ({stripped}) {COUNT_ALIAS}")
    }
}

fn with_order(order: Option<&str>) -> String {
    order.map(|o| format!(" {o}")).unwrap_or_default()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl Dialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "MySQL"
    }

    fn page_sql(&self, base: &str, order: Option<&str>, w: PageWindow) -> String {
        format!(
            "SELECT * FROM ({base}) {INNER_ALIAS}{} LIMIT {}, {}",
            with_order(order),
            w.offset,
            w.limit
        )
    }
}

/// `ROWNUM` double nesting; the order clause stays in the innermost query.
#[derive(Debug, Clone, Copy, Default)]
pub struct OracleDialect;

impl Dialect for OracleDialect {
    fn name(&self) -> &'static str {
        "Oracle"
    }

    fn page_sql(&self, base: &str, order: Option<&str>, w: PageWindow) -> String {
        format!(
            "SELECT * FROM (SELECT {INNER_ALIAS}.*, ROWNUM RN_ FROM ({base}{}) {INNER_ALIAS} WHERE ROWNUM <= {}) WHERE RN_ > {}",
            with_order(order),
            w.end(),
            w.offset
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn page_sql(&self, base: &str, order: Option<&str>, w: PageWindow) -> String {
        limit_offset(base, order, w)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "SQLite"
    }

    fn page_sql(&self, base: &str, order: Option<&str>, w: PageWindow) -> String {
        limit_offset(base, order, w)
    }
}

fn limit_offset(base: &str, order: Option<&str>, w: PageWindow) -> String {
    format!(
        "SELECT * FROM ({base}) {INNER_ALIAS}{} LIMIT {} OFFSET {}",
        with_order(order),
        w.limit,
        w.offset
    )
}

/// `OFFSET ... FETCH` needs an order clause; `(SELECT NULL)` stands in.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerDialect;

impl Dialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "Microsoft SQL Server"
    }

    fn page_sql(&self, base: &str, order: Option<&str>, w: PageWindow) -> String {
        format!(
            "SELECT * FROM ({base}) {INNER_ALIAS} {} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
            order.unwrap_or("ORDER BY (SELECT NULL)"),
            w.offset,
            w.limit
        )
    }
}

static MYSQL: MySqlDialect = MySqlDialect;
static ORACLE: OracleDialect = OracleDialect;
static POSTGRES: PostgresDialect = PostgresDialect;
static SQLITE: SqliteDialect = SqliteDialect;
static SQLSERVER: SqlServerDialect = SqlServerDialect;

/// Map a driver-reported product name onto its dialect (case-insensitive
/// prefix match).
pub fn for_product_name(product: &str) -> SqlResult<&'static dyn Dialect> {
    let p = product.trim().to_ascii_lowercase();
    let dialect: &'static dyn Dialect = if p.starts_with("mysql") || p.starts_with("mariadb") {
        &MYSQL
    } else if p.starts_with("oracle") {
        &ORACLE
    } else if p.starts_with("postgres") {
        &POSTGRES
    } else if p.starts_with("sqlite") {
        &SQLITE
    } else if p.starts_with("microsoft sql server") || p.starts_with("sqlserver") {
        &SQLSERVER
    } else {
        return Err(SqlError::UnsupportedDialect {
            product: product.to_owned(),
        });
    };
    Ok(dialect)
}

/// Paged form of `base`: the caller's sort wins over the statement's own
/// trailing order clause, which is kept otherwise.
pub fn paged_sql(
    dialect: &dyn Dialect,
    base: &str,
    sort: &SortSpec,
    window: PageWindow,
) -> SqlResult<String> {
    let (stripped, own_order) = split_order_by(base);
    let requested = order_clause(sort)?;
    let order = requested.as_deref().or(own_order);
    Ok(dialect.page_sql(stripped, order, window))
}
