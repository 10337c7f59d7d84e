//! Template-driven statement execution.
//!
//! [`SqlEngine`] ties the pieces together: render a template, parse its
//! named parameters (memoized), bind the caller's values and run the result
//! on an [`SqlExecutor`]. The executor is passed per call; the engine keeps
//! only the template loader and the parse cache.

use std::sync::Arc;

use query_core::{Page, QueryError, QueryRequest, SortSpec};
use serde::de::DeserializeOwned;

use crate::binding::{BindValue, SqlParams};
use crate::config::TemplateConfig;
use crate::dialect::{self, PageWindow};
use crate::error::{SqlError, SqlResult};
use crate::executor::{Row, SqlExecutor};
use crate::params::{ParsedSqlCache, DEFAULT_CACHE_CAPACITY};
use crate::template::{SqlTemplateLoader, FIND_PAGE_ID, FIND_TOTAL_ID};

#[derive(Debug)]
pub struct SqlEngine {
    loader: Arc<SqlTemplateLoader>,
    parsed: ParsedSqlCache,
}

impl SqlEngine {
    pub fn new(loader: Arc<SqlTemplateLoader>) -> Self {
        Self::with_cache(loader, ParsedSqlCache::new(DEFAULT_CACHE_CAPACITY))
    }

    pub fn with_cache(loader: Arc<SqlTemplateLoader>, parsed: ParsedSqlCache) -> Self {
        Self { loader, parsed }
    }

    /// File-backed engine; `product` picks the product template directory.
    pub fn from_config(cfg: &TemplateConfig, parse_cache_capacity: usize, product: Option<&str>) -> Self {
        let loader = SqlTemplateLoader::from_config(cfg, product);
        Self::with_cache(Arc::new(loader), ParsedSqlCache::new(parse_cache_capacity))
    }

    pub fn loader(&self) -> &SqlTemplateLoader {
        &self.loader
    }

    pub fn parse_cache(&self) -> &ParsedSqlCache {
        &self.parsed
    }

    /// Executable SQL text and positional values for rendered `sql`.
    fn prepare(
        &self,
        exec: &dyn SqlExecutor,
        id: &str,
        sql: &str,
        params: &SqlParams,
    ) -> SqlResult<(String, Vec<BindValue>)> {
        let parsed = self.parsed.get_or_parse(id, sql)?;
        let values = parsed.bind_values(params)?;
        let text = parsed.to_sql(exec.placeholder_style());
        tracing::debug!(sql_id = %id, sql = %text, params = values.len(), "prepared statement");
        Ok((text, values))
    }

    async fn run_query(
        &self,
        exec: &dyn SqlExecutor,
        id: &str,
        sql: &str,
        params: &SqlParams,
    ) -> SqlResult<Vec<Row>> {
        let (text, values) = self.prepare(exec, id, sql, params)?;
        exec.query(&text, values).await.map_err(|e| {
            tracing::debug!(sql_id = %id, sql = %text, error = %e, "query failed");
            SqlError::execution(id, e)
        })
    }

    async fn run_count(
        &self,
        exec: &dyn SqlExecutor,
        id: &str,
        sql: &str,
        params: &SqlParams,
    ) -> SqlResult<u64> {
        let rows = self.run_query(exec, id, sql, params).await?;
        let value = rows.first().and_then(|r| r.values().next());
        value
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .ok_or_else(|| SqlError::RowMapping {
                statement: id.to_owned(),
                reason: "count statement returned no numeric value".to_owned(),
            })
    }

    /// All rows of `id`.
    pub async fn list(
        &self,
        exec: &dyn SqlExecutor,
        id: &str,
        params: &SqlParams,
    ) -> SqlResult<Vec<Row>> {
        let sql = self.loader.get_sql(id, params)?;
        self.run_query(exec, id, &sql, params).await
    }

    /// First row of `id`, if any.
    pub async fn find_one(
        &self,
        exec: &dyn SqlExecutor,
        id: &str,
        params: &SqlParams,
    ) -> SqlResult<Option<Row>> {
        Ok(self.list(exec, id, params).await?.into_iter().next())
    }

    pub async fn list_as<T: DeserializeOwned>(
        &self,
        exec: &dyn SqlExecutor,
        id: &str,
        params: &SqlParams,
    ) -> SqlResult<Vec<T>> {
        let rows = self.list(exec, id, params).await?;
        rows.into_iter().map(|r| map_row(id, r)).collect()
    }

    pub async fn find_one_as<T: DeserializeOwned>(
        &self,
        exec: &dyn SqlExecutor,
        id: &str,
        params: &SqlParams,
    ) -> SqlResult<Option<T>> {
        self.find_one(exec, id, params)
            .await?
            .map(|r| map_row(id, r))
            .transpose()
    }

    /// Row count of `id`. A dedicated `count_id` statement is run as is;
    /// otherwise `id` is wrapped in `SELECT COUNT(1) FROM (...)`.
    pub async fn count(
        &self,
        exec: &dyn SqlExecutor,
        id: &str,
        count_id: Option<&str>,
        params: &SqlParams,
    ) -> SqlResult<u64> {
        match count_id {
            Some(cid) => {
                let sql = self.loader.get_sql(cid, params)?;
                self.run_count(exec, cid, &sql, params).await
            }
            None => {
                let dialect = dialect::for_product_name(exec.product_name())?;
                let sql = dialect.count_sql(&self.loader.get_sql(id, params)?);
                self.run_count(exec, id, &sql, params).await
            }
        }
    }

    /// Insert, update or delete; returns affected rows.
    pub async fn execute(
        &self,
        exec: &dyn SqlExecutor,
        id: &str,
        params: &SqlParams,
    ) -> SqlResult<u64> {
        let sql = self.loader.get_sql(id, params)?;
        let (text, values) = self.prepare(exec, id, &sql, params)?;
        exec.execute(&text, values).await.map_err(|e| {
            tracing::debug!(sql_id = %id, sql = %text, error = %e, "execute failed");
            SqlError::execution(id, e)
        })
    }

    /// Run `id` once per parameter set. The template is rendered once, with
    /// the first set as its model. Affected counts come back in input order
    /// whether or not the executor batches natively.
    pub async fn execute_batch(
        &self,
        exec: &dyn SqlExecutor,
        id: &str,
        batch: &[SqlParams],
    ) -> SqlResult<Vec<u64>> {
        let Some(first) = batch.first() else {
            return Ok(Vec::new());
        };
        let sql = self.loader.get_sql(id, first)?;
        let parsed = self.parsed.get_or_parse(id, &sql)?;
        let text = parsed.to_sql(exec.placeholder_style());
        let values = batch
            .iter()
            .map(|p| parsed.bind_values(p))
            .collect::<SqlResult<Vec<_>>>()?;
        tracing::debug!(sql_id = %id, sql = %text, rows = values.len(), native = exec.supports_batch(), "executing batch");

        let fail = |e: sqlx::Error| {
            tracing::debug!(sql_id = %id, sql = %text, error = %e, "batch failed");
            SqlError::execution(id, e)
        };
        if exec.supports_batch() {
            return exec.execute_batch(&text, values).await.map_err(fail);
        }
        let mut counts = Vec::with_capacity(values.len());
        for v in values {
            counts.push(exec.execute(&text, v).await.map_err(fail)?);
        }
        Ok(counts)
    }

    /// Rows `offset + 1 ..= offset + limit` of `id` plus the unpaged total.
    ///
    /// `$sql.findPage` / `$sql.findTotal` wrap the statement when the
    /// template source provides both; the product dialect does otherwise.
    pub async fn find_page(
        &self,
        exec: &dyn SqlExecutor,
        id: &str,
        params: &SqlParams,
        sort: &SortSpec,
        offset: u64,
        limit: u64,
    ) -> SqlResult<Page<Row>> {
        let dialect = dialect::for_product_name(exec.product_name())?;
        let start = sql_int("offset", offset)?;
        let rows = sql_int("limit", limit)?;
        let window = PageWindow::new(offset, limit);
        let base = self.loader.get_sql(id, params)?;

        let (page_sql, total_sql) =
            if self.loader.contains(FIND_PAGE_ID) && self.loader.contains(FIND_TOTAL_ID) {
                let (stripped, own_order) = dialect::split_order_by(&base);
                let requested = dialect::order_clause(sort)?;
                let ordered = match requested.as_deref().or(own_order) {
                    Some(order) => format!("{stripped} {order}"),
                    None => stripped.to_owned(),
                };
                let page_model = SqlParams::new()
                    .with("sqlTxt", ordered)
                    .with("start", start)
                    .with("limit", rows)
                    .with("end", sql_int("offset + limit", window.end())?);
                let total_model = SqlParams::new().with("sqlTxt", stripped);
                (
                    self.loader.get_sql(FIND_PAGE_ID, &page_model)?,
                    self.loader.get_sql(FIND_TOTAL_ID, &total_model)?,
                )
            } else {
                (
                    dialect::paged_sql(dialect, &base, sort, window)?,
                    dialect.count_sql(&base),
                )
            };

        let total = self.run_count(exec, id, &total_sql, params).await?;
        let content = if offset >= total {
            Vec::new()
        } else {
            self.run_query(exec, id, &page_sql, params).await?
        };
        Ok(Page::new(content, offset, limit, total))
    }

    /// [`find_page`](Self::find_page) with the sort and window of `req`.
    pub async fn find_page_for(
        &self,
        exec: &dyn SqlExecutor,
        id: &str,
        params: &SqlParams,
        req: &QueryRequest,
    ) -> SqlResult<Page<Row>> {
        let sort = SortSpec::parse(&req.sort)?;
        self.find_page(exec, id, params, &sort, req.offset, req.limit).await
    }

    pub async fn find_page_as<T: DeserializeOwned>(
        &self,
        exec: &dyn SqlExecutor,
        id: &str,
        params: &SqlParams,
        sort: &SortSpec,
        offset: u64,
        limit: u64,
    ) -> SqlResult<Page<T>> {
        let page = self.find_page(exec, id, params, sort, offset, limit).await?;
        let content = page
            .content
            .into_iter()
            .map(|r| map_row(id, r))
            .collect::<SqlResult<Vec<T>>>()?;
        Ok(Page {
            content,
            page_index: page.page_index,
            total: page.total,
            page_size: page.page_size,
        })
    }
}

/// Window bounds are bound as SQL integers, which are signed.
fn sql_int(what: &str, n: u64) -> SqlResult<i64> {
    i64::try_from(n).map_err(|_| {
        SqlError::Query(QueryError::InvalidRequest(format!(
            "{what} {n} exceeds the SQL integer range"
        )))
    })
}

fn map_row<T: DeserializeOwned>(id: &str, row: Row) -> SqlResult<T> {
    serde_json::from_value(serde_json::Value::Object(row)).map_err(|e| SqlError::RowMapping {
        statement: id.to_owned(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::PlaceholderStyle;
    use crate::template::{InMemorySource, TemplateSource};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Records statements and answers every query with one count row.
    #[derive(Default)]
    struct Recorder {
        product: &'static str,
        seen: Mutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl SqlExecutor for Recorder {
        fn product_name(&self) -> &str {
            self.product
        }

        fn placeholder_style(&self) -> PlaceholderStyle {
            PlaceholderStyle::Dollar
        }

        async fn query(&self, sql: &str, values: Vec<BindValue>) -> Result<Vec<Row>, sqlx::Error> {
            self.seen.lock().push((sql.to_owned(), values.len()));
            let mut row = Row::new();
            row.insert("c".into(), 42.into());
            Ok(vec![row])
        }

        async fn execute(&self, sql: &str, values: Vec<BindValue>) -> Result<u64, sqlx::Error> {
            self.seen.lock().push((sql.to_owned(), values.len()));
            Ok(1)
        }
    }

    fn engine(src: InMemorySource) -> SqlEngine {
        let src: Arc<dyn TemplateSource> = Arc::new(src);
        SqlEngine::new(Arc::new(SqlTemplateLoader::new(src)))
    }

    #[tokio::test]
    async fn count_wraps_without_order() {
        let e = engine(InMemorySource::new().with("u.all", "SELECT * FROM users WHERE age > :age ORDER BY id"));
        let rec = Recorder { product: "PostgreSQL", ..Default::default() };
        let n = e.count(&rec, "u.all", None, &SqlParams::new().with("age", 30)).await.unwrap();
        assert_eq!(n, 42);
        let seen = rec.seen.lock();
        assert_eq!(seen[0].0, "SELECT COUNT(1) FROM (SELECT * FROM users WHERE age > $1) OUT_ALIAS");
        assert_eq!(seen[0].1, 1);
    }

    #[tokio::test]
    async fn dedicated_count_statement_runs_verbatim() {
        let e = engine(
            InMemorySource::new()
                .with("u.all", "SELECT * FROM users")
                .with("u.total", "SELECT n FROM user_stats"),
        );
        let rec = Recorder { product: "PostgreSQL", ..Default::default() };
        e.count(&rec, "u.all", Some("u.total"), &SqlParams::new()).await.unwrap();
        assert_eq!(rec.seen.lock()[0].0, "SELECT n FROM user_stats");
    }

    #[tokio::test]
    async fn sequential_batch_keeps_output_shape() {
        let e = engine(InMemorySource::new().with("u.add", "INSERT INTO users (name) VALUES (:name)"));
        let rec = Recorder { product: "PostgreSQL", ..Default::default() };
        let batch = vec![
            SqlParams::new().with("name", "a"),
            SqlParams::new().with("name", "b"),
            SqlParams::new().with("name", "c"),
        ];
        assert_eq!(e.execute_batch(&rec, "u.add", &batch).await.unwrap(), vec![1, 1, 1]);
        assert_eq!(rec.seen.lock().len(), 3);
        assert!(e.execute_batch(&rec, "u.add", &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn paging_uses_reserved_templates_when_present() {
        let e = engine(
            InMemorySource::new()
                .with("u.all", "SELECT * FROM users ORDER BY id")
                .with(FIND_PAGE_ID, "SELECT * FROM (${sqlTxt}) P LIMIT ${limit} OFFSET ${start}")
                .with(FIND_TOTAL_ID, "SELECT COUNT(*) FROM (${sqlTxt}) T"),
        );
        let rec = Recorder { product: "PostgreSQL", ..Default::default() };
        let sort = SortSpec::parse("name__desc").unwrap();
        let page = e.find_page(&rec, "u.all", &SqlParams::new(), &sort, 10, 5).await.unwrap();
        assert_eq!(page.total, 42);
        assert_eq!(page.page_index, 3);
        let seen = rec.seen.lock();
        assert_eq!(seen[0].0, "SELECT COUNT(*) FROM (SELECT * FROM users) T");
        assert_eq!(seen[1].0, "SELECT * FROM (SELECT * FROM users ORDER BY name DESC) P LIMIT 5 OFFSET 10");
    }

    #[tokio::test]
    async fn oversized_windows_are_rejected_before_running() {
        let e = engine(
            InMemorySource::new()
                .with("u.all", "SELECT * FROM users")
                .with(FIND_PAGE_ID, "SELECT * FROM (${sqlTxt}) P LIMIT ${limit} OFFSET ${start}")
                .with(FIND_TOTAL_ID, "SELECT COUNT(*) FROM (${sqlTxt}) T"),
        );
        let rec = Recorder { product: "PostgreSQL", ..Default::default() };
        let sort = SortSpec::default();

        let err = e
            .find_page(&rec, "u.all", &SqlParams::new(), &sort, u64::MAX, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, SqlError::Query(QueryError::InvalidRequest(ref m)) if m.contains("offset")));

        let err = e
            .find_page(&rec, "u.all", &SqlParams::new(), &sort, 0, i64::MAX as u64 + 1)
            .await
            .unwrap_err();
        assert!(matches!(err, SqlError::Query(QueryError::InvalidRequest(ref m)) if m.contains("limit")));

        // Each bound fits but their sum does not.
        let err = e
            .find_page(&rec, "u.all", &SqlParams::new(), &sort, i64::MAX as u64, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, SqlError::Query(QueryError::InvalidRequest(_))));
        assert!(rec.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn unknown_products_fail_at_first_page() {
        let e = engine(InMemorySource::new().with("u.all", "SELECT 1"));
        let rec = Recorder { product: "Informix", ..Default::default() };
        let err = e
            .find_page(&rec, "u.all", &SqlParams::new(), &SortSpec::default(), 0, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, SqlError::UnsupportedDialect { .. }));
        // Non-paged calls don't need a dialect.
        assert!(e.list(&rec, "u.all", &SqlParams::new()).await.is_ok());
    }

    #[tokio::test]
    async fn row_mapping_errors_name_the_statement() {
        #[derive(serde::Deserialize, Debug)]
        #[allow(dead_code)]
        struct Named {
            name: String,
        }
        let e = engine(InMemorySource::new().with("u.one", "SELECT 1"));
        let rec = Recorder { product: "PostgreSQL", ..Default::default() };
        let err = e.list_as::<Named>(&rec, "u.one", &SqlParams::new()).await.unwrap_err();
        assert!(matches!(err, SqlError::RowMapping { statement, .. } if statement == "u.one"));
    }
}
