//! The statement-execution seam and its sqlx implementation on [`DbHandle`].
//!
//! Every call acquires its own connection from the pool and returns it when
//! the future completes or is dropped.

use async_trait::async_trait;
#[cfg(any(feature = "pg", feature = "mysql"))]
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
#[cfg(any(feature = "pg", feature = "mysql"))]
use rust_decimal::Decimal;
use serde_json::Value as Json;
use sqlx::{Column, Row as _, TypeInfo, ValueRef};

use crate::binding::{BindValue, SqlType};
use crate::params::PlaceholderStyle;
use crate::{DbEngine, DbHandle, DbPool};

/// A result row keyed by column label.
pub type Row = serde_json::Map<String, Json>;

#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Database product name, as used for dialect selection.
    fn product_name(&self) -> &str;

    fn placeholder_style(&self) -> PlaceholderStyle;

    /// Whether [`execute_batch`](Self::execute_batch) runs natively.
    fn supports_batch(&self) -> bool {
        false
    }

    async fn query(&self, sql: &str, values: Vec<BindValue>) -> Result<Vec<Row>, sqlx::Error>;

    async fn execute(&self, sql: &str, values: Vec<BindValue>) -> Result<u64, sqlx::Error>;

    /// Run `sql` once per value set, returning affected rows in order.
    async fn execute_batch(
        &self,
        sql: &str,
        batch: Vec<Vec<BindValue>>,
    ) -> Result<Vec<u64>, sqlx::Error> {
        let mut counts = Vec::with_capacity(batch.len());
        for values in batch {
            counts.push(self.execute(sql, values).await?);
        }
        Ok(counts)
    }
}

/* ---------- binding ---------- */

#[cfg(feature = "sqlite")]
type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;
#[cfg(feature = "pg")]
type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>;
#[cfg(feature = "mysql")]
type MySqlQuery<'q> = sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments>;

#[cfg(feature = "sqlite")]
fn bind_sqlite(q: SqliteQuery<'_>, v: BindValue) -> SqliteQuery<'_> {
    match v {
        BindValue::Null(Some(SqlType::Integer | SqlType::BigInt)) => q.bind(None::<i64>),
        BindValue::Null(Some(SqlType::Double)) => q.bind(None::<f64>),
        BindValue::Null(Some(SqlType::Boolean)) => q.bind(None::<bool>),
        BindValue::Null(_) => q.bind(None::<String>),
        BindValue::Bool(b) => q.bind(b),
        BindValue::I64(i) => q.bind(i),
        BindValue::F64(f) => q.bind(f),
        // SQLite has no decimal type; text keeps every digit.
        BindValue::Decimal(d) => q.bind(d.to_string()),
        BindValue::Text(s) | BindValue::LargeText(s) => q.bind(s),
        BindValue::Uuid(u) => q.bind(u.to_string()),
        BindValue::Date(d) => q.bind(d),
        BindValue::Time(t) => q.bind(t),
        BindValue::DateTime(dt) => q.bind(dt),
        BindValue::DateTimeUtc(dt) => q.bind(dt),
        BindValue::Json(j) => q.bind(sqlx::types::Json(j)),
    }
}

#[cfg(feature = "pg")]
fn bind_pg(q: PgQuery<'_>, v: BindValue) -> PgQuery<'_> {
    match v {
        BindValue::Null(Some(t)) => match t {
            SqlType::Integer | SqlType::BigInt => q.bind(None::<i64>),
            SqlType::Double => q.bind(None::<f64>),
            SqlType::Boolean => q.bind(None::<bool>),
            SqlType::Decimal | SqlType::Numeric => q.bind(None::<Decimal>),
            SqlType::Date => q.bind(None::<NaiveDate>),
            SqlType::Time => q.bind(None::<NaiveTime>),
            SqlType::Timestamp => q.bind(None::<NaiveDateTime>),
            _ => q.bind(None::<String>),
        },
        BindValue::Null(None) => q.bind(None::<String>),
        BindValue::Bool(b) => q.bind(b),
        BindValue::I64(i) => q.bind(i),
        BindValue::F64(f) => q.bind(f),
        BindValue::Decimal(d) => q.bind(d),
        BindValue::Text(s) | BindValue::LargeText(s) => q.bind(s),
        BindValue::Uuid(u) => q.bind(u),
        BindValue::Date(d) => q.bind(d),
        BindValue::Time(t) => q.bind(t),
        BindValue::DateTime(dt) => q.bind(dt),
        BindValue::DateTimeUtc(dt) => q.bind(dt),
        BindValue::Json(j) => q.bind(sqlx::types::Json(j)),
    }
}

#[cfg(feature = "mysql")]
fn bind_mysql(q: MySqlQuery<'_>, v: BindValue) -> MySqlQuery<'_> {
    match v {
        BindValue::Null(Some(SqlType::Integer | SqlType::BigInt)) => q.bind(None::<i64>),
        BindValue::Null(Some(SqlType::Double)) => q.bind(None::<f64>),
        BindValue::Null(Some(SqlType::Decimal | SqlType::Numeric)) => q.bind(None::<Decimal>),
        BindValue::Null(_) => q.bind(None::<String>),
        BindValue::Bool(b) => q.bind(b),
        BindValue::I64(i) => q.bind(i),
        BindValue::F64(f) => q.bind(f),
        BindValue::Decimal(d) => q.bind(d),
        BindValue::Text(s) | BindValue::LargeText(s) => q.bind(s),
        BindValue::Uuid(u) => q.bind(u.to_string()),
        BindValue::Date(d) => q.bind(d),
        BindValue::Time(t) => q.bind(t),
        BindValue::DateTime(dt) => q.bind(dt),
        BindValue::DateTimeUtc(dt) => q.bind(dt),
        BindValue::Json(j) => q.bind(sqlx::types::Json(j)),
    }
}

/* ---------- row decoding ---------- */

#[cfg(any(feature = "pg", feature = "mysql"))]
fn date_json(d: NaiveDate) -> Json {
    Json::String(d.format("%Y-%m-%d").to_string())
}

#[cfg(any(feature = "pg", feature = "mysql"))]
fn time_json(t: NaiveTime) -> Json {
    Json::String(t.format("%H:%M:%S%.f").to_string())
}

#[cfg(any(feature = "pg", feature = "mysql"))]
fn datetime_json(dt: NaiveDateTime) -> Json {
    Json::String(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string())
}

fn float_json(f: f64) -> Json {
    serde_json::Number::from_f64(f).map_or(Json::Null, Json::Number)
}

// Decimals travel as strings so no digit is lost.
#[cfg(any(feature = "pg", feature = "mysql"))]
fn decimal_json(d: Decimal) -> Json {
    Json::String(d.normalize().to_string())
}

fn bytes_json(b: Vec<u8>) -> Json {
    Json::Array(b.into_iter().map(Json::from).collect())
}

#[cfg(feature = "sqlite")]
fn sqlite_row(row: &sqlx::sqlite::SqliteRow) -> Result<Row, sqlx::Error> {
    let mut out = Row::new();
    for col in row.columns() {
        let i = col.ordinal();
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            Json::Null
        } else {
            // Storage class of the value itself, not the declared column type.
            match raw.type_info().name() {
                "INTEGER" | "BOOLEAN" => Json::from(row.try_get_unchecked::<i64, _>(i)?),
                "REAL" | "NUMERIC" => float_json(row.try_get_unchecked::<f64, _>(i)?),
                "BLOB" => bytes_json(row.try_get_unchecked::<Vec<u8>, _>(i)?),
                _ => Json::String(row.try_get_unchecked::<String, _>(i)?),
            }
        };
        out.insert(col.name().to_owned(), value);
    }
    Ok(out)
}

#[cfg(feature = "pg")]
fn pg_row(row: &sqlx::postgres::PgRow) -> Result<Row, sqlx::Error> {
    let mut out = Row::new();
    for col in row.columns() {
        let i = col.ordinal();
        if row.try_get_raw(i)?.is_null() {
            out.insert(col.name().to_owned(), Json::Null);
            continue;
        }
        let value = match col.type_info().name() {
            "BOOL" => Json::from(row.try_get::<bool, _>(i)?),
            "INT2" => Json::from(row.try_get::<i16, _>(i)?),
            "INT4" => Json::from(row.try_get::<i32, _>(i)?),
            "INT8" => Json::from(row.try_get::<i64, _>(i)?),
            "FLOAT4" => float_json(f64::from(row.try_get::<f32, _>(i)?)),
            "FLOAT8" => float_json(row.try_get::<f64, _>(i)?),
            "NUMERIC" => decimal_json(row.try_get::<Decimal, _>(i)?),
            "UUID" => Json::String(row.try_get::<uuid::Uuid, _>(i)?.to_string()),
            "DATE" => date_json(row.try_get::<NaiveDate, _>(i)?),
            "TIME" => time_json(row.try_get::<NaiveTime, _>(i)?),
            "TIMESTAMP" => datetime_json(row.try_get::<NaiveDateTime, _>(i)?),
            "TIMESTAMPTZ" => Json::String(row.try_get::<DateTime<Utc>, _>(i)?.to_rfc3339()),
            "JSON" | "JSONB" => row.try_get::<Json, _>(i)?,
            "BYTEA" => bytes_json(row.try_get::<Vec<u8>, _>(i)?),
            _ => Json::String(row.try_get::<String, _>(i)?),
        };
        out.insert(col.name().to_owned(), value);
    }
    Ok(out)
}

#[cfg(feature = "mysql")]
fn mysql_row(row: &sqlx::mysql::MySqlRow) -> Result<Row, sqlx::Error> {
    let mut out = Row::new();
    for col in row.columns() {
        let i = col.ordinal();
        if row.try_get_raw(i)?.is_null() {
            out.insert(col.name().to_owned(), Json::Null);
            continue;
        }
        let ty = col.type_info().name();
        let value = match ty {
            "BOOLEAN" => Json::from(row.try_get::<bool, _>(i)?),
            t if t.ends_with("INT UNSIGNED") => Json::from(row.try_get_unchecked::<u64, _>(i)?),
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
                Json::from(row.try_get_unchecked::<i64, _>(i)?)
            }
            "FLOAT" | "DOUBLE" => float_json(row.try_get_unchecked::<f64, _>(i)?),
            "DECIMAL" => decimal_json(row.try_get::<Decimal, _>(i)?),
            "DATE" => date_json(row.try_get::<NaiveDate, _>(i)?),
            "TIME" => time_json(row.try_get::<NaiveTime, _>(i)?),
            "DATETIME" => datetime_json(row.try_get::<NaiveDateTime, _>(i)?),
            "TIMESTAMP" => Json::String(row.try_get::<DateTime<Utc>, _>(i)?.to_rfc3339()),
            "JSON" => row.try_get::<Json, _>(i)?,
            t if t.contains("BLOB") || t.contains("BINARY") => {
                bytes_json(row.try_get_unchecked::<Vec<u8>, _>(i)?)
            }
            _ => Json::String(row.try_get_unchecked::<String, _>(i)?),
        };
        out.insert(col.name().to_owned(), value);
    }
    Ok(out)
}

/* ---------- DbHandle ---------- */

#[async_trait]
impl SqlExecutor for DbHandle {
    fn product_name(&self) -> &str {
        self.engine().product_name()
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        match self.engine() {
            DbEngine::Postgres => PlaceholderStyle::Dollar,
            DbEngine::MySql | DbEngine::Sqlite => PlaceholderStyle::Question,
        }
    }

    /// Batches run inside one transaction.
    fn supports_batch(&self) -> bool {
        true
    }

    async fn query(&self, sql: &str, values: Vec<BindValue>) -> Result<Vec<Row>, sqlx::Error> {
        match self.pool() {
            #[cfg(feature = "sqlite")]
            DbPool::Sqlite(pool) => {
                let q = values.into_iter().fold(sqlx::query(sql), bind_sqlite);
                q.fetch_all(pool).await?.iter().map(sqlite_row).collect()
            }
            #[cfg(feature = "pg")]
            DbPool::Postgres(pool) => {
                let q = values.into_iter().fold(sqlx::query(sql), bind_pg);
                q.fetch_all(pool).await?.iter().map(pg_row).collect()
            }
            #[cfg(feature = "mysql")]
            DbPool::MySql(pool) => {
                let q = values.into_iter().fold(sqlx::query(sql), bind_mysql);
                q.fetch_all(pool).await?.iter().map(mysql_row).collect()
            }
        }
    }

    async fn execute(&self, sql: &str, values: Vec<BindValue>) -> Result<u64, sqlx::Error> {
        match self.pool() {
            #[cfg(feature = "sqlite")]
            DbPool::Sqlite(pool) => {
                let q = values.into_iter().fold(sqlx::query(sql), bind_sqlite);
                Ok(q.execute(pool).await?.rows_affected())
            }
            #[cfg(feature = "pg")]
            DbPool::Postgres(pool) => {
                let q = values.into_iter().fold(sqlx::query(sql), bind_pg);
                Ok(q.execute(pool).await?.rows_affected())
            }
            #[cfg(feature = "mysql")]
            DbPool::MySql(pool) => {
                let q = values.into_iter().fold(sqlx::query(sql), bind_mysql);
                Ok(q.execute(pool).await?.rows_affected())
            }
        }
    }

    async fn execute_batch(
        &self,
        sql: &str,
        batch: Vec<Vec<BindValue>>,
    ) -> Result<Vec<u64>, sqlx::Error> {
        let mut counts = Vec::with_capacity(batch.len());
        match self.pool() {
            #[cfg(feature = "sqlite")]
            DbPool::Sqlite(pool) => {
                let mut tx = pool.begin().await?;
                for values in batch {
                    let q = values.into_iter().fold(sqlx::query(sql), bind_sqlite);
                    counts.push(q.execute(&mut *tx).await?.rows_affected());
                }
                tx.commit().await?;
            }
            #[cfg(feature = "pg")]
            DbPool::Postgres(pool) => {
                let mut tx = pool.begin().await?;
                for values in batch {
                    let q = values.into_iter().fold(sqlx::query(sql), bind_pg);
                    counts.push(q.execute(&mut *tx).await?.rows_affected());
                }
                tx.commit().await?;
            }
            #[cfg(feature = "mysql")]
            DbPool::MySql(pool) => {
                let mut tx = pool.begin().await?;
                for values in batch {
                    let q = values.into_iter().fold(sqlx::query(sql), bind_mysql);
                    counts.push(q.execute(&mut *tx).await?.rows_affected());
                }
                tx.commit().await?;
            }
        }
        Ok(counts)
    }
}
