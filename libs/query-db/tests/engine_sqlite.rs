//! Template-driven execution against in-memory SQLite.
#![cfg(feature = "sqlite")]

mod common;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use query_core::{QueryRequest, SortSpec};
use query_db::template::{InMemorySource, TemplateSource};
use query_db::{SqlEngine, SqlError, SqlParams, SqlTemplateLoader, TemplateConfig};
use serde::Deserialize;

const EMPLOYEE_MD: &str = "\
// employee statements
all
===
SELECT id, name, age FROM employee
ORDER BY id DESC

olderThan
===
// filtered by age
SELECT id, name, age FROM employee WHERE age > :age

byIds
===
SELECT id, name FROM employee WHERE id IN (:ids[0], :ids[1]) ORDER BY id

inCity
===
SELECT e.id, e.name FROM employee e JOIN department d ON d.id = e.dept_id WHERE d.city = :city

rename
===
UPDATE employee SET name = :name WHERE id = :id

add
===
INSERT INTO employee (id, name, age) VALUES (:id, :name, :age)

countIn
===
SELECT COUNT(1) AS n FROM ${table}
";

fn write_templates(root: &Path) -> Result<()> {
    std::fs::write(root.join("employee.md"), EMPLOYEE_MD)?;
    Ok(())
}

fn file_engine(root: &Path) -> SqlEngine {
    let cfg = TemplateConfig {
        root: root.to_path_buf(),
        ..TemplateConfig::default()
    };
    SqlEngine::from_config(&cfg, 256, Some("SQLite"))
}

#[derive(Debug, Deserialize)]
struct Employee {
    id: i64,
    name: String,
    age: i64,
}

#[tokio::test]
async fn pages_never_exceed_limit() -> Result<()> {
    let db = common::sqlite_memory().await?;
    common::seed_employees(&db, 15).await?;
    let dir = tempfile::tempdir()?;
    write_templates(dir.path())?;
    let engine = file_engine(dir.path());
    let sort = SortSpec::parse("id")?;

    for offset in [0u64, 4, 8, 12, 14, 15, 20] {
        let page = engine
            .find_page(&db, "employee.all", &SqlParams::new(), &sort, offset, 4)
            .await?;
        assert_eq!(page.total, 15);
        let expected = if offset < 15 { 4.min(15 - offset) } else { 0 };
        assert_eq!(page.content.len() as u64, expected, "offset {offset}");
        if let Some(first) = page.content.first() {
            assert_eq!(first["id"], serde_json::json!(offset + 1));
        }
    }
    Ok(())
}

#[tokio::test]
async fn statement_order_is_kept_without_a_sort() -> Result<()> {
    let db = common::sqlite_memory().await?;
    common::seed_employees(&db, 15).await?;
    let dir = tempfile::tempdir()?;
    write_templates(dir.path())?;
    let engine = file_engine(dir.path());

    let page = engine
        .find_page(&db, "employee.all", &SqlParams::new(), &SortSpec::default(), 0, 5)
        .await?;
    let ids: Vec<_> = page.content.iter().map(|r| r["id"].clone()).collect();
    assert_eq!(ids, (11..=15).rev().map(serde_json::Value::from).collect::<Vec<_>>());
    assert_eq!(page.page_index, 1);
    assert!(page.has_next());
    Ok(())
}

#[tokio::test]
async fn count_matches_unbounded_list() -> Result<()> {
    let db = common::sqlite_memory().await?;
    common::seed_employees(&db, 15).await?;
    let dir = tempfile::tempdir()?;
    write_templates(dir.path())?;
    let engine = file_engine(dir.path());

    let params = SqlParams::new().with("age", 27);
    let rows = engine.list(&db, "employee.olderThan", &params).await?;
    let total = engine.count(&db, "employee.olderThan", None, &params).await?;
    assert_eq!(total, rows.len() as u64);
    assert_eq!(total, 8);

    let dedicated = engine
        .count(&db, "employee.all", Some("employee.countIn"), &SqlParams::new().with("table", "department"))
        .await?;
    assert_eq!(dedicated, 2);
    Ok(())
}

#[tokio::test]
async fn typed_rows_and_indexed_parameters() -> Result<()> {
    let db = common::sqlite_memory().await?;
    common::seed_employees(&db, 5).await?;
    let dir = tempfile::tempdir()?;
    write_templates(dir.path())?;
    let engine = file_engine(dir.path());

    let params = SqlParams::new().with("ids", vec![4i64, 2]);
    let rows = engine.list(&db, "employee.byIds", &params).await?;
    let names: Vec<_> = rows.iter().map(|r| r["name"].as_str().unwrap_or_default()).collect();
    assert_eq!(names, vec!["emp02", "emp04"]);

    let one: Option<Employee> = engine
        .find_one_as(&db, "employee.olderThan", &SqlParams::new().with("age", 24))
        .await?;
    let one = one.expect("one employee older than 24");
    assert_eq!((one.id, one.name.as_str(), one.age), (5, "emp05", 25));

    let city = engine
        .list(&db, "employee.inCity", &SqlParams::new().with("city", "Oslo"))
        .await?;
    assert_eq!(city.len(), 2);
    Ok(())
}

#[tokio::test]
async fn updates_and_batches_report_affected_rows() -> Result<()> {
    let db = common::sqlite_memory().await?;
    common::seed_employees(&db, 3).await?;
    let dir = tempfile::tempdir()?;
    write_templates(dir.path())?;
    let engine = file_engine(dir.path());

    let n = engine
        .execute(&db, "employee.rename", &SqlParams::new().with("name", "Ada").with("id", 1))
        .await?;
    assert_eq!(n, 1);
    let n = engine
        .execute(&db, "employee.rename", &SqlParams::new().with("name", "Nobody").with("id", 99))
        .await?;
    assert_eq!(n, 0);

    let batch: Vec<SqlParams> = (10..13)
        .map(|i| {
            SqlParams::new()
                .with("id", i)
                .with("name", format!("new{i}"))
                .with("age", 30)
        })
        .collect();
    assert_eq!(engine.execute_batch(&db, "employee.add", &batch).await?, vec![1, 1, 1]);
    let total = engine.count(&db, "employee.olderThan", None, &SqlParams::new().with("age", 0)).await?;
    assert_eq!(total, 6);
    Ok(())
}

#[tokio::test]
async fn missing_parameters_and_templates_fail_cleanly() -> Result<()> {
    let db = common::sqlite_memory().await?;
    common::seed_employees(&db, 1).await?;
    let dir = tempfile::tempdir()?;
    write_templates(dir.path())?;
    let engine = file_engine(dir.path());

    let err = engine
        .list(&db, "employee.olderThan", &SqlParams::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SqlError::Binding { ref param, .. } if param == "age"));

    let err = engine.list(&db, "employee.nope", &SqlParams::new()).await.unwrap_err();
    assert!(matches!(err, SqlError::TemplateNotFound { .. }));

    let err = engine
        .execute(&db, "employee.add", &SqlParams::new().with("id", 1).with("name", "dup").with("age", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, SqlError::Execution { ref statement, .. } if statement == "employee.add"));
    assert!(!err.to_string().contains("INSERT"));
    Ok(())
}

#[tokio::test]
async fn request_paging_and_parse_cache_reuse() -> Result<()> {
    let db = common::sqlite_memory().await?;
    common::seed_employees(&db, 15).await?;
    let src = InMemorySource::new();
    src.insert_markdown("employee", EMPLOYEE_MD)?;
    let src: Arc<dyn TemplateSource> = Arc::new(src);
    let engine = SqlEngine::new(Arc::new(SqlTemplateLoader::new(src)));

    let req = QueryRequest::new("employee").desc("age").page(2, 6);
    let page = engine.find_page_for(&db, "employee.all", &SqlParams::new(), &req).await?;
    assert_eq!(page.page_index, 2);
    assert_eq!(page.content.len(), 6);
    assert_eq!(page.content[0]["age"], serde_json::json!(29));

    let before = engine.parse_cache().len();
    engine.find_page_for(&db, "employee.all", &SqlParams::new(), &req).await?;
    assert_eq!(engine.parse_cache().len(), before);
    Ok(())
}
