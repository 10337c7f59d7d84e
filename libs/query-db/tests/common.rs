#![allow(dead_code)]

use anyhow::Result;
use query_db::binding::BindValue;
use query_db::{ConnectOpts, DbHandle, SqlExecutor};

/// Single-connection in-memory SQLite handle.
pub async fn sqlite_memory() -> Result<DbHandle> {
    let opts = ConnectOpts {
        max_conns: Some(1),
        ..ConnectOpts::default()
    };
    Ok(DbHandle::connect("sqlite::memory:", opts).await?)
}

/// Two departments and `n` employees `emp01..`; every third employee has
/// no department.
pub async fn seed_employees(db: &DbHandle, n: i64) -> Result<()> {
    db.execute(
        "CREATE TABLE department (id INTEGER PRIMARY KEY, name TEXT NOT NULL, city TEXT NOT NULL)",
        vec![],
    )
    .await?;
    db.execute(
        "CREATE TABLE employee (id INTEGER PRIMARY KEY, name TEXT NOT NULL, age INTEGER NOT NULL, dept_id INTEGER REFERENCES department(id))",
        vec![],
    )
    .await?;
    db.execute(
        "INSERT INTO department (id, name, city) VALUES (1, 'Sales', 'Reno'), (2, 'R&D', 'Oslo')",
        vec![],
    )
    .await?;

    let rows = (1..=n)
        .map(|i| {
            let dept = if i % 3 == 0 {
                BindValue::Null(None)
            } else {
                BindValue::I64(1 + i % 2)
            };
            vec![
                BindValue::I64(i),
                BindValue::Text(format!("emp{i:02}")),
                BindValue::I64(20 + i),
                dept,
            ]
        })
        .collect();
    db.execute_batch(
        "INSERT INTO employee (id, name, age, dept_id) VALUES (?, ?, ?, ?)",
        rows,
    )
    .await?;
    Ok(())
}
