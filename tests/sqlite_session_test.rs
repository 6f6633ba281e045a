//! End-to-end session scenarios against the embedded SQLite driver.
//!
//! The pool is capped at one connection so every session reuses the same
//! in-memory database.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sqlspec::config::{ConnectionConfig, DatabaseConfig};
use sqlspec::driver::{Pool, Session, SqliteDriver, TransactionState};
use sqlspec::filter::{LimitOffset, OrderByColumns, Search, Tenant};
use sqlspec::loader::QueryLoader;
use sqlspec::{Dialect, Parameters, Sql, SqlSpecError, Value};

fn single_conn_pool() -> Pool<SqliteDriver> {
    let mut config = DatabaseConfig::new(ConnectionConfig::in_memory());
    config.pool.min_size = 1;
    config.pool.max_size = 1;
    config.pool.acquire_timeout_ms = 200;
    Pool::start(SqliteDriver::new(), config).unwrap()
}

fn seeded_session(pool: &Pool<SqliteDriver>) -> Session<SqliteDriver> {
    let mut session = pool.session().unwrap();
    session
        .execute_script(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, age INTEGER, tenant_id INTEGER);
             INSERT INTO users (name, age, tenant_id) VALUES ('Alice', 30, 1);
             INSERT INTO users (name, age, tenant_id) VALUES ('Bob', 25, 1);
             INSERT INTO users (name, age, tenant_id) VALUES ('Cara', 41, 2);",
        )
        .unwrap();
    session
}

#[test]
fn execute_with_named_params() {
    let pool = single_conn_pool();
    let mut session = seeded_session(&pool);

    let stmt = Sql::new("SELECT name FROM users WHERE age > :age ORDER BY name")
        .bind_named("age", 26);
    let rs = session.execute(&stmt).unwrap();
    let names: Vec<String> = rs
        .all()
        .iter()
        .map(|row| match row.get(0) {
            Some(Value::Text(s)) => s.clone(),
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(names, vec!["Alice", "Cara"]);
}

#[test]
fn execute_reports_rows_affected() {
    let pool = single_conn_pool();
    let mut session = seeded_session(&pool);
    let rs = session
        .execute(&Sql::new("UPDATE users SET age = age + 1 WHERE tenant_id = :t").bind_named("t", 1))
        .unwrap();
    assert_eq!(rs.rows_affected(), 2);
}

#[test]
fn typed_mapping_end_to_end() {
    #[derive(Debug, Deserialize, Serialize)]
    struct User {
        id: i64,
        name: String,
        age: Option<i64>,
    }

    let pool = single_conn_pool();
    let mut session = seeded_session(&pool);
    session
        .execute(&Sql::new("INSERT INTO users (name, age, tenant_id) VALUES (:n, NULL, 1)").bind_named("n", "Null Age"))
        .unwrap();

    let rs = session
        .execute(&Sql::new("SELECT id, name, age FROM users ORDER BY id"))
        .unwrap();
    let users: Vec<User> = rs.as_type().unwrap();
    assert_eq!(users.len(), 4);
    assert_eq!(users[0].name, "Alice");
    assert_eq!(users[3].age, None);
}

#[test]
fn scalar_one_and_one_or_none() {
    let pool = single_conn_pool();
    let mut session = seeded_session(&pool);

    let rs = session
        .execute(&Sql::new("SELECT COUNT(*) FROM users"))
        .unwrap();
    assert_eq!(rs.scalar().unwrap(), &Value::Int(3));

    let rs = session
        .execute(&Sql::new("SELECT name FROM users WHERE id = :id").bind_named("id", 1))
        .unwrap();
    assert_eq!(rs.one().unwrap().get(0), Some(&Value::Text("Alice".into())));

    let rs = session
        .execute(&Sql::new("SELECT name FROM users WHERE id = :id").bind_named("id", 999))
        .unwrap();
    assert!(rs.one().is_err());
    assert!(rs.one_or_none().unwrap().is_none());
}

#[test]
fn execute_many_batches_atomically() {
    let pool = single_conn_pool();
    let mut session = seeded_session(&pool);

    let batches: Vec<Parameters> = (0..5)
        .map(|i| {
            let mut p = Parameters::new();
            p.insert("name", format!("user{i}"));
            p.insert("age", 20 + i);
            p
        })
        .collect();
    let inserted = session
        .execute_many(
            &Sql::new("INSERT INTO users (name, age, tenant_id) VALUES (:name, :age, 1)"),
            &batches,
        )
        .unwrap();
    assert_eq!(inserted, 5);
    // The implicit transaction committed and the session is back to Idle.
    assert_eq!(session.state(), TransactionState::Idle);

    let rs = session
        .execute(&Sql::new("SELECT COUNT(*) FROM users"))
        .unwrap();
    assert_eq!(rs.scalar().unwrap(), &Value::Int(8));
}

#[test]
fn filters_compose_on_execution() {
    let pool = single_conn_pool();
    let mut session = seeded_session(&pool);

    let stmt = Sql::new("SELECT name, age, tenant_id FROM users")
        .with_filter(Tenant::new("tenant_id", 1))
        .with_filter(Search::like("name", "%a%"))
        .with_filter(OrderByColumns::asc("name"))
        .with_filter(LimitOffset::limit(10));
    let rs = session.execute(&stmt).unwrap();
    // Tenant 1 members with an 'a' in the name: Alice (case-sensitive LIKE
    // in SQLite is case-insensitive for ASCII by default, so Bob is out
    // either way).
    let names: Vec<&Value> = rs.all().iter().filter_map(|r| r.get(0)).collect();
    assert_eq!(names, vec![&Value::Text("Alice".into())]);
}

#[test]
fn transaction_state_machine() {
    let pool = single_conn_pool();
    let mut session = seeded_session(&pool);

    session.begin().unwrap();
    assert_eq!(session.state(), TransactionState::InTxn);

    // A failing execute aborts the transaction.
    let err = session
        .execute(&Sql::new("INSERT INTO users (name) VALUES (NULL)"))
        .unwrap_err();
    assert!(matches!(err, SqlSpecError::Execution { .. }));
    assert_eq!(session.state(), TransactionState::Aborted);

    // Executing while aborted is a transaction error; commit too.
    let err = session
        .execute(&Sql::new("SELECT 1"))
        .unwrap_err();
    assert!(matches!(err, SqlSpecError::Transaction(_)));
    assert!(matches!(
        session.commit(),
        Err(SqlSpecError::Transaction(_))
    ));

    // Rollback is the way out.
    session.rollback().unwrap();
    assert_eq!(session.state(), TransactionState::Idle);
    session.execute(&Sql::new("SELECT 1")).unwrap();
}

#[test]
fn transaction_scope_commits_and_rolls_back() {
    let pool = single_conn_pool();
    let mut session = seeded_session(&pool);

    let inserted = session
        .transaction(|s| {
            s.execute(&Sql::new("INSERT INTO users (name, age, tenant_id) VALUES ('Txn', 1, 1)"))?;
            Ok(1)
        })
        .unwrap();
    assert_eq!(inserted, 1);

    let err = session
        .transaction(|s| -> sqlspec::Result<()> {
            s.execute(&Sql::new("INSERT INTO users (name, age, tenant_id) VALUES ('Gone', 1, 1)"))?;
            Err(SqlSpecError::Data("caller bailed".into()))
        })
        .unwrap_err();
    assert!(matches!(err, SqlSpecError::Data(_)));

    let rs = session
        .execute(&Sql::new("SELECT COUNT(*) FROM users WHERE name IN ('Txn', 'Gone')"))
        .unwrap();
    // 'Txn' committed, 'Gone' rolled back.
    assert_eq!(rs.scalar().unwrap(), &Value::Int(1));
}

#[test]
fn arrow_export() {
    let pool = single_conn_pool();
    let mut session = seeded_session(&pool);
    let batch = session
        .execute_arrow(&Sql::new("SELECT id, name, age FROM users ORDER BY id"))
        .unwrap();
    assert_eq!(batch.num_rows(), 3);
    assert_eq!(batch.num_columns(), 3);
    assert_eq!(batch.schema().field(1).name(), "name");
}

#[test]
fn builder_to_execution() {
    use sqlspec::builder::{col, insert, select, Predicate};

    let pool = single_conn_pool();
    let mut session = seeded_session(&pool);

    let stmt = insert("users")
        .dialect(Dialect::Sqlite)
        .columns(["name", "age", "tenant_id"])
        .values([Value::Text("Dana".into()), Value::Int(33), Value::Int(2)])
        .to_statement()
        .unwrap();
    let rs = session.execute(&stmt).unwrap();
    assert_eq!(rs.rows_affected(), 1);

    let stmt = select(["name"])
        .dialect(Dialect::Sqlite)
        .from("users")
        .filter(col("tenant_id").eq(2))
        .filter(Predicate::from_tuple("age", ">", 30).unwrap())
        .order_by("name", sqlspec::builder::Direction::Asc)
        .to_statement()
        .unwrap();
    let rs = session.execute(&stmt).unwrap();
    let names: Vec<&Value> = rs.all().iter().filter_map(|r| r.get(0)).collect();
    assert_eq!(
        names,
        vec![&Value::Text("Cara".into()), &Value::Text("Dana".into())]
    );
}

#[test]
fn loader_to_execution() {
    let pool = single_conn_pool();
    let mut session = seeded_session(&pool);

    let mut loader = QueryLoader::new().with_dialect(Dialect::Sqlite);
    loader
        .load_source(
            "-- name: users_older_than\n\
             SELECT name FROM users WHERE age > :age ORDER BY name\n",
            Path::new("inline.sql"),
        )
        .unwrap();
    let stmt = loader.get("users_older_than").unwrap().bind_named("age", 28);
    let rs = session.execute(&stmt).unwrap();
    assert_eq!(rs.len(), 2);
}

#[test]
fn pool_exhaustion_and_reuse() {
    let pool = single_conn_pool();
    let session = pool.session().unwrap();

    let err = pool.session().unwrap_err();
    assert!(matches!(err, SqlSpecError::PoolExhausted { .. }));

    drop(session);
    // The connection came back; a new session works.
    pool.session().unwrap();
    let (idle, total) = pool.size();
    assert_eq!(total, 1);
    assert_eq!(idle, 1);
}

#[test]
fn session_drop_inside_txn_does_not_leak_state() {
    let pool = single_conn_pool();
    {
        let mut session = seeded_session(&pool);
        session.begin().unwrap();
        session
            .execute(&Sql::new("INSERT INTO users (name, age, tenant_id) VALUES ('Leak', 1, 1)"))
            .unwrap();
        // Dropped mid-transaction.
    }
    let mut session = pool.session().unwrap();
    let rs = session
        .execute(&Sql::new("SELECT COUNT(*) FROM users WHERE name = 'Leak'"))
        .unwrap();
    assert_eq!(rs.scalar().unwrap(), &Value::Int(0));
}

#[test]
fn timeout_interrupts_runaway_query() {
    let pool = single_conn_pool();
    let mut session = pool.session().unwrap();
    session.set_timeout(Some(std::time::Duration::from_millis(50)));

    let runaway = Sql::new(
        "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 500000000) \
         SELECT COUNT(*) FROM c",
    );
    let err = session.execute(&runaway).unwrap_err();
    assert!(matches!(err, SqlSpecError::Timeout { .. }), "got: {err}");

    // The interrupt leaves the connection usable.
    session.set_timeout(None);
    session.execute(&Sql::new("SELECT 1")).unwrap();
}
