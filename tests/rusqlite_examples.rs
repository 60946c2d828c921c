use anyhow::{anyhow, Result};
use sqlite_worker::envelope;
use sqlite_worker::{
    BoundaryClient, BoundaryRuntime, ErrorKind, Request, ResultSet, RuntimeConfig, SqliteConfig,
    SqliteEngine, Value,
};
use tempfile::NamedTempFile;

#[derive(Debug)]
struct User {
    _id: i64, // Prefix with underscore to indicate it's intentionally unused
    name: String,
    email: String,
    age: Option<i64>,
}

// Helper function to create an in-memory database behind a boundary
fn create_test_db() -> Result<BoundaryRuntime> {
    let runtime = BoundaryRuntime::spawn(SqliteEngine::open_in_memory()?, RuntimeConfig::default())?;
    initialize_schema(&runtime.client())?;
    Ok(runtime)
}

// Helper function to create a temporary file-based database
fn create_temp_db() -> Result<(BoundaryRuntime, NamedTempFile)> {
    let temp_file = NamedTempFile::new()?;
    let runtime = open_file_db(&temp_file)?;
    initialize_schema(&runtime.client())?;
    Ok((runtime, temp_file))
}

fn open_file_db(file: &NamedTempFile) -> Result<BoundaryRuntime> {
    let engine = SqliteEngine::open_path(file.path())?;
    Ok(BoundaryRuntime::spawn(engine, RuntimeConfig::default())?)
}

// Initialize the database schema
fn initialize_schema(client: &BoundaryClient) -> Result<()> {
    run(
        client,
        Request::new(
            r#"
            CREATE TABLE users (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT UNIQUE NOT NULL,
                age INTEGER
            );
            CREATE INDEX idx_users_email ON users(email);
            "#,
        ),
    )?;
    Ok(())
}

fn run(client: &BoundaryClient, request: Request) -> Result<ResultSet> {
    Ok(client.execute_blocking(request).into_result()?)
}

fn users(result: &ResultSet) -> Result<Vec<User>> {
    let Some(group) = result.first() else {
        return Ok(Vec::new());
    };
    group
        .rows
        .iter()
        .map(|row| match row.as_slice() {
            [Value::Integer(id), Value::Text(name), Value::Text(email), age] => Ok(User {
                _id: *id,
                name: name.clone(),
                email: email.clone(),
                age: match age {
                    Value::Integer(age) => Some(*age),
                    _ => None,
                },
            }),
            other => Err(anyhow!("unexpected user row: {other:?}")),
        })
        .collect()
}

#[tokio::test]
async fn test_basic_operations() {
    test_basic_operations_impl().unwrap();
}

fn test_basic_operations_impl() -> Result<()> {
    let runtime = create_test_db()?;
    let client = runtime.client();

    // Insert a new user
    let inserted = run(
        &client,
        Request::new("INSERT INTO users (name, email, age) VALUES (?1, ?2, ?3)")
            .with_param("John Doe")
            .with_param("john@example.com")
            .with_param(30),
    )?;
    assert!(inserted.is_empty());

    // Query a user
    let found = run(
        &client,
        Request::new("SELECT id, name, email, age FROM users WHERE id = ?").with_param(1),
    )?;
    let found = users(&found)?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "John Doe");
    assert_eq!(found[0].email, "john@example.com");
    assert_eq!(found[0].age, Some(30));

    // Update the user
    run(
        &client,
        Request::new("UPDATE users SET age = ? WHERE id = ?")
            .with_param(31)
            .with_param(1),
    )?;
    let updated = run(&client, Request::new("SELECT age FROM users WHERE id = ?").with_param(1))?;
    assert_eq!(
        updated.first().map(|group| group.rows.clone()),
        Some(vec![vec![Value::Integer(31)]])
    );

    // Delete the user
    run(&client, Request::new("DELETE FROM users WHERE id = ?").with_param(1))?;
    let deleted = run(
        &client,
        Request::new("SELECT id, name, email, age FROM users WHERE id = ?").with_param(1),
    )?;
    assert!(users(&deleted)?.is_empty());

    runtime.shutdown()?;
    Ok(())
}

#[test]
fn test_file_database_survives_restart() -> Result<()> {
    let (runtime, temp_file) = create_temp_db()?;
    run(
        &runtime.client(),
        Request::new("INSERT INTO users (name, email) VALUES (?, ?)")
            .with_param("Ada")
            .with_param("ada@example.com"),
    )?;
    runtime.shutdown()?;

    let reopened = open_file_db(&temp_file)?;
    let found = run(&reopened.client(), Request::new("SELECT id, name, email, age FROM users"))?;
    let found = users(&found)?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "Ada");
    assert_eq!(found[0].age, None);
    Ok(())
}

#[test]
fn test_unique_violation_is_a_constraint_error() -> Result<()> {
    let runtime = create_test_db()?;
    let client = runtime.client();
    let insert = || {
        Request::new("INSERT INTO users (name, email) VALUES (?, ?)")
            .with_param("Bob")
            .with_param("bob@example.com")
    };
    run(&client, insert())?;

    let err = client.execute_blocking(insert()).into_result().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Constraint);
    assert!(err.message.contains("UNIQUE"), "message was {:?}", err.message);
    assert!(err.code.is_some());

    // The failure does not disturb later requests.
    let count = run(&client, Request::new("SELECT count(*) FROM users"))?;
    assert_eq!(count.first().map(|g| g.rows.clone()), Some(vec![vec![Value::Integer(1)]]));
    Ok(())
}

#[test]
fn test_non_integer_rowid_is_a_type_mismatch() -> Result<()> {
    let runtime = create_test_db()?;
    let err = runtime
        .client()
        .execute_blocking(Request::new("INSERT INTO users (id, name, email) VALUES ('abc', 'x', 'y')"))
        .into_result()
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeMismatch);
    Ok(())
}

#[test]
fn test_missing_table_is_a_runtime_error() -> Result<()> {
    let runtime = create_test_db()?;
    let err = runtime
        .client()
        .execute_blocking(Request::new("SELECT * FROM nowhere"))
        .into_result()
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Runtime);
    assert!(err.message.contains("no such table"));
    Ok(())
}

#[test]
fn test_cells_keep_their_types() -> Result<()> {
    let runtime = create_test_db()?;
    let client = runtime.client();
    run(&client, Request::new("CREATE TABLE cells (i, r, t, b, n)"))?;
    run(
        &client,
        Request::new("INSERT INTO cells VALUES (?, ?, ?, ?, ?)").with_params(vec![
            Value::Integer(-7),
            Value::Real(0.25),
            Value::Text("héllo".into()),
            Value::Blob(vec![0, 159, 255]),
            Value::Null,
        ]),
    )?;
    let result = run(&client, Request::new("SELECT n, b, t, r, i FROM cells"))?;
    let group = result.first().ok_or_else(|| anyhow!("no rows"))?;
    assert_eq!(group.columns, vec!["n", "b", "t", "r", "i"]);
    assert_eq!(
        group.rows,
        vec![vec![
            Value::Null,
            Value::Blob(vec![0, 159, 255]),
            Value::Text("héllo".into()),
            Value::Real(0.25),
            Value::Integer(-7),
        ]]
    );
    Ok(())
}

#[test]
fn test_multi_statement_script_returns_one_group_per_query() -> Result<()> {
    let runtime = create_test_db()?;
    let result = run(
        &runtime.client(),
        Request::new(
            "INSERT INTO users (name, email) VALUES ('Cy', 'cy@example.com');
             SELECT name FROM users;
             UPDATE users SET age = 40;
             SELECT age FROM users;",
        ),
    )?;
    assert_eq!(result.groups.len(), 2);
    assert_eq!(result.groups[0].columns, vec!["name"]);
    assert_eq!(result.groups[0].rows, vec![vec![Value::Text("Cy".into())]]);
    assert_eq!(result.groups[1].rows, vec![vec![Value::Integer(40)]]);
    Ok(())
}

#[test]
fn test_script_params_bind_to_every_statement() -> Result<()> {
    let runtime = create_test_db()?;
    let client = runtime.client();
    let result = run(
        &client,
        Request::new(
            "INSERT INTO users (name, email) VALUES (?1, ?2);
             SELECT name, email FROM users WHERE name = ?1 AND email = ?2;",
        )
        .with_param("Cy")
        .with_param("cy@example.com"),
    )?;
    assert_eq!(
        result.first().map(|g| g.rows.clone()),
        Some(vec![vec![Value::Text("Cy".into()), Value::Text("cy@example.com".into())]])
    );

    // A later statement without placeholders cannot take the parameters.
    let err = client
        .execute_blocking(
            Request::new(
                "INSERT INTO users (name, email) VALUES (?1, ?2);
                 SELECT count(*) FROM users;",
            )
            .with_param("Di")
            .with_param("di@example.com"),
        )
        .into_result()
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Runtime);

    // Statements ahead of the failure stay applied.
    let count = run(&client, Request::new("SELECT count(*) FROM users"))?;
    assert_eq!(count.first().map(|g| g.rows.clone()), Some(vec![vec![Value::Integer(2)]]));
    Ok(())
}

#[test]
fn test_infinite_real_crosses_the_wire() -> Result<()> {
    let runtime = create_test_db()?;
    let response = runtime
        .client()
        .execute_blocking(Request::new("SELECT 1e999 AS inf, -1e999 AS neg_inf"));
    let native = response.result_set().and_then(|rs| rs.first()).cloned();
    assert_eq!(
        native.map(|g| g.rows),
        Some(vec![vec![Value::Real(f64::INFINITY), Value::Real(f64::NEG_INFINITY)]])
    );

    let decoded = envelope::decode_response(&envelope::encode_response(&response)?)?;
    assert_eq!(decoded, response);
    Ok(())
}

#[test]
fn test_read_only_database_rejects_writes() -> Result<()> {
    let (runtime, temp_file) = create_temp_db()?;
    runtime.shutdown()?;

    let engine = SqliteEngine::open(&SqliteConfig::new(temp_file.path()).read_only(true))?;
    let runtime = BoundaryRuntime::spawn(engine, RuntimeConfig::default())?;
    let client = runtime.client();
    let err = client
        .execute_blocking(Request::new("INSERT INTO users (name, email) VALUES ('a', 'b')"))
        .into_result()
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Runtime);
    assert!(run(&client, Request::new("SELECT count(*) FROM users")).is_ok());
    Ok(())
}
