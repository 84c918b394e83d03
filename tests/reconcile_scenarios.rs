use rusqlite::Connection;
use serde_json::json;
use table_reconciler::db::{self, ConnectionDescriptor};
use table_reconciler::{
    ColumnSpec, FilterExpr, ReconcileRequest, ReconcileResult, Reconciler, State, TypeRegistry,
    Value,
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn users_db() -> Result<Connection, Box<dyn std::error::Error>> {
    let conn = db::open(&ConnectionDescriptor::Memory)?;
    conn.execute(
        "CREATE TABLE users (id INTEGER, name VARCHAR, active BOOLEAN, joined DATE)",
        [],
    )?;
    Ok(conn)
}

fn user_request(state: State, id: i64, name: &str) -> ReconcileRequest {
    ReconcileRequest {
        table: "users".to_string(),
        keys: vec!["id".to_string()],
        columns: vec![
            ColumnSpec::new("id", "Integer", Some(json!(id))),
            ColumnSpec::new("name", "String", Some(json!(name))),
        ],
        state,
        ..Default::default()
    }
}

fn run(
    conn: &Connection,
    request: &ReconcileRequest,
) -> Result<ReconcileResult, Box<dyn std::error::Error>> {
    let registry = TypeRegistry::standard();
    Ok(Reconciler::new(conn, &registry).run(request)?)
}

/// Every row of `users`, as text, for byte-level comparisons.
fn snapshot(conn: &Connection) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let mut stmt = conn.prepare(
        "SELECT quote(id) || '|' || quote(name) || '|' || quote(active) || '|' || quote(joined)
         FROM users ORDER BY rowid",
    )?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn seed(conn: &Connection, rows: &[(i64, &str)]) -> TestResult {
    for (id, name) in rows {
        conn.execute(
            "INSERT INTO users (id, name) VALUES (?1, ?2)",
            rusqlite::params![id, name],
        )?;
    }
    Ok(())
}

#[test]
fn test_present_inserts_then_converges() -> TestResult {
    let conn = users_db()?;
    let request = user_request(State::Present, 1, "a");

    let first = run(&conn, &request)?;
    assert!(first.changed);
    let rows = first.rows.clone().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], Value::Integer(1));
    assert_eq!(rows[0]["name"], Value::Text("a".to_string()));

    let second = run(&conn, &request)?;
    assert!(!second.changed);
    assert_eq!(second.rows, first.rows);
    assert_eq!(snapshot(&conn)?.len(), 1);
    Ok(())
}

#[test]
fn test_present_updates_without_touching_keys() -> TestResult {
    let conn = users_db()?;
    seed(&conn, &[(1, "a"), (2, "z")])?;

    let result = run(&conn, &user_request(State::Present, 1, "b"))?;
    assert!(result.changed);
    let rows = result.rows.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], Value::Text("b".to_string()));

    assert_eq!(
        snapshot(&conn)?,
        vec!["1|'b'|NULL|NULL".to_string(), "2|'z'|NULL|NULL".to_string()]
    );
    assert!(!run(&conn, &user_request(State::Present, 1, "b"))?.changed);
    Ok(())
}

#[test]
fn test_absent_removes_then_converges() -> TestResult {
    let conn = users_db()?;
    seed(&conn, &[(1, "a"), (2, "b")])?;

    let request = ReconcileRequest {
        table: "users".to_string(),
        keys: vec!["id".to_string()],
        columns: vec![ColumnSpec::new("id", "Integer", Some(json!(1)))],
        state: State::Absent,
        ..Default::default()
    };

    let first = run(&conn, &request)?;
    assert!(first.changed);
    assert!(first.rows.is_none());
    assert_eq!(snapshot(&conn)?, vec!["2|'b'|NULL|NULL".to_string()]);

    let second = run(&conn, &request)?;
    assert!(!second.changed);
    Ok(())
}

#[test]
fn test_select_with_ilike_filter() -> TestResult {
    let conn = users_db()?;
    seed(&conn, &[(1, "alice"), (2, "Andy"), (3, "bob"), (4, "carla")])?;

    let request = ReconcileRequest {
        table: "users".to_string(),
        columns: vec![
            ColumnSpec::new("id", "Integer", None),
            ColumnSpec::new("name", "String", None),
        ],
        state: State::Select,
        filter: Some(FilterExpr::parse(
            &json!({"ilike": {"column": "name", "value": "a%"}}),
        )?),
        ..Default::default()
    };

    let before = snapshot(&conn)?;
    let result = run(&conn, &request)?;
    assert!(!result.changed);

    let mut names: Vec<Value> = result
        .rows
        .unwrap()
        .into_iter()
        .map(|r| r["name"].clone())
        .collect();
    names.sort_by_key(|v| v.to_text());
    assert_eq!(
        names,
        vec![Value::Text("Andy".to_string()), Value::Text("alice".to_string())]
    );
    assert_eq!(snapshot(&conn)?, before);

    // like stays case-sensitive
    let like = ReconcileRequest {
        filter: Some(FilterExpr::compare("like", "name", json!("a%"))),
        ..request
    };
    assert_eq!(run(&conn, &like)?.rows.unwrap().len(), 1);
    Ok(())
}

#[test]
fn test_insert_never_deduplicates() -> TestResult {
    let conn = users_db()?;
    let request = user_request(State::Insert, 1, "a");

    let first = run(&conn, &request)?;
    assert!(first.changed);
    assert_eq!(first.rows.unwrap().len(), 1);

    let second = run(&conn, &request)?;
    assert!(second.changed);
    assert_eq!(second.rows.unwrap().len(), 2);
    assert_eq!(snapshot(&conn)?.len(), 2);
    Ok(())
}

#[test]
fn test_unknown_type_fails_before_any_query() -> TestResult {
    // the table does not exist: any executed query would fail differently
    let conn = db::open(&ConnectionDescriptor::Memory)?;
    let request = ReconcileRequest {
        table: "missing".to_string(),
        keys: vec!["id".to_string()],
        columns: vec![ColumnSpec::new("id", "Float", Some(json!(1)))],
        ..Default::default()
    };

    let registry = TypeRegistry::standard();
    let err = Reconciler::new(&conn, &registry).run(&request).unwrap_err();
    assert_eq!(err.kind(), "UnknownTypeError");
    Ok(())
}

#[test]
fn test_unknown_operator_and_column_fail() -> TestResult {
    let conn = users_db()?;
    seed(&conn, &[(1, "a")])?;
    let registry = TypeRegistry::standard();
    let reconciler = Reconciler::new(&conn, &registry);

    let mut request = user_request(State::Absent, 1, "a");
    request.filter = Some(FilterExpr::compare("__eq__", "name", json!("a")));
    assert_eq!(reconciler.run(&request).unwrap_err().kind(), "UnknownOperatorError");

    request.filter = Some(FilterExpr::compare("eq", "nickname", json!("a")));
    assert_eq!(reconciler.run(&request).unwrap_err().kind(), "UnknownColumnError");

    // nothing was deleted
    assert_eq!(snapshot(&conn)?.len(), 1);
    Ok(())
}

#[test]
fn test_check_mode_never_writes() -> TestResult {
    let cases = vec![
        user_request(State::Present, 1, "a"),
        user_request(State::Present, 9, "new"),
        user_request(State::Present, 1, "changed"),
        user_request(State::Absent, 1, "a"),
        user_request(State::Absent, 9, "none"),
        user_request(State::Insert, 1, "a"),
    ];

    for request in cases {
        let checked_db = users_db()?;
        let applied_db = users_db()?;
        seed(&checked_db, &[(1, "a")])?;
        seed(&applied_db, &[(1, "a")])?;

        let before = snapshot(&checked_db)?;
        let checked_request = ReconcileRequest {
            check_mode: true,
            ..request.clone()
        };
        let checked = run(&checked_db, &checked_request)?;
        assert_eq!(
            snapshot(&checked_db)?,
            before,
            "check mode wrote for {:?}",
            request.state
        );

        let applied = run(&applied_db, &request)?;
        assert_eq!(
            checked.changed, applied.changed,
            "changed flag differs for {:?}",
            request.state
        );
    }
    Ok(())
}

#[test]
fn test_check_mode_projects_desired_values() -> TestResult {
    let conn = users_db()?;
    let request = ReconcileRequest {
        check_mode: true,
        ..user_request(State::Present, 5, "e")
    };
    let result = run(&conn, &request)?;
    assert!(result.changed);
    let rows = result.rows.unwrap();
    assert_eq!(rows[0]["id"], Value::Integer(5));
    assert_eq!(rows[0]["name"], Value::Text("e".to_string()));
    Ok(())
}

#[test]
fn test_count_and_distinct() -> TestResult {
    let conn = users_db()?;
    seed(&conn, &[(1, "a"), (2, "a"), (3, "b")])?;

    let count = |distinct: bool| -> Result<ReconcileResult, Box<dyn std::error::Error>> {
        run(
            &conn,
            &ReconcileRequest {
                table: "users".to_string(),
                columns: vec![ColumnSpec::new("name", "String", None)],
                state: State::Count,
                distinct,
                ..Default::default()
            },
        )
    };

    let all = count(false)?;
    assert!(!all.changed);
    assert_eq!(all.rows.unwrap()[0]["count"], Value::Integer(3));
    assert_eq!(count(true)?.rows.unwrap()[0]["count"], Value::Integer(2));
    Ok(())
}

#[test]
fn test_typed_columns_are_idempotent() -> TestResult {
    let conn = users_db()?;
    let request = ReconcileRequest {
        table: "users".to_string(),
        keys: vec!["id".to_string()],
        columns: vec![
            ColumnSpec::new("id", "Integer", Some(json!("3"))),
            ColumnSpec::new("active", "Boolean", Some(json!("yes"))),
            ColumnSpec::new("joined", "Date", Some(json!("2024-02-29 08:00:00"))),
        ],
        ..Default::default()
    };

    assert!(run(&conn, &request)?.changed);
    let second = run(&conn, &request)?;
    assert!(!second.changed);

    let rows = second.rows.unwrap();
    assert_eq!(rows[0]["active"], Value::Boolean(true));
    assert_eq!(
        serde_json::to_value(&rows[0]["joined"])?,
        json!("2024-02-29")
    );
    assert_eq!(snapshot(&conn)?, vec!["3|NULL|1|'2024-02-29'".to_string()]);
    Ok(())
}

#[test]
fn test_state_persists_in_file_database() -> TestResult {
    let temp_dir = tempfile::TempDir::new()?;
    let path = temp_dir.path().join("state.db");
    let descriptor: ConnectionDescriptor = format!("sqlite://{}", path.display()).parse()?;

    {
        let conn = db::open(&descriptor)?;
        conn.execute(
            "CREATE TABLE users (id INTEGER, name VARCHAR, active BOOLEAN, joined DATE)",
            [],
        )?;
        assert!(run(&conn, &user_request(State::Present, 1, "a"))?.changed);
    }

    let conn = db::open(&descriptor)?;
    assert!(!run(&conn, &user_request(State::Present, 1, "a"))?.changed);
    Ok(())
}

#[test]
fn test_count_ignores_a_column_named_count() -> TestResult {
    let conn = db::open(&ConnectionDescriptor::Memory)?;
    conn.execute("CREATE TABLE visits (\"count\" DATE)", [])?;
    conn.execute("INSERT INTO visits VALUES ('2024-01-01')", [])?;

    let request = ReconcileRequest {
        table: "visits".to_string(),
        columns: vec![ColumnSpec::new("count", "Date", None)],
        state: State::Count,
        ..Default::default()
    };
    let result = run(&conn, &request)?;
    assert!(!result.changed);
    assert_eq!(result.rows.unwrap()[0]["count"], Value::Integer(1));
    Ok(())
}

fn table_names(conn: &Connection) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

#[test]
fn test_check_mode_does_not_create_the_table() -> TestResult {
    let temp_dir = tempfile::TempDir::new()?;
    let path = temp_dir.path().join("fresh.db");
    let descriptor: ConnectionDescriptor = format!("sqlite://{}", path.display()).parse()?;
    let conn = db::open(&descriptor)?;
    let registry = TypeRegistry::standard();
    let reconciler = Reconciler::new(&conn, &registry);

    let present = ReconcileRequest {
        check_mode: true,
        ..user_request(State::Present, 1, "a")
    };
    let result = reconciler.apply(&present, true)?;
    assert!(result.changed);
    assert_eq!(result.rows.unwrap()[0]["name"], Value::Text("a".to_string()));

    let absent = ReconcileRequest {
        check_mode: true,
        ..user_request(State::Absent, 1, "a")
    };
    assert!(!reconciler.apply(&absent, true)?.changed);

    assert!(table_names(&conn)?.is_empty());
    Ok(())
}

#[test]
fn test_apply_creates_missing_table() -> TestResult {
    let conn = db::open(&ConnectionDescriptor::Memory)?;
    let registry = TypeRegistry::standard();
    let reconciler = Reconciler::new(&conn, &registry);
    let request = user_request(State::Present, 1, "a");

    let first = reconciler.apply(&request, true)?;
    assert!(first.changed);
    assert_eq!(table_names(&conn)?, vec!["users".to_string()]);

    // the table now exists, so this is a plain converged run
    assert!(!reconciler.apply(&request, true)?.changed);
    assert!(!reconciler.run(&request)?.changed);
    Ok(())
}

#[test]
fn test_ilike_folds_ascii_letters_only() -> TestResult {
    let conn = users_db()?;
    seed(&conn, &[(1, "Émile"), (2, "émile"), (3, "EVA")])?;

    let names = |pattern: &str| -> Result<Vec<i64>, Box<dyn std::error::Error>> {
        let request = ReconcileRequest {
            table: "users".to_string(),
            columns: vec![ColumnSpec::new("id", "Integer", None)],
            state: State::Select,
            filter: Some(FilterExpr::compare("ilike", "name", json!(pattern))),
            ..Default::default()
        };
        let mut ids: Vec<i64> = run(&conn, &request)?
            .rows
            .unwrap_or_default()
            .into_iter()
            .filter_map(|row| match row["id"] {
                Value::Integer(id) => Some(id),
                _ => None,
            })
            .collect();
        ids.sort();
        Ok(ids)
    };

    assert_eq!(names("e%")?, vec![3]);
    assert_eq!(names("é%")?, vec![2]);
    assert_eq!(names("%MILE")?, vec![1, 2]);
    Ok(())
}
