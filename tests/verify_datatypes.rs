mod common;

use rusty_fake_mysql::{execute, Cell, FakeError};

#[test]
fn verify_datatypes() -> anyhow::Result<()> {
    let (server, mut session) = common::setup_db()?;
    common::exec(
        &server,
        &mut session,
        "CREATE TABLE types_t (id INT PRIMARY KEY, f DOUBLE, s TEXT, d DATE, dt DATETIME)",
    )?;

    common::exec(
        &server,
        &mut session,
        "INSERT INTO types_t VALUES (1, 1.5, 'one', '2024-02-29', '2024-02-29 12:30:00')",
    )?;

    let rows = common::query(
        &server,
        &mut session,
        "SELECT f, s, d, dt FROM types_t WHERE id = 1",
    )?;
    assert_eq!(
        rows,
        vec![vec![
            Cell::Float(1.5),
            Cell::Text("one".into()),
            Cell::Text("2024-02-29".into()),
            Cell::Text("2024-02-29 12:30:00".into()),
        ]]
    );

    // Integers widen into DOUBLE columns.
    common::exec(
        &server,
        &mut session,
        "INSERT INTO types_t (id, f) VALUES (2, 3)",
    )?;
    let rows = common::query(&server, &mut session, "SELECT f FROM types_t WHERE id = 2")?;
    assert_eq!(rows, vec![vec![Cell::Float(3.0)]]);

    // Malformed dates are rejected outright.
    let err = execute(
        "INSERT INTO types_t (id, d) VALUES (3, 'not-a-date')",
        &server,
        &mut session,
    )
    .unwrap_err();
    assert!(matches!(err, FakeError::SchemaCoercion(_)));

    Ok(())
}

#[test]
fn verify_strict_mode_rejects_loose_values() -> anyhow::Result<()> {
    let (server, mut session) = common::setup_db()?;
    common::exec(
        &server,
        &mut session,
        "CREATE TABLE t (id INT PRIMARY KEY, n INT NOT NULL)",
    )?;

    // Best-effort mode coerces text into the INT column.
    common::exec(&server, &mut session, "INSERT INTO t VALUES (1, '42')")?;
    let rows = common::query(&server, &mut session, "SELECT n FROM t WHERE id = 1")?;
    assert_eq!(rows, vec![vec![Cell::Int(42)]]);

    // Strict mode refuses the same statement.
    session.ctx.strict_schema = true;
    let err = execute("INSERT INTO t VALUES (2, '42')", &server, &mut session).unwrap_err();
    assert!(matches!(err, FakeError::SchemaCoercion(_)));

    // And NULL into a NOT NULL column.
    let err = execute("INSERT INTO t VALUES (2, NULL)", &server, &mut session).unwrap_err();
    assert!(matches!(err, FakeError::SchemaCoercion(_)));

    // Nothing landed while failing.
    session.ctx.strict_schema = false;
    let rows = common::query(&server, &mut session, "SELECT count(*) FROM t")?;
    assert_eq!(rows, vec![vec![Cell::Int(1)]]);
    Ok(())
}
