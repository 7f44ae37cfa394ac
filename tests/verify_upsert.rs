mod common;

use rusty_fake_mysql::{execute, Cell, FakeError, RowId};

#[test]
fn verify_on_duplicate_key_update_with_values() -> anyhow::Result<()> {
    let (server, mut session) = common::setup_db()?;
    common::exec(
        &server,
        &mut session,
        "CREATE TABLE counters (id INT PRIMARY KEY, count INT)",
    )?;
    common::exec(&server, &mut session, "INSERT INTO counters VALUES (1, 4)")?;

    // The existing row gains the would-be-inserted count.
    let n = common::exec(
        &server,
        &mut session,
        "INSERT INTO counters VALUES (1, 3) ON DUPLICATE KEY UPDATE count = count + VALUES(count)",
    )?;
    assert_eq!(n, 2, "MySQL reports 2 for an upsert that updated");

    let rows = common::query(&server, &mut session, "SELECT count FROM counters WHERE id = 1")?;
    assert_eq!(rows, vec![vec![Cell::Int(7)]]);

    // Nothing synthetic leaked into the stored row.
    let storage = server.snapshot("test", "counters")?;
    let row = storage.dataset.get(&RowId::Int(1)).unwrap();
    let columns: Vec<&String> = row.keys().collect();
    assert_eq!(columns, vec!["id", "count"]);

    // A fresh key inserts normally.
    let n = common::exec(
        &server,
        &mut session,
        "INSERT INTO counters VALUES (2, 5) ON DUPLICATE KEY UPDATE count = count + VALUES(count)",
    )?;
    assert_eq!(n, 1);

    // An upsert that lands on the current value is a no-op.
    let n = common::exec(
        &server,
        &mut session,
        "INSERT INTO counters VALUES (2, 5) ON DUPLICATE KEY UPDATE count = VALUES(count)",
    )?;
    assert_eq!(n, 0);
    Ok(())
}

#[test]
fn verify_insert_ignore_skips_conflicts() -> anyhow::Result<()> {
    let (server, mut session) = common::setup_db()?;
    common::exec(
        &server,
        &mut session,
        "CREATE TABLE t (id INT PRIMARY KEY, v TEXT)",
    )?;
    common::exec(&server, &mut session, "INSERT INTO t VALUES (1,'a')")?;

    let err = execute("INSERT INTO t VALUES (1,'b')", &server, &mut session).unwrap_err();
    assert!(matches!(err, FakeError::UniqueKeyViolation { .. }));

    // IGNORE keeps the statement going; only the fresh row lands.
    let n = common::exec(
        &server,
        &mut session,
        "INSERT IGNORE INTO t VALUES (1,'b'), (2,'c')",
    )?;
    assert_eq!(n, 1);
    let rows = common::query(&server, &mut session, "SELECT v FROM t ORDER BY id")?;
    assert_eq!(common::texts(&rows), vec!["a".to_string(), "c".to_string()]);
    Ok(())
}

#[test]
fn verify_upsert_on_unique_secondary_key() -> anyhow::Result<()> {
    let (server, mut session) = common::setup_db()?;
    common::exec(
        &server,
        &mut session,
        "CREATE TABLE accounts (id INT PRIMARY KEY, email TEXT, logins INT)",
    )?;
    common::exec(
        &server,
        &mut session,
        "CREATE UNIQUE INDEX u_email ON accounts (email)",
    )?;
    common::exec(
        &server,
        &mut session,
        "INSERT INTO accounts VALUES (1, 'a@x', 1)",
    )?;

    // Conflict arrives via the unique secondary, not the PK.
    let n = common::exec(
        &server,
        &mut session,
        "INSERT INTO accounts VALUES (2, 'a@x', 1) ON DUPLICATE KEY UPDATE logins = logins + 1",
    )?;
    assert_eq!(n, 2);

    let rows = common::query(
        &server,
        &mut session,
        "SELECT id, logins FROM accounts WHERE email = 'a@x'",
    )?;
    assert_eq!(rows, vec![vec![Cell::Int(1), Cell::Int(2)]]);

    // The secondary violation without ON DUPLICATE names its constraint.
    let err = execute(
        "INSERT INTO accounts VALUES (3, 'a@x', 1)",
        &server,
        &mut session,
    )
    .unwrap_err();
    match err {
        FakeError::UniqueKeyViolation { constraint } => assert_eq!(constraint, "u_email"),
        other => panic!("expected unique violation, got {other}"),
    }
    Ok(())
}
