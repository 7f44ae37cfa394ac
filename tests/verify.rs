mod common;

use rusty_fake_mysql::{execute, Cell, ExecOutput};

#[test]
fn verify_product_features() -> anyhow::Result<()> {
    let (server, mut session) = common::setup_db()?;

    // 1. DDL: idempotent CREATE DATABASE / CREATE TABLE
    common::exec(&server, &mut session, "CREATE DATABASE IF NOT EXISTS product_db")?;
    common::exec(&server, &mut session, "CREATE DATABASE IF NOT EXISTS product_db")?;
    common::exec(&server, &mut session, "USE product_db")?;

    common::exec(
        &server,
        &mut session,
        "CREATE TABLE IF NOT EXISTS inventory (id BIGINT NOT NULL, item TEXT, qty BIGINT, PRIMARY KEY (id))",
    )?;
    common::exec(
        &server,
        &mut session,
        "CREATE TABLE IF NOT EXISTS inventory (id BIGINT NOT NULL, item TEXT, qty BIGINT, PRIMARY KEY (id))",
    )?;

    // 2. Inserts, including values that would be injections if mishandled.
    for (id, item, qty) in [
        (1, "Apple", 100),
        (2, "Banana", 200),
        (3, "Cherry", 50),
        (4, "O''Reilly", 10),
        (5, "x''); DROP DATABASE product_db; --", 1),
        (6, "Apple", 999),
    ] {
        let n = common::exec(
            &server,
            &mut session,
            &format!("INSERT INTO inventory (id, item, qty) VALUES ({id}, '{item}', {qty})"),
        )?;
        assert_eq!(n, 1);
    }

    // 3. COUNT(*), with and without WHERE
    let rows = common::query(&server, &mut session, "SELECT count(*) FROM inventory")?;
    assert_eq!(rows, vec![vec![Cell::Int(6)]]);

    let rows = common::query(
        &server,
        &mut session,
        "SELECT count(*) FROM inventory WHERE item = 'Banana'",
    )?;
    assert_eq!(rows, vec![vec![Cell::Int(1)]]);

    let rows = common::query(
        &server,
        &mut session,
        "SELECT count(*) FROM inventory WHERE item = 'O''Reilly'",
    )?;
    assert_eq!(rows, vec![vec![Cell::Int(1)]]);

    // 4. Plain SELECT
    let rows = common::query(&server, &mut session, "SELECT id, item, qty FROM inventory")?;
    assert_eq!(rows.len(), 6);

    // 5. ORDER BY + LIMIT/OFFSET, both spellings
    let rows = common::query(
        &server,
        &mut session,
        "SELECT id FROM inventory ORDER BY qty DESC LIMIT 1",
    )?;
    assert_eq!(common::ints(&rows), vec![6]);

    let rows = common::query(
        &server,
        &mut session,
        "SELECT id FROM inventory ORDER BY id ASC LIMIT 2 OFFSET 1",
    )?;
    assert_eq!(common::ints(&rows), vec![2, 3]);

    let rows = common::query(
        &server,
        &mut session,
        "SELECT id FROM inventory ORDER BY id ASC LIMIT 1, 2",
    )?;
    assert_eq!(common::ints(&rows), vec![2, 3]);

    // 6. DISTINCT
    let rows = common::query(
        &server,
        &mut session,
        "SELECT DISTINCT item FROM inventory ORDER BY item ASC",
    )?;
    assert_eq!(rows.len(), 5);

    // 7. UPDATE then DELETE
    let n = common::exec(
        &server,
        &mut session,
        "UPDATE inventory SET qty = qty - 10 WHERE item = 'Apple'",
    )?;
    assert_eq!(n, 2);
    let rows = common::query(
        &server,
        &mut session,
        "SELECT qty FROM inventory WHERE id = 1",
    )?;
    assert_eq!(rows, vec![vec![Cell::Int(90)]]);

    let n = common::exec(&server, &mut session, "DELETE FROM inventory WHERE qty < 60")?;
    assert_eq!(n, 3);
    let rows = common::query(&server, &mut session, "SELECT count(*) FROM inventory")?;
    assert_eq!(rows, vec![vec![Cell::Int(3)]]);

    // 8. Cleanup
    common::exec(&server, &mut session, "DROP DATABASE IF EXISTS product_db")?;
    Ok(())
}

#[test]
fn verify_table_qualifiers_and_errors() -> anyhow::Result<()> {
    let (server, mut session) = common::setup_db()?;
    common::exec(
        &server,
        &mut session,
        "CREATE TABLE test.kv (k INT PRIMARY KEY, v TEXT)",
    )?;
    common::exec(&server, &mut session, "INSERT INTO test.kv VALUES (1, 'one')")?;

    // Qualified names resolve without a USE.
    let mut bare = rusty_fake_mysql::Session::new();
    let rows = common::query(&server, &mut bare, "SELECT v FROM test.kv WHERE k = 1")?;
    assert_eq!(common::texts(&rows), vec!["one".to_string()]);

    // Bare names without a selected database fail.
    assert!(execute("SELECT * FROM kv", &server, &mut bare).is_err());

    // Unknown table and unknown database are reported as such.
    assert!(execute("SELECT * FROM test.missing", &server, &mut session).is_err());
    assert!(execute("SELECT * FROM nodb.kv", &server, &mut session).is_err());

    // Constant SELECT still answers.
    let out = execute("SELECT 1", &server, &mut session)?;
    match out {
        ExecOutput::ResultSet { rows, .. } => assert_eq!(rows, vec![vec![Cell::Int(1)]]),
        other => panic!("unexpected {other:?}"),
    }
    Ok(())
}
