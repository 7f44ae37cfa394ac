mod common;

#[test]
fn verify_where_ops() -> anyhow::Result<()> {
    let (server, mut session) = common::setup_db()?;

    common::exec(
        &server,
        &mut session,
        "CREATE TABLE t (id INT PRIMARY KEY, name VARCHAR(100))",
    )?;
    common::exec(
        &server,
        &mut session,
        "INSERT INTO t (id, name) VALUES \
         (1,'Alice'),(2,'Bob'),(3,'Bobby'),(4,'Rob'),(5,NULL),(6,'100% legit')",
    )?;

    let rows = common::query(
        &server,
        &mut session,
        "SELECT id FROM t WHERE id IN (1,3,5) ORDER BY id",
    )?;
    assert_eq!(common::ints(&rows), vec![1, 3, 5]);

    let rows = common::query(
        &server,
        &mut session,
        "SELECT id FROM t WHERE id NOT IN (1,3,5) ORDER BY id",
    )?;
    assert_eq!(common::ints(&rows), vec![2, 4, 6]);

    // NULL in the list poisons misses but not hits.
    let rows = common::query(
        &server,
        &mut session,
        "SELECT count(*) FROM t WHERE name IN ('Bob', NULL)",
    )?;
    assert_eq!(common::ints(&rows), vec![1]);

    let rows = common::query(
        &server,
        &mut session,
        "SELECT count(*) FROM t WHERE name NOT IN ('Bob', NULL)",
    )?;
    assert_eq!(common::ints(&rows), vec![0]);

    let rows = common::query(
        &server,
        &mut session,
        "SELECT id FROM t WHERE id BETWEEN 2 AND 4 ORDER BY id",
    )?;
    assert_eq!(common::ints(&rows), vec![2, 3, 4]);

    let rows = common::query(
        &server,
        &mut session,
        "SELECT id FROM t WHERE id NOT BETWEEN 2 AND 4 ORDER BY id",
    )?;
    assert_eq!(common::ints(&rows), vec![1, 5, 6]);

    let rows = common::query(
        &server,
        &mut session,
        "SELECT id FROM t WHERE name LIKE 'Bob%' ORDER BY id",
    )?;
    assert_eq!(common::ints(&rows), vec![2, 3]);

    let rows = common::query(
        &server,
        &mut session,
        "SELECT id FROM t WHERE name LIKE '%ob' ORDER BY id",
    )?;
    assert_eq!(common::ints(&rows), vec![2, 4]);

    let rows = common::query(
        &server,
        &mut session,
        "SELECT id FROM t WHERE name LIKE '_ob' ORDER BY id",
    )?;
    assert_eq!(common::ints(&rows), vec![2, 4]);

    let rows = common::query(
        &server,
        &mut session,
        "SELECT count(*) FROM t WHERE id BETWEEN 1 AND NULL",
    )?;
    assert_eq!(common::ints(&rows), vec![0]);

    let rows = common::query(
        &server,
        &mut session,
        "SELECT id FROM t WHERE name IS NULL",
    )?;
    assert_eq!(common::ints(&rows), vec![5]);

    let rows = common::query(
        &server,
        &mut session,
        "SELECT id FROM t WHERE name IS NOT NULL AND id > 3 ORDER BY id",
    )?;
    assert_eq!(common::ints(&rows), vec![4, 6]);

    Ok(())
}
