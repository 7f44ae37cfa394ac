#![allow(dead_code)]

use anyhow::Result;
use rusty_fake_mysql::{execute, Cell, ExecOutput, Server, Session};
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(Level::WARN)
            .with_test_writer()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// Fresh server with a `test` database selected.
pub fn setup_db() -> Result<(Server, Session)> {
    init_tracing();
    let server = Server::new();
    let mut session = Session::new();
    exec(&server, &mut session, "CREATE DATABASE test")?;
    exec(&server, &mut session, "USE test")?;
    Ok((server, session))
}

pub fn exec(server: &Server, session: &mut Session, sql: &str) -> Result<u64> {
    match execute(sql, server, session)? {
        ExecOutput::Ok { affected_rows } => Ok(affected_rows),
        ExecOutput::ResultSet { .. } => Ok(0),
    }
}

pub fn query(server: &Server, session: &mut Session, sql: &str) -> Result<Vec<Vec<Cell>>> {
    match execute(sql, server, session)? {
        ExecOutput::ResultSet { rows, .. } => Ok(rows),
        other => anyhow::bail!("expected result set, got {other:?}"),
    }
}

/// Flatten a single-column integer result set.
pub fn ints(rows: &[Vec<Cell>]) -> Vec<i64> {
    rows.iter()
        .filter_map(|r| r.first().and_then(|c| c.as_i64()))
        .collect()
}

/// Flatten a single-column text result set.
pub fn texts(rows: &[Vec<Cell>]) -> Vec<String> {
    rows.iter()
        .filter_map(|r| match r.first() {
            Some(Cell::Text(s)) => Some(s.clone()),
            _ => None,
        })
        .collect()
}
