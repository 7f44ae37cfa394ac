use crate::context::QueryContext;
use crate::error::FakeError;
use crate::index::{self, IndexBranch, TableIndexRefs};
use crate::model::{Dataset, IndexDef, IndexKind, TableDef};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// One table: its schema, the live snapshot, and the secondary index refs.
#[derive(Debug, Clone)]
pub struct TableStorage {
    pub def: TableDef,
    pub dataset: Dataset,
    pub index_refs: TableIndexRefs,
}

#[derive(Debug, Default)]
struct DatabaseState {
    tables: IndexMap<String, TableStorage>,
}

#[derive(Debug, Default)]
struct ServerState {
    databases: IndexMap<String, DatabaseState>,
}

/// The in-memory server. Statements read cloned snapshots and publish whole
/// new table states through `save_table`; nothing is visible until then.
#[derive(Clone, Default)]
pub struct Server {
    inner: Arc<Mutex<ServerState>>,
}

impl Server {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_database(&self, name: &str) -> Result<(), FakeError> {
        let mut st = self.inner.lock();
        if st.databases.contains_key(name) {
            return Err(FakeError::Invalid(format!(
                "database already exists: {name}"
            )));
        }
        st.databases.insert(name.to_string(), DatabaseState::default());
        Ok(())
    }

    pub fn drop_database(&self, name: &str) -> Result<(), FakeError> {
        let mut st = self.inner.lock();
        if st.databases.shift_remove(name).is_none() {
            return Err(FakeError::NotFound(format!("unknown database: {name}")));
        }
        Ok(())
    }

    pub fn has_database(&self, name: &str) -> bool {
        self.inner.lock().databases.contains_key(name)
    }

    pub fn list_databases(&self) -> Vec<String> {
        let mut out: Vec<String> = self.inner.lock().databases.keys().cloned().collect();
        out.sort();
        out
    }

    pub fn list_tables(&self, db: &str) -> Result<Vec<String>, FakeError> {
        let st = self.inner.lock();
        let database = st
            .databases
            .get(db)
            .ok_or_else(|| FakeError::NotFound(format!("unknown database: {db}")))?;
        let mut out: Vec<String> = database.tables.keys().cloned().collect();
        out.sort();
        Ok(out)
    }

    /// Install a table. Index refs start with an empty root branch per
    /// materialized index; a single-column PRIMARY is never materialized.
    pub fn create_table(&self, def: TableDef) -> Result<(), FakeError> {
        let mut st = self.inner.lock();
        let database = st
            .databases
            .get_mut(&def.db)
            .ok_or_else(|| FakeError::NotFound(format!("unknown database: {}", def.db)))?;
        if database.tables.contains_key(&def.name) {
            return Err(FakeError::Invalid(format!(
                "table already exists: {}.{}",
                def.db, def.name
            )));
        }
        let mut index_refs = TableIndexRefs::new();
        for idx in index::all_indexes(&def) {
            if !(idx.kind == IndexKind::Primary && idx.columns.len() == 1) {
                index_refs.insert(idx.name.clone(), IndexBranch::new());
            }
        }
        let name = def.name.clone();
        database.tables.insert(
            name,
            TableStorage {
                def,
                dataset: Dataset::new(),
                index_refs,
            },
        );
        Ok(())
    }

    pub fn drop_table(&self, db: &str, table: &str) -> Result<(), FakeError> {
        let mut st = self.inner.lock();
        let database = st
            .databases
            .get_mut(db)
            .ok_or_else(|| FakeError::NotFound(format!("unknown database: {db}")))?;
        if database.tables.shift_remove(table).is_none() {
            return Err(FakeError::NotFound(format!("unknown table: {db}.{table}")));
        }
        Ok(())
    }

    /// Add a secondary index and backfill it from the current snapshot.
    pub fn create_index(&self, db: &str, table: &str, def: IndexDef) -> Result<(), FakeError> {
        let mut st = self.inner.lock();
        let storage = Self::table_mut(&mut st, db, table)?;
        if storage.def.indexes.iter().any(|i| i.name == def.name) {
            return Err(FakeError::Invalid(format!(
                "index already exists: {}",
                def.name
            )));
        }
        for col in &def.columns {
            if !storage.def.has_column(col) {
                return Err(FakeError::NotFound(format!("unknown column: {col}")));
            }
        }

        let applicable = [index::ApplicableIndex::from_def(&def)];
        let mut branch = IndexBranch::new();
        for (row_id, row) in &storage.dataset {
            for key in index::compute_index_keys(&applicable, row) {
                index::add_to_index(&mut branch, &key.path, key.store_as_unique, row_id);
            }
        }
        storage.index_refs.insert(def.name.clone(), branch);
        storage.def.indexes.push(def);
        Ok(())
    }

    pub fn table_def(&self, db: &str, table: &str) -> Result<TableDef, FakeError> {
        let mut st = self.inner.lock();
        Ok(Self::table_mut(&mut st, db, table)?.def.clone())
    }

    /// Clone the current table state for a statement to work on.
    pub fn snapshot(&self, db: &str, table: &str) -> Result<TableStorage, FakeError> {
        let mut st = self.inner.lock();
        Ok(Self::table_mut(&mut st, db, table)?.clone())
    }

    /// Publish a statement's result, atomically replacing the prior snapshot.
    pub fn save_table(
        &self,
        db: &str,
        table: &str,
        dataset: Dataset,
        index_refs: TableIndexRefs,
    ) -> Result<(), FakeError> {
        let mut st = self.inner.lock();
        let storage = Self::table_mut(&mut st, db, table)?;
        debug!(db, table, rows = dataset.len(), "save_table");
        storage.dataset = dataset;
        storage.index_refs = index_refs;
        Ok(())
    }

    fn table_mut<'a>(
        st: &'a mut ServerState,
        db: &str,
        table: &str,
    ) -> Result<&'a mut TableStorage, FakeError> {
        st.databases
            .get_mut(db)
            .ok_or_else(|| FakeError::NotFound(format!("unknown database: {db}")))?
            .tables
            .get_mut(table)
            .ok_or_else(|| FakeError::NotFound(format!("unknown table: {db}.{table}")))
    }
}

/// One caller's connection: the selected database plus the request-scoped
/// query context.
#[derive(Debug, Default)]
pub struct Session {
    pub current_db: Option<String>,
    pub ctx: QueryContext,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_database(db: impl Into<String>) -> Self {
        Self {
            current_db: Some(db.into()),
            ctx: QueryContext::default(),
        }
    }
}
