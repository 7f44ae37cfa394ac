use crate::model::RowId;
use std::collections::{HashMap, HashSet};

/// Request-scoped execution flags and the dirty primary-key protocol.
///
/// Set at request entry, cleared at request exit. A PK written during the
/// request is "dirty"; while replica reads are being prevented, any query
/// whose result contains a dirty PK fails instead of serving a stale row.
#[derive(Debug, Default, Clone)]
pub struct QueryContext {
    pub use_replica: bool,
    pub in_request: bool,
    pub prevent_replica_reads_after_writes: bool,
    pub relax_unique_constraints: bool,
    pub strict_schema: bool,
    pub query: Option<String>,
    dirty_pks: HashMap<String, HashSet<RowId>>,
}

impl QueryContext {
    pub fn begin_request(&mut self) {
        self.in_request = true;
    }

    pub fn end_request(&mut self) {
        self.in_request = false;
        self.query = None;
        self.dirty_pks.clear();
    }

    fn table_key(db: &str, table: &str) -> String {
        format!("{db}.{table}")
    }

    pub fn record_dirty_pk(&mut self, db: &str, table: &str, id: RowId) {
        self.dirty_pks
            .entry(Self::table_key(db, table))
            .or_default()
            .insert(id);
    }

    pub fn dirty_pks(&self, db: &str, table: &str) -> Option<&HashSet<RowId>> {
        self.dirty_pks.get(&Self::table_key(db, table))
    }

    pub fn current_query(&self) -> String {
        self.query.clone().unwrap_or_default()
    }
}
