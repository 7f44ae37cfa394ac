use crate::error::FakeError;
use crate::expr::{BinOp, ColumnRef, EvalContext, Expr};
use crate::index::{self, ApplicableIndex, TableIndexRefs};
use crate::integrity::{check_unique_constraints, coerce_row_to_schema};
use crate::model::{compare_cells, Cell, ColumnDef, Dataset, IndexDef, Row, RowId, TableDef};
use crate::store::{Server, Session};
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct OrderByRule {
    pub expr: Expr,
    pub direction: OrderDirection,
}

impl OrderByRule {
    /// Bare, unqualified column references are allowed to fall through to
    /// NULL during key materialization, so sorting never needs a schema
    /// lookup for columns a row does not carry.
    pub fn new(mut expr: Expr, direction: OrderDirection) -> Self {
        if let Some(col) = expr.as_column_mut() {
            if col.table.is_none() {
                col.allow_fallthrough();
            }
        }
        Self { expr, direction }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LimitClause {
    pub offset: usize,
    pub rowcount: usize,
}

#[derive(Debug, Clone)]
pub struct SetAssignment {
    pub column: ColumnRef,
    pub expr: Expr,
}

/// Planner inputs: what the table can filter on.
pub struct PlannerHints<'a> {
    pub columns: &'a [ColumnDef],
    pub indexes: &'a [IndexDef],
}

/// Shared base of every statement: WHERE/ORDER BY/LIMIT application and the
/// SET-clause mutation core used by UPDATE and INSERT … ON DUPLICATE KEY
/// UPDATE.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub query: String,
    pub ignore_dupes: bool,
}

impl QueryPlan {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ignore_dupes: false,
        }
    }

    /// `db.table` or bare `table` resolved against the session's current
    /// database.
    pub fn parse_table_name(
        session: &Session,
        raw: &str,
    ) -> Result<(String, String), FakeError> {
        let mut parts = raw.split('.');
        let first = parts.next().unwrap_or_default();
        match (parts.next(), parts.next()) {
            (None, _) => {
                let db = session
                    .current_db
                    .clone()
                    .ok_or_else(|| FakeError::Invalid("no database selected".into()))?;
                Ok((db, first.to_string()))
            }
            (Some(table), None) => Ok((first.to_string(), table.to_string())),
            (Some(_), Some(_)) => Err(FakeError::Invalid(format!(
                "table name has too many parts: {raw}"
            ))),
        }
    }

    /// Filter the dataset by the WHERE expression, letting an index discharge
    /// equality predicates first, then guard replica reads against PKs
    /// written earlier in the request.
    pub fn apply_where(
        &self,
        session: &Session,
        dataset: Dataset,
        index_refs: &TableIndexRefs,
        dirty_pks: Option<&HashSet<RowId>>,
        hints: Option<PlannerHints<'_>>,
        where_expr: Option<&Expr>,
    ) -> Result<Dataset, FakeError> {
        let Some(where_expr) = where_expr else {
            return Ok(dataset);
        };

        let (candidate, all_matched) = match hints {
            Some(hints) => filter_with_indexes(dataset, index_refs, &hints, where_expr),
            None => (dataset, false),
        };

        let filtered = if all_matched {
            candidate
        } else {
            let mut kept = Dataset::with_capacity(candidate.len());
            for (row_id, row) in candidate {
                let ctx = EvalContext::new(&row, session);
                if where_expr.passes(&ctx)? {
                    drop(ctx);
                    kept.insert(row_id, row);
                }
            }
            kept
        };

        if session.ctx.use_replica
            && session.ctx.in_request
            && session.ctx.prevent_replica_reads_after_writes
        {
            if let Some(dirty) = dirty_pks {
                if filtered.keys().any(|k| dirty.contains(k)) {
                    return Err(FakeError::ReplicaAfterWrite {
                        query: session.ctx.current_query(),
                    });
                }
            }
        }

        Ok(filtered)
    }

    /// Sort by pre-materialized key values (see `materialize_order_keys`).
    /// Numeric pairs compare as floats, anything else lexicographically;
    /// ties keep their pre-sort order.
    pub fn apply_order_by(&self, dataset: Dataset, rules: &[OrderByRule]) -> Dataset {
        if rules.is_empty() {
            return dataset;
        }
        let names: Vec<String> = rules.iter().map(|r| r.expr.name()).collect();
        let mut entries: Vec<(usize, RowId, Row)> = dataset
            .into_iter()
            .enumerate()
            .map(|(ordinal, (id, row))| (ordinal, id, row))
            .collect();

        entries.sort_by(|(a_ord, _, a_row), (b_ord, _, b_row)| {
            for (rule, name) in rules.iter().zip(&names) {
                let a_val = a_row.get(name).unwrap_or(&Cell::Null);
                let b_val = b_row.get(name).unwrap_or(&Cell::Null);
                let mut cmp = compare_cells(a_val, b_val);
                if rule.direction == OrderDirection::Desc {
                    cmp = cmp.reverse();
                }
                if cmp != Ordering::Equal {
                    return cmp;
                }
            }
            a_ord.cmp(b_ord)
        });

        entries.into_iter().map(|(_, id, row)| (id, row)).collect()
    }

    /// Keep keys `[offset, offset + rowcount)` in current order.
    pub fn apply_limit(&self, dataset: Dataset, limit: Option<&LimitClause>) -> Dataset {
        let Some(limit) = limit else {
            return dataset;
        };
        dataset
            .into_iter()
            .skip(limit.offset)
            .take(limit.rowcount)
            .collect()
    }

    /// Apply a SET clause to `filtered` rows of `original`, reconciling
    /// secondary indexes, enforcing unique constraints, recording dirty PKs,
    /// and publishing the result.
    ///
    /// `values` is the would-be-inserted row of an ON DUPLICATE KEY UPDATE;
    /// it feeds `VALUES()` during evaluation and nothing else.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_set(
        &self,
        server: &Server,
        session: &mut Session,
        db: &str,
        table: &str,
        filtered: &Dataset,
        mut original: Dataset,
        mut index_refs: TableIndexRefs,
        set_clause: &[SetAssignment],
        def: Option<&TableDef>,
        values: Option<&Row>,
    ) -> Result<(u64, Dataset, TableIndexRefs), FakeError> {
        // Validate targets against the schema and normalize to the schema's
        // canonical column spelling.
        let mut assignments: Vec<(String, &Expr)> = Vec::with_capacity(set_clause.len());
        for assign in set_clause {
            let raw = &assign.column.column;
            let name = match def {
                Some(def) => def
                    .column(raw)
                    .map(|c| c.name.clone())
                    .ok_or_else(|| {
                        FakeError::Invalid(format!("unknown column in SET clause: {raw}"))
                    })?,
                None => raw.clone(),
            };
            assignments.push((name, &assign.expr));
        }

        let pk_columns: &[String] = def.map(|d| d.primary_key_columns()).unwrap_or(&[]);
        let primary_key_changed = assignments
            .iter()
            .any(|(col, _)| pk_columns.iter().any(|pk| pk.eq_ignore_ascii_case(col)));

        // Indexes touched by the assignment, or all of them once the PK
        // moves. The sharding keyspace rides along as a unique-stored
        // pseudo-index.
        let applicable: Vec<ApplicableIndex> = match def {
            Some(def) => {
                let mut out: Vec<ApplicableIndex> = def
                    .indexes
                    .iter()
                    .filter(|idx| {
                        primary_key_changed
                            || idx.columns.iter().any(|ic| {
                                assignments.iter().any(|(col, _)| col.eq_ignore_ascii_case(ic))
                            })
                    })
                    .map(ApplicableIndex::from_def)
                    .collect();
                if let Some(shard) = &def.vitess_sharding {
                    out.push(ApplicableIndex {
                        name: shard.keyspace.clone(),
                        kind: crate::model::IndexKind::Index,
                        columns: vec![shard.sharding_key.clone()],
                        store_as_unique: true,
                    });
                }
                out
            }
            None => Vec::new(),
        };

        let single_primary_col = def
            .and_then(|d| d.single_primary())
            .map(|idx| idx.columns[0].clone());

        let mut update_count = 0u64;

        for row_id in filtered.keys() {
            let Some(row_before) = original.get(row_id).cloned() else {
                continue;
            };
            let mut update_row = row_before.clone();

            // Assignments see the row as updated so far, MySQL-style.
            let mut changes_found = false;
            for (col, expr) in &assignments {
                let new_val = {
                    let ctx = EvalContext::with_values(&update_row, values, session);
                    expr.evaluate(&ctx)?
                };
                if update_row.get(col) != Some(&new_val) {
                    changes_found = true;
                }
                update_row.insert(col.clone(), new_val);
            }
            if !changes_found {
                continue;
            }

            if let Some(def) = def {
                update_row = coerce_row_to_schema(&update_row, def, session.ctx.strict_schema)?;
            }

            let new_row_id = match &single_primary_col {
                Some(pk) => RowId::from_cell(update_row.get(pk).unwrap_or(&Cell::Null)),
                None => row_id.clone(),
            };

            let old_keys = index::compute_index_keys(&applicable, &row_before);
            let new_keys = index::compute_index_keys(&applicable, &update_row);

            // Cheap collision probe before the full constraint scan: the new
            // dataset key is taken, or a unique leaf at a new position holds
            // somebody else.
            if let Some(def) = def {
                let mut key_violation =
                    new_row_id != *row_id && original.contains_key(&new_row_id);
                if !key_violation {
                    for key in &new_keys {
                        if !key.store_as_unique {
                            continue;
                        }
                        if let Some(branch) = index_refs.get(&key.index) {
                            if let Some(leaf) = index::unique_leaf(branch, &key.path) {
                                if leaf != row_id {
                                    key_violation = true;
                                    break;
                                }
                            }
                        }
                    }
                }
                if key_violation {
                    if let Some(constraint) =
                        check_unique_constraints(&original, &update_row, def, Some(row_id))
                    {
                        if self.ignore_dupes {
                            continue;
                        }
                        if !session.ctx.relax_unique_constraints {
                            return Err(FakeError::UniqueKeyViolation { constraint });
                        }
                    }
                }
            }

            // Delete old positions before adding new ones so the probe above
            // stays valid for later rows in this statement.
            for key in &old_keys {
                if let Some(branch) = index_refs.get_mut(&key.index) {
                    index::remove_from_index(branch, &key.path, key.store_as_unique, row_id);
                }
            }
            for key in &new_keys {
                let branch = index_refs.entry(key.index.clone()).or_default();
                index::add_to_index(branch, &key.path, key.store_as_unique, &new_row_id);
            }

            if session.ctx.in_request {
                session.ctx.record_dirty_pk(db, table, new_row_id.clone());
            }

            if new_row_id != *row_id {
                trace!(%row_id, %new_row_id, table, "primary key rekey");
                original = rekey_in_place(original, row_id, &new_row_id, &update_row);
            } else {
                original.insert(row_id.clone(), update_row);
            }
            update_count += 1;
        }

        server.save_table(db, table, original.clone(), index_refs.clone())?;
        Ok((update_count, original, index_refs))
    }
}

/// Replace `(old → _)` with `(new → row)` without disturbing the position of
/// any other entry; insertion order is part of the dataset contract.
fn rekey_in_place(dataset: Dataset, old: &RowId, new: &RowId, row: &Row) -> Dataset {
    let mut out = Dataset::with_capacity(dataset.len());
    for (key, value) in dataset {
        if &key == old {
            out.insert(new.clone(), row.clone());
        } else {
            out.insert(key, value);
        }
    }
    out
}

/// Evaluate each ORDER BY expression against every row and stash the result
/// on the row under the expression's name. `apply_order_by` only ever reads
/// these pre-materialized keys.
pub fn materialize_order_keys(
    dataset: &mut Dataset,
    rules: &[OrderByRule],
    session: &Session,
) -> Result<(), FakeError> {
    for row in dataset.values_mut() {
        let mut keyed = Vec::with_capacity(rules.len());
        for rule in rules {
            let value = {
                let ctx = EvalContext::new(row, session);
                rule.expr.evaluate(&ctx)?
            };
            keyed.push((rule.expr.name(), value));
        }
        for (name, value) in keyed {
            row.insert(name, value);
        }
    }
    Ok(())
}

/// Greedy index filtering: collect `col = literal` conjuncts, pick the index
/// whose fields they cover best, and narrow the dataset by walking the refs.
/// `all_matched` reports that the predicate was discharged entirely.
fn filter_with_indexes(
    dataset: Dataset,
    index_refs: &TableIndexRefs,
    hints: &PlannerHints<'_>,
    where_expr: &Expr,
) -> (Dataset, bool) {
    let mut terms: Vec<(String, Cell)> = Vec::new();
    let pure = collect_eq_terms(where_expr, &mut terms);
    if terms.is_empty() {
        return (dataset, false);
    }
    // Contradictory or NULL-compared terms never match via `=`; leave those
    // to the row filter.
    let mut by_column: Vec<(String, Cell)> = Vec::new();
    for (col, val) in terms {
        if val.is_null() {
            return (dataset, false);
        }
        match by_column.iter().find(|(c, _)| c.eq_ignore_ascii_case(&col)) {
            Some((_, existing)) if *existing != val => return (dataset, false),
            Some(_) => {}
            None => by_column.push((col, val)),
        }
    }

    let mut best: Option<&IndexDef> = None;
    for index in hints.indexes {
        if index.columns.is_empty() {
            continue;
        }
        let covered = index.columns.iter().all(|ic| {
            by_column.iter().any(|(c, _)| c.eq_ignore_ascii_case(ic))
        });
        if covered && best.map(|b| index.columns.len() > b.columns.len()).unwrap_or(true) {
            best = Some(index);
        }
    }
    let Some(chosen) = best else {
        return (dataset, false);
    };

    let term_for = |field: &str| {
        by_column
            .iter()
            .find(|(c, _)| c.eq_ignore_ascii_case(field))
            .map(|(_, v)| v)
    };

    let ids: HashSet<RowId> = if chosen.is_single_primary() {
        match term_for(&chosen.columns[0]) {
            Some(val) => std::iter::once(RowId::from_cell(val)).collect(),
            None => return (dataset, false),
        }
    } else {
        let Some(branch) = index_refs.get(&chosen.name) else {
            return (dataset, false);
        };
        let mut path = Vec::with_capacity(chosen.columns.len());
        for field in &chosen.columns {
            match term_for(field) {
                Some(val) => path.push(val.to_string()),
                None => return (dataset, false),
            }
        }
        index::lookup_row_ids(branch, &path).into_iter().collect()
    };

    let narrowed: Dataset = dataset
        .into_iter()
        .filter(|(id, _)| ids.contains(id))
        .collect();

    let all_matched = pure
        && by_column.iter().all(|(col, _)| {
            chosen.columns.iter().any(|ic| ic.eq_ignore_ascii_case(col))
        });
    (narrowed, all_matched)
}

/// Gather `column = literal` terms from a conjunction. Returns whether the
/// whole tree consists of nothing else.
fn collect_eq_terms(expr: &Expr, out: &mut Vec<(String, Cell)>) -> bool {
    match expr {
        Expr::Binary {
            left,
            op: BinOp::And,
            right,
        } => {
            let l = collect_eq_terms(left, out);
            let r = collect_eq_terms(right, out);
            l && r
        }
        Expr::Binary {
            left,
            op: BinOp::Eq,
            right,
        } => match (left.as_ref(), right.as_ref()) {
            (Expr::Column(col), Expr::Literal(val)) | (Expr::Literal(val), Expr::Column(col)) => {
                out.push((col.column.clone(), val.clone()));
                true
            }
            _ => false,
        },
        _ => false,
    }
}
