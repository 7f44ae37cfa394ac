use crate::error::FakeError;
use crate::expr::{BinOp, ColumnRef, EvalContext, Expr};
use crate::index;
use crate::integrity::{check_unique_constraints, coerce_row_to_schema};
use crate::model::{
    compare_cells, next_row_id, Cell, ColumnDef, Dataset, IndexDef, IndexKind, Row, RowId, SqlType,
    TableDef,
};
use crate::plan::{
    materialize_order_keys, LimitClause, OrderByRule, OrderDirection, PlannerHints, QueryPlan,
    SetAssignment,
};
use crate::store::{Server, Session};
use sqlparser::ast::{self, ObjectName, ObjectNamePart, SetExpr, Statement, TableFactor};
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug)]
pub enum ExecOutput {
    Ok {
        affected_rows: u64,
    },
    ResultSet {
        columns: Vec<String>,
        rows: Vec<Vec<Cell>>,
    },
}

fn strip_trailing_semicolon(s: &str) -> &str {
    let s = s.trim();
    if let Some(stripped) = s.strip_suffix(';') {
        stripped.trim()
    } else {
        s
    }
}

fn strip_leading_comments(mut s: &str) -> &str {
    // Handle common /* ... */ prefix comments.
    loop {
        let t = s.trim_start();
        if let Some(rest) = t.strip_prefix("/*") {
            if let Some(end) = rest.find("*/") {
                s = &rest[end + 2..];
                continue;
            }
        }
        return t;
    }
}

pub fn execute(
    raw_query: &str,
    server: &Server,
    session: &mut Session,
) -> Result<ExecOutput, FakeError> {
    let q = strip_trailing_semicolon(strip_leading_comments(raw_query));
    if q.is_empty() {
        return Ok(ExecOutput::Ok { affected_rows: 0 });
    }
    session.ctx.query = Some(q.to_string());
    debug!(query = q, "execute");

    let dialect = MySqlDialect {};
    let ast = Parser::parse_sql(&dialect, q).map_err(|e| FakeError::Parse(e.to_string()))?;
    if ast.is_empty() {
        return Ok(ExecOutput::Ok { affected_rows: 0 });
    }

    let stmt = &ast[0];
    match stmt {
        Statement::CreateDatabase {
            db_name,
            if_not_exists,
            ..
        } => handle_create_database(server, db_name, *if_not_exists),
        Statement::Drop {
            object_type: ast::ObjectType::Schema | ast::ObjectType::Database,
            names,
            if_exists,
            ..
        } => {
            if names.is_empty() {
                return Err(FakeError::Parse("No database name".into()));
            }
            handle_drop_database(server, &names[0], *if_exists)
        }
        Statement::CreateTable(c) => handle_create_table(server, session, c),
        Statement::CreateIndex(create_index) => handle_create_index(server, session, create_index),
        Statement::Drop {
            object_type: ast::ObjectType::Table,
            names,
            if_exists,
            ..
        } => {
            if names.is_empty() {
                return Err(FakeError::Parse("No table name".into()));
            }
            handle_drop_table(server, session, &names[0], *if_exists)
        }
        Statement::Use(use_stmt) => handle_use(server, session, use_stmt),
        Statement::Query(query) => handle_query(server, session, q, query),
        Statement::Insert(insert) => handle_insert(server, session, q, insert),
        Statement::Update {
            table,
            assignments,
            from,
            selection,
            returning,
            or,
            limit,
        } => handle_update(
            server,
            session,
            q,
            table.clone(),
            assignments.clone(),
            from.clone(),
            selection.clone(),
            returning.clone(),
            or.clone(),
            limit.clone(),
        ),
        Statement::Delete(delete) => handle_delete(server, session, q, delete),
        _ => Err(FakeError::NotSupported(format!(
            "Statement not implemented: {stmt:?}"
        ))),
    }
}

// ---- AST lowering ------------------------------------------------------

fn get_ident_name(part: &ObjectNamePart) -> String {
    match part {
        ObjectNamePart::Identifier(i) => i.value.clone(),
        _ => "".to_string(),
    }
}

fn resolve_table(session: &Session, name: &ObjectName) -> Result<(String, String), FakeError> {
    let parts: Vec<String> = name.0.iter().map(get_ident_name).collect();
    QueryPlan::parse_table_name(session, &parts.join("."))
}

fn parse_sql_number_literal(n: &str) -> Result<Cell, FakeError> {
    let is_float = n.contains('.') || n.contains('e') || n.contains('E');
    if is_float {
        let v = n
            .parse::<f64>()
            .map_err(|_| FakeError::Invalid(format!("Invalid number literal: {n}")))?;
        Ok(Cell::Float(v))
    } else {
        let v = n
            .parse::<i64>()
            .map_err(|_| FakeError::Invalid(format!("Invalid integer literal: {n}")))?;
        Ok(Cell::Int(v))
    }
}

fn lower_value(value: &ast::Value) -> Result<Cell, FakeError> {
    match value {
        ast::Value::Number(n, _) => parse_sql_number_literal(n),
        ast::Value::SingleQuotedString(s) | ast::Value::DoubleQuotedString(s) => {
            Ok(Cell::Text(s.clone()))
        }
        ast::Value::Boolean(b) => Ok(Cell::Bool(*b)),
        ast::Value::Null => Ok(Cell::Null),
        _ => Err(FakeError::NotSupported(format!(
            "Value type not supported: {value}"
        ))),
    }
}

fn lower_bin_op(op: &ast::BinaryOperator) -> Result<BinOp, FakeError> {
    Ok(match op {
        ast::BinaryOperator::Eq => BinOp::Eq,
        ast::BinaryOperator::NotEq => BinOp::NotEq,
        ast::BinaryOperator::Lt => BinOp::Lt,
        ast::BinaryOperator::LtEq => BinOp::LtEq,
        ast::BinaryOperator::Gt => BinOp::Gt,
        ast::BinaryOperator::GtEq => BinOp::GtEq,
        ast::BinaryOperator::And => BinOp::And,
        ast::BinaryOperator::Or => BinOp::Or,
        ast::BinaryOperator::Plus => BinOp::Plus,
        ast::BinaryOperator::Minus => BinOp::Minus,
        ast::BinaryOperator::Multiply => BinOp::Multiply,
        ast::BinaryOperator::Divide => BinOp::Divide,
        ast::BinaryOperator::Modulo => BinOp::Modulo,
        other => {
            return Err(FakeError::NotSupported(format!(
                "Operator not supported: {other}"
            )))
        }
    })
}

fn lower_expr(expr: &ast::Expr) -> Result<Expr, FakeError> {
    match expr {
        ast::Expr::Nested(inner) => lower_expr(inner),
        ast::Expr::Value(v) => Ok(Expr::Literal(lower_value(&v.value)?)),
        ast::Expr::Identifier(ident) => Ok(Expr::Column(ColumnRef::bare(ident.value.clone()))),
        ast::Expr::CompoundIdentifier(ids) => {
            // [table, col] or [db, table, col]; the last two parts matter.
            let col = ids
                .last()
                .ok_or_else(|| FakeError::Invalid("empty identifier".into()))?
                .value
                .clone();
            let table = if ids.len() >= 2 {
                Some(ids[ids.len() - 2].value.clone())
            } else {
                None
            };
            Ok(Expr::Column(ColumnRef::new(table, col)))
        }
        ast::Expr::BinaryOp { left, op, right } => Ok(Expr::Binary {
            left: Box::new(lower_expr(left)?),
            op: lower_bin_op(op)?,
            right: Box::new(lower_expr(right)?),
        }),
        ast::Expr::UnaryOp { op, expr } => match op {
            ast::UnaryOperator::Not => Ok(Expr::Not(Box::new(lower_expr(expr)?))),
            ast::UnaryOperator::Minus => Ok(Expr::Neg(Box::new(lower_expr(expr)?))),
            ast::UnaryOperator::Plus => lower_expr(expr),
            other => Err(FakeError::NotSupported(format!(
                "Unary operator not supported: {other}"
            ))),
        },
        ast::Expr::IsNull(inner) => Ok(Expr::IsNull {
            expr: Box::new(lower_expr(inner)?),
            negated: false,
        }),
        ast::Expr::IsNotNull(inner) => Ok(Expr::IsNull {
            expr: Box::new(lower_expr(inner)?),
            negated: true,
        }),
        ast::Expr::InList {
            expr,
            list,
            negated,
        } => Ok(Expr::InList {
            expr: Box::new(lower_expr(expr)?),
            list: list.iter().map(lower_expr).collect::<Result<_, _>>()?,
            negated: *negated,
        }),
        ast::Expr::Between {
            expr,
            negated,
            low,
            high,
        } => Ok(Expr::Between {
            expr: Box::new(lower_expr(expr)?),
            low: Box::new(lower_expr(low)?),
            high: Box::new(lower_expr(high)?),
            negated: *negated,
        }),
        ast::Expr::Like {
            negated,
            any,
            expr,
            pattern,
            escape_char,
        } => {
            if *any {
                return Err(FakeError::NotSupported(
                    "LIKE ANY(...) is not supported".into(),
                ));
            }
            if escape_char.is_some() {
                return Err(FakeError::NotSupported(
                    "LIKE ... ESCAPE is not supported".into(),
                ));
            }
            Ok(Expr::Like {
                expr: Box::new(lower_expr(expr)?),
                pattern: Box::new(lower_expr(pattern)?),
                negated: *negated,
            })
        }
        ast::Expr::Function(f) => {
            let fname = f.name.to_string().to_ascii_lowercase();
            if fname == "values" {
                if let ast::FunctionArguments::List(l) = &f.args {
                    if let [ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Expr(
                        ast::Expr::Identifier(id),
                    ))] = l.args.as_slice()
                    {
                        return Ok(Expr::Values(id.value.clone()));
                    }
                }
                return Err(FakeError::Invalid(
                    "VALUES() expects a single column name".into(),
                ));
            }
            Err(FakeError::NotSupported(format!(
                "Function not supported in expressions: {}",
                f.name
            )))
        }
        _ => Err(FakeError::NotSupported(format!(
            "Expr not supported: {expr}"
        ))),
    }
}

fn lower_assignments(assignments: &[ast::Assignment]) -> Result<Vec<SetAssignment>, FakeError> {
    let mut out = Vec::with_capacity(assignments.len());
    for a in assignments {
        let col_name = match &a.target {
            ast::AssignmentTarget::ColumnName(name) => name
                .0
                .last()
                .map(get_ident_name)
                .ok_or_else(|| FakeError::Invalid("empty assignment target".into()))?,
            ast::AssignmentTarget::Tuple(_) => {
                return Err(FakeError::NotSupported(
                    "tuple assignment is not supported".into(),
                ))
            }
        };
        out.push(SetAssignment {
            column: ColumnRef::bare(col_name),
            expr: lower_expr(&a.value)?,
        });
    }
    Ok(out)
}

fn lower_order_by(order_by: Option<&ast::OrderBy>) -> Result<Vec<OrderByRule>, FakeError> {
    let Some(order_by) = order_by else {
        return Ok(Vec::new());
    };
    let exprs = match &order_by.kind {
        ast::OrderByKind::Expressions(e) => e,
        _ => {
            return Err(FakeError::NotSupported(
                "ORDER BY ALL is not supported".into(),
            ))
        }
    };
    lower_order_exprs(exprs)
}

fn lower_order_exprs(exprs: &[ast::OrderByExpr]) -> Result<Vec<OrderByRule>, FakeError> {
    exprs
        .iter()
        .map(|e| {
            let direction = if e.options.asc == Some(false) {
                OrderDirection::Desc
            } else {
                OrderDirection::Asc
            };
            Ok(OrderByRule::new(lower_expr(&e.expr)?, direction))
        })
        .collect()
}

fn eval_const(expr: &ast::Expr, session: &Session) -> Result<Cell, FakeError> {
    let lowered = lower_expr(expr)?;
    let empty = Row::new();
    let ctx = EvalContext::new(&empty, session);
    lowered.evaluate(&ctx)
}

fn eval_nonneg_usize(expr: &ast::Expr, session: &Session, what: &str) -> Result<usize, FakeError> {
    let n = eval_const(expr, session)?
        .as_i64()
        .filter(|n| *n >= 0)
        .ok_or_else(|| FakeError::Invalid(format!("{what} must be a non-negative integer")))?;
    Ok(n as usize)
}

fn lower_limit(query: &ast::Query, session: &Session) -> Result<Option<LimitClause>, FakeError> {
    let Some(limit_clause) = &query.limit_clause else {
        return Ok(None);
    };
    match limit_clause {
        ast::LimitClause::LimitOffset { limit, offset, .. } => {
            let offset = match offset {
                Some(off) => eval_nonneg_usize(&off.value, session, "OFFSET")?,
                None => 0,
            };
            let rowcount = match limit {
                Some(lim) => eval_nonneg_usize(lim, session, "LIMIT")?,
                None if offset == 0 => return Ok(None),
                None => usize::MAX,
            };
            Ok(Some(LimitClause { offset, rowcount }))
        }
        ast::LimitClause::OffsetCommaLimit { offset, limit } => Ok(Some(LimitClause {
            offset: eval_nonneg_usize(offset, session, "OFFSET")?,
            rowcount: eval_nonneg_usize(limit, session, "LIMIT")?,
        })),
    }
}

// ---- SELECT ------------------------------------------------------------

fn count_star(expr: &ast::Expr) -> bool {
    if let ast::Expr::Function(f) = expr {
        if f.name.to_string().eq_ignore_ascii_case("count") {
            if let ast::FunctionArguments::List(l) = &f.args {
                return matches!(
                    l.args.as_slice(),
                    [ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Wildcard)]
                );
            }
        }
    }
    false
}

fn handle_query(
    server: &Server,
    session: &mut Session,
    raw: &str,
    query: &ast::Query,
) -> Result<ExecOutput, FakeError> {
    let select = match &query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => {
            return Err(FakeError::NotSupported(
                "Only plain SELECT queries are supported".into(),
            ))
        }
    };

    // Constant SELECT with no FROM.
    if select.from.is_empty() {
        let mut columns = Vec::new();
        let mut row = Vec::new();
        for item in &select.projection {
            let (alias, expr) = match item {
                ast::SelectItem::UnnamedExpr(e) => (e.to_string(), e),
                ast::SelectItem::ExprWithAlias { expr, alias } => (alias.value.clone(), expr),
                _ => {
                    return Err(FakeError::NotSupported(
                        "Wildcard requires a FROM clause".into(),
                    ))
                }
            };
            columns.push(alias);
            row.push(eval_const(expr, session)?);
        }
        return Ok(ExecOutput::ResultSet {
            columns,
            rows: vec![row],
        });
    }

    if select.from.len() != 1 || !select.from[0].joins.is_empty() {
        return Err(FakeError::NotSupported(
            "Joins are not supported; SELECT reads a single table".into(),
        ));
    }
    let (db, table) = match &select.from[0].relation {
        TableFactor::Table { name, .. } => resolve_table(session, name)?,
        _ => {
            return Err(FakeError::NotSupported(
                "Only plain table references are supported".into(),
            ))
        }
    };

    let def = server.table_def(&db, &table)?;
    let storage = server.snapshot(&db, &table)?;
    let plan = QueryPlan::new(raw);

    let where_expr = select.selection.as_ref().map(lower_expr).transpose()?;
    let hints = PlannerHints {
        columns: &def.columns,
        indexes: &def.indexes,
    };
    let mut rows = plan.apply_where(
        session,
        storage.dataset,
        &storage.index_refs,
        session.ctx.dirty_pks(&db, &table),
        Some(hints),
        where_expr.as_ref(),
    )?;

    let rules = lower_order_by(query.order_by.as_ref())?;
    if !rules.is_empty() {
        materialize_order_keys(&mut rows, &rules, session)?;
        rows = plan.apply_order_by(rows, &rules);
    }
    let limit = lower_limit(query, session)?;
    rows = plan.apply_limit(rows, limit.as_ref());

    // Projection.
    enum Proj {
        Expr(Expr),
        CountStar,
    }
    let mut columns = Vec::new();
    let mut projections = Vec::new();
    for item in &select.projection {
        match item {
            ast::SelectItem::Wildcard(_) => {
                for c in &def.columns {
                    columns.push(c.name.clone());
                    projections.push(Proj::Expr(Expr::Column(ColumnRef::bare(c.name.clone()))));
                }
            }
            ast::SelectItem::UnnamedExpr(e) => {
                columns.push(e.to_string());
                if count_star(e) {
                    projections.push(Proj::CountStar);
                } else {
                    projections.push(Proj::Expr(lower_expr(e)?));
                }
            }
            ast::SelectItem::ExprWithAlias { expr, alias } => {
                columns.push(alias.value.clone());
                if count_star(expr) {
                    projections.push(Proj::CountStar);
                } else {
                    projections.push(Proj::Expr(lower_expr(expr)?));
                }
            }
            _ => {
                return Err(FakeError::NotSupported(
                    "Projection kind not supported".into(),
                ))
            }
        }
    }

    if projections.iter().any(|p| matches!(p, Proj::CountStar)) {
        if projections.len() != 1 {
            return Err(FakeError::NotSupported(
                "COUNT(*) cannot be mixed with other projections".into(),
            ));
        }
        return Ok(ExecOutput::ResultSet {
            columns,
            rows: vec![vec![Cell::Int(rows.len() as i64)]],
        });
    }

    let mut out_rows = Vec::with_capacity(rows.len());
    for row in rows.values() {
        let ctx = EvalContext::new(row, session);
        let mut out = Vec::with_capacity(projections.len());
        for proj in &projections {
            match proj {
                Proj::Expr(e) => out.push(e.evaluate(&ctx)?),
                Proj::CountStar => unreachable!("handled above"),
            }
        }
        out_rows.push(out);
    }

    if select.distinct.is_some() {
        let mut seen: HashSet<Vec<Cell>> = HashSet::new();
        out_rows.retain(|row| seen.insert(row.clone()));
    }

    Ok(ExecOutput::ResultSet {
        columns,
        rows: out_rows,
    })
}

// ---- INSERT ------------------------------------------------------------

fn find_unique_conflict(
    dataset: &Dataset,
    row: &Row,
    def: &TableDef,
    constraint: &str,
) -> Option<RowId> {
    let index = def.indexes.iter().find(|i| i.name == constraint)?;
    dataset
        .iter()
        .find(|(_, existing)| {
            index
                .columns
                .iter()
                .all(|c| match (existing.get(c), row.get(c)) {
                    (Some(a), Some(b)) if !a.is_null() && !b.is_null() => {
                        compare_cells(a, b) == Ordering::Equal
                    }
                    _ => false,
                })
        })
        .map(|(id, _)| id.clone())
}

fn handle_insert(
    server: &Server,
    session: &mut Session,
    raw: &str,
    insert: &ast::Insert,
) -> Result<ExecOutput, FakeError> {
    let Some(src) = &insert.source else {
        return Err(FakeError::Parse("INSERT missing source".into()));
    };
    let table_name = match &insert.table {
        ast::TableObject::TableName(name) => name,
        _ => {
            return Err(FakeError::NotSupported(
                "Complex table insert not supported".into(),
            ))
        }
    };
    let (db, table) = resolve_table(session, table_name)?;
    let def = server.table_def(&db, &table)?;
    let storage = server.snapshot(&db, &table)?;
    let mut dataset = storage.dataset;
    let mut index_refs = storage.index_refs;

    let cols: Vec<String> = if insert.columns.is_empty() {
        def.columns.iter().map(|c| c.name.clone()).collect()
    } else {
        insert
            .columns
            .iter()
            .map(|c| {
                def.column(&c.value)
                    .map(|cd| cd.name.clone())
                    .ok_or_else(|| FakeError::NotFound(format!("unknown column: {}", c.value)))
            })
            .collect::<Result<_, _>>()?
    };

    let rows_exprs = match &src.body.as_ref() {
        SetExpr::Values(values) => &values.rows,
        _ => {
            return Err(FakeError::NotSupported(
                "INSERT only supports VALUES".into(),
            ))
        }
    };

    let mut plan = QueryPlan::new(raw);
    plan.ignore_dupes = insert.ignore;
    let on_dup: Option<Vec<SetAssignment>> = match &insert.on {
        Some(ast::OnInsert::DuplicateKeyUpdate(assignments)) => {
            Some(lower_assignments(assignments)?)
        }
        None => None,
        Some(_) => {
            return Err(FakeError::NotSupported(
                "Only ON DUPLICATE KEY UPDATE is supported".into(),
            ))
        }
    };

    let single_pk = def.single_primary().map(|i| i.columns[0].clone());
    let all_indexes = index::all_indexes(&def);
    let mut affected = 0u64;

    for row_exprs in rows_exprs {
        if row_exprs.len() != cols.len() {
            return Err(FakeError::Invalid("column/value count mismatch".into()));
        }
        let mut row = Row::with_capacity(def.columns.len());
        for col in &def.columns {
            row.insert(col.name.clone(), Cell::Null);
        }
        for (col, expr) in cols.iter().zip(row_exprs.iter()) {
            row.insert(col.clone(), eval_const(expr, session)?);
        }
        let row = coerce_row_to_schema(&row, &def, session.ctx.strict_schema)?;

        let row_id = match &single_pk {
            Some(pk) => RowId::from_cell(row.get(pk).unwrap_or(&Cell::Null)),
            None => next_row_id(&dataset),
        };

        // PRIMARY first, then the unique secondaries, the order the server
        // reports conflicts in.
        let conflict: Option<String> = if single_pk.is_some() && dataset.contains_key(&row_id) {
            def.primary_index().map(|i| i.name.clone())
        } else {
            check_unique_constraints(&dataset, &row, &def, None)
        };

        if let Some(constraint) = conflict {
            if let Some(assignments) = &on_dup {
                let conflict_id = if dataset.contains_key(&row_id) {
                    Some(row_id.clone())
                } else {
                    find_unique_conflict(&dataset, &row, &def, &constraint)
                };
                let Some(conflict_id) = conflict_id else {
                    return Err(FakeError::Invalid(format!(
                        "conflicting row not found for key '{constraint}'"
                    )));
                };
                let mut filtered = Dataset::new();
                if let Some(existing) = dataset.get(&conflict_id) {
                    filtered.insert(conflict_id.clone(), existing.clone());
                }
                let (count, new_dataset, new_refs) = plan.apply_set(
                    server,
                    session,
                    &db,
                    &table,
                    &filtered,
                    dataset,
                    index_refs,
                    assignments,
                    Some(&def),
                    Some(&row),
                )?;
                dataset = new_dataset;
                index_refs = new_refs;
                // 2 per row updated in place, 0 for a no-op, MySQL-style.
                affected += count * 2;
                continue;
            }
            if plan.ignore_dupes {
                continue;
            }
            return Err(FakeError::UniqueKeyViolation { constraint });
        }

        for key in index::compute_index_keys(&all_indexes, &row) {
            let branch = index_refs.entry(key.index.clone()).or_default();
            index::add_to_index(branch, &key.path, key.store_as_unique, &row_id);
        }
        if session.ctx.in_request {
            session.ctx.record_dirty_pk(&db, &table, row_id.clone());
        }
        dataset.insert(row_id, row);
        affected += 1;
    }

    server.save_table(&db, &table, dataset, index_refs)?;
    Ok(ExecOutput::Ok {
        affected_rows: affected,
    })
}

// ---- UPDATE ------------------------------------------------------------

fn handle_update(
    server: &Server,
    session: &mut Session,
    raw: &str,
    table_with_joins: ast::TableWithJoins,
    update_assignments: Vec<ast::Assignment>,
    from: Option<ast::UpdateTableFromKind>,
    selection: Option<ast::Expr>,
    returning: Option<Vec<ast::SelectItem>>,
    or: Option<ast::SqliteOnConflict>,
    limit: Option<ast::Expr>,
) -> Result<ExecOutput, FakeError> {
    if from.is_some() || returning.is_some() || or.is_some() {
        return Err(FakeError::NotSupported(
            "UPDATE with FROM/RETURNING/OR is not supported".into(),
        ));
    }
    if !table_with_joins.joins.is_empty() {
        return Err(FakeError::NotSupported(
            "UPDATE with joins is not supported".into(),
        ));
    }

    let (db, table) = match &table_with_joins.relation {
        TableFactor::Table { name, .. } => resolve_table(session, name)?,
        _ => {
            return Err(FakeError::NotSupported(
                "Only simple UPDATE supported".into(),
            ))
        }
    };
    let def = server.table_def(&db, &table)?;
    let storage = server.snapshot(&db, &table)?;
    let plan = QueryPlan::new(raw);

    let where_expr = selection.as_ref().map(lower_expr).transpose()?;
    let hints = PlannerHints {
        columns: &def.columns,
        indexes: &def.indexes,
    };
    let mut filtered = plan.apply_where(
        session,
        storage.dataset.clone(),
        &storage.index_refs,
        session.ctx.dirty_pks(&db, &table),
        Some(hints),
        where_expr.as_ref(),
    )?;
    if let Some(lim) = &limit {
        let rowcount = eval_nonneg_usize(lim, session, "LIMIT")?;
        filtered = plan.apply_limit(
            filtered,
            Some(&LimitClause {
                offset: 0,
                rowcount,
            }),
        );
    }

    let assignments = lower_assignments(&update_assignments)?;
    let (update_count, _, _) = plan.apply_set(
        server,
        session,
        &db,
        &table,
        &filtered,
        storage.dataset,
        storage.index_refs,
        &assignments,
        Some(&def),
        None,
    )?;

    Ok(ExecOutput::Ok {
        affected_rows: update_count,
    })
}

// ---- DELETE ------------------------------------------------------------

fn handle_delete(
    server: &Server,
    session: &mut Session,
    raw: &str,
    delete: &ast::Delete,
) -> Result<ExecOutput, FakeError> {
    if delete.using.is_some() || delete.returning.is_some() || !delete.tables.is_empty() {
        return Err(FakeError::NotSupported(
            "Only simple DELETE FROM <table> is supported".into(),
        ));
    }
    let from_tables = match &delete.from {
        ast::FromTable::WithFromKeyword(t) | ast::FromTable::WithoutKeyword(t) => t,
    };
    if from_tables.len() != 1 || !from_tables[0].joins.is_empty() {
        return Err(FakeError::NotSupported(
            "DELETE supports only a single table".into(),
        ));
    }
    let (db, table) = match &from_tables[0].relation {
        TableFactor::Table { name, .. } => resolve_table(session, name)?,
        _ => {
            return Err(FakeError::NotSupported(
                "Only simple DELETE FROM <table> is supported".into(),
            ))
        }
    };
    let def = server.table_def(&db, &table)?;
    let storage = server.snapshot(&db, &table)?;
    let plan = QueryPlan::new(raw);

    let where_expr = delete.selection.as_ref().map(lower_expr).transpose()?;
    let hints = PlannerHints {
        columns: &def.columns,
        indexes: &def.indexes,
    };
    let mut targets = plan.apply_where(
        session,
        storage.dataset.clone(),
        &storage.index_refs,
        session.ctx.dirty_pks(&db, &table),
        Some(hints),
        where_expr.as_ref(),
    )?;

    let rules = lower_order_exprs(&delete.order_by)?;
    if !rules.is_empty() {
        materialize_order_keys(&mut targets, &rules, session)?;
        targets = plan.apply_order_by(targets, &rules);
    }
    if let Some(lim) = &delete.limit {
        let rowcount = eval_nonneg_usize(lim, session, "LIMIT")?;
        targets = plan.apply_limit(
            targets,
            Some(&LimitClause {
                offset: 0,
                rowcount,
            }),
        );
    }

    let all_indexes = index::all_indexes(&def);
    let mut dataset = storage.dataset;
    let mut index_refs = storage.index_refs;
    let mut affected = 0u64;

    for row_id in targets.keys() {
        let Some(row) = dataset.shift_remove(row_id) else {
            continue;
        };
        for key in index::compute_index_keys(&all_indexes, &row) {
            if let Some(branch) = index_refs.get_mut(&key.index) {
                index::remove_from_index(branch, &key.path, key.store_as_unique, row_id);
            }
        }
        if session.ctx.in_request {
            session.ctx.record_dirty_pk(&db, &table, row_id.clone());
        }
        affected += 1;
    }

    server.save_table(&db, &table, dataset, index_refs)?;
    Ok(ExecOutput::Ok {
        affected_rows: affected,
    })
}

// ---- DDL ---------------------------------------------------------------

fn handle_create_database(
    server: &Server,
    name: &ObjectName,
    if_not_exists: bool,
) -> Result<ExecOutput, FakeError> {
    let db_name = name.0.last().map(get_ident_name).unwrap_or_default();
    match server.create_database(&db_name) {
        Ok(_) => {}
        Err(FakeError::Invalid(msg)) if if_not_exists && msg.contains("exists") => {
            // Ignore
        }
        Err(e) => return Err(e),
    }
    Ok(ExecOutput::Ok { affected_rows: 1 })
}

fn handle_drop_database(
    server: &Server,
    name: &ObjectName,
    if_exists: bool,
) -> Result<ExecOutput, FakeError> {
    let db_name = name.0.last().map(get_ident_name).unwrap_or_default();
    match server.drop_database(&db_name) {
        Ok(_) => {}
        Err(FakeError::NotFound(_)) if if_exists => {
            // Ignore
        }
        Err(e) => return Err(e),
    }
    Ok(ExecOutput::Ok { affected_rows: 1 })
}

fn handle_use(
    server: &Server,
    session: &mut Session,
    use_stmt: &ast::Use,
) -> Result<ExecOutput, FakeError> {
    let name = match use_stmt {
        ast::Use::Object(name) | ast::Use::Database(name) => name,
        _ => {
            return Err(FakeError::NotSupported(
                "Only USE <db> is supported".into(),
            ))
        }
    };
    let db = name.0.last().map(get_ident_name).unwrap_or_default();
    let dbs = server.list_databases();
    let Some(known) = dbs.iter().find(|d| d.eq_ignore_ascii_case(&db)) else {
        return Err(FakeError::NotFound(format!("unknown database: {db}")));
    };
    session.current_db = Some(known.clone());
    Ok(ExecOutput::Ok { affected_rows: 0 })
}

fn sql_type_of(data_type: &ast::DataType) -> SqlType {
    match data_type {
        ast::DataType::Int(_)
        | ast::DataType::BigInt(_)
        | ast::DataType::Integer(_)
        | ast::DataType::TinyInt(_)
        | ast::DataType::SmallInt(_) => SqlType::Int,
        ast::DataType::Float(_)
        | ast::DataType::Double(_)
        | ast::DataType::DoublePrecision
        | ast::DataType::Real => SqlType::Float,
        ast::DataType::Bool | ast::DataType::Boolean => SqlType::Bool,
        ast::DataType::Date => SqlType::Date,
        ast::DataType::Datetime(_) | ast::DataType::Timestamp(_, _) => SqlType::DateTime,
        _ => SqlType::Text, // Fallback
    }
}

fn index_columns(columns: &[ast::IndexColumn]) -> Result<Vec<String>, FakeError> {
    columns
        .iter()
        .map(|col| match &col.column.expr {
            ast::Expr::Identifier(ident) => Ok(ident.value.clone()),
            _ => Err(FakeError::NotSupported(
                "Index on complex expr not supported".into(),
            )),
        })
        .collect()
}

fn handle_create_table(
    server: &Server,
    session: &mut Session,
    create: &ast::CreateTable,
) -> Result<ExecOutput, FakeError> {
    let (db, table_name) = resolve_table(session, &create.name)?;

    let mut columns = Vec::new();
    let mut indexes: Vec<IndexDef> = Vec::new();
    let mut primary_cols: Vec<String> = Vec::new();

    for col in &create.columns {
        let col_name = col.name.value.clone();
        let mut nullable = true;
        for opt in &col.options {
            match &opt.option {
                ast::ColumnOption::NotNull => nullable = false,
                ast::ColumnOption::Unique {
                    is_primary: true, ..
                } => {
                    nullable = false;
                    primary_cols = vec![col_name.clone()];
                }
                ast::ColumnOption::Unique {
                    is_primary: false, ..
                } => indexes.push(IndexDef {
                    name: col_name.clone(),
                    kind: IndexKind::Unique,
                    columns: vec![col_name.clone()],
                }),
                _ => {}
            }
        }
        columns.push(ColumnDef {
            name: col_name,
            ty: sql_type_of(&col.data_type),
            nullable,
        });
    }

    for constraint in &create.constraints {
        match constraint {
            ast::TableConstraint::PrimaryKey { columns, .. } => {
                primary_cols = index_columns(columns)?;
            }
            ast::TableConstraint::Unique { name, columns, .. } => {
                let cols = index_columns(columns)?;
                let name = name
                    .as_ref()
                    .map(|n| n.value.clone())
                    .unwrap_or_else(|| cols.join("_"));
                indexes.push(IndexDef {
                    name,
                    kind: IndexKind::Unique,
                    columns: cols,
                });
            }
            _ => {}
        }
    }

    if !primary_cols.is_empty() {
        indexes.insert(
            0,
            IndexDef {
                name: "PRIMARY".into(),
                kind: IndexKind::Primary,
                columns: primary_cols,
            },
        );
    }

    let def = TableDef {
        db,
        name: table_name,
        columns,
        indexes,
        vitess_sharding: None,
    };

    match server.create_table(def) {
        Ok(_) => {}
        Err(FakeError::Invalid(msg)) if create.if_not_exists && msg.contains("exists") => {}
        Err(e) => return Err(e),
    }
    Ok(ExecOutput::Ok { affected_rows: 1 })
}

fn handle_create_index(
    server: &Server,
    session: &mut Session,
    create_index: &ast::CreateIndex,
) -> Result<ExecOutput, FakeError> {
    let (db, table) = resolve_table(session, &create_index.table_name)?;

    let idx_name = if let Some(n) = &create_index.name {
        n.0.last().map(get_ident_name).unwrap_or_default()
    } else {
        if create_index.columns.is_empty() {
            return Err(FakeError::Parse("Index requires columns".into()));
        }
        match &create_index.columns[0].column.expr {
            ast::Expr::Identifier(ident) => format!("idx_{}", ident.value),
            _ => "idx_unknown".to_string(),
        }
    };

    let def = IndexDef {
        name: idx_name,
        kind: if create_index.unique {
            IndexKind::Unique
        } else {
            IndexKind::Index
        },
        columns: index_columns(&create_index.columns)?,
    };

    match server.create_index(&db, &table, def) {
        Ok(_) => {}
        Err(FakeError::Invalid(msg))
            if create_index.if_not_exists && msg.contains("already exists") =>
        {
            // Ignore
        }
        Err(e) => return Err(e),
    }
    Ok(ExecOutput::Ok { affected_rows: 0 })
}

fn handle_drop_table(
    server: &Server,
    session: &mut Session,
    name: &ObjectName,
    if_exists: bool,
) -> Result<ExecOutput, FakeError> {
    let (db, table) = resolve_table(session, name)?;
    match server.drop_table(&db, &table) {
        Ok(_) => {}
        Err(FakeError::NotFound(_)) if if_exists => {}
        Err(e) => return Err(e),
    }
    Ok(ExecOutput::Ok { affected_rows: 1 })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Server, Session) {
        let server = Server::new();
        let mut session = Session::new();
        for sql in [
            "CREATE DATABASE test",
            "USE test",
            "CREATE TABLE users (id INT NOT NULL, name TEXT, age INT, PRIMARY KEY (id))",
            "INSERT INTO users VALUES (1, 'Alice', 30)",
            "INSERT INTO users VALUES (2, 'Bob', 25)",
        ] {
            execute(sql, &server, &mut session).unwrap_or_else(|e| panic!("{sql}: {e}"));
        }
        (server, session)
    }

    fn rows(out: ExecOutput) -> Vec<Vec<Cell>> {
        match out {
            ExecOutput::ResultSet { rows, .. } => rows,
            other => panic!("expected result set, got {other:?}"),
        }
    }

    #[test]
    fn test_secondary_index_flow() {
        let (server, mut session) = setup();

        execute("CREATE INDEX idx_age ON users (age)", &server, &mut session).unwrap();
        // Backfill happened.
        let storage = server.snapshot("test", "users").unwrap();
        let branch = storage.index_refs.get("idx_age").unwrap();
        assert_eq!(
            index::lookup_row_ids(branch, &["30".to_string()]),
            vec![RowId::Int(1)]
        );

        // New inserts keep the index current.
        execute(
            "INSERT INTO users VALUES (3, 'Charlie', 30)",
            &server,
            &mut session,
        )
        .unwrap();
        let storage = server.snapshot("test", "users").unwrap();
        let branch = storage.index_refs.get("idx_age").unwrap();
        assert_eq!(
            index::lookup_row_ids(branch, &["30".to_string()]),
            vec![RowId::Int(1), RowId::Int(3)]
        );
    }

    #[test]
    fn test_select_where_order_limit() {
        let (server, mut session) = setup();
        execute(
            "INSERT INTO users VALUES (3, 'Cara', 41), (4, 'Dan', 19)",
            &server,
            &mut session,
        )
        .unwrap();

        let out = execute(
            "SELECT id FROM users WHERE age > 20 ORDER BY age DESC LIMIT 2",
            &server,
            &mut session,
        )
        .unwrap();
        assert_eq!(rows(out), vec![vec![Cell::Int(3)], vec![Cell::Int(1)]]);
    }

    #[test]
    fn test_update_changes_and_counts() {
        let (server, mut session) = setup();
        let out = execute(
            "UPDATE users SET age = age + 1 WHERE id = 1",
            &server,
            &mut session,
        )
        .unwrap();
        match out {
            ExecOutput::Ok { affected_rows } => assert_eq!(affected_rows, 1),
            other => panic!("unexpected {other:?}"),
        }
        let out = execute("SELECT age FROM users WHERE id = 1", &server, &mut session).unwrap();
        assert_eq!(rows(out), vec![vec![Cell::Int(31)]]);
    }

    #[test]
    fn test_delete_removes_rows() {
        let (server, mut session) = setup();
        execute("DELETE FROM users WHERE id = 2", &server, &mut session).unwrap();
        let out = execute("SELECT count(*) FROM users", &server, &mut session).unwrap();
        assert_eq!(rows(out), vec![vec![Cell::Int(1)]]);
    }
}
