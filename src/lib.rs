//! An in-memory MySQL double for tests: feed it real SQL, it materializes
//! results and mutations against in-memory tables with MySQL semantics,
//! secondary index maintenance, and replica-after-write guards.

pub mod context;
pub mod error;
pub mod expr;
pub mod index;
pub mod integrity;
pub mod model;
pub mod plan;
pub mod sql;
pub mod store;

pub use context::QueryContext;
pub use error::FakeError;
pub use expr::{ColumnRef, EvalContext, Expr};
pub use model::{Cell, ColumnDef, Dataset, IndexDef, IndexKind, Row, RowId, SqlType, TableDef};
pub use plan::{LimitClause, OrderByRule, OrderDirection, QueryPlan, SetAssignment};
pub use sql::{execute, ExecOutput};
pub use store::{Server, Session};
