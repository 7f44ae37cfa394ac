use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SqlType {
    Int,
    Float,
    Text,
    Bool,
    Date,
    DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub ty: SqlType,
    pub nullable: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IndexKind {
    Primary,
    Unique,
    Index,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub kind: IndexKind,
    pub columns: Vec<String>,
}

impl IndexDef {
    /// A single-column PRIMARY coincides with the dataset key and is never
    /// materialized in index refs.
    pub fn is_single_primary(&self) -> bool {
        self.kind == IndexKind::Primary && self.columns.len() == 1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VitessSharding {
    pub keyspace: String,
    pub sharding_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    pub db: String,
    pub name: String,
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
    #[serde(default)]
    pub vitess_sharding: Option<VitessSharding>,
}

impl TableDef {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn primary_index(&self) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.kind == IndexKind::Primary)
    }

    pub fn primary_key_columns(&self) -> &[String] {
        self.primary_index().map(|i| i.columns.as_slice()).unwrap_or(&[])
    }

    /// The PRIMARY index when it is a single column, i.e. when the dataset
    /// key is the primary key value itself.
    pub fn single_primary(&self) -> Option<&IndexDef> {
        self.primary_index().filter(|i| i.columns.len() == 1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Cell::Null, Cell::Null) => true,
            (Cell::Int(a), Cell::Int(b)) => a == b,
            (Cell::Float(a), Cell::Float(b)) => a.to_bits() == b.to_bits(),
            (Cell::Text(a), Cell::Text(b)) => a == b,
            (Cell::Bool(a), Cell::Bool(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Cell {}

impl std::hash::Hash for Cell {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Cell::Null => 0.hash(state),
            Cell::Int(i) => {
                1.hash(state);
                i.hash(state);
            }
            Cell::Float(f) => {
                2.hash(state);
                f.to_be_bytes().hash(state);
            }
            Cell::Text(s) => {
                3.hash(state);
                s.hash(state);
            }
            Cell::Bool(b) => {
                4.hash(state);
                b.hash(state);
            }
        }
    }
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Int(i) => Some(*i),
            Cell::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Float(f) => Some(*f),
            Cell::Int(i) => Some(*i as f64),
            Cell::Bool(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Cell::Int(_) | Cell::Float(_) | Cell::Bool(_))
    }

    /// String form used for lexicographic comparison. NULL compares as the
    /// empty string; display uses `NULL` instead.
    pub fn sort_str(&self) -> String {
        match self {
            Cell::Null => String::new(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => write!(f, "NULL"),
            Cell::Int(i) => write!(f, "{i}"),
            Cell::Float(v) => write!(f, "{v}"),
            Cell::Text(s) => write!(f, "{s}"),
            Cell::Bool(b) => write!(f, "{}", i64::from(*b)),
        }
    }
}

/// MySQL-style comparison: two numeric values compare as floats; anything
/// else compares lexicographically on the stringified values.
pub fn compare_cells(a: &Cell, b: &Cell) -> Ordering {
    if a.is_numeric() && b.is_numeric() {
        let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
            return Ordering::Equal;
        };
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    a.sort_str().cmp(&b.sort_str())
}

/// Key under which a row lives in a dataset. Typically the single-column
/// primary key value; synthetic integer ids otherwise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RowId {
    Int(i64),
    Str(String),
}

impl RowId {
    pub fn from_cell(cell: &Cell) -> RowId {
        match cell {
            Cell::Int(i) => RowId::Int(*i),
            Cell::Bool(b) => RowId::Int(i64::from(*b)),
            other => RowId::Str(other.to_string()),
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowId::Int(i) => write!(f, "{i}"),
            RowId::Str(s) => write!(f, "{s}"),
        }
    }
}

/// Column name to value, insertion order preserved.
pub type Row = IndexMap<String, Cell>;

/// Row id to row, insertion order preserved. After `apply_order_by` the order
/// is the sort order.
pub type Dataset = IndexMap<RowId, Row>;

/// Next synthetic integer row id for tables without a single-column PRIMARY.
pub fn next_row_id(dataset: &Dataset) -> RowId {
    let max = dataset
        .keys()
        .filter_map(|k| match k {
            RowId::Int(i) => Some(*i),
            RowId::Str(_) => None,
        })
        .max()
        .unwrap_or(0);
    RowId::Int(max + 1)
}
