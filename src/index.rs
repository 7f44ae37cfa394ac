use crate::model::{Cell, IndexDef, IndexKind, Row, RowId, TableDef};
use std::collections::{BTreeMap, BTreeSet};

/// Sentinel path component standing in for a missing/NULL field value.
pub const NULL_SENTINEL: &str = "__NULL__";

/// One level of an index: key component to child node. Depth equals the
/// number of indexed fields.
pub type IndexBranch = BTreeMap<String, IndexNode>;

/// All secondary indexes of a table, by index name. A single-column PRIMARY
/// is never stored here; the dataset key is that value.
pub type TableIndexRefs = BTreeMap<String, IndexBranch>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexNode {
    /// Unique leaf: exactly one row.
    Leaf(RowId),
    /// Non-unique leaf: every row sharing this key path.
    Set(BTreeSet<RowId>),
    Branch(IndexBranch),
}

/// An index as seen by the mutation path: definition plus whether entries
/// should be stored with unique leaves. The sharding pseudo-index is kind
/// `Index` but stored unique.
#[derive(Debug, Clone)]
pub struct ApplicableIndex {
    pub name: String,
    pub kind: IndexKind,
    pub columns: Vec<String>,
    pub store_as_unique: bool,
}

impl ApplicableIndex {
    pub fn from_def(def: &IndexDef) -> Self {
        Self {
            name: def.name.clone(),
            kind: def.kind,
            columns: def.columns.clone(),
            store_as_unique: matches!(def.kind, IndexKind::Unique | IndexKind::Primary),
        }
    }

    fn is_single_primary(&self) -> bool {
        self.kind == IndexKind::Primary && self.columns.len() == 1
    }
}

/// Every index of the table in applicable form (used by INSERT/DELETE which
/// touch all indexes).
pub fn all_indexes(def: &TableDef) -> Vec<ApplicableIndex> {
    let mut out: Vec<ApplicableIndex> = def.indexes.iter().map(ApplicableIndex::from_def).collect();
    if let Some(shard) = &def.vitess_sharding {
        out.push(ApplicableIndex {
            name: shard.keyspace.clone(),
            kind: IndexKind::Index,
            columns: vec![shard.sharding_key.clone()],
            store_as_unique: true,
        });
    }
    out
}

/// A concrete position of a row within one index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexKeyPath {
    pub index: String,
    pub path: Vec<String>,
    pub store_as_unique: bool,
}

fn key_component(cell: Option<&Cell>) -> String {
    match cell {
        None | Some(Cell::Null) => NULL_SENTINEL.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Where `row` lives (or would live) in each of the given indexes.
///
/// Unique multi-column indexes degrade on NULLs: a NULL in the first field
/// skips the index entirely; a NULL in any later field downgrades the entry
/// to a non-unique set leaf.
pub fn compute_index_keys(indexes: &[ApplicableIndex], row: &Row) -> Vec<IndexKeyPath> {
    let mut out = Vec::new();
    'indexes: for index in indexes {
        if index.is_single_primary() {
            continue;
        }
        let mut store_as_unique = index.store_as_unique;
        let mut path = Vec::with_capacity(index.columns.len());
        for (pos, field) in index.columns.iter().enumerate() {
            let component = key_component(row.get(field));
            if component == NULL_SENTINEL && store_as_unique && index.columns.len() > 1 {
                if pos == 0 {
                    continue 'indexes;
                }
                store_as_unique = false;
            }
            path.push(component);
        }
        out.push(IndexKeyPath {
            index: index.name.clone(),
            path,
            store_as_unique,
        });
    }
    out
}

pub fn add_to_index(branch: &mut IndexBranch, path: &[String], unique: bool, row_id: &RowId) {
    let (head, tail) = match path.split_first() {
        Some(split) => split,
        None => return,
    };
    if tail.is_empty() {
        if unique {
            branch.insert(head.clone(), IndexNode::Leaf(row_id.clone()));
        } else {
            let node = branch
                .entry(head.clone())
                .or_insert_with(|| IndexNode::Set(BTreeSet::new()));
            if let IndexNode::Set(set) = node {
                set.insert(row_id.clone());
            } else {
                // A leaf of the wrong shape gets replaced outright.
                let mut set = BTreeSet::new();
                set.insert(row_id.clone());
                *node = IndexNode::Set(set);
            }
        }
        return;
    }
    let child = branch
        .entry(head.clone())
        .or_insert_with(|| IndexNode::Branch(IndexBranch::new()));
    if !matches!(child, IndexNode::Branch(_)) {
        *child = IndexNode::Branch(IndexBranch::new());
    }
    if let IndexNode::Branch(inner) = child {
        add_to_index(inner, tail, unique, row_id);
    }
}

/// Remove a row from an index position. Branches emptied by the removal are
/// collapsed on the way back up.
pub fn remove_from_index(branch: &mut IndexBranch, path: &[String], unique: bool, row_id: &RowId) {
    let (head, tail) = match path.split_first() {
        Some(split) => split,
        None => return,
    };
    if tail.is_empty() {
        if unique {
            branch.remove(head);
        } else if let Some(IndexNode::Set(set)) = branch.get_mut(head) {
            set.remove(row_id);
            if set.is_empty() {
                branch.remove(head);
            }
        }
        return;
    }
    if let Some(IndexNode::Branch(inner)) = branch.get_mut(head) {
        remove_from_index(inner, tail, unique, row_id);
        if inner.is_empty() {
            branch.remove(head);
        }
    }
}

/// Walk a full-depth path; a unique leaf yields its row id.
pub fn unique_leaf<'a>(branch: &'a IndexBranch, path: &[String]) -> Option<&'a RowId> {
    let (head, tail) = path.split_first()?;
    match branch.get(head)? {
        IndexNode::Leaf(id) if tail.is_empty() => Some(id),
        IndexNode::Branch(inner) if !tail.is_empty() => unique_leaf(inner, tail),
        _ => None,
    }
}

/// All row ids at or below a node, in key order.
pub fn collect_row_ids(node: &IndexNode, out: &mut Vec<RowId>) {
    match node {
        IndexNode::Leaf(id) => out.push(id.clone()),
        IndexNode::Set(set) => out.extend(set.iter().cloned()),
        IndexNode::Branch(branch) => {
            for child in branch.values() {
                collect_row_ids(child, out);
            }
        }
    }
}

/// Row ids reachable by descending `path` from the index root. The path may
/// stop short of the index arity; everything below the reached node counts.
pub fn lookup_row_ids(branch: &IndexBranch, path: &[String]) -> Vec<RowId> {
    let mut out = Vec::new();
    let Some((head, tail)) = path.split_first() else {
        for node in branch.values() {
            collect_row_ids(node, &mut out);
        }
        return out;
    };
    if let Some(node) = branch.get(head) {
        if tail.is_empty() {
            collect_row_ids(node, &mut out);
        } else if let IndexNode::Branch(inner) = node {
            out = lookup_row_ids(inner, tail);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IndexKind;
    use indexmap::IndexMap;

    fn row(pairs: &[(&str, Cell)]) -> Row {
        let mut r = IndexMap::new();
        for (k, v) in pairs {
            r.insert(k.to_string(), v.clone());
        }
        r
    }

    fn unique_on(name: &str, cols: &[&str]) -> ApplicableIndex {
        ApplicableIndex {
            name: name.into(),
            kind: IndexKind::Unique,
            columns: cols.iter().map(|c| c.to_string()).collect(),
            store_as_unique: true,
        }
    }

    #[test]
    fn test_add_remove_collapses_branches() {
        let mut branch = IndexBranch::new();
        let id = RowId::Int(7);
        let path = vec!["1".to_string(), "x".to_string()];

        add_to_index(&mut branch, &path, true, &id);
        assert_eq!(unique_leaf(&branch, &path), Some(&id));

        remove_from_index(&mut branch, &path, true, &id);
        assert!(branch.is_empty(), "emptied parent branch must collapse");
    }

    #[test]
    fn test_non_unique_set_leaf() {
        let mut branch = IndexBranch::new();
        let path = vec!["blue".to_string()];
        add_to_index(&mut branch, &path, false, &RowId::Int(1));
        add_to_index(&mut branch, &path, false, &RowId::Int(2));

        assert_eq!(lookup_row_ids(&branch, &path), vec![RowId::Int(1), RowId::Int(2)]);

        remove_from_index(&mut branch, &path, false, &RowId::Int(1));
        assert_eq!(lookup_row_ids(&branch, &path), vec![RowId::Int(2)]);
        remove_from_index(&mut branch, &path, false, &RowId::Int(2));
        assert!(branch.is_empty());
    }

    #[test]
    fn test_composite_unique_null_first_skips() {
        let idx = unique_on("u_bc", &["b", "c"]);
        let keys = compute_index_keys(&[idx], &row(&[("b", Cell::Null), ("c", Cell::Int(1))]));
        assert!(keys.is_empty());
    }

    #[test]
    fn test_composite_unique_null_later_degrades() {
        let idx = unique_on("u_bc", &["b", "c"]);
        let keys = compute_index_keys(&[idx], &row(&[("b", Cell::Int(1)), ("c", Cell::Null)]));
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].path, vec!["1".to_string(), NULL_SENTINEL.to_string()]);
        assert!(!keys[0].store_as_unique);
    }

    #[test]
    fn test_single_primary_not_materialized() {
        let primary = ApplicableIndex {
            name: "PRIMARY".into(),
            kind: IndexKind::Primary,
            columns: vec!["id".into()],
            store_as_unique: true,
        };
        let keys = compute_index_keys(&[primary], &row(&[("id", Cell::Int(3))]));
        assert!(keys.is_empty());
    }
}
