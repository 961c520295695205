//! Name and type visibility while a statement tree is being generated.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::schema::{Column, Relation, Schema, SqlType};

/// State shared by every scope of one statement tree.
#[derive(Debug, Default)]
struct StmtState {
    uids: HashMap<&'static str, u32>,
    savepoints: Vec<String>,
}

/// Visible tables and column references at one point of a statement tree.
///
/// Descending into a nested construct clones the scope: `refs` and `tables`
/// are copied so that whatever the nested construct adds stays local, while
/// the schema and the statement state (uid counters, open savepoints) remain
/// shared with the root.
#[derive(Clone)]
pub struct Scope {
    /// Everything usable in a FROM clause.
    pub tables: Vec<Arc<dyn Relation>>,
    /// Everything whose columns resolve by name here.
    pub refs: Vec<Arc<dyn Relation>>,
    pub schema: Arc<Schema>,
    state: Arc<Mutex<StmtState>>,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("tables", &self.tables.iter().map(|t| t.name()).collect::<Vec<_>>())
            .field("refs", &self.refs.iter().map(|r| r.name()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// A column together with the relation it is reachable through.
#[derive(Debug, Clone)]
pub struct RelationColumn {
    pub relation: Arc<dyn Relation>,
    pub column: Column,
}

impl RelationColumn {
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.relation.name(), self.column.name)
    }
}

impl Scope {
    /// Root scope of a fresh statement tree over `schema`.
    pub fn root(schema: Arc<Schema>) -> Self {
        let tables = schema.relations();
        let scope = Self {
            tables,
            refs: Vec::new(),
            schema,
            state: Arc::new(Mutex::new(StmtState::default())),
        };
        // aliases must never shadow a real table name
        scope.start_stmt_uid("table", scope.tables.len() as u32);
        scope
    }

    /// Child scope that keeps the current references visible.
    pub fn child(&self) -> Self {
        self.clone()
    }

    /// Child scope that sees no references of its parent, e.g. the body of
    /// a non-lateral derived table.
    pub fn isolated(&self) -> Self {
        Self {
            refs: Vec::new(),
            ..self.clone()
        }
    }

    pub fn refs_of_type(&self, ty: SqlType) -> Vec<RelationColumn> {
        refs_of_type(&self.refs, ty)
    }

    /// Types of all visible columns. Duplicates are kept so that common types
    /// are picked more often.
    pub fn available_types(&self) -> Vec<SqlType> {
        self.refs
            .iter()
            .flat_map(|r| r.columns().iter().map(|c| c.ty))
            .collect()
    }

    pub fn shares_state_with(&self, other: &Scope) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    pub fn stmt_uid(&self, key: &'static str) -> u32 {
        self.state.lock().uids.get(key).copied().unwrap_or(0)
    }

    pub fn incr_stmt_uid(&self, key: &'static str) {
        *self.state.lock().uids.entry(key).or_insert(0) += 1;
    }

    /// Raises the counter for `key` to at least `at`. Counters never go down.
    pub fn start_stmt_uid(&self, key: &'static str, at: u32) {
        let mut state = self.state.lock();
        let uid = state.uids.entry(key).or_insert(0);
        *uid = (*uid).max(at);
    }

    /// Returns the current counter for `key` and advances it.
    pub fn next_uid(&self, key: &'static str) -> u32 {
        let mut state = self.state.lock();
        let uid = state.uids.entry(key).or_insert(0);
        let current = *uid;
        *uid += 1;
        current
    }

    /// Opens a savepoint and returns its position in the stack.
    pub fn push_savepoint(&self, name: String) -> usize {
        let mut state = self.state.lock();
        state.savepoints.push(name);
        state.savepoints.len() - 1
    }

    pub fn open_savepoints(&self) -> Vec<String> {
        self.state.lock().savepoints.clone()
    }

    pub fn savepoint_depth(&self) -> usize {
        self.state.lock().savepoints.len()
    }

    /// `RELEASE` closes the savepoint at `idx` and everything opened after it.
    pub fn release_savepoint(&self, idx: usize) {
        self.state.lock().savepoints.truncate(idx);
    }

    /// `ROLLBACK TO` closes everything opened after `idx` but keeps it open.
    pub fn rollback_to_savepoint(&self, idx: usize) {
        self.state.lock().savepoints.truncate(idx + 1);
    }
}

/// All `(relation, column)` pairs of `refs` whose column has type `ty`.
pub fn refs_of_type(refs: &[Arc<dyn Relation>], ty: SqlType) -> Vec<RelationColumn> {
    refs.iter()
        .flat_map(|r| {
            r.columns()
                .iter()
                .filter(move |c| c.ty == ty)
                .map(move |c| RelationColumn {
                    relation: Arc::clone(r),
                    column: c.clone(),
                })
        })
        .collect()
}
