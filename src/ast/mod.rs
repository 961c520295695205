//! Syntax tree of generated statements.
//!
//! Nodes own their children. Every node carries a [`Base`]: the scope it
//! was generated in and a [`Path`] to its ancestors, which answers upward
//! questions ("am I inside a SELECT list?") without owning anything.

pub mod characteristics;
mod expr;
mod stmt;
mod table_ref;
pub mod visit;

use std::sync::Arc;

use crate::schema::{Relation, Schema, SqlType};
use crate::scope::Scope;

pub use expr::{
    BinaryExpr, BinaryOp, CaseExpr, CastExpr, CoalesceExpr, ColumnRef, ConstExpr, ExistsExpr, Expr,
    FunCallExpr, IfNullIfExpr, NullPredicateExpr, TruthExpr, WindowFunExpr,
};
pub use stmt::{
    AnalyseStmt, Collation, CompoundOp, CompoundStmt, CteStmt, DeleteStmt, ExplainStmt, InsertStmt,
    OrderByClause, OrderByTerm, SavepointEnd, SavepointStmt, SelectClause, SelectStmt, SetClause,
    SetQuantifier, SortDirection, Statement, UpdateStmt, VacuumStmt, ViewStmt,
};
pub use table_ref::{
    FromClause, JoinCondition, JoinKind, JoinedTable, TableOrQueryName, TableRef, TableSubquery,
};

/// Kind of a production, as seen from its descendants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProdKind {
    SelectStmt,
    SelectClause,
    FromClause,
    OrderBy,
    InsertStmt,
    UpdateStmt,
    SetClause,
    DeleteStmt,
    CteStmt,
    CompoundStmt,
    SavepointStmt,
    ViewStmt,
    ExplainStmt,
    AnalyseStmt,
    VacuumStmt,
    TableOrQueryName,
    TableSubquery,
    JoinedTable,
    SimpleJoinCondition,
    ExpressionJoinCondition,
    ColumnRef,
    Const,
    Binary,
    Exists,
    NullPredicate,
    Truth,
    FunCall,
    WindowFun,
    Case,
    Cast,
    Coalesce,
    IfNullIf,
}

impl ProdKind {
    pub fn is_value_expr(&self) -> bool {
        matches!(
            self,
            ProdKind::ColumnRef
                | ProdKind::Const
                | ProdKind::Binary
                | ProdKind::Exists
                | ProdKind::NullPredicate
                | ProdKind::Truth
                | ProdKind::FunCall
                | ProdKind::WindowFun
                | ProdKind::Case
                | ProdKind::Cast
                | ProdKind::Coalesce
                | ProdKind::IfNullIf
        )
    }
}

/// One step of the ancestor chain of a node.
#[derive(Debug)]
pub struct Path {
    pub kind: ProdKind,
    pub level: usize,
    parent: Option<Arc<Path>>,
}

impl Path {
    pub fn parent(&self) -> Option<&Path> {
        self.parent.as_deref()
    }

    /// Iterates from this node up to the root.
    pub fn ancestors(&self) -> impl Iterator<Item = &Path> {
        std::iter::successors(Some(self), |p| p.parent())
    }
}

/// Window functions are legal only inside the expression list of a SELECT,
/// and never nested in another window function.
pub fn is_window_function_allowed(path: &Path) -> bool {
    for p in path.ancestors() {
        match p.kind {
            ProdKind::SelectClause => {
                return p.parent().is_some_and(|s| s.kind == ProdKind::SelectStmt);
            }
            ProdKind::WindowFun => return false,
            kind if kind.is_value_expr() => continue,
            _ => return false,
        }
    }
    false
}

#[derive(Debug, Clone)]
pub struct Base {
    path: Arc<Path>,
    scope: Arc<Scope>,
}

impl Base {
    /// Base of a node one level below `parent` (or a root node).
    pub fn new(parent: Option<&Base>, kind: ProdKind, scope: Arc<Scope>) -> Self {
        let path = match parent {
            Some(p) => Path {
                kind,
                level: p.path.level + 1,
                parent: Some(Arc::clone(&p.path)),
            },
            None => Path {
                kind,
                level: 0,
                parent: None,
            },
        };
        Self {
            path: Arc::new(path),
            scope,
        }
    }

    /// Child of `self` in the same scope.
    pub fn child(&self, kind: ProdKind) -> Self {
        Self::new(Some(self), kind, Arc::clone(&self.scope))
    }

    /// Same position in the tree, different scope.
    pub fn with_scope(&self, scope: Arc<Scope>) -> Self {
        Self {
            path: Arc::clone(&self.path),
            scope,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> ProdKind {
        self.path.kind
    }

    pub fn parent(&self) -> Option<&Path> {
        self.path.parent()
    }

    pub fn level(&self) -> usize {
        self.path.level
    }

    pub fn scope(&self) -> &Arc<Scope> {
        &self.scope
    }

    pub fn indent(&self) -> String {
        " ".repeat(self.path.level)
    }
}

/// Common interface of every node.
pub trait Production {
    fn base(&self) -> &Base;

    /// Appends the SQL text of this subtree to `out`. Rendering only reads
    /// the subtree, so any slice of a tree renders on its own.
    fn write_sql(&self, out: &mut String);

    fn out(&self) -> String {
        let mut sql = String::new();
        self.write_sql(&mut sql);
        sql
    }

    fn parent(&self) -> Option<&Path> {
        self.base().parent()
    }

    fn level(&self) -> usize {
        self.base().level()
    }

    fn schema(&self) -> &Schema {
        &self.base().scope.schema
    }

    fn references(&self) -> &[Arc<dyn Relation>] {
        &self.base().scope.refs
    }

    fn available_types(&self) -> Vec<SqlType> {
        self.base().scope.available_types()
    }
}

fn write_joined<T: Production>(out: &mut String, items: &[T], sep: &str) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(sep);
        }
        item.write_sql(out);
    }
}
