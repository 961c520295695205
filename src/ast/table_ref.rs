use std::sync::Arc;

use crate::schema::Relation;

use super::{write_joined, Base, Expr, Production, SelectStmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    LeftOuter,
    Cross,
}

impl JoinKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::LeftOuter => "LEFT OUTER JOIN",
            JoinKind::Cross => "CROSS JOIN",
        }
    }
}

/// A base table or CTE name under a fresh alias: `t0 AS t3`.
#[derive(Debug, Clone)]
pub struct TableOrQueryName {
    pub base: Base,
    pub relation: Arc<dyn Relation>,
    pub alias: String,
    /// The alias, as seen by the enclosing statement.
    pub refs: Vec<Arc<dyn Relation>>,
}

/// A derived table: `(SELECT ...) AS subq0`.
#[derive(Debug, Clone)]
pub struct TableSubquery {
    pub base: Base,
    pub lateral: bool,
    pub query: Box<SelectStmt>,
    pub alias: String,
    pub refs: Vec<Arc<dyn Relation>>,
}

#[derive(Debug, Clone)]
pub struct JoinedTable {
    pub base: Base,
    pub lhs: Box<TableRef>,
    pub kind: JoinKind,
    pub rhs: Box<TableRef>,
    /// `None` only for CROSS JOIN.
    pub condition: Option<JoinCondition>,
    /// Everything either side exposes, lhs first.
    pub refs: Vec<Arc<dyn Relation>>,
}

#[derive(Debug, Clone)]
pub enum JoinCondition {
    /// `lhs = rhs` over two columns of the same type.
    Simple {
        base: Base,
        lhs: String,
        rhs: String,
    },
    Expression {
        base: Base,
        expr: Expr,
    },
}

#[derive(Debug, Clone)]
pub enum TableRef {
    TableOrQueryName(TableOrQueryName),
    Subquery(TableSubquery),
    Joined(JoinedTable),
}

impl TableRef {
    /// Relations this table reference makes visible to its statement.
    pub fn exposed(&self) -> &[Arc<dyn Relation>] {
        match self {
            TableRef::TableOrQueryName(t) => &t.refs,
            TableRef::Subquery(t) => &t.refs,
            TableRef::Joined(t) => &t.refs,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FromClause {
    pub base: Base,
    pub refs: Vec<TableRef>,
}

impl Production for TableOrQueryName {
    fn base(&self) -> &Base {
        &self.base
    }

    fn write_sql(&self, out: &mut String) {
        out.push_str(self.relation.name());
        out.push_str(" AS ");
        out.push_str(&self.alias);
    }

    fn references(&self) -> &[Arc<dyn Relation>] {
        &self.refs
    }
}

impl Production for TableSubquery {
    fn base(&self) -> &Base {
        &self.base
    }

    fn write_sql(&self, out: &mut String) {
        if self.lateral {
            out.push_str("LATERAL ");
        }
        out.push('(');
        self.query.write_sql(out);
        out.push_str(") AS ");
        out.push_str(&self.alias);
    }

    fn references(&self) -> &[Arc<dyn Relation>] {
        &self.refs
    }
}

impl Production for JoinedTable {
    fn base(&self) -> &Base {
        &self.base
    }

    fn write_sql(&self, out: &mut String) {
        self.lhs.write_sql(out);
        out.push('\n');
        out.push_str(&self.base.indent());
        out.push_str(self.kind.as_str());
        out.push(' ');
        if let TableRef::Joined(_) = *self.rhs {
            out.push('(');
            self.rhs.write_sql(out);
            out.push(')');
        } else {
            self.rhs.write_sql(out);
        }
        if let Some(condition) = &self.condition {
            out.push_str(" ON (");
            condition.write_sql(out);
            out.push(')');
        }
    }

    fn references(&self) -> &[Arc<dyn Relation>] {
        &self.refs
    }
}

impl Production for JoinCondition {
    fn base(&self) -> &Base {
        match self {
            JoinCondition::Simple { base, .. } | JoinCondition::Expression { base, .. } => base,
        }
    }

    fn write_sql(&self, out: &mut String) {
        match self {
            JoinCondition::Simple { lhs, rhs, .. } => {
                out.push_str(lhs);
                out.push_str(" = ");
                out.push_str(rhs);
            }
            JoinCondition::Expression { expr, .. } => expr.write_sql(out),
        }
    }
}

impl Production for TableRef {
    fn base(&self) -> &Base {
        match self {
            TableRef::TableOrQueryName(t) => t.base(),
            TableRef::Subquery(t) => t.base(),
            TableRef::Joined(t) => t.base(),
        }
    }

    fn write_sql(&self, out: &mut String) {
        match self {
            TableRef::TableOrQueryName(t) => t.write_sql(out),
            TableRef::Subquery(t) => t.write_sql(out),
            TableRef::Joined(t) => t.write_sql(out),
        }
    }

    fn references(&self) -> &[Arc<dyn Relation>] {
        self.exposed()
    }
}

impl Production for FromClause {
    fn base(&self) -> &Base {
        &self.base
    }

    fn write_sql(&self, out: &mut String) {
        out.push_str("FROM ");
        write_joined(out, &self.refs, ", ");
    }
}
