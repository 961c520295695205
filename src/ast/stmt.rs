use crate::schema::{Column, SqlType};

use super::{write_joined, Base, Expr, FromClause, Production};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetQuantifier {
    Distinct,
    All,
}

impl SetQuantifier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetQuantifier::Distinct => "DISTINCT",
            SetQuantifier::All => "ALL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collation {
    Binary,
    NoCase,
    RTrim,
}

impl Collation {
    pub const ALL: [Collation; 3] = [Collation::Binary, Collation::NoCase, Collation::RTrim];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collation::Binary => "BINARY",
            Collation::NoCase => "NOCASE",
            Collation::RTrim => "RTRIM",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompoundOp {
    Union,
    UnionAll,
    Intersect,
    Except,
}

impl CompoundOp {
    pub const ALL: [CompoundOp; 4] = [
        CompoundOp::Union,
        CompoundOp::UnionAll,
        CompoundOp::Intersect,
        CompoundOp::Except,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompoundOp::Union => "UNION",
            CompoundOp::UnionAll => "UNION ALL",
            CompoundOp::Intersect => "INTERSECT",
            CompoundOp::Except => "EXCEPT",
        }
    }
}

/// Output expressions of a SELECT, each under its own name.
#[derive(Debug, Clone)]
pub struct SelectClause {
    pub base: Base,
    pub exprs: Vec<Expr>,
    pub names: Vec<String>,
}

impl SelectClause {
    pub fn derived_columns(&self) -> Vec<Column> {
        self.exprs
            .iter()
            .zip(&self.names)
            .map(|(e, name)| Column::new(name.clone(), e.ty()))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct OrderByTerm {
    pub name: String,
    pub collation: Option<Collation>,
    pub direction: Option<SortDirection>,
}

#[derive(Debug, Clone)]
pub struct OrderByClause {
    pub base: Base,
    pub terms: Vec<OrderByTerm>,
}

#[derive(Debug, Clone)]
pub struct SelectStmt {
    pub base: Base,
    pub quantifier: Option<SetQuantifier>,
    pub select: SelectClause,
    pub from: FromClause,
    pub where_clause: Expr,
    pub order_by: Option<OrderByClause>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl SelectStmt {
    pub fn derived_columns(&self) -> Vec<Column> {
        self.select.derived_columns()
    }

    pub fn column_types(&self) -> Vec<SqlType> {
        self.select.exprs.iter().map(Expr::ty).collect()
    }
}

#[derive(Debug, Clone)]
pub struct InsertStmt {
    pub base: Base,
    pub table: String,
    /// One value per column; empty renders `DEFAULT VALUES`.
    pub values: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub struct SetClause {
    pub base: Base,
    pub assignments: Vec<(String, Expr)>,
}

#[derive(Debug, Clone)]
pub struct UpdateStmt {
    pub base: Base,
    pub table: String,
    pub set: SetClause,
    pub where_clause: Expr,
}

#[derive(Debug, Clone)]
pub struct DeleteStmt {
    pub base: Base,
    pub table: String,
    pub where_clause: Expr,
}

#[derive(Debug, Clone)]
pub struct CteStmt {
    pub base: Base,
    pub with_queries: Vec<(String, SelectStmt)>,
    pub query: SelectStmt,
}

#[derive(Debug, Clone)]
pub struct CompoundStmt {
    pub base: Base,
    pub lhs: SelectStmt,
    pub op: CompoundOp,
    pub rhs: SelectStmt,
    pub order_by: Option<OrderByClause>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SavepointEnd {
    RollbackTo(String),
    Release(String),
}

#[derive(Debug, Clone)]
pub struct SavepointStmt {
    pub base: Base,
    pub name: String,
    pub stmts: Vec<Statement>,
    /// `None` when a nested savepoint already closed this one.
    pub end: Option<SavepointEnd>,
}

#[derive(Debug, Clone)]
pub struct ViewStmt {
    pub base: Base,
    pub is_temp: bool,
    pub if_not_exists: bool,
    pub name: String,
    pub columns: Vec<String>,
    pub query: SelectStmt,
}

#[derive(Debug, Clone)]
pub struct ExplainStmt {
    pub base: Base,
    pub query_plan: bool,
    pub stmt: Box<Statement>,
}

#[derive(Debug, Clone)]
pub struct AnalyseStmt {
    pub base: Base,
    /// `schema`, `table` or `schema.table`.
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct VacuumStmt {
    pub base: Base,
    pub schema_name: String,
}

#[derive(Debug, Clone)]
pub enum Statement {
    Select(SelectStmt),
    Insert(InsertStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
    Cte(CteStmt),
    Compound(CompoundStmt),
    Savepoint(SavepointStmt),
    View(ViewStmt),
    Explain(ExplainStmt),
    Analyse(AnalyseStmt),
    Vacuum(VacuumStmt),
}

impl Statement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Statement::Select(_) => "SELECT",
            Statement::Insert(_) => "INSERT",
            Statement::Update(_) => "UPDATE",
            Statement::Delete(_) => "DELETE",
            Statement::Cte(_) => "CTE",
            Statement::Compound(_) => "COMPOUND",
            Statement::Savepoint(_) => "SAVEPOINT",
            Statement::View(_) => "VIEW",
            Statement::Explain(_) => "EXPLAIN",
            Statement::Analyse(_) => "ANALYZE",
            Statement::Vacuum(_) => "VACUUM",
        }
    }
}

impl Production for SelectClause {
    fn base(&self) -> &Base {
        &self.base
    }

    fn write_sql(&self, out: &mut String) {
        for (i, (expr, name)) in self.exprs.iter().zip(&self.names).enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            expr.write_sql(out);
            out.push_str(" AS ");
            out.push_str(name);
        }
    }
}

impl Production for OrderByClause {
    fn base(&self) -> &Base {
        &self.base
    }

    fn write_sql(&self, out: &mut String) {
        out.push_str("ORDER BY ");
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(&term.name);
            if let Some(collation) = term.collation {
                out.push_str(" COLLATE ");
                out.push_str(collation.as_str());
            }
            if let Some(direction) = term.direction {
                out.push(' ');
                out.push_str(direction.as_str());
            }
        }
    }
}

fn write_limit(out: &mut String, indent: &str, limit: Option<u32>, offset: Option<u32>) {
    if let Some(limit) = limit {
        out.push('\n');
        out.push_str(indent);
        out.push_str(&format!("LIMIT {limit}"));
        if let Some(offset) = offset {
            out.push_str(&format!(" OFFSET {offset}"));
        }
    }
}

impl Production for SelectStmt {
    fn base(&self) -> &Base {
        &self.base
    }

    fn write_sql(&self, out: &mut String) {
        let indent = self.base.indent();
        out.push_str("SELECT ");
        if let Some(quantifier) = self.quantifier {
            out.push_str(quantifier.as_str());
            out.push(' ');
        }
        self.select.write_sql(out);
        out.push('\n');
        out.push_str(&indent);
        self.from.write_sql(out);
        out.push('\n');
        out.push_str(&indent);
        out.push_str("WHERE ");
        self.where_clause.write_sql(out);
        if let Some(order_by) = &self.order_by {
            out.push('\n');
            out.push_str(&indent);
            order_by.write_sql(out);
        }
        write_limit(out, &indent, self.limit, self.offset);
    }
}

impl Production for InsertStmt {
    fn base(&self) -> &Base {
        &self.base
    }

    fn write_sql(&self, out: &mut String) {
        out.push_str("INSERT INTO ");
        out.push_str(&self.table);
        if self.values.is_empty() {
            out.push_str(" DEFAULT VALUES");
        } else {
            out.push_str(" VALUES (");
            write_joined(out, &self.values, ", ");
            out.push(')');
        }
    }
}

impl Production for SetClause {
    fn base(&self) -> &Base {
        &self.base
    }

    fn write_sql(&self, out: &mut String) {
        out.push_str("SET ");
        for (i, (column, expr)) in self.assignments.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(column);
            out.push_str(" = ");
            expr.write_sql(out);
        }
    }
}

impl Production for UpdateStmt {
    fn base(&self) -> &Base {
        &self.base
    }

    fn write_sql(&self, out: &mut String) {
        out.push_str("UPDATE ");
        out.push_str(&self.table);
        out.push('\n');
        self.set.write_sql(out);
        out.push_str("\nWHERE ");
        self.where_clause.write_sql(out);
    }
}

impl Production for DeleteStmt {
    fn base(&self) -> &Base {
        &self.base
    }

    fn write_sql(&self, out: &mut String) {
        out.push_str("DELETE FROM ");
        out.push_str(&self.table);
        out.push_str("\nWHERE ");
        self.where_clause.write_sql(out);
    }
}

impl Production for CteStmt {
    fn base(&self) -> &Base {
        &self.base
    }

    fn write_sql(&self, out: &mut String) {
        out.push_str("WITH ");
        for (i, (alias, query)) in self.with_queries.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(alias);
            out.push_str(" AS (\n");
            query.write_sql(out);
            out.push_str("\n)");
        }
        out.push('\n');
        self.query.write_sql(out);
    }
}

impl Production for CompoundStmt {
    fn base(&self) -> &Base {
        &self.base
    }

    fn write_sql(&self, out: &mut String) {
        self.lhs.write_sql(out);
        out.push('\n');
        out.push_str(self.op.as_str());
        out.push('\n');
        self.rhs.write_sql(out);
        if let Some(order_by) = &self.order_by {
            out.push('\n');
            order_by.write_sql(out);
        }
        write_limit(out, "", self.limit, None);
    }
}

impl Production for SavepointStmt {
    fn base(&self) -> &Base {
        &self.base
    }

    fn write_sql(&self, out: &mut String) {
        out.push_str("SAVEPOINT ");
        out.push_str(&self.name);
        out.push_str(";\n");
        for stmt in &self.stmts {
            stmt.write_sql(out);
            out.push_str(";\n");
        }
        match &self.end {
            Some(SavepointEnd::RollbackTo(name)) => {
                out.push_str("ROLLBACK TO ");
                out.push_str(name);
            }
            Some(SavepointEnd::Release(name)) => {
                out.push_str("RELEASE ");
                out.push_str(name);
            }
            None => {}
        }
    }
}

impl Production for ViewStmt {
    fn base(&self) -> &Base {
        &self.base
    }

    fn write_sql(&self, out: &mut String) {
        out.push_str("CREATE ");
        if self.is_temp {
            out.push_str("TEMP ");
        }
        out.push_str("VIEW ");
        if self.if_not_exists {
            out.push_str("IF NOT EXISTS ");
        }
        out.push_str(&self.name);
        out.push('(');
        out.push_str(&self.columns.join(", "));
        out.push_str(") AS\n");
        self.query.write_sql(out);
    }
}

impl Production for ExplainStmt {
    fn base(&self) -> &Base {
        &self.base
    }

    fn write_sql(&self, out: &mut String) {
        out.push_str("EXPLAIN ");
        if self.query_plan {
            out.push_str("QUERY PLAN ");
        }
        self.stmt.write_sql(out);
    }
}

impl Production for AnalyseStmt {
    fn base(&self) -> &Base {
        &self.base
    }

    fn write_sql(&self, out: &mut String) {
        out.push_str("ANALYZE ");
        out.push_str(&self.name);
    }
}

impl Production for VacuumStmt {
    fn base(&self) -> &Base {
        &self.base
    }

    fn write_sql(&self, out: &mut String) {
        out.push_str("VACUUM ");
        out.push_str(&self.schema_name);
    }
}

impl Production for Statement {
    fn base(&self) -> &Base {
        match self {
            Statement::Select(s) => s.base(),
            Statement::Insert(s) => s.base(),
            Statement::Update(s) => s.base(),
            Statement::Delete(s) => s.base(),
            Statement::Cte(s) => s.base(),
            Statement::Compound(s) => s.base(),
            Statement::Savepoint(s) => s.base(),
            Statement::View(s) => s.base(),
            Statement::Explain(s) => s.base(),
            Statement::Analyse(s) => s.base(),
            Statement::Vacuum(s) => s.base(),
        }
    }

    fn write_sql(&self, out: &mut String) {
        match self {
            Statement::Select(s) => s.write_sql(out),
            Statement::Insert(s) => s.write_sql(out),
            Statement::Update(s) => s.write_sql(out),
            Statement::Delete(s) => s.write_sql(out),
            Statement::Cte(s) => s.write_sql(out),
            Statement::Compound(s) => s.write_sql(out),
            Statement::Savepoint(s) => s.write_sql(out),
            Statement::View(s) => s.write_sql(out),
            Statement::Explain(s) => s.write_sql(out),
            Statement::Analyse(s) => s.write_sql(out),
            Statement::Vacuum(s) => s.write_sql(out),
        }
    }
}
