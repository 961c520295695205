use crate::schema::SqlType;

use super::{write_joined, Base, Production, SelectStmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub const COMPARISONS: [BinaryOp; 6] = [
        BinaryOp::Eq,
        BinaryOp::Ne,
        BinaryOp::Lt,
        BinaryOp::Gt,
        BinaryOp::Le,
        BinaryOp::Ge,
    ];
    pub const EQUALITY: [BinaryOp; 2] = [BinaryOp::Eq, BinaryOp::Ne];
    pub const LOGICAL: [BinaryOp; 2] = [BinaryOp::And, BinaryOp::Or];

    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

#[derive(Debug, Clone)]
pub struct ColumnRef {
    pub base: Base,
    /// Already qualified, e.g. `t1.c0`.
    pub reference: String,
    pub ty: SqlType,
}

#[derive(Debug, Clone)]
pub struct ConstExpr {
    pub base: Base,
    pub value: String,
    pub ty: SqlType,
}

#[derive(Debug, Clone)]
pub struct BinaryExpr {
    pub base: Base,
    pub lhs: Box<Expr>,
    pub op: BinaryOp,
    pub rhs: Box<Expr>,
}

#[derive(Debug, Clone)]
pub struct ExistsExpr {
    pub base: Base,
    pub subquery: Box<SelectStmt>,
}

#[derive(Debug, Clone)]
pub struct NullPredicateExpr {
    pub base: Base,
    pub negated: bool,
    pub expr: Box<Expr>,
}

#[derive(Debug, Clone)]
pub struct TruthExpr {
    pub base: Base,
    pub value: bool,
}

#[derive(Debug, Clone)]
pub struct FunCallExpr {
    pub base: Base,
    pub name: &'static str,
    pub params: Vec<Expr>,
    /// Renders `name(*)` when there are no params.
    pub is_aggregate: bool,
    pub ty: SqlType,
}

#[derive(Debug, Clone)]
pub struct WindowFunExpr {
    pub base: Base,
    pub aggregate: FunCallExpr,
    pub partition_by: Vec<ColumnRef>,
    pub order_by: Vec<ColumnRef>,
}

#[derive(Debug, Clone)]
pub struct CaseExpr {
    pub base: Base,
    /// `CASE value WHEN ...` when set, `CASE WHEN cond ...` otherwise.
    pub value: Option<Box<Expr>>,
    pub whens: Vec<(Expr, Expr)>,
    pub otherwise: Option<Box<Expr>>,
    pub ty: SqlType,
}

#[derive(Debug, Clone)]
pub struct CastExpr {
    pub base: Base,
    pub expr: Box<Expr>,
    pub ty: SqlType,
}

#[derive(Debug, Clone)]
pub struct CoalesceExpr {
    pub base: Base,
    pub exprs: Vec<Expr>,
    pub ty: SqlType,
}

/// `IFNULL(a, b)` or `NULLIF(a, b)`.
#[derive(Debug, Clone)]
pub struct IfNullIfExpr {
    pub base: Base,
    pub is_null_if: bool,
    pub lhs: Box<Expr>,
    pub rhs: Box<Expr>,
    pub ty: SqlType,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Column(ColumnRef),
    Const(ConstExpr),
    Binary(BinaryExpr),
    Exists(ExistsExpr),
    NullPredicate(NullPredicateExpr),
    Truth(TruthExpr),
    FunCall(FunCallExpr),
    Window(WindowFunExpr),
    Case(CaseExpr),
    Cast(CastExpr),
    Coalesce(CoalesceExpr),
    IfNullIf(IfNullIfExpr),
}

impl Expr {
    pub fn ty(&self) -> SqlType {
        match self {
            Expr::Column(e) => e.ty,
            Expr::Const(e) => e.ty,
            Expr::Binary(_) | Expr::Exists(_) | Expr::NullPredicate(_) | Expr::Truth(_) => {
                SqlType::Bool
            }
            Expr::FunCall(e) => e.ty,
            Expr::Window(e) => e.aggregate.ty,
            Expr::Case(e) => e.ty,
            Expr::Cast(e) => e.ty,
            Expr::Coalesce(e) => e.ty,
            Expr::IfNullIf(e) => e.ty,
        }
    }
}

impl Production for ColumnRef {
    fn base(&self) -> &Base {
        &self.base
    }

    fn write_sql(&self, out: &mut String) {
        out.push_str(&self.reference);
    }
}

impl Production for ConstExpr {
    fn base(&self) -> &Base {
        &self.base
    }

    fn write_sql(&self, out: &mut String) {
        out.push_str(&self.value);
    }
}

impl Production for BinaryExpr {
    fn base(&self) -> &Base {
        &self.base
    }

    fn write_sql(&self, out: &mut String) {
        // logical operands are parenthesized so the text parses back into
        // the same tree
        let paren = self.op.is_logical();
        if paren {
            out.push('(');
        }
        self.lhs.write_sql(out);
        if paren {
            out.push(')');
        }
        out.push(' ');
        out.push_str(self.op.as_str());
        out.push(' ');
        if paren {
            out.push('(');
        }
        self.rhs.write_sql(out);
        if paren {
            out.push(')');
        }
    }
}

impl Production for ExistsExpr {
    fn base(&self) -> &Base {
        &self.base
    }

    fn write_sql(&self, out: &mut String) {
        let indent = self.base.indent();
        out.push_str("EXISTS (\n");
        out.push_str(&indent);
        self.subquery.write_sql(out);
        out.push('\n');
        out.push_str(&indent);
        out.push(')');
    }
}

impl Production for NullPredicateExpr {
    fn base(&self) -> &Base {
        &self.base
    }

    fn write_sql(&self, out: &mut String) {
        self.expr.write_sql(out);
        out.push_str(if self.negated { " IS NOT NULL" } else { " IS NULL" });
    }
}

impl Production for TruthExpr {
    fn base(&self) -> &Base {
        &self.base
    }

    fn write_sql(&self, out: &mut String) {
        out.push_str(if self.value { "TRUE" } else { "FALSE" });
    }
}

impl Production for FunCallExpr {
    fn base(&self) -> &Base {
        &self.base
    }

    fn write_sql(&self, out: &mut String) {
        out.push_str(self.name);
        out.push('(');
        if self.params.is_empty() && self.is_aggregate {
            out.push('*');
        } else {
            write_joined(out, &self.params, ", ");
        }
        out.push(')');
    }
}

impl Production for WindowFunExpr {
    fn base(&self) -> &Base {
        &self.base
    }

    fn write_sql(&self, out: &mut String) {
        self.aggregate.write_sql(out);
        out.push_str(" OVER (");
        if !self.partition_by.is_empty() {
            out.push_str("PARTITION BY ");
            write_joined(out, &self.partition_by, ", ");
        }
        if !self.order_by.is_empty() {
            if !self.partition_by.is_empty() {
                out.push(' ');
            }
            out.push_str("ORDER BY ");
            write_joined(out, &self.order_by, ", ");
        }
        out.push(')');
    }
}

impl Production for CaseExpr {
    fn base(&self) -> &Base {
        &self.base
    }

    fn write_sql(&self, out: &mut String) {
        out.push_str("CASE");
        if let Some(value) = &self.value {
            out.push(' ');
            value.write_sql(out);
        }
        for (when, then) in &self.whens {
            out.push_str(" WHEN ");
            when.write_sql(out);
            out.push_str(" THEN ");
            then.write_sql(out);
        }
        if let Some(otherwise) = &self.otherwise {
            out.push_str(" ELSE ");
            otherwise.write_sql(out);
        }
        out.push_str(" END");
    }
}

impl Production for CastExpr {
    fn base(&self) -> &Base {
        &self.base
    }

    fn write_sql(&self, out: &mut String) {
        out.push_str("CAST(");
        self.expr.write_sql(out);
        out.push_str(" AS ");
        out.push_str(self.ty.as_str());
        out.push(')');
    }
}

impl Production for CoalesceExpr {
    fn base(&self) -> &Base {
        &self.base
    }

    fn write_sql(&self, out: &mut String) {
        out.push_str("COALESCE(");
        write_joined(out, &self.exprs, ", ");
        out.push(')');
    }
}

impl Production for IfNullIfExpr {
    fn base(&self) -> &Base {
        &self.base
    }

    fn write_sql(&self, out: &mut String) {
        out.push_str(if self.is_null_if { "NULLIF(" } else { "IFNULL(" });
        self.lhs.write_sql(out);
        out.push_str(", ");
        self.rhs.write_sql(out);
        out.push(')');
    }
}

impl Production for Expr {
    fn base(&self) -> &Base {
        match self {
            Expr::Column(e) => e.base(),
            Expr::Const(e) => e.base(),
            Expr::Binary(e) => e.base(),
            Expr::Exists(e) => e.base(),
            Expr::NullPredicate(e) => e.base(),
            Expr::Truth(e) => e.base(),
            Expr::FunCall(e) => e.base(),
            Expr::Window(e) => e.base(),
            Expr::Case(e) => e.base(),
            Expr::Cast(e) => e.base(),
            Expr::Coalesce(e) => e.base(),
            Expr::IfNullIf(e) => e.base(),
        }
    }

    fn write_sql(&self, out: &mut String) {
        match self {
            Expr::Column(e) => e.write_sql(out),
            Expr::Const(e) => e.write_sql(out),
            Expr::Binary(e) => e.write_sql(out),
            Expr::Exists(e) => e.write_sql(out),
            Expr::NullPredicate(e) => e.write_sql(out),
            Expr::Truth(e) => e.write_sql(out),
            Expr::FunCall(e) => e.write_sql(out),
            Expr::Window(e) => e.write_sql(out),
            Expr::Case(e) => e.write_sql(out),
            Expr::Cast(e) => e.write_sql(out),
            Expr::Coalesce(e) => e.write_sql(out),
            Expr::IfNullIf(e) => e.write_sql(out),
        }
    }
}
