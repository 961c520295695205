//! Read-only traversal of statement trees.
//!
//! Override the `visit_*` hooks you care about and call the matching
//! `walk_*` function to keep descending. The walks match exhaustively, so a
//! new node kind does not compile until every traversal handles it.

use super::{Expr, JoinCondition, SelectStmt, Statement, TableRef};

pub trait Visit {
    fn visit_statement(&mut self, stmt: &Statement) {
        walk_statement(self, stmt);
    }

    fn visit_select(&mut self, select: &SelectStmt) {
        walk_select(self, select);
    }

    fn visit_table_ref(&mut self, table: &TableRef) {
        walk_table_ref(self, table);
    }

    fn visit_join_condition(&mut self, condition: &JoinCondition) {
        walk_join_condition(self, condition);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }
}

pub fn walk_statement<V: Visit + ?Sized>(v: &mut V, stmt: &Statement) {
    match stmt {
        Statement::Select(s) => v.visit_select(s),
        Statement::Insert(s) => s.values.iter().for_each(|e| v.visit_expr(e)),
        Statement::Update(s) => {
            for (_, e) in &s.set.assignments {
                v.visit_expr(e);
            }
            v.visit_expr(&s.where_clause);
        }
        Statement::Delete(s) => v.visit_expr(&s.where_clause),
        Statement::Cte(s) => {
            for (_, q) in &s.with_queries {
                v.visit_select(q);
            }
            v.visit_select(&s.query);
        }
        Statement::Compound(s) => {
            v.visit_select(&s.lhs);
            v.visit_select(&s.rhs);
        }
        Statement::Savepoint(s) => s.stmts.iter().for_each(|st| v.visit_statement(st)),
        Statement::View(s) => v.visit_select(&s.query),
        Statement::Explain(s) => v.visit_statement(&s.stmt),
        Statement::Analyse(_) | Statement::Vacuum(_) => {}
    }
}

pub fn walk_select<V: Visit + ?Sized>(v: &mut V, select: &SelectStmt) {
    for e in &select.select.exprs {
        v.visit_expr(e);
    }
    for t in &select.from.refs {
        v.visit_table_ref(t);
    }
    v.visit_expr(&select.where_clause);
}

pub fn walk_table_ref<V: Visit + ?Sized>(v: &mut V, table: &TableRef) {
    match table {
        TableRef::TableOrQueryName(_) => {}
        TableRef::Subquery(t) => v.visit_select(&t.query),
        TableRef::Joined(t) => {
            v.visit_table_ref(&t.lhs);
            v.visit_table_ref(&t.rhs);
            if let Some(c) = &t.condition {
                v.visit_join_condition(c);
            }
        }
    }
}

pub fn walk_join_condition<V: Visit + ?Sized>(v: &mut V, condition: &JoinCondition) {
    match condition {
        JoinCondition::Simple { .. } => {}
        JoinCondition::Expression { expr, .. } => v.visit_expr(expr),
    }
}

pub fn walk_expr<V: Visit + ?Sized>(v: &mut V, expr: &Expr) {
    match expr {
        Expr::Column(_) | Expr::Const(_) | Expr::Truth(_) => {}
        Expr::Binary(e) => {
            v.visit_expr(&e.lhs);
            v.visit_expr(&e.rhs);
        }
        Expr::Exists(e) => v.visit_select(&e.subquery),
        Expr::NullPredicate(e) => v.visit_expr(&e.expr),
        Expr::FunCall(e) => e.params.iter().for_each(|p| v.visit_expr(p)),
        Expr::Window(e) => e.aggregate.params.iter().for_each(|p| v.visit_expr(p)),
        Expr::Case(e) => {
            if let Some(value) = &e.value {
                v.visit_expr(value);
            }
            for (when, then) in &e.whens {
                v.visit_expr(when);
                v.visit_expr(then);
            }
            if let Some(otherwise) = &e.otherwise {
                v.visit_expr(otherwise);
            }
        }
        Expr::Cast(e) => v.visit_expr(&e.expr),
        Expr::Coalesce(e) => e.exprs.iter().for_each(|x| v.visit_expr(x)),
        Expr::IfNullIf(e) => {
            v.visit_expr(&e.lhs);
            v.visit_expr(&e.rhs);
        }
    }
}
