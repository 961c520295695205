use std::collections::BTreeMap;
use std::fmt;

use super::visit::{walk_expr, walk_join_condition, walk_select, walk_statement, walk_table_ref, Visit};
use super::{Expr, JoinCondition, Production, SelectStmt, Statement, TableRef};

/// Clause counts and nesting depth of a group of statements.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Characteristics {
    pub clause_counts: BTreeMap<&'static str, usize>,
    pub max_depth: usize,
}

impl Characteristics {
    pub fn of(stmts: &[Statement]) -> Self {
        let mut c = Self::default();
        for stmt in stmts {
            c.visit_statement(stmt);
        }
        c
    }

    pub fn count(&self, clause: &str) -> usize {
        self.clause_counts.get(clause).copied().unwrap_or(0)
    }

    fn bump(&mut self, clause: &'static str) {
        *self.clause_counts.entry(clause).or_insert(0) += 1;
    }

    fn reach(&mut self, level: usize) {
        self.max_depth = self.max_depth.max(level);
    }
}

impl Visit for Characteristics {
    fn visit_statement(&mut self, stmt: &Statement) {
        self.reach(stmt.level());
        match stmt {
            Statement::Select(_) => {}
            Statement::Insert(_) | Statement::Delete(_) | Statement::Savepoint(_) => {
                self.bump(stmt.as_str())
            }
            Statement::Update(_) => {
                self.bump("UPDATE");
                self.bump("SET");
            }
            Statement::Cte(_) => self.bump("WITH"),
            Statement::Compound(s) => {
                self.bump(s.op.as_str());
                if s.limit.is_some() {
                    self.bump("LIMIT");
                }
                if s.order_by.is_some() {
                    self.bump("ORDER");
                }
            }
            Statement::View(_) => self.bump("CREATE VIEW"),
            Statement::Explain(s) => {
                self.bump("EXPLAIN");
                if s.query_plan {
                    self.bump("QUERY PLAN");
                }
            }
            Statement::Analyse(_) | Statement::Vacuum(_) => self.bump(stmt.as_str()),
        }
        walk_statement(self, stmt);
    }

    fn visit_select(&mut self, select: &SelectStmt) {
        self.reach(select.level());
        self.bump("SELECT");
        self.bump("FROM");
        self.bump("WHERE");
        if let Some(q) = select.quantifier {
            self.bump(q.as_str());
        }
        if select.order_by.is_some() {
            self.bump("ORDER");
        }
        if select.limit.is_some() {
            self.bump("LIMIT");
        }
        if select.offset.is_some() {
            self.bump("OFFSET");
        }
        walk_select(self, select);
    }

    fn visit_table_ref(&mut self, table: &TableRef) {
        self.reach(table.level());
        match table {
            TableRef::TableOrQueryName(_) => {}
            TableRef::Subquery(_) => self.bump("SUBQUERY"),
            TableRef::Joined(t) => {
                self.bump("JOIN");
                self.bump(t.kind.as_str());
            }
        }
        walk_table_ref(self, table);
    }

    fn visit_join_condition(&mut self, condition: &JoinCondition) {
        self.reach(condition.level());
        walk_join_condition(self, condition);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        self.reach(expr.level());
        match expr {
            Expr::Exists(_) => self.bump("EXISTS"),
            Expr::NullPredicate(_) => self.bump("IS NULL"),
            Expr::FunCall(_) => self.bump("FUNCTION"),
            Expr::Window(_) => {
                self.bump("WINDOW");
                self.bump("FUNCTION");
                self.bump("AGGREGATE");
            }
            Expr::Case(_) => self.bump("CASE"),
            Expr::Cast(_) => self.bump("CAST"),
            Expr::Coalesce(_) => self.bump("COALESCE"),
            Expr::IfNullIf(e) => self.bump(if e.is_null_if { "NULLIF" } else { "IFNULL" }),
            Expr::Column(_) | Expr::Const(_) | Expr::Binary(_) | Expr::Truth(_) => {}
        }
        walk_expr(self, expr);
    }
}

impl fmt::Display for Characteristics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "max_depth={}", self.max_depth)?;
        for (clause, n) in &self.clause_counts {
            write!(f, " {clause}={n}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::generator::{Generator, GeneratorConfig};
    use crate::scope::Scope;

    #[test]
    fn counts_clauses_of_generated_statements() {
        let mut gen = Generator::seeded(GeneratorConfig::default(), 7);
        let schema = Arc::new(gen.generate_tables(1));
        let scope = Arc::new(Scope::root(Arc::clone(&schema)));
        let insert = gen.generate_insert(None, &scope).unwrap();
        let select = gen.generate_select(None, &scope).unwrap();

        let c = Characteristics::of(&[Statement::Insert(insert), Statement::Select(select)]);
        assert_eq!(c.count("INSERT"), 1);
        assert!(c.count("SELECT") >= 1);
        assert_eq!(c.count("SELECT"), c.count("WHERE"));
        assert!(c.max_depth >= 1);
        assert!(c.to_string().starts_with("max_depth="));
    }

    #[test]
    fn empty_group_has_no_counts() {
        let c = Characteristics::of(&[]);
        assert_eq!(c, Characteristics::default());
        assert_eq!(c.count("SELECT"), 0);
    }
}
