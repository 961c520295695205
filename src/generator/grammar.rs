use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;

use super::random::Dice;
use super::{retry, Generator, MAX_RETRIES};
use crate::ast::{
    AnalyseStmt, Base, Collation, CompoundOp, CompoundStmt, CteStmt, DeleteStmt, ExplainStmt,
    FromClause, InsertStmt, JoinCondition, JoinKind, JoinedTable, OrderByClause, OrderByTerm,
    ProdKind, SavepointEnd, SavepointStmt, SelectClause, SelectStmt, SetClause, SetQuantifier,
    SortDirection, Statement, TableOrQueryName, TableRef, TableSubquery, UpdateStmt, VacuumStmt,
    ViewStmt,
};
use crate::error::GenError;
use crate::schema::{AliasedRelation, Relation, SqlType, Table};
use crate::scope::Scope;

/// Views outlive the statement that created them, so their names are unique
/// per process rather than per statement.
static VIEW_COUNTER: AtomicU64 = AtomicU64::new(0);

const MAX_SAVEPOINT_DEPTH: usize = 12;

/// Constraints a caller puts on a generated SELECT.
#[derive(Debug, Clone)]
pub(crate) struct SelectShape {
    /// Exact output column types, chosen freely when `None`.
    pub column_types: Option<Vec<SqlType>>,
    /// Whether ORDER BY and LIMIT may follow.
    pub allow_tail: bool,
}

impl Default for SelectShape {
    fn default() -> Self {
        Self {
            column_types: None,
            allow_tail: true,
        }
    }
}

fn pick_relation<R: Rng + ?Sized>(
    rng: &mut R,
    relations: &[Arc<dyn Relation>],
) -> Result<Arc<dyn Relation>, GenError> {
    relations
        .choose(rng)
        .map(Arc::clone)
        .ok_or(GenError::Invariant("scope has no tables"))
}

fn base_table(relation: &Arc<dyn Relation>) -> Result<&Table, GenError> {
    relation
        .as_table()
        .ok_or(GenError::Invariant("data-modifying statement targets a derived relation"))
}

impl Generator {
    /// One statement from the general mix. Checks run in a fixed order and
    /// the first that fires wins, so rare kinds stay rare.
    pub fn generate_statement(&mut self, scope: &Arc<Scope>) -> Result<Statement, GenError> {
        self.statement_mix(None, scope, true)
    }

    fn statement_mix(
        &mut self,
        parent: Option<&Base>,
        scope: &Arc<Scope>,
        allow_savepoint: bool,
    ) -> Result<Statement, GenError> {
        let stmt = if self.rng.d42() == 1 {
            Statement::Insert(self.generate_insert(parent, scope)?)
        } else if self.rng.d42() == 1 {
            Statement::Update(self.generate_update(parent, scope)?)
        } else if self.rng.d42() == 1 {
            Statement::Delete(self.generate_delete(parent, scope)?)
        } else if self.rng.d42() == 1 {
            Statement::Cte(self.generate_cte(parent, scope)?)
        } else if self.rng.d1000() == 1 {
            Statement::Analyse(self.generate_analyse(parent, scope)?)
        } else if self.rng.d1000() + self.rng.d1000() == 2 {
            Statement::Vacuum(self.generate_vacuum(parent, scope))
        } else if self.rng.d42() == 1 {
            Statement::Compound(self.generate_compound(parent, scope)?)
        } else if allow_savepoint && self.rng.d100() == 1 {
            Statement::Savepoint(self.generate_savepoint(parent, scope)?)
        } else if self.rng.d100() == 1 {
            Statement::View(self.generate_view(parent, scope)?)
        } else {
            Statement::Select(self.generate_select(parent, scope)?)
        };
        Ok(stmt)
    }

    pub fn generate_explain(
        &mut self,
        parent: Option<&Base>,
        scope: &Arc<Scope>,
    ) -> Result<ExplainStmt, GenError> {
        let base = Base::new(parent, ProdKind::ExplainStmt, Arc::clone(scope));
        let query_plan = self.rng.d6() < 3;
        let stmt = self.statement_mix(Some(&base), scope, false)?;
        Ok(ExplainStmt {
            base,
            query_plan,
            stmt: Box::new(stmt),
        })
    }

    pub fn generate_analyse(
        &mut self,
        parent: Option<&Base>,
        scope: &Arc<Scope>,
    ) -> Result<AnalyseStmt, GenError> {
        let table = pick_relation(&mut self.rng, &scope.tables)?;
        let name = match &scope.schema.name {
            Some(schema) if self.rng.d6() < 3 => schema.clone(),
            Some(schema) => format!("{schema}.{}", table.name()),
            None => table.name().to_string(),
        };
        Ok(AnalyseStmt {
            base: Base::new(parent, ProdKind::AnalyseStmt, Arc::clone(scope)),
            name,
        })
    }

    pub fn generate_vacuum(&mut self, parent: Option<&Base>, scope: &Arc<Scope>) -> VacuumStmt {
        VacuumStmt {
            base: Base::new(parent, ProdKind::VacuumStmt, Arc::clone(scope)),
            schema_name: scope.schema.name.clone().unwrap_or_else(|| "main".to_string()),
        }
    }

    /// `INSERT INTO t VALUES (...)` with one value per column. Nothing is in
    /// scope, so values never reference columns.
    pub fn generate_insert(
        &mut self,
        parent: Option<&Base>,
        scope: &Arc<Scope>,
    ) -> Result<InsertStmt, GenError> {
        let victim = pick_relation(&mut self.rng, &scope.tables)?;
        let table = base_table(&victim)?;
        let base = Base::new(parent, ProdKind::InsertStmt, Arc::new(scope.isolated()));

        let mut values = Vec::with_capacity(table.columns().len());
        for col in table.columns() {
            values.push(retry(|| self.generate_value_expression(&base, Some(col.ty)))?);
        }

        Ok(InsertStmt {
            base,
            table: table.name().to_string(),
            values,
        })
    }

    pub fn generate_update(
        &mut self,
        parent: Option<&Base>,
        scope: &Arc<Scope>,
    ) -> Result<UpdateStmt, GenError> {
        let victim = pick_relation(&mut self.rng, &scope.tables)?;
        let table = base_table(&victim)?;
        let mut local = scope.child();
        local.refs.push(Arc::clone(&victim));
        let base = Base::new(parent, ProdKind::UpdateStmt, Arc::new(local));

        let where_clause = self.generate_bool_expression(&base)?;
        let set = self.generate_set_clause(&base, table)?;

        Ok(UpdateStmt {
            table: table.name().to_string(),
            set,
            where_clause,
            base,
        })
    }

    /// Assigns roughly half the columns, at least one.
    fn generate_set_clause(&mut self, stmt: &Base, table: &Table) -> Result<SetClause, GenError> {
        let base = stmt.child(ProdKind::SetClause);
        for _ in 0..MAX_RETRIES {
            let mut assignments = Vec::new();
            for col in table.columns() {
                if self.rng.d6() < 4 {
                    continue;
                }
                let value = retry(|| self.generate_value_expression(&base, Some(col.ty)))?;
                assignments.push((col.name.clone(), value));
            }
            if !assignments.is_empty() {
                return Ok(SetClause { base, assignments });
            }
        }
        Err(GenError::RetriesExhausted {
            attempts: MAX_RETRIES,
        })
    }

    pub fn generate_delete(
        &mut self,
        parent: Option<&Base>,
        scope: &Arc<Scope>,
    ) -> Result<DeleteStmt, GenError> {
        let victim = pick_relation(&mut self.rng, &scope.tables)?;
        let table = base_table(&victim)?.name().to_string();
        let mut local = scope.child();
        local.refs.push(victim);
        let base = Base::new(parent, ProdKind::DeleteStmt, Arc::new(local));
        let where_clause = self.generate_bool_expression(&base)?;
        Ok(DeleteStmt {
            base,
            table,
            where_clause,
        })
    }

    /// `WITH cte0 AS (...), ... SELECT ...`. The CTE names are only usable
    /// as tables inside this statement.
    pub fn generate_cte(
        &mut self,
        parent: Option<&Base>,
        scope: &Arc<Scope>,
    ) -> Result<CteStmt, GenError> {
        let base = Base::new(parent, ProdKind::CteStmt, Arc::clone(scope));
        let mut local = scope.isolated();

        let mut with_queries = Vec::new();
        loop {
            let query = self.generate_select(Some(&base), &Arc::new(local.clone()))?;
            let alias = format!("cte{}", scope.next_uid("cte"));
            local
                .tables
                .push(Arc::new(AliasedRelation::new(alias.clone(), query.derived_columns())));
            with_queries.push((alias, query));
            if self.rng.d6() <= 3 {
                break;
            }
        }

        // more base tables make the CTEs relatively less likely to be picked
        loop {
            let table = pick_relation(&mut self.rng, &scope.tables)?;
            local.tables.push(table);
            if self.rng.d6() <= 4 {
                break;
            }
        }

        let local = Arc::new(local);
        let query = self.generate_select(Some(&base), &local)?;
        Ok(CteStmt {
            base: base.with_scope(local),
            with_queries,
            query,
        })
    }

    pub fn generate_select(
        &mut self,
        parent: Option<&Base>,
        scope: &Arc<Scope>,
    ) -> Result<SelectStmt, GenError> {
        self.generate_select_shaped(parent, scope, &SelectShape::default())
    }

    /// SELECT over `scope`. References already in `scope` stay visible, so
    /// pass an isolated scope for an uncorrelated query.
    pub(crate) fn generate_select_shaped(
        &mut self,
        parent: Option<&Base>,
        scope: &Arc<Scope>,
        shape: &SelectShape,
    ) -> Result<SelectStmt, GenError> {
        let base = Base::new(parent, ProdKind::SelectStmt, Arc::clone(scope));

        let quantifier = if self.rng.d100() == 1 {
            Some(SetQuantifier::Distinct)
        } else if self.rng.d100() == 1 {
            Some(SetQuantifier::All)
        } else {
            None
        };

        let from = self.generate_from_clause(&base)?;
        let mut local = scope.child();
        for table_ref in &from.refs {
            local.refs.extend(table_ref.exposed().iter().cloned());
        }
        let base = base.with_scope(Arc::new(local));

        let select = self.generate_select_clause(&base, shape.column_types.as_deref())?;
        let where_clause = self.generate_bool_expression(&base)?;

        let (mut order_by, mut limit, mut offset) = (None, None, None);
        if shape.allow_tail {
            if self.rng.d6() > 3 {
                order_by = Some(self.generate_order_by(&base, &select.names));
            }
            if self.rng.d6() > 2 {
                limit = Some(self.rng.d100() + self.rng.d100());
                if self.rng.gen_ratio(1, 6) {
                    offset = Some(self.rng.d100());
                }
            }
        }

        Ok(SelectStmt {
            base,
            quantifier,
            select,
            from,
            where_clause,
            order_by,
            limit,
            offset,
        })
    }

    fn generate_from_clause(&mut self, stmt: &Base) -> Result<FromClause, GenError> {
        let base = stmt.child(ProdKind::FromClause);
        let table_ref = self.generate_table_ref(&base, true)?;
        Ok(FromClause {
            base,
            refs: vec![table_ref],
        })
    }

    /// At least one output column. `types` fixes the column list exactly.
    fn generate_select_clause(
        &mut self,
        stmt: &Base,
        types: Option<&[SqlType]>,
    ) -> Result<SelectClause, GenError> {
        let base = stmt.child(ProdKind::SelectClause);
        let types = match types {
            Some(types) => types.to_vec(),
            None => {
                let available = stmt.scope().available_types();
                let mut types = Vec::new();
                loop {
                    let ty = available
                        .choose(&mut self.rng)
                        .copied()
                        .ok_or(GenError::Invariant("FROM clause exposes no columns"))?;
                    types.push(ty);
                    if self.rng.d6() == 1 {
                        break;
                    }
                }
                types
            }
        };

        let mut exprs = Vec::with_capacity(types.len());
        let mut names = Vec::with_capacity(types.len());
        for ty in types {
            exprs.push(retry(|| self.generate_value_expression(&base, Some(ty)))?);
            names.push(format!("c{}", stmt.scope().next_uid("c")));
        }
        Ok(SelectClause { base, exprs, names })
    }

    fn generate_order_by(&mut self, stmt: &Base, names: &[String]) -> OrderByClause {
        let terms = names
            .iter()
            .map(|name| OrderByTerm {
                name: name.clone(),
                collation: if self.rng.d6() == 1 {
                    Collation::ALL.choose(&mut self.rng).copied()
                } else {
                    None
                },
                direction: match self.rng.d6() {
                    1 => Some(SortDirection::Asc),
                    2 => Some(SortDirection::Desc),
                    _ => None,
                },
            })
            .collect();
        OrderByClause {
            base: stmt.child(ProdKind::OrderBy),
            terms,
        }
    }

    /// Subqueries and joins get rarer as the tree deepens.
    fn generate_table_ref(&mut self, parent: &Base, allow_join: bool) -> Result<TableRef, GenError> {
        let level = parent.level() as u32;
        if level < 3 + self.rng.d6() {
            if self.rng.d6() > 3 && level < self.rng.d6() {
                return self.generate_table_subquery(parent).map(TableRef::Subquery);
            }
            if allow_join && self.rng.d6() > 3 {
                return retry(|| self.generate_joined_table(parent)).map(TableRef::Joined);
            }
        }
        self.generate_table_or_query_name(parent)
            .map(TableRef::TableOrQueryName)
    }

    fn generate_table_or_query_name(&mut self, parent: &Base) -> Result<TableOrQueryName, GenError> {
        let scope = parent.scope();
        let relation = pick_relation(&mut self.rng, &scope.tables)?;
        // derived column names must not collide with the real ones
        scope.start_stmt_uid("c", relation.columns().len() as u32);
        let alias = format!("t{}", scope.next_uid("table"));
        let aliased: Arc<dyn Relation> =
            Arc::new(AliasedRelation::new(alias.clone(), relation.columns().to_vec()));
        Ok(TableOrQueryName {
            base: parent.child(ProdKind::TableOrQueryName),
            relation,
            alias,
            refs: vec![aliased],
        })
    }

    /// A derived table. It never sees the references of its siblings.
    fn generate_table_subquery(&mut self, parent: &Base) -> Result<TableSubquery, GenError> {
        let scope = Arc::new(parent.scope().isolated());
        let base = Base::new(Some(parent), ProdKind::TableSubquery, Arc::clone(&scope));
        let query = self.generate_select(Some(&base), &scope)?;
        let alias = format!("subq{}", scope.next_uid("subq"));
        let aliased: Arc<dyn Relation> =
            Arc::new(AliasedRelation::new(alias.clone(), query.derived_columns()));
        Ok(TableSubquery {
            base,
            lateral: false,
            query: Box::new(query),
            alias,
            refs: vec![aliased],
        })
    }

    /// Left-deep: only the left side may itself be a join.
    fn generate_joined_table(&mut self, parent: &Base) -> Result<JoinedTable, GenError> {
        let base = parent.child(ProdKind::JoinedTable);
        let lhs = self.generate_table_ref(&base, true)?;
        let rhs = self.generate_table_ref(&base, false)?;

        let kind = if self.rng.d20() == 1 {
            JoinKind::Cross
        } else if self.rng.d6() < 4 {
            JoinKind::Inner
        } else if self.rng.d6() == 1 {
            JoinKind::LeftOuter
        } else {
            JoinKind::Left
        };

        let condition = match kind {
            JoinKind::Cross => None,
            _ => Some(self.generate_join_condition(&base, &lhs, &rhs)?),
        };

        let refs = lhs.exposed().iter().chain(rhs.exposed()).cloned().collect();
        Ok(JoinedTable {
            base,
            lhs: Box::new(lhs),
            kind,
            rhs: Box::new(rhs),
            condition,
            refs,
        })
    }

    fn generate_join_condition(
        &mut self,
        join: &Base,
        lhs: &TableRef,
        rhs: &TableRef,
    ) -> Result<JoinCondition, GenError> {
        if self.rng.d6() < 6 {
            // only the two joined sides resolve inside ON
            let mut local = join.scope().child();
            local.refs = lhs.exposed().iter().chain(rhs.exposed()).cloned().collect();
            let base = Base::new(
                Some(join),
                ProdKind::ExpressionJoinCondition,
                Arc::new(local),
            );
            let expr = self.generate_bool_expression(&base)?;
            return Ok(JoinCondition::Expression { base, expr });
        }
        self.generate_simple_join_condition(join, lhs, rhs)
    }

    fn generate_simple_join_condition(
        &mut self,
        join: &Base,
        lhs: &TableRef,
        rhs: &TableRef,
    ) -> Result<JoinCondition, GenError> {
        if !lhs.exposed().iter().any(|r| !r.columns().is_empty()) {
            return Err(GenError::Invariant("join side exposes no columns"));
        }
        for _ in 0..10 {
            let (Some(l), Some(r)) = (
                lhs.exposed().choose(&mut self.rng),
                rhs.exposed().choose(&mut self.rng),
            ) else {
                return Err(GenError::Invariant("join side exposes no relation"));
            };
            let Some(lcol) = l.columns().choose(&mut self.rng) else {
                continue;
            };
            if let Some(rcol) = r.columns().iter().find(|c| c.ty == lcol.ty) {
                return Ok(JoinCondition::Simple {
                    base: join.child(ProdKind::SimpleJoinCondition),
                    lhs: format!("{}.{}", l.name(), lcol.name),
                    rhs: format!("{}.{}", r.name(), rcol.name),
                });
            }
        }
        Err(GenError::dead_end("no join columns of matching type"))
    }

    /// Two operands with the same column types. Operands carry no ORDER BY
    /// or LIMIT of their own.
    pub fn generate_compound(
        &mut self,
        parent: Option<&Base>,
        scope: &Arc<Scope>,
    ) -> Result<CompoundStmt, GenError> {
        let base = Base::new(parent, ProdKind::CompoundStmt, Arc::clone(scope));
        let lhs = self.generate_select_shaped(
            Some(&base),
            scope,
            &SelectShape {
                column_types: None,
                allow_tail: false,
            },
        )?;
        let rhs = self.generate_select_shaped(
            Some(&base),
            scope,
            &SelectShape {
                column_types: Some(lhs.column_types()),
                allow_tail: false,
            },
        )?;
        let op = *CompoundOp::ALL
            .choose(&mut self.rng)
            .unwrap_or(&CompoundOp::Union);

        let order_by = if self.rng.d6() > 3 {
            Some(self.generate_order_by(&base, &lhs.select.names))
        } else {
            None
        };
        let limit = if self.rng.d6() > 2 {
            Some(self.rng.d100() + self.rng.d100())
        } else {
            None
        };

        Ok(CompoundStmt {
            base,
            lhs,
            op,
            rhs,
            order_by,
            limit,
        })
    }

    pub fn generate_view(
        &mut self,
        parent: Option<&Base>,
        scope: &Arc<Scope>,
    ) -> Result<ViewStmt, GenError> {
        let base = Base::new(parent, ProdKind::ViewStmt, Arc::clone(scope));
        let query = self.generate_select(Some(&base), &Arc::new(scope.isolated()))?;
        Ok(ViewStmt {
            base,
            is_temp: self.rng.gen_bool(0.5),
            if_not_exists: self.rng.gen_bool(0.5),
            name: format!("v{}", VIEW_COUNTER.fetch_add(1, Ordering::SeqCst)),
            columns: query.select.names.clone(),
            query,
        })
    }

    pub fn generate_savepoint(
        &mut self,
        parent: Option<&Base>,
        scope: &Arc<Scope>,
    ) -> Result<SavepointStmt, GenError> {
        self.savepoint_at_depth(parent, scope, 0)
    }

    /// `SAVEPOINT spN`, a body of d6 statements (maybe one nested savepoint
    /// among them) and an optional ROLLBACK TO or RELEASE of a savepoint
    /// that is still open at that point.
    fn savepoint_at_depth(
        &mut self,
        parent: Option<&Base>,
        scope: &Arc<Scope>,
        depth: usize,
    ) -> Result<SavepointStmt, GenError> {
        let name = format!("sp{}", scope.next_uid("sp"));
        let idx = scope.push_savepoint(name.clone());
        let base = Base::new(parent, ProdKind::SavepointStmt, Arc::clone(scope));

        let n = self.rng.d6() as usize;
        let nested_at = if depth + 1 < MAX_SAVEPOINT_DEPTH && self.rng.gen_ratio(1, 3) {
            Some(self.rng.gen_range(0..=n))
        } else {
            None
        };

        let mut stmts = Vec::with_capacity(n + 1);
        for i in 0..=n {
            if nested_at == Some(i) {
                let nested = self.savepoint_at_depth(Some(&base), scope, depth + 1)?;
                stmts.push(Statement::Savepoint(nested));
            }
            if i < n {
                stmts.push(self.statement_mix(Some(&base), &Arc::new(scope.child()), false)?);
            }
        }

        let end = self.generate_savepoint_end(scope, idx);
        Ok(SavepointStmt {
            base,
            name,
            stmts,
            end,
        })
    }

    fn generate_savepoint_end(&mut self, scope: &Scope, own: usize) -> Option<SavepointEnd> {
        let open = scope.open_savepoints();
        // TODO: track open savepoints by name; once ours is closed and new
        // ones refill its slot, this still emits an end clause
        if open.len() <= own {
            return None;
        }
        let target = self.rng.gen_range(0..open.len());
        let name = open[target].clone();
        if self.rng.d6() < 4 {
            scope.rollback_to_savepoint(target);
            Some(SavepointEnd::RollbackTo(name))
        } else {
            scope.release_savepoint(target);
            Some(SavepointEnd::Release(name))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::visit::{walk_expr, Visit};
    use crate::ast::{BinaryExpr, ColumnRef, Expr, Production};
    use crate::generator::GeneratorConfig;
    use crate::schema::{Column, Schema};

    fn two_column_schema() -> Arc<Schema> {
        Arc::new(Schema {
            tables: vec![Arc::new(Table::new(
                "t0",
                vec![Column::new("c0", SqlType::Int), Column::new("c1", SqlType::Text)],
            ))],
            aggregates: crate::schema::BUILTIN_AGGREGATES.iter().collect(),
            routines: crate::schema::BUILTIN_FUNCTIONS.iter().collect(),
            ..Schema::default()
        })
    }

    fn root(schema: &Arc<Schema>) -> Arc<Scope> {
        Arc::new(Scope::root(Arc::clone(schema)))
    }

    /// Tokenizer-level check: parentheses balance outside string literals.
    fn balanced(sql: &str) -> bool {
        let mut depth = 0i64;
        let mut in_string = false;
        for c in sql.chars() {
            match c {
                '\'' => in_string = !in_string,
                '(' if !in_string => depth += 1,
                ')' if !in_string => {
                    depth -= 1;
                    if depth < 0 {
                        return false;
                    }
                }
                _ => {}
            }
        }
        depth == 0 && !in_string
    }

    #[test]
    fn select_over_single_table_has_expected_shape() {
        let schema = two_column_schema();
        let mut gen = Generator::seeded(GeneratorConfig::default(), 21);
        for _ in 0..2_000 {
            let select = gen.generate_select(None, &root(&schema)).unwrap();
            let sql = select.out();
            assert!(sql.starts_with("SELECT "), "{sql}");
            assert!(sql.contains("\nFROM "), "{sql}");
            assert!(sql.contains("\nWHERE "), "{sql}");
            assert!(balanced(&sql), "{sql}");
        }
    }

    #[test]
    fn first_alias_follows_the_base_tables() {
        let schema = two_column_schema();
        let mut gen = Generator::seeded(GeneratorConfig::default(), 22);
        let mut plain = 0;
        for _ in 0..500 {
            let select = gen.generate_select(None, &root(&schema)).unwrap();
            if let TableRef::TableOrQueryName(t) = &select.from.refs[0] {
                assert_eq!(t.alias, "t1");
                assert!(select.out().contains("FROM t0 AS t1\nWHERE "));
                plain += 1;
            }
        }
        assert!(plain > 0);
    }

    #[test]
    fn insert_lists_one_value_per_column() {
        let schema = two_column_schema();
        let mut gen = Generator::seeded(GeneratorConfig::default(), 23);
        for _ in 0..1_000 {
            let insert = gen.generate_insert(None, &root(&schema)).unwrap();
            assert_eq!(insert.values.len(), 2);
            assert_eq!(insert.values[0].ty(), SqlType::Int);
            assert_eq!(insert.values[1].ty(), SqlType::Text);
            let sql = insert.out();
            assert!(sql.starts_with("INSERT INTO t0 VALUES ("), "{sql}");
            assert!(sql.ends_with(')'), "{sql}");
            assert!(!sql.contains("t0."), "{sql}");
        }
    }

    #[test]
    fn update_and_delete_target_the_base_table() {
        let schema = two_column_schema();
        let mut gen = Generator::seeded(GeneratorConfig::default(), 24);
        for _ in 0..500 {
            let update = gen.generate_update(None, &root(&schema)).unwrap();
            assert!(!update.set.assignments.is_empty());
            assert!(update.out().starts_with("UPDATE t0\nSET "));

            let delete = gen.generate_delete(None, &root(&schema)).unwrap();
            assert!(delete.out().starts_with("DELETE FROM t0\nWHERE "));
        }
    }

    #[test]
    fn derived_tables_cannot_be_modified() {
        let schema = two_column_schema();
        let mut scope = Scope::root(Arc::clone(&schema));
        scope.tables = vec![Arc::new(AliasedRelation::new(
            "cte0",
            vec![Column::new("c4", SqlType::Int)],
        )) as Arc<dyn Relation>];
        let mut gen = Generator::seeded(GeneratorConfig::default(), 25);
        let err = gen.generate_insert(None, &Arc::new(scope)).unwrap_err();
        assert!(matches!(err, GenError::Invariant(_)));
    }

    #[test]
    fn empty_table_list_is_an_invariant_violation() {
        let scope = Arc::new(Scope::root(Arc::new(Schema::default())));
        let mut gen = Generator::seeded(GeneratorConfig::default(), 26);
        assert!(matches!(
            gen.generate_select(None, &scope),
            Err(GenError::Invariant(_))
        ));
    }

    #[test]
    fn cte_names_stay_inside_the_statement() {
        let schema = two_column_schema();
        let mut gen = Generator::seeded(GeneratorConfig::default(), 27);
        for _ in 0..300 {
            let scope = root(&schema);
            let cte = gen.generate_cte(None, &scope).unwrap();
            assert!(!cte.with_queries.is_empty());
            assert!(cte.out().starts_with("WITH cte0 AS (\n"));
            assert_eq!(scope.tables.len(), 1);
        }
    }

    #[test]
    fn compound_operands_agree_on_column_types() {
        let schema = two_column_schema();
        let mut gen = Generator::seeded(GeneratorConfig::default(), 28);
        for _ in 0..500 {
            let compound = gen.generate_compound(None, &root(&schema)).unwrap();
            assert_eq!(compound.lhs.column_types(), compound.rhs.column_types());
            assert!(compound.lhs.order_by.is_none() && compound.lhs.limit.is_none());
            assert!(compound.rhs.order_by.is_none() && compound.rhs.limit.is_none());
            assert!(balanced(&compound.out()));
        }
    }

    #[test]
    fn view_names_never_repeat() {
        let schema = two_column_schema();
        let mut gen = Generator::seeded(GeneratorConfig::default(), 29);
        let a = gen.generate_view(None, &root(&schema)).unwrap();
        let b = gen.generate_view(None, &root(&schema)).unwrap();
        assert_ne!(a.name, b.name);
        assert_eq!(a.columns.len(), a.query.select.exprs.len());
    }

    /// Replays the savepoint commands of one statement against a stack.
    fn replay_savepoints(sql: &str) -> Result<(), String> {
        let mut stack: Vec<&str> = Vec::new();
        for cmd in sql.split([';', '\n']).map(str::trim) {
            if let Some(name) = cmd.strip_prefix("SAVEPOINT ") {
                stack.push(name);
            } else if let Some(name) = cmd.strip_prefix("ROLLBACK TO ") {
                let idx = stack
                    .iter()
                    .rposition(|s| *s == name)
                    .ok_or_else(|| format!("rollback to closed {name}"))?;
                stack.truncate(idx + 1);
            } else if let Some(name) = cmd.strip_prefix("RELEASE ") {
                let idx = stack
                    .iter()
                    .rposition(|s| *s == name)
                    .ok_or_else(|| format!("release of closed {name}"))?;
                stack.truncate(idx);
            }
        }
        Ok(())
    }

    #[test]
    fn savepoints_never_reference_closed_names() {
        let schema = two_column_schema();
        let mut gen = Generator::seeded(GeneratorConfig::default(), 30);
        let mut deep = 0;
        for _ in 0..2_000 {
            let sp = gen.generate_savepoint(None, &root(&schema)).unwrap();
            let sql = sp.out();
            if sql.matches("SAVEPOINT ").count() >= 3 {
                deep += 1;
            }
            replay_savepoints(&sql).unwrap_or_else(|e| panic!("{e}:\n{sql}"));
        }
        assert!(deep > 0, "no savepoint nested three levels deep");
    }

    #[test]
    fn savepoint_end_is_suppressed_once_closed() {
        let schema = two_column_schema();
        let scope = root(&schema);
        let mut gen = Generator::seeded(GeneratorConfig::default(), 31);
        let own = scope.push_savepoint("sp0".into());
        scope.push_savepoint("sp1".into());
        scope.release_savepoint(own);
        assert_eq!(gen.generate_savepoint_end(&scope, own), None);
    }

    #[test]
    fn explain_wraps_a_statement() {
        let schema = two_column_schema();
        let mut gen = Generator::seeded(GeneratorConfig::default(), 32);
        for _ in 0..100 {
            let explain = gen.generate_explain(None, &root(&schema)).unwrap();
            assert!(explain.out().starts_with("EXPLAIN "));
            assert!(!matches!(*explain.stmt, Statement::Savepoint(_)));
        }
    }

    #[test]
    fn analyse_and_vacuum_name_existing_objects() {
        let schema = two_column_schema();
        let mut gen = Generator::seeded(GeneratorConfig::default(), 33);
        assert_eq!(gen.generate_analyse(None, &root(&schema)).unwrap().out(), "ANALYZE t0");
        assert_eq!(gen.generate_vacuum(None, &root(&schema)).out(), "VACUUM main");
    }

    /// Checks every column reference against the references visible where
    /// it was generated, and every comparison for matching operand types.
    struct ScopeChecker {
        violations: Vec<String>,
    }

    impl Visit for ScopeChecker {
        fn visit_expr(&mut self, expr: &Expr) {
            match expr {
                Expr::Binary(BinaryExpr { lhs, op, rhs, .. })
                    if !op.is_logical() && lhs.ty() != rhs.ty() =>
                {
                    self.violations.push(format!("mismatched comparison {}", expr.out()));
                }
                Expr::Column(col) => self.check(col),
                _ => {}
            }
            walk_expr(self, expr);
        }
    }

    impl ScopeChecker {
        fn check(&mut self, col: &ColumnRef) {
            let (rel, _) = col.reference.split_once('.').unwrap_or(("", ""));
            if !col.base.scope().refs.iter().any(|r| r.name() == rel) {
                self.violations.push(format!("{} not in scope", col.reference));
            }
        }
    }

    #[test]
    fn references_resolve_and_comparisons_match() {
        let schema = two_column_schema();
        let mut gen = Generator::seeded(GeneratorConfig::default(), 34);
        let mut checker = ScopeChecker { violations: vec![] };
        for _ in 0..2_000 {
            let stmt = gen.generate_statement(&root(&schema)).unwrap();
            checker.visit_statement(&stmt);
        }
        assert!(checker.violations.is_empty(), "{:?}", checker.violations);
    }

    #[test]
    fn aliases_are_unique_within_a_statement() {
        let schema = two_column_schema();
        let mut gen = Generator::seeded(GeneratorConfig::default(), 35);
        for _ in 0..2_000 {
            let sql = gen.generate_statement(&root(&schema)).unwrap().out();
            let mut aliases: Vec<&str> = sql
                .split(|c: char| !c.is_ascii_alphanumeric())
                .zip(sql.split(|c: char| !c.is_ascii_alphanumeric()).skip(1))
                .filter(|(kw, _)| *kw == "AS")
                .map(|(_, alias)| alias)
                .filter(|a| a.starts_with('t') || a.starts_with("subq") || a.starts_with("cte"))
                .collect();
            let total = aliases.len();
            aliases.sort_unstable();
            aliases.dedup();
            assert_eq!(aliases.len(), total, "{sql}");
        }
    }
}
