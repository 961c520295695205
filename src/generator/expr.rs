use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;

use super::datetime;
use super::random::Dice;
use super::{retry, Generator};
use crate::ast::{
    is_window_function_allowed, Base, BinaryExpr, BinaryOp, CaseExpr, CastExpr, CoalesceExpr,
    ColumnRef, ConstExpr, ExistsExpr, Expr, FunCallExpr, IfNullIfExpr, NullPredicateExpr,
    ProdKind, TruthExpr, WindowFunExpr,
};
use crate::error::GenError;
use crate::schema::{Routine, SqlType, TimeValueShape};
use crate::scope::Scope;

impl Generator {
    /// A type some visible column has, or any declared type when nothing is
    /// visible.
    fn pick_type(&mut self, scope: &Scope) -> SqlType {
        let available = scope.available_types();
        match available.choose(&mut self.rng) {
            Some(ty) => *ty,
            None => *self.types.choose(&mut self.rng).unwrap_or(&SqlType::Int),
        }
    }

    /// An expression of type `ty` (any type when `None`). Compound forms get
    /// rarer with depth; the leaves are column references and constants.
    pub(crate) fn generate_value_expression(
        &mut self,
        parent: &Base,
        ty: Option<SqlType>,
    ) -> Result<Expr, GenError> {
        let level = parent.level() as u32;

        if self.rng.d20() == 1
            && level < self.rng.d6()
            && is_window_function_allowed(parent.path())
        {
            return self.generate_window_function(parent, ty).map(Expr::Window);
        }
        if level < self.rng.d6() && self.rng.d6() == 1 {
            return self.generate_function_call(parent, ty).map(Expr::FunCall);
        }
        if self.rng.d20() == 1 && level < self.rng.d6() {
            let ty = self.concrete_or_pick(parent, ty);
            return self.generate_case(parent, ty).map(Expr::Case);
        }
        if self.rng.d20() == 1 && level < self.rng.d6() && ty != Some(SqlType::Null) {
            let ty = self.concrete_or_pick(parent, ty);
            if ty != SqlType::Null {
                return self.generate_cast(parent, ty).map(Expr::Cast);
            }
        }
        if self.rng.d20() == 1 && level < self.rng.d6() {
            let ty = self.concrete_or_pick(parent, ty);
            return self.generate_coalesce(parent, ty).map(Expr::Coalesce);
        }
        if self.rng.d20() == 1 && level < self.rng.d6() {
            let ty = self.concrete_or_pick(parent, ty);
            return self.generate_if_null_if(parent, ty).map(Expr::IfNullIf);
        }

        let scope = parent.scope();
        let has_columns = match ty {
            Some(ty) => !scope.refs_of_type(ty).is_empty(),
            None => scope.refs.iter().any(|r| !r.columns().is_empty()),
        };
        if has_columns && self.rng.d20() > 1 {
            return self.generate_column_reference(parent, ty).map(Expr::Column);
        }
        Ok(Expr::Const(self.generate_constant(parent, ty)))
    }

    fn concrete_or_pick(&mut self, parent: &Base, ty: Option<SqlType>) -> SqlType {
        match ty {
            Some(ty) => ty,
            None => self.pick_type(parent.scope()),
        }
    }

    /// A qualified reference to a visible column. Fails with a dead end when
    /// no column has the requested type.
    pub(crate) fn generate_column_reference(
        &mut self,
        parent: &Base,
        ty: Option<SqlType>,
    ) -> Result<ColumnRef, GenError> {
        let scope = parent.scope();
        let (reference, ty) = match ty {
            Some(ty) => {
                let candidates = scope.refs_of_type(ty);
                let picked = candidates
                    .choose(&mut self.rng)
                    .ok_or_else(|| GenError::dead_end(format!("no visible column of type {ty}")))?;
                (picked.qualified(), ty)
            }
            None => {
                let relation = scope
                    .refs
                    .choose(&mut self.rng)
                    .ok_or_else(|| GenError::dead_end("no visible relation"))?;
                let column = relation
                    .columns()
                    .choose(&mut self.rng)
                    .ok_or_else(|| GenError::dead_end("relation without columns"))?;
                (format!("{}.{}", relation.name(), column.name), column.ty)
            }
        };
        Ok(ColumnRef {
            base: parent.child(ProdKind::ColumnRef),
            reference,
            ty,
        })
    }

    pub(crate) fn generate_constant(&mut self, parent: &Base, ty: Option<SqlType>) -> ConstExpr {
        let ty = match ty {
            Some(ty) => ty,
            None => *SqlType::CONCRETE
                .choose(&mut self.rng)
                .unwrap_or(&SqlType::Null),
        };
        ConstExpr {
            base: parent.child(ProdKind::Const),
            value: self.constant_literal(ty),
            ty,
        }
    }

    /// Literal text of a constant of type `ty`. Clock keywords only appear
    /// when the generator is not restricted to deterministic output.
    pub(crate) fn constant_literal(&mut self, ty: SqlType) -> String {
        let clock = !self.config.is_deterministic && self.rng.d6() == 6;
        let rng = &mut self.rng;
        match ty {
            SqlType::Int => rng.d100().to_string(),
            SqlType::Real => real_literal(rng),
            SqlType::Numeric => {
                if rng.d6() > 3 {
                    rng.d100().to_string()
                } else {
                    real_literal(rng)
                }
            }
            SqlType::Text => format!("'text{}'", rng.d100()),
            SqlType::Blob => format!("X'{}'", hex::encode(rng.gen::<[u8; 4]>())),
            SqlType::Bool => (if rng.d6() > 3 { "TRUE" } else { "FALSE" }).to_string(),
            SqlType::Date if clock => "CURRENT_DATE".to_string(),
            SqlType::Date => format!("'{}'", calendar_date(rng)),
            SqlType::Time if clock => "CURRENT_TIME".to_string(),
            SqlType::Time => format!("'{}'", clock_time(rng)),
            SqlType::DateTime if clock => "CURRENT_TIMESTAMP".to_string(),
            SqlType::DateTime => format!("'{} {}'", calendar_date(rng), clock_time(rng)),
            _ => "NULL".to_string(),
        }
    }

    /// Scalar call of a routine returning `ty`. Arguments are constants.
    pub(crate) fn generate_function_call(
        &mut self,
        parent: &Base,
        ty: Option<SqlType>,
    ) -> Result<FunCallExpr, GenError> {
        let candidates: Vec<&'static Routine> = parent
            .scope()
            .schema
            .routines
            .iter()
            .copied()
            .filter(|r| ty.map_or(true, |ty| r.ret == ty))
            .collect();
        let routine = *candidates
            .choose(&mut self.rng)
            .ok_or_else(|| GenError::dead_end("no routine returns the requested type"))?;

        let base = parent.child(ProdKind::FunCall);
        let params = self.generate_function_arguments(&base, routine.arg_types)?;
        Ok(FunCallExpr {
            base,
            name: routine.name,
            params,
            is_aggregate: false,
            ty: routine.ret,
        })
    }

    /// Expands the pseudo types of a signature: `MULTI` repeats the type
    /// after it zero to eight times, and every `TIMEMODIFIER` is drawn for
    /// the most recent `TIMEVALUE`.
    fn generate_function_arguments(
        &mut self,
        call: &Base,
        arg_types: &[SqlType],
    ) -> Result<Vec<Expr>, GenError> {
        let mut args = Vec::with_capacity(arg_types.len());
        let mut time_value = None;
        for (i, &ty) in arg_types.iter().enumerate() {
            if ty == SqlType::Multi {
                if let Some(&repeated) = arg_types.get(i + 1) {
                    for _ in 0..self.rng.gen_range(0..=8) {
                        args.push(self.generate_argument(call, repeated, &mut time_value)?);
                    }
                }
                continue;
            }
            args.push(self.generate_argument(call, ty, &mut time_value)?);
        }
        Ok(args)
    }

    fn generate_argument(
        &mut self,
        call: &Base,
        ty: SqlType,
        time_value: &mut Option<TimeValueShape>,
    ) -> Result<Expr, GenError> {
        let (value, ty) = match ty {
            SqlType::TimeValue => {
                let (value, shape) = datetime::time_value(&mut self.rng);
                *time_value = Some(shape);
                (value, SqlType::Text)
            }
            SqlType::TimeModifier => {
                let shape = time_value.ok_or(GenError::Invariant(
                    "time modifier without a preceding time value",
                ))?;
                (datetime::modifier(&mut self.rng, shape), SqlType::Text)
            }
            SqlType::Rune => (self.rune_literal(), SqlType::Text),
            SqlType::Real01 => (format!("{:.6}", self.rng.gen::<f64>()), SqlType::Real),
            SqlType::Any => {
                let ty = *SqlType::CONCRETE
                    .choose(&mut self.rng)
                    .unwrap_or(&SqlType::Int);
                (self.constant_literal(ty), ty)
            }
            ty => (self.constant_literal(ty), ty),
        };
        Ok(Expr::Const(ConstExpr {
            base: call.child(ProdKind::Const),
            value,
            ty,
        }))
    }

    /// A one-character string literal of any printable code point.
    fn rune_literal(&mut self) -> String {
        loop {
            // surrogates are not chars, draw again
            if let Some(c) = char::from_u32(self.rng.gen_range(0x20..=0x10FFFF)) {
                return match c {
                    '\'' => "''''".to_string(),
                    c => format!("'{c}'"),
                };
            }
        }
    }

    /// Aggregate call used inside a window. Arguments are value expressions
    /// of the routine's argument types; `count` may render as `count(*)`.
    fn generate_aggregate_call(
        &mut self,
        window: &Base,
        ty: Option<SqlType>,
    ) -> Result<FunCallExpr, GenError> {
        let candidates: Vec<&'static Routine> = window
            .scope()
            .schema
            .aggregates
            .iter()
            .copied()
            .filter(|r| ty.map_or(true, |ty| r.ret == ty))
            .collect();
        let routine = *candidates
            .choose(&mut self.rng)
            .ok_or_else(|| GenError::dead_end("no aggregate returns the requested type"))?;

        let base = window.child(ProdKind::FunCall);
        let mut params = Vec::with_capacity(routine.arg_types.len());
        for &arg in routine.arg_types {
            params.push(retry(|| self.generate_value_expression(&base, Some(arg)))?);
        }
        Ok(FunCallExpr {
            base,
            name: routine.name,
            params,
            is_aggregate: true,
            ty: routine.ret,
        })
    }

    /// `agg(...) OVER (PARTITION BY ... ORDER BY ...)`. Both lists hold
    /// columns of the aggregate's return type.
    pub(crate) fn generate_window_function(
        &mut self,
        parent: &Base,
        ty: Option<SqlType>,
    ) -> Result<WindowFunExpr, GenError> {
        let base = parent.child(ProdKind::WindowFun);
        let aggregate = self.generate_aggregate_call(&base, ty)?;
        let key = Some(aggregate.ty);

        let mut partition_by = vec![self.generate_column_reference(&base, key)?];
        while self.rng.d6() > 4 {
            partition_by.push(self.generate_column_reference(&base, key)?);
        }
        let mut order_by = vec![self.generate_column_reference(&base, key)?];
        while self.rng.d6() > 4 {
            order_by.push(self.generate_column_reference(&base, key)?);
        }

        Ok(WindowFunExpr {
            base,
            aggregate,
            partition_by,
            order_by,
        })
    }

    /// Either `CASE value WHEN v THEN r ...` or `CASE WHEN cond THEN r ...`.
    fn generate_case(&mut self, parent: &Base, ty: SqlType) -> Result<CaseExpr, GenError> {
        let base = parent.child(ProdKind::Case);

        let value = if self.rng.d6() < 3 {
            let value_ty = self.pick_type(base.scope());
            let value = retry(|| self.generate_value_expression(&base, Some(value_ty)))?;
            Some(value)
        } else {
            None
        };

        let mut whens = Vec::new();
        for _ in 0..self.rng.gen_range(1..=3) {
            let when = match &value {
                Some(value) => {
                    retry(|| self.generate_value_expression(&base, Some(value.ty())))?
                }
                None => self.generate_bool_expression(&base)?,
            };
            let then = retry(|| self.generate_value_expression(&base, Some(ty)))?;
            whens.push((when, then));
        }

        let otherwise = if self.rng.d6() > 2 {
            Some(Box::new(retry(|| {
                self.generate_value_expression(&base, Some(ty))
            })?))
        } else {
            None
        };

        Ok(CaseExpr {
            base,
            value: value.map(Box::new),
            whens,
            otherwise,
            ty,
        })
    }

    fn generate_cast(&mut self, parent: &Base, ty: SqlType) -> Result<CastExpr, GenError> {
        let base = parent.child(ProdKind::Cast);
        let from = self.pick_type(base.scope());
        let expr = retry(|| self.generate_value_expression(&base, Some(from)))?;
        Ok(CastExpr {
            base,
            expr: Box::new(expr),
            ty,
        })
    }

    fn generate_coalesce(&mut self, parent: &Base, ty: SqlType) -> Result<CoalesceExpr, GenError> {
        let base = parent.child(ProdKind::Coalesce);
        let mut exprs = Vec::new();
        for _ in 0..self.rng.gen_range(2..=4) {
            exprs.push(retry(|| self.generate_value_expression(&base, Some(ty)))?);
        }
        Ok(CoalesceExpr { base, exprs, ty })
    }

    fn generate_if_null_if(&mut self, parent: &Base, ty: SqlType) -> Result<IfNullIfExpr, GenError> {
        let base = parent.child(ProdKind::IfNullIf);
        let is_null_if = self.rng.gen_bool(0.5);
        let lhs = retry(|| self.generate_value_expression(&base, Some(ty)))?;
        let rhs = retry(|| self.generate_value_expression(&base, Some(ty)))?;
        Ok(IfNullIfExpr {
            base,
            is_null_if,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            ty,
        })
    }

    /// A predicate. Deep in the tree it collapses to a truth literal.
    pub(crate) fn generate_bool_expression(&mut self, parent: &Base) -> Result<Expr, GenError> {
        if parent.level() as u32 > self.rng.d100() {
            return Ok(Expr::Truth(self.generate_truth(parent)));
        }
        if self.rng.d6() < 4 {
            return self.generate_comparison(parent).map(Expr::Binary);
        }
        if self.rng.d6() < 4 {
            return self.generate_logical(parent).map(Expr::Binary);
        }
        if self.rng.d6() < 4 {
            return self.generate_null_predicate(parent).map(Expr::NullPredicate);
        }
        if self.rng.d6() < 4 {
            return Ok(Expr::Truth(self.generate_truth(parent)));
        }
        self.generate_exists(parent).map(Expr::Exists)
    }

    fn generate_truth(&mut self, parent: &Base) -> TruthExpr {
        TruthExpr {
            base: parent.child(ProdKind::Truth),
            value: self.rng.gen_bool(0.5),
        }
    }

    /// Both operands share one type; ordering operators only for ordered
    /// types.
    fn generate_comparison(&mut self, parent: &Base) -> Result<BinaryExpr, GenError> {
        let base = parent.child(ProdKind::Binary);
        let ty = self.pick_type(base.scope());
        let lhs = retry(|| self.generate_value_expression(&base, Some(ty)))?;
        let ops: &[BinaryOp] = if ty.is_ordered() {
            &BinaryOp::COMPARISONS
        } else {
            &BinaryOp::EQUALITY
        };
        let op = *ops.choose(&mut self.rng).unwrap_or(&BinaryOp::Eq);
        let rhs = retry(|| self.generate_value_expression(&base, Some(ty)))?;
        Ok(BinaryExpr {
            base,
            lhs: Box::new(lhs),
            op,
            rhs: Box::new(rhs),
        })
    }

    fn generate_logical(&mut self, parent: &Base) -> Result<BinaryExpr, GenError> {
        let base = parent.child(ProdKind::Binary);
        let lhs = self.generate_bool_expression(&base)?;
        let op = *BinaryOp::LOGICAL
            .choose(&mut self.rng)
            .unwrap_or(&BinaryOp::And);
        let rhs = self.generate_bool_expression(&base)?;
        Ok(BinaryExpr {
            base,
            lhs: Box::new(lhs),
            op,
            rhs: Box::new(rhs),
        })
    }

    fn generate_null_predicate(&mut self, parent: &Base) -> Result<NullPredicateExpr, GenError> {
        let base = parent.child(ProdKind::NullPredicate);
        let negated = self.rng.d6() < 4;
        let expr = retry(|| self.generate_value_expression(&base, None))?;
        Ok(NullPredicateExpr {
            base,
            negated,
            expr: Box::new(expr),
        })
    }

    /// Correlated: the subquery keeps every reference visible here.
    fn generate_exists(&mut self, parent: &Base) -> Result<ExistsExpr, GenError> {
        let scope = Arc::new(parent.scope().child());
        let base = Base::new(Some(parent), ProdKind::Exists, Arc::clone(&scope));
        let subquery = self.generate_select(Some(&base), &scope)?;
        Ok(ExistsExpr {
            base,
            subquery: Box::new(subquery),
        })
    }
}

fn real_literal<R: Rng + ?Sized>(rng: &mut R) -> String {
    let x = rng.gen_range(0..100) as f64;
    let y = rng.gen_range(1..=10) as f64;
    format!("{:.6}", x / y)
}

fn calendar_date<R: Rng + ?Sized>(rng: &mut R) -> String {
    let month = rng.gen_range(1..=12);
    format!(
        "{:04}-{:02}-{:02}",
        rng.gen_range(2000..=2022),
        month,
        datetime::day_of(rng, month)
    )
}

fn clock_time<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        rng.gen_range(0..24),
        rng.gen_range(0..60),
        rng.gen_range(0..60)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::visit::{walk_expr, Visit};
    use crate::ast::{Production, SelectStmt};
    use crate::generator::GeneratorConfig;
    use crate::schema::{AliasedRelation, Column, Relation, Schema, Table, BUILTIN_AGGREGATES};

    /// Counts window functions outside of nested subqueries.
    struct Windows(usize);

    impl Visit for Windows {
        fn visit_select(&mut self, _: &SelectStmt) {}

        fn visit_expr(&mut self, expr: &Expr) {
            if matches!(expr, Expr::Window(_)) {
                self.0 += 1;
            }
            walk_expr(self, expr);
        }
    }

    fn scope_with(columns: Vec<Column>) -> Arc<Scope> {
        let schema = Arc::new(Schema {
            tables: vec![Arc::new(Table::new("t0", columns.clone()))],
            aggregates: BUILTIN_AGGREGATES.iter().collect(),
            ..Schema::default()
        });
        let mut scope = Scope::root(schema);
        scope
            .refs
            .push(Arc::new(AliasedRelation::new("t1", columns)) as Arc<dyn Relation>);
        Arc::new(scope)
    }

    fn select_clause(scope: &Arc<Scope>) -> Base {
        Base::new(None, ProdKind::SelectStmt, Arc::clone(scope)).child(ProdKind::SelectClause)
    }

    #[test]
    fn constants_match_their_type() {
        let mut gen = Generator::seeded(GeneratorConfig::default(), 41);
        for _ in 0..500 {
            assert!(gen.constant_literal(SqlType::Int).parse::<u32>().is_ok());
            let blob = gen.constant_literal(SqlType::Blob);
            assert!(blob.starts_with("X'") && blob.len() == 11, "{blob}");
            assert!(gen.constant_literal(SqlType::Text).starts_with("'text"));
            assert_eq!(gen.constant_literal(SqlType::Null), "NULL");
            let real = gen.constant_literal(SqlType::Real);
            assert!(real.parse::<f64>().is_ok(), "{real}");
        }
    }

    #[test]
    fn deterministic_constants_avoid_the_clock() {
        let mut gen = Generator::seeded(GeneratorConfig { is_deterministic: true }, 42);
        for _ in 0..500 {
            for ty in [SqlType::Date, SqlType::Time, SqlType::DateTime] {
                let literal = gen.constant_literal(ty);
                assert!(!literal.starts_with("CURRENT_"), "{literal}");
            }
        }
    }

    #[test]
    fn typed_expressions_keep_their_type() {
        let scope = scope_with(vec![
            Column::new("c0", SqlType::Int),
            Column::new("c1", SqlType::Text),
        ]);
        let clause = select_clause(&scope);
        let mut gen = Generator::seeded(GeneratorConfig::default(), 43);
        for _ in 0..2_000 {
            for ty in [SqlType::Int, SqlType::Text, SqlType::Blob] {
                let expr = retry(|| gen.generate_value_expression(&clause, Some(ty))).unwrap();
                assert_eq!(expr.ty(), ty, "{}", expr.out());
            }
        }
    }

    #[test]
    fn column_reference_of_missing_type_is_a_dead_end() {
        let scope = scope_with(vec![Column::new("c0", SqlType::Int)]);
        let clause = select_clause(&scope);
        let mut gen = Generator::seeded(GeneratorConfig::default(), 44);
        let err = gen
            .generate_column_reference(&clause, Some(SqlType::Blob))
            .unwrap_err();
        assert!(err.is_retryable());
        let col = gen
            .generate_column_reference(&clause, Some(SqlType::Int))
            .unwrap();
        assert_eq!(col.reference, "t1.c0");
    }

    #[test]
    fn windows_only_appear_in_select_lists() {
        let scope = scope_with(vec![Column::new("c0", SqlType::Int)]);
        let select = Base::new(None, ProdKind::SelectStmt, Arc::clone(&scope));
        let mut gen = Generator::seeded(GeneratorConfig::default(), 45);
        let (mut in_where, mut in_list) = (Windows(0), Windows(0));
        for _ in 0..3_000 {
            let where_clause = gen.generate_bool_expression(&select).unwrap();
            in_where.visit_expr(&where_clause);

            let item = retry(|| {
                gen.generate_value_expression(&select.child(ProdKind::SelectClause), None)
            })
            .unwrap();
            in_list.visit_expr(&item);
        }
        assert_eq!(in_where.0, 0);
        assert!(in_list.0 > 0);
    }

    #[test]
    fn window_partitions_by_aggregate_type() {
        let scope = scope_with(vec![
            Column::new("c0", SqlType::Int),
            Column::new("c1", SqlType::Text),
        ]);
        let clause = select_clause(&scope);
        let mut gen = Generator::seeded(GeneratorConfig::default(), 46);
        for _ in 0..200 {
            let window = retry(|| gen.generate_window_function(&clause, Some(SqlType::Int))).unwrap();
            assert_eq!(window.aggregate.ty, SqlType::Int);
            assert!(window
                .partition_by
                .iter()
                .chain(&window.order_by)
                .all(|c| c.reference == "t1.c0"));
        }
    }

    #[test]
    fn function_arguments_expand_pseudo_types() {
        let scope = scope_with(vec![]);
        let clause = select_clause(&scope);
        let mut gen = Generator::seeded(GeneratorConfig::default(), 47);
        for _ in 0..500 {
            let args = gen
                .generate_function_arguments(
                    &clause,
                    &[SqlType::TimeValue, SqlType::Multi, SqlType::TimeModifier],
                )
                .unwrap();
            assert!((2..=10).contains(&args.len()));
            assert!(args.iter().all(|a| a.ty() == SqlType::Text));
        }
        let err = gen
            .generate_function_arguments(&clause, &[SqlType::TimeModifier])
            .unwrap_err();
        assert!(matches!(err, GenError::Invariant(_)));
    }

    #[test]
    fn runes_are_single_quoted_characters() {
        let mut gen = Generator::seeded(GeneratorConfig::default(), 48);
        for _ in 0..2_000 {
            let rune = gen.rune_literal();
            let inner = &rune[1..rune.len() - 1];
            assert!(inner == "''" || inner.chars().count() == 1, "{rune}");
        }
    }
}
