//! Random, scope-aware SQL statement generation.
//!
//! A [`Generator`] owns its random source, so a seeded generator replays
//! the same statements. Generation works top-down: every node creates its
//! own [`Base`](crate::ast::Base) first and generates its children below it.

mod datetime;
mod expr;
mod grammar;
pub mod random;

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::error;

use crate::ast::Statement;
use crate::batch::{Batch, BatchKind};
use crate::error::GenError;
use crate::schema::{
    remove_non_deterministic, Column, Routine, Schema, SqlType, Table, BUILTIN_AGGREGATES,
    BUILTIN_FUNCTIONS,
};
use crate::scope::Scope;

/// Attempts made by [`retry`] before giving up.
pub const MAX_RETRIES: usize = 100;

/// Statements at the head of a structured batch that only write rows.
pub const IUD_PREFIX: usize = 5;

/// Re-runs `f` while it fails with a dead end. Any other error is returned
/// at once.
pub fn retry<T, F>(mut f: F) -> Result<T, GenError>
where
    F: FnMut() -> Result<T, GenError>,
{
    for _ in 0..MAX_RETRIES {
        match f() {
            Err(e) if e.is_retryable() => continue,
            other => return other,
        }
    }
    Err(GenError::RetriesExhausted {
        attempts: MAX_RETRIES,
    })
}

#[derive(Debug, Clone, Default)]
pub struct GeneratorConfig {
    /// Restrict generation to types and routines whose output does not
    /// depend on time, randomness or the engine build.
    pub is_deterministic: bool,
}

pub struct Generator {
    rng: StdRng,
    config: GeneratorConfig,
    /// Column types tables are declared with.
    types: Vec<SqlType>,
}

impl Generator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub fn seeded(config: GeneratorConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: GeneratorConfig, rng: StdRng) -> Self {
        let types = if config.is_deterministic {
            vec![SqlType::Int, SqlType::Text, SqlType::Bool, SqlType::Null]
        } else {
            vec![
                SqlType::Numeric,
                SqlType::Int,
                SqlType::Text,
                SqlType::Blob,
                SqlType::Bool,
                SqlType::Null,
            ]
        };
        Self { rng, config, types }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn types(&self) -> &[SqlType] {
        &self.types
    }

    /// Schema of `n` tables `t0..`, each with 1 to 10 columns `c0..`, plus
    /// the routines allowed by the configuration.
    pub fn generate_tables(&mut self, n: usize) -> Schema {
        let tables = (0..n)
            .map(|i| Arc::new(self.generate_table(format!("t{i}"))))
            .collect();

        let all: Vec<&'static Routine> = BUILTIN_FUNCTIONS.iter().collect();
        let routines = if self.config.is_deterministic {
            remove_non_deterministic(&all)
        } else {
            all
        };

        Schema {
            name: None,
            tables,
            routines,
            aggregates: BUILTIN_AGGREGATES.iter().collect(),
        }
    }

    fn generate_table(&mut self, name: String) -> Table {
        let ncols = self.rng.gen_range(1..=10);
        let mut columns = Vec::with_capacity(ncols);
        let mut defaults = Vec::with_capacity(ncols);
        for i in 0..ncols {
            let ty = *self.types.choose(&mut self.rng).unwrap_or(&SqlType::Int);
            columns.push(Column::new(format!("c{i}"), ty));
            defaults.push(if self.rng.gen_ratio(1, 6) {
                Some(self.constant_literal(ty))
            } else {
                None
            });
        }

        let mut table = Table::new(name, columns).with_defaults(defaults);
        table.is_temp = self.rng.gen_bool(0.5);
        table.if_not_exists = self.rng.gen_bool(0.5);
        table
    }

    /// `n` statements from the general mix over a fresh one-table schema.
    pub fn next_batch_random(&mut self, n: usize) -> Result<Batch, GenError> {
        let schema = Arc::new(self.generate_tables(1));
        let stmts = (0..n)
            .map(|_| self.generate_statement(&root_scope(&schema)))
            .collect::<Result<Vec<_>, _>>()
            .inspect_err(log_defect)?;
        Ok(Batch::new(&schema, stmts, BatchKind::Random))
    }

    /// `n` INSERT, UPDATE or DELETE statements over a fresh schema.
    pub fn next_batch_iud(&mut self, n: usize) -> Result<Batch, GenError> {
        let schema = Arc::new(self.generate_tables(1));
        let stmts = (0..n)
            .map(|_| self.generate_iud(&root_scope(&schema)))
            .collect::<Result<Vec<_>, _>>()
            .inspect_err(log_defect)?;
        Ok(Batch::new(&schema, stmts, BatchKind::Structured))
    }

    /// Writes rows first: `IUD_PREFIX` data-modifying statements, then the
    /// general mix.
    pub fn next_batch_structured(&mut self, n: usize) -> Result<Batch, GenError> {
        if n <= IUD_PREFIX {
            return Err(GenError::Invariant("structured batch not larger than its IUD prefix"));
        }
        let schema = Arc::new(self.generate_tables(1));
        let mut stmts = Vec::with_capacity(n);
        for i in 0..n {
            let scope = root_scope(&schema);
            let stmt = if i < IUD_PREFIX {
                self.generate_iud(&scope)
            } else {
                self.generate_statement(&scope)
            };
            stmts.push(stmt.inspect_err(log_defect)?);
        }
        Ok(Batch::new(&schema, stmts, BatchKind::Structured))
    }

    fn generate_iud(&mut self, scope: &Arc<Scope>) -> Result<Statement, GenError> {
        Ok(match self.rng.gen_range(0..3) {
            0 => Statement::Insert(self.generate_insert(None, scope)?),
            1 => Statement::Update(self.generate_update(None, scope)?),
            _ => Statement::Delete(self.generate_delete(None, scope)?),
        })
    }
}

fn root_scope(schema: &Arc<Schema>) -> Arc<Scope> {
    Arc::new(Scope::root(Arc::clone(schema)))
}

fn log_defect(e: &GenError) {
    error!(error = %e, "statement generation failed");
}
