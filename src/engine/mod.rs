//! Differential execution: the same SQL against an old and a new engine.
//!
//! A [`DiffEngine`] owns one pair of [`QueryEngine`] sessions, runs both
//! sides of a batch concurrently and compares what came back. Sessions are
//! never shared between workers.

mod embedded;
mod process;

pub use embedded::EmbeddedEngine;
pub use process::EngineProcess;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::batch::Batch;
use crate::coverage::CoverageSource;
use crate::error::EngineError;
use crate::pool::BufferPool;

/// How a side failed a query.
#[derive(Debug)]
pub enum SideError {
    /// The engine rejected the SQL. Compared, never retried.
    Sql(String),
    /// The session itself broke.
    Transport(EngineError),
}

/// One engine session that executes SQL text and returns its list-mode
/// output.
pub trait QueryEngine: Send {
    fn id(&self) -> &str;

    /// Runs `sql` to completion. Statements after the first failing one are
    /// not executed.
    fn query(&mut self, sql: &str) -> Result<String, SideError>;

    /// Ends the session. Safe to call more than once and after the engine
    /// has died.
    fn close(&mut self);
}

/// Which engine a side runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineSpec {
    /// An interactive shell binary.
    Process { binary: PathBuf },
    /// The SQLite library linked into this binary.
    Embedded,
}

impl EngineSpec {
    pub fn spawn(
        &self,
        id: impl Into<String>,
        config: &EngineConfig,
    ) -> Result<Box<dyn QueryEngine>, EngineError> {
        Ok(match self {
            EngineSpec::Process { binary } => Box::new(EngineProcess::spawn(
                id,
                binary,
                config.setup_timeout,
                config.query_timeout,
            )?),
            EngineSpec::Embedded => Box::new(EmbeddedEngine::open(id)?),
        })
    }
}

impl FromStr for EngineSpec {
    type Err = std::convert::Infallible;

    /// `bundled` selects the embedded engine, anything else names a binary.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "bundled" => EngineSpec::Embedded,
            path => EngineSpec::Process {
                binary: PathBuf::from(path),
            },
        })
    }
}

impl fmt::Display for EngineSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineSpec::Process { binary } => write!(f, "{}", binary.display()),
            EngineSpec::Embedded => f.write_str("bundled"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub old: EngineSpec,
    pub new: EngineSpec,
    pub setup_timeout: Duration,
    pub query_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            old: EngineSpec::Process {
                binary: PathBuf::from("./sqlite3-3.26.0"),
            },
            new: EngineSpec::Process {
                binary: PathBuf::from("sqlite3"),
            },
            setup_timeout: Duration::from_secs(5),
            query_timeout: Duration::from_secs(15),
        }
    }
}

/// Which side of the comparison a session serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Old,
    New,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Old => "old",
            Side::New => "new",
        }
    }
}

/// Starts sessions for a [`DiffEngine`], initially and after every failure.
pub trait EngineFactory: Send + Sync {
    fn spawn(&self, id: &str, side: Side) -> Result<Box<dyn QueryEngine>, EngineError>;

    /// Coverage map of the batches a worker runs, for instrumented engines.
    fn coverage(&self, _id: &str) -> Option<Box<dyn CoverageSource>> {
        None
    }
}

impl EngineFactory for EngineConfig {
    fn spawn(&self, id: &str, side: Side) -> Result<Box<dyn QueryEngine>, EngineError> {
        match side {
            Side::Old => self.old.spawn(id, self),
            Side::New => self.new.spawn(id, self),
        }
    }
}

impl EngineConfig {
    /// Both sides on the embedded engine.
    pub fn embedded() -> Self {
        Self {
            old: EngineSpec::Embedded,
            new: EngineSpec::Embedded,
            ..Self::default()
        }
    }

    /// The same configuration with old and new exchanged.
    pub fn swapped(&self) -> Self {
        Self {
            old: self.new.clone(),
            new: self.old.clone(),
            ..self.clone()
        }
    }
}

/// How the two sides disagreed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    BothFailed { old: String, new: String },
    OldFailed { error: String, output: String },
    NewFailed { error: String, output: String },
    Output { old: String, new: String },
}

impl Mismatch {
    /// The same disagreement seen with old and new exchanged.
    pub fn swapped(self) -> Self {
        match self {
            Mismatch::BothFailed { old, new } => Mismatch::BothFailed { old: new, new: old },
            Mismatch::OldFailed { error, output } => Mismatch::NewFailed { error, output },
            Mismatch::NewFailed { error, output } => Mismatch::OldFailed { error, output },
            Mismatch::Output { old, new } => Mismatch::Output { old: new, new: old },
        }
    }
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::BothFailed { old, new } => {
                write!(f, "both engines failed\nold: {old}\nnew: {new}")
            }
            Mismatch::OldFailed { error, .. } => write!(f, "old engine failed\n{error}"),
            Mismatch::NewFailed { error, .. } => write!(f, "new engine failed\n{error}"),
            Mismatch::Output { old, new } => {
                write!(f, "output differs\n--- old\n{old}--- new\n{new}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Match,
    Mismatch(Mismatch),
}

impl Verdict {
    pub fn is_mismatch(&self) -> bool {
        matches!(self, Verdict::Mismatch(_))
    }
}

/// What happens when both sides fail.
#[derive(Debug, Clone, Copy)]
enum BothFailed {
    Mismatch,
    MismatchIfDifferent,
    Match,
}

#[derive(Debug, Clone, Copy)]
struct Rules {
    both_failed: BothFailed,
    compare_output: bool,
}

fn compare(
    old: Result<String, String>,
    new: Result<String, String>,
    rules: Rules,
) -> Verdict {
    let mismatch = match (old, new) {
        (Err(old), Err(new)) => match rules.both_failed {
            BothFailed::Mismatch => Some(Mismatch::BothFailed { old, new }),
            BothFailed::MismatchIfDifferent if old != new => {
                Some(Mismatch::BothFailed { old, new })
            }
            BothFailed::MismatchIfDifferent | BothFailed::Match => None,
        },
        (Err(error), Ok(output)) => Some(Mismatch::OldFailed { error, output }),
        (Ok(output), Err(error)) => Some(Mismatch::NewFailed { error, output }),
        (Ok(old), Ok(new)) => {
            (rules.compare_output && old != new).then_some(Mismatch::Output { old, new })
        }
    };
    mismatch.map_or(Verdict::Match, Verdict::Mismatch)
}

/// One old/new session pair plus the comparison rules.
pub struct DiffEngine {
    id: String,
    factory: Arc<dyn EngineFactory>,
    old: Option<Box<dyn QueryEngine>>,
    new: Option<Box<dyn QueryEngine>>,
    /// Set once the running pair has executed anything.
    used: bool,
    pool: Arc<BufferPool>,
}

impl DiffEngine {
    /// Starts both sessions. Fails if either cannot be brought up.
    pub fn new(
        id: impl Into<String>,
        config: EngineConfig,
        pool: Arc<BufferPool>,
    ) -> Result<Self, EngineError> {
        Self::with_factory(id, Arc::new(config), pool)
    }

    pub fn with_factory(
        id: impl Into<String>,
        factory: Arc<dyn EngineFactory>,
        pool: Arc<BufferPool>,
    ) -> Result<Self, EngineError> {
        let mut engine = Self {
            id: id.into(),
            factory,
            old: None,
            new: None,
            used: false,
            pool,
        };
        engine.ensure_running()?;
        Ok(engine)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn ensure_running(&mut self) -> Result<(), EngineError> {
        if self.old.is_none() {
            self.old = Some(self.factory.spawn(&format!("{}/old", self.id), Side::Old)?);
        }
        if self.new.is_none() {
            self.new = Some(self.factory.spawn(&format!("{}/new", self.id), Side::New)?);
        }
        Ok(())
    }

    /// Tears both sessions down and starts fresh ones.
    pub fn reset(&mut self) -> Result<(), EngineError> {
        self.shutdown();
        self.ensure_running()
    }

    fn shutdown(&mut self) {
        self.used = false;
        for mut side in [self.old.take(), self.new.take()].into_iter().flatten() {
            side.close();
        }
    }

    /// Runs the batch followed by the final-state probe on both sides.
    /// Batches always start on fresh sessions: a batch may leave savepoints
    /// open or tables behind.
    ///
    /// Any failure on either side is a mismatch, even when both fail the
    /// same way. With `only_check_errors` the outputs are not compared.
    pub fn run_batch(
        &mut self,
        batch: &Batch,
        only_check_errors: bool,
    ) -> Result<Verdict, EngineError> {
        if self.used {
            self.reset()?;
        }
        let pool = Arc::clone(&self.pool);
        let mut sql = pool.get();
        batch.write_sql(&mut sql);
        batch.write_probe(&mut sql);
        self.execute(
            &sql,
            Rules {
                both_failed: BothFailed::Mismatch,
                compare_output: !only_check_errors,
            },
        )
    }

    /// Mismatch only when exactly one side fails.
    pub fn exec_and_compare_errors(&mut self, sql: &str) -> Result<Verdict, EngineError> {
        self.execute(
            sql,
            Rules {
                both_failed: BothFailed::Match,
                compare_output: false,
            },
        )
    }

    /// Mismatch when exactly one side fails, when both fail with different
    /// errors, or when the outputs differ.
    pub fn exec_and_compare_query(&mut self, sql: &str) -> Result<Verdict, EngineError> {
        self.execute(
            sql,
            Rules {
                both_failed: BothFailed::MismatchIfDifferent,
                compare_output: true,
            },
        )
    }

    fn execute(&mut self, sql: &str, rules: Rules) -> Result<Verdict, EngineError> {
        self.ensure_running()?;
        self.used = true;
        let (old, new) = self.query_both(sql);

        // A session that failed anything no longer holds the state the next
        // query expects.
        if old.is_err() || new.is_err() {
            self.shutdown();
        }

        let old = match old {
            Ok(out) => Ok(out),
            Err(SideError::Sql(msg)) => Err(msg),
            Err(SideError::Transport(e)) => {
                warn!(engine = %self.id, error = %e, "old engine transport failure");
                return Err(e);
            }
        };
        let new = match new {
            Ok(out) => Ok(out),
            Err(SideError::Sql(msg)) => Err(msg),
            Err(SideError::Transport(e)) => {
                warn!(engine = %self.id, error = %e, "new engine transport failure");
                return Err(e);
            }
        };

        let verdict = compare(old, new, rules);
        if let Verdict::Mismatch(m) = &verdict {
            debug!(engine = %self.id, mismatch = %m, "engines disagree");
        }
        Ok(verdict)
    }

    /// Both sides run at the same time; the call returns once both are done.
    fn query_both(
        &mut self,
        sql: &str,
    ) -> (Result<String, SideError>, Result<String, SideError>) {
        let id = &self.id;
        let (Some(old), Some(new)) = (self.old.as_mut(), self.new.as_mut()) else {
            let not_running = || {
                Err(SideError::Transport(EngineError::NotRunning { id: id.clone() }))
            };
            return (not_running(), not_running());
        };

        thread::scope(|s| {
            let old_side = s.spawn(|| old.query(sql));
            let new_side = s.spawn(|| new.query(sql));
            (joined(id, old_side), joined(id, new_side))
        })
    }
}

fn joined(
    id: &str,
    side: thread::ScopedJoinHandle<'_, Result<String, SideError>>,
) -> Result<String, SideError> {
    side.join().unwrap_or_else(|_| {
        Err(SideError::Transport(EngineError::Panicked { id: id.to_string() }))
    })
}

impl Drop for DiffEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Base, ProdKind, SavepointStmt, Statement, VacuumStmt};
    use crate::batch::BatchKind;
    use crate::generator::{Generator, GeneratorConfig};
    use crate::schema::{Column, Schema, SqlType, Table};
    use crate::scope::Scope;

    const FULL: Rules = Rules {
        both_failed: BothFailed::Mismatch,
        compare_output: true,
    };

    fn embedded() -> DiffEngine {
        DiffEngine::new("test", EngineConfig::embedded(), Arc::new(BufferPool::new(2))).unwrap()
    }

    #[test]
    fn engine_spec_parsing() {
        assert_eq!("bundled".parse::<EngineSpec>().unwrap(), EngineSpec::Embedded);
        assert_eq!(
            "./sqlite3-3.26.0".parse::<EngineSpec>().unwrap(),
            EngineSpec::Process {
                binary: PathBuf::from("./sqlite3-3.26.0")
            }
        );
        assert_eq!(EngineSpec::Embedded.to_string(), "bundled");
    }

    #[test]
    fn double_failure_is_a_mismatch_in_batches() {
        let v = compare(Err("x".into()), Err("x".into()), FULL);
        assert!(v.is_mismatch());
    }

    #[test]
    fn single_failure_is_a_mismatch() {
        let v = compare(Err("boom".into()), Ok("1\n".into()), FULL);
        assert_eq!(
            v,
            Verdict::Mismatch(Mismatch::OldFailed {
                error: "boom".into(),
                output: "1\n".into()
            })
        );
    }

    #[test]
    fn output_only_compared_on_request() {
        let errors_only = Rules {
            compare_output: false,
            ..FULL
        };
        assert_eq!(compare(Ok("1\n".into()), Ok("2\n".into()), errors_only), Verdict::Match);
        assert!(compare(Ok("1\n".into()), Ok("2\n".into()), FULL).is_mismatch());
    }

    #[test]
    fn comparison_is_symmetric() {
        let outcomes: Vec<Result<String, String>> = vec![
            Ok(String::new()),
            Ok("1|a\n".into()),
            Ok("2|b\n".into()),
            Err("no such table: t9".into()),
            Err("near \"JOIN\": syntax error".into()),
        ];
        let rules = [
            FULL,
            Rules {
                both_failed: BothFailed::MismatchIfDifferent,
                compare_output: true,
            },
            Rules {
                both_failed: BothFailed::Match,
                compare_output: false,
            },
        ];
        for rules in rules {
            for a in &outcomes {
                for b in &outcomes {
                    let forward = compare(a.clone(), b.clone(), rules);
                    let backward = compare(b.clone(), a.clone(), rules);
                    match (forward, backward) {
                        (Verdict::Match, Verdict::Match) => {}
                        (Verdict::Mismatch(f), Verdict::Mismatch(b)) => assert_eq!(f, b.swapped()),
                        (f, b) => panic!("asymmetric verdicts {f:?} / {b:?} for {rules:?}"),
                    }
                }
            }
        }
    }

    #[test]
    fn identical_engines_agree_on_setup() {
        let mut engine = embedded();
        let v = engine
            .exec_and_compare_errors(
                "CREATE TABLE t(x INTEGER); INSERT INTO t VALUES (1),(2),(3);",
            )
            .unwrap();
        assert_eq!(v, Verdict::Match);
        let v = engine.exec_and_compare_query("SELECT * FROM t WHERE x > 1;").unwrap();
        assert_eq!(v, Verdict::Match);
    }

    #[test]
    fn matching_errors_pass_the_query_helper() {
        let mut engine = embedded();
        let v = engine.exec_and_compare_query("SELECT * FROM missing;").unwrap();
        assert_eq!(v, Verdict::Match);
        // the failed sessions were replaced
        let v = engine.exec_and_compare_query("SELECT 1;").unwrap();
        assert_eq!(v, Verdict::Match);
    }

    #[test]
    fn batches_end_with_the_probe() {
        let mut engine = embedded();
        let batch = Generator::seeded(GeneratorConfig::default(), 3)
            .next_batch_iud(0)
            .unwrap();
        assert_eq!(engine.run_batch(&batch, false).unwrap(), Verdict::Match);
        assert_eq!(engine.run_batch(&batch, false).unwrap(), Verdict::Match);
    }

    fn one_table_schema() -> Arc<Schema> {
        Arc::new(Schema {
            tables: vec![Arc::new(Table::new("t0", vec![Column::new("c0", SqlType::Int)]))],
            ..Schema::default()
        })
    }

    fn vacuum_batch(schema: &Arc<Schema>) -> Batch {
        let scope = Arc::new(Scope::root(Arc::clone(schema)));
        let vacuum = VacuumStmt {
            base: Base::new(None, ProdKind::VacuumStmt, scope),
            schema_name: "main".into(),
        };
        Batch::new(schema, vec![Statement::Vacuum(vacuum)], BatchKind::Structured)
    }

    #[test]
    fn open_savepoint_does_not_reach_the_next_batch() {
        let schema = one_table_schema();
        let scope = Arc::new(Scope::root(Arc::clone(&schema)));
        let open = SavepointStmt {
            base: Base::new(None, ProdKind::SavepointStmt, scope),
            name: "sp0".into(),
            stmts: Vec::new(),
            end: None,
        };
        let savepoint = Batch::new(&schema, vec![Statement::Savepoint(open)], BatchKind::Structured);

        let mut engine = embedded();
        assert_eq!(engine.run_batch(&savepoint, false).unwrap(), Verdict::Match);
        // VACUUM fails inside a transaction
        assert_eq!(engine.run_batch(&vacuum_batch(&schema), false).unwrap(), Verdict::Match);
    }

    #[test]
    fn consecutive_random_batches_start_clean() {
        let mut gen = Generator::seeded(GeneratorConfig::default(), 4);
        let mut engine = embedded();
        for _ in 0..10 {
            let batch = gen.next_batch_random(50).unwrap();
            engine.run_batch(&batch, true).unwrap();

            let vacuum = vacuum_batch(&one_table_schema());
            let v = engine.run_batch(&vacuum, false).unwrap();
            assert_eq!(v, Verdict::Match, "after:\n{batch}");
        }
    }
}
