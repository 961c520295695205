//! Groups of statements that run together against one fresh schema.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use crate::ast::{Production, Statement};
use crate::schema::{Relation, Schema};

/// Which generation stage produced a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    /// Full type and routine universe, general statement mix.
    Random,
    /// Deterministic universe, rows written before they are queried.
    Structured,
}

impl BatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchKind::Random => "random",
            BatchKind::Structured => "structured",
        }
    }
}

/// An ordered run of statements sharing one schema.
///
/// Cloning and slicing share the statements; only the error annotation is
/// per value.
#[derive(Debug, Clone)]
pub struct Batch {
    schema_sql: Arc<str>,
    probe_table: Arc<str>,
    statements: Arc<[Statement]>,
    range: Range<usize>,
    kind: BatchKind,
    err: Option<String>,
}

impl Batch {
    pub fn new(schema: &Schema, statements: Vec<Statement>, kind: BatchKind) -> Self {
        let probe_table = schema
            .tables
            .first()
            .map(|t| t.name().to_string())
            .unwrap_or_else(|| "t0".to_string());
        let range = 0..statements.len();
        Self {
            schema_sql: schema.out().into(),
            probe_table: probe_table.into(),
            statements: statements.into(),
            range,
            kind,
            err: None,
        }
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements[self.range.clone()]
    }

    pub fn kind(&self) -> BatchKind {
        self.kind
    }

    pub fn schema_sql(&self) -> &str {
        &self.schema_sql
    }

    /// The comparison failure this batch reproduces, once known.
    pub fn err(&self) -> Option<&str> {
        self.err.as_deref()
    }

    pub fn set_err(&mut self, err: impl Into<String>) {
        self.err = Some(err.into());
    }

    /// Statements `lo..hi` of this batch under the same schema. The error
    /// annotation is not carried over.
    ///
    /// # Panics
    ///
    /// Panics unless `lo <= hi <= self.len()`.
    pub fn slice(&self, lo: usize, hi: usize) -> Batch {
        assert!(lo <= hi && hi <= self.len(), "slice {lo}..{hi} of batch of {}", self.len());
        Batch {
            schema_sql: Arc::clone(&self.schema_sql),
            probe_table: Arc::clone(&self.probe_table),
            statements: Arc::clone(&self.statements),
            range: self.range.start + lo..self.range.start + hi,
            kind: self.kind,
            err: None,
        }
    }

    /// Schema DDL followed by every statement, each terminated on its own
    /// line.
    pub fn write_sql(&self, out: &mut String) {
        out.push_str(&self.schema_sql);
        out.push('\n');
        for stmt in self.statements() {
            stmt.write_sql(out);
            out.push_str("\n;\n");
        }
    }

    /// Reads back and drops the schema's first table so both engines end the
    /// batch with their final table state on the output.
    pub fn write_probe(&self, out: &mut String) {
        out.push_str("SELECT * FROM ");
        out.push_str(&self.probe_table);
        out.push_str("; DROP TABLE ");
        out.push_str(&self.probe_table);
        out.push_str(";\n");
    }

    /// The repro text: the error banner as SQL comments, then the batch.
    pub fn crash_string(&self) -> String {
        let mut out = String::new();
        match &self.err {
            Some(err) => {
                for line in err.lines() {
                    out.push_str("-- ");
                    out.push_str(line);
                    out.push('\n');
                }
            }
            None => out.push_str("-- no error recorded\n"),
        }
        out.push('\n');
        self.write_sql(&mut out);
        out
    }
}

impl fmt::Display for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sql = String::new();
        self.write_sql(&mut sql);
        f.write_str(&sql)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::generator::{Generator, GeneratorConfig};

    fn batch(n: usize, seed: u64) -> Batch {
        Generator::seeded(GeneratorConfig::default(), seed)
            .next_batch_iud(n)
            .unwrap()
    }

    #[test]
    fn renders_schema_then_terminated_statements() {
        let b = batch(3, 1);
        let sql = b.to_string();
        assert!(sql.starts_with("CREATE TABLE t0 (\n"));
        assert_eq!(sql.matches("\n;\n").count(), 3);
        assert!(sql.ends_with("\n;\n"));
    }

    #[test]
    fn probe_reads_then_drops_first_table() {
        let b = batch(1, 2);
        let mut probe = String::new();
        b.write_probe(&mut probe);
        assert_eq!(probe, "SELECT * FROM t0; DROP TABLE t0;\n");
    }

    #[test]
    fn crash_string_leads_with_commented_error() {
        let mut b = batch(2, 3);
        b.set_err("old engine failed:\nno such column: t9.c0");
        let crash = b.crash_string();
        assert!(crash.starts_with("-- old engine failed:\n-- no such column: t9.c0\n\nCREATE TABLE"));
        assert!(crash.ends_with(&b.to_string()));
    }

    #[test]
    fn slices_drop_the_error() {
        let mut b = batch(4, 4);
        b.set_err("boom");
        assert_eq!(b.slice(1, 3).err(), None);
        assert_eq!(b.slice(0, 0).len(), 0);
        assert!(b.slice(2, 2).is_empty());
    }

    #[test]
    #[should_panic]
    fn slice_past_the_end_panics() {
        batch(2, 5).slice(1, 3);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn slice_renders_exactly_its_statements(
            n in 0usize..12,
            a in 0usize..12,
            b in 0usize..12,
            seed in any::<u64>(),
        ) {
            let whole = batch(n, seed);
            let (lo, hi) = (a.min(b).min(n), a.max(b).min(n));
            let part = whole.slice(lo, hi);
            prop_assert_eq!(part.len(), hi - lo);

            let mut expected = format!("{}\n", whole.schema_sql());
            for stmt in &whole.statements()[lo..hi] {
                expected.push_str(&stmt.out());
                expected.push_str("\n;\n");
            }
            prop_assert_eq!(part.to_string(), expected.clone());
            prop_assert_eq!(part.to_string(), expected);

            // nested slices address the same statements
            if hi > lo {
                let inner = part.slice(1, hi - lo);
                prop_assert_eq!(inner.to_string(), whole.slice(lo + 1, hi).to_string());
            }
        }
    }
}
