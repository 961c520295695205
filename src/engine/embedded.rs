//! The bundled SQLite library, queried in-process.

use rusqlite::types::ValueRef;
use rusqlite::Connection;
use tracing::debug;

use super::{QueryEngine, SideError};
use crate::error::EngineError;

/// An in-memory database whose output mimics the shell's list mode:
/// one row per line, values joined by `|`, NULL as the empty string.
///
/// Like a shell with `.bail on`, execution stops at the first failing
/// statement.
pub struct EmbeddedEngine {
    id: String,
    conn: Option<Connection>,
}

impl EmbeddedEngine {
    pub fn open(id: impl Into<String>) -> Result<Self, EngineError> {
        let id = id.into();
        let conn = Connection::open_in_memory()?;
        debug!(engine = %id, version = rusqlite::version(), "embedded engine ready");
        Ok(Self {
            id,
            conn: Some(conn),
        })
    }

    fn run(conn: &Connection, sql: &str, out: &mut String) -> rusqlite::Result<()> {
        let mut batch = rusqlite::Batch::new(conn, sql);
        while let Some(mut stmt) = batch.next()? {
            let ncols = stmt.column_count();
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                for i in 0..ncols {
                    if i > 0 {
                        out.push('|');
                    }
                    write_value(row.get_ref(i)?, out);
                }
                out.push('\n');
            }
        }
        Ok(())
    }
}

impl QueryEngine for EmbeddedEngine {
    fn id(&self) -> &str {
        &self.id
    }

    fn query(&mut self, sql: &str) -> Result<String, SideError> {
        let conn = self.conn.as_ref().ok_or_else(|| {
            SideError::Transport(EngineError::NotRunning {
                id: self.id.clone(),
            })
        })?;
        let mut out = String::new();
        match Self::run(conn, sql, &mut out) {
            Ok(()) => Ok(out),
            Err(e) => {
                debug!(engine = %self.id, error = %e, "embedded engine reported an error");
                Err(SideError::Sql(e.to_string()))
            }
        }
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err((_, e)) = conn.close() {
                debug!(engine = %self.id, error = %e, "closing embedded engine");
            }
        }
    }
}

fn write_value(value: ValueRef<'_>, out: &mut String) {
    match value {
        ValueRef::Null => {}
        ValueRef::Integer(i) => out.push_str(&i.to_string()),
        ValueRef::Real(f) => out.push_str(&format_real(f)),
        ValueRef::Text(b) | ValueRef::Blob(b) => out.push_str(&String::from_utf8_lossy(b)),
    }
}

/// Integral reals keep a trailing `.0` the way the shell prints them.
fn format_real(f: f64) -> String {
    if f.is_finite() && f == f.trunc() && f.abs() < 1e15 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_mode_rendering() {
        let mut engine = EmbeddedEngine::open("embedded").unwrap();
        let out = engine
            .query(
                "CREATE TABLE t(x INTEGER, y TEXT, z REAL);
                 INSERT INTO t VALUES (1, 'a', 2.0), (2, NULL, 0.5);
                 SELECT * FROM t;",
            )
            .unwrap();
        assert_eq!(out, "1|a|2.0\n2||0.5\n");
    }

    #[test]
    fn stops_at_first_error() {
        let mut engine = EmbeddedEngine::open("embedded").unwrap();
        let err = engine
            .query("CREATE TABLE t(x); SELECT * FROM nope; INSERT INTO t VALUES (1);")
            .unwrap_err();
        assert!(matches!(err, SideError::Sql(ref msg) if msg.contains("nope")), "{err:?}");
        let out = engine.query("SELECT count(*) FROM t;").unwrap();
        assert_eq!(out, "0\n");
    }

    #[test]
    fn closed_engine_is_not_running() {
        let mut engine = EmbeddedEngine::open("embedded").unwrap();
        engine.close();
        engine.close();
        assert!(matches!(
            engine.query("SELECT 1;"),
            Err(SideError::Transport(EngineError::NotRunning { .. }))
        ));
    }
}
