//! Interactive `sqlite3` shell driven over its standard streams.

use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{after, never, select, unbounded, Receiver};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{QueryEngine, SideError};
use crate::error::EngineError;

/// How long a closing shell gets to exit on its own before it is killed.
const EXIT_GRACE: Duration = Duration::from_secs(1);

/// How long a query waits for stderr once stdout has closed.
const STDERR_GRACE: Duration = Duration::from_millis(100);

/// A long-running shell session. Output of a query ends at a unique
/// delimiter line; any stderr line ends it as an error.
pub struct EngineProcess {
    id: String,
    binary: PathBuf,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Receiver<String>,
    stderr: Receiver<String>,
    readers: Vec<JoinHandle<()>>,
    delimiter: String,
    query_timeout: Duration,
}

impl EngineProcess {
    /// Starts the shell and waits until it echoes the delimiter back.
    pub fn spawn(
        id: impl Into<String>,
        binary: &Path,
        setup_timeout: Duration,
        query_timeout: Duration,
    ) -> Result<Self, EngineError> {
        let id = id.into();
        let mut child = Command::new(binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                id: id.clone(),
                binary: binary.display().to_string(),
                source,
            })?;

        let stdin = child.stdin.take();
        let (stdout, out_reader) = read_lines(child.stdout.take());
        let (stderr, err_reader) = read_lines(child.stderr.take());

        let mut engine = Self {
            id,
            binary: binary.to_path_buf(),
            child: Some(child),
            stdin,
            stdout,
            stderr,
            readers: out_reader.into_iter().chain(err_reader).collect(),
            delimiter: Uuid::new_v4().simple().to_string(),
            query_timeout,
        };

        let setup = format!(
            ".echo off\n.bail on\n.mode list\n.separator |\nSELECT '{}';\n",
            engine.delimiter
        );
        engine.send(&setup)?;
        match engine.read_until_delimiter(setup_timeout, "setup delimiter") {
            Ok(_) => {}
            Err(SideError::Sql(output)) => {
                return Err(EngineError::Setup {
                    id: engine.id.clone(),
                    output,
                })
            }
            Err(SideError::Transport(e)) => return Err(e),
        }

        debug!(engine = %engine.id, binary = %engine.binary.display(), "engine ready");
        Ok(engine)
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn send(&mut self, text: &str) -> Result<(), EngineError> {
        let stdin = self.stdin.as_mut().ok_or_else(|| EngineError::NotRunning {
            id: self.id.clone(),
        })?;
        stdin
            .write_all(text.as_bytes())
            .and_then(|()| stdin.flush())
            .map_err(|source| EngineError::Io {
                id: self.id.clone(),
                source,
            })
    }

    /// Collects stdout lines up to the delimiter. The first stderr line
    /// turns the result into a SQL error carrying every stderr line that is
    /// already queued behind it.
    fn read_until_delimiter(
        &self,
        timeout: Duration,
        what: &'static str,
    ) -> Result<String, SideError> {
        let deadline = after(timeout);
        let mut output = String::new();
        let closed = never();
        let mut stderr_open = true;

        loop {
            let stderr = if stderr_open { &self.stderr } else { &closed };
            select! {
                recv(self.stdout) -> line => match line {
                    Ok(line) if line == self.delimiter => return Ok(output),
                    Ok(line) => {
                        output.push_str(&line);
                        output.push('\n');
                    }
                    Err(_) => {
                        // The shell exits on the first error, so stderr may
                        // still be in flight.
                        if let Ok(first) = self.stderr.recv_timeout(STDERR_GRACE) {
                            return Err(SideError::Sql(self.collect_stderr(first)));
                        }
                        return Err(SideError::Transport(EngineError::Closed {
                            id: self.id.clone(),
                            output,
                        }));
                    }
                },
                recv(stderr) -> line => match line {
                    Ok(first) => return Err(SideError::Sql(self.collect_stderr(first))),
                    Err(_) => stderr_open = false,
                },
                recv(deadline) -> _ => {
                    return Err(SideError::Transport(EngineError::Timeout {
                        id: self.id.clone(),
                        what,
                        output,
                    }));
                }
            }
        }
    }

    fn collect_stderr(&self, first: String) -> String {
        let mut msg = first;
        for line in self.stderr.try_iter() {
            msg.push('\n');
            msg.push_str(&line);
        }
        debug!(engine = %self.id, stderr = %msg, "engine reported an error");
        msg
    }
}

impl QueryEngine for EngineProcess {
    fn id(&self) -> &str {
        &self.id
    }

    fn query(&mut self, sql: &str) -> Result<String, SideError> {
        // Stale diagnostics belong to an earlier query.
        for line in self.stderr.try_iter() {
            debug!(engine = %self.id, stderr = %line, "discarding stale stderr");
        }

        let text = format!("{}\nSELECT '{}';\n", sql.trim(), self.delimiter);
        self.send(&text).map_err(SideError::Transport)?;
        self.read_until_delimiter(self.query_timeout, "query delimiter")
    }

    fn close(&mut self) {
        if self.stdin.is_some() {
            let _ = self.send(".quit\n");
        }
        drop(self.stdin.take());

        if let Some(mut child) = self.child.take() {
            let started = Instant::now();
            loop {
                match child.try_wait() {
                    Ok(Some(_)) => break,
                    Ok(None) if started.elapsed() < EXIT_GRACE => {
                        thread::sleep(Duration::from_millis(10));
                    }
                    Ok(None) | Err(_) => {
                        warn!(engine = %self.id, "engine did not exit, killing it");
                        let _ = child.kill();
                        let _ = child.wait();
                        break;
                    }
                }
            }
        }

        for reader in self.readers.drain(..) {
            let _ = reader.join();
        }
        debug!(engine = %self.id, "engine closed");
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        self.close();
    }
}

/// Forwards every line of `stream` into a channel until EOF.
fn read_lines<R>(stream: Option<R>) -> (Receiver<String>, Option<JoinHandle<()>>)
where
    R: Read + Send + 'static,
{
    let (tx, rx) = unbounded();
    let handle = stream.map(|stream| {
        thread::spawn(move || {
            for line in BufReader::new(stream).lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
    });
    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite3() -> Option<PathBuf> {
        let found = Command::new("sqlite3")
            .arg("-version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);
        found.then(|| PathBuf::from("sqlite3"))
    }

    fn spawn(binary: &Path) -> EngineProcess {
        EngineProcess::spawn("test", binary, Duration::from_secs(5), Duration::from_secs(15))
            .unwrap()
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let err = EngineProcess::spawn(
            "nope",
            Path::new("/nonexistent/sqlite3-0.0.0"),
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .err()
        .unwrap();
        assert!(matches!(err, EngineError::Spawn { .. }));
    }

    #[test]
    fn rows_come_back_in_list_mode() {
        let Some(bin) = sqlite3() else {
            eprintln!("sqlite3 not on PATH, skipping");
            return;
        };
        let mut engine = spawn(&bin);
        let out = engine
            .query("CREATE TABLE t(x INTEGER, y TEXT); INSERT INTO t VALUES (1, 'a'), (2, NULL); SELECT * FROM t;")
            .unwrap();
        assert_eq!(out, "1|a\n2|\n");
    }

    #[test]
    fn errors_come_from_stderr() {
        let Some(bin) = sqlite3() else {
            eprintln!("sqlite3 not on PATH, skipping");
            return;
        };
        let mut engine = spawn(&bin);
        match engine.query("SELECT * FROM no_such_table;") {
            Err(SideError::Sql(msg)) => assert!(msg.contains("no_such_table"), "{msg}"),
            other => panic!("expected a SQL error, got {other:?}"),
        }
        engine.close();
        engine.close();
    }
}
