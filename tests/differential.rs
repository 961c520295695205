use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use sql_diff_fuzzer::pool::BufferPool;
use sql_diff_fuzzer::{
    DiffEngine, EmbeddedEngine, EngineConfig, EngineError, EngineFactory, EngineSpec, Generator,
    GeneratorConfig, Mismatch, QueryEngine, Side, SideError, Verdict,
};

fn diff(config: EngineConfig) -> DiffEngine {
    DiffEngine::new("it", config, Arc::new(BufferPool::new(2))).unwrap()
}

const SETUP: &str = "CREATE TABLE t(x INTEGER); INSERT INTO t VALUES (1),(2),(3);";

#[test]
fn identical_engines_agree() {
    let mut engine = diff(EngineConfig::embedded());
    assert_eq!(engine.exec_and_compare_errors(SETUP).unwrap(), Verdict::Match);
    assert_eq!(
        engine.exec_and_compare_query("SELECT * FROM t WHERE x > 1;").unwrap(),
        Verdict::Match
    );
}

/// The bundled library with RIGHT JOIN support removed, standing in for a
/// release that predates it.
struct WithoutRightJoin {
    inner: EmbeddedEngine,
}

impl QueryEngine for WithoutRightJoin {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn query(&mut self, sql: &str) -> Result<String, SideError> {
        if sql.contains("RIGHT JOIN") {
            return Err(SideError::Sql(
                "RIGHT and FULL OUTER JOINs are not currently supported".into(),
            ));
        }
        self.inner.query(sql)
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

struct OldWithoutRightJoin;

impl EngineFactory for OldWithoutRightJoin {
    fn spawn(&self, id: &str, side: Side) -> Result<Box<dyn QueryEngine>, EngineError> {
        let inner = EmbeddedEngine::open(id)?;
        Ok(match side {
            Side::Old => Box::new(WithoutRightJoin { inner }),
            Side::New => Box::new(inner),
        })
    }
}

#[test]
fn unsupported_join_on_one_side_is_a_mismatch() {
    let mut engine = DiffEngine::with_factory(
        "join",
        Arc::new(OldWithoutRightJoin),
        Arc::new(BufferPool::new(2)),
    )
    .unwrap();
    let setup = "CREATE TABLE a(x); CREATE TABLE b(y); INSERT INTO a VALUES (1); INSERT INTO b VALUES (2);";

    let left = format!("{setup} SELECT * FROM a LEFT JOIN b ON x = y;");
    assert_eq!(engine.exec_and_compare_query(&left).unwrap(), Verdict::Match);

    let right = format!("{setup} SELECT * FROM a RIGHT JOIN b ON x = y;");
    match engine.exec_and_compare_query(&right).unwrap() {
        Verdict::Mismatch(Mismatch::OldFailed { error, output }) => {
            assert!(error.contains("RIGHT and FULL OUTER JOINs"));
            assert_eq!(output, "|2\n");
        }
        other => panic!("expected the old side to fail, got {other:?}"),
    }
}

#[test]
fn one_sided_output_difference_is_a_mismatch() {
    struct Shifted(EmbeddedEngine);
    impl QueryEngine for Shifted {
        fn id(&self) -> &str {
            self.0.id()
        }
        fn query(&mut self, sql: &str) -> Result<String, SideError> {
            self.0.query(sql).map(|out| out.replace('3', "4"))
        }
        fn close(&mut self) {
            self.0.close();
        }
    }
    struct Factory;
    impl EngineFactory for Factory {
        fn spawn(&self, id: &str, side: Side) -> Result<Box<dyn QueryEngine>, EngineError> {
            let inner = EmbeddedEngine::open(id)?;
            Ok(match side {
                Side::Old => Box::new(inner),
                Side::New => Box::new(Shifted(inner)),
            })
        }
    }

    let mut engine =
        DiffEngine::with_factory("shift", Arc::new(Factory), Arc::new(BufferPool::new(1))).unwrap();
    let sql = format!("{SETUP} SELECT * FROM t;");
    assert_eq!(
        engine.exec_and_compare_query(&sql).unwrap(),
        Verdict::Mismatch(Mismatch::Output {
            old: "1\n2\n3\n".into(),
            new: "1\n2\n4\n".into(),
        })
    );
    // only error presence is compared here
    assert_eq!(engine.exec_and_compare_errors(&sql).unwrap(), Verdict::Match);
}

#[test]
fn verdicts_do_not_depend_on_which_side_is_old() {
    let config = EngineConfig::embedded();
    let mut forward = diff(config.clone());
    let mut backward = diff(config.swapped());
    let mut gen = Generator::seeded(GeneratorConfig { is_deterministic: true }, 2024);

    for _ in 0..10 {
        let batch = gen.next_batch_structured(12).unwrap();
        let f = forward.run_batch(&batch, false).unwrap();
        let b = backward.run_batch(&batch, false).unwrap();
        match (f, b) {
            (Verdict::Match, Verdict::Match) => {}
            (Verdict::Mismatch(f), Verdict::Mismatch(b)) => assert_eq!(f, b.swapped()),
            (f, b) => panic!("asymmetric verdicts {f:?} / {b:?}\n{batch}"),
        }
    }
}

fn sqlite3_on_path() -> Option<PathBuf> {
    let ok = Command::new("sqlite3")
        .arg("-version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    ok.then(|| PathBuf::from("sqlite3"))
}

#[test]
fn shell_processes_agree_with_each_other() {
    let Some(binary) = sqlite3_on_path() else {
        eprintln!("sqlite3 not on PATH, skipping");
        return;
    };
    let spec = EngineSpec::Process { binary };
    let mut engine = diff(EngineConfig {
        old: spec.clone(),
        new: spec,
        ..EngineConfig::default()
    });
    assert_eq!(engine.exec_and_compare_errors(SETUP).unwrap(), Verdict::Match);
    assert_eq!(
        engine.exec_and_compare_query("SELECT * FROM t WHERE x > 1;").unwrap(),
        Verdict::Match
    );
    // a failing query on both sides with the same message is tolerated here
    assert_eq!(
        engine.exec_and_compare_query("SELECT * FROM missing;").unwrap(),
        Verdict::Match
    );
    // but the sessions were replaced, so the table is gone
    assert_eq!(
        engine.exec_and_compare_errors("SELECT * FROM t;").unwrap(),
        Verdict::Match
    );
}

#[test]
fn shell_and_bundled_engine_agree_on_plain_rows() {
    let Some(binary) = sqlite3_on_path() else {
        eprintln!("sqlite3 not on PATH, skipping");
        return;
    };
    let mut engine = diff(EngineConfig {
        old: EngineSpec::Process { binary },
        new: EngineSpec::Embedded,
        ..EngineConfig::default()
    });
    let sql = "CREATE TABLE t(x INTEGER, y TEXT); INSERT INTO t VALUES (1, 'a'), (2, NULL); SELECT * FROM t;";
    assert_eq!(engine.exec_and_compare_query(sql).unwrap(), Verdict::Match);
}
