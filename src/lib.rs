//! Differential SQL fuzzer.
//!
//! A scope-aware random statement generator feeds batches of SQL to two
//! versions of the same engine; any divergence in output or errors is
//! bisected down and written out as a crash report.

pub mod ast;
pub mod batch;
pub mod coverage;
pub mod engine;
pub mod error;
pub mod fuzzer;
pub mod generator;
pub mod pool;
pub mod report;
pub mod schema;
pub mod scope;

pub use batch::{Batch, BatchKind};
pub use engine::{
    DiffEngine, EmbeddedEngine, EngineConfig, EngineFactory, EngineProcess, EngineSpec, Mismatch,
    QueryEngine, Side, SideError, Verdict,
};
pub use error::{EngineError, FuzzerError, GenError};
pub use fuzzer::{minimize, Fuzzer, FuzzerConfig, StatsSnapshot};
pub use generator::{Generator, GeneratorConfig};
