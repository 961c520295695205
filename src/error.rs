use thiserror::Error;

/// Failure while building a statement tree.
#[derive(Debug, Error)]
pub enum GenError {
    /// The current scope cannot satisfy the request (no column of the
    /// wanted type, no join pairing, ...). Retried by [`crate::generator::retry`].
    #[error("dead end: {0}")]
    DeadEnd(String),

    #[error("generation did not succeed after {attempts} attempts")]
    RetriesExhausted { attempts: usize },

    /// A logic defect in the generator. Never retried.
    #[error("generator invariant violated: {0}")]
    Invariant(&'static str),
}

impl GenError {
    pub fn dead_end(msg: impl Into<String>) -> Self {
        GenError::DeadEnd(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, GenError::DeadEnd(_))
    }
}

/// Failure talking to an engine, as opposed to the engine rejecting SQL.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("[{id}] failed to start {binary}: {source}")]
    Spawn {
        id: String,
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("[{id}] io error: {source}")]
    Io {
        id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("[{id}] timeout waiting for {what}. Collected output:\n{output}")]
    Timeout {
        id: String,
        what: &'static str,
        output: String,
    },

    #[error("[{id}] output closed before delimiter. Collected output:\n{output}")]
    Closed { id: String, output: String },

    #[error("[{id}] engine rejected the session setup:\n{output}")]
    Setup { id: String, output: String },

    #[error("[{id}] engine handle is not running")]
    NotRunning { id: String },

    #[error("[{id}] query thread panicked")]
    Panicked { id: String },

    #[error("embedded engine error: {0}")]
    Embedded(#[from] rusqlite::Error),
}

#[derive(Debug, Error)]
pub enum FuzzerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("refusing to fuzz with {found} logical cores, at least {required} are required")]
    InsufficientCores { found: usize, required: usize },

    #[error("Configuration error: {0}")]
    Config(String),
}
