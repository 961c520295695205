//! Crash report persistence.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::ast::characteristics::Characteristics;
use crate::batch::Batch;

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Writes each distinct crash once per run.
#[derive(Debug)]
pub struct ReportWriter {
    dir: PathBuf,
    seen: HashSet<String>,
}

impl ReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seen: HashSet::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reports written so far.
    pub fn written(&self) -> usize {
        self.seen.len()
    }

    /// Writes the batch's crash text to `crash-<unix secs>-<hash>.sql`.
    /// Returns `None` when the same text was already written.
    pub fn persist(&mut self, batch: &Batch) -> io::Result<Option<PathBuf>> {
        let text = batch.crash_string();
        let hash = sha256_hex(text.as_bytes());
        if self.seen.contains(&hash) {
            debug!(hash = %hash, "skipping duplicate crash report");
            return Ok(None);
        }

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let path = self.dir.join(format!("crash-{timestamp}-{}.sql", &hash[..16]));
        fs::write(&path, &text)?;

        info!(path = %path.display(), batch_len = batch.len(), kind = batch.kind().as_str(), "crash report written");
        debug!(characteristics = %Characteristics::of(batch.statements()), "crash batch");
        self.seen.insert(hash);
        Ok(Some(path))
    }
}
