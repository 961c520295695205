//! Optional edge-coverage feedback.
//!
//! An instrumented engine exposes a 64 KiB hit-count map through
//! [`crate::engine::EngineFactory::coverage`]. Without instrumentation the
//! fuzzer runs with [`NoCoverage`] and the tracker never reports anything new.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

pub const MAP_SIZE: usize = 1 << 16;

/// One hit-count byte per instrumented edge.
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    bytes: Box<[u8]>,
}

impl Bitmap {
    pub fn new() -> Self {
        Self {
            bytes: vec![0; MAP_SIZE].into_boxed_slice(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut map = Self::new();
        let n = bytes.len().min(MAP_SIZE);
        map.bytes[..n].copy_from_slice(&bytes[..n]);
        map
    }

    pub fn hit(&mut self, edge: usize) {
        let slot = &mut self.bytes[edge % MAP_SIZE];
        *slot = slot.saturating_add(1);
    }

    /// Edges with a non-zero count.
    pub fn covered(&self) -> usize {
        self.bytes.iter().filter(|&&b| b != 0).count()
    }

    /// Whether `self` hits an edge that `seen` does not. Compared a word at
    /// a time.
    pub fn has_novelty(&self, seen: &Bitmap) -> bool {
        self.bytes
            .chunks_exact(8)
            .zip(seen.bytes.chunks_exact(8))
            .any(|(new, old)| {
                let new = u64::from_ne_bytes(new.try_into().unwrap_or_default());
                let old = u64::from_ne_bytes(old.try_into().unwrap_or_default());
                new & !old != 0
            })
    }

    /// `base` with every edge it has not hit yet taken from `self`.
    pub fn merged_into(&self, base: &Bitmap) -> Bitmap {
        let mut out = base.clone();
        for (dst, &src) in out.bytes.iter_mut().zip(self.bytes.iter()) {
            if *dst == 0 && src != 0 {
                *dst = src;
            }
        }
        out
    }

    /// Rows of 64 edges, `+` for hit and `-` for missed.
    pub fn visualize(&self) -> String {
        let mut out = String::with_capacity(MAP_SIZE + MAP_SIZE / 64);
        for row in self.bytes.chunks(64) {
            out.extend(row.iter().map(|&b| if b > 0 { '+' } else { '-' }));
            out.push('\n');
        }
        out
    }
}

impl Default for Bitmap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("covered", &self.covered())
            .finish()
    }
}

/// Source of coverage maps for the batch that just ran.
pub trait CoverageSource: Send {
    fn collect(&mut self) -> Bitmap;
    fn reset(&mut self);
}

/// For engines built without instrumentation.
#[derive(Debug, Default)]
pub struct NoCoverage;

impl CoverageSource for NoCoverage {
    fn collect(&mut self) -> Bitmap {
        Bitmap::new()
    }

    fn reset(&mut self) {}
}

/// The run-wide union of all collected maps.
#[derive(Debug, Default)]
pub struct CoverageTracker {
    global: RwLock<Bitmap>,
    novel: AtomicU64,
}

impl CoverageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds `map` into the global map. Returns whether it added anything.
    pub fn observe(&self, map: &Bitmap) -> bool {
        if !map.has_novelty(&self.global.read()) {
            return false;
        }
        let mut global = self.global.write();
        // another worker may have merged the same edges meanwhile
        if !map.has_novelty(&global) {
            return false;
        }
        *global = map.merged_into(&global);
        self.novel.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Maps that added coverage so far.
    pub fn novel(&self) -> u64 {
        self.novel.load(Ordering::Relaxed)
    }

    pub fn covered(&self) -> usize {
        self.global.read().covered()
    }

    pub fn snapshot(&self) -> Bitmap {
        self.global.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn map(edges: &[usize]) -> Bitmap {
        let mut m = Bitmap::new();
        for &e in edges {
            m.hit(e);
        }
        m
    }

    #[test]
    fn novelty_is_directional() {
        let small = map(&[1, 2]);
        let big = map(&[1, 2, 70_000]);
        assert!(big.has_novelty(&small));
        assert!(!small.has_novelty(&big));
        assert!(!small.has_novelty(&small));
    }

    #[test]
    fn merge_keeps_existing_counts() {
        let mut base = map(&[5]);
        base.hit(5);
        let merged = map(&[5, 9]).merged_into(&base);
        assert_eq!(merged.bytes[5], 2);
        assert_eq!(merged.bytes[9], 1);
        assert_eq!(merged.covered(), 2);
    }

    #[test]
    fn hit_counts_saturate() {
        let mut m = Bitmap::new();
        for _ in 0..300 {
            m.hit(3);
        }
        assert_eq!(m.bytes[3], u8::MAX);
    }

    #[test]
    fn visualization_has_one_row_per_64_edges() {
        let v = map(&[0, 65]).visualize();
        let rows: Vec<&str> = v.lines().collect();
        assert_eq!(rows.len(), MAP_SIZE / 64);
        assert!(rows[0].starts_with("+-"));
        assert!(rows[1].starts_with("-+"));
    }

    #[test]
    fn tracker_counts_each_novel_map_once() {
        let tracker = Arc::new(CoverageTracker::new());
        assert!(!tracker.observe(&NoCoverage.collect()));

        std::thread::scope(|s| {
            for _ in 0..4 {
                let tracker = Arc::clone(&tracker);
                s.spawn(move || {
                    tracker.observe(&map(&[10, 20]));
                });
            }
        });
        assert_eq!(tracker.novel(), 1);
        assert_eq!(tracker.covered(), 2);
        assert!(tracker.observe(&map(&[30])));
        assert_eq!(tracker.snapshot().covered(), 3);
    }
}
