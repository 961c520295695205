//! The fuzzing pipeline: generators feed execution workers over bounded
//! queues, and mismatching batches flow to a single minimizer that bisects
//! them and writes crash reports.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use tracing::{debug, error, info, warn};

use crate::batch::{Batch, BatchKind};
use crate::coverage::{CoverageSource, CoverageTracker, NoCoverage};
use crate::engine::{DiffEngine, EngineConfig, EngineFactory, Verdict};
use crate::error::{EngineError, FuzzerError};
use crate::generator::{Generator, GeneratorConfig, IUD_PREFIX};
use crate::pool::BufferPool;
use crate::report::ReportWriter;

/// How often idle loops look at the cancellation flag.
const POLL: Duration = Duration::from_millis(100);

/// Generator back-off when its queue is full.
const BACKOFF: Duration = Duration::from_millis(10);

const STATS_INTERVAL: Duration = Duration::from_secs(10);

const CRASH_QUEUE: usize = 64;

#[derive(Debug, Clone)]
pub struct FuzzerConfig {
    /// Log every mismatch as it is found.
    pub debug: bool,
    /// Execution workers, each with its own engine pair.
    pub threads: usize,
    /// Statements per batch.
    pub batch_size: usize,
    pub output_dir: PathBuf,
    pub engines: EngineConfig,
    /// Stop after this long. `None` runs until cancelled.
    pub deadline: Option<Duration>,
    /// Track coverage maps of matching batches.
    pub coverage: bool,
    /// Logical cores required to start.
    pub min_cores: usize,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        Self {
            debug: false,
            threads: thread::available_parallelism().map_or(1, |n| n.get()),
            batch_size: 100,
            output_dir: PathBuf::from("./bugs"),
            engines: EngineConfig::default(),
            deadline: None,
            coverage: false,
            min_cores: 4,
        }
    }
}

#[derive(Debug, Default)]
pub struct Stats {
    pub generated: AtomicU64,
    pub executed: AtomicU64,
    pub mismatches: AtomicU64,
    pub reports: AtomicU64,
    pub generation_defects: AtomicU64,
    pub transport_errors: AtomicU64,
    pub dropped_crashes: AtomicU64,
    pub novel_coverage: AtomicU64,
}

/// Counter values at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub generated: u64,
    pub executed: u64,
    pub mismatches: u64,
    pub reports: u64,
    pub generation_defects: u64,
    pub transport_errors: u64,
    pub dropped_crashes: u64,
    pub novel_coverage: u64,
}

impl Stats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            generated: get(&self.generated),
            executed: get(&self.executed),
            mismatches: get(&self.mismatches),
            reports: get(&self.reports),
            generation_defects: get(&self.generation_defects),
            transport_errors: get(&self.transport_errors),
            dropped_crashes: get(&self.dropped_crashes),
            novel_coverage: get(&self.novel_coverage),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Random batches call nondeterministic routines, so only their errors
/// are compared.
fn only_check_errors(kind: BatchKind) -> bool {
    kind == BatchKind::Random
}

pub struct Fuzzer {
    config: FuzzerConfig,
    factory: Arc<dyn EngineFactory>,
    cancel: Arc<AtomicBool>,
    stats: Arc<Stats>,
}

impl Fuzzer {
    pub fn new(config: FuzzerConfig) -> Self {
        let factory = Arc::new(config.engines.clone());
        Self::with_factory(config, factory)
    }

    /// Runs against engines from `factory` instead of `config.engines`.
    pub fn with_factory(config: FuzzerConfig, factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            config,
            factory,
            cancel: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(Stats::default()),
        }
    }

    /// Setting the flag stops the run after in-flight batches complete.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn check(&self) -> Result<(), FuzzerError> {
        let cores = thread::available_parallelism().map_or(1, |n| n.get());
        if cores < self.config.min_cores {
            return Err(FuzzerError::InsufficientCores {
                found: cores,
                required: self.config.min_cores,
            });
        }
        if self.config.threads == 0 {
            return Err(FuzzerError::Config("at least one worker thread is required".into()));
        }
        if self.config.batch_size <= IUD_PREFIX {
            return Err(FuzzerError::Config(format!(
                "batch size must be larger than {IUD_PREFIX}"
            )));
        }
        Ok(())
    }

    /// Runs until cancelled or the deadline passes, then returns the final
    /// counters.
    pub fn run(&self) -> Result<StatsSnapshot, FuzzerError> {
        self.check()?;
        fs::create_dir_all(&self.config.output_dir)?;

        // fail fast on engines that cannot start at all
        let pool = Arc::new(BufferPool::new(self.config.threads + 1));
        drop(DiffEngine::with_factory("probe", Arc::clone(&self.factory), Arc::clone(&pool))?);

        let coverage = self.config.coverage.then(|| Arc::new(CoverageTracker::new()));
        if coverage.is_some() && self.factory.coverage("probe").is_none() {
            warn!("engines expose no coverage map, coverage stays empty");
        }
        let depth = self.config.threads * 2;
        let (random_tx, random_rx) = bounded(depth);
        let (structured_tx, structured_rx) = bounded(depth);
        let (crash_tx, crash_rx) = bounded(CRASH_QUEUE);

        info!(
            threads = self.config.threads,
            batch_size = self.config.batch_size,
            output_dir = %self.config.output_dir.display(),
            coverage = self.config.coverage,
            "fuzzer starting"
        );

        thread::scope(|s| {
            s.spawn(|| self.generate(BatchKind::Random, random_tx));
            s.spawn(|| self.generate(BatchKind::Structured, structured_tx));

            for i in 0..self.config.threads {
                let queues = (random_rx.clone(), structured_rx.clone());
                let crash_tx = crash_tx.clone();
                let pool = Arc::clone(&pool);
                let coverage = coverage.clone();
                s.spawn(move || self.execute(i, queues, crash_tx, pool, coverage));
            }
            drop(crash_tx);

            let pool = Arc::clone(&pool);
            s.spawn(move || self.minimize_crashes(crash_rx, pool));

            self.monitor();
        });

        let stats = self.stats();
        info!(?stats, "fuzzer stopped");
        Ok(stats)
    }

    /// Watches the deadline and logs throughput until the run is cancelled.
    fn monitor(&self) {
        let started = Instant::now();
        let mut last_report = Instant::now();
        while !self.cancelled() {
            thread::sleep(POLL);
            if self.config.deadline.is_some_and(|d| started.elapsed() >= d) {
                info!("deadline reached");
                self.cancel.store(true, Ordering::Relaxed);
            }
            if last_report.elapsed() >= STATS_INTERVAL {
                let s = self.stats();
                info!(
                    executed = s.executed,
                    mismatches = s.mismatches,
                    reports = s.reports,
                    generation_defects = s.generation_defects,
                    transport_errors = s.transport_errors,
                    "progress"
                );
                last_report = Instant::now();
            }
        }
    }

    fn generate(&self, kind: BatchKind, tx: Sender<Batch>) {
        let mut gen = Generator::new(GeneratorConfig {
            is_deterministic: kind == BatchKind::Structured,
        });
        let n = self.config.batch_size;

        while !self.cancelled() {
            let batch = match kind {
                BatchKind::Random => gen.next_batch_random(n),
                BatchKind::Structured => gen.next_batch_structured(n),
            };
            let mut batch = match batch {
                Ok(b) => b,
                Err(_) => {
                    Stats::bump(&self.stats.generation_defects);
                    continue;
                }
            };
            Stats::bump(&self.stats.generated);

            loop {
                match tx.try_send(batch) {
                    Ok(()) => break,
                    Err(TrySendError::Full(b)) => {
                        debug!(kind = kind.as_str(), "batch queue full, backing off");
                        if self.cancelled() {
                            return;
                        }
                        batch = b;
                        thread::sleep(BACKOFF);
                    }
                    Err(TrySendError::Disconnected(_)) => return,
                }
            }
        }
    }

    fn execute(
        &self,
        worker: usize,
        (random, structured): (Receiver<Batch>, Receiver<Batch>),
        crashes: Sender<Batch>,
        pool: Arc<BufferPool>,
        coverage: Option<Arc<CoverageTracker>>,
    ) {
        let id = format!("worker-{worker}");
        let Some(mut engine) = self.start_engine(&id, &pool) else {
            return;
        };
        let mut source: Box<dyn CoverageSource> = match coverage {
            Some(_) => self.factory.coverage(&id).unwrap_or_else(|| Box::new(NoCoverage)),
            None => Box::new(NoCoverage),
        };

        while !self.cancelled() {
            let batch = select! {
                recv(random) -> b => Some(b),
                recv(structured) -> b => Some(b),
                default(POLL) => None,
            };
            let Some(batch) = batch else { continue };
            let Ok(mut batch) = batch else { break };

            source.reset();
            match engine.run_batch(&batch, only_check_errors(batch.kind())) {
                Ok(Verdict::Match) => {
                    if let Some(tracker) = &coverage {
                        if tracker.observe(&source.collect()) {
                            Stats::bump(&self.stats.novel_coverage);
                            debug!(engine = %id, covered = tracker.covered(), "new coverage");
                        }
                    }
                }
                Ok(Verdict::Mismatch(m)) => {
                    Stats::bump(&self.stats.mismatches);
                    if self.config.debug {
                        info!(engine = %id, kind = batch.kind().as_str(), mismatch = %m, "mismatch");
                    }
                    batch.set_err(m.to_string());
                    match crashes.try_send(batch) {
                        Ok(()) => {}
                        Err(TrySendError::Full(b)) => {
                            Stats::bump(&self.stats.dropped_crashes);
                            error!(engine = %id, batch_len = b.len(), "crash queue full, dropping crash");
                        }
                        Err(TrySendError::Disconnected(_)) => break,
                    }
                }
                Err(e) => {
                    Stats::bump(&self.stats.transport_errors);
                    error!(engine = %id, error = %e, "batch aborted by engine failure");
                    thread::sleep(POLL);
                }
            }
            Stats::bump(&self.stats.executed);
        }
        debug!(engine = %id, "worker stopped");
    }

    /// Retries until an engine pair starts or the run is cancelled.
    fn start_engine(&self, id: &str, pool: &Arc<BufferPool>) -> Option<DiffEngine> {
        while !self.cancelled() {
            match DiffEngine::with_factory(id, Arc::clone(&self.factory), Arc::clone(pool)) {
                Ok(engine) => return Some(engine),
                Err(e) => {
                    error!(engine = %id, error = %e, "failed to start engines");
                    thread::sleep(POLL);
                }
            }
        }
        None
    }

    fn minimize_crashes(&self, crashes: Receiver<Batch>, pool: Arc<BufferPool>) {
        let mut writer = ReportWriter::new(&self.config.output_dir);
        let mut engine = self.start_engine("minimizer", &pool);

        loop {
            let batch = match crashes.recv_timeout(POLL) {
                Ok(b) => b,
                Err(crossbeam_channel::RecvTimeoutError::Timeout) if !self.cancelled() => continue,
                Err(_) => break,
            };
            let batch = match engine.as_mut() {
                Some(engine) if !self.cancelled() => match minimize(engine, &batch) {
                    Ok(min) => min,
                    Err(e) => {
                        warn!(error = %e, "minimization failed, keeping the whole batch");
                        batch
                    }
                },
                _ => batch,
            };
            self.persist(&mut writer, &batch);
        }

        // cancelled: keep what is still queued, unminimized
        for batch in crashes.try_iter() {
            self.persist(&mut writer, &batch);
        }
        debug!("minimizer stopped");
    }

    fn persist(&self, writer: &mut ReportWriter, batch: &Batch) {
        match writer.persist(batch) {
            Ok(Some(_)) => Stats::bump(&self.stats.reports),
            Ok(None) => {}
            Err(e) => error!(dir = %writer.dir().display(), error = %e, "failed to write crash report"),
        }
    }
}

/// Bisects a mismatching batch. Each half is run alone on fresh engines;
/// the search descends into the first half that still mismatches and stops
/// when neither does or one statement is left. The result always carries
/// the error of its last reproducing run.
pub fn minimize(engine: &mut DiffEngine, batch: &Batch) -> Result<Batch, EngineError> {
    let errors_only = only_check_errors(batch.kind());
    let mut current = batch.clone();

    while current.len() > 1 {
        let mid = current.len() / 2;
        let halves = [current.slice(0, mid), current.slice(mid, current.len())];

        let mut reproduced = None;
        for mut half in halves {
            if let Verdict::Mismatch(m) = engine.run_batch(&half, errors_only)? {
                half.set_err(m.to_string());
                reproduced = Some(half);
                break;
            }
        }
        match reproduced {
            Some(half) => current = half,
            // the failure needs statements from both halves
            None => break,
        }
    }

    debug!(from = batch.len(), to = current.len(), "minimized crash");
    if current.err().is_none() {
        if let Some(err) = batch.err() {
            current.set_err(err);
        }
    }
    Ok(current)
}
