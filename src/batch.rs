//! Parallel batch migration over independent trees.
//!
//! Each file is one tree-run on a rayon worker. Workers own their trees, and
//! with them their attribute stores; the pipeline and the type oracle are the
//! only shared values and both are read-only. A failing file never affects
//! another one.

use std::fmt;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use crate::ir::document::TreeDocument;
use crate::ir::node::Tree;
use crate::ir::pipeline::{PassOutcome, Pipeline};
use crate::ir::rule::AddedFile;
use crate::ir::types::TypeOracle;

/// Cooperative cancellation flag, checked between files.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One input file with its parsed tree.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    pub path: PathBuf,
    pub tree: Tree,
}

impl SourceUnit {
    pub fn new(path: impl Into<PathBuf>, tree: Tree) -> Self {
        Self {
            path: path.into(),
            tree,
        }
    }

    /// Reads a JSON tree document. The document's own path wins over the file's.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut document = TreeDocument::from_json(&json)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        if document.path.is_none() {
            document.path = Some(path.to_path_buf());
        }
        let tree = Tree::from_document(document)?;
        Ok(SourceUnit::new(path, tree))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    Rewritten,
    Unchanged,
    /// Not started because the batch was cancelled.
    Skipped,
    Error(String),
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileStatus::Rewritten => write!(f, "rewritten"),
            FileStatus::Unchanged => write!(f, "unchanged"),
            FileStatus::Skipped => write!(f, "skipped"),
            FileStatus::Error(reason) => write!(f, "error: {}", reason),
        }
    }
}

#[derive(Debug)]
pub struct FileReport {
    pub path: PathBuf,
    pub status: FileStatus,
    /// The rewritten tree. `None` for errors and skipped files: a failed
    /// tree-run is discarded as a whole.
    pub tree: Option<Tree>,
    pub added_files: Vec<AddedFile>,
    pub passes: u32,
    pub outcome: Option<PassOutcome>,
}

impl FileReport {
    /// Report for an input that never reached the pipeline.
    pub fn failed(path: PathBuf, reason: impl Into<String>) -> Self {
        Self::without_tree(path, FileStatus::Error(reason.into()))
    }

    fn without_tree(path: PathBuf, status: FileStatus) -> Self {
        FileReport {
            path,
            status,
            tree: None,
            added_files: Vec::new(),
            passes: 0,
            outcome: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub files: Vec<FileReport>,
}

impl BatchReport {
    fn count(&self, pred: impl Fn(&FileStatus) -> bool) -> usize {
        self.files.iter().filter(|f| pred(&f.status)).count()
    }

    pub fn rewritten(&self) -> usize {
        self.count(|s| *s == FileStatus::Rewritten)
    }

    pub fn unchanged(&self) -> usize {
        self.count(|s| *s == FileStatus::Unchanged)
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| *s == FileStatus::Skipped)
    }

    pub fn errors(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::Error(_)))
    }

    pub fn has_errors(&self) -> bool {
        self.errors() > 0
    }

    /// Puts reports of inputs left out of the run back at their input
    /// positions. `failed` pairs must come in ascending index order.
    pub fn merge_failed(&mut self, failed: Vec<(usize, FileReport)>) {
        for (index, report) in failed {
            let at = index.min(self.files.len());
            self.files.insert(at, report);
        }
    }
}

/// Runs a pipeline over many trees on a dedicated rayon pool.
pub struct Batch {
    pipeline: Arc<Pipeline>,
    oracle: Arc<dyn TypeOracle>,
    pool: rayon::ThreadPool,
}

impl Batch {
    pub fn new(
        pipeline: Arc<Pipeline>,
        oracle: Arc<dyn TypeOracle>,
        workers: usize,
    ) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("rewrite-worker-{}", i))
            .build()?;
        Ok(Self {
            pipeline,
            oracle,
            pool,
        })
    }

    /// Processes every unit; reports come back in input order.
    pub fn run(&self, units: Vec<SourceUnit>, cancel: &CancellationToken) -> BatchReport {
        info!(
            "Migrating {} file(s) on {} worker(s)",
            units.len(),
            self.pool.current_num_threads()
        );
        let files: Vec<FileReport> = self.pool.install(|| {
            units
                .into_par_iter()
                .map(|unit| self.process(unit, cancel))
                .collect()
        });
        let report = BatchReport { files };
        info!(
            "Batch finished: {} rewritten, {} unchanged, {} skipped, {} error(s)",
            report.rewritten(),
            report.unchanged(),
            report.skipped(),
            report.errors()
        );
        report
    }

    /// One tree-run. All-or-nothing: on error or panic the tree is dropped.
    pub fn process(&self, unit: SourceUnit, cancel: &CancellationToken) -> FileReport {
        let SourceUnit { path, tree } = unit;
        if cancel.is_cancelled() {
            debug!("Skipping {}: batch cancelled", path.display());
            return FileReport::without_tree(path, FileStatus::Skipped);
        }

        let pipeline = &self.pipeline;
        let oracle = self.oracle.as_ref();
        let result = panic::catch_unwind(AssertUnwindSafe(|| pipeline.run_owned(tree, oracle)));

        match result {
            Ok(Ok((tree, run))) => {
                if run.outcome == PassOutcome::BoundExceeded {
                    warn!("{} did not converge within {} pass(es)", path.display(), run.passes);
                }
                let status = if run.changed() {
                    FileStatus::Rewritten
                } else {
                    FileStatus::Unchanged
                };
                debug!("{}: {}", path.display(), status);
                FileReport {
                    path,
                    status,
                    tree: Some(tree),
                    passes: run.passes,
                    outcome: Some(run.outcome),
                    added_files: run.added_files,
                }
            }
            Ok(Err(err)) => {
                error!("{}: {}", path.display(), err);
                FileReport::without_tree(path, FileStatus::Error(err.to_string()))
            }
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("{}: rewrite panicked: {}", path.display(), reason);
                FileReport::without_tree(path, FileStatus::Error(format!("panic: {}", reason)))
            }
        }
    }
}
