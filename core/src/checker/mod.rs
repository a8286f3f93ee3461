//! The batch checker: a single-consumer queue feeding a
//! compile–build–run–compare pipeline with per-test resource caps.

pub mod outcome;
pub mod pack_loader;

pub use outcome::CheckOutcome;
pub use pack_loader::PackLimits;
pub use pack_loader::PackLoader;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::compiler::Compiler;
use crate::config::Config;
use crate::docker::DockerManager;
use crate::docker::DockerStatus;

const QUEUE_CAPACITY: usize = 64;

#[expect(clippy::unwrap_used)]
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Collapse whitespace runs to single spaces and trim the ends.
pub fn normalize_ws(s: &str) -> String {
    WHITESPACE_RE.replace_all(s, " ").trim().to_string()
}

/// Compare a program's output to the expected bytes under whitespace
/// normalisation.
pub fn outputs_match(actual: &[u8], expected: &[u8]) -> bool {
    normalize_ws(&String::from_utf8_lossy(actual)) == normalize_ws(&String::from_utf8_lossy(expected))
}

/// Callback invoked with the finished outcome of a queued submission.
pub type OnChecked = Box<dyn FnOnce(CheckOutcome) + Send + 'static>;

struct CheckJob {
    filename: String,
    problem_id: usize,
    token: String,
    on_done: OnChecked,
}

/// Handle to the checker queue. Jobs run one at a time on a dedicated
/// consumer task.
pub struct Checker {
    tx: mpsc::Sender<CheckJob>,
    pipeline: Arc<CheckPipeline>,
}

impl Checker {
    pub fn spawn(config: &Config, pack_loader: PackLoader) -> Self {
        let pipeline = Arc::new(CheckPipeline {
            compiler: Compiler::new(config),
            docker: DockerManager::new(config),
            pack_loader,
            received_dir: config.received_dir.clone(),
            debug_dir: config.debug_dir.clone(),
        });
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        tokio::spawn(consume(pipeline.clone(), rx));
        Self { tx, pipeline }
    }

    pub fn pack_count(&self) -> usize {
        self.pipeline.pack_loader.pack_count()
    }

    /// Enqueue a submission. Returns `false` when the queue is gone or full.
    pub async fn push_check(
        &self,
        filename: impl Into<String>,
        problem_id: usize,
        token: impl Into<String>,
        on_done: OnChecked,
    ) -> bool {
        self.tx
            .send(CheckJob {
                filename: filename.into(),
                problem_id,
                token: token.into(),
                on_done,
            })
            .await
            .is_ok()
    }
}

async fn consume(pipeline: Arc<CheckPipeline>, mut rx: mpsc::Receiver<CheckJob>) {
    while let Some(job) = rx.recv().await {
        debug!(
            "checking submission {} against problem {}",
            job.token, job.problem_id
        );
        let outcome = pipeline.check(&job.filename, job.problem_id).await;
        (job.on_done)(outcome);

        let (status, transcript) = pipeline.docker.prune_images().await;
        trace!("docker image prune: {status:?} {transcript}");

        // The submission source is removed here so every exit path of
        // `check` (including early returns) is covered.
        let _ = tokio::fs::remove_file(pipeline.received_dir.join(&job.filename)).await;
    }
    debug!("checker queue closed");
}

struct CheckPipeline {
    compiler: Compiler,
    docker: DockerManager,
    pack_loader: PackLoader,
    received_dir: PathBuf,
    debug_dir: PathBuf,
}

impl CheckPipeline {
    async fn check(&self, filename: &str, problem_id: usize) -> CheckOutcome {
        let mut result = CheckOutcome::default();

        if problem_id >= self.pack_loader.pack_count() {
            // The pack disappeared between submit-time validation and now.
            result.invalid_problem_id = true;
            return result;
        }

        let (binary, _stderr) = self.compiler.compile(filename).await;
        let binary_path = self.debug_dir.join(&binary);
        if !tokio::fs::try_exists(&binary_path).await.unwrap_or(false) {
            return CheckOutcome::compilation_error();
        }

        debug!("building checker image");
        let (status, transcript) = self.docker.build_for_checker(&binary).await;
        trace!("docker build for checker: {status:?} {transcript}");
        if status != DockerStatus::Success {
            warn!("checker image build failed: {status:?}");
            let _ = tokio::fs::remove_file(&binary_path).await;
            return result;
        }

        let tests = self.pack_loader.load_tests(problem_id);
        let limits = self.pack_loader.load_limits(problem_id);
        let total = tests.len();
        let mut passed = 0usize;

        for (input, expected) in &tests {
            let (status, stdout) = self
                .docker
                .run_for_checker(input, limits.time_limit, limits.memory_limit_mb)
                .await;

            match status {
                DockerStatus::Timeout => result.time_limit_exceeded = true,
                DockerStatus::MemoryLimitExceeded => result.memory_limit_exceeded = true,
                _ => (),
            }

            if status == DockerStatus::Success && outputs_match(&stdout, expected) {
                passed += 1;
            } else {
                result.first_failed = String::from_utf8_lossy(input).to_string();
                break;
            }
        }

        let _ = tokio::fs::remove_file(&binary_path).await;
        if total > 0 {
            result.percentage = (passed as f64 / total as f64) * 100.0;
        }
        result
    }
}
