//! Sandbox manager: container images and locked-down container runs.
//!
//! The container runtime is driven through the `docker` command-line tool.
//! Debugger containers get a PTY-supervised gdb entrypoint; checker
//! containers run the submitted binary against test input under time and
//! memory caps.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;
use tracing::trace;
use tracing::warn;
use uuid::Uuid;

use crate::config::Config;
use crate::pty::SupervisedStream;

pub const DEBUG_IMAGE_NAME: &str = "gdbox_debugger";
pub const CHECKER_IMAGE_NAME: &str = "gdbox_checker";

/// Name of the generated image recipe inside the debug directory.
pub const DOCKERFILE_NAME: &str = "dockerfile";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DockerStatus {
    Success,
    /// The image build itself failed.
    DockerBuildError,
    /// The docker binary is missing or the manager could not stage files.
    InternalDockerManagerError,
    /// A checker run exceeded its wall clock.
    Timeout,
    /// A checker run was OOM-killed.
    MemoryLimitExceeded,
    /// The program inside the container exited abnormally.
    RuntimeError,
}

#[derive(Debug, Clone)]
pub struct DockerManager {
    debug_dir: PathBuf,
    gdb_printers_dir: PathBuf,
    cpu_limit: f64,
    expect_timeout: Duration,
}

impl DockerManager {
    pub fn new(config: &Config) -> Self {
        Self {
            debug_dir: config.debug_dir.clone(),
            gdb_printers_dir: config.gdb_printers_dir.clone(),
            cpu_limit: config.debugger_cpu_limit,
            expect_timeout: config.debugger_timeout,
        }
    }

    /// Build the per-session debugger image: alpine + gdb + pretty-printers
    /// + the compiled binary as `/app/a.out` + the session stdin file as
    /// `/app/input.txt`, all owned by a non-root user.
    pub async fn build_for_debugger(
        &self,
        binary_name: &str,
        stdin_file_name: &str,
    ) -> (DockerStatus, String) {
        let printers_src = self.gdb_printers_dir.join("printers.py");
        let printers_dst = self.debug_dir.join("printers.py");
        if let Err(err) = tokio::fs::copy(&printers_src, &printers_dst).await {
            warn!("could not stage pretty-printer script: {err}");
            return (DockerStatus::InternalDockerManagerError, String::new());
        }

        let recipe = debugger_dockerfile(binary_name, stdin_file_name);
        if let Err(err) = tokio::fs::write(self.debug_dir.join(DOCKERFILE_NAME), recipe).await {
            warn!("could not write image recipe: {err}");
            return (DockerStatus::InternalDockerManagerError, String::new());
        }

        self.build_image(DEBUG_IMAGE_NAME).await
    }

    /// Build the checker image: the compiled binary as the entrypoint,
    /// nothing else.
    pub async fn build_for_checker(&self, binary_name: &str) -> (DockerStatus, String) {
        let recipe = checker_dockerfile(binary_name);
        if let Err(err) = tokio::fs::write(self.debug_dir.join(DOCKERFILE_NAME), recipe).await {
            warn!("could not write image recipe: {err}");
            return (DockerStatus::InternalDockerManagerError, String::new());
        }

        self.build_image(CHECKER_IMAGE_NAME).await
    }

    async fn build_image(&self, tag: &str) -> (DockerStatus, String) {
        let output = Command::new("docker")
            .arg("build")
            .arg("-f")
            .arg(self.debug_dir.join(DOCKERFILE_NAME))
            .arg("-t")
            .arg(tag)
            .arg(&self.debug_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        match output {
            Ok(out) => {
                let mut transcript = String::from_utf8_lossy(&out.stdout).to_string();
                transcript.push_str(&String::from_utf8_lossy(&out.stderr));
                if out.status.success() {
                    debug!("docker build {tag}: ok");
                    (DockerStatus::Success, transcript)
                } else {
                    warn!("docker build {tag} failed");
                    (DockerStatus::DockerBuildError, transcript)
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!("docker is not installed");
                (DockerStatus::InternalDockerManagerError, String::new())
            }
            Err(err) => {
                warn!("docker build {tag} could not be spawned: {err}");
                (DockerStatus::InternalDockerManagerError, String::new())
            }
        }
    }

    /// Launch the debugger container on a supervised PTY. The entrypoint is
    /// gdb on `/app/a.out` in machine-interface mode.
    pub fn run_for_debugger(
        &self,
        container_name: &str,
        memory_limit_mb: u64,
    ) -> crate::error::Result<SupervisedStream> {
        let args = debugger_run_args(container_name, self.cpu_limit, memory_limit_mb);
        trace!("docker {}", args.join(" "));
        SupervisedStream::spawn("docker", &args, self.expect_timeout)
    }

    /// Run the checker container with `input` on stdin under a wall clock
    /// and memory cap. Returns the captured stdout.
    pub async fn run_for_checker(
        &self,
        input: &[u8],
        time_limit: Duration,
        memory_limit_mb: u64,
    ) -> (DockerStatus, Vec<u8>) {
        let container_name = Uuid::new_v4().to_string();
        let args = checker_run_args(&container_name, memory_limit_mb);

        let mut child = match Command::new("docker")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                warn!("docker run could not be spawned: {err}");
                return (DockerStatus::InternalDockerManagerError, Vec::new());
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(input).await;
            // Dropping stdin closes the pipe so the program sees EOF.
        }

        match tokio::time::timeout(time_limit, child.wait_with_output()).await {
            Ok(Ok(out)) => {
                if out.status.success() {
                    (DockerStatus::Success, out.stdout)
                } else if out.status.code() == Some(137) {
                    // 128 + SIGKILL: the cgroup OOM killer.
                    (DockerStatus::MemoryLimitExceeded, out.stdout)
                } else {
                    (DockerStatus::RuntimeError, out.stdout)
                }
            }
            Ok(Err(err)) => {
                warn!("waiting for checker container failed: {err}");
                (DockerStatus::RuntimeError, Vec::new())
            }
            Err(_) => {
                self.stop_container(&container_name).await;
                (DockerStatus::Timeout, Vec::new())
            }
        }
    }

    /// Kill a container by name. Idempotent: a missing container is fine.
    pub async fn stop_container(&self, container_name: &str) {
        if container_name.is_empty() {
            return;
        }
        let result = Command::new("docker")
            .arg("kill")
            .arg(container_name)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        trace!("docker kill {container_name}: {result:?}");
    }

    /// Remove dangling images left behind by checker builds.
    pub async fn prune_images(&self) -> (DockerStatus, String) {
        let output = Command::new("docker")
            .arg("image")
            .arg("prune")
            .arg("-f")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await;
        match output {
            Ok(out) => (
                DockerStatus::Success,
                String::from_utf8_lossy(&out.stdout).to_string(),
            ),
            Err(err) => {
                warn!("docker image prune failed: {err}");
                (DockerStatus::InternalDockerManagerError, String::new())
            }
        }
    }
}

fn debugger_dockerfile(binary_name: &str, stdin_file_name: &str) -> String {
    [
        "# Generated image recipe; rebuilt for every debug session.",
        "FROM alpine:latest",
        "RUN apk add --no-cache gdb",
        "RUN mkdir /app",
        "RUN addgroup -S appgroup && adduser -S appuser -G appgroup",
        "RUN mkdir -p /usr/share/gcc/python/libstdcxx/v6/",
        "COPY ./printers.py /usr/share/gcc/python/libstdcxx/v6/printers.py",
        &format!("COPY {binary_name} /app/a.out"),
        &format!("COPY {stdin_file_name} /app/input.txt"),
        "RUN chown appuser:appgroup /app/a.out /app/input.txt",
        "RUN chmod 500 /app/a.out",
        "RUN chmod 400 /app/input.txt",
        "USER appuser",
    ]
    .join("\n")
}

fn checker_dockerfile(binary_name: &str) -> String {
    [
        "# Generated image recipe; rebuilt for every checker submission.",
        "FROM alpine:latest",
        "RUN mkdir /app",
        "RUN addgroup -S appgroup && adduser -S appuser -G appgroup",
        &format!("COPY {binary_name} /app/a.out"),
        "RUN chown appuser:appgroup /app/a.out",
        "RUN chmod 500 /app/a.out",
        "USER appuser",
        "CMD [\"/app/a.out\"]",
    ]
    .join("\n")
}

/// `docker run` argv for a debugger session: every capability dropped except
/// ptrace, seccomp relaxed so gdb can trace, read-only rootfs with a small
/// writable /tmp, bounded cpu share, strict memory cap (no extra swap), no
/// network.
pub(crate) fn debugger_run_args(
    container_name: &str,
    cpu_limit: f64,
    memory_limit_mb: u64,
) -> Vec<String> {
    vec![
        "run".to_string(),
        "--rm".to_string(),
        "--cap-drop=ALL".to_string(),
        "--cap-add=SYS_PTRACE".to_string(),
        "--security-opt".to_string(),
        "seccomp=unconfined".to_string(),
        "--read-only".to_string(),
        "--tmpfs".to_string(),
        "/tmp:rw,size=64m".to_string(),
        format!("--cpus={cpu_limit}"),
        "--memory".to_string(),
        format!("{memory_limit_mb}m"),
        "--memory-swap".to_string(),
        format!("{memory_limit_mb}m"),
        "--network=none".to_string(),
        "--name".to_string(),
        container_name.to_string(),
        "-i".to_string(),
        DEBUG_IMAGE_NAME.to_string(),
        "gdb".to_string(),
        "/app/a.out".to_string(),
        "--interpreter=mi3".to_string(),
    ]
}

pub(crate) fn checker_run_args(container_name: &str, memory_limit_mb: u64) -> Vec<String> {
    vec![
        "run".to_string(),
        "--rm".to_string(),
        "--cap-drop=ALL".to_string(),
        "--read-only".to_string(),
        "--tmpfs".to_string(),
        "/tmp:rw,size=64m".to_string(),
        "--cpus=1".to_string(),
        "--memory".to_string(),
        format!("{memory_limit_mb}m"),
        "--memory-swap".to_string(),
        format!("{memory_limit_mb}m"),
        "--network=none".to_string(),
        "--name".to_string(),
        container_name.to_string(),
        "-i".to_string(),
        CHECKER_IMAGE_NAME.to_string(),
    ]
}
