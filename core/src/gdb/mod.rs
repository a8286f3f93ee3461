//! The debugger adapter: owns one interactive gdb subprocess inside a
//! sandbox container and turns client commands into structured snapshots.
//!
//! Lifecycle: compile the submitted source, write the per-session stdin
//! file, build the sandbox image, launch gdb in machine-interface mode on a
//! supervised PTY, feed it an init batch, then serve motion commands until
//! the program exits, the client stops, or the janitor reaps the session.

pub mod mi;
pub mod parse;

use std::path::PathBuf;

use tracing::debug;
use tracing::trace;
use tracing::warn;
use uuid::Uuid;

use crate::compiler::Compiler;
use crate::config::Config;
use crate::docker::DockerManager;
use crate::docker::DockerStatus;
use crate::error::GdboxErr;
use crate::error::Result;
use crate::protocol::Snapshot;
use crate::protocol::Variable;
use crate::pty::Expect;
use crate::pty::SupervisedStream;

const GDB_PROMPT: &str = "(gdb)";

/// Advisory emitted when gdb reports that no inferior is running.
const NOT_RUNNING_ADVISORY: &str = "The program being debugged is not being run.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    New,
    Compiling,
    BuildingImage,
    Launching,
    Running,
    Stopped,
}

/// Result of [`GdbAdapter::init`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    Started,
    /// The compiler produced no binary; payload is the truncated stderr.
    CompileFailed(String),
    /// The image build failed; payload is the builder transcript.
    BuildFailed(String),
}

/// How the debugged program looks after a motion command.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PostMove {
    Running,
    NotRunning,
    Exited,
    Signal(String),
}

pub struct GdbAdapter {
    token: String,
    received_dir: PathBuf,
    debug_dir: PathBuf,
    memory_limit_mb: u64,
    compiler: Compiler,
    docker: DockerManager,
    state: AdapterState,
    source_file_name: String,
    compiled_file_name: String,
    container_name: String,
    stdin_file_name: String,
    stream: Option<SupervisedStream>,
    /// Bytes of `/tmp/output` already reported in earlier snapshots.
    stdout_seen: usize,
}

impl GdbAdapter {
    pub fn new(config: &Config, token: &str) -> Self {
        let container_name = Uuid::new_v4().to_string();
        Self {
            token: token.to_string(),
            received_dir: config.received_dir.clone(),
            debug_dir: config.debug_dir.clone(),
            memory_limit_mb: config.debugger_memory_limit_mb,
            compiler: Compiler::new(config),
            docker: DockerManager::new(config),
            state: AdapterState::New,
            source_file_name: format!("{token}.cpp"),
            compiled_file_name: String::new(),
            stdin_file_name: format!("input_{container_name}.txt"),
            container_name,
            stream: None,
            stdout_seen: 0,
        }
    }

    pub fn state(&self) -> AdapterState {
        self.state
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// `None` when no debugger process was ever launched.
    pub fn stream_alive(&self) -> Option<bool> {
        self.stream.as_ref().map(SupervisedStream::is_alive)
    }

    /// Compile, stage stdin, build the sandbox image, launch gdb and run the
    /// init batch. Callable exactly once, from `New`.
    pub async fn init(&mut self, input: &str) -> Result<InitOutcome> {
        if self.state != AdapterState::New {
            return Err(GdboxErr::InvalidRequest(
                "session was already started".to_string(),
            ));
        }

        self.state = AdapterState::Compiling;
        debug!("compiling for debugging");
        let (out_name, stderr) = self.compiler.compile(&self.source_file_name).await;
        if !tokio::fs::try_exists(self.debug_dir.join(&out_name))
            .await
            .unwrap_or(false)
        {
            return Ok(InitOutcome::CompileFailed(stderr));
        }
        self.compiled_file_name = out_name;

        tokio::fs::write(self.debug_dir.join(&self.stdin_file_name), input).await?;

        self.state = AdapterState::BuildingImage;
        debug!("building sandbox image");
        let (status, transcript) = self
            .docker
            .build_for_debugger(&self.compiled_file_name, &self.stdin_file_name)
            .await;
        trace!("docker build for debugger: {status:?}");
        if status != DockerStatus::Success {
            warn!("image build failed: {status:?}");
            return Ok(InitOutcome::BuildFailed(transcript));
        }

        self.state = AdapterState::Launching;
        let stream = self
            .docker
            .run_for_debugger(&self.container_name, self.memory_limit_mb)?;
        let prompt = stream.expect_exact(GDB_PROMPT).await;
        if prompt.is_match() {
            debug!("debugger started");
        } else {
            warn!("debugger prompt never appeared");
        }
        self.stream = Some(stream);

        let init_batch = [
            "set confirm off",
            "set debuginfod enabled off",
            "python",
            "import sys",
            "sys.path.insert(0, '/usr/share/gcc/python/')",
            "from libstdcxx.v6.printers import register_libstdcxx_printers",
            "register_libstdcxx_printers(None)",
            "end",
            "skip -gfi /usr/include/*",
            "break main",
            "run < /app/input.txt > /tmp/output",
        ]
        .join("\n");
        if let Some(stream) = &self.stream {
            stream.send_line(&init_batch).await?;
            let started = stream.expect_exact("^running").await;
            if !started.is_match() {
                warn!("debugger did not acknowledge the init batch");
            }
        }

        self.state = AdapterState::Running;
        Ok(InitOutcome::Started)
    }

    pub async fn run(&mut self, adds: &[u32], removes: &[u32]) -> Result<Snapshot> {
        self.motion("run", adds, removes).await
    }

    pub async fn continue_(&mut self, adds: &[u32], removes: &[u32]) -> Result<Snapshot> {
        self.motion("continue", adds, removes).await
    }

    pub async fn step(&mut self, adds: &[u32], removes: &[u32]) -> Result<Snapshot> {
        self.motion("step", adds, removes).await
    }

    pub async fn finish(&mut self, adds: &[u32], removes: &[u32]) -> Result<Snapshot> {
        self.motion("finish", adds, removes).await
    }

    /// Apply breakpoint deltas, issue the motion command, then derive the
    /// post-move snapshot. A debugger timeout or a vanished stream yields the
    /// timeout snapshot and tears the session down.
    async fn motion(&mut self, command: &str, adds: &[u32], removes: &[u32]) -> Result<Snapshot> {
        if self.state != AdapterState::Running {
            return Err(GdboxErr::InvalidAuthorization);
        }
        match self.drive(command, adds, removes).await {
            Ok(snapshot) => Ok(snapshot),
            Err(GdboxErr::DebuggerTimeout) | Err(GdboxErr::StreamClosed) => {
                warn!("debugger stopped answering, tearing the session down");
                self.stop().await;
                Ok(Snapshot::timed_out())
            }
            Err(err) => Err(err),
        }
    }

    async fn drive(&mut self, command: &str, adds: &[u32], removes: &[u32]) -> Result<Snapshot> {
        // Adds strictly before removes, so a re-arm on the same line sticks.
        for line in adds {
            self.command(&format!("break {line}")).await?;
        }
        for line in removes {
            self.command(&format!("clear {line}")).await?;
        }

        let moved = self.command(command).await?;
        let info = self.command("info program").await?;
        let motion_console = mi::console_text(&moved);
        let info_console = mi::console_text(&info);

        match classify_post_move(&motion_console, &info_console) {
            PostMove::Exited => {
                let mut snapshot = Snapshot::exited();
                snapshot.stdout = self.collect_stdout().await.unwrap_or_default();
                self.stop().await;
                Ok(snapshot)
            }
            PostMove::Signal(details) => {
                let mut snapshot = Snapshot::runtime_error(details);
                snapshot.stdout = self.collect_stdout().await.unwrap_or_default();
                self.stop().await;
                Ok(snapshot)
            }
            PostMove::NotRunning => Ok(Snapshot {
                message: Some(NOT_RUNNING_ADVISORY.to_string()),
                ..Snapshot::default()
            }),
            PostMove::Running => self.build_snapshot().await,
        }
    }

    /// Send one command line and capture the records up to its terminator.
    async fn command(&mut self, line: &str) -> Result<Vec<mi::MiRecord>> {
        let stream = self.stream.as_ref().ok_or(GdboxErr::StreamClosed)?;
        trace!("-> {line}");
        stream.send_line(line).await?;
        let terminators: Vec<&str> = mi::TERMINATORS.to_vec();
        match stream.expect(&terminators).await {
            Expect::Match { before, .. } => Ok(mi::parse_records(&before)),
            Expect::Timeout { .. } => Err(GdboxErr::DebuggerTimeout),
            Expect::Eof { .. } => Err(GdboxErr::StreamClosed),
        }
    }

    /// Full snapshot: frame, return type, arguments, locals, globals and the
    /// fresh program output.
    async fn build_snapshot(&mut self) -> Result<Snapshot> {
        let mut snapshot = Snapshot::default();

        let frame = self.command("frame").await?;
        if let Some((function, line)) = parse::parse_frame(&mi::console_text(&frame)) {
            snapshot.function = function;
            snapshot.line = line;
        }

        if !snapshot.function.is_empty() {
            let whatis = self
                .command(&format!("whatis {}", snapshot.function))
                .await?;
            snapshot.function_return_type =
                parse::parse_return_type(&mi::console_text(&whatis)).unwrap_or_default();
        }

        snapshot.arguments = self.reported_variables("info args", "No arguments.").await?;
        snapshot.local_variables = self.reported_variables("info locals", "No locals.").await?;
        snapshot.global_variables = self.global_variables().await?;
        snapshot.stdout = self.collect_stdout().await?;

        Ok(snapshot)
    }

    /// Variables as listed by `info args` / `info locals`.
    async fn reported_variables(&mut self, command: &str, sentinel: &str) -> Result<Vec<Variable>> {
        let records = self.command(command).await?;
        let console = mi::console_text(&records);
        if console.trim() == sentinel {
            return Ok(Vec::new());
        }
        let mut variables = Vec::new();
        for name in parse::parse_reported_names(&console) {
            variables.push(self.variable_named(&name).await?);
        }
        Ok(variables)
    }

    /// One variable by name: value from `p`, type from `whatis`, dimensions
    /// from the type suffix. Any parse miss degrades to `supported = false`.
    async fn variable_named(&mut self, name: &str) -> Result<Variable> {
        let printed = self.command(&format!("p {name}")).await?;
        let value = parse::parse_value(&mi::console_text(&printed));
        let whatis = self.command(&format!("whatis {name}")).await?;
        let ty = parse::parse_declared_type(&mi::console_text(&whatis));
        match (value, ty) {
            (Some(value), Some(ty)) => {
                let dimensions = parse::parse_dimensions(&ty);
                Ok(Variable {
                    supported: true,
                    name: name.to_string(),
                    ty: parse::normalize_pointers(&ty).trim().to_string(),
                    value,
                    dimensions,
                })
            }
            _ => Ok(Variable::unsupported()),
        }
    }

    /// Globals from the session's own file section of `info variables`.
    async fn global_variables(&mut self) -> Result<Vec<Variable>> {
        let records = self.command("info variables").await?;
        let console = mi::console_text(&records);
        let prefix = self.debug_dir.to_string_lossy().to_string();
        let mut variables = Vec::new();
        for declaration in parse::parse_global_declarations(&console, &prefix) {
            match parse::parse_declaration(&declaration) {
                Some((ty, name, dimensions)) => {
                    let printed = self.command(&format!("p {name}")).await?;
                    match parse::parse_value(&mi::console_text(&printed)) {
                        Some(value) => variables.push(Variable {
                            supported: true,
                            name,
                            ty,
                            value,
                            dimensions,
                        }),
                        None => variables.push(Variable::unsupported()),
                    }
                }
                None => variables.push(Variable::unsupported()),
            }
        }
        Ok(variables)
    }

    /// Program output accumulated in `/tmp/output`, minus what earlier
    /// snapshots already reported.
    async fn collect_stdout(&mut self) -> Result<String> {
        let records = self.command("shell cat /tmp/output").await?;
        let full = mi::output_text(&records);
        let fresh = full.get(self.stdout_seen..).unwrap_or_default().to_string();
        self.stdout_seen = full.len();
        Ok(fresh)
    }

    /// Remove session files, close the supervised stream, kill the
    /// container. Idempotent; every teardown path funnels through here.
    pub async fn stop(&mut self) {
        if self.state == AdapterState::Stopped {
            return;
        }
        debug!("stopping container {}", self.container_name);
        self.state = AdapterState::Stopped;

        if !self.compiled_file_name.is_empty() {
            let _ = tokio::fs::remove_file(self.debug_dir.join(&self.compiled_file_name)).await;
            self.compiled_file_name.clear();
        }
        let _ = tokio::fs::remove_file(self.received_dir.join(&self.source_file_name)).await;
        let _ = tokio::fs::remove_file(self.debug_dir.join(&self.stdin_file_name)).await;

        if let Some(stream) = self.stream.take() {
            stream.close();
        }
        self.docker.stop_container(&self.container_name).await;
    }
}

/// Classify the console output around a motion command.
fn classify_post_move(motion_console: &str, info_console: &str) -> PostMove {
    let combined = format!("{motion_console}{info_console}");
    if combined.contains("exited normally") {
        return PostMove::Exited;
    }
    if let Some(details) = extract_signal(&combined) {
        return PostMove::Signal(details);
    }
    if info_console.contains(NOT_RUNNING_ADVISORY) {
        return PostMove::NotRunning;
    }
    PostMove::Running
}

/// `… received signal SIGSEGV, Segmentation fault.` -> `SIGSEGV, Segmentation fault`
fn extract_signal(console: &str) -> Option<String> {
    let start = console.find("received signal ")?;
    let rest = &console[start + "received signal ".len()..];
    let line = rest.lines().next().unwrap_or(rest);
    Some(line.trim().trim_end_matches('.').to_string())
}
