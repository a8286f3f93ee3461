use std::io;

use thiserror::Error;
use tokio::task::JoinError;

pub type Result<T> = std::result::Result<T, GdboxErr>;

#[derive(Error, Debug)]
pub enum SandboxErr {
    /// `docker build` failed; the payload is the builder transcript.
    #[error("sandbox image build failed: {0}")]
    Build(String),

    /// The container died or could not be started.
    #[error("sandbox runtime error: {0}")]
    Runtime(String),

    /// The container exceeded its wall-clock cap.
    #[error("container run timed out")]
    Timeout,
}

#[derive(Error, Debug)]
pub enum GdboxErr {
    /// The compiler exited without producing a binary. The stderr transcript
    /// travels separately (see [`crate::compiler::Compiler::compile`]); this
    /// variant only signals the absence of the artefact.
    #[error("compilation produced no binary")]
    Compilation,

    /// Compilation exceeded the configured wall clock.
    #[error("compilation timed out after {0} seconds")]
    CompilationTimeout(u64),

    /// The supervised debugger stream did not produce an expected terminator
    /// within the configured deadline. Forces session teardown.
    #[error("timed out waiting for the debugger")]
    DebuggerTimeout,

    /// The supervised debugger stream is gone (process exited or was killed).
    #[error("debugger stream closed")]
    StreamClosed,

    /// A debugger response did not match the extraction contract. Never fatal
    /// for a session: callers degrade to `supported = false` variables.
    #[error("could not parse debugger output: {0}")]
    ProtocolParse(String),

    /// Missing or ill-typed fields in a client event.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown session token, or the session has already been stopped.
    #[error("invalid authorization (or process might have been stopped)")]
    InvalidAuthorization,

    /// Sandbox error
    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxErr),

    // -----------------------------------------------------------------
    // Automatic conversions for common external error types
    // -----------------------------------------------------------------
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    TokioJoin(#[from] JoinError),
}
