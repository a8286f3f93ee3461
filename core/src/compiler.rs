//! Wrapper around the external C++ compiler.
//!
//! Produces a debuggable binary (full debug info, no inlining, frame
//! pointers kept) and a bounded stderr transcript. C++ standard library
//! errors are enormous, so the transcript is cut after a configured number
//! of lines.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::error;
use tracing::trace;

use crate::config::Config;

/// `x.cpp` -> `x.out`.
pub fn target_name(filename: &str) -> String {
    match filename.strip_suffix(".cpp") {
        Some(stem) => format!("{stem}.out"),
        None => format!("{filename}.out"),
    }
}

/// Truncate a transcript to at most `max_lines` lines, suffixed with a count
/// of what was dropped.
pub fn shorten_transcript(transcript: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = transcript.split('\n').collect();
    if lines.len() <= max_lines {
        return transcript.to_string();
    }
    let mut out = String::new();
    for line in &lines[..max_lines] {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(&format!("...and {} line(s) more", lines.len() - max_lines));
    out
}

#[derive(Debug, Clone)]
pub struct Compiler {
    compiler: String,
    received_dir: PathBuf,
    debug_dir: PathBuf,
    timeout: Duration,
    max_stderr_lines: usize,
}

impl Compiler {
    pub fn new(config: &Config) -> Self {
        Self {
            compiler: "g++".to_string(),
            received_dir: config.received_dir.clone(),
            debug_dir: config.debug_dir.clone(),
            timeout: config.compilation_timeout,
            max_stderr_lines: config.max_compilation_error_message_length,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_compiler(mut self, compiler: impl Into<String>) -> Self {
        self.compiler = compiler.into();
        self
    }

    /// Compile `filename` (which must sit in the received directory) into the
    /// debug directory. Returns the binary name and the truncated stderr
    /// transcript; callers detect failure by checking whether the binary
    /// exists.
    pub async fn compile(&self, filename: &str) -> (String, String) {
        let target = target_name(filename);
        let source = self.received_dir.join(filename);
        let output = self.debug_dir.join(&target);

        let mut command = Command::new(&self.compiler);
        command
            .arg("-ggdb3")
            .arg("-O0")
            .arg(&source)
            .arg("-Wshadow")
            .arg("-Werror")
            .arg("-fno-eliminate-unused-debug-symbols")
            .arg("-fno-eliminate-unused-debug-types")
            .arg("-fvar-tracking-assignments")
            .arg("-fno-omit-frame-pointer")
            .arg("-fno-inline")
            .arg("-o")
            .arg(&output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                error!("{} compiler is not installed!", self.compiler);
                return (target, String::new());
            }
            Err(err) => {
                error!("failed to spawn {}: {err}", self.compiler);
                return (target, String::new());
            }
        };

        let stderr = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(out)) => {
                trace!("compiler exited with {:?}", out.status.code());
                String::from_utf8_lossy(&out.stderr).to_string()
            }
            Ok(Err(err)) => {
                error!("waiting for {} failed: {err}", self.compiler);
                String::new()
            }
            Err(_) => {
                // The child is killed on drop of the wait future.
                return (
                    target,
                    format!(
                        "Your program must compile under {} seconds!",
                        self.timeout.as_secs()
                    ),
                );
            }
        };

        (target, shorten_transcript(&stderr, self.max_stderr_lines))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn target_name_maps_cpp_to_out() {
        assert_eq!(target_name("main.cpp"), "main.out");
        assert_eq!(
            target_name("2b1d46f8-1f2a-4e9b-8a63-000000000000.cpp"),
            "2b1d46f8-1f2a-4e9b-8a63-000000000000.out"
        );
    }

    #[test]
    fn short_transcripts_are_untouched() {
        let transcript = "a\nb\nc";
        assert_eq!(shorten_transcript(transcript, 3), transcript);
    }

    #[test]
    fn long_transcripts_are_cut_with_a_count() {
        let transcript = (0..25).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        let shortened = shorten_transcript(&transcript, 20);
        assert!(shortened.starts_with("0\n1\n"));
        assert!(shortened.ends_with("...and 5 line(s) more"));
        assert_eq!(shortened.lines().count(), 21);
    }

    #[test]
    fn boundary_transcript_is_untouched() {
        let transcript = (0..20).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        assert_eq!(shorten_transcript(&transcript, 20), transcript);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_compiler_yields_the_timeout_message() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("fake-gxx");
        std::fs::write(&fake, "#!/bin/sh\nsleep 5\n").unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = Config {
            received_dir: dir.path().to_path_buf(),
            debug_dir: dir.path().to_path_buf(),
            compilation_timeout: Duration::from_millis(100),
            ..Config::default()
        };
        let compiler = Compiler::new(&config).with_compiler(fake.to_string_lossy().to_string());
        let (target, stderr) = compiler.compile("x.cpp").await;
        assert_eq!(target, "x.out");
        assert_eq!(stderr, "Your program must compile under 0 seconds!");
    }

    #[tokio::test]
    async fn missing_compiler_returns_empty_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            received_dir: dir.path().to_path_buf(),
            debug_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let compiler =
            Compiler::new(&config).with_compiler("definitely-not-a-real-compiler-binary");
        let (target, stderr) = compiler.compile("y.cpp").await;
        assert_eq!(target, "y.out");
        assert_eq!(stderr, "");
    }
}
