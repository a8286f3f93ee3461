use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

pub const CONFIG_TOML_FILE: &str = "gdbox.toml";

/// Application configuration loaded from disk and merged with defaults.
///
/// Every field has a production default, so a missing `gdbox.toml` yields a
/// fully working configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Address the HTTP/WebSocket server binds to.
    pub ip: String,
    pub port: u16,

    /// Directory for received source files (`<token>.cpp`).
    pub received_dir: PathBuf,

    /// Directory for debug artefacts: compiled binaries, per-session stdin
    /// files and the generated image recipe.
    pub debug_dir: PathBuf,

    /// Directory holding `printers.py`, the libstdc++ pretty-printer script
    /// copied into every debugger image.
    pub gdb_printers_dir: PathBuf,

    /// Directory scanned for `*.test` packs.
    pub pack_dir: PathBuf,

    /// Secret used by the transport layer.
    pub secret_key: String,

    /// A session that has not been pinged for this long is reaped.
    pub receive_debug_ping_time: Duration,

    /// Janitor sweep interval.
    pub cleaning_unused_dbg_processes_time: Duration,

    /// Result-registry sweep interval.
    pub cleaning_results_time: Duration,

    /// TTL of an unread checker outcome.
    pub receive_submission_time: Duration,

    pub debugger_memory_limit_mb: u64,

    /// Fraction of one CPU a debugger container may use.
    pub debugger_cpu_limit: f64,

    /// Deadline for a single `expect` on the supervised debugger stream.
    pub debugger_timeout: Duration,

    /// Wall clock for one compiler invocation.
    pub compilation_timeout: Duration,

    /// Compilation stderr is truncated to this many lines.
    pub max_compilation_error_message_length: usize,
}

impl Config {
    /// Load `gdbox.toml` from `dir` if present; otherwise return defaults.
    pub fn load(dir: &Path) -> std::io::Result<Self> {
        let path = dir.join(CONFIG_TOML_FILE);
        let toml: ConfigToml = match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).map_err(std::io::Error::other)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => ConfigToml::default(),
            Err(err) => return Err(err),
        };
        Ok(toml.into())
    }
}

impl Default for Config {
    fn default() -> Self {
        ConfigToml::default().into()
    }
}

/// On-disk representation: every key optional so partial files work.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigToml {
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub received_dir: Option<PathBuf>,
    pub debug_dir: Option<PathBuf>,
    pub gdb_printers_dir: Option<PathBuf>,
    pub pack_dir: Option<PathBuf>,
    pub secret_key: Option<String>,
    pub receive_debug_ping_time: Option<u64>,
    pub cleaning_unused_dbg_processes_time: Option<u64>,
    pub cleaning_results_time: Option<u64>,
    pub receive_submission_time: Option<u64>,
    pub debugger_memory_limit_mb: Option<u64>,
    pub debugger_cpu_limit: Option<f64>,
    pub debugger_timeout: Option<u64>,
    pub compilation_timeout: Option<u64>,
    pub max_compilation_error_message_length: Option<usize>,
}

impl From<ConfigToml> for Config {
    fn from(t: ConfigToml) -> Self {
        Self {
            ip: t.ip.unwrap_or_else(|| "127.0.0.1".to_string()),
            port: t.port.unwrap_or(5000),
            received_dir: t.received_dir.unwrap_or_else(|| PathBuf::from("./received")),
            // Debug artefacts share the received directory so the source
            // paths recorded in debug info match the `info variables` file
            // sections the extractor scans.
            debug_dir: t.debug_dir.unwrap_or_else(|| PathBuf::from("./received")),
            gdb_printers_dir: t
                .gdb_printers_dir
                .unwrap_or_else(|| PathBuf::from("./gdb_printer")),
            pack_dir: t.pack_dir.unwrap_or_else(|| PathBuf::from("./tests")),
            secret_key: t.secret_key.unwrap_or_default(),
            receive_debug_ping_time: Duration::from_secs(t.receive_debug_ping_time.unwrap_or(15)),
            cleaning_unused_dbg_processes_time: Duration::from_secs(
                t.cleaning_unused_dbg_processes_time.unwrap_or(1),
            ),
            cleaning_results_time: Duration::from_secs(t.cleaning_results_time.unwrap_or(10)),
            receive_submission_time: Duration::from_secs(t.receive_submission_time.unwrap_or(120)),
            debugger_memory_limit_mb: t.debugger_memory_limit_mb.unwrap_or(128),
            debugger_cpu_limit: t.debugger_cpu_limit.unwrap_or(0.3),
            debugger_timeout: Duration::from_secs(t.debugger_timeout.unwrap_or(5)),
            compilation_timeout: Duration::from_secs(t.compilation_timeout.unwrap_or(8)),
            max_compilation_error_message_length: t
                .max_compilation_error_message_length
                .unwrap_or(20),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_when_no_file_present() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.port, 5000);
        assert_eq!(config.receive_debug_ping_time, Duration::from_secs(15));
        assert_eq!(config.debugger_memory_limit_mb, 128);
    }

    #[test]
    fn partial_file_overrides_only_named_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_TOML_FILE),
            r#"
port = 8080
debugger_timeout = 2
"#,
        )
        .unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.debugger_timeout, Duration::from_secs(2));
        assert_eq!(config.ip, "127.0.0.1");
        assert_eq!(config.max_compilation_error_message_length, 20);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_TOML_FILE), "port = \"not a number\"").unwrap();
        assert!(Config::load(dir.path()).is_err());
    }
}
