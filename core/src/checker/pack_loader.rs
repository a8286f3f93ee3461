//! Test-pack loading.
//!
//! A pack is a ZIP archive named `<problem>.test` containing `in1…inN`,
//! `out1…outN` (one-based, matched counts) and a `CONFIG` whose first two
//! whitespace-separated tokens are the time limit (seconds) and the memory
//! limit (megabytes).

use std::io::Read;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use tracing::error;
use tracing::warn;

pub const PACK_EXTENSION: &str = "test";
const CONFIG_MEMBER: &str = "CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackLimits {
    pub time_limit: Duration,
    pub memory_limit_mb: u64,
}

impl Default for PackLimits {
    fn default() -> Self {
        Self {
            time_limit: Duration::from_secs(3),
            memory_limit_mb: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PackLoader {
    pack_files: Vec<PathBuf>,
}

impl PackLoader {
    /// Scan `pack_dir` for pack files, sorted by name. Problem ids index
    /// into that order.
    pub fn new(pack_dir: &Path) -> std::io::Result<Self> {
        let mut pack_files: Vec<PathBuf> = std::fs::read_dir(pack_dir)?
            .filter_map(|entry| {
                let path = entry.ok()?.path();
                if path.is_file() && path.extension().is_some_and(|ext| ext == PACK_EXTENSION) {
                    Some(path)
                } else {
                    None
                }
            })
            .collect();
        pack_files.sort();
        Ok(Self { pack_files })
    }

    pub fn pack_count(&self) -> usize {
        self.pack_files.len()
    }

    /// Load the `(input, expected output)` pairs of pack `index`. Degrades to
    /// empty byte pairs on a malformed pack so a submission still completes
    /// with a failing outcome instead of wedging the queue.
    pub fn load_tests(&self, index: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
        let Some(mut archive) = self.open(index) else {
            return vec![(Vec::new(), Vec::new())];
        };

        let has_config = archive.by_name(CONFIG_MEMBER).is_ok();
        let member_count = archive.len() - usize::from(has_config);
        let pair_count = member_count / 2;

        let mut tests = Vec::with_capacity(pair_count);
        for i in 1..=pair_count {
            let input = read_member(&mut archive, &format!("in{i}"));
            let output = read_member(&mut archive, &format!("out{i}"));
            match (input, output) {
                (Some(input), Some(output)) => tests.push((input, output)),
                _ => {
                    warn!("number of input files must match the number of output files");
                    tests.push((Vec::new(), Vec::new()));
                }
            }
        }
        tests
    }

    /// Load the limits of pack `index`; production defaults when the CONFIG
    /// member is missing or malformed.
    pub fn load_limits(&self, index: usize) -> PackLimits {
        let mut limits = PackLimits::default();
        let Some(mut archive) = self.open(index) else {
            return limits;
        };
        let Some(config) = read_member(&mut archive, CONFIG_MEMBER) else {
            warn!("config file is not present");
            return limits;
        };
        let config = String::from_utf8_lossy(&config).to_string();
        let mut tokens = config.split_whitespace();
        match (
            tokens.next().and_then(|t| t.parse::<u64>().ok()),
            tokens.next().and_then(|t| t.parse::<u64>().ok()),
        ) {
            (Some(time_limit), Some(memory_limit)) => {
                limits.time_limit = Duration::from_secs(time_limit);
                limits.memory_limit_mb = memory_limit;
            }
            _ => warn!("time or memory limit is not an integer"),
        }
        limits
    }

    fn open(&self, index: usize) -> Option<zip::ZipArchive<std::fs::File>> {
        let Some(path) = self.pack_files.get(index) else {
            warn!("given pack index {index} doesn't exist");
            return None;
        };
        let file = match std::fs::File::open(path) {
            Ok(file) => file,
            Err(err) => {
                error!("could not open pack {}: {err}", path.display());
                return None;
            }
        };
        match zip::ZipArchive::new(file) {
            Ok(archive) => Some(archive),
            Err(err) => {
                error!("could not read pack {}: {err}", path.display());
                None
            }
        }
    }
}

fn read_member(archive: &mut zip::ZipArchive<std::fs::File>, name: &str) -> Option<Vec<u8>> {
    let mut member = archive.by_name(name).ok()?;
    let mut bytes = Vec::new();
    member.read_to_end(&mut bytes).ok()?;
    Some(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn write_pack(path: &Path, members: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for (name, bytes) in members {
            writer.start_file(*name, options).unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn loads_ordered_pairs_and_limits() {
        let dir = tempfile::tempdir().unwrap();
        write_pack(
            &dir.path().join("0.test"),
            &[
                ("in1", b"1 2"),
                ("out1", b"3"),
                ("in2", b"4 5"),
                ("out2", b"9"),
                ("CONFIG", b"2 64"),
            ],
        );

        let loader = PackLoader::new(dir.path()).unwrap();
        assert_eq!(loader.pack_count(), 1);

        let tests = loader.load_tests(0);
        assert_eq!(
            tests,
            vec![
                (b"1 2".to_vec(), b"3".to_vec()),
                (b"4 5".to_vec(), b"9".to_vec()),
            ]
        );

        let limits = loader.load_limits(0);
        assert_eq!(limits.time_limit, Duration::from_secs(2));
        assert_eq!(limits.memory_limit_mb, 64);
    }

    #[test]
    fn packs_are_sorted_by_name() {
        let dir = tempfile::tempdir().unwrap();
        write_pack(&dir.path().join("b.test"), &[("in1", b"b"), ("out1", b"b")]);
        write_pack(&dir.path().join("a.test"), &[("in1", b"a"), ("out1", b"a")]);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let loader = PackLoader::new(dir.path()).unwrap();
        assert_eq!(loader.pack_count(), 2);
        assert_eq!(loader.load_tests(0)[0].0, b"a");
    }

    #[test]
    fn mismatched_counts_degrade_to_empty_pairs() {
        let dir = tempfile::tempdir().unwrap();
        write_pack(
            &dir.path().join("0.test"),
            &[("in1", b"1"), ("out1", b"1"), ("in2", b"2"), ("in3", b"3")],
        );
        let loader = PackLoader::new(dir.path()).unwrap();
        let tests = loader.load_tests(0);
        assert_eq!(tests.len(), 2);
        assert_eq!(tests[0], (b"1".to_vec(), b"1".to_vec()));
        assert_eq!(tests[1], (Vec::new(), Vec::new()));
    }

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write_pack(&dir.path().join("0.test"), &[("in1", b"1"), ("out1", b"1")]);
        let loader = PackLoader::new(dir.path()).unwrap();
        assert_eq!(loader.load_limits(0), PackLimits::default());
    }

    #[test]
    fn out_of_range_index_yields_one_empty_pair() {
        let dir = tempfile::tempdir().unwrap();
        let loader = PackLoader::new(dir.path()).unwrap();
        assert_eq!(loader.pack_count(), 0);
        assert_eq!(loader.load_tests(3), vec![(Vec::new(), Vec::new())]);
        assert_eq!(loader.load_limits(3), PackLimits::default());
    }

    #[test]
    fn malformed_config_tokens_keep_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write_pack(
            &dir.path().join("0.test"),
            &[("in1", b"1"), ("out1", b"1"), ("CONFIG", b"soon 64")],
        );
        let loader = PackLoader::new(dir.path()).unwrap();
        assert_eq!(loader.load_limits(0), PackLimits::default());
    }
}
