//! Supervised interactive stream over a pseudo-terminal.
//!
//! The debugger subprocess (docker + gdb) is spawned onto a native PTY. A
//! blocking reader thread appends everything the process writes to a shared
//! buffer, a writer task applies `send_line` bytes, and a wait task flips the
//! liveness flag when the child exits. `expect` synchronizes on any of a set
//! of needles under a bounded deadline.

use std::io::ErrorKind;
use std::io::Read;
use std::io::Write;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use portable_pty::ChildKiller;
use portable_pty::CommandBuilder;
use portable_pty::PtySize;
use portable_pty::native_pty_system;
use tokio::sync::Notify;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio::time::timeout;
use tracing::trace;

use crate::error::GdboxErr;
use crate::error::Result;

/// Outcome of one [`SupervisedStream::expect`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expect {
    /// One of the needles appeared. `index` is its position in the needle
    /// slice, `before` everything read up to the match.
    Match { index: usize, before: String },
    /// The deadline expired; `before` holds whatever had been read.
    Timeout { before: String },
    /// The process exited before any needle appeared.
    Eof { before: String },
}

impl Expect {
    pub fn before(&self) -> &str {
        match self {
            Expect::Match { before, .. }
            | Expect::Timeout { before }
            | Expect::Eof { before } => before,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, Expect::Match { .. })
    }

    pub fn timed_out(&self) -> bool {
        matches!(self, Expect::Timeout { .. })
    }
}

struct Shared {
    buf: StdMutex<String>,
    notify: Notify,
    alive: AtomicBool,
    /// Set when a match was consumed before its line terminator arrived; the
    /// next scan drops the rest of that line first.
    skip_partial_line: AtomicBool,
}

pub struct SupervisedStream {
    shared: Arc<Shared>,
    writer_tx: mpsc::Sender<Vec<u8>>,
    killer: StdMutex<Box<dyn ChildKiller + Send + Sync>>,
    expect_timeout: Duration,
}

impl SupervisedStream {
    /// Spawn `program args…` onto a fresh PTY and start the supervision
    /// tasks.
    pub fn spawn(program: &str, args: &[String], expect_timeout: Duration) -> Result<Self> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| std::io::Error::other(err.to_string()))?;

        let mut command_builder = CommandBuilder::new(program);
        for arg in args {
            command_builder.arg(arg);
        }

        let mut child = pair
            .slave
            .spawn_command(command_builder)
            .map_err(|err| std::io::Error::other(err.to_string()))?;
        // Killer that can signal the process independently of `.wait()`.
        let killer = child.clone_killer();

        let shared = Arc::new(Shared {
            buf: StdMutex::new(String::new()),
            notify: Notify::new(),
            alive: AtomicBool::new(true),
            skip_partial_line: AtomicBool::new(false),
        });

        // Reader thread: drain the PTY into the shared buffer.
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|err| std::io::Error::other(err.to_string()))?;
        let reader_shared = shared.clone();
        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break, // EOF
                    Ok(n) => {
                        let chunk = String::from_utf8_lossy(&buf[..n]).to_string();
                        if let Ok(mut shared_buf) = reader_shared.buf.lock() {
                            shared_buf.push_str(&chunk);
                        }
                        // notify_one stores a permit when nobody is waiting,
                        // so a chunk arriving between a buffer scan and the
                        // wait cannot be missed.
                        reader_shared.notify.notify_one();
                    }
                    Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                        // We're on a blocking thread; back off briefly and retry.
                        std::thread::sleep(Duration::from_millis(5));
                        continue;
                    }
                    Err(_) => break,
                }
            }
        });

        // Writer task: apply send_line bytes to the PTY writer.
        let (writer_tx, mut writer_rx) = mpsc::channel::<Vec<u8>>(128);
        let writer = pair
            .master
            .take_writer()
            .map_err(|err| std::io::Error::other(err.to_string()))?;
        let writer = Arc::new(StdMutex::new(writer));
        tokio::spawn({
            let writer = writer.clone();
            async move {
                while let Some(bytes) = writer_rx.recv().await {
                    let writer = writer.clone();
                    let _ = tokio::task::spawn_blocking(move || {
                        if let Ok(mut guard) = writer.lock() {
                            let _ = guard.write_all(&bytes);
                            let _ = guard.flush();
                        }
                    })
                    .await;
                }
            }
        });

        // Wait task: flip the liveness flag once the child exits.
        let wait_shared = shared.clone();
        tokio::task::spawn_blocking(move || {
            let status = child.wait();
            trace!("supervised child exited: {status:?}");
            wait_shared.alive.store(false, Ordering::SeqCst);
            wait_shared.notify.notify_one();
        });

        Ok(Self {
            shared,
            writer_tx,
            killer: StdMutex::new(killer),
            expect_timeout,
        })
    }

    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    /// Queue one line (newline appended) for the process's stdin.
    pub async fn send_line(&self, line: &str) -> Result<()> {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        self.writer_tx
            .send(bytes)
            .await
            .map_err(|_| GdboxErr::StreamClosed)
    }

    /// Wait until any needle appears in the stream, the child exits, or the
    /// configured deadline passes. The buffer is consumed through the end of
    /// the line containing the match (a record's tail never leaks into the
    /// next capture); later lines stay queued for the next call.
    pub async fn expect(&self, needles: &[&str]) -> Expect {
        let deadline = Instant::now() + self.expect_timeout;
        loop {
            if let Some(found) = self.scan(needles) {
                return found;
            }
            if !self.is_alive() {
                return Expect::Eof {
                    before: self.drain(),
                };
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || timeout(remaining, self.shared.notify.notified()).await.is_err()
            {
                return Expect::Timeout {
                    before: self.drain(),
                };
            }
        }
    }

    pub async fn expect_exact(&self, needle: &str) -> Expect {
        self.expect(&[needle]).await
    }

    /// Force-close the stream: signal the child and mark it dead. Idempotent.
    pub fn close(&self) {
        if let Ok(mut killer) = self.killer.lock() {
            let _ = killer.kill();
        }
        self.shared.alive.store(false, Ordering::SeqCst);
        self.shared.notify.notify_one();
    }

    /// Earliest match across all needles; ties go to the lower needle index.
    fn scan(&self, needles: &[&str]) -> Option<Expect> {
        let Ok(mut buf) = self.shared.buf.lock() else {
            return None;
        };

        // Finish dropping a record line whose tail had not arrived when its
        // match was consumed.
        if self.shared.skip_partial_line.load(Ordering::SeqCst) {
            match buf.find('\n') {
                Some(nl) => {
                    *buf = buf[nl + 1..].to_string();
                    self.shared.skip_partial_line.store(false, Ordering::SeqCst);
                }
                None => {
                    buf.clear();
                    return None;
                }
            }
        }

        let mut best: Option<(usize, usize, usize)> = None; // (pos, index, len)
        for (index, needle) in needles.iter().enumerate() {
            if needle.is_empty() {
                continue;
            }
            if let Some(pos) = buf.find(needle) {
                let better = match best {
                    Some((best_pos, ..)) => pos < best_pos,
                    None => true,
                };
                if better {
                    best = Some((pos, index, needle.len()));
                }
            }
        }
        let (pos, index, len) = best?;
        let before = buf[..pos].to_string();
        // Consume through the end of the matched line so a result record's
        // tail (e.g. `,bkpt={…}` after `^done`) never leaks into the next
        // capture.
        let match_end = pos + len;
        match buf[match_end..].find('\n') {
            Some(rel) => {
                *buf = buf[match_end + rel + 1..].to_string();
            }
            None => {
                buf.clear();
                self.shared.skip_partial_line.store(true, Ordering::SeqCst);
            }
        }
        Some(Expect::Match { index, before })
    }

    fn drain(&self) -> String {
        match self.shared.buf.lock() {
            Ok(mut buf) => std::mem::take(&mut *buf),
            Err(_) => String::new(),
        }
    }
}

impl Drop for SupervisedStream {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn restricted_pty(err: &GdboxErr) -> bool {
        // PTY allocation may be denied in some sandboxes; skip in that case.
        let text = err.to_string();
        text.contains("openpty") || text.contains("Operation not permitted")
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn echoes_lines_back_through_the_pty() {
        let stream = match SupervisedStream::spawn(
            "/bin/cat",
            &[],
            Duration::from_secs(3),
        ) {
            Ok(stream) => stream,
            Err(err) if restricted_pty(&err) => return,
            Err(err) => panic!("spawn failed: {err}"),
        };

        stream.send_line("hello supervised world").await.unwrap();
        let result = stream.expect(&["supervised"]).await;
        assert!(result.is_match(), "expected a match, got {result:?}");
        stream.close();
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn expect_times_out_when_nothing_matches() {
        let stream = match SupervisedStream::spawn(
            "/bin/cat",
            &[],
            Duration::from_millis(200),
        ) {
            Ok(stream) => stream,
            Err(err) if restricted_pty(&err) => return,
            Err(err) => panic!("spawn failed: {err}"),
        };

        let result = stream.expect(&["never going to show up"]).await;
        assert!(result.timed_out(), "expected a timeout, got {result:?}");
        stream.close();
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_marks_the_stream_dead() {
        let stream = match SupervisedStream::spawn(
            "/bin/cat",
            &[],
            Duration::from_millis(200),
        ) {
            Ok(stream) => stream,
            Err(err) if restricted_pty(&err) => return,
            Err(err) => panic!("spawn failed: {err}"),
        };

        assert!(stream.is_alive());
        stream.close();
        assert!(!stream.is_alive());
    }
}
