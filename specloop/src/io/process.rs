//! Helpers for running the agent subprocess with streamed, bounded output.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

const JOIN_POLL: Duration = Duration::from_millis(10);

/// Result of waiting for the next stdout line.
#[derive(Debug, PartialEq, Eq)]
pub enum LineRecv {
    Line(String),
    Timeout,
    /// Stdout closed; no more lines will arrive.
    Eof,
}

/// Child process whose stdout is delivered line by line over a channel.
///
/// Stdout is read on a background thread (and optionally teed to a file as
/// it arrives); stderr is drained on another thread and kept up to a byte
/// limit. On unix the child leads its own process group so a kill also
/// reaches whatever it spawned.
pub struct StreamingChild {
    child: Child,
    lines: Receiver<String>,
    stdin_handle: Option<JoinHandle<()>>,
    stdout_handle: Option<JoinHandle<Result<()>>>,
    stderr_handle: Option<JoinHandle<Result<(Vec<u8>, usize)>>>,
}

/// Spawn `cmd`, write `stdin` to it, and start streaming stdout.
#[instrument(skip_all, fields(stderr_limit_bytes, streaming = stream_path.is_some()))]
pub fn spawn_streaming(
    mut cmd: Command,
    stdin: Option<Vec<u8>>,
    stream_path: Option<&Path>,
    stderr_limit_bytes: usize,
) -> Result<StreamingChild> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let stream_file = match stream_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create stream dir {}", parent.display()))?;
            }
            let file = File::create(path)
                .with_context(|| format!("create stream file {}", path.display()))?;
            Some(BufWriter::new(file))
        }
        None => None,
    };

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    // Stdin is written on its own thread so a child that writes a lot before
    // reading its input cannot deadlock us.
    let stdin_handle = match stdin {
        Some(input) => {
            let mut child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            Some(thread::spawn(move || {
                if let Err(e) = child_stdin.write_all(&input) {
                    warn!(err = %e, "failed to write child stdin");
                }
            }))
        }
        None => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (tx, lines) = mpsc::channel();
    let stdout_handle = thread::spawn(move || forward_lines(stdout, stream_file, &tx));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, stderr_limit_bytes));

    Ok(StreamingChild {
        child,
        lines,
        stdin_handle,
        stdout_handle: Some(stdout_handle),
        stderr_handle: Some(stderr_handle),
    })
}

impl StreamingChild {
    /// Wait up to `timeout` for the next stdout line.
    pub fn recv_line(&self, timeout: Duration) -> LineRecv {
        match self.lines.recv_timeout(timeout) {
            Ok(line) => LineRecv::Line(line),
            Err(RecvTimeoutError::Timeout) => LineRecv::Timeout,
            Err(RecvTimeoutError::Disconnected) => LineRecv::Eof,
        }
    }

    /// Wait for the child to exit, up to `timeout`. `None` if still running.
    pub fn wait_exit(&mut self, timeout: Duration) -> Result<Option<ExitStatus>> {
        self.child.wait_timeout(timeout).context("wait for command")
    }

    /// Kill the child and its process group, then reap the child.
    pub fn kill(&mut self) -> Result<ExitStatus> {
        kill_process_group(&self.child);
        if let Some(status) = self.child.try_wait().context("poll command")? {
            return Ok(status);
        }
        warn!("killing child process");
        self.child.kill().context("kill command")?;
        self.child.wait().context("wait command after kill")
    }

    /// Join the reader threads and return captured stderr.
    ///
    /// Call after the child exited or was killed. A reader still blocked after
    /// `timeout` (its pipe held open by a process outside the child's group)
    /// is detached and its output dropped.
    pub fn finish(&mut self, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        if let Some(handle) = self.stdin_handle.take() {
            match join_within(handle, deadline) {
                Some(Ok(())) => {}
                Some(Err(_)) => warn!("stdin writer thread panicked"),
                None => warn!("stdin writer still blocked, detaching"),
            }
        }
        if let Some(handle) = self.stdout_handle.take() {
            match join_within(handle, deadline) {
                Some(Ok(result)) => result.context("stream stdout")?,
                Some(Err(_)) => return Err(anyhow!("stdout reader thread panicked")),
                None => warn!("stdout still held open after exit, detaching reader"),
            }
        }
        let Some(handle) = self.stderr_handle.take() else {
            return Ok(String::new());
        };
        let (stderr, truncated) = match join_within(handle, deadline) {
            Some(Ok(result)) => result.context("join stderr")?,
            Some(Err(_)) => return Err(anyhow!("stderr reader thread panicked")),
            None => {
                warn!("stderr still held open after exit, detaching reader");
                return Ok(String::new());
            }
        };
        let mut text = String::from_utf8_lossy(&stderr).into_owned();
        if truncated > 0 {
            warn!(truncated, "stderr truncated");
            text.push_str(&format!("\n[stderr truncated {truncated} bytes]\n"));
        }
        Ok(text)
    }
}

impl Drop for StreamingChild {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            kill_process_group(&self.child);
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// `None` when the thread is still running at `deadline`.
fn join_within<T>(handle: JoinHandle<T>, deadline: Instant) -> Option<thread::Result<T>> {
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(JOIN_POLL);
    }
    Some(handle.join())
}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(pgid) = i32::try_from(child.id()) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        debug!(err = %e, "process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

/// Send each stdout line over `tx`, teeing raw bytes to `stream_file`.
///
/// A closed receiver stops forwarding but keeps draining the pipe.
fn forward_lines<R: Read>(
    reader: R,
    mut stream_file: Option<BufWriter<File>>,
    tx: &mpsc::Sender<String>,
) -> Result<()> {
    let mut reader = BufReader::new(reader);
    let mut receiver_open = true;
    loop {
        let mut line = Vec::new();
        let n = reader.read_until(b'\n', &mut line).context("read line")?;
        if n == 0 {
            break;
        }

        if let Some(writer) = stream_file.as_mut() {
            // Flush per line so the stream file can be tailed live.
            if let Err(e) = writer.write_all(&line).and_then(|()| writer.flush()) {
                warn!(err = %e, "failed to write to stream file");
            }
        }

        if receiver_open {
            let text = String::from_utf8_lossy(&line).trim_end().to_string();
            receiver_open = tx.send(text).is_ok();
        }
    }
    Ok(())
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn streams_lines_and_tees_to_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let stream_path = temp.path().join("stream.jsonl");
        let mut child = spawn_streaming(
            sh("cat; echo done; echo oops >&2"),
            Some(b"first\n".to_vec()),
            Some(&stream_path),
            1024,
        )
        .expect("spawn");

        let mut lines = Vec::new();
        loop {
            match child.recv_line(Duration::from_secs(10)) {
                LineRecv::Line(line) => lines.push(line),
                LineRecv::Eof => break,
                LineRecv::Timeout => panic!("timed out waiting for output"),
            }
        }
        let status = child
            .wait_exit(Duration::from_secs(10))
            .expect("wait")
            .expect("exited");
        let stderr = child.finish(Duration::from_secs(10)).expect("finish");

        assert!(status.success());
        assert_eq!(lines, vec!["first", "done"]);
        assert_eq!(stderr, "oops\n");
        assert_eq!(
            std::fs::read_to_string(&stream_path).expect("read stream"),
            "first\ndone\n"
        );
    }

    #[test]
    fn kill_stops_a_silent_child() {
        let mut child = spawn_streaming(sh("exec sleep 30"), None, None, 1024).expect("spawn");
        assert_eq!(
            child.recv_line(Duration::from_millis(50)),
            LineRecv::Timeout
        );
        let status = child.kill().expect("kill");
        assert!(!status.success());
        assert_eq!(child.recv_line(Duration::from_secs(5)), LineRecv::Eof);
    }

    #[test]
    fn kill_reaches_grandchild_holding_stdout() {
        let mut child =
            spawn_streaming(sh("sleep 30; true"), None, None, 1024).expect("spawn");
        assert_eq!(
            child.recv_line(Duration::from_millis(50)),
            LineRecv::Timeout
        );

        let started = Instant::now();
        child.kill().expect("kill");
        assert_eq!(child.recv_line(Duration::from_secs(5)), LineRecv::Eof);
        child.finish(Duration::from_secs(5)).expect("finish");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn finish_detaches_readers_of_pipes_held_open() {
        let mut child =
            spawn_streaming(sh("(sleep 3; true) & exit 0"), None, None, 1024).expect("spawn");
        let status = child
            .wait_exit(Duration::from_secs(10))
            .expect("wait")
            .expect("exited");
        assert!(status.success());

        let started = Instant::now();
        let stderr = child.finish(Duration::from_millis(200)).expect("finish");
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(stderr.is_empty());
    }

    #[test]
    fn stderr_is_bounded() {
        let mut child =
            spawn_streaming(sh("printf 'abcdefghij' >&2"), None, None, 4).expect("spawn");
        child.wait_exit(Duration::from_secs(10)).expect("wait");
        let stderr = child.finish(Duration::from_secs(10)).expect("finish");
        assert!(stderr.starts_with("abcd"));
        assert!(stderr.contains("truncated 6 bytes"));
    }
}
