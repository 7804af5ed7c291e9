//! Process handles - spawn, drain and reap one child process per job
//!
//! Output pipes are never read synchronously. Each poll pulls whatever is
//! already buffered so a chatty child cannot stall on a full pipe, and keeps
//! only the last few lines for failure reports.

use super::job::Job;
use crate::error::SpawnError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::poll_fn;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

/// Lines of output kept per stream
pub const TAIL_LINES: usize = 20;

const DRAIN_CHUNK: usize = 8 * 1024;
const MAX_CHUNKS_PER_DRAIN: usize = 64;

/// How long to wait for EOF on a pipe once its process has exited. A
/// background grandchild can keep the pipe open indefinitely.
const EXIT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Shell used to interpret composite commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shell {
    pub program: PathBuf,
    pub flag: String,
}

impl Default for Shell {
    fn default() -> Self {
        Self {
            program: PathBuf::from("/bin/sh"),
            flag: "-c".to_string(),
        }
    }
}

impl Shell {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }
}

/// Result of a non-blocking status query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    Exited(i32),
}

/// Creates processes for jobs
pub trait Launcher {
    /// Start `job`. On failure the job is returned inside the error.
    fn launch(&self, job: Job) -> Result<ProcessHandle, SpawnError>;
}

impl<L: Launcher + ?Sized> Launcher for &L {
    fn launch(&self, job: Job) -> Result<ProcessHandle, SpawnError> {
        (**self).launch(job)
    }
}

/// Runs each job as `<shell> -c <composite command>`
#[derive(Debug, Clone, Default)]
pub struct ShellLauncher {
    shell: Shell,
}

impl ShellLauncher {
    pub fn new(shell: Shell) -> Self {
        Self { shell }
    }

    pub fn shell(&self) -> &Shell {
        &self.shell
    }
}

impl Launcher for ShellLauncher {
    fn launch(&self, job: Job) -> Result<ProcessHandle, SpawnError> {
        ProcessHandle::spawn(job, &self.shell)
    }
}

/// Bounded tail of a child's output stream
#[derive(Debug, Clone, Default)]
pub struct OutputTail {
    lines: VecDeque<String>,
    partial: Vec<u8>,
    bytes: u64,
}

impl OutputTail {
    pub fn push(&mut self, chunk: &[u8]) {
        self.bytes += chunk.len() as u64;
        self.partial.extend_from_slice(chunk);

        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            self.push_line(&line[..line.len() - 1]);
        }

        // A single huge line must not grow without bound either
        if self.partial.len() > DRAIN_CHUNK {
            let line = std::mem::take(&mut self.partial);
            self.push_line(&line);
        }
    }

    /// Flush an unterminated last line
    pub fn finish(&mut self) {
        if !self.partial.is_empty() {
            let line = std::mem::take(&mut self.partial);
            self.push_line(&line);
        }
    }

    fn push_line(&mut self, raw: &[u8]) {
        let line = String::from_utf8_lossy(raw).trim_end().to_string();
        self.lines.push_back(line);
        if self.lines.len() > TAIL_LINES {
            self.lines.pop_front();
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    /// Total bytes seen on this stream
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

/// Exclusive owner of one live child process and its pipes
#[derive(Debug)]
pub struct ProcessHandle {
    job: Job,
    pid: Option<u32>,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    stdout_tail: OutputTail,
    stderr_tail: OutputTail,
    started_at: DateTime<Utc>,
    exit_code: Option<i32>,
    released: bool,
}

impl ProcessHandle {
    /// Spawn the job's composite command through `shell`
    pub fn spawn(job: Job, shell: &Shell) -> Result<Self, SpawnError> {
        let command = job.command().render();
        log::debug!("Spawning {}: {}", job, command);

        let spawned = Command::new(&shell.program)
            .arg(&shell.flag)
            .arg(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(source) => return Err(SpawnError { job, source }),
        };

        Ok(Self {
            pid: child.id(),
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
            child: Some(child),
            job,
            stdout_tail: OutputTail::default(),
            stderr_tail: OutputTail::default(),
            started_at: Utc::now(),
            exit_code: None,
            released: false,
        })
    }

    /// Drain pending output and check, without blocking, whether the
    /// process has exited.
    ///
    /// After exit the status is cached, so repeated polls keep returning it.
    /// Polling a handle released before its process exited is an error.
    pub async fn poll(&mut self) -> io::Result<ProcessStatus> {
        if let Some(code) = self.exit_code {
            return Ok(ProcessStatus::Exited(code));
        }

        let status = match self.child.as_mut() {
            Some(child) => {
                drain(&mut self.stdout, &mut self.stdout_tail, &self.job, "stdout").await;
                drain(&mut self.stderr, &mut self.stderr_tail, &self.job, "stderr").await;
                child.try_wait()?
            }
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("process handle for {} already released", self.job),
                ))
            }
        };

        match status {
            Some(status) => {
                // Output written just before exit may not have been
                // signalled to the reactor yet, so wait for EOF
                drain_to_eof(&mut self.stdout, &mut self.stdout_tail, &self.job, "stdout").await;
                drain_to_eof(&mut self.stderr, &mut self.stderr_tail, &self.job, "stderr").await;

                let code = exit_code(status);
                self.exit_code = Some(code);
                Ok(ProcessStatus::Exited(code))
            }
            None => Ok(ProcessStatus::Running),
        }
    }

    /// Close the pipes and give up the child. Safe to call more than once.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        self.stdout = None;
        self.stderr = None;
        self.stdout_tail.finish();
        self.stderr_tail.finish();

        if let Some(mut child) = self.child.take() {
            if self.exit_code.is_none() {
                match child.try_wait() {
                    Ok(Some(status)) => self.exit_code = Some(exit_code(status)),
                    // tokio reaps orphaned children in the background
                    _ => log::warn!(
                        "Released {} while process {:?} is still running",
                        self.job,
                        self.pid
                    ),
                }
            }
        }

        log::debug!("Released process handle for {}", self.job);
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn stdout_tail(&self) -> &OutputTail {
        &self.stdout_tail
    }

    pub fn stderr_tail(&self) -> &OutputTail {
        &self.stderr_tail
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Read whatever `stream` has buffered right now. Closes the stream on EOF
/// or on a read error.
async fn drain<R>(stream: &mut Option<R>, tail: &mut OutputTail, job: &Job, name: &str)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = stream.as_mut() else {
        return;
    };

    let result = poll_fn(|cx| Poll::Ready(read_available(Pin::new(&mut *reader), cx, &mut *tail))).await;

    match result {
        Ok(false) => {}
        Ok(true) => *stream = None,
        Err(e) => {
            log::debug!("Closing {} of {} after read error: {}", name, job, e);
            *stream = None;
        }
    }
}

/// Read `stream` until EOF or [`EXIT_DRAIN_TIMEOUT`], then close it
async fn drain_to_eof<R>(stream: &mut Option<R>, tail: &mut OutputTail, job: &Job, name: &str)
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = stream.take() else {
        return;
    };

    let mut buf = vec![0u8; DRAIN_CHUNK];
    let read_all = async {
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => return Ok(()),
                Ok(n) => tail.push(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    };

    match tokio::time::timeout(EXIT_DRAIN_TIMEOUT, read_all).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::debug!("Closing {} of {} after read error: {}", name, job, e),
        Err(_) => log::debug!("{} of {} still open after exit, closing it", name, job),
    }
}

/// Returns `Ok(true)` once the stream reached EOF
fn read_available<R>(mut reader: Pin<&mut R>, cx: &mut Context<'_>, tail: &mut OutputTail) -> io::Result<bool>
where
    R: AsyncRead,
{
    let mut buf = [0u8; DRAIN_CHUNK];

    for _ in 0..MAX_CHUNKS_PER_DRAIN {
        let mut read_buf = ReadBuf::new(&mut buf);
        match reader.as_mut().poll_read(cx, &mut read_buf) {
            Poll::Ready(Ok(())) if read_buf.filled().is_empty() => return Ok(true),
            Poll::Ready(Ok(())) => tail.push(read_buf.filled()),
            Poll::Ready(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
            Poll::Ready(Err(e)) => return Err(e),
            Poll::Pending => return Ok(false),
        }
    }

    Ok(false)
}

/// Exit code of a finished process. Signals map to `128 + signal` the way
/// shells report them.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}
