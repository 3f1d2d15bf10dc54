//! [`Bridge`] implementation driving the `adb` command-line tool.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::task::{ready, Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader, ReadBuf};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, CoreResult};
use crate::fs::backend::{ByteReader, ByteWriter, DirEntries, ProgressFn};
use crate::fs::entry::DirEntry;
use crate::remote::shell::{parse_stat_line, quote, quote_path, STAT_FORMAT};
use crate::remote::{Bridge, ConnectionState};

/// How often a running push or pull is sampled for progress.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Talks to one device through `adb`.
#[derive(Debug, Clone)]
pub struct AdbBridge {
    program: PathBuf,
    serial: Option<String>,
    poll_interval: Duration,
}

impl AdbBridge {
    /// Creates a bridge running `program` (usually just `adb`).
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            serial: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Targets a specific device when several are attached.
    pub fn with_serial(mut self, serial: Option<String>) -> Self {
        self.serial = serial;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, err: io::Error) -> CoreError {
        if err.kind() == io::ErrorKind::NotFound {
            CoreError::BackendUnavailable(format!("{} not found", self.program.display()))
        } else {
            CoreError::Io(err)
        }
    }

    fn spawn(&self, mut cmd: Command) -> CoreResult<Child> {
        cmd.spawn().map_err(|e| self.spawn_error(e))
    }

    async fn stat_path(&self, path: &Path) -> CoreResult<DirEntry> {
        let cmd = format!("stat -c {} {}", quote(STAT_FORMAT), quote_path(path));
        let out = self
            .shell(&cmd, &CancellationToken::new())
            .await
            .map_err(|e| classify(e, path))?;
        let line = out
            .lines()
            .next()
            .ok_or_else(|| CoreError::Parse(format!("empty stat output for {}", path.display())))?;
        parse_stat_line(line)
    }

    async fn remote_size(&self, path: &Path) -> Option<u64> {
        let cmd = format!("stat -c %s {}", quote_path(path));
        let out = self.shell(&cmd, &CancellationToken::new()).await.ok()?;
        out.trim().parse().ok()
    }

    /// Waits for a transfer child, sampling `sample` for progress meanwhile.
    async fn watch_transfer<F, Fut>(
        &self,
        mut child: Child,
        progress: ProgressFn<'_>,
        cancel: &CancellationToken,
        sample: F,
    ) -> CoreResult<()>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Option<u64>> + Send,
    {
        let stderr = collect_stderr(&mut child);
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let status = loop {
            tokio::select! {
                biased;
                // Dropping `child` kills the transfer.
                _ = cancel.cancelled() => return Err(CoreError::Cancelled),
                status = child.wait() => break status?,
                _ = ticker.tick() => {
                    if let Some(bytes) = sample().await {
                        progress(bytes);
                    }
                }
            }
        };

        if status.success() {
            return Ok(());
        }
        let message = stderr.await.unwrap_or_default();
        Err(CoreError::Shell(failure_message(&message, status)))
    }
}

/// Reads a child's stderr on its own task so a chatty child never stalls on
/// a full pipe while its stdout is still being consumed.
fn collect_stderr(child: &mut Child) -> JoinHandle<String> {
    let stderr = child.stderr.take();
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn failure_message(output: &str, status: ExitStatus) -> String {
    let output = output.trim();
    if output.is_empty() {
        format!("exited with {status}")
    } else {
        output.to_string()
    }
}

/// Parses the result of `adb get-state`.
fn parse_state(success: bool, stdout: &str, stderr: &str) -> ConnectionState {
    if success && stdout.trim() == "device" {
        ConnectionState::Online
    } else if stdout.contains("unauthorized") || stderr.contains("unauthorized") {
        ConnectionState::Unauthorized
    } else {
        ConnectionState::Absent
    }
}

/// Maps a failed remote command on `path` to the closest error variant.
fn classify(err: CoreError, path: &Path) -> CoreError {
    let CoreError::Shell(message) = &err else {
        return err;
    };
    if message.contains("No such file or directory") {
        CoreError::NotFound(path.to_path_buf())
    } else if message.contains("Permission denied") {
        CoreError::PermissionDenied(path.to_path_buf())
    } else if message.contains("Not a directory") {
        CoreError::NotADirectory(path.to_path_buf())
    } else {
        err
    }
}

/// Rebinds a listing line produced relative to `dir` onto `dir`.
fn listing_entry(dir: &Path, line: &str) -> CoreResult<DirEntry> {
    let entry = parse_stat_line(line)?;
    Ok(DirEntry::from_remote(
        dir.join(entry.name()),
        entry.name().to_string(),
        entry.kind(),
        entry.size(),
        entry.modified(),
        entry.mode(),
    ))
}

#[async_trait]
impl Bridge for AdbBridge {
    async fn connection_state(&self) -> ConnectionState {
        let mut cmd = self.command();
        cmd.arg("get-state");
        match cmd.output().await {
            Ok(output) => parse_state(
                output.status.success(),
                &String::from_utf8_lossy(&output.stdout),
                &String::from_utf8_lossy(&output.stderr),
            ),
            Err(e) => {
                tracing::warn!(program = %self.program.display(), "adb get-state failed: {e}");
                ConnectionState::Absent
            }
        }
    }

    async fn stat(&self, path: &Path) -> CoreResult<DirEntry> {
        self.stat_path(path).await
    }

    async fn list(&self, path: &Path) -> CoreResult<DirEntries> {
        let script = format!(
            "cd {} && find . -mindepth 1 -maxdepth 1 -exec stat -c {} {{}} +",
            quote_path(path),
            quote(STAT_FORMAT)
        );
        let mut cmd = self.command();
        cmd.arg("shell")
            .arg(script)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = self.spawn(cmd)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CoreError::Shell("adb shell has no stdout".to_string()))?;
        let stderr = collect_stderr(&mut child);

        let (tx, listing) = DirEntries::channel();
        let dir = path.to_path_buf();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut sent = 0usize;
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => match listing_entry(&dir, &line) {
                        Ok(entry) => {
                            if tx.send(Ok(entry)).await.is_err() {
                                return;
                            }
                            sent += 1;
                        }
                        Err(e) => tracing::debug!(dir = %dir.display(), "skipping line: {e}"),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(CoreError::Io(e))).await;
                        return;
                    }
                }
            }

            match child.wait().await {
                Ok(status) if !status.success() => {
                    let message = failure_message(&stderr.await.unwrap_or_default(), status);
                    if sent == 0 {
                        let _ = tx.send(Err(classify(CoreError::Shell(message), &dir))).await;
                    } else {
                        tracing::warn!(dir = %dir.display(), "partial listing: {message}");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    let _ = tx.send(Err(CoreError::Io(e))).await;
                }
            }
        });
        Ok(listing)
    }

    async fn open_read(&self, path: &Path) -> CoreResult<ByteReader> {
        let mut cmd = self.command();
        cmd.arg("exec-out")
            .arg(format!("cat {}", quote_path(path)))
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        let mut child = self.spawn(cmd)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CoreError::Shell("adb exec-out has no stdout".to_string()))?;
        Ok(Box::new(ChildReader {
            _child: child,
            stdout,
        }))
    }

    async fn open_write(&self, path: &Path, mode: u32) -> CoreResult<ByteWriter> {
        let target = quote_path(path);
        let mut cmd = self.command();
        cmd.arg("exec-in")
            .arg(format!(
                "cat > {target} && chmod {:04o} {target}",
                mode & 0o7777
            ))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let mut child = self.spawn(cmd)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CoreError::Shell("adb exec-in has no stdin".to_string()))?;

        let (tx, done) = oneshot::channel();
        tokio::spawn(async move {
            let _ = tx.send(child.wait().await);
        });
        Ok(Box::new(ChildWriter {
            stdin: Some(stdin),
            done,
            finished: false,
        }))
    }

    async fn shell(&self, cmd: &str, cancel: &CancellationToken) -> CoreResult<String> {
        let mut command = self.command();
        command
            .arg("shell")
            .arg(cmd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let child = self.spawn(command)?;

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CoreError::Cancelled),
            output = child.wait_with_output() => output?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message: &str = if stderr.trim().is_empty() {
            &stdout
        } else {
            &stderr
        };
        Err(CoreError::Shell(failure_message(message, output.status)))
    }

    async fn push(
        &self,
        local: &Path,
        remote: &Path,
        progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> CoreResult<()> {
        let total = tokio::fs::metadata(local)
            .await
            .map_err(|e| CoreError::from_io(e, local))?
            .len();
        let mut cmd = self.command();
        cmd.arg("push")
            .arg(local)
            .arg(remote)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        let child = self.spawn(cmd)?;

        self.watch_transfer(child, progress, cancel, || self.remote_size(remote))
            .await?;
        progress(total);
        Ok(())
    }

    async fn pull(
        &self,
        remote: &Path,
        local: &Path,
        progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> CoreResult<()> {
        let mut cmd = self.command();
        cmd.arg("pull")
            .arg(remote)
            .arg(local)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        let child = self.spawn(cmd)?;

        let local_size = || async move { tokio::fs::metadata(local).await.ok().map(|m| m.len()) };
        self.watch_transfer(child, progress, cancel, local_size).await?;
        if let Some(bytes) = local_size().await {
            progress(bytes);
        }
        Ok(())
    }
}

/// Keeps the `adb` child alive for as long as its output is being read.
struct ChildReader {
    _child: Child,
    stdout: ChildStdout,
}

impl AsyncRead for ChildReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stdout).poll_read(cx, buf)
    }
}

/// Feeds an `adb exec-in` child; shutdown waits for the remote side to finish.
struct ChildWriter {
    stdin: Option<ChildStdin>,
    done: oneshot::Receiver<io::Result<ExitStatus>>,
    finished: bool,
}

impl AsyncWrite for ChildWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().stdin.as_mut() {
            Some(stdin) => Pin::new(stdin).poll_write(cx, buf),
            None => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "remote writer already closed",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().stdin.as_mut() {
            Some(stdin) => Pin::new(stdin).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Some(stdin) = this.stdin.as_mut() {
            ready!(Pin::new(stdin).poll_shutdown(cx))?;
            // Closing the pipe is what ends the remote `cat`.
            this.stdin = None;
        }
        if this.finished {
            return Poll::Ready(Ok(()));
        }
        let result = ready!(Pin::new(&mut this.done).poll(cx));
        this.finished = true;
        match result {
            Ok(Ok(status)) if status.success() => Poll::Ready(Ok(())),
            Ok(Ok(status)) => Poll::Ready(Err(io::Error::other(format!(
                "remote write exited with {status}"
            )))),
            Ok(Err(e)) => Poll::Ready(Err(e)),
            Err(_) => Poll::Ready(Err(io::Error::other("remote writer vanished"))),
        }
    }
}
