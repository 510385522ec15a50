use crate::error::AppError;
use crate::supervisor::log_buffer::{LogBuffer, LogStream};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio as StdProcessStdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command as TokioCommand};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// How long the exit watcher waits for the readers to drain once the child is gone.
/// A grandchild that inherited the pipes could otherwise hold them open forever.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on waiting for the exit report after a forced kill.
const KILL_CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest single log entry; longer output without a newline is split.
pub const MAX_LINE_BYTES: usize = 16 * 1024;

/// How a child process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    pub code: Option<i32>,
    /// Terminating signal number on Unix.
    pub signal: Option<i32>,
    pub exited_at: Instant,
}

impl ExitReport {
    fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
            exited_at: Instant::now(),
        }
    }

    /// The child could not be waited on, or its watcher went away.
    fn unknown() -> Self {
        Self {
            code: None,
            signal: None,
            exited_at: Instant::now(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Turns a command line into a shell invocation.
#[derive(Debug, Clone)]
pub struct ShellLauncher {
    shell: String,
    shell_args: Vec<String>,
    extra_path: Vec<PathBuf>,
}

impl ShellLauncher {
    pub fn new(shell: &str, login: bool, extra_path: Vec<PathBuf>) -> Self {
        let lower = shell.to_lowercase();
        let shell_args = if lower.contains("powershell") || lower.contains("pwsh") {
            vec!["-Command".to_string()]
        } else if lower.ends_with("cmd") || lower.ends_with("cmd.exe") {
            vec!["/C".to_string()]
        } else if login {
            vec!["-l".to_string(), "-c".to_string()]
        } else {
            vec!["-c".to_string()]
        };

        Self {
            shell: shell.to_string(),
            shell_args,
            extra_path,
        }
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    fn build(&self, working_directory: &str, command_line: &str) -> TokioCommand {
        let mut command = TokioCommand::new(&self.shell);
        command.args(&self.shell_args).arg(command_line);
        command.current_dir(working_directory);

        if !self.extra_path.is_empty() {
            let current = std::env::var_os("PATH").unwrap_or_default();
            let joined = std::env::join_paths(
                self.extra_path
                    .iter()
                    .cloned()
                    .chain(std::env::split_paths(&current)),
            );
            match joined {
                Ok(path) => {
                    command.env("PATH", path);
                }
                Err(e) => warn!(error = %e, "Ignoring EXTRA_PATH entries that cannot join into PATH"),
            }
        }

        command.stdin(StdProcessStdio::null());
        command.stdout(StdProcessStdio::piped());
        command.stderr(StdProcessStdio::piped());
        command.kill_on_drop(true);

        // Own process group, so a stop reaches whatever the shell started.
        #[cfg(unix)]
        command.process_group(0);

        command
    }

    /// Spawns `command_line` in `working_directory`, streaming output into `logs`.
    ///
    /// Must be called from within a Tokio runtime: the output readers and the
    /// exit watcher are spawned as tasks.
    pub fn spawn(
        &self,
        terminal_id: &str,
        working_directory: &str,
        command_line: &str,
        logs: Arc<LogBuffer>,
    ) -> Result<ProcessHandle, AppError> {
        debug!(id = %terminal_id, shell = %self.shell, cwd = %working_directory, command = %command_line, "Spawning command");

        let mut child = self
            .build(working_directory, command_line)
            .spawn()
            .map_err(|e| {
                error!(id = %terminal_id, error = %e, command = %command_line, "Failed to spawn command");
                AppError::Spawn(format!(
                    "'{}' in {}: {}",
                    command_line, working_directory, e
                ))
            })?;

        let started_at = Instant::now();
        let started_at_wall = Utc::now();
        let pid = child
            .id()
            .ok_or_else(|| AppError::Spawn("process exited before its pid was observed".into()))?;

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(terminal_id, stdout, LogStream::Stdout, logs.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(terminal_id, stderr, LogStream::Stderr, logs));
        }

        let (exited_tx, exited_rx) = watch::channel(None);
        let (settled_tx, settled_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = mpsc::channel(1);
        tokio::spawn(watch_exit(
            terminal_id.to_string(),
            pid,
            child,
            readers,
            kill_rx,
            ExitSignals {
                exited: exited_tx,
                settled: settled_tx,
            },
        ));

        info!(id = %terminal_id, pid, "Process started");
        Ok(ProcessHandle {
            pid,
            started_at,
            started_at_wall,
            exited_rx,
            settled_rx,
            kill_tx,
        })
    }
}

fn spawn_reader<R>(
    terminal_id: &str,
    source: R,
    stream: LogStream,
    logs: Arc<LogBuffer>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let terminal_id = terminal_id.to_string();
    tokio::spawn(async move {
        let mut reader = BufReader::new(source);
        let mut line = Vec::new();
        loop {
            line.clear();
            let read = (&mut reader)
                .take(MAX_LINE_BYTES as u64)
                .read_until(b'\n', &mut line)
                .await;
            match read {
                Ok(0) => break,
                Ok(_) => {
                    // A final line without '\n' still lands here at EOF, and
                    // an over-long one arrives as MAX_LINE_BYTES chunks.
                    while matches!(line.last(), Some(b'\n') | Some(b'\r')) {
                        line.pop();
                    }
                    logs.append(stream, String::from_utf8_lossy(&line).into_owned());
                }
                Err(e) => {
                    warn!(id = %terminal_id, stream = ?stream, error = %e, "Output reader failed; closing stream");
                    break;
                }
            }
        }
        debug!(id = %terminal_id, stream = ?stream, "Output reader finished");
    })
}

/// `exited` fires as soon as the child is reaped; `settled` once its output
/// has also been drained into the log buffer.
struct ExitSignals {
    exited: watch::Sender<Option<ExitReport>>,
    settled: watch::Sender<Option<ExitReport>>,
}

async fn watch_exit(
    terminal_id: String,
    pid: u32,
    mut child: Child,
    readers: Vec<JoinHandle<()>>,
    mut kill_rx: mpsc::Receiver<()>,
    signals: ExitSignals,
) {
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            Some(()) = kill_rx.recv() => {
                if let Err(e) = child.start_kill() {
                    warn!(id = %terminal_id, pid, error = %e, "Failed to kill child process");
                }
            }
        }
    };

    let report = match status {
        Ok(status) => ExitReport::from_status(status),
        Err(e) => {
            warn!(id = %terminal_id, pid, error = %e, "Failed to wait for child process");
            ExitReport::unknown()
        }
    };
    signals.exited.send_replace(Some(report.clone()));

    for reader in readers {
        if timeout(READER_DRAIN_TIMEOUT, reader).await.is_err() {
            warn!(id = %terminal_id, pid, "Output stream still open after exit; detaching reader");
        }
    }

    info!(id = %terminal_id, pid, exit_code = ?report.code, signal = ?report.signal, "Process exited");
    signals.settled.send_replace(Some(report));
}

/// Supervisor-side handle on one running child.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: u32,
    started_at: Instant,
    started_at_wall: DateTime<Utc>,
    exited_rx: watch::Receiver<Option<ExitReport>>,
    settled_rx: watch::Receiver<Option<ExitReport>>,
    kill_tx: mpsc::Sender<()>,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn started_at_wall(&self) -> DateTime<Utc> {
        self.started_at_wall
    }

    /// The exit report if the child has already been reaped, even while its
    /// output is still draining.
    pub fn exit_report(&self) -> Option<ExitReport> {
        self.exited_rx.borrow().clone()
    }

    /// Resolves once the child has exited and its output is in the log buffer.
    pub async fn wait(&self) -> ExitReport {
        wait_for_report(self.settled_rx.clone()).await
    }

    async fn wait_exited(&self) -> ExitReport {
        wait_for_report(self.exited_rx.clone()).await
    }

    /// Graceful signal, bounded wait, then forced kill.
    pub async fn terminate(&self, grace_period: Duration) -> ExitReport {
        if let Some(report) = self.exit_report() {
            return report;
        }

        self.signal_graceful();
        if let Ok(report) = timeout(grace_period, self.wait_exited()).await {
            debug!(pid = self.pid, "Process exited within grace period");
            return report;
        }

        warn!(pid = self.pid, grace_ms = grace_period.as_millis() as u64, "Process ignored graceful stop; killing");
        self.signal_kill();
        let _ = self.kill_tx.try_send(());

        match timeout(KILL_CONFIRM_TIMEOUT, self.wait_exited()).await {
            Ok(report) => report,
            Err(_) => {
                error!(pid = self.pid, "Process still not reaped after kill");
                ExitReport::unknown()
            }
        }
    }

    #[cfg(unix)]
    fn signal_graceful(&self) {
        self.signal_group(nix::sys::signal::Signal::SIGTERM);
    }

    #[cfg(unix)]
    fn signal_kill(&self) {
        self.signal_group(nix::sys::signal::Signal::SIGKILL);
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: nix::sys::signal::Signal) {
        use nix::errno::Errno;
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        // The child was spawned with process_group(0), so its pid is the pgid.
        match killpg(Pid::from_raw(self.pid as i32), signal) {
            Ok(()) => debug!(pid = self.pid, ?signal, "Signal sent to process group"),
            Err(Errno::ESRCH) => debug!(pid = self.pid, ?signal, "Process group already gone"),
            Err(e) => warn!(pid = self.pid, ?signal, error = %e, "Failed to signal process group"),
        }
    }

    #[cfg(not(unix))]
    fn signal_graceful(&self) {
        // No graceful signal for console processes here; kill directly.
        let _ = self.kill_tx.try_send(());
    }

    #[cfg(not(unix))]
    fn signal_kill(&self) {}
}

async fn wait_for_report(mut rx: watch::Receiver<Option<ExitReport>>) -> ExitReport {
    loop {
        if let Some(report) = rx.borrow_and_update().clone() {
            return report;
        }
        if rx.changed().await.is_err() {
            // Watcher dropped its sender without reporting.
            return rx.borrow().clone().unwrap_or_else(ExitReport::unknown);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn launcher() -> ShellLauncher {
        ShellLauncher::new("/bin/sh", false, Vec::new())
    }

    fn cwd() -> String {
        std::env::temp_dir().to_string_lossy().into_owned()
    }

    #[test]
    fn shell_arguments_follow_the_shell_kind() {
        assert_eq!(launcher().shell_args, vec!["-c"]);
        assert_eq!(
            ShellLauncher::new("/bin/zsh", true, Vec::new()).shell_args,
            vec!["-l", "-c"]
        );
        assert_eq!(ShellLauncher::new("cmd.exe", false, Vec::new()).shell_args, vec!["/C"]);
        assert_eq!(
            ShellLauncher::new("powershell", false, Vec::new()).shell_args,
            vec!["-Command"]
        );
    }

    #[tokio::test]
    async fn captures_both_streams_and_trailing_partial_line() {
        let logs = Arc::new(LogBuffer::new(100));
        let handle = launcher()
            .spawn("t", &cwd(), "echo out; echo err 1>&2; printf tail", logs.clone())
            .unwrap();

        let report = handle.wait().await;
        assert!(report.success());

        let lines = logs.rendered();
        assert!(lines.contains(&"[OUT] out".to_string()));
        assert!(lines.contains(&"[ERR] err".to_string()));
        assert!(lines.contains(&"[OUT] tail".to_string()));
    }

    #[tokio::test]
    async fn reports_nonzero_exit_codes() {
        let logs = Arc::new(LogBuffer::new(10));
        let handle = launcher().spawn("t", &cwd(), "exit 3", logs).unwrap();
        let report = handle.wait().await;
        assert_eq!(report.code, Some(3));
        assert!(!report.success());
    }

    #[tokio::test]
    async fn missing_directory_fails_to_spawn() {
        let logs = Arc::new(LogBuffer::new(10));
        let err = launcher()
            .spawn("t", "/definitely/not/here", "true", logs)
            .unwrap_err();
        assert!(matches!(err, AppError::Spawn(_)));
    }

    #[tokio::test]
    async fn terminate_escalates_when_sigterm_is_ignored() {
        let logs = Arc::new(LogBuffer::new(10));
        let handle = launcher()
            .spawn("t", &cwd(), "trap '' TERM; sleep 30", logs)
            .unwrap();
        // Give the shell time to install the trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = Instant::now();
        let report = handle.terminate(Duration::from_millis(300)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.signal, Some(nix::sys::signal::Signal::SIGKILL as i32));
    }

    #[tokio::test]
    async fn long_output_without_newlines_is_split_into_bounded_entries() {
        let logs = Arc::new(LogBuffer::new(100));
        let handle = launcher()
            .spawn("t", &cwd(), "head -c 40000 /dev/zero | tr '\\0' a", logs.clone())
            .unwrap();
        handle.wait().await;

        let entries = logs.snapshot();
        let lengths: Vec<usize> = entries.iter().map(|e| e.text.len()).collect();
        assert_eq!(lengths, vec![MAX_LINE_BYTES, MAX_LINE_BYTES, 40000 - 2 * MAX_LINE_BYTES]);
        assert!(entries.iter().all(|e| e.text.bytes().all(|b| b == b'a')));
    }

    #[tokio::test]
    async fn exit_is_visible_before_inherited_pipes_close() {
        let logs = Arc::new(LogBuffer::new(10));
        let handle = launcher()
            .spawn("t", &cwd(), "sleep 5 & exit 3", logs)
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(1);
        while handle.exit_report().is_none() {
            assert!(Instant::now() < deadline, "exit not reported while pipes stay open");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(handle.exit_report().unwrap().code, Some(3));
    }

    #[tokio::test]
    async fn terminate_after_exit_returns_the_recorded_report() {
        let logs = Arc::new(LogBuffer::new(10));
        let handle = launcher().spawn("t", &cwd(), "exit 0", logs).unwrap();
        let first = handle.wait().await;
        let second = handle.terminate(Duration::from_millis(100)).await;
        assert_eq!(first, second);
    }
}
