//! Local subprocess runner
//!
//! Spawns a child process, streams stdout and stderr line by line to an
//! output handler, and enforces a timeout and run-wide cancellation.

use ferry_core::domain::OutputLine;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::OutputHandler;
use crate::error::TaskError;

/// What to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessCommand {
    /// Interpreted by `sh -c`
    Shell(String),
    /// Executed directly, no shell interpretation
    Argv { program: String, args: Vec<String> },
}

/// How a child process ended
#[derive(Debug)]
pub(crate) enum Completion {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

/// Streams a subprocess with timeout and cancellation
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    command: ProcessCommand,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
}

impl ProcessRunner {
    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

    fn new(command: ProcessCommand) -> Self {
        Self {
            command,
            working_dir: None,
            env: Vec::new(),
            stdin: None,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Runs `command` through `sh -c`
    pub fn shell(command: impl Into<String>) -> Self {
        Self::new(ProcessCommand::Shell(command.into()))
    }

    /// Runs `program` with `args` directly
    pub fn argv<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(ProcessCommand::Argv {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        })
    }

    /// Runs a local script file with bash
    ///
    /// Fails with [`TaskError::ScriptNotFound`] if the file does not exist.
    /// The path is made absolute so it still resolves after
    /// [`current_dir`](Self::current_dir) changes the child's directory.
    pub fn script(path: impl AsRef<Path>) -> Result<Self, TaskError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(TaskError::ScriptNotFound(path.display().to_string()));
        }
        let path = std::path::absolute(path)?;
        Ok(Self::argv("bash", [path.display().to_string()]))
    }

    pub fn current_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Bytes written to the child's stdin, which is then closed
    pub fn stdin(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn get_timeout(&self) -> Duration {
        self.timeout
    }

    /// Command line for display (environment values are never shown)
    pub fn display(&self) -> String {
        match &self.command {
            ProcessCommand::Shell(cmd) => cmd.clone(),
            ProcessCommand::Argv { program, args } => {
                let mut parts = vec![program.clone()];
                parts.extend(args.iter().cloned());
                parts.join(" ")
            }
        }
    }

    /// Runs the process and maps its outcome to a task result
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        output: &dyn OutputHandler,
    ) -> Result<(), TaskError> {
        match self.run_to_completion(cancel, output).await? {
            Completion::Exited(status) if status.success() => Ok(()),
            Completion::Exited(status) => Err(TaskError::Execution(status.to_string())),
            Completion::TimedOut => Err(TaskError::Timeout(self.timeout)),
            Completion::Cancelled => Err(TaskError::Cancelled),
        }
    }

    /// Runs the process and reports how it ended without judging the status
    pub(crate) async fn run_to_completion(
        &self,
        cancel: &CancellationToken,
        output: &dyn OutputHandler,
    ) -> Result<Completion, TaskError> {
        if cancel.is_cancelled() {
            return Ok(Completion::Cancelled);
        }

        let mut command = self.build_command();
        let mut child = command.spawn().map_err(|source| TaskError::Spawn {
            program: self.program().to_string(),
            source,
        })?;
        let pid = child.id();

        debug!("Spawned '{}' (pid {:?})", self.display(), pid);

        if let (Some(data), Some(mut pipe)) = (self.stdin.clone(), child.stdin.take()) {
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(&data).await {
                    debug!("Failed to write child stdin: {}", e);
                }
                let _ = pipe.shutdown().await;
            });
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let completion = tokio::select! {
            status = async {
                stream_output(stdout, stderr, output).await;
                child.wait().await
            } => Completion::Exited(status?),
            _ = cancel.cancelled() => Completion::Cancelled,
            _ = tokio::time::sleep(self.timeout) => Completion::TimedOut,
        };

        if !matches!(completion, Completion::Exited(_)) {
            debug!("Terminating '{}' ({:?})", self.display(), completion);
            terminate(&mut child, pid).await;
        }

        Ok(completion)
    }

    fn program(&self) -> &str {
        match &self.command {
            ProcessCommand::Shell(_) => "sh",
            ProcessCommand::Argv { program, .. } => program,
        }
    }

    fn build_command(&self) -> Command {
        let mut command = match &self.command {
            ProcessCommand::Shell(cmd) => {
                let mut c = Command::new("sh");
                c.arg("-c").arg(cmd);
                c
            }
            ProcessCommand::Argv { program, args } => {
                let mut c = Command::new(program);
                c.args(args);
                c
            }
        };

        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        command
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so the whole tree can be killed at once
        #[cfg(unix)]
        command.process_group(0);

        command
    }
}

/// Kills the child and everything it spawned
async fn terminate(child: &mut Child, pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        // SAFETY: signalling a process group we created; no memory is shared.
        unsafe {
            libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    let _ = pid;

    if let Err(e) = child.kill().await {
        warn!("Failed to kill child process: {}", e);
    }
}

/// Forwards both output streams, in arrival order, until both close
pub(crate) async fn stream_output<O, E>(
    stdout: Option<O>,
    stderr: Option<E>,
    output: &dyn OutputHandler,
) where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut out_open = stdout.is_some();
    let mut err_open = stderr.is_some();
    let mut out = stdout.map(LineReader::new);
    let mut err = stderr.map(LineReader::new);

    loop {
        tokio::select! {
            line = next_line(&mut out), if out_open => match line {
                Some(text) => output.handle(OutputLine::stdout(text)).await,
                None => out_open = false,
            },
            line = next_line(&mut err), if err_open => match line {
                Some(text) => output.handle(OutputLine::stderr(text)).await,
                None => err_open = false,
            },
            else => break,
        }
    }
}

async fn next_line<R: AsyncRead + Unpin>(reader: &mut Option<LineReader<R>>) -> Option<String> {
    match reader {
        Some(reader) => reader.next_line().await,
        None => None,
    }
}

/// Line splitter that tolerates invalid UTF-8 and arbitrary line lengths
struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    /// Cancel safe: partial reads stay in `buf` for the next call
    async fn next_line(&mut self) -> Option<String> {
        let read = self.reader.read_until(b'\n', &mut self.buf).await;
        if matches!(read, Ok(0) | Err(_)) && self.buf.is_empty() {
            return None;
        }

        let mut bytes = std::mem::take(&mut self.buf);
        if bytes.last() == Some(&b'\n') {
            bytes.pop();
            if bytes.last() == Some(&b'\r') {
                bytes.pop();
            }
        }
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::Collector;
    use std::time::Instant;

    #[tokio::test]
    async fn test_streams_both_channels() {
        let out = Collector::default();
        let runner = ProcessRunner::shell("echo hello; echo oops >&2; echo world");

        runner
            .run(&CancellationToken::new(), &out)
            .await
            .unwrap();

        assert_eq!(out.stdout(), vec!["hello", "world"]);
        assert_eq!(out.stderr(), vec!["oops"]);
    }

    #[tokio::test]
    async fn test_preserves_order_within_stream() {
        let out = Collector::default();
        let runner = ProcessRunner::shell("for i in 1 2 3 4 5; do echo $i; done");

        runner
            .run(&CancellationToken::new(), &out)
            .await
            .unwrap();

        assert_eq!(out.stdout(), vec!["1", "2", "3", "4", "5"]);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_execution_error() {
        let out = Collector::default();
        let err = ProcessRunner::shell("echo before; exit 3")
            .run(&CancellationToken::new(), &out)
            .await
            .unwrap_err();

        assert!(matches!(err, TaskError::Execution(ref detail) if detail.contains('3')));
        assert_eq!(out.stdout(), vec!["before"]);
    }

    #[tokio::test]
    async fn test_timeout_returns_promptly() {
        let out = Collector::default();
        let started = Instant::now();

        let err = ProcessRunner::shell("sleep 5")
            .timeout(Duration::from_secs(1))
            .run(&CancellationToken::new(), &out)
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_cancellation_returns_promptly() {
        let out = Collector::default();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = ProcessRunner::shell("sleep 5")
            .run(&cancel, &out)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_already_cancelled_does_not_spawn() {
        let out = Collector::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = ProcessRunner::shell("echo should-not-run")
            .run(&cancel, &out)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(out.lines().is_empty());
    }

    #[tokio::test]
    async fn test_argv_mode_skips_shell_interpretation() {
        let out = Collector::default();
        ProcessRunner::argv("echo", ["$HOME", "a;b"])
            .run(&CancellationToken::new(), &out)
            .await
            .unwrap();

        assert_eq!(out.stdout(), vec!["$HOME a;b"]);
    }

    #[tokio::test]
    async fn test_env_overlay_and_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let out = Collector::default();

        ProcessRunner::shell("echo $FERRY_TEST_VALUE; basename \"$(pwd)\"")
            .env("FERRY_TEST_VALUE", "overlay")
            .current_dir(Some(dir.path().to_path_buf()))
            .run(&CancellationToken::new(), &out)
            .await
            .unwrap();

        let dir_name = dir.path().file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(out.stdout(), vec!["overlay".to_string(), dir_name]);
    }

    #[tokio::test]
    async fn test_stdin_is_fed_and_closed() {
        let out = Collector::default();
        ProcessRunner::argv("cat", Vec::<String>::new())
            .stdin("line one\nline two\n")
            .run(&CancellationToken::new(), &out)
            .await
            .unwrap();

        assert_eq!(out.stdout(), vec!["line one", "line two"]);
    }

    #[tokio::test]
    async fn test_unterminated_last_line_is_delivered() {
        let out = Collector::default();
        ProcessRunner::shell("printf 'partial'")
            .run(&CancellationToken::new(), &out)
            .await
            .unwrap();

        assert_eq!(out.stdout(), vec!["partial"]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let out = Collector::default();
        ProcessRunner::shell("printf 'ok\\377\\n'")
            .run(&CancellationToken::new(), &out)
            .await
            .unwrap();

        assert_eq!(out.stdout(), vec!["ok\u{FFFD}"]);
    }

    #[test]
    fn test_missing_script() {
        let err = ProcessRunner::script("/definitely/not/here.sh").unwrap_err();
        assert!(matches!(err, TaskError::ScriptNotFound(_)));
    }

    #[tokio::test]
    async fn test_script_runs_with_bash() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("build.sh");
        std::fs::write(&script, "echo from-script\n").unwrap();

        let out = Collector::default();
        ProcessRunner::script(&script)
            .unwrap()
            .run(&CancellationToken::new(), &out)
            .await
            .unwrap();

        assert_eq!(out.stdout(), vec!["from-script"]);
    }

    #[tokio::test]
    async fn test_relative_script_survives_directory_change() {
        let dir = tempfile::Builder::new()
            .prefix("ferry-script")
            .tempdir_in(".")
            .unwrap();
        let relative = PathBuf::from(dir.path().file_name().unwrap());
        std::fs::write(relative.join("run.sh"), "pwd\n").unwrap();

        let out = Collector::default();
        ProcessRunner::script(relative.join("run.sh"))
            .unwrap()
            .current_dir(Some(relative.clone()))
            .run(&CancellationToken::new(), &out)
            .await
            .unwrap();

        let cwd = out.stdout();
        assert_eq!(cwd.len(), 1);
        assert!(cwd[0].ends_with(relative.to_str().unwrap()));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            ProcessRunner::argv("docker", ["push", "app:1"]).display(),
            "docker push app:1"
        );
        assert_eq!(ProcessRunner::shell("ls -la").display(), "ls -la");
    }
}
