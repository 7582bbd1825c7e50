//! Remote shell session over the system OpenSSH client
//!
//! A session opens one multiplexed master connection and runs every command
//! of a task through it:
//! - `connect` starts the master and verifies authentication
//! - `exec` runs one command, streaming both output channels
//! - `upload` copies a local file to a remote path through stdin
//! - `disconnect` closes the master
//!
//! Host keys are not verified (`StrictHostKeyChecking=no`). Deployment
//! targets are addressed by configuration, not discovered, and this is an
//! accepted risk of the tool.

use async_trait::async_trait;
use ferry_core::domain::{OutputLine, Server, ServerAuth};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::TaskError;
use crate::executor::process::Completion;
use crate::executor::{OutputHandler, ProcessRunner};

/// ssh exits with 255 when the connection itself failed
const SSH_CONNECTION_FAILURE: i32 = 255;
const CONTROL_PERSIST_SECS: u64 = 60;
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(10);

/// One deadline shared by every step of a remote task
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    at: Instant,
    total: Duration,
}

impl Deadline {
    pub fn after(total: Duration) -> Self {
        Self {
            at: Instant::now() + total,
            total,
        }
    }

    /// Time left, or a timeout error once it has passed
    pub fn remaining(&self) -> Result<Duration, TaskError> {
        let left = self.at.saturating_duration_since(Instant::now());
        if left.is_zero() {
            Err(TaskError::Timeout(self.total))
        } else {
            Ok(left)
        }
    }

    pub fn total(&self) -> Duration {
        self.total
    }
}

pub(crate) struct RemoteSession {
    server: Server,
    control_path: String,
    connect_timeout: Duration,
}

impl RemoteSession {
    pub fn new(server: Server, connect_timeout: Duration) -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self {
            server,
            control_path: format!("/tmp/ferry-ssh-{}", &id[..16]),
            connect_timeout,
        }
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.server.username, self.server.host)
    }

    /// Arguments shared by every ssh invocation of this session
    pub fn ssh_args(&self) -> Vec<String> {
        let mut args = vec!["-p".to_string(), self.server.port.to_string()];

        let options = [
            "StrictHostKeyChecking=no".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "LogLevel=ERROR".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "ServerAliveInterval=15".to_string(),
            "ServerAliveCountMax=3".to_string(),
            "ControlMaster=auto".to_string(),
            format!("ControlPath={}", self.control_path),
            format!("ControlPersist={}", CONTROL_PERSIST_SECS),
        ];
        for option in options {
            args.push("-o".to_string());
            args.push(option);
        }

        match &self.server.auth {
            ServerAuth::Key { key_path } => {
                args.push("-i".to_string());
                args.push(shellexpand::tilde(key_path).to_string());
                args.extend(
                    ["-o", "IdentitiesOnly=yes", "-o", "BatchMode=yes"].map(str::to_string),
                );
            }
            ServerAuth::Password { .. } => {
                args.extend(
                    [
                        "-o",
                        "PreferredAuthentications=password,keyboard-interactive",
                        "-o",
                        "PubkeyAuthentication=no",
                    ]
                    .map(str::to_string),
                );
            }
        }

        args.push(self.destination());
        args
    }

    /// ssh invocation running `remote_command`; password auth goes through
    /// `sshpass -e` so the password never appears in an argument list
    fn runner(&self, remote_command: &str) -> ProcessRunner {
        let mut args = self.ssh_args();
        args.push(remote_command.to_string());

        match &self.server.auth {
            ServerAuth::Password { password } => {
                let mut sshpass_args = vec!["-e".to_string(), "ssh".to_string()];
                sshpass_args.extend(args);
                ProcessRunner::argv("sshpass", sshpass_args).env("SSHPASS", password.clone())
            }
            ServerAuth::Key { .. } => ProcessRunner::argv("ssh", args),
        }
    }

    /// Opens the master connection and checks that authentication works
    pub async fn connect(
        &self,
        cancel: &CancellationToken,
        deadline: &Deadline,
    ) -> Result<(), TaskError> {
        if let ServerAuth::Key { key_path } = &self.server.auth {
            let expanded = shellexpand::tilde(key_path).to_string();
            if !Path::new(&expanded).exists() {
                return Err(TaskError::RemoteConnection(format!(
                    "key file not found: {}",
                    expanded
                )));
            }
        }

        let timeout = self.connect_timeout.min(deadline.remaining()?);
        let capture = Capture::default();

        info!("Connecting to {}", self.server.address());

        let completion = self
            .runner("true")
            .timeout(timeout)
            .run_to_completion(cancel, &capture)
            .await
            .map_err(|e| TaskError::RemoteConnection(e.to_string()))?;

        match completion {
            Completion::Exited(status) if status.success() => Ok(()),
            Completion::Exited(status) => Err(TaskError::RemoteConnection(
                capture.summary().unwrap_or_else(|| status.to_string()),
            )),
            Completion::TimedOut => Err(TaskError::RemoteConnection(format!(
                "no connection to {} within {:?}",
                self.server.address(),
                timeout
            ))),
            Completion::Cancelled => Err(TaskError::Cancelled),
        }
    }

    /// Runs one command through the master connection
    ///
    /// On timeout or cancellation the remote process group is signalled in
    /// the background and this returns without waiting for it.
    pub async fn exec(
        &self,
        command: &str,
        cancel: &CancellationToken,
        deadline: &Deadline,
        output: &dyn OutputHandler,
    ) -> Result<(), TaskError> {
        let pid_file = format!("/tmp/ferry-{}.pid", Uuid::new_v4().simple());
        let wrapped = wrap_command(command, &pid_file);

        let completion = self
            .runner(&wrapped)
            .timeout(deadline.remaining()?)
            .run_to_completion(cancel, output)
            .await?;

        match completion {
            Completion::Exited(status) if status.success() => Ok(()),
            Completion::Exited(status) => Err(exit_error(status.code(), status.to_string())),
            Completion::TimedOut => {
                self.signal_remote(&pid_file);
                Err(TaskError::Timeout(deadline.total()))
            }
            Completion::Cancelled => {
                self.signal_remote(&pid_file);
                Err(TaskError::Cancelled)
            }
        }
    }

    /// Fails with [`TaskError::ScriptNotFound`] unless `path` exists on the
    /// remote host
    pub async fn require_file(
        &self,
        path: &str,
        cancel: &CancellationToken,
        deadline: &Deadline,
    ) -> Result<(), TaskError> {
        let completion = self
            .runner(&exists_check(path))
            .timeout(deadline.remaining()?)
            .run_to_completion(cancel, &Discard)
            .await?;

        match completion {
            Completion::Exited(status) if status.success() => Ok(()),
            Completion::Exited(status) if status.code() == Some(SSH_CONNECTION_FAILURE) => {
                Err(TaskError::RemoteConnection(status.to_string()))
            }
            Completion::Exited(_) => Err(TaskError::ScriptNotFound(path.to_string())),
            Completion::TimedOut => Err(TaskError::Timeout(deadline.total())),
            Completion::Cancelled => Err(TaskError::Cancelled),
        }
    }

    /// Streams `local` into `remote_path` and marks it executable
    pub async fn upload(
        &self,
        local: &Path,
        remote_path: &str,
        cancel: &CancellationToken,
        deadline: &Deadline,
    ) -> Result<(), TaskError> {
        let content = tokio::fs::read(local).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => TaskError::ScriptNotFound(local.display().to_string()),
            _ => TaskError::Io(e),
        })?;

        let quoted = shell_quote(remote_path);
        let capture = Capture::default();
        let completion = self
            .runner(&format!("cat > {} && chmod +x {}", quoted, quoted))
            .stdin(content)
            .timeout(deadline.remaining()?)
            .run_to_completion(cancel, &capture)
            .await?;

        match completion {
            Completion::Exited(status) if status.success() => Ok(()),
            Completion::Exited(status) if status.code() == Some(SSH_CONNECTION_FAILURE) => {
                Err(TaskError::RemoteConnection(status.to_string()))
            }
            Completion::Exited(status) => Err(TaskError::RemoteCommand(format!(
                "upload to {} failed: {}",
                remote_path,
                capture.summary().unwrap_or_else(|| status.to_string())
            ))),
            Completion::TimedOut => Err(TaskError::Timeout(deadline.total())),
            Completion::Cancelled => Err(TaskError::Cancelled),
        }
    }

    /// Best-effort removal of a remote file; never fails the task
    ///
    /// Runs detached when the task was cancelled so the caller returns
    /// immediately.
    pub async fn remove(&self, remote_path: &str, cancel: &CancellationToken) {
        let runner = self
            .runner(&format!("rm -f {}", shell_quote(remote_path)))
            .timeout(CLEANUP_TIMEOUT);

        if cancel.is_cancelled() {
            spawn_detached(runner);
            return;
        }

        if let Err(e) = runner.run(&CancellationToken::new(), &Discard).await {
            warn!("Failed to remove remote file {}: {}", remote_path, e);
        }
    }

    /// Closes the master connection
    pub async fn disconnect(&self) {
        let args = [
            "-O".to_string(),
            "exit".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path),
            self.destination(),
        ];

        let result = ProcessRunner::argv("ssh", args)
            .timeout(CLEANUP_TIMEOUT)
            .run(&CancellationToken::new(), &Discard)
            .await;

        match result {
            Ok(()) => debug!("Closed connection to {}", self.server.address()),
            Err(e) => debug!("Master for {} already gone: {}", self.server.address(), e),
        }
    }

    /// Sends SIGTERM to the remote command's process group in the background
    fn signal_remote(&self, pid_file: &str) {
        let command = format!(
            "kill -TERM -- -$(cat {pid}) 2>/dev/null; rm -f {pid}",
            pid = pid_file
        );
        info!("Signalling remote process on {}", self.server.address());
        spawn_detached(self.runner(&command).timeout(CLEANUP_TIMEOUT));
    }
}

fn spawn_detached(runner: ProcessRunner) {
    tokio::spawn(async move {
        if let Err(e) = runner.run(&CancellationToken::new(), &Discard).await {
            debug!("Background remote cleanup failed: {}", e);
        }
    });
}

/// Records the remote shell's pid (its process group id, as sshd starts
/// each session in a new session) so the command can be signalled later
pub(crate) fn wrap_command(command: &str, pid_file: &str) -> String {
    format!(
        "echo $$ > {pid}\n(\n{command}\n)\n__ferry_rc=$?\nrm -f {pid}\nexit $__ferry_rc",
        pid = pid_file,
        command = command
    )
}

/// Maps a failed ssh exit status; 255 is ssh's own connection failure,
/// anything else came from the remote command
pub(crate) fn exit_error(code: Option<i32>, status: String) -> TaskError {
    match code {
        Some(SSH_CONNECTION_FAILURE) => TaskError::RemoteConnection(status),
        _ => TaskError::RemoteCommand(status),
    }
}

/// Shell test for a remote path; a leading `~/` still expands to `$HOME`
pub(crate) fn exists_check(path: &str) -> String {
    match path.strip_prefix("~/") {
        Some(rest) => format!("test -e \"$HOME\"/{}", shell_quote(rest)),
        None => format!("test -e {}", shell_quote(path)),
    }
}

/// Single-quotes a value for a POSIX shell
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Keeps stderr lines for error messages
#[derive(Default)]
struct Capture {
    errors: Mutex<Vec<String>>,
}

impl Capture {
    fn summary(&self) -> Option<String> {
        let text = self
            .errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .join("; ");
        (!text.trim().is_empty()).then_some(text)
    }
}

#[async_trait]
impl OutputHandler for Capture {
    async fn handle(&self, line: OutputLine) {
        if line.is_error {
            self.errors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(line.text);
        }
    }
}

struct Discard;

#[async_trait]
impl OutputHandler for Discard {
    async fn handle(&self, _line: OutputLine) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(auth: ServerAuth) -> Server {
        Server {
            host: "10.0.0.5".to_string(),
            port: 2222,
            username: "deploy".to_string(),
            auth,
        }
    }

    #[test]
    fn test_key_auth_args() {
        let session = RemoteSession::new(
            server(ServerAuth::Key {
                key_path: "/keys/id_ed25519".to_string(),
            }),
            Duration::from_secs(30),
        );
        let args = session.ssh_args();

        assert_eq!(&args[..2], ["-p", "2222"]);
        assert!(args.windows(2).any(|w| w == ["-i", "/keys/id_ed25519"]));
        assert!(args.windows(2).any(|w| w == ["-o", "BatchMode=yes"]));
        assert!(args.windows(2).any(|w| w == ["-o", "StrictHostKeyChecking=no"]));
        assert!(args.iter().any(|a| a.starts_with("ControlPath=/tmp/ferry-ssh-")));
        assert_eq!(args.last().map(String::as_str), Some("deploy@10.0.0.5"));
    }

    #[test]
    fn test_password_never_in_argv() {
        let session = RemoteSession::new(
            server(ServerAuth::Password {
                password: "hunter2".to_string(),
            }),
            Duration::from_secs(30),
        );
        let runner = session.runner("uptime");
        let display = runner.display();

        assert!(display.starts_with("sshpass -e ssh "));
        assert!(display.ends_with("uptime"));
        assert!(!display.contains("hunter2"));
    }

    #[test]
    fn test_tilde_in_key_path_is_expanded() {
        let session = RemoteSession::new(
            server(ServerAuth::Key {
                key_path: "~/.ssh/id_rsa".to_string(),
            }),
            Duration::from_secs(30),
        );
        let args = session.ssh_args();
        let key = args
            .windows(2)
            .find(|w| w[0] == "-i")
            .map(|w| w[1].clone())
            .unwrap();
        assert!(!key.starts_with('~'));
        assert!(key.ends_with(".ssh/id_rsa"));
    }

    #[test]
    fn test_sessions_use_distinct_control_paths() {
        let auth = ServerAuth::Key {
            key_path: "/k".to_string(),
        };
        let a = RemoteSession::new(server(auth.clone()), Duration::from_secs(1));
        let b = RemoteSession::new(server(auth), Duration::from_secs(1));
        assert_ne!(a.control_path, b.control_path);
    }

    #[tokio::test]
    async fn test_wrapped_command_keeps_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("cmd.pid").display().to_string();
        let wrapped = wrap_command("cd /definitely/not/here && echo unreachable", &pid_file);

        let err = ProcessRunner::shell(wrapped)
            .run(&CancellationToken::new(), &Discard)
            .await
            .unwrap_err();

        assert!(matches!(err, TaskError::Execution(_)));
        assert!(!Path::new(&pid_file).exists());
    }

    #[test]
    fn test_exit_codes() {
        assert!(matches!(
            exit_error(Some(255), "exit status: 255".to_string()),
            TaskError::RemoteConnection(_)
        ));
        // A command missing inside an existing script is a command failure
        assert!(matches!(
            exit_error(Some(127), "exit status: 127".to_string()),
            TaskError::RemoteCommand(_)
        ));
        assert!(matches!(
            exit_error(None, "signal: 9".to_string()),
            TaskError::RemoteCommand(_)
        ));
    }

    #[tokio::test]
    async fn test_exists_check() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("deploy me.sh");
        std::fs::write(&present, "true\n").unwrap();

        let ok = ProcessRunner::shell(exists_check(&present.display().to_string()))
            .run(&CancellationToken::new(), &Discard)
            .await;
        assert!(ok.is_ok());

        let missing = ProcessRunner::shell(exists_check("/definitely/not/here.sh"))
            .run(&CancellationToken::new(), &Discard)
            .await;
        assert!(missing.is_err());

        assert_eq!(
            exists_check("~/bin/deploy.sh"),
            "test -e \"$HOME\"/'bin/deploy.sh'"
        );
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/tmp/a b.sh"), "'/tmp/a b.sh'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[tokio::test]
    async fn test_expired_deadline() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.remaining().unwrap_err().is_timeout());
    }
}
