use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use super::error::ExecError;
use super::{ExecOutput, RemoteExecutor, SshTarget};

/// Runs commands through the system OpenSSH client.
///
/// Password logins go through `sshpass -e`, which reads the password from
/// the `SSHPASS` environment variable so it never shows up in argv.
pub struct SshExecutor {
    ssh_program: String,
    /// Maximum bytes kept per stream; the rest is drained and dropped.
    max_output_bytes: usize,
    timeout: Option<Duration>,
}

impl SshExecutor {
    pub fn new(max_output_bytes: usize, timeout: Option<Duration>) -> Self {
        Self {
            ssh_program: "ssh".to_string(),
            max_output_bytes,
            timeout,
        }
    }

    #[cfg(test)]
    fn with_program(mut self, program: &str) -> Self {
        self.ssh_program = program.to_string();
        self
    }

    /// Full argv for one invocation, program first.
    fn build_argv(&self, command: &str, target: &SshTarget) -> Vec<String> {
        let mut argv = Vec::new();
        if target.password.is_some() {
            argv.push("sshpass".to_string());
            argv.push("-e".to_string());
        }
        argv.push(self.ssh_program.clone());
        argv.push("-p".to_string());
        argv.push(target.port.to_string());
        for opt in [
            "StrictHostKeyChecking=no",
            "UserKnownHostsFile=/dev/null",
            "LogLevel=ERROR",
        ] {
            argv.push("-o".to_string());
            argv.push(opt.to_string());
        }
        if target.password.is_none() {
            argv.push("-o".to_string());
            argv.push("BatchMode=yes".to_string());
        }
        argv.push(format!("{}@{}", target.username, target.address));
        argv.push(command.to_string());
        argv
    }
}

async fn drain<R: AsyncRead + Unpin>(mut reader: R, max_bytes: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let room = max_bytes.saturating_sub(buf.len());
                buf.extend_from_slice(&chunk[..n.min(room)]);
            }
            Err(e) => {
                tracing::warn!(error = %e, kept = buf.len(), "output stream read failed");
                break;
            }
        }
    }
    buf
}

/// Bytes captured by a drain task; empty if the task died.
async fn collect(task: Option<JoinHandle<Vec<u8>>>, stream: &'static str) -> Vec<u8> {
    let Some(task) = task else {
        return Vec::new();
    };
    match task.await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(stream, error = %e, "output capture task failed");
            Vec::new()
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run_command(
        &self,
        command: &str,
        target: &SshTarget,
    ) -> Result<ExecOutput, ExecError> {
        if target.address.is_empty() {
            return Err(ExecError::NoAddress);
        }

        let argv = self.build_argv(command, target);
        let started_at = chrono::Utc::now().timestamp_millis();

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        if let Some(password) = &target.password {
            cmd.env("SSHPASS", password);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        tracing::debug!(ip = %target.address, port = target.port, "running remote command");

        let mut child = cmd.spawn()?;

        let max_bytes = self.max_output_bytes;
        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(drain(out, max_bytes)));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(drain(err, max_bytes)));

        let status = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(waited) => waited?,
                Err(_) => {
                    let _ = child.kill().await;
                    tracing::warn!(ip = %target.address, "remote command timed out");
                    return Err(ExecError::Timeout);
                }
            },
            None => child.wait().await?,
        };

        let stdout = collect(stdout_task, "stdout").await;
        let stderr = collect(stderr_task, "stderr").await;

        if !status.success() {
            return Err(ExecError::Failed {
                code: status.code(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }

        Ok(ExecOutput {
            exit_code: status.code(),
            stdout,
            stderr,
            started_at_unix_ms: started_at,
            finished_at_unix_ms: chrono::Utc::now().timestamp_millis(),
        })
    }
}
