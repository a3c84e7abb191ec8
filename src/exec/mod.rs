pub mod error;
pub mod ssh;

use async_trait::async_trait;

pub use error::ExecError;
pub use ssh::SshExecutor;

/// Login parameters shared by every box in one dispatch.
#[derive(Debug, Clone, Default)]
pub struct SshCredentials {
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
}

/// Where and as whom to run a command.
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub address: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
}

impl SshTarget {
    pub fn new(address: impl Into<String>, creds: &SshCredentials) -> Self {
        Self {
            address: address.into(),
            port: creds.port,
            username: creds.username.clone(),
            password: creds.password.clone(),
        }
    }
}

/// Captured result of a remote command that exited successfully.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub started_at_unix_ms: i64,
    pub finished_at_unix_ms: i64,
}

impl ExecOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    pub fn duration_ms(&self) -> i64 {
        self.finished_at_unix_ms - self.started_at_unix_ms
    }
}


/// Runs one shell command on one remote box.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn run_command(&self, command: &str, target: &SshTarget)
        -> Result<ExecOutput, ExecError>;
}
