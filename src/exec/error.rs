use std::io;

/// Errors from running one command on one box.
#[derive(thiserror::Error, Debug)]
pub enum ExecError {
    #[error("box has no address yet")]
    NoAddress,

    #[error("spawn failed: {0}")]
    Spawn(#[from] io::Error),

    #[error("command failed: code={code:?}, stderr={stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("timeout")]
    Timeout,

    #[error("dispatch aborted: {0}")]
    Aborted(String),
}
