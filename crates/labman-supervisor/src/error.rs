/// Errors raised while scheduling or supervising tasks.
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    #[error("ctrlc handler could not be installed: {0}")]
    SignalHandler(#[from] ctrlc::Error),

    #[error("a task panicked: {0}")]
    TaskPanicked(String),

    #[error("subprocess '{name}' exited with status {status}")]
    SubprocessFailed { name: String, status: i32 },
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
