/// Errors raised by the observation API.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] labman_store::StoreError),

    #[error("no samples have been logged for '{0}' yet")]
    NoData(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
