#[derive(thiserror::Error, Debug)]
pub enum TaskError {
    #[error(transparent)]
    Session(#[from] labman_session::SessionError),

    #[error("email message could not be built: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("smtp error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("chart rendering error: {0}")]
    Image(#[from] image::ImageError),

    #[error("invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),
}

pub type Result<T> = std::result::Result<T, TaskError>;
