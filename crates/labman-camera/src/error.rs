/// Errors raised by a [`crate::Camera`] implementation or the threaded
/// acquisition loop built on top of it.
#[derive(thiserror::Error, Debug)]
pub enum CameraError {
    #[error("timed out waiting for a frame")]
    Timeout,

    #[error("camera backend error: {0}")]
    Backend(String),

    #[error("feature not supported by this camera: {0}")]
    FeatureNotSupported(&'static str),

    #[error("camera is not currently acquiring")]
    NotAcquiring,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CameraError>;
