#[derive(thiserror::Error, Debug)]
pub enum VideoError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("camera error: {0}")]
    Camera(#[from] labman_camera::CameraError),

    #[error("image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("ffmpeg exited with status {0}")]
    FfmpegExited(std::process::ExitStatus),

    #[error("ffmpeg binary not found on PATH")]
    FfmpegNotFound,

    #[error("trigger generator failed to arm: {0}")]
    Trigger(String),

    #[error("fast acquisition did not complete within its timeout: {0}")]
    AcquisitionTimeout(String),
}

pub type Result<T> = std::result::Result<T, VideoError>;
