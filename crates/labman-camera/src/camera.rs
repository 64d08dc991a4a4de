use std::time::Duration;

use crate::error::Result;
use crate::frame::{ColorOrder, Frame};

/// Static identifying information about a camera, independent of whether
/// it's currently open.
pub trait CameraInfo: Send + Sync {
    fn name(&self) -> &str;
    fn serial(&self) -> &str;
    fn model(&self) -> &str;
    fn vendor(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// The camera free-runs at its own internal frame rate.
    Internal,
    /// An external hardware line triggers each frame.
    ExternalHardware,
    /// The host triggers each frame via a software command.
    Software,
}

/// A camera that can be configured and polled for frames.
///
/// Implementations are expected to be blocking: acquisition proceeds on
/// a dedicated thread driven by [`crate::stream::FrameStream`], which is
/// the only place async code meets this trait.
pub trait Camera: CameraInfo {
    fn width(&self) -> Result<u32>;
    fn height(&self) -> Result<u32>;
    fn color_order(&self) -> Result<ColorOrder>;

    /// Exposure time in microseconds.
    fn exposure_time_us(&self) -> Result<f64>;
    fn set_exposure_time_us(&mut self, value: f64) -> Result<()>;

    /// Gain in decibels.
    fn gain_db(&self) -> Result<f64>;
    fn set_gain_db(&mut self, value: f64) -> Result<()>;

    fn trigger_mode(&self) -> Result<TriggerMode>;
    fn set_trigger_mode(&mut self, mode: TriggerMode) -> Result<()>;

    fn start_acquisition(&mut self) -> Result<()>;
    fn stop_acquisition(&mut self) -> Result<()>;

    /// Block until a frame is available or `timeout` elapses. Called
    /// repeatedly from the acquisition thread; a well-behaved
    /// implementation returns [`crate::error::CameraError::Timeout`]
    /// rather than blocking forever when no frame arrives in time, so the
    /// acquisition loop can still observe cancellation.
    fn next_frame(&mut self, timeout: Duration) -> Result<Frame>;
}
