use std::path::PathBuf;

use crate::sink::ImageFormat;
use crate::trigger::TriggerConfig;

/// Which sink a camera's frames should be routed to during a recording.
#[derive(Debug, Clone)]
pub enum SinkKind {
    ImageFiles { format: ImageFormat },
    /// One mp4 per camera, encoded by an `ffmpeg` subprocess. `gain` is
    /// the multiplicative factor applied (alongside a per-run min/max
    /// normalization) before each frame is converted to 8-bit BGR.
    Ffmpeg { gain: f64 },
    InRam { max_frames: usize },
    LivePreview,
}

#[derive(Debug, Clone)]
pub struct CameraVideoConfig {
    pub name: String,
    pub sink: SinkKind,
}

#[derive(Debug, Clone)]
pub struct VideoSessionConfig {
    pub output_dir: PathBuf,
    pub fps: f64,
    /// Bounded queue depth between a camera's producer and its sink; a
    /// slow sink applies backpressure to acquisition rather than growing
    /// memory without bound.
    pub queue_capacity: usize,
    pub cameras: Vec<CameraVideoConfig>,
    /// Total frame count to capture, if the run is bounded rather than
    /// free-running. Drives both burst-trigger configuration and the
    /// delay-save fast path's timeout.
    pub nframes: Option<u64>,
    /// Configure the trigger (if any) as a counted burst instead of a
    /// free-running square wave.
    pub burst_mode: bool,
    /// If set, every camera is held on `TriggerMode::ExternalHardware`
    /// and a trigger-starter task is required to release it; if unset,
    /// cameras free-run on `TriggerMode::Internal`.
    pub trigger: Option<TriggerConfig>,
}
