//! The video-acquisition pipeline: one producer per camera feeding a
//! bounded queue, drained by whichever sink that camera is configured
//! for (image files, an ffmpeg encoder, an in-RAM ring buffer, or a
//! live-preview snapshot).

mod config;
mod error;
mod layout;
mod sink;
mod trigger;

pub use config::{CameraVideoConfig, SinkKind, VideoSessionConfig};
pub use error::{Result, VideoError};
pub use layout::allocate_run_dir;
pub use sink::{FfmpegSink, ImageFilesSink, ImageFormat, InRamSink, LivePreviewSink};
pub use trigger::{TriggerConfig, TriggerSource};

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use labman_camera::{Camera, CameraError, Frame, FrameStream, TriggerMode};
use labman_session::{OpenMode, Session};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// A running recording: one task per camera, each draining its own
/// `FrameStream` into the sink its config names. Carries its own
/// accounting session (`<output_dir>/session.db`) so every written frame
/// has its `(timestamp, counter)` pair logged before the image hits disk.
pub struct VideoSession {
    config: VideoSessionConfig,
    run_dir: PathBuf,
    session: Arc<Session>,
    handles: Vec<JoinHandle<Result<()>>>,
    live_preview_handles: HashMap<String, Arc<Mutex<Option<Vec<u8>>>>>,
    in_ram_handles: HashMap<String, Arc<Mutex<Vec<Frame>>>>,
    /// Camera names still arming under `TriggerMode::ExternalHardware`.
    /// A trigger-starter task waits for this to empty before firing.
    initialising_cams: Arc<Mutex<HashSet<String>>>,
}

impl VideoSession {
    /// Allocate this run's output directory (`output_dir/YYYY-MM-DD/NN/`)
    /// and open its accounting session, ready to start cameras into.
    pub fn new(config: VideoSessionConfig, clock: Arc<dyn labman_clock::Clock>) -> Result<Self> {
        let today = chrono::Local::now().date_naive();
        let run_dir = allocate_run_dir(&config.output_dir, today)?;
        let session = Session::open(
            Some(&config.output_dir.join("session.db")),
            OpenMode::CreateIfMissing,
            false,
            clock,
        )
        .map_err(|e| VideoError::Io(std::io::Error::other(e.to_string())))?;
        let initialising_cams = if config.trigger.is_some() {
            config.cameras.iter().map(|c| c.name.clone()).collect()
        } else {
            HashSet::new()
        };
        Ok(Self {
            config,
            run_dir,
            session: Arc::new(session),
            handles: Vec::new(),
            live_preview_handles: HashMap::new(),
            in_ram_handles: HashMap::new(),
            initialising_cams: Arc::new(Mutex::new(initialising_cams)),
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn live_preview_handle(&self, camera_name: &str) -> Option<Arc<Mutex<Option<Vec<u8>>>>> {
        self.live_preview_handles.get(camera_name).cloned()
    }

    pub fn in_ram_handle(&self, camera_name: &str) -> Option<Arc<Mutex<Vec<Frame>>>> {
        self.in_ram_handles.get(camera_name).cloned()
    }

    /// Start acquisition for one camera, routing its frames to whichever
    /// sink `cameras[camera_index]` names. The camera is put into
    /// `TriggerMode::ExternalHardware` (and its name held in
    /// `initialising_cams` until this call returns) when this run has a
    /// trigger configured, or `TriggerMode::Internal` otherwise.
    pub fn start<C>(&mut self, camera_index: usize, camera: Arc<Mutex<C>>) -> Result<()>
    where
        C: Camera + Send + 'static,
    {
        let cam_cfg = self.config.cameras[camera_index].clone();
        let (width, height, color_order) = {
            let mut cam = camera.lock();
            let mode = if self.config.trigger.is_some() {
                TriggerMode::ExternalHardware
            } else {
                TriggerMode::Internal
            };
            cam.set_trigger_mode(mode)?;
            cam.start_acquisition()?;
            (cam.width()?, cam.height()?, cam.color_order()?)
        };
        self.initialising_cams.lock().remove(&cam_cfg.name);

        let fps = self.config.fps;
        let run_dir = self.run_dir.clone();
        let run_number = run_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("00")
            .to_string();
        let mut stream = FrameStream::spawn(camera, self.config.queue_capacity, Duration::from_secs(1));

        let handle: JoinHandle<Result<()>> = match cam_cfg.sink {
            SinkKind::ImageFiles { format } => {
                let mut sink = ImageFilesSink::new(run_dir.join(&cam_cfg.name), camera_index, format)?
                    .with_session(self.session.clone());
                tokio::spawn(async move {
                    while let Some(result) = stream.next().await {
                        match result {
                            Ok(frame) => sink.write_frame(&frame)?,
                            Err(CameraError::Timeout) => continue,
                            Err(e) => return Err(e.into()),
                        }
                    }
                    Ok(())
                })
            }
            SinkKind::Ffmpeg { gain } => {
                let out_path = run_dir.join(format!("{run_number}-cam{camera_index}.mp4"));
                let mut sink = FfmpegSink::new(out_path, width, height, fps, color_order, gain);
                tokio::spawn(async move {
                    while let Some(result) = stream.next().await {
                        match result {
                            Ok(frame) => sink.write_frame(&frame).await?,
                            Err(CameraError::Timeout) => continue,
                            Err(e) => return Err(e.into()),
                        }
                    }
                    sink.finish().await
                })
            }
            SinkKind::InRam { max_frames } => {
                let mut sink = InRamSink::new(max_frames);
                self.in_ram_handles.insert(cam_cfg.name.clone(), sink.handle());
                tokio::spawn(async move {
                    while let Some(result) = stream.next().await {
                        match result {
                            Ok(frame) => sink.write_frame(frame),
                            Err(CameraError::Timeout) => continue,
                            Err(e) => return Err(e.into()),
                        }
                    }
                    Ok(())
                })
            }
            SinkKind::LivePreview => {
                let mut sink = LivePreviewSink::new();
                self.live_preview_handles.insert(cam_cfg.name.clone(), sink.handle());
                tokio::spawn(async move {
                    while let Some(result) = stream.next().await {
                        let frame = match result {
                            Ok(frame) => frame,
                            Err(CameraError::Timeout) => continue,
                            Err(e) => return Err(e.into()),
                        };
                        // Only the most recent frame matters to a preview;
                        // drain any backlog before rendering it.
                        let mut latest = frame;
                        let mut dropped = 0u64;
                        while let Some(next) = stream.try_next() {
                            match next {
                                Ok(frame) => {
                                    latest = frame;
                                    dropped += 1;
                                }
                                Err(CameraError::Timeout) => continue,
                                Err(e) => return Err(e.into()),
                            }
                        }
                        if dropped > 0 {
                            tracing::debug!(dropped, "live preview dropped stale frames");
                        }
                        sink.write_frame(&latest)?;
                    }
                    Ok(())
                })
            }
        };

        self.handles.push(handle);
        Ok(())
    }

    /// Spawn the trigger-starter task: it configures `trigger` for this
    /// run and fires it once every camera started via [`Self::start`] has
    /// finished arming (`initialising_cams` empties). A no-op if this run
    /// has no trigger configured.
    pub fn start_trigger<T>(&mut self, trigger: T) -> Result<()>
    where
        T: TriggerSource + 'static,
    {
        let Some(trigger_config) = self.config.trigger.clone() else {
            return Ok(());
        };
        let initialising_cams = self.initialising_cams.clone();
        let handle = tokio::spawn(async move {
            trigger::run_trigger_starter(trigger, trigger_config, initialising_cams).await
        });
        self.handles.push(handle);
        Ok(())
    }

    /// The delay-save fast path: capture `nframes` from every camera at
    /// full camera rate into RAM, bounded by `5 + nframes / fps` seconds,
    /// then push the buffered frames through each camera's sink
    /// synchronously once every camera has finished its burst.
    pub async fn run_fast_acquisition<C>(
        &mut self,
        cameras: Vec<(usize, Arc<Mutex<C>>)>,
        nframes: usize,
    ) -> Result<()>
    where
        C: Camera + Send + 'static,
    {
        let total_timeout = Duration::from_secs_f64(5.0 + nframes as f64 / self.config.fps);
        let poll_timeout = Duration::from_secs_f64(1.0 / self.config.fps).max(Duration::from_millis(1));

        let mut tasks = Vec::with_capacity(cameras.len());
        for (camera_index, camera) in cameras {
            let cam_cfg = self.config.cameras[camera_index].clone();
            {
                let mut cam = camera.lock();
                cam.set_trigger_mode(TriggerMode::ExternalHardware)?;
                cam.start_acquisition()?;
            }
            self.initialising_cams.lock().remove(&cam_cfg.name);
            tasks.push(tokio::spawn(async move {
                tokio::time::timeout(total_timeout, fast_acquisition_to_ram(camera, nframes, poll_timeout))
                    .await
                    .map_err(|_| VideoError::AcquisitionTimeout(format!("camera {camera_index}")))?
                    .map(|frames| (camera_index, cam_cfg, frames))
            }));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            let (camera_index, cam_cfg, frames) = task
                .await
                .map_err(|e| VideoError::Io(std::io::Error::other(e.to_string())))??;
            results.push((camera_index, cam_cfg, frames));
        }

        for (camera_index, cam_cfg, frames) in results {
            self.write_buffered_frames(camera_index, &cam_cfg, frames).await?;
        }
        Ok(())
    }

    /// Push a fast-acquisition burst's buffered frames through the sink
    /// `cam_cfg` names, synchronously, now that the burst is complete.
    async fn write_buffered_frames(
        &self,
        camera_index: usize,
        cam_cfg: &CameraVideoConfig,
        frames: Vec<Frame>,
    ) -> Result<()> {
        match &cam_cfg.sink {
            SinkKind::ImageFiles { format } => {
                let mut sink = ImageFilesSink::new(self.run_dir.join(&cam_cfg.name), camera_index, *format)?
                    .with_session(self.session.clone());
                for frame in &frames {
                    sink.write_frame(frame)?;
                }
            }
            SinkKind::Ffmpeg { gain } => {
                let run_number = self
                    .run_dir
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("00")
                    .to_string();
                let out_path = self.run_dir.join(format!("{run_number}-cam{camera_index}.mp4"));
                if let Some(first) = frames.first() {
                    let mut sink =
                        FfmpegSink::new(out_path, first.width, first.height, self.config.fps, first.color_order, *gain);
                    for frame in &frames {
                        sink.write_frame(frame).await?;
                    }
                    sink.finish().await?;
                }
            }
            SinkKind::InRam { .. } | SinkKind::LivePreview => {
                // Nothing to flush: these sinks only ever hold the frames
                // already in memory or already shown.
            }
        }
        Ok(())
    }

    /// Wait for every camera task to finish (they finish when their
    /// `FrameStream` is cancelled or errors out).
    pub async fn join_all(self) -> Result<()> {
        for handle in self.handles {
            handle
                .await
                .map_err(|e| VideoError::Io(std::io::Error::other(e.to_string())))??;
        }
        Ok(())
    }
}

/// The delay-save fast path: acquire `max_frames` from `camera` as fast
/// as it will deliver them, holding them entirely in RAM, without
/// touching any on-disk sink. Used when a burst needs to be captured
/// at full camera rate and only decided on (write out, or discard) once
/// it's complete.
pub async fn fast_acquisition_to_ram<C>(
    camera: Arc<Mutex<C>>,
    max_frames: usize,
    poll_timeout: Duration,
) -> Result<Vec<Frame>>
where
    C: Camera + Send + 'static,
{
    let mut stream = FrameStream::spawn(camera, max_frames.max(1), poll_timeout);
    let frames = labman_camera::fast_acquisition_to_ram(&mut stream, max_frames).await?;
    stream.cancel().await;
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{CameraVideoConfig, VideoSessionConfig};
    use labman_camera::{CameraInfo, ColorOrder, TriggerMode};
    use labman_clock::SystemClock;

    struct CountingCamera {
        counter: u64,
        max_frames: u64,
    }

    impl CameraInfo for CountingCamera {
        fn name(&self) -> &str {
            "test"
        }
        fn serial(&self) -> &str {
            "0000"
        }
        fn model(&self) -> &str {
            "test-model"
        }
        fn vendor(&self) -> &str {
            "test-vendor"
        }
    }

    impl Camera for CountingCamera {
        fn width(&self) -> labman_camera::Result<u32> {
            Ok(2)
        }
        fn height(&self) -> labman_camera::Result<u32> {
            Ok(2)
        }
        fn color_order(&self) -> labman_camera::Result<ColorOrder> {
            Ok(ColorOrder::Bgr)
        }
        fn exposure_time_us(&self) -> labman_camera::Result<f64> {
            Ok(1000.0)
        }
        fn set_exposure_time_us(&mut self, _value: f64) -> labman_camera::Result<()> {
            Ok(())
        }
        fn gain_db(&self) -> labman_camera::Result<f64> {
            Ok(0.0)
        }
        fn set_gain_db(&mut self, _value: f64) -> labman_camera::Result<()> {
            Ok(())
        }
        fn trigger_mode(&self) -> labman_camera::Result<TriggerMode> {
            Ok(TriggerMode::Internal)
        }
        fn set_trigger_mode(&mut self, _mode: TriggerMode) -> labman_camera::Result<()> {
            Ok(())
        }
        fn start_acquisition(&mut self) -> labman_camera::Result<()> {
            Ok(())
        }
        fn stop_acquisition(&mut self) -> labman_camera::Result<()> {
            Ok(())
        }
        fn next_frame(&mut self, _timeout: Duration) -> labman_camera::Result<Frame> {
            if self.counter >= self.max_frames {
                return Err(CameraError::Timeout);
            }
            self.counter += 1;
            Ok(Frame {
                pixels: vec![0u8; 2 * 2 * 3],
                width: 2,
                height: 2,
                stride: 6,
                color_order: ColorOrder::Bgr,
                counter: self.counter,
                host_timestamp: self.counter as f64,
            })
        }
    }

    #[tokio::test]
    async fn image_files_recording_logs_accounting_and_writes_files() {
        let base = tempfile::tempdir().unwrap();
        let config = VideoSessionConfig {
            output_dir: base.path().to_path_buf(),
            fps: 30.0,
            queue_capacity: 8,
            cameras: vec![CameraVideoConfig {
                name: "cam0".to_string(),
                sink: SinkKind::ImageFiles {
                    format: sink::ImageFormat::Png,
                },
            }],
            nframes: None,
            burst_mode: false,
            trigger: None,
        };
        let mut video_session = VideoSession::new(config, Arc::new(SystemClock::new())).unwrap();
        let session = video_session.session().clone();

        let camera = Arc::new(Mutex::new(CountingCamera {
            counter: 0,
            max_frames: 3,
        }));
        video_session.start(0, camera).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        let logged = session.logged_last_values().unwrap();
        assert!(logged.contains_key("ts_cam0"));
        assert!(logged.contains_key("count_cam0"));

        let cam_dir = video_session.run_dir().join("cam0");
        assert!(cam_dir.join(layout::image_file_name(0, 0, "png")).exists());
    }

    fn ffmpeg_config(base: &Path) -> VideoSessionConfig {
        VideoSessionConfig {
            output_dir: base.to_path_buf(),
            fps: 30.0,
            queue_capacity: 8,
            cameras: vec![CameraVideoConfig {
                name: "cam0".to_string(),
                sink: SinkKind::Ffmpeg { gain: 1.0 },
            }],
            nframes: None,
            burst_mode: false,
            trigger: None,
        }
    }

    #[test]
    fn ffmpeg_output_path_is_named_by_run_number_and_camera_index() {
        let base = tempfile::tempdir().unwrap();
        let video_session = VideoSession::new(ffmpeg_config(base.path()), Arc::new(SystemClock::new())).unwrap();
        let run_number = video_session.run_dir().file_name().unwrap().to_str().unwrap().to_string();

        // Mirrors the naming `start`/`write_buffered_frames` compute
        // internally, without requiring an actual `ffmpeg` binary on PATH.
        let expected_name = format!("{run_number}-cam0.mp4");
        assert_eq!(run_number.len(), 2, "run directories are two-digit numbers");
        assert!(video_session.run_dir().join(&expected_name).starts_with(video_session.run_dir()));
    }

    #[derive(Default)]
    struct TriggerState {
        square_freq: Option<f64>,
        fired: bool,
    }

    struct RecordingTrigger {
        state: Arc<parking_lot::Mutex<TriggerState>>,
    }

    impl TriggerSource for RecordingTrigger {
        fn configure_square(&mut self, freq: f64) -> Result<()> {
            self.state.lock().square_freq = Some(freq);
            Ok(())
        }
        fn configure_burst(&mut self, _freq: f64, _pulses: u64) -> Result<()> {
            Ok(())
        }
        fn trigger(&mut self) -> Result<()> {
            self.state.lock().fired = true;
            Ok(())
        }
    }

    #[tokio::test]
    async fn trigger_starter_waits_for_every_camera_to_arm() {
        let base = tempfile::tempdir().unwrap();
        let mut config = ffmpeg_config(base.path());
        config.cameras[0].sink = SinkKind::InRam { max_frames: 8 };
        config.trigger = Some(TriggerConfig {
            framerate: 30.0,
            nframes: None,
            burst_mode: false,
            additional_trig: 0,
        });
        let mut video_session = VideoSession::new(config, Arc::new(SystemClock::new())).unwrap();

        let state = Arc::new(parking_lot::Mutex::new(TriggerState::default()));
        video_session
            .start_trigger(RecordingTrigger { state: state.clone() })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!state.lock().fired, "must not fire before the camera arms");

        let camera = Arc::new(Mutex::new(CountingCamera {
            counter: 0,
            max_frames: 3,
        }));
        video_session.start(0, camera).unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(state.lock().fired);
        assert_eq!(state.lock().square_freq, Some(30.0));
    }

    #[tokio::test]
    async fn fast_acquisition_pushes_buffered_frames_through_the_sink() {
        let base = tempfile::tempdir().unwrap();
        let mut config = ffmpeg_config(base.path());
        config.cameras[0].sink = SinkKind::ImageFiles {
            format: sink::ImageFormat::Png,
        };
        let mut video_session = VideoSession::new(config, Arc::new(SystemClock::new())).unwrap();

        let camera = Arc::new(Mutex::new(CountingCamera {
            counter: 0,
            max_frames: 100,
        }));
        video_session
            .run_fast_acquisition(vec![(0, camera)], 3)
            .await
            .unwrap();

        let cam_dir = video_session.run_dir().join("cam0");
        assert!(cam_dir.join(layout::image_file_name(0, 2, "png")).exists());
    }
}
