//! Frame sinks: the different places a camera's frames can be routed to.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use image::{ColorType, ImageEncoder};
use labman_camera::{ColorOrder, Frame};
use labman_session::Session;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};

use crate::error::{Result, VideoError};
use crate::layout::image_file_name;

/// On-disk image format for the image-files sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Bmp,
    Png,
    Tiff,
    Jpg,
}

impl ImageFormat {
    fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Bmp => "bmp",
            ImageFormat::Png => "png",
            ImageFormat::Tiff => "tif",
            ImageFormat::Jpg => "jpg",
        }
    }

    fn to_image_format(self) -> image::ImageFormat {
        match self {
            ImageFormat::Bmp => image::ImageFormat::Bmp,
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::Tiff => image::ImageFormat::Tiff,
            ImageFormat::Jpg => image::ImageFormat::Jpeg,
        }
    }
}

fn color_type_of(order: ColorOrder) -> ColorType {
    match order {
        ColorOrder::Mono => ColorType::L8,
        ColorOrder::Rgb | ColorOrder::Bgr => ColorType::Rgb8,
    }
}

/// BGR and RGB have the same byte-per-pixel layout but opposite channel
/// order; `image` only understands RGB, so BGR frames need their bytes
/// swapped per pixel before encoding.
fn to_rgb_bytes(frame: &Frame) -> std::borrow::Cow<'_, [u8]> {
    match frame.color_order {
        ColorOrder::Bgr => {
            let mut out = frame.pixels.clone();
            for px in out.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
            std::borrow::Cow::Owned(out)
        }
        ColorOrder::Mono | ColorOrder::Rgb => std::borrow::Cow::Borrowed(&frame.pixels),
    }
}

/// Writes each frame as a numbered image file under a directory.
pub struct ImageFilesSink {
    dir: PathBuf,
    camera_index: usize,
    format: ImageFormat,
    next_index: u64,
    session: Option<Arc<Session>>,
}

impl ImageFilesSink {
    pub fn new(dir: PathBuf, camera_index: usize, format: ImageFormat) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            camera_index,
            format,
            next_index: 0,
            session: None,
        })
    }

    /// Log each frame's `(timestamp, counter)` pair to `session` before
    /// writing it out, so the accounting log stays authoritative even if
    /// a crash truncates the trailing images.
    pub fn with_session(mut self, session: Arc<Session>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if let Some(session) = &self.session {
            let mut entries = HashMap::with_capacity(2);
            entries.insert(format!("ts_cam{}", self.camera_index), frame.host_timestamp);
            entries.insert(format!("count_cam{}", self.camera_index), frame.counter as f64);
            session
                .add_entry(&entries)
                .map_err(|e| VideoError::Io(std::io::Error::other(e.to_string())))?;
        }

        let name = image_file_name(self.camera_index, self.next_index, self.format.extension());
        let path = self.dir.join(name);
        let bytes = to_rgb_bytes(frame);
        let color = color_type_of(frame.color_order);
        let file = std::fs::File::create(&path)?;
        let mut writer = std::io::BufWriter::new(file);
        match self.format {
            ImageFormat::Jpg => {
                image::codecs::jpeg::JpegEncoder::new(&mut writer).write_image(
                    &bytes,
                    frame.width,
                    frame.height,
                    color.into(),
                )?;
            }
            _ => {
                image::write_buffer_with_format(
                    &mut writer,
                    &bytes,
                    frame.width,
                    frame.height,
                    color,
                    self.format.to_image_format(),
                )?;
            }
        }
        self.next_index += 1;
        Ok(())
    }
}

/// The ffmpeg `-pix_fmt` this sink writes, after `convert_for_ffmpeg` has
/// normalized and (for color frames) byte-swapped to BGR.
fn output_pix_fmt(color_order: ColorOrder) -> &'static str {
    match color_order {
        ColorOrder::Mono => "gray",
        ColorOrder::Rgb | ColorOrder::Bgr => "bgr24",
    }
}

/// The darkest and brightest byte values present in `frame`.
fn frame_min_max(frame: &Frame) -> (u8, u8) {
    let mut lo = u8::MAX;
    let mut hi = u8::MIN;
    for &b in &frame.pixels {
        lo = lo.min(b);
        hi = hi.max(b);
    }
    (lo, hi)
}

/// Rescale `frame`'s bytes into `[0, 255]` using `(fmin, fmax)` and
/// `gain`, then swap RGB to BGR (ffmpeg's expected wire order) if needed.
/// `fmin`/`fmax` are captured once, from the recording's first frame, and
/// reused for every later frame rather than recomputed per frame.
fn convert_for_ffmpeg(frame: &Frame, fmin: u8, fmax: u8, gain: f64) -> Vec<u8> {
    let range = (fmax as f64 - fmin as f64).max(1.0);
    let mut out: Vec<u8> = frame
        .pixels
        .iter()
        .map(|&px| (255.0 * gain * (px as f64 - fmin as f64) / range).clamp(0.0, 255.0) as u8)
        .collect();
    if frame.color_order == ColorOrder::Rgb {
        for px in out.chunks_exact_mut(3) {
            px.swap(0, 2);
        }
    }
    out
}

/// Pipes frames, converted to 8-bit BGR, to an `ffmpeg` subprocess over
/// stdin, encoding to a finished mp4 file. The subprocess is spawned
/// lazily on the first frame handed to `write_frame`, so a camera that
/// never produces a frame never spawns an encoder at all.
pub struct FfmpegSink {
    out_path: PathBuf,
    width: u32,
    height: u32,
    fps: f64,
    color_order: ColorOrder,
    gain: f64,
    child: Option<Child>,
    minmax: Option<(u8, u8)>,
}

impl FfmpegSink {
    /// Prepare to encode raw frames of `width`x`height` at `fps` into
    /// `out_path` as mpeg4, normalized by `gain` and the first frame's
    /// min/max. Nothing is spawned until the first `write_frame` call.
    pub fn new(out_path: PathBuf, width: u32, height: u32, fps: f64, color_order: ColorOrder, gain: f64) -> Self {
        Self {
            out_path,
            width,
            height,
            fps,
            color_order,
            gain,
            child: None,
            minmax: None,
        }
    }

    fn spawn_child(&self) -> Result<Child> {
        let size = format!("{}x{}", self.width, self.height);
        let mut cmd = Command::new("ffmpeg");
        cmd.args([
            "-f",
            "rawvideo",
            "-vcodec",
            "rawvideo",
            "-pix_fmt",
            output_pix_fmt(self.color_order),
            "-s",
            &size,
            "-r",
        ])
        .arg(format!("{}", self.fps))
        .args(["-i", "-", "-an", "-vcodec", "mpeg4", "-b:v", "5000k"])
        .arg(&self.out_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

        cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VideoError::FfmpegNotFound
            } else {
                VideoError::Io(e)
            }
        })
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if self.child.is_none() {
            self.child = Some(self.spawn_child()?);
        }
        let (fmin, fmax) = *self.minmax.get_or_insert_with(|| frame_min_max(frame));
        let bytes = convert_for_ffmpeg(frame, fmin, fmax, self.gain);

        let stdin = self
            .child
            .as_mut()
            .expect("just spawned above")
            .stdin
            .as_mut()
            .expect("ffmpeg child spawned with piped stdin");
        stdin.write_all(&bytes).await?;
        Ok(())
    }

    /// Close stdin (signalling end-of-stream to ffmpeg) and wait for it
    /// to finish encoding. A no-op if no frame was ever written, since
    /// nothing was spawned.
    pub async fn finish(mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        drop(child.stdin.take());
        let status = child.wait().await?;
        if !status.success() {
            return Err(VideoError::FfmpegExited(status));
        }
        Ok(())
    }

    /// Give the Supervisor ownership of the child, if one has been
    /// spawned, so it gets killed on shutdown even if `finish` is never
    /// reached.
    pub fn into_child(mut self) -> Option<Child> {
        self.child.take()
    }
}

/// Keeps the last `max_frames` frames resident in memory. Used by the
/// delay-save fast-acquisition path, where frames are only written out
/// (or discarded) once a burst completes.
pub struct InRamSink {
    frames: Arc<Mutex<Vec<Frame>>>,
    max_frames: usize,
}

impl InRamSink {
    pub fn new(max_frames: usize) -> Self {
        Self {
            frames: Arc::new(Mutex::new(Vec::with_capacity(max_frames))),
            max_frames,
        }
    }

    pub fn write_frame(&mut self, frame: Frame) {
        let mut frames = self.frames.lock();
        if frames.len() >= self.max_frames {
            frames.remove(0);
        }
        frames.push(frame);
    }

    pub fn handle(&self) -> Arc<Mutex<Vec<Frame>>> {
        Arc::clone(&self.frames)
    }

    pub fn drain(&self) -> Vec<Frame> {
        std::mem::take(&mut self.frames.lock())
    }
}

/// Bounding box a live-preview frame is shrunk to fit inside. Frames
/// already smaller than this are left at native resolution.
const LIVE_PREVIEW_MAX_WIDTH: u32 = 800;
const LIVE_PREVIEW_MAX_HEIGHT: u32 = 600;

/// Shrink `frame` (never enlarge) so it fits within the live-preview
/// bounding box, returning the possibly-resized bytes alongside their
/// width, height, and color type.
fn rescale_for_preview(frame: &Frame) -> (Vec<u8>, u32, u32, ColorType) {
    let bytes = to_rgb_bytes(frame).into_owned();
    let color = color_type_of(frame.color_order);
    let zoom = (frame.height as f64 / LIVE_PREVIEW_MAX_HEIGHT as f64)
        .max(frame.width as f64 / LIVE_PREVIEW_MAX_WIDTH as f64);
    if zoom <= 1.0 {
        return (bytes, frame.width, frame.height, color);
    }

    let new_width = ((frame.width as f64 / zoom).round() as u32).max(1);
    let new_height = ((frame.height as f64 / zoom).round() as u32).max(1);
    let resized = match color {
        ColorType::L8 => {
            let img = image::GrayImage::from_raw(frame.width, frame.height, bytes)
                .expect("mono frame buffer matches width*height");
            image::imageops::resize(&img, new_width, new_height, image::imageops::FilterType::Triangle)
                .into_raw()
        }
        _ => {
            let img = image::RgbImage::from_raw(frame.width, frame.height, bytes)
                .expect("rgb frame buffer matches width*height*3");
            image::imageops::resize(&img, new_width, new_height, image::imageops::FilterType::Triangle)
                .into_raw()
        }
    };
    (resized, new_width, new_height, color)
}

/// Holds only the most recent frame, PNG-encoded and shrunk to fit an
/// 800x600 preview box, for the HTTP surface's live-preview route to
/// serve without re-touching the camera.
pub struct LivePreviewSink {
    latest_png: Arc<Mutex<Option<Vec<u8>>>>,
}

impl LivePreviewSink {
    pub fn new() -> Self {
        Self {
            latest_png: Arc::new(Mutex::new(None)),
        }
    }

    pub fn handle(&self) -> Arc<Mutex<Option<Vec<u8>>>> {
        Arc::clone(&self.latest_png)
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let (bytes, width, height, color) = rescale_for_preview(frame);
        let mut png_bytes = Vec::new();
        image::codecs::png::PngEncoder::new(&mut png_bytes).write_image(&bytes, width, height, color.into())?;
        *self.latest_png.lock() = Some(png_bytes);
        Ok(())
    }
}

impl Default for LivePreviewSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labman_camera::ColorOrder;
    use labman_clock::FixedClock;
    use labman_session::OpenMode;

    fn make_frame(counter: u64, ts: f64) -> Frame {
        Frame {
            pixels: vec![0u8; 4 * 3],
            width: 2,
            height: 2,
            stride: 6,
            color_order: ColorOrder::Bgr,
            counter,
            host_timestamp: ts,
        }
    }

    #[test]
    fn image_files_sink_writes_numbered_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = ImageFilesSink::new(dir.path().to_path_buf(), 0, ImageFormat::Png).unwrap();
        sink.write_frame(&make_frame(0, 1.0)).unwrap();
        sink.write_frame(&make_frame(1, 1.1)).unwrap();
        assert!(dir.path().join(image_file_name(0, 0, "png")).exists());
        assert!(dir.path().join(image_file_name(0, 1, "png")).exists());
    }

    #[test]
    fn image_files_sink_logs_accounting_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(
            Session::open(None, OpenMode::CreateIfMissing, false, Arc::new(FixedClock::new(0.0))).unwrap(),
        );
        let mut sink = ImageFilesSink::new(dir.path().to_path_buf(), 2, ImageFormat::Png)
            .unwrap()
            .with_session(session.clone());
        sink.write_frame(&make_frame(7, 42.5)).unwrap();

        let logged = session.logged_last_values().unwrap();
        assert_eq!(logged["ts_cam2"].value, 42.5);
        assert_eq!(logged["count_cam2"].value, 7.0);
    }

    #[test]
    fn in_ram_sink_drops_oldest_past_capacity() {
        let mut sink = InRamSink::new(2);
        sink.write_frame(make_frame(0, 0.0));
        sink.write_frame(make_frame(1, 1.0));
        sink.write_frame(make_frame(2, 2.0));
        let frames = sink.drain();
        assert_eq!(frames.iter().map(|f| f.counter).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn ffmpeg_sink_finish_is_a_noop_when_no_frame_was_ever_written() {
        let out_path = tempfile::tempdir().unwrap().path().join("out.mp4");
        let sink = FfmpegSink::new(out_path, 2, 2, 30.0, ColorOrder::Bgr, 1.0);
        sink.finish().await.unwrap();
    }

    #[test]
    fn convert_for_ffmpeg_normalizes_to_full_range_and_swaps_rgb_to_bgr() {
        let mut frame = make_frame(0, 0.0);
        frame.color_order = ColorOrder::Rgb;
        frame.pixels = vec![10, 20, 30, 110, 120, 130];
        let bytes = convert_for_ffmpeg(&frame, 10, 130, 1.0);
        assert_eq!(bytes, vec![42, 21, 0, 255, 233, 212]);
    }

    #[test]
    fn convert_for_ffmpeg_applies_gain_and_clamps() {
        let mut frame = make_frame(0, 0.0);
        frame.color_order = ColorOrder::Mono;
        frame.pixels = vec![50, 100, 150];
        let bytes = convert_for_ffmpeg(&frame, 0, 100, 2.0);
        assert_eq!(bytes, vec![255, 255, 255]);
    }

    #[test]
    fn rescale_for_preview_leaves_small_frames_untouched() {
        let frame = make_frame(0, 0.0);
        let (bytes, width, height, _color) = rescale_for_preview(&frame);
        assert_eq!((width, height), (frame.width, frame.height));
        assert_eq!(bytes.len(), frame.pixels.len());
    }

    #[test]
    fn rescale_for_preview_shrinks_oversized_frames_to_fit() {
        let frame = Frame {
            pixels: vec![128u8; 1600 * 1200],
            width: 1600,
            height: 1200,
            stride: 1600,
            color_order: ColorOrder::Mono,
            counter: 0,
            host_timestamp: 0.0,
        };
        let (bytes, width, height, _color) = rescale_for_preview(&frame);
        assert!(width <= LIVE_PREVIEW_MAX_WIDTH);
        assert!(height <= LIVE_PREVIEW_MAX_HEIGHT);
        assert_eq!(bytes.len(), (width * height) as usize);
    }
}
