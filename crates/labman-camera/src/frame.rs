/// Byte order of the pixel data in a [`Frame`]. Kept small and explicit
/// rather than pulling in a full pixel-format crate: the video pipeline
/// only ever needs to know whether it's looking at mono, RGB, or BGR
/// bytes to build an ffmpeg `-pix_fmt` argument or an image-crate buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorOrder {
    Mono,
    Rgb,
    Bgr,
}

impl ColorOrder {
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            ColorOrder::Mono => 1,
            ColorOrder::Rgb | ColorOrder::Bgr => 3,
        }
    }

    /// The ffmpeg `-pix_fmt` name for this byte order.
    pub fn ffmpeg_pix_fmt(&self) -> &'static str {
        match self {
            ColorOrder::Mono => "gray",
            ColorOrder::Rgb => "rgb24",
            ColorOrder::Bgr => "bgr24",
        }
    }
}

/// One acquired camera frame, already resident in host memory.
///
/// This is a plain data struct rather than a lazy/generator-backed view:
/// by the time a `Frame` exists it has already been copied out of the
/// camera driver's buffer, so there is no asynchronous "acknowledge and
/// release" step for a consumer to forget.
#[derive(Debug, Clone)]
pub struct Frame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Row stride in bytes; may exceed `width * color_order.bytes_per_pixel()`
    /// when the driver pads rows.
    pub stride: u32,
    pub color_order: ColorOrder,
    /// Monotonically increasing per-camera frame counter, as reported by
    /// the driver (or synthesized by the host if the driver doesn't).
    pub counter: u64,
    /// Host-clock timestamp (seconds since the Unix epoch) of when the
    /// frame was received from the driver.
    pub host_timestamp: f64,
}

impl Frame {
    pub fn row(&self, y: u32) -> &[u8] {
        let start = (y * self.stride) as usize;
        let end = start + (self.width * self.color_order.bytes_per_pixel()) as usize;
        &self.pixels[start..end]
    }
}
