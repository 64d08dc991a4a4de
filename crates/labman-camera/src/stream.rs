//! Bridges a blocking [`Camera`] to async consumers.
//!
//! A dedicated background thread owns the camera and calls
//! [`Camera::next_frame`] in a loop, forwarding results over a bounded
//! channel. This mirrors the original threaded-producer design, but
//! replaces its implicit "drop the stream to stop" lifecycle with an
//! explicit [`FrameStream::cancel`]: the producer thread is told to stop
//! and is joined before `cancel` returns, so callers never race a
//! half-stopped acquisition against a camera reconfiguration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::camera::Camera;
use crate::error::{CameraError, Result};
use crate::frame::Frame;

/// A live stream of frames from one camera, backed by a blocking
/// acquisition thread.
pub struct FrameStream {
    rx: mpsc::Receiver<Result<Frame>>,
    cancel_flag: Arc<AtomicBool>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl FrameStream {
    /// Start acquisition and spawn the background producer. `camera` must
    /// already have had [`Camera::start_acquisition`] called if that's
    /// required before polling for frames.
    pub fn spawn<C>(camera: Arc<Mutex<C>>, bufsize: usize, poll_timeout: Duration) -> Self
    where
        C: Camera + Send + 'static,
    {
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel(bufsize);
        let flag = Arc::clone(&cancel_flag);

        let handle = tokio::task::spawn_blocking(move || {
            while !flag.load(Ordering::Acquire) {
                let result = {
                    let mut cam = camera.lock();
                    cam.next_frame(poll_timeout)
                };
                let is_timeout = matches!(result, Err(CameraError::Timeout));
                if tx.blocking_send(result).is_err() {
                    break;
                }
                if is_timeout {
                    continue;
                }
            }
        });

        Self {
            rx,
            cancel_flag,
            handle: Some(handle),
        }
    }

    /// Receive the next frame, or `None` once the producer has stopped
    /// and drained.
    pub async fn next(&mut self) -> Option<Result<Frame>> {
        self.rx.recv().await
    }

    /// Receive a frame only if one is already queued, without waiting.
    /// Used by consumers (like a live-preview sink) that only care about
    /// the most recent frame and want to drain a backlog rather than
    /// process it one by one.
    pub fn try_next(&mut self) -> Option<Result<Frame>> {
        self.rx.try_recv().ok()
    }

    /// Stop the producer thread and wait for it to exit.
    pub async fn cancel(mut self) {
        self.cancel_flag.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "acquisition thread panicked during cancel");
            }
        }
    }
}

/// Pull frames as fast as the camera delivers them into an in-RAM buffer,
/// stopping at `max_frames` or on the first non-timeout error. Used by
/// the delay-save fast path, where frames are held in memory and only
/// written out (or discarded) after the burst completes.
pub async fn fast_acquisition_to_ram(
    stream: &mut FrameStream,
    max_frames: usize,
) -> Result<Vec<Frame>> {
    let mut frames = Vec::with_capacity(max_frames);
    while frames.len() < max_frames {
        match stream.next().await {
            Some(Ok(frame)) => frames.push(frame),
            Some(Err(CameraError::Timeout)) => continue,
            Some(Err(e)) => return Err(e),
            None => break,
        }
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraInfo, TriggerMode};
    use crate::frame::ColorOrder;

    struct CountingCamera {
        counter: u64,
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
        fn width(&self) -> Result<u32> {
            Ok(4)
        }
        fn height(&self) -> Result<u32> {
            Ok(2)
        }
        fn color_order(&self) -> Result<ColorOrder> {
            Ok(ColorOrder::Mono)
        }
        fn exposure_time_us(&self) -> Result<f64> {
            Ok(1000.0)
        }
        fn set_exposure_time_us(&mut self, _value: f64) -> Result<()> {
            Ok(())
        }
        fn gain_db(&self) -> Result<f64> {
            Ok(0.0)
        }
        fn set_gain_db(&mut self, _value: f64) -> Result<()> {
            Ok(())
        }
        fn trigger_mode(&self) -> Result<TriggerMode> {
            Ok(TriggerMode::Internal)
        }
        fn set_trigger_mode(&mut self, _mode: TriggerMode) -> Result<()> {
            Ok(())
        }
        fn start_acquisition(&mut self) -> Result<()> {
            Ok(())
        }
        fn stop_acquisition(&mut self) -> Result<()> {
            Ok(())
        }
        fn next_frame(&mut self, _timeout: Duration) -> Result<Frame> {
            self.counter += 1;
            Ok(Frame {
                pixels: vec![0u8; 8],
                width: 4,
                height: 2,
                stride: 4,
                color_order: ColorOrder::Mono,
                counter: self.counter,
                host_timestamp: 0.0,
            })
        }
    }

    #[tokio::test]
    async fn fast_acquisition_collects_requested_frame_count() {
        let cam = Arc::new(Mutex::new(CountingCamera { counter: 0 }));
        let mut stream = FrameStream::spawn(cam, 8, Duration::from_millis(50));
        let frames = fast_acquisition_to_ram(&mut stream, 5).await.unwrap();
        assert_eq!(frames.len(), 5);
        assert_eq!(frames[4].counter, 5);
        stream.cancel().await;
    }

    #[tokio::test]
    async fn cancel_stops_the_producer_thread() {
        let cam = Arc::new(Mutex::new(CountingCamera { counter: 0 }));
        let stream = FrameStream::spawn(cam, 8, Duration::from_millis(10));
        stream.cancel().await;
    }
}
