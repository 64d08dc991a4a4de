//! Camera abstraction and threaded asynchronous frame acquisition.
//!
//! A [`Camera`] implementation is synchronous/blocking, matching how most
//! machine-vision SDKs are shaped; [`stream::FrameStream`] wraps one in a
//! background thread so the rest of the session can consume frames
//! without blocking an async task on driver I/O.

mod camera;
mod error;
mod frame;
mod stream;

pub use camera::{Camera, CameraInfo, TriggerMode};
pub use error::{CameraError, Result};
pub use frame::{ColorOrder, Frame};
pub use stream::{fast_acquisition_to_ram, FrameStream};
