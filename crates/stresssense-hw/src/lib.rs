//! stresssense-hw — Webcam capture for the live emotion path.
//!
//! Provides V4L2-based camera access and conversion of the negotiated pixel
//! format into RGB frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameSource, FrameStream, PixelFormat};
pub use frame::Frame;
