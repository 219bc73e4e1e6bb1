//! Camera access for an always-on timelapse camera that also serves a live
//! preview.
//!
//! The [`ModeCoordinator`] owns the one camera and hands it out either for a
//! preview frame or, switched to still mode, for a timelapse picture. The
//! [`TimelapseScheduler`] and every [`FrameSource`] call into it from their
//! own threads.

pub mod camera_api;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod rpicam;
pub mod shutdown;
pub mod stream;
pub mod timelapse;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use crate::camera_api::{
    CameraDevice, CameraMode, Controls, ModeConfig, PixelFormat, PreviewConfig, RawFrame,
    SaveFormat, StillConfig,
};
pub use config::Settings;
pub use coordinator::{ModeCoordinator, StillHandle};
pub use error::{DeviceError, Error, Result};
pub use rpicam::RpicamCamera;
pub use shutdown::RunFlag;
pub use stream::FrameSource;
pub use timelapse::{BlackoutWindow, StatusHandle, TimelapseScheduler, TimelapseStatus};
