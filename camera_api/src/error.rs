use crate::camera_api::CameraMode;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a camera backend.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("could not spawn {program}: {source}")]
    Spawn {
        program: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("{program} exited with {status}")]
    ExitStatus {
        program: &'static str,
        status: std::process::ExitStatus,
    },
    #[error("preview pipe closed before a full frame was read")]
    StreamClosed,
    #[error("camera is not started")]
    NotStarted,
    #[error("{program} wrote no image within {after:?}")]
    Timeout {
        program: &'static str,
        after: std::time::Duration,
    },
    #[error("i/o error talking to the camera: {0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum Error {
    /// Driver failure while capturing or switching modes.
    #[error("capture failed: {0}")]
    Capture(#[source] DeviceError),
    /// Operation requested while the device sits in the other mode.
    #[error("camera is in {actual:?} mode, {expected:?} mode required")]
    WrongMode {
        expected: CameraMode,
        actual: CameraMode,
    },
    #[error("could not create archive directory {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("could not open camera: {0}")]
    DeviceOpen(#[source] DeviceError),
    /// A settle wait was cut short because the process is shutting down.
    #[error("interrupted by shutdown")]
    Interrupted,
    #[error("could not encode frame: {0}")]
    Encode(#[from] image::ImageError),
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Capture(_) | Error::Directory { .. } | Error::Encode(_)
        )
    }
}
