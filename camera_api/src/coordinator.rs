//! Time-multiplexes the single camera between the live preview and the
//! high resolution stills of the timelapse.
//!
//! Every device call, including the settle delay after a mode switch, runs
//! with the session mutex held. A stream pull may therefore stall for two
//! settle delays while a still is being taken.

use crate::camera_api::{
    CameraDevice, CameraMode, Controls, ModeConfig, PreviewConfig, RawFrame, StillConfig,
};
use crate::error::{Error, Result};
use crate::shutdown::{RunFlag, Wait};
use log::{debug, error, info, warn};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(1500);
pub const DEFAULT_WARMUP: Duration = Duration::from_secs(2);

struct Session {
    device: Box<dyn CameraDevice>,
    mode: CameraMode,
    started: bool,
    shut_down: bool,
}

pub struct ModeCoordinator {
    session: Mutex<Session>,
    preview: PreviewConfig,
    still: StillConfig,
    settle_delay: Duration,
    run: Arc<RunFlag>,
}

impl ModeCoordinator {
    /// Configures the device for preview, starts it and waits `warmup`.
    pub fn open(
        mut device: Box<dyn CameraDevice>,
        preview: PreviewConfig,
        still: StillConfig,
        settle_delay: Duration,
        warmup: Duration,
        run: Arc<RunFlag>,
    ) -> Result<Self> {
        device
            .configure(&ModeConfig::Preview(preview.clone()))
            .map_err(Error::DeviceOpen)?;
        device.start().map_err(Error::DeviceOpen)?;
        info!(
            "Camera started in preview mode at {}x{} {}fps",
            preview.width, preview.height, preview.frame_rate
        );
        if run.wait(warmup) == Wait::Cancelled {
            warn!("Shutdown requested during camera warm-up");
        }
        Ok(Self {
            session: Mutex::new(Session {
                device,
                mode: CameraMode::Preview,
                started: true,
                shut_down: false,
            }),
            preview,
            still,
            settle_delay,
            run,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        // a panic while holding the session leaves the device usable, the
        // next switch reconfigures it from scratch
        match self.session.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Blocks until the camera is free and installed in still mode.
    ///
    /// Dropping the returned handle switches back to preview and releases
    /// the camera, whether or not the capture succeeded.
    pub fn acquire_still(&self) -> Result<StillHandle<'_>> {
        let session = self.lock();
        let mut handle = StillHandle {
            session,
            coordinator: self,
        };
        if handle.session.shut_down {
            return Err(Error::Interrupted);
        }
        if handle.session.mode == CameraMode::Still {
            debug!("Camera already in still mode, skipping switch");
            return Ok(handle);
        }
        // on error the handle drops here and restores preview
        self.install(&mut handle.session, CameraMode::Still)?;
        Ok(handle)
    }

    /// Grabs one preview frame. Never switches modes.
    pub fn capture_preview_frame(&self) -> Result<RawFrame> {
        let mut session = self.lock();
        if session.mode != CameraMode::Preview {
            return Err(Error::WrongMode {
                expected: CameraMode::Preview,
                actual: session.mode,
            });
        }
        session
            .device
            .capture_preview_frame()
            .map_err(Error::Capture)
    }

    pub fn mode(&self) -> CameraMode {
        self.lock().mode
    }

    /// Stops the device. Only the first call reaches the driver.
    pub fn shutdown(&self) {
        let mut session = self.lock();
        if session.shut_down {
            return;
        }
        session.shut_down = true;
        session.started = false;
        match session.device.stop() {
            Ok(()) => info!("Camera stopped"),
            Err(e) => error!("Error stopping camera: {}", e),
        }
    }

    /// Stop, reconfigure, apply controls, restart, then wait for exposure
    /// and white balance to settle. The session's mode only changes once
    /// the new configuration has been accepted.
    fn install(&self, session: &mut Session, target: CameraMode) -> Result<()> {
        debug!("Switching camera from {} to {} mode", session.mode, target);
        let config = match target {
            CameraMode::Preview => ModeConfig::Preview(self.preview.clone()),
            CameraMode::Still => ModeConfig::Still(self.still.clone()),
        };
        session.device.stop().map_err(Error::Capture)?;
        session.started = false;
        session.device.configure(&config).map_err(Error::Capture)?;
        session.mode = target;
        // controls go in before start so a long running capture process
        // is launched with them
        if let ModeConfig::Still(StillConfig {
            colour_gains: Some(gains),
            ..
        }) = config
        {
            session
                .device
                .set_controls(&Controls {
                    awb_enable: Some(false),
                    colour_gains: Some(gains),
                })
                .map_err(Error::Capture)?;
        }
        session.device.start().map_err(Error::Capture)?;
        session.started = true;
        match self.run.wait(self.settle_delay) {
            Wait::Elapsed => Ok(()),
            Wait::Cancelled => Err(Error::Interrupted),
        }
    }
}

/// Exclusive access to the camera in still mode.
pub struct StillHandle<'a> {
    session: MutexGuard<'a, Session>,
    coordinator: &'a ModeCoordinator,
}

impl<'a> StillHandle<'a> {
    pub fn capture(&mut self, path: &Path) -> Result<()> {
        if self.session.mode != CameraMode::Still {
            return Err(Error::WrongMode {
                expected: CameraMode::Still,
                actual: self.session.mode,
            });
        }
        self.session
            .device
            .capture_still(path)
            .map_err(Error::Capture)
    }
}

impl<'a> Drop for StillHandle<'a> {
    fn drop(&mut self) {
        // no point restarting the preview for a device about to be stopped
        if self.session.shut_down || !self.coordinator.run.is_running() {
            return;
        }
        if self.session.mode == CameraMode::Preview && self.session.started {
            return;
        }
        match self
            .coordinator
            .install(&mut self.session, CameraMode::Preview)
        {
            Ok(()) | Err(Error::Interrupted) => {}
            Err(e) => error!("Could not switch camera back to preview: {}", e),
        }
    }
}
