use crate::camera_api::SaveFormat;
use crate::config::Settings;
use crate::coordinator::ModeCoordinator;
use crate::error::{Error, Result};
use crate::shutdown::{RunFlag, Wait};
use chrono::prelude::*;
use log::{error, info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

mod archive;
mod blackout;

pub use archive::archive_path;
pub use blackout::BlackoutWindow;

/// Shortest pause between two stills, however long a capture took.
pub const MIN_PAUSE: Duration = Duration::from_secs(1);

pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    #[default]
    Active,
    Blackout,
    Stopped,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct TimelapseStatus {
    pub state: SchedulerState,
    pub captures: u64,
    pub failures: u64,
    pub last_capture: Option<PathBuf>,
    pub last_error: Option<String>,
}

/// Read side of the scheduler's status, cheap to clone into web handlers.
#[derive(Clone, Default)]
pub struct StatusHandle(Arc<Mutex<TimelapseStatus>>);

impl StatusHandle {
    fn lock(&self) -> MutexGuard<'_, TimelapseStatus> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn snapshot(&self) -> TimelapseStatus {
        self.lock().clone()
    }
}

/// One "take a still now" request.
#[derive(Debug)]
struct CaptureTask {
    requested: NaiveDateTime,
    path: PathBuf,
}

/// Wait after a capture cycle so the next one starts `interval` after this
/// one did, but never less than `MIN_PAUSE`.
pub fn pacing_delay(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed).max(MIN_PAUSE)
}

pub struct TimelapseScheduler {
    coordinator: Arc<ModeCoordinator>,
    run: Arc<RunFlag>,
    clock: Box<dyn Clock>,
    output_dir: PathBuf,
    format: SaveFormat,
    interval: Duration,
    blackout: Option<BlackoutWindow>,
    status: StatusHandle,
}

impl TimelapseScheduler {
    pub fn new(coordinator: Arc<ModeCoordinator>, run: Arc<RunFlag>, settings: &Settings) -> Self {
        Self {
            coordinator,
            run,
            clock: Box::new(LocalClock),
            output_dir: settings.output_dir.clone(),
            format: settings.still.format,
            interval: settings.interval,
            blackout: settings.blackout,
            status: StatusHandle::default(),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn status(&self) -> StatusHandle {
        self.status.clone()
    }

    pub fn state_at(&self, now: NaiveDateTime) -> SchedulerState {
        match self.blackout {
            Some(window) if window.contains(now.time()) => SchedulerState::Blackout,
            _ => SchedulerState::Active,
        }
    }

    fn set_state(&self, state: SchedulerState) -> SchedulerState {
        std::mem::replace(&mut self.status.lock().state, state)
    }

    /// Runs until the run flag is cleared.
    pub fn run(&self) {
        info!(
            "Starting timelapse: one {} still every {}s into {}",
            self.format.extension(),
            self.interval.as_secs(),
            self.output_dir.display()
        );
        while self.run.is_running() {
            let now = self.clock.now();
            if let Some(remaining) = self.blackout.and_then(|window| window.remaining(now)) {
                if self.set_state(SchedulerState::Blackout) != SchedulerState::Blackout {
                    info!(
                        "Entering blackout, no stills for the next {}s",
                        remaining.as_secs()
                    );
                }
                if self.run.wait(remaining) == Wait::Cancelled {
                    break;
                }
                continue;
            }
            if self.set_state(SchedulerState::Active) == SchedulerState::Blackout {
                info!("Blackout over, resuming timelapse");
            }

            let cycle_start = Instant::now();
            match self.capture_once(now) {
                Ok(path) => {
                    info!("Captured image: {}", path.display());
                    let mut status = self.status.lock();
                    status.captures += 1;
                    status.last_capture = Some(path);
                }
                Err(Error::Interrupted) => break,
                Err(e) => {
                    error!("Error capturing high resolution image: {}", e);
                    if !e.is_transient() {
                        warn!("Non transient capture error, the camera may need attention");
                    }
                    let mut status = self.status.lock();
                    status.failures += 1;
                    status.last_error = Some(e.to_string());
                }
            }

            let delay = pacing_delay(self.interval, cycle_start.elapsed());
            if self.run.wait(delay) == Wait::Cancelled {
                break;
            }
        }
        self.set_state(SchedulerState::Stopped);
        info!("Timelapse loop stopped");
    }

    fn capture_once(&self, requested: NaiveDateTime) -> Result<PathBuf> {
        let task = CaptureTask {
            requested,
            path: archive_path(&self.output_dir, requested, self.format)?,
        };
        let mut handle = self.coordinator.acquire_still()?;
        handle.capture(&task.path).map_err(|e| {
            warn!("Still requested at {} failed", task.requested);
            e
        })?;
        Ok(task.path)
    }
}
