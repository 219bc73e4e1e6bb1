//! Scripted camera for tests. Records every call and counts calls that a
//! real driver would reject or that overlapped another call.

use crate::camera_api::{CameraDevice, CameraMode, Controls, ModeConfig, PixelFormat, RawFrame};
use crate::error::DeviceError;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Clone, Debug, PartialEq)]
pub enum DeviceCall {
    Configure(CameraMode),
    Start,
    Stop,
    CaptureStill(PathBuf),
    CapturePreview,
    SetControls(Controls),
}

type PreviewHook = Box<dyn FnMut(usize) + Send>;

#[derive(Default)]
struct State {
    calls: Vec<(Instant, DeviceCall)>,
    configured: Option<CameraMode>,
    started: bool,
    violations: usize,
    stills_taken: usize,
    previews_taken: usize,
    still_failures: usize,
    preview_failures: usize,
    configure_failures: Vec<(CameraMode, usize)>,
    still_duration: Duration,
    on_preview: Option<PreviewHook>,
}

#[derive(Clone, Default)]
pub struct MockCamera {
    state: Arc<Mutex<State>>,
    busy: Arc<AtomicBool>,
}

impl MockCamera {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Marks the device busy for the duration of one call. Overlapping
    /// calls count as a violation.
    fn enter(&self, call: DeviceCall) -> Busy<'_> {
        if self.busy.swap(true, Ordering::AcqRel) {
            self.state().violations += 1;
        }
        self.state().calls.push((Instant::now(), call));
        Busy(&self.busy)
    }

    pub fn fail_stills(&self, count: usize) {
        self.state().still_failures = count;
    }

    pub fn fail_previews(&self, count: usize) {
        self.state().preview_failures = count;
    }

    pub fn fail_configure(&self, mode: CameraMode, count: usize) {
        self.state().configure_failures.push((mode, count));
    }

    /// Each still takes this long before returning.
    pub fn set_still_duration(&self, duration: Duration) {
        self.state().still_duration = duration;
    }

    /// Called with the running preview count after every preview frame.
    pub fn on_preview(&self, hook: impl FnMut(usize) + Send + 'static) {
        self.state().on_preview = Some(Box::new(hook));
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.state().calls.iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn timed_calls(&self) -> Vec<(Instant, DeviceCall)> {
        self.state().calls.clone()
    }

    pub fn still_times(&self) -> Vec<Instant> {
        self.state()
            .calls
            .iter()
            .filter(|(_, c)| matches!(c, DeviceCall::CaptureStill(_)))
            .map(|(t, _)| *t)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn violations(&self) -> usize {
        self.state().violations
    }

    pub fn stills_taken(&self) -> usize {
        self.state().stills_taken
    }

    pub fn previews_taken(&self) -> usize {
        self.state().previews_taken
    }
}

struct Busy<'a>(&'a AtomicBool);

impl<'a> Drop for Busy<'a> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl CameraDevice for MockCamera {
    fn configure(&mut self, config: &ModeConfig) -> Result<(), DeviceError> {
        let _busy = self.enter(DeviceCall::Configure(config.mode()));
        let mut state = self.state();
        if state.started {
            state.violations += 1;
        }
        if let Some(entry) = state
            .configure_failures
            .iter_mut()
            .find(|(mode, left)| *mode == config.mode() && *left > 0)
        {
            entry.1 -= 1;
            return Err(DeviceError::Other(format!(
                "scripted {} configure failure",
                config.mode()
            )));
        }
        state.configured = Some(config.mode());
        Ok(())
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        let _busy = self.enter(DeviceCall::Start);
        let mut state = self.state();
        if state.configured.is_none() {
            state.violations += 1;
        }
        state.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        let _busy = self.enter(DeviceCall::Stop);
        self.state().started = false;
        Ok(())
    }

    fn capture_still(&mut self, path: &Path) -> Result<(), DeviceError> {
        let _busy = self.enter(DeviceCall::CaptureStill(path.to_path_buf()));
        let duration = {
            let mut state = self.state();
            if state.configured != Some(CameraMode::Still) {
                state.violations += 1;
            }
            state.still_duration
        };
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
        let mut state = self.state();
        if state.still_failures > 0 {
            state.still_failures -= 1;
            return Err(DeviceError::Other("scripted still failure".to_string()));
        }
        state.stills_taken += 1;
        Ok(())
    }

    fn capture_preview_frame(&mut self) -> Result<RawFrame, DeviceError> {
        let _busy = self.enter(DeviceCall::CapturePreview);
        let mut state = self.state();
        if state.configured != Some(CameraMode::Preview) || !state.started {
            state.violations += 1;
        }
        if state.preview_failures > 0 {
            state.preview_failures -= 1;
            return Err(DeviceError::Other("scripted preview failure".to_string()));
        }
        state.previews_taken += 1;
        let taken = state.previews_taken;
        if let Some(hook) = state.on_preview.as_mut() {
            hook(taken);
        }
        Ok(RawFrame {
            width: 4,
            height: 2,
            format: PixelFormat::Rgb888,
            data: vec![128; 4 * 2 * 3],
        })
    }

    fn set_controls(&mut self, controls: &Controls) -> Result<(), DeviceError> {
        let _busy = self.enter(DeviceCall::SetControls(controls.clone()));
        Ok(())
    }
}
