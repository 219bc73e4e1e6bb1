//! `CameraDevice` backed by the Raspberry Pi `rpicam-apps` command line
//! tools.
//!
//! Preview mode keeps one `rpicam-vid` process running that writes MJPEG to
//! stdout; frames are cut out of that pipe at the JPEG start and end
//! markers. Still mode keeps one `rpicam-still` running in signal mode from
//! the mode switch on, so exposure and white balance settle while the
//! coordinator waits. Each `SIGUSR1` writes one picture to a temporary file
//! which is then copied into the archive. Only one of the two processes
//! ever holds the sensor.

use crate::camera_api::{
    CameraDevice, Controls, ModeConfig, PixelFormat, PreviewConfig, RawFrame, StillConfig,
};
use crate::error::DeviceError;
use log::{debug, error, warn};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

const PREVIEW_PROGRAM: &str = "rpicam-vid";
const STILL_PROGRAM: &str = "rpicam-still";

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Upper bound for one signalled capture, full resolution PNGs are slow.
const STILL_CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);
const STILL_POLL: Duration = Duration::from_millis(50);

struct PreviewProcess {
    child: Child,
    stdout: BufReader<ChildStdout>,
    width: u32,
    height: u32,
}

struct StillProcess {
    child: Child,
    /// Where the process writes each signalled capture.
    output: PathBuf,
}

pub struct RpicamCamera {
    config: Option<ModeConfig>,
    controls: Controls,
    /// Exposure time given to a one-shot `rpicam-still`.
    settle: Duration,
    preview: Option<PreviewProcess>,
    still: Option<StillProcess>,
}

impl RpicamCamera {
    /// Kills camera processes left over from a previous run, they would
    /// otherwise keep the sensor busy.
    pub fn new(settle: Duration) -> Self {
        Self::kill_previous_rpicam_processes();
        Self {
            config: None,
            controls: Controls::default(),
            settle,
            preview: None,
            still: None,
        }
    }

    fn kill_previous_rpicam_processes() {
        match Command::new("killall")
            .arg("-q")
            .arg(PREVIEW_PROGRAM)
            .arg(STILL_PROGRAM)
            .output()
        {
            Ok(_) => {}
            Err(e) => warn!("Could not kill previous rpicam processes: {}", e),
        }
    }

    fn start_preview_process(config: &PreviewConfig) -> Result<PreviewProcess, DeviceError> {
        let mut command = Command::new(PREVIEW_PROGRAM);
        command
            .arg("-t") // run until killed
            .arg("0")
            .arg("-n") // no preview window
            .arg("--codec")
            .arg("mjpeg")
            .arg("--width")
            .arg(config.width.to_string())
            .arg("--height")
            .arg(config.height.to_string())
            .arg("--framerate")
            .arg(config.frame_rate.to_string())
            .arg("-o")
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        let mut child = command.spawn().map_err(|source| DeviceError::Spawn {
            program: PREVIEW_PROGRAM,
            source,
        })?;
        let stdout = child.stdout.take().ok_or(DeviceError::StreamClosed)?;
        debug!("Started {} with pid {}", PREVIEW_PROGRAM, child.id());
        Ok(PreviewProcess {
            child,
            stdout: BufReader::new(stdout),
            width: config.width,
            height: config.height,
        })
    }

    /// Arguments shared by the signal mode process and one-shot captures.
    fn still_command(config: &StillConfig, controls: &Controls) -> Command {
        let mut command = Command::new(STILL_PROGRAM);
        command
            .arg("-n") // no preview window
            .arg("-e")
            .arg(config.format.extension());
        if let Some((width, height)) = config.size {
            command
                .arg("--width")
                .arg(width.to_string())
                .arg("--height")
                .arg(height.to_string());
        }
        if let Some((red, blue)) = controls.colour_gains {
            // fixed gains switch auto white balance off
            command.arg("--awbgains").arg(format!("{},{}", red, blue));
        }
        command.stdin(Stdio::null()).stdout(Stdio::null());
        command
    }

    fn signal_still_command(config: &StillConfig, controls: &Controls, output: &Path) -> Command {
        let mut command = Self::still_command(config, controls);
        command
            .arg("--signal") // capture on SIGUSR1
            .arg("-t") // run until killed
            .arg("0")
            .arg("-o")
            .arg(output)
            // never read, a full pipe would stall the process
            .stderr(Stdio::null());
        command
    }

    fn one_shot_still_command(
        config: &StillConfig,
        controls: &Controls,
        settle: Duration,
        path: &Path,
    ) -> Command {
        let mut command = Self::still_command(config, controls);
        command
            .arg("-t")
            .arg(settle.as_millis().max(1).to_string())
            .arg("-o")
            .arg(path)
            .stderr(Stdio::piped());
        command
    }

    fn start_still_process(
        config: &StillConfig,
        controls: &Controls,
    ) -> Result<StillProcess, DeviceError> {
        let output = std::env::temp_dir().join(format!(
            "{}-{}.{}",
            STILL_PROGRAM,
            std::process::id(),
            config.format.extension()
        ));
        let child = Self::signal_still_command(config, controls, &output)
            .spawn()
            .map_err(|source| DeviceError::Spawn {
                program: STILL_PROGRAM,
                source,
            })?;
        debug!("Started {} with pid {}", STILL_PROGRAM, child.id());
        Ok(StillProcess { child, output })
    }

    /// Runs a complete `rpicam-still` for a single picture. Used when still
    /// mode was left installed without a running process.
    fn capture_one_shot(&self, config: &StillConfig, path: &Path) -> Result<(), DeviceError> {
        let output = Self::one_shot_still_command(config, &self.controls, self.settle, path)
            .output()
            .map_err(|source| DeviceError::Spawn {
                program: STILL_PROGRAM,
                source,
            })?;
        if !output.status.success() {
            error!(
                "{} failed: {}",
                STILL_PROGRAM,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Err(DeviceError::ExitStatus {
                program: STILL_PROGRAM,
                status: output.status,
            });
        }
        Ok(())
    }
}

/// Signals a running still process and copies the picture it writes to
/// `path`. The picture counts as written once its size is non zero and
/// unchanged over one poll.
fn capture_signalled(
    process: &mut StillProcess,
    path: &Path,
    timeout: Duration,
) -> Result<(), DeviceError> {
    match fs::remove_file(&process.output) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    let status = Command::new("kill")
        .arg("-USR1")
        .arg(process.child.id().to_string())
        .status()?;
    if !status.success() {
        return Err(DeviceError::Other(format!(
            "could not signal {} (pid {})",
            STILL_PROGRAM,
            process.child.id()
        )));
    }

    let started = Instant::now();
    let mut last_size = 0;
    loop {
        std::thread::sleep(STILL_POLL);
        if let Some(status) = process.child.try_wait()? {
            return Err(DeviceError::ExitStatus {
                program: STILL_PROGRAM,
                status,
            });
        }
        let size = fs::metadata(&process.output).map(|m| m.len()).unwrap_or(0);
        if size > 0 && size == last_size {
            break;
        }
        last_size = size;
        if started.elapsed() > timeout {
            return Err(DeviceError::Timeout {
                program: STILL_PROGRAM,
                after: timeout,
            });
        }
    }
    fs::copy(&process.output, path)?;
    fs::remove_file(&process.output)?;
    Ok(())
}

fn stop_process(child: &mut Child, program: &str) -> Result<(), DeviceError> {
    if let Err(e) = child.kill() {
        // already exited
        debug!("Killing {} failed: {}", program, e);
    }
    child.wait()?;
    Ok(())
}

impl CameraDevice for RpicamCamera {
    fn configure(&mut self, config: &ModeConfig) -> Result<(), DeviceError> {
        self.stop()?;
        if let ModeConfig::Preview(preview) = config {
            if preview.pixel_format != PixelFormat::Mjpeg {
                debug!("{} only delivers MJPEG, ignoring {:?}", PREVIEW_PROGRAM, preview.pixel_format);
            }
        }
        self.config = Some(config.clone());
        Ok(())
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        match &self.config {
            Some(ModeConfig::Preview(preview)) => {
                if self.preview.is_none() {
                    self.preview = Some(Self::start_preview_process(preview)?);
                }
                Ok(())
            }
            Some(ModeConfig::Still(still)) => {
                if self.still.is_none() {
                    self.still = Some(Self::start_still_process(still, &self.controls)?);
                }
                Ok(())
            }
            None => Err(DeviceError::NotStarted),
        }
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        if let Some(mut process) = self.preview.take() {
            stop_process(&mut process.child, PREVIEW_PROGRAM)?;
        }
        if let Some(mut process) = self.still.take() {
            stop_process(&mut process.child, STILL_PROGRAM)?;
            if let Err(e) = fs::remove_file(&process.output) {
                debug!("No {} left to remove: {}", process.output.display(), e);
            }
        }
        Ok(())
    }

    fn capture_still(&mut self, path: &Path) -> Result<(), DeviceError> {
        let config = match &self.config {
            Some(ModeConfig::Still(config)) => config,
            _ => return Err(DeviceError::NotStarted),
        };
        let process = match self.still.as_mut() {
            Some(process) => process,
            None => return self.capture_one_shot(config, path),
        };
        let result = capture_signalled(process, path, STILL_CAPTURE_TIMEOUT);
        if let Err(DeviceError::ExitStatus { .. }) = result {
            // gone, the next capture falls back to a one-shot run
            self.still = None;
        }
        result
    }

    fn capture_preview_frame(&mut self) -> Result<RawFrame, DeviceError> {
        let process = self.preview.as_mut().ok_or(DeviceError::NotStarted)?;
        let data = read_jpeg(&mut process.stdout)?;
        Ok(RawFrame {
            width: process.width,
            height: process.height,
            format: PixelFormat::Mjpeg,
            data,
        })
    }

    fn set_controls(&mut self, controls: &Controls) -> Result<(), DeviceError> {
        if controls.awb_enable == Some(true) {
            self.controls.colour_gains = None;
        }
        if controls.colour_gains.is_some() {
            self.controls.colour_gains = controls.colour_gains;
        }
        self.controls.awb_enable = controls.awb_enable.or(self.controls.awb_enable);
        Ok(())
    }
}

impl Drop for RpicamCamera {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("Error stopping camera processes: {}", e);
        }
    }
}

/// Reads the next complete JPEG image, skipping anything before its start
/// marker.
pub fn read_jpeg(reader: &mut impl BufRead) -> Result<Vec<u8>, DeviceError> {
    let mut previous = 0u8;
    let mut byte = [0u8; 1];
    loop {
        if reader.read(&mut byte)? == 0 {
            return Err(DeviceError::StreamClosed);
        }
        if [previous, byte[0]] == SOI {
            break;
        }
        previous = byte[0];
    }

    let mut image = SOI.to_vec();
    loop {
        let buffer = reader.fill_buf()?;
        if buffer.is_empty() {
            return Err(DeviceError::StreamClosed);
        }
        let mut consumed = buffer.len();
        for (i, &b) in buffer.iter().enumerate() {
            let last = image.last().copied().unwrap_or(0);
            image.push(b);
            if [last, b] == EOI {
                consumed = i + 1;
                break;
            }
        }
        reader.consume(consumed);
        if image.len() > 2 && image.ends_with(&EOI) {
            return Ok(image);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera_api::SaveFormat;
    use std::io::Cursor;

    #[test]
    fn splits_concatenated_jpegs() {
        let stream: Vec<u8> = [
            &[0x00, 0x12][..],
            &[0xFF, 0xD8, 0x01, 0xFF, 0x00, 0x02, 0xFF, 0xD9],
            &[0xFF, 0xD8, 0x03, 0xFF, 0xD9],
        ]
        .concat();
        let mut reader = BufReader::with_capacity(3, Cursor::new(stream));

        assert_eq!(
            read_jpeg(&mut reader).unwrap(),
            vec![0xFF, 0xD8, 0x01, 0xFF, 0x00, 0x02, 0xFF, 0xD9]
        );
        assert_eq!(
            read_jpeg(&mut reader).unwrap(),
            vec![0xFF, 0xD8, 0x03, 0xFF, 0xD9]
        );
        assert!(matches!(
            read_jpeg(&mut reader),
            Err(DeviceError::StreamClosed)
        ));
    }

    #[test]
    fn truncated_jpeg_is_stream_closed() {
        let mut reader = Cursor::new(vec![0xFF, 0xD8, 0x01, 0x02]);
        assert!(matches!(
            read_jpeg(&mut reader),
            Err(DeviceError::StreamClosed)
        ));
    }

    fn args(command: &Command) -> String {
        command
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn still_config() -> StillConfig {
        StillConfig {
            size: Some((3280, 2464)),
            format: SaveFormat::Png,
            colour_gains: None,
        }
    }

    /// Shell stand-in for a signal mode `rpicam-still`, writing `still` to
    /// its output on every SIGUSR1.
    fn fake_still_process(output: &Path, on_signal: &str) -> StillProcess {
        let child = Command::new("sh")
            .arg("-c")
            .arg(format!(
                "trap '{}' USR1; while :; do sleep 0.05; done",
                on_signal
            ))
            .arg("sh")
            .arg(output)
            .spawn()
            .unwrap();
        // let the shell install its trap before it gets signalled
        std::thread::sleep(Duration::from_millis(300));
        StillProcess {
            child,
            output: output.to_path_buf(),
        }
    }

    #[test]
    fn still_process_runs_in_signal_mode_with_format_size_and_gains() {
        let controls = Controls {
            awb_enable: Some(false),
            colour_gains: Some((1.27, 2.4)),
        };
        let command = RpicamCamera::signal_still_command(
            &still_config(),
            &controls,
            Path::new("/tmp/rpicam-still-1.png"),
        );

        assert_eq!(command.get_program(), STILL_PROGRAM);
        let joined = args(&command);
        assert!(joined.contains("-e png"));
        assert!(joined.contains("--width 3280 --height 2464"));
        assert!(joined.contains("--awbgains 1.27,2.4"));
        assert!(joined.contains("--signal -t 0"));
        assert!(joined.ends_with("-o /tmp/rpicam-still-1.png"));
    }

    #[test]
    fn one_shot_still_exposes_for_the_settle_delay() {
        let command = RpicamCamera::one_shot_still_command(
            &still_config(),
            &Controls::default(),
            Duration::from_millis(1500),
            Path::new("/tmp/photo.png"),
        );
        let joined = args(&command);
        assert!(joined.contains("-t 1500"));
        assert!(!joined.contains("--signal"));
        assert!(!joined.contains("--awbgains"));
        assert!(joined.ends_with("-o /tmp/photo.png"));
    }

    #[test]
    fn signalled_capture_copies_the_written_picture() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("latest.png");
        let target = dir.path().join("photo.png");
        fs::write(&output, b"stale").unwrap();
        let mut process = fake_still_process(&output, r#"printf still > "$1""#);

        capture_signalled(&mut process, &target, Duration::from_secs(5)).unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"still");
        assert!(!output.exists());
        stop_process(&mut process.child, STILL_PROGRAM).unwrap();
    }

    #[test]
    fn signalled_capture_times_out_without_a_picture() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("latest.jpg");
        let target = dir.path().join("photo.jpg");
        let mut process = fake_still_process(&output, ":");

        let err =
            capture_signalled(&mut process, &target, Duration::from_millis(300)).unwrap_err();

        assert!(matches!(err, DeviceError::Timeout { .. }));
        assert!(!target.exists());
        stop_process(&mut process.child, STILL_PROGRAM).unwrap();
    }

    #[test]
    fn signalled_capture_reports_a_dead_process() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("latest.jpg");
        let mut process = fake_still_process(&output, "exit 3");

        let target = dir.path().join("photo.jpg");
        let err = capture_signalled(&mut process, &target, Duration::from_secs(5)).unwrap_err();

        assert!(matches!(err, DeviceError::ExitStatus { .. }));
    }

    #[test]
    fn capture_before_configure_fails() {
        let mut camera = RpicamCamera {
            config: None,
            controls: Controls::default(),
            settle: Duration::from_millis(1500),
            preview: None,
            still: None,
        };
        assert!(matches!(
            camera.capture_preview_frame(),
            Err(DeviceError::NotStarted)
        ));
        assert!(matches!(
            camera.capture_still(Path::new("/tmp/x.jpg")),
            Err(DeviceError::NotStarted)
        ));
        assert!(camera.stop().is_ok());
    }
}
