use crate::camera_api::{PreviewConfig, StillConfig};
use crate::error::{Error, Result};
use crate::timelapse::BlackoutWindow;
use chrono::NaiveTime;
use std::path::PathBuf;
use std::time::Duration;

/// Validated camera and timelapse settings.
#[derive(Clone, Debug)]
pub struct Settings {
    pub output_dir: PathBuf,
    pub preview: PreviewConfig,
    pub still: StillConfig,
    pub interval: Duration,
    pub blackout: Option<BlackoutWindow>,
    pub settle_delay: Duration,
}

impl Settings {
    /// Rejects values that would only fail once the camera is running.
    pub fn validate(self) -> Result<Self> {
        if self.preview.width == 0 || self.preview.height == 0 {
            return Err(Error::Configuration(format!(
                "stream resolution {}x{} is empty",
                self.preview.width, self.preview.height
            )));
        }
        if self.preview.frame_rate == 0 {
            return Err(Error::Configuration("frame rate must be at least 1".into()));
        }
        if let Some((width, height)) = self.still.size {
            if width == 0 || height == 0 {
                return Err(Error::Configuration(format!(
                    "still resolution {}x{} is empty",
                    width, height
                )));
            }
        }
        if self.interval < Duration::from_secs(1) {
            return Err(Error::Configuration(
                "capture interval must be at least one second".into(),
            ));
        }
        if let Some((red, blue)) = self.still.colour_gains {
            if !(red > 0.0 && blue > 0.0 && red.is_finite() && blue.is_finite()) {
                return Err(Error::Configuration(format!(
                    "colour gains must be positive, got {},{}",
                    red, blue
                )));
            }
        }
        if let Some(window) = self.blackout {
            if window.start() == window.end() {
                return Err(Error::Configuration(format!(
                    "blackout window {} starts and ends at the same time",
                    window
                )));
            }
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(Error::Configuration("output directory is empty".into()));
        }
        Ok(self)
    }
}

/// Parses `HH:MM`.
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|e| {
        Error::Configuration(format!("{:?} is not a HH:MM time of day: {}", value, e))
    })
}

/// Both ends or neither.
pub fn blackout_window(start: Option<&str>, end: Option<&str>) -> Result<Option<BlackoutWindow>> {
    match (start, end) {
        (None, None) => Ok(None),
        (Some(start), Some(end)) => Ok(Some(BlackoutWindow::new(
            parse_time_of_day(start)?,
            parse_time_of_day(end)?,
        ))),
        _ => Err(Error::Configuration(
            "blackout start and end must be given together".into(),
        )),
    }
}

/// Parses `RED,BLUE` colour gains such as `1.27,2.4`.
pub fn parse_colour_gains(value: &str) -> Result<(f32, f32)> {
    let invalid = || Error::Configuration(format!("{:?} is not a RED,BLUE gain pair", value));
    let (red, blue) = value.split_once(',').ok_or_else(invalid)?;
    let red = red.trim().parse::<f32>().map_err(|_| invalid())?;
    let blue = blue.trim().parse::<f32>().map_err(|_| invalid())?;
    Ok((red, blue))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera_api::{PixelFormat, SaveFormat};

    fn valid() -> Settings {
        Settings {
            output_dir: PathBuf::from("images"),
            preview: PreviewConfig {
                width: 1024,
                height: 768,
                pixel_format: PixelFormat::Mjpeg,
                frame_rate: 30,
            },
            still: StillConfig {
                size: None,
                format: SaveFormat::Jpg,
                colour_gains: Some((1.27, 2.4)),
            },
            interval: Duration::from_secs(300),
            blackout: None,
            settle_delay: Duration::from_millis(1500),
        }
    }

    fn rejected(settings: Settings) -> bool {
        matches!(settings.validate(), Err(Error::Configuration(_)))
    }

    #[test]
    fn accepts_defaults() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn rejects_bad_values() {
        let mut s = valid();
        s.preview.width = 0;
        assert!(rejected(s));

        let mut s = valid();
        s.preview.frame_rate = 0;
        assert!(rejected(s));

        let mut s = valid();
        s.interval = Duration::ZERO;
        assert!(rejected(s));

        let mut s = valid();
        s.still.colour_gains = Some((-1.0, 2.0));
        assert!(rejected(s));

        let mut s = valid();
        s.still.size = Some((0, 100));
        assert!(rejected(s));

        let mut s = valid();
        s.blackout = blackout_window(Some("03:00"), Some("03:00")).unwrap();
        assert!(rejected(s));
    }

    #[test]
    fn parses_times_and_windows() {
        assert_eq!(
            parse_time_of_day("06:30").unwrap(),
            NaiveTime::from_hms_opt(6, 30, 0).unwrap()
        );
        assert!(parse_time_of_day("25:00").is_err());
        assert!(parse_time_of_day("noon").is_err());

        assert_eq!(blackout_window(None, None).unwrap(), None);
        assert!(blackout_window(Some("22:00"), None).is_err());
        let window = blackout_window(Some("22:00"), Some("06:00")).unwrap().unwrap();
        assert_eq!(window.to_string(), "22:00-06:00");
    }

    #[test]
    fn parses_colour_gains() {
        assert_eq!(parse_colour_gains("1.27, 2.4").unwrap(), (1.27, 2.4));
        assert!(parse_colour_gains("1.27").is_err());
        assert!(parse_colour_gains("a,b").is_err());
    }
}
