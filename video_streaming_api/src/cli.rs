use camera_api::config::{blackout_window, parse_colour_gains};
use camera_api::coordinator::DEFAULT_SETTLE_DELAY;
use camera_api::{Error, PixelFormat, PreviewConfig, SaveFormat, Settings, StillConfig};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Timelapse camera with MJPEG stream server")]
pub struct Args {
    /// Base output directory
    #[arg(long, default_value = "./images")]
    pub output: PathBuf,

    /// Stream width
    #[arg(long, default_value_t = 1024)]
    pub width: u32,

    /// Stream height
    #[arg(long, default_value_t = 768)]
    pub height: u32,

    /// Stream frame rate
    #[arg(long, default_value_t = 30)]
    pub fps: u32,

    #[arg(long, default_value_t = 5000)]
    pub port: u16,

    #[arg(long, default_value = "0.0.0.0")]
    pub address: String,

    /// Seconds between two stills
    #[arg(long, default_value_t = 300)]
    pub interval: u64,

    /// Still image format, jpg or png
    #[arg(long, default_value = "jpg")]
    pub format: SaveFormat,

    /// Start of the daily quiet hours
    #[arg(long, value_name = "HH:MM")]
    pub blackout_start: Option<String>,

    /// End of the daily quiet hours
    #[arg(long, value_name = "HH:MM")]
    pub blackout_end: Option<String>,

    /// Wait after a camera mode switch
    #[arg(long, default_value_t = DEFAULT_SETTLE_DELAY.as_millis() as u64)]
    pub settle_ms: u64,

    /// Fixed white balance gains, disables auto white balance for stills
    #[arg(long, value_name = "RED,BLUE")]
    pub awb_gains: Option<String>,

    /// Still width, sensor resolution when unset
    #[arg(long, requires = "still_height")]
    pub still_width: Option<u32>,

    #[arg(long, requires = "still_width")]
    pub still_height: Option<u32>,

    #[arg(long, default_value = "./logs")]
    pub log_dir: PathBuf,

    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Args {
    pub fn settings(&self) -> camera_api::Result<Settings> {
        let colour_gains = match &self.awb_gains {
            Some(gains) => Some(parse_colour_gains(gains)?),
            None => None,
        };
        let size = match (self.still_width, self.still_height) {
            (Some(width), Some(height)) => Some((width, height)),
            (None, None) => None,
            _ => {
                return Err(Error::Configuration(
                    "still width and height must be given together".into(),
                ))
            }
        };
        Settings {
            output_dir: self.output.clone(),
            preview: PreviewConfig {
                width: self.width,
                height: self.height,
                pixel_format: PixelFormat::Mjpeg,
                frame_rate: self.fps,
            },
            still: StillConfig {
                size,
                format: self.format,
                colour_gains,
            },
            interval: Duration::from_secs(self.interval),
            blackout: blackout_window(
                self.blackout_start.as_deref(),
                self.blackout_end.as_deref(),
            )?,
            settle_delay: Duration::from_millis(self.settle_ms),
        }
        .validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("video_streaming_api").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn command_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn defaults_match_the_documented_surface() {
        let args = parse(&[]);
        assert_eq!(args.port, 5000);
        let settings = args.settings().unwrap();
        assert_eq!(settings.output_dir, PathBuf::from("./images"));
        assert_eq!((settings.preview.width, settings.preview.height), (1024, 768));
        assert_eq!(settings.preview.frame_rate, 30);
        assert_eq!(settings.interval, Duration::from_secs(300));
        assert_eq!(settings.still.format, SaveFormat::Jpg);
        assert_eq!(settings.still.size, None);
        assert_eq!(settings.settle_delay, DEFAULT_SETTLE_DELAY);
        assert!(settings.blackout.is_none());
    }

    #[test]
    fn full_command_line() {
        let settings = parse(&[
            "--output",
            "/srv/growcam",
            "--format",
            "png",
            "--interval",
            "60",
            "--blackout-start",
            "22:30",
            "--blackout-end",
            "05:45",
            "--awb-gains",
            "1.27,2.4",
            "--still-width",
            "3280",
            "--still-height",
            "2464",
        ])
        .settings()
        .unwrap();
        assert_eq!(settings.still.format, SaveFormat::Png);
        assert_eq!(settings.still.colour_gains, Some((1.27, 2.4)));
        assert_eq!(settings.still.size, Some((3280, 2464)));
        assert_eq!(settings.blackout.unwrap().to_string(), "22:30-05:45");
    }

    #[test]
    fn rejects_unknown_format() {
        assert!(Args::try_parse_from(["video_streaming_api", "--format", "gif"]).is_err());
    }

    #[test]
    fn half_a_blackout_window_is_a_configuration_error() {
        let err = parse(&["--blackout-start", "22:00"]).settings().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn zero_interval_is_a_configuration_error() {
        let err = parse(&["--interval", "0"]).settings().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
