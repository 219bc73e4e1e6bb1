use crate::error::DeviceError;
use serde::Serialize;
use std::fmt;
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraMode {
    Preview,
    Still,
}

impl fmt::Display for CameraMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraMode::Preview => write!(f, "preview"),
            CameraMode::Still => write!(f, "still"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 8 bit RGB, 3 bytes per pixel.
    Rgb888,
    /// Already JPEG compressed.
    Mjpeg,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveFormat {
    Jpg,
    Png,
}

impl SaveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SaveFormat::Jpg => "jpg",
            SaveFormat::Png => "png",
        }
    }
}

impl std::str::FromStr for SaveFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(SaveFormat::Jpg),
            "png" => Ok(SaveFormat::Png),
            other => Err(format!("unsupported save format {:?}, expected jpg or png", other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PreviewConfig {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub frame_rate: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StillConfig {
    /// `None` captures at the sensor's native resolution.
    pub size: Option<(u32, u32)>,
    pub format: SaveFormat,
    /// Fixed (red, blue) gains. Auto white balance is turned off when set.
    pub colour_gains: Option<(f32, f32)>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ModeConfig {
    Preview(PreviewConfig),
    Still(StillConfig),
}

impl ModeConfig {
    pub fn mode(&self) -> CameraMode {
        match self {
            ModeConfig::Preview(_) => CameraMode::Preview,
            ModeConfig::Still(_) => CameraMode::Still,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Controls {
    pub awb_enable: Option<bool>,
    pub colour_gains: Option<(f32, f32)>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RawFrame({}x{} {:?}, {} bytes)",
            self.width,
            self.height,
            self.format,
            self.data.len()
        )
    }
}

/// Primitives a camera driver has to offer. Implementations are driven
/// exclusively by the `ModeCoordinator`, which serializes every call.
pub trait CameraDevice: Send {
    fn configure(&mut self, config: &ModeConfig) -> Result<(), DeviceError>;
    fn start(&mut self) -> Result<(), DeviceError>;
    /// Must be safe to call on an already stopped device.
    fn stop(&mut self) -> Result<(), DeviceError>;
    fn capture_still(&mut self, path: &Path) -> Result<(), DeviceError>;
    fn capture_preview_frame(&mut self) -> Result<RawFrame, DeviceError>;
    fn set_controls(&mut self, controls: &Controls) -> Result<(), DeviceError>;
}
