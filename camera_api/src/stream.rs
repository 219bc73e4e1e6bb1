//! Preview frames as parts of a `multipart/x-mixed-replace` body.

use crate::camera_api::{PixelFormat, RawFrame};
use crate::coordinator::ModeCoordinator;
use crate::error::{Error, Result};
use crate::shutdown::{RunFlag, Wait};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use log::{error, warn};
use std::sync::Arc;
use std::time::Duration;

pub const BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const JPEG_QUALITY: u8 = 80;
const RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Wraps one JPEG into a multipart part.
pub fn multipart_chunk(jpeg: &[u8]) -> Vec<u8> {
    let header = format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", BOUNDARY);
    let mut chunk = Vec::with_capacity(header.len() + jpeg.len() + 2);
    chunk.extend_from_slice(header.as_bytes());
    chunk.extend_from_slice(jpeg);
    chunk.extend_from_slice(b"\r\n");
    chunk
}

pub fn encode_jpeg(frame: RawFrame) -> Result<Vec<u8>> {
    match frame.format {
        PixelFormat::Mjpeg => Ok(frame.data),
        PixelFormat::Rgb888 => {
            let mut jpeg = Vec::new();
            JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY).encode(
                &frame.data,
                frame.width,
                frame.height,
                ExtendedColorType::Rgb8,
            )?;
            Ok(jpeg)
        }
    }
}

/// Endless, lazily pulled preview frames for one stream consumer.
///
/// Every `next` captures a fresh frame; nothing is shared between
/// consumers. The iterator ends once the run flag is cleared.
pub struct FrameSource {
    coordinator: Arc<ModeCoordinator>,
    run: Arc<RunFlag>,
    done: bool,
}

impl FrameSource {
    pub fn new(coordinator: Arc<ModeCoordinator>, run: Arc<RunFlag>) -> Self {
        Self {
            coordinator,
            run,
            done: false,
        }
    }

    fn pull(&self) -> Result<Vec<u8>> {
        let frame = self.coordinator.capture_preview_frame()?;
        Ok(multipart_chunk(&encode_jpeg(frame)?))
    }
}

impl Iterator for FrameSource {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done && self.run.is_running() {
            match self.pull() {
                Ok(chunk) => return Some(chunk),
                Err(e @ Error::WrongMode { .. }) => {
                    error!("Ending preview stream: {}", e);
                    self.done = true;
                }
                Err(e) => {
                    warn!("Skipping preview frame: {}", e);
                    if self.run.wait(RETRY_BACKOFF) == Wait::Cancelled {
                        self.done = true;
                    }
                }
            }
        }
        self.done = true;
        None
    }
}
