//! Camera decoder boundary.
//!
//! A decoder turns a live camera stream into decoded text. The controller
//! only ever holds a started decoder through a `DecoderLease`, which stops it
//! when dropped.

pub mod bridge;

pub use bridge::BridgeDecoder;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Facing {
    /// Rear camera.
    Environment,
    User,
}

impl Default for Facing {
    fn default() -> Self {
        Facing::Environment
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanRegion {
    pub fps: u32,
    pub box_width: u32,
    pub box_height: u32,
    pub aspect_ratio: f32,
    pub disable_flip: bool,
}

impl Default for ScanRegion {
    fn default() -> Self {
        Self {
            fps: 20,
            box_width: 250,
            box_height: 250,
            aspect_ratio: 1.0,
            disable_flip: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CameraConfig {
    pub facing: Facing,
    pub region: ScanRegion,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecoderError {
    #[error("Camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("Camera unavailable: {0}")]
    Unavailable(String),
    #[error("Camera is in use by another scanner")]
    Busy,
}

/// Camera axis of the station, independent of the scan phase.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum DecoderStatus {
    Stopped,
    Starting,
    Active,
    Error { message: String },
}

impl Default for DecoderStatus {
    fn default() -> Self {
        DecoderStatus::Stopped
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CameraDecoder: Send + Sync {
    /// Acquires the camera and yields decoded text on the returned channel
    /// until `stop` is called.
    async fn start(
        &self,
        facing: Facing,
        region: &ScanRegion,
    ) -> Result<mpsc::Receiver<String>, DecoderError>;

    /// Releases the camera. Safe to call when not started.
    fn stop(&self);
}

/// A started decoder. Dropping the lease stops the decoder.
pub struct DecoderLease {
    decoder: Arc<dyn CameraDecoder>,
    frames: mpsc::Receiver<String>,
}

impl DecoderLease {
    pub fn new(decoder: Arc<dyn CameraDecoder>, frames: mpsc::Receiver<String>) -> Self {
        Self { decoder, frames }
    }

    /// Next decoded text, or `None` once the stream has ended.
    pub async fn next_text(&mut self) -> Option<String> {
        self.frames.recv().await
    }
}

impl Drop for DecoderLease {
    fn drop(&mut self) {
        self.decoder.stop();
    }
}

/// Exclusive claim on the physical camera. Decoders sharing a slot cannot
/// run at the same time; a second claim fails rather than waits.
#[derive(Debug, Clone, Default)]
pub struct CameraSlot {
    holder: Arc<Mutex<Option<Uuid>>>,
}

impl CameraSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, owner: Uuid) -> Result<(), DecoderError> {
        let mut holder = self.holder.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match *holder {
            Some(current) if current != owner => Err(DecoderError::Busy),
            _ => {
                *holder = Some(owner);
                Ok(())
            }
        }
    }

    pub fn release(&self, owner: Uuid) {
        let mut holder = self.holder.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *holder == Some(owner) {
            *holder = None;
        }
    }

    pub fn is_held(&self) -> bool {
        self.holder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_rejects_a_second_holder() {
        let slot = CameraSlot::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        slot.try_acquire(first).unwrap();
        assert_eq!(slot.try_acquire(second), Err(DecoderError::Busy));

        // Releasing on behalf of someone else is a no-op.
        slot.release(second);
        assert!(slot.is_held());

        slot.release(first);
        slot.try_acquire(second).unwrap();
    }

    #[test]
    fn dropping_a_lease_stops_the_decoder() {
        let mut decoder = MockCameraDecoder::new();
        decoder.expect_stop().times(1).return_const(());
        let decoder: Arc<dyn CameraDecoder> = Arc::new(decoder);

        let (_tx, rx) = mpsc::channel(1);
        drop(DecoderLease::new(decoder, rx));
    }

    #[test]
    fn region_defaults_match_the_scanner_widget() {
        let region: ScanRegion = serde_json::from_str("{}").unwrap();
        assert_eq!(region.fps, 20);
        assert_eq!((region.box_width, region.box_height), (250, 250));
    }
}
