use std::sync::Mutex;

use async_trait::async_trait;
use log::{debug, info};
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use super::{CameraDecoder, CameraSlot, DecoderError, Facing, ScanRegion};

const FRAME_BUFFER: usize = 16;

/// Decoder fed from outside the process. The web shell runs the camera and
/// QR library itself and forwards every decoded string through `feed`.
pub struct BridgeDecoder {
    id: Uuid,
    slot: CameraSlot,
    sender: Mutex<Option<mpsc::Sender<String>>>,
}

impl BridgeDecoder {
    pub fn new(slot: CameraSlot) -> Self {
        Self {
            id: Uuid::new_v4(),
            slot,
            sender: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    /// Forwards decoded text. Returns false when the decoder is not running
    /// or the consumer is behind; the frame is dropped in both cases, the
    /// camera re-reads the code on the next frame anyway.
    pub fn feed(&self, text: impl Into<String>) -> bool {
        let guard = self.sender.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(sender) = guard.as_ref() else {
            debug!("decoded text arrived while camera stopped; dropping");
            return false;
        };

        match sender.try_send(text.into()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("frame buffer full; dropping decoded text");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

#[async_trait]
impl CameraDecoder for BridgeDecoder {
    async fn start(
        &self,
        facing: Facing,
        region: &ScanRegion,
    ) -> Result<mpsc::Receiver<String>, DecoderError> {
        let mut guard = self.sender.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.is_some() {
            return Err(DecoderError::Busy);
        }

        self.slot.try_acquire(self.id)?;

        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        *guard = Some(tx);
        info!(
            "camera bridge started ({facing:?}, {} fps, {}x{} box)",
            region.fps, region.box_width, region.box_height
        );
        Ok(rx)
    }

    fn stop(&self) {
        let previous = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        self.slot.release(self.id);
        if previous.is_some() {
            info!("camera bridge stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fed_text_reaches_the_stream() {
        let decoder = BridgeDecoder::new(CameraSlot::new());
        assert!(!decoder.feed("early"));

        let mut rx = decoder
            .start(Facing::Environment, &ScanRegion::default())
            .await
            .unwrap();
        assert!(decoder.feed("ABC123"));
        assert_eq!(rx.recv().await.as_deref(), Some("ABC123"));

        decoder.stop();
        assert!(!decoder.is_running());
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn shared_camera_is_exclusive() {
        let slot = CameraSlot::new();
        let first = BridgeDecoder::new(slot.clone());
        let second = BridgeDecoder::new(slot.clone());

        let _rx = first
            .start(Facing::Environment, &ScanRegion::default())
            .await
            .unwrap();
        let err = second
            .start(Facing::Environment, &ScanRegion::default())
            .await
            .unwrap_err();
        assert_eq!(err, DecoderError::Busy);

        first.stop();
        first.stop();
        assert!(!slot.is_held());
        assert!(second
            .start(Facing::User, &ScanRegion::default())
            .await
            .is_ok());
    }
}
