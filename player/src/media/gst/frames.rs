//! Hand-off of decoded frames from the streaming thread

use std::sync::{Arc, Mutex};

/// One decoded RGBA frame, tightly packed
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    /// Frame rate advertised by the caps
    pub fps: Option<f64>,
}

/// Latest-frame mailbox shared with the appsink callbacks
#[derive(Debug, Clone, Default)]
pub struct FrameSlot {
    latest: Arc<Mutex<Option<DecodedFrame>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a frame; returns true if an unconsumed frame was overwritten
    pub fn store(&self, frame: DecodedFrame) -> bool {
        match self.latest.lock() {
            Ok(mut latest) => latest.replace(frame).is_some(),
            Err(_) => false,
        }
    }

    /// Take the newest frame, if one arrived since the last call
    pub fn take(&self) -> Option<DecodedFrame> {
        self.latest.lock().ok()?.take()
    }

    pub fn clear(&self) {
        if let Ok(mut latest) = self.latest.lock() {
            *latest = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(red: u8) -> DecodedFrame {
        DecodedFrame {
            width: 1,
            height: 2,
            pixels: vec![red, 0, 0, 255, 255, 255, 255, 255],
            fps: Some(30.0),
        }
    }

    #[test]
    fn test_slot_keeps_only_newest() {
        let slot = FrameSlot::new();
        assert!(!slot.store(frame(1)));
        assert!(slot.store(frame(2)));
        assert_eq!(slot.take().map(|f| f.pixels[0]), Some(2));
        assert!(slot.take().is_none());
    }

    #[test]
    fn test_slot_clear() {
        let slot = FrameSlot::new();
        slot.clone().store(frame(1));
        slot.clear();
        assert!(slot.take().is_none());
    }
}
