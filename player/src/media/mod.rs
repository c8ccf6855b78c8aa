//! Media sources feeding the compositor
//!
//! A [`MediaSource`] hands out the current stacked RGBA frame, reports its
//! readiness with HTML media semantics and queues lifecycle events that the
//! player drains once per turn:
//!
//! - `sequence`: stacked frames held in memory, driven by a media clock
//! - `gst`: GStreamer decode pipeline (feature `video`)

pub mod sequence;

#[cfg(feature = "video")]
pub mod gst;

pub use sequence::FrameSequence;

#[cfg(feature = "video")]
pub use gst::GstMediaSource;

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Result;
use common::ReadyState;

use crate::gpu::FrameView;

/// Lifecycle notification from a media source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// Dimensions of a (possibly new) source are known
    MetadataLoaded {
        raw_width: u32,
        raw_height: u32,
        /// Identity of the loaded source (path, URI, ...)
        source: String,
    },
    /// The frame at the current position has been decoded
    FirstFrameReady,
    /// The source was emptied
    Unloaded,
    /// Output of the playing predicate changed
    PlaybackChanged(bool),
}

/// Handle on a decoding media element
pub trait MediaSource {
    /// Identity of the loaded source, if any
    fn source_id(&self) -> Option<&str>;

    /// Raw (stacked) frame size, once metadata is known
    fn raw_frame_size(&self) -> Option<(u32, u32)>;

    fn ready_state(&self) -> ReadyState;

    /// Frame at the current position, if one is decoded
    fn current_frame(&self) -> Option<FrameView<'_>>;

    fn play(&mut self) -> Result<()>;
    fn pause(&mut self) -> Result<()>;
    fn seek(&mut self, position: Duration) -> Result<()>;

    fn position(&self) -> Duration;
    fn is_paused(&self) -> bool;
    fn is_ended(&self) -> bool;

    /// Advance internal state to `now` and drain queued events, oldest first
    fn poll_events(&mut self, now: Instant) -> Vec<MediaEvent>;

    /// Whether the source is currently advancing frames
    fn is_advancing(&self) -> bool {
        is_advancing(self.is_paused(), self.is_ended(), self.ready_state())
    }
}

impl<M: MediaSource + ?Sized> MediaSource for Box<M> {
    fn source_id(&self) -> Option<&str> {
        (**self).source_id()
    }

    fn raw_frame_size(&self) -> Option<(u32, u32)> {
        (**self).raw_frame_size()
    }

    fn ready_state(&self) -> ReadyState {
        (**self).ready_state()
    }

    fn current_frame(&self) -> Option<FrameView<'_>> {
        (**self).current_frame()
    }

    fn play(&mut self) -> Result<()> {
        (**self).play()
    }

    fn pause(&mut self) -> Result<()> {
        (**self).pause()
    }

    fn seek(&mut self, position: Duration) -> Result<()> {
        (**self).seek(position)
    }

    fn position(&self) -> Duration {
        (**self).position()
    }

    fn is_paused(&self) -> bool {
        (**self).is_paused()
    }

    fn is_ended(&self) -> bool {
        (**self).is_ended()
    }

    fn poll_events(&mut self, now: Instant) -> Vec<MediaEvent> {
        (**self).poll_events(now)
    }
}

/// Stock playing predicate: not paused, not ended and beyond the current frame
pub fn is_advancing(paused: bool, ended: bool, ready_state: ReadyState) -> bool {
    !paused && !ended && ready_state > ReadyState::HaveCurrentData
}

/// Open `input` as the most suitable media source.
///
/// Image files, directories and glob patterns load as a [`FrameSequence`];
/// anything else is handed to GStreamer when the `video` feature is built.
pub fn open(input: &str, fps: f64, looping: bool) -> Result<Box<dyn MediaSource>> {
    let expanded = shellexpand::tilde(input).into_owned();

    if sequence::is_sequence_input(&expanded) {
        let mut frames = FrameSequence::open(&expanded, fps)?;
        frames.set_looping(looping);
        return Ok(Box::new(frames));
    }

    open_video(Path::new(&expanded), looping)
}

#[cfg(feature = "video")]
fn open_video(path: &Path, looping: bool) -> Result<Box<dyn MediaSource>> {
    let mut source = GstMediaSource::load(path)?;
    source.set_looping(looping);
    Ok(Box::new(source))
}

#[cfg(not(feature = "video"))]
fn open_video(path: &Path, _looping: bool) -> Result<Box<dyn MediaSource>> {
    anyhow::bail!(
        "Cannot open {}: video support not compiled in (enable the `video` feature)",
        path.display()
    )
}
