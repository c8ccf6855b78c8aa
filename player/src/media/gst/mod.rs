//! GStreamer-backed media source
//!
//! - `pipeline`: pipeline construction and appsink wiring
//! - `frames`: latest-frame mailbox shared with the streaming thread
//! - `stats`: presentation/drop statistics

mod frames;
mod pipeline;
mod stats;

use std::collections::VecDeque;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use common::ReadyState;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;

use self::frames::{DecodedFrame, FrameSlot};
use self::stats::VideoStats;
use super::{MediaEvent, MediaSource};
use crate::gpu::FrameView;

/// Decodes a stacked-alpha video file
pub struct GstMediaSource {
    pipeline: gst::Pipeline,
    app_sink: gst_app::AppSink,
    slot: FrameSlot,
    stats: VideoStats,
    source: String,

    /// Owned copy of the frame the compositor reads
    current: Option<DecodedFrame>,

    ready: ReadyState,
    paused: bool,
    ended: bool,
    looping: bool,
    was_advancing: bool,
    pending: VecDeque<MediaEvent>,
}

impl GstMediaSource {
    /// Build the pipeline for `path` and preroll it (paused)
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        pipeline::initialize_gstreamer()?;

        let path = path.as_ref();
        log::info!("Loading video: {}", path.display());

        let (pipeline, app_sink) = pipeline::build_pipeline(path)?;
        pipeline::configure_app_sink(&app_sink);

        let slot = FrameSlot::new();
        let stats = VideoStats::new();
        pipeline::setup_frame_callbacks(&app_sink, slot.clone(), stats.frames_dropped_handle());

        pipeline
            .set_state(gst::State::Paused)
            .context("Failed to preroll pipeline")?;

        Ok(Self {
            pipeline,
            app_sink,
            slot,
            stats,
            source: path.display().to_string(),
            current: None,
            ready: ReadyState::HaveNothing,
            paused: true,
            ended: false,
            looping: true,
            was_advancing: false,
            pending: VecDeque::new(),
        })
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    pub fn detected_fps(&self) -> Option<f64> {
        self.stats.detected_fps
    }

    /// Drain ALL bus messages; undrained messages pile up in memory
    fn drain_bus(&mut self) {
        let Some(bus) = self.pipeline.bus() else {
            return;
        };

        while let Some(msg) = bus.pop() {
            match msg.view() {
                gst::MessageView::Eos(_) => {
                    if self.looping {
                        log::debug!("Video reached EOS, looping...");
                        crate::log_and_continue!(
                            self.pipeline.seek_simple(
                                gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT,
                                gst::ClockTime::ZERO,
                            ),
                            "loop video"
                        );
                    } else {
                        log::info!("Video playback finished");
                        self.ended = true;
                        self.paused = true;
                    }
                }

                gst::MessageView::Error(err) => {
                    log::error!(
                        "GStreamer error: {} (debug: {:?})",
                        err.error(),
                        err.debug()
                    );
                    self.paused = true;
                }

                _ => {}
            }
        }
    }

    fn take_frame(&mut self) {
        let Some(frame) = self.slot.take() else {
            return;
        };

        self.stats.record_fps(frame.fps);
        self.stats.increment_presented();

        let first = self.current.is_none();
        if first {
            self.pending.push_back(MediaEvent::MetadataLoaded {
                raw_width: frame.width,
                raw_height: frame.height,
                source: self.source.clone(),
            });
        }
        self.current = Some(frame);
        self.ready = ReadyState::HaveEnoughData;
        if first {
            self.pending.push_back(MediaEvent::FirstFrameReady);
        }
    }

    fn sync_advancing(&mut self) {
        let advancing = MediaSource::is_advancing(self);
        if advancing != self.was_advancing {
            self.was_advancing = advancing;
            self.pending.push_back(MediaEvent::PlaybackChanged(advancing));
        }
    }
}

impl MediaSource for GstMediaSource {
    fn source_id(&self) -> Option<&str> {
        Some(&self.source)
    }

    fn raw_frame_size(&self) -> Option<(u32, u32)> {
        self.current.as_ref().map(|f| (f.width, f.height))
    }

    fn ready_state(&self) -> ReadyState {
        self.ready
    }

    fn current_frame(&self) -> Option<FrameView<'_>> {
        let frame = self.current.as_ref()?;
        FrameView::new(frame.width, frame.height, &frame.pixels).ok()
    }

    fn play(&mut self) -> Result<()> {
        log::info!("Starting video playback");
        if self.ended {
            self.seek(Duration::ZERO)?;
        }
        self.pipeline
            .set_state(gst::State::Playing)
            .context("Failed to set pipeline to Playing state")?;
        self.paused = false;
        self.sync_advancing();
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        log::info!("Pausing video playback");
        self.pipeline
            .set_state(gst::State::Paused)
            .context("Failed to set pipeline to Paused state")?;
        self.paused = true;
        self.sync_advancing();
        Ok(())
    }

    fn seek(&mut self, position: Duration) -> Result<()> {
        self.pipeline
            .seek_simple(
                gst::SeekFlags::FLUSH | gst::SeekFlags::ACCURATE,
                gst::ClockTime::from_nseconds(position.as_nanos() as u64),
            )
            .context("Seek failed")?;
        self.ended = false;
        // Frame at the new position is not decoded yet
        if self.ready > ReadyState::HaveMetadata {
            self.ready = ReadyState::HaveMetadata;
        }
        self.sync_advancing();
        Ok(())
    }

    fn position(&self) -> Duration {
        self.pipeline
            .query_position::<gst::ClockTime>()
            .map(|t| Duration::from_nanos(t.nseconds()))
            .unwrap_or_default()
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn is_ended(&self) -> bool {
        self.ended
    }

    fn poll_events(&mut self, _now: Instant) -> Vec<MediaEvent> {
        self.drain_bus();
        self.take_frame();
        self.sync_advancing();
        self.stats.maybe_log_stats(Duration::from_secs(3));
        self.pending.drain(..).collect()
    }
}

impl Drop for GstMediaSource {
    fn drop(&mut self) {
        log::info!("Stopping video pipeline");

        // Clear callbacks first to prevent new frames
        self.app_sink
            .set_callbacks(gst_app::AppSinkCallbacks::builder().build());

        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            log::warn!("Failed to set pipeline state to Null: {}", e);
        } else {
            let (result, current, pending) =
                self.pipeline.state(Some(gst::ClockTime::from_seconds(2)));
            match result {
                Ok(_) => log::debug!(
                    "Pipeline final state: current={:?}, pending={:?}",
                    current,
                    pending
                ),
                Err(e) => log::warn!("Failed to get pipeline final state: {:?}", e),
            }
        }

        if let Some(bus) = self.pipeline.bus() {
            let mut drained = 0;
            while bus.pop().is_some() {
                drained += 1;
            }
            if drained > 0 {
                log::debug!("Drained {} pending messages from bus", drained);
            }
        }

        self.slot.clear();
        log::info!(
            "Video pipeline stopped ({} presented, {:.1}% dropped)",
            self.stats.frames_presented,
            self.stats.drop_rate()
        );
    }
}
