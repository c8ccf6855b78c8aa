//! In-memory stacked-alpha frame sequence
//!
//! Frames are RGBA images whose top half is color and bottom half alpha. A
//! media clock anchored on the first poll after `play` picks the frame for
//! the current position.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use common::ReadyState;
use image::RgbaImage;

use super::{MediaEvent, MediaSource};
use crate::gpu::FrameView;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp"];

/// Whether `input` names something [`FrameSequence::open`] can load
pub fn is_sequence_input(input: &str) -> bool {
    if has_glob_chars(input) {
        return true;
    }
    let path = Path::new(input);
    path.is_dir() || is_image_file(path)
}

fn has_glob_chars(input: &str) -> bool {
    input.contains(['*', '?', '['])
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Stacked frames played back at a fixed rate
pub struct FrameSequence {
    id: Option<String>,
    frames: Vec<RgbaImage>,
    frame_duration: Duration,
    looping: bool,
    paused: bool,
    ended: bool,
    seeking: bool,

    /// Media position at the last clock anchor
    position: Duration,

    /// Wall-clock time of the last anchor while playing
    anchor: Option<Instant>,

    was_advancing: bool,
    pending: VecDeque<MediaEvent>,
}

impl FrameSequence {
    /// Sequence with nothing loaded
    pub fn empty(fps: f64) -> Self {
        Self {
            id: None,
            frames: Vec::new(),
            frame_duration: frame_duration(fps),
            looping: true,
            paused: true,
            ended: false,
            seeking: false,
            position: Duration::ZERO,
            anchor: None,
            was_advancing: false,
            pending: VecDeque::new(),
        }
    }

    /// Load `frames` under the identity `id`
    pub fn from_frames(id: impl Into<String>, frames: Vec<RgbaImage>, fps: f64) -> Result<Self> {
        let mut sequence = Self::empty(fps);
        sequence.load(id, frames)?;
        Ok(sequence)
    }

    /// Load a single image, every image in a directory, or every image
    /// matching a glob pattern (sorted by path)
    pub fn open(input: &str, fps: f64) -> Result<Self> {
        let paths = collect_paths(input)?;
        log::info!("Loading {} stacked frame(s) from {}", paths.len(), input);

        let frames = paths
            .iter()
            .map(|path| {
                image::open(path)
                    .map(|img| img.to_rgba8())
                    .with_context(|| format!("Failed to load frame {}", path.display()))
            })
            .collect::<Result<Vec<_>>>()?;

        Self::from_frames(input, frames, fps)
    }

    /// Replace the loaded frames; queues metadata and first-frame events
    pub fn load(&mut self, id: impl Into<String>, frames: Vec<RgbaImage>) -> Result<()> {
        let Some(first) = frames.first() else {
            bail!("A frame sequence needs at least one frame");
        };
        let (width, height) = first.dimensions();
        if height < 2 {
            bail!("Stacked frames need at least two rows, got {}x{}", width, height);
        }
        if let Some((index, frame)) = frames
            .iter()
            .enumerate()
            .find(|(_, frame)| frame.dimensions() != (width, height))
        {
            bail!(
                "Frame {} is {}x{}, expected {}x{}",
                index,
                frame.width(),
                frame.height(),
                width,
                height
            );
        }

        if self.id.is_some() {
            self.unload();
        }

        let id = id.into();
        log::debug!(
            "Frame sequence {}: {} frame(s) of {}x{}",
            id,
            frames.len(),
            width,
            height
        );

        self.id = Some(id.clone());
        self.frames = frames;
        self.position = Duration::ZERO;
        self.anchor = None;
        self.ended = false;
        self.seeking = false;
        self.pending.push_back(MediaEvent::MetadataLoaded {
            raw_width: width,
            raw_height: height,
            source: id,
        });
        self.pending.push_back(MediaEvent::FirstFrameReady);
        self.sync_advancing();
        Ok(())
    }

    /// Drop the loaded frames; queues an unload event
    pub fn unload(&mut self) {
        if self.id.take().is_none() {
            return;
        }
        self.frames.clear();
        self.position = Duration::ZERO;
        self.anchor = None;
        self.ended = false;
        self.seeking = false;
        self.pending.push_back(MediaEvent::Unloaded);
        self.sync_advancing();
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn duration(&self) -> Duration {
        self.frame_duration * self.frames.len() as u32
    }

    /// Index of the frame shown at the current position
    pub fn current_index(&self) -> Option<usize> {
        if self.frames.is_empty() {
            return None;
        }
        let index = (self.position.as_nanos() / self.frame_duration.as_nanos().max(1)) as usize;
        Some(index.min(self.frames.len() - 1))
    }

    fn advance_clock(&mut self, now: Instant) {
        if self.paused || self.ended || self.frames.is_empty() {
            self.anchor = None;
            return;
        }

        let Some(anchor) = self.anchor else {
            self.anchor = Some(now);
            return;
        };

        self.position += now.saturating_duration_since(anchor);
        self.anchor = Some(now);

        let duration = self.duration();
        if self.position < duration {
            return;
        }

        if self.looping {
            let wrapped = self.position.as_nanos() % duration.as_nanos().max(1);
            self.position = Duration::from_nanos(wrapped as u64);
            log::trace!("Frame sequence looped");
        } else {
            // Hold the last frame
            self.position = duration.saturating_sub(Duration::from_nanos(1));
            self.ended = true;
            self.paused = true;
            self.anchor = None;
            log::info!("Frame sequence playback finished");
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

impl MediaSource for FrameSequence {
    fn source_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn raw_frame_size(&self) -> Option<(u32, u32)> {
        self.frames.first().map(RgbaImage::dimensions)
    }

    fn ready_state(&self) -> ReadyState {
        if self.frames.is_empty() {
            ReadyState::HaveNothing
        } else if self.seeking {
            ReadyState::HaveMetadata
        } else {
            ReadyState::HaveEnoughData
        }
    }

    fn current_frame(&self) -> Option<FrameView<'_>> {
        if self.seeking {
            return None;
        }
        let frame = &self.frames[self.current_index()?];
        Some(FrameView {
            width: frame.width(),
            height: frame.height(),
            pixels: frame.as_raw(),
        })
    }

    fn play(&mut self) -> Result<()> {
        if self.frames.is_empty() {
            bail!("Nothing loaded");
        }
        if self.ended {
            self.position = Duration::ZERO;
            self.ended = false;
        }
        self.paused = false;
        self.sync_advancing();
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.paused = true;
        self.anchor = None;
        self.sync_advancing();
        Ok(())
    }

    fn seek(&mut self, position: Duration) -> Result<()> {
        if self.frames.is_empty() {
            bail!("Nothing loaded");
        }
        self.position = position.min(self.duration().saturating_sub(Duration::from_nanos(1)));
        self.anchor = None;
        self.ended = false;
        // Frame is "decoded" again on the next poll
        self.seeking = true;
        self.sync_advancing();
        Ok(())
    }

    fn position(&self) -> Duration {
        self.position
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn is_ended(&self) -> bool {
        self.ended
    }

    fn poll_events(&mut self, now: Instant) -> Vec<MediaEvent> {
        if self.seeking {
            self.seeking = false;
        }
        self.advance_clock(now);
        self.sync_advancing();
        self.pending.drain(..).collect()
    }
}

fn frame_duration(fps: f64) -> Duration {
    if fps.is_finite() && fps > 0.0 {
        Duration::from_secs_f64(1.0 / fps)
    } else {
        Duration::from_secs_f64(1.0 / 30.0)
    }
}

fn collect_paths(input: &str) -> Result<Vec<PathBuf>> {
    let path = Path::new(input);

    let pattern = if path.is_dir() {
        format!("{}/*", input.trim_end_matches('/'))
    } else if has_glob_chars(input) {
        input.to_string()
    } else {
        return Ok(vec![path.to_path_buf()]);
    };

    let mut paths: Vec<PathBuf> = glob::glob(&pattern)
        .with_context(|| format!("Invalid glob pattern: {}", pattern))?
        .filter_map(|entry| match entry {
            Ok(path) if is_image_file(&path) => Some(path),
            Ok(_) => None,
            Err(e) => {
                log::warn!("Skipping unreadable path: {}", e);
                None
            }
        })
        .collect();
    paths.sort();

    if paths.is_empty() {
        bail!("No images found for {}", input);
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(count: u8) -> Vec<RgbaImage> {
        (0..count)
            .map(|i| RgbaImage::from_pixel(2, 4, image::Rgba([i, 0, 0, 255])))
            .collect()
    }

    #[test]
    fn test_load_queues_metadata_then_first_frame() {
        let mut sequence = FrameSequence::from_frames("clip", frames(2), 10.0).unwrap();
        let events = sequence.poll_events(Instant::now());
        assert_eq!(
            events,
            vec![
                MediaEvent::MetadataLoaded {
                    raw_width: 2,
                    raw_height: 4,
                    source: "clip".into()
                },
                MediaEvent::FirstFrameReady,
            ]
        );
        assert!(sequence.poll_events(Instant::now()).is_empty());
    }

    #[test]
    fn test_clock_advances_only_while_playing() {
        let mut sequence = FrameSequence::from_frames("clip", frames(4), 10.0).unwrap();
        let t0 = Instant::now();
        sequence.poll_events(t0);

        sequence.play().unwrap();
        assert_eq!(
            sequence.poll_events(t0),
            vec![MediaEvent::PlaybackChanged(true)]
        );
        sequence.poll_events(t0 + Duration::from_millis(250));
        assert_eq!(sequence.current_index(), Some(2));

        sequence.pause().unwrap();
        sequence.poll_events(t0 + Duration::from_secs(5));
        assert_eq!(sequence.current_index(), Some(2));
    }

    #[test]
    fn test_non_looping_sequence_ends_on_last_frame() {
        let mut sequence = FrameSequence::from_frames("clip", frames(3), 10.0).unwrap();
        sequence.set_looping(false);
        let t0 = Instant::now();
        sequence.play().unwrap();
        sequence.poll_events(t0);

        let events = sequence.poll_events(t0 + Duration::from_secs(1));
        assert!(events.contains(&MediaEvent::PlaybackChanged(false)));
        assert!(sequence.is_ended());
        assert_eq!(sequence.current_index(), Some(2));
        assert_eq!(sequence.current_frame().unwrap().texel(0, 0)[0], 2);
    }

    #[test]
    fn test_looping_wraps_position() {
        let mut sequence = FrameSequence::from_frames("clip", frames(2), 10.0).unwrap();
        let t0 = Instant::now();
        sequence.play().unwrap();
        sequence.poll_events(t0);
        sequence.poll_events(t0 + Duration::from_millis(250));

        assert!(!sequence.is_ended());
        assert_eq!(sequence.current_index(), Some(0));
    }

    #[test]
    fn test_seek_is_transiently_not_ready() {
        let mut sequence = FrameSequence::from_frames("clip", frames(4), 10.0).unwrap();
        sequence.poll_events(Instant::now());

        sequence.seek(Duration::from_millis(310)).unwrap();
        assert_eq!(sequence.ready_state(), ReadyState::HaveMetadata);
        assert!(sequence.current_frame().is_none());

        sequence.poll_events(Instant::now());
        assert_eq!(sequence.current_index(), Some(3));
        assert!(sequence.current_frame().is_some());
    }

    #[test]
    fn test_seek_while_playing_toggles_within_one_poll() {
        let mut sequence = FrameSequence::from_frames("clip", frames(4), 10.0).unwrap();
        sequence.play().unwrap();
        sequence.poll_events(Instant::now());

        sequence.seek(Duration::ZERO).unwrap();
        assert_eq!(
            sequence.poll_events(Instant::now()),
            vec![
                MediaEvent::PlaybackChanged(false),
                MediaEvent::PlaybackChanged(true)
            ]
        );
    }

    #[test]
    fn test_unload_clears_frames() {
        let mut sequence = FrameSequence::from_frames("clip", frames(1), 10.0).unwrap();
        sequence.poll_events(Instant::now());
        sequence.unload();

        assert_eq!(sequence.poll_events(Instant::now()), vec![MediaEvent::Unloaded]);
        assert_eq!(sequence.ready_state(), ReadyState::HaveNothing);
        assert!(sequence.raw_frame_size().is_none());
        assert!(sequence.play().is_err());
    }

    #[test]
    fn test_mismatched_frames_rejected() {
        let mut mixed = frames(1);
        mixed.push(RgbaImage::new(4, 4));
        assert!(FrameSequence::from_frames("clip", mixed, 10.0).is_err());
        assert!(FrameSequence::from_frames("clip", Vec::new(), 10.0).is_err());
        assert!(FrameSequence::from_frames("clip", vec![RgbaImage::new(4, 1)], 10.0).is_err());
    }

    #[test]
    fn test_open_directory_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for (name, red) in [("b.png", 20u8), ("a.png", 10), ("c.png", 30)] {
            RgbaImage::from_pixel(2, 2, image::Rgba([red, 0, 0, 255]))
                .save(dir.path().join(name))
                .unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let input = dir.path().to_str().unwrap();
        assert!(is_sequence_input(input));
        let mut sequence = FrameSequence::open(input, 1.0).unwrap();
        assert_eq!(sequence.frame_count(), 3);

        sequence.seek(Duration::from_millis(1500)).unwrap();
        sequence.poll_events(Instant::now());
        assert_eq!(sequence.current_frame().unwrap().texel(0, 0)[0], 20);
    }
}
