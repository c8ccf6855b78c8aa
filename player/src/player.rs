//! Stacked-alpha player
//!
//! Wires one media source to one output surface: media events and observer
//! notifications feed the layout engine and the render scheduler, which in
//! turn drive the compositor. Everything runs on the host's thread; the host
//! calls [`Player::pump`] at the end of each callback turn and
//! [`Player::on_display_refresh`] on every vsync.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::Result;
use common::{BackendError, ContainerGeometry, FitMode, FitResult, GpuInitError, SourceFrame};
use image::RgbaImage;

use crate::compositor::{self, DrawOutcome};
use crate::config::Config;
use crate::gpu::{GpuBackend, SurfaceId};
use crate::layout;
use crate::manager::ResourceManager;
use crate::media::{MediaEvent, MediaSource};
use crate::observer::{self, ContainerId, ContainerSize, Subscription};
use crate::scheduler::{RecomputeDebounce, RenderScheduler, Transition};

/// Mount-time settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerOptions {
    pub fit: FitMode,
    pub premultiplied_alpha: bool,
    pub autoplay: bool,
    pub preroll_delay: Duration,
    pub resize_debounce: Duration,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            fit: FitMode::Fill,
            premultiplied_alpha: false,
            autoplay: false,
            preroll_delay: Duration::from_millis(100),
            resize_debounce: Duration::from_millis(100),
        }
    }
}

impl PlayerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            fit: config.fit_mode(),
            premultiplied_alpha: config.playback.premultiplied_alpha,
            autoplay: config.playback.autoplay,
            preroll_delay: config.preroll_delay(),
            resize_debounce: config.resize_debounce(),
        }
    }
}

/// Observer notification waiting for the next turn
#[derive(Debug, Clone, Copy, PartialEq)]
enum HostEvent {
    PixelRatio(f64),
    ContainerResized(ContainerSize),
}

type PlayStateCallback = Box<dyn FnMut(bool)>;

/// One mounted stacked-alpha player
pub struct Player<B: GpuBackend, M: MediaSource> {
    manager: ResourceManager<B>,
    media: M,
    surface: SurfaceId,
    container: ContainerId,

    geometry: ContainerGeometry,
    fit_mode: FitMode,
    premultiplied_alpha: bool,

    source: Option<SourceFrame>,
    source_id: Option<String>,

    /// Layout currently applied to the surface; `None` once invalidated
    fit: Option<FitResult>,

    scheduler: RenderScheduler,
    debounce: RecomputeDebounce,
    is_playing: bool,
    on_play_state_change: Option<PlayStateCallback>,

    inbox: Rc<RefCell<VecDeque<HostEvent>>>,
    subscriptions: Vec<Subscription>,

    frames_drawn: u64,
    mounted: bool,
}

impl<B: GpuBackend, M: MediaSource> Player<B, M> {
    /// Acquire the surface, subscribe to resize/pixel-ratio changes and
    /// apply the initial layout synchronously
    pub fn mount(
        mut manager: ResourceManager<B>,
        media: M,
        surface: SurfaceId,
        container: ContainerId,
        geometry: ContainerGeometry,
        options: PlayerOptions,
    ) -> Result<Self, GpuInitError> {
        manager.acquire(surface)?;
        manager.set_premultiplied_alpha(surface, options.premultiplied_alpha);

        let inbox = Rc::new(RefCell::new(VecDeque::new()));
        let subscriptions = vec![
            {
                let inbox = Rc::clone(&inbox);
                observer::pixel_ratio_hub().subscribe((), move |ratio: &f64| {
                    inbox.borrow_mut().push_back(HostEvent::PixelRatio(*ratio))
                })
            },
            {
                let inbox = Rc::clone(&inbox);
                observer::container_hub().subscribe(container, move |size: &ContainerSize| {
                    inbox
                        .borrow_mut()
                        .push_back(HostEvent::ContainerResized(*size))
                })
            },
        ];

        let source_id = media.source_id().map(str::to_owned);
        let source = media
            .raw_frame_size()
            .and_then(|(w, h)| SourceFrame::from_raw(w, h));

        let mut player = Self {
            manager,
            media,
            surface,
            container,
            geometry,
            fit_mode: options.fit,
            premultiplied_alpha: options.premultiplied_alpha,
            source,
            source_id,
            fit: None,
            scheduler: RenderScheduler::new(options.preroll_delay),
            debounce: RecomputeDebounce::new(options.resize_debounce),
            is_playing: false,
            on_play_state_change: None,
            inbox,
            subscriptions,
            frames_drawn: 0,
            mounted: true,
        };

        crate::log_and_continue!(player.recompute_now(), "apply initial layout");

        if options.autoplay {
            crate::log_and_continue!(player.media.play(), "autoplay");
        }

        log::info!(
            "Player mounted on surface {} (container {}, fit {})",
            surface.0,
            container.0,
            player.fit_mode
        );
        Ok(player)
    }

    /// Register the callback fired when the playing state flips
    pub fn on_play_state_change(&mut self, callback: impl FnMut(bool) + 'static) {
        self.on_play_state_change = Some(Box::new(callback));
    }

    /// Process everything that happened since the last turn: media events,
    /// observer notifications, the end-of-turn play-state flush and due
    /// timers
    pub fn pump(&mut self, now: Instant) {
        if !self.mounted {
            return;
        }

        for event in self.media.poll_events(now) {
            self.handle_media_event(event, now);
        }

        let host_events: Vec<HostEvent> = self.inbox.borrow_mut().drain(..).collect();
        for event in host_events {
            match event {
                HostEvent::PixelRatio(ratio) => {
                    self.geometry = self.geometry.with_device_pixel_ratio(ratio);
                }
                HostEvent::ContainerResized(size) => {
                    self.geometry = self.geometry.with_size(size.width, size.height);
                }
            }
            self.request_recompute(now);
        }

        if let Some(transition) = self.scheduler.flush_turn() {
            self.apply_transition(transition);
        }

        if self.debounce.take_due(now) {
            crate::log_and_continue!(self.recompute(), "recompute layout");
        }

        if self.scheduler.due_preroll(now) {
            log::debug!("Pre-roll draw on surface {}", self.surface.0);
            crate::log_and_continue!(self.scheduled_draw(), "draw pre-roll frame");
        }
    }

    /// Display refresh: pump, then draw if the render loop is running
    pub fn on_display_refresh(&mut self, now: Instant) {
        self.pump(now);
        if self.mounted && self.scheduler.on_refresh() {
            crate::log_and_continue!(self.scheduled_draw(), "draw frame");
        }
    }

    fn handle_media_event(&mut self, event: MediaEvent, now: Instant) {
        match event {
            MediaEvent::MetadataLoaded {
                raw_width,
                raw_height,
                source,
            } => {
                if self.source_id.as_deref() == Some(source.as_str()) && self.source.is_some() {
                    log::trace!("Metadata for unchanged source {}, ignoring", source);
                    return;
                }
                log::info!(
                    "New source {} ({}x{} stacked)",
                    source,
                    raw_width,
                    raw_height
                );
                self.source = SourceFrame::from_raw(raw_width, raw_height);
                self.source_id = Some(source);
                self.scheduler.on_source_changed();
                self.invalidate(now);
            }
            MediaEvent::FirstFrameReady => self.scheduler.on_first_frame(now),
            MediaEvent::Unloaded => {
                if self.source_id.take().is_none() && self.source.is_none() {
                    return;
                }
                log::info!("Source unloaded from surface {}", self.surface.0);
                self.source = None;
                self.scheduler.on_source_changed();
                self.invalidate(now);
            }
            MediaEvent::PlaybackChanged(playing) => self.scheduler.on_playback_changed(playing),
        }
    }

    fn apply_transition(&mut self, transition: Transition) {
        let playing = transition == Transition::Started;
        if self.is_playing == playing {
            return;
        }
        self.is_playing = playing;
        log::debug!(
            "Surface {} play state: {}",
            self.surface.0,
            if playing { "playing" } else { "stopped" }
        );
        if let Some(callback) = self.on_play_state_change.as_mut() {
            callback(playing);
        }
    }

    /// Drop the applied layout; recomputed before the next draw at the latest
    fn invalidate(&mut self, now: Instant) {
        self.fit = None;
        self.request_recompute(now);
    }

    /// Debounced recompute
    pub fn request_recompute(&mut self, now: Instant) {
        self.debounce.request(now);
    }

    /// Immediate recompute; cancels a pending debounced one
    pub fn recompute_now(&mut self) -> Result<DrawOutcome, BackendError> {
        if self.debounce.recompute_now() {
            log::trace!("Pending recompute superseded");
        }
        self.recompute()
    }

    /// Apply the layout for the current inputs, then clear or redraw
    fn recompute(&mut self) -> Result<DrawOutcome, BackendError> {
        let result = layout::fit(self.source, &self.geometry, self.fit_mode);

        self.manager.resize_backing_buffer(
            self.surface,
            result.backing_width,
            result.backing_height,
        )?;
        self.manager
            .set_clip_enabled(self.surface, result.clip.is_some());
        if let Some(clip) = result.clip {
            self.manager.set_clip_ratio(self.surface, clip.as_array());
        }

        log::debug!(
            "Surface {} layout: backing {}x{}, transform {}, clip {:?}",
            self.surface.0,
            result.backing_width,
            result.backing_height,
            result.transform.to_css(),
            result.clip
        );
        self.fit = Some(result);

        if !result.has_content {
            self.manager.clear(self.surface)?;
            return Ok(DrawOutcome::NoFrame);
        }
        self.draw_current()
    }

    fn draw_current(&mut self) -> Result<DrawOutcome, BackendError> {
        let outcome = compositor::draw(&mut self.manager, self.surface, &self.media, true)?;
        if outcome == DrawOutcome::Drawn {
            self.frames_drawn += 1;
        }
        Ok(outcome)
    }

    /// Draw on behalf of the scheduler, recomputing a stale layout first
    fn scheduled_draw(&mut self) -> Result<DrawOutcome, BackendError> {
        self.scheduler.record_draw();
        match self.fit {
            None => self.recompute_now(),
            Some(fit) if !fit.has_content => Ok(DrawOutcome::NoFrame),
            Some(_) => self.draw_current(),
        }
    }

    /// Recompute and redraw synchronously
    pub fn force_update(&mut self) -> Result<DrawOutcome, BackendError> {
        self.recompute_now()
    }

    /// Redraw the current frame without touching the layout
    pub fn redraw(&mut self) -> Result<DrawOutcome, BackendError> {
        match self.fit {
            Some(fit) if fit.has_content => self.draw_current(),
            _ => self.recompute_now(),
        }
    }

    pub fn set_fit_mode(&mut self, mode: FitMode) {
        if self.fit_mode == mode {
            return;
        }
        log::debug!("Surface {} fit mode: {} -> {}", self.surface.0, self.fit_mode, mode);
        self.fit_mode = mode;
        self.fit = None;
        crate::log_and_continue!(self.recompute_now(), "apply fit mode");
    }

    pub fn set_premultiplied_alpha(&mut self, premultiplied: bool) {
        if self.premultiplied_alpha == premultiplied {
            return;
        }
        self.premultiplied_alpha = premultiplied;
        self.manager
            .set_premultiplied_alpha(self.surface, premultiplied);
        crate::log_and_continue!(self.recompute_now(), "apply premultiplied alpha");
    }

    /// Replace the container geometry and recompute synchronously
    pub fn set_geometry(&mut self, geometry: ContainerGeometry) {
        self.geometry = geometry;
        crate::log_and_continue!(self.recompute_now(), "apply container geometry");
    }

    pub fn play(&mut self) -> Result<()> {
        self.media.play()
    }

    pub fn pause(&mut self) -> Result<()> {
        self.media.pause()
    }

    pub fn seek(&mut self, position: Duration) -> Result<()> {
        self.media.seek(position)
    }

    /// Playing state as of the last end-of-turn flush
    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    /// Straight-alpha RGBA image of the backing buffer
    pub fn snapshot(&mut self) -> Result<RgbaImage, BackendError> {
        let (width, height) = self
            .manager
            .backing_size(self.surface)
            .ok_or_else(|| BackendError::new("Player is unmounted"))?;
        let mut pixels = self.manager.read_pixels(self.surface)?;
        compositor::unpremultiply(&mut pixels);
        RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| BackendError::new("Read-back size does not match backing buffer"))
    }

    /// Earliest pending timer (debounced recompute or pre-roll)
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.debounce.deadline(), self.scheduler.preroll_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn fit_result(&self) -> Option<&FitResult> {
        self.fit.as_ref()
    }

    pub fn display_transform(&self) -> Option<String> {
        self.fit.map(|fit| fit.transform.to_css())
    }

    pub fn source_frame(&self) -> Option<SourceFrame> {
        self.source
    }

    pub fn geometry(&self) -> ContainerGeometry {
        self.geometry
    }

    pub fn fit_mode(&self) -> FitMode {
        self.fit_mode
    }

    pub fn premultiplied_alpha(&self) -> bool {
        self.premultiplied_alpha
    }

    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    pub fn container(&self) -> ContainerId {
        self.container
    }

    pub fn scheduler(&self) -> &RenderScheduler {
        &self.scheduler
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    pub fn media(&self) -> &M {
        &self.media
    }

    pub fn media_mut(&mut self) -> &mut M {
        &mut self.media
    }

    pub fn manager(&self) -> &ResourceManager<B> {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut ResourceManager<B> {
        &mut self.manager
    }

    /// Tear down: subscriptions, timers, render loop, then GPU state.
    /// Idempotent; also runs on drop.
    pub fn unmount(&mut self) {
        if !self.mounted {
            return;
        }
        self.mounted = false;

        self.subscriptions.clear();
        self.inbox.borrow_mut().clear();
        self.debounce.cancel();
        self.scheduler.cancel_preroll();
        self.scheduler.stop();
        self.manager.release(self.surface);
        self.fit = None;

        log::info!("Player unmounted from surface {}", self.surface.0);
    }
}

impl<B: GpuBackend, M: MediaSource> Drop for Player<B, M> {
    fn drop(&mut self) {
        self.unmount();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::SoftwareBackend;
    use crate::media::FrameSequence;
    use crate::observer::{container_hub, pixel_ratio_hub};

    const SURFACE: SurfaceId = SurfaceId(1);
    const CONTAINER: ContainerId = ContainerId(1);

    /// Two 4x4 stacked frames: opaque red over a 50% alpha mask
    fn frames() -> Vec<RgbaImage> {
        let mut frame = RgbaImage::new(4, 4);
        for (_, y, pixel) in frame.enumerate_pixels_mut() {
            *pixel = if y < 2 {
                image::Rgba([255, 0, 0, 255])
            } else {
                image::Rgba([128, 128, 128, 255])
            };
        }
        vec![frame.clone(), frame]
    }

    fn clip() -> FrameSequence {
        FrameSequence::from_frames("clip", frames(), 10.0).unwrap()
    }

    fn mount(media: FrameSequence) -> Player<SoftwareBackend, FrameSequence> {
        Player::mount(
            ResourceManager::new(SoftwareBackend::new()),
            media,
            SURFACE,
            CONTAINER,
            ContainerGeometry::new(4.0, 2.0, 1.0),
            PlayerOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_mount_without_source_clears_1x1() {
        let mut player = mount(FrameSequence::empty(10.0));
        assert_eq!(player.manager().backing_size(SURFACE), Some((1, 1)));
        assert!(!player.fit_result().unwrap().has_content);
        assert_eq!(player.snapshot().unwrap().as_raw(), &vec![0, 0, 0, 0]);
        assert_eq!(player.frames_drawn(), 0);
    }

    #[test]
    fn test_metadata_sizes_backing_buffer() {
        let mut player = mount(FrameSequence::empty(10.0));
        player.media_mut().load("clip", frames()).unwrap();
        let t0 = Instant::now();
        player.pump(t0);

        assert_eq!(player.source_frame(), SourceFrame::new(4, 2));
        // Layout is stale until the debounce fires or a draw needs it
        assert!(player.fit_result().is_none());
        assert_eq!(player.manager().backing_size(SURFACE), Some((1, 1)));

        player.pump(t0 + Duration::from_millis(100));
        assert_eq!(player.manager().backing_size(SURFACE), Some((4, 2)));
    }

    #[test]
    fn test_same_source_metadata_is_ignored() {
        let mut player = mount(clip());
        player.pump(Instant::now());
        // Layout from mount is still valid, only the pre-roll is pending
        assert!(player.fit_result().is_some());
        assert_eq!(
            player.next_deadline(),
            player.scheduler().preroll_deadline()
        );
    }

    #[test]
    fn test_preroll_draws_once_then_stays_idle() {
        let mut player = mount(clip());
        let t0 = Instant::now();
        player.pump(t0);
        player.pump(t0 + Duration::from_millis(100));

        for ms in (100..1000).step_by(16) {
            player.on_display_refresh(t0 + Duration::from_millis(ms));
        }
        assert_eq!(player.scheduler().idle_draws(), 1);
        assert!(!player.is_playing());
    }

    #[test]
    fn test_play_state_callback_fires_per_transition() {
        let mut player = mount(clip());
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let seen = Rc::clone(&seen);
            player.on_play_state_change(move |playing| seen.borrow_mut().push(playing));
        }

        let t0 = Instant::now();
        player.play().unwrap();
        player.pump(t0);
        assert!(player.is_playing());

        player.pause().unwrap();
        player.play().unwrap();
        player.pump(t0);

        player.pause().unwrap();
        player.pump(t0);
        assert_eq!(*seen.borrow(), vec![true, false]);
    }

    #[test]
    fn test_container_resize_is_debounced() {
        let mut player = mount(clip());
        let t0 = Instant::now();
        player.pump(t0);
        player.pump(t0 + Duration::from_millis(100));

        container_hub().emit(
            CONTAINER,
            &ContainerSize {
                width: 2.0,
                height: 1.0,
            },
        );
        player.pump(t0 + Duration::from_millis(150));
        assert_eq!(player.manager().backing_size(SURFACE), Some((4, 2)));

        player.pump(t0 + Duration::from_millis(250));
        assert_eq!(player.manager().backing_size(SURFACE), Some((2, 1)));
    }

    #[test]
    fn test_continuous_resize_applies_layout_mid_stream() {
        let mut player = mount(clip());
        let t0 = Instant::now();
        player.on_display_refresh(t0);
        player.on_display_refresh(t0 + Duration::from_millis(100));
        assert_eq!(player.manager().backing_size(SURFACE), Some((4, 2)));

        // A drag: a new size every 50 ms for a second
        let mut first_applied = None;
        for step in 0..20u64 {
            let at = Duration::from_millis(100 + step * 50);
            container_hub().emit(
                CONTAINER,
                &ContainerSize {
                    width: 2.0 + (step % 2) as f64,
                    height: 1.0,
                },
            );
            player.on_display_refresh(t0 + at);
            if first_applied.is_none() && player.manager().backing_size(SURFACE) != Some((4, 2)) {
                first_applied = Some(at);
            }
        }
        assert_eq!(first_applied, Some(Duration::from_millis(200)));

        player.on_display_refresh(t0 + Duration::from_millis(1200));
        assert_eq!(player.manager().backing_size(SURFACE), Some((3, 1)));
    }

    #[test]
    fn test_pixel_ratio_change_resizes_backing() {
        let mut player = Player::mount(
            ResourceManager::new(SoftwareBackend::new()),
            clip(),
            SURFACE,
            CONTAINER,
            ContainerGeometry::new(2.0, 1.0, 1.0),
            PlayerOptions::default(),
        )
        .unwrap();
        let t0 = Instant::now();
        player.pump(t0);
        player.pump(t0 + Duration::from_millis(100));
        assert_eq!(player.manager().backing_size(SURFACE), Some((2, 1)));

        pixel_ratio_hub().emit((), &2.0);
        player.pump(t0 + Duration::from_millis(200));
        player.pump(t0 + Duration::from_millis(300));
        assert_eq!(player.manager().backing_size(SURFACE), Some((4, 2)));
    }

    #[test]
    fn test_setters_recompute_synchronously() {
        let mut player = mount(clip());
        player.pump(Instant::now());

        player.set_fit_mode(FitMode::Cover);
        let fit = player.fit_result().unwrap();
        assert!(fit.clip.is_some());
        assert!(player.manager().context(SURFACE).unwrap().clip_enabled());

        player.set_premultiplied_alpha(true);
        assert!(player.manager().context(SURFACE).unwrap().premultiplied_alpha());
    }

    #[test]
    fn test_unload_returns_to_empty_layout() {
        let mut player = mount(clip());
        let t0 = Instant::now();
        player.pump(t0);
        player.force_update().unwrap();
        assert!(player.frames_drawn() > 0);

        player.media_mut().unload();
        player.pump(t0);
        assert!(player.source_frame().is_none());
        player.redraw().unwrap();
        assert_eq!(player.manager().backing_size(SURFACE), Some((1, 1)));
        assert_eq!(player.snapshot().unwrap().as_raw(), &vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_unmount_releases_everything() {
        let mut player = mount(clip());
        player.pump(Instant::now());
        player.unmount();
        player.unmount();

        assert!(!player.manager().is_acquired(SURFACE));
        assert_eq!(player.manager().backend().live_resources(), 0);
        assert_eq!(container_hub().subscriber_count(CONTAINER), 0);
        assert!(player.next_deadline().is_none());
    }
}
