use std::time::{Duration, Instant};

/// Whether the render loop draws on every display refresh
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoopState {
    #[default]
    Idle,
    Running,
}

/// Net effect of a turn's play-state signals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Started,
    Stopped,
}

/// Render scheduler state machine
///
/// Play-state signals are coalesced: `on_playback_changed` only records the
/// latest value and marks the turn dirty; `flush_turn`, called once at the end
/// of each callback turn, applies the net effect. Any number of toggles within
/// one turn start or stop the loop at most once.
#[derive(Debug, Clone)]
pub struct RenderScheduler {
    state: LoopState,

    /// Playback has started at least once for the current source
    ever_played: bool,

    /// Latest play-state signal
    requested_playing: bool,

    /// A signal arrived since the last flush
    dirty: bool,

    /// A flush is pending for the current turn
    flush_scheduled: bool,

    /// Deadline of the pending pre-roll draw
    preroll_at: Option<Instant>,

    preroll_delay: Duration,

    /// Draws issued by the scheduler while idle
    idle_draws: u32,
}

impl RenderScheduler {
    pub fn new(preroll_delay: Duration) -> Self {
        Self {
            state: LoopState::Idle,
            ever_played: false,
            requested_playing: false,
            dirty: false,
            flush_scheduled: false,
            preroll_at: None,
            preroll_delay,
            idle_draws: 0,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == LoopState::Running
    }

    pub fn ever_played(&self) -> bool {
        self.ever_played
    }

    /// Record a play-state signal; acted upon at the end of the turn
    pub fn on_playback_changed(&mut self, playing: bool) {
        self.requested_playing = playing;
        self.dirty = true;
        if !self.flush_scheduled {
            self.flush_scheduled = true;
            log::trace!("Play-state flush scheduled");
        }
    }

    /// Apply the net play-state change of the turn
    pub fn flush_turn(&mut self) -> Option<Transition> {
        if !self.flush_scheduled {
            return None;
        }
        self.flush_scheduled = false;

        if !std::mem::take(&mut self.dirty) {
            return None;
        }

        match (self.state, self.requested_playing) {
            (LoopState::Idle, true) => {
                self.ever_played = true;
                if self.preroll_at.take().is_some() {
                    log::debug!("Playback started, pending pre-roll canceled");
                }
                self.state = LoopState::Running;
                log::debug!("Render loop started");
                Some(Transition::Started)
            }
            (LoopState::Running, false) => {
                self.state = LoopState::Idle;
                log::debug!("Render loop stopped");
                Some(Transition::Stopped)
            }
            _ => None,
        }
    }

    /// First decoded frame is available; schedule the one-shot pre-roll draw
    /// unless playback has already happened
    pub fn on_first_frame(&mut self, now: Instant) {
        if self.ever_played || self.is_running() {
            return;
        }
        self.preroll_at = Some(now + self.preroll_delay);
        log::debug!(
            "Pre-roll draw scheduled in {}ms",
            self.preroll_delay.as_millis()
        );
    }

    /// Take the pre-roll draw if its deadline has passed
    pub fn due_preroll(&mut self, now: Instant) -> bool {
        match self.preroll_at {
            Some(deadline) if deadline <= now => {
                self.preroll_at = None;
                true
            }
            _ => false,
        }
    }

    pub fn preroll_deadline(&self) -> Option<Instant> {
        self.preroll_at
    }

    pub fn cancel_preroll(&mut self) {
        self.preroll_at = None;
    }

    /// A new source is loaded (or the old one unloaded); it gets its own
    /// pre-roll
    pub fn on_source_changed(&mut self) {
        self.ever_played = false;
        self.preroll_at = None;
        self.idle_draws = 0;
    }

    /// Whether a display refresh should draw
    pub fn on_refresh(&self) -> bool {
        self.is_running()
    }

    /// Account for a draw issued by the scheduler
    pub fn record_draw(&mut self) {
        if self.state == LoopState::Idle {
            self.idle_draws += 1;
        }
    }

    /// Scheduler-issued draws while idle for the current source
    pub fn idle_draws(&self) -> u32 {
        self.idle_draws
    }

    /// Stop the continuous loop and forget pending signals
    pub fn stop(&mut self) {
        self.state = LoopState::Idle;
        self.dirty = false;
        self.flush_scheduled = false;
    }
}

/// Two-mode recompute trigger: `request` debounces, `recompute_now` applies
/// immediately and cancels whatever was pending
#[derive(Debug, Clone)]
pub struct RecomputeDebounce {
    delay: Duration,
    pending: Option<Instant>,
}

impl RecomputeDebounce {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    /// Schedule a recompute `delay` after the first request of a burst;
    /// requests arriving while one is pending fold into it
    pub fn request(&mut self, now: Instant) {
        if self.pending.is_none() {
            self.pending = Some(now + self.delay);
        }
    }

    /// Cancel the pending recompute; returns whether one was pending
    pub fn recompute_now(&mut self) -> bool {
        self.pending.take().is_some()
    }

    /// Take the pending recompute if its deadline has passed
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.pending {
            Some(deadline) if deadline <= now => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(100);

    #[test]
    fn test_toggles_within_one_turn_collapse() {
        let mut scheduler = RenderScheduler::new(DELAY);
        scheduler.on_playback_changed(true);
        scheduler.on_playback_changed(false);
        scheduler.on_playback_changed(true);

        assert_eq!(scheduler.flush_turn(), Some(Transition::Started));
        // Nothing left for the next turn
        assert_eq!(scheduler.flush_turn(), None);
        assert!(scheduler.is_running());
    }

    #[test]
    fn test_net_no_change_does_nothing() {
        let mut scheduler = RenderScheduler::new(DELAY);
        scheduler.on_playback_changed(true);
        scheduler.on_playback_changed(false);
        assert_eq!(scheduler.flush_turn(), None);
        assert_eq!(scheduler.state(), LoopState::Idle);
        assert!(!scheduler.ever_played());
    }

    #[test]
    fn test_pause_stops_loop() {
        let mut scheduler = RenderScheduler::new(DELAY);
        scheduler.on_playback_changed(true);
        scheduler.flush_turn();
        scheduler.on_playback_changed(false);
        assert_eq!(scheduler.flush_turn(), Some(Transition::Stopped));
        assert!(!scheduler.on_refresh());
        assert!(scheduler.ever_played());
    }

    #[test]
    fn test_preroll_fires_once_after_delay() {
        let mut scheduler = RenderScheduler::new(DELAY);
        let t0 = Instant::now();
        scheduler.on_first_frame(t0);

        assert!(!scheduler.due_preroll(t0 + Duration::from_millis(50)));
        assert!(scheduler.due_preroll(t0 + DELAY));
        assert!(!scheduler.due_preroll(t0 + DELAY * 2));
    }

    #[test]
    fn test_playback_cancels_pending_preroll() {
        let mut scheduler = RenderScheduler::new(DELAY);
        let t0 = Instant::now();
        scheduler.on_first_frame(t0);
        scheduler.on_playback_changed(true);
        scheduler.flush_turn();

        assert!(scheduler.preroll_deadline().is_none());
        assert!(!scheduler.due_preroll(t0 + DELAY));
    }

    #[test]
    fn test_no_preroll_after_playback() {
        let mut scheduler = RenderScheduler::new(DELAY);
        scheduler.on_playback_changed(true);
        scheduler.flush_turn();
        scheduler.on_playback_changed(false);
        scheduler.flush_turn();

        scheduler.on_first_frame(Instant::now());
        assert!(scheduler.preroll_deadline().is_none());
    }

    #[test]
    fn test_new_source_gets_its_own_preroll() {
        let mut scheduler = RenderScheduler::new(DELAY);
        scheduler.on_playback_changed(true);
        scheduler.flush_turn();
        scheduler.on_playback_changed(false);
        scheduler.flush_turn();

        scheduler.on_source_changed();
        let t0 = Instant::now();
        scheduler.on_first_frame(t0);
        assert_eq!(scheduler.preroll_deadline(), Some(t0 + DELAY));
    }

    #[test]
    fn test_idle_draw_accounting() {
        let mut scheduler = RenderScheduler::new(DELAY);
        scheduler.record_draw();
        assert_eq!(scheduler.idle_draws(), 1);

        scheduler.on_playback_changed(true);
        scheduler.flush_turn();
        scheduler.record_draw();
        scheduler.record_draw();
        assert_eq!(scheduler.idle_draws(), 1);
    }

    #[test]
    fn test_debounce_keeps_first_deadline() {
        let mut debounce = RecomputeDebounce::new(DELAY);
        let t0 = Instant::now();
        debounce.request(t0);
        debounce.request(t0 + Duration::from_millis(80));
        assert_eq!(debounce.deadline(), Some(t0 + DELAY));

        assert!(!debounce.take_due(t0 + Duration::from_millis(99)));
        assert!(debounce.take_due(t0 + DELAY));
        assert!(debounce.deadline().is_none());

        // The next burst starts a fresh window
        debounce.request(t0 + Duration::from_millis(120));
        assert_eq!(
            debounce.deadline(),
            Some(t0 + Duration::from_millis(220))
        );
    }

    #[test]
    fn test_recompute_now_cancels_pending() {
        let mut debounce = RecomputeDebounce::new(DELAY);
        let t0 = Instant::now();
        debounce.request(t0);

        assert!(debounce.recompute_now());
        assert!(!debounce.take_due(t0 + DELAY * 10));
        assert!(!debounce.recompute_now());
    }
}
