//! Fixed cadence main loop.
//!
//! Every tick polls the capture source, advances the zoom filter, renders and
//! presents, then handles toggle and exit requests and sleeps for whatever is
//! left of the tick. The loop is generic over its collaborators so the tick
//! semantics do not depend on a GPU.
use std::fmt::Display;
use std::ops::Deref;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::error::{Classify, ErrorKind};
use crate::signals::ControlSignals;
use crate::zoom::ZoomController;

/// Result of polling a capture source once.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub enum Poll {
    /// A new frame replaced the current one.
    NewFrame,
    /// Nothing new within the timeout, the current frame stays.
    Timeout,
    /// The capture was invalidated; the source rebuilds itself later and the
    /// current frame stays.
    AccessLost,
}

/// Produces GPU-resident frames and exposes the newest one.
pub trait FrameSource {
    /// The frame representation the renderer samples.
    type Frame: ?Sized;
    /// Borrow of the current frame; may hold a slot lock.
    type Current<'a>: Deref<Target = Self::Frame>
    where
        Self: 'a;
    type Error: Classify + Display;

    /// Acquires (pull model) or checks for (push model) a new frame. Never
    /// blocks longer than the configured capture timeout.
    fn poll(&mut self) -> Result<Poll, Self::Error>;

    /// Gets the newest complete frame, if any frame was ever captured.
    fn current(&self) -> Option<Self::Current<'_>>;
}

/// Whether a present reached the screen.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub enum PresentStatus {
    Presented,
    /// The compositor was not ready and the present was skipped.
    Dropped,
}

/// Draws a frame through the magnification transform and presents it.
pub trait Renderer<F: ?Sized> {
    type Error: Classify + Display;

    /// Renders `frame` (transparent when `None`) at `magnification` and
    /// presents without waiting for vertical sync.
    fn render(&mut self, frame: Option<&F>, magnification: f32) -> Result<PresentStatus, Self::Error>;
}

/// The overlay window as the loop sees it.
pub trait Overlay {
    fn set_visible(&mut self, visible: bool);

    fn is_visible(&self) -> bool;

    /// Processes pending window messages. Returns `false` once the window
    /// was closed.
    fn pump_messages(&mut self) -> bool;
}

/// The "magnify held" input, sampled once per tick.
pub trait Trigger {
    fn is_held(&self) -> bool;
}

impl<F: Fn() -> bool> Trigger for F {
    fn is_held(&self) -> bool {
        self()
    }
}

/// Lifecycle of the loop.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub enum LoopState {
    Running,
    /// Exit was requested; collaborators are being stopped.
    Draining,
    Terminated,
}

/// Per-tick counters. Every per-tick failure ends up here instead of
/// propagating.
#[derive(Eq, PartialEq, Clone, Copy, Debug, Default)]
pub struct TickStats {
    pub ticks: u64,
    pub frames_captured: u64,
    pub timeouts: u64,
    pub access_lost: u64,
    pub capture_errors: u64,
    pub presented: u64,
    pub present_dropped: u64,
    pub render_errors: u64,
    pub toggles: u64,
}

/// Lets one warning per category through every interval and counts the rest.
#[derive(Debug)]
struct Throttle {
    interval: Duration,
    last: Option<Instant>,
    suppressed: u64,
}

impl Throttle {
    const fn new(interval: Duration) -> Self {
        Self { interval, last: None, suppressed: 0 }
    }

    /// Returns the number of suppressed repeats when the caller may log now.
    fn ready(&mut self) -> Option<u64> {
        let now = Instant::now();
        if self.last.is_some_and(|last| now.duration_since(last) < self.interval) {
            self.suppressed += 1;
            return None;
        }

        self.last = Some(now);
        Some(std::mem::take(&mut self.suppressed))
    }
}

/// Drives capture polling, zoom, render and present at a fixed cadence.
pub struct FramePacer<S, R, O, T> {
    source: S,
    renderer: R,
    overlay: O,
    trigger: T,
    zoom: ZoomController,
    signals: Arc<ControlSignals>,
    tick_interval: Duration,
    state: LoopState,
    stats: TickStats,
    capture_warnings: Throttle,
    render_warnings: Throttle,
}

impl<S, R, O, T> FramePacer<S, R, O, T>
where
    S: FrameSource,
    R: Renderer<S::Frame>,
    O: Overlay,
    T: Trigger,
{
    /// Creates a new loop in the [`LoopState::Running`] state.
    pub fn new(
        source: S,
        renderer: R,
        overlay: O,
        trigger: T,
        zoom: ZoomController,
        signals: Arc<ControlSignals>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            source,
            renderer,
            overlay,
            trigger,
            zoom,
            signals,
            tick_interval,
            state: LoopState::Running,
            stats: TickStats::default(),
            capture_warnings: Throttle::new(Duration::from_secs(1)),
            render_warnings: Throttle::new(Duration::from_secs(1)),
        }
    }

    /// Runs one tick with `dt` elapsed since the previous one.
    pub fn tick(&mut self, dt: Duration) -> LoopState {
        if self.state != LoopState::Running {
            return self.state;
        }

        self.stats.ticks += 1;

        self.poll_capture();

        let magnification = self.zoom.update(self.trigger.is_held(), dt);

        self.render(magnification);

        let open = self.overlay.pump_messages();

        if self.signals.take_toggle() {
            let visible = !self.overlay.is_visible();
            self.overlay.set_visible(visible);
            self.stats.toggles += 1;
            debug!("Overlay {}", if visible { "Shown" } else { "Hidden" });
        }

        if self.signals.exit_requested() || !open {
            info!("Exit Requested -> Draining");
            self.state = LoopState::Draining;
        }

        self.state
    }

    /// Ticks until exit is requested, sleeping out the rest of every tick.
    pub fn run(&mut self) -> TickStats {
        info!("Entering Frame Loop At {:.1} Hz", 1.0 / self.tick_interval.as_secs_f64());

        let mut last = Instant::now();
        while self.state == LoopState::Running {
            let start = Instant::now();
            let dt = start.duration_since(last);
            last = start;

            self.tick(dt);

            if let Some(remaining) = self.tick_interval.checked_sub(start.elapsed())
                && !remaining.is_zero()
            {
                thread::sleep(remaining);
            }
        }

        self.stats
    }

    /// Stops the loop and hands back its collaborators for an ordered
    /// teardown: the source first, so no capture callback outlives the
    /// renderer, then the renderer, then the overlay window.
    pub fn shutdown(mut self) -> (S, R, O) {
        if self.state == LoopState::Running {
            self.state = LoopState::Draining;
        }

        trace!("Frame Loop Stats: {:?}", self.stats);
        self.state = LoopState::Terminated;

        (self.source, self.renderer, self.overlay)
    }

    fn poll_capture(&mut self) {
        match self.source.poll() {
            Ok(Poll::NewFrame) => self.stats.frames_captured += 1,
            Ok(Poll::Timeout) => self.stats.timeouts += 1,
            Ok(Poll::AccessLost) => {
                self.stats.access_lost += 1;
                if let Some(suppressed) = self.capture_warnings.ready() {
                    warn!("Capture Access Lost, Keeping Last Frame ({suppressed} Repeats Suppressed)");
                }
            }
            Err(e) => {
                self.stats.capture_errors += 1;
                if let Some(suppressed) = self.capture_warnings.ready() {
                    log_failure("Capture", e.kind(), &e, suppressed);
                }
            }
        }
    }

    fn render(&mut self, magnification: f32) {
        let frame = self.source.current();

        match self.renderer.render(frame.as_deref(), magnification) {
            Ok(PresentStatus::Presented) => self.stats.presented += 1,
            Ok(PresentStatus::Dropped) => self.stats.present_dropped += 1,
            Err(e) => {
                self.stats.render_errors += 1;
                if let Some(suppressed) = self.render_warnings.ready() {
                    log_failure("Render", e.kind(), &e, suppressed);
                }
            }
        }
    }

    #[must_use]
    #[inline]
    pub const fn state(&self) -> LoopState {
        self.state
    }

    #[must_use]
    #[inline]
    pub const fn stats(&self) -> TickStats {
        self.stats
    }

    /// Gets the magnification applied on the last tick.
    #[must_use]
    #[inline]
    pub const fn magnification(&self) -> f32 {
        self.zoom.current()
    }

    #[must_use]
    #[inline]
    pub const fn overlay(&self) -> &O {
        &self.overlay
    }

    #[must_use]
    #[inline]
    pub const fn renderer(&self) -> &R {
        &self.renderer
    }
}

fn log_failure(stage: &str, kind: ErrorKind, error: &dyn Display, suppressed: u64) {
    match kind {
        ErrorKind::ResourceInvalidated => debug!("{stage} Resources Invalidated: {error}"),
        ErrorKind::TransientCapture | ErrorKind::FatalInit => {
            warn!("{stage} Failed: {error} ({suppressed} Repeats Suppressed)");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::convert::Infallible;
    use std::fmt;
    use std::rc::Rc;

    use super::*;
    use crate::magnify;

    const TICK: Duration = Duration::from_micros(8333);
    const SIZE: usize = 8;

    /// A tiny square image standing in for a GPU texture.
    type Image = Vec<u32>;

    #[derive(Debug)]
    struct FakeError;

    impl fmt::Display for FakeError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("fake failure")
        }
    }

    impl Classify for FakeError {
        fn kind(&self) -> ErrorKind {
            ErrorKind::TransientCapture
        }
    }

    /// Plays back a script of poll results; a new frame is a solid image
    /// with a gradient so magnification changes the output.
    struct ScriptedSource {
        script: VecDeque<Result<Poll, FakeError>>,
        current: Option<Image>,
        captured: u32,
    }

    impl ScriptedSource {
        fn new(script: impl IntoIterator<Item = Result<Poll, FakeError>>) -> Self {
            Self { script: script.into_iter().collect(), current: None, captured: 0 }
        }
    }

    impl FrameSource for ScriptedSource {
        type Frame = Image;
        type Current<'a> = &'a Image;
        type Error = FakeError;

        fn poll(&mut self) -> Result<Poll, FakeError> {
            let next = self.script.pop_front().unwrap_or(Ok(Poll::Timeout));
            if let Ok(Poll::NewFrame) = next {
                self.captured += 1;
                let seed = self.captured * 1000;
                self.current = Some((0..(SIZE * SIZE) as u32).map(|i| seed + i).collect());
            }
            next
        }

        fn current(&self) -> Option<&Image> {
            self.current.as_ref()
        }
    }

    /// Nearest-neighbour CPU rendition of the magnification pixel shader.
    #[derive(Default)]
    struct CpuRenderer {
        presented: Vec<Image>,
        drop_next: bool,
    }

    impl Renderer<Image> for CpuRenderer {
        type Error = Infallible;

        fn render(&mut self, frame: Option<&Image>, magnification: f32) -> Result<PresentStatus, Infallible> {
            if std::mem::take(&mut self.drop_next) {
                return Ok(PresentStatus::Dropped);
            }

            let mut output = vec![0; SIZE * SIZE];
            if let Some(frame) = frame {
                for y in 0..SIZE {
                    for x in 0..SIZE {
                        let uv = [(x as f32 + 0.5) / SIZE as f32, (y as f32 + 0.5) / SIZE as f32];
                        if let Some([u, v]) = magnify::sample_uv(uv, magnification) {
                            let sx = ((u * SIZE as f32) as usize).min(SIZE - 1);
                            let sy = ((v * SIZE as f32) as usize).min(SIZE - 1);
                            output[y * SIZE + x] = frame[sy * SIZE + sx];
                        }
                    }
                }
            }

            self.presented.push(output);
            Ok(PresentStatus::Presented)
        }
    }

    #[derive(Default)]
    struct FakeOverlay {
        visible: bool,
        closed: bool,
        flips: u32,
    }

    impl Overlay for FakeOverlay {
        fn set_visible(&mut self, visible: bool) {
            self.visible = visible;
            self.flips += 1;
        }

        fn is_visible(&self) -> bool {
            self.visible
        }

        fn pump_messages(&mut self) -> bool {
            !self.closed
        }
    }

    type TestPacer<T> = FramePacer<ScriptedSource, CpuRenderer, FakeOverlay, T>;

    fn pacer<T: Trigger>(source: ScriptedSource, trigger: T) -> (TestPacer<T>, Arc<ControlSignals>) {
        let signals = Arc::new(ControlSignals::new());
        let pacer = FramePacer::new(
            source,
            CpuRenderer::default(),
            FakeOverlay::default(),
            trigger,
            ZoomController::new(2.0, Duration::from_millis(100)),
            signals.clone(),
            TICK,
        );
        (pacer, signals)
    }

    #[test]
    fn timeout_repeats_previous_output_exactly() {
        let source = ScriptedSource::new([Ok(Poll::NewFrame), Ok(Poll::Timeout), Ok(Poll::Timeout)]);
        let (mut pacer, _signals) = pacer(source, || false);

        for _ in 0..3 {
            pacer.tick(TICK);
        }

        let presented = &pacer.renderer().presented;
        assert_eq!(presented.len(), 3);
        assert_eq!(presented[1], presented[0], "timeout tick must re-present the last frame");
        assert_eq!(presented[2], presented[1]);
        assert_eq!(pacer.stats().timeouts, 2);
    }

    #[test]
    fn access_lost_and_errors_keep_last_frame() {
        let source = ScriptedSource::new([Ok(Poll::NewFrame), Ok(Poll::AccessLost), Err(FakeError)]);
        let (mut pacer, _signals) = pacer(source, || false);

        for _ in 0..3 {
            assert_eq!(pacer.tick(TICK), LoopState::Running);
        }

        let presented = &pacer.renderer().presented;
        assert_eq!(presented[1], presented[0]);
        assert_eq!(presented[2], presented[0]);

        let stats = pacer.stats();
        assert_eq!((stats.access_lost, stats.capture_errors), (1, 1));
    }

    #[test]
    fn new_frames_replace_output() {
        let source = ScriptedSource::new([Ok(Poll::NewFrame), Ok(Poll::NewFrame)]);
        let (mut pacer, _signals) = pacer(source, || false);

        pacer.tick(TICK);
        pacer.tick(TICK);

        let presented = &pacer.renderer().presented;
        assert_ne!(presented[0], presented[1]);
        assert_eq!(pacer.stats().frames_captured, 2);
    }

    #[test]
    fn renders_transparent_before_first_frame() {
        let (mut pacer, _signals) = pacer(ScriptedSource::new([]), || false);
        pacer.tick(TICK);

        assert!(pacer.renderer().presented[0].iter().all(|pixel| *pixel == 0));
    }

    #[test]
    fn double_toggle_before_tick_flips_once() {
        let (mut pacer, signals) = pacer(ScriptedSource::new([]), || false);

        signals.request_toggle();
        signals.request_toggle();
        pacer.tick(TICK);
        assert!(pacer.overlay().is_visible());
        assert_eq!(pacer.overlay().flips, 1);

        pacer.tick(TICK);
        assert_eq!(pacer.overlay().flips, 1, "consumed toggle must not fire again");

        signals.request_toggle();
        pacer.tick(TICK);
        assert!(!pacer.overlay().is_visible());
        assert_eq!(pacer.stats().toggles, 2);
    }

    #[test]
    fn toggling_does_not_change_cadence() {
        let (mut pacer, signals) = pacer(ScriptedSource::new([]), || false);

        for i in 0..10 {
            if i % 3 == 0 {
                signals.request_toggle();
            }
            pacer.tick(TICK);
        }

        assert_eq!(pacer.stats().ticks, 10);
        assert_eq!(pacer.renderer().presented.len(), 10);
    }

    #[test]
    fn trigger_drives_zoom() {
        let held = Rc::new(Cell::new(true));
        let trigger = {
            let held = held.clone();
            move || held.get()
        };
        let (mut pacer, _signals) = pacer(ScriptedSource::new([Ok(Poll::NewFrame)]), trigger);

        let mut previous = pacer.magnification();
        for _ in 0..30 {
            pacer.tick(TICK);
            assert!(pacer.magnification() >= previous);
            previous = pacer.magnification();
        }
        assert!(previous > 1.9);

        held.set(false);
        pacer.tick(TICK);
        assert!(pacer.magnification() < previous);
    }

    #[test]
    fn exit_request_drains_and_stops_ticking() {
        let (mut pacer, signals) = pacer(ScriptedSource::new([]), || false);
        pacer.tick(TICK);

        signals.request_exit();
        assert_eq!(pacer.tick(TICK), LoopState::Draining);
        assert_eq!(pacer.tick(TICK), LoopState::Draining);
        assert_eq!(pacer.stats().ticks, 2, "no work after draining");

        let (_source, renderer, _overlay) = pacer.shutdown();
        assert_eq!(renderer.presented.len(), 2);
    }

    #[test]
    fn closed_window_drains() {
        let (mut pacer, _signals) = pacer(ScriptedSource::new([]), || false);
        pacer.overlay.closed = true;

        assert_eq!(pacer.tick(TICK), LoopState::Draining);
    }

    #[test]
    fn run_returns_once_exit_is_requested() {
        let (mut pacer, signals) = pacer(ScriptedSource::new([]), || false);
        signals.request_exit();

        let stats = pacer.run();
        assert_eq!(stats.ticks, 1);
        assert_eq!(pacer.state(), LoopState::Draining);
    }

    #[test]
    fn dropped_present_is_counted_not_fatal() {
        let (mut pacer, _signals) = pacer(ScriptedSource::new([]), || false);
        pacer.renderer.drop_next = true;

        assert_eq!(pacer.tick(TICK), LoopState::Running);
        pacer.tick(TICK);

        let stats = pacer.stats();
        assert_eq!((stats.present_dropped, stats.presented), (1, 1));
    }

    #[test]
    fn throttle_suppresses_bursts() {
        let mut throttle = Throttle::new(Duration::from_secs(60));
        assert_eq!(throttle.ready(), Some(0));
        assert_eq!(throttle.ready(), None);
        assert_eq!(throttle.ready(), None);
        assert_eq!(throttle.suppressed, 2);
    }
}
