//! Smoothed magnification driven by a held/released trigger.
use std::time::Duration;

/// Magnification with no zoom applied.
pub const IDENTITY: f32 = 1.0;

/// First order low pass filter from the trigger state to a magnification.
///
/// Each tick moves `current` toward `target` by `dt / window` of the
/// remaining distance, clamped to a full step, so it converges without
/// overshoot and never jumps except at construction.
#[derive(PartialEq, Clone, Copy, Debug)]
pub struct ZoomController {
    current: f32,
    target: f32,
    zoom_factor: f32,
    window: Duration,
}

impl ZoomController {
    /// Creates a controller resting at [`IDENTITY`].
    #[must_use]
    pub const fn new(zoom_factor: f32, window: Duration) -> Self {
        Self { current: IDENTITY, target: IDENTITY, zoom_factor, window }
    }

    /// Advances the filter by `dt` with the trigger sampled this tick and
    /// returns the new magnification.
    pub fn update(&mut self, held: bool, dt: Duration) -> f32 {
        self.target = if held { self.zoom_factor } else { IDENTITY };

        let step = if self.window.is_zero() {
            1.0
        } else {
            (dt.as_secs_f32() / self.window.as_secs_f32()).min(1.0)
        };

        self.current += (self.target - self.current) * step;

        self.current
    }

    /// Gets the magnification of the last tick.
    #[must_use]
    #[inline]
    pub const fn current(&self) -> f32 {
        self.current
    }

    #[must_use]
    #[inline]
    pub fn is_settled(&self) -> bool {
        self.current == self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_micros(8333);
    const WINDOW: Duration = Duration::from_millis(100);

    #[test]
    fn starts_at_identity() {
        let zoom = ZoomController::new(2.0, WINDOW);
        assert_eq!(zoom.current(), IDENTITY);
        assert!(zoom.is_settled());
    }

    #[test]
    fn settled_state_is_a_fixed_point() {
        let mut zoom = ZoomController::new(2.0, WINDOW);
        for _ in 0..100 {
            assert_eq!(zoom.update(false, TICK), IDENTITY);
        }

        // A full-window tick lands exactly on the target.
        zoom.update(true, WINDOW);
        assert_eq!(zoom.current(), 2.0);
        for _ in 0..100 {
            assert_eq!(zoom.update(true, TICK), 2.0);
        }
    }

    #[test]
    fn converges_monotonically_without_overshoot() {
        let mut zoom = ZoomController::new(2.0, WINDOW);
        let mut previous = zoom.current();

        for _ in 0..1000 {
            let current = zoom.update(true, TICK);
            assert!(current >= previous, "zoom went backwards: {previous} -> {current}");
            assert!(current <= 2.0, "zoom overshot: {current}");
            previous = current;
        }

        assert!((2.0 - previous).abs() < 1e-4, "zoom did not converge: {previous}");
    }

    #[test]
    fn release_returns_to_identity_without_undershoot() {
        let mut zoom = ZoomController::new(1.4, WINDOW);
        zoom.update(true, WINDOW);

        let mut previous = zoom.current();
        for _ in 0..1000 {
            let current = zoom.update(false, TICK);
            assert!(current <= previous);
            assert!(current >= IDENTITY);
            previous = current;
        }
    }

    #[test]
    fn long_ticks_are_clamped_to_one_step() {
        let mut zoom = ZoomController::new(3.0, WINDOW);
        assert_eq!(zoom.update(true, Duration::from_secs(5)), 3.0);
    }

    #[test]
    fn step_is_proportional_to_elapsed_time() {
        let mut zoom = ZoomController::new(2.0, WINDOW);
        let value = zoom.update(true, Duration::from_millis(50));
        assert!((value - 1.5).abs() < 1e-6, "half a window covers half the distance: {value}");
    }
}
