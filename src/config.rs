//! Runtime settings and the command line that fills them.
//!
//! Nothing here is persisted; every run starts from [`Settings::default`]
//! plus whatever flags were passed.
use std::time::Duration;

use clap::{Parser, ValueEnum};
use log::LevelFilter;

/// Used To Handle Settings Errors
#[derive(thiserror::Error, PartialEq, Clone, Debug)]
pub enum Error {
    /// Magnification below 1.0 would shrink the desktop instead of zooming in.
    #[error("Zoom factor must be a finite value of at least 1.0, got {0}")]
    InvalidZoomFactor(f32),
    #[error("Smoothing window must be longer than zero")]
    ZeroSmoothingWindow,
    #[error("Tick rate must be a finite value above zero, got {0}")]
    InvalidTickRate(f64),
}

/// Which capture variant backs the frame source.
#[derive(Eq, PartialEq, Clone, Copy, Debug, Default, ValueEnum)]
pub enum CaptureBackend {
    /// Session capture for a resolved window, output duplication for the desktop.
    #[default]
    Auto,
    /// DXGI output duplication (pull model). Always captures a whole display.
    Duplication,
    /// Graphics Capture session (push model).
    Session,
}

impl CaptureBackend {
    /// Picks the concrete variant for a target.
    ///
    /// `Auto` uses session capture for a window and output duplication for
    /// the desktop. Session capture copies frames on its own thread through
    /// the shared immediate context, so without multithread protection on
    /// the device every request falls back to output duplication.
    #[must_use]
    pub const fn resolve(self, window_target: bool, multithread_protected: bool) -> Self {
        match self {
            _ if !multithread_protected => Self::Duplication,
            Self::Auto if window_target => Self::Session,
            Self::Auto => Self::Duplication,
            backend => backend,
        }
    }
}

/// Every tunable of the magnifier.
#[derive(PartialEq, Clone, Debug)]
pub struct Settings {
    /// Magnification reached while the trigger is held.
    pub zoom_factor: f32,
    /// Time constant of the zoom low pass filter.
    pub smoothing_window: Duration,
    /// Fixed duration of one pacing tick.
    pub tick_interval: Duration,
    /// Upper bound for a single frame acquisition.
    pub capture_timeout: Duration,
    /// Wait before the capture is initialized.
    pub startup_delay: Duration,
    /// Window title hint, `None` captures the whole display.
    pub target_window: Option<String>,
    pub backend: CaptureBackend,
    /// Show the overlay immediately instead of waiting for the first toggle.
    pub start_visible: bool,
    /// Hide the overlay from every capture API so it never magnifies itself.
    pub exclude_from_capture: bool,
}

impl Settings {
    /// Default magnification while the trigger is held.
    pub const DEFAULT_ZOOM_FACTOR: f32 = 1.4;
    pub const DEFAULT_SMOOTHING_WINDOW: Duration = Duration::from_millis(100);
    /// ~120 Hz.
    pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_micros(8333);
    pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_millis(4);

    /// Checks that every value keeps the pipeline well defined.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.zoom_factor.is_finite() || self.zoom_factor < 1.0 {
            return Err(Error::InvalidZoomFactor(self.zoom_factor));
        }

        if self.smoothing_window.is_zero() {
            return Err(Error::ZeroSmoothingWindow);
        }

        if self.tick_interval.is_zero() {
            return Err(Error::InvalidTickRate(0.0));
        }

        Ok(())
    }

    /// Gets the capture timeout in whole milliseconds as the capture APIs expect it.
    #[must_use]
    #[inline]
    pub fn capture_timeout_ms(&self) -> u32 {
        u32::try_from(self.capture_timeout.as_millis()).unwrap_or(u32::MAX)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            zoom_factor: Self::DEFAULT_ZOOM_FACTOR,
            smoothing_window: Self::DEFAULT_SMOOTHING_WINDOW,
            tick_interval: Self::DEFAULT_TICK_INTERVAL,
            capture_timeout: Self::DEFAULT_CAPTURE_TIMEOUT,
            startup_delay: Duration::ZERO,
            target_window: None,
            backend: CaptureBackend::Auto,
            start_visible: false,
            exclude_from_capture: true,
        }
    }
}

/// Hold the right mouse button to zoom. Numpad 8 shows or hides the overlay,
/// Shift+Esc exits.
#[derive(Parser, Debug)]
#[command(name = "zoomin", version, about)]
pub struct Cli {
    /// Title of the window to magnify (exact match first, then substring)
    #[arg(long)]
    pub window: Option<String>,

    /// Capture backend
    #[arg(long, value_enum, default_value_t = CaptureBackend::Auto)]
    pub backend: CaptureBackend,

    /// Magnification while the right mouse button is held
    #[arg(long, default_value_t = Settings::DEFAULT_ZOOM_FACTOR)]
    pub zoom: f32,

    /// Time for the zoom to settle, in milliseconds
    #[arg(long, default_value_t = 100)]
    pub smoothing_ms: u64,

    /// Target presentation rate in frames per second
    #[arg(long, default_value_t = 120.0)]
    pub fps: f64,

    /// Maximum time to wait for a captured frame, in milliseconds
    #[arg(long, default_value_t = 4)]
    pub capture_timeout_ms: u64,

    /// Seconds to wait before starting the capture
    #[arg(long, default_value_t = 0)]
    pub startup_delay: u64,

    /// Show the overlay right away
    #[arg(long)]
    pub visible: bool,

    /// Let other capture tools see the overlay
    #[arg(long)]
    pub allow_capture: bool,

    /// Log verbosity (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    pub log_level: LevelFilter,
}

impl Cli {
    /// Converts the parsed flags into validated [`Settings`].
    pub fn into_settings(self) -> Result<Settings, Error> {
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(Error::InvalidTickRate(self.fps));
        }
        let tick_interval =
            Duration::try_from_secs_f64(1.0 / self.fps).map_err(|_| Error::InvalidTickRate(self.fps))?;

        let settings = Settings {
            zoom_factor: self.zoom,
            smoothing_window: Duration::from_millis(self.smoothing_ms),
            tick_interval,
            capture_timeout: Duration::from_millis(self.capture_timeout_ms),
            startup_delay: Duration::from_secs(self.startup_delay),
            target_window: self.window.filter(|title| !title.trim().is_empty()),
            backend: self.backend,
            start_visible: self.visible,
            exclude_from_capture: !self.allow_capture,
        };
        settings.validate()?;

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert_eq!(settings.validate(), Ok(()));
        assert_eq!(settings.capture_timeout_ms(), 4);
        assert!(!settings.start_visible, "overlay starts hidden");
    }

    #[test]
    fn rejects_zoom_below_identity() {
        let settings = Settings { zoom_factor: 0.5, ..Settings::default() };
        assert_eq!(settings.validate(), Err(Error::InvalidZoomFactor(0.5)));

        let settings = Settings { zoom_factor: f32::NAN, ..Settings::default() };
        assert!(settings.validate().is_err(), "NaN zoom must be rejected");
    }

    #[test]
    fn rejects_zero_smoothing_window() {
        let settings = Settings { smoothing_window: Duration::ZERO, ..Settings::default() };
        assert_eq!(settings.validate(), Err(Error::ZeroSmoothingWindow));
    }

    #[test]
    fn cli_defaults_match_settings_defaults() {
        let cli = Cli::try_parse_from(["zoomin"]).unwrap();
        let settings = cli.into_settings().unwrap();

        assert_eq!(settings.zoom_factor, Settings::DEFAULT_ZOOM_FACTOR);
        assert_eq!(settings.smoothing_window, Settings::DEFAULT_SMOOTHING_WINDOW);
        assert_eq!(settings.capture_timeout, Settings::DEFAULT_CAPTURE_TIMEOUT);
        assert_eq!(settings.backend, CaptureBackend::Auto);
        assert!(settings.exclude_from_capture);
        // 1 / 120 s rounds to the same microsecond as the hard-coded default.
        assert_eq!(settings.tick_interval.as_micros(), Settings::DEFAULT_TICK_INTERVAL.as_micros());
    }

    #[test]
    fn cli_maps_flags() {
        let cli = Cli::try_parse_from([
            "zoomin",
            "--window",
            "Notepad",
            "--backend",
            "session",
            "--zoom",
            "2.5",
            "--fps",
            "60",
            "--visible",
            "--allow-capture",
        ])
        .unwrap();
        let settings = cli.into_settings().unwrap();

        assert_eq!(settings.target_window.as_deref(), Some("Notepad"));
        assert_eq!(settings.backend, CaptureBackend::Session);
        assert_eq!(settings.zoom_factor, 2.5);
        assert_eq!(settings.tick_interval.as_micros(), 16_666);
        assert!(settings.start_visible);
        assert!(!settings.exclude_from_capture);
    }

    #[test]
    fn blank_window_hint_means_desktop() {
        let cli = Cli::try_parse_from(["zoomin", "--window", "   "]).unwrap();
        assert_eq!(cli.into_settings().unwrap().target_window, None);
    }

    #[test]
    fn cli_rejects_bad_rate() {
        let cli = Cli::try_parse_from(["zoomin", "--fps", "0"]).unwrap();
        assert_eq!(cli.into_settings(), Err(Error::InvalidTickRate(0.0)));
    }

    #[test]
    fn cli_rejects_rate_with_unrepresentable_interval() {
        let cli = Cli::try_parse_from(["zoomin", "--fps", "1e-30"]).unwrap();
        assert_eq!(cli.into_settings(), Err(Error::InvalidTickRate(1e-30)));
    }

    #[test]
    fn auto_backend_follows_target() {
        assert_eq!(CaptureBackend::Auto.resolve(true, true), CaptureBackend::Session);
        assert_eq!(CaptureBackend::Auto.resolve(false, true), CaptureBackend::Duplication);
        assert_eq!(CaptureBackend::Session.resolve(false, true), CaptureBackend::Session);
        assert_eq!(CaptureBackend::Duplication.resolve(true, true), CaptureBackend::Duplication);
    }

    #[test]
    fn unprotected_device_never_uses_session_capture() {
        for backend in [CaptureBackend::Auto, CaptureBackend::Session, CaptureBackend::Duplication] {
            for window_target in [true, false] {
                assert_eq!(backend.resolve(window_target, false), CaptureBackend::Duplication, "{backend:?}");
            }
        }
    }
}
