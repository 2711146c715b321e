//! Process-wide setup and teardown around the frame loop.
use std::sync::Arc;
use std::thread;

use log::{error, info, trace, warn};
use windows::Win32::Media::{timeBeginPeriod, timeEndPeriod};

use crate::capture::{self, CaptureSource};
use crate::config::Settings;
use crate::d3d11::{self, GpuDevice};
use crate::error::{Classify, ErrorKind};
use crate::hotkeys::{self, HotkeyThread};
use crate::monitor;
use crate::overlay::{self, OverlayWindow};
use crate::pacer::{FramePacer, Overlay, TickStats};
use crate::render::{self, RenderPipeline};
use crate::signals::ControlSignals;
use crate::winrt::WinRt;
use crate::zoom::ZoomController;

/// Used to handle startup errors. Every variant aborts startup.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Failed to initialize WinRT: {0}")]
    WinRtError(windows::core::Error),
    #[error("DirectX error: {0}")]
    DirectXError(#[from] d3d11::Error),
    #[error("Capture error: {0}")]
    CaptureError(#[from] capture::Error),
    #[error("Render error: {0}")]
    RenderError(#[from] render::Error),
    #[error("Overlay error: {0}")]
    OverlayError(#[from] overlay::Error),
    #[error("Hotkey error: {0}")]
    HotkeyError(#[from] hotkeys::Error),
    #[error("Monitor error: {0}")]
    MonitorError(#[from] monitor::Error),
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        ErrorKind::FatalInit
    }
}

/// Raises the system timer resolution to 1 ms while alive.
struct TimerResolution {
    raised: bool,
}

impl TimerResolution {
    const PERIOD_MS: u32 = 1;

    fn raise() -> Self {
        // TIMERR_NOERROR
        let raised = unsafe { timeBeginPeriod(Self::PERIOD_MS) } == 0;
        if !raised {
            warn!("Failed To Raise Timer Resolution, Tick Pacing May Be Coarse");
        }

        Self { raised }
    }
}

impl Drop for TimerResolution {
    fn drop(&mut self) {
        if self.raised {
            unsafe { timeEndPeriod(Self::PERIOD_MS) };
        }
    }
}

/// Process-wide state owned by the main loop thread: the WinRT apartment,
/// the timer resolution and the shared GPU device.
pub struct PipelineContext {
    device: GpuDevice,
    _timer: TimerResolution,
    _winrt: WinRt,
}

impl PipelineContext {
    pub fn new() -> Result<Self, Error> {
        monitor::set_dpi_awareness()?;

        trace!("Initializing WinRT");
        let winrt = WinRt::init().map_err(Error::WinRtError)?;
        let timer = TimerResolution::raise();

        trace!("Creating Direct3D Device");
        let device = GpuDevice::create()?;

        Ok(Self { device, _timer: timer, _winrt: winrt })
    }

    #[must_use]
    #[inline]
    pub const fn device(&self) -> &GpuDevice {
        &self.device
    }
}

/// Runs the magnifier until `signals` requests exit or the overlay closes.
///
/// Setup failures are returned. Once the loop runs, failures are absorbed and
/// counted in the returned [`TickStats`].
pub fn run(settings: &Settings, signals: Arc<ControlSignals>) -> Result<TickStats, Error> {
    let result = run_pipeline(settings, signals);

    if let Err(e) = &result {
        error!("Startup Failed: {e}");
    }

    result
}

fn run_pipeline(settings: &Settings, signals: Arc<ControlSignals>) -> Result<TickStats, Error> {
    if !settings.startup_delay.is_zero() {
        info!("Starting In {:?}", settings.startup_delay);
        thread::sleep(settings.startup_delay);
    }

    let context = PipelineContext::new()?;

    let mut overlay = OverlayWindow::create(settings.exclude_from_capture)?;
    let (width, height) = overlay.client_size()?;
    trace!("Building Render Pipeline For A {width}x{height} Overlay");
    let renderer = RenderPipeline::new(context.device().clone(), overlay.as_raw_hwnd())?;
    let source = CaptureSource::open(context.device(), settings)?;
    let hotkeys = HotkeyThread::spawn(signals.clone())?;

    if settings.start_visible {
        overlay.set_visible(true);
    }

    let zoom = ZoomController::new(settings.zoom_factor, settings.smoothing_window);
    let mut pacer =
        FramePacer::new(source, renderer, overlay, hotkeys::magnify_held, zoom, signals, settings.tick_interval);

    let stats = pacer.run();
    info!("Frame Loop Stopped: {stats:?}");

    // Draining: input and capture stop before any GPU object is released.
    if let Err(e) = hotkeys.stop() {
        warn!("Failed To Stop Hotkey Thread: {e}");
    }

    let (mut source, renderer, overlay) = pacer.shutdown();
    source.stop();
    drop(source);

    // Terminated: GPU teardown, then the window it presented to.
    drop(renderer);
    drop(overlay);
    drop(context);

    info!("Shutdown Complete");

    Ok(stats)
}
