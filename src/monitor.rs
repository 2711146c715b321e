use std::mem;

use windows::Graphics::Capture::GraphicsCaptureItem;
use windows::Win32::Foundation::{E_ACCESSDENIED, HWND, POINT, RECT};
use windows::Win32::Graphics::Gdi::{
    GetMonitorInfoW, HMONITOR, MONITOR_DEFAULTTONEAREST, MONITOR_DEFAULTTONULL, MONITORINFO,
    MonitorFromPoint, MonitorFromWindow,
};
use windows::Win32::System::WinRT::Graphics::Capture::IGraphicsCaptureItemInterop;
use windows::Win32::UI::HiDpi::{DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2, SetProcessDpiAwarenessContext};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Failed to find monitor")]
    NotFound,
    #[error("Failed to get monitor info")]
    FailedToGetMonitorInfo,
    #[error("Windows API error: {0}")]
    WindowsError(#[from] windows::core::Error),
}

/// Makes the process per-monitor DPI aware so monitor and window
/// rectangles are reported in physical pixels.
pub fn set_dpi_awareness() -> Result<(), Error> {
    match unsafe { SetProcessDpiAwarenessContext(DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2) } {
        Ok(()) => Ok(()),
        // Already set by an earlier call or the application manifest.
        Err(e) if e.code() == E_ACCESSDENIED => Ok(()),
        Err(e) => Err(Error::WindowsError(e)),
    }
}

/// Represents a monitor device.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub struct Monitor {
    monitor: HMONITOR,
}

unsafe impl Send for Monitor {}

impl Monitor {
    /// Returns the primary monitor.
    ///
    /// # Errors
    ///
    /// Returns an `Error::NotFound` if there is no primary monitor.
    #[inline]
    pub fn primary() -> Result<Self, Error> {
        let point = POINT { x: 0, y: 0 };
        let monitor = unsafe { MonitorFromPoint(point, MONITOR_DEFAULTTONULL) };

        if monitor.is_invalid() {
            return Err(Error::NotFound);
        }

        Ok(Self { monitor })
    }

    /// Returns the monitor showing the largest part of `window`.
    #[inline]
    pub fn from_window(window: HWND) -> Result<Self, Error> {
        let monitor = unsafe { MonitorFromWindow(window, MONITOR_DEFAULTTONEAREST) };

        if monitor.is_invalid() {
            return Err(Error::NotFound);
        }

        Ok(Self { monitor })
    }

    fn info(&self) -> Result<MONITORINFO, Error> {
        let mut info = MONITORINFO { cbSize: mem::size_of::<MONITORINFO>() as u32, ..Default::default() };

        if !unsafe { GetMonitorInfoW(self.monitor, &mut info) }.as_bool() {
            return Err(Error::FailedToGetMonitorInfo);
        }

        Ok(info)
    }

    /// Returns the monitor rectangle in virtual screen coordinates.
    #[inline]
    pub fn rect(&self) -> Result<RECT, Error> {
        Ok(self.info()?.rcMonitor)
    }

    /// Returns the raw HMONITOR of the monitor.
    #[must_use]
    #[inline]
    pub const fn as_raw_hmonitor(&self) -> *mut std::ffi::c_void {
        self.monitor.0
    }
}

// Implements TryFrom For Monitor To Convert It To GraphicsCaptureItem
impl TryFrom<Monitor> for GraphicsCaptureItem {
    type Error = Error;

    #[inline]
    fn try_from(value: Monitor) -> Result<Self, Self::Error> {
        let monitor = HMONITOR(value.as_raw_hmonitor());

        let interop = windows::core::factory::<Self, IGraphicsCaptureItemInterop>()?;
        Ok(unsafe { interop.CreateForMonitor(monitor)? })
    }
}
