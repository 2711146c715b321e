//! The borderless, click-through, always-on-top window the magnified image
//! is presented on.
use log::{debug, info, warn};
use windows::Win32::Foundation::{COLORREF, HWND, LPARAM, LRESULT, RECT, WPARAM};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::WindowsAndMessaging::{
    CS_HREDRAW, CS_VREDRAW, CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GetClientRect, IsWindow,
    LWA_ALPHA, MSG, PM_REMOVE, PeekMessageW, PostQuitMessage, RegisterClassW, SW_HIDE, SW_SHOWNOACTIVATE,
    SetLayeredWindowAttributes, SetWindowDisplayAffinity, ShowWindow, TranslateMessage, WDA_EXCLUDEFROMCAPTURE,
    WM_DESTROY, WM_QUIT, WNDCLASSW, WS_EX_LAYERED, WS_EX_NOACTIVATE, WS_EX_TOOLWINDOW, WS_EX_TOPMOST,
    WS_EX_TRANSPARENT, WS_POPUP,
};
use windows::core::w;

use crate::monitor::{self, Monitor};
use crate::pacer::Overlay;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Monitor error: {0}")]
    MonitorError(#[from] monitor::Error),
    #[error("Windows API error: {0}")]
    WindowsError(#[from] windows::core::Error),
}

/// The overlay window covering the primary monitor.
///
/// Input passes through it to whatever is underneath, and it never takes
/// focus. It must be used from the thread that created it.
pub struct OverlayWindow {
    window: HWND,
    visible: bool,
    closed: bool,
}

impl OverlayWindow {
    /// Creates the overlay hidden. With `exclude_from_capture` the window is
    /// left out of every capture, so the magnifier never sees its own output.
    pub fn create(exclude_from_capture: bool) -> Result<Self, Error> {
        let monitor = Monitor::primary()?;
        let rect = monitor.rect()?;

        let class_name = w!("ZoominOverlay");
        let instance = unsafe { GetModuleHandleW(None)? };

        let class = WNDCLASSW {
            style: CS_HREDRAW | CS_VREDRAW,
            lpfnWndProc: Some(window_proc),
            hInstance: instance.into(),
            lpszClassName: class_name,
            ..Default::default()
        };
        // Fails harmlessly when the class is already registered.
        unsafe { RegisterClassW(&class) };

        let window = unsafe {
            CreateWindowExW(
                WS_EX_LAYERED | WS_EX_TRANSPARENT | WS_EX_TOPMOST | WS_EX_TOOLWINDOW | WS_EX_NOACTIVATE,
                class_name,
                w!("Zoomin"),
                WS_POPUP,
                rect.left,
                rect.top,
                rect.right - rect.left,
                rect.bottom - rect.top,
                None,
                None,
                Some(instance.into()),
                None,
            )?
        };

        unsafe { SetLayeredWindowAttributes(window, COLORREF(0), 255, LWA_ALPHA)? };

        if exclude_from_capture {
            match unsafe { SetWindowDisplayAffinity(window, WDA_EXCLUDEFROMCAPTURE) } {
                Ok(()) => debug!("Overlay Excluded From Capture"),
                Err(e) => warn!("Failed To Exclude Overlay From Capture, It May Magnify Itself: {e}"),
            }
        }

        info!("Overlay Created At {}x{}", rect.right - rect.left, rect.bottom - rect.top);

        Ok(Self { window, visible: false, closed: false })
    }

    /// Gets the client area size in pixels.
    pub fn client_size(&self) -> Result<(u32, u32), Error> {
        let mut rect = RECT::default();
        unsafe { GetClientRect(self.window, &mut rect)? };

        Ok(((rect.right - rect.left).max(0) as u32, (rect.bottom - rect.top).max(0) as u32))
    }

    #[must_use]
    #[inline]
    pub const fn as_raw_hwnd(&self) -> HWND {
        self.window
    }
}

impl Overlay for OverlayWindow {
    fn set_visible(&mut self, visible: bool) {
        if self.closed || self.visible == visible {
            return;
        }

        let command = if visible { SW_SHOWNOACTIVATE } else { SW_HIDE };
        let _ = unsafe { ShowWindow(self.window, command) };
        self.visible = visible;
    }

    #[inline]
    fn is_visible(&self) -> bool {
        self.visible
    }

    fn pump_messages(&mut self) -> bool {
        let mut message = MSG::default();

        unsafe {
            while PeekMessageW(&mut message, None, 0, 0, PM_REMOVE).as_bool() {
                if message.message == WM_QUIT {
                    self.closed = true;
                    break;
                }

                let _ = TranslateMessage(&message);
                DispatchMessageW(&message);
            }
        }

        if !self.closed && !unsafe { IsWindow(Some(self.window)) }.as_bool() {
            self.closed = true;
        }

        !self.closed
    }
}

impl Drop for OverlayWindow {
    fn drop(&mut self) {
        if unsafe { IsWindow(Some(self.window)) }.as_bool()
            && let Err(e) = unsafe { DestroyWindow(self.window) }
        {
            warn!("Failed To Destroy Overlay Window: {e}");
        }
    }
}

unsafe extern "system" fn window_proc(window: HWND, message: u32, w_param: WPARAM, l_param: LPARAM) -> LRESULT {
    match message {
        WM_DESTROY => {
            unsafe { PostQuitMessage(0) };
            LRESULT(0)
        }
        _ => unsafe { DefWindowProcW(window, message, w_param, l_param) },
    }
}
