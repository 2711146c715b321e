use log::warn;
use windows::Graphics::Capture::GraphicsCaptureItem;
use windows::Win32::Foundation::{HWND, LPARAM, RECT};
use windows::Win32::System::Threading::GetCurrentProcessId;
use windows::Win32::System::WinRT::Graphics::Capture::IGraphicsCaptureItemInterop;
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, FindWindowW, GWL_EXSTYLE, GWL_STYLE, GetClientRect, GetWindowLongPtrW, GetWindowTextLengthW,
    GetWindowTextW, GetWindowThreadProcessId, IsWindowVisible, WS_CHILD, WS_EX_TOOLWINDOW,
};
use windows::core::{BOOL, HSTRING, PCWSTR};

use crate::target::{self, Target};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Windows API error: {0}")]
    WindowsError(#[from] windows::core::Error),
}

/// A top-level window that can be captured.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub struct Window {
    window: HWND,
}

unsafe impl Send for Window {}

impl Window {
    /// Finds a window whose title equals `title` exactly, including case.
    #[must_use]
    pub fn from_exact_title(title: &str) -> Option<Self> {
        let window = unsafe { FindWindowW(PCWSTR::null(), &HSTRING::from(title)) }.ok()?;
        if window.is_invalid() {
            return None;
        }

        // FindWindowW ignores case.
        let window = Self { window };
        target::is_exact_title(&window.title(), title).then_some(window)
    }

    /// Gets the window title, empty when the window has none.
    #[must_use]
    pub fn title(&self) -> String {
        let len = unsafe { GetWindowTextLengthW(self.window) };
        if len <= 0 {
            return String::new();
        }

        let mut name = vec![0u16; len as usize + 1];
        let copied = unsafe { GetWindowTextW(self.window, &mut name) };

        String::from_utf16_lossy(&name[..copied.max(0) as usize])
    }

    /// Checks that the window is a visible top-level window of another
    /// process.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let window = self.window;

        if !unsafe { IsWindowVisible(window).as_bool() } {
            return false;
        }

        let mut id = 0;
        unsafe { GetWindowThreadProcessId(window, Some(&mut id)) };
        if id == unsafe { GetCurrentProcessId() } {
            return false;
        }

        let mut rect = RECT::default();
        if unsafe { GetClientRect(window, &mut rect) }.is_ok() {
            let styles = unsafe { GetWindowLongPtrW(window, GWL_STYLE) };
            let ex_styles = unsafe { GetWindowLongPtrW(window, GWL_EXSTYLE) };

            if (ex_styles & WS_EX_TOOLWINDOW.0 as isize) != 0 {
                return false;
            }
            if (styles & WS_CHILD.0 as isize) != 0 {
                return false;
            }
        } else {
            warn!("GetClientRect Failed");
        }

        true
    }

    /// Lists every valid top-level window.
    pub fn enumerate() -> Result<Vec<Self>, Error> {
        let mut windows: Vec<Self> = Vec::new();

        unsafe { EnumWindows(Some(Self::enum_windows_callback), LPARAM(&raw mut windows as isize))? };

        Ok(windows)
    }

    /// Gets the raw HWND.
    #[must_use]
    #[inline]
    pub const fn as_raw_hwnd(&self) -> HWND {
        self.window
    }

    unsafe extern "system" fn enum_windows_callback(window: HWND, vec: LPARAM) -> BOOL {
        let windows = unsafe { &mut *(vec.0 as *mut Vec<Self>) };

        let window = Self { window };
        if window.is_valid() {
            windows.push(window);
        }

        true.into()
    }
}

/// Resolves an optional title hint with an exact lookup, then a substring
/// search over the valid top-level windows, then the desktop.
pub fn resolve_target(hint: Option<&str>) -> Target<Window> {
    target::resolve(hint, Window::from_exact_title, || match Window::enumerate() {
        Ok(windows) => windows.into_iter().map(|window| (window, window.title())).collect(),
        Err(e) => {
            warn!("Failed To Enumerate Windows: {e}");
            Vec::new()
        }
    })
}

impl TryFrom<Window> for GraphicsCaptureItem {
    type Error = Error;

    #[inline]
    fn try_from(value: Window) -> Result<Self, Self::Error> {
        let interop = windows::core::factory::<Self, IGraphicsCaptureItemInterop>()?;
        Ok(unsafe { interop.CreateForWindow(value.as_raw_hwnd())? })
    }
}
