//! Global hotkeys through a low-level keyboard hook on a dedicated thread,
//! and the magnify trigger.
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};
use parking_lot::RwLock;
use windows::Win32::Foundation::{LPARAM, LRESULT, WPARAM};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::Input::KeyboardAndMouse::{
    GetAsyncKeyState, VIRTUAL_KEY, VK_ESCAPE, VK_NUMPAD8, VK_RBUTTON, VK_SHIFT,
};
use windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, DispatchMessageW, GetMessageW, HC_ACTION, KBDLLHOOKSTRUCT, MSG, PM_NOREMOVE, PeekMessageW,
    PostThreadMessageW, SetWindowsHookExW, TranslateMessage, UnhookWindowsHookEx, WH_KEYBOARD_LL, WM_KEYDOWN,
    WM_QUIT, WM_SYSKEYDOWN, WM_USER,
};

use crate::signals::{ControlSignals, HotKey, HotkeyState};

/// `HRESULT_FROM_WIN32(ERROR_INVALID_THREAD_ID)`, returned while the thread
/// has no message queue yet.
const INVALID_THREAD_ID: i32 = -2_147_023_452;

static HOOK_SIGNALS: RwLock<Option<Arc<ControlSignals>>> = RwLock::new(None);
static HOOK_STATE: HotkeyState = HotkeyState::new();

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Failed to install the keyboard hook: {0}")]
    HookFailed(windows::core::Error),
    #[error("Failed to spawn the hotkey thread: {0}")]
    FailedToSpawnThread(#[from] std::io::Error),
    #[error("Hotkey thread exited before reporting its state")]
    FailedToStart,
    #[error("Failed to join the hotkey thread")]
    FailedToJoinThread,
    #[error("Windows API error: {0}")]
    WindowsError(#[from] windows::core::Error),
}

/// Returns `true` while the right mouse button is down.
#[must_use]
#[inline]
pub fn magnify_held() -> bool {
    is_key_down(VK_RBUTTON)
}

#[inline]
fn is_key_down(key: VIRTUAL_KEY) -> bool {
    (unsafe { GetAsyncKeyState(i32::from(key.0)) } as u16 & 0x8000) != 0
}

/// Owns the hook thread. Requests go to the [`ControlSignals`] passed to
/// [`HotkeyThread::spawn`].
pub struct HotkeyThread {
    thread: Option<JoinHandle<Result<(), Error>>>,
    thread_id: u32,
}

impl HotkeyThread {
    /// Starts the hook thread and waits until the hook is installed.
    pub fn spawn(signals: Arc<ControlSignals>) -> Result<Self, Error> {
        *HOOK_SIGNALS.write() = Some(signals);

        let (ready_sender, ready_receiver) = mpsc::channel();

        let thread = thread::Builder::new().name("zoomin-hotkeys".to_string()).spawn(move || {
            let thread_id = unsafe { GetCurrentThreadId() };

            // Creates the message queue before anyone posts to it.
            let mut message = MSG::default();
            let _ = unsafe { PeekMessageW(&mut message, None, WM_USER, WM_USER, PM_NOREMOVE) };

            let instance = unsafe { GetModuleHandleW(None)? };
            let hook = match unsafe { SetWindowsHookExW(WH_KEYBOARD_LL, Some(keyboard_proc), Some(instance.into()), 0) }
            {
                Ok(hook) => {
                    let _ = ready_sender.send(Ok(thread_id));
                    hook
                }
                Err(e) => {
                    let _ = ready_sender.send(Err(e.clone()));
                    return Err(Error::HookFailed(e));
                }
            };

            unsafe {
                // -1 reports an error, 0 is WM_QUIT.
                while GetMessageW(&mut message, None, 0, 0).0 > 0 {
                    let _ = TranslateMessage(&message);
                    DispatchMessageW(&message);
                }
            }

            unsafe { UnhookWindowsHookEx(hook)? };

            Ok(())
        })?;

        let thread_id = match ready_receiver.recv() {
            Ok(Ok(thread_id)) => thread_id,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(Error::HookFailed(e));
            }
            Err(_) => {
                let _ = thread.join();
                return Err(Error::FailedToStart);
            }
        };

        info!("Hotkeys Active: Numpad 8 Toggles The Overlay, Shift+Esc Exits");

        Ok(Self { thread: Some(thread), thread_id })
    }

    /// Ends the message loop, removes the hook and joins the thread.
    pub fn stop(mut self) -> Result<(), Error> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };

        loop {
            match unsafe { PostThreadMessageW(self.thread_id, WM_QUIT, WPARAM::default(), LPARAM::default()) } {
                Ok(()) => break,
                Err(e) => {
                    if thread.is_finished() {
                        break;
                    }

                    if e.code().0 == INVALID_THREAD_ID {
                        warn!("Hotkey Thread Is Not In Message Loop Yet");
                    } else {
                        return Err(Error::WindowsError(e));
                    }
                }
            }
        }

        let result = thread.join().map_err(|_| Error::FailedToJoinThread)?;
        *HOOK_SIGNALS.write() = None;

        result
    }
}

unsafe extern "system" fn keyboard_proc(code: i32, w_param: WPARAM, l_param: LPARAM) -> LRESULT {
    if code == HC_ACTION as i32 {
        let info = unsafe { &*(l_param.0 as *const KBDLLHOOKSTRUCT) };
        let pressed = w_param.0 as u32 == WM_KEYDOWN || w_param.0 as u32 == WM_SYSKEYDOWN;

        let key = match VIRTUAL_KEY(info.vkCode as u16) {
            key if key == VK_ESCAPE => HotKey::Escape,
            key if key == VK_NUMPAD8 => HotKey::Toggle,
            _ => HotKey::Other,
        };

        if key != HotKey::Other
            && let Some(signals) = HOOK_SIGNALS.read().as_ref()
            && let Some(event) = HOOK_STATE.key_event(signals, key, pressed, is_key_down(VK_SHIFT))
        {
            debug!("Hotkey {event:?}");
        }
    }

    unsafe { CallNextHookEx(None, code, w_param, l_param) }
}
