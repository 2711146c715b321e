//! Exit and toggle requests raised by the input hook thread.
use std::sync::atomic::{AtomicBool, Ordering};

/// Single-writer, single-reader control flags.
///
/// The hook thread (or a Ctrl+C handler) raises requests, the main loop
/// consumes them once per tick. A toggle is edge triggered: however many
/// times it is raised before the loop looks, it flips visibility once.
#[derive(Debug, Default)]
pub struct ControlSignals {
    exit: AtomicBool,
    toggle: AtomicBool,
}

impl ControlSignals {
    #[must_use]
    pub const fn new() -> Self {
        Self { exit: AtomicBool::new(false), toggle: AtomicBool::new(false) }
    }

    /// Asks the main loop to shut down. Sticky.
    #[inline]
    pub fn request_exit(&self) {
        self.exit.store(true, Ordering::Release);
    }

    #[must_use]
    #[inline]
    pub fn exit_requested(&self) -> bool {
        self.exit.load(Ordering::Acquire)
    }

    /// Asks the main loop to flip the overlay visibility.
    #[inline]
    pub fn request_toggle(&self) {
        self.toggle.store(true, Ordering::Release);
    }

    /// Reads and clears the pending toggle in one step.
    #[must_use]
    #[inline]
    pub fn take_toggle(&self) -> bool {
        self.toggle.swap(false, Ordering::AcqRel)
    }
}

/// Keys the hook cares about.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub enum HotKey {
    Escape,
    /// Numpad 8.
    Toggle,
    Other,
}

/// A request raised by a key transition.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub enum HotkeyEvent {
    Exit,
    Toggle,
}

/// Turns raw key transitions into control requests.
///
/// Shift+Esc requests exit. The toggle key requests a toggle on its
/// key-down edge only, so auto-repeat while it is held does nothing.
#[derive(Debug, Default)]
pub struct HotkeyState {
    toggle_down: AtomicBool,
}

impl HotkeyState {
    #[must_use]
    pub const fn new() -> Self {
        Self { toggle_down: AtomicBool::new(false) }
    }

    /// Feeds one key transition and raises the matching request on `signals`.
    pub fn key_event(&self, signals: &ControlSignals, key: HotKey, pressed: bool, shift_held: bool) -> Option<HotkeyEvent> {
        match key {
            HotKey::Escape if pressed && shift_held => {
                signals.request_exit();
                Some(HotkeyEvent::Exit)
            }
            HotKey::Toggle if pressed => {
                if self.toggle_down.swap(true, Ordering::AcqRel) {
                    return None;
                }
                signals.request_toggle();
                Some(HotkeyEvent::Toggle)
            }
            HotKey::Toggle => {
                self.toggle_down.store(false, Ordering::Release);
                None
            }
            HotKey::Escape | HotKey::Other => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn toggle_is_consumed_once() {
        let signals = ControlSignals::new();
        signals.request_toggle();
        signals.request_toggle();

        assert!(signals.take_toggle());
        assert!(!signals.take_toggle(), "second read must see the cleared flag");
    }

    #[test]
    fn exit_is_sticky() {
        let signals = ControlSignals::new();
        assert!(!signals.exit_requested());

        signals.request_exit();
        assert!(signals.exit_requested());
        assert!(signals.exit_requested());
    }

    #[test]
    fn requests_cross_threads() {
        let signals = Arc::new(ControlSignals::new());

        let writer = {
            let signals = signals.clone();
            thread::spawn(move || {
                signals.request_toggle();
                signals.request_exit();
            })
        };
        writer.join().unwrap();

        assert!(signals.take_toggle());
        assert!(signals.exit_requested());
    }

    #[test]
    fn shift_escape_exits() {
        let signals = ControlSignals::new();
        let hotkeys = HotkeyState::new();

        assert_eq!(hotkeys.key_event(&signals, HotKey::Escape, true, false), None);
        assert!(!signals.exit_requested(), "plain Esc is left to other applications");

        assert_eq!(hotkeys.key_event(&signals, HotKey::Escape, true, true), Some(HotkeyEvent::Exit));
        assert!(signals.exit_requested());
    }

    #[test]
    fn held_toggle_key_fires_once() {
        let signals = ControlSignals::new();
        let hotkeys = HotkeyState::new();

        assert_eq!(hotkeys.key_event(&signals, HotKey::Toggle, true, false), Some(HotkeyEvent::Toggle));
        // Auto-repeat.
        assert_eq!(hotkeys.key_event(&signals, HotKey::Toggle, true, false), None);
        assert_eq!(hotkeys.key_event(&signals, HotKey::Toggle, true, false), None);
        assert!(signals.take_toggle());
        assert!(!signals.take_toggle());

        assert_eq!(hotkeys.key_event(&signals, HotKey::Toggle, false, false), None);
        assert_eq!(hotkeys.key_event(&signals, HotKey::Toggle, true, false), Some(HotkeyEvent::Toggle));
        assert!(signals.take_toggle());
    }

    #[test]
    fn other_keys_are_ignored() {
        let signals = ControlSignals::new();
        let hotkeys = HotkeyState::new();

        assert_eq!(hotkeys.key_event(&signals, HotKey::Other, true, true), None);
        assert!(!signals.exit_requested());
        assert!(!signals.take_toggle());
    }
}
