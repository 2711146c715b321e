//! # Zoomin
//!
//! A low latency screen magnifier overlay for Windows. The desktop (or one
//! window) is captured through DXGI output duplication or a Graphics Capture
//! session, drawn through a magnification shader with Direct3D 11 and
//! presented on a click-through, always-on-top window.
//!
//! Hold the right mouse button to zoom in. Numpad 8 shows or hides the
//! overlay and Shift+Esc exits.
//!
//! The frame loop in [`pacer`] is generic over its capture source, renderer,
//! overlay and trigger, so everything outside the Windows modules builds and
//! is tested on any host.
#![warn(clippy::semicolon_if_nothing_returned)]
#![warn(clippy::inconsistent_struct_constructor)]
#![warn(clippy::must_use_candidate)]
#![warn(clippy::ptr_as_ptr)]
#![warn(clippy::borrow_as_ptr)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]

pub mod config;
pub mod error;
pub mod fallback;
pub mod magnify;
pub mod pacer;
pub mod relay;
pub mod signals;
pub mod surface;
pub mod target;
pub mod zoom;

#[cfg(windows)]
pub mod app;
#[cfg(windows)]
pub mod capture;
#[cfg(windows)]
pub mod d3d11;
#[cfg(windows)]
pub mod dxgi_duplication_api;
#[cfg(windows)]
pub mod graphics_capture_api;
#[cfg(windows)]
pub mod hotkeys;
#[cfg(windows)]
pub mod monitor;
#[cfg(windows)]
pub mod overlay;
#[cfg(windows)]
pub mod render;
#[cfg(windows)]
pub mod window;
#[cfg(windows)]
pub mod winrt;
