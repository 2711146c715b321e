//! DXGI Desktop Duplication API wrapper.
//!
//! This module provides [`DxgiDuplicationApi`], the pull-model capture source.
//! Each call to [`DxgiDuplicationApi::acquire_next_frame`] waits at most the
//! configured timeout for a new desktop image and GPU-copies it into a
//! persistent [`FrameTexture`] owned by the source. Timeouts and access loss
//! leave that texture untouched, so the renderer keeps showing the last good
//! frame.
use std::ffi::c_void;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};
use windows::Win32::Graphics::Direct3D11::{ID3D11Device, ID3D11Texture2D};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_R8G8B8A8_UNORM};
use windows::Win32::Graphics::Dxgi::{
    DXGI_ERROR_ACCESS_LOST, DXGI_ERROR_NOT_FOUND, DXGI_ERROR_WAIT_TIMEOUT, DXGI_OUTDUPL_FRAME_INFO, IDXGIDevice,
    IDXGIOutput1, IDXGIOutput5, IDXGIOutputDuplication,
};
use windows::core::Interface;

use crate::capture::FrameTexture;
use crate::d3d11::{self, GpuDevice};
use crate::error::{Classify, ErrorKind};
use crate::fallback;
use crate::monitor::Monitor;
use crate::pacer::Poll;

/// Minimum time between two attempts to rebuild a lost duplication.
pub const RECREATE_INTERVAL: Duration = Duration::from_secs(1);

/// Errors that can occur while using the DXGI Desktop Duplication API wrapper.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Failed to find a DXGI output that corresponds to the provided monitor.
    #[error("Failed to find DXGI output for the specified monitor")]
    OutputNotFound,
    /// AcquireNextFrame succeeded without returning the desktop image.
    #[error("AcquireNextFrame returned no desktop resource")]
    NullResource,
    /// DirectX device or texture error.
    #[error("DirectX error: {0}")]
    DirectXError(#[from] d3d11::Error),
    /// Windows API error.
    #[error("Windows API error: {0}")]
    WindowsError(#[from] windows::core::Error),
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::OutputNotFound => ErrorKind::FatalInit,
            Self::NullResource | Self::DirectXError(_) | Self::WindowsError(_) => ErrorKind::TransientCapture,
        }
    }
}

/// Ways to duplicate an output, tried in declaration order.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
enum DuplicateStrategy {
    /// `IDXGIOutput1::DuplicateOutput`.
    Legacy,
    /// `IDXGIOutput5::DuplicateOutput1` with an explicit format list.
    WithFormats,
}

impl DuplicateStrategy {
    const CHAIN: [Self; 2] = [Self::Legacy, Self::WithFormats];

    fn duplicate(self, output: &IDXGIOutput1, device: &ID3D11Device) -> windows::core::Result<IDXGIOutputDuplication> {
        match self {
            Self::Legacy => unsafe { output.DuplicateOutput(device) },
            Self::WithFormats => {
                let output = output.cast::<IDXGIOutput5>()?;
                let supported_formats = [DXGI_FORMAT_R8G8B8A8_UNORM, DXGI_FORMAT_B8G8R8A8_UNORM];
                unsafe { output.DuplicateOutput1(device, 0, &supported_formats) }
            }
        }
    }
}

fn duplicate(output: &IDXGIOutput1, device: &ID3D11Device) -> Result<IDXGIOutputDuplication, Error> {
    match fallback::first_success(DuplicateStrategy::CHAIN, |strategy| strategy.duplicate(output, device)) {
        Ok((strategy, duplication)) => {
            trace!("Duplicated Output With {strategy:?}");
            Ok(duplication)
        }
        Err(exhausted) => match exhausted.into_last() {
            Some((_, e)) => Err(Error::WindowsError(e)),
            None => Err(Error::OutputNotFound),
        },
    }
}

/// Releases an acquired frame when dropped, on every path.
struct AcquiredFrame<'a> {
    duplication: &'a IDXGIOutputDuplication,
}

impl Drop for AcquiredFrame<'_> {
    fn drop(&mut self) {
        let _ = unsafe { self.duplication.ReleaseFrame() };
    }
}

/// Captures one display with the DXGI Desktop Duplication API.
pub struct DxgiDuplicationApi {
    device: GpuDevice,
    output: IDXGIOutput1,
    /// `None` after access was lost, until the next successful rebuild.
    duplication: Option<IDXGIOutputDuplication>,
    frame: Option<FrameTexture>,
    timeout_ms: u32,
    lost_at: Option<Instant>,
}

impl DxgiDuplicationApi {
    /// Constructs a new duplication session for the specified monitor on the
    /// shared device.
    ///
    /// The output showing `monitor` is tried first, then every other output
    /// of the device's adapter until one can be duplicated.
    pub fn new(device: GpuDevice, monitor: Monitor, timeout_ms: u32) -> Result<Self, Error> {
        let outputs = Self::enumerate_outputs(device.device())?;
        let order = fallback::preferred_first(0..outputs.len(), |&index| {
            outputs[index].0 == monitor.as_raw_hmonitor()
        });

        let found = fallback::first_success(order, |index| {
            let (_, output) = &outputs[index];
            duplicate(output, device.device()).map(|duplication| (output.clone(), duplication))
        });

        let (index, (output, duplication)) = match found {
            Ok(found) => found,
            Err(exhausted) => {
                return Err(exhausted.into_last().map_or(Error::OutputNotFound, |(_, e)| e));
            }
        };

        if outputs[index].0 != monitor.as_raw_hmonitor() {
            warn!("Requested Display Can Not Be Duplicated, Using Output {index} Instead");
        }

        let desc = unsafe { duplication.GetDesc() };
        info!(
            "Duplicating {}x{} Output ({:?}) With A {timeout_ms} ms Timeout",
            desc.ModeDesc.Width, desc.ModeDesc.Height, desc.ModeDesc.Format
        );

        Ok(Self { device, output, duplication: Some(duplication), frame: None, timeout_ms, lost_at: None })
    }

    /// Lists the outputs of the device's adapter with the monitor each shows.
    fn enumerate_outputs(device: &ID3D11Device) -> Result<Vec<(*mut c_void, IDXGIOutput1)>, Error> {
        let adapter = unsafe { device.cast::<IDXGIDevice>()?.GetAdapter()? };

        let mut outputs = Vec::new();
        for index in 0.. {
            let output = match unsafe { adapter.EnumOutputs(index) } {
                Ok(output) => output,
                Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
                Err(e) => return Err(Error::WindowsError(e)),
            };

            let desc = unsafe { output.GetDesc()? };
            outputs.push((desc.Monitor.0, output.cast::<IDXGIOutput1>()?));
        }

        if outputs.is_empty() {
            return Err(Error::OutputNotFound);
        }

        Ok(outputs)
    }

    /// Acquires the next frame into the persistent frame texture.
    ///
    /// Waits at most the configured timeout. A timeout, or an update that only
    /// moved the mouse pointer, reports [`Poll::Timeout`] and keeps the
    /// current texture. Access loss (display mode change, secure desktop,
    /// fullscreen transition) drops the duplication and reports
    /// [`Poll::AccessLost`]; rebuilding is attempted at most once per
    /// [`RECREATE_INTERVAL`], and [`Poll::Timeout`] is reported meanwhile.
    pub fn acquire_next_frame(&mut self) -> Result<Poll, Error> {
        if self.duplication.is_none() && !self.try_recreate() {
            return Ok(Poll::Timeout);
        }

        let Some(duplication) = &self.duplication else {
            return Ok(Poll::Timeout);
        };

        let mut frame_info = DXGI_OUTDUPL_FRAME_INFO::default();
        let mut resource = None;

        match unsafe { duplication.AcquireNextFrame(self.timeout_ms, &mut frame_info, &mut resource) } {
            Ok(()) => (),
            Err(e) if e.code() == DXGI_ERROR_WAIT_TIMEOUT => return Ok(Poll::Timeout),
            Err(e) if e.code() == DXGI_ERROR_ACCESS_LOST => {
                self.mark_lost();
                return Ok(Poll::AccessLost);
            }
            Err(e) => return Err(Error::WindowsError(e)),
        }

        let acquired = AcquiredFrame { duplication };

        if frame_info.LastPresentTime == 0 && self.frame.is_some() {
            return Ok(Poll::Timeout);
        }

        let texture = resource.ok_or(Error::NullResource)?.cast::<ID3D11Texture2D>()?;
        FrameTexture::copy_into(&mut self.frame, self.device.device(), self.device.context(), &texture)?;

        drop(acquired);

        Ok(Poll::NewFrame)
    }

    fn mark_lost(&mut self) {
        debug!("Duplication Access Lost, Rebuilding In {RECREATE_INTERVAL:?}");
        self.duplication = None;
        self.lost_at = Some(Instant::now());
    }

    /// Rebuilds a lost duplication if the retry interval has passed.
    fn try_recreate(&mut self) -> bool {
        if self.lost_at.is_some_and(|lost_at| lost_at.elapsed() < RECREATE_INTERVAL) {
            return false;
        }

        match duplicate(&self.output, self.device.device()) {
            Ok(duplication) => {
                info!("Output Duplication Recreated");
                self.duplication = Some(duplication);
                self.lost_at = None;
                true
            }
            Err(e) => {
                debug!("Output Duplication Still Unavailable: {e}");
                self.lost_at = Some(Instant::now());
                false
            }
        }
    }

    /// Drops the duplication so the OS stops composing frames for it.
    pub fn release(&mut self) {
        self.duplication = None;
    }

    /// Gets the last captured frame.
    #[must_use]
    #[inline]
    pub const fn frame(&self) -> Option<&FrameTexture> {
        self.frame.as_ref()
    }
}
