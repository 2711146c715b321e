//! The capture source the frame loop polls, backed by either output
//! duplication or a Graphics Capture session.
use std::ops::Deref;

use log::{info, warn};
use windows::Graphics::Capture::GraphicsCaptureItem;
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BIND_SHADER_RESOURCE, D3D11_TEXTURE2D_DESC, D3D11_USAGE_DEFAULT, ID3D11Device, ID3D11DeviceContext,
    ID3D11ShaderResourceView, ID3D11Texture2D,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT, DXGI_SAMPLE_DESC};

use crate::config::{CaptureBackend, Settings};
use crate::d3d11::{self, GpuDevice};
use crate::dxgi_duplication_api::{self, DxgiDuplicationApi};
use crate::error::{Classify, ErrorKind};
use crate::graphics_capture_api::{self, GraphicsCaptureApi};
use crate::monitor::{self, Monitor};
use crate::pacer::{FrameSource, Poll};
use crate::relay::Published;
use crate::surface::{self, Surface, SurfaceDesc};
use crate::target::Target;
use crate::window;

/// Used to handle capture source errors.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("DirectX error: {0}")]
    DirectXError(#[from] d3d11::Error),
    #[error("Output duplication error: {0}")]
    DuplicationError(#[from] dxgi_duplication_api::Error),
    #[error("Graphics capture error: {0}")]
    GraphicsCaptureError(#[from] graphics_capture_api::Error),
    #[error("Monitor error: {0}")]
    MonitorError(#[from] monitor::Error),
    #[error("Window error: {0}")]
    WindowError(#[from] window::Error),
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::DirectXError(e) => e.kind(),
            Self::DuplicationError(e) => e.kind(),
            Self::GraphicsCaptureError(e) => e.kind(),
            Self::MonitorError(_) | Self::WindowError(_) => ErrorKind::FatalInit,
        }
    }
}

/// A GPU copy of a captured frame together with the view the renderer
/// samples it through.
pub struct FrameTexture {
    texture: ID3D11Texture2D,
    view: ID3D11ShaderResourceView,
    desc: SurfaceDesc,
}

#[allow(clippy::non_send_fields_in_send_ty)]
unsafe impl Send for FrameTexture {}

impl FrameTexture {
    /// Creates a shader-readable texture of the given shape.
    pub fn new(device: &ID3D11Device, desc: SurfaceDesc) -> Result<Self, d3d11::Error> {
        let texture_desc = D3D11_TEXTURE2D_DESC {
            Width: desc.width,
            Height: desc.height,
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT(desc.format),
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: D3D11_BIND_SHADER_RESOURCE.0 as u32,
            CPUAccessFlags: 0,
            MiscFlags: 0,
        };

        let mut texture = None;
        unsafe { device.CreateTexture2D(&texture_desc, None, Some(&mut texture))? };
        let texture = texture.ok_or(d3d11::Error::NullResource)?;

        let mut view = None;
        unsafe { device.CreateShaderResourceView(&texture, None, Some(&mut view))? };
        let view = view.ok_or(d3d11::Error::NullResource)?;

        Ok(Self { texture, view, desc })
    }

    /// GPU-copies `source` into `slot`, first replacing the slot texture when
    /// it is missing or its size or format differs. Returns `true` when the
    /// texture was replaced.
    pub fn copy_into(
        slot: &mut Option<Self>,
        device: &ID3D11Device,
        context: &ID3D11DeviceContext,
        source: &ID3D11Texture2D,
    ) -> Result<bool, d3d11::Error> {
        let mut source_desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { source.GetDesc(&mut source_desc) };

        let desc = SurfaceDesc { width: source_desc.Width, height: source_desc.Height, format: source_desc.Format.0 };
        let recreated = surface::reuse_or_recreate(slot, desc, |desc| Self::new(device, desc))?;

        if let Some(frame) = slot {
            unsafe { context.CopyResource(&frame.texture, source) };
        }

        Ok(recreated)
    }

    #[must_use]
    #[inline]
    pub const fn view(&self) -> &ID3D11ShaderResourceView {
        &self.view
    }
}

impl Surface for FrameTexture {
    #[inline]
    fn desc(&self) -> SurfaceDesc {
        self.desc
    }
}

/// The newest frame of either variant.
pub enum CurrentFrame<'a> {
    /// Owned by the pull-model source.
    Owned(&'a FrameTexture),
    /// Held in a relay slot; the producer skips the slot while this lives.
    Relayed(Published<'a, FrameTexture>),
}

impl Deref for CurrentFrame<'_> {
    type Target = FrameTexture;

    fn deref(&self) -> &FrameTexture {
        match self {
            Self::Owned(frame) => frame,
            Self::Relayed(frame) => frame,
        }
    }
}

/// The capture source, polymorphic over the pull and push variants.
pub enum CaptureSource {
    Duplication(DxgiDuplicationApi),
    Session(GraphicsCaptureApi),
}

impl CaptureSource {
    /// Resolves the target window hint and opens the variant `settings`
    /// selects for it.
    pub fn open(device: &GpuDevice, settings: &Settings) -> Result<Self, Error> {
        let target = window::resolve_target(settings.target_window.as_deref());
        let timeout_ms = settings.capture_timeout_ms();

        let multithread_protected = device.capabilities().multithread_protected;
        let backend = settings.backend.resolve(matches!(target, Target::Window { .. }), multithread_protected);
        if settings.backend == CaptureBackend::Session && backend != CaptureBackend::Session {
            warn!("Session Capture Needs A Multithread Protected Device, Using Output Duplication");
        }

        let source = match (backend, target) {
            (CaptureBackend::Session, Target::Window { handle, .. }) => {
                Self::session(device, GraphicsCaptureItem::try_from(handle)?)?
            }
            (CaptureBackend::Session, Target::Desktop) => {
                Self::session(device, GraphicsCaptureItem::try_from(Monitor::primary()?)?)?
            }
            (CaptureBackend::Auto | CaptureBackend::Duplication, Target::Window { handle, title }) => {
                warn!("Output Duplication Captures Whole Displays, Using The Display Showing \"{title}\"");
                Self::Duplication(DxgiDuplicationApi::new(device.clone(), Monitor::from_window(handle.as_raw_hwnd())?, timeout_ms)?)
            }
            (CaptureBackend::Auto | CaptureBackend::Duplication, Target::Desktop) => {
                Self::Duplication(DxgiDuplicationApi::new(device.clone(), Monitor::primary()?, timeout_ms)?)
            }
        };

        info!("Capture Source: {}", source.name());

        Ok(source)
    }

    fn session(device: &GpuDevice, item: GraphicsCaptureItem) -> Result<Self, Error> {
        let mut capture = GraphicsCaptureApi::new(device.clone(), item)?;
        capture.start_capture()?;

        Ok(Self::Session(capture))
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Duplication(_) => "Output Duplication",
            Self::Session(_) => "Graphics Capture Session",
        }
    }

    /// Stops producing frames. For the session variant this closes the
    /// frame pool so no callback runs afterwards.
    pub fn stop(&mut self) {
        match self {
            Self::Duplication(duplication) => duplication.release(),
            Self::Session(session) => session.stop_capture(),
        }
    }
}

impl FrameSource for CaptureSource {
    type Frame = FrameTexture;
    type Current<'a> = CurrentFrame<'a>;
    type Error = Error;

    #[inline]
    fn poll(&mut self) -> Result<Poll, Error> {
        match self {
            Self::Duplication(duplication) => Ok(duplication.acquire_next_frame()?),
            Self::Session(session) => Ok(session.poll()),
        }
    }

    #[inline]
    fn current(&self) -> Option<CurrentFrame<'_>> {
        match self {
            Self::Duplication(duplication) => duplication.frame().map(CurrentFrame::Owned),
            Self::Session(session) => session.latest().map(CurrentFrame::Relayed),
        }
    }
}
