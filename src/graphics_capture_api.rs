//! Push-model capture through a Graphics Capture session.
//!
//! Frames arrive on a capture thread owned by the OS. The `FrameArrived`
//! callback GPU-copies the newest frame into the inactive slot of a
//! [`FrameRelay`] and publishes it, never waiting for the render loop.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{info, trace, warn};
use parking_lot::Mutex;
use windows::Foundation::Metadata::ApiInformation;
use windows::Foundation::TypedEventHandler;
use windows::Graphics::Capture::{
    Direct3D11CaptureFrame, Direct3D11CaptureFramePool, GraphicsCaptureItem, GraphicsCaptureSession,
};
use windows::Graphics::DirectX::Direct3D11::IDirect3DDevice;
use windows::Graphics::DirectX::DirectXPixelFormat;
use windows::Graphics::SizeInt32;
use windows::Win32::Graphics::Direct3D11::ID3D11Texture2D;
use windows::Win32::System::WinRT::Direct3D11::IDirect3DDxgiInterfaceAccess;
use windows::core::{HSTRING, IInspectable, Interface};

use crate::capture::FrameTexture;
use crate::d3d11::{self, GpuDevice, SendDirectX, create_direct3d_device};
use crate::error::{Classify, ErrorKind};
use crate::pacer::Poll;
use crate::relay::{FrameRelay, Publish, Published};

/// Buffers in the frame pool.
const FRAME_POOL_BUFFERS: i32 = 2;

const PIXEL_FORMAT: DirectXPixelFormat = DirectXPixelFormat::B8G8R8A8UIntNormalized;

/// Used to handle graphics capture errors.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Graphics Capture API is not supported")]
    Unsupported,
    #[error("Already started")]
    AlreadyStarted,
    #[error("Capture session is closed")]
    CaptureClosed,
    #[error("DirectX error: {0}")]
    DirectXError(#[from] d3d11::Error),
    #[error("Windows API error: {0}")]
    WindowsError(#[from] windows::core::Error),
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Unsupported | Self::AlreadyStarted => ErrorKind::FatalInit,
            Self::CaptureClosed | Self::DirectXError(_) | Self::WindowsError(_) => ErrorKind::TransientCapture,
        }
    }
}

/// State shared with the `FrameArrived` callback.
struct FrameArrivedState {
    device: SendDirectX<GpuDevice>,
    direct3d_device: SendDirectX<IDirect3DDevice>,
    relay: Arc<FrameRelay<FrameTexture>>,
    closed: Arc<AtomicBool>,
    last_size: Mutex<SizeInt32>,
}

impl FrameArrivedState {
    fn on_frame_arrived(&self, frame_pool: &Direct3D11CaptureFramePool) -> windows::core::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }

        // Drain to the newest frame.
        let mut newest: Option<Direct3D11CaptureFrame> = None;
        while let Ok(frame) = frame_pool.TryGetNextFrame() {
            if let Some(previous) = newest.replace(frame) {
                let _ = previous.Close();
            }
        }
        let Some(frame) = newest else {
            return Ok(());
        };

        let result = self.publish(frame_pool, &frame);
        let _ = frame.Close();
        result
    }

    fn publish(&self, frame_pool: &Direct3D11CaptureFramePool, frame: &Direct3D11CaptureFrame) -> windows::core::Result<()> {
        let content_size = frame.ContentSize()?;

        {
            let mut last_size = self.last_size.lock();
            if content_size.Width != last_size.Width || content_size.Height != last_size.Height {
                info!(
                    "Size Changed From {}x{} to {}x{} -> Recreating Frame Pool",
                    last_size.Width, last_size.Height, content_size.Width, content_size.Height,
                );
                frame_pool.Recreate(&self.direct3d_device.0, PIXEL_FORMAT, FRAME_POOL_BUFFERS, content_size)?;
                *last_size = content_size;

                return Ok(());
            }
        }

        let surface = frame.Surface()?.cast::<IDirect3DDxgiInterfaceAccess>()?;
        let texture: ID3D11Texture2D = unsafe { surface.GetInterface()? };

        let device = &self.device.0;
        let published = self
            .relay
            .publish_with(|slot| FrameTexture::copy_into(slot, device.device(), device.context(), &texture).map(|_| ()));

        match published {
            Ok(Publish::Published(sequence)) => trace!("Published Frame {sequence}"),
            Ok(Publish::Dropped) => trace!("Both Frame Slots Busy, Dropped Frame"),
            Err(e) => warn!("Failed To Copy Captured Frame: {e}"),
        }

        Ok(())
    }
}

/// A Graphics Capture session publishing into a [`FrameRelay`].
pub struct GraphicsCaptureApi {
    _item: GraphicsCaptureItem,
    _direct3d_device: IDirect3DDevice,
    frame_pool: Option<Direct3D11CaptureFramePool>,
    session: Option<GraphicsCaptureSession>,
    relay: Arc<FrameRelay<FrameTexture>>,
    closed: Arc<AtomicBool>,
    last_sequence: u64,
    active: bool,
}

impl GraphicsCaptureApi {
    /// Creates a free-threaded frame pool and capture session for `item` on
    /// the shared device. Nothing is captured until
    /// [`GraphicsCaptureApi::start_capture`].
    pub fn new(device: GpuDevice, item: GraphicsCaptureItem) -> Result<Self, Error> {
        // Check Support
        if !Self::is_supported()? {
            return Err(Error::Unsupported);
        }

        trace!("Creating Direct3D Device For Capture");
        let direct3d_device = create_direct3d_device(device.device())?;

        trace!("Creating Frame Pool");
        let size = item.Size()?;
        let frame_pool =
            Direct3D11CaptureFramePool::CreateFreeThreaded(&direct3d_device, PIXEL_FORMAT, FRAME_POOL_BUFFERS, size)?;

        trace!("Creating Capture Session");
        let session = frame_pool.CreateCaptureSession(&item)?;

        let relay = Arc::new(FrameRelay::new());
        let closed = Arc::new(AtomicBool::new(false));

        // Set Capture Session Closed Event
        item.Closed(&TypedEventHandler::<GraphicsCaptureItem, IInspectable>::new({
            let closed = closed.clone();

            move |_, _| {
                info!("Capture Item Closed, Keeping The Last Frame");
                closed.store(true, Ordering::Release);

                Ok(())
            }
        }))?;

        // Set Frame Pool Frame Arrived Event
        frame_pool.FrameArrived(&TypedEventHandler::<Direct3D11CaptureFramePool, IInspectable>::new({
            let state = FrameArrivedState {
                device: SendDirectX::new(device),
                direct3d_device: SendDirectX::new(direct3d_device.clone()),
                relay: relay.clone(),
                closed: closed.clone(),
                last_size: Mutex::new(size),
            };

            move |frame_pool, _| match frame_pool.as_ref() {
                Some(frame_pool) => state.on_frame_arrived(frame_pool),
                None => Ok(()),
            }
        }))?;

        Ok(Self {
            _item: item,
            _direct3d_device: direct3d_device,
            frame_pool: Some(frame_pool),
            session: Some(session),
            relay,
            closed,
            last_sequence: 0,
            active: false,
        })
    }

    /// Start capture
    pub fn start_capture(&mut self) -> Result<(), Error> {
        if self.active {
            return Err(Error::AlreadyStarted);
        }

        let Some(session) = &self.session else {
            return Err(Error::CaptureClosed);
        };

        if Self::is_session_property_present("IsBorderRequired")? {
            session.SetIsBorderRequired(false)?;
        } else {
            trace!("Capture Border Can Not Be Disabled On This System");
        }

        if Self::is_session_property_present("IsCursorCaptureEnabled")? {
            session.SetIsCursorCaptureEnabled(false)?;
        }

        session.StartCapture()?;
        self.active = true;

        Ok(())
    }

    /// Reports whether a frame was published since the last poll. Never
    /// blocks.
    pub fn poll(&mut self) -> Poll {
        let sequence = self.relay.sequence();
        if sequence == self.last_sequence {
            return Poll::Timeout;
        }

        self.last_sequence = sequence;
        Poll::NewFrame
    }

    /// Gets the newest published frame. The callback skips the slot while
    /// the returned guard lives.
    #[inline]
    pub fn latest(&self) -> Option<Published<'_, FrameTexture>> {
        self.relay.latest()
    }

    /// Stops the session and closes the frame pool, after which no callback
    /// touches the relay again.
    pub fn stop_capture(&mut self) {
        self.closed.store(true, Ordering::Release);

        if let Some(session) = self.session.take()
            && let Err(e) = session.Close()
        {
            warn!("Failed To Close Capture Session: {e}");
        }

        if let Some(frame_pool) = self.frame_pool.take()
            && let Err(e) = frame_pool.Close()
        {
            warn!("Failed To Close Frame Pool: {e}");
        }

        self.active = false;
    }

    /// Check if the Windows Graphics Capture API is supported.
    pub fn is_supported() -> Result<bool, Error> {
        Ok(ApiInformation::IsApiContractPresentByMajor(&HSTRING::from("Windows.Foundation.UniversalApiContract"), 8)?)
    }

    fn is_session_property_present(property: &str) -> Result<bool, Error> {
        Ok(ApiInformation::IsPropertyPresent(
            &HSTRING::from("Windows.Graphics.Capture.GraphicsCaptureSession"),
            &HSTRING::from(property),
        )?)
    }
}

impl Drop for GraphicsCaptureApi {
    fn drop(&mut self) {
        self.stop_capture();
    }
}
