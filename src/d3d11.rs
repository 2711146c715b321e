use log::{info, trace, warn};
use windows::Graphics::DirectX::Direct3D11::IDirect3DDevice;
use windows::Win32::Foundation::HMODULE;
use windows::Win32::Graphics::Direct3D::{
    D3D_DRIVER_TYPE, D3D_DRIVER_TYPE_HARDWARE, D3D_DRIVER_TYPE_WARP, D3D_FEATURE_LEVEL, D3D_FEATURE_LEVEL_10_0,
    D3D_FEATURE_LEVEL_10_1, D3D_FEATURE_LEVEL_11_0, D3D_FEATURE_LEVEL_11_1,
};
use windows::Win32::Graphics::Direct3D11::{
    D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_CREATE_DEVICE_DEBUG, D3D11_CREATE_DEVICE_FLAG, D3D11_SDK_VERSION,
    D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Multithread,
};
use windows::Win32::Graphics::Dxgi::{IDXGIDevice, IDXGIDevice1};
use windows::Win32::System::WinRT::Direct3D11::CreateDirect3D11DeviceFromDXGIDevice;
use windows::core::Interface;

use crate::error::{Classify, ErrorKind};
use crate::fallback;

/// To share DirectX objects between threads.
pub struct SendDirectX<T>(pub T);

impl<T> SendDirectX<T> {
    #[inline]
    pub const fn new(object: T) -> Self {
        Self(object)
    }
}

#[allow(clippy::non_send_fields_in_send_ty)]
unsafe impl<T> Send for SendDirectX<T> {}

/// Used to handle DirectX errors.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Failed to create a Direct3D 11 device with any driver: {0}")]
    NoDevice(windows::core::Error),
    #[error("Direct3D returned success without the requested object")]
    NullResource,
    #[error("Windows API error: {0}")]
    WindowsError(#[from] windows::core::Error),
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        ErrorKind::FatalInit
    }
}

/// Device creation strategies, tried in declaration order.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub enum DeviceStrategy {
    /// Hardware driver with the debug layer.
    HardwareDebug,
    Hardware,
    /// WARP software rasterizer.
    Warp,
}

impl DeviceStrategy {
    pub const CHAIN: [Self; 3] = [Self::HardwareDebug, Self::Hardware, Self::Warp];

    const fn driver_type(self) -> D3D_DRIVER_TYPE {
        match self {
            Self::HardwareDebug | Self::Hardware => D3D_DRIVER_TYPE_HARDWARE,
            Self::Warp => D3D_DRIVER_TYPE_WARP,
        }
    }

    fn flags(self) -> D3D11_CREATE_DEVICE_FLAG {
        match self {
            Self::HardwareDebug => D3D11_CREATE_DEVICE_BGRA_SUPPORT | D3D11_CREATE_DEVICE_DEBUG,
            Self::Hardware | Self::Warp => D3D11_CREATE_DEVICE_BGRA_SUPPORT,
        }
    }
}

/// Optional device features, queried once when the device is created.
#[derive(Eq, PartialEq, Clone, Copy, Debug, Default)]
pub struct Capabilities {
    /// The maximum frame latency was pinned to one frame.
    pub frame_latency: bool,
    /// The immediate context is safe to use from the capture callback thread.
    pub multithread_protected: bool,
}

/// The Direct3D 11 device and immediate context shared by capture and rendering.
#[derive(Clone)]
pub struct GpuDevice {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    capabilities: Capabilities,
}

impl GpuDevice {
    /// Creates the device with the first strategy of [`DeviceStrategy::CHAIN`]
    /// that works, then pins the frame latency and enables multithread
    /// protection.
    pub fn create() -> Result<Self, Error> {
        let created = fallback::first_success(DeviceStrategy::CHAIN, |strategy| {
            let result = Self::create_with(strategy);
            if let Err(e) = &result {
                trace!("{strategy:?} Device Creation Failed: {e}");
            }
            result
        });

        let (strategy, (device, context, feature_level)) = match created {
            Ok(created) => created,
            Err(exhausted) => {
                return Err(match exhausted.into_last() {
                    Some((_, Error::WindowsError(e))) => Error::NoDevice(e),
                    Some((_, e)) => e,
                    None => Error::NullResource,
                });
            }
        };

        let capabilities = Capabilities {
            frame_latency: Self::pin_frame_latency(&device),
            multithread_protected: Self::protect_multithread(&device),
        };

        info!("Created {strategy:?} Direct3D Device At Feature Level {:#x}", feature_level.0);
        if !capabilities.multithread_protected {
            warn!("Multithread Protection Is Unavailable, Session Capture Copies Are Unsynchronized");
        }

        Ok(Self { device, context, capabilities })
    }

    fn create_with(
        strategy: DeviceStrategy,
    ) -> Result<(ID3D11Device, ID3D11DeviceContext, D3D_FEATURE_LEVEL), Error> {
        let feature_flags =
            [D3D_FEATURE_LEVEL_11_1, D3D_FEATURE_LEVEL_11_0, D3D_FEATURE_LEVEL_10_1, D3D_FEATURE_LEVEL_10_0];

        let mut d3d_device = None;
        let mut feature_level = D3D_FEATURE_LEVEL::default();
        let mut d3d_device_context = None;
        unsafe {
            D3D11CreateDevice(
                None,
                strategy.driver_type(),
                HMODULE::default(),
                strategy.flags(),
                Some(&feature_flags),
                D3D11_SDK_VERSION,
                Some(&mut d3d_device),
                Some(&mut feature_level),
                Some(&mut d3d_device_context),
            )?;
        };

        match (d3d_device, d3d_device_context) {
            (Some(device), Some(context)) => Ok((device, context, feature_level)),
            _ => Err(Error::NullResource),
        }
    }

    fn pin_frame_latency(device: &ID3D11Device) -> bool {
        let Ok(dxgi_device) = device.cast::<IDXGIDevice1>() else {
            return false;
        };

        unsafe { dxgi_device.SetMaximumFrameLatency(1) }.is_ok()
    }

    fn protect_multithread(device: &ID3D11Device) -> bool {
        let Ok(multithread) = device.cast::<ID3D11Multithread>() else {
            return false;
        };

        let _ = unsafe { multithread.SetMultithreadProtected(true.into()) };
        unsafe { multithread.GetMultithreadProtected() }.as_bool()
    }

    #[must_use]
    #[inline]
    pub const fn device(&self) -> &ID3D11Device {
        &self.device
    }

    #[must_use]
    #[inline]
    pub const fn context(&self) -> &ID3D11DeviceContext {
        &self.context
    }

    #[must_use]
    #[inline]
    pub const fn capabilities(&self) -> Capabilities {
        self.capabilities
    }
}

/// Create an `IDirect3DDevice` from an `ID3D11Device` for the WinRT capture APIs.
pub fn create_direct3d_device(d3d_device: &ID3D11Device) -> Result<IDirect3DDevice, Error> {
    let dxgi_device: IDXGIDevice = d3d_device.cast()?;
    let inspectable = unsafe { CreateDirect3D11DeviceFromDXGIDevice(&dxgi_device)? };
    let device: IDirect3DDevice = inspectable.cast()?;

    Ok(device)
}
