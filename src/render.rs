//! Direct3D 11 pipeline that draws the captured frame through the
//! magnification shader and presents it on the overlay swap chain.
//!
//! The pipeline is built in three steps (`Uninitialized` → `ShadersLoaded` →
//! `Ready`) and stays `Ready` until it is dropped. Every tick renders into an
//! off-screen target sized to the overlay client area, copies that target
//! into the back buffer and presents without waiting for vertical sync.
use std::{mem, slice};

use log::{debug, info, trace};
use windows::Win32::Foundation::{HWND, RECT};
use windows::Win32::Graphics::Direct3D::Fxc::{D3DCOMPILE_ENABLE_STRICTNESS, D3DCompile};
use windows::Win32::Graphics::Direct3D::{D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST, ID3DBlob};
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BIND_CONSTANT_BUFFER, D3D11_BIND_RENDER_TARGET, D3D11_BIND_VERTEX_BUFFER, D3D11_BUFFER_DESC,
    D3D11_COMPARISON_NEVER, D3D11_FILTER_MIN_MAG_MIP_LINEAR, D3D11_INPUT_ELEMENT_DESC, D3D11_INPUT_PER_VERTEX_DATA,
    D3D11_SAMPLER_DESC, D3D11_SUBRESOURCE_DATA, D3D11_TEXTURE_ADDRESS_CLAMP, D3D11_TEXTURE2D_DESC,
    D3D11_USAGE_DEFAULT, D3D11_VIEWPORT, ID3D11Buffer, ID3D11InputLayout, ID3D11PixelShader,
    ID3D11RenderTargetView, ID3D11SamplerState, ID3D11ShaderResourceView, ID3D11Texture2D, ID3D11VertexShader,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_ALPHA_MODE_IGNORE, DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_R32G32_FLOAT, DXGI_FORMAT_R32G32B32_FLOAT,
    DXGI_FORMAT_UNKNOWN, DXGI_SAMPLE_DESC,
};
use windows::Win32::Graphics::Dxgi::{
    DXGI_ERROR_DEVICE_REMOVED, DXGI_ERROR_DEVICE_RESET, DXGI_ERROR_WAS_STILL_DRAWING, DXGI_PRESENT_DO_NOT_WAIT,
    DXGI_STATUS_OCCLUDED, DXGI_SWAP_CHAIN_DESC1, DXGI_SWAP_CHAIN_FLAG, DXGI_SWAP_EFFECT, DXGI_SWAP_EFFECT_DISCARD,
    DXGI_SWAP_EFFECT_FLIP_DISCARD, DXGI_USAGE_RENDER_TARGET_OUTPUT, IDXGIDevice, IDXGIFactory2, IDXGISwapChain1,
};
use windows::Win32::UI::WindowsAndMessaging::GetClientRect;
use windows::core::{Interface, PCSTR, s};

use crate::capture::FrameTexture;
use crate::d3d11::{self, GpuDevice};
use crate::error::{Classify, ErrorKind};
use crate::fallback;
use crate::magnify::{MagnifyConstants, QUAD, TEX_COORD_OFFSET, Vertex};
use crate::pacer::{PresentStatus, Renderer};

const SHADER_SOURCE: &str = include_str!("shaders/magnify.hlsl");

/// Fully transparent black.
const CLEAR_COLOR: [f32; 4] = [0.0; 4];

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Failed to compile shader {entry_point}: {message}")]
    ShaderCompilation { entry_point: &'static str, message: String },
    #[error("Render pipeline is not ready")]
    NotReady,
    #[error("Direct3D device was removed: {0}")]
    DeviceRemoved(windows::core::Error),
    #[error("DirectX error: {0}")]
    DirectXError(#[from] d3d11::Error),
    #[error("Windows API error: {0}")]
    WindowsError(#[from] windows::core::Error),
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::ShaderCompilation { .. } | Self::NotReady => ErrorKind::FatalInit,
            Self::DeviceRemoved(_) | Self::WindowsError(_) => ErrorKind::TransientCapture,
            Self::DirectXError(e) => e.kind(),
        }
    }
}

/// Construction progress of the pipeline.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub enum PipelineState {
    Uninitialized,
    ShadersLoaded,
    Ready,
}

struct Shaders {
    vertex_shader: ID3D11VertexShader,
    pixel_shader: ID3D11PixelShader,
    input_layout: ID3D11InputLayout,
}

struct Resources {
    vertex_buffer: ID3D11Buffer,
    constant_buffer: ID3D11Buffer,
    sampler: ID3D11SamplerState,
}

/// Render target the quad is drawn into before it is copied to the back buffer.
struct OffscreenTarget {
    view: ID3D11RenderTargetView,
    texture: ID3D11Texture2D,
    width: u32,
    height: u32,
}

/// Swap chain presentation models, tried in declaration order.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
enum SwapModel {
    FlipDiscard,
    /// Bit-block transfer model for systems that refuse flip model on the
    /// layered overlay window.
    Discard,
}

impl SwapModel {
    const CHAIN: [Self; 2] = [Self::FlipDiscard, Self::Discard];

    const fn swap_effect(self) -> DXGI_SWAP_EFFECT {
        match self {
            Self::FlipDiscard => DXGI_SWAP_EFFECT_FLIP_DISCARD,
            Self::Discard => DXGI_SWAP_EFFECT_DISCARD,
        }
    }

    const fn buffer_count(self) -> u32 {
        match self {
            Self::FlipDiscard => 2,
            Self::Discard => 1,
        }
    }
}

/// The magnification render pipeline bound to the overlay window.
pub struct RenderPipeline {
    target: Option<OffscreenTarget>,
    resources: Option<Resources>,
    shaders: Option<Shaders>,
    device: GpuDevice,
    swap_chain: IDXGISwapChain1,
    window: HWND,
    state: PipelineState,
}

impl RenderPipeline {
    /// Creates the swap chain for `window` and builds every pipeline object.
    /// Any failure here is fatal.
    pub fn new(device: GpuDevice, window: HWND) -> Result<Self, Error> {
        let (width, height) = Self::client_size(window)?;
        let swap_chain = Self::create_swap_chain(&device, window, width.max(1), height.max(1))?;

        let mut pipeline = Self {
            target: None,
            resources: None,
            shaders: None,
            device,
            swap_chain,
            window,
            state: PipelineState::Uninitialized,
        };

        pipeline.load_shaders()?;
        pipeline.create_resources()?;
        pipeline.target = Some(pipeline.create_target(width.max(1), height.max(1))?);
        pipeline.state = PipelineState::Ready;

        info!("Render Pipeline Ready At {width}x{height}");

        Ok(pipeline)
    }

    fn client_size(window: HWND) -> Result<(u32, u32), Error> {
        let mut rect = RECT::default();
        unsafe { GetClientRect(window, &mut rect)? };

        Ok(((rect.right - rect.left).max(0) as u32, (rect.bottom - rect.top).max(0) as u32))
    }

    fn create_swap_chain(device: &GpuDevice, window: HWND, width: u32, height: u32) -> Result<IDXGISwapChain1, Error> {
        let dxgi_device = device.device().cast::<IDXGIDevice>()?;
        let dxgi_adapter = unsafe { dxgi_device.GetAdapter()? };
        let dxgi_factory: IDXGIFactory2 = unsafe { dxgi_adapter.GetParent()? };

        let created = fallback::first_success(SwapModel::CHAIN, |model| {
            let swap_chain_desc = DXGI_SWAP_CHAIN_DESC1 {
                Width: width,
                Height: height,
                Format: DXGI_FORMAT_B8G8R8A8_UNORM,
                SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
                BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
                BufferCount: model.buffer_count(),
                SwapEffect: model.swap_effect(),
                AlphaMode: DXGI_ALPHA_MODE_IGNORE,
                Flags: 0,
                ..Default::default()
            };

            unsafe { dxgi_factory.CreateSwapChainForHwnd(device.device(), window, &swap_chain_desc, None, None) }
        });

        match created {
            Ok((model, swap_chain)) => {
                trace!("Created {model:?} Swap Chain");
                Ok(swap_chain)
            }
            Err(exhausted) => match exhausted.into_last() {
                Some((_, e)) => Err(Error::WindowsError(e)),
                None => Err(Error::NotReady),
            },
        }
    }

    /// `Uninitialized` → `ShadersLoaded`.
    fn load_shaders(&mut self) -> Result<(), Error> {
        let device = self.device.device();

        let vs_blob = compile_shader("vs_main", s!("vs_main"), s!("vs_4_0"))?;
        let vs_bytecode = blob_bytes(&vs_blob);
        let mut vertex_shader = None;
        unsafe { device.CreateVertexShader(vs_bytecode, None, Some(&mut vertex_shader))? };

        let ps_blob = compile_shader("ps_main", s!("ps_main"), s!("ps_4_0"))?;
        let mut pixel_shader = None;
        unsafe { device.CreatePixelShader(blob_bytes(&ps_blob), None, Some(&mut pixel_shader))? };

        let input_elements = [
            D3D11_INPUT_ELEMENT_DESC {
                SemanticName: s!("POSITION"),
                SemanticIndex: 0,
                Format: DXGI_FORMAT_R32G32B32_FLOAT,
                InputSlot: 0,
                AlignedByteOffset: 0,
                InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            },
            D3D11_INPUT_ELEMENT_DESC {
                SemanticName: s!("TEXCOORD"),
                SemanticIndex: 0,
                Format: DXGI_FORMAT_R32G32_FLOAT,
                InputSlot: 0,
                AlignedByteOffset: TEX_COORD_OFFSET,
                InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            },
        ];
        let mut input_layout = None;
        unsafe { device.CreateInputLayout(&input_elements, vs_bytecode, Some(&mut input_layout))? };

        let (Some(vertex_shader), Some(pixel_shader), Some(input_layout)) = (vertex_shader, pixel_shader, input_layout)
        else {
            return Err(d3d11::Error::NullResource.into());
        };

        self.shaders = Some(Shaders { vertex_shader, pixel_shader, input_layout });
        self.state = PipelineState::ShadersLoaded;
        trace!("Render Pipeline Shaders Loaded");

        Ok(())
    }

    /// Quad geometry, constant buffer and sampler.
    fn create_resources(&mut self) -> Result<(), Error> {
        let device = self.device.device();

        let vertices: &[u8] = bytemuck::cast_slice(&QUAD);
        let vertex_data = D3D11_SUBRESOURCE_DATA { pSysMem: vertices.as_ptr().cast(), SysMemPitch: 0, SysMemSlicePitch: 0 };
        let vertex_desc = D3D11_BUFFER_DESC {
            ByteWidth: vertices.len() as u32,
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: D3D11_BIND_VERTEX_BUFFER.0 as u32,
            CPUAccessFlags: 0,
            MiscFlags: 0,
            StructureByteStride: 0,
        };
        let mut vertex_buffer = None;
        unsafe { device.CreateBuffer(&vertex_desc, Some(&vertex_data), Some(&mut vertex_buffer))? };

        let constants = MagnifyConstants::new(1.0);
        let constant_data = D3D11_SUBRESOURCE_DATA {
            pSysMem: bytemuck::bytes_of(&constants).as_ptr().cast(),
            SysMemPitch: 0,
            SysMemSlicePitch: 0,
        };
        let constant_desc = D3D11_BUFFER_DESC {
            ByteWidth: mem::size_of::<MagnifyConstants>() as u32,
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: D3D11_BIND_CONSTANT_BUFFER.0 as u32,
            CPUAccessFlags: 0,
            MiscFlags: 0,
            StructureByteStride: 0,
        };
        let mut constant_buffer = None;
        unsafe { device.CreateBuffer(&constant_desc, Some(&constant_data), Some(&mut constant_buffer))? };

        let sampler_desc = D3D11_SAMPLER_DESC {
            Filter: D3D11_FILTER_MIN_MAG_MIP_LINEAR,
            AddressU: D3D11_TEXTURE_ADDRESS_CLAMP,
            AddressV: D3D11_TEXTURE_ADDRESS_CLAMP,
            AddressW: D3D11_TEXTURE_ADDRESS_CLAMP,
            MipLODBias: 0.0,
            MaxAnisotropy: 1,
            ComparisonFunc: D3D11_COMPARISON_NEVER,
            BorderColor: CLEAR_COLOR,
            MinLOD: 0.0,
            MaxLOD: f32::MAX,
        };
        let mut sampler = None;
        unsafe { device.CreateSamplerState(&sampler_desc, Some(&mut sampler))? };

        let (Some(vertex_buffer), Some(constant_buffer), Some(sampler)) = (vertex_buffer, constant_buffer, sampler) else {
            return Err(d3d11::Error::NullResource.into());
        };

        self.resources = Some(Resources { vertex_buffer, constant_buffer, sampler });

        Ok(())
    }

    fn create_target(&self, width: u32, height: u32) -> Result<OffscreenTarget, Error> {
        let device = self.device.device();

        let texture_desc = D3D11_TEXTURE2D_DESC {
            Width: width,
            Height: height,
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT_B8G8R8A8_UNORM,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: D3D11_BIND_RENDER_TARGET.0 as u32,
            CPUAccessFlags: 0,
            MiscFlags: 0,
        };
        let mut texture = None;
        unsafe { device.CreateTexture2D(&texture_desc, None, Some(&mut texture))? };
        let texture = texture.ok_or(d3d11::Error::NullResource)?;

        let mut view = None;
        unsafe { device.CreateRenderTargetView(&texture, None, Some(&mut view))? };
        let view = view.ok_or(d3d11::Error::NullResource)?;

        Ok(OffscreenTarget { view, texture, width, height })
    }

    /// Resizes the swap chain and the off-screen target to the client area.
    /// Returns `false` while the window has no area to draw into.
    fn fit_to_window(&mut self) -> Result<bool, Error> {
        let (width, height) = Self::client_size(self.window)?;
        if width == 0 || height == 0 {
            return Ok(false);
        }

        if self.target.as_ref().is_some_and(|target| target.width == width && target.height == height) {
            return Ok(true);
        }

        debug!("Overlay Resized To {width}x{height} -> Recreating Render Target");

        // The old target must be gone before the swap chain buffers resize.
        self.target = None;
        unsafe {
            self.device.context().ClearState();
            self.swap_chain.ResizeBuffers(0, width, height, DXGI_FORMAT_UNKNOWN, DXGI_SWAP_CHAIN_FLAG(0))?;
        }
        self.target = Some(self.create_target(width, height)?);

        Ok(true)
    }

    /// Draws `frame` (or nothing, leaving the target transparent) at
    /// `magnification` and presents it.
    pub fn render_frame(&mut self, frame: Option<&FrameTexture>, magnification: f32) -> Result<PresentStatus, Error> {
        if self.state != PipelineState::Ready {
            return Err(Error::NotReady);
        }

        if !self.fit_to_window()? {
            return Ok(PresentStatus::Dropped);
        }

        let (Some(shaders), Some(resources), Some(target)) = (&self.shaders, &self.resources, &self.target) else {
            return Err(Error::NotReady);
        };
        let context = self.device.context();

        let viewport = D3D11_VIEWPORT {
            TopLeftX: 0.0,
            TopLeftY: 0.0,
            Width: target.width as f32,
            Height: target.height as f32,
            MinDepth: 0.0,
            MaxDepth: 1.0,
        };
        let stride = mem::size_of::<Vertex>() as u32;
        let offset = 0u32;
        let constants = MagnifyConstants::new(magnification);

        unsafe {
            context.OMSetRenderTargets(Some(&[Some(target.view.clone())]), None);
            context.ClearRenderTargetView(&target.view, &CLEAR_COLOR);

            if let Some(frame) = frame {
                context.RSSetViewports(Some(&[viewport]));

                context.IASetInputLayout(&shaders.input_layout);
                context.IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
                context.IASetVertexBuffers(
                    0,
                    1,
                    Some(&Some(resources.vertex_buffer.clone())),
                    Some(&stride),
                    Some(&offset),
                );

                context.UpdateSubresource(
                    &resources.constant_buffer,
                    0,
                    None,
                    bytemuck::bytes_of(&constants).as_ptr().cast(),
                    0,
                    0,
                );

                context.VSSetShader(&shaders.vertex_shader, None);
                context.PSSetShader(&shaders.pixel_shader, None);
                context.PSSetConstantBuffers(0, Some(&[Some(resources.constant_buffer.clone())]));
                context.PSSetSamplers(0, Some(&[Some(resources.sampler.clone())]));
                context.PSSetShaderResources(0, Some(&[Some(frame.view().clone())]));

                context.Draw(QUAD.len() as u32, 0);

                // Unbind so the capture copy never targets a bound resource.
                let unbound: [Option<ID3D11ShaderResourceView>; 1] = [None];
                context.PSSetShaderResources(0, Some(&unbound));
            }

            let back_buffer: ID3D11Texture2D = self.swap_chain.GetBuffer(0)?;
            context.CopyResource(&back_buffer, &target.texture);
        }

        self.present()
    }

    fn present(&self) -> Result<PresentStatus, Error> {
        let result = unsafe { self.swap_chain.Present(0, DXGI_PRESENT_DO_NOT_WAIT) };

        if result == DXGI_ERROR_WAS_STILL_DRAWING || result == DXGI_STATUS_OCCLUDED {
            return Ok(PresentStatus::Dropped);
        }

        if result == DXGI_ERROR_DEVICE_REMOVED || result == DXGI_ERROR_DEVICE_RESET {
            let reason = unsafe { self.device.device().GetDeviceRemovedReason() };
            return Err(Error::DeviceRemoved(reason.err().unwrap_or_else(|| result.into())));
        }

        result.ok()?;

        Ok(PresentStatus::Presented)
    }

    #[must_use]
    #[inline]
    pub const fn state(&self) -> PipelineState {
        self.state
    }
}

impl Renderer<FrameTexture> for RenderPipeline {
    type Error = Error;

    #[inline]
    fn render(&mut self, frame: Option<&FrameTexture>, magnification: f32) -> Result<PresentStatus, Error> {
        self.render_frame(frame, magnification)
    }
}

impl Drop for RenderPipeline {
    fn drop(&mut self) {
        trace!("Tearing Down Render Pipeline");

        unsafe {
            self.device.context().ClearState();
            self.device.context().Flush();
        }

        // Views and textures first, then shaders and buffers; the device and
        // swap chain go with the remaining fields.
        self.target = None;
        self.resources = None;
        self.shaders = None;
    }
}

fn compile_shader(entry_point: &'static str, entry: PCSTR, target: PCSTR) -> Result<ID3DBlob, Error> {
    let mut blob = None;
    let mut error_blob = None;

    let result = unsafe {
        D3DCompile(
            SHADER_SOURCE.as_ptr().cast(),
            SHADER_SOURCE.len(),
            s!("magnify.hlsl"),
            None,
            None,
            entry,
            target,
            D3DCOMPILE_ENABLE_STRICTNESS,
            0,
            &mut blob,
            Some(&mut error_blob),
        )
    };

    if let Err(e) = result {
        let message = match &error_blob {
            Some(error_blob) => String::from_utf8_lossy(blob_bytes(error_blob)).trim_end_matches('\0').trim().to_string(),
            None => e.to_string(),
        };
        return Err(Error::ShaderCompilation { entry_point, message });
    }

    blob.ok_or(Error::ShaderCompilation { entry_point, message: "no bytecode produced".to_string() })
}

fn blob_bytes(blob: &ID3DBlob) -> &[u8] {
    unsafe { slice::from_raw_parts(blob.GetBufferPointer().cast::<u8>(), blob.GetBufferSize()) }
}
