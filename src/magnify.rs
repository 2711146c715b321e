//! The magnification transform and the geometry it is drawn with.
//!
//! The pixel shader in `shaders/magnify.hlsl` implements [`sample_uv`]; the
//! CPU version here is the reference both are checked against.
use bytemuck::{Pod, Zeroable};

/// Texture coordinate of the capture midpoint.
pub const CENTER: [f32; 2] = [0.5, 0.5];

/// Maps an output texture coordinate to the source coordinate it samples.
///
/// Returns `None` when the sample falls outside `[0, 1]²`; the shader emits
/// transparent black there without touching the texture.
#[must_use]
#[inline]
pub fn sample_uv(uv: [f32; 2], magnification: f32) -> Option<[f32; 2]> {
    let sample = [
        CENTER[0] + (uv[0] - CENTER[0]) / magnification,
        CENTER[1] + (uv[1] - CENTER[1]) / magnification,
    ];

    let inside = |v: f32| (0.0..=1.0).contains(&v);
    (inside(sample[0]) && inside(sample[1])).then_some(sample)
}

/// Vertex of the fullscreen quad, matching the `POSITION`/`TEXCOORD` input layout.
#[repr(C)]
#[derive(PartialEq, Clone, Copy, Debug, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub tex_coord: [f32; 2],
}

impl Vertex {
    const fn new(x: f32, y: f32, u: f32, v: f32) -> Self {
        Self { position: [x, y, 0.0], tex_coord: [u, v] }
    }
}

/// Two triangles covering clip space `[-1, 1]²`, texture space `[0, 1]²`
/// with v pointing down.
pub const QUAD: [Vertex; 6] = [
    Vertex::new(-1.0, 1.0, 0.0, 0.0),
    Vertex::new(1.0, -1.0, 1.0, 1.0),
    Vertex::new(-1.0, -1.0, 0.0, 1.0),
    Vertex::new(-1.0, 1.0, 0.0, 0.0),
    Vertex::new(1.0, 1.0, 1.0, 0.0),
    Vertex::new(1.0, -1.0, 1.0, 1.0),
];

/// Byte offset of [`Vertex::tex_coord`] for the input layout.
pub const TEX_COORD_OFFSET: u32 = 12;

/// Pixel shader constant buffer `b0`, padded to 16 bytes.
#[repr(C)]
#[derive(PartialEq, Clone, Copy, Debug, Pod, Zeroable)]
pub struct MagnifyConstants {
    pub magnification: f32,
    pub padding: [f32; 3],
}

impl MagnifyConstants {
    #[must_use]
    pub const fn new(magnification: f32) -> Self {
        Self { magnification, padding: [0.0; 3] }
    }
}
