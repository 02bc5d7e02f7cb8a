// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The native driver capability.

A [Graphics] implementation wraps one native API (OpenGL, Direct3D 12, Metal,
or anything wgpu reaches).  Exactly one implementation is chosen when an
[Engine](crate::images::Engine) is created; backends are never mixed.

Everything in this module is deliberately low level: the driver sees native
ids, raw vertex floats and premultiplied RGBA8 bytes.  Restoration, staleness
and batching live above it.
*/

use crate::coordinates::Region;

/// Number of `f32`s per vertex.
///
/// The vertex floats are:
///
/// | index | meaning |
/// |-------|---------|
/// | 0 | destination x in pixels |
/// | 1 | destination y in pixels |
/// | 2 | source x in texels |
/// | 3 | source y in texels |
/// | 4 | color r, 0.0..=1.0 |
/// | 5 | color g |
/// | 6 | color b |
/// | 7 | color a |
pub const VERTEX_FLOAT_COUNT: usize = 8;

/// Number of source images a single draw may sample.
pub const SHADER_SRC_IMAGE_COUNT: usize = 4;

/// Identifies an image owned by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeImageId(pub u32);

/// Identifies a shader program owned by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeShaderId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SourceColor,
    OneMinusSourceColor,
    SourceAlpha,
    OneMinusSourceAlpha,
    DestinationColor,
    OneMinusDestinationColor,
    DestinationAlpha,
    OneMinusDestinationAlpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendOperation {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

/**
How a fragment is combined with the destination.

Colors are premultiplied.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Blend {
    pub src_rgb: BlendFactor,
    pub dst_rgb: BlendFactor,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
    pub op_rgb: BlendOperation,
    pub op_alpha: BlendOperation,
}

impl Blend {
    const fn uniform(src: BlendFactor, dst: BlendFactor) -> Self {
        Blend {
            src_rgb: src,
            dst_rgb: dst,
            src_alpha: src,
            dst_alpha: dst,
            op_rgb: BlendOperation::Add,
            op_alpha: BlendOperation::Add,
        }
    }

    /// Replaces the destination with the fragment.
    pub const COPY: Blend = Blend::uniform(BlendFactor::One, BlendFactor::Zero);
    /// Replaces the destination with transparent black regardless of the fragment.
    pub const CLEAR: Blend = Blend::uniform(BlendFactor::Zero, BlendFactor::Zero);
    /// Porter-Duff source-over for premultiplied colors.
    pub const SOURCE_OVER: Blend =
        Blend::uniform(BlendFactor::One, BlendFactor::OneMinusSourceAlpha);
}

/// Which covered pixels a draw affects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FillRule {
    /// Every triangle is drawn as-is.
    #[default]
    FillAll,
    /// Pixels with a non-zero winding number are drawn, once.
    NonZero,
    /// Pixels with an odd winding number are drawn, once.
    EvenOdd,
}

/// Shader programs every backend provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BuiltinShader {
    /// Writes transparent black.  Paired with [Blend::CLEAR].
    Clear,
    /// Samples source 0 with nearest filtering, multiplied by the vertex color.
    Nearest,
    /// Samples source 0 with bilinear filtering, multiplied by the vertex color.
    Linear,
}

/**
What a native shader is built from.

Shader compilation itself is the backend's business; a backend that cannot
run a source reports [Error::Unsupported].
*/
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ShaderSource {
    Builtin(BuiltinShader),
    /// A WGSL fragment stage with entry point `fs_main`.  The backend supplies
    /// the vertex stage and the bindings described in `imp::wgpu`.
    Wgsl(String),
}

/// Pixels to upload into one region of an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritePixelsArgs {
    /// Premultiplied RGBA8, exactly `region.byte_len()` bytes.
    pub pixels: Vec<u8>,
    pub region: Region,
}

/// A destination for pixels read back from an image.
#[derive(Debug)]
pub struct PixelsArgs<'a> {
    /// Receives premultiplied RGBA8, exactly `region.byte_len()` bytes.
    pub pixels: &'a mut [u8],
    pub region: Region,
}

/// One `DrawTriangles` submission in native terms.
#[derive(Debug, Clone, Copy)]
pub struct DrawTrianglesArgs<'a> {
    pub dst: NativeImageId,
    pub srcs: [Option<NativeImageId>; SHADER_SRC_IMAGE_COUNT],
    pub src_regions: [Region; SHADER_SRC_IMAGE_COUNT],
    pub shader: NativeShaderId,
    pub vertices: &'a [f32],
    pub indices: &'a [u32],
    pub blend: Blend,
    pub dst_region: Region,
    pub uniforms: &'a [u32],
    pub fill_rule: FillRule,
}

/**
Recoverable failures reported by a driver.

These are returned to the caller unchanged; nothing in this crate retries
or reinterprets them.
*/
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("The graphics device was lost")]
    DeviceLost,
    #[error("No such native image {0:?}")]
    NoSuchImage(NativeImageId),
    #[error("No such native shader {0:?}")]
    NoSuchShader(NativeShaderId),
    #[error("Unsupported by this backend: {0}")]
    Unsupported(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Backend error: {0}")]
    Backend(String),
}

/**
The per-backend native capability.

Calls arrive from a single rendering thread, in the order the command queue
recorded them.
*/
pub trait Graphics {
    /// Prepares device state.  Called exactly once, before any image exists.
    fn initialize(&mut self) -> Result<(), Error>;

    /// Reinitializes device state after the device was lost.
    ///
    /// Every native image and shader created before is gone afterwards.
    fn reset(&mut self) -> Result<(), Error>;

    /// Whether this backend can lose its resources, requiring images to keep history.
    fn needs_restoring(&self) -> bool;

    /// Largest width or height of an image.
    fn max_image_size(&self) -> u32;

    /// Starts a batch of submissions.
    fn begin(&mut self) -> Result<(), Error>;

    /// Ends a batch; `present` is set at the end of a frame.
    fn end(&mut self, present: bool) -> Result<(), Error>;

    /// Creates an image whose contents are undefined.
    fn new_image(&mut self, width: u32, height: u32) -> Result<NativeImageId, Error>;

    /// Creates the image backing the display.
    fn new_screen_framebuffer_image(&mut self, width: u32, height: u32) -> Result<NativeImageId, Error>;

    fn dispose_image(&mut self, id: NativeImageId);

    fn write_pixels(&mut self, id: NativeImageId, args: &[WritePixelsArgs]) -> Result<(), Error>;

    /// Reads pixels back.  Synchronous; may stall until the GPU catches up.
    fn read_pixels(&mut self, id: NativeImageId, args: &mut [PixelsArgs<'_>]) -> Result<(), Error>;

    fn new_shader(&mut self, source: &ShaderSource) -> Result<NativeShaderId, Error>;

    fn dispose_shader(&mut self, id: NativeShaderId);

    fn draw_triangles(&mut self, args: &DrawTrianglesArgs<'_>) -> Result<(), Error>;
}
