//! Handle-based GPU API used by the resource manager and the compositor.
//!
//! The surface of the trait mirrors a GL-style immediate API: resources are
//! created against a context and addressed by opaque handles, uniforms are set
//! on the program currently in use, and draws consume whatever is bound.

use common::{BackendError, ShaderStage};

/// Identifies one output surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

/// Location of a uniform inside a linked program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PowerPreference {
    #[default]
    LowPower,
    HighPerformance,
}

/// Backend requested by the user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BackendChoice {
    /// GPU when an adapter exists, CPU otherwise
    #[default]
    Auto,
    Gpu,
    Cpu,
}

/// Creation hints for a rendering context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextAttributes {
    pub antialias: bool,
    pub depth: bool,
    pub premultiplied_alpha: bool,
    pub power_preference: PowerPreference,
}

impl Default for ContextAttributes {
    fn default() -> Self {
        Self {
            antialias: false,
            depth: false,
            premultiplied_alpha: true,
            power_preference: PowerPreference::LowPower,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureWrap {
    ClampToEdge,
    Repeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFilter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureParams {
    pub wrap: TextureWrap,
    pub filter: TextureFilter,
    pub mipmaps: bool,
}

impl TextureParams {
    /// Edge-clamped, nearest-neighbour, no mipmaps.
    ///
    /// Linear filtering or mip levels would bleed the color half into the
    /// alpha half across the seam.
    pub const STACKED_FRAME: Self = Self {
        wrap: TextureWrap::ClampToEdge,
        filter: TextureFilter::Nearest,
        mipmaps: false,
    };
}

/// Value written to a uniform location
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Bool(bool),
    Vec2([f32; 2]),
    /// Column-major 3x3 matrix
    Mat3([f32; 9]),
}

/// Borrowed RGBA8 frame, rows top to bottom, tightly packed
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub width: u32,
    pub height: u32,
    pub pixels: &'a [u8],
}

impl<'a> FrameView<'a> {
    /// Wrap pixels, checking the buffer matches the dimensions
    pub fn new(width: u32, height: u32, pixels: &'a [u8]) -> Result<Self, BackendError> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(BackendError(format!(
                "Invalid frame data size: expected {} bytes ({}x{} RGBA), got {} bytes",
                expected,
                width,
                height,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// RGBA of one texel
    pub fn texel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.pixels[offset],
            self.pixels[offset + 1],
            self.pixels[offset + 2],
            self.pixels[offset + 3],
        ]
    }
}

/// GPU operations needed to run the stacked-alpha program on one surface.
///
/// Every `create_*`/`compile_*`/`link_*` has a matching `delete_*`; deleting
/// an unknown handle is a no-op.
pub trait GpuBackend {
    fn name(&self) -> &'static str;

    fn create_context(
        &mut self,
        surface: SurfaceId,
        attributes: &ContextAttributes,
    ) -> Result<ContextHandle, BackendError>;
    fn destroy_context(&mut self, context: ContextHandle);

    /// Compile one stage; the error carries the compiler log
    fn compile_shader(
        &mut self,
        context: ContextHandle,
        stage: ShaderStage,
        source: &str,
    ) -> Result<ShaderHandle, BackendError>;
    fn delete_shader(&mut self, context: ContextHandle, shader: ShaderHandle);

    /// Link a vertex and a fragment shader; the error carries the linker log
    fn link_program(
        &mut self,
        context: ContextHandle,
        vertex: ShaderHandle,
        fragment: ShaderHandle,
    ) -> Result<ProgramHandle, BackendError>;
    fn use_program(&mut self, context: ContextHandle, program: Option<ProgramHandle>);
    fn delete_program(&mut self, context: ContextHandle, program: ProgramHandle);

    fn uniform_location(
        &mut self,
        context: ContextHandle,
        program: ProgramHandle,
        name: &str,
    ) -> Option<UniformLocation>;
    /// Set a uniform of the program in use
    fn set_uniform(&mut self, context: ContextHandle, location: UniformLocation, value: UniformValue);

    /// Upload vertex positions as tightly packed `vec2<f32>`
    fn create_vertex_buffer(
        &mut self,
        context: ContextHandle,
        data: &[f32],
    ) -> Result<BufferHandle, BackendError>;
    fn bind_vertex_buffer(&mut self, context: ContextHandle, buffer: Option<BufferHandle>);
    fn delete_buffer(&mut self, context: ContextHandle, buffer: BufferHandle);

    fn create_texture(
        &mut self,
        context: ContextHandle,
        params: &TextureParams,
    ) -> Result<TextureHandle, BackendError>;
    fn bind_texture(&mut self, context: ContextHandle, texture: Option<TextureHandle>);
    fn delete_texture(&mut self, context: ContextHandle, texture: TextureHandle);

    /// Replace the contents of the bound texture
    fn upload_frame(&mut self, context: ContextHandle, frame: &FrameView<'_>)
    -> Result<(), BackendError>;

    /// Reallocate the surface's backing buffer
    fn set_backing_size(
        &mut self,
        context: ContextHandle,
        width: u32,
        height: u32,
    ) -> Result<(), BackendError>;
    fn set_viewport(&mut self, context: ContextHandle, width: u32, height: u32);
    fn clear(&mut self, context: ContextHandle, color: [f32; 4]) -> Result<(), BackendError>;
    /// Draw `vertex_count` vertices of the bound buffer as a triangle list
    fn draw_triangles(&mut self, context: ContextHandle, vertex_count: u32)
    -> Result<(), BackendError>;

    /// Read the backing buffer back as RGBA8, top row first
    fn read_pixels(&mut self, context: ContextHandle) -> Result<Vec<u8>, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_view_rejects_short_buffer() {
        let pixels = vec![0u8; 15];
        let err = FrameView::new(2, 2, &pixels).unwrap_err();
        assert!(err.to_string().contains("expected 16 bytes"));
    }

    #[test]
    fn test_frame_view_texel() {
        let pixels: Vec<u8> = (0..16).collect();
        let frame = FrameView::new(2, 2, &pixels).unwrap();
        assert_eq!(frame.texel(1, 0), [4, 5, 6, 7]);
        assert_eq!(frame.texel(0, 1), [8, 9, 10, 11]);
    }

    #[test]
    fn test_default_context_attributes() {
        let attributes = ContextAttributes::default();
        assert!(!attributes.antialias);
        assert!(!attributes.depth);
        assert!(attributes.premultiplied_alpha);
        assert_eq!(attributes.power_preference, PowerPreference::LowPower);
    }
}
