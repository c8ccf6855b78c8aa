//! GPU resource manager
//!
//! Owns one [`SurfaceContext`] per output surface: the rendering context, the
//! linked stacked-alpha program and its shaders, the unit-quad vertex buffer,
//! the frame texture and the uniform locations. Creation and teardown are
//! paired; both are idempotent.

use std::collections::HashMap;

use common::{BackendError, GpuInitError, ShaderStage};

use crate::gpu::{
    BufferHandle, ContextAttributes, ContextHandle, FRAGMENT_SHADER, GpuBackend, ProgramHandle,
    QUAD_TRANSFORM, ShaderHandle, SurfaceId, TextureHandle, TextureParams, UNIT_QUAD,
    UniformLocation, UniformValue, VERTEX_SHADER, uniforms,
};

/// Uniform locations of the linked program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformLocations {
    pub matrix: UniformLocation,
    pub premultiplied_alpha: UniformLocation,
    pub enable_clip: UniformLocation,
    pub clip_ratio: UniformLocation,
}

/// Everything the GPU holds for one surface
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceContext {
    pub context: ContextHandle,
    pub vertex_shader: ShaderHandle,
    pub fragment_shader: ShaderHandle,
    pub program: ProgramHandle,
    pub vertex_buffer: BufferHandle,
    pub texture: TextureHandle,
    pub uniforms: UniformLocations,
    backing: (u32, u32),
    premultiplied_alpha: bool,
    clip_enabled: bool,
    clip_ratio: [f32; 2],
}

impl SurfaceContext {
    pub fn backing_size(&self) -> (u32, u32) {
        self.backing
    }

    pub fn premultiplied_alpha(&self) -> bool {
        self.premultiplied_alpha
    }

    pub fn clip_enabled(&self) -> bool {
        self.clip_enabled
    }

    pub fn clip_ratio(&self) -> [f32; 2] {
        self.clip_ratio
    }
}

/// Resources created so far during `acquire`, released in reverse on failure
struct Partial {
    context: ContextHandle,
    vertex_shader: Option<ShaderHandle>,
    fragment_shader: Option<ShaderHandle>,
    program: Option<ProgramHandle>,
    vertex_buffer: Option<BufferHandle>,
    texture: Option<TextureHandle>,
}

impl Partial {
    fn new(context: ContextHandle) -> Self {
        Self {
            context,
            vertex_shader: None,
            fragment_shader: None,
            program: None,
            vertex_buffer: None,
            texture: None,
        }
    }

    fn release<B: GpuBackend>(self, backend: &mut B) {
        let ctx = self.context;
        backend.use_program(ctx, None);
        backend.bind_vertex_buffer(ctx, None);
        backend.bind_texture(ctx, None);
        if let Some(program) = self.program {
            backend.delete_program(ctx, program);
        }
        if let Some(shader) = self.vertex_shader {
            backend.delete_shader(ctx, shader);
        }
        if let Some(shader) = self.fragment_shader {
            backend.delete_shader(ctx, shader);
        }
        if let Some(buffer) = self.vertex_buffer {
            backend.delete_buffer(ctx, buffer);
        }
        if let Some(texture) = self.texture {
            backend.delete_texture(ctx, texture);
        }
        backend.destroy_context(ctx);
    }
}

/// Owner of every surface context created through one backend
pub struct ResourceManager<B: GpuBackend> {
    backend: B,
    attributes: ContextAttributes,
    surfaces: HashMap<SurfaceId, SurfaceContext>,
}

impl<B: GpuBackend> ResourceManager<B> {
    pub fn new(backend: B) -> Self {
        Self::with_attributes(backend, ContextAttributes::default())
    }

    pub fn with_attributes(backend: B, attributes: ContextAttributes) -> Self {
        Self {
            backend,
            attributes,
            surfaces: HashMap::new(),
        }
    }

    /// Create the surface's context and program, or return the existing one.
    ///
    /// On failure every resource created before the failing step has been
    /// released by the time the error is returned.
    pub fn acquire(&mut self, surface: SurfaceId) -> Result<&SurfaceContext, GpuInitError> {
        if !self.surfaces.contains_key(&surface) {
            let ctx = self.create_surface_context(surface)?;
            log::info!(
                "Acquired {} context for surface {}",
                self.backend.name(),
                surface.0
            );
            self.surfaces.insert(surface, ctx);
        }

        self.surfaces
            .get(&surface)
            .ok_or_else(|| GpuInitError::Context(format!("surface {} vanished", surface.0)))
    }

    fn create_surface_context(&mut self, surface: SurfaceId) -> Result<SurfaceContext, GpuInitError> {
        let context = self
            .backend
            .create_context(surface, &self.attributes)
            .map_err(|e| GpuInitError::Context(e.0))?;

        let mut partial = Partial::new(context);
        match build_program(&mut self.backend, &mut partial) {
            Ok(ctx) => Ok(ctx),
            Err(e) => {
                log::error!("GPU setup for surface {} failed: {}", surface.0, e);
                partial.release(&mut self.backend);
                Err(e)
            }
        }
    }

    /// Tear down the surface's GPU state. No-op if it was never acquired or
    /// has already been released.
    pub fn release(&mut self, surface: SurfaceId) {
        let Some(ctx) = self.surfaces.remove(&surface) else {
            log::trace!("Release of surface {} without context, ignoring", surface.0);
            return;
        };

        Partial {
            context: ctx.context,
            vertex_shader: Some(ctx.vertex_shader),
            fragment_shader: Some(ctx.fragment_shader),
            program: Some(ctx.program),
            vertex_buffer: Some(ctx.vertex_buffer),
            texture: Some(ctx.texture),
        }
        .release(&mut self.backend);

        log::info!("Released GPU context for surface {}", surface.0);
    }

    pub fn is_acquired(&self, surface: SurfaceId) -> bool {
        self.surfaces.contains_key(&surface)
    }

    pub fn context(&self, surface: SurfaceId) -> Option<&SurfaceContext> {
        self.surfaces.get(&surface)
    }

    pub fn backing_size(&self, surface: SurfaceId) -> Option<(u32, u32)> {
        self.surfaces.get(&surface).map(SurfaceContext::backing_size)
    }

    /// Backend and surface context borrowed together for drawing
    pub fn parts_mut(&mut self, surface: SurfaceId) -> Option<(&mut B, &SurfaceContext)> {
        let ctx = self.surfaces.get(&surface)?;
        Some((&mut self.backend, ctx))
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Visible on the next draw
    pub fn set_premultiplied_alpha(&mut self, surface: SurfaceId, premultiplied: bool) {
        if let Some(ctx) = self.surfaces.get_mut(&surface) {
            ctx.premultiplied_alpha = premultiplied;
            set_uniform(
                &mut self.backend,
                ctx,
                ctx.uniforms.premultiplied_alpha,
                UniformValue::Float(if premultiplied { 1.0 } else { 0.0 }),
            );
        }
    }

    /// Visible on the next draw
    pub fn set_clip_enabled(&mut self, surface: SurfaceId, enabled: bool) {
        if let Some(ctx) = self.surfaces.get_mut(&surface) {
            ctx.clip_enabled = enabled;
            set_uniform(
                &mut self.backend,
                ctx,
                ctx.uniforms.enable_clip,
                UniformValue::Bool(enabled),
            );
        }
    }

    /// Visible on the next draw
    pub fn set_clip_ratio(&mut self, surface: SurfaceId, ratio: [f32; 2]) {
        if let Some(ctx) = self.surfaces.get_mut(&surface) {
            ctx.clip_ratio = ratio;
            set_uniform(
                &mut self.backend,
                ctx,
                ctx.uniforms.clip_ratio,
                UniformValue::Vec2(ratio),
            );
        }
    }

    /// Set the backing pixel size; returns whether anything changed
    pub fn resize_backing_buffer(
        &mut self,
        surface: SurfaceId,
        width: u32,
        height: u32,
    ) -> Result<bool, BackendError> {
        let ctx = self
            .surfaces
            .get_mut(&surface)
            .ok_or_else(|| not_acquired(surface))?;

        let size = (width.max(1), height.max(1));
        if ctx.backing == size {
            return Ok(false);
        }

        self.backend.set_backing_size(ctx.context, size.0, size.1)?;
        ctx.backing = size;
        log::debug!(
            "Surface {} backing buffer resized to {}x{}",
            surface.0,
            size.0,
            size.1
        );
        Ok(true)
    }

    /// Clear the whole backing buffer to transparent black
    pub fn clear(&mut self, surface: SurfaceId) -> Result<(), BackendError> {
        let ctx = self
            .surfaces
            .get(&surface)
            .ok_or_else(|| not_acquired(surface))?;

        let (width, height) = ctx.backing;
        self.backend.set_viewport(ctx.context, width, height);
        self.backend.clear(ctx.context, [0.0; 4])
    }

    /// Premultiplied RGBA8 contents of the backing buffer, top row first
    pub fn read_pixels(&mut self, surface: SurfaceId) -> Result<Vec<u8>, BackendError> {
        let ctx = self
            .surfaces
            .get(&surface)
            .ok_or_else(|| not_acquired(surface))?;
        self.backend.read_pixels(ctx.context)
    }
}

impl<B: GpuBackend> Drop for ResourceManager<B> {
    fn drop(&mut self) {
        let surfaces: Vec<SurfaceId> = self.surfaces.keys().copied().collect();
        for surface in surfaces {
            self.release(surface);
        }
    }
}

fn not_acquired(surface: SurfaceId) -> BackendError {
    BackendError(format!("Surface {} has no rendering context", surface.0))
}

fn set_uniform<B: GpuBackend>(
    backend: &mut B,
    ctx: &SurfaceContext,
    location: UniformLocation,
    value: UniformValue,
) {
    backend.use_program(ctx.context, Some(ctx.program));
    backend.set_uniform(ctx.context, location, value);
}

fn build_program<B: GpuBackend>(
    backend: &mut B,
    partial: &mut Partial,
) -> Result<SurfaceContext, GpuInitError> {
    let context = partial.context;

    let vertex_shader = backend
        .compile_shader(context, ShaderStage::Vertex, VERTEX_SHADER)
        .map_err(|e| GpuInitError::ShaderCompile {
            stage: ShaderStage::Vertex,
            log: e.0,
        })?;
    partial.vertex_shader = Some(vertex_shader);

    let fragment_shader = backend
        .compile_shader(context, ShaderStage::Fragment, FRAGMENT_SHADER)
        .map_err(|e| GpuInitError::ShaderCompile {
            stage: ShaderStage::Fragment,
            log: e.0,
        })?;
    partial.fragment_shader = Some(fragment_shader);

    let program = backend
        .link_program(context, vertex_shader, fragment_shader)
        .map_err(|e| GpuInitError::ProgramLink(e.0))?;
    partial.program = Some(program);

    let mut locate = |name: &str| {
        backend
            .uniform_location(context, program, name)
            .ok_or_else(|| GpuInitError::ProgramLink(format!("uniform `{}` is not active", name)))
    };
    let uniforms = UniformLocations {
        matrix: locate(uniforms::MATRIX)?,
        premultiplied_alpha: locate(uniforms::PREMULTIPLIED_ALPHA)?,
        enable_clip: locate(uniforms::ENABLE_CLIP)?,
        clip_ratio: locate(uniforms::CLIP_RATIO)?,
    };

    let vertex_buffer = backend
        .create_vertex_buffer(context, &UNIT_QUAD)
        .map_err(|e| GpuInitError::Allocation {
            resource: "vertex buffer",
            reason: e.0,
        })?;
    partial.vertex_buffer = Some(vertex_buffer);

    let texture = backend
        .create_texture(context, &TextureParams::STACKED_FRAME)
        .map_err(|e| GpuInitError::Allocation {
            resource: "texture",
            reason: e.0,
        })?;
    partial.texture = Some(texture);

    backend
        .set_backing_size(context, 1, 1)
        .map_err(|e| GpuInitError::Allocation {
            resource: "backing buffer",
            reason: e.0,
        })?;

    backend.use_program(context, Some(program));
    backend.bind_vertex_buffer(context, Some(vertex_buffer));
    backend.bind_texture(context, Some(texture));
    backend.set_uniform(context, uniforms.matrix, UniformValue::Mat3(QUAD_TRANSFORM));
    backend.set_uniform(context, uniforms.premultiplied_alpha, UniformValue::Float(0.0));
    backend.set_uniform(context, uniforms.enable_clip, UniformValue::Bool(false));
    backend.set_uniform(context, uniforms.clip_ratio, UniformValue::Vec2([0.0, 0.0]));

    Ok(SurfaceContext {
        context,
        vertex_shader,
        fragment_shader,
        program,
        vertex_buffer,
        texture,
        uniforms,
        backing: (1, 1),
        premultiplied_alpha: false,
        clip_enabled: false,
        clip_ratio: [0.0, 0.0],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::SoftwareBackend;
    use crate::gpu::software::FailPoint;

    const SURFACE: SurfaceId = SurfaceId(7);

    #[test]
    fn test_acquire_initializes_uniform_state() {
        let mut manager = ResourceManager::new(SoftwareBackend::new());
        let ctx = manager.acquire(SURFACE).unwrap();

        assert!(!ctx.premultiplied_alpha());
        assert!(!ctx.clip_enabled());
        assert_eq!(ctx.clip_ratio(), [0.0, 0.0]);
        assert_eq!(ctx.backing_size(), (1, 1));
    }

    #[test]
    fn test_acquire_is_idempotent() {
        let mut manager = ResourceManager::new(SoftwareBackend::new());
        let first = manager.acquire(SURFACE).unwrap().clone();
        let second = manager.acquire(SURFACE).unwrap().clone();

        assert_eq!(first, second);
        assert_eq!(manager.backend().stats().contexts_created, 1);
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut manager = ResourceManager::new(SoftwareBackend::new());
        manager.release(SURFACE);
        manager.acquire(SURFACE).unwrap();
        manager.release(SURFACE);
        manager.release(SURFACE);

        let stats = manager.backend().stats();
        assert_eq!(stats.created(), stats.deleted());
        assert_eq!(manager.backend().live_resources(), 0);
        assert!(!manager.is_acquired(SURFACE));
    }

    #[test]
    fn test_failed_acquire_leaves_nothing_behind() {
        for point in [
            FailPoint::CreateContext,
            FailPoint::CompileVertex,
            FailPoint::CompileFragment,
            FailPoint::LinkProgram,
            FailPoint::CreateBuffer,
            FailPoint::CreateTexture,
        ] {
            let mut backend = SoftwareBackend::new();
            backend.inject_failure(point);
            let mut manager = ResourceManager::new(backend);

            let err = manager.acquire(SURFACE).unwrap_err();
            match point {
                FailPoint::CreateContext => assert!(matches!(err, GpuInitError::Context(_))),
                FailPoint::CompileVertex => assert!(matches!(
                    err,
                    GpuInitError::ShaderCompile {
                        stage: ShaderStage::Vertex,
                        ..
                    }
                )),
                FailPoint::CompileFragment => assert!(matches!(
                    err,
                    GpuInitError::ShaderCompile {
                        stage: ShaderStage::Fragment,
                        ..
                    }
                )),
                FailPoint::LinkProgram => assert!(matches!(err, GpuInitError::ProgramLink(_))),
                FailPoint::CreateBuffer | FailPoint::CreateTexture => {
                    assert!(matches!(err, GpuInitError::Allocation { .. }))
                }
            }

            assert_eq!(manager.backend().live_resources(), 0, "{:?}", point);
            assert!(!manager.is_acquired(SURFACE));
        }
    }

    #[test]
    fn test_resize_backing_buffer_noop_when_unchanged() {
        let mut manager = ResourceManager::new(SoftwareBackend::new());
        manager.acquire(SURFACE).unwrap();

        assert!(manager.resize_backing_buffer(SURFACE, 300, 200).unwrap());
        assert!(!manager.resize_backing_buffer(SURFACE, 300, 200).unwrap());
        assert_eq!(manager.backing_size(SURFACE), Some((300, 200)));
    }

    #[test]
    fn test_clear_after_acquire_is_transparent_1x1() {
        let mut manager = ResourceManager::new(SoftwareBackend::new());
        manager.acquire(SURFACE).unwrap();
        manager.clear(SURFACE).unwrap();
        assert_eq!(manager.read_pixels(SURFACE).unwrap(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_setters_on_unknown_surface_are_ignored() {
        let mut manager = ResourceManager::new(SoftwareBackend::new());
        manager.set_premultiplied_alpha(SURFACE, true);
        manager.set_clip_enabled(SURFACE, true);
        manager.set_clip_ratio(SURFACE, [0.5, 0.0]);
        assert!(manager.resize_backing_buffer(SURFACE, 1, 1).is_err());
    }

    #[test]
    fn test_surfaces_are_independent() {
        let mut manager = ResourceManager::new(SoftwareBackend::new());
        manager.acquire(SurfaceId(1)).unwrap();
        manager.acquire(SurfaceId(2)).unwrap();
        assert_eq!(manager.backend().stats().contexts_created, 2);
        manager.release(SurfaceId(1));
        assert_eq!(manager.backend().stats().contexts_destroyed, 1);
        assert!(manager.is_acquired(SurfaceId(2)));
    }
}
