//! CPU backend
//!
//! Executes the stacked-alpha program natively: vertices are transformed by
//! the program's matrix, triangles are rasterized at pixel centers and every
//! covered pixel runs [`recombine`]. Rows are shaded in parallel with rayon.
//!
//! Besides being the fallback when no GPU adapter exists, the backend keeps
//! creation/deletion counters so resource parity can be asserted in tests.

use rayon::prelude::*;
use std::collections::HashMap;

use common::{BackendError, ShaderStage};

use super::backend::{
    BufferHandle, ContextAttributes, ContextHandle, FrameView, GpuBackend, ProgramHandle,
    ShaderHandle, SurfaceId, TextureHandle, TextureParams, UniformLocation, UniformValue,
};
use super::{entry_point, uniforms};
use crate::compositor::{RecombineUniforms, recombine, to_rgba8};

/// Create/delete counters per resource kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceStats {
    pub contexts_created: u64,
    pub contexts_destroyed: u64,
    pub shaders_created: u64,
    pub shaders_deleted: u64,
    pub programs_created: u64,
    pub programs_deleted: u64,
    pub buffers_created: u64,
    pub buffers_deleted: u64,
    pub textures_created: u64,
    pub textures_deleted: u64,
    pub draws: u64,
    pub clears: u64,
    pub uploads: u64,
}

impl ResourceStats {
    pub fn created(&self) -> u64 {
        self.contexts_created
            + self.shaders_created
            + self.programs_created
            + self.buffers_created
            + self.textures_created
    }

    pub fn deleted(&self) -> u64 {
        self.contexts_destroyed
            + self.shaders_deleted
            + self.programs_deleted
            + self.buffers_deleted
            + self.textures_deleted
    }
}

/// Step at which an injected failure fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    CreateContext,
    CompileVertex,
    CompileFragment,
    LinkProgram,
    CreateBuffer,
    CreateTexture,
}

/// Uniform table of a linked program; locations index into it
const UNIFORM_NAMES: [&str; 4] = [
    uniforms::MATRIX,
    uniforms::CLIP_RATIO,
    uniforms::PREMULTIPLIED_ALPHA,
    uniforms::ENABLE_CLIP,
];

#[derive(Debug, Clone, Copy)]
struct ProgramState {
    matrix: [f32; 9],
    shading: RecombineUniforms,
}

impl Default for ProgramState {
    fn default() -> Self {
        Self {
            matrix: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            shading: RecombineUniforms::default(),
        }
    }
}

struct SoftTexture {
    _params: TextureParams,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

struct SoftContext {
    surface: SurfaceId,
    shaders: HashMap<ShaderHandle, ShaderStage>,
    programs: HashMap<ProgramHandle, ProgramState>,
    buffers: HashMap<BufferHandle, Vec<f32>>,
    textures: HashMap<TextureHandle, SoftTexture>,
    current_program: Option<ProgramHandle>,
    bound_buffer: Option<BufferHandle>,
    bound_texture: Option<TextureHandle>,
    width: u32,
    height: u32,
    viewport: (u32, u32),
    pixels: Vec<u8>,
}

impl SoftContext {
    fn new(surface: SurfaceId) -> Self {
        Self {
            surface,
            shaders: HashMap::new(),
            programs: HashMap::new(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            current_program: None,
            bound_buffer: None,
            bound_texture: None,
            width: 1,
            height: 1,
            viewport: (1, 1),
            pixels: vec![0; 4],
        }
    }

    fn live_resources(&self) -> usize {
        self.shaders.len() + self.programs.len() + self.buffers.len() + self.textures.len()
    }
}

/// Software rasterizer implementing [`GpuBackend`]
#[derive(Default)]
pub struct SoftwareBackend {
    next_handle: u64,
    contexts: HashMap<ContextHandle, SoftContext>,
    stats: ResourceStats,
    leaked: usize,
    failure: Option<FailPoint>,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call reaching `point` fail
    pub fn inject_failure(&mut self, point: FailPoint) {
        self.failure = Some(point);
    }

    pub fn stats(&self) -> ResourceStats {
        self.stats
    }

    /// Resources currently alive, including any orphaned by a destroyed context
    pub fn live_resources(&self) -> usize {
        self.contexts.len()
            + self
                .contexts
                .values()
                .map(SoftContext::live_resources)
                .sum::<usize>()
            + self.leaked
    }

    fn next(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn take_failure(&mut self, point: FailPoint) -> Result<(), BackendError> {
        if self.failure == Some(point) {
            self.failure = None;
            return Err(BackendError(format!("injected failure at {:?}", point)));
        }
        Ok(())
    }

    fn context_mut(&mut self, context: ContextHandle) -> Result<&mut SoftContext, BackendError> {
        self.contexts
            .get_mut(&context)
            .ok_or_else(|| BackendError(format!("Unknown context {}", context.0)))
    }
}

impl GpuBackend for SoftwareBackend {
    fn name(&self) -> &'static str {
        "software"
    }

    fn create_context(
        &mut self,
        surface: SurfaceId,
        attributes: &ContextAttributes,
    ) -> Result<ContextHandle, BackendError> {
        self.take_failure(FailPoint::CreateContext)?;

        let handle = ContextHandle(self.next());
        self.contexts.insert(handle, SoftContext::new(surface));
        self.stats.contexts_created += 1;

        log::debug!(
            "Software context {} created for surface {} ({:?})",
            handle.0,
            surface.0,
            attributes
        );
        Ok(handle)
    }

    fn destroy_context(&mut self, context: ContextHandle) {
        if let Some(ctx) = self.contexts.remove(&context) {
            let orphaned = ctx.live_resources();
            if orphaned > 0 {
                log::warn!(
                    "Context for surface {} destroyed with {} live resources",
                    ctx.surface.0,
                    orphaned
                );
                self.leaked += orphaned;
            }
            self.stats.contexts_destroyed += 1;
        }
    }

    fn compile_shader(
        &mut self,
        context: ContextHandle,
        stage: ShaderStage,
        source: &str,
    ) -> Result<ShaderHandle, BackendError> {
        self.take_failure(match stage {
            ShaderStage::Vertex => FailPoint::CompileVertex,
            ShaderStage::Fragment => FailPoint::CompileFragment,
        })?;

        let entry = entry_point(stage);
        let attribute = match stage {
            ShaderStage::Vertex => "@vertex",
            ShaderStage::Fragment => "@fragment",
        };
        if !source.contains(attribute) || !source.contains(&format!("fn {}", entry)) {
            return Err(BackendError(format!(
                "no {} entry point `{}` in shader source",
                attribute, entry
            )));
        }

        let handle = ShaderHandle(self.next());
        self.context_mut(context)?.shaders.insert(handle, stage);
        self.stats.shaders_created += 1;
        Ok(handle)
    }

    fn delete_shader(&mut self, context: ContextHandle, shader: ShaderHandle) {
        if let Some(ctx) = self.contexts.get_mut(&context)
            && ctx.shaders.remove(&shader).is_some()
        {
            self.stats.shaders_deleted += 1;
        }
    }

    fn link_program(
        &mut self,
        context: ContextHandle,
        vertex: ShaderHandle,
        fragment: ShaderHandle,
    ) -> Result<ProgramHandle, BackendError> {
        self.take_failure(FailPoint::LinkProgram)?;

        let handle = ProgramHandle(self.next());
        let ctx = self.context_mut(context)?;
        match (ctx.shaders.get(&vertex), ctx.shaders.get(&fragment)) {
            (Some(ShaderStage::Vertex), Some(ShaderStage::Fragment)) => {}
            (vs, fs) => {
                return Err(BackendError(format!(
                    "cannot link vertex={:?} fragment={:?}",
                    vs, fs
                )));
            }
        }

        ctx.programs.insert(handle, ProgramState::default());
        self.stats.programs_created += 1;
        Ok(handle)
    }

    fn use_program(&mut self, context: ContextHandle, program: Option<ProgramHandle>) {
        if let Some(ctx) = self.contexts.get_mut(&context) {
            ctx.current_program = program.filter(|p| ctx.programs.contains_key(p));
        }
    }

    fn delete_program(&mut self, context: ContextHandle, program: ProgramHandle) {
        if let Some(ctx) = self.contexts.get_mut(&context)
            && ctx.programs.remove(&program).is_some()
        {
            if ctx.current_program == Some(program) {
                ctx.current_program = None;
            }
            self.stats.programs_deleted += 1;
        }
    }

    fn uniform_location(
        &mut self,
        context: ContextHandle,
        program: ProgramHandle,
        name: &str,
    ) -> Option<UniformLocation> {
        let ctx = self.contexts.get(&context)?;
        if !ctx.programs.contains_key(&program) {
            return None;
        }
        UNIFORM_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|index| UniformLocation(index as u32))
    }

    fn set_uniform(&mut self, context: ContextHandle, location: UniformLocation, value: UniformValue) {
        let Some(ctx) = self.contexts.get_mut(&context) else {
            return;
        };
        let Some(state) = ctx
            .current_program
            .and_then(|program| ctx.programs.get_mut(&program))
        else {
            log::warn!("set_uniform without a program in use");
            return;
        };

        match (location.0, value) {
            (0, UniformValue::Mat3(matrix)) => state.matrix = matrix,
            (1, UniformValue::Vec2(ratio)) => state.shading.clip_ratio = ratio,
            (2, UniformValue::Float(flag)) => state.shading.premultiplied_alpha = flag,
            (3, UniformValue::Bool(enabled)) => state.shading.enable_clip = enabled,
            (index, value) => {
                log::warn!("Uniform {} cannot hold {:?}", index, value);
            }
        }
    }

    fn create_vertex_buffer(
        &mut self,
        context: ContextHandle,
        data: &[f32],
    ) -> Result<BufferHandle, BackendError> {
        self.take_failure(FailPoint::CreateBuffer)?;

        let handle = BufferHandle(self.next());
        self.context_mut(context)?
            .buffers
            .insert(handle, data.to_vec());
        self.stats.buffers_created += 1;
        Ok(handle)
    }

    fn bind_vertex_buffer(&mut self, context: ContextHandle, buffer: Option<BufferHandle>) {
        if let Some(ctx) = self.contexts.get_mut(&context) {
            ctx.bound_buffer = buffer;
        }
    }

    fn delete_buffer(&mut self, context: ContextHandle, buffer: BufferHandle) {
        if let Some(ctx) = self.contexts.get_mut(&context)
            && ctx.buffers.remove(&buffer).is_some()
        {
            if ctx.bound_buffer == Some(buffer) {
                ctx.bound_buffer = None;
            }
            self.stats.buffers_deleted += 1;
        }
    }

    fn create_texture(
        &mut self,
        context: ContextHandle,
        params: &TextureParams,
    ) -> Result<TextureHandle, BackendError> {
        self.take_failure(FailPoint::CreateTexture)?;

        let handle = TextureHandle(self.next());
        self.context_mut(context)?.textures.insert(
            handle,
            SoftTexture {
                _params: *params,
                width: 0,
                height: 0,
                pixels: Vec::new(),
            },
        );
        self.stats.textures_created += 1;
        Ok(handle)
    }

    fn bind_texture(&mut self, context: ContextHandle, texture: Option<TextureHandle>) {
        if let Some(ctx) = self.contexts.get_mut(&context) {
            ctx.bound_texture = texture;
        }
    }

    fn delete_texture(&mut self, context: ContextHandle, texture: TextureHandle) {
        if let Some(ctx) = self.contexts.get_mut(&context)
            && ctx.textures.remove(&texture).is_some()
        {
            if ctx.bound_texture == Some(texture) {
                ctx.bound_texture = None;
            }
            self.stats.textures_deleted += 1;
        }
    }

    fn upload_frame(
        &mut self,
        context: ContextHandle,
        frame: &FrameView<'_>,
    ) -> Result<(), BackendError> {
        let ctx = self.context_mut(context)?;
        let texture = ctx
            .bound_texture
            .and_then(|handle| ctx.textures.get_mut(&handle))
            .ok_or_else(|| BackendError::new("upload_frame without a bound texture"))?;

        texture.width = frame.width;
        texture.height = frame.height;
        texture.pixels.clear();
        texture.pixels.extend_from_slice(frame.pixels);
        self.stats.uploads += 1;
        Ok(())
    }

    fn set_backing_size(
        &mut self,
        context: ContextHandle,
        width: u32,
        height: u32,
    ) -> Result<(), BackendError> {
        let ctx = self.context_mut(context)?;
        ctx.width = width.max(1);
        ctx.height = height.max(1);
        // Resizing discards the previous contents
        ctx.pixels = vec![0; ctx.width as usize * ctx.height as usize * 4];
        Ok(())
    }

    fn set_viewport(&mut self, context: ContextHandle, width: u32, height: u32) {
        if let Some(ctx) = self.contexts.get_mut(&context) {
            ctx.viewport = (width, height);
        }
    }

    fn clear(&mut self, context: ContextHandle, color: [f32; 4]) -> Result<(), BackendError> {
        let ctx = self.context_mut(context)?;
        let rgba = to_rgba8(color);
        for pixel in ctx.pixels.chunks_exact_mut(4) {
            pixel.copy_from_slice(&rgba);
        }
        self.stats.clears += 1;
        Ok(())
    }

    fn draw_triangles(
        &mut self,
        context: ContextHandle,
        vertex_count: u32,
    ) -> Result<(), BackendError> {
        let ctx = self.context_mut(context)?;
        rasterize(ctx, vertex_count)?;
        self.stats.draws += 1;
        Ok(())
    }

    fn read_pixels(&mut self, context: ContextHandle) -> Result<Vec<u8>, BackendError> {
        Ok(self.context_mut(context)?.pixels.clone())
    }
}

#[derive(Debug, Clone, Copy)]
struct Vertex {
    /// Window position in pixels
    x: f32,
    y: f32,
    /// Interpolated attribute
    u: f32,
    v: f32,
}

fn edge(a: &Vertex, b: &Vertex, px: f32, py: f32) -> f32 {
    (b.x - a.x) * (py - a.y) - (b.y - a.y) * (px - a.x)
}

fn rasterize(ctx: &mut SoftContext, vertex_count: u32) -> Result<(), BackendError> {
    let SoftContext {
        programs,
        buffers,
        textures,
        current_program,
        bound_buffer,
        bound_texture,
        width,
        height,
        viewport,
        pixels,
        ..
    } = ctx;

    let program = current_program
        .and_then(|handle| programs.get(&handle))
        .ok_or_else(|| BackendError::new("draw without a program in use"))?;
    let positions = bound_buffer
        .and_then(|handle| buffers.get(&handle))
        .ok_or_else(|| BackendError::new("draw without a bound vertex buffer"))?;
    let texture = bound_texture
        .and_then(|handle| textures.get(&handle))
        .ok_or_else(|| BackendError::new("draw without a bound texture"))?;
    if texture.pixels.is_empty() {
        return Err(BackendError::new("draw with an empty texture"));
    }
    if positions.len() < vertex_count as usize * 2 {
        return Err(BackendError(format!(
            "draw of {} vertices from a buffer holding {}",
            vertex_count,
            positions.len() / 2
        )));
    }

    let frame = FrameView::new(texture.width, texture.height, &texture.pixels)?;
    let (view_w, view_h) = (viewport.0.min(*width), viewport.1.min(*height));
    let m = program.matrix;

    // Vertex stage: clip = M * (pos, 1), then viewport transform
    let vertices: Vec<Vertex> = positions
        .chunks_exact(2)
        .take(vertex_count as usize)
        .map(|p| {
            let clip_x = m[0] * p[0] + m[3] * p[1] + m[6];
            let clip_y = m[1] * p[0] + m[4] * p[1] + m[7];
            Vertex {
                x: (clip_x + 1.0) * 0.5 * view_w as f32,
                y: (1.0 - clip_y) * 0.5 * view_h as f32,
                u: p[0],
                v: p[1],
            }
        })
        .collect();

    let triangles: Vec<[Vertex; 3]> = vertices
        .chunks_exact(3)
        .filter_map(|t| {
            let area = edge(&t[0], &t[1], t[2].x, t[2].y);
            (area != 0.0).then_some([t[0], t[1], t[2]])
        })
        .collect();

    let shading = program.shading;
    let row_bytes = *width as usize * 4;

    pixels
        .par_chunks_exact_mut(row_bytes)
        .take(view_h as usize)
        .enumerate()
        .for_each(|(row, out)| {
            let py = row as f32 + 0.5;
            for col in 0..view_w as usize {
                let px = col as f32 + 0.5;
                for [a, b, c] in &triangles {
                    let area = edge(a, b, c.x, c.y);
                    let w0 = edge(b, c, px, py) / area;
                    let w1 = edge(c, a, px, py) / area;
                    let w2 = edge(a, b, px, py) / area;
                    if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                        continue;
                    }

                    let u = w0 * a.u + w1 * b.u + w2 * c.u;
                    let v = w0 * a.v + w1 * b.v + w2 * c.v;
                    let rgba = to_rgba8(recombine(&frame, u, v, &shading));
                    out[col * 4..col * 4 + 4].copy_from_slice(&rgba);
                    break;
                }
            }
        });

    Ok(())
}
