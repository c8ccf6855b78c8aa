//! wgpu implementation of [`GpuBackend`]
//!
//! One device serves every surface. Each context owns an offscreen render
//! target (the surface's backing buffer) and the resources created against
//! it. WGSL sources are validated with naga at compile time so bad shaders
//! surface as compile errors instead of device-lost panics; uniform
//! locations are the members of the program's uniform block, written into a
//! CPU-side copy and flushed before each draw.

use std::collections::HashMap;

use anyhow::Result;
use common::{BackendError, ShaderStage};
use wgpu::util::DeviceExt;

use super::backend::{
    BufferHandle, ContextAttributes, ContextHandle, FrameView, GpuBackend, PowerPreference,
    ProgramHandle, ShaderHandle, SurfaceId, TextureFilter, TextureHandle, TextureParams,
    TextureWrap, UniformLocation, UniformValue,
};
use super::context::GpuContext;
use super::pipeline_builder::{
    PipelineBuilder, QUAD_VERTEX_LAYOUT, bind_group_entries, create_pipeline_layout,
};
use super::texture::{FrameTexture, RenderTarget};
use super::{GpuCapabilities, entry_point};

const TEXTURE_BINDING: u32 = 0;
const SAMPLER_BINDING: u32 = 1;
const UNIFORM_BINDING: u32 = 2;

/// Member of a uniform block
#[derive(Debug, Clone, PartialEq, Eq)]
struct UniformField {
    name: String,
    offset: u32,
}

/// Uniform block layout reflected from a shader
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct UniformBlock {
    fields: Vec<UniformField>,
    size: u32,
}

struct ShaderObject {
    stage: ShaderStage,
    module: wgpu::ShaderModule,
    uniforms: UniformBlock,
}

struct ProgramObject {
    pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    layout: UniformBlock,
    staging: Vec<u8>,
    dirty: bool,
}

struct TextureObject {
    frame: FrameTexture,
    sampler: wgpu::Sampler,
}

struct VertexBuffer {
    buffer: wgpu::Buffer,
    vertex_count: u32,
}

struct ContextState {
    surface: SurfaceId,
    shaders: HashMap<u64, ShaderObject>,
    programs: HashMap<u64, ProgramObject>,
    buffers: HashMap<u64, VertexBuffer>,
    textures: HashMap<u64, TextureObject>,
    program: Option<u64>,
    vertex_buffer: Option<u64>,
    texture: Option<u64>,
    target: Option<RenderTarget>,
    viewport: (u32, u32),
}

/// GPU backend rendering every surface offscreen on one wgpu device
pub struct WgpuBackend {
    gpu: GpuContext,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    contexts: HashMap<u64, ContextState>,
    next_handle: u64,
}

impl WgpuBackend {
    /// Open the adapter matching `power_preference` and create the device
    pub fn new(power_preference: PowerPreference) -> Result<Self> {
        let gpu = pollster::block_on(GpuContext::new(power_preference))?;
        Ok(Self::from_context(gpu))
    }

    pub fn from_context(gpu: GpuContext) -> Self {
        let bind_group_layout =
            gpu.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("Stacked Alpha Bind Group Layout"),
                    entries: &[
                        bind_group_entries::texture(TEXTURE_BINDING),
                        bind_group_entries::sampler(SAMPLER_BINDING),
                        bind_group_entries::uniform_buffer(UNIFORM_BINDING),
                    ],
                });
        let pipeline_layout = create_pipeline_layout(
            &gpu.device,
            "Stacked Alpha Pipeline Layout",
            &[&bind_group_layout],
        );

        gpu.capabilities().log_info();

        Self {
            gpu,
            bind_group_layout,
            pipeline_layout,
            contexts: HashMap::new(),
            next_handle: 0,
        }
    }

    pub fn capabilities(&self) -> GpuCapabilities {
        self.gpu.capabilities()
    }

    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn state(&self, context: ContextHandle) -> Result<&ContextState, BackendError> {
        self.contexts
            .get(&context.0)
            .ok_or_else(|| unknown_context(context))
    }

    fn state_mut(&mut self, context: ContextHandle) -> Result<&mut ContextState, BackendError> {
        self.contexts
            .get_mut(&context.0)
            .ok_or_else(|| unknown_context(context))
    }

    fn create_sampler(&self, params: &TextureParams) -> wgpu::Sampler {
        let address_mode = match params.wrap {
            TextureWrap::ClampToEdge => wgpu::AddressMode::ClampToEdge,
            TextureWrap::Repeat => wgpu::AddressMode::Repeat,
        };
        let filter = match params.filter {
            TextureFilter::Nearest => wgpu::FilterMode::Nearest,
            TextureFilter::Linear => wgpu::FilterMode::Linear,
        };

        self.gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Stacked Frame Sampler"),
            address_mode_u: address_mode,
            address_mode_v: address_mode,
            address_mode_w: address_mode,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: wgpu::MipmapFilterMode::Nearest,
            ..Default::default()
        })
    }

    fn render_pass(
        &self,
        target: &RenderTarget,
        load: wgpu::LoadOp<wgpu::Color>,
        label: &str,
        record: impl FnOnce(&mut wgpu::RenderPass<'_>),
    ) {
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            record(&mut render_pass);
        }
        self.gpu.queue.submit(std::iter::once(encoder.finish()));
    }
}

fn unknown_context(context: ContextHandle) -> BackendError {
    BackendError(format!("Unknown rendering context {}", context.0))
}

/// Parse and validate WGSL, returning the compiler log on failure
fn validate_wgsl(source: &str) -> Result<naga::Module, String> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| e.emit_to_string(source))?;
    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| e.emit_to_string(source))?;
    Ok(module)
}

fn has_entry_point(module: &naga::Module, stage: ShaderStage) -> bool {
    let name = entry_point(stage);
    module.entry_points.iter().any(|ep| {
        ep.name == name
            && match stage {
                ShaderStage::Vertex => ep.stage == naga::ShaderStage::Vertex,
                ShaderStage::Fragment => ep.stage == naga::ShaderStage::Fragment,
            }
    })
}

/// Members and size of the module's uniform block, if it declares one
fn reflect_uniforms(module: &naga::Module) -> UniformBlock {
    module
        .global_variables
        .iter()
        .filter(|(_, var)| var.space == naga::AddressSpace::Uniform)
        .find_map(|(_, var)| match &module.types[var.ty].inner {
            naga::TypeInner::Struct { members, span } => Some(UniformBlock {
                fields: members
                    .iter()
                    .filter_map(|member| {
                        Some(UniformField {
                            name: member.name.clone()?,
                            offset: member.offset,
                        })
                    })
                    .collect(),
                size: *span,
            }),
            _ => None,
        })
        .unwrap_or_default()
}

/// Merge the stages' uniform blocks; shared members must agree on offsets
fn merge_uniforms(vertex: &UniformBlock, fragment: &UniformBlock) -> Result<UniformBlock, String> {
    let mut merged = vertex.clone();
    for field in &fragment.fields {
        match merged.fields.iter().find(|f| f.name == field.name) {
            Some(existing) if existing.offset != field.offset => {
                return Err(format!(
                    "uniform `{}` is at offset {} in the vertex stage but {} in the fragment stage",
                    field.name, existing.offset, field.offset
                ));
            }
            Some(_) => {}
            None => merged.fields.push(field.clone()),
        }
    }
    merged.size = merged.size.max(fragment.size);
    Ok(merged)
}

/// Write `value` into a std140-style uniform block at `offset`
fn write_uniform(staging: &mut [u8], offset: usize, value: UniformValue) {
    let mut put = |at: usize, bytes: &[u8]| {
        if let Some(dst) = staging.get_mut(at..at + bytes.len()) {
            dst.copy_from_slice(bytes);
        }
    };

    match value {
        UniformValue::Float(v) => put(offset, bytemuck::bytes_of(&v)),
        UniformValue::Bool(v) => put(offset, bytemuck::bytes_of(&(v as u32))),
        UniformValue::Vec2(v) => put(offset, bytemuck::cast_slice(&v)),
        UniformValue::Mat3(m) => {
            // Each column is padded to 16 bytes
            for column in 0..3 {
                put(
                    offset + column * 16,
                    bytemuck::cast_slice(&m[column * 3..column * 3 + 3]),
                );
            }
        }
    }
}

impl GpuBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn create_context(
        &mut self,
        surface: SurfaceId,
        attributes: &ContextAttributes,
    ) -> Result<ContextHandle, BackendError> {
        if attributes.antialias || attributes.depth {
            return Err(BackendError::new(
                "Antialiased or depth-buffered contexts are not supported",
            ));
        }

        let handle = self.next_handle();
        self.contexts.insert(
            handle,
            ContextState {
                surface,
                shaders: HashMap::new(),
                programs: HashMap::new(),
                buffers: HashMap::new(),
                textures: HashMap::new(),
                program: None,
                vertex_buffer: None,
                texture: None,
                target: None,
                viewport: (0, 0),
            },
        );
        log::debug!("Created wgpu context {} for surface {}", handle, surface.0);
        Ok(ContextHandle(handle))
    }

    fn destroy_context(&mut self, context: ContextHandle) {
        if let Some(state) = self.contexts.remove(&context.0) {
            log::debug!(
                "Destroyed wgpu context {} of surface {}",
                context.0,
                state.surface.0
            );
        }
    }

    fn compile_shader(
        &mut self,
        context: ContextHandle,
        stage: ShaderStage,
        source: &str,
    ) -> Result<ShaderHandle, BackendError> {
        self.state(context)?;

        let module = validate_wgsl(source).map_err(BackendError)?;
        if !has_entry_point(&module, stage) {
            return Err(BackendError(format!(
                "{} shader has no `{}` entry point",
                stage,
                entry_point(stage)
            )));
        }
        let uniforms = reflect_uniforms(&module);

        let shader_module = self
            .gpu
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(match stage {
                    ShaderStage::Vertex => "Stacked Alpha Vertex Shader",
                    ShaderStage::Fragment => "Stacked Alpha Fragment Shader",
                }),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });

        let handle = self.next_handle();
        self.state_mut(context)?.shaders.insert(
            handle,
            ShaderObject {
                stage,
                module: shader_module,
                uniforms,
            },
        );
        Ok(ShaderHandle(handle))
    }

    fn delete_shader(&mut self, context: ContextHandle, shader: ShaderHandle) {
        if let Some(state) = self.contexts.get_mut(&context.0) {
            state.shaders.remove(&shader.0);
        }
    }

    fn link_program(
        &mut self,
        context: ContextHandle,
        vertex: ShaderHandle,
        fragment: ShaderHandle,
    ) -> Result<ProgramHandle, BackendError> {
        let state = self.state(context)?;
        let (Some(vs), Some(fs)) = (state.shaders.get(&vertex.0), state.shaders.get(&fragment.0))
        else {
            return Err(BackendError::new("Program references an unknown shader"));
        };
        if vs.stage != ShaderStage::Vertex || fs.stage != ShaderStage::Fragment {
            return Err(BackendError::new("Shader stages do not match their slots"));
        }

        let layout = merge_uniforms(&vs.uniforms, &fs.uniforms).map_err(BackendError)?;
        if layout.size == 0 {
            return Err(BackendError::new("Program declares no uniform block"));
        }

        let buffers = [QUAD_VERTEX_LAYOUT];
        let pipeline = PipelineBuilder::new(&self.gpu.device, &vs.module, &fs.module)
            .with_label("Stacked Alpha Pipeline")
            .with_layout(&self.pipeline_layout)
            .with_vertex_buffers(&buffers)
            .build();

        let uniform_buffer = self.gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Stacked Alpha Uniforms"),
            size: layout.size as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let program = ProgramObject {
            pipeline,
            uniform_buffer,
            staging: vec![0; layout.size as usize],
            layout,
            dirty: true,
        };

        let handle = self.next_handle();
        self.state_mut(context)?.programs.insert(handle, program);
        Ok(ProgramHandle(handle))
    }

    fn use_program(&mut self, context: ContextHandle, program: Option<ProgramHandle>) {
        if let Some(state) = self.contexts.get_mut(&context.0) {
            state.program = program.map(|p| p.0);
        }
    }

    fn delete_program(&mut self, context: ContextHandle, program: ProgramHandle) {
        if let Some(state) = self.contexts.get_mut(&context.0) {
            state.programs.remove(&program.0);
            if state.program == Some(program.0) {
                state.program = None;
            }
        }
    }

    fn uniform_location(
        &mut self,
        context: ContextHandle,
        program: ProgramHandle,
        name: &str,
    ) -> Option<UniformLocation> {
        let program = self.contexts.get(&context.0)?.programs.get(&program.0)?;
        program
            .layout
            .fields
            .iter()
            .position(|field| field.name == name)
            .map(|index| UniformLocation(index as u32))
    }

    fn set_uniform(&mut self, context: ContextHandle, location: UniformLocation, value: UniformValue) {
        let Some(state) = self.contexts.get_mut(&context.0) else {
            return;
        };
        let Some(program) = state.program.and_then(|p| state.programs.get_mut(&p)) else {
            log::warn!("set_uniform without a program in use");
            return;
        };
        let Some(field) = program.layout.fields.get(location.0 as usize) else {
            log::warn!("Uniform location {} out of range", location.0);
            return;
        };

        write_uniform(&mut program.staging, field.offset as usize, value);
        program.dirty = true;
    }

    fn create_vertex_buffer(
        &mut self,
        context: ContextHandle,
        data: &[f32],
    ) -> Result<BufferHandle, BackendError> {
        self.state(context)?;
        if data.is_empty() || data.len() % 2 != 0 {
            return Err(BackendError(format!(
                "Vertex data must hold vec2 positions, got {} floats",
                data.len()
            )));
        }

        let buffer = self
            .gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Unit Quad"),
                contents: bytemuck::cast_slice(data),
                usage: wgpu::BufferUsages::VERTEX,
            });

        let handle = self.next_handle();
        self.state_mut(context)?.buffers.insert(
            handle,
            VertexBuffer {
                buffer,
                vertex_count: (data.len() / 2) as u32,
            },
        );
        Ok(BufferHandle(handle))
    }

    fn bind_vertex_buffer(&mut self, context: ContextHandle, buffer: Option<BufferHandle>) {
        if let Some(state) = self.contexts.get_mut(&context.0) {
            state.vertex_buffer = buffer.map(|b| b.0);
        }
    }

    fn delete_buffer(&mut self, context: ContextHandle, buffer: BufferHandle) {
        if let Some(state) = self.contexts.get_mut(&context.0) {
            state.buffers.remove(&buffer.0);
            if state.vertex_buffer == Some(buffer.0) {
                state.vertex_buffer = None;
            }
        }
    }

    fn create_texture(
        &mut self,
        context: ContextHandle,
        params: &TextureParams,
    ) -> Result<TextureHandle, BackendError> {
        self.state(context)?;
        if params.mipmaps {
            log::debug!("Mipmaps requested; frame textures are single-level");
        }

        let texture = TextureObject {
            frame: FrameTexture::placeholder(&self.gpu.device),
            sampler: self.create_sampler(params),
        };

        let handle = self.next_handle();
        self.state_mut(context)?.textures.insert(handle, texture);
        Ok(TextureHandle(handle))
    }

    fn bind_texture(&mut self, context: ContextHandle, texture: Option<TextureHandle>) {
        if let Some(state) = self.contexts.get_mut(&context.0) {
            state.texture = texture.map(|t| t.0);
        }
    }

    fn delete_texture(&mut self, context: ContextHandle, texture: TextureHandle) {
        if let Some(state) = self.contexts.get_mut(&context.0) {
            state.textures.remove(&texture.0);
            if state.texture == Some(texture.0) {
                state.texture = None;
            }
        }
    }

    fn upload_frame(
        &mut self,
        context: ContextHandle,
        frame: &FrameView<'_>,
    ) -> Result<(), BackendError> {
        let max = self.gpu.limits.max_texture_dimension_2d;
        if frame.width > max || frame.height > max {
            return Err(BackendError(format!(
                "Frame {}x{} exceeds the maximum texture size {}",
                frame.width, frame.height, max
            )));
        }

        let state = self
            .contexts
            .get_mut(&context.0)
            .ok_or_else(|| unknown_context(context))?;
        let texture = state
            .texture
            .and_then(|t| state.textures.get_mut(&t))
            .ok_or_else(|| BackendError::new("No texture bound"))?;

        texture
            .frame
            .upload(&self.gpu.device, &self.gpu.queue, frame);
        Ok(())
    }

    fn set_backing_size(
        &mut self,
        context: ContextHandle,
        width: u32,
        height: u32,
    ) -> Result<(), BackendError> {
        let max = self.gpu.limits.max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(BackendError(format!(
                "Backing size {}x{} outside 1..={}",
                width, height, max
            )));
        }

        let target = RenderTarget::new(&self.gpu.device, width, height);
        self.state_mut(context)?.target = Some(target);
        Ok(())
    }

    fn set_viewport(&mut self, context: ContextHandle, width: u32, height: u32) {
        if let Some(state) = self.contexts.get_mut(&context.0) {
            state.viewport = (width, height);
        }
    }

    fn clear(&mut self, context: ContextHandle, color: [f32; 4]) -> Result<(), BackendError> {
        let state = self.state(context)?;
        let target = state
            .target
            .as_ref()
            .ok_or_else(|| BackendError::new("Context has no backing buffer"))?;

        let clear = wgpu::Color {
            r: color[0] as f64,
            g: color[1] as f64,
            b: color[2] as f64,
            a: color[3] as f64,
        };
        self.render_pass(target, wgpu::LoadOp::Clear(clear), "Clear Pass", |_| {});
        Ok(())
    }

    fn draw_triangles(
        &mut self,
        context: ContextHandle,
        vertex_count: u32,
    ) -> Result<(), BackendError> {
        let state = self
            .contexts
            .get_mut(&context.0)
            .ok_or_else(|| unknown_context(context))?;

        let program = state
            .program
            .and_then(|p| state.programs.get_mut(&p))
            .ok_or_else(|| BackendError::new("No program in use"))?;
        if program.dirty {
            self.gpu
                .queue
                .write_buffer(&program.uniform_buffer, 0, &program.staging);
            program.dirty = false;
        }

        let state = self.state(context)?;
        let (Some(program), Some(vertices), Some(texture), Some(target)) = (
            state.program.and_then(|p| state.programs.get(&p)),
            state.vertex_buffer.and_then(|b| state.buffers.get(&b)),
            state.texture.and_then(|t| state.textures.get(&t)),
            state.target.as_ref(),
        ) else {
            return Err(BackendError::new(
                "Draw needs a program, a vertex buffer, a texture and a backing buffer",
            ));
        };
        if vertex_count > vertices.vertex_count {
            return Err(BackendError(format!(
                "Draw of {} vertices from a buffer holding {}",
                vertex_count, vertices.vertex_count
            )));
        }

        let bind_group = self
            .gpu
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Stacked Alpha Bind Group"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: TEXTURE_BINDING,
                        resource: wgpu::BindingResource::TextureView(&texture.frame.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: SAMPLER_BINDING,
                        resource: wgpu::BindingResource::Sampler(&texture.sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: UNIFORM_BINDING,
                        resource: program.uniform_buffer.as_entire_binding(),
                    },
                ],
            });

        let (width, height) = (
            state.viewport.0.min(target.width).max(1),
            state.viewport.1.min(target.height).max(1),
        );

        self.render_pass(target, wgpu::LoadOp::Load, "Stacked Alpha Pass", |pass| {
            pass.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
            pass.set_pipeline(&program.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_vertex_buffer(0, vertices.buffer.slice(..));
            pass.draw(0..vertex_count, 0..1);
        });

        log::trace!(
            "Drew {} vertices into {}x{} on surface {}",
            vertex_count,
            width,
            height,
            state.surface.0
        );
        Ok(())
    }

    fn read_pixels(&mut self, context: ContextHandle) -> Result<Vec<u8>, BackendError> {
        let state = self.state(context)?;
        let target = state
            .target
            .as_ref()
            .ok_or_else(|| BackendError::new("Context has no backing buffer"))?;
        target.read_rgba(&self.gpu.device, &self.gpu.queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{FRAGMENT_SHADER, VERTEX_SHADER, uniforms};

    #[test]
    fn test_bundled_shaders_validate() {
        for (source, stage) in [
            (VERTEX_SHADER, ShaderStage::Vertex),
            (FRAGMENT_SHADER, ShaderStage::Fragment),
        ] {
            let module = validate_wgsl(source).unwrap();
            assert!(has_entry_point(&module, stage));
        }
    }

    #[test]
    fn test_invalid_wgsl_reports_log() {
        let log = validate_wgsl("@fragment fn fs_main() -> @location(0) vec4<f32> { return 1; }")
            .unwrap_err();
        assert!(!log.is_empty());
    }

    #[test]
    fn test_reflected_uniform_layout() {
        let vs = reflect_uniforms(&validate_wgsl(VERTEX_SHADER).unwrap());
        let fs = reflect_uniforms(&validate_wgsl(FRAGMENT_SHADER).unwrap());
        let merged = merge_uniforms(&vs, &fs).unwrap();

        let offset = |name: &str| {
            merged
                .fields
                .iter()
                .find(|f| f.name == name)
                .map(|f| f.offset)
        };
        assert_eq!(offset(uniforms::MATRIX), Some(0));
        assert_eq!(offset(uniforms::CLIP_RATIO), Some(48));
        assert_eq!(offset(uniforms::PREMULTIPLIED_ALPHA), Some(56));
        assert_eq!(offset(uniforms::ENABLE_CLIP), Some(60));
        assert_eq!(merged.size, 64);
    }

    #[test]
    fn test_mismatched_offsets_fail_to_link() {
        let a = UniformBlock {
            fields: vec![UniformField {
                name: "x".into(),
                offset: 0,
            }],
            size: 16,
        };
        let b = UniformBlock {
            fields: vec![UniformField {
                name: "x".into(),
                offset: 4,
            }],
            size: 16,
        };
        assert!(merge_uniforms(&a, &b).is_err());
    }

    #[test]
    fn test_write_uniform_pads_matrix_columns() {
        let mut staging = vec![0u8; 64];
        write_uniform(
            &mut staging,
            0,
            UniformValue::Mat3([1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]),
        );
        let floats: Vec<f32> = staging
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(&floats[0..3], &[1.0, 2.0, 3.0]);
        assert_eq!(&floats[4..7], &[4.0, 5.0, 6.0]);
        assert_eq!(&floats[8..11], &[7.0, 8.0, 9.0]);
        assert_eq!(floats[3], 0.0);

        write_uniform(&mut staging, 60, UniformValue::Bool(true));
        assert_eq!(&staging[60..64], &1u32.to_ne_bytes());
    }
}
