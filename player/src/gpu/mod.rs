/// GPU access for the stacked-alpha compositor
///
/// The resource manager and the compositor only talk to the [`GpuBackend`]
/// trait. Two backends implement it:
/// - `software`: CPU rasterizer running the recombination program natively
/// - `wgpu_backend`: wgpu device with one offscreen render target per surface
///   (feature `gpu`)
///
/// Architecture of the wgpu side:
/// - `context`: wgpu device/queue management
/// - `pipeline_builder`: Render pipeline creation
/// - `texture`: Frame upload and render target read-back
pub mod backend;
pub mod software;

#[cfg(feature = "gpu")]
pub mod context;
#[cfg(feature = "gpu")]
pub mod pipeline_builder;
#[cfg(feature = "gpu")]
pub mod texture;
#[cfg(feature = "gpu")]
pub mod wgpu_backend;

pub use backend::{
    BackendChoice, BufferHandle, ContextAttributes, ContextHandle, FrameView, GpuBackend,
    PowerPreference, ProgramHandle, ShaderHandle, SurfaceId, TextureFilter, TextureHandle,
    TextureParams, TextureWrap, UniformLocation, UniformValue,
};
pub use software::SoftwareBackend;

#[cfg(feature = "gpu")]
pub use context::GpuContext;
#[cfg(feature = "gpu")]
pub use wgpu_backend::WgpuBackend;

use common::ShaderStage;

/// Vertex stage of the stacked-alpha program
pub const VERTEX_SHADER: &str = include_str!("shaders/stacked_alpha.vert.wgsl");

/// Fragment stage of the stacked-alpha program
pub const FRAGMENT_SHADER: &str = include_str!("shaders/stacked_alpha.frag.wgsl");

/// Two triangles covering [0,1]², as `vec2<f32>` positions
pub const UNIT_QUAD: [f32; 12] = [
    0.0, 0.0, //
    1.0, 0.0, //
    0.0, 1.0, //
    0.0, 1.0, //
    1.0, 0.0, //
    1.0, 1.0, //
];

pub const QUAD_VERTEX_COUNT: u32 = 6;

/// Column-major matrix mapping the unit quad to clip space with y pointing down
pub const QUAD_TRANSFORM: [f32; 9] = [2.0, 0.0, 0.0, 0.0, -2.0, 0.0, -1.0, 1.0, 1.0];

/// Uniform names of the stacked-alpha program
pub mod uniforms {
    pub const MATRIX: &str = "matrix";
    pub const CLIP_RATIO: &str = "clip_ratio";
    pub const PREMULTIPLIED_ALPHA: &str = "premultiplied_alpha";
    pub const ENABLE_CLIP: &str = "enable_clip";
}

/// Entry point name for a stage
pub fn entry_point(stage: ShaderStage) -> &'static str {
    match stage {
        ShaderStage::Vertex => "vs_main",
        ShaderStage::Fragment => "fs_main",
    }
}

/// Check if GPU rendering is available on this system
#[cfg(feature = "gpu")]
pub fn is_available(power_preference: PowerPreference) -> bool {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });

    pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: context::wgpu_power_preference(power_preference),
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
    .is_ok()
}

#[cfg(not(feature = "gpu"))]
pub fn is_available(_power_preference: PowerPreference) -> bool {
    false
}

/// GPU rendering capabilities
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    pub adapter_name: String,
    pub backend: String,
    pub max_texture_size: u32,
}

impl GpuCapabilities {
    pub fn log_info(&self) {
        log::info!("GPU Capabilities:");
        log::info!("  Adapter: {}", self.adapter_name);
        log::info!("  Backend: {}", self.backend);
        log::info!(
            "  Max Texture Size: {}x{}",
            self.max_texture_size,
            self.max_texture_size
        );
    }
}
