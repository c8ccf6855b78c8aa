/// GPU context management - handles wgpu device/queue initialization
use anyhow::{Context, Result};

use super::{GpuCapabilities, PowerPreference};

/// GPU context containing device, queue, and adapter info
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: wgpu::AdapterInfo,
    pub limits: wgpu::Limits,
}

/// Map the context hint onto wgpu's adapter preference
pub fn wgpu_power_preference(preference: PowerPreference) -> wgpu::PowerPreference {
    match preference {
        PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
        PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
    }
}

impl GpuContext {
    /// Create a new GPU context
    ///
    /// Picks the adapter matching `power_preference`; no surface is needed
    /// since every output renders offscreen.
    pub async fn new(power_preference: PowerPreference) -> Result<Self> {
        log::info!("Initializing GPU context...");

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu_power_preference(power_preference),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .context("Failed to find suitable GPU adapter")?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU adapter: {} ({:?})",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("alphastack GPU Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                ..Default::default()
            })
            .await
            .context("Failed to create GPU device")?;

        let limits = device.limits();
        log::info!("GPU context initialized successfully");

        Ok(Self {
            device,
            queue,
            adapter_info,
            limits,
        })
    }

    /// Get GPU capabilities for reporting
    pub fn capabilities(&self) -> GpuCapabilities {
        GpuCapabilities {
            adapter_name: self.adapter_info.name.clone(),
            backend: format!("{:?}", self.adapter_info.backend),
            max_texture_size: self.limits.max_texture_dimension_2d,
        }
    }
}

impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext")
            .field("adapter", &self.adapter_info.name)
            .field("backend", &self.adapter_info.backend)
            .finish()
    }
}
