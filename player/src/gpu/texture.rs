use common::BackendError;

use super::FrameView;
use super::pipeline_builder::TARGET_FORMAT;

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

/// Texture holding the current stacked frame
///
/// Storage is reallocated only when the incoming frame size changes.
pub struct FrameTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

impl FrameTexture {
    /// 1x1 placeholder until the first upload
    pub fn placeholder(device: &wgpu::Device) -> Self {
        Self::allocate(device, 1, 1)
    }

    fn allocate(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Stacked Frame Texture"),
            size: extent(width, height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            // Linear storage: the recombination math works on raw values
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            texture,
            view,
            width,
            height,
        }
    }

    /// Upload `frame`, reallocating if its size differs
    pub fn upload(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, frame: &FrameView<'_>) {
        if frame.width != self.width || frame.height != self.height {
            log::debug!(
                "Frame texture reallocated: {}x{} -> {}x{}",
                self.width,
                self.height,
                frame.width,
                frame.height
            );
            *self = Self::allocate(device, frame.width, frame.height);
        }

        queue.write_texture(
            self.texture.as_image_copy(),
            frame.pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(frame.width * 4),
                rows_per_image: Some(frame.height),
            },
            extent(frame.width, frame.height),
        );
    }
}

/// Offscreen backing buffer of one surface
pub struct RenderTarget {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

impl RenderTarget {
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Surface Backing Buffer"),
            size: extent(width, height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            texture,
            view,
            width,
            height,
        }
    }

    /// Read the target back as tightly packed RGBA8, top row first
    pub fn read_rgba(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> Result<Vec<u8>, BackendError> {
        // bytes_per_row must be a multiple of COPY_BYTES_PER_ROW_ALIGNMENT
        let unpadded_bytes_per_row = self.width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;
        let buffer_size = (padded_bytes_per_row * self.height) as wgpu::BufferAddress;

        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Backing Buffer Read-back"),
            size: buffer_size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Backing Buffer Read-back Encoder"),
        });
        encoder.copy_texture_to_buffer(
            self.texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &staging_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(self.height),
                },
            },
            extent(self.width, self.height),
        );
        queue.submit(Some(encoder.finish()));

        let buffer_slice = staging_buffer.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            // Receiver only drops on early return below
            let _ = sender.send(result);
        });

        device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| BackendError(format!("GPU poll failed: {}", e)))?;

        pollster::block_on(receiver)
            .map_err(|_| BackendError::new("Buffer mapping was canceled"))?
            .map_err(|e| BackendError(format!("Failed to map read-back buffer: {}", e)))?;

        let data = buffer_slice.get_mapped_range();

        // Remove row padding
        let mut pixels = Vec::with_capacity((unpadded_bytes_per_row * self.height) as usize);
        for row in 0..self.height {
            let start = (row * padded_bytes_per_row) as usize;
            pixels.extend_from_slice(&data[start..start + unpadded_bytes_per_row as usize]);
        }

        drop(data);
        staging_buffer.unmap();

        Ok(pixels)
    }
}
