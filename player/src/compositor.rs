//! Frame compositor
//!
//! Issues the per-frame draw: upload the media's current frame into the
//! surface texture and run the recombination program over the unit quad.
//! [`recombine`] is the CPU form of the fragment stage; the software backend
//! executes it per pixel and the WGSL program computes the same thing.

use common::{BackendError, ReadyState};

use crate::gpu::{FrameView, GpuBackend, QUAD_VERTEX_COUNT, SurfaceId};
use crate::manager::ResourceManager;
use crate::media::MediaSource;

/// Result of one draw request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawOutcome {
    /// The current frame was uploaded and drawn
    Drawn,
    /// The media has not decoded the current frame yet; skipped silently
    NotReady,
    /// The media reports readiness but has no pixels to hand out
    NoFrame,
}

/// Draw the media's current frame onto `surface`.
///
/// With `require_ready_data`, a source below [`ReadyState::HaveCurrentData`]
/// makes this a no-op: under-readiness is transient during seeks and stalls
/// and the next tick retries naturally.
pub fn draw<B, M>(
    manager: &mut ResourceManager<B>,
    surface: SurfaceId,
    media: &M,
    require_ready_data: bool,
) -> Result<DrawOutcome, BackendError>
where
    B: GpuBackend,
    M: MediaSource + ?Sized,
{
    let Some((backend, ctx)) = manager.parts_mut(surface) else {
        return Err(BackendError(format!(
            "Surface {} has no rendering context",
            surface.0
        )));
    };

    let (width, height) = ctx.backing_size();
    backend.set_viewport(ctx.context, width, height);

    if require_ready_data && media.ready_state() < ReadyState::HaveCurrentData {
        log::trace!(
            "Skipping draw on surface {}: media is {:?}",
            surface.0,
            media.ready_state()
        );
        return Ok(DrawOutcome::NotReady);
    }

    let Some(frame) = media.current_frame() else {
        return Ok(DrawOutcome::NoFrame);
    };

    backend.use_program(ctx.context, Some(ctx.program));
    backend.bind_vertex_buffer(ctx.context, Some(ctx.vertex_buffer));
    backend.bind_texture(ctx.context, Some(ctx.texture));
    backend.upload_frame(ctx.context, &frame)?;
    backend.draw_triangles(ctx.context, QUAD_VERTEX_COUNT)?;

    Ok(DrawOutcome::Drawn)
}

/// Uniform values consumed by the fragment stage
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RecombineUniforms {
    pub clip_ratio: [f32; 2],
    pub enable_clip: bool,
    /// 0.0 multiplies color by alpha, 1.0 keeps it as stored
    pub premultiplied_alpha: f32,
}

/// Sample a texel with nearest filtering and edge clamping, normalized to [0,1]
pub fn sample_nearest(frame: &FrameView<'_>, u: f32, v: f32) -> [f32; 4] {
    let x = texel_index(u, frame.width);
    let y = texel_index(v, frame.height);
    frame.texel(x, y).map(|c| c as f32 / 255.0)
}

fn texel_index(coord: f32, extent: u32) -> u32 {
    let max = extent.saturating_sub(1);
    // `as` saturates negatives and NaN to 0
    ((coord * extent as f32).floor() as u32).min(max)
}

/// Recombine the stacked frame at normalized output coordinate `(x, y)`.
///
/// Color comes from the top half, alpha from the red channel of the bottom
/// half. Output rgb is `C.rgb * mix(A, 1, premultiplied)`, output alpha `A`.
pub fn recombine(frame: &FrameView<'_>, x: f32, y: f32, uniforms: &RecombineUniforms) -> [f32; 4] {
    let (x, y) = if uniforms.enable_clip {
        let [cx, cy] = uniforms.clip_ratio;
        (cx / 2.0 + x * (1.0 - cx), cy / 2.0 + y * (1.0 - cy))
    } else {
        (x, y)
    };

    let color = sample_nearest(frame, x, y * 0.5);
    let alpha = sample_nearest(frame, x, 0.5 + y * 0.5)[0];
    let factor = mix(alpha, 1.0, uniforms.premultiplied_alpha);

    [color[0] * factor, color[1] * factor, color[2] * factor, alpha]
}

fn mix(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}

/// Quantize a normalized color the way an RGBA8 unorm target stores it
pub fn to_rgba8(color: [f32; 4]) -> [u8; 4] {
    color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
}

/// Convert premultiplied RGBA8 read-back to straight alpha in place
pub fn unpremultiply(pixels: &mut [u8]) {
    for pixel in pixels.chunks_exact_mut(4) {
        let alpha = pixel[3] as u32;
        if alpha == 0 {
            pixel[..3].fill(0);
            continue;
        }
        if alpha == 255 {
            continue;
        }
        for c in &mut pixel[..3] {
            *c = ((*c as u32 * 255 + alpha / 2) / alpha).min(255) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 1x2 stacked frame: one color texel over one alpha texel
    fn stacked(color: [u8; 4], mask: u8) -> Vec<u8> {
        vec![
            color[0], color[1], color[2], color[3], //
            mask, mask, mask, 255,
        ]
    }

    #[test]
    fn test_recombine_straight_alpha_multiplies_color() {
        let pixels = stacked([200, 100, 50, 255], 128);
        let frame = FrameView::new(1, 2, &pixels).unwrap();
        let out = recombine(&frame, 0.5, 0.5, &RecombineUniforms::default());

        let a = 128.0 / 255.0;
        assert!((out[0] - 200.0 / 255.0 * a).abs() < 1e-6);
        assert!((out[1] - 100.0 / 255.0 * a).abs() < 1e-6);
        assert!((out[3] - a).abs() < 1e-6);
    }

    #[test]
    fn test_recombine_premultiplied_keeps_color() {
        let pixels = stacked([200, 100, 50, 255], 128);
        let frame = FrameView::new(1, 2, &pixels).unwrap();
        let uniforms = RecombineUniforms {
            premultiplied_alpha: 1.0,
            ..Default::default()
        };
        let out = recombine(&frame, 0.5, 0.5, &uniforms);

        assert!((out[0] - 200.0 / 255.0).abs() < 1e-6);
        assert!((out[3] - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_recombine_reads_alpha_from_red_channel() {
        // Green/blue of the mask must be ignored
        let pixels = vec![255, 255, 255, 255, 64, 0, 255, 0];
        let frame = FrameView::new(1, 2, &pixels).unwrap();
        let out = recombine(&frame, 0.5, 0.5, &RecombineUniforms::default());
        assert!((out[3] - 64.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_recombine_clip_crops_symmetrically() {
        // 4x2 stacked frame: color row 0 = columns of distinct red, alpha row all opaque
        let mut pixels = Vec::new();
        for x in 0..4u8 {
            pixels.extend_from_slice(&[x * 60, 0, 0, 255]);
        }
        for _ in 0..4 {
            pixels.extend_from_slice(&[255, 255, 255, 255]);
        }
        let frame = FrameView::new(4, 2, &pixels).unwrap();
        let uniforms = RecombineUniforms {
            clip_ratio: [0.5, 0.0],
            enable_clip: true,
            premultiplied_alpha: 0.0,
        };

        // Left edge of the output maps to x' = 0.25, the second column
        let left = recombine(&frame, 0.01, 0.5, &uniforms);
        assert!((left[0] - 60.0 / 255.0).abs() < 1e-6);
        // Right edge maps to x' just below 0.75, the third column
        let right = recombine(&frame, 0.99, 0.5, &uniforms);
        assert!((right[0] - 120.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_sample_nearest_clamps_to_edge() {
        let pixels = stacked([10, 20, 30, 255], 200);
        let frame = FrameView::new(1, 2, &pixels).unwrap();
        assert_eq!(sample_nearest(&frame, -0.5, -1.0)[0], 10.0 / 255.0);
        assert_eq!(sample_nearest(&frame, 2.0, 1.0)[0], 200.0 / 255.0);
    }

    #[test]
    fn test_unpremultiply() {
        let mut pixels = vec![64, 32, 0, 128, 10, 10, 10, 0, 1, 2, 3, 255];
        unpremultiply(&mut pixels);
        assert_eq!(&pixels[..4], &[128, 64, 0, 128]);
        assert_eq!(&pixels[4..8], &[0, 0, 0, 0]);
        assert_eq!(&pixels[8..], &[1, 2, 3, 255]);
    }

    #[test]
    fn test_to_rgba8_rounds_and_clamps() {
        assert_eq!(to_rgba8([0.5, 1.5, -0.1, 1.0]), [128, 255, 0, 255]);
    }
}
