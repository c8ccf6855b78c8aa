//! Integration tests for the wgpu backend
//! Each test returns early on machines without a usable adapter
#![cfg(feature = "gpu")]

use std::time::Instant;

use common::{ContainerGeometry, FitMode};
use image::{Rgba, RgbaImage};
use player::gpu::{GpuBackend, PowerPreference, SoftwareBackend, SurfaceId, WgpuBackend};
use player::manager::ResourceManager;
use player::media::FrameSequence;
use player::observer::ContainerId;
use player::{Player, PlayerOptions};

fn gpu_backend() -> Option<WgpuBackend> {
    match WgpuBackend::new(PowerPreference::LowPower) {
        Ok(backend) => Some(backend),
        Err(e) => {
            eprintln!("Skipping GPU test: {}", e);
            None
        }
    }
}

/// Gradient color half over a striped alpha half
fn pattern() -> RgbaImage {
    RgbaImage::from_fn(32, 32, |x, y| {
        if y < 16 {
            Rgba([(x * 8) as u8, (y * 16) as u8, 200, 255])
        } else {
            let alpha = if x % 4 < 2 { 255 } else { 96 };
            Rgba([alpha, 0, 0, 255])
        }
    })
}

fn composite<B: GpuBackend>(backend: B, fit: FitMode, premultiplied_alpha: bool) -> Vec<u8> {
    let surface = SurfaceId(1);
    let media = FrameSequence::from_frames("pattern", vec![pattern()], 30.0).unwrap();
    let options = PlayerOptions {
        fit,
        premultiplied_alpha,
        ..Default::default()
    };
    let mut player = Player::mount(
        ResourceManager::new(backend),
        media,
        surface,
        ContainerId(1),
        // One output pixel per source texel so nearest sampling never lands on a seam
        ContainerGeometry::new(32.0, 16.0, 1.0),
        options,
    )
    .unwrap();
    player.pump(Instant::now());
    player.force_update().unwrap();
    player.manager_mut().read_pixels(surface).unwrap()
}

#[test]
fn test_wgpu_matches_software_rasterizer() {
    for fit in [FitMode::Fill, FitMode::Contain, FitMode::Cover] {
        for premultiplied in [false, true] {
            let Some(gpu) = gpu_backend() else {
                return;
            };
            let expected = composite(SoftwareBackend::new(), fit, premultiplied);
            let actual = composite(gpu, fit, premultiplied);

            assert_eq!(expected.len(), actual.len());
            let worst = expected
                .iter()
                .zip(&actual)
                .map(|(a, b)| a.abs_diff(*b))
                .max()
                .unwrap_or(0);
            assert!(
                worst <= 1,
                "{} (premultiplied: {}) differs by up to {}",
                fit,
                premultiplied,
                worst
            );
        }
    }
}

#[test]
fn test_wgpu_clear_reads_back_transparent() {
    let Some(gpu) = gpu_backend() else {
        return;
    };
    let mut player = Player::mount(
        ResourceManager::new(gpu),
        FrameSequence::empty(30.0),
        SurfaceId(1),
        ContainerId(1),
        ContainerGeometry::new(10.0, 10.0, 1.0),
        PlayerOptions::default(),
    )
    .unwrap();

    let snapshot = player.snapshot().unwrap();
    assert_eq!(snapshot.dimensions(), (1, 1));
    assert_eq!(*snapshot.get_pixel(0, 0), Rgba([0, 0, 0, 0]));
}

#[test]
fn test_wgpu_rejects_invalid_shader() {
    let Some(mut gpu) = gpu_backend() else {
        return;
    };
    let context = gpu
        .create_context(SurfaceId(1), &Default::default())
        .unwrap();
    let err = gpu
        .compile_shader(
            context,
            common::ShaderStage::Fragment,
            "@fragment fn fs_main() -> @location(0) vec4<f32> { return oops; }",
        )
        .unwrap_err();
    assert!(!err.0.is_empty());

    // Valid WGSL without the expected entry point
    let err = gpu
        .compile_shader(
            context,
            common::ShaderStage::Vertex,
            "@fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(0.0); }",
        )
        .unwrap_err();
    assert!(err.0.contains("vs_main"));
    gpu.destroy_context(context);
}
