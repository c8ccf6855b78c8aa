//! Fit/transform engine
//!
//! Maps (source frame size, container geometry, fit mode) to the backing
//! buffer size, the display transform and the optional GPU-side crop. Pure:
//! the same inputs always produce the same [`FitResult`].
//!
//! Backing dimensions are floored to whole pixels first; scale factors are
//! derived from the floored values afterwards so the displayed size never
//! drifts from the backing size by accumulated sub-pixel error.

use common::{ClipRatio, ContainerGeometry, DisplayTransform, FitMode, FitResult, SourceFrame};

/// Compute the layout of a source inside a container.
///
/// With no source, or a container without area, the result is the 1x1
/// "nothing to show" layout and the caller must clear instead of draw.
pub fn fit(source: Option<SourceFrame>, container: &ContainerGeometry, mode: FitMode) -> FitResult {
    let source = match source {
        Some(source) if !container.is_empty() => source,
        _ => return FitResult::empty(container.device_pixel_ratio),
    };

    match mode {
        FitMode::Fill => fill(source, container),
        FitMode::Contain => contain(source, container),
        FitMode::Cover => cover(source, container),
    }
}

/// Floor to whole pixels, never below one pixel
fn floor_px(value: f64) -> u32 {
    // `as` saturates and maps NaN to 0
    (value.floor() as u32).max(1)
}

/// Display scale along one axis. A source smaller than the device is
/// stretched over the container; otherwise one backing pixel maps to one
/// device pixel.
fn axis_scale(extent: f64, device_extent: f64, native: u32, backing: u32, dpr: f64) -> f64 {
    if device_extent > native as f64 {
        extent / backing as f64
    } else {
        1.0 / dpr
    }
}

fn fill(source: SourceFrame, container: &ContainerGeometry) -> FitResult {
    let (root_w, root_h) = container.device_size();
    let dpr = container.device_pixel_ratio;

    let width = floor_px(root_w.min(source.width as f64));
    let height = floor_px(root_h.min(source.height as f64));

    FitResult {
        backing_width: width,
        backing_height: height,
        transform: DisplayTransform::scale(
            axis_scale(container.width, root_w, source.width, width, dpr),
            axis_scale(container.height, root_h, source.height, height, dpr),
        ),
        clip: None,
        has_content: true,
    }
}

fn contain(source: SourceFrame, container: &ContainerGeometry) -> FitResult {
    let (root_w, root_h) = container.device_size();
    let dpr = container.device_pixel_ratio;
    let r_video = source.aspect_ratio();
    let r_root = container.width / container.height;

    let (width, height, transform) = if r_video > r_root {
        // Width-constrained, letterbox top and bottom
        let width = floor_px(root_w.min(source.width as f64));
        let height = floor_px(width as f64 / r_video);
        let scale = axis_scale(container.width, root_w, source.width, width, dpr);
        let offset_y = (container.height - height as f64 * scale) / 2.0;
        (
            width,
            height,
            DisplayTransform::scale(scale, scale).with_translation(0.0, offset_y),
        )
    } else {
        // Height-constrained, pillarbox left and right
        let height = floor_px(root_h.min(source.height as f64));
        let width = floor_px(height as f64 * r_video);
        let scale = axis_scale(container.height, root_h, source.height, height, dpr);
        let offset_x = (container.width - width as f64 * scale) / 2.0;
        (
            width,
            height,
            DisplayTransform::scale(scale, scale).with_translation(offset_x, 0.0),
        )
    };

    FitResult {
        backing_width: width,
        backing_height: height,
        transform,
        clip: None,
        has_content: true,
    }
}

fn cover(source: SourceFrame, container: &ContainerGeometry) -> FitResult {
    let (root_w, root_h) = container.device_size();
    let r_video = source.aspect_ratio();
    let r_root = container.width / container.height;

    // Cropped source resolution has the container's aspect ratio; the shader
    // discards half of the clip fraction from each edge.
    let (crop_w, crop_h, clip) = if r_video >= r_root {
        (
            (r_root / r_video) * source.width as f64,
            source.height as f64,
            ClipRatio {
                dx: ((r_video - r_root) / r_video) as f32,
                dy: 0.0,
            },
        )
    } else {
        (
            source.width as f64,
            (r_video / r_root) * source.height as f64,
            ClipRatio {
                dx: 0.0,
                dy: ((1.0 / r_video - 1.0 / r_root) / (1.0 / r_video)) as f32,
            },
        )
    };

    // Largest size not exceeding the cropped source nor the device pixels
    let width = floor_px(crop_w.min(root_w));
    let height = floor_px(crop_h.min(root_h));

    FitResult {
        backing_width: width,
        backing_height: height,
        transform: DisplayTransform::scale(
            container.width / width as f64,
            container.height / height as f64,
        ),
        clip: Some(clip),
        has_content: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCES: [(u32, u32); 6] = [
        (1920, 540),
        (1080, 960),
        (640, 640),
        (300, 1200),
        (3840, 1080),
        (7, 3),
    ];
    const CONTAINERS: [(f64, f64); 6] = [
        (300.0, 300.0),
        (1280.0, 720.0),
        (375.5, 812.25),
        (2000.0, 100.0),
        (50.0, 900.0),
        (1.0, 1.0),
    ];
    const RATIOS: [f64; 4] = [1.0, 1.5, 2.0, 3.0];

    fn each_input(mut check: impl FnMut(SourceFrame, ContainerGeometry)) {
        for (vw, vh) in SOURCES {
            for (rw, rh) in CONTAINERS {
                for dpr in RATIOS {
                    let source = SourceFrame::new(vw, vh).unwrap();
                    check(source, ContainerGeometry::new(rw, rh, dpr));
                }
            }
        }
    }

    #[test]
    fn test_no_source_is_empty() {
        let container = ContainerGeometry::new(300.0, 300.0, 2.0);
        for mode in FitMode::ALL {
            let result = fit(None, &container, mode);
            assert!(!result.has_content);
            assert_eq!(result.backing_size(), (1, 1));
            assert!(result.clip.is_none());
        }
    }

    #[test]
    fn test_zero_area_container_is_empty() {
        let source = SourceFrame::new(1920, 540);
        let container = ContainerGeometry::new(0.0, 300.0, 1.0);
        let result = fit(source, &container, FitMode::Cover);
        assert!(!result.has_content);
        assert_eq!(result.backing_size(), (1, 1));
        assert!(result.transform.scale_x.is_finite());
    }

    #[test]
    fn test_cover_scenario_wide_source_square_container() {
        let source = SourceFrame::from_raw(1920, 1080);
        let container = ContainerGeometry::new(300.0, 300.0, 1.0);
        let result = fit(source, &container, FitMode::Cover);

        let clip = result.clip.unwrap();
        // rVideo = 3.556, rRoot = 1.0
        assert!((clip.dx - 0.71875).abs() < 1e-3);
        assert_eq!(clip.dy, 0.0);
        // Cropped source is 540x540, container is 300x300 device pixels
        assert_eq!(result.backing_size(), (300, 300));
        assert!((result.transform.scale_x - 1.0).abs() < 1e-9);
        assert!((result.transform.scale_y - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cover_tall_source_crops_height() {
        let source = SourceFrame::new(500, 1000);
        let container = ContainerGeometry::new(400.0, 400.0, 1.0);
        let result = fit(source, &container, FitMode::Cover);

        let clip = result.clip.unwrap();
        assert_eq!(clip.dx, 0.0);
        // rVideo = 0.5, rRoot = 1.0: (2 - 1) / 2
        assert!((clip.dy - 0.5).abs() < 1e-6);
        // Cropped source is 500x500, capped to 400x400 device pixels
        assert_eq!(result.backing_size(), (400, 400));
    }

    #[test]
    fn test_cover_small_source_keeps_native_resolution() {
        let source = SourceFrame::new(200, 100);
        let container = ContainerGeometry::new(400.0, 400.0, 2.0);
        let result = fit(source, &container, FitMode::Cover);

        // Cropped to 100x100, smaller than the 800x800 device pixels
        assert_eq!(result.backing_size(), (100, 100));
        assert!((result.transform.scale_x - 4.0).abs() < 1e-9);
        assert!((clip_dx(&result) - 0.5).abs() < 1e-6);
    }

    fn clip_dx(result: &FitResult) -> f32 {
        result.clip.map(|c| c.dx).unwrap_or_default()
    }

    #[test]
    fn test_fill_upscales_small_source() {
        let source = SourceFrame::new(100, 50);
        let container = ContainerGeometry::new(300.0, 300.0, 1.0);
        let result = fit(source, &container, FitMode::Fill);

        assert_eq!(result.backing_size(), (100, 50));
        assert!((result.transform.scale_x - 3.0).abs() < 1e-9);
        assert!((result.transform.scale_y - 6.0).abs() < 1e-9);
        assert!(result.clip.is_none());
    }

    #[test]
    fn test_fill_hidpi_downscale() {
        let source = SourceFrame::new(1920, 1080);
        let container = ContainerGeometry::new(400.0, 300.0, 2.0);
        let result = fit(source, &container, FitMode::Fill);

        assert_eq!(result.backing_size(), (800, 600));
        assert!((result.transform.scale_x - 0.5).abs() < 1e-9);
        assert!((result.transform.scale_y - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_fill_maps_backing_to_device_pixels_when_source_is_larger() {
        let source = SourceFrame::new(1920, 1080);
        let container = ContainerGeometry::new(375.5, 812.25, 1.5);
        let result = fit(source, &container, FitMode::Fill);

        // 563.25 device columns floor to 563; rows are capped at the source
        assert_eq!(result.backing_size(), (563, 1080));
        assert_eq!(result.transform.scale_x, 1.0 / 1.5);
        assert_eq!(result.transform.scale_y, 812.25 / 1080.0);
    }

    #[test]
    fn test_contain_fractional_device_size_uses_pixel_ratio() {
        let source = SourceFrame::new(1920, 540);
        let container = ContainerGeometry::new(375.5, 300.0, 1.5);
        let result = fit(source, &container, FitMode::Contain);

        assert_eq!(result.backing_size(), (563, 158));
        assert_eq!(result.transform.scale_x, 1.0 / 1.5);
        assert_eq!(result.transform.scale_y, 1.0 / 1.5);
        let expected_y = (300.0 - 158.0 / 1.5) / 2.0;
        assert!((result.transform.translate_y - expected_y).abs() < 1e-9);
    }

    #[test]
    fn test_contain_letterboxes_wide_source() {
        let source = SourceFrame::new(1920, 540);
        let container = ContainerGeometry::new(300.0, 300.0, 1.0);
        let result = fit(source, &container, FitMode::Contain);

        assert_eq!(result.backing_width, 300);
        assert_eq!(result.backing_height, 84);
        let (_, shown_h) = result.displayed_size();
        assert!((result.transform.translate_y - (300.0 - shown_h) / 2.0).abs() < 1e-9);
        assert_eq!(result.transform.translate_x, 0.0);
    }

    #[test]
    fn test_contain_pillarboxes_tall_source() {
        let source = SourceFrame::new(300, 1200);
        let container = ContainerGeometry::new(800.0, 600.0, 1.0);
        let result = fit(source, &container, FitMode::Contain);

        // Height capped at native 600 rows, width follows the 1:4 aspect ratio
        assert_eq!(result.backing_size(), (150, 600));
        assert!((result.transform.translate_x - 325.0).abs() < 1e-9);
        assert_eq!(result.transform.translate_y, 0.0);
    }

    #[test]
    fn test_fill_never_exceeds_source_or_device_pixels() {
        each_input(|source, container| {
            let result = fit(Some(source), &container, FitMode::Fill);
            let (root_w, root_h) = container.device_size();
            assert!(result.backing_width <= source.width);
            assert!(result.backing_height <= source.height);
            assert!(result.backing_width as f64 <= root_w.max(1.0));
            assert!(result.backing_height as f64 <= root_h.max(1.0));
        });
    }

    #[test]
    fn test_contain_preserves_aspect_and_fits() {
        each_input(|source, container| {
            let result = fit(Some(source), &container, FitMode::Contain);
            let (bw, bh) = (result.backing_width as f64, result.backing_height as f64);
            let ratio = source.aspect_ratio();

            // Uniform scale, never anisotropic
            assert_eq!(result.transform.scale_x, result.transform.scale_y);

            // The derived axis is the floor of the constrained one (unless clamped to 1px)
            let width_derived = (bw - (bh * ratio)).abs() < 1.0 || bw == 1.0;
            let height_derived = (bh - (bw / ratio)).abs() < 1.0 || bh == 1.0;
            assert!(width_derived || height_derived);

            let (shown_w, shown_h) = result.displayed_size();
            let eps = 1e-6;
            if bw > 1.0 && bh > 1.0 {
                assert!(shown_w <= container.width + eps);
                assert!(shown_h <= container.height + eps);
            }
            // The constrained axis fills the container up to one device pixel
            let gap = 1.0 / container.device_pixel_ratio + eps;
            let matches_w = (shown_w - container.width).abs() < gap;
            let matches_h = (shown_h - container.height).abs() < gap;
            assert!(matches_w || matches_h);
        });
    }

    #[test]
    fn test_cover_clip_in_range_and_covers_container() {
        each_input(|source, container| {
            let result = fit(Some(source), &container, FitMode::Cover);
            let clip = result.clip.expect("cover always clips");

            assert!((0.0..1.0).contains(&clip.dx));
            assert!((0.0..1.0).contains(&clip.dy));
            // Only one axis is ever cropped
            assert!(clip.dx == 0.0 || clip.dy == 0.0);

            let (shown_w, shown_h) = result.displayed_size();
            assert!((shown_w - container.width).abs() < 1e-6);
            assert!((shown_h - container.height).abs() < 1e-6);
        });
    }

    #[test]
    fn test_cover_backing_bounded_by_crop_and_device() {
        each_input(|source, container| {
            let result = fit(Some(source), &container, FitMode::Cover);
            let clip = result.clip.unwrap();
            let (root_w, root_h) = container.device_size();
            let crop_w = source.width as f64 * (1.0 - clip.dx as f64);
            let crop_h = source.height as f64 * (1.0 - clip.dy as f64);

            assert!(result.backing_width as f64 <= crop_w.min(root_w).max(1.0) + 1e-3);
            assert!(result.backing_height as f64 <= crop_h.min(root_h).max(1.0) + 1e-3);
        });
    }

    #[test]
    fn test_fit_is_idempotent() {
        each_input(|source, container| {
            for mode in FitMode::ALL {
                assert_eq!(
                    fit(Some(source), &container, mode),
                    fit(Some(source), &container, mode)
                );
            }
        });
    }
}
