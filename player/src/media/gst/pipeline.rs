//! GStreamer pipeline setup and configuration

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use anyhow::{Context, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;

use super::frames::{DecodedFrame, FrameSlot};

/// Initialize GStreamer (idempotent, safe to call multiple times)
pub fn initialize_gstreamer() -> Result<()> {
    static GSTREAMER_INIT: std::sync::OnceLock<Result<(), String>> = std::sync::OnceLock::new();

    GSTREAMER_INIT
        .get_or_init(|| {
            gst::init().map_err(|e| e.to_string())?;
            log::info!("GStreamer initialized");
            Ok(())
        })
        .clone()
        .map_err(|e| anyhow::anyhow!("Failed to initialize GStreamer: {}", e))
}

/// Build a decode pipeline delivering stacked RGBA frames
///
/// `decodebin` picks whatever decoder is installed (hardware when present);
/// `videoconvert` normalizes to RGBA so the frame uploads as-is. The frame
/// keeps its native size: the color/alpha split happens on the GPU.
pub fn build_pipeline(path: &Path) -> Result<(gst::Pipeline, gst_app::AppSink)> {
    log::info!("Creating GStreamer pipeline for: {}", path.display());

    let location = path
        .to_str()
        .with_context(|| format!("Path is not valid UTF-8: {}", path.display()))?;
    let source = gst::ElementFactory::make("filesrc")
        .name("source")
        .property("location", location)
        .build()
        .context("Failed to create filesrc")?;

    // The source goes in as an element so the path never passes through the parser
    let decode_description = "decodebin ! videoconvert ! video/x-raw,format=RGBA ! appsink name=sink";
    log::debug!("GStreamer pipeline: filesrc ! {}", decode_description);
    let decode = gst::parse::bin_from_description(decode_description, true)
        .context("Failed to create GStreamer decode bin")?;

    let pipeline = gst::Pipeline::new();
    pipeline
        .add_many([&source, decode.upcast_ref()])
        .context("Failed to assemble GStreamer pipeline")?;
    source
        .link(&decode)
        .context("Failed to link filesrc to decodebin")?;

    let app_sink = pipeline
        .by_name("sink")
        .context("Failed to get appsink from pipeline")?
        .dynamic_cast::<gst_app::AppSink>()
        .map_err(|_| anyhow::anyhow!("sink is not an AppSink"))?;

    Ok((pipeline, app_sink))
}

/// Configure AppSink for low-latency delivery
///
/// - `sync=true`: frames are released on their timestamps
/// - `max-buffers=1` + `drop=true`: only the newest frame matters
pub fn configure_app_sink(app_sink: &gst_app::AppSink) {
    app_sink.set_property("emit-signals", true);
    app_sink.set_property("sync", true);
    app_sink.set_property("max-buffers", 1u32);
    app_sink.set_property("drop", true);
}

/// Route preroll and playing samples into `slot`
pub fn setup_frame_callbacks(
    app_sink: &gst_app::AppSink,
    slot: FrameSlot,
    frames_dropped: Arc<AtomicU64>,
) {
    let preroll_slot = slot.clone();
    let preroll_dropped = Arc::clone(&frames_dropped);

    app_sink.set_callbacks(
        gst_app::AppSinkCallbacks::builder()
            .new_preroll(move |sink| {
                let sample = sink.pull_preroll().map_err(|_| gst::FlowError::Eos)?;
                store_sample(&sample, &preroll_slot, &preroll_dropped)
            })
            .new_sample(move |sink| {
                let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                store_sample(&sample, &slot, &frames_dropped)
            })
            .build(),
    );
}

fn store_sample(
    sample: &gst::Sample,
    slot: &FrameSlot,
    frames_dropped: &AtomicU64,
) -> Result<gst::FlowSuccess, gst::FlowError> {
    let caps = sample.caps().ok_or(gst::FlowError::NotNegotiated)?;
    let info = gst_video::VideoInfo::from_caps(caps).map_err(|_| gst::FlowError::NotNegotiated)?;
    let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
    let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;

    let width = info.width();
    let height = info.height();
    let stride = info.stride()[0] as usize;
    let row_bytes = width as usize * 4;
    let data = map.as_slice();

    // Strip row padding
    let pixels = if stride == row_bytes {
        data.get(..row_bytes * height as usize)
            .ok_or(gst::FlowError::Error)?
            .to_vec()
    } else {
        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            let line = data
                .get(start..start + row_bytes)
                .ok_or(gst::FlowError::Error)?;
            pixels.extend_from_slice(line);
        }
        pixels
    };

    let fps = info.fps();
    let fps = (fps.denom() > 0 && fps.numer() > 0).then(|| fps.numer() as f64 / fps.denom() as f64);

    if slot.store(DecodedFrame {
        width,
        height,
        pixels,
        fps,
    }) {
        frames_dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        log::trace!("Video frame dropped (previous frame not consumed in time)");
    }

    Ok(gst::FlowSuccess::Ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_with_quotes_reaches_filesrc_verbatim() {
        if let Err(e) = initialize_gstreamer() {
            eprintln!("Skipping GStreamer test: {}", e);
            return;
        }
        let path = Path::new("/tmp/alphastack/clip \"final\" ! cut.webm");
        let (pipeline, _sink) = build_pipeline(path).unwrap();

        let source = pipeline.by_name("source").unwrap();
        assert_eq!(
            source.property::<Option<String>>("location").as_deref(),
            Some("/tmp/alphastack/clip \"final\" ! cut.webm")
        );
    }
}
