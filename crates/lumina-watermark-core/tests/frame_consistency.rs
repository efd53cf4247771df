//! Frame arrival vs. render tick stress tests.
//!
//! Producers write frames whose pixels and transform both carry the same tag.
//! Every composited output must pair the transform and the pixels of one
//! producer frame.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use lumina_watermark_core::control;
use lumina_watermark_core::{
    CompositorHandle, ControlMessage, CpuBackend, FrameWriter, GpuBackend, GpuResources,
    NativeModule, OutputFrame, RenderSurfaceHolder, RgbaFrame, Surface, SurfaceLifecycleEvent,
    TextureFrameBuffer, TransformMatrix, WatermarkAsset, WatermarkError,
};

const PRODUCERS: u64 = 4;
const FRAMES_PER_PRODUCER: u64 = 500;
const TICKS: usize = 2_000;

/// Identity sampling, with the tag carried in the z translation, which does
/// not affect texture coordinates.
fn tagged_transform(tag: u64) -> TransformMatrix {
    let mut m = TransformMatrix::IDENTITY;
    m.0[14] = tag as f32;
    m
}

fn tagged_frame(tag: u64) -> RgbaFrame {
    let r = (tag % 251) as u8;
    let g = ((tag / 251) % 251) as u8;
    RgbaFrame::solid(4, 4, [r, g, 0, 255]).unwrap()
}

/// Tag read back from the transform must match the tag in the pixels.
fn assert_consistent(out: &OutputFrame) {
    if out.source_sequence == 0 {
        return;
    }
    let tag = out.matrix.0[14] as u64;
    assert!(tag > 0, "frame drawn with an untagged transform");
    let expected = [(tag % 251) as u8, ((tag / 251) % 251) as u8, 0, 255];
    for (x, y) in [(0, 0), (3, 5), (7, 7)] {
        assert_eq!(out.pixel(x, y), Some(expected), "torn frame for tag {tag}");
    }
}

fn transparent_watermark() -> WatermarkAsset {
    WatermarkAsset::solid(2, 2, [0, 0, 0, 0]).unwrap()
}

/// Spawns producers writing tagged frames until done or the surface goes away.
fn spawn_producers(surface: &Surface) -> Vec<std::thread::JoinHandle<u64>> {
    (0..PRODUCERS)
        .map(|producer| {
            let surface = surface.clone();
            std::thread::spawn(move || {
                let mut written = 0;
                let Some(writer) = surface.handle::<FrameWriter>() else {
                    return written;
                };
                for i in 0..FRAMES_PER_PRODUCER {
                    let tag = producer * FRAMES_PER_PRODUCER + i + 1;
                    match writer.write_with_transform(tagged_frame(tag), tagged_transform(tag)) {
                        Ok(_) => written += 1,
                        Err(WatermarkError::TextureReleased) => break,
                        Err(e) => panic!("unexpected write error: {e}"),
                    }
                    if i % 16 == 0 {
                        std::thread::yield_now();
                    }
                }
                written
            })
        })
        .collect()
}

#[test]
fn test_consume_then_draw_consistent_under_concurrent_arrivals() {
    common::init_tracing();
    let backend = CpuBackend::new(8, 8);
    let mut compositor =
        CompositorHandle::create(&backend, &transparent_watermark(), 8, 8).unwrap();
    let texture = backend
        .create_external_texture(compositor.texture_id())
        .unwrap();
    let frame_buffer = TextureFrameBuffer::new(compositor.texture_id(), texture);
    let surface = frame_buffer.drawable_surface().unwrap();

    let producers = spawn_producers(&surface);

    let mut matrix = TransformMatrix::IDENTITY;
    for _ in 0..TICKS {
        assert!(frame_buffer.consume_latest(&mut matrix).unwrap());
        compositor.draw_frame(&matrix, 8, 8).unwrap();
        let out = backend.presented().unwrap();
        assert_eq!(out.matrix, matrix);
        assert_consistent(&out);
    }

    let written: u64 = producers.into_iter().map(|p| p.join().unwrap()).sum();
    assert_eq!(written, PRODUCERS * FRAMES_PER_PRODUCER);

    // One more tick picks up whatever arrived after the last one.
    frame_buffer.consume_latest(&mut matrix).unwrap();
    assert!(!frame_buffer.has_new_frame());

    let stats = frame_buffer.stats();
    assert_eq!(stats.frames_arrived, written);
    assert_eq!(stats.frames_imported, TICKS as u64 + 1);

    frame_buffer.release();
    compositor.release();
    assert_eq!(backend.live_compositors(), 0);
    assert_eq!(backend.live_textures(), 0);
}

#[test]
fn test_render_thread_consistent_under_concurrent_arrivals() {
    common::init_tracing();
    let backend = Arc::new(CpuBackend::new(8, 8).with_vsync_interval(Duration::from_millis(1)));
    let resources = GpuResources {
        backend: Arc::clone(&backend) as Arc<dyn GpuBackend>,
        module: Arc::new(NativeModule::builtin("MediaWatermark")),
        watermark: transparent_watermark(),
    };
    let (tx, rx) = control::channel();
    let mut holder = RenderSurfaceHolder::new(&resources, tx, Duration::from_secs(2)).unwrap();

    assert!(matches!(
        rx.next_timeout(Duration::from_secs(5)),
        Some(ControlMessage::Surface {
            event: SurfaceLifecycleEvent::Created,
            ..
        })
    ));
    let surface = holder.surface().unwrap();
    let producers = spawn_producers(&surface);

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut checked = 0;
    while checked < 200 && Instant::now() < deadline {
        if let Some(out) = backend.presented() {
            assert_consistent(&out);
            checked += 1;
        }
        std::thread::sleep(Duration::from_micros(200));
    }
    assert!(holder.frames_rendered() > 0);

    holder.destroy();
    for p in producers {
        p.join().unwrap();
    }
    assert!(!surface.is_valid());
    assert_eq!(backend.live_compositors(), 0);
    assert_eq!(backend.live_textures(), 0);
}
