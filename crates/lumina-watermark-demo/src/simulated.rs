//! Simulated decoder producing a moving gradient into the drawable surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use lumina_watermark_core::{
    DecoderEventSink, DecoderFactory, FrameWriter, MediaDecoder, RgbaFrame, Surface,
    WatermarkError,
};

/// Delay between `prepare_async` and the prepared signal.
const PREPARE_DELAY: Duration = Duration::from_millis(80);

struct Producer {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl Producer {
    fn join(self) {
        self.stop.store(true, Ordering::Release);
        if let Err(e) = self.thread.join() {
            tracing::warn!("SimulatedDecoder: producer panicked: {:?}", e);
        }
    }
}

pub struct SimulatedDecoder {
    sink: DecoderEventSink,
    fps: u32,
    surface: Option<Surface>,
    url: Option<String>,
    producer: Option<Producer>,
}

impl SimulatedDecoder {
    fn stop_producer(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.join();
        }
    }
}

impl MediaDecoder for SimulatedDecoder {
    fn set_surface(&mut self, surface: &Surface) -> Result<(), WatermarkError> {
        if surface.handle::<FrameWriter>().is_none() {
            return Err(WatermarkError::DecoderInit(
                "surface does not accept CPU frames".into(),
            ));
        }
        self.surface = Some(surface.clone());
        Ok(())
    }

    fn set_data_source(&mut self, url: &str) -> Result<(), WatermarkError> {
        tracing::info!("SimulatedDecoder: opening {}", url);
        self.url = Some(url.to_string());
        Ok(())
    }

    fn set_looping(&mut self, _looping: bool) {}

    fn set_screen_on_while_playing(&mut self, _screen_on: bool) {}

    fn prepare_async(&mut self) -> Result<(), WatermarkError> {
        if self.url.is_none() || self.surface.is_none() {
            return Err(WatermarkError::DecoderInit("prepare before configure".into()));
        }
        let sink = self.sink.clone();
        std::thread::Builder::new()
            .name("simulated-prepare".into())
            .spawn(move || {
                std::thread::sleep(PREPARE_DELAY);
                sink.prepared();
            })
            .map_err(|e| WatermarkError::DecoderInit(format!("Failed to spawn prepare: {e}")))?;
        Ok(())
    }

    fn start(&mut self) -> Result<(), WatermarkError> {
        let surface = self
            .surface
            .clone()
            .ok_or_else(|| WatermarkError::DecoderInit("no surface".into()))?;
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let sink = self.sink.clone();
        let interval = Duration::from_secs(1) / self.fps.max(1);

        let thread = std::thread::Builder::new()
            .name("simulated-decoder".into())
            .spawn(move || produce(surface, stop_flag, sink, interval))
            .map_err(|e| WatermarkError::DecoderInit(format!("Failed to spawn decoder: {e}")))?;
        self.producer = Some(Producer { stop, thread });
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.producer.is_some()
    }

    fn stop(&mut self) {
        self.stop_producer();
    }

    fn reset(&mut self) {
        self.stop_producer();
        self.surface = None;
        self.url = None;
    }

    fn release(&mut self) {
        self.stop_producer();
        tracing::debug!("SimulatedDecoder: released");
    }
}

fn produce(surface: Surface, stop: Arc<AtomicBool>, sink: DecoderEventSink, interval: Duration) {
    let Some(writer) = surface.handle::<FrameWriter>() else {
        return;
    };
    let (width, height) = (160u32, 90u32);
    let mut n: u32 = 0;
    while !stop.load(Ordering::Acquire) {
        let frame = match gradient(width, height, n) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("SimulatedDecoder: bad frame: {}", e);
                sink.error(1, 0);
                return;
            }
        };
        match writer.write(frame) {
            Ok(_) => {}
            Err(WatermarkError::TextureReleased) => {
                tracing::debug!("SimulatedDecoder: surface released, stopping producer");
                return;
            }
            Err(e) => {
                tracing::warn!("SimulatedDecoder: write failed: {}", e);
                sink.error(1, 0);
                return;
            }
        }
        n = n.wrapping_add(1);
        std::thread::sleep(interval);
    }
}

fn gradient(width: u32, height: u32, n: u32) -> Result<RgbaFrame, WatermarkError> {
    let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        for x in 0..width {
            pixels.extend_from_slice(&[
                ((x * 255 / width + n * 3) % 256) as u8,
                (y * 255 / height) as u8,
                ((n * 5) % 256) as u8,
                255,
            ]);
        }
    }
    RgbaFrame::new(width, height, pixels)
}

/// Creates [`SimulatedDecoder`]s and remembers the latest one's sink so the
/// demo can inject errors.
pub struct SimulatedDecoders {
    fps: u32,
    latest: Mutex<Option<DecoderEventSink>>,
}

impl SimulatedDecoders {
    pub fn new(fps: u32) -> Self {
        Self {
            fps,
            latest: Mutex::new(None),
        }
    }

    /// Reports an error from the most recent decoder.
    pub fn fail_latest(&self, code: i32) {
        if let Some(sink) = self.latest.lock().as_ref() {
            tracing::warn!("Injecting decoder error {} into session {}", code, sink.session().get());
            sink.error(code, 0);
        }
    }
}

impl DecoderFactory for SimulatedDecoders {
    fn create(&self, events: DecoderEventSink) -> Result<Box<dyn MediaDecoder>, WatermarkError> {
        *self.latest.lock() = Some(events.clone());
        Ok(Box::new(SimulatedDecoder {
            sink: events,
            fps: self.fps,
            surface: None,
            url: None,
            producer: None,
        }))
    }
}
