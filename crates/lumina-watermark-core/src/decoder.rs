//! Video decoder collaborator.
//!
//! The decoder is an opaque producer: it accepts a drawable target, decodes
//! the stream into it on its own threads, and reports back through a
//! [`DecoderEventSink`]. Signals never call controller code directly; they
//! are posted to the control thread.

use crate::control::{ControlMessage, ControlSender, SessionId};
use crate::error::WatermarkError;
use crate::surface::Surface;

/// Signal emitted by a decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderEvent {
    /// Asynchronous preparation finished; `start` may be called
    Prepared,
    /// Decoder failure
    Error {
        /// Platform reason code
        code: i32,
        /// Platform extra code
        extra: i32,
    },
}

/// Signal channel handed to a decoder at creation.
///
/// Cloneable and usable from any thread.
#[derive(Debug, Clone)]
pub struct DecoderEventSink {
    session: SessionId,
    control: ControlSender,
}

impl DecoderEventSink {
    pub(crate) fn new(session: SessionId, control: ControlSender) -> Self {
        Self { session, control }
    }

    /// Session this sink reports for.
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Reports that preparation finished.
    pub fn prepared(&self) -> bool {
        self.post(DecoderEvent::Prepared)
    }

    /// Reports a decoder error.
    pub fn error(&self, code: i32, extra: i32) -> bool {
        self.post(DecoderEvent::Error { code, extra })
    }

    fn post(&self, event: DecoderEvent) -> bool {
        self.control.post(ControlMessage::Decoder {
            session: self.session,
            event,
        })
    }
}

/// Media player contract.
///
/// `release` after `stop`/`reset` frees everything; a released decoder is
/// never restarted, a new one is created instead.
pub trait MediaDecoder: Send {
    /// Sets the drawable target frames are decoded into.
    fn set_surface(&mut self, surface: &Surface) -> Result<(), WatermarkError>;

    /// Sets the opaque stream identifier.
    fn set_data_source(&mut self, url: &str) -> Result<(), WatermarkError>;

    /// Enables continuous looping.
    fn set_looping(&mut self, looping: bool);

    /// Keeps the display awake while playing.
    fn set_screen_on_while_playing(&mut self, screen_on: bool);

    /// Begins asynchronous preparation. Completion is signalled through the
    /// event sink.
    fn prepare_async(&mut self) -> Result<(), WatermarkError>;

    /// Starts playback. Only valid after `Prepared`.
    fn start(&mut self) -> Result<(), WatermarkError>;

    /// Returns true while playing.
    fn is_playing(&self) -> bool;

    /// Stops playback.
    fn stop(&mut self);

    /// Resets to the unconfigured state.
    fn reset(&mut self);

    /// Frees all resources. Last call made on the decoder.
    fn release(&mut self);
}

/// Creates decoders, one per playback session.
pub trait DecoderFactory: Send + Sync {
    /// Creates a decoder reporting through `events`.
    fn create(&self, events: DecoderEventSink) -> Result<Box<dyn MediaDecoder>, WatermarkError>;
}

/// Stops and frees a decoder: stop if playing, then reset, then release.
pub(crate) fn shutdown(decoder: &mut dyn MediaDecoder) {
    if decoder.is_playing() {
        decoder.stop();
    }
    decoder.reset();
    decoder.release();
}
