//! Playback controller: session ownership, decoder control and recovery.
//!
//! The controller lives on the control thread. It never runs inside a render
//! or decoder callback: everything those contexts report arrives as a
//! [`ControlMessage`] and is handled by [`PlaybackController::process_pending`]
//! and friends.
//!
//! # Session lifecycle
//!
//! ```text
//! start(url)
//!   ├─ probe ok + watermark ─► RenderSurfaceHolder ─(Created)─► configure decoder
//!   └─ otherwise ────────────► raw surface ─────────────────► configure decoder
//! prepared ─► start ─► Playing
//! error ────► teardown ─► backoff ─► start again with the same url
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use crate::backend::{GpuBackend, GpuResources, NativeModule};
use crate::capability::CapabilityProbe;
use crate::config::PipelineConfig;
use crate::control::{self, ControlMessage, ControlReceiver, ControlSender, HolderId, SessionId};
use crate::decoder::{self, DecoderEvent, DecoderEventSink, DecoderFactory, MediaDecoder};
use crate::error::WatermarkError;
use crate::holder::RenderSurfaceHolder;
use crate::provider::{DrawableProvider, RawSurfaceProvider};
use crate::surface::{DrawableKind, Surface, SurfaceLifecycleEvent};
use crate::watermark::WatermarkAsset;

/// Playback state as seen by the control thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// No session
    Idle,
    /// Drawable requested or decoder preparing
    Preparing,
    /// Decoder prepared, about to start
    Prepared,
    /// Decoder playing
    Playing,
    /// Session failed; recovery pending or given up
    Error,
}

/// Observable controller event, emitted in handling order.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// Surface lifecycle event of a holder
    Surface {
        /// Holder that produced the event
        holder: HolderId,
        /// Transition
        event: SurfaceLifecycleEvent,
    },
    /// Decoder finished preparation
    Prepared,
    /// State transition
    State(PlaybackState),
    /// Pipeline teardown done, recreation scheduled
    Recovering {
        /// 1-based consecutive attempt
        attempt: u32,
        /// Delay before recreation
        backoff: Duration,
    },
    /// Recovery budget exhausted
    GaveUp {
        /// Attempts made
        attempts: u32,
    },
}

/// Platform collaborators the controller builds sessions from.
#[derive(Clone)]
pub struct PlatformServices {
    /// GPU capability check, run once per session
    pub probe: Arc<dyn CapabilityProbe>,
    /// GPU objects for the watermark path
    pub gpu: Arc<dyn GpuBackend>,
    /// Native compositor library guard
    pub module: Arc<NativeModule>,
    /// Decoded watermark, or the reason it could not be decoded
    pub watermark: Result<WatermarkAsset, WatermarkError>,
    /// Raw window surfaces for the degraded path
    pub raw_surfaces: Arc<dyn RawSurfaceProvider>,
    /// Decoder construction
    pub decoders: Arc<dyn DecoderFactory>,
}

impl fmt::Debug for PlatformServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformServices")
            .field("module", &self.module)
            .field("watermark", &self.watermark)
            .finish_non_exhaustive()
    }
}

/// One decoder + drawable lifecycle. Replaced wholesale on recovery.
struct PlaybackSession {
    id: SessionId,
    drawable: DrawableProvider,
    decoder: Option<Box<dyn MediaDecoder>>,
}

/// Owns at most one session and drives it from the control thread.
pub struct PlaybackController {
    config: PipelineConfig,
    services: PlatformServices,
    control_tx: ControlSender,
    control_rx: ControlReceiver,
    observers: Vec<Sender<PlaybackEvent>>,
    state: PlaybackState,
    url: Option<String>,
    session: Option<PlaybackSession>,
    recovery_attempts: u32,
    pending_recovery: Option<Instant>,
    playing_since: Option<Instant>,
}

impl fmt::Debug for PlaybackController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackController")
            .field("state", &self.state)
            .field("url", &self.url)
            .field("drawable", &self.drawable_kind())
            .field("recovery_attempts", &self.recovery_attempts)
            .finish_non_exhaustive()
    }
}

impl PlaybackController {
    /// Creates an idle controller.
    pub fn new(config: PipelineConfig, services: PlatformServices) -> Self {
        let (control_tx, control_rx) = control::channel();
        Self {
            config,
            services,
            control_tx,
            control_rx,
            observers: Vec::new(),
            state: PlaybackState::Idle,
            url: None,
            session: None,
            recovery_attempts: 0,
            pending_recovery: None,
            playing_since: None,
        }
    }

    /// Registers an observer. Events are sent from the control thread while
    /// messages are processed.
    pub fn subscribe(&mut self) -> Receiver<PlaybackEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.observers.push(tx);
        rx
    }

    /// Current state.
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Url of the current (or last) session.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Configuration in use.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Drawable variant of the live session.
    pub fn drawable_kind(&self) -> Option<DrawableKind> {
        self.session.as_ref().map(|s| s.drawable.kind())
    }

    /// Holder of the live session, if it is on the GPU path.
    pub fn current_holder_id(&self) -> Option<HolderId> {
        self.session.as_ref().and_then(|s| s.drawable.holder_id())
    }

    /// Live session id.
    pub fn current_session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id)
    }

    /// Drawable surface of the live session, once available.
    pub fn surface(&self) -> Option<Surface> {
        self.session.as_ref().and_then(|s| s.drawable.surface())
    }

    /// Consecutive recoveries since the last stable playback.
    pub fn recovery_attempts(&self) -> u32 {
        self.recovery_attempts
    }

    /// Returns true while a delayed recreation is scheduled.
    pub fn recovery_pending(&self) -> bool {
        self.pending_recovery.is_some()
    }

    /// Starts playing `url`, replacing any current session.
    ///
    /// On the GPU path the decoder is configured once the holder reports
    /// `Created`; on the raw path it is configured before this returns.
    pub fn start(&mut self, url: impl Into<String>) -> Result<(), WatermarkError> {
        if self.session.is_some() || self.pending_recovery.is_some() {
            self.stop();
        }
        self.url = Some(url.into());
        self.recovery_attempts = 0;
        if let Err(e) = self.build_session() {
            tracing::error!("PlaybackController: start failed: {}", e);
            self.teardown();
            self.set_state(PlaybackState::Error);
            return Err(e);
        }
        Ok(())
    }

    /// Stops and releases the decoder, then destroys the drawable.
    ///
    /// Safe at any point, including mid-preparation: a pending `prepared`
    /// signal of the stopped session is discarded when it arrives.
    pub fn stop(&mut self) {
        self.pending_recovery = None;
        self.playing_since = None;
        if self.session.is_some() {
            self.teardown();
            tracing::info!("PlaybackController: stopped");
        }
        self.set_state(PlaybackState::Idle);
    }

    /// Handles every queued message without blocking. Returns how many were
    /// handled.
    pub fn process_pending(&mut self) -> usize {
        self.poll_recovery();
        let mut handled = 0;
        while let Some(msg) = self.control_rx.try_next() {
            self.handle(msg);
            handled += 1;
            self.poll_recovery();
        }
        handled
    }

    /// Handles messages for `timeout`, waking for scheduled recoveries.
    pub fn process_for(&mut self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut handled = self.process_pending();
        loop {
            let now = Instant::now();
            if now >= deadline {
                return handled;
            }
            if let Some(msg) = self.control_rx.next_timeout(self.next_wait(deadline - now)) {
                self.handle(msg);
                handled += 1;
            }
            handled += self.process_pending();
        }
    }

    /// Handles messages until `done` returns true or `timeout` elapses.
    /// Returns whether `done` was satisfied.
    pub fn run_until<F>(&mut self, mut done: F, timeout: Duration) -> bool
    where
        F: FnMut(&Self) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            self.process_pending();
            if done(self) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let wait = self.next_wait(deadline - now).min(Duration::from_millis(10));
            if let Some(msg) = self.control_rx.next_timeout(wait) {
                self.handle(msg);
            }
        }
    }

    fn next_wait(&self, remaining: Duration) -> Duration {
        match self.pending_recovery {
            Some(at) => remaining.min(at.saturating_duration_since(Instant::now())),
            None => remaining,
        }
    }

    fn handle(&mut self, msg: ControlMessage) {
        match msg {
            ControlMessage::Surface { holder, event } => self.on_surface_event(holder, event),
            ControlMessage::RenderFailure { holder, error } => {
                if self.current_holder_id() != Some(holder) {
                    tracing::debug!(
                        "PlaybackController: ignoring render failure of stale holder {}",
                        holder.get()
                    );
                    return;
                }
                tracing::warn!("PlaybackController: render failure: {}", error);
                self.recover(error);
            }
            ControlMessage::Decoder { session, event } => {
                if self.current_session_id() != Some(session) {
                    tracing::debug!(
                        "PlaybackController: discarding {:?} from stale session {}",
                        event,
                        session.get()
                    );
                    return;
                }
                match event {
                    DecoderEvent::Prepared => self.on_prepared(),
                    DecoderEvent::Error { code, extra } => {
                        tracing::warn!("PlaybackController: decoder error ({code}, {extra})");
                        self.recover(WatermarkError::Decoder { code });
                    }
                }
            }
        }
    }

    fn on_surface_event(&mut self, holder: HolderId, event: SurfaceLifecycleEvent) {
        // Observers see every holder's lifecycle, including retired ones.
        self.emit(PlaybackEvent::Surface { holder, event });
        if self.current_holder_id() != Some(holder) {
            return;
        }
        match event {
            SurfaceLifecycleEvent::Created => {
                if self.state != PlaybackState::Preparing {
                    return;
                }
                if let Err(e) = self.configure_decoder() {
                    tracing::warn!("PlaybackController: decoder setup failed: {}", e);
                    self.recover(e);
                }
            }
            SurfaceLifecycleEvent::Changed { width, height, .. } => {
                tracing::debug!("PlaybackController: surface {}x{}", width, height);
            }
            SurfaceLifecycleEvent::Destroyed => {
                tracing::info!("PlaybackController: surface destroyed, stopping session");
                self.stop();
            }
        }
    }

    fn on_prepared(&mut self) {
        if self.state != PlaybackState::Preparing {
            tracing::debug!("PlaybackController: prepared signal in {:?}, ignoring", self.state);
            return;
        }
        self.emit(PlaybackEvent::Prepared);
        self.set_state(PlaybackState::Prepared);

        let result = match self.session.as_mut().and_then(|s| s.decoder.as_mut()) {
            Some(decoder) => decoder.start(),
            None => Err(WatermarkError::DecoderInit("prepared without a decoder".into())),
        };
        match result {
            Ok(()) => {
                self.playing_since = Some(Instant::now());
                self.set_state(PlaybackState::Playing);
                tracing::info!("PlaybackController: playing {}", self.url.as_deref().unwrap_or(""));
            }
            Err(e) => {
                tracing::warn!("PlaybackController: decoder start failed: {}", e);
                self.recover(e);
            }
        }
    }

    /// Builds a fresh session for the current url.
    fn build_session(&mut self) -> Result<(), WatermarkError> {
        if self.url.is_none() {
            return Err(WatermarkError::Generic("no data source".into()));
        }
        let drawable = self.select_drawable()?;
        let session = PlaybackSession {
            id: SessionId::next(),
            drawable,
            decoder: None,
        };
        tracing::info!(
            "PlaybackController: session {} on {:?} drawable",
            session.id.get(),
            session.drawable.kind()
        );
        let raw = session.drawable.kind() == DrawableKind::Raw;
        self.session = Some(session);
        self.set_state(PlaybackState::Preparing);

        if raw {
            self.configure_decoder()?;
        }
        Ok(())
    }

    /// GPU holder when the device and the watermark allow it, raw surface
    /// otherwise.
    fn select_drawable(&self) -> Result<DrawableProvider, WatermarkError> {
        if self.services.probe.supported(self.config.min_gles_version) {
            match &self.services.watermark {
                Ok(watermark) => {
                    let resources = GpuResources {
                        backend: Arc::clone(&self.services.gpu),
                        module: Arc::clone(&self.services.module),
                        watermark: watermark.clone(),
                    };
                    match RenderSurfaceHolder::new(
                        &resources,
                        self.control_tx.clone(),
                        self.config.render_command_timeout,
                    ) {
                        Ok(holder) => return Ok(DrawableProvider::Gpu(holder)),
                        Err(e) => tracing::warn!(
                            "PlaybackController: GPU drawable unavailable, playing without watermark: {}",
                            e
                        ),
                    }
                }
                Err(e) => tracing::warn!(
                    "PlaybackController: watermark unavailable, playing without it: {}",
                    e
                ),
            }
        } else {
            tracing::info!("PlaybackController: GPU compositing unsupported, using raw surface");
        }
        Ok(DrawableProvider::Raw(self.services.raw_surfaces.raw_surface()?))
    }

    fn configure_decoder(&mut self) -> Result<(), WatermarkError> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| WatermarkError::Generic("no data source".into()))?;
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| WatermarkError::Generic("no session".into()))?;
        let surface = session
            .drawable
            .surface()
            .ok_or_else(|| WatermarkError::GpuResource("drawable surface unavailable".into()))?;

        let sink = DecoderEventSink::new(session.id, self.control_tx.clone());
        let mut decoder = self.services.decoders.create(sink)?;
        if let Err(e) = apply_source(&mut *decoder, &surface, url, &self.config) {
            decoder::shutdown(&mut *decoder);
            return Err(e);
        }
        tracing::debug!(
            "PlaybackController: decoder configured on surface {:?}",
            surface.id()
        );
        session.decoder = Some(decoder);
        Ok(())
    }

    /// Full teardown, then recreation according to the recovery policy.
    fn recover(&mut self, error: WatermarkError) {
        if let Some(since) = self.playing_since.take() {
            if since.elapsed() >= self.config.recovery.reset_after {
                self.recovery_attempts = 0;
            }
        }
        self.teardown();
        self.set_state(PlaybackState::Error);

        if !error.is_recoverable() {
            tracing::error!("PlaybackController: unrecoverable error: {}", error);
            return;
        }

        self.recovery_attempts += 1;
        let attempt = self.recovery_attempts;
        let Some(backoff) = self.config.recovery.backoff_for(attempt) else {
            let attempts = attempt - 1;
            tracing::error!(
                "PlaybackController: giving up after {} recovery attempts: {}",
                attempts,
                error
            );
            self.emit(PlaybackEvent::GaveUp { attempts });
            return;
        };

        tracing::warn!(
            "PlaybackController: recreating pipeline (attempt {}, backoff {:?}) after: {}",
            attempt,
            backoff,
            error
        );
        self.emit(PlaybackEvent::Recovering { attempt, backoff });

        if !backoff.is_zero() {
            self.pending_recovery = Some(Instant::now() + backoff);
            return;
        }
        if let Err(e) = self.build_session() {
            tracing::warn!("PlaybackController: recreation failed: {}", e);
            self.teardown();
            self.set_state(PlaybackState::Error);
            if !e.is_recoverable() {
                tracing::error!("PlaybackController: unrecoverable error: {}", e);
                return;
            }
            // Retried from the next process call, never inline.
            self.pending_recovery = Some(Instant::now());
        }
    }

    fn poll_recovery(&mut self) {
        let Some(at) = self.pending_recovery else {
            return;
        };
        if Instant::now() < at {
            return;
        }
        self.pending_recovery = None;
        if let Err(e) = self.build_session() {
            tracing::warn!("PlaybackController: delayed recreation failed: {}", e);
            self.recover(e);
        }
    }

    /// Decoder first, then the drawable.
    fn teardown(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        if let Some(mut decoder) = session.decoder.take() {
            decoder::shutdown(&mut *decoder);
        }
        session.drawable.destroy();
        tracing::debug!("PlaybackController: session {} torn down", session.id.get());
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state == state {
            return;
        }
        tracing::debug!("PlaybackController: {:?} -> {:?}", self.state, state);
        self.state = state;
        self.emit(PlaybackEvent::State(state));
    }

    fn emit(&mut self, event: PlaybackEvent) {
        self.observers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.stop();
    }
}

fn apply_source(
    decoder: &mut dyn MediaDecoder,
    surface: &Surface,
    url: &str,
    config: &PipelineConfig,
) -> Result<(), WatermarkError> {
    decoder.set_surface(surface)?;
    decoder.set_screen_on_while_playing(config.keep_screen_on);
    decoder.set_data_source(url)?;
    decoder.set_looping(config.looping);
    decoder.prepare_async()
}
