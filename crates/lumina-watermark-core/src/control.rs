//! Marshaling from the render and decoder threads to the control thread.
//!
//! Nothing running on the render thread or inside the decoder ever calls into
//! controller logic directly. Each notification is posted as a
//! [`ControlMessage`] and handled later, in order, by whichever thread owns
//! the [`PlaybackController`](crate::controller::PlaybackController).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::decoder::DecoderEvent;
use crate::error::WatermarkError;
use crate::surface::SurfaceLifecycleEvent;

/// Identity of one [`RenderSurfaceHolder`](crate::holder::RenderSurfaceHolder).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HolderId(u64);

impl HolderId {
    pub(crate) fn next() -> Self {
        static NEXT_HOLDER_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_HOLDER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value.
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Identity of one playback session (one decoder + drawable lifecycle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub(crate) u64);

impl SessionId {
    pub(crate) fn next() -> Self {
        static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value.
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Notification handled on the control thread.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// Surface lifecycle transition of a holder
    Surface {
        /// Originating holder
        holder: HolderId,
        /// Transition
        event: SurfaceLifecycleEvent,
    },
    /// Fatal GPU failure on a holder's render thread
    RenderFailure {
        /// Originating holder
        holder: HolderId,
        /// Failure
        error: WatermarkError,
    },
    /// Decoder signal
    Decoder {
        /// Session the decoder belongs to
        session: SessionId,
        /// Signal
        event: DecoderEvent,
    },
}

/// Posting end, cloned into every producer context.
#[derive(Debug, Clone)]
pub struct ControlSender {
    tx: Sender<ControlMessage>,
}

impl ControlSender {
    /// Queues `msg` for the control thread. Never blocks.
    ///
    /// Returns false if the control side has been dropped.
    pub fn post(&self, msg: ControlMessage) -> bool {
        match self.tx.send(msg) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("ControlSender: control thread gone, dropping {:?}", e.0);
                false
            }
        }
    }
}

/// Receiving end, owned by the control thread.
#[derive(Debug)]
pub struct ControlReceiver {
    rx: Receiver<ControlMessage>,
}

impl ControlReceiver {
    /// Returns the next queued message without blocking.
    pub fn try_next(&self) -> Option<ControlMessage> {
        match self.rx.try_recv() {
            Ok(msg) => Some(msg),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Waits up to `timeout` for the next message.
    pub fn next_timeout(&self, timeout: Duration) -> Option<ControlMessage> {
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => Some(msg),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Creates an unbounded control channel.
pub fn channel() -> (ControlSender, ControlReceiver) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (ControlSender { tx }, ControlReceiver { rx })
}
