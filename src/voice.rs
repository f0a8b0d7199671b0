/// Voice capture controller.
///
/// State machine: `Idle → Listening → Finalizing → Idle`, with a
/// `Listening → Cancelled → Idle` side path. Stopping runs the buffered audio
/// through the recognizer and appends the transcript to the draft; cancelling
/// discards it and leaves the draft untouched. Capture and message send are
/// mutually exclusive — the navigator enforces both directions.
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use crate::app::AppEvent;

// ── Collaborators ─────────────────────────────────────────────────────────────

/// Speech recognition engine supplied by the platform.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Begin buffering audio.
    async fn start(&self) -> anyhow::Result<()>;
    /// Stop buffering and transcribe what was captured.
    async fn stop(&self) -> anyhow::Result<String>;
    /// Stop buffering and throw the audio away.
    async fn cancel(&self) -> anyhow::Result<()>;
}

/// Microphone permission, queried once when the chat screen mounts.
#[async_trait]
pub trait Microphone: Send + Sync {
    async fn has_permission(&self) -> bool;
}

// ── State ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    #[default]
    Idle,
    Listening,
    Finalizing,
    Cancelled,
}

pub struct VoiceCapture {
    pub state: CaptureState,
    pub has_permission: bool,
    /// Bumped on cancel so a transcript that finishes afterwards is dropped.
    capture_seq: u64,
}

impl VoiceCapture {
    pub fn new() -> Self {
        Self {
            state: CaptureState::Idle,
            has_permission: false,
            capture_seq: 0,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.state == CaptureState::Listening
    }

    /// Listening or finalizing — while either holds, sending is disallowed.
    pub fn is_active(&self) -> bool {
        matches!(self.state, CaptureState::Listening | CaptureState::Finalizing)
    }

    /// `Idle → Listening`. Rejected silently without permission, while a send
    /// is in flight, or when a capture is already running.
    pub fn begin(&mut self, sending: bool) -> bool {
        if !self.has_permission || sending || self.state != CaptureState::Idle {
            return false;
        }
        self.state = CaptureState::Listening;
        true
    }

    /// `Listening → Finalizing`. Returns the sequence number the transcription
    /// task must echo back, or None when not listening.
    pub fn begin_stop(&mut self) -> Option<u64> {
        if self.state != CaptureState::Listening {
            return None;
        }
        self.state = CaptureState::Finalizing;
        Some(self.capture_seq)
    }

    /// `Listening → Cancelled`. Invalidates any pending transcript.
    pub fn begin_cancel(&mut self) -> bool {
        if self.state != CaptureState::Listening {
            return false;
        }
        self.state = CaptureState::Cancelled;
        self.capture_seq += 1;
        true
    }

    /// `Cancelled → Idle`, once the recognizer acknowledged the discard.
    pub fn apply_cancelled(&mut self) {
        if self.state == CaptureState::Cancelled {
            self.state = CaptureState::Idle;
        }
    }

    /// `Finalizing → Idle`. Returns the transcript to append to the draft, or
    /// None when the result is stale (cancelled meanwhile) or failed.
    pub fn apply_transcript(
        &mut self,
        seq: u64,
        result: Result<String, String>,
    ) -> Option<String> {
        if seq != self.capture_seq {
            // Cancelled while the recognizer was still finalizing
            return None;
        }
        self.state = CaptureState::Idle;
        match result {
            Ok(text) => Some(text),
            Err(e) => {
                warn!("voice transcription failed: {e}");
                None
            }
        }
    }

    pub fn reset(&mut self) {
        self.state = CaptureState::Idle;
        self.capture_seq += 1;
    }
}

impl Default for VoiceCapture {
    fn default() -> Self {
        Self::new()
    }
}

// ── Async tasks ───────────────────────────────────────────────────────────────

pub(crate) async fn query_permission_task(
    mic: Arc<dyn Microphone>,
    tx: UnboundedSender<AppEvent>,
) {
    let granted = mic.has_permission().await;
    let _ = tx.send(AppEvent::MicPermission(granted));
}

pub(crate) async fn start_capture_task(
    recognizer: Arc<dyn Recognizer>,
    tx: UnboundedSender<AppEvent>,
) {
    if let Err(e) = recognizer.start().await {
        let _ = tx.send(AppEvent::CaptureFailed(e.to_string()));
    }
}

pub(crate) async fn stop_capture_task(
    recognizer: Arc<dyn Recognizer>,
    seq: u64,
    tx: UnboundedSender<AppEvent>,
) {
    let result = recognizer.stop().await.map_err(|e| e.to_string());
    let _ = tx.send(AppEvent::TranscriptReady { seq, result });
}

pub(crate) async fn cancel_capture_task(
    recognizer: Arc<dyn Recognizer>,
    tx: UnboundedSender<AppEvent>,
) {
    if let Err(e) = recognizer.cancel().await {
        warn!("voice capture cancel failed: {e}");
    }
    let _ = tx.send(AppEvent::CaptureCancelled);
}
