//! Wake detection stage
//!
//! Feeds microphone frames to a wake backend and emits `WakeDetected`
//! when the keyword fires. Detection is fire-and-forget: if the
//! downstream channel is full the event is dropped, never queued.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::events::PipelineEvent;
use crate::feedback::{Cue, Feedback};
use crate::supervisor::{Stage, StageError};
use crate::voice::source::{rms_energy, FrameSource};
use crate::{Error, Result};

/// Keywords the built-in backend can listen for
const KEYWORDS: &[&str] = &["philips", "jarvis", "computer", "porcupine"];

/// Fallback order when the configured keyword is unavailable
const DEFAULT_KEYWORDS: &[&str] = &["jarvis", "computer", "porcupine"];

/// Frame size fed to the backend
const FRAME_LENGTH: usize = 512;

/// Baseline RMS energy (of full-scale) treated as speech at
/// sensitivity 0.5
const BASE_THRESHOLD: f32 = 0.03;

/// Consecutive loud frames required to trigger (~0.3 s at 16 kHz)
const TRIGGER_FRAMES: usize = 9;

/// Acoustic wake-word model boundary
pub trait WakeBackend: Send {
    /// Feed one frame; returns the keyword index on detection
    fn process_frame(&mut self, frame: &[i16]) -> Option<usize>;

    /// Samples per frame the backend expects
    fn frame_length(&self) -> usize;
}

/// Energy-based wake backend
///
/// Triggers on sustained speech-level energy. Sensitivity widens or
/// narrows the energy threshold; it does not change the trigger
/// duration.
pub struct EnergyWakeBackend {
    keyword_index: usize,
    threshold: f32,
    loud_frames: usize,
}

impl EnergyWakeBackend {
    /// Build a backend for `keyword` at the given sensitivity
    ///
    /// An unknown keyword falls back through the default preference
    /// list, logging the substitution. Refusing to listen at all is
    /// reserved for genuinely unusable input.
    ///
    /// # Errors
    ///
    /// Returns `Error::WakeWord` if the sensitivity is out of range or
    /// no keyword can be resolved
    pub fn create(keyword: &str, sensitivity: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&sensitivity) {
            return Err(Error::WakeWord(format!(
                "sensitivity {sensitivity} outside [0, 1]"
            )));
        }

        let keyword_index = resolve_keyword(keyword)?;

        // Higher sensitivity lowers the energy bar
        let threshold = BASE_THRESHOLD * (1.5 - sensitivity);

        tracing::info!(
            keyword = KEYWORDS[keyword_index],
            sensitivity,
            "wake backend ready"
        );

        Ok(Self {
            keyword_index,
            threshold,
            loud_frames: 0,
        })
    }
}

/// Resolve the requested keyword, falling back through the defaults
fn resolve_keyword(requested: &str) -> Result<usize> {
    let requested = requested.to_lowercase();
    if let Some(index) = KEYWORDS.iter().position(|k| **k == requested) {
        return Ok(index);
    }

    for fallback in DEFAULT_KEYWORDS {
        if let Some(index) = KEYWORDS.iter().position(|k| k == fallback) {
            tracing::warn!(
                requested,
                substituted = fallback,
                "keyword unavailable, using fallback"
            );
            return Ok(index);
        }
    }

    Err(Error::WakeWord(format!(
        "no usable wake keyword for '{requested}'"
    )))
}

impl WakeBackend for EnergyWakeBackend {
    fn process_frame(&mut self, frame: &[i16]) -> Option<usize> {
        let energy = rms_energy(frame);

        if energy > self.threshold {
            self.loud_frames += 1;
            if self.loud_frames >= TRIGGER_FRAMES {
                self.loud_frames = 0;
                tracing::debug!(energy, "wake trigger");
                return Some(self.keyword_index);
            }
        } else {
            self.loud_frames = 0;
        }
        None
    }

    fn frame_length(&self) -> usize {
        FRAME_LENGTH
    }
}

/// Wake detection stage
pub struct WakeStage {
    source: Box<dyn FrameSource>,
    backend: Box<dyn WakeBackend>,
    tx: mpsc::Sender<PipelineEvent>,
    feedback: Arc<dyn Feedback>,
}

impl WakeStage {
    /// Wire up the stage
    #[must_use]
    pub fn new(
        source: Box<dyn FrameSource>,
        backend: Box<dyn WakeBackend>,
        tx: mpsc::Sender<PipelineEvent>,
        feedback: Arc<dyn Feedback>,
    ) -> Self {
        Self {
            source,
            backend,
            tx,
            feedback,
        }
    }
}

#[async_trait::async_trait]
impl Stage for WakeStage {
    fn name(&self) -> &'static str {
        "wake"
    }

    async fn run(
        mut self: Box<Self>,
        mut shutdown: watch::Receiver<bool>,
        _errors: mpsc::Sender<StageError>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::debug!("wake stage shutting down");
                        return Ok(());
                    }
                }
                frame = self.source.next_frame() => {
                    let frame = frame?;
                    if let Some(index) = self.backend.process_frame(&frame) {
                        tracing::info!(keyword = KEYWORDS[index], "wake word detected");
                        self.feedback.cue(Cue::Wake);
                        if self.tx.try_send(PipelineEvent::WakeDetected).is_err() {
                            tracing::debug!("wake channel full, dropping detection");
                        }
                    }
                }
            }
        }
    }
}
