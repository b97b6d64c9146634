//! Recognition stage and confidence gate
//!
//! Takes captured clips, runs them through the speech service under a
//! deadline, and forwards only confident, non-duplicate transcripts as
//! commands.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::events::{Command, PipelineEvent, Transcript};
use crate::feedback::{Cue, Feedback};
use crate::supervisor::{Stage, StageError};
use crate::voice::stt::SpeechService;
use crate::{Error, Recovery, Result};

/// Why the gate turned a transcript away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Passed: forward as a command
    Accepted,
    /// Confidence at or below the threshold
    LowConfidence,
    /// Same text as a recently accepted transcript
    Duplicate,
}

/// Accepts transcripts above a confidence threshold, suppressing
/// repeats of the last few accepted texts
pub struct ConfidenceGate {
    threshold: f32,
    recent: VecDeque<String>,
    window: usize,
}

impl ConfidenceGate {
    /// Gate accepting confidence strictly above `threshold`,
    /// remembering the last `window` accepted texts
    #[must_use]
    pub fn new(threshold: f32, window: usize) -> Self {
        Self {
            threshold,
            recent: VecDeque::with_capacity(window),
            window,
        }
    }

    /// Judge one transcript; accepted texts join the dedup window
    pub fn check(&mut self, transcript: &Transcript) -> GateDecision {
        if transcript.confidence <= self.threshold {
            return GateDecision::LowConfidence;
        }
        if self.recent.iter().any(|t| *t == transcript.text) {
            return GateDecision::Duplicate;
        }

        if self.recent.len() == self.window {
            self.recent.pop_front();
        }
        self.recent.push_back(transcript.text.clone());
        GateDecision::Accepted
    }
}

/// Recognition stage
pub struct RecognizerStage {
    rx: mpsc::Receiver<PipelineEvent>,
    tx: mpsc::Sender<PipelineEvent>,
    service: Arc<dyn SpeechService>,
    gate: ConfidenceGate,
    timeout: Duration,
    feedback: Arc<dyn Feedback>,
}

impl RecognizerStage {
    /// Wire up the stage
    #[must_use]
    pub fn new(
        rx: mpsc::Receiver<PipelineEvent>,
        tx: mpsc::Sender<PipelineEvent>,
        service: Arc<dyn SpeechService>,
        gate: ConfidenceGate,
        timeout: Duration,
        feedback: Arc<dyn Feedback>,
    ) -> Self {
        Self {
            rx,
            tx,
            service,
            gate,
            timeout,
            feedback,
        }
    }

    /// Recognize one clip and forward it if it clears the gate
    async fn handle_clip(
        &mut self,
        clip: &crate::events::AudioClip,
        errors: &mpsc::Sender<StageError>,
    ) {
        let outcome = tokio::time::timeout(self.timeout, self.service.recognize(clip)).await;

        let alternatives = match outcome {
            Err(_) => {
                // Abandon the attempt; this clip is never retried
                tracing::warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "recognition timed out"
                );
                return;
            }
            Ok(Err(Error::NotUnderstood)) => {
                tracing::info!("could not understand audio");
                self.feedback.cue(Cue::Error);
                self.feedback.say("Sorry, I did not catch that");
                return;
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "recognition failed");
                self.feedback.cue(Cue::Error);
                if matches!(e.recovery(), Recovery::Escalate) {
                    let _ = errors.send(StageError::new("recognizer", e)).await;
                }
                return;
            }
            Ok(Ok(alternatives)) => alternatives,
        };

        let Some(best) = alternatives.first() else {
            return;
        };
        let transcript = Transcript::new(best.text.to_lowercase(), best.confidence);

        match self.gate.check(&transcript) {
            GateDecision::Accepted => {
                tracing::info!(
                    text = %transcript.text,
                    confidence = transcript.confidence,
                    "command accepted"
                );
                self.feedback.cue(Cue::Recognized);
                self.feedback.say(&format!("I heard: {}", transcript.text));
                self.feedback.notify("Voice command", &transcript.text);

                if self
                    .tx
                    .send(PipelineEvent::CommandReady(Command::new(transcript.text)))
                    .await
                    .is_err()
                {
                    tracing::warn!("dispatcher channel closed, dropping command");
                }
            }
            GateDecision::LowConfidence => {
                tracing::info!(
                    text = %transcript.text,
                    confidence = transcript.confidence,
                    "rejected: low confidence"
                );
            }
            GateDecision::Duplicate => {
                tracing::info!(text = %transcript.text, "rejected: duplicate");
            }
        }
    }
}

#[async_trait::async_trait]
impl Stage for RecognizerStage {
    fn name(&self) -> &'static str {
        "recognizer"
    }

    async fn run(
        mut self: Box<Self>,
        mut shutdown: watch::Receiver<bool>,
        errors: mpsc::Sender<StageError>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::debug!("recognizer shutting down");
                        return Ok(());
                    }
                }
                event = self.rx.recv() => {
                    match event {
                        Some(PipelineEvent::AudioReady(clip)) => {
                            tracing::debug!(
                                duration_secs = clip.duration_secs(),
                                "recognizing clip"
                            );
                            self.handle_clip(&clip, &errors).await;
                        }
                        Some(other) => {
                            tracing::debug!(?other, "ignoring unexpected event");
                        }
                        None => {
                            return Err(Error::Stage(
                                "recognizer input channel closed".to_string(),
                            ));
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript(text: &str, confidence: f32) -> Transcript {
        Transcript::new(text, confidence)
    }

    #[test]
    fn accepts_above_threshold() {
        let mut gate = ConfidenceGate::new(0.7, 5);
        assert_eq!(
            gate.check(&transcript("turn on", 0.9)),
            GateDecision::Accepted
        );
    }

    #[test]
    fn threshold_is_exclusive() {
        let mut gate = ConfidenceGate::new(0.7, 5);
        assert_eq!(
            gate.check(&transcript("turn on", 0.7)),
            GateDecision::LowConfidence
        );
        assert_eq!(
            gate.check(&transcript("turn on", 0.69)),
            GateDecision::LowConfidence
        );
    }

    #[test]
    fn duplicates_inside_window_are_rejected() {
        let mut gate = ConfidenceGate::new(0.7, 5);
        assert_eq!(gate.check(&transcript("turn on", 0.9)), GateDecision::Accepted);
        assert_eq!(gate.check(&transcript("turn on", 0.95)), GateDecision::Duplicate);
    }

    #[test]
    fn duplicates_age_out_of_the_window() {
        let mut gate = ConfidenceGate::new(0.7, 2);
        assert_eq!(gate.check(&transcript("a", 0.9)), GateDecision::Accepted);
        assert_eq!(gate.check(&transcript("b", 0.9)), GateDecision::Accepted);
        // "a" is evicted once "c" lands
        assert_eq!(gate.check(&transcript("c", 0.9)), GateDecision::Accepted);
        assert_eq!(gate.check(&transcript("a", 0.9)), GateDecision::Accepted);
    }

    #[test]
    fn rejected_texts_do_not_join_the_window() {
        let mut gate = ConfidenceGate::new(0.7, 5);
        assert_eq!(
            gate.check(&transcript("turn on", 0.5)),
            GateDecision::LowConfidence
        );
        // Never accepted, so not a duplicate now
        assert_eq!(gate.check(&transcript("turn on", 0.9)), GateDecision::Accepted);
    }
}
