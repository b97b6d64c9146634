//! Utterance capture stage
//!
//! Records one utterance at a time, bounded by the phrase limit and
//! trailing silence. In gated mode the stage idles until the wake
//! stage fires; `--fallback` runs it continuously. Either way the
//! post-command cooldown holds capture back.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::events::{AudioClip, PipelineEvent};
use crate::supervisor::{Stage, StageError};
use crate::voice::source::{rms_energy, FrameSource};
use crate::{Error, Result};

/// RMS energy above which a frame counts as speech
const SPEECH_THRESHOLD: f32 = 0.02;

/// Trailing silence that ends an utterance, as a fraction of a second
/// of samples
const TRAILING_SILENCE_DIVISOR: u32 = 2;

/// How capture is triggered, fixed at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Record only after a wake detection
    Gated,
    /// Record back to back without a wake stage
    Continuous,
}

/// Capture stage
pub struct CaptureStage {
    mode: CaptureMode,
    source: Box<dyn FrameSource>,
    wake_rx: mpsc::Receiver<PipelineEvent>,
    tx: mpsc::Sender<PipelineEvent>,
    cooldown_rx: watch::Receiver<Option<Instant>>,
    cooldown: Duration,
    command_timeout: Duration,
    phrase_limit: Duration,
    activation_window: Duration,
}

impl CaptureStage {
    /// Wire up the stage
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        mode: CaptureMode,
        source: Box<dyn FrameSource>,
        wake_rx: mpsc::Receiver<PipelineEvent>,
        tx: mpsc::Sender<PipelineEvent>,
        cooldown_rx: watch::Receiver<Option<Instant>>,
        cooldown: Duration,
        command_timeout: Duration,
        phrase_limit: Duration,
        activation_window: Duration,
    ) -> Self {
        Self {
            mode,
            source,
            wake_rx,
            tx,
            cooldown_rx,
            cooldown,
            command_timeout,
            phrase_limit,
            activation_window,
        }
    }

    /// Time left on the post-command cooldown, if any
    fn cooldown_remaining(&self) -> Option<Duration> {
        let marked = (*self.cooldown_rx.borrow())?;
        let elapsed = marked.elapsed();
        (elapsed < self.cooldown).then(|| self.cooldown - elapsed)
    }

    /// Record one utterance
    ///
    /// Waits up to the command timeout for speech to start, then
    /// records until trailing silence, the phrase limit, or `deadline`.
    /// Returns `None` if no speech started in time; that is a silent
    /// retry, not an error.
    async fn capture_utterance(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
        deadline: Instant,
    ) -> Result<Option<AudioClip>> {
        let sample_rate = self.source.sample_rate();
        // Half a second of samples
        let silence_samples = (sample_rate / TRAILING_SILENCE_DIVISOR) as usize;
        let speech_deadline = Instant::now() + self.command_timeout;

        let mut samples: Vec<i16> = Vec::new();
        let mut recording = false;
        let mut phrase_deadline = deadline;
        let mut silence = 0usize;

        loop {
            if *shutdown.borrow() {
                return Ok(None);
            }

            let wait_until = if recording {
                phrase_deadline.min(deadline)
            } else {
                speech_deadline.min(deadline)
            };

            let frame = tokio::select! {
                _ = shutdown.changed() => continue,
                () = tokio::time::sleep_until(wait_until) => {
                    if recording {
                        break;
                    }
                    tracing::debug!("no speech before timeout");
                    return Ok(None);
                }
                frame = self.source.next_frame() => frame?,
            };

            let energy = rms_energy(&frame);
            if energy > SPEECH_THRESHOLD {
                if !recording {
                    recording = true;
                    phrase_deadline = Instant::now() + self.phrase_limit;
                    tracing::debug!(energy, "utterance started");
                }
                silence = 0;
                samples.extend_from_slice(&frame);
            } else if recording {
                silence += frame.len();
                samples.extend_from_slice(&frame);
                if silence >= silence_samples {
                    break;
                }
            }
        }

        if samples.is_empty() {
            return Ok(None);
        }

        let clip = AudioClip::new(samples, sample_rate);
        tracing::info!(duration_secs = clip.duration_secs(), "captured utterance");
        Ok(Some(clip))
    }

    /// Forward a clip to the recognizer
    async fn emit(&self, clip: AudioClip) {
        if self.tx.send(PipelineEvent::AudioReady(clip)).await.is_err() {
            tracing::warn!("recognizer channel closed, dropping clip");
        }
    }

    async fn run_gated(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            let event = tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                    continue;
                }
                event = self.wake_rx.recv() => event,
            };

            match event {
                Some(PipelineEvent::WakeDetected) => {
                    if let Some(remaining) = self.cooldown_remaining() {
                        tracing::debug!(
                            remaining_ms = remaining.as_millis(),
                            "wake during cooldown, ignoring"
                        );
                        continue;
                    }

                    // Frames queued while idling here are stale audio
                    // from before the wake word
                    self.source.drain();

                    let window_end = Instant::now() + self.activation_window;
                    match self.capture_utterance(shutdown, window_end).await? {
                        Some(clip) => self.emit(clip).await,
                        None => {
                            tracing::info!("activation window closed without speech");
                        }
                    }
                }
                Some(other) => {
                    tracing::debug!(?other, "ignoring unexpected event");
                }
                None => {
                    return Err(Error::Stage("wake channel closed".to_string()));
                }
            }
        }
    }

    async fn run_continuous(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        tracing::info!("continuous capture active");
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            if let Some(remaining) = self.cooldown_remaining() {
                tokio::select! {
                    _ = shutdown.changed() => {}
                    () = tokio::time::sleep(remaining) => {}
                }
                continue;
            }

            let deadline = Instant::now() + self.command_timeout + self.phrase_limit;
            if let Some(clip) = self.capture_utterance(shutdown, deadline).await? {
                self.emit(clip).await;
            }
        }
    }
}

#[async_trait::async_trait]
impl Stage for CaptureStage {
    fn name(&self) -> &'static str {
        "capture"
    }

    async fn run(
        mut self: Box<Self>,
        mut shutdown: watch::Receiver<bool>,
        _errors: mpsc::Sender<StageError>,
    ) -> Result<()> {
        match self.mode {
            CaptureMode::Gated => self.run_gated(&mut shutdown).await,
            CaptureMode::Continuous => self.run_continuous(&mut shutdown).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::voice::source::SAMPLE_RATE;

    /// Plays a script of frames, one per 32 ms of (simulated) time
    struct ScriptedSource {
        frames: std::collections::VecDeque<Vec<i16>>,
        backlog: usize,
    }

    impl ScriptedSource {
        fn new(frames: Vec<Vec<i16>>) -> Self {
            Self {
                frames: frames.into(),
                backlog: 0,
            }
        }

        /// Treat the first `backlog` frames as already queued before
        /// the reader started listening
        fn with_backlog(frames: Vec<Vec<i16>>, backlog: usize) -> Self {
            Self {
                frames: frames.into(),
                backlog,
            }
        }
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn next_frame(&mut self) -> Result<Vec<i16>> {
            tokio::time::sleep(Duration::from_millis(32)).await;
            self.frames
                .pop_front()
                .ok_or_else(|| Error::Audio("script exhausted".to_string()))
        }

        fn drain(&mut self) {
            for _ in 0..self.backlog {
                self.frames.pop_front();
            }
            self.backlog = 0;
        }

        fn sample_rate(&self) -> u32 {
            SAMPLE_RATE
        }
    }

    fn loud() -> Vec<i16> {
        vec![8000; 512]
    }

    fn quiet() -> Vec<i16> {
        vec![0; 512]
    }

    fn stage(source: ScriptedSource) -> (CaptureStage, mpsc::Receiver<PipelineEvent>) {
        let (_wake_tx, wake_rx) = mpsc::channel(4);
        let (tx, rx) = mpsc::channel(4);
        let (_cool_tx, cooldown_rx) = watch::channel(None);
        let stage = CaptureStage::new(
            CaptureMode::Gated,
            Box::new(source),
            wake_rx,
            tx,
            cooldown_rx,
            Duration::from_secs(5),
            Duration::from_secs(5),
            Duration::from_secs(5),
            Duration::from_secs(10),
        );
        (stage, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn trailing_silence_ends_the_utterance() {
        // A second of speech, then plenty of silence
        let mut frames: Vec<Vec<i16>> = (0..31).map(|_| loud()).collect();
        frames.extend((0..40).map(|_| quiet()));

        let (mut stage, _rx) = stage(ScriptedSource::new(frames));
        let (_tx, mut shutdown) = watch::channel(false);

        let clip = stage
            .capture_utterance(&mut shutdown, Instant::now() + Duration::from_secs(10))
            .await
            .expect("capture")
            .expect("clip");

        // Speech plus roughly half a second of trailing silence
        assert!(clip.samples.len() >= 31 * 512);
        assert!(clip.duration_secs() < 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn silence_only_returns_none() {
        let frames: Vec<Vec<i16>> = (0..400).map(|_| quiet()).collect();
        let (mut stage, _rx) = stage(ScriptedSource::new(frames));
        let (_tx, mut shutdown) = watch::channel(false);

        let clip = stage
            .capture_utterance(&mut shutdown, Instant::now() + Duration::from_secs(10))
            .await
            .expect("capture");
        assert!(clip.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn phrase_limit_bounds_the_utterance() {
        // Nonstop speech longer than the phrase limit
        let frames: Vec<Vec<i16>> = (0..400).map(|_| loud()).collect();
        let (mut stage, _rx) = stage(ScriptedSource::new(frames));
        let (_tx, mut shutdown) = watch::channel(false);

        let clip = stage
            .capture_utterance(&mut shutdown, Instant::now() + Duration::from_secs(60))
            .await
            .expect("capture")
            .expect("clip");

        // Bounded by the 5 s phrase limit, not the script length
        assert!(clip.duration_secs() <= 6.0);
    }

    #[tokio::test(start_paused = true)]
    async fn wake_discards_audio_buffered_while_idle() {
        // A second of loud audio queued up before the wake word, then
        // nothing but silence once capture is live
        let mut frames: Vec<Vec<i16>> = (0..31).map(|_| loud()).collect();
        frames.extend((0..200).map(|_| quiet()));
        let source = ScriptedSource::with_backlog(frames, 31);

        let (wake_tx, wake_rx) = mpsc::channel(4);
        let (tx, mut rx) = mpsc::channel(4);
        let (_cool_tx, cooldown_rx) = watch::channel(None);
        let stage = CaptureStage::new(
            CaptureMode::Gated,
            Box::new(source),
            wake_rx,
            tx,
            cooldown_rx,
            Duration::from_secs(5),
            Duration::from_secs(5),
            Duration::from_secs(5),
            Duration::from_secs(10),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (errors_tx, _errors_rx) = mpsc::channel(4);
        let task = tokio::spawn(Box::new(stage).run(shutdown_rx, errors_tx));

        wake_tx
            .send(PipelineEvent::WakeDetected)
            .await
            .expect("wake");
        tokio::time::sleep(Duration::from_secs(12)).await;

        // The stale loud frames never reached capture, so nothing
        // looked like speech and no clip was emitted
        assert!(rx.try_recv().is_err());

        shutdown_tx.send(true).expect("shutdown");
        task.await.expect("join").expect("stage result");
    }

    #[test]
    fn cooldown_arithmetic() {
        let (_wake_tx, wake_rx) = mpsc::channel(4);
        let (tx, _rx) = mpsc::channel(4);
        let (cool_tx, cooldown_rx) = watch::channel(None);
        let stage = CaptureStage::new(
            CaptureMode::Gated,
            Box::new(ScriptedSource::new(vec![])),
            wake_rx,
            tx,
            cooldown_rx,
            Duration::from_secs(5),
            Duration::from_secs(5),
            Duration::from_secs(5),
            Duration::from_secs(10),
        );

        assert!(stage.cooldown_remaining().is_none());
        cool_tx.send_replace(Some(Instant::now()));
        assert!(stage.cooldown_remaining().is_some());
    }
}
