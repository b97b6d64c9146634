//! Daemon wiring
//!
//! Connects to the bridge, builds the pipeline, and keeps it running
//! under the supervisor until Ctrl-C.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::bridge::{HueBridge, LightBridge};
use crate::config::{Config, Pairing};
use crate::dispatch::Dispatcher;
use crate::feedback::{Feedback, SystemFeedback};
use crate::supervisor::{
    Pipeline, StageError, StageHandle, Supervisor, SupervisorConfig,
};
use crate::timer::TimerService;
use crate::voice::capture::{CaptureMode, CaptureStage};
use crate::voice::recognize::{ConfidenceGate, RecognizerStage};
use crate::voice::source::{CpalFrameSourceFactory, FrameSourceFactory};
use crate::voice::stt::{HttpSpeechService, SpeechService};
use crate::voice::wake::{EnergyWakeBackend, WakeBackend, WakeStage};
use crate::{Error, Result};

/// Queue depths between stages. Wake events are fire-and-forget, so
/// that queue stays short; the dispatcher queue absorbs timer bursts.
const WAKE_QUEUE: usize = 4;
const AUDIO_QUEUE: usize = 8;
const COMMAND_QUEUE: usize = 16;

/// The running daemon
pub struct Daemon {
    config: Arc<Config>,
    mode: CaptureMode,
}

impl Daemon {
    /// Create a daemon for the given configuration
    #[must_use]
    pub fn new(config: Config, mode: CaptureMode) -> Self {
        Self {
            config: Arc::new(config),
            mode,
        }
    }

    /// Run until Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns error if startup fails (no bridge, unusable wake
    /// configuration) or a pipeline rebuild fails
    pub async fn run(&self) -> Result<()> {
        let bridge = Arc::new(self.connect_bridge().await?);

        let lights = bridge.list_lights().await?;
        tracing::info!(lights = lights.len(), "connected to bridge");

        // Fail fast on an unusable wake configuration rather than in
        // the first pipeline build
        if self.mode == CaptureMode::Gated {
            EnergyWakeBackend::create(
                &self.config.wake_keyword,
                self.config.wake_sensitivity,
            )?;
        }

        let bridge: Arc<dyn LightBridge> = bridge;
        let speech: Arc<dyn SpeechService> = Arc::new(HttpSpeechService::new(
            self.config.stt_url.clone(),
            self.config.stt_api_key.clone(),
        ));
        let feedback: Arc<dyn Feedback> = Arc::new(SystemFeedback::new());
        let sources: Arc<dyn FrameSourceFactory> = Arc::new(CpalFrameSourceFactory);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = shutdown_tx.send(()).await;
            }
        });

        let config = Arc::clone(&self.config);
        let mode = self.mode;
        let build = move |errors: mpsc::Sender<StageError>| {
            build_pipeline(
                &config,
                mode,
                Arc::clone(&bridge),
                Arc::clone(&speech),
                Arc::clone(&feedback),
                sources.as_ref(),
                &errors,
            )
        };

        let mut supervisor = Supervisor::new(
            build,
            SupervisorConfig {
                max_errors: self.config.max_errors,
                error_window: self.config.error_window,
                restart_backoff: self.config.restart_backoff,
                poll_interval: self.config.poll_interval,
            },
        );
        supervisor.run(&mut shutdown_rx).await
    }

    /// Load the stored pairing or run the link-button handshake
    async fn connect_bridge(&self) -> Result<HueBridge> {
        let stored = Pairing::load(&self.config.pairing_path)?;

        if let Some(pairing) = stored {
            let overridden = self
                .config
                .bridge_address
                .as_ref()
                .is_some_and(|addr| *addr != pairing.bridge_address);
            if overridden {
                tracing::info!("bridge address changed, re-pairing");
            } else {
                tracing::info!(address = %pairing.bridge_address, "using stored pairing");
                return HueBridge::new(pairing.bridge_address, pairing.auth_token);
            }
        }

        let address = self.config.bridge_address.clone().ok_or_else(|| {
            Error::Config(
                "no bridge address; pass --bridge or set HUE_BRIDGE_IP".to_string(),
            )
        })?;

        let auth_token = HueBridge::pair(&address).await?;
        let pairing = Pairing {
            bridge_address: address.clone(),
            auth_token: auth_token.clone(),
        };
        pairing.store(&self.config.pairing_path)?;

        HueBridge::new(address, auth_token)
    }
}

/// Build one pipeline incarnation: fresh channels, fresh timer
/// service, fresh stages
fn build_pipeline(
    config: &Config,
    mode: CaptureMode,
    bridge: Arc<dyn LightBridge>,
    speech: Arc<dyn SpeechService>,
    feedback: Arc<dyn Feedback>,
    sources: &dyn FrameSourceFactory,
    errors: &mpsc::Sender<StageError>,
) -> Result<Pipeline> {
    let (wake_tx, wake_rx) = mpsc::channel(WAKE_QUEUE);
    let (audio_tx, audio_rx) = mpsc::channel(AUDIO_QUEUE);
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
    let (cooldown_tx, cooldown_rx) = watch::channel(None);
    let timers = TimerService::new(command_tx.clone());

    let mut stages = Vec::new();

    if mode == CaptureMode::Gated {
        let backend =
            EnergyWakeBackend::create(&config.wake_keyword, config.wake_sensitivity)?;
        let source = sources.open(backend.frame_length())?;
        let wake = WakeStage::new(
            source,
            Box::new(backend),
            wake_tx,
            Arc::clone(&feedback),
        );
        stages.push(StageHandle::spawn(Box::new(wake), errors.clone()));
    }

    let capture_source = sources.open(512)?;
    let capture = CaptureStage::new(
        mode,
        capture_source,
        wake_rx,
        audio_tx,
        cooldown_rx,
        config.cooldown,
        config.command_timeout,
        config.phrase_limit,
        config.activation_window,
    );
    stages.push(StageHandle::spawn(Box::new(capture), errors.clone()));

    let recognizer = RecognizerStage::new(
        audio_rx,
        command_tx,
        speech,
        ConfidenceGate::new(config.confidence_threshold, config.debounce_window),
        config.recognition_timeout,
        Arc::clone(&feedback),
    );
    stages.push(StageHandle::spawn(Box::new(recognizer), errors.clone()));

    let dispatcher = Dispatcher::new(
        command_rx,
        bridge,
        timers.clone(),
        feedback,
        cooldown_tx,
        config.cache_ttl,
        config.undo_depth,
        config.fuzzy_threshold,
    );
    stages.push(StageHandle::spawn(Box::new(dispatcher), errors.clone()));

    Ok(Pipeline { stages, timers })
}
