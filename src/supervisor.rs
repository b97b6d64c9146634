//! Pipeline supervision
//!
//! Every stage runs as its own task under a uniform abstraction. The
//! supervisor polls for dead stages and counts recoverable errors in a
//! rolling window; either trigger tears the whole pipeline down and
//! rebuilds it after a backoff. The error window resets on restart so
//! one bad stretch cannot trigger twice.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::timer::TimerService;
use crate::{Error, Result};

/// A recoverable error reported by a running stage
#[derive(Debug)]
pub struct StageError {
    /// Stage that reported it
    pub stage: &'static str,
    /// The error itself
    pub error: Error,
}

impl StageError {
    /// Tag an error with its reporting stage
    #[must_use]
    pub const fn new(stage: &'static str, error: Error) -> Self {
        Self { stage, error }
    }
}

/// One pipeline stage, spawned and owned by the supervisor
#[async_trait::async_trait]
pub trait Stage: Send {
    /// Stage name for logs
    fn name(&self) -> &'static str;

    /// Run until shutdown flips or the stage fails
    ///
    /// # Errors
    ///
    /// Returns error if the stage cannot continue; the supervisor
    /// restarts the pipeline in response
    async fn run(
        self: Box<Self>,
        shutdown: watch::Receiver<bool>,
        errors: mpsc::Sender<StageError>,
    ) -> Result<()>;
}

/// Handle to a spawned stage
pub struct StageHandle {
    name: &'static str,
    join: tokio::task::JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl StageHandle {
    /// Spawn a stage; terminal errors are logged and reported so the
    /// supervisor notices even between polls
    #[must_use]
    pub fn spawn(stage: Box<dyn Stage>, errors: mpsc::Sender<StageError>) -> Self {
        let name = stage.name();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            tracing::debug!(stage = name, "stage started");
            if let Err(e) = stage.run(shutdown_rx, errors.clone()).await {
                tracing::error!(stage = name, error = %e, "stage terminated");
                let _ = errors.send(StageError::new(name, e)).await;
            }
        });

        Self {
            name,
            join,
            shutdown: shutdown_tx,
        }
    }

    /// Whether the stage task is still running
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.join.is_finished()
    }

    /// Ask the stage to stop and wait briefly; abort if it lingers
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        let graceful =
            tokio::time::timeout(Duration::from_secs(2), &mut self.join).await;
        if graceful.is_err() {
            self.join.abort();
            tracing::warn!(stage = self.name, "stage ignored shutdown, aborted");
        }
    }

    /// Stage name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

/// A built pipeline: stage handles plus the timers they share
pub struct Pipeline {
    /// Running stages
    pub stages: Vec<StageHandle>,
    /// Timer service for this incarnation
    pub timers: TimerService,
}

impl Pipeline {
    /// Name of the first dead stage, if any
    #[must_use]
    pub fn crashed_stage(&self) -> Option<&'static str> {
        self.stages
            .iter()
            .find(|s| !s.is_alive())
            .map(StageHandle::name)
    }

    /// Stop every stage and cancel outstanding timers
    pub async fn shutdown(self) {
        self.timers.cancel_all();
        for stage in self.stages {
            stage.stop().await;
        }
    }
}

/// Rolling error counter
struct ErrorWindow {
    timestamps: VecDeque<Instant>,
    window: Duration,
}

impl ErrorWindow {
    fn new(window: Duration) -> Self {
        Self {
            timestamps: VecDeque::new(),
            window,
        }
    }

    fn record(&mut self) -> usize {
        let now = Instant::now();
        self.timestamps.push_back(now);
        self.prune(now);
        self.timestamps.len()
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.duration_since(oldest) > self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn clear(&mut self) {
        self.timestamps.clear();
    }
}

/// Supervisor tunables
#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    /// Errors tolerated inside the window before a restart
    pub max_errors: usize,
    /// Rolling window length
    pub error_window: Duration,
    /// Pause before rebuilding
    pub restart_backoff: Duration,
    /// Liveness poll interval
    pub poll_interval: Duration,
}

/// Builds pipelines and keeps one running
pub struct Supervisor<B>
where
    B: FnMut(mpsc::Sender<StageError>) -> Result<Pipeline>,
{
    build: B,
    config: SupervisorConfig,
}

impl<B> Supervisor<B>
where
    B: FnMut(mpsc::Sender<StageError>) -> Result<Pipeline>,
{
    /// Create a supervisor around a pipeline builder
    #[must_use]
    pub const fn new(build: B, config: SupervisorConfig) -> Self {
        Self { build, config }
    }

    /// Run until a shutdown request arrives or a rebuild fails
    ///
    /// # Errors
    ///
    /// Returns error if the pipeline cannot be (re)built
    pub async fn run(&mut self, shutdown: &mut mpsc::Receiver<()>) -> Result<()> {
        let mut window = ErrorWindow::new(self.config.error_window);
        let (err_tx, mut err_rx) = mpsc::channel::<StageError>(32);
        let mut pipeline = (self.build)(err_tx.clone())?;
        tracing::info!("pipeline started");

        loop {
            let restart_reason: Option<String> = tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("shutdown requested");
                    pipeline.shutdown().await;
                    return Ok(());
                }
                report = err_rx.recv() => {
                    // err_tx is held here, so the channel never closes
                    report.and_then(|report| {
                        let count = window.record();
                        tracing::warn!(
                            stage = report.stage,
                            error = %report.error,
                            errors_in_window = count,
                            "stage error"
                        );
                        (count > self.config.max_errors)
                            .then(|| format!("{count} errors within window"))
                    })
                }
                () = tokio::time::sleep(self.config.poll_interval) => {
                    pipeline
                        .crashed_stage()
                        .map(|name| format!("stage '{name}' terminated"))
                }
            };

            let Some(reason) = restart_reason else {
                continue;
            };

            tracing::warn!(reason, "restarting pipeline");
            pipeline.shutdown().await;

            // Stale reports belong to the torn-down incarnation
            while err_rx.try_recv().is_ok() {}
            window.clear();

            tokio::time::sleep(self.config.restart_backoff).await;
            pipeline = (self.build)(err_tx.clone())?;
            tracing::info!("pipeline restarted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn error_window_prunes_old_entries() {
        let mut window = ErrorWindow::new(Duration::from_secs(30));

        assert_eq!(window.record(), 1);
        assert_eq!(window.record(), 2);

        tokio::time::advance(Duration::from_secs(31)).await;
        // The two old entries have aged out
        assert_eq!(window.record(), 1);
    }

    #[tokio::test]
    async fn error_window_clear() {
        let mut window = ErrorWindow::new(Duration::from_secs(30));
        window.record();
        window.record();
        window.clear();
        assert_eq!(window.record(), 1);
    }
}
