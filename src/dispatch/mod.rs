//! Command dispatch
//!
//! Consumes gated commands and fired timers, splits command chains,
//! matches each sub-command against the action registry, and drives
//! the light bridge. The device cache and undo stack are owned here
//! and touched by no other task.

pub mod cache;
pub mod registry;
pub mod undo;

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::bridge::{LightBridge, LightInfo, LightUpdate};
use crate::events::{Command, PipelineEvent};
use crate::feedback::{Cue, Feedback};
use crate::supervisor::{Stage, StageError};
use crate::timer::TimerService;
use crate::{Error, Recovery, Result};

use cache::LightStateCache;
use registry::{Action, ActionRegistry};
use undo::{LightSnapshot, UndoEntry, UndoStack};

/// `in five minutes ...` / `after 30 seconds ...`
static DELAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:in|after)\s+(\d+)\s+(second|minute|hour)s?").expect("valid delay regex")
});

/// `50 percent`
static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*percent").expect("valid percent regex"));

/// Hue brightness bounds
const BRIGHTNESS_MIN: u8 = 1;
const BRIGHTNESS_MAX: u8 = 254;

/// Fallback brightness when a dimmable light reports none
const ASSUMED_BRIGHT: u8 = 254;
const ASSUMED_MID: u8 = 128;

/// What handling one sub-command amounted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubOutcome {
    /// A light mutation was applied
    Executed,
    /// The action was parked on a timer
    Scheduled,
    /// A previous state was restored
    Undone,
    /// Nothing matched; no mutation, no snapshot
    NotRecognized,
    /// Matched but there was nothing to do
    NoOp,
}

/// Dispatcher stage: the single writer of device state
pub struct Dispatcher {
    rx: mpsc::Receiver<PipelineEvent>,
    bridge: Arc<dyn LightBridge>,
    registry: ActionRegistry,
    cache: LightStateCache,
    undo: UndoStack,
    timers: TimerService,
    feedback: Arc<dyn Feedback>,
    cooldown_tx: watch::Sender<Option<Instant>>,
}

impl Dispatcher {
    /// Wire up a dispatcher
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        rx: mpsc::Receiver<PipelineEvent>,
        bridge: Arc<dyn LightBridge>,
        timers: TimerService,
        feedback: Arc<dyn Feedback>,
        cooldown_tx: watch::Sender<Option<Instant>>,
        cache_ttl: Duration,
        undo_depth: usize,
        fuzzy_threshold: u8,
    ) -> Self {
        Self {
            rx,
            bridge,
            registry: ActionRegistry::new(fuzzy_threshold),
            cache: LightStateCache::new(cache_ttl),
            undo: UndoStack::new(undo_depth),
            timers,
            feedback,
            cooldown_tx,
        }
    }

    /// Process one command: split the chain and handle each
    /// sub-command strictly in order. A failed sub-command never stops
    /// the rest of the chain.
    pub async fn handle_command(&mut self, command: &Command, errors: &mpsc::Sender<StageError>) {
        let mut executed = 0usize;
        let mut spoke = false;

        for sub in command.sub_commands() {
            match self.process_sub(sub).await {
                Ok(SubOutcome::Executed) => {
                    executed += 1;
                    spoke = true;
                }
                // Undo and scheduling produce spoken acks of their own
                Ok(SubOutcome::Undone | SubOutcome::Scheduled) => spoke = true,
                Ok(SubOutcome::NotRecognized) => {
                    tracing::info!(sub, "command not recognized");
                    self.feedback.cue(Cue::Error);
                }
                Ok(SubOutcome::NoOp) => {}
                Err(e) => {
                    tracing::error!(sub, error = %e, "sub-command failed");
                    self.feedback.cue(Cue::Error);
                    match e.recovery() {
                        Recovery::InvalidateCache => self.cache.invalidate(),
                        Recovery::Escalate | Recovery::Fatal => {
                            let _ = errors
                                .send(StageError::new("dispatcher", e))
                                .await;
                        }
                        Recovery::Ignore => {}
                    }
                }
            }
        }

        if executed > 0 {
            self.feedback.cue(Cue::Executed);
        }
        // The cooldown keeps capture from hearing our own spoken
        // feedback, so anything that spoke re-arms it
        if spoke {
            self.cooldown_tx.send_replace(Some(Instant::now()));
        }
    }

    /// Handle one sub-command through the priority checks: delay
    /// phrase, undo phrase, percent, then the action registry
    async fn process_sub(&mut self, sub: &str) -> Result<SubOutcome> {
        if let Some((delay, action)) = parse_delay(sub) {
            let id = self.timers.schedule(delay, action.clone());
            tracing::info!(id, action, "deferred command");
            self.feedback.cue(Cue::Timer);
            self.feedback.say(&format!("I will {action} later"));
            return Ok(SubOutcome::Scheduled);
        }

        if ActionRegistry::is_undo(sub) {
            return self.undo_last().await;
        }

        let targets: Vec<LightInfo> = self
            .cache
            .get_or_refresh(self.bridge.as_ref())
            .await?
            .values()
            .cloned()
            .collect();

        if targets.is_empty() {
            tracing::warn!(sub, "no devices available");
            return Ok(SubOutcome::NoOp);
        }

        if let Some(brightness) = parse_percent(sub) {
            let snapshot = self.snapshot(&targets).await?;
            self.undo.push(snapshot);
            tracing::info!(brightness, "setting brightness from percent");
            for light in &targets {
                self.bridge
                    .apply(&light.id, &LightUpdate::on_at(brightness))
                    .await?;
            }
            self.feedback.say("Setting the brightness");
            return Ok(SubOutcome::Executed);
        }

        let Some(action) = self.registry.resolve(sub) else {
            return Ok(SubOutcome::NotRecognized);
        };

        let snapshot = self.snapshot(&targets).await?;
        self.undo.push(snapshot.clone());
        self.execute(action, sub, &targets, &snapshot).await?;
        self.feedback.say(spoken_ack(action));
        Ok(SubOutcome::Executed)
    }

    /// Capture the pre-mutation state of every target, omitting
    /// fields a light does not support
    async fn snapshot(&self, targets: &[LightInfo]) -> Result<UndoEntry> {
        let mut entry = UndoEntry::new();
        for light in targets {
            let state = self.bridge.get_state(&light.id).await?;
            entry.insert(
                light.name.clone(),
                LightSnapshot {
                    on: state.on,
                    brightness: light
                        .capabilities
                        .brightness
                        .then_some(state.brightness)
                        .flatten(),
                    color: light.capabilities.color.then_some(state.color).flatten(),
                },
            );
        }
        Ok(entry)
    }

    /// Apply one resolved action to every target
    async fn execute(
        &self,
        action: Action,
        sub: &str,
        targets: &[LightInfo],
        before: &UndoEntry,
    ) -> Result<()> {
        tracing::info!(?action, count = targets.len(), "executing");

        for light in targets {
            let dims = light.capabilities.brightness;
            let prior = before.get(&light.name);
            let was_on = prior.is_some_and(|s| s.on);

            let update = match action {
                Action::TurnOn => Some(LightUpdate::power(true)),
                Action::TurnOff => Some(LightUpdate::power(false)),
                Action::Maximum => Some(if dims {
                    LightUpdate::on_at(BRIGHTNESS_MAX)
                } else {
                    LightUpdate::power(true)
                }),
                Action::Minimum => Some(if dims {
                    LightUpdate::on_at(BRIGHTNESS_MIN)
                } else {
                    LightUpdate::power(true)
                }),
                Action::Dim => {
                    if was_on && dims {
                        let current = prior
                            .and_then(|s| s.brightness)
                            .unwrap_or(ASSUMED_BRIGHT);
                        Some(LightUpdate {
                            brightness: Some(
                                current.saturating_sub(magnitude_delta(sub)).max(BRIGHTNESS_MIN),
                            ),
                            ..LightUpdate::default()
                        })
                    } else {
                        None
                    }
                }
                Action::Brighten => {
                    if !dims {
                        // Off lights power on; lit ones have nothing to raise
                        (!was_on).then_some(LightUpdate::power(true))
                    } else if was_on {
                        let current =
                            prior.and_then(|s| s.brightness).unwrap_or(ASSUMED_MID);
                        Some(LightUpdate {
                            brightness: Some(
                                current
                                    .saturating_add(magnitude_delta(sub))
                                    .min(BRIGHTNESS_MAX),
                            ),
                            ..LightUpdate::default()
                        })
                    } else {
                        Some(LightUpdate::on_at(magnitude_delta(sub)))
                    }
                }
            };

            if let Some(update) = update {
                self.bridge.apply(&light.id, &update).await?;
            }
        }
        Ok(())
    }

    /// Pop the most recent snapshot and restore it
    async fn undo_last(&mut self) -> Result<SubOutcome> {
        let Some(entry) = self.undo.pop() else {
            tracing::info!("nothing to undo");
            self.feedback.cue(Cue::Error);
            self.feedback.say("There is nothing to undo");
            return Ok(SubOutcome::NoOp);
        };

        tracing::info!(count = entry.len(), "undoing last command");
        let handles: HashMap<String, LightInfo> = self
            .cache
            .get_or_refresh(self.bridge.as_ref())
            .await?
            .clone();

        for (name, snap) in &entry {
            let Some(light) = handles.get(name) else {
                tracing::warn!(name, "light vanished, skipping restore");
                continue;
            };
            let update = LightUpdate {
                on: Some(snap.on),
                brightness: snap.brightness,
                color: snap.color,
            };
            if let Err(e) = self.bridge.apply(&light.id, &update).await {
                tracing::error!(name, error = %e, "failed to restore light");
            }
        }

        self.feedback.say("Undoing the previous command");
        Ok(SubOutcome::Undone)
    }
}

#[async_trait::async_trait]
impl Stage for Dispatcher {
    fn name(&self) -> &'static str {
        "dispatcher"
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
                        tracing::debug!("dispatcher shutting down");
                        return Ok(());
                    }
                }
                event = self.rx.recv() => {
                    match event {
                        Some(PipelineEvent::CommandReady(command)) => {
                            self.handle_command(&command, &errors).await;
                        }
                        Some(PipelineEvent::TimerFired { id, action }) => {
                            tracing::info!(id, action, "timer fired");
                            self.feedback.cue(Cue::Timer);
                            self.handle_command(&Command::new(action), &errors).await;
                        }
                        Some(other) => {
                            tracing::debug!(?other, "ignoring unexpected event");
                        }
                        None => {
                            return Err(Error::Stage(
                                "dispatcher input channel closed".to_string(),
                            ));
                        }
                    }
                }
            }
        }
    }
}

/// Extract a deferred action: `(in|after) N (second|minute|hour)s?`
/// followed by the action text
fn parse_delay(text: &str) -> Option<(Duration, String)> {
    let caps = DELAY_RE.captures(text)?;
    let whole = caps.get(0)?;
    let amount: u64 = caps[1].parse().ok()?;
    let secs = match &caps[2] {
        "minute" => amount * 60,
        "hour" => amount * 3600,
        _ => amount,
    };

    let action = text[whole.end()..].trim();
    if action.is_empty() {
        return None;
    }
    Some((Duration::from_secs(secs), action.to_string()))
}

/// Extract `N percent` as a brightness value in [1, 254]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn parse_percent(text: &str) -> Option<u8> {
    let caps = PERCENT_RE.captures(text)?;
    let percent: u32 = caps[1].parse().ok()?;
    let value = (f64::from(percent) / 100.0 * 254.0).round();
    Some(value.clamp(f64::from(BRIGHTNESS_MIN), f64::from(BRIGHTNESS_MAX)) as u8)
}

/// Brightness delta implied by magnitude words in the phrase
fn magnitude_delta(text: &str) -> u8 {
    if ["little", "bit", "slightly"].iter().any(|w| text.contains(w)) {
        25
    } else if ["lot", "much", "significantly"]
        .iter()
        .any(|w| text.contains(w))
    {
        100
    } else {
        64
    }
}

/// Spoken confirmation per action
const fn spoken_ack(action: Action) -> &'static str {
    match action {
        Action::TurnOn => "Turning the lights on",
        Action::TurnOff => "Turning the lights off",
        Action::Dim => "Dimming the lights",
        Action::Brighten => "Brightening the lights",
        Action::Maximum => "Setting lights to maximum brightness",
        Action::Minimum => "Setting lights to minimum brightness",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_parsing() {
        let (delay, action) = parse_delay("in 5 minutes turn off the lights").expect("match");
        assert_eq!(delay, Duration::from_secs(300));
        assert_eq!(action, "turn off the lights");

        let (delay, action) = parse_delay("after 30 seconds dim").expect("match");
        assert_eq!(delay, Duration::from_secs(30));
        assert_eq!(action, "dim");

        let (delay, _) = parse_delay("in 1 hour turn on").expect("match");
        assert_eq!(delay, Duration::from_secs(3600));
    }

    #[test]
    fn delay_without_action_is_not_deferred() {
        assert!(parse_delay("turn off in 5 minutes").is_none());
        assert!(parse_delay("turn off the lights").is_none());
    }

    #[test]
    fn percent_parsing_and_clamping() {
        assert_eq!(parse_percent("set to 50 percent"), Some(127));
        assert_eq!(parse_percent("100 percent"), Some(254));
        assert_eq!(parse_percent("0 percent"), Some(1));
        assert_eq!(parse_percent("150 percent"), Some(254));
        assert_eq!(parse_percent("no number here"), None);
    }

    #[test]
    fn magnitude_words() {
        assert_eq!(magnitude_delta("dim a little"), 25);
        assert_eq!(magnitude_delta("dim it slightly"), 25);
        assert_eq!(magnitude_delta("brighten a lot"), 100);
        assert_eq!(magnitude_delta("dim significantly"), 100);
        assert_eq!(magnitude_delta("dim the lights"), 64);
    }
}
