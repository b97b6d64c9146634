//! Messages passed between pipeline stages
//!
//! Stages communicate only by moving these values through bounded
//! channels; a clip belongs to exactly one stage at a time.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

/// Conjunction markers that join a command chain
static CHAIN_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+and\s+|\s+then\s+").expect("valid chain regex"));

/// One captured utterance: PCM samples plus capture time
#[derive(Debug)]
pub struct AudioClip {
    /// Mono PCM samples
    pub samples: Vec<i16>,
    /// Samples per second
    pub sample_rate: u32,
    /// When capture of this clip completed
    pub captured_at: DateTime<Utc>,
}

impl AudioClip {
    /// Create a clip stamped with the current time
    #[must_use]
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            captured_at: Utc::now(),
        }
    }

    /// Clip length in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// A recognized transcript with the service's confidence score
#[derive(Debug, Clone)]
pub struct Transcript {
    /// Normalized (lowercased) transcript text
    pub text: String,
    /// Service confidence in [0, 1]
    pub confidence: f32,
    /// When recognition completed
    pub timestamp: DateTime<Utc>,
}

impl Transcript {
    /// Create a transcript stamped with the current time
    #[must_use]
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
            timestamp: Utc::now(),
        }
    }
}

/// A gated command heading for the dispatcher
#[derive(Debug, Clone)]
pub struct Command {
    /// Full recognized text, possibly a chain
    pub raw_text: String,
    /// When the command passed the confidence gate
    pub received_at: DateTime<Utc>,
}

impl Command {
    /// Create a command stamped with the current time
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            raw_text: text.into(),
            received_at: Utc::now(),
        }
    }

    /// Split the raw text on conjunction markers into ordered
    /// sub-commands. A chain executes strictly left to right.
    #[must_use]
    pub fn sub_commands(&self) -> Vec<&str> {
        CHAIN_SPLIT
            .split(&self.raw_text)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Identifier of a scheduled timer
pub type TimerId = u64;

/// Tagged stage-to-stage event, dispatched by pattern match
#[derive(Debug)]
pub enum PipelineEvent {
    /// The wake backend matched a keyword
    WakeDetected,
    /// One utterance finished capturing
    AudioReady(AudioClip),
    /// A command passed the confidence gate
    CommandReady(Command),
    /// A deferred action came due
    TimerFired {
        /// Timer that fired
        id: TimerId,
        /// Action text to re-inject as a command
        action: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_command_is_one_sub_command() {
        let cmd = Command::new("turn off the lights");
        assert_eq!(cmd.sub_commands(), vec!["turn off the lights"]);
    }

    #[test]
    fn chain_splits_on_and_and_then() {
        let cmd = Command::new("turn on the lights and set to 50 percent then dim");
        assert_eq!(
            cmd.sub_commands(),
            vec!["turn on the lights", "set to 50 percent", "dim"]
        );
    }

    #[test]
    fn chain_preserves_order() {
        let cmd = Command::new("maximum then minimum");
        assert_eq!(cmd.sub_commands(), vec!["maximum", "minimum"]);
    }

    #[test]
    fn embedded_and_does_not_split_words() {
        // "band" and "then" as part of a word must not split
        let cmd = Command::new("brighten the bedroom");
        assert_eq!(cmd.sub_commands(), vec!["brighten the bedroom"]);
    }

    #[test]
    fn clip_duration() {
        let clip = AudioClip::new(vec![0; 16_000], 16_000);
        assert!((clip.duration_secs() - 1.0).abs() < f32::EPSILON);
    }
}
