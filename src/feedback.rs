//! User-facing feedback: audio cues, spoken responses, notifications
//!
//! Everything here is fire-and-forget; a failed cue never blocks or
//! fails the pipeline.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

/// Distinct feedback moments in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    /// Wake keyword matched, capture arming
    Wake,
    /// A command passed the confidence gate
    Recognized,
    /// A command finished executing
    Executed,
    /// A deferred action fired
    Timer,
    /// Something went wrong with the current utterance
    Error,
}

impl Cue {
    /// Short tone name used to pick a platform sound
    const fn sound(self) -> &'static str {
        match self {
            Self::Wake => "wake",
            Self::Recognized => "recognized",
            Self::Executed => "executed",
            Self::Timer => "timer",
            Self::Error => "error",
        }
    }
}

/// Side-channel output to the person in the room
pub trait Feedback: Send + Sync {
    /// Play a short audio cue
    fn cue(&self, cue: Cue);

    /// Speak a phrase aloud
    fn say(&self, text: &str);

    /// Post a desktop notification
    fn notify(&self, title: &str, body: &str);
}

/// Feedback via the platform's players and notifier
///
/// Shells out to `afplay`/`paplay`, `say`/`espeak`, and
/// `osascript`/`notify-send` depending on the platform. If the
/// notifier is unavailable the body is printed to the console instead.
pub struct SystemFeedback {
    notify_fallback_logged: AtomicBool,
}

impl SystemFeedback {
    /// Create the platform feedback sink
    #[must_use]
    pub const fn new() -> Self {
        Self {
            notify_fallback_logged: AtomicBool::new(false),
        }
    }

    /// Spawn a command detached, logging spawn failure at debug
    fn spawn_detached(program: &str, args: &[&str]) -> bool {
        match tokio::process::Command::new(program)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(program, error = %e, "feedback command unavailable");
                false
            }
        }
    }
}

impl Default for SystemFeedback {
    fn default() -> Self {
        Self::new()
    }
}

impl Feedback for SystemFeedback {
    fn cue(&self, cue: Cue) {
        tracing::debug!(cue = cue.sound(), "playing cue");

        #[cfg(target_os = "macos")]
        {
            let sound = match cue {
                Cue::Wake => "/System/Library/Sounds/Ping.aiff",
                Cue::Recognized => "/System/Library/Sounds/Pop.aiff",
                Cue::Executed => "/System/Library/Sounds/Glass.aiff",
                Cue::Timer => "/System/Library/Sounds/Blow.aiff",
                Cue::Error => "/System/Library/Sounds/Basso.aiff",
            };
            Self::spawn_detached("afplay", &[sound]);
        }

        #[cfg(not(target_os = "macos"))]
        {
            let sound = match cue {
                Cue::Wake => "message-new-instant",
                Cue::Recognized => "dialog-information",
                Cue::Executed => "complete",
                Cue::Timer => "alarm-clock-elapsed",
                Cue::Error => "dialog-error",
            };
            Self::spawn_detached("canberra-gtk-play", &["-i", sound]);
        }
    }

    fn say(&self, text: &str) {
        tracing::debug!(text, "speaking");

        #[cfg(target_os = "macos")]
        Self::spawn_detached("say", &[text]);

        #[cfg(not(target_os = "macos"))]
        Self::spawn_detached("espeak", &[text]);
    }

    fn notify(&self, title: &str, body: &str) {
        #[cfg(target_os = "macos")]
        let delivered = Self::spawn_detached(
            "osascript",
            &[
                "-e",
                &format!(r#"display notification "{body}" with title "{title}""#),
            ],
        );

        #[cfg(not(target_os = "macos"))]
        let delivered = Self::spawn_detached("notify-send", &[title, body]);

        if !delivered {
            if !self.notify_fallback_logged.swap(true, Ordering::Relaxed) {
                tracing::warn!("desktop notifier unavailable, falling back to console");
            }
            println!(">>> {title}: {body} <<<");
        }
    }
}

/// Silent feedback sink for tests
#[derive(Debug, Default)]
pub struct NullFeedback;

impl Feedback for NullFeedback {
    fn cue(&self, _cue: Cue) {}
    fn say(&self, _text: &str) {}
    fn notify(&self, _title: &str, _body: &str) {}
}
