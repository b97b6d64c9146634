//! Voice input: microphone frames, wake detection, utterance capture,
//! and speech recognition

pub mod capture;
pub mod recognize;
pub mod source;
pub mod stt;
pub mod wake;

pub use source::{FrameSource, FrameSourceFactory, SAMPLE_RATE};
pub use stt::SpeechService;
