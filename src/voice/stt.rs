//! Speech recognition service boundary

use async_trait::async_trait;

use crate::events::AudioClip;
use crate::voice::source::samples_to_wav;
use crate::{Error, Result};

/// One recognition hypothesis
#[derive(Debug, Clone)]
pub struct Alternative {
    /// Recognized text
    pub text: String,
    /// Service confidence in [0, 1]
    pub confidence: f32,
}

/// Remote speech-to-text boundary
#[async_trait]
pub trait SpeechService: Send + Sync {
    /// Recognize one clip, best hypothesis first
    ///
    /// # Errors
    ///
    /// Returns `Error::NotUnderstood` if the service heard nothing
    /// intelligible, `Error::Recognition` on any service failure
    async fn recognize(&self, clip: &AudioClip) -> Result<Vec<Alternative>>;
}

/// Recognition service response envelope
#[derive(serde::Deserialize)]
struct RecognizeResponse {
    results: Vec<RecognizeResult>,
}

#[derive(serde::Deserialize)]
struct RecognizeResult {
    alternatives: Vec<WireAlternative>,
}

#[derive(serde::Deserialize)]
struct WireAlternative {
    transcript: String,
    confidence: Option<f32>,
}

/// HTTP recognition client: posts the clip as multipart WAV
pub struct HttpSpeechService {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpSpeechService {
    /// Create a client for the given endpoint
    #[must_use]
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            api_key,
        }
    }
}

#[async_trait]
impl SpeechService for HttpSpeechService {
    async fn recognize(&self, clip: &AudioClip) -> Result<Vec<Alternative>> {
        let wav = samples_to_wav(&clip.samples, clip.sample_rate)?;
        tracing::debug!(audio_bytes = wav.len(), "starting recognition");

        let form = reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(wav)
                .file_name("audio.wav")
                .mime_str("audio/wav")
                .map_err(|e| Error::Recognition(e.to_string()))?,
        );

        let mut request = self.client.post(&self.url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await.map_err(|e| {
            Error::Recognition(format!("recognition service unreachable: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "recognition service error");
            return Err(Error::Recognition(format!(
                "recognition service error {status}"
            )));
        }

        let parsed: RecognizeResponse = response
            .json()
            .await
            .map_err(|e| Error::Recognition(format!("malformed recognition response: {e}")))?;

        let alternatives: Vec<Alternative> = parsed
            .results
            .into_iter()
            .flat_map(|r| r.alternatives)
            .filter(|a| !a.transcript.trim().is_empty())
            .map(|a| Alternative {
                text: a.transcript,
                confidence: a.confidence.unwrap_or(1.0),
            })
            .collect();

        if alternatives.is_empty() {
            return Err(Error::NotUnderstood);
        }

        tracing::info!(
            transcript = %alternatives[0].text,
            confidence = alternatives[0].confidence,
            "recognition complete"
        );
        Ok(alternatives)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_parsing() {
        let json = r#"{
            "results": [{
                "alternatives": [
                    {"transcript": "turn off the lights", "confidence": 0.92},
                    {"transcript": "turn of the lights"}
                ]
            }]
        }"#;

        let parsed: RecognizeResponse = serde_json::from_str(json).expect("parse");
        assert_eq!(parsed.results.len(), 1);
        let alts = &parsed.results[0].alternatives;
        assert_eq!(alts[0].transcript, "turn off the lights");
        assert!((alts[0].confidence.expect("confidence") - 0.92).abs() < f32::EPSILON);
        assert!(alts[1].confidence.is_none());
    }
}
