//! Microphone frame source
//!
//! cpal streams are not `Send`, so the stream lives on a dedicated
//! thread that forwards fixed-size PCM frames over a channel to the
//! async stages.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;
use tokio::sync::mpsc;

use crate::{Error, Result};

/// Sample rate for capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Frames buffered between the capture thread and the async reader
const FRAME_QUEUE: usize = 32;

/// Async supplier of fixed-size PCM frames
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Pull the next frame; blocks until audio arrives
    ///
    /// # Errors
    ///
    /// Returns `Error::Audio` if the underlying stream has ended
    async fn next_frame(&mut self) -> Result<Vec<i16>>;

    /// Discard every frame already buffered, so the next read delivers
    /// live audio. A reader that idles between utterances must drain
    /// before recording or it hears the past.
    fn drain(&mut self);

    /// Samples per second of the delivered frames
    fn sample_rate(&self) -> u32;
}

/// Opens frame sources; stages get a fresh one per pipeline build
pub trait FrameSourceFactory: Send + Sync {
    /// Open a source delivering frames of `frame_len` samples
    ///
    /// # Errors
    ///
    /// Returns `Error::Audio` if no capture device can be opened
    fn open(&self, frame_len: usize) -> Result<Box<dyn FrameSource>>;
}

/// Factory for the default cpal input device
pub struct CpalFrameSourceFactory;

impl FrameSourceFactory for CpalFrameSourceFactory {
    fn open(&self, frame_len: usize) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(CpalFrameSource::open(frame_len)?))
    }
}

/// Frame source backed by a cpal input stream on its own thread
pub struct CpalFrameSource {
    frames: mpsc::Receiver<Vec<i16>>,
    // Dropping this ends the capture thread
    _shutdown: std::sync::mpsc::Sender<()>,
}

impl CpalFrameSource {
    /// Open the default input device and start streaming
    ///
    /// # Errors
    ///
    /// Returns `Error::Audio` if no device or suitable config exists
    pub fn open(frame_len: usize) -> Result<Self> {
        let (frame_tx, frame_rx) = mpsc::channel::<Vec<i16>>(FRAME_QUEUE);
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();
        let (init_tx, init_rx) = std::sync::mpsc::channel::<Result<()>>();

        std::thread::Builder::new()
            .name("cpal-capture".to_string())
            .spawn(move || {
                capture_thread(frame_len, &frame_tx, &shutdown_rx, &init_tx);
            })
            .map_err(|e| Error::Audio(format!("failed to spawn capture thread: {e}")))?;

        init_rx
            .recv()
            .map_err(|_| Error::Audio("capture thread died during init".to_string()))??;

        Ok(Self {
            frames: frame_rx,
            _shutdown: shutdown_tx,
        })
    }
}

#[async_trait]
impl FrameSource for CpalFrameSource {
    async fn next_frame(&mut self) -> Result<Vec<i16>> {
        self.frames
            .recv()
            .await
            .ok_or_else(|| Error::Audio("audio stream ended".to_string()))
    }

    fn drain(&mut self) {
        let mut dropped = 0usize;
        while self.frames.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!(dropped, "drained buffered frames");
        }
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

/// Owns the cpal stream until the shutdown sender is dropped
fn capture_thread(
    frame_len: usize,
    frame_tx: &mpsc::Sender<Vec<i16>>,
    shutdown_rx: &std::sync::mpsc::Receiver<()>,
    init_tx: &std::sync::mpsc::Sender<Result<()>>,
) {
    let stream = match build_stream(frame_len, frame_tx.clone()) {
        Ok(stream) => {
            let _ = init_tx.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = init_tx.send(Err(e));
            return;
        }
    };

    // Parks until the source is dropped
    let _ = shutdown_rx.recv();
    drop(stream);
    tracing::debug!("capture thread exiting");
}

fn build_stream(frame_len: usize, frame_tx: mpsc::Sender<Vec<i16>>) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    let supported_config = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        })
        .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

    let config = supported_config
        .with_sample_rate(SampleRate(SAMPLE_RATE))
        .config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = SAMPLE_RATE,
        frame_len,
        "audio capture initialized"
    );

    let mut pending: Vec<i16> = Vec::with_capacity(frame_len);
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    #[allow(clippy::cast_possible_truncation)]
                    let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                    pending.push(sample_i16);

                    if pending.len() == frame_len {
                        let frame = std::mem::replace(
                            &mut pending,
                            Vec::with_capacity(frame_len),
                        );
                        // Reader lagging: drop the frame rather than
                        // stall the audio callback
                        if frame_tx.try_send(frame).is_err() {
                            tracing::trace!("frame queue full, dropping frame");
                        }
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}

/// RMS energy of a frame, normalized to [0, 1]
#[allow(clippy::cast_precision_loss)]
pub(crate) fn rms_energy(frame: &[i16]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = frame
        .iter()
        .map(|&s| {
            let normalized = f32::from(s) / 32768.0;
            normalized * normalized
        })
        .sum();
    (sum_squares / frame.len() as f32).sqrt()
}

/// Encode PCM samples as WAV bytes for the recognition service
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
