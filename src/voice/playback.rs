//! Audio playback to speakers

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};
use rubato::{FftFixedIn, Resampler};

use crate::pipeline::{AudioBuffer, Player};
use crate::{Error, Result};

/// Frames per resampler chunk
const RESAMPLE_CHUNK: usize = 1024;

/// Extra time allowed past the expected duration before giving up
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Plays audio buffers on the default output device
///
/// Each call opens a stream at the buffer's sample rate and blocks a worker
/// thread until the last sample has been handed to the device.
pub struct AudioPlayback {
    device_name: String,
}

impl AudioPlayback {
    /// Check that an output device is available
    ///
    /// # Errors
    ///
    /// Returns error if there is no output device
    pub fn new() -> Result<Self> {
        let device = default_output()?;
        let device_name = device.name().unwrap_or_default();

        tracing::debug!(device = %device_name, "audio playback initialized");

        Ok(Self { device_name })
    }

    /// Name of the output device
    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

#[async_trait]
impl Player for AudioPlayback {
    async fn play(&mut self, buffer: AudioBuffer) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }

        tokio::task::spawn_blocking(move || play_blocking(buffer))
            .await
            .map_err(|e| Error::Playback(format!("playback worker failed: {e}")))?
    }
}

fn default_output() -> Result<Device> {
    cpal::default_host()
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))
}

/// Find a stream config at exactly `rate`, preferring mono
fn config_for_rate(device: &Device, rate: u32) -> Result<Option<StreamConfig>> {
    let configs: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| Error::Playback(e.to_string()))?
        .filter(|c| c.min_sample_rate() <= SampleRate(rate) && c.max_sample_rate() >= SampleRate(rate))
        .collect();

    let chosen = configs
        .iter()
        .find(|c| c.channels() == 1)
        .or_else(|| configs.iter().find(|c| c.channels() == 2))
        .map(|c| c.with_sample_rate(SampleRate(rate)).config());

    Ok(chosen)
}

fn play_blocking(buffer: AudioBuffer) -> Result<()> {
    let device = default_output().map_err(|e| Error::Playback(e.to_string()))?;

    let (config, samples) = if let Some(config) = config_for_rate(&device, buffer.sample_rate)? {
        (config, buffer.samples)
    } else {
        let config: StreamConfig = device
            .default_output_config()
            .map_err(|e| Error::Playback(e.to_string()))?
            .config();
        tracing::debug!(
            from = buffer.sample_rate,
            to = config.sample_rate.0,
            "resampling for output device"
        );
        let samples = resample(&buffer.samples, buffer.sample_rate, config.sample_rate.0)?;
        (config, samples)
    };

    let channels = usize::from(config.channels);
    let sample_rate = config.sample_rate.0;
    let sample_count = samples.len();

    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));
    let failed = Arc::new(AtomicBool::new(false));

    let stream = {
        let position = Arc::clone(&position);
        let finished = Arc::clone(&finished);
        let failed = Arc::clone(&failed);

        device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut pos = position.load(Ordering::Relaxed);

                    for frame in data.chunks_mut(channels) {
                        let sample = samples.get(pos).copied().unwrap_or(0.0);
                        frame.fill(sample);
                        if pos < samples.len() {
                            pos += 1;
                        }
                    }

                    position.store(pos, Ordering::Relaxed);
                    if pos >= samples.len() {
                        finished.store(true, Ordering::Release);
                    }
                },
                move |err| {
                    tracing::error!(error = %err, "audio playback error");
                    failed.store(true, Ordering::Release);
                },
                None,
            )
            .map_err(|e| Error::Playback(e.to_string()))?
    };

    stream.play().map_err(|e| Error::Playback(e.to_string()))?;

    let expected = Duration::from_millis(
        u64::try_from(sample_count).unwrap_or(u64::MAX).saturating_mul(1000)
            / u64::from(sample_rate.max(1)),
    );
    let deadline = Instant::now() + expected + DRAIN_GRACE;

    while !finished.load(Ordering::Acquire) {
        if failed.load(Ordering::Acquire) {
            return Err(Error::Playback("output stream failed".to_string()));
        }
        if Instant::now() > deadline {
            tracing::warn!(
                played = position.load(Ordering::Relaxed),
                total = sample_count,
                "playback did not drain in time"
            );
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    // Let the device flush its last period
    std::thread::sleep(Duration::from_millis(100));
    drop(stream);

    tracing::debug!(samples = sample_count, sample_rate, "playback complete");
    Ok(())
}

/// Resample mono audio between rates
///
/// # Errors
///
/// Returns `Error::Playback` if the resampler rejects the rates
pub fn resample(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>> {
    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = FftFixedIn::<f32>::new(from as usize, to as usize, RESAMPLE_CHUNK, 2, 1)
        .map_err(|e| Error::Playback(format!("resampler setup failed: {e}")))?;

    let ratio = f64::from(to) / f64::from(from);
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let mut out = Vec::with_capacity((samples.len() as f64 * ratio) as usize + RESAMPLE_CHUNK);

    let mut pos = 0;
    loop {
        let needed = resampler.input_frames_next();
        if pos + needed > samples.len() {
            break;
        }
        let chunk: &[&[f32]] = &[&samples[pos..pos + needed]];
        let frames = resampler
            .process(chunk, None)
            .map_err(|e| Error::Playback(format!("resample failed: {e}")))?;
        out.extend_from_slice(&frames[0]);
        pos += needed;
    }

    if pos < samples.len() {
        let tail: &[&[f32]] = &[&samples[pos..]];
        let frames = resampler
            .process_partial(Some(tail), None)
            .map_err(|e| Error::Playback(format!("resample failed: {e}")))?;
        out.extend_from_slice(&frames[0]);
    }

    Ok(out)
}

/// Decode MP3 bytes to mono f32 samples at the stream's native rate
///
/// # Errors
///
/// Returns `Error::Synthesis` if the data is not valid MP3
pub fn decode_mp3(mp3_data: &[u8]) -> Result<AudioBuffer> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or_default();

                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Synthesis(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() && !mp3_data.is_empty() {
        return Err(Error::Synthesis("MP3 stream contained no audio frames".to_string()));
    }

    Ok(AudioBuffer::new(samples, sample_rate))
}
