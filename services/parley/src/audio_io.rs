//! Microphone and speaker plumbing.
//!
//! The input callback only downmixes into a ringbuf. A worker thread drains it,
//! resamples to the wire rate and hands frames to the [`CaptureBridge`]. The
//! output callback pulls wire-rate audio from the [`PlaybackQueue`] and stretches
//! it to the device rate without allocating.

use anyhow::{Context, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use parley_core::{CaptureBridge, PlaybackQueue, audio};
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Producer, Split};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Two seconds of device-rate mono audio.
const CAPTURE_BUFFER_SECONDS: usize = 2;
const CAPTURE_CHUNK_FRAMES: usize = 1024;
/// Largest callback the output path handles in one pass.
const RENDER_SCRATCH_FRAMES: usize = 4096;

pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Averages interleaved frames down to mono.
pub fn downmix<T: Copy>(
    data: &[T],
    channels: usize,
    to_f32: impl Fn(T) -> f32,
) -> impl Iterator<Item = f32> {
    let channels = channels.max(1);
    data.chunks(channels)
        .map(move |frame| frame.iter().map(|&s| to_f32(s)).sum::<f32>() / frame.len() as f32)
}

/// Linear-interpolating stretch from the wire rate to the device rate.
///
/// Source frames are pulled in exactly the amount each callback consumes, so
/// the queue's playback position tracks what has reached the device.
#[derive(Debug)]
pub struct Stretcher {
    step: f64,
    phase: f64,
    current: f32,
    next: f32,
    scratch: Vec<i16>,
    mono: Vec<f32>,
}

impl Stretcher {
    pub fn new(device_rate: u32) -> Self {
        let step = audio::SAMPLE_RATE as f64 / device_rate.max(1) as f64;
        Self {
            step,
            phase: 0.0,
            current: 0.0,
            next: 0.0,
            scratch: vec![0; (RENDER_SCRATCH_FRAMES as f64 * step).ceil() as usize + 1],
            mono: vec![0.0; RENDER_SCRATCH_FRAMES],
        }
    }

    /// Fills `out` with mono device-rate samples.
    pub fn fill(&mut self, out: &mut [f32], pull: impl FnOnce(&mut [i16]) -> usize) {
        let needed = ((self.phase + out.len() as f64 * self.step).floor() as usize).min(self.scratch.len());
        let source = &mut self.scratch[..needed];
        pull(&mut *source);

        let mut consumed = 0;
        for sample in out.iter_mut() {
            *sample = self.current + (self.next - self.current) * self.phase as f32;
            self.phase += self.step;
            while self.phase >= 1.0 {
                self.phase -= 1.0;
                self.current = self.next;
                self.next = source
                    .get(consumed)
                    .map(|&s| audio::sample_i16_to_f32(s))
                    .unwrap_or(0.0);
                consumed += 1;
            }
        }
    }

    /// Renders into an interleaved device buffer, duplicating mono to every channel.
    pub fn render<T: Copy>(
        &mut self,
        data: &mut [T],
        channels: usize,
        queue: &PlaybackQueue,
        from_f32: impl Fn(f32) -> T,
    ) {
        let channels = channels.max(1);
        for block in data.chunks_mut(RENDER_SCRATCH_FRAMES * channels) {
            let frames = block.len() / channels;
            let mut mono = std::mem::take(&mut self.mono);
            self.fill(&mut mono[..frames], |buf| queue.render(buf));
            for (frame, &value) in block.chunks_mut(channels).zip(mono.iter()) {
                frame.fill(from_f32(value));
            }
            self.mono = mono;
        }
    }
}

/// Running device streams. Dropping this stops capture and playback.
pub struct AudioDevices {
    _input: Option<Stream>,
    _output: Stream,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl AudioDevices {
    pub fn start(queue: Arc<PlaybackQueue>, bridge: CaptureBridge) -> anyhow::Result<Self> {
        let host = cpal::default_host();
        let output = host
            .default_output_device()
            .ok_or_else(|| anyhow!("No output device available"))?;
        let output_stream = build_output_stream(&output, queue)?;
        output_stream.play().context("Failed to start output stream")?;

        let stop = Arc::new(AtomicBool::new(false));
        let (input_stream, worker) = match host.default_input_device() {
            Some(device) => {
                let (stream, worker) = build_input_stream(&device, bridge, stop.clone())?;
                stream.play().context("Failed to start input stream")?;
                (Some(stream), Some(worker))
            }
            None => {
                warn!("No input device available; microphone capture disabled.");
                (None, None)
            }
        };

        Ok(Self {
            _input: input_stream,
            _output: output_stream,
            stop,
            worker,
        })
    }
}

impl Drop for AudioDevices {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Capture worker panicked.");
            }
        }
    }
}

fn build_output_stream(device: &cpal::Device, queue: Arc<PlaybackQueue>) -> anyhow::Result<Stream> {
    let config = device
        .default_output_config()
        .context("Failed to query output config")?;
    let channels = config.channels() as usize;
    let stream_config: StreamConfig = config.clone().into();
    let mut stretcher = Stretcher::new(config.sample_rate().0);
    info!(
        device = %device.name().unwrap_or_default(),
        sample_rate = config.sample_rate().0,
        channels,
        "Opening output device."
    );

    let stream = match config.sample_format() {
        SampleFormat::F32 => device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                stretcher.render(data, channels, &queue, |v| v)
            },
            move |err| warn!("Output stream error: {}", err),
            None,
        )?,
        SampleFormat::I16 => device.build_output_stream(
            &stream_config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                stretcher.render(data, channels, &queue, audio::sample_f32_to_i16)
            },
            move |err| warn!("Output stream error: {}", err),
            None,
        )?,
        other => return Err(anyhow!("Unsupported output sample format {:?}", other)),
    };
    Ok(stream)
}

fn build_input_stream(
    device: &cpal::Device,
    bridge: CaptureBridge,
    stop: Arc<AtomicBool>,
) -> anyhow::Result<(Stream, JoinHandle<()>)> {
    let config = device
        .default_input_config()
        .context("Failed to query input config")?;
    let sample_rate = config.sample_rate().0;
    let channels = config.channels() as usize;
    let stream_config: StreamConfig = config.clone().into();
    info!(
        device = %device.name().unwrap_or_default(),
        sample_rate,
        channels,
        "Opening input device."
    );

    let (mut producer, consumer) =
        HeapRb::<f32>::new(sample_rate as usize * CAPTURE_BUFFER_SECONDS).split();

    let stream = match config.sample_format() {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for sample in downmix(data, channels, |s| s) {
                    let _ = producer.try_push(sample);
                }
            },
            move |err| warn!("Input stream error: {}", err),
            None,
        )?,
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                for sample in downmix(data, channels, audio::sample_i16_to_f32) {
                    let _ = producer.try_push(sample);
                }
            },
            move |err| warn!("Input stream error: {}", err),
            None,
        )?,
        other => return Err(anyhow!("Unsupported input sample format {:?}", other)),
    };

    let resampler = if sample_rate == audio::SAMPLE_RATE {
        None
    } else {
        Some(create_resampler(
            sample_rate as f64,
            audio::SAMPLE_RATE as f64,
            CAPTURE_CHUNK_FRAMES,
        )?)
    };
    let worker = std::thread::Builder::new()
        .name("parley-capture".into())
        .spawn(move || capture_worker(consumer, resampler, bridge, stop))
        .context("Failed to spawn capture worker")?;

    Ok((stream, worker))
}

fn capture_worker(
    mut consumer: impl Consumer<Item = f32>,
    mut resampler: Option<FastFixedIn<f32>>,
    bridge: CaptureBridge,
    stop: Arc<AtomicBool>,
) {
    let mut chunk = vec![0.0f32; CAPTURE_CHUNK_FRAMES];
    let mut filled = 0;
    while !stop.load(Ordering::Acquire) {
        let wanted = resampler
            .as_ref()
            .map(|r| r.input_frames_next())
            .unwrap_or(CAPTURE_CHUNK_FRAMES)
            .min(chunk.len());
        filled += consumer.pop_slice(&mut chunk[filled..wanted]);
        if filled < wanted {
            std::thread::sleep(Duration::from_millis(10));
            continue;
        }
        filled = 0;

        let frame = match resampler.as_mut() {
            Some(resampler) => match resampler.process(&[&chunk[..wanted]], None) {
                Ok(mut output) => audio::f32_to_i16(&output.swap_remove(0)),
                Err(e) => {
                    warn!("Capture resampling failed: {}", e);
                    continue;
                }
            },
            None => audio::f32_to_i16(&chunk[..wanted]),
        };
        bridge.on_captured_frame(&frame);
    }
    debug!(dropped = bridge.dropped_chunks(), "Capture worker stopped.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use parley_core::AudioSegment;

    #[test]
    fn test_create_resampler() {
        assert!(create_resampler(48000.0, 24000.0, 1024).is_ok());
        assert!(create_resampler(16000.0, 24000.0, 1024).is_ok());
        assert!(create_resampler(24000.0, 24000.0, 1024).is_ok());
    }

    #[test]
    fn test_resampler_halves_frame_count() {
        let mut resampler = create_resampler(48000.0, 24000.0, 1024).unwrap();
        let input = vec![0.25f32; resampler.input_frames_next()];
        let output = resampler.process(&[&input], None).unwrap();
        assert_eq!(output.len(), 1);
        assert!(output[0].len() <= 512);
        assert!(!output[0].is_empty());
    }

    #[test]
    fn test_downmix_averages_channels() {
        let mono: Vec<f32> = downmix(&[0.5f32, -0.5, 1.0, 0.0], 2, |s| s).collect();
        assert_eq!(mono.len(), 2);
        assert_abs_diff_eq!(mono[0], 0.0);
        assert_abs_diff_eq!(mono[1], 0.5);

        let converted: Vec<f32> = downmix(&[16384i16], 1, audio::sample_i16_to_f32).collect();
        assert_abs_diff_eq!(converted[0], 0.5);
    }

    #[test]
    fn test_stretcher_interpolates_and_pulls_exact_frames() {
        let mut stretcher = Stretcher::new(48000);
        let mut out = [0.0f32; 4];

        let mut asked = 0;
        stretcher.fill(&mut out, |buf| {
            asked = buf.len();
            buf.copy_from_slice(&[16384, 8192]);
            buf.len()
        });
        assert_eq!(asked, 2);
        assert_abs_diff_eq!(out[3], 0.25);

        stretcher.fill(&mut out, |buf| {
            asked = buf.len();
            buf.fill(0);
            buf.len()
        });
        assert_eq!(asked, 2);
        let expected = [0.5, 0.375, 0.25, 0.125];
        for (got, want) in out.iter().zip(expected) {
            assert_abs_diff_eq!(*got, want, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_stretcher_render_duplicates_channels_and_advances_queue() {
        let queue = PlaybackQueue::new(4);
        queue
            .enqueue(AudioSegment::new("A", 0, vec![16384; 480]))
            .unwrap();
        let mut stretcher = Stretcher::new(audio::SAMPLE_RATE);
        let mut data = vec![0.0f32; 200 * 2];

        stretcher.render(&mut data, 2, &queue, |v| v);

        assert_eq!(queue.frames_played(), 200);
        for frame in data.chunks(2) {
            assert_abs_diff_eq!(frame[0], frame[1]);
        }
        assert_abs_diff_eq!(data[data.len() - 1], 0.5);
    }
}
