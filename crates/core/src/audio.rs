//! Sample helpers for the fixed wire format: 24 kHz, mono, PCM16 little endian.

pub const SAMPLE_RATE: u32 = 24_000;
pub const CHANNELS: u16 = 1;
pub const BYTES_PER_SAMPLE: usize = 2;

/// Bytes of wire audio per millisecond.
pub const BYTES_PER_MS: u64 = SAMPLE_RATE as u64 * BYTES_PER_SAMPLE as u64 / 1000;

/// Interprets little-endian byte pairs as samples. A trailing odd byte is dropped.
pub fn pcm16_from_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|&sample| sample.to_le_bytes()).collect()
}

/// Converts normalized samples to PCM16, clamping out-of-range values.
pub fn f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32.iter().map(|&sample| sample_f32_to_i16(sample)).collect()
}

pub fn i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16.iter().map(|&sample| sample_i16_to_f32(sample)).collect()
}

#[inline]
pub fn sample_f32_to_i16(sample: f32) -> i16 {
    (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

#[inline]
pub fn sample_i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Milliseconds of audio in `frames` samples at the wire rate, rounded down.
/// Durations saturate at `u64::MAX`.
pub fn frames_to_ms(frames: u64) -> u64 {
    frames.saturating_mul(1000) / SAMPLE_RATE as u64
}

pub fn ms_to_frames(ms: u64) -> u64 {
    ms.saturating_mul(SAMPLE_RATE as u64) / 1000
}

/// Byte length of `ms` milliseconds of wire audio.
pub fn ms_to_bytes(ms: u64) -> u64 {
    ms.saturating_mul(BYTES_PER_MS)
}
