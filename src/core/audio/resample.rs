//! Sample-rate conversion for mono PCM16.
//!
//! Upsampling uses linear interpolation. Downsampling runs a two-pole
//! low-pass (two cascaded one-pole sections) tuned below the target Nyquist
//! before interpolating, which keeps aliasing out of the capture stream.

use std::f32::consts::PI;

use super::AudioChunk;

/// Resample `input` from `from_rate` to `to_rate`.
///
/// The output holds `round(len * to_rate / from_rate)` samples, so an exact
/// 2x conversion doubles the sample count.
pub fn resample(input: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 || input.is_empty() {
        return input.to_vec();
    }

    if to_rate > from_rate {
        linear_interpolate(input, from_rate, to_rate)
    } else {
        let filtered = low_pass(input, from_rate, to_rate);
        linear_interpolate_f32(&filtered, from_rate, to_rate)
    }
}

/// Resample a chunk, keeping its sequence number.
pub fn resample_chunk(chunk: AudioChunk, to_rate: u32) -> AudioChunk {
    if chunk.sample_rate == to_rate {
        return chunk;
    }
    let samples = resample(&chunk.samples, chunk.sample_rate, to_rate);
    AudioChunk::new(samples, to_rate, chunk.sequence)
}

fn output_len(input_len: usize, from_rate: u32, to_rate: u32) -> usize {
    ((input_len as u64 * to_rate as u64 + from_rate as u64 / 2) / from_rate as u64) as usize
}

fn linear_interpolate(input: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    let out_len = output_len(input.len(), from_rate, to_rate);
    let step = from_rate as f64 / to_rate as f64;
    let last = input.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = (pos as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = pos - idx as f64;
            let a = input[idx] as f64;
            let b = input[next] as f64;
            to_i16(a + (b - a) * frac)
        })
        .collect()
}

fn linear_interpolate_f32(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<i16> {
    let out_len = output_len(input.len(), from_rate, to_rate);
    let step = from_rate as f64 / to_rate as f64;
    let last = input.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = (pos as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = (pos - idx as f64) as f32;
            let a = input[idx];
            let b = input[next];
            to_i16((a + (b - a) * frac) as f64)
        })
        .collect()
}

fn low_pass(input: &[i16], from_rate: u32, to_rate: u32) -> Vec<f32> {
    // Cutoff at 90% of the target Nyquist frequency
    let cutoff = 0.45 * to_rate as f32;
    let dt = 1.0 / from_rate as f32;
    let rc = 1.0 / (2.0 * PI * cutoff);
    let alpha = dt / (rc + dt);

    let mut stage1 = input[0] as f32;
    let mut stage2 = stage1;
    input
        .iter()
        .map(|&s| {
            stage1 += alpha * (s as f32 - stage1);
            stage2 += alpha * (stage1 - stage2);
            stage2
        })
        .collect()
}

fn to_i16(value: f64) -> i16 {
    value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsample_doubles_sample_count() {
        let input: Vec<i16> = (0..480).map(|i| (i * 10) as i16).collect();
        let output = resample(&input, 24000, 48000);
        assert_eq!(output.len(), input.len() * 2);
    }

    #[test]
    fn test_upsample_interpolates_midpoints() {
        let output = resample(&[0, 100, 200], 24000, 48000);
        assert_eq!(output, vec![0, 50, 100, 150, 200, 200]);
    }

    #[test]
    fn test_same_rate_is_passthrough() {
        let input = vec![1, 2, 3, 4];
        assert_eq!(resample(&input, 16000, 16000), input);
    }

    #[test]
    fn test_downsample_length() {
        let input = vec![1000i16; 960];
        let output = resample(&input, 48000, 24000);
        assert_eq!(output.len(), 480);
        let output = resample(&input, 48000, 16000);
        assert_eq!(output.len(), 320);
    }

    #[test]
    fn test_downsample_preserves_dc() {
        let input = vec![8000i16; 960];
        let output = resample(&input, 48000, 16000);
        assert!(output.iter().all(|&s| (s - 8000).abs() <= 1));
    }

    #[test]
    fn test_downsample_attenuates_above_nyquist() {
        // 20 kHz tone at 48 kHz would alias when decimated to 16 kHz
        let input: Vec<i16> = (0..4800)
            .map(|i| {
                let t = i as f32 / 48000.0;
                (10000.0 * (2.0 * PI * 20000.0 * t).sin()) as i16
            })
            .collect();
        let output = resample(&input, 48000, 16000);
        let peak = output[100..].iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert!(peak < 5000, "peak {peak} not attenuated");
    }

    #[test]
    fn test_resample_chunk_keeps_sequence() {
        let chunk = AudioChunk::new(vec![0; 240], 24000, 42);
        let out = resample_chunk(chunk, 48000);
        assert_eq!(out.sequence, 42);
        assert_eq!(out.sample_rate, 48000);
        assert_eq!(out.len(), 480);
    }

    #[test]
    fn test_clamping() {
        let output = resample(&[i16::MAX, i16::MIN], 8000, 16000);
        assert_eq!(output.len(), 4);
        assert_eq!(output[0], i16::MAX);
    }
}
