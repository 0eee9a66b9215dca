//! Performance benchmarks for the audio path and wire decoding
//!
//! Run with: cargo bench
//! Or for specific benchmarks: cargo bench -- <filter>

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::time::Duration;
use waav_voice::core::audio::{AudioChunk, PlaybackBuffer, PlaybackFrame, resample};
use waav_voice::core::realtime::{OpenAIAdapter, OpenAIAdapterConfig, ProtocolAdapter};

fn sine(len: usize, rate: u32) -> Vec<i16> {
    (0..len)
        .map(|i| {
            let t = i as f32 / rate as f32;
            ((t * 440.0 * std::f32::consts::TAU).sin() * 8000.0) as i16
        })
        .collect()
}

/// Benchmark linear-interpolation upsampling and filtered downsampling
fn bench_resample(c: &mut Criterion) {
    let mut group = c.benchmark_group("resample");
    group.measurement_time(Duration::from_secs(5));

    // 20ms, 100ms and 1s of provider audio
    for len in [480usize, 2400, 24000] {
        let input = sine(len, 24000);
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::new("24k_to_48k", len), &input, |b, input| {
            b.iter(|| resample(black_box(input), 24000, 48000));
        });
        group.bench_with_input(BenchmarkId::new("24k_to_16k", len), &input, |b, input| {
            b.iter(|| resample(black_box(input), 24000, 16000));
        });
    }

    let capture = sine(960, 48000);
    group.throughput(Throughput::Elements(capture.len() as u64));
    group.bench_function("48k_to_24k_capture_frame", |b| {
        b.iter(|| resample(black_box(&capture), 48000, 24000));
    });

    group.finish();
}

/// Benchmark the playback ring buffer: push, drain with crossfade, clear
fn bench_playback_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("playback_buffer");
    group.measurement_time(Duration::from_secs(5));

    let chunk = AudioChunk::new(sine(480, 24000), 24000, 0);
    group.throughput(Throughput::Elements(chunk.len() as u64));

    group.bench_function("push_then_drain_20ms", |b| {
        let buffer = PlaybackBuffer::with_duration(10_000, 24000, 240);
        b.iter(|| {
            buffer.push(black_box(&chunk));
            match buffer.read_frame(480) {
                PlaybackFrame::Audio(samples) | PlaybackFrame::Silence(samples) => {
                    black_box(samples);
                }
                PlaybackFrame::Idle => {}
            }
        });
    });

    group.bench_function("fill_and_clear_1s", |b| {
        let buffer = PlaybackBuffer::with_duration(10_000, 24000, 240);
        b.iter(|| {
            for _ in 0..50 {
                buffer.push(&chunk);
            }
            black_box(buffer.clear());
        });
    });

    group.finish();
}

/// Benchmark decoding of provider events on the receive path
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    group.measurement_time(Duration::from_secs(5));

    let adapter = match OpenAIAdapter::new(OpenAIAdapterConfig::new("sk-bench")) {
        Ok(adapter) => adapter,
        Err(e) => panic!("adapter config rejected: {e}"),
    };

    let audio = AudioChunk::new(sine(480, 24000), 24000, 0);
    let audio_delta = format!(
        r#"{{"type":"response.output_audio.delta","response_id":"resp_1","delta":"{}"}}"#,
        audio.to_base64()
    );
    let transcript_delta =
        r#"{"type":"response.output_audio_transcript.delta","response_id":"resp_1","delta":"Hello there, "}"#;
    let unknown = r#"{"type":"response.content_part.added","response_id":"resp_1"}"#;

    for (name, raw) in [
        ("audio_delta_20ms", audio_delta.as_str()),
        ("transcript_delta", transcript_delta),
        ("unknown_kind", unknown),
    ] {
        group.throughput(Throughput::Bytes(raw.len() as u64));
        group.bench_with_input(BenchmarkId::new(name, raw.len()), &raw, |b, raw| {
            b.iter(|| adapter.decode(black_box(raw)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_resample, bench_playback_buffer, bench_decode);
criterion_main!(benches);
