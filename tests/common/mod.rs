//! Audio fixtures shared by the unit tests and the headless suite.
#![allow(dead_code)]

use std::path::Path;

pub const FIXTURE_RATE: u32 = 8000;

/// Write a mono 16-bit PCM WAV of `secs` seconds of silence.
pub fn write_wav(path: &Path, secs: f32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: FIXTURE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let samples = (FIXTURE_RATE as f32 * secs) as u32;
    for _ in 0..samples {
        writer.write_sample(0i16).unwrap();
    }
    writer.finalize().unwrap();
}
