use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};

use crate::error::PipelineError;
use crate::types::{AudioQuery, IndexedSegment, RenderedSegment, Waveform};

const MAX_CHUNK_SIZE: usize = 1024;

fn sinc_params() -> SincInterpolationParameters {
    SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    }
}

fn resample_error<E: std::fmt::Display>(err: E) -> PipelineError {
    PipelineError::assembly(format!("resampling failed: {}", err))
}

fn silence_len(seconds: f64, sample_rate: u32) -> usize {
    (seconds * sample_rate as f64).round() as usize
}

/// Average interleaved channels into one.
fn downmix(segment: &RenderedSegment) -> Vec<f64> {
    let channels = segment.channels as usize;
    segment
        .samples
        .chunks(channels)
        .map(|frame| frame.iter().map(|&sample| sample as f64).sum::<f64>() / channels as f64)
        .collect()
}

/// Resample a mono buffer to `to` Hz. Output length is `round(len * to / from)`.
pub fn resample(samples: &[f64], from: u32, to: u32) -> Result<Vec<f64>, PipelineError> {
    let new_length = (samples.len() as f64 * to as f64 / from as f64).round() as usize;
    resample_to_len(samples, from, to, new_length)
}

/// Resample a mono buffer to `to` Hz, trimmed or zero-padded to exactly `new_length` samples.
pub fn resample_to_len(samples: &[f64], from: u32, to: u32, new_length: usize) -> Result<Vec<f64>, PipelineError> {
    if from == to || samples.is_empty() {
        let mut output = samples.to_vec();
        output.resize(new_length, 0.0);
        return Ok(output);
    }

    let ratio = to as f64 / from as f64;
    let chunk_size = samples.len().min(MAX_CHUNK_SIZE);

    let mut resampler = SincFixedIn::<f64>::new(ratio, 2.0, sinc_params(), chunk_size, 1).map_err(resample_error)?;

    let output_delay = resampler.output_delay();
    let mut output = Vec::with_capacity(new_length + output_delay);
    let mut input_buffer = vec![Vec::with_capacity(chunk_size)];
    let mut output_frames = vec![vec![0.0f64; resampler.output_frames_max()]];

    let mut input_index = 0;
    loop {
        let frames = resampler.input_frames_next();
        if frames > samples.len() - input_index {
            break;
        }
        input_buffer[0].clear();
        input_buffer[0].extend_from_slice(&samples[input_index..input_index + frames]);

        let (_, output_count) = resampler.process_into_buffer(&input_buffer, &mut output_frames, None).map_err(resample_error)?;
        output.extend_from_slice(&output_frames[0][..output_count]);
        input_index += frames;
    }

    let remaining = samples.len() - input_index;
    if remaining > 0 {
        let frames = resampler.input_frames_next();
        input_buffer[0].clear();
        input_buffer[0].extend_from_slice(&samples[input_index..]);
        input_buffer[0].resize(frames, 0.0);

        let (_, output_count) = resampler.process_into_buffer(&input_buffer, &mut output_frames, None).map_err(resample_error)?;
        output.extend_from_slice(&output_frames[0][..output_count]);
    }

    while output.len() < new_length + output_delay {
        let (_, output_count) = resampler
            .process_partial_into_buffer(None::<&[Vec<f64>]>, &mut output_frames, None)
            .map_err(resample_error)?;
        output.extend_from_slice(&output_frames[0][..output_count]);
    }

    output.drain(..output_delay);
    output.truncate(new_length);
    Ok(output)
}

/// Stitch rendered segments into the final waveform described by `query`.
///
/// Segments may arrive in any order; they are placed by their unit index.
pub fn assemble(mut segments: Vec<IndexedSegment>, query: &AudioQuery) -> Result<Waveform, PipelineError> {
    let sample_rate = query.output_sampling_rate;
    if sample_rate == 0 {
        return Err(PipelineError::assembly("output sampling rate is zero"));
    }
    if !query.volume_scale.is_finite() || query.volume_scale < 0.0 {
        return Err(PipelineError::assembly(format!("volume scale {} is not usable", query.volume_scale)));
    }
    for (name, seconds) in [("pre", query.pre_phoneme_length), ("post", query.post_phoneme_length)] {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(PipelineError::assembly(format!("{}-phoneme silence {} is not usable", name, seconds)));
        }
    }
    if segments.is_empty() {
        return Err(PipelineError::assembly("no segments to assemble"));
    }

    segments.sort_by_key(|segment| segment.index);

    let mut mono = vec![0.0f64; silence_len(query.pre_phoneme_length, sample_rate)];
    // segment lengths follow the running input time, so rounding never accumulates
    let mut input_secs = 0.0f64;
    let mut emitted = 0usize;
    for IndexedSegment { index, segment } in &segments {
        if segment.sample_rate == 0 || segment.channels == 0 {
            return Err(PipelineError::assembly(format!("segment {} has no sample rate or channels", index)));
        }
        input_secs += segment.frames() as f64 / segment.sample_rate as f64;
        let end = (input_secs * sample_rate as f64).round() as usize;
        let target = end.saturating_sub(emitted);
        let resampled = resample_to_len(&downmix(segment), segment.sample_rate, sample_rate, target)?;
        emitted += resampled.len();
        if resampled.is_empty() {
            return Err(PipelineError::assembly(format!("segment {} is empty after resampling", index)));
        }
        log::debug!(
            "Segment {}: {} frames @ {} Hz -> {} frames @ {} Hz",
            index,
            segment.frames(),
            segment.sample_rate,
            resampled.len(),
            sample_rate
        );
        mono.extend(resampled);
    }
    mono.resize(mono.len() + silence_len(query.post_phoneme_length, sample_rate), 0.0);

    let channels: u16 = if query.output_stereo { 2 } else { 1 };
    let mut samples = Vec::with_capacity(mono.len() * channels as usize);
    for sample in mono {
        let scaled = sample * query.volume_scale;
        if !scaled.is_finite() {
            return Err(PipelineError::assembly("volume scaling produced a non-finite sample"));
        }
        let clipped = scaled.clamp(-1.0, 1.0) as f32;
        for _ in 0..channels {
            samples.push(clipped);
        }
    }

    Ok(Waveform {
        samples,
        sample_rate,
        channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(rate: u32, pre: f64, post: f64, volume: f64, stereo: bool) -> AudioQuery {
        AudioQuery {
            accent_phrases: Vec::new(),
            speed_scale: 1.0,
            pitch_scale: 0.0,
            intonation_scale: 1.0,
            volume_scale: volume,
            pre_phoneme_length: pre,
            post_phoneme_length: post,
            pause_length: None,
            pause_length_scale: 1.0,
            output_sampling_rate: rate,
            output_stereo: stereo,
            kana: None,
        }
    }

    fn sine(seconds: f64, rate: u32, amplitude: f32) -> RenderedSegment {
        let len = (seconds * rate as f64).round() as usize;
        let samples = (0..len)
            .map(|i| (i as f32 / rate as f32 * 220.0 * std::f32::consts::TAU).sin() * amplitude)
            .collect();
        RenderedSegment { samples, sample_rate: rate, channels: 1 }
    }

    #[test]
    fn test_upsampled_length() {
        let segments = vec![
            IndexedSegment { index: 1, segment: sine(0.5, 24000, 0.5) },
            IndexedSegment { index: 0, segment: sine(1.0, 24000, 0.5) },
        ];
        let wave = assemble(segments, &query(48000, 0.1, 0.1, 1.0, false)).unwrap();
        assert_eq!(wave.sample_rate, 48000);
        assert_eq!(wave.channels, 1);
        assert_eq!(wave.samples.len(), ((1.0 + 0.5 + 0.1 + 0.1) * 48000.0) as usize);
        assert!(wave.samples[..4800].iter().all(|&s| s == 0.0));
        assert!(wave.samples[wave.samples.len() - 4800..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_many_odd_segments_keep_total_length() {
        let segments = (0..20)
            .map(|index| IndexedSegment { index, segment: sine(241.0 / 24000.0, 24000, 0.5) })
            .collect::<Vec<_>>();
        let wave = assemble(segments, &query(44100, 0.0, 0.0, 1.0, false)).unwrap();
        let ideal = 20.0 * 241.0 * 44100.0 / 24000.0;
        assert!((wave.samples.len() as f64 - ideal).abs() <= 1.0, "len {} ideal {}", wave.samples.len(), ideal);
    }

    #[test]
    fn test_mixed_rates_keep_total_length() {
        let segments = vec![
            IndexedSegment { index: 0, segment: RenderedSegment { samples: vec![0.1; 333], sample_rate: 22050, channels: 1 } },
            IndexedSegment { index: 1, segment: RenderedSegment { samples: vec![0.0; 257], sample_rate: 24000, channels: 1 } },
            IndexedSegment { index: 2, segment: RenderedSegment { samples: vec![0.1; 611], sample_rate: 16000, channels: 1 } },
        ];
        let wave = assemble(segments, &query(44100, 0.0, 0.0, 1.0, false)).unwrap();
        let ideal = (333.0 / 22050.0 + 257.0 / 24000.0 + 611.0 / 16000.0) * 44100.0;
        assert!((wave.samples.len() as f64 - ideal).abs() <= 1.0);
    }

    #[test]
    fn test_order_by_index() {
        let loud = RenderedSegment { samples: vec![0.25; 100], sample_rate: 1000, channels: 1 };
        let quiet = RenderedSegment { samples: vec![-0.25; 50], sample_rate: 1000, channels: 1 };
        let segments = vec![
            IndexedSegment { index: 2, segment: quiet },
            IndexedSegment { index: 0, segment: loud },
        ];
        let wave = assemble(segments, &query(1000, 0.0, 0.0, 1.0, false)).unwrap();
        assert_eq!(wave.samples.len(), 150);
        assert_eq!(wave.samples[0], 0.25);
        assert_eq!(wave.samples[149], -0.25);
    }

    #[test]
    fn test_deterministic() {
        let segments = vec![
            IndexedSegment { index: 0, segment: sine(0.3, 22050, 0.8) },
            IndexedSegment { index: 1, segment: sine(0.2, 24000, 0.8) },
        ];
        let q = query(44100, 0.05, 0.05, 1.3, true);
        let first = assemble(segments.clone(), &q).unwrap();
        let second = assemble(segments, &q).unwrap();
        assert_eq!(first.to_wav_bytes().unwrap(), second.to_wav_bytes().unwrap());
    }

    #[test]
    fn test_volume_clipping_bound() {
        let segment = sine(0.1, 1000, 0.9);
        for volume in [0.0, 0.5, 1.0, 3.0] {
            let max_in = segment.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
            let wave = assemble(vec![IndexedSegment { index: 0, segment: segment.clone() }], &query(1000, 0.0, 0.0, volume, false)).unwrap();
            let bound = (max_in as f64 * volume).min(1.0) as f32 + 1e-6;
            assert!(wave.samples.iter().all(|s| s.abs() <= bound));
        }
    }

    #[test]
    fn test_stereo_duplicates_mono() {
        let segment = RenderedSegment { samples: vec![0.1, 0.3, -0.2, -0.4], sample_rate: 1000, channels: 2 };
        let wave = assemble(vec![IndexedSegment { index: 0, segment }], &query(1000, 0.0, 0.0, 1.0, true)).unwrap();
        assert_eq!(wave.channels, 2);
        assert_eq!(wave.frames(), 2);
        assert!((wave.samples[0] - 0.2).abs() < 1e-6);
        assert_eq!(wave.samples[0], wave.samples[1]);
        assert!((wave.samples[2] + 0.3).abs() < 1e-6);
        assert_eq!(wave.samples[2], wave.samples[3]);
    }

    #[test]
    fn test_assembly_errors() {
        let empty = IndexedSegment { index: 4, segment: RenderedSegment { samples: Vec::new(), sample_rate: 24000, channels: 1 } };
        let err = assemble(vec![empty], &query(48000, 0.0, 0.0, 1.0, false)).unwrap_err();
        assert_eq!(err.error_name(), "AssemblyError");
        assert!(err.to_string().contains("segment 4"));

        let segment = IndexedSegment { index: 0, segment: sine(0.1, 1000, 0.5) };
        let err = assemble(vec![segment.clone()], &query(1000, 0.0, 0.0, f64::NAN, false)).unwrap_err();
        assert_eq!(err.error_name(), "AssemblyError");

        let err = assemble(Vec::new(), &query(1000, 0.0, 0.0, 1.0, false)).unwrap_err();
        assert_eq!(err.error_name(), "AssemblyError");
    }

    #[test]
    fn test_resample_identity_and_downsample() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&samples, 8000, 8000).unwrap(), samples);
        let long = sine(0.5, 48000, 0.5).samples.into_iter().map(f64::from).collect::<Vec<_>>();
        let down = resample(&long, 48000, 16000).unwrap();
        assert_eq!(down.len(), 8000);
    }
}
