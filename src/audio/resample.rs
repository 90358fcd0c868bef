use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::error::DecodeError;

/// Input frames fed to the resampler per call.
const CHUNK_FRAMES: usize = 4096;

/// Number of output frames a `source_frames`-long stem has at `target_rate`.
pub fn converted_length(source_frames: usize, source_rate: u32, target_rate: u32) -> usize {
    if source_rate == 0 || source_rate == target_rate {
        return source_frames;
    }
    (source_frames as f64 * target_rate as f64 / source_rate as f64).round() as usize
}

/// Convert planar audio from `source_rate` to `target_rate`.
///
/// The output is aligned with the input (filter delay removed) and is exactly
/// `converted_length` frames long.
pub fn resample_planar(
    channels: &[Vec<f32>],
    source_rate: u32,
    target_rate: u32,
) -> Result<Vec<Vec<f32>>, DecodeError> {
    let num_channels = channels.len();
    let frames = channels.first().map_or(0, Vec::len);
    if num_channels == 0 || frames == 0 || source_rate == target_rate {
        return Ok(channels.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(
        target_rate as f64 / source_rate as f64,
        1.0,
        params,
        CHUNK_FRAMES,
        num_channels,
    )
    .map_err(|e| DecodeError::Resample(e.to_string()))?;

    let delay = resampler.output_delay();
    let expected = converted_length(frames, source_rate, target_rate);
    let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); num_channels];

    let append = |block: Vec<Vec<f32>>, output: &mut Vec<Vec<f32>>| {
        for (dst, src) in output.iter_mut().zip(block) {
            dst.extend_from_slice(&src);
        }
    };

    let mut pos = 0;
    while pos + CHUNK_FRAMES <= frames {
        let chunk: Vec<&[f32]> = channels.iter().map(|c| &c[pos..pos + CHUNK_FRAMES]).collect();
        let block = resampler
            .process(&chunk, None)
            .map_err(|e| DecodeError::Resample(e.to_string()))?;
        append(block, &mut output);
        pos += CHUNK_FRAMES;
    }

    if pos < frames {
        let tail: Vec<&[f32]> = channels.iter().map(|c| &c[pos..]).collect();
        let block = resampler
            .process_partial(Some(tail.as_slice()), None)
            .map_err(|e| DecodeError::Resample(e.to_string()))?;
        append(block, &mut output);
    }

    // Flush the filter until the delayed tail is out
    while output[0].len() < expected + delay {
        let block = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(|e| DecodeError::Resample(e.to_string()))?;
        if block.first().is_none_or(Vec::is_empty) {
            break;
        }
        append(block, &mut output);
    }

    for channel in &mut output {
        channel.drain(..delay.min(channel.len()));
        channel.resize(expected, 0.0);
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frames: usize, freq: f32, rate: u32) -> Vec<f32> {
        (0..frames)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_converted_length() {
        assert_eq!(converted_length(44100, 44100, 48000), 48000);
        assert_eq!(converted_length(48000, 48000, 24000), 24000);
        assert_eq!(converted_length(1000, 44100, 44100), 1000);
    }

    #[test]
    fn test_same_rate_is_identity() {
        let input = vec![vec![0.1, 0.2, 0.3]];
        let output = resample_planar(&input, 44100, 44100).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_upsample_has_expected_length_and_level() {
        let input = vec![sine(10_000, 440.0, 44100), sine(10_000, 220.0, 44100)];
        let output = resample_planar(&input, 44100, 48000).unwrap();

        let expected = converted_length(10_000, 44100, 48000);
        assert_eq!(output.len(), 2);
        assert_eq!(output[0].len(), expected);
        assert_eq!(output[1].len(), expected);

        // Amplitude survives the conversion in the steady-state middle
        let peak = output[0][2000..8000]
            .iter()
            .fold(0.0f32, |a, &s| a.max(s.abs()));
        assert!((peak - 0.5).abs() < 0.05, "peak was {}", peak);
    }

    #[test]
    fn test_output_is_time_aligned() {
        // A single impulse must land at the scaled position, not shifted by filter delay
        let mut input = vec![0.0f32; 20_000];
        input[10_000] = 1.0;
        let output = resample_planar(&[input], 24000, 48000).unwrap();

        let (peak_index, _) = output[0]
            .iter()
            .enumerate()
            .fold((0, 0.0f32), |(bi, bv), (i, &v)| if v > bv { (i, v) } else { (bi, bv) });
        assert!((peak_index as i64 - 20_000).abs() <= 4, "peak at {}", peak_index);
    }
}
