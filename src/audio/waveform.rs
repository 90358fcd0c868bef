// Precomputed min/max overview of a stem, for drawing waveforms

/// Source frames summarised by one bucket.
pub const FRAMES_PER_BUCKET: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WaveformPeak {
    pub min: f32,
    pub max: f32,
}

/// Peaks per time bucket across all channels of a stem.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WaveformSummary {
    pub frames_per_bucket: usize,
    pub sample_rate: u32,
    pub peaks: Vec<WaveformPeak>,
}

impl WaveformSummary {
    pub fn compute(channels: &[Vec<f32>], sample_rate: u32) -> Self {
        Self::compute_with_bucket(channels, sample_rate, FRAMES_PER_BUCKET)
    }

    pub fn compute_with_bucket(
        channels: &[Vec<f32>],
        sample_rate: u32,
        frames_per_bucket: usize,
    ) -> Self {
        let frames_per_bucket = frames_per_bucket.max(1);
        let frames = channels.first().map_or(0, Vec::len);
        let num_buckets = frames.div_ceil(frames_per_bucket);

        let peaks = (0..num_buckets)
            .map(|bucket| {
                let start = bucket * frames_per_bucket;
                let end = (start + frames_per_bucket).min(frames);
                let mut peak = WaveformPeak {
                    min: f32::MAX,
                    max: f32::MIN,
                };
                for channel in channels {
                    for &s in &channel[start..end.min(channel.len())] {
                        peak.min = peak.min.min(s);
                        peak.max = peak.max.max(s);
                    }
                }
                if peak.min > peak.max {
                    WaveformPeak::default()
                } else {
                    peak
                }
            })
            .collect();

        Self {
            frames_per_bucket,
            sample_rate,
            peaks,
        }
    }

    pub fn num_buckets(&self) -> usize {
        self.peaks.len()
    }

    /// Largest absolute sample value across the whole stem.
    pub fn max_amplitude(&self) -> f32 {
        self.peaks
            .iter()
            .map(|p| p.min.abs().max(p.max.abs()))
            .fold(0.0f32, f32::max)
    }

    /// Peak covering a normalized position in [0, 1].
    pub fn peak_at(&self, normalized: f64) -> Option<WaveformPeak> {
        if self.peaks.is_empty() {
            return None;
        }
        let index = (normalized.clamp(0.0, 1.0) * self.peaks.len() as f64) as usize;
        self.peaks.get(index.min(self.peaks.len() - 1)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_count_rounds_up() {
        let summary = WaveformSummary::compute_with_bucket(&[vec![0.0; 10]], 44100, 4);
        assert_eq!(summary.num_buckets(), 3);
    }

    #[test]
    fn test_peaks_span_all_channels() {
        let left = vec![0.1, 0.5, -0.2, 0.0];
        let right = vec![-0.9, 0.0, 0.3, 0.7];
        let summary = WaveformSummary::compute_with_bucket(&[left, right], 44100, 2);

        assert_eq!(summary.peaks[0], WaveformPeak { min: -0.9, max: 0.5 });
        assert_eq!(summary.peaks[1], WaveformPeak { min: -0.2, max: 0.7 });
        assert!((summary.max_amplitude() - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_peak_at_clamps() {
        let summary = WaveformSummary::compute_with_bucket(&[vec![0.25; 8]], 44100, 2);
        assert!(summary.peak_at(-1.0).is_some());
        assert!(summary.peak_at(2.0).is_some());
        assert!(WaveformSummary::default().peak_at(0.5).is_none());
    }
}
