// src/audio/mixer.rs
// SIMD-accelerated additive mixing of stem tracks

use super::StemTrack;
use wide::f32x4;

/// Sums stem tracks into an interleaved output block.
///
/// Owned by the audio callback. The scratch buffer is allocated once at
/// construction, so mixing never allocates.
pub struct StemMixer {
    scratch: Vec<f32>,
    max_frames: usize,
    channels: usize,
}

impl StemMixer {
    pub fn new(max_frames: usize, channels: usize) -> Self {
        let channels = channels.max(1);
        Self {
            scratch: vec![0.0; max_frames.max(1) * channels],
            max_frames: max_frames.max(1),
            channels,
        }
    }

    /// Largest block, in frames, that `mix_track` handles in one call.
    pub fn capacity_frames(&self) -> usize {
        self.max_frames
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Render `track` at `start` into scratch and add it onto `output`.
    ///
    /// `output` must hold at most `capacity_frames() * channels()` samples.
    /// REAL-TIME SAFE: zero allocations.
    pub fn mix_track(&mut self, track: &StemTrack, output: &mut [f32], start: i64) {
        let len = output.len().min(self.scratch.len());
        let scratch = &mut self.scratch[..len];
        track.render(scratch, self.channels, start);
        add_buffer_simd(&mut output[..len], scratch);
    }
}

/// Clear buffer using SIMD
#[inline]
pub fn clear_buffer_simd(buffer: &mut [f32]) {
    let zero = f32x4::splat(0.0).to_array();
    let mut chunks = buffer.chunks_exact_mut(4);
    for chunk in &mut chunks {
        chunk.copy_from_slice(&zero);
    }
    chunks.into_remainder().fill(0.0);
}

/// dest += src, four lanes at a time
#[inline]
pub fn add_buffer_simd(dest: &mut [f32], src: &[f32]) {
    let len = dest.len().min(src.len());
    let chunks = len / 4;

    for i in 0..chunks {
        let idx = i * 4;
        let dest_vec = f32x4::new([dest[idx], dest[idx + 1], dest[idx + 2], dest[idx + 3]]);
        let src_vec = f32x4::new([src[idx], src[idx + 1], src[idx + 2], src[idx + 3]]);
        let result = (dest_vec + src_vec).to_array();
        dest[idx..idx + 4].copy_from_slice(&result);
    }

    // Handle remainder
    for i in chunks * 4..len {
        dest[i] += src[i];
    }
}
