use arc_swap::ArcSwapOption;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;

use super::resample::{converted_length, resample_planar};
use super::{StemType, WaveformSummary, decode_file};
use crate::error::DecodeError;

/// Stem audio converted to the device rate, ready for the render path.
#[derive(Debug)]
pub struct PlaybackBuffer {
    pub channels: Arc<Vec<Vec<f32>>>,
    pub sample_rate: u32,
    pub block_size: usize,
    /// Source frames consumed per output frame (source rate / device rate).
    pub step: f64,
}

impl PlaybackBuffer {
    pub fn num_frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }
}

/// One decoded stem bound to a fixed slot.
///
/// Gain, mute and solo are atomics so the control context can change them
/// while `render` runs on the audio thread. The prepared audio is swapped in
/// whole, so the render path sees either the old or the new buffer.
#[derive(Debug)]
pub struct StemTrack {
    slot: StemType,
    display_name: String,
    path: PathBuf,
    source: Arc<Vec<Vec<f32>>>,
    source_rate: u32,
    playback: ArcSwapOption<PlaybackBuffer>,
    volume: AtomicU32, // f32 bits
    muted: AtomicBool,
    solo: AtomicBool,
    waveform: Arc<OnceLock<WaveformSummary>>,
}

impl StemTrack {
    /// Decode `path` into a track for `slot`. Blocks on disk I/O; control context only.
    pub fn load(slot: StemType, path: &Path, display_name: &str) -> Result<Self, DecodeError> {
        let decoded = decode_file(path)?;
        let source = Arc::new(decoded.channels);
        let waveform = Arc::new(OnceLock::new());

        spawn_waveform_job(slot, Arc::clone(&source), decoded.sample_rate, Arc::clone(&waveform));

        Ok(Self {
            slot,
            display_name: display_name.to_string(),
            path: path.to_path_buf(),
            source,
            source_rate: decoded.sample_rate,
            playback: ArcSwapOption::empty(),
            volume: AtomicU32::new(1.0f32.to_bits()),
            muted: AtomicBool::new(false),
            solo: AtomicBool::new(false),
            waveform,
        })
    }

    /// Convert the stem to `sample_rate` and publish it to the render path.
    ///
    /// Returns the previously published buffer so the caller decides where it is dropped.
    pub fn prepare(
        &self,
        sample_rate: u32,
        block_size: usize,
    ) -> Result<Option<Arc<PlaybackBuffer>>, DecodeError> {
        if let Some(current) = self.playback.load_full()
            && current.sample_rate == sample_rate
        {
            if current.block_size == block_size {
                return Ok(None);
            }
            // Same audio, new block size
            let buffer = PlaybackBuffer {
                channels: Arc::clone(&current.channels),
                sample_rate,
                block_size,
                step: current.step,
            };
            return Ok(self.playback.swap(Some(Arc::new(buffer))));
        }

        let channels = if sample_rate == self.source_rate {
            Arc::clone(&self.source)
        } else {
            Arc::new(resample_planar(&self.source, self.source_rate, sample_rate)?)
        };

        log::debug!(
            "Prepared {} ({}): {}Hz -> {}Hz, {} frames",
            self.slot,
            self.display_name,
            self.source_rate,
            sample_rate,
            channels.first().map_or(0, Vec::len)
        );

        let buffer = PlaybackBuffer {
            channels,
            sample_rate,
            block_size,
            step: self.source_rate as f64 / sample_rate.max(1) as f64,
        };
        Ok(self.playback.swap(Some(Arc::new(buffer))))
    }

    /// Drop the prepared buffer from the render path; the track renders silence until re-prepared.
    pub fn release(&self) -> Option<Arc<PlaybackBuffer>> {
        self.playback.swap(None)
    }

    pub fn is_prepared(&self) -> bool {
        self.playback.load().is_some()
    }

    /// Fill interleaved `out` with this stem starting at `start` (device-rate frames).
    ///
    /// Realtime-safe: no allocation, no locking. Frames outside the stem are silent.
    /// Output channels beyond the stem's channel count receive stem channel 0.
    pub fn render(&self, out: &mut [f32], channels: usize, start: i64) {
        if channels == 0 {
            return;
        }
        if self.is_muted() {
            out.fill(0.0);
            return;
        }

        let guard = self.playback.load();
        let Some(buffer) = &*guard else {
            out.fill(0.0);
            return;
        };

        let gain = self.volume();
        let source = &buffer.channels;
        let source_channels = source.len();
        let length = buffer.num_frames() as i64;
        let frames = out.len() / channels;

        for (i, frame) in out.chunks_exact_mut(channels).take(frames).enumerate() {
            let pos = start + i as i64;
            if pos < 0 || pos >= length || source_channels == 0 {
                frame.fill(0.0);
                continue;
            }
            let pos = pos as usize;
            for (ch, sample) in frame.iter_mut().enumerate() {
                let src = if ch < source_channels { ch } else { 0 };
                *sample = source[src][pos] * gain;
            }
        }
    }

    pub fn slot(&self) -> StemType {
        self.slot
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source_sample_rate(&self) -> u32 {
        self.source_rate
    }

    pub fn num_channels(&self) -> usize {
        self.source.len()
    }

    /// Length in frames at the prepared rate (source rate before `prepare`).
    pub fn length_samples(&self) -> i64 {
        match &*self.playback.load() {
            Some(buffer) => buffer.num_frames() as i64,
            None => self.source.first().map_or(0, Vec::len) as i64,
        }
    }

    /// Length in frames this stem will have once prepared at `sample_rate`.
    pub fn length_at(&self, sample_rate: u32) -> i64 {
        converted_length(self.source.first().map_or(0, Vec::len), self.source_rate, sample_rate) as i64
    }

    pub fn length_seconds(&self) -> f64 {
        if self.source_rate == 0 {
            return 0.0;
        }
        self.source.first().map_or(0, Vec::len) as f64 / self.source_rate as f64
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    pub fn set_volume(&self, volume: f32) {
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        self.volume.store(volume.to_bits(), Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_solo(&self) -> bool {
        self.solo.load(Ordering::Relaxed)
    }

    pub fn set_solo(&self, solo: bool) {
        self.solo.store(solo, Ordering::Relaxed);
    }

    /// The waveform overview, once the background job has finished.
    pub fn waveform(&self) -> Option<&WaveformSummary> {
        self.waveform.get()
    }
}

fn spawn_waveform_job(
    slot: StemType,
    source: Arc<Vec<Vec<f32>>>,
    sample_rate: u32,
    target: Arc<OnceLock<WaveformSummary>>,
) {
    let job_source = Arc::clone(&source);
    let job_target = Arc::clone(&target);
    let spawned = thread::Builder::new()
        .name(format!("waveform-{}", slot.name().to_lowercase()))
        .spawn(move || {
            let _ = job_target.set(WaveformSummary::compute(&job_source, sample_rate));
        });

    if let Err(e) = spawned {
        log::warn!("Could not spawn waveform thread for {}: {}; computing inline", slot, e);
        let _ = target.set(WaveformSummary::compute(&source, sample_rate));
    }
}
