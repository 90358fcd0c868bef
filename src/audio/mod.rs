pub mod decode;
pub mod engine;
pub mod mixer;
pub mod resample;
pub mod stream;
pub mod track;
pub mod waveform;

pub use decode::{DecodedAudio, decode_file};
pub use engine::StemEngine;
pub use mixer::StemMixer;
pub use stream::{AudioStream, list_output_devices};
pub use track::StemTrack;
pub use waveform::{WaveformPeak, WaveformSummary};

/// Number of fixed stem slots. Slot index == `StemType as usize`.
pub const NUM_STEM_TYPES: usize = 6;

#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub buffer_size: usize,
    /// Largest block the mixer can render without splitting, in frames.
    pub max_block_frames: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            buffer_size: 512,
            max_block_frames: 8192,
        }
    }
}

/// Closed set of stem kinds, in detection priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StemType {
    Vocals = 0,
    Drums,
    Bass,
    Guitar,
    Piano,
    Other,
}

impl StemType {
    pub const ALL: [StemType; NUM_STEM_TYPES] = [
        StemType::Vocals,
        StemType::Drums,
        StemType::Bass,
        StemType::Guitar,
        StemType::Piano,
        StemType::Other,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            StemType::Vocals => "Vocals",
            StemType::Drums => "Drums",
            StemType::Bass => "Bass",
            StemType::Guitar => "Guitar",
            StemType::Piano => "Piano",
            StemType::Other => "Other",
        }
    }
}

impl std::fmt::Display for StemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Notifications from the engine to the control context.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    SongLoaded { name: String, loaded_slots: usize },
    SongUnloaded,
    PlaybackStarted,
    PlaybackPaused,
    PlaybackStopped,
    TrackLoadFailed { slot: usize, error: String },
    StreamError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stem_type_indices_are_stable() {
        for (i, stem) in StemType::ALL.iter().enumerate() {
            assert_eq!(stem.index(), i);
            assert_eq!(StemType::from_index(i), Some(*stem));
        }
        assert_eq!(StemType::from_index(NUM_STEM_TYPES), None);
        assert_eq!(StemType::Other.index(), NUM_STEM_TYPES - 1);
    }
}
