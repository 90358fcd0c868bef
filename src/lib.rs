pub mod audio;
pub mod config;
pub mod detect;
pub mod error;
pub mod midi;
pub mod ui;

pub use audio::{AudioConfig, StemEngine, StemTrack, StemType};
pub use config::Settings;
pub use detect::{DetectedSong, StemDetector};
pub use midi::MidiLearnManager;
pub use ui::Console;
