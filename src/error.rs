use std::path::PathBuf;

/// Failure to turn a stem file into samples.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported or corrupt audio in {path}: {reason}")]
    Unsupported { path: PathBuf, reason: String },

    #[error("{path} contains no audio frames")]
    Empty { path: PathBuf },

    #[error("resampling failed: {0}")]
    Resample(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine a configuration directory")]
    NoConfigDir,

    #[error("settings I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum MidiError {
    #[error("failed to initialize MIDI input: {0}")]
    Init(String),

    #[error("no MIDI input ports available")]
    NoInputPorts,

    #[error("no MIDI port found matching: {0}")]
    PortNotFound(String),

    #[error("failed to connect to MIDI port: {0}")]
    Connect(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("no output device available")]
    NoOutputDevice,

    #[error("output device '{0}' not found")]
    DeviceNotFound(String),

    #[error("audio backend error: {0}")]
    Backend(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("invalid stem pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}
