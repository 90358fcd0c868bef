use hound::{SampleFormat, WavReader};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::DecodeError;

/// A fully decoded stem at its native sample rate, one `Vec` per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn num_frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.num_frames() as f64 / self.sample_rate as f64
    }
}

/// Decode a stem file. WAV goes through `hound`, everything else through symphonia.
pub fn decode_file(path: &Path) -> Result<DecodedAudio, DecodeError> {
    let is_wav = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("wav"));

    let decoded = if is_wav {
        // Some WAV variants (e.g. WAVE_FORMAT_EXTENSIBLE with odd masks) hound rejects
        match decode_wav(path) {
            Ok(audio) => audio,
            Err(DecodeError::Unsupported { reason, .. }) => {
                log::debug!("hound rejected {}: {}; retrying with symphonia", path.display(), reason);
                decode_with_symphonia(path)?
            }
            Err(e) => return Err(e),
        }
    } else {
        decode_with_symphonia(path)?
    };

    if decoded.num_frames() == 0 {
        return Err(DecodeError::Empty {
            path: path.to_path_buf(),
        });
    }

    log::info!(
        "Decoded {}: {} frames, {} ch, {}Hz, {:.1}s",
        path.display(),
        decoded.num_frames(),
        decoded.num_channels(),
        decoded.sample_rate,
        decoded.duration_seconds()
    );

    Ok(decoded)
}

fn decode_wav(path: &Path) -> Result<DecodedAudio, DecodeError> {
    let unsupported = |reason: String| DecodeError::Unsupported {
        path: path.to_path_buf(),
        reason,
    };

    let mut reader = WavReader::open(path).map_err(|e| match e {
        hound::Error::IoError(source) => DecodeError::Open {
            path: path.to_path_buf(),
            source,
        },
        other => unsupported(other.to_string()),
    })?;
    let spec = reader.spec();
    let num_channels = spec.channels.max(1) as usize;

    // Read samples as f32 in interleaved order
    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| unsupported(e.to_string()))?,
        SampleFormat::Int => {
            // Convert integer samples to float in [-1.0, 1.0]
            let max_value = 2_i64.pow(spec.bits_per_sample.saturating_sub(1) as u32) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_value))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| unsupported(e.to_string()))?
        }
    };

    Ok(DecodedAudio {
        channels: deinterleave(&interleaved, num_channels),
        sample_rate: spec.sample_rate,
    })
}

fn decode_with_symphonia(path: &Path) -> Result<DecodedAudio, DecodeError> {
    let unsupported = |reason: String| DecodeError::Unsupported {
        path: path.to_path_buf(),
        reason,
    };

    let file = std::fs::File::open(path).map_err(|source| DecodeError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| unsupported(format!("probe failed: {e}")))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| unsupported("no audio tracks found".to_string()))?;

    let track_id = track.id;
    let mut num_channels = track.codec_params.channels.map_or(0, |c| c.count());
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| unsupported("unknown sample rate".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| unsupported(format!("no decoder: {e}")))?;

    let mut channels: Vec<Vec<f32>> = vec![Vec::new(); num_channels];

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(unsupported(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                log::debug!("Skipping corrupt packet in {}: {}", path.display(), e);
                continue;
            }
            Err(e) => return Err(unsupported(e.to_string())),
        };

        let spec = *decoded.spec();
        let packet_channels = spec.channels.count().max(1);
        if channels.is_empty() {
            num_channels = packet_channels;
            channels = vec![Vec::new(); num_channels];
        }

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);

        for frame in sample_buf.samples().chunks(packet_channels) {
            for (ch, buffer) in channels.iter_mut().enumerate() {
                buffer.push(frame.get(ch).copied().unwrap_or(0.0));
            }
        }
    }

    Ok(DecodedAudio {
        channels,
        sample_rate,
    })
}

fn deinterleave(interleaved: &[f32], num_channels: usize) -> Vec<Vec<f32>> {
    let frames = interleaved.len() / num_channels;
    let mut channels = vec![Vec::with_capacity(frames); num_channels];
    for frame in interleaved.chunks_exact(num_channels) {
        for (ch, &sample) in frame.iter().enumerate() {
            channels[ch].push(sample);
        }
    }
    channels
}
