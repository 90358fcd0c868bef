use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use crossbeam::channel::Sender;
use rtrb::Consumer;
use std::sync::Arc;

use super::{AudioConfig, EngineEvent, StemEngine, StemMixer};
use crate::error::StreamError;
use crate::midi::input::drain_queue;
use crate::midi::{ControlChange, MidiBuffer, MidiLearnManager};

/// The output device the engine renders into.
pub struct AudioStream {
    config: AudioConfig,
    output_device: Device,
    output_config: StreamConfig,
    sample_format: SampleFormat,
    output_device_name: String,
}

impl AudioStream {
    /// Open the named output device, or the host default when `device_name` is `None`.
    pub fn new(config: AudioConfig, device_name: Option<&str>) -> Result<Self, StreamError> {
        let host = cpal::default_host();

        let output_device = match device_name {
            Some(name) => {
                let mut found = None;
                for device in host
                    .output_devices()
                    .map_err(|e| StreamError::Backend(e.to_string()))?
                {
                    if let Ok(device_name) = device.name()
                        && device_name == name
                    {
                        found = Some(device);
                        break;
                    }
                }
                found.ok_or_else(|| StreamError::DeviceNotFound(name.to_string()))?
            }
            None => host
                .default_output_device()
                .ok_or(StreamError::NoOutputDevice)?,
        };

        let output_default = output_device
            .default_output_config()
            .map_err(|e| StreamError::Backend(e.to_string()))?;
        let output_device_name = output_device
            .name()
            .unwrap_or_else(|_| "Unknown".to_string());

        let output_config = StreamConfig {
            channels: output_default.channels(),
            sample_rate: output_default.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        log::info!(
            "Output device: {} ({}Hz, {}ch, {:?})",
            output_device_name,
            output_config.sample_rate.0,
            output_config.channels,
            output_default.sample_format()
        );

        Ok(Self {
            config,
            output_device,
            output_config,
            sample_format: output_default.sample_format(),
            output_device_name,
        })
    }

    /// Prepare `engine` for this device and start the output callback.
    ///
    /// Each callback drains pending MIDI into a fixed buffer, hands it to
    /// `learn`, then renders the engine. The returned stream must be kept alive.
    pub fn start(
        &self,
        engine: Arc<StemEngine>,
        learn: Arc<MidiLearnManager>,
        mut midi_queue: Option<Consumer<ControlChange>>,
        event_sender: Sender<EngineEvent>,
    ) -> Result<Stream> {
        if self.sample_format != SampleFormat::F32 {
            log::warn!(
                "Device default format is {:?}; requesting f32 output",
                self.sample_format
            );
        }

        let channels = self.output_config.channels as usize;
        engine.prepare_to_play(self.sample_rate(), self.config.buffer_size);

        // Preallocated here, owned by the callback
        let mut mixer = StemMixer::new(self.config.max_block_frames, channels);
        let mut midi_buffer = MidiBuffer::new();

        let stream = self.output_device.build_output_stream(
            &self.output_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if let Some(queue) = midi_queue.as_mut() {
                    drain_queue(queue, &mut midi_buffer);
                    if !midi_buffer.is_empty() {
                        learn.process_messages(&midi_buffer, &engine);
                    }
                }
                engine.render(data, &mut mixer);
            },
            move |err| {
                // May run on the audio thread depending on backend
                let _ = event_sender.try_send(EngineEvent::StreamError(err.to_string()));
            },
            None,
        )?;

        stream.play()?;
        log::info!(
            "Audio stream started: {}Hz, {}ch",
            self.sample_rate(),
            channels
        );
        Ok(stream)
    }

    pub fn sample_rate(&self) -> u32 {
        self.output_config.sample_rate.0
    }

    pub fn channels(&self) -> u16 {
        self.output_config.channels
    }

    pub fn output_device_name(&self) -> &str {
        &self.output_device_name
    }
}

/// Names of all output devices on the default host.
pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let mut outputs = Vec::new();
    for device in host.output_devices()? {
        outputs.push(device.name().unwrap_or_else(|_| "Unknown".to_string()));
    }
    Ok(outputs)
}
