//! MIDI input handling
//!
//! The midir callback parses Control-Change messages and pushes them into a
//! lock-free SPSC queue; the audio callback drains that queue into a
//! `MidiBuffer` before each render.

use midir::{MidiInput, MidiInputConnection};
use rtrb::{Consumer, Producer, RingBuffer};

use super::message::{ControlChange, MidiBuffer};
use crate::error::MidiError;

pub const MIDI_QUEUE_CAPACITY: usize = 1024;

const CLIENT_NAME: &str = "stemplayer-midi-in";

/// Queue between the MIDI driver thread and the audio callback.
pub fn midi_queue() -> (Producer<ControlChange>, Consumer<ControlChange>) {
    RingBuffer::new(MIDI_QUEUE_CAPACITY)
}

/// Move everything queued into `buffer`. Leftovers stay queued if it fills up.
pub fn drain_queue(consumer: &mut Consumer<ControlChange>, buffer: &mut MidiBuffer) {
    buffer.clear();
    while !buffer.is_full() {
        match consumer.pop() {
            Ok(message) => {
                buffer.push(message);
            }
            Err(_) => break,
        }
    }
}

/// Names of the available MIDI input ports.
pub fn list_ports() -> Result<Vec<String>, MidiError> {
    let midi_in = MidiInput::new(CLIENT_NAME).map_err(|e| MidiError::Init(e.to_string()))?;
    Ok(midi_in
        .ports()
        .iter()
        .filter_map(|port| midi_in.port_name(port).ok())
        .collect())
}

/// Open MIDI input connection. Dropping it closes the port.
pub struct MidiInputHandler {
    _connection: MidiInputConnection<Producer<ControlChange>>,
    port_name: String,
}

impl MidiInputHandler {
    /// Connect to the first input port whose name contains `port_match`
    /// (case-insensitive; empty matches the first port).
    pub fn connect(port_match: &str, producer: Producer<ControlChange>) -> Result<Self, MidiError> {
        let pattern = port_match.to_lowercase();
        let midi_in = MidiInput::new(CLIENT_NAME).map_err(|e| MidiError::Init(e.to_string()))?;

        let ports = midi_in.ports();
        if ports.is_empty() {
            return Err(MidiError::NoInputPorts);
        }

        let (port, port_name) = ports
            .into_iter()
            .filter_map(|port| {
                let name = midi_in.port_name(&port).ok()?;
                Some((port, name))
            })
            .find(|(_, name)| name.to_lowercase().contains(&pattern))
            .ok_or_else(|| MidiError::PortNotFound(port_match.to_string()))?;

        let connection = midi_in
            .connect(&port, "stemplayer-input", Self::midi_callback, producer)
            .map_err(|e| MidiError::Connect(e.to_string()))?;

        log::info!("MIDI: connected to input port: {}", port_name);

        Ok(Self {
            _connection: connection,
            port_name,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Runs on the MIDI driver thread. Must not block.
    fn midi_callback(_timestamp: u64, data: &[u8], producer: &mut Producer<ControlChange>) {
        if let Some(message) = ControlChange::parse(data) {
            // Full queue: the audio thread is behind, drop the event
            let _ = producer.push(message);
        }
    }
}
