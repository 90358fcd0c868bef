// src/midi/message.rs

/// A MIDI Control-Change event. `channel` is 1-based (1-16).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlChange {
    pub channel: u8,
    pub cc: u8,
    pub value: u8,
}

impl ControlChange {
    pub fn new(channel: u8, cc: u8, value: u8) -> Self {
        Self {
            channel: channel.clamp(1, 16),
            cc: cc & 0x7F,
            value: value & 0x7F,
        }
    }

    /// Parse raw MIDI bytes. Anything other than a Control-Change (0xBn cc vv) is ignored.
    pub fn parse(data: &[u8]) -> Option<Self> {
        match data {
            [status, cc, value, ..] if status & 0xF0 == 0xB0 => Some(Self {
                channel: (status & 0x0F) + 1,
                cc: cc & 0x7F,
                value: value & 0x7F,
            }),
            _ => None,
        }
    }

    /// Value scaled to [0, 1]; 127 maps to exactly 1.0.
    pub fn normalized(&self) -> f32 {
        self.value as f32 / 127.0
    }

    /// Momentary-button reading of the value (above the midpoint).
    pub fn is_press(&self) -> bool {
        self.value > 63
    }
}

pub const MIDI_BUFFER_CAPACITY: usize = 256;

/// Fixed-capacity batch of CC events handed to the learn manager once per
/// audio block. Never allocates after construction.
#[derive(Debug, Clone)]
pub struct MidiBuffer {
    messages: [ControlChange; MIDI_BUFFER_CAPACITY],
    len: usize,
    dropped: usize,
}

impl Default for MidiBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl MidiBuffer {
    pub fn new() -> Self {
        Self {
            messages: [ControlChange::default(); MIDI_BUFFER_CAPACITY],
            len: 0,
            dropped: 0,
        }
    }

    /// Returns false (and counts a drop) when full.
    pub fn push(&mut self, message: ControlChange) -> bool {
        if self.len == MIDI_BUFFER_CAPACITY {
            self.dropped += 1;
            return false;
        }
        self.messages[self.len] = message;
        self.len += 1;
        true
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == MIDI_BUFFER_CAPACITY
    }

    /// Messages that did not fit, since construction.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn iter(&self) -> impl Iterator<Item = &ControlChange> {
        self.messages[..self.len].iter()
    }
}

impl FromIterator<ControlChange> for MidiBuffer {
    fn from_iter<I: IntoIterator<Item = ControlChange>>(iter: I) -> Self {
        let mut buffer = Self::new();
        for message in iter {
            buffer.push(message);
        }
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_control_change() {
        let msg = ControlChange::parse(&[0xB3, 0x07, 0x64]).unwrap();
        assert_eq!(msg, ControlChange { channel: 4, cc: 7, value: 100 });
    }

    #[test]
    fn test_parse_ignores_other_messages() {
        assert_eq!(ControlChange::parse(&[0x90, 0x3C, 0x7F]), None);
        assert_eq!(ControlChange::parse(&[0xE0, 0x00, 0x40]), None);
        assert_eq!(ControlChange::parse(&[0xB0, 0x07]), None);
        assert_eq!(ControlChange::parse(&[]), None);
    }

    #[test]
    fn test_normalized_value_range() {
        assert_eq!(ControlChange::new(1, 7, 0).normalized(), 0.0);
        assert!((ControlChange::new(1, 7, 127).normalized() - 1.0).abs() < f32::EPSILON);
        assert!((ControlChange::new(1, 7, 64).normalized() - 64.0 / 127.0).abs() < 1e-6);
    }

    #[test]
    fn test_press_threshold() {
        assert!(!ControlChange::new(1, 20, 63).is_press());
        assert!(ControlChange::new(1, 20, 64).is_press());
    }

    #[test]
    fn test_buffer_drops_when_full() {
        let mut buffer = MidiBuffer::new();
        for i in 0..MIDI_BUFFER_CAPACITY {
            assert!(buffer.push(ControlChange::new(1, (i % 128) as u8, 0)));
        }
        assert!(buffer.is_full());
        assert!(!buffer.push(ControlChange::new(1, 1, 1)));
        assert_eq!(buffer.dropped(), 1);

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.iter().count(), 0);
    }
}
