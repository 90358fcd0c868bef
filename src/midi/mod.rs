pub mod input;
pub mod learn;
pub mod message;

pub use input::{MidiInputHandler, list_ports, midi_queue};
pub use learn::{LearnEvent, LearnState, MidiBinding, MidiLearnManager, MidiTarget};
pub use message::{ControlChange, MidiBuffer};
