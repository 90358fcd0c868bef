// src/midi/learn.rs
// MIDI CC bindings and the learn state machine

use arc_swap::ArcSwapOption;
use crossbeam::channel::Sender;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use super::message::{ControlChange, MidiBuffer};
use crate::audio::{NUM_STEM_TYPES, StemEngine, StemType};

/// Something a CC can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MidiTarget {
    StemVolume(StemType),
    PlayPause,
    Stop,
    Rewind,
    FastForward,
}

impl MidiTarget {
    pub const COUNT: usize = NUM_STEM_TYPES + 4;

    pub fn index(self) -> usize {
        match self {
            MidiTarget::StemVolume(stem) => stem.index(),
            MidiTarget::PlayPause => NUM_STEM_TYPES,
            MidiTarget::Stop => NUM_STEM_TYPES + 1,
            MidiTarget::Rewind => NUM_STEM_TYPES + 2,
            MidiTarget::FastForward => NUM_STEM_TYPES + 3,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        if let Some(stem) = StemType::from_index(index) {
            return Some(MidiTarget::StemVolume(stem));
        }
        match index - NUM_STEM_TYPES {
            0 => Some(MidiTarget::PlayPause),
            1 => Some(MidiTarget::Stop),
            2 => Some(MidiTarget::Rewind),
            3 => Some(MidiTarget::FastForward),
            _ => None,
        }
    }

    pub fn all() -> impl Iterator<Item = MidiTarget> {
        (0..Self::COUNT).filter_map(Self::from_index)
    }

    pub fn name(self) -> &'static str {
        match self {
            MidiTarget::StemVolume(StemType::Vocals) => "Vocals Volume",
            MidiTarget::StemVolume(StemType::Drums) => "Drums Volume",
            MidiTarget::StemVolume(StemType::Bass) => "Bass Volume",
            MidiTarget::StemVolume(StemType::Guitar) => "Guitar Volume",
            MidiTarget::StemVolume(StemType::Piano) => "Piano Volume",
            MidiTarget::StemVolume(StemType::Other) => "Other Volume",
            MidiTarget::PlayPause => "Play/Pause",
            MidiTarget::Stop => "Stop",
            MidiTarget::Rewind => "Rewind",
            MidiTarget::FastForward => "Fast Forward",
        }
    }

    /// Short identifier used in settings files and console commands.
    pub fn key(self) -> &'static str {
        match self {
            MidiTarget::StemVolume(StemType::Vocals) => "vocals",
            MidiTarget::StemVolume(StemType::Drums) => "drums",
            MidiTarget::StemVolume(StemType::Bass) => "bass",
            MidiTarget::StemVolume(StemType::Guitar) => "guitar",
            MidiTarget::StemVolume(StemType::Piano) => "piano",
            MidiTarget::StemVolume(StemType::Other) => "other",
            MidiTarget::PlayPause => "playpause",
            MidiTarget::Stop => "stop",
            MidiTarget::Rewind => "rewind",
            MidiTarget::FastForward => "fastforward",
        }
    }

    /// Accepts a key (case-insensitive) or a numeric index.
    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim();
        if let Ok(index) = key.parse::<usize>() {
            return Self::from_index(index);
        }
        Self::all().find(|target| target.key().eq_ignore_ascii_case(key))
    }
}

impl std::fmt::Display for MidiTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// CC number plus channel filter; `channel: None` matches any channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiBinding {
    pub cc: u8,
    pub channel: Option<u8>,
}

impl MidiBinding {
    pub fn matches(&self, message: &ControlChange) -> bool {
        self.cc == message.cc && self.channel.is_none_or(|ch| ch == message.channel)
    }

    // bit 31: bound, bits 8-15: cc, bits 0-7: channel (0 = any)
    const BOUND: u32 = 1 << 31;

    fn pack(self) -> u32 {
        Self::BOUND | ((self.cc as u32) << 8) | self.channel.unwrap_or(0) as u32
    }

    fn unpack(bits: u32) -> Option<Self> {
        if bits & Self::BOUND == 0 {
            return None;
        }
        let channel = (bits & 0xFF) as u8;
        Some(Self {
            cc: ((bits >> 8) & 0x7F) as u8,
            channel: (channel != 0).then_some(channel),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnState {
    Idle,
    Learning(MidiTarget),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnEvent {
    MappingLearned {
        target: MidiTarget,
        cc: u8,
        channel: u8,
    },
}

const UNBOUND: u32 = 0;
const IDLE: u32 = 0;

/// Maps incoming CCs to engine actions and captures new bindings in learn mode.
///
/// Shared by `Arc` between the control context and the audio callback. The
/// binding table is an array of packed atomics, so lookups never lock.
/// Writers take `write_lock`; the audio thread only ever `try_lock`s it.
pub struct MidiLearnManager {
    bindings: [AtomicU32; MidiTarget::COUNT],
    learning: AtomicU32, // 0 = idle, else target index + 1
    write_lock: Mutex<()>,
    event_sender: ArcSwapOption<Sender<LearnEvent>>,
}

impl Default for MidiLearnManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MidiLearnManager {
    pub fn new() -> Self {
        Self {
            bindings: std::array::from_fn(|_| AtomicU32::new(UNBOUND)),
            learning: AtomicU32::new(IDLE),
            write_lock: Mutex::new(()),
            event_sender: ArcSwapOption::empty(),
        }
    }

    pub fn set_event_sender(&self, sender: Sender<LearnEvent>) {
        self.event_sender.store(Some(Arc::new(sender)));
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---------------------------------------------------------------------
    // Learn state
    // ---------------------------------------------------------------------

    pub fn start_learning(&self, target: MidiTarget) {
        self.learning
            .store(target.index() as u32 + 1, Ordering::Release);
        log::info!("MIDI learn: waiting for a CC for {}", target);
    }

    pub fn stop_learning(&self) {
        if self.learning.swap(IDLE, Ordering::AcqRel) != IDLE {
            log::info!("MIDI learn cancelled");
        }
    }

    pub fn state(&self) -> LearnState {
        match self.learning.load(Ordering::Acquire) {
            IDLE => LearnState::Idle,
            n => MidiTarget::from_index(n as usize - 1).map_or(LearnState::Idle, LearnState::Learning),
        }
    }

    pub fn is_learning(&self) -> bool {
        self.learning.load(Ordering::Acquire) != IDLE
    }

    pub fn learning_target(&self) -> Option<MidiTarget> {
        match self.state() {
            LearnState::Learning(target) => Some(target),
            LearnState::Idle => None,
        }
    }

    // ---------------------------------------------------------------------
    // Binding table
    // ---------------------------------------------------------------------

    /// Bind `cc` to `target`, evicting any other target bound to the same CC.
    pub fn set_mapping(&self, target: MidiTarget, cc: u8, channel: Option<u8>) {
        let _guard = self.lock();
        self.bind_locked(target, MidiBinding { cc: cc & 0x7F, channel });
    }

    fn bind_locked(&self, target: MidiTarget, binding: MidiBinding) {
        for (index, slot) in self.bindings.iter().enumerate() {
            if index == target.index() {
                continue;
            }
            if MidiBinding::unpack(slot.load(Ordering::Acquire)).is_some_and(|b| b.cc == binding.cc) {
                slot.store(UNBOUND, Ordering::Release);
            }
        }
        self.bindings[target.index()].store(binding.pack(), Ordering::Release);
    }

    pub fn remove_mapping(&self, target: MidiTarget) {
        let _guard = self.lock();
        self.bindings[target.index()].store(UNBOUND, Ordering::Release);
    }

    pub fn clear_mappings(&self) {
        let _guard = self.lock();
        for slot in &self.bindings {
            slot.store(UNBOUND, Ordering::Release);
        }
    }

    pub fn mapping(&self, target: MidiTarget) -> Option<MidiBinding> {
        MidiBinding::unpack(self.bindings[target.index()].load(Ordering::Acquire))
    }

    pub fn mapped_cc(&self, target: MidiTarget) -> Option<u8> {
        self.mapping(target).map(|b| b.cc)
    }

    /// Snapshot of all bound targets, in target order.
    pub fn bindings(&self) -> Vec<(MidiTarget, MidiBinding)> {
        MidiTarget::all()
            .filter_map(|target| self.mapping(target).map(|binding| (target, binding)))
            .collect()
    }

    /// Replace the whole table. Later entries win CC collisions.
    pub fn load_bindings(&self, bindings: &[(MidiTarget, MidiBinding)]) {
        let _guard = self.lock();
        for slot in &self.bindings {
            slot.store(UNBOUND, Ordering::Release);
        }
        for &(target, binding) in bindings {
            self.bind_locked(target, binding);
        }
        log::debug!("Loaded {} MIDI binding(s)", bindings.len());
    }

    // ---------------------------------------------------------------------
    // Audio-thread entry point
    // ---------------------------------------------------------------------

    /// Apply one block's CC messages to `engine`. REAL-TIME SAFE.
    pub fn process_messages(&self, messages: &MidiBuffer, engine: &StemEngine) {
        for message in messages.iter() {
            self.handle_control_change(message, engine);
        }
    }

    pub fn handle_control_change(&self, message: &ControlChange, engine: &StemEngine) {
        let learning = self.learning.load(Ordering::Acquire);
        if learning != IDLE {
            self.try_capture(learning, message);
            return;
        }

        for (index, slot) in self.bindings.iter().enumerate() {
            let Some(binding) = MidiBinding::unpack(slot.load(Ordering::Acquire)) else {
                continue;
            };
            if !binding.matches(message) {
                continue;
            }
            let Some(target) = MidiTarget::from_index(index) else {
                continue;
            };
            apply_target(target, message, engine);
        }
    }

    /// Capture `message` for the target being learned. If a control-side
    /// writer holds the table, stay in learn mode and take the next CC.
    fn try_capture(&self, learning: u32, message: &ControlChange) {
        let _guard = match self.write_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return,
        };

        // Cancelled or retargeted since we looked
        if self
            .learning
            .compare_exchange(learning, IDLE, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let Some(target) = MidiTarget::from_index(learning as usize - 1) else {
            return;
        };

        self.bind_locked(
            target,
            MidiBinding {
                cc: message.cc,
                channel: Some(message.channel),
            },
        );

        if let Some(sender) = &*self.event_sender.load() {
            let _ = sender.try_send(LearnEvent::MappingLearned {
                target,
                cc: message.cc,
                channel: message.channel,
            });
        }
    }
}

fn apply_target(target: MidiTarget, message: &ControlChange, engine: &StemEngine) {
    match target {
        MidiTarget::StemVolume(stem) => engine.set_track_volume(stem.index(), message.normalized()),
        MidiTarget::PlayPause if message.is_press() => engine.toggle_play_pause(),
        MidiTarget::Stop if message.is_press() => engine.stop(),
        MidiTarget::Rewind if message.is_press() => engine.rewind(),
        MidiTarget::FastForward if message.is_press() => engine.fast_forward(),
        _ => {}
    }
}
