use arc_swap::ArcSwapOption;
use crossbeam::channel::Sender;
use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::mixer::clear_buffer_simd;
use super::{AudioConfig, EngineEvent, NUM_STEM_TYPES, StemMixer, StemTrack, StemType};
use crate::detect::DetectedSong;

pub const DEFAULT_SEEK_SECONDS: f64 = 5.0;

type Retired = Arc<dyn Any + Send + Sync>;

/// Immutable snapshot of the loaded song as seen by the render path.
#[derive(Debug)]
pub struct LoadedSong {
    pub name: String,
    pub slots: [Option<Arc<StemTrack>>; NUM_STEM_TYPES],
    pub total_length: i64,
}

impl LoadedSong {
    pub fn loaded_tracks(&self) -> impl Iterator<Item = &Arc<StemTrack>> {
        self.slots.iter().flatten()
    }

    pub fn has_loaded_tracks(&self) -> bool {
        self.slots.iter().any(Option::is_some)
    }
}

/// Transport and mixdown for one song of up to `NUM_STEM_TYPES` stems.
///
/// Shared by `Arc` between the control context and the audio callback. The
/// song is built off the audio thread and published with a single pointer
/// swap; scalar transport state lives in atomics. `render` never locks or
/// allocates, and replaced snapshots are only dropped on the control side
/// (see `collect_garbage`).
pub struct StemEngine {
    song: ArcSwapOption<LoadedSong>,
    playing: AtomicBool,
    position: AtomicI64,
    sample_rate: AtomicU32,
    block_size: AtomicUsize,
    seek_seconds: AtomicU64, // f64 bits
    event_sender: ArcSwapOption<Sender<EngineEvent>>,
    retired: Mutex<Vec<Retired>>,
    control: Mutex<()>,
}

impl StemEngine {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            song: ArcSwapOption::empty(),
            playing: AtomicBool::new(false),
            position: AtomicI64::new(0),
            sample_rate: AtomicU32::new(config.sample_rate),
            block_size: AtomicUsize::new(config.buffer_size),
            seek_seconds: AtomicU64::new(DEFAULT_SEEK_SECONDS.to_bits()),
            event_sender: ArcSwapOption::empty(),
            retired: Mutex::new(Vec::new()),
            control: Mutex::new(()),
        }
    }

    pub fn set_event_sender(&self, sender: Sender<EngineEvent>) {
        self.event_sender.store(Some(Arc::new(sender)));
    }

    fn send_event(&self, event: EngineEvent) {
        if let Some(sender) = &*self.event_sender.load() {
            let _ = sender.try_send(event);
        }
    }

    // ---------------------------------------------------------------------
    // Device configuration
    // ---------------------------------------------------------------------

    /// Configure for a device rate and block size. Safe with no song loaded.
    ///
    /// A loaded song is re-prepared at the new rate and the playhead is
    /// rescaled so it stays at the same point in time.
    pub fn prepare_to_play(&self, sample_rate: u32, block_size: usize) {
        let _control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        let sample_rate = sample_rate.max(1);
        let old_rate = self.sample_rate.swap(sample_rate, Ordering::AcqRel);
        self.block_size.store(block_size, Ordering::Release);

        let Some(current) = self.song.load_full() else {
            log::debug!("prepare_to_play: {}Hz / {} frames (no song)", sample_rate, block_size);
            return;
        };

        let mut total_length = 0;
        for track in current.loaded_tracks() {
            match track.prepare(sample_rate, block_size) {
                Ok(previous) => self.retire_opt(previous),
                Err(e) => log::warn!("Failed to prepare {}: {}", track.display_name(), e),
            }
            total_length = total_length.max(track.length_samples());
        }

        let song = LoadedSong {
            name: current.name.clone(),
            slots: current.slots.clone(),
            total_length,
        };
        let previous = self.song.swap(Some(Arc::new(song)));
        self.retire_opt(previous);

        if old_rate != sample_rate {
            let rescale = |pos: i64| {
                let scaled = pos as f64 * sample_rate as f64 / old_rate.max(1) as f64;
                (scaled.round() as i64).clamp(0, total_length)
            };
            let _ = self
                .position
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pos| Some(rescale(pos)));
        }

        log::info!(
            "Engine prepared: {}Hz, block {} frames, song length {} samples",
            sample_rate,
            block_size,
            total_length
        );
        self.collect_garbage();
    }

    /// Drop prepared playback buffers; the song stays loaded but renders silence.
    pub fn release_resources(&self) {
        let _control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(song) = &*self.song.load() {
            for track in song.loaded_tracks() {
                self.retire_opt(track.release());
            }
        }
        self.collect_garbage();
    }

    // ---------------------------------------------------------------------
    // Song lifecycle (control context only)
    // ---------------------------------------------------------------------

    /// Load a song's stems into their fixed slots.
    ///
    /// Not real-time safe: decodes files. Stems that fail to decode leave
    /// their slot empty; the song loads with whatever remains. Returns the
    /// number of slots that loaded.
    pub fn load_song(
        &self,
        name: &str,
        files: &[Option<PathBuf>; NUM_STEM_TYPES],
        found: &[bool; NUM_STEM_TYPES],
    ) -> usize {
        let _control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        self.playing.store(false, Ordering::Release);
        self.position.store(0, Ordering::Release);

        let sample_rate = self.sample_rate();
        let block_size = self.block_size();
        let mut slots: [Option<Arc<StemTrack>>; NUM_STEM_TYPES] = std::array::from_fn(|_| None);
        let mut total_length = 0;

        for stem in StemType::ALL {
            let index = stem.index();
            if !found[index] {
                continue;
            }
            let Some(path) = &files[index] else {
                continue;
            };

            let display_name = slot_display_name(name, path, index);
            let track = match StemTrack::load(stem, path, &display_name) {
                Ok(track) => track,
                Err(e) => {
                    log::warn!("Skipping {} stem of '{}': {}", stem, name, e);
                    self.send_event(EngineEvent::TrackLoadFailed {
                        slot: index,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            if let Err(e) = track.prepare(sample_rate, block_size) {
                log::warn!("Skipping {} stem of '{}': {}", stem, name, e);
                self.send_event(EngineEvent::TrackLoadFailed {
                    slot: index,
                    error: e.to_string(),
                });
                continue;
            }

            total_length = total_length.max(track.length_samples());
            slots[index] = Some(Arc::new(track));
        }

        let loaded = slots.iter().filter(|s| s.is_some()).count();
        let song = LoadedSong {
            name: name.to_string(),
            slots,
            total_length,
        };

        let previous = self.song.swap(Some(Arc::new(song)));
        self.retire_opt(previous);
        self.playing.store(false, Ordering::Release);
        self.position.store(0, Ordering::Release);

        log::info!(
            "Loaded '{}': {}/{} stems, {} samples",
            name,
            loaded,
            found.iter().filter(|&&f| f).count(),
            total_length
        );
        self.send_event(EngineEvent::SongLoaded {
            name: name.to_string(),
            loaded_slots: loaded,
        });
        self.collect_garbage();
        loaded
    }

    /// Convenience wrapper taking a scan result.
    pub fn load_detected(&self, song: &DetectedSong) -> usize {
        self.load_song(&song.name, &song.files, &song.found)
    }

    pub fn unload_song(&self) {
        let _control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        self.playing.store(false, Ordering::Release);
        self.position.store(0, Ordering::Release);
        let previous = self.song.swap(None);
        if previous.is_some() {
            log::info!("Song unloaded");
            self.send_event(EngineEvent::SongUnloaded);
        }
        self.retire_opt(previous);
        self.collect_garbage();
    }

    // ---------------------------------------------------------------------
    // Transport
    // ---------------------------------------------------------------------

    pub fn play(&self) {
        let has_tracks = match &*self.song.load() {
            Some(song) => song.has_loaded_tracks(),
            None => false,
        };
        if !has_tracks {
            return;
        }
        if !self.playing.swap(true, Ordering::AcqRel) {
            self.send_event(EngineEvent::PlaybackStarted);
        }
    }

    pub fn pause(&self) {
        if self.playing.swap(false, Ordering::AcqRel) {
            self.send_event(EngineEvent::PlaybackPaused);
        }
    }

    pub fn stop(&self) {
        let was_playing = self.playing.swap(false, Ordering::AcqRel);
        self.position.store(0, Ordering::Release);
        if was_playing {
            self.send_event(EngineEvent::PlaybackStopped);
        }
    }

    pub fn toggle_play_pause(&self) {
        if self.is_playing() {
            self.pause();
        } else {
            self.play();
        }
    }

    pub fn rewind(&self) {
        self.seek_relative(-self.seek_amount_samples());
    }

    pub fn fast_forward(&self) {
        self.seek_relative(self.seek_amount_samples());
    }

    fn seek_relative(&self, delta: i64) {
        let total = self.total_length_samples();
        let _ = self
            .position
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pos| {
                Some(pos.saturating_add(delta).clamp(0, total))
            });
    }

    pub fn set_position(&self, seconds: f64) {
        let samples = (seconds * self.sample_rate() as f64) as i64;
        self.position
            .store(samples.clamp(0, self.total_length_samples()), Ordering::Release);
    }

    pub fn set_position_normalized(&self, fraction: f64) {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        let total = self.total_length_samples();
        let samples = (fraction * total as f64) as i64;
        self.position.store(samples.clamp(0, total), Ordering::Release);
    }

    pub fn seek_amount_seconds(&self) -> f64 {
        f64::from_bits(self.seek_seconds.load(Ordering::Relaxed))
    }

    pub fn set_seek_amount_seconds(&self, seconds: f64) {
        let seconds = if seconds.is_finite() { seconds.max(0.0) } else { DEFAULT_SEEK_SECONDS };
        self.seek_seconds.store(seconds.to_bits(), Ordering::Relaxed);
    }

    fn seek_amount_samples(&self) -> i64 {
        (self.seek_amount_seconds() * self.sample_rate() as f64) as i64
    }

    // ---------------------------------------------------------------------
    // Per-slot parameters (safe from any context)
    // ---------------------------------------------------------------------

    fn with_track<R>(&self, slot: usize, f: impl FnOnce(&StemTrack) -> R) -> Option<R> {
        let guard = self.song.load();
        let song = (*guard).as_ref()?;
        let track = song.slots.get(slot)?.as_ref()?;
        Some(f(track))
    }

    /// Out-of-range or empty slots are ignored.
    pub fn set_track_volume(&self, slot: usize, volume: f32) {
        self.with_track(slot, |track| track.set_volume(volume));
    }

    pub fn track_volume(&self, slot: usize) -> f32 {
        self.with_track(slot, StemTrack::volume).unwrap_or(0.0)
    }

    pub fn set_track_muted(&self, slot: usize, muted: bool) {
        self.with_track(slot, |track| track.set_muted(muted));
    }

    pub fn set_track_solo(&self, slot: usize, solo: bool) {
        self.with_track(slot, |track| track.set_solo(solo));
    }

    /// Handle to a loaded track. Control context only: the returned `Arc`
    /// must not be dropped on the audio thread.
    pub fn track(&self, slot: usize) -> Option<Arc<StemTrack>> {
        let guard = self.song.load();
        (*guard).as_ref()?.slots.get(slot)?.clone()
    }

    // ---------------------------------------------------------------------
    // Render path
    // ---------------------------------------------------------------------

    /// Produce one callback's worth of interleaved output.
    ///
    /// `output` uses `mixer.channels()` channels. Blocks longer than the
    /// mixer's capacity are rendered as consecutive sub-blocks.
    pub fn render(&self, output: &mut [f32], mixer: &mut StemMixer) {
        clear_buffer_simd(output);

        let guard = self.song.load();
        let Some(song) = &*guard else {
            return;
        };
        if !song.has_loaded_tracks() {
            return;
        }

        let block_len = mixer.capacity_frames() * mixer.channels();
        for block in output.chunks_mut(block_len) {
            if !self.is_playing() || !self.render_block(song, block, mixer) {
                break;
            }
        }
    }

    /// Stop and rewind if the position is still the `observed` end position.
    fn stop_at_end(&self, observed: i64) -> bool {
        if self
            .position
            .compare_exchange(observed, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.playing.store(false, Ordering::Release);
        self.send_event(EngineEvent::PlaybackStopped);
        true
    }

    /// Returns false when playback stopped at the end of the song.
    fn render_block(&self, song: &LoadedSong, block: &mut [f32], mixer: &mut StemMixer) -> bool {
        let frames = (block.len() / mixer.channels()) as i64;
        let pos = self.position.load(Ordering::Acquire);

        if pos >= song.total_length {
            // A seek that got in first keeps playing from its target next block
            return !self.stop_at_end(pos);
        }

        let any_solo = song.loaded_tracks().any(|track| track.is_solo());
        for track in song.loaded_tracks() {
            if any_solo && !track.is_solo() {
                continue;
            }
            mixer.mix_track(track, block, pos);
        }

        // A seek from the control context wins over the advance
        let _ = self
            .position
            .compare_exchange(pos, pos + frames, Ordering::AcqRel, Ordering::Acquire);
        true
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn has_song(&self) -> bool {
        self.song.load().is_some()
    }

    pub fn song_name(&self) -> Option<String> {
        (*self.song.load()).as_ref().map(|song| song.name.clone())
    }

    pub fn loaded_slots(&self) -> Vec<StemType> {
        match &*self.song.load() {
            Some(song) => song.loaded_tracks().map(|t| t.slot()).collect(),
            None => Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Acquire)
    }

    pub fn block_size(&self) -> usize {
        self.block_size.load(Ordering::Acquire)
    }

    pub fn position_samples(&self) -> i64 {
        self.position.load(Ordering::Acquire)
    }

    pub fn total_length_samples(&self) -> i64 {
        (*self.song.load()).as_ref().map_or(0, |song| song.total_length)
    }

    pub fn position_seconds(&self) -> f64 {
        self.position_samples() as f64 / self.sample_rate().max(1) as f64
    }

    pub fn total_length_seconds(&self) -> f64 {
        self.total_length_samples() as f64 / self.sample_rate().max(1) as f64
    }

    pub fn position_normalized(&self) -> f64 {
        let total = self.total_length_samples();
        if total <= 0 {
            return 0.0;
        }
        (self.position_samples() as f64 / total as f64).clamp(0.0, 1.0)
    }

    // ---------------------------------------------------------------------
    // Deferred deallocation
    // ---------------------------------------------------------------------

    fn retire_opt<T: Send + Sync + 'static>(&self, item: Option<Arc<T>>) {
        if let Some(item) = item {
            self.retired
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(item as Retired);
        }
    }

    /// Free replaced songs and buffers the render path no longer references.
    ///
    /// Call periodically from the control context.
    pub fn collect_garbage(&self) -> usize {
        let mut retired = self.retired.lock().unwrap_or_else(PoisonError::into_inner);
        let before = retired.len();
        retired.retain(|item| Arc::strong_count(item) > 1);
        let freed = before - retired.len();
        if freed > 0 {
            log::debug!("Freed {} retired audio snapshot(s)", freed);
        }
        freed
    }
}

impl Drop for StemEngine {
    fn drop(&mut self) {
        self.playing.store(false, Ordering::Release);
    }
}

/// Label for a slot: the file stem minus the song-name prefix, separators
/// and wrapping parentheses, or "Track N" when nothing is left.
pub fn slot_display_name(song_name: &str, path: &Path, index: usize) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut label = stem.as_str();
    if !song_name.is_empty() && stem.to_lowercase().starts_with(&song_name.to_lowercase()) {
        let prefix_chars = song_name.chars().count();
        let cut = stem
            .char_indices()
            .nth(prefix_chars)
            .map_or(stem.len(), |(i, _)| i);
        label = &stem[cut..];
    }

    let mut label = label.trim_start_matches(['_', '-', ' ']).trim_end();
    if label.len() >= 2 && label.starts_with('(') && label.ends_with(')') {
        label = &label[1..label.len() - 1];
    }

    if label.is_empty() {
        format!("Track {}", index + 1)
    } else {
        label.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decode::tests::write_wav;
    use crossbeam::channel;
    use std::thread;

    const RATE: u32 = 44100;

    struct Fixture {
        _dir: tempfile::TempDir,
        files: [Option<PathBuf>; NUM_STEM_TYPES],
        found: [bool; NUM_STEM_TYPES],
    }

    /// Mono constant-level stems: (slot, length, level)
    fn fixture(stems: &[(StemType, usize, f32)]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut files: [Option<PathBuf>; NUM_STEM_TYPES] = Default::default();
        let mut found = [false; NUM_STEM_TYPES];
        for &(stem, len, level) in stems {
            let path = dir.path().join(format!("Song_{}.wav", stem.name().to_lowercase()));
            write_wav(&path, &[vec![level; len]], RATE);
            files[stem.index()] = Some(path);
            found[stem.index()] = true;
        }
        Fixture {
            _dir: dir,
            files,
            found,
        }
    }

    fn engine() -> StemEngine {
        let engine = StemEngine::new(&AudioConfig::default());
        engine.prepare_to_play(RATE, 64);
        engine
    }

    fn render_block(engine: &StemEngine, mixer: &mut StemMixer, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * mixer.channels()];
        engine.render(&mut out, mixer);
        out
    }

    #[test]
    fn test_render_without_song_is_silent() {
        let engine = engine();
        let mut mixer = StemMixer::new(64, 2);
        engine.play();
        assert!(!engine.is_playing());
        let out = render_block(&engine, &mut mixer, 64);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_partial_song_scenario() {
        let fx = fixture(&[(StemType::Drums, 1000, 0.25), (StemType::Bass, 1500, 0.5)]);
        let engine = engine();
        let loaded = engine.load_song("Song", &fx.files, &fx.found);

        assert_eq!(loaded, 2);
        assert_eq!(engine.total_length_samples(), 1500);
        assert_eq!(engine.loaded_slots(), vec![StemType::Drums, StemType::Bass]);
        assert!(engine.track(StemType::Vocals.index()).is_none());

        let mut mixer = StemMixer::new(64, 2);
        engine.play();
        let out = render_block(&engine, &mut mixer, 64);
        assert!(out.iter().all(|&s| (s - 0.75).abs() < 1e-6));
        assert_eq!(engine.position_samples(), 64);

        // Drums at zero leaves exactly the bass contribution
        engine.set_track_volume(StemType::Drums.index(), 0.0);
        engine.set_position(0.0);
        let out = render_block(&engine, &mut mixer, 64);
        assert!(out.iter().all(|&s| s == 0.5));
    }

    #[test]
    fn test_mix_is_sum_of_scaled_stems() {
        let fx = fixture(&[
            (StemType::Vocals, 500, 0.2),
            (StemType::Drums, 500, 0.4),
            (StemType::Other, 500, 0.8),
        ]);
        let engine = engine();
        engine.load_song("Song", &fx.files, &fx.found);
        engine.set_track_volume(0, 0.5);
        engine.set_track_volume(1, 0.25);
        engine.set_track_volume(5, 1.0);

        let mut mixer = StemMixer::new(64, 1);
        engine.play();
        let out = render_block(&engine, &mut mixer, 32);
        let expected = 0.2 * 0.5 + 0.4 * 0.25 + 0.8 * 1.0;
        assert!(out.iter().all(|&s| (s - expected).abs() < 1e-6));
    }

    #[test]
    fn test_solo_excludes_other_slots() {
        let fx = fixture(&[(StemType::Drums, 500, 0.25), (StemType::Bass, 500, 0.5)]);
        let engine = engine();
        engine.load_song("Song", &fx.files, &fx.found);
        engine.set_track_solo(StemType::Bass.index(), true);
        engine.set_track_volume(StemType::Drums.index(), 1.0);

        let mut mixer = StemMixer::new(64, 2);
        engine.play();
        let out = render_block(&engine, &mut mixer, 16);
        assert!(out.iter().all(|&s| s == 0.5));

        // A muted solo slot is silent but still silences the rest
        engine.set_track_muted(StemType::Bass.index(), true);
        let out = render_block(&engine, &mut mixer, 16);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_end_of_song_auto_stops() {
        let fx = fixture(&[(StemType::Bass, 100, 0.5)]);
        let engine = engine();
        let (tx, rx) = channel::bounded(16);
        engine.set_event_sender(tx);
        engine.load_song("Song", &fx.files, &fx.found);

        let mut mixer = StemMixer::new(64, 1);
        engine.play();
        let first = render_block(&engine, &mut mixer, 64);
        let second = render_block(&engine, &mut mixer, 64);
        assert!(first.iter().all(|&s| s == 0.5));
        assert_eq!(&second[..36], &[0.5; 36][..]);
        assert!(second[36..].iter().all(|&s| s == 0.0));
        // Not clamped mid-block
        assert_eq!(engine.position_samples(), 128);
        assert!(engine.is_playing());

        let third = render_block(&engine, &mut mixer, 64);
        assert!(third.iter().all(|&s| s == 0.0));
        assert!(!engine.is_playing());
        assert_eq!(engine.position_samples(), 0);

        let events: Vec<_> = rx.try_iter().collect();
        assert!(events.contains(&EngineEvent::PlaybackStarted));
        assert_eq!(events.last(), Some(&EngineEvent::PlaybackStopped));
    }

    #[test]
    fn test_seek_before_end_of_song_keeps_playing() {
        let fx = fixture(&[(StemType::Bass, 100, 0.5)]);
        let engine = engine();
        let (tx, rx) = channel::bounded(16);
        engine.set_event_sender(tx);
        engine.load_song("Song", &fx.files, &fx.found);
        engine.play();

        // The render path saw the end, but a seek moved the position first
        engine.set_position_normalized(0.5);
        let seeked = engine.position_samples();
        assert!(!engine.stop_at_end(engine.total_length_samples()));
        assert!(engine.is_playing());
        assert_eq!(engine.position_samples(), seeked);
        assert!(!rx.try_iter().any(|e| e == EngineEvent::PlaybackStopped));

        engine.set_position_normalized(1.0);
        assert!(engine.stop_at_end(engine.total_length_samples()));
        assert!(!engine.is_playing());
        assert_eq!(engine.position_samples(), 0);
        assert_eq!(rx.try_iter().last(), Some(EngineEvent::PlaybackStopped));
    }

    #[test]
    fn test_seeks_are_clamped() {
        let fx = fixture(&[(StemType::Bass, RATE as usize * 8, 0.1)]);
        let engine = engine();
        engine.load_song("Song", &fx.files, &fx.found);
        let total = engine.total_length_samples();
        assert_eq!(total, RATE as i64 * 8);

        engine.set_position(-3.0);
        assert_eq!(engine.position_samples(), 0);
        engine.set_position(100.0);
        assert_eq!(engine.position_samples(), total);
        engine.set_position_normalized(0.5);
        assert_eq!(engine.position_samples(), total / 2);
        engine.set_position_normalized(7.0);
        assert_eq!(engine.position_samples(), total);

        engine.fast_forward();
        assert_eq!(engine.position_samples(), total);
        engine.set_position(1.0);
        engine.rewind();
        assert_eq!(engine.position_samples(), 0);
        engine.fast_forward();
        assert_eq!(engine.position_samples(), RATE as i64 * 5);

        engine.set_seek_amount_seconds(2.0);
        engine.rewind();
        assert_eq!(engine.position_samples(), RATE as i64 * 3);
    }

    #[test]
    fn test_stop_resets_position_and_pause_keeps_it() {
        let fx = fixture(&[(StemType::Bass, 1000, 0.1)]);
        let engine = engine();
        engine.load_song("Song", &fx.files, &fx.found);
        let mut mixer = StemMixer::new(64, 2);

        engine.toggle_play_pause();
        assert!(engine.is_playing());
        render_block(&engine, &mut mixer, 64);
        engine.toggle_play_pause();
        assert!(!engine.is_playing());
        assert_eq!(engine.position_samples(), 64);

        // Paused: render does not advance
        let out = render_block(&engine, &mut mixer, 64);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(engine.position_samples(), 64);

        engine.play();
        engine.stop();
        assert!(!engine.is_playing());
        assert_eq!(engine.position_samples(), 0);
    }

    #[test]
    fn test_long_callback_is_split_into_sub_blocks() {
        let fx = fixture(&[(StemType::Vocals, 1000, 0.3)]);
        let engine = engine();
        engine.load_song("Song", &fx.files, &fx.found);
        let mut mixer = StemMixer::new(16, 2);
        engine.play();

        let out = render_block(&engine, &mut mixer, 100);
        assert!(out.iter().all(|&s| (s - 0.3).abs() < 1e-6));
        assert_eq!(engine.position_samples(), 100);
    }

    #[test]
    fn test_unreadable_stem_is_skipped() {
        let mut fx = fixture(&[(StemType::Drums, 200, 0.25)]);
        fx.files[StemType::Vocals.index()] = Some(PathBuf::from("/nonexistent/Song_vocals.wav"));
        fx.found[StemType::Vocals.index()] = true;

        let engine = engine();
        let (tx, rx) = channel::bounded(16);
        engine.set_event_sender(tx);
        assert_eq!(engine.load_song("Song", &fx.files, &fx.found), 1);
        assert_eq!(engine.total_length_samples(), 200);

        let events: Vec<_> = rx.try_iter().collect();
        assert!(events.iter().any(|e| matches!(e, EngineEvent::TrackLoadFailed { slot: 0, .. })));
        assert!(events.contains(&EngineEvent::SongLoaded {
            name: "Song".to_string(),
            loaded_slots: 1
        }));
    }

    #[test]
    fn test_found_flag_gates_loading() {
        let mut fx = fixture(&[(StemType::Drums, 200, 0.25), (StemType::Bass, 300, 0.5)]);
        fx.found[StemType::Bass.index()] = false;
        let engine = engine();
        assert_eq!(engine.load_song("Song", &fx.files, &fx.found), 1);
        assert_eq!(engine.total_length_samples(), 200);
    }

    #[test]
    fn test_unload_returns_to_empty() {
        let fx = fixture(&[(StemType::Bass, 200, 0.5)]);
        let engine = engine();
        engine.load_song("Song", &fx.files, &fx.found);
        engine.play();
        engine.unload_song();

        assert!(!engine.has_song());
        assert!(!engine.is_playing());
        assert_eq!(engine.total_length_samples(), 0);
        assert_eq!(engine.song_name(), None);
        engine.collect_garbage();
        assert_eq!(engine.retired.lock().unwrap().len(), 0);
    }

    #[test]
    fn test_prepare_rescales_length_and_position() {
        let fx = fixture(&[(StemType::Bass, 4410, 0.5)]);
        let engine = engine();
        engine.load_song("Song", &fx.files, &fx.found);
        engine.set_position_normalized(0.5);
        assert_eq!(engine.position_samples(), 2205);

        engine.prepare_to_play(88200, 128);
        assert_eq!(engine.total_length_samples(), 8820);
        assert_eq!(engine.position_samples(), 4410);
        assert!((engine.position_seconds() - 0.05).abs() < 1e-9);
        assert_eq!(engine.block_size(), 128);
    }

    #[test]
    fn test_volume_of_missing_slot_is_ignored() {
        let engine = engine();
        engine.set_track_volume(3, 0.5);
        engine.set_track_volume(99, 0.5);
        assert_eq!(engine.track_volume(99), 0.0);
    }

    #[test]
    fn test_render_concurrent_with_control_calls() {
        let fx = fixture(&[(StemType::Drums, 4000, 0.25), (StemType::Bass, 3000, 0.5)]);
        let engine = Arc::new(engine());
        engine.load_song("Song", &fx.files, &fx.found);
        engine.play();

        let audio = Arc::clone(&engine);
        let renderer = thread::spawn(move || {
            let mut mixer = StemMixer::new(64, 2);
            let mut out = vec![0.0; 128];
            for _ in 0..2000 {
                audio.render(&mut out, &mut mixer);
                assert!(out.iter().all(|s| s.is_finite() && s.abs() <= 0.75 + 1e-6));
            }
        });

        for i in 0..50 {
            engine.set_track_volume(1, (i % 10) as f32 / 10.0);
            engine.set_position_normalized((i % 7) as f64 / 7.0);
            if i % 10 == 0 {
                engine.load_song("Song", &fx.files, &fx.found);
                engine.play();
            }
            assert!(engine.position_samples() >= 0);
        }

        renderer.join().unwrap();
        engine.unload_song();
        engine.collect_garbage();
    }

    #[test]
    fn test_slot_display_names() {
        let name = |song: &str, file: &str, i| slot_display_name(song, Path::new(file), i);
        assert_eq!(name("My Song", "/x/My Song (Vocals).wav", 0), "Vocals");
        assert_eq!(name("My Song", "/x/my song_drums.flac", 1), "drums");
        assert_eq!(name("My Song", "/x/My Song - Bass.mp3", 2), "Bass");
        assert_eq!(name("My Song", "/x/My Song.wav", 3), "Track 4");
        assert_eq!(name("Other", "/x/guitar_take.wav", 3), "guitar_take");
    }
}
