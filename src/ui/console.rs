// src/ui/console.rs
// Line-oriented control surface running on the control thread

use anyhow::{Result, anyhow};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use crate::audio::{NUM_STEM_TYPES, StemEngine, StemType};
use crate::config::Settings;
use crate::detect::{DetectedSong, StemDetector};
use crate::midi::{LearnState, MidiLearnManager, MidiTarget};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Load(usize),
    Unload,
    Play,
    Pause,
    Stop,
    Toggle,
    Rewind,
    FastForward,
    Seek(f64),
    Position,
    Volume(usize, f32),
    Mute(usize),
    Solo(usize),
    Learn(MidiTarget),
    Unlearn(MidiTarget),
    Cancel,
    Map,
    Scan(Option<PathBuf>),
    List,
    Save,
    Help,
    Quit,
}

impl Command {
    /// Parse one input line. Blank lines give `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Command>, String> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();

        let command = match verb.to_lowercase().as_str() {
            "load" => Command::Load(parse_number(args.first(), "song number")?),
            "unload" => Command::Unload,
            "play" => Command::Play,
            "pause" => Command::Pause,
            "stop" => Command::Stop,
            "toggle" | "space" => Command::Toggle,
            "rw" | "rewind" => Command::Rewind,
            "ff" | "forward" => Command::FastForward,
            "seek" => Command::Seek(parse_number(args.first(), "seconds")?),
            "pos" | "status" => Command::Position,
            "vol" | "volume" => {
                Command::Volume(parse_slot(args.first())?, parse_number(args.get(1), "volume")?)
            }
            "mute" => Command::Mute(parse_slot(args.first())?),
            "solo" => Command::Solo(parse_slot(args.first())?),
            "learn" => Command::Learn(parse_target(args.first())?),
            "unlearn" => Command::Unlearn(parse_target(args.first())?),
            "cancel" => Command::Cancel,
            "map" => Command::Map,
            "scan" => Command::Scan((!args.is_empty()).then(|| PathBuf::from(args.join(" ")))),
            "list" | "ls" => Command::List,
            "save" => Command::Save,
            "help" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            other => return Err(format!("unknown command '{}' (try 'help')", other)),
        };
        Ok(Some(command))
    }
}

fn parse_number<T: std::str::FromStr>(arg: Option<&&str>, what: &str) -> Result<T, String> {
    let arg = arg.ok_or_else(|| format!("missing {}", what))?;
    arg.parse()
        .map_err(|_| format!("'{}' is not a valid {}", arg, what))
}

/// Slot index (0-5) or stem name.
fn parse_slot(arg: Option<&&str>) -> Result<usize, String> {
    let arg = arg.ok_or("missing slot")?;
    if let Ok(index) = arg.parse::<usize>() {
        return if index < NUM_STEM_TYPES {
            Ok(index)
        } else {
            Err(format!("slot must be 0-{}", NUM_STEM_TYPES - 1))
        };
    }
    StemType::ALL
        .iter()
        .find(|stem| stem.name().eq_ignore_ascii_case(arg))
        .map(|stem| stem.index())
        .ok_or_else(|| format!("unknown slot '{}'", arg))
}

fn parse_target(arg: Option<&&str>) -> Result<MidiTarget, String> {
    let arg = arg.ok_or("missing target")?;
    MidiTarget::from_key(arg).ok_or_else(|| format!("unknown target '{}' (see 'map')", arg))
}

pub struct Console {
    engine: Arc<StemEngine>,
    learn: Arc<MidiLearnManager>,
    detector: StemDetector,
    settings: Settings,
    settings_path: Option<PathBuf>,
    songs: Vec<DetectedSong>,
}

impl Console {
    pub fn new(
        engine: Arc<StemEngine>,
        learn: Arc<MidiLearnManager>,
        settings: Settings,
        settings_path: Option<PathBuf>,
    ) -> Self {
        let detector = StemDetector::with_patterns(&settings.stem_patterns);
        Self {
            engine,
            learn,
            detector,
            settings,
            settings_path,
            songs: Vec::new(),
        }
    }

    pub fn songs(&self) -> &[DetectedSong] {
        &self.songs
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Scan `dir`, or the configured default folder. The folder becomes the new default.
    pub fn scan(&mut self, dir: Option<PathBuf>) -> usize {
        let Some(dir) = dir.or_else(|| self.settings.default_folder.clone()) else {
            self.songs.clear();
            return 0;
        };
        self.songs = self.detector.scan_directory(&dir);
        self.settings.default_folder = Some(dir);
        self.songs.len()
    }

    /// Read commands until `quit` or end of input.
    pub fn run(&mut self, input: impl BufRead, mut out: impl Write) -> Result<()> {
        for line in input.lines() {
            let line = line?;
            match Command::parse(&line) {
                Ok(Some(command)) => match self.execute(command, &mut out) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => writeln!(out, "error: {:#}", e)?,
                },
                Ok(None) => {}
                Err(message) => writeln!(out, "{}", message)?,
            }
            out.flush()?;
        }
        Ok(())
    }

    /// Returns false when the console should exit.
    pub fn execute(&mut self, command: Command, out: &mut impl Write) -> Result<bool> {
        let engine = &self.engine;
        match command {
            Command::Load(number) => {
                let song = number
                    .checked_sub(1)
                    .and_then(|i| self.songs.get(i))
                    .ok_or_else(|| anyhow!("no song {} (1-{})", number, self.songs.len()))?;
                let loaded = engine.load_detected(song);
                writeln!(
                    out,
                    "Loaded '{}': {} of {} stem(s), {:.1}s",
                    song.name,
                    loaded,
                    song.found_count(),
                    engine.total_length_seconds()
                )?;
                self.print_tracks(out)?;
            }
            Command::Unload => engine.unload_song(),
            Command::Play => {
                engine.play();
                if !engine.is_playing() {
                    writeln!(out, "Nothing to play")?;
                }
            }
            Command::Pause => engine.pause(),
            Command::Stop => engine.stop(),
            Command::Toggle => engine.toggle_play_pause(),
            Command::Rewind => engine.rewind(),
            Command::FastForward => engine.fast_forward(),
            Command::Seek(seconds) => engine.set_position(seconds),
            Command::Position => self.print_position(out)?,
            Command::Volume(slot, volume) => {
                self.require_track(slot)?;
                engine.set_track_volume(slot, volume);
                writeln!(out, "{} volume {:.2}", slot_name(slot), engine.track_volume(slot))?;
            }
            Command::Mute(slot) => {
                let muted = !self.require_track(slot)?.is_muted();
                engine.set_track_muted(slot, muted);
                writeln!(out, "{} {}", slot_name(slot), if muted { "muted" } else { "unmuted" })?;
            }
            Command::Solo(slot) => {
                let solo = !self.require_track(slot)?.is_solo();
                engine.set_track_solo(slot, solo);
                writeln!(out, "{} solo {}", slot_name(slot), if solo { "on" } else { "off" })?;
            }
            Command::Learn(target) => {
                self.learn.start_learning(target);
                writeln!(out, "Move a controller to bind {}", target)?;
            }
            Command::Unlearn(target) => {
                self.learn.remove_mapping(target);
                writeln!(out, "{} unbound", target)?;
            }
            Command::Cancel => self.learn.stop_learning(),
            Command::Map => self.print_mappings(out)?,
            Command::Scan(dir) => {
                let count = self.scan(dir);
                writeln!(out, "{} song(s) found", count)?;
                self.print_songs(out)?;
            }
            Command::List => self.print_songs(out)?,
            Command::Save => {
                let path = self
                    .settings_path
                    .clone()
                    .ok_or_else(|| anyhow!("no settings location available"))?;
                self.settings.capture_bindings(&self.learn);
                self.settings.seek_seconds = engine.seek_amount_seconds();
                self.settings.save(&path)?;
                writeln!(out, "Settings saved to {}", path.display())?;
            }
            Command::Help => print_help(out)?,
            Command::Quit => {
                engine.stop();
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn require_track(&self, slot: usize) -> Result<Arc<crate::audio::StemTrack>> {
        self.engine
            .track(slot)
            .ok_or_else(|| anyhow!("{} slot is empty", slot_name(slot)))
    }

    pub fn print_songs(&self, out: &mut impl Write) -> Result<()> {
        if self.songs.is_empty() {
            writeln!(out, "No songs. Use 'scan DIR'.")?;
        }
        for (i, song) in self.songs.iter().enumerate() {
            let stems: Vec<&str> = song.stems().map(|(stem, _)| stem.name()).collect();
            writeln!(out, "{:3}. {} [{}]", i + 1, song.name, stems.join(", "))?;
        }
        Ok(())
    }

    fn print_tracks(&self, out: &mut impl Write) -> Result<()> {
        for stem in StemType::ALL {
            if let Some(track) = self.engine.track(stem.index()) {
                writeln!(
                    out,
                    "  {} {:<7} {} ({:.1}s)",
                    stem.index(),
                    stem.name(),
                    track.display_name(),
                    track.length_seconds()
                )?;
            }
        }
        Ok(())
    }

    fn print_position(&self, out: &mut impl Write) -> Result<()> {
        let engine = &self.engine;
        let Some(name) = engine.song_name() else {
            writeln!(out, "No song loaded")?;
            return Ok(());
        };
        writeln!(
            out,
            "{} {:.2}s / {:.2}s ({:.0}%) {}",
            name,
            engine.position_seconds(),
            engine.total_length_seconds(),
            engine.position_normalized() * 100.0,
            if engine.is_playing() { "playing" } else { "stopped" }
        )?;
        Ok(())
    }

    fn print_mappings(&self, out: &mut impl Write) -> Result<()> {
        if let LearnState::Learning(target) = self.learn.state() {
            writeln!(out, "(learning {})", target)?;
        }
        for target in MidiTarget::all() {
            let binding = match self.learn.mapping(target) {
                Some(b) => match b.channel {
                    Some(ch) => format!("CC {} ch {}", b.cc, ch),
                    None => format!("CC {} any", b.cc),
                },
                None => "-".to_string(),
            };
            writeln!(out, "  {:<12} {:<14} {}", target.key(), target.name(), binding)?;
        }
        Ok(())
    }
}

fn slot_name(slot: usize) -> &'static str {
    StemDetector::stem_type_name(slot).unwrap_or("Unknown")
}

fn print_help(out: &mut impl Write) -> Result<()> {
    writeln!(out, "COMMANDS:")?;
    writeln!(out, "    scan [DIR]        Scan a folder for stems")?;
    writeln!(out, "    list              List scanned songs")?;
    writeln!(out, "    load N            Load song N")?;
    writeln!(out, "    unload            Unload the current song")?;
    writeln!(out, "    play|pause|stop   Transport")?;
    writeln!(out, "    toggle            Play/pause")?;
    writeln!(out, "    rw | ff           Seek back/forward")?;
    writeln!(out, "    seek SECONDS      Jump to a position")?;
    writeln!(out, "    pos               Show position")?;
    writeln!(out, "    vol SLOT V        Set slot volume (0.0-1.0)")?;
    writeln!(out, "    mute SLOT         Toggle mute")?;
    writeln!(out, "    solo SLOT         Toggle solo")?;
    writeln!(out, "    learn TARGET      Bind the next MIDI CC to TARGET")?;
    writeln!(out, "    unlearn TARGET    Remove a binding")?;
    writeln!(out, "    cancel            Leave learn mode")?;
    writeln!(out, "    map               Show MIDI bindings")?;
    writeln!(out, "    save              Save settings")?;
    writeln!(out, "    quit")?;
    writeln!(out)?;
    writeln!(out, "SLOT is 0-5 or a stem name (vocals, drums, bass, guitar, piano, other).")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioConfig;
    use crate::audio::decode::tests::write_wav;

    fn console_with_folder() -> (tempfile::TempDir, Console) {
        let dir = tempfile::tempdir().unwrap();
        write_wav(&dir.path().join("Tune_drums.wav"), &[vec![0.25; 4410]], 44100);
        write_wav(&dir.path().join("Tune (Bass).wav"), &[vec![0.5; 8820]], 44100);
        write_wav(&dir.path().join("Another_vocals.wav"), &[vec![0.1; 441]], 44100);

        let engine = Arc::new(StemEngine::new(&AudioConfig::default()));
        engine.prepare_to_play(44100, 512);
        let settings_path = Some(dir.path().join("config").join("settings.toml"));
        let mut console = Console::new(
            engine,
            Arc::new(MidiLearnManager::new()),
            Settings::default(),
            settings_path,
        );
        console.scan(Some(dir.path().to_path_buf()));
        (dir, console)
    }

    fn run(console: &mut Console, script: &str) -> String {
        let mut out = Vec::new();
        console.run(script.as_bytes(), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("  "), Ok(None));
        assert_eq!(Command::parse("load 2"), Ok(Some(Command::Load(2))));
        assert_eq!(Command::parse("VOL drums 0.5"), Ok(Some(Command::Volume(1, 0.5))));
        assert_eq!(Command::parse("mute 5"), Ok(Some(Command::Mute(5))));
        assert_eq!(
            Command::parse("learn playpause"),
            Ok(Some(Command::Learn(MidiTarget::PlayPause)))
        );
        assert_eq!(
            Command::parse("scan /my music/stems"),
            Ok(Some(Command::Scan(Some(PathBuf::from("/my music/stems")))))
        );
        assert!(Command::parse("vol 9 1.0").is_err());
        assert!(Command::parse("seek soon").is_err());
        assert!(Command::parse("dance").is_err());
    }

    #[test]
    fn test_scan_lists_songs_in_order() {
        let (_dir, console) = console_with_folder();
        let names: Vec<&str> = console.songs().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Another", "Tune"]);
    }

    #[test]
    fn test_load_and_control_session() {
        let (_dir, mut console) = console_with_folder();
        let output = run(
            &mut console,
            "load 2\nvol bass 0.5\nmute drums\nsolo 2\nplay\nseek 0.1\npos\n",
        );

        assert!(output.contains("Loaded 'Tune': 2 of 2 stem(s), 0.2s"), "{}", output);
        assert!(output.contains("Bass volume 0.50"));
        assert!(output.contains("Drums muted"));
        assert!(output.contains("Bass solo on"));
        assert!(output.contains("Tune 0.10s / 0.20s (50%) playing"), "{}", output);

        let engine = &console.engine;
        assert_eq!(engine.track_volume(StemType::Bass.index()), 0.5);
        assert!(engine.track(StemType::Drums.index()).unwrap().is_muted());
    }

    #[test]
    fn test_errors_are_reported_and_session_continues() {
        let (_dir, mut console) = console_with_folder();
        let output = run(&mut console, "load 7\nmute vocals\nbogus\nquit\nplay\n");
        assert!(output.contains("error: no song 7 (1-2)"));
        assert!(output.contains("error: Vocals slot is empty"));
        assert!(output.contains("unknown command 'bogus'"));
        assert!(!output.contains("Nothing to play"));
    }

    #[test]
    fn test_save_writes_bindings() {
        let (dir, mut console) = console_with_folder();
        console.learn.set_mapping(MidiTarget::Rewind, 12, None);
        run(&mut console, "save\n");

        let saved = Settings::load(&dir.path().join("config").join("settings.toml")).unwrap();
        assert_eq!(saved.default_folder.as_deref(), Some(dir.path()));
        assert_eq!(saved.bindings().len(), 1);
    }
}
