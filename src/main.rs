use anyhow::Result;
use crossbeam::channel::{self, Receiver};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use stemplayer::audio::{AudioConfig, AudioStream, EngineEvent, StemEngine, list_output_devices};
use stemplayer::config::Settings;
use stemplayer::midi::{LearnEvent, MidiInputHandler, MidiLearnManager, list_ports, midi_queue};
use stemplayer::ui::Console;

fn print_help() {
    println!("Stemplayer - multi-stem audio player with MIDI control");
    println!();
    println!("USAGE:");
    println!("    stemplayer [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help          Print this help message");
    println!("    --debug             Enable debug logging");
    println!("    --folder DIR        Folder to scan for stems");
    println!("    --device NAME       Output device name");
    println!("    --midi PORT         Connect to the MIDI input whose name contains PORT");
    println!("    --list-devices      List audio outputs and MIDI inputs, then exit");
    println!();
    println!("DESCRIPTION:");
    println!("    Plays the separated stems of one song in sync, with per-stem");
    println!("    volume, mute and solo. Files are grouped into songs by name,");
    println!("    e.g. 'Song_vocals.wav' and 'Song (Drums).flac'.");
    println!();
    println!("    Type 'help' at the prompt for commands.");
    println!();
    println!("EXAMPLES:");
    println!("    stemplayer --folder ~/Music/Stems");
    println!("    stemplayer --midi nanokontrol --debug");
}

struct Args {
    debug: bool,
    folder: Option<PathBuf>,
    device: Option<String>,
    midi: Option<String>,
    list_devices: bool,
}

fn parse_args() -> Option<Args> {
    let mut args = Args {
        debug: false,
        folder: None,
        device: None,
        midi: None,
        list_devices: false,
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => return None,
            "--debug" => args.debug = true,
            "--list-devices" => args.list_devices = true,
            "--folder" => args.folder = iter.next().map(PathBuf::from),
            "--device" => args.device = iter.next(),
            "--midi" => args.midi = iter.next(),
            other => {
                eprintln!("Unknown option: {}", other);
                return None;
            }
        }
    }
    Some(args)
}

fn main() -> Result<()> {
    let Some(args) = parse_args() else {
        print_help();
        return Ok(());
    };

    let default_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if args.list_devices {
        println!("Audio outputs:");
        for (i, name) in list_output_devices()?.iter().enumerate() {
            println!("  {}: {}", i, name);
        }
        println!("\nMIDI inputs:");
        match list_ports() {
            Ok(ports) => {
                for (i, name) in ports.iter().enumerate() {
                    println!("  {}: {}", i, name);
                }
            }
            Err(e) => println!("  unavailable: {}", e),
        }
        return Ok(());
    }

    let settings_path = match Settings::default_path() {
        Ok(path) => Some(path),
        Err(e) => {
            log::warn!("{}; settings will not be saved", e);
            None
        }
    };
    let mut settings = match &settings_path {
        Some(path) => Settings::load(path).unwrap_or_else(|e| {
            log::error!("{}; using default settings", e);
            Settings::default()
        }),
        None => Settings::default(),
    };
    if let Some(folder) = args.folder {
        settings.default_folder = Some(folder);
    }
    if let Some(device) = args.device {
        settings.output_device = Some(device);
    }
    if let Some(port) = args.midi {
        settings.midi_port = Some(port);
    }

    let config = AudioConfig::default();
    let engine = Arc::new(StemEngine::new(&config));
    engine.set_seek_amount_seconds(settings.seek_seconds);
    let (event_sender, event_receiver) = channel::bounded::<EngineEvent>(64);
    engine.set_event_sender(event_sender.clone());

    let learn = Arc::new(MidiLearnManager::new());
    settings.apply_bindings(&learn);
    let (learn_sender, learn_receiver) = channel::bounded::<LearnEvent>(16);
    learn.set_event_sender(learn_sender);

    // MIDI is optional: without a port the player still works from the console
    let mut midi_consumer = None;
    let _midi_input = match settings.midi_port.as_deref() {
        Some(port) => {
            let (producer, consumer) = midi_queue();
            match MidiInputHandler::connect(port, producer) {
                Ok(handler) => {
                    println!("MIDI input: {}", handler.port_name());
                    midi_consumer = Some(consumer);
                    Some(handler)
                }
                Err(e) => {
                    log::warn!("MIDI unavailable: {}", e);
                    None
                }
            }
        }
        None => None,
    };

    let audio_stream = AudioStream::new(config, settings.output_device.as_deref())?;
    let _stream = audio_stream.start(
        Arc::clone(&engine),
        Arc::clone(&learn),
        midi_consumer,
        event_sender,
    )?;
    println!(
        "Output: {} ({}Hz)",
        audio_stream.output_device_name(),
        audio_stream.sample_rate()
    );

    let monitor_engine = Arc::clone(&engine);
    thread::Builder::new()
        .name("stemplayer-events".to_string())
        .spawn(move || run_event_monitor(monitor_engine, event_receiver, learn_receiver))?;

    let mut console = Console::new(Arc::clone(&engine), Arc::clone(&learn), settings, settings_path);
    if console.scan(None) > 0 {
        console.print_songs(&mut std::io::stdout())?;
    } else {
        println!("No songs loaded yet. Use 'scan DIR', then 'load N'.");
    }

    console.run(std::io::stdin().lock(), std::io::stdout())?;

    engine.unload_song();
    println!("Stemplayer stopped.");
    Ok(())
}

/// Report engine and learn events, and free retired audio buffers.
fn run_event_monitor(
    engine: Arc<StemEngine>,
    events: Receiver<EngineEvent>,
    learn_events: Receiver<LearnEvent>,
) {
    loop {
        channel::select! {
            recv(events) -> event => match event {
                Ok(EngineEvent::PlaybackStopped) => log::debug!("Playback stopped"),
                Ok(EngineEvent::TrackLoadFailed { slot, error }) => {
                    println!("Slot {} failed to load: {}", slot, error)
                }
                Ok(EngineEvent::StreamError(error)) => log::error!("Audio stream error: {}", error),
                Ok(event) => log::debug!("{:?}", event),
                Err(_) => break,
            },
            recv(learn_events) -> event => match event {
                Ok(LearnEvent::MappingLearned { target, cc, channel }) => {
                    println!("{} bound to CC {} (channel {})", target, cc, channel)
                }
                Err(_) => break,
            },
            default(Duration::from_millis(500)) => {
                engine.collect_garbage();
            }
        }
    }
}
