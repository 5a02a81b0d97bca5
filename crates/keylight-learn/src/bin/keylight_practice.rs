//! keylight-practice - run a practice session against real MIDI ports
//!
//! Reads `~/.config/keylight/settings.yaml` (trainer settings) and
//! `~/.config/keylight/midi.yaml` (ports), connects the keyboard and the
//! optional accompaniment synth, and practices a built-in song. LED frames
//! go to a driver thread that logs them; flying-notes frames go to a
//! subscriber that logs a summary.
//!
//! ## Command line
//!
//! `keylight-practice [--settings <path>] [song]` where `song` is `scale`
//! (default) or `chords`.

use anyhow::Context;
use keylight_learn::error::LearnError;
use keylight_learn::led::LedCommand;
use keylight_learn::timeline::{LEFT_HAND_CHANNEL, RIGHT_HAND_CHANNEL};
use keylight_learn::{
    ChannelLedSink, FlyingNotesRenderer, NullPlayback, PlaybackSink, PracticeEngine,
    SettingsStore, TimedEvent, Timeline, TimelineSource, YamlSettingsStore,
};
use keylight_midi::{input_queue, MidiInputHandler, MidiPlaybackPort};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

const LED_QUEUE_CAPACITY: usize = 4096;
const TICKS_PER_BEAT: u32 = 480;
const TEMPO_MICROS: u32 = 600_000;

/// Songs compiled into the binary
struct DemoLibrary;

impl DemoLibrary {
    /// C major scale, right hand up while the left hand holds the root
    fn scale() -> Vec<TimedEvent> {
        let mut events = Vec::new();
        for (i, note) in [60u8, 62, 64, 65, 67, 69, 71, 72].into_iter().enumerate() {
            let bass = if i % 4 == 0 { Some(48 + (i as u8 / 4) * 7) } else { None };
            events.push(TimedEvent::note_on(note, RIGHT_HAND_CHANNEL, 80, 0));
            if let Some(bass) = bass {
                events.push(TimedEvent::note_on(bass, LEFT_HAND_CHANNEL, 70, 0));
            }
            events.push(TimedEvent::note_off(note, RIGHT_HAND_CHANNEL, TICKS_PER_BEAT));
            if let Some(bass) = bass {
                events.push(TimedEvent::note_off(bass, LEFT_HAND_CHANNEL, 0));
            }
        }
        events
    }

    /// I-IV-V-I, right-hand triads over left-hand roots
    fn chords() -> Vec<TimedEvent> {
        let mut events = Vec::new();
        for (root, triad) in [
            (48u8, [60u8, 64, 67]),
            (53, [60, 65, 69]),
            (55, [59, 62, 67]),
            (48, [60, 64, 67]),
        ] {
            events.push(TimedEvent::meta(0));
            events.push(TimedEvent::note_on(root, LEFT_HAND_CHANNEL, 70, 0));
            for note in triad {
                events.push(TimedEvent::note_on(note, RIGHT_HAND_CHANNEL, 80, 0));
            }
            events.push(TimedEvent::note_off(root, LEFT_HAND_CHANNEL, TICKS_PER_BEAT * 2));
            for note in triad {
                events.push(TimedEvent::note_off(note, RIGHT_HAND_CHANNEL, 0));
            }
        }
        events
    }
}

impl TimelineSource for DemoLibrary {
    fn load(&self, song_id: &str) -> keylight_learn::Result<Timeline> {
        let events = match song_id {
            "scale" => Self::scale(),
            "chords" => Self::chords(),
            other => {
                return Err(LearnError::MalformedTimeline(format!(
                    "unknown song '{}'",
                    other
                )))
            }
        };
        Timeline::new(TEMPO_MICROS, TICKS_PER_BEAT, events)
    }
}

struct Args {
    settings_path: PathBuf,
    song: String,
}

fn parse_args() -> anyhow::Result<Option<Args>> {
    let mut settings_path = keylight_learn::settings::default_settings_path();
    let mut song = "scale".to_string();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--settings" => {
                settings_path = args
                    .next()
                    .map(PathBuf::from)
                    .context("--settings requires a path")?;
            }
            "-h" | "--help" => {
                println!("Usage: keylight-practice [--settings <path>] [scale|chords]");
                return Ok(None);
            }
            other => song = other.to_string(),
        }
    }
    Ok(Some(Args {
        settings_path,
        song,
    }))
}

/// Stand-in for the strip driver: logs each presented frame
fn spawn_led_driver(rx: flume::Receiver<LedCommand>, led_count: usize) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("led-driver".to_string())
        .spawn(move || {
            let mut strip = vec![keylight_learn::Rgb::OFF; led_count];
            for command in rx.iter() {
                match command {
                    LedCommand::SetPixel { position, color } => {
                        if let Some(pixel) = strip.get_mut(position) {
                            *pixel = color;
                        }
                    }
                    LedCommand::Present => {
                        let lit: Vec<usize> = strip
                            .iter()
                            .enumerate()
                            .filter(|(_, c)| !c.is_off())
                            .map(|(i, _)| i)
                            .collect();
                        log::debug!("[LED] Frame: {} lit {:?}", lit.len(), lit);
                    }
                }
            }
            log::debug!("[LED] Driver thread exiting");
        })
        .expect("Failed to spawn LED driver thread")
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let Some(args) = parse_args()? else {
        return Ok(());
    };
    log::info!("keylight-practice starting up (song '{}')", args.song);

    let store: Arc<dyn SettingsStore> = Arc::new(YamlSettingsStore::open(&args.settings_path));
    let ports = keylight_midi::load_ports_config(&keylight_midi::default_ports_config_path());

    let (keys, input) = input_queue(ports.queue_capacity);
    let _keyboard = match MidiInputHandler::connect(&ports.input_port, keys) {
        Ok(handler) => Some(handler),
        Err(e) => {
            log::warn!("No MIDI keyboard connected: {}", e);
            None
        }
    };

    let playback: Arc<dyn PlaybackSink> = match ports.playback_port.as_deref() {
        Some(port) => match MidiPlaybackPort::connect(port) {
            Ok(port) => Arc::new(port),
            Err(e) => {
                log::warn!("Accompaniment disabled: {}", e);
                Arc::new(NullPlayback)
            }
        },
        None => Arc::new(NullPlayback),
    };

    let mut engine = {
        let mapping = keylight_learn::LearnSettings::load(store.as_ref()).key_mapping;
        let (led, led_rx) = ChannelLedSink::new(mapping.led_count, LED_QUEUE_CAPACITY);
        let _driver = spawn_led_driver(led_rx, mapping.led_count);
        PracticeEngine::new(Arc::clone(&store), input, Arc::new(led), playback)
    };

    engine
        .load_song(&DemoLibrary, &args.song)
        .with_context(|| format!("Failed to load song '{}'", args.song))?;

    let mut renderer = FlyingNotesRenderer::new(Arc::clone(&store), engine.settings().colors.clone());
    if let Some(timeline) = engine.timeline() {
        renderer.bind_timeline(Arc::clone(timeline));
    }
    let (_subscriber, frames) = renderer.add_subscriber();
    match renderer.start() {
        Ok(()) => {
            engine.attach_position_sync(renderer.position_sync());
            thread::Builder::new()
                .name("frame-log".to_string())
                .spawn(move || {
                    for frame in frames.iter() {
                        log::trace!("[FlyingNotes] {} byte frame", frame.len());
                    }
                })
                .expect("Failed to spawn frame log thread");
        }
        Err(LearnError::RendererDisabled) => {
            log::info!("Flying notes disabled (set flying_notes/enabled: 1 to enable)");
        }
        Err(e) => return Err(e).context("Failed to start flying notes"),
    }

    engine.start().context("Failed to start practice")?;
    engine.join();
    log::info!("Practice finished after {} mistakes", engine.control().mistake_count());

    renderer.stop();
    Ok(())
}
