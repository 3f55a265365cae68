mod tui;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use crossterm::terminal;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tracing::{error, info, warn};

use padseq::audio::{self, AudioHandle};
use padseq::audio_api::{VoiceId, VoiceSpec};
use padseq::clock::{AudioClock, ManualClock};
use padseq::config::{Config, LogLevel};
use padseq::error::TriggerError;
use padseq::loader::{self, SampleSource};
use padseq::midi::{MidiLedOutput, MidiPadInput};
use padseq::pipeline::persistence::{self, SampleRecord};
use padseq::samples::{SoundSlot, TrimRegion};
use padseq::shared::{FIRST_PAD_NOTE, InputEvent, NUM_PADS, Note, PadEvent};
use padseq::trigger::{NullOutput, VoiceOutput};
use padseq::Session;

const CONFIG_FILE: &str = "config.json";
const LOG_FILE: &str = "padseq.log";
const FALLBACK_SAMPLE_RATE: u32 = 48_000;
const FRAME: Duration = Duration::from_millis(16); // ~60fps redraw
const MAX_SLEEP: f64 = 0.005; // keeps midi hits from waiting on the keyboard poll

#[derive(Parser, Debug)]
#[command(name = "padseq", about = "Pad controller sample sequencer", long_about = None)]
struct Args {
    /// Project directory with the .wav files and the saved session
    project: Option<PathBuf>,

    /// Config file (default: <project>/.padseq/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Starting tempo, overrides the saved session
    #[arg(long)]
    bpm: Option<f64>,

    /// Connect to the first MIDI input whose name contains this
    #[arg(long)]
    midi_in: Option<String>,

    /// Send pad LEDs to the first MIDI output whose name contains this
    #[arg(long)]
    midi_out: Option<String>,

    /// error, warn, info, debug or trace
    #[arg(long)]
    log_level: Option<LogLevel>,
}

// The device when there is one, otherwise a sink that refuses voices so the
// rest of the app still runs.
enum Output {
    Device(AudioHandle),
    Offline(NullOutput),
}

impl VoiceOutput for Output {
    fn start(&mut self, voice: &VoiceSpec) -> Result<(), TriggerError> {
        match self {
            Output::Device(h) => h.start(voice),
            Output::Offline(n) => n.start(voice),
        }
    }

    fn stop(&mut self, voice: VoiceId, at: f64, time_constant: f64, hard_after: f64) -> Result<(), TriggerError> {
        match self {
            Output::Device(h) => h.stop(voice, at, time_constant, hard_after),
            Output::Offline(n) => n.stop(voice, at, time_constant, hard_after),
        }
    }

    fn cancel(&mut self, voice: VoiceId) -> Result<(), TriggerError> {
        match self {
            Output::Device(h) => h.cancel(voice),
            Output::Offline(n) => n.cancel(voice),
        }
    }

    fn poll_ended(&mut self) -> Vec<VoiceId> {
        match self {
            Output::Device(h) => h.poll_ended(),
            Output::Offline(n) => n.poll_ended(),
        }
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let project_dir = match &args.project {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("no current directory")?,
    };

    let (config, config_note) = load_config(&args, &project_dir)?;
    init_logging(&project_dir, config.log_level)?;
    info!(project = %project_dir.display(), "padseq starting");
    if let Some(note) = config_note {
        warn!("{note}");
    }

    let (output, clock, sample_rate, audio_error) = match audio::start_audio() {
        Ok(handle) => {
            let clock: Arc<dyn AudioClock> = Arc::new(handle.clock());
            let rate = handle.sample_rate();
            (Output::Device(handle), clock, rate, None)
        }
        Err(e) => {
            error!(error = %e, "running without audio");
            let clock = ManualClock::new(0.0);
            clock.set_available(false);
            let clock: Arc<dyn AudioClock> = Arc::new(clock);
            (Output::Offline(NullOutput), clock, FALLBACK_SAMPLE_RATE, Some(e))
        }
    };

    let mut session = Session::new(&config, clock, output);
    let saved_samples = match persistence::load_session(&project_dir) {
        Ok(Some(record)) => session.restore(record),
        Ok(None) => Vec::new(),
        Err(e) => {
            warn!(error = %e, "saved session unreadable, starting fresh");
            Vec::new()
        }
    };
    if let Some(bpm) = args.bpm {
        session.set_tempo(bpm);
    }
    load_samples(&mut session, &project_dir, saved_samples, sample_rate);

    let (pad_tx, pad_rx) = crossbeam_channel::bounded::<PadEvent>(256);
    let midi_in = config.midi.input_port.as_deref().and_then(|port| {
        MidiPadInput::connect(Some(port), pad_tx)
            .inspect_err(|e| warn!(error = %e, "midi input not connected"))
            .ok()
    });
    let mut ports: Vec<String> = midi_in.iter().map(|m| format!("in: {}", m.port_name())).collect();
    if let Some(port) = config.midi.output_port.as_deref() {
        match MidiLedOutput::connect(Some(port)) {
            Ok(leds) => {
                ports.push(format!("out: {}", leds.port_name()));
                session.set_led_sink(Box::new(leds));
            }
            Err(e) => warn!(error = %e, "midi output not connected"),
        }
    }

    match &audio_error {
        Some(e) => session.set_status(e.to_string()),
        None if ports.is_empty() => session.set_status("ready"),
        None => session.set_status(format!("ready, midi {}", ports.join(", "))),
    }

    terminal::enable_raw_mode()?;
    // Enable keyboard enhancement for real press/release detection.
    // Falls back gracefully if the terminal doesn't support it.
    let _ = crossterm::execute!(
        std::io::stdout(),
        crossterm::event::PushKeyboardEnhancementFlags(crossterm::event::KeyboardEnhancementFlags::REPORT_EVENT_TYPES)
    );
    let _guard = RawModeGuard;
    let backend = CrosstermBackend::new(std::io::stdout());
    let mut term = Terminal::new(backend)?;
    term.clear()?;

    let mut tui_state = tui::mode::TuiState::default();
    let mut last_draw: Option<Instant> = None;

    loop {
        session.tick();

        if last_draw.is_none_or(|t| t.elapsed() >= FRAME) {
            let state = session.display_state();
            term.draw(|frame| tui::view::render(frame, frame.area(), &state, &tui_state))?;
            last_draw = Some(Instant::now());
        }

        let mut events = tui::input::poll_input(sleep_for(&session), &mut tui_state)?;
        events.extend(pad_rx.try_iter().map(InputEvent::Pad));
        for event in events {
            if event == InputEvent::Quit {
                session.stop();
                if let Err(e) = persistence::save_session(&project_dir, &session.to_record()) {
                    error!(error = %e, "session not saved");
                }
                info!("padseq quitting");
                return Ok(());
            }
            if event == InputEvent::RemoveSample {
                unload_selected(&mut session);
                continue;
            }
            session.handle_input(event);
        }
    }
}

// Until the session next needs attention, capped so input stays responsive.
fn sleep_for(session: &Session<Output>) -> Duration {
    let seconds = session
        .next_wake()
        .map_or(MAX_SLEEP, |wake| (wake - session.now()).clamp(0.0, MAX_SLEEP));
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO)
}

// An explicit --config must load; the implicit one falls back to defaults.
fn load_config(args: &Args, project_dir: &Path) -> anyhow::Result<(Config, Option<String>)> {
    let (mut config, note) = match &args.config {
        Some(path) => {
            let config = Config::load(path).with_context(|| format!("loading config {}", path.display()))?;
            (config, None)
        }
        None => {
            let path = persistence::state_dir(project_dir).join(CONFIG_FILE);
            if path.exists() {
                match Config::load(&path) {
                    Ok(config) => (config, None),
                    Err(e) => (Config::default(), Some(format!("ignoring {}: {e}", path.display()))),
                }
            } else {
                (Config::default(), None)
            }
        }
    };

    if let Some(bpm) = args.bpm {
        config.clock.bpm = bpm;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if args.midi_in.is_some() {
        config.midi.input_port = args.midi_in.clone();
    }
    if args.midi_out.is_some() {
        config.midi.output_port = args.midi_out.clone();
    }
    Ok((config.sanitized(), note))
}

// The terminal belongs to the UI, so logs go to <project>/.padseq/padseq.log.
fn init_logging(project_dir: &Path, level: LogLevel) -> anyhow::Result<()> {
    let dir = persistence::state_dir(project_dir);
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE))
        .context("opening log file")?;
    tracing_subscriber::fmt()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_max_level(tracing::Level::from(level))
        .init();
    Ok(())
}

// Saved assignments first, then any other .wav in the project directory
// fills the remaining pads from the bottom-left up.
fn load_samples(session: &mut Session<Output>, project_dir: &Path, saved: Vec<SampleRecord>, sample_rate: u32) {
    let mut used = HashSet::new();
    for record in saved {
        let path = if record.path.is_absolute() { record.path.clone() } else { project_dir.join(&record.path) };
        match load_sample(session, Note(record.note), &path, record.trim, sample_rate) {
            Ok(()) => {
                used.insert(path);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "saved sample not loaded"),
        }
    }

    let wavs = loader::index_wav_in_dir(project_dir).unwrap_or_else(|e| {
        warn!(error = %e, "could not list project directory");
        Vec::new()
    });
    let free: Vec<Note> = (0..NUM_PADS as u8)
        .map(|i| Note(FIRST_PAD_NOTE + i))
        .filter(|n| session.samples().slot(*n).is_none())
        .collect();
    let fresh = wavs.into_iter().filter(|p| !used.contains(p));
    for (note, path) in free.into_iter().zip(fresh) {
        if let Err(e) = load_sample(session, note, &path, TrimRegion::default(), sample_rate) {
            warn!(path = %path.display(), error = %e, "sample not loaded");
        }
    }
}

fn load_sample(
    session: &mut Session<Output>,
    note: Note,
    path: &Path,
    trim: TrimRegion,
    sample_rate: u32,
) -> padseq::Result<()> {
    let (id, buffer) = loader::load(&SampleSource::Path(path.to_path_buf()), sample_rate)?;
    let frames = buffer.frames();
    if let Output::Device(handle) = session.output() {
        handle
            .register_sample(id, buffer)
            .map_err(|e| padseq::Error::AudioUnavailable(e.to_string()))?;
    }
    let slot = SoundSlot { sample_id: id, frames, sample_rate, trim, path: Some(path.to_path_buf()) };
    if let Some(old) = session.assign_sample(note, slot) {
        if let Output::Device(handle) = session.output() {
            let _ = handle.unregister_sample(old.sample_id);
        }
    }
    info!(note = note.0, path = %path.display(), "sample loaded");
    Ok(())
}

// Also frees the decoded buffer, which the session can't reach.
fn unload_selected(session: &mut Session<Output>) {
    let note = session.selected_note();
    let Some(old) = session.remove_sample(note) else {
        return;
    };
    if let Output::Device(handle) = session.output() {
        let _ = handle.unregister_sample(old.sample_id);
    }
    info!(note = note.0, "sample unloaded");
}

struct RawModeGuard;
impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = crossterm::execute!(std::io::stdout(), crossterm::event::PopKeyboardEnhancementFlags);
        let _ = terminal::disable_raw_mode();
    }
}
