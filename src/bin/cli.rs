//! waveloom CLI: plays or exports a short demo phrase.
//!
//! Usage:
//!   wl-cli
//!   wl-cli --mode fasttracker-linear --seconds 6
//!   wl-cli --config engine.toml --wav demo.wav

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;
use wl_engine::{EngineConfig, EngineEvent};
use wl_ir::{
    AutoVibrato, Envelope, Instrument, InstrumentKey, NoteTriggerRequest, Sample, SampleData, SampleLoop,
    VibratoWaveform,
};
use wl_master::{Controller, TrackerMode};

/// Semitone steps of the demo arpeggio.
const ARPEGGIO: [i32; 8] = [0, 4, 7, 12, 7, 4, 0, -5];

/// Seconds between arpeggio notes.
const STEP: f64 = 0.25;

#[derive(Parser)]
#[command(name = "wl-cli")]
#[command(about = "Play or export a demo phrase through the waveloom engine")]
struct Cli {
    /// Engine config (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Render offline into this WAV file instead of playing
    #[arg(long)]
    wav: Option<PathBuf>,

    /// Length of the demo
    #[arg(long, default_value_t = 4.0)]
    seconds: f64,

    /// Override the configured tracker mode
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Protracker,
    FasttrackerAmiga,
    FasttrackerLinear,
}

impl From<ModeArg> for TrackerMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Protracker => TrackerMode::ProTracker,
            ModeArg::FasttrackerAmiga => TrackerMode::FastTrackerAmiga,
            ModeArg::FasttrackerLinear => TrackerMode::FastTrackerLinear,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
            EngineConfig::from_toml_str(&text)?
        }
        None => EngineConfig::default(),
    };
    if let Some(mode) = cli.mode {
        config.tracker_mode = mode.into();
    }
    if cli.wav.is_none() {
        if let Ok(rate) = wl_audio::CpalOutput::default_sample_rate() {
            config.sample_rate = rate;
        }
    }

    let mut ctl = Controller::new(config);
    let key = ctl.add_instrument(demo_instrument());
    let seconds = cli.seconds.max(STEP);

    match cli.wav {
        Some(path) => {
            info!(path = %path.display(), seconds, "rendering");
            let wav = ctl.render_to_wav(seconds, |c| schedule_phrase(c, key, 0.0, seconds))?;
            fs::write(&path, &wav).with_context(|| format!("failed to write {}", path.display()))?;
            println!("Wrote {} bytes to {}", wav.len(), path.display());
        }
        None => {
            ctl.play()?;
            let start = ctl.engine().current_time() + 0.05;
            schedule_phrase(&mut ctl, key, start, seconds);
            let notes = ctl
                .drain_events()
                .iter()
                .filter(|e| matches!(e, EngineEvent::NoteTriggered(_)))
                .count();
            info!(notes, "phrase scheduled");
            println!("Playing...");
            std::thread::sleep(Duration::from_secs_f64(seconds + 0.5));
            ctl.stop();
            println!("Done.");
        }
    }
    Ok(())
}

/// Arpeggio over C-4, one note per channel in turn, repeated to fill
/// `seconds`.
fn schedule_phrase(ctl: &mut Controller, key: InstrumentKey, start: f64, seconds: f64) {
    let pitch = ctl.engine().pitch();
    let root = pitch.note_period(48, 0);
    let periods: Vec<f32> = ARPEGGIO.iter().map(|&d| pitch.semitone_offset(root, 0, d)).collect();
    let channels = ctl.engine().channel_count().max(1);

    let steps = (seconds / STEP).floor() as usize;
    for i in 0..steps {
        let time = start + i as f64 * STEP;
        let request = NoteTriggerRequest::new(key, periods[i % periods.len()], 48)
            .on_channel(i % channels)
            .at(time);
        if let Some(handle) = ctl.trigger(&request) {
            ctl.release(&handle, Some(time + STEP * 0.75));
        }
        if i % 4 == 3 {
            ctl.engine_mut().rotate_registry();
        }
    }
}

/// A looped single-cycle saw with a plucky envelope.
fn demo_instrument() -> Instrument {
    let cycle: Vec<i16> = (0..64).map(|i| ((i as i32 - 32) * 640) as i16).collect();
    let mut sample = Sample { data: SampleData::Mono16(cycle), ..Sample::new("saw") };
    sample.loop_ = SampleLoop::new(0, 64);

    let mut inst = Instrument::with_sample("saw", sample);
    let mut env = Envelope::from_points(&[(0, 64), (4, 48), (16, 40), (40, 0)]);
    env.sustain_point = Some(2);
    inst.volume_envelope = env;
    inst.fadeout = 1024;
    inst.vibrato = Some(AutoVibrato { waveform: VibratoWaveform::Sine, speed: 24, depth: 2, sweep: 16 });
    inst
}
