//! Headless controller for waveloom.
//!
//! Owns the engine, the instrument bank and the live output, so the CLI
//! and tests drive playback and exports through one API.

mod wav;

use thiserror::Error;
use tracing::info;
use wl_audio::{AudioError, LiveDriver};
use wl_engine::{ActiveNoteHandle, AudioEngine, ConfigError, EngineConfig, EngineError, EngineEvent, RenderError};
use wl_ir::{AudioBuffer, Instrument, InstrumentBank, InstrumentKey, NoteTriggerRequest};

// Re-export common types so callers don't need wl-ir/wl-engine directly.
pub use wl_engine::{RenderMode, Stage, StageValue, StereoSeparation, TrackerMode};

pub use wav::{buffer_to_wav, write_wav};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

pub struct Controller {
    engine: AudioEngine,
    bank: InstrumentBank,
    driver: Option<LiveDriver>,
}

impl Controller {
    /// An initialized engine with an empty instrument bank.
    pub fn new(config: EngineConfig) -> Self {
        let mut engine = AudioEngine::new(config);
        engine.init();
        Self { engine, bank: InstrumentBank::with_key(), driver: None }
    }

    pub fn from_toml(config: &str) -> Result<Self, ControllerError> {
        Ok(Self::new(EngineConfig::from_toml_str(config)?))
    }

    pub fn engine(&self) -> &AudioEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut AudioEngine {
        &mut self.engine
    }

    // --- Instruments ---

    pub fn instruments(&self) -> &InstrumentBank {
        &self.bank
    }

    pub fn add_instrument(&mut self, instrument: Instrument) -> InstrumentKey {
        self.bank.insert(instrument)
    }

    pub fn instrument_mut(&mut self, key: InstrumentKey) -> Option<&mut Instrument> {
        self.bank.get_mut(key)
    }

    // --- Notes ---

    pub fn trigger(&mut self, request: &NoteTriggerRequest) -> Option<ActiveNoteHandle> {
        self.engine.trigger_note(&self.bank, request)
    }

    pub fn release(&mut self, handle: &ActiveNoteHandle, time: Option<f64>) {
        self.engine.release_note(&self.bank, handle, time);
    }

    /// Take the engine's pending notifications. Only the newest
    /// [`wl_engine::EVENT_QUEUE_LIMIT`] are kept between calls.
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        self.engine.drain_events()
    }

    // --- Real-time playback ---

    /// Start the output device and open the cutoff gate.
    pub fn play(&mut self) -> Result<(), ControllerError> {
        if self.driver.is_none() {
            self.driver = Some(LiveDriver::start(self.engine.live_renderer())?);
        }
        self.engine.enable();
        Ok(())
    }

    /// Silence everything and release the device.
    pub fn stop(&mut self) {
        self.engine.disable();
        if let Some(mut driver) = self.driver.take() {
            driver.stop();
        }
    }

    pub fn is_playing(&self) -> bool {
        self.driver.as_ref().is_some_and(LiveDriver::is_running)
    }

    // --- Offline rendering ---

    /// Render `seconds` of audio offline. `schedule` runs while the engine
    /// routes into the offline context and should trigger the notes.
    pub fn render_offline(
        &mut self,
        seconds: f64,
        schedule: impl FnOnce(&mut Self),
    ) -> Result<AudioBuffer, ControllerError> {
        self.engine.start_offline_render(seconds)?;
        schedule(self);
        let pending = self.engine.finish_offline_render()?;
        let buffer = pollster::block_on(pending)?;
        info!(frames = buffer.frames(), "offline render finished");
        Ok(buffer)
    }

    /// [`render_offline`](Self::render_offline), encoded as 16-bit WAV.
    pub fn render_to_wav(
        &mut self,
        seconds: f64,
        schedule: impl FnOnce(&mut Self),
    ) -> Result<Vec<u8>, ControllerError> {
        let buffer = self.render_offline(seconds, schedule)?;
        Ok(wav::buffer_to_wav(&buffer, self.engine.sample_rate()))
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wl_ir::{Sample, SampleData};

    fn tone() -> Instrument {
        let data: Vec<i16> = (0..1000).map(|i| if i % 20 < 10 { 12000 } else { -12000 }).collect();
        let mut sample = Sample { data: SampleData::Mono16(data), ..Sample::new("square") };
        sample.loop_ = wl_ir::SampleLoop::new(0, 1000);
        Instrument::with_sample("square", sample)
    }

    #[test]
    fn offline_render_produces_audio_and_returns_live() {
        let mut ctl = Controller::new(EngineConfig { sample_rate: 8000, ..EngineConfig::default() });
        let key = ctl.add_instrument(tone());
        let live_id = ctl.engine().context_id();

        let buffer = ctl
            .render_offline(0.5, |c| {
                c.trigger(&NoteTriggerRequest::new(key, 428.0, 48).at(0.1));
            })
            .unwrap();

        assert_eq!(buffer.frames(), 4000);
        assert_eq!(buffer.channel(0)[..700].iter().fold(0.0f32, |a, s| a.max(s.abs())), 0.0);
        assert!(buffer.peak() > 0.1);
        assert_eq!(ctl.engine().render_mode(), RenderMode::Live);
        assert_eq!(ctl.engine().context_id(), live_id);
    }

    #[test]
    fn wav_export_has_one_frame_per_sample() {
        let mut ctl = Controller::new(EngineConfig { sample_rate: 8000, ..EngineConfig::default() });
        let bytes = ctl.render_to_wav(0.25, |_| {}).unwrap();
        assert_eq!(bytes.len(), 44 + 2000 * 4);
    }

    #[test]
    fn live_notifications_stay_bounded() {
        let mut ctl = Controller::new(EngineConfig { sample_rate: 8000, ..EngineConfig::default() });
        let key = ctl.add_instrument(tone());
        let total = wl_engine::EVENT_QUEUE_LIMIT + 50;
        for i in 0..total {
            assert!(ctl.trigger(&NoteTriggerRequest::new(key, 428.0, 48).on_channel(i % 4)).is_some());
            if i % 8 == 7 {
                ctl.engine_mut().rotate_registry();
            }
        }
        assert_eq!(ctl.engine().pending_events(), wl_engine::EVENT_QUEUE_LIMIT);

        let events = ctl.drain_events();
        assert_eq!(events.len(), wl_engine::EVENT_QUEUE_LIMIT);
        assert!(matches!(events.last(), Some(EngineEvent::NoteTriggered(h)) if h.channel == (total - 1) % 4));
        assert_eq!(ctl.engine().pending_events(), 0);
    }

    #[test]
    fn config_errors_surface() {
        assert!(matches!(
            Controller::from_toml("sample_rate = 0"),
            Err(ControllerError::Config(ConfigError::ZeroSampleRate))
        ));
    }

    #[test]
    fn triggering_an_unknown_instrument_fails() {
        let mut ctl = Controller::default();
        let key = ctl.add_instrument(tone());
        let mut other = Controller::default();
        assert!(other.trigger(&NoteTriggerRequest::new(key, 428.0, 48)).is_none());
        assert!(ctl.trigger(&NoteTriggerRequest::new(key, 428.0, 48)).is_some());
    }
}
