//! CPAL-based audio output backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{debug, error};
use wl_engine::Frame;

use crate::traits::{AudioError, AudioOutput};

/// Output on the default device, fed through a ring buffer.
pub struct CpalOutput {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
    producer: HeapProd<Frame>,
    running: Arc<AtomicBool>,
}

fn default_device() -> Result<Device, AudioError> {
    cpal::default_host().default_output_device().ok_or(AudioError::NoDevice)
}

impl CpalOutput {
    /// Sample rate of the default output device.
    pub fn default_sample_rate() -> Result<u32, AudioError> {
        let config = default_device()?
            .default_output_config()
            .map_err(|e| AudioError::DeviceInit(e.to_string()))?;
        Ok(config.sample_rate().0)
    }

    /// Open the default device. The consumer half goes to
    /// [`build_stream`](Self::build_stream).
    pub fn new() -> Result<(Self, HeapCons<Frame>), AudioError> {
        let device = default_device()?;
        let config = device
            .default_output_config()
            .map_err(|e| AudioError::DeviceInit(e.to_string()))?;

        let mut config: StreamConfig = config.into();
        // the callback writes interleaved stereo
        config.channels = 2;

        // about 100 ms
        let capacity = (config.sample_rate.0 as usize / 10).max(1);
        let (producer, consumer) = HeapRb::<Frame>::new(capacity).split();
        debug!(sample_rate = config.sample_rate.0, capacity, "output device opened");

        Ok((
            Self {
                device,
                config,
                stream: None,
                producer,
                running: Arc::new(AtomicBool::new(false)),
            },
            consumer,
        ))
    }

    pub fn build_stream(&mut self, mut consumer: HeapCons<Frame>) -> Result<(), AudioError> {
        let running = Arc::clone(&self.running);
        let channels = self.config.channels as usize;

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if !running.load(Ordering::Relaxed) {
                        data.fill(0.0);
                        return;
                    }
                    for chunk in data.chunks_mut(channels) {
                        let frame = consumer.try_pop().unwrap_or_default();
                        for (i, sample) in chunk.iter_mut().enumerate() {
                            *sample = match i {
                                0 => frame.left,
                                1 => frame.right,
                                _ => 0.0,
                            };
                        }
                    }
                },
                |err| error!(error = %err, "audio stream error"),
                None,
            )
            .map_err(|e| AudioError::StreamCreate(e.to_string()))?;

        stream.play().map_err(|e| AudioError::Playback(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }
}

impl AudioOutput for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    fn write(&mut self, frames: &[Frame]) -> usize {
        self.producer.push_slice(frames)
    }

    fn start(&mut self) -> Result<(), AudioError> {
        self.running.store(true, Ordering::Relaxed);
        if let Some(stream) = &self.stream {
            stream.play().map_err(|e| AudioError::Playback(e.to_string()))?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        self.running.store(false, Ordering::Relaxed);
        if let Some(stream) = &self.stream {
            stream.pause().map_err(|e| AudioError::Playback(e.to_string()))?;
        }
        Ok(())
    }
}
