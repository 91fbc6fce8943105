use std::collections::VecDeque;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, AtomicBool, Ordering};
use parking_lot::Mutex;

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    FromSample,
    Sample,
    StreamConfig,
};

use vox_pipeline::Waveform;

pub(crate) fn format_sample<O: FromSample<f32> + Sample>(sample: f32) -> O {
    O::from_sample(sample)
}

/// Plays waveforms already assembled at the device sample rate.
#[derive(Debug, Clone)]
pub(crate) struct AudioPlayer {
    chunk_queue: Arc<Mutex<VecDeque<Vec<f32>>>>,
    sample_rate: u32,
    channel_count: u16,
    state: Arc<Mutex<Option<AudioPlayerState>>>,
    blocks_processed: Arc<AtomicUsize>,
    is_playing: Arc<AtomicBool>,
}

#[derive(Debug, Clone)]
struct AudioPlayerState {
    buffer: Vec<f32>,
    pos: usize,
}

impl AudioPlayer {
    pub fn new() -> Result<Self, anyhow::Error> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or_else(|| anyhow::anyhow!("No default output device"))?;
        let mut supported_configs_range = device.supported_output_configs()?;
        let supported_config = supported_configs_range.next().ok_or_else(|| anyhow::anyhow!("No supported audio config"))?.with_max_sample_rate();
        let sample_format = supported_config.sample_format();
        let config: StreamConfig = supported_config.into();

        let player = Self {
            chunk_queue: Arc::new(Mutex::new(VecDeque::new())),
            sample_rate: config.sample_rate.0,
            channel_count: config.channels,
            state: Arc::new(Mutex::new(None)),
            blocks_processed: Arc::new(AtomicUsize::new(0)),
            is_playing: Arc::new(AtomicBool::new(false)),
        };
        log::debug!("Output device: {} Hz, {} channels, {:?}", player.sample_rate, player.channel_count, sample_format);

        let err_fn = |err| log::error!("an error occurred on the output audio stream: {}", err);

        let stream = match sample_format {
            cpal::SampleFormat::F32 => device.build_output_stream(&config, player.get_callback::<f32>(), err_fn, None)?,
            cpal::SampleFormat::F64 => device.build_output_stream(&config, player.get_callback::<f64>(), err_fn, None)?,
            cpal::SampleFormat::I8 => device.build_output_stream(&config, player.get_callback::<i8>(), err_fn, None)?,
            cpal::SampleFormat::U8 => device.build_output_stream(&config, player.get_callback::<u8>(), err_fn, None)?,
            cpal::SampleFormat::I16 => device.build_output_stream(&config, player.get_callback::<i16>(), err_fn, None)?,
            cpal::SampleFormat::U16 => device.build_output_stream(&config, player.get_callback::<u16>(), err_fn, None)?,
            cpal::SampleFormat::I32 => device.build_output_stream(&config, player.get_callback::<i32>(), err_fn, None)?,
            cpal::SampleFormat::U32 => device.build_output_stream(&config, player.get_callback::<u32>(), err_fn, None)?,
            _ => {
                return Err(anyhow::anyhow!("Unsupported sample format"));
            },
        };

        stream.play()?;

        // the stream must outlive every player clone handed to the callback
        let _leaked_stream = Box::leak(Box::new(stream));

        Ok(player)
    }

    fn get_callback<T>(&self) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static
    where
        T: FromSample<f32> + Sample,
    {
        let self_clone = self.clone();
        move |data: &mut [T], info: &cpal::OutputCallbackInfo| {
            self_clone.callback(data, info);
        }
    }

    fn callback<S: FromSample<f32> + Sample>(&self, buffer: &mut [S], _: &cpal::OutputCallbackInfo) {
        let mut state = self.state.lock();
        self.blocks_processed.fetch_add(1, Ordering::Relaxed);

        if state.is_none() {
            let chunk = self.chunk_queue.lock().pop_front();

            match chunk {
                Some(chunk) => {
                    log::debug!("Playing chunk of {} samples", chunk.len());
                    *state = Some(AudioPlayerState {
                        buffer: chunk,
                        pos: 0,
                    });
                },
                None => {
                    buffer.fill(S::EQUILIBRIUM);
                    self.is_playing.store(false, Ordering::Relaxed);
                    return;
                },
            }
        }

        self.is_playing.store(true, Ordering::Relaxed);

        let ended = match state.as_mut() {
            Some(state_val) => {
                let start = state_val.pos;
                let end = (start + buffer.len()).min(state_val.buffer.len());
                let played = &state_val.buffer[start..end];
                for (out, &sample) in buffer.iter_mut().zip(played) {
                    *out = format_sample::<S>(sample);
                }
                for out in buffer.iter_mut().skip(played.len()) {
                    *out = S::EQUILIBRIUM;
                }
                state_val.pos = end;
                end >= state_val.buffer.len()
            },
            None => true,
        };

        if ended {
            *state = None;
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn blocks_processed(&self) -> usize {
        self.blocks_processed.load(Ordering::Relaxed)
    }

    /// Queue a waveform, spreading its channels over the device layout.
    pub fn play_waveform(&self, wave: &Waveform) {
        if wave.samples.is_empty() {
            return;
        }
        if wave.sample_rate != self.sample_rate {
            log::warn!("Waveform rate {} Hz differs from device rate {} Hz", wave.sample_rate, self.sample_rate);
        }

        let source_channels = wave.channels.max(1) as usize;
        let device_channels = self.channel_count as usize;
        let chunk = wave
            .samples
            .chunks(source_channels)
            .flat_map(|frame| (0..device_channels).map(move |ch| frame[ch.min(frame.len() - 1)]))
            .collect::<Vec<_>>();

        self.chunk_queue.lock().push_back(chunk);
        self.is_playing.store(true, Ordering::Relaxed);
    }

    pub fn wait_blocking_until_empty(&self) {
        loop {
            if !self.is_playing.load(Ordering::Relaxed) {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }

        std::thread::sleep(std::time::Duration::from_millis(100));
    }
}
