//! Per-session playback
//!
//! Every session plays on its own output stream so that muting one speaker
//! never affects the others. The stream is built and kept alive on a
//! dedicated thread; the hardware pulls samples through
//! [`SessionOutput::render`], which only touches the lock-free ring buffer,
//! the atomic capability flags and its own recorder.
//!
//! Devices run at their own channel count and sample format;
//! [`InterleavedOutput`] widens the mono i16 render to whatever 48 kHz
//! config [`choose_stream_config`] picked.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{
    FromSample, SampleFormat, SampleRate, SizedSample, StreamConfig, SupportedStreamConfigRange,
};
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::SharedPcmBuffer;
use crate::audio::device::{get_default_output_device, get_output_device};
use crate::audio::recorder::Recorder;
use crate::constants::{FRAME_SIZE, SAMPLE_RATE};
use crate::error::AudioError;
use crate::session::SessionFlags;

/// Consumer side of a session: what the hardware callback runs
pub struct SessionOutput {
    session_id: u64,
    buffer: SharedPcmBuffer,
    flags: Arc<SessionFlags>,
    recorder: Recorder,
    record_error_logged: bool,
}

impl SessionOutput {
    pub fn new(
        session_id: u64,
        buffer: SharedPcmBuffer,
        flags: Arc<SessionFlags>,
        recorder: Recorder,
    ) -> Self {
        Self {
            session_id,
            buffer,
            flags,
            recorder,
            record_error_logged: false,
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    /// Fill one hardware buffer.
    ///
    /// Records before muting, so a muted session still records.
    pub fn render(&mut self, out: &mut [i16]) {
        self.buffer.read_into(out);

        if self.flags.save_enabled() {
            if let Err(e) = self.recorder.write_samples(out) {
                if !self.record_error_logged {
                    tracing::error!("Session {} recording failed: {}", self.session_id, e);
                    self.record_error_logged = true;
                }
            }
        }

        if !self.flags.listen_enabled() {
            out.fill(0);
        }
    }
}

/// Adapts the mono i16 session output to a device's channel count and
/// sample format.
///
/// Mono samples are rendered into a preallocated scratch buffer and copied
/// to every channel of each device frame, so the callback never allocates.
pub struct InterleavedOutput {
    output: SessionOutput,
    channels: usize,
    scratch: Vec<i16>,
}

impl InterleavedOutput {
    pub fn new(output: SessionOutput, channels: u16) -> Self {
        Self {
            output,
            channels: usize::from(channels.max(1)),
            scratch: vec![0; FRAME_SIZE],
        }
    }

    /// Fill one interleaved hardware buffer
    pub fn fill<T>(&mut self, data: &mut [T])
    where
        T: SizedSample + FromSample<i16>,
    {
        let channels = self.channels;
        let silence = T::from_sample(0i16);

        for chunk in data.chunks_mut(self.scratch.len() * channels) {
            let frames = chunk.len() / channels;
            let mono = &mut self.scratch[..frames];
            self.output.render(mono);

            for (frame, &sample) in chunk.chunks_exact_mut(channels).zip(mono.iter()) {
                frame.fill(T::from_sample(sample));
            }
            // Partial trailing frame
            chunk[frames * channels..].fill(silence);
        }
    }
}

/// Pick a 48 kHz output config: F32 first, then I16, then U16
pub fn choose_stream_config(
    configs: &[SupportedStreamConfigRange],
) -> Option<(StreamConfig, SampleFormat)> {
    let rate = SampleRate(SAMPLE_RATE);

    [SampleFormat::F32, SampleFormat::I16, SampleFormat::U16]
        .into_iter()
        .find_map(|format| {
            configs.iter().find(|config| {
                config.sample_format() == format
                    && config.min_sample_rate() <= rate
                    && config.max_sample_rate() >= rate
            })
        })
        .map(|config| {
            let config = config.clone().with_sample_rate(rate);
            (config.config(), config.sample_format())
        })
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut output: InterleavedOutput,
    session_id: u64,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<i16> + Send + 'static,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                output.fill(data);
            },
            move |err| {
                tracing::error!("Session {} output stream error: {}", session_id, err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}

fn open_stream(
    device: &cpal::Device,
    output: SessionOutput,
    session_id: u64,
) -> Result<cpal::Stream, AudioError> {
    let configs: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::StreamError(e.to_string()))?
        .collect();

    let (config, format) = choose_stream_config(&configs).ok_or_else(|| {
        AudioError::UnsupportedFormat(format!("no {} Hz output config", SAMPLE_RATE))
    })?;

    tracing::info!(
        "Session {} output: {} channels, {} Hz, {:?}",
        session_id,
        config.channels,
        config.sample_rate.0,
        format
    );

    let output = InterleavedOutput::new(output, config.channels);
    match format {
        SampleFormat::F32 => build_stream::<f32>(device, &config, output, session_id),
        SampleFormat::I16 => build_stream::<i16>(device, &config, output, session_id),
        SampleFormat::U16 => build_stream::<u16>(device, &config, output, session_id),
        other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    }
}

/// A running playback output, stopped when dropped
pub trait OutputHandle: Send {
    fn is_running(&self) -> bool;
}

/// Opens the playback output of a new session
pub trait OutputFactory: Send + Sync {
    fn open(&self, output: SessionOutput) -> Result<Box<dyn OutputHandle>, AudioError>;
}

/// Plays sessions on a cpal output device
pub struct CpalOutputFactory {
    /// None selects the default output device
    device_id: Option<String>,
}

impl CpalOutputFactory {
    pub fn new(device_id: Option<String>) -> Self {
        Self { device_id }
    }
}

impl OutputFactory for CpalOutputFactory {
    fn open(&self, output: SessionOutput) -> Result<Box<dyn OutputHandle>, AudioError> {
        let stream = PlaybackStream::start(output, self.device_id.clone())?;
        Ok(Box::new(stream))
    }
}

/// cpal output stream owned by its own thread
pub struct PlaybackStream {
    session_id: u64,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl PlaybackStream {
    /// Build and start the stream, waiting until it plays or fails
    pub fn start(output: SessionOutput, device_id: Option<String>) -> Result<Self, AudioError> {
        let session_id = output.session_id();
        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let handle = thread::Builder::new()
            .name(format!("playback-session-{}", session_id))
            .spawn(move || {
                let device = match device_id {
                    Some(id) => get_output_device(&id),
                    None => get_default_output_device(),
                };
                let device = match device {
                    Ok(device) => device,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let stream = match open_stream(&device, output, session_id) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                // Stream is dropped here, closing the output and the recording
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let ready = ready_rx
            .recv()
            .map_err(|_| AudioError::StreamError("playback thread exited".to_string()))
            .and_then(|result| result);

        match ready {
            Ok(()) => Ok(Self {
                session_id,
                running,
                thread_handle: Some(handle),
            }),
            Err(e) => {
                let _ = handle.join();
                Err(e)
            }
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Stop playback and wait for the stream to close
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl OutputHandle for PlaybackStream {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for PlaybackStream {
    fn drop(&mut self) {
        self.stop();
    }
}
