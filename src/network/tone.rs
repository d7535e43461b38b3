//! Test-tone voice source
//!
//! Stands in for the traffic capture source: encodes a sine wave into one
//! voice frame every 20ms and hands it to the relay dispatcher.

use std::f32::consts::PI;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::codec::OpusEncoder;
use crate::config::ToneConfig;
use crate::constants::{FRAME_SIZE, SAMPLE_RATE};
use crate::error::CodecError;
use crate::protocol::VoiceFrame;

const AMPLITUDE: f32 = 6000.0;

pub struct ToneSource {
    session_id: u64,
    frequency_hz: f32,
    phase: f32,
    encoder: OpusEncoder,
    samples: Vec<i16>,
}

impl ToneSource {
    pub fn new(config: &ToneConfig) -> Result<Self, CodecError> {
        Ok(Self {
            session_id: config.session_id,
            frequency_hz: config.frequency_hz,
            phase: 0.0,
            encoder: OpusEncoder::voice()?,
            samples: vec![0; FRAME_SIZE],
        })
    }

    /// Encode the next 20ms of tone
    pub fn next_frame(&mut self) -> Result<VoiceFrame, CodecError> {
        let step = 2.0 * PI * self.frequency_hz / SAMPLE_RATE as f32;
        for sample in self.samples.iter_mut() {
            *sample = (self.phase.sin() * AMPLITUDE) as i16;
            self.phase = (self.phase + step) % (2.0 * PI);
        }

        let payload = self.encoder.encode(&self.samples)?;
        Ok(VoiceFrame::new(self.session_id, payload))
    }

    /// Feed frames into `voice` in real time until the channel closes
    pub fn spawn(mut self, voice: mpsc::Sender<VoiceFrame>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = Duration::from_millis((FRAME_SIZE as u64 * 1000) / SAMPLE_RATE as u64);
            let mut interval = tokio::time::interval(period);
            tracing::info!(
                "Test tone {}Hz on session {}",
                self.frequency_hz,
                self.session_id
            );

            loop {
                interval.tick().await;
                let frame = match self.next_frame() {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!("Test tone encoding failed: {}", e);
                        continue;
                    }
                };

                match voice.try_send(frame) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::debug!("Relay busy, test tone frame dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
        })
    }
}
