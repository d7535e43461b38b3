//! Opus encoder wrapper
//!
//! Used by voice sources on the relay side. Listeners only decode.

use bytes::Bytes;
use opus::{Application, Channels, Encoder};

use crate::constants::{CHANNELS, DEFAULT_BITRATE, FRAME_SIZE, SAMPLE_RATE};
use crate::error::CodecError;

/// Opus encoder configured for voice
pub struct OpusEncoder {
    encoder: Encoder,
    channels: u16,
    frame_size: usize,
    /// Encoding buffer (reused to avoid allocations)
    encode_buffer: Vec<u8>,
    frames_encoded: u64,
    bytes_produced: u64,
}

impl OpusEncoder {
    /// Create a VoIP encoder
    pub fn new(
        sample_rate: u32,
        channels: u16,
        frame_size: usize,
        bitrate: u32,
    ) -> Result<Self, CodecError> {
        let opus_channels = match channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            _ => return Err(CodecError::EncoderInit(
                format!("Unsupported channel count: {}", channels)
            )),
        };

        let mut encoder = Encoder::new(sample_rate, opus_channels, Application::Voip)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

        encoder.set_bitrate(opus::Bitrate::Bits(bitrate as i32))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;

        // Max Opus packet is about 1275 bytes
        let encode_buffer = vec![0u8; 4000];

        Ok(Self {
            encoder,
            channels,
            frame_size,
            encode_buffer,
            frames_encoded: 0,
            bytes_produced: 0,
        })
    }

    /// Encoder for the relayed voice format (48kHz mono, 960 samples)
    pub fn voice() -> Result<Self, CodecError> {
        Self::new(SAMPLE_RATE, CHANNELS, FRAME_SIZE, DEFAULT_BITRATE)
    }

    /// Encode exactly one frame of interleaved i16 samples
    pub fn encode(&mut self, samples: &[i16]) -> Result<Bytes, CodecError> {
        if samples.len() != self.samples_per_frame() {
            return Err(CodecError::InvalidFrameSize(samples.len()));
        }

        let size = self.encoder
            .encode(samples, &mut self.encode_buffer)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

        self.frames_encoded += 1;
        self.bytes_produced += size as u64;

        Ok(Bytes::copy_from_slice(&self.encode_buffer[..size]))
    }

    /// Frame size in samples (per channel)
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Total samples per frame across channels
    pub fn samples_per_frame(&self) -> usize {
        self.frame_size * self.channels as usize
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }

    pub fn bytes_produced(&self) -> u64 {
        self.bytes_produced
    }
}
